pub mod init;
pub mod manager;
pub mod store;

pub use init::{init_session, SessionHooks, SessionInitContext, SessionInitResult};
pub use manager::{Session, SessionManager};
pub use store::SessionStore;
