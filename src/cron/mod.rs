pub mod event_matcher;
pub mod reaper;
pub mod run_log;
pub mod service;
pub mod types;
