pub mod loader;
pub mod schema;

pub use loader::{get_config_path, load_config, save_config};
pub use schema::{
    AgentDefaults, AgentsConfig, ChannelConfig, ChannelsConfig, Config, CronConfig, DmPolicy,
    GatewayConfig, GroupPolicy, PairingConfig, RestartConfig, ThinkingLevel, WebhookConfig,
    WebhookTarget,
};
