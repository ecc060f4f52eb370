pub mod schema;

pub use schema::{
    Config, DatabaseConfig, GatewayConfig, MediaConfig, Mode, PollsConfig, ReliabilityConfig,
    SyncConfig, TransportConfig,
};
