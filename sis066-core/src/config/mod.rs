mod loader;
mod types;

pub use loader::load_from_path;
pub use types::{
    ArqConfig, Config, ListenEntry, PeerEntry, PoolConfig, TelemetryConfig,
};
