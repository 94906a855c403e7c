//! Tabletop state synchronization service
//!
//! Wires the room batcher and the prediction ledger over one shared
//! network-metrics store and an in-memory presence registry.

pub mod config;
pub mod presence;
pub mod service;
pub mod sim;

pub use config::{ConfigError, LogConfig, SyncConfig};
pub use presence::PresenceRegistry;
pub use service::{ServiceMetrics, SyncService};

pub use tablesync_batch as batch;
pub use tablesync_predict as predict;
pub use tablesync_state as state;
