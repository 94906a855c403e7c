pub mod clock;
pub mod fixtures;
pub mod network;
pub mod presence;

pub use clock::ManualClock;
pub use network::NetworkConditions;
pub use presence::{RecordingSink, StaticPresence};

use std::sync::Once;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

pub fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("tablesync=debug,tablesync_batch=debug,tablesync_predict=debug")
            }))
            .with_test_writer()
            .init();
    });
}
