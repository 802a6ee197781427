use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

use crate::store::Keyspace;

const SWEEP_INTERVAL: Duration = Duration::from_millis(100);
const SWEEP_BUDGET: usize = 20;

/// Background sweeper probing keys with an expiry at a bounded rate.
/// Lazy expiry on access handles the rest.
pub fn spawn_sweeper(keyspace: Arc<Keyspace>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            sleep(SWEEP_INTERVAL).await;
            keyspace.sweep_expired(SWEEP_BUDGET).await;
        }
    })
}
