//! Periodic cleanup of finished operations

use super::operations::OperationManager;
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::info;

/// Removes finished operations once their retention has passed
pub struct OperationReaper {
    operations: Arc<OperationManager>,
    check_interval: Duration,
}

impl OperationReaper {
    pub fn new(operations: Arc<OperationManager>) -> Self {
        Self {
            operations,
            check_interval: Duration::from_secs(30),
        }
    }

    pub fn with_interval(mut self, check_interval: Duration) -> Self {
        self.check_interval = check_interval;
        self
    }

    pub async fn run(&self) {
        let mut ticker = interval(self.check_interval);

        loop {
            ticker.tick().await;

            let reaped = self.operations.cleanup_finished().await;
            if !reaped.is_empty() {
                info!("reaped {} finished operation(s)", reaped.len());
            }
        }
    }
}
