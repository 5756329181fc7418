//! Registry of long-running fetch operations

use provision_shared::OperationStatus;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// How long a finished operation stays queryable
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone)]
struct OperationRecord {
    status: OperationStatus,
    finished_at: Option<Instant>,
}

/// Tracks operations by name (`op-N`) from start until they are reaped
pub struct OperationManager {
    next_id: AtomicU64,
    operations: RwLock<HashMap<String, OperationRecord>>,
    retention: Duration,
}

impl OperationManager {
    pub fn new(retention: Duration) -> Self {
        Self {
            next_id: AtomicU64::new(0),
            operations: RwLock::new(HashMap::new()),
            retention,
        }
    }

    /// Register a new in-flight operation and return its status
    pub async fn register(&self) -> OperationStatus {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let status = OperationStatus::pending(format!("op-{id}"));
        self.operations.write().await.insert(
            status.name.clone(),
            OperationRecord {
                status: status.clone(),
                finished_at: None,
            },
        );
        status
    }

    /// Record the terminal status of an operation
    pub async fn complete(&self, status: OperationStatus) {
        let mut operations = self.operations.write().await;
        match operations.get_mut(&status.name) {
            Some(record) => {
                record.status = status;
                record.finished_at = Some(Instant::now());
            }
            None => warn!("completed unknown operation {}", status.name),
        }
    }

    pub async fn get(&self, name: &str) -> Option<OperationStatus> {
        self.operations
            .read()
            .await
            .get(name)
            .map(|record| record.status.clone())
    }

    /// Run `script` under `bash -o pipefail` as a new operation
    pub async fn start(self: &Arc<Self>, script: String) -> OperationStatus {
        let status = self.register().await;
        let name = status.name.clone();
        info!("{} started: {}", name, script);

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let finished = match Command::new("bash")
                .args(["-o", "pipefail", "-c", script.as_str()])
                .output()
                .await
            {
                Ok(output) if output.status.success() => {
                    info!("{} succeeded", name);
                    OperationStatus::succeeded(&name, output.stdout)
                }
                Ok(output) => {
                    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                    warn!("{} failed ({}): {}", name, output.status, stderr);
                    OperationStatus::failed(&name, format!("{}: {}", output.status, stderr))
                }
                Err(e) => {
                    warn!("{} could not start: {}", name, e);
                    OperationStatus::failed(&name, format!("spawn failed: {e}"))
                }
            };
            manager.complete(finished).await;
        });

        status
    }

    /// Drop finished operations older than the retention period
    pub async fn cleanup_finished(&self) -> Vec<String> {
        let mut operations = self.operations.write().await;
        let expired: Vec<String> = operations
            .iter()
            .filter(|(_, record)| {
                record
                    .finished_at
                    .is_some_and(|at| at.elapsed() >= self.retention)
            })
            .map(|(name, _)| name.clone())
            .collect();

        for name in &expired {
            operations.remove(name);
            debug!("reaped {}", name);
        }
        expired
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.operations.read().await.len()
    }
}
