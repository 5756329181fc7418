//! Remote execution adapter over any [`DutTransport`]
//!
//! Deadline races, restart/reconnect and fetch retries live here so every
//! transport gets the same semantics.

use super::{
    args, context::CallContext, error::AdapterError, operation::OperationPoller,
    traits::DutAdapter,
};
use crate::transport::DutTransport;
use async_trait::async_trait;
use provision_shared::{cache_request::Destination, limits, CacheRequest, ExecRequest};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const BOOT_ID_PATH: &str = "/proc/sys/kernel/random/boot_id";

/// Timing and retry knobs for [`RemoteAdapter`]
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// Used when the caller's context has no deadline
    pub command_timeout: Duration,
    pub restart_timeout: Duration,
    pub reconnect_attempts: u32,
    pub reconnect_interval: Duration,
    pub fetch_retry_times: u32,
    pub fetch_retry_interval: Duration,
    pub poll_interval: Duration,
    /// Skip reboots entirely (dry runs, tests)
    pub no_reboot: bool,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(limits::DEFAULT_COMMAND_TIMEOUT_SECS),
            restart_timeout: Duration::from_secs(limits::RESTART_TIMEOUT_SECS),
            reconnect_attempts: limits::RESTART_RECONNECT_ATTEMPTS,
            reconnect_interval: Duration::from_millis(limits::RESTART_RECONNECT_INTERVAL_MS),
            fetch_retry_times: limits::FETCH_RETRY_TIMES,
            fetch_retry_interval: Duration::from_millis(limits::FETCH_RETRY_INTERVAL_MS),
            poll_interval: Duration::from_millis(limits::OPERATION_POLL_INTERVAL_MS),
            no_reboot: false,
        }
    }
}

pub struct RemoteAdapter<T: DutTransport> {
    transport: Arc<T>,
    config: AdapterConfig,
    poller: OperationPoller,
}

impl<T: DutTransport> RemoteAdapter<T> {
    pub fn new(transport: Arc<T>, config: AdapterConfig) -> Self {
        let poller = OperationPoller::new(config.poll_interval);
        Self {
            transport,
            config,
            poller,
        }
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    async fn read_boot_id(&self, ctx: &CallContext) -> Result<String, AdapterError> {
        let out = self.run_command(ctx, "cat", &args(&[BOOT_ID_PATH])).await?;
        Ok(out.trim().to_string())
    }

    /// Reconnect and read the boot id, bounded by one reconnect interval
    async fn probe(&self, ctx: &CallContext) -> Result<String, AdapterError> {
        let probe_ctx = ctx.narrowed(self.config.reconnect_interval);
        let deadline = probe_ctx.effective_deadline(self.config.reconnect_interval);
        tokio::time::timeout_at(deadline, self.transport.reconnect())
            .await
            .map_err(|_| AdapterError::Timeout(self.config.reconnect_interval))??;
        self.read_boot_id(&probe_ctx).await
    }

    async fn fetch(&self, ctx: &CallContext, request: CacheRequest) -> Result<(), AdapterError> {
        let attempts = self.config.fetch_retry_times.max(1);
        let mut last_err = None;

        for attempt in 1..=attempts {
            if ctx.is_expired() {
                return Err(AdapterError::Timeout(Duration::ZERO));
            }

            match self.fetch_once(ctx, request.clone()).await {
                Ok(()) => {
                    debug!("fetch of {} completed on attempt {}", request.source, attempt);
                    return Ok(());
                }
                Err(e) if e.is_timeout() => return Err(e),
                Err(e) => {
                    warn!(
                        "fetch of {} failed (attempt {}/{}): {}",
                        request.source, attempt, attempts, e
                    );
                    last_err = Some(e);
                }
            }

            if attempt < attempts {
                sleep_within(ctx, self.config.fetch_retry_interval).await?;
            }
        }

        Err(last_err.unwrap_or_else(|| AdapterError::Transport("fetch never attempted".into())))
    }

    async fn fetch_once(&self, ctx: &CallContext, request: CacheRequest) -> Result<(), AdapterError> {
        let work = async {
            let op = self.transport.cache(request).await?;
            self.poller.wait(self.transport.as_ref(), op).await
        };

        match ctx.deadline() {
            Some(deadline) => {
                let budget = deadline.saturating_duration_since(Instant::now());
                tokio::time::timeout_at(deadline, work)
                    .await
                    .map_err(|_| AdapterError::Timeout(budget))??;
            }
            None => {
                work.await?;
            }
        }
        Ok(())
    }
}

/// Sleep for `interval`, or fail with a timeout if the context expires first
async fn sleep_within(ctx: &CallContext, interval: Duration) -> Result<(), AdapterError> {
    let wake = Instant::now() + interval;
    match ctx.deadline() {
        Some(deadline) if deadline <= wake => {
            let budget = deadline.saturating_duration_since(Instant::now());
            tokio::time::sleep_until(deadline).await;
            Err(AdapterError::Timeout(budget))
        }
        _ => {
            tokio::time::sleep_until(wake).await;
            Ok(())
        }
    }
}

#[async_trait]
impl<T: DutTransport> DutAdapter for RemoteAdapter<T> {
    async fn run_command(
        &self,
        ctx: &CallContext,
        command: &str,
        args: &[String],
    ) -> Result<String, AdapterError> {
        debug!("run cmd: {} {:?}", command, args);

        if ctx.is_expired() {
            warn!("run cmd {} skipped: deadline already passed", command);
            return Err(AdapterError::Timeout(Duration::ZERO));
        }

        let deadline = ctx.effective_deadline(self.config.command_timeout);
        let budget = deadline.saturating_duration_since(Instant::now());

        // The exec runs as its own task so the timer can win the race; on timeout
        // the task is aborted, which releases its pending slot in the transport.
        let transport = Arc::clone(&self.transport);
        let request = ExecRequest {
            command: command.to_string(),
            args: args.to_vec(),
        };
        let mut worker = tokio::spawn(async move { transport.exec(request).await });

        let response = match tokio::time::timeout_at(deadline, &mut worker).await {
            Ok(joined) => joined
                .map_err(|e| AdapterError::Transport(format!("exec task failed: {e}")))??,
            Err(_) => {
                worker.abort();
                warn!("run cmd {} timed out after {:?}", command, budget);
                return Err(AdapterError::Timeout(budget));
            }
        };

        if !response.stderr.is_empty() {
            debug!(
                "{} finished with stderr: {}",
                command,
                String::from_utf8_lossy(&response.stderr).trim()
            );
        }

        if response.exit_status != 0 {
            let message = if response.error_message.is_empty() {
                String::from_utf8_lossy(&response.stderr).trim().to_string()
            } else {
                response.error_message
            };
            return Err(AdapterError::RemoteStatus {
                status: response.exit_status,
                message,
            });
        }

        Ok(String::from_utf8_lossy(&response.stdout).into_owned())
    }

    async fn restart(&self, ctx: &CallContext) -> Result<(), AdapterError> {
        if self.config.no_reboot {
            info!("restart skipped: no-reboot mode");
            return Ok(());
        }

        let ctx = ctx.narrowed(self.config.restart_timeout);
        let boot_id = self.read_boot_id(&ctx).await?;
        info!("restarting device via {} (boot id {})", self.transport.name(), boot_id);

        let deadline = ctx.effective_deadline(self.config.restart_timeout);
        let budget = deadline.saturating_duration_since(Instant::now());
        let acked = tokio::time::timeout_at(deadline, self.transport.reboot())
            .await
            .map_err(|_| {
                warn!("reboot request not acknowledged within {:?}", budget);
                AdapterError::Timeout(budget)
            })?;
        match acked {
            Ok(()) => {}
            // The link may go down before the acknowledgement makes it back
            Err(e @ (AdapterError::Closed | AdapterError::Io(_) | AdapterError::Transport(_))) => {
                debug!("reboot request ended with {}", e);
            }
            Err(e) => return Err(e),
        }

        let attempts = self.config.reconnect_attempts;
        let mut last = String::from("no reconnect attempted");
        for attempt in 1..=attempts {
            sleep_within(&ctx, self.config.reconnect_interval).await?;

            match self.probe(&ctx).await {
                Ok(id) if id != boot_id => {
                    info!("device reachable again after {} attempt(s)", attempt);
                    return Ok(());
                }
                Ok(_) => {
                    last = "device has not rebooted yet".into();
                    debug!("reconnect attempt {}: boot id unchanged", attempt);
                }
                Err(e) if e.is_timeout() && ctx.is_expired() => return Err(e),
                Err(e) => {
                    debug!("reconnect attempt {} failed: {}", attempt, e);
                    last = e.to_string();
                }
            }
        }

        Err(AdapterError::Unreachable { attempts, last })
    }

    async fn fetch_and_store(
        &self,
        ctx: &CallContext,
        source: &str,
        destination: &str,
    ) -> Result<(), AdapterError> {
        info!("copy data from {} to {}", source, destination);
        self.fetch(
            ctx,
            CacheRequest {
                source: source.to_string(),
                destination: Some(Destination::File(destination.to_string())),
            },
        )
        .await
    }

    async fn fetch_and_pipe(
        &self,
        ctx: &CallContext,
        source: &str,
        pipe_command: &str,
    ) -> Result<(), AdapterError> {
        info!("piping {} into `{}`", source, pipe_command);
        self.fetch(
            ctx,
            CacheRequest {
                source: source.to_string(),
                destination: Some(Destination::Pipe(pipe_command.to_string())),
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{Operation, OperationResult, OperationSource};
    use provision_shared::ExecResponse;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Scripted transport standing in for a device agent
    #[derive(Default)]
    struct FakeTransport {
        hang: bool,
        hang_reboot: bool,
        execs: AtomicU32,
        exit_status: i32,
        stdout: String,
        boot_ids: Mutex<VecDeque<String>>,
        failing_reconnects: AtomicU32,
        failing_fetches: AtomicU32,
        reboots: AtomicU32,
        reconnects: AtomicU32,
        cache_calls: AtomicU32,
        failed_ops: Mutex<Vec<String>>,
    }

    impl FakeTransport {
        fn with_boot_ids(ids: &[&str]) -> Self {
            Self {
                boot_ids: Mutex::new(ids.iter().map(|s| s.to_string()).collect()),
                ..Default::default()
            }
        }

        fn next_boot_id(&self) -> String {
            let mut ids = self.boot_ids.lock().unwrap();
            if ids.len() > 1 {
                ids.pop_front().unwrap()
            } else {
                ids.front().cloned().unwrap_or_default()
            }
        }
    }

    #[async_trait]
    impl OperationSource for FakeTransport {
        async fn get_operation(&self, name: &str) -> Result<Operation, AdapterError> {
            let failed = self.failed_ops.lock().unwrap().contains(&name.to_string());
            let result = if failed {
                OperationResult::Error(format!("fetch {name} failed"))
            } else {
                OperationResult::Response(Default::default())
            };
            Ok(Operation {
                name: name.to_string(),
                done: true,
                result: Some(result),
            })
        }
    }

    #[async_trait]
    impl DutTransport for FakeTransport {
        async fn exec(&self, request: ExecRequest) -> Result<ExecResponse, AdapterError> {
            self.execs.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                std::future::pending::<()>().await;
            }
            let stdout = if request.args.first().map(String::as_str) == Some(BOOT_ID_PATH) {
                self.next_boot_id()
            } else {
                self.stdout.clone()
            };
            Ok(ExecResponse {
                stdout: stdout.into_bytes(),
                stderr: b"No space left on device\n".to_vec(),
                exit_status: self.exit_status,
                error_message: String::new(),
            })
        }

        async fn reboot(&self) -> Result<(), AdapterError> {
            self.reboots.fetch_add(1, Ordering::SeqCst);
            if self.hang_reboot {
                std::future::pending::<()>().await;
            }
            Err(AdapterError::Closed)
        }

        async fn reconnect(&self) -> Result<(), AdapterError> {
            self.reconnects.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failing_reconnects.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failing_reconnects.store(remaining - 1, Ordering::SeqCst);
                return Err(AdapterError::Transport("connection refused".into()));
            }
            Ok(())
        }

        async fn cache(&self, _request: CacheRequest) -> Result<Operation, AdapterError> {
            let n = self.cache_calls.fetch_add(1, Ordering::SeqCst) + 1;
            let name = format!("op-{n}");
            let remaining = self.failing_fetches.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failing_fetches.store(remaining - 1, Ordering::SeqCst);
                self.failed_ops.lock().unwrap().push(name.clone());
            }
            Ok(Operation {
                name,
                done: false,
                result: None,
            })
        }

        async fn close(&self) {}

        fn name(&self) -> &'static str {
            "fake"
        }
    }

    fn fast_config() -> AdapterConfig {
        AdapterConfig {
            reconnect_attempts: 3,
            reconnect_interval: Duration::from_secs(10),
            fetch_retry_times: 3,
            fetch_retry_interval: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
            ..Default::default()
        }
    }

    fn adapter(transport: FakeTransport) -> RemoteAdapter<FakeTransport> {
        RemoteAdapter::new(Arc::new(transport), fast_config())
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_command_times_out_at_deadline() {
        let adapter = adapter(FakeTransport {
            hang: true,
            ..Default::default()
        });
        let ctx = CallContext::with_timeout(Duration::from_secs(2));

        let started = Instant::now();
        let err = adapter
            .run_command(&ctx, "sleep", &args(&["1000"]))
            .await
            .unwrap_err();

        assert!(err.is_timeout(), "unexpected error: {err}");
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_millis(2100));
    }

    #[tokio::test]
    async fn test_run_command_returns_stdout() {
        let adapter = adapter(FakeTransport {
            stdout: "/dev/sda3\n".into(),
            ..Default::default()
        });

        let out = adapter
            .run_command(&CallContext::background(), "rootdev", &args(&["-s"]))
            .await
            .expect("command should succeed");
        assert_eq!(out, "/dev/sda3\n");
    }

    #[tokio::test]
    async fn test_non_zero_exit_carries_status_and_stderr() {
        let adapter = adapter(FakeTransport {
            exit_status: 1,
            ..Default::default()
        });

        let err = adapter
            .run_command(&CallContext::background(), "dd", &[])
            .await
            .unwrap_err();
        match err {
            AdapterError::RemoteStatus { status, message } => {
                assert_eq!(status, 1);
                assert_eq!(message, "No space left on device");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_path_exists_reads_marker() {
        let adapter = adapter(FakeTransport {
            stdout: "1".into(),
            ..Default::default()
        });
        assert!(adapter
            .path_exists(&CallContext::background(), "/mnt/stateful_partition")
            .await
            .expect("probe"));
    }

    #[tokio::test]
    async fn test_restart_short_circuits_in_no_reboot_mode() {
        let transport = Arc::new(FakeTransport::default());
        let adapter = RemoteAdapter::new(
            Arc::clone(&transport),
            AdapterConfig {
                no_reboot: true,
                ..fast_config()
            },
        );

        adapter
            .restart(&CallContext::background())
            .await
            .expect("no-reboot restart");
        assert_eq!(transport.reboots.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_waits_for_new_boot_id() {
        let transport = Arc::new(FakeTransport::with_boot_ids(&["boot-a", "boot-a", "boot-b"]));
        transport.failing_reconnects.store(1, Ordering::SeqCst);
        let adapter = RemoteAdapter::new(Arc::clone(&transport), fast_config());

        let started = Instant::now();
        adapter
            .restart(&CallContext::background())
            .await
            .expect("device comes back");

        assert_eq!(transport.reboots.load(Ordering::SeqCst), 1);
        assert_eq!(transport.reconnects.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_gives_up_after_reconnect_budget() {
        let transport = Arc::new(FakeTransport::with_boot_ids(&["boot-a"]));
        let adapter = RemoteAdapter::new(Arc::clone(&transport), fast_config());

        let err = adapter
            .restart(&CallContext::background())
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::Unreachable { attempts: 3, .. }));
        assert_eq!(transport.reconnects.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_succeeds_on_last_attempt() {
        let transport = Arc::new(FakeTransport::default());
        transport.failing_fetches.store(2, Ordering::SeqCst);
        let adapter = RemoteAdapter::new(Arc::clone(&transport), fast_config());

        adapter
            .fetch_and_store(&CallContext::background(), "gs://bucket/build/stateful.tgz", "/tmp/s.tgz")
            .await
            .expect("third attempt succeeds");
        assert_eq!(transport.cache_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_reports_last_error_when_budget_exhausted() {
        let transport = Arc::new(FakeTransport::default());
        transport.failing_fetches.store(10, Ordering::SeqCst);
        let adapter = RemoteAdapter::new(Arc::clone(&transport), fast_config());

        let err = adapter
            .fetch_and_pipe(&CallContext::background(), "gs://bucket/build/full.bin", "dd of=/dev/sda5")
            .await
            .unwrap_err();

        assert_eq!(transport.cache_calls.load(Ordering::SeqCst), 3);
        match err {
            AdapterError::Operation { name, message } => {
                assert_eq!(name, "op-3");
                assert_eq!(message, "fetch op-3 failed");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_stops_retrying_once_deadline_passes() {
        let transport = Arc::new(FakeTransport::default());
        transport.failing_fetches.store(10, Ordering::SeqCst);
        let adapter = RemoteAdapter::new(Arc::clone(&transport), fast_config());
        let ctx = CallContext::with_timeout(Duration::from_secs(3));

        let err = adapter
            .fetch_and_store(&ctx, "gs://bucket/fw.tar.bz2", "/tmp/fw.tar.bz2")
            .await
            .unwrap_err();
        assert!(err.is_timeout(), "unexpected error: {err}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_expired_context_never_reaches_device() {
        let transport = Arc::new(FakeTransport::default());
        let adapter = RemoteAdapter::new(Arc::clone(&transport), fast_config());
        let ctx = CallContext::with_deadline(Instant::now() - Duration::from_secs(1));

        for _ in 0..200 {
            let err = adapter
                .run_command(&ctx, "echo", &args(&["late"]))
                .await
                .unwrap_err();
            assert!(err.is_timeout(), "unexpected error: {err}");
        }
        assert_eq!(transport.execs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unacknowledged_reboot_is_bounded_by_deadline() {
        let transport = Arc::new(FakeTransport {
            hang_reboot: true,
            ..FakeTransport::with_boot_ids(&["boot-a"])
        });
        let adapter = RemoteAdapter::new(Arc::clone(&transport), fast_config());
        let ctx = CallContext::with_timeout(Duration::from_secs(2));

        let started = Instant::now();
        let err = tokio::time::timeout(Duration::from_secs(3600), adapter.restart(&ctx))
            .await
            .expect("restart must not outlive its deadline")
            .unwrap_err();

        assert!(err.is_timeout(), "unexpected error: {err}");
        assert_eq!(transport.reboots.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() <= Duration::from_secs(2));
        assert_eq!(transport.reconnects.load(Ordering::SeqCst), 0);
    }
}
