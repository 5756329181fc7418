//! The remote execution contract the provisioning engine depends on

use super::{context::CallContext, error::AdapterError};
use async_trait::async_trait;

/// Every way the engine touches a device goes through this trait
#[async_trait]
pub trait DutAdapter: Send + Sync {
    /// Run `command args...` on the device and return its stdout
    ///
    /// Returns [`AdapterError::Timeout`] once the context deadline passes, even if
    /// the device never answers. A non-zero exit is an [`AdapterError::RemoteStatus`].
    async fn run_command(
        &self,
        ctx: &CallContext,
        command: &str,
        args: &[String],
    ) -> Result<String, AdapterError>;

    /// Reboot the device and wait until it is reachable again
    async fn restart(&self, ctx: &CallContext) -> Result<(), AdapterError>;

    /// Fetch `source` from the content store into `destination` on the device
    async fn fetch_and_store(
        &self,
        ctx: &CallContext,
        source: &str,
        destination: &str,
    ) -> Result<(), AdapterError>;

    /// Fetch `source` and pipe it into `pipe_command` on the device
    async fn fetch_and_pipe(
        &self,
        ctx: &CallContext,
        source: &str,
        pipe_command: &str,
    ) -> Result<(), AdapterError>;

    /// Whether `path` exists on the device
    async fn path_exists(&self, ctx: &CallContext, path: &str) -> Result<bool, AdapterError> {
        let out = self
            .run_command(
                ctx,
                "[",
                &args(&["-e", path, "]", "&&", "echo", "-n", "1", "||", "echo", "-n", "0"]),
            )
            .await?;
        Ok(out.trim() == "1")
    }

    /// `mkdir -p` every directory in `dirs`
    async fn create_directories(
        &self,
        ctx: &CallContext,
        dirs: &[String],
    ) -> Result<(), AdapterError> {
        let mut mkdir = vec!["-p".to_string()];
        mkdir.extend(dirs.iter().cloned());
        self.run_command(ctx, "mkdir", &mkdir).await.map(|_| ())
    }

    /// `rm -rf dir`
    async fn delete_directory(&self, ctx: &CallContext, dir: &str) -> Result<(), AdapterError> {
        self.run_command(ctx, "rm", &args(&["-rf", dir]))
            .await
            .map(|_| ())
    }
}

/// Owned argument list from string slices
pub fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
