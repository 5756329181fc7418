//! Test doubles shared by the engine and target tests

use crate::adapter::{AdapterError, CallContext, DutAdapter, Operation, OperationResult, OperationSource};
use crate::engine::{execute_commands, Command, CommandList, ProvisionState, StateOutput};
use crate::engine::{Failure, StatusCode};
use crate::transport::DutTransport;
use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use provision_shared::{CacheRequest, ExecRequest, ExecResponse};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Ordered record of command calls, shared between commands and assertions
#[derive(Debug, Clone, Default)]
pub struct CommandLog(Arc<Mutex<Vec<String>>>);

impl CommandLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

type ErrorFactory = Box<dyn Fn() -> anyhow::Error + Send + Sync>;

/// Command that logs `exec:N` / `revert:N` and fails on request
pub struct RecordingCommand {
    id: usize,
    log: CommandLog,
    fail: Option<ErrorFactory>,
    revert_fail: Option<String>,
    status: StatusCode,
}

impl RecordingCommand {
    pub fn new(id: usize, log: &CommandLog) -> Self {
        Self {
            id,
            log: log.clone(),
            fail: None,
            revert_fail: None,
            status: StatusCode::ProvisioningFailed,
        }
    }

    pub fn failing(self, cause: &str) -> Self {
        let cause = cause.to_string();
        self.failing_with(move || anyhow!(cause.clone()))
    }

    pub fn failing_with(
        mut self,
        make: impl Fn() -> anyhow::Error + Send + Sync + 'static,
    ) -> Self {
        self.fail = Some(Box::new(make));
        self
    }

    pub fn revert_failing(mut self, cause: &str) -> Self {
        self.revert_fail = Some(cause.to_string());
        self
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }
}

#[async_trait]
impl Command for RecordingCommand {
    async fn execute(&mut self) -> anyhow::Result<()> {
        self.log.push(format!("exec:{}", self.id));
        match &self.fail {
            Some(make) => Err(make()),
            None => Ok(()),
        }
    }

    async fn revert(&mut self) -> anyhow::Result<()> {
        self.log.push(format!("revert:{}", self.id));
        match &self.revert_fail {
            Some(cause) => Err(anyhow!(cause.clone())),
            None => Ok(()),
        }
    }

    fn error_message(&self) -> &'static str {
        "recording command failed"
    }

    fn status(&self) -> StatusCode {
        self.status
    }
}

const STATE_NAMES: [&str; 5] = ["first", "second", "third", "fourth", "fifth"];

/// Linear workflow of up to five states built from a failure plan
///
/// `plan[s]` is the number of commands in state `s`; `fail_at` names the
/// (state, command) pair that fails. Commands log as `exec:<s><c>`.
#[derive(Clone)]
pub struct ScriptedState {
    plan: Arc<Vec<usize>>,
    fail_at: Option<(usize, usize)>,
    index: usize,
    log: CommandLog,
}

impl ScriptedState {
    pub fn new(plan: &[usize], fail_at: Option<(usize, usize)>, log: &CommandLog) -> Self {
        assert!(!plan.is_empty() && plan.len() <= STATE_NAMES.len());
        Self {
            plan: Arc::new(plan.to_vec()),
            fail_at,
            index: 0,
            log: log.clone(),
        }
    }
}

#[async_trait]
impl ProvisionState for ScriptedState {
    async fn execute(&self, ctx: &CallContext) -> Result<StateOutput, Failure> {
        let commands: CommandList = (0..self.plan[self.index])
            .map(|c| {
                let cmd = RecordingCommand::new(self.index * 10 + c, &self.log);
                let cmd = if self.fail_at == Some((self.index, c)) {
                    cmd.failing("scripted failure")
                } else {
                    cmd
                };
                Box::new(cmd) as Box<dyn Command>
            })
            .collect();
        execute_commands(ctx, commands).await?;
        Ok(StateOutput {
            payload: Some(Bytes::from(self.name())),
        })
    }

    fn next(&self) -> Option<Self> {
        (self.index + 1 < self.plan.len()).then(|| Self {
            index: self.index + 1,
            ..self.clone()
        })
    }

    fn name(&self) -> &'static str {
        STATE_NAMES[self.index]
    }
}

/// In-memory device that records every call as a line of text
///
/// Lines look like `run: mkdir -p /a`, `restart`, `store: <src> -> <dst>` and
/// `pipe: <src> | <cmd>`. A call whose line contains a registered failure
/// pattern fails with [`AdapterError::RemoteStatus`].
#[derive(Default)]
pub struct FakeDut {
    calls: Mutex<Vec<String>>,
    failures: Mutex<Vec<(String, String)>>,
    outputs: Mutex<Vec<(String, String)>>,
}

impl FakeDut {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_on(&self, pattern: &str, message: &str) {
        self.failures
            .lock()
            .unwrap()
            .push((pattern.to_string(), message.to_string()));
    }

    pub fn respond(&self, pattern: &str, stdout: &str) {
        self.outputs
            .lock()
            .unwrap()
            .push((pattern.to_string(), stdout.to_string()));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called(&self, pattern: &str) -> bool {
        self.calls().iter().any(|line| line.contains(pattern))
    }

    /// Index of the first call containing `pattern`
    pub fn position(&self, pattern: &str) -> Option<usize> {
        self.calls().iter().position(|line| line.contains(pattern))
    }

    fn record(&self, line: String) -> Result<String, AdapterError> {
        self.calls.lock().unwrap().push(line.clone());
        if let Some((_, message)) = self
            .failures
            .lock()
            .unwrap()
            .iter()
            .find(|(pattern, _)| line.contains(pattern.as_str()))
        {
            return Err(AdapterError::RemoteStatus {
                status: 1,
                message: message.clone(),
            });
        }
        Ok(self
            .outputs
            .lock()
            .unwrap()
            .iter()
            .find(|(pattern, _)| line.contains(pattern.as_str()))
            .map(|(_, out)| out.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl DutAdapter for FakeDut {
    async fn run_command(
        &self,
        _ctx: &CallContext,
        command: &str,
        args: &[String],
    ) -> Result<String, AdapterError> {
        let line = format!("run: {} {}", command, args.join(" "));
        self.record(line.trim_end().to_string())
    }

    async fn restart(&self, _ctx: &CallContext) -> Result<(), AdapterError> {
        self.record("restart".into()).map(|_| ())
    }

    async fn fetch_and_store(
        &self,
        _ctx: &CallContext,
        source: &str,
        destination: &str,
    ) -> Result<(), AdapterError> {
        self.record(format!("store: {source} -> {destination}"))
            .map(|_| ())
    }

    async fn fetch_and_pipe(
        &self,
        _ctx: &CallContext,
        source: &str,
        pipe_command: &str,
    ) -> Result<(), AdapterError> {
        self.record(format!("pipe: {source} | {pipe_command}"))
            .map(|_| ())
    }
}

/// Transport whose commands all succeed with empty output and whose fetches
/// complete immediately, except for one failing command name
#[derive(Default)]
pub struct EchoTransport {
    fail_command: Option<String>,
    pub closes: AtomicU32,
    pub reboots: AtomicU32,
}

impl EchoTransport {
    pub fn failing_on(command: &str) -> Self {
        Self {
            fail_command: Some(command.to_string()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl OperationSource for EchoTransport {
    async fn get_operation(&self, name: &str) -> Result<Operation, AdapterError> {
        Ok(Operation {
            name: name.to_string(),
            done: true,
            result: Some(OperationResult::Response(Bytes::new())),
        })
    }
}

#[async_trait]
impl DutTransport for EchoTransport {
    async fn exec(&self, request: ExecRequest) -> Result<ExecResponse, AdapterError> {
        let failed = self.fail_command.as_deref() == Some(request.command.as_str());
        Ok(ExecResponse {
            stdout: Vec::new(),
            stderr: if failed { b"refused".to_vec() } else { Vec::new() },
            exit_status: i32::from(failed),
            error_message: String::new(),
        })
    }

    async fn reboot(&self) -> Result<(), AdapterError> {
        self.reboots.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), AdapterError> {
        Ok(())
    }

    async fn cache(&self, request: CacheRequest) -> Result<Operation, AdapterError> {
        self.get_operation(&format!("op-{}", request.source.len())).await
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn name(&self) -> &'static str {
        "echo"
    }
}
