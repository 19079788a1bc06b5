//! Testing utilities for upsync workspace
//!
//! Shared fixtures and a scripted in-memory transport.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};
use upsync_core::{
    RefreshPolicy, RemoteConfig, RemoteProcess, RemoteTransport, SyncConfig, TransportError,
    UpstreamSync,
};

pub const TEST_CONFIG_PATH: &str = "/etc/nginx/nginx.conf";
pub const TEST_RELOAD_COMMAND: &str = "nginx -s reload";

pub fn remote_config() -> RemoteConfig {
    RemoteConfig::new(
        "proxy.test",
        "deploy",
        "secret",
        TEST_CONFIG_PATH,
        TEST_RELOAD_COMMAND,
    )
}

pub fn sync_config(policy: RefreshPolicy) -> SyncConfig {
    SyncConfig::new(remote_config()).with_refresh_policy(policy)
}

pub fn setup_sync(transport: &Arc<RecordingTransport>, policy: RefreshPolicy) -> UpstreamSync {
    let transport: Arc<dyn RemoteTransport> = transport.clone();
    UpstreamSync::new(&sync_config(policy), transport)
}

/// One remote operation, in the order it happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Upload { path: String, contents: String },
    Execute { command: String },
}

/// Blocks uploads until released
#[derive(Debug)]
pub struct UploadGate {
    entered: Notify,
    release: Semaphore,
}

impl UploadGate {
    fn new() -> Self {
        Self {
            entered: Notify::new(),
            release: Semaphore::new(0),
        }
    }

    /// Wait until an upload is blocked on the gate
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    /// Let every current and future upload through
    pub fn open(&self) {
        self.release.close();
    }

    async fn pass(&self) {
        self.entered.notify_one();
        if let Ok(permit) = self.release.acquire().await {
            permit.forget();
        }
    }
}

#[derive(Debug)]
struct Script {
    failing_uploads: usize,
    failing_executes: usize,
    exit_status: i32,
    polls_before_exit: usize,
    hang: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            failing_uploads: 0,
            failing_executes: 0,
            exit_status: 0,
            polls_before_exit: 1,
            hang: false,
        }
    }
}

/// In-memory transport that records every call
#[derive(Debug, Default)]
pub struct RecordingTransport {
    calls: Mutex<Vec<Call>>,
    script: Mutex<Script>,
    gate: Option<Arc<UploadGate>>,
    polls: Arc<AtomicUsize>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport whose uploads wait on the returned gate
    pub fn gated() -> (Self, Arc<UploadGate>) {
        let gate = Arc::new(UploadGate::new());
        let transport = Self {
            gate: Some(Arc::clone(&gate)),
            ..Self::default()
        };
        (transport, gate)
    }

    #[must_use]
    pub fn with_exit_status(self, status: i32) -> Self {
        self.script.lock().exit_status = status;
        self
    }

    /// Reload process exits on the `polls`-th check
    #[must_use]
    pub fn with_polls_before_exit(self, polls: usize) -> Self {
        self.script.lock().polls_before_exit = polls.max(1);
        self
    }

    /// Reload process never exits
    #[must_use]
    pub fn hanging(self) -> Self {
        self.script.lock().hang = true;
        self
    }

    pub fn fail_next_upload(&self) {
        self.script.lock().failing_uploads += 1;
    }

    pub fn fail_next_execute(&self) {
        self.script.lock().failing_executes += 1;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Contents of every completed upload
    pub fn uploads(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                Call::Upload { contents, .. } => Some(contents.clone()),
                Call::Execute { .. } => None,
            })
            .collect()
    }

    pub fn last_upload(&self) -> Option<String> {
        self.uploads().pop()
    }

    pub fn upload_count(&self) -> usize {
        self.uploads().len()
    }

    pub fn execute_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| matches!(call, Call::Execute { .. }))
            .count()
    }

    /// Completion checks made across all reload processes
    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteTransport for RecordingTransport {
    async fn upload(&self, remote_path: &str, contents: &[u8]) -> Result<(), TransportError> {
        if let Some(gate) = &self.gate {
            gate.pass().await;
        }

        {
            let mut script = self.script.lock();
            if script.failing_uploads > 0 {
                script.failing_uploads -= 1;
                return Err(TransportError::Connect {
                    host: "proxy.test".to_string(),
                    port: 22,
                    message: "connection refused".to_string(),
                });
            }
        }

        self.calls.lock().push(Call::Upload {
            path: remote_path.to_string(),
            contents: String::from_utf8_lossy(contents).into_owned(),
        });
        Ok(())
    }

    async fn execute(&self, command: &str) -> Result<Box<dyn RemoteProcess>, TransportError> {
        let process = {
            let mut script = self.script.lock();
            if script.failing_executes > 0 {
                script.failing_executes -= 1;
                return Err(TransportError::Channel("exec request refused".to_string()));
            }
            ScriptedProcess {
                remaining: script.polls_before_exit,
                exit_status: script.exit_status,
                hang: script.hang,
                polls: Arc::clone(&self.polls),
            }
        };

        self.calls.lock().push(Call::Execute {
            command: command.to_string(),
        });
        Ok(Box::new(process))
    }
}

#[derive(Debug)]
struct ScriptedProcess {
    remaining: usize,
    exit_status: i32,
    hang: bool,
    polls: Arc<AtomicUsize>,
}

impl RemoteProcess for ScriptedProcess {
    fn try_exit_status(&mut self) -> Result<Option<i32>, TransportError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            return Ok(None);
        }
        self.remaining = self.remaining.saturating_sub(1);
        Ok((self.remaining == 0).then_some(self.exit_status))
    }
}
