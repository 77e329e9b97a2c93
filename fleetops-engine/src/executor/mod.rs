pub mod mock;
pub mod ssh;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;

/// Where and as whom to run a remote command.
#[derive(Debug, Clone, Serialize)]
pub struct RemoteTarget {
    pub address: String,
    pub port: u16,
    pub username: String,
    #[serde(skip)]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<PathBuf>,
}

/// Result of running one command on one host.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandOutcome {
    pub success: bool,
    /// Standard output followed by standard error on success, the failure
    /// reason otherwise.
    pub output: String,
    /// Wall-clock time from connection start to command completion,
    /// rounded to hundredths. `0` on failure.
    pub latency_ms: f64,
    pub exit_code: Option<i32>,
}

impl CommandOutcome {
    pub fn succeeded(output: String, latency_ms: f64) -> Self {
        Self {
            success: true,
            output,
            latency_ms,
            exit_code: Some(0),
        }
    }

    pub fn failed(reason: impl Into<String>, exit_code: Option<i32>) -> Self {
        Self {
            success: false,
            output: reason.into(),
            latency_ms: 0.0,
            exit_code,
        }
    }
}

/// Runs a single command on a remote host over a transient connection.
///
/// Implementations never fail: transport, authentication and protocol
/// errors are reported as an unsuccessful [`CommandOutcome`], and the
/// connection is torn down before returning.
#[async_trait]
pub trait RemoteExecutor: Send + Sync + 'static {
    async fn run(&self, target: &RemoteTarget, command: &str) -> CommandOutcome;
}
