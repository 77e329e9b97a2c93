use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::{CommandOutcome, RemoteExecutor, RemoteTarget};

/// One recorded invocation of the mock executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub address: String,
    pub command: String,
}

/// Mock executor that answers from a scripted set of unreachable hosts.
///
/// Every other address succeeds and echoes the command back. All calls are
/// recorded in order.
#[derive(Clone, Default)]
pub struct MockExecutor {
    unreachable: Arc<Mutex<HashSet<String>>>,
    calls: Arc<Mutex<Vec<MockCall>>>,
    delay: Duration,
}

impl MockExecutor {
    pub fn new<I, S>(unreachable: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            unreachable: Arc::new(Mutex::new(
                unreachable.into_iter().map(Into::into).collect(),
            )),
            ..Self::default()
        }
    }

    /// Make every call take `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_reachable(&self, address: &str, reachable: bool) {
        let mut unreachable = self
            .unreachable
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if reachable {
            unreachable.remove(address);
        } else {
            unreachable.insert(address.to_string());
        }
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl RemoteExecutor for MockExecutor {
    async fn run(&self, target: &RemoteTarget, command: &str) -> CommandOutcome {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(MockCall {
                address: target.address.clone(),
                command: command.to_string(),
            });

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let reachable = !self
            .unreachable
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&target.address);

        if reachable {
            CommandOutcome::succeeded(format!("{command}: ok\n"), 1.25)
        } else {
            CommandOutcome::failed(
                format!(
                    "connect to host {} port {}: Connection timed out",
                    target.address, target.port
                ),
                None,
            )
        }
    }
}
