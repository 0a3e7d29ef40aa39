//! In-memory runtime.
//!
//! Records every call and succeeds unless told otherwise. Failures and
//! delays can be injected per operation and container ID.

use crate::error::{Error, Result};
use crate::runtime::{ContainerRuntime, Signal};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

/// One recorded invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeCall {
    pub operation: &'static str,
    pub id: String,
}

/// Runtime that touches no processes.
#[derive(Debug, Default)]
pub struct SimulatedRuntime {
    calls: RwLock<Vec<RuntimeCall>>,
    failures: RwLock<HashMap<(&'static str, String), String>>,
    delays: RwLock<HashMap<&'static str, Duration>>,
}

impl SimulatedRuntime {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `operation` on `id` fail with `reason` until cleared.
    pub fn fail(&self, operation: &'static str, id: &str, reason: &str) {
        if let Ok(mut failures) = self.failures.write() {
            failures.insert((operation, id.to_string()), reason.to_string());
        }
    }

    /// Removes an injected failure.
    pub fn clear_failure(&self, operation: &'static str, id: &str) {
        if let Ok(mut failures) = self.failures.write() {
            failures.remove(&(operation, id.to_string()));
        }
    }

    /// Makes every `operation` call sleep for `delay` first.
    pub fn delay(&self, operation: &'static str, delay: Duration) {
        if let Ok(mut delays) = self.delays.write() {
            delays.insert(operation, delay);
        }
    }

    /// Calls recorded so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.calls.read().map(|c| c.clone()).unwrap_or_default()
    }

    /// Number of recorded calls of one operation.
    #[must_use]
    pub fn count(&self, operation: &str) -> usize {
        self.calls
            .read()
            .map(|c| c.iter().filter(|call| call.operation == operation).count())
            .unwrap_or_default()
    }

    async fn invoke(&self, operation: &'static str, id: &str) -> Result<()> {
        let delay = self
            .delays
            .read()
            .map_err(|e| Error::Internal(format!("lock poisoned: {e}")))?
            .get(operation)
            .copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.calls
            .write()
            .map_err(|e| Error::Internal(format!("lock poisoned: {e}")))?
            .push(RuntimeCall {
                operation,
                id: id.to_string(),
            });

        let failure = self
            .failures
            .read()
            .map_err(|e| Error::Internal(format!("lock poisoned: {e}")))?
            .get(&(operation, id.to_string()))
            .cloned();
        match failure {
            Some(reason) => Err(Error::RuntimeFailed {
                operation: operation.to_string(),
                id: id.to_string(),
                reason,
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ContainerRuntime for SimulatedRuntime {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.invoke("start", id).await
    }

    async fn stop(&self, id: &str, _timeout: Duration) -> Result<Option<i32>> {
        self.invoke("stop", id).await?;
        Ok(Some(0))
    }

    async fn kill(&self, id: &str, signal: Signal) -> Result<Option<i32>> {
        self.invoke("kill", id).await?;
        Ok(signal.terminates().then(|| signal.exit_code()))
    }

    async fn pause(&self, id: &str) -> Result<()> {
        self.invoke("pause", id).await
    }

    async fn unpause(&self, id: &str) -> Result<()> {
        self.invoke("unpause", id).await
    }

    async fn delete(&self, id: &str, _force: bool) -> Result<()> {
        self.invoke("delete", id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_injected_failure() {
        let runtime = SimulatedRuntime::new();
        runtime.fail("pause", "c1", "frozen");
        assert!(runtime.pause("c1").await.is_err());
        assert!(runtime.pause("c2").await.is_ok());
        runtime.clear_failure("pause", "c1");
        assert!(runtime.pause("c1").await.is_ok());
        assert_eq!(runtime.count("pause"), 3);
    }

    #[tokio::test]
    async fn test_kill_reports_exit_for_terminating_signal() {
        let runtime = SimulatedRuntime::new();
        assert_eq!(runtime.kill("c1", Signal::Kill).await.unwrap(), Some(137));
        assert_eq!(runtime.kill("c1", Signal::Hup).await.unwrap(), None);
    }
}
