//! Scripted modules for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::errors::ExecutionError;
use crate::registry::Module;

#[derive(Debug, Clone)]
enum Behavior {
    Echo,
    Return(Value),
    Fail(String),
    Panic,
}

/// A module whose behaviour is fixed up front and whose calls are recorded.
#[derive(Debug)]
pub struct ScriptedModule {
    id: String,
    behavior: Behavior,
    delay: Option<Duration>,
    failures_left: AtomicUsize,
    calls: AtomicUsize,
    inputs: Mutex<Vec<Value>>,
}

impl ScriptedModule {
    fn with_behavior(id: impl Into<String>, behavior: Behavior) -> Self {
        Self {
            id: id.into(),
            behavior,
            delay: None,
            failures_left: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
        }
    }

    /// Returns its input unchanged.
    #[must_use]
    pub fn echo(id: impl Into<String>) -> Self {
        Self::with_behavior(id, Behavior::Echo)
    }

    /// Always returns `value`.
    #[must_use]
    pub fn returning(id: impl Into<String>, value: Value) -> Self {
        Self::with_behavior(id, Behavior::Return(value))
    }

    /// Always fails with `message`.
    #[must_use]
    pub fn failing(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_behavior(id, Behavior::Fail(message.into()))
    }

    /// Panics on every call.
    #[must_use]
    pub fn panicking(id: impl Into<String>) -> Self {
        Self::with_behavior(id, Behavior::Panic)
    }

    /// Sleeps before answering.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fails the first `n` calls before following its behaviour.
    #[must_use]
    pub fn fail_first(self, n: usize) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    /// Number of calls that reached the module, including cancelled ones.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Inputs received, in call order.
    #[must_use]
    pub fn inputs(&self) -> Vec<Value> {
        self.inputs.lock().clone()
    }
}

#[async_trait]
impl Module for ScriptedModule {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&self, input: Value) -> Result<Value, ExecutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inputs.lock().push(input.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let scripted_failure = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if scripted_failure {
            return Err(ExecutionError::new(format!("{} scripted failure", self.id)));
        }

        match &self.behavior {
            Behavior::Echo => Ok(input),
            Behavior::Return(value) => Ok(value.clone()),
            Behavior::Fail(message) => Err(ExecutionError::new(message.clone())),
            Behavior::Panic => panic!("{} panicked", self.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_fail_first_then_echo() {
        let module = ScriptedModule::echo("m").fail_first(2);

        assert!(module.execute(json!(1)).await.is_err());
        assert!(module.execute(json!(2)).await.is_err());
        assert_eq!(module.execute(json!(3)).await.unwrap(), json!(3));

        assert_eq!(module.call_count(), 3);
        assert_eq!(module.inputs(), vec![json!(1), json!(2), json!(3)]);
    }

    #[tokio::test]
    async fn test_returning_and_failing() {
        let fixed = ScriptedModule::returning("r", json!("x"));
        assert_eq!(fixed.execute(json!(null)).await.unwrap(), json!("x"));

        let broken = ScriptedModule::failing("f", "boom");
        assert_eq!(broken.execute(json!(null)).await.unwrap_err().message, "boom");
    }
}
