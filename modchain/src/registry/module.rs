//! Executable modules.

use crate::errors::ExecutionError;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt::Debug;
use std::future::Future;
use std::marker::PhantomData;

/// An opaque executor behind a module descriptor.
///
/// Modules are black boxes to the engine: they take the adapted stage input
/// and either return an output or fail.
#[async_trait]
pub trait Module: Send + Sync + Debug {
    /// Returns the module id.
    fn id(&self) -> &str;

    /// Executes the module on one payload.
    async fn execute(&self, input: Value) -> Result<Value, ExecutionError>;
}

/// A module backed by a synchronous closure.
pub struct FnModule<F>
where
    F: Fn(Value) -> Result<Value, ExecutionError> + Send + Sync,
{
    id: String,
    func: F,
}

impl<F> FnModule<F>
where
    F: Fn(Value) -> Result<Value, ExecutionError> + Send + Sync,
{
    /// Creates a new closure-backed module.
    pub fn new(id: impl Into<String>, func: F) -> Self {
        Self {
            id: id.into(),
            func,
        }
    }
}

impl<F> Debug for FnModule<F>
where
    F: Fn(Value) -> Result<Value, ExecutionError> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnModule").field("id", &self.id).finish()
    }
}

#[async_trait]
impl<F> Module for FnModule<F>
where
    F: Fn(Value) -> Result<Value, ExecutionError> + Send + Sync,
{
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&self, input: Value) -> Result<Value, ExecutionError> {
        (self.func)(input)
    }
}

/// A module backed by an async closure.
pub struct AsyncFnModule<F, Fut>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ExecutionError>> + Send,
{
    id: String,
    func: F,
    _phantom: PhantomData<fn() -> Fut>,
}

impl<F, Fut> AsyncFnModule<F, Fut>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ExecutionError>> + Send,
{
    /// Creates a new async closure-backed module.
    pub fn new(id: impl Into<String>, func: F) -> Self {
        Self {
            id: id.into(),
            func,
            _phantom: PhantomData,
        }
    }
}

impl<F, Fut> Debug for AsyncFnModule<F, Fut>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ExecutionError>> + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncFnModule").field("id", &self.id).finish()
    }
}

#[async_trait]
impl<F, Fut> Module for AsyncFnModule<F, Fut>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ExecutionError>> + Send,
{
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&self, input: Value) -> Result<Value, ExecutionError> {
        (self.func)(input).await
    }
}
