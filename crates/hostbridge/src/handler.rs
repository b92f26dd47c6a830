//! Inbound call handlers and the method table.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::bridge::protocol::{CallEnvelope, Document, ReturnEnvelope};
use crate::connection::{Connection, SendError};
use crate::registry::RegistryError;
use crate::service::Bridge;

/// Failure reported by a handler. Its message becomes the `Err` of the
/// Return sent back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HandlerError {
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{err:#}"))
    }
}

impl From<RegistryError> for HandlerError {
    fn from(err: RegistryError) -> Self {
        Self::new(err.to_string())
    }
}

impl From<SendError> for HandlerError {
    fn from(err: SendError) -> Self {
        Self::new(err.to_string())
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(format!("invalid input: {err}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0} is not handled")]
pub struct UnhandledMethod(pub String);

/// Everything a handler gets for one inbound call.
pub struct CallContext {
    bridge: Bridge,
    connection: Connection,
    call: CallEnvelope,
}

impl CallContext {
    pub(crate) fn new(bridge: Bridge, connection: Connection, call: CallEnvelope) -> Self {
        Self {
            bridge,
            connection,
            call,
        }
    }

    pub fn method(&self) -> &str {
        &self.call.method
    }

    pub fn correlation_id(&self) -> &str {
        &self.call.correlation_id
    }

    pub fn input(&self) -> &Document {
        &self.call.input
    }

    pub fn into_input(self) -> Document {
        self.call.input
    }

    /// Deserialize the input document into a typed request.
    pub fn input_as<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        Ok(serde_json::from_value(serde_json::Value::Object(
            self.call.input.clone(),
        ))?)
    }

    pub fn ui_affinity(&self) -> bool {
        self.call.ui_affinity
    }

    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    /// The connection this call arrived on.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Send a successful Return for this call.
    pub async fn reply(&self, output: Document) -> Result<(), SendError> {
        self.connection
            .send_return(&self.call.correlation_id, Some(output), "")
            .await
    }

    /// Send a failed Return for this call.
    pub async fn reply_error(&self, error: impl fmt::Display) -> Result<(), SendError> {
        self.connection
            .send_return(&self.call.correlation_id, None, &error.to_string())
            .await
    }
}

/// Handler for one method name.
///
/// Returning without replying is allowed; a handler may keep the
/// correlation id and call `send_return` later.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, call: CallContext) -> Result<(), HandlerError>;
}

/// Adapter turning an async closure into a [`Handler`].
pub struct HandlerFn<F>(F);

pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(CallContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    HandlerFn(f)
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(CallContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, call: CallContext) -> Result<(), HandlerError> {
        (self.0)(call).await
    }
}

/// Receives inbound Return envelopes (replies to locally-initiated calls).
pub type ReturnHook = Arc<dyn Fn(ReturnEnvelope) + Send + Sync>;

/// Method name -> handler. Last registration wins.
#[derive(Default)]
pub struct HandlerTable {
    handlers: RwLock<HashMap<String, Arc<dyn Handler>>>,
    on_return: RwLock<Option<ReturnHook>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<dyn Handler>>> {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<dyn Handler>>> {
        self.handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register `handler` for `method`, returning the handler it replaced.
    pub fn register(
        &self,
        method: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> Option<Arc<dyn Handler>> {
        let method = method.into();
        let replaced = self.write().insert(method.clone(), handler);
        if replaced.is_some() {
            tracing::debug!(%method, "Handler replaced");
        } else {
            tracing::trace!(%method, "Handler registered");
        }
        replaced
    }

    pub fn resolve(&self, method: &str) -> Result<Arc<dyn Handler>, UnhandledMethod> {
        self.read()
            .get(method)
            .cloned()
            .ok_or_else(|| UnhandledMethod(method.to_string()))
    }

    pub fn contains(&self, method: &str) -> bool {
        self.read().contains_key(method)
    }

    pub fn set_return_hook(&self, hook: ReturnHook) {
        *self
            .on_return
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(hook);
    }

    pub fn return_hook(&self) -> Option<ReturnHook> {
        self.on_return
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}
