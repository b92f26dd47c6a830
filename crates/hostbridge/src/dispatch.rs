//! Per-message dispatch path.
//!
//! Runs in two phases. On the serve loop, in arrival order:
//! 1. Decode the envelope (undecodable messages are logged and dropped)
//! 2. Resolve the handler and, for UI-affine calls, queue it on the
//!    execution context so the queue sees calls in the order they arrived
//!
//! Then on a spawned task, holding the message deferral until it ends:
//! 3. Await the handler outcome
//! 4. Convert any failure - unknown method, handler error, panic - into an
//!    error Return carrying the caller's correlation id

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{self, BoxFuture};
use tokio::sync::oneshot;

use crate::bridge::protocol::{CallEnvelope, Envelope, ReturnEnvelope, WireDocument};
use crate::connection::{Connection, PendingMessage};
use crate::executor::ContextError;
use crate::handler::{CallContext, Handler, HandlerError, UnhandledMethod};
use crate::service::Bridge;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Unhandled(#[from] UnhandledMethod),

    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error("handler panicked: {0}")]
    Panicked(String),

    #[error("cannot schedule handler: {0}")]
    Context(#[from] ContextError),

    #[error("execution context dropped the call")]
    Abandoned,
}

type CallOutcome = BoxFuture<'static, Result<(), DispatchError>>;

/// Must be called from the serve loop, once per message, in arrival order.
pub(crate) fn dispatch_message(
    bridge: &Bridge,
    connection: &Connection,
    document: WireDocument,
    pending: PendingMessage,
) {
    let envelope = match Envelope::decode(&document) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!(
                connection = %connection.id(),
                error = %e,
                keys = ?document.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(),
                "Dropping undecodable message"
            );
            return;
        }
    };

    match envelope {
        Envelope::Call(call) => {
            let method = call.method.clone();
            let correlation_id = call.correlation_id.clone();
            tracing::debug!(
                connection = %connection.id(),
                %method,
                %correlation_id,
                ui = call.ui_affinity,
                "Inbound call"
            );
            let outcome = start_call(bridge, connection.clone(), call);
            tokio::spawn(finish_call(
                connection.clone(),
                method,
                correlation_id,
                outcome,
                pending,
            ));
        }
        Envelope::Return(ret) => {
            let bridge = bridge.clone();
            tokio::spawn(async move {
                let _pending = pending;
                route_return(&bridge, ret);
            });
        }
    }
}

/// Resolve and schedule the handler. UI-affine calls are queued before this returns.
fn start_call(bridge: &Bridge, connection: Connection, call: CallEnvelope) -> CallOutcome {
    let handler = match bridge.handlers().resolve(&call.method) {
        Ok(handler) => handler,
        Err(e) => return future::ready(Err(DispatchError::from(e))).boxed(),
    };
    let ui_affinity = call.ui_affinity;
    let context = CallContext::new(bridge.clone(), connection, call);

    if !ui_affinity {
        return invoke(handler, context).boxed();
    }

    let (result_tx, result_rx) = oneshot::channel();
    let queued = bridge.execution_context().submit(Box::pin(async move {
        let _ = result_tx.send(invoke(handler, context).await);
    }));
    if let Err(e) = queued {
        return future::ready(Err(DispatchError::from(e))).boxed();
    }
    async move { result_rx.await.unwrap_or(Err(DispatchError::Abandoned)) }.boxed()
}

async fn finish_call(
    connection: Connection,
    method: String,
    correlation_id: String,
    outcome: CallOutcome,
    pending: PendingMessage,
) {
    let _pending = pending;

    let Err(e) = outcome.await else {
        return;
    };

    tracing::warn!(%method, %correlation_id, error = %e, "Inbound call failed");
    if let Err(send_err) = connection
        .send_return(&correlation_id, None, &e.to_string())
        .await
    {
        tracing::error!(
            %method,
            %correlation_id,
            error = %send_err,
            "Failed to send error return"
        );
    }
}

async fn invoke(handler: Arc<dyn Handler>, context: CallContext) -> Result<(), DispatchError> {
    match AssertUnwindSafe(handler.handle(context)).catch_unwind().await {
        Ok(result) => result.map_err(DispatchError::from),
        Err(panic) => Err(DispatchError::Panicked(panic_message(panic.as_ref()))),
    }
}

fn route_return(bridge: &Bridge, ret: ReturnEnvelope) {
    match bridge.handlers().return_hook() {
        Some(hook) => {
            tracing::trace!(correlation_id = %ret.correlation_id, "Routing inbound return");
            if std::panic::catch_unwind(AssertUnwindSafe(|| hook(ret))).is_err() {
                tracing::error!("Return hook panicked");
            }
        }
        None => {
            tracing::debug!(
                correlation_id = %ret.correlation_id,
                error = %ret.error,
                "Dropping return with no hook registered"
            );
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
