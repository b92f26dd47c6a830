//! Bridge service - the per-process context tying the pieces together.
//!
//! A `Bridge` owns the handler table, the object registry, the designated
//! execution context and the current connection. It is cheap to clone;
//! clones share state. Build one at startup, register handlers, then
//! `serve` each activation the host delivers.

use std::fmt;
use std::sync::{Arc, RwLock};

use serde_json::Value;

use crate::bridge::protocol::{Document, ReturnEnvelope};
use crate::config::BridgeConfig;
use crate::connection::{CloseReason, Connection, ConnectionId, ConnectionState, SendError};
use crate::dispatch::dispatch_message;
use crate::executor::{ExecutionContext, SerialContext};
use crate::handler::{Handler, HandlerTable};
use crate::launcher::{LaunchError, LaunchGate, LaunchState};
use crate::registry::{ObjectRegistry, RegistryError};
use crate::transport::{Activation, ChannelEvent, InboundMessage};

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("connection {0} is still active")]
    AlreadyConnected(ConnectionId),
}

struct BridgeInner {
    config: BridgeConfig,
    handlers: HandlerTable,
    objects: ObjectRegistry,
    context: Arc<dyn ExecutionContext>,
    connection: RwLock<Option<Connection>>,
    launch: LaunchGate,
}

#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

impl Bridge {
    /// Bridge with the built-in serial execution context.
    pub fn new(config: BridgeConfig) -> Self {
        Self::with_execution_context(config, Arc::new(SerialContext::new()))
    }

    /// Bridge whose UI-affine handlers run on a host-provided context.
    pub fn with_execution_context(config: BridgeConfig, context: Arc<dyn ExecutionContext>) -> Self {
        let launch = LaunchGate::new(config.launcher.clone());
        Self {
            inner: Arc::new(BridgeInner {
                config,
                handlers: HandlerTable::new(),
                objects: ObjectRegistry::new(),
                context,
                connection: RwLock::new(None),
                launch,
            }),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.inner.config
    }

    pub(crate) fn handlers(&self) -> &HandlerTable {
        &self.inner.handlers
    }

    pub(crate) fn execution_context(&self) -> &dyn ExecutionContext {
        self.inner.context.as_ref()
    }

    // ---- handlers ----

    /// Register the handler for `method`, replacing any previous one.
    pub fn handle<H: Handler>(&self, method: impl Into<String>, handler: H) {
        self.inner.handlers.register(method, Arc::new(handler));
    }

    /// Receive Return envelopes answering calls this side initiated.
    pub fn on_return(&self, hook: impl Fn(ReturnEnvelope) + Send + Sync + 'static) {
        self.inner.handlers.set_return_hook(Arc::new(hook));
    }

    // ---- object addressing ----

    pub fn objects(&self) -> &ObjectRegistry {
        &self.inner.objects
    }

    pub fn expose<T>(&self, id: impl Into<String>, object: &Arc<T>) -> Result<(), RegistryError>
    where
        T: std::any::Any + Send + Sync,
    {
        self.inner.objects.put(id, object)
    }

    pub fn revoke(&self, id: &str) -> bool {
        self.inner.objects.delete(id)
    }

    pub fn resolve<T>(&self, id: &str) -> Result<Arc<T>, RegistryError>
    where
        T: std::any::Any + Send + Sync,
    {
        self.inner.objects.get(id)
    }

    // ---- connection ----

    pub fn connection(&self) -> Option<Connection> {
        self.inner
            .connection
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.connection()
            .map_or(ConnectionState::Unconnected, |c| c.state())
    }

    fn active_connection(&self) -> Result<Connection, SendError> {
        let connection = self.connection().ok_or(SendError::NotConnected)?;
        if connection.is_closed() {
            return Err(SendError::Closed);
        }
        Ok(connection)
    }

    /// Fire-and-forget call to the companion.
    pub async fn call(
        &self,
        method: &str,
        input: Document,
        ui_affinity: bool,
    ) -> Result<(), SendError> {
        self.call_with_id(method, "", input, ui_affinity).await
    }

    /// Call carrying a caller-chosen correlation id; the reply arrives
    /// through the hook registered with [`Bridge::on_return`].
    pub async fn call_with_id(
        &self,
        method: &str,
        correlation_id: &str,
        input: Document,
        ui_affinity: bool,
    ) -> Result<(), SendError> {
        self.active_connection()?
            .send_call(method, correlation_id, input, ui_affinity)
            .await
    }

    pub async fn send_return(
        &self,
        correlation_id: &str,
        output: Option<Document>,
        error: &str,
    ) -> Result<(), SendError> {
        self.active_connection()?
            .send_return(correlation_id, output, error)
            .await
    }

    /// Forward a log line to the companion's log method.
    pub async fn log(&self, message: impl fmt::Display) -> Result<(), SendError> {
        let mut input = Document::new();
        input.insert("Msg".to_string(), Value::String(message.to_string()));
        let method = self.inner.config.log_method.clone();
        self.call(&method, input, false).await
    }

    /// Close the current connection, if any.
    pub fn close(&self) -> bool {
        self.connection()
            .is_some_and(|c| c.close(CloseReason::Shutdown))
    }

    // ---- companion ----

    /// Launch the companion unless it already runs. Returns whether this call launched it.
    pub async fn try_launch(&self) -> Result<bool, LaunchError> {
        self.inner.launch.try_launch().await
    }

    pub fn launch_state(&self) -> LaunchState {
        self.inner.launch.state()
    }

    // ---- event loop ----

    /// Serve one activation until the channel closes.
    ///
    /// Messages are decoded and scheduled here in arrival order; handlers
    /// then run on their own tasks (or the execution context), so the loop
    /// never waits on handler code. Returns why the connection closed.
    pub async fn serve(&self, activation: Activation) -> Result<CloseReason, ServeError> {
        let Activation {
            sender,
            mut events,
            deferral,
            cancel,
        } = activation;

        let connection = {
            let mut current = self
                .inner
                .connection
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(existing) = current.as_ref()
                && !existing.is_closed()
            {
                tracing::warn!(
                    connection = %existing.id(),
                    "Rejecting activation: connection still active"
                );
                return Err(ServeError::AlreadyConnected(existing.id()));
            }
            let connection = Connection::open(sender, deferral);
            *current = Some(connection.clone());
            connection
        };
        tracing::info!(connection = %connection.id(), "Connection established");

        let reason = loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    tracing::info!(connection = %connection.id(), "Host cancelled the connection");
                    break CloseReason::Cancelled;
                }

                _ = connection.closed() => {
                    break connection.close_reason().unwrap_or(CloseReason::Shutdown);
                }

                event = events.recv() => match event {
                    Some(ChannelEvent::Message(InboundMessage { document, deferral })) => {
                        let pending = connection.track(deferral);
                        dispatch_message(self, &connection, document, pending);
                    }
                    Some(ChannelEvent::PeerClosed { status }) => {
                        tracing::info!(connection = %connection.id(), %status, "Peer closed the channel");
                        break CloseReason::PeerClosed;
                    }
                    None => {
                        tracing::warn!(connection = %connection.id(), "Host dropped the event stream");
                        break CloseReason::ChannelDropped;
                    }
                },
            }
        };

        connection.close(reason);
        Ok(connection.close_reason().unwrap_or(reason))
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("config", &self.inner.config)
            .field("state", &self.state())
            .field("objects", &self.inner.objects.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::{Notify, mpsc};
    use tokio::task::JoinHandle;
    use tokio_util::sync::CancellationToken;

    use crate::bridge::protocol::{Envelope, WireDocument};
    use crate::deferral::Deferral;
    use crate::handler::{CallContext, HandlerError, handler_fn};
    use crate::transport::memory::{self, MemoryPeer};

    const WAIT: Duration = Duration::from_secs(5);

    fn doc(value: serde_json::Value) -> Document {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    fn start(bridge: &Bridge) -> (MemoryPeer, JoinHandle<Result<CloseReason, ServeError>>) {
        let (activation, peer) = memory::channel();
        let serving = bridge.clone();
        let task = tokio::spawn(async move { serving.serve(activation).await });
        (peer, task)
    }

    async fn next_envelope(peer: &mut MemoryPeer) -> Envelope {
        tokio::time::timeout(WAIT, peer.recv_envelope())
            .await
            .expect("timed out waiting for outbound envelope")
            .expect("channel closed")
            .expect("undecodable outbound envelope")
    }

    async fn wait_connected(bridge: &Bridge) {
        tokio::time::timeout(WAIT, async {
            while bridge.state() != ConnectionState::Connected {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    fn echo_bridge() -> Bridge {
        let bridge = Bridge::new(BridgeConfig::new());
        bridge.handle(
            "echo",
            handler_fn(|call: CallContext| async move {
                let bridge = call.bridge().clone();
                bridge
                    .send_return(call.correlation_id(), Some(call.input().clone()), "")
                    .await?;
                Ok(())
            }),
        );
        bridge
    }

    #[tokio::test]
    async fn echo_call_produces_single_return() {
        let bridge = echo_bridge();
        let (mut peer, _task) = start(&bridge);

        let mut done = peer.deliver_envelope(&Envelope::call("echo", "42", doc(json!({"x": 1})), false));

        assert_eq!(
            next_envelope(&mut peer).await,
            Envelope::reply("42", Some(doc(json!({"x": 1}))), "")
        );
        tokio::time::timeout(WAIT, done.completed()).await.unwrap();
        assert!(peer.try_recv().is_none());
    }

    #[tokio::test]
    async fn unregistered_method_returns_error() {
        let bridge = Bridge::new(BridgeConfig::new());
        let (mut peer, _task) = start(&bridge);

        let mut done = peer.deliver_envelope(&Envelope::call("ghost", "7", Document::new(), false));

        match next_envelope(&mut peer).await {
            Envelope::Return(ret) => {
                assert_eq!(ret.correlation_id, "7");
                assert_eq!(ret.error, "ghost is not handled");
            }
            other => panic!("expected return, got {other:?}"),
        }
        tokio::time::timeout(WAIT, done.completed()).await.unwrap();
        assert!(peer.try_recv().is_none());
    }

    #[tokio::test]
    async fn most_recent_registration_wins() {
        let bridge = Bridge::new(BridgeConfig::new());
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        for counter in [&first, &second] {
            let counter = Arc::clone(counter);
            bridge.handle(
                "count",
                handler_fn(move |_call: CallContext| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
            );
        }
        let (peer, _task) = start(&bridge);

        let mut done = peer.deliver_envelope(&Envelope::call("count", "1", Document::new(), false));
        tokio::time::timeout(WAIT, done.completed()).await.unwrap();

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handler_error_becomes_error_return() {
        let bridge = Bridge::new(BridgeConfig::new());
        bridge.handle(
            "window.Close",
            handler_fn(|call: CallContext| async move {
                let id = call
                    .input()
                    .get("ID")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                call.bridge().resolve::<String>(&id)?;
                Ok(())
            }),
        );
        let (mut peer, _task) = start(&bridge);

        peer.deliver_envelope(&Envelope::call("window.Close", "c-1", doc(json!({"ID": "w9"})), false));

        assert_eq!(
            next_envelope(&mut peer).await,
            Envelope::reply("c-1", None, "object w9 is not found")
        );
    }

    #[tokio::test]
    async fn handler_panic_becomes_error_return() {
        let bridge = Bridge::new(BridgeConfig::new());
        bridge.handle(
            "explode",
            handler_fn(|_call: CallContext| async move {
                if true {
                    panic!("layout invariant broken");
                }
                Ok(())
            }),
        );
        let (mut peer, _task) = start(&bridge);

        let mut done = peer.deliver_envelope(&Envelope::call("explode", "p-1", Document::new(), true));

        match next_envelope(&mut peer).await {
            Envelope::Return(ret) => {
                assert_eq!(ret.correlation_id, "p-1");
                assert!(ret.error.contains("layout invariant broken"));
            }
            other => panic!("expected return, got {other:?}"),
        }
        tokio::time::timeout(WAIT, done.completed()).await.unwrap();
    }

    #[tokio::test]
    async fn ui_affine_calls_run_serially_in_arrival_order() {
        let bridge = Bridge::new(BridgeConfig::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        let running = Arc::new(AtomicUsize::new(0));
        {
            let order = Arc::clone(&order);
            let running = Arc::clone(&running);
            bridge.handle(
                "ui.Render",
                handler_fn(move |call: CallContext| {
                    let order = Arc::clone(&order);
                    let running = Arc::clone(&running);
                    async move {
                        assert_eq!(running.fetch_add(1, Ordering::SeqCst), 0, "overlapping UI calls");
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        order.lock().unwrap().push(call.correlation_id().to_string());
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    }
                }),
            );
        }
        let (peer, _task) = start(&bridge);
        wait_connected(&bridge).await;

        let mut waiters = Vec::new();
        for i in 0..5 {
            waiters.push(peer.deliver_envelope(&Envelope::call(
                "ui.Render",
                i.to_string(),
                Document::new(),
                true,
            )));
        }
        for waiter in &mut waiters {
            tokio::time::timeout(WAIT, waiter.completed()).await.unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec!["0", "1", "2", "3", "4"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn ui_affine_burst_keeps_arrival_order_on_multi_thread_runtime() {
        const CALLS: usize = 50;

        for _ in 0..10 {
            let bridge = Bridge::new(BridgeConfig::new());
            let order = Arc::new(Mutex::new(Vec::new()));
            {
                let order = Arc::clone(&order);
                bridge.handle(
                    "ui.Render",
                    handler_fn(move |call: CallContext| {
                        let order = Arc::clone(&order);
                        async move {
                            tokio::task::yield_now().await;
                            order.lock().unwrap().push(call.correlation_id().to_string());
                            Ok(())
                        }
                    }),
                );
            }
            let (peer, _task) = start(&bridge);
            wait_connected(&bridge).await;

            let mut waiters: Vec<_> = (0..CALLS)
                .map(|i| {
                    peer.deliver_envelope(&Envelope::call(
                        "ui.Render",
                        i.to_string(),
                        Document::new(),
                        true,
                    ))
                })
                .collect();
            for waiter in &mut waiters {
                tokio::time::timeout(WAIT, waiter.completed()).await.unwrap();
            }

            let expected: Vec<String> = (0..CALLS).map(|i| i.to_string()).collect();
            assert_eq!(*order.lock().unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn undecodable_message_is_dropped_but_completed() {
        let bridge = echo_bridge();
        let (mut peer, _task) = start(&bridge);

        let garbage: WireDocument = [("Operation", "Teleport")].into_iter().collect();
        let mut done = peer.deliver(garbage);

        tokio::time::timeout(WAIT, done.completed()).await.unwrap();
        assert!(peer.try_recv().is_none());
    }

    #[tokio::test]
    async fn handler_may_reply_after_returning() {
        let bridge = Bridge::new(BridgeConfig::new());
        let (id_tx, mut id_rx) = mpsc::unbounded_channel::<String>();
        bridge.handle(
            "dialog.Open",
            handler_fn(move |call: CallContext| {
                let id_tx = id_tx.clone();
                async move {
                    let _ = id_tx.send(call.correlation_id().to_string());
                    Ok(())
                }
            }),
        );
        let (mut peer, _task) = start(&bridge);

        let mut done = peer.deliver_envelope(&Envelope::call("dialog.Open", "d-1", Document::new(), false));
        tokio::time::timeout(WAIT, done.completed()).await.unwrap();
        assert!(peer.try_recv().is_none());

        let id = id_rx.recv().await.unwrap();
        bridge
            .send_return(&id, Some(doc(json!({"choice": "ok"}))), "")
            .await
            .unwrap();

        assert_eq!(
            next_envelope(&mut peer).await,
            Envelope::reply("d-1", Some(doc(json!({"choice": "ok"}))), "")
        );
    }

    #[tokio::test]
    async fn peer_close_releases_activation() {
        let bridge = echo_bridge();
        let (mut peer, task) = start(&bridge);
        wait_connected(&bridge).await;

        peer.close("bye");

        let reason = tokio::time::timeout(WAIT, task).await.unwrap().unwrap().unwrap();
        assert_eq!(reason, CloseReason::PeerClosed);
        assert!(peer.activation().is_completed());
        assert_eq!(bridge.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn close_racing_cancel_completes_activation_once() {
        let bridge = Bridge::new(BridgeConfig::new());
        let count = Arc::new(AtomicUsize::new(0));
        let (events_tx, events) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let activation = Activation {
            sender: memory::discarding_sender(),
            events,
            deferral: Deferral::from_fn({
                let count = Arc::clone(&count);
                move || {
                    count.fetch_add(1, Ordering::SeqCst);
                }
            }),
            cancel: cancel.clone(),
        };

        events_tx
            .send(ChannelEvent::PeerClosed {
                status: "completed".to_string(),
            })
            .unwrap();
        cancel.cancel();
        let reason = bridge.serve(activation).await.unwrap();
        bridge.close();

        assert_eq!(reason, CloseReason::Cancelled);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn closing_releases_deferrals_of_running_handlers() {
        let bridge = Bridge::new(BridgeConfig::new());
        let gate = Arc::new(Notify::new());
        {
            let gate = Arc::clone(&gate);
            bridge.handle(
                "slow",
                handler_fn(move |_call: CallContext| {
                    let gate = Arc::clone(&gate);
                    async move {
                        gate.notified().await;
                        Ok(())
                    }
                }),
            );
        }
        let (mut peer, task) = start(&bridge);

        let mut done = peer.deliver_envelope(&Envelope::call("slow", "s-1", Document::new(), false));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!done.is_completed());

        peer.cancel();

        tokio::time::timeout(WAIT, done.completed()).await.unwrap();
        assert_eq!(
            tokio::time::timeout(WAIT, task).await.unwrap().unwrap().unwrap(),
            CloseReason::Cancelled
        );
        assert!(peer.activation().is_completed());
        gate.notify_waiters();
    }

    #[tokio::test]
    async fn second_activation_is_rejected_while_connected() {
        let bridge = Bridge::new(BridgeConfig::new());
        let (_peer, _task) = start(&bridge);
        wait_connected(&bridge).await;

        let (activation, mut other) = memory::channel();
        let err = bridge.serve(activation).await.unwrap_err();

        assert!(matches!(err, ServeError::AlreadyConnected(_)));
        assert!(other.activation().is_completed());
    }

    #[tokio::test]
    async fn new_activation_after_close_gets_new_connection() {
        let bridge = echo_bridge();
        let (peer, task) = start(&bridge);
        wait_connected(&bridge).await;
        let first = bridge.connection().unwrap().id();
        peer.close("restart");
        tokio::time::timeout(WAIT, task).await.unwrap().unwrap().unwrap();

        let (mut peer, _task) = start(&bridge);
        wait_connected(&bridge).await;
        assert_ne!(bridge.connection().unwrap().id(), first);

        peer.deliver_envelope(&Envelope::call("echo", "again", Document::new(), false));
        assert_eq!(next_envelope(&mut peer).await.correlation_id(), "again");
    }

    #[tokio::test]
    async fn sending_without_connection_fails() {
        let bridge = Bridge::new(BridgeConfig::new());

        let err = bridge.call("driver.Ping", Document::new(), false).await.unwrap_err();

        assert!(matches!(err, SendError::NotConnected));
        assert_eq!(bridge.state(), ConnectionState::Unconnected);
    }

    #[tokio::test]
    async fn sending_after_close_fails() {
        let bridge = Bridge::new(BridgeConfig::new());
        let (peer, task) = start(&bridge);
        wait_connected(&bridge).await;
        peer.close("done");
        tokio::time::timeout(WAIT, task).await.unwrap().unwrap().unwrap();

        let err = bridge.send_return("1", None, "").await.unwrap_err();

        assert!(matches!(err, SendError::Closed));
    }

    #[tokio::test]
    async fn log_calls_configured_method() {
        let bridge = Bridge::new(BridgeConfig::new());
        let (mut peer, _task) = start(&bridge);
        wait_connected(&bridge).await;

        bridge.log(format!("window {} ready", 3)).await.unwrap();

        assert_eq!(
            next_envelope(&mut peer).await,
            Envelope::call("driver.Log", "", doc(json!({"Msg": "window 3 ready"})), false)
        );
    }

    #[tokio::test]
    async fn outbound_call_reply_reaches_return_hook() {
        let bridge = Bridge::new(BridgeConfig::new());
        let (ret_tx, mut ret_rx) = mpsc::unbounded_channel();
        bridge.on_return(move |ret| {
            let _ = ret_tx.send(ret);
        });
        let (mut peer, _task) = start(&bridge);
        wait_connected(&bridge).await;

        bridge
            .call_with_id("app.Render", "r-5", doc(json!({"path": "/"})), true)
            .await
            .unwrap();
        assert_eq!(
            next_envelope(&mut peer).await,
            Envelope::call("app.Render", "r-5", doc(json!({"path": "/"})), true)
        );

        peer.deliver_envelope(&Envelope::reply("r-5", None, "render failed"));

        let ret = tokio::time::timeout(WAIT, ret_rx.recv()).await.unwrap().unwrap();
        assert_eq!(ret.correlation_id, "r-5");
        assert!(ret.is_error());
    }

    #[tokio::test]
    async fn local_close_ends_serve() {
        let bridge = Bridge::new(BridgeConfig::new());
        let (mut peer, task) = start(&bridge);
        wait_connected(&bridge).await;

        assert!(bridge.close());
        assert!(!bridge.close());

        let reason = tokio::time::timeout(WAIT, task).await.unwrap().unwrap().unwrap();
        assert_eq!(reason, CloseReason::Shutdown);
        assert!(peer.activation().is_completed());
    }

    struct Recorder {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Handler for Recorder {
        async fn handle(&self, call: CallContext) -> Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            #[derive(serde::Deserialize)]
            struct Resize {
                width: u32,
                height: u32,
            }
            let resize: Resize = call.input_as()?;
            call.reply(doc(json!({"area": resize.width * resize.height})))
                .await?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn trait_handler_with_typed_input() {
        let bridge = Bridge::new(BridgeConfig::new());
        let calls = Arc::new(AtomicUsize::new(0));
        bridge.handle("window.Resize", Recorder { calls: Arc::clone(&calls) });
        let (mut peer, _task) = start(&bridge);

        peer.deliver_envelope(&Envelope::call(
            "window.Resize",
            "z-1",
            doc(json!({"width": 3, "height": 4})),
            false,
        ));
        assert_eq!(
            next_envelope(&mut peer).await,
            Envelope::reply("z-1", Some(doc(json!({"area": 12}))), "")
        );

        peer.deliver_envelope(&Envelope::call(
            "window.Resize",
            "z-2",
            doc(json!({"width": "wide"})),
            false,
        ));
        match next_envelope(&mut peer).await {
            Envelope::Return(ret) => {
                assert_eq!(ret.correlation_id, "z-2");
                assert!(ret.error.starts_with("invalid input"));
            }
            other => panic!("expected return, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn expose_resolve_revoke_through_bridge() {
        struct WindowHandle;
        struct Button;

        let bridge = Bridge::new(BridgeConfig::new());
        let handle = Arc::new(WindowHandle);

        bridge.expose("win1", &handle).unwrap();
        assert!(Arc::ptr_eq(&bridge.resolve::<WindowHandle>("win1").unwrap(), &handle));
        assert!(matches!(
            bridge.resolve::<Button>("win1"),
            Err(RegistryError::TypeMismatch { .. })
        ));
        assert!(bridge.revoke("win1"));
        assert!(matches!(
            bridge.resolve::<WindowHandle>("win1"),
            Err(RegistryError::NotFound(_))
        ));
    }
}
