//! hostbridge: call/return bridge between a UI front end and its companion
//! process, carried over a host-provided duplex message channel.

mod dispatch;

pub mod bridge;
pub mod config;
pub mod connection;
pub mod deferral;
pub mod executor;
pub mod handler;
pub mod launcher;
pub mod logging;
pub mod registry;
pub mod service;
pub mod transport;

pub use bridge::protocol::{
    CallEnvelope, DecodeError, Document, Envelope, Operation, ReturnEnvelope, WireDocument,
};
pub use config::BridgeConfig;
pub use connection::{CloseReason, Connection, ConnectionId, ConnectionState, SendError};
pub use deferral::{Deferral, DeferralWaiter};
pub use dispatch::DispatchError;
pub use executor::{ContextError, ExecutionContext, Job, SerialContext};
pub use handler::{
    CallContext, Handler, HandlerError, HandlerFn, HandlerTable, ReturnHook, UnhandledMethod,
    handler_fn,
};
pub use launcher::{CompanionLauncher, LaunchError, LaunchState, ProcessLauncher};
pub use registry::{ObjectRegistry, RegistryError};
pub use service::{Bridge, ServeError};
pub use transport::{Activation, ChannelError, ChannelEvent, ChannelSender, InboundMessage};
