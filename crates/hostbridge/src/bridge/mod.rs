//! Wire layer shared by both ends of the host channel.
//!
//! # Architecture
//!
//! - **protocol**: Envelope types (Call/Return) and the flat wire document
//! - **codec**: JSON framing codec for AsyncRead/AsyncWrite

pub mod codec;
pub mod protocol;
