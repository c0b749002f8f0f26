#![doc(html_root_url = "https://docs.rs/wireflow/latest")]
//! Per-connection framing and flow-control engine.
//!
//! `wireflow` sits between a raw byte-oriented transport endpoint and a
//! protocol-specific codec. It turns inbound byte buffers into decoded
//! messages (possibly with streamed bodies), turns a bounded queue of
//! outbound messages into endpoint writes that honour partial-write
//! backpressure, and coordinates the connection lifecycle, including
//! graceful shutdown, across both directions.
//!
//! The reactor, the real socket endpoint, and protocol codecs live outside
//! this crate: the reactor drives a [`Controller`] through its event entry
//! points, the [`Endpoint`] trait abstracts the transport, and the
//! [`Codec`] trait abstracts the protocol.

pub mod codec;
pub mod config;
pub mod connection;
pub mod endpoint;
pub mod error;
pub mod pipe;
pub mod testing;

pub use codec::{Codec, CodecError, Decoded, Encoded};
pub use config::ControllerConfig;
pub use connection::{ConnectionContext, ConnectionHandler, Controller, FnHandler, PostWrite};
pub use endpoint::{DisconnectCause, Endpoint, WriteStatus};
pub use error::{ControllerError, OutputResult};
pub use pipe::{PipeTermination, Pull, PushResult, Sink, Source, Trigger, pipe, sized_pipe};
