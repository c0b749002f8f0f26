//! Canonical error and result types for the crate.
//!
//! [`ControllerError`] is the typed rendition of a connection fault: event
//! entry points return it after tearing the connection down, replacing the
//! exception-driven fatal paths of classic controller designs.
//! [`OutputResult`] is the application-visible outcome of a pushed message,
//! delivered exactly once through its post-write callback.

use thiserror::Error;

use crate::{codec::CodecError, pipe::PipeTermination};

/// Outcome of a pushed message, delivered to its post-write callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputResult {
    /// The frame was fully handed to the endpoint.
    Success,
    /// Encoding or writing failed; the connection is being torn down.
    Failure,
    /// The message was purged before it reached the endpoint.
    Cancelled,
}

/// Fatal connection faults surfaced by controller entry points.
///
/// Any of these kills the connection: the controller fails outstanding
/// callbacks and body pipes, disconnects the endpoint, and returns the
/// fault to the caller.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ControllerError {
    /// `connected` was called on a controller that is not detached.
    #[error("`connected` called while {state}")]
    AlreadyConnected {
        /// Name of the state the controller was in.
        state: &'static str,
    },

    /// Bytes arrived in a state that must not receive them.
    #[error("received data while {state}")]
    UnexpectedData {
        /// Name of the offending input or connection state.
        state: &'static str,
    },

    /// `ready_for_data` was delivered with no write in flight.
    #[error("`ready_for_data` with no write in flight ({state})")]
    UnexpectedWriteReady {
        /// Name of the output state at the time.
        state: &'static str,
    },

    /// The endpoint refused or failed a write.
    #[error("endpoint write failed")]
    WriteFailed,

    /// The endpoint accepted no bytes for a streamed chunk.
    #[error("endpoint accepted no bytes for a streamed chunk")]
    StalledWrite,

    /// The inbound body pipe died before the body completed; the remaining
    /// frame boundary is unknowable.
    #[error("inbound body lost: {0}")]
    InboundBodyLost(PipeTermination),

    /// A bounded inbound body's consumer closed the pipe mid-body.
    #[error("inbound body abandoned before completion")]
    InboundBodyAbandoned,

    /// The outbound body pipe died with the body half-sent on the wire.
    #[error("outbound body lost: {0}")]
    OutboundBodyLost(PipeTermination),

    /// The codec reported an unrecoverable error.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A handle method was invoked re-entrantly from inside a delivery;
    /// use the provided `ConnectionContext` instead.
    #[error("re-entrant call into a running controller")]
    Reentrant,
}
