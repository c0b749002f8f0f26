//! Pluggable framing codecs for wire protocols.
//!
//! A codec translates between raw byte buffers and typed messages. Decoding
//! consumes bytes from the connection's receive buffer and reports either a
//! complete message or a streamed one whose body bytes the controller will
//! route into a [`Sink`]. Encoding produces either a fully materialised
//! frame or a [`Source`] the controller drains incrementally.
//!
//! The controller treats codecs as opaque: framing rules, limits, and
//! message semantics all live behind this trait.

use bytes::{Bytes, BytesMut};
use thiserror::Error;

use crate::pipe::{Sink, Source};

#[doc(hidden)]
pub mod examples;

/// Errors raised by codec implementations.
///
/// Any codec error is unrecoverable for the connection: framing state is
/// unknown after a malformed or oversized frame, so the controller tears the
/// connection down.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The inbound byte stream violates the protocol's framing rules.
    #[error("malformed frame: {reason}")]
    Malformed {
        /// Human-readable description of the violation.
        reason: String,
    },

    /// A frame announces or occupies more bytes than the codec permits.
    #[error("frame exceeds max length: {size} > {max}")]
    OversizedFrame {
        /// Observed or declared frame size.
        size: usize,
        /// Maximum the codec accepts.
        max: usize,
    },

    /// An outbound message cannot be represented on the wire.
    #[error("message could not be encoded: {reason}")]
    Unencodable {
        /// Human-readable description of the failure.
        reason: String,
    },
}

/// A decoded frame, produced by [`Codec::decode`].
#[derive(Debug)]
pub enum Decoded<M> {
    /// The frame arrived in one piece.
    Complete(M),
    /// The frame header is complete; body bytes follow on the wire.
    ///
    /// The controller feeds subsequent inbound bytes into `body` until the
    /// pipe reports completion. The message itself typically carries the
    /// matching [`Source`] for the application to consume.
    Streamed {
        /// The decoded message (header).
        message: M,
        /// Producer handle the controller routes body bytes into.
        body: Sink,
    },
}

/// An encoded frame, produced by [`Codec::encode`].
#[derive(Debug)]
pub enum Encoded {
    /// A fully materialised frame.
    Buffer(Bytes),
    /// A frame whose body is produced incrementally. Ownership of the
    /// source transfers to the controller, which drains it to the endpoint.
    Stream(Source),
}

/// Protocol-specific encoder/decoder consumed by the controller.
pub trait Codec {
    /// Message type carried by this protocol. Messages are queued inside
    /// the controller, so they must own their data.
    type Message: 'static;

    /// Consume bytes from the front of `src` and return a frame once one is
    /// complete. `Ok(None)` means more bytes are needed; unconsumed bytes
    /// stay in `src` and are re-offered (possibly extended) on the next
    /// call. A buffer may carry several frames; the controller re-invokes
    /// `decode` while `src` holds unread data.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] when the byte stream is unrecoverable; the
    /// controller responds by killing the connection.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Decoded<Self::Message>>, CodecError>;

    /// Encode `message` for transmission.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] when the message cannot be represented; the
    /// controller fails the message's post-write callback and kills the
    /// connection.
    fn encode(&mut self, message: Self::Message) -> Result<Encoded, CodecError>;
}
