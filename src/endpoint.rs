//! Transport endpoint interface consumed by the controller.
//!
//! An endpoint is the non-blocking write/read handle over a single
//! connection, owned exclusively by the controller while the connection is
//! alive. The reactor that registers the underlying socket stays outside
//! this crate; it delivers bytes and readiness through the controller's
//! event entry points.

use bytes::Bytes;

/// Result of a non-blocking endpoint write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteStatus {
    /// All bytes were accepted and flushed.
    Complete,
    /// All bytes were accepted but the endpoint is backed up; hold further
    /// writes until `ready_for_data` is delivered.
    Partial,
    /// No bytes were accepted.
    Zero,
    /// The write failed; the connection is dying.
    Failed,
}

/// Why a connection ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DisconnectCause {
    /// The local side requested the close.
    Requested,
    /// The remote side closed the connection.
    RemoteClosed,
    /// An idle or request timeout elapsed.
    TimedOut,
    /// The transport failed.
    Failed(String),
}

impl std::fmt::Display for DisconnectCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Requested => f.write_str("disconnect requested"),
            Self::RemoteClosed => f.write_str("closed by remote"),
            Self::TimedOut => f.write_str("timed out"),
            Self::Failed(reason) => write!(f, "transport failure: {reason}"),
        }
    }
}

/// Non-blocking transport handle over a single connection.
///
/// `write` consumes as many bytes as possible and reports how the write
/// went; an endpoint reporting [`WriteStatus::Partial`] buffers the
/// remainder internally and delivers `ready_for_data` once it drains. The
/// read toggles are idempotent. `disconnect` initiates a graceful close
/// that surfaces later as a `connection_closed` event.
pub trait Endpoint {
    /// Write `buf`, consuming as much as possible.
    fn write(&mut self, buf: Bytes) -> WriteStatus;

    /// Resume delivering inbound bytes.
    fn enable_reads(&mut self);

    /// Stop delivering inbound bytes.
    fn disable_reads(&mut self);

    /// Initiate a graceful close of the transport.
    fn disconnect(&mut self);
}
