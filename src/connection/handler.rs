//! Application-facing handler trait and delivery context.

use crate::{
    codec::Codec,
    endpoint::{DisconnectCause, Endpoint},
    error::OutputResult,
};

use super::engine::Engine;

/// Receives decoded messages and lifecycle notifications for a connection.
///
/// `process_message` runs inline with delivery and gets a
/// [`ConnectionContext`] for pushing replies or steering the connection.
/// Inside any handler callback, use the context rather than a cloned
/// [`Controller`](super::Controller) handle: the controller is already
/// running, and handle calls would be refused as re-entrant.
pub trait ConnectionHandler<C: Codec, E: Endpoint> {
    /// Handle a decoded inbound message.
    fn process_message(&mut self, message: C::Message, ctx: &mut ConnectionContext<'_, C, E>);

    /// Called after a transport is attached.
    fn connection_opened(&mut self, _ctx: &mut ConnectionContext<'_, C, E>) {}

    /// Called once when the connection fully closes, for any reason.
    fn connection_closed(&mut self, _cause: &DisconnectCause) {}
}

/// Adapter turning a closure into a [`ConnectionHandler`].
pub struct FnHandler<F>(pub F);

impl<C, E, F> ConnectionHandler<C, E> for FnHandler<F>
where
    C: Codec,
    E: Endpoint,
    F: FnMut(C::Message, &mut ConnectionContext<'_, C, E>),
{
    fn process_message(&mut self, message: C::Message, ctx: &mut ConnectionContext<'_, C, E>) {
        (self.0)(message, ctx);
    }
}

/// Mutable view of the connection handed to handler callbacks.
pub struct ConnectionContext<'a, C: Codec, E: Endpoint> {
    engine: &'a mut Engine<C, E>,
}

impl<'a, C: Codec, E: Endpoint> ConnectionContext<'a, C, E> {
    pub(super) fn new(engine: &'a mut Engine<C, E>) -> Self {
        Self { engine }
    }

    /// Queue a message for transmission; see
    /// [`Controller::push`](super::Controller::push).
    pub fn push(
        &mut self,
        message: C::Message,
        post_write: impl FnOnce(OutputResult) + 'static,
    ) -> bool {
        self.engine.push(message, Box::new(post_write))
    }

    /// Whether the connection is attached and accepting new work.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.engine.is_connected()
    }

    /// Whether a graceful disconnect is draining.
    #[must_use]
    pub fn is_disconnecting(&self) -> bool {
        self.engine.is_disconnecting()
    }

    /// Messages waiting in the outbound queue.
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.engine.pending_writes()
    }

    /// Refuse new work and drain both directions before closing.
    pub fn graceful_disconnect(&mut self) {
        self.engine.graceful_disconnect();
    }

    /// Request a hard close of the transport.
    pub fn disconnect(&mut self) {
        self.engine.disconnect();
    }

    /// Stop delivering inbound bytes.
    pub fn pause_reads(&mut self) {
        self.engine.pause_reads();
    }

    /// Resume delivering inbound bytes.
    pub fn resume_reads(&mut self) {
        self.engine.resume_reads();
    }

    /// Stop feeding the outbound queue to the endpoint.
    pub fn pause_writes(&mut self) {
        self.engine.pause_writes();
    }

    /// Resume feeding the outbound queue.
    pub fn resume_writes(&mut self) {
        self.engine.resume_writes();
    }

    /// Fail the in-flight write, if any.
    pub fn purge_outgoing(&mut self) {
        self.engine.purge_outgoing();
    }

    /// Cancel all queued writes.
    pub fn purge_pending(&mut self) {
        self.engine.purge_pending();
    }

    /// Fail the in-flight write and cancel all queued writes.
    pub fn purge_all(&mut self) {
        self.engine.purge_all();
    }
}
