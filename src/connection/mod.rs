//! Per-connection controller: framing and flow control in both directions.
//!
//! [`Controller`] composes an input machine (bytes → decoded messages,
//! possibly with streamed bodies), an output machine (queued messages →
//! endpoint writes honouring partial-write backpressure), and the
//! connection lifecycle over a single state. The reactor drives it through
//! event entry points (`connected`, `received_data`, `ready_for_data`,
//! `connection_closed`, `connection_lost`); the application talks to it
//! through `push`, the flow-control toggles, and the handler callbacks.
//!
//! The controller is single-threaded cooperative: one scheduling context
//! owns it, and every callback (message delivery, post-write completions,
//! pipe triggers) runs serialised on that context. Pipe notifications
//! raised while the controller is running are queued and drained before the
//! active entry point returns; post-write callbacks likewise run after the
//! state machine has settled, in push order, so they may freely re-enter
//! the controller through a cloned handle.

mod dispatch;
mod engine;
mod handler;
mod input;
mod output;

use std::{
    cell::RefCell,
    collections::VecDeque,
    rc::{Rc, Weak},
};

use dispatch::Core;

pub use handler::{ConnectionContext, ConnectionHandler, FnHandler};
pub use output::PostWrite;

use crate::{
    codec::Codec,
    config::ControllerConfig,
    endpoint::{DisconnectCause, Endpoint},
    error::{ControllerError, OutputResult},
};

/// Deferred notification from a body pipe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Wake {
    /// A blocked inbound body pipe drained (or died); resume reads.
    InputReady,
    /// The outbound body pipe has data (or finished); resume draining.
    OutputReady,
}

/// Receives wakes from pipe callbacks and pumps the controller.
pub(crate) trait Pump {
    fn wake(&self, wake: Wake);
}

/// Creates wake closures for pipe triggers and readiness hooks. Holds only
/// a weak reference, so pipes never keep a dead controller alive.
#[derive(Clone, Default)]
pub(crate) struct Waker {
    target: Option<Weak<dyn Pump>>,
}

impl Waker {
    pub(crate) fn hook(&self, wake: Wake) -> Box<dyn FnOnce()> {
        let target = self.target.clone();
        Box::new(move || {
            if let Some(pump) = target.as_ref().and_then(Weak::upgrade) {
                pump.wake(wake);
            }
        })
    }
}

struct Shared<C: Codec, E: Endpoint, H> {
    core: RefCell<Core<C, E, H>>,
    wakes: RefCell<VecDeque<Wake>>,
}

impl<C, E, H> Shared<C, E, H>
where
    C: Codec,
    E: Endpoint,
    H: ConnectionHandler<C, E>,
{
    /// Drain queued completions and wakes. A no-op while an entry point is
    /// active; that entry point pumps again before returning to its caller.
    fn pump(&self) {
        loop {
            let completion = match self.core.try_borrow_mut() {
                Ok(mut core) => core.engine.completions.pop_front(),
                Err(_) => return,
            };
            if let Some((post_write, result)) = completion {
                post_write(result);
                continue;
            }
            let Some(wake) = self.wakes.borrow_mut().pop_front() else {
                return;
            };
            match self.core.try_borrow_mut() {
                Ok(mut core) => core.handle_wake(wake),
                Err(_) => {
                    self.wakes.borrow_mut().push_front(wake);
                    return;
                }
            }
        }
    }
}

impl<C, E, H> Pump for Shared<C, E, H>
where
    C: Codec,
    E: Endpoint,
    H: ConnectionHandler<C, E>,
{
    fn wake(&self, wake: Wake) {
        self.wakes.borrow_mut().push_back(wake);
        self.pump();
    }
}

/// Cloneable handle to a per-connection controller.
///
/// Created detached; [`Controller::connected`] attaches a transport. On
/// close, whether graceful, remote, or fault, every outstanding post-write
/// callback and body pipe is failed exactly once, and the controller
/// returns to the detached state, reusable for a new connection.
pub struct Controller<C, E, H>
where
    C: Codec + 'static,
    E: Endpoint + 'static,
    H: ConnectionHandler<C, E> + 'static,
{
    shared: Rc<Shared<C, E, H>>,
}

impl<C, E, H> Clone for Controller<C, E, H>
where
    C: Codec + 'static,
    E: Endpoint + 'static,
    H: ConnectionHandler<C, E> + 'static,
{
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<C, E, H> Controller<C, E, H>
where
    C: Codec + 'static,
    E: Endpoint + 'static,
    H: ConnectionHandler<C, E> + 'static,
{
    /// Build a detached controller around a codec and handler.
    #[must_use]
    pub fn new(codec: C, handler: H, config: ControllerConfig) -> Self {
        let shared = Rc::new(Shared {
            core: RefCell::new(Core::new(codec, handler, config)),
            wakes: RefCell::new(VecDeque::new()),
        });
        let pump: Rc<dyn Pump> = Rc::clone(&shared) as Rc<dyn Pump>;
        shared.core.borrow_mut().engine.waker = Waker {
            target: Some(Rc::downgrade(&pump)),
        };
        Self { shared }
    }

    /// Attach a transport endpoint.
    ///
    /// # Errors
    ///
    /// [`ControllerError::AlreadyConnected`] unless the controller is
    /// detached; the previous connection is torn down in that case.
    pub fn connected(&self, endpoint: E) -> Result<(), ControllerError> {
        self.enter(|core| core.connected(endpoint))
    }

    /// Deliver inbound bytes from the endpoint.
    ///
    /// # Errors
    ///
    /// Any [`ControllerError`] raised while decoding or routing; the
    /// connection has already been torn down when one is returned.
    pub fn received_data(&self, data: &[u8]) -> Result<(), ControllerError> {
        self.enter(|core| core.received_data(data))
    }

    /// Endpoint write capacity returned after a partial write.
    ///
    /// # Errors
    ///
    /// [`ControllerError::UnexpectedWriteReady`] when no write is in
    /// flight, or any fault raised while resuming the write.
    pub fn ready_for_data(&self) -> Result<(), ControllerError> {
        self.enter(|core| core.ready_for_data())
    }

    /// The endpoint closed as expected.
    pub fn connection_closed(&self, cause: DisconnectCause) {
        self.run(|core| core.connection_closed(cause));
    }

    /// The endpoint dropped unexpectedly.
    pub fn connection_lost(&self, cause: DisconnectCause) {
        self.run(|core| core.connection_lost(cause));
    }

    /// Queue a message for transmission.
    ///
    /// Returns `false`, without invoking `post_write`, when the
    /// controller is not connected or the outbound queue is full; the
    /// caller owns retry policy. When `true` is returned, `post_write` runs
    /// exactly once with the message's final [`OutputResult`].
    pub fn push(
        &self,
        message: C::Message,
        post_write: impl FnOnce(OutputResult) + 'static,
    ) -> bool {
        let accepted = match self.shared.core.try_borrow_mut() {
            Ok(mut core) => core.push(message, Box::new(post_write)),
            Err(_) => {
                log::warn!("re-entrant push refused; use the ConnectionContext");
                false
            }
        };
        self.shared.pump();
        accepted
    }

    /// Refuse new work and close once both directions have drained.
    pub fn graceful_disconnect(&self) {
        self.run(Core::graceful_disconnect);
    }

    /// Request a hard close; the endpoint delivers the close event later.
    pub fn disconnect(&self) {
        self.run(Core::disconnect);
    }

    /// Stop delivering inbound bytes.
    pub fn pause_reads(&self) {
        self.run(Core::pause_reads);
    }

    /// Resume delivering inbound bytes.
    pub fn resume_reads(&self) {
        self.run(Core::resume_reads);
    }

    /// Stop feeding the outbound queue to the endpoint.
    pub fn pause_writes(&self) {
        self.run(Core::pause_writes);
    }

    /// Resume feeding the outbound queue.
    pub fn resume_writes(&self) {
        self.run(Core::resume_writes);
    }

    /// Fail the in-flight write, if any.
    pub fn purge_outgoing(&self) {
        self.run(Core::purge_outgoing);
    }

    /// Cancel all queued writes.
    pub fn purge_pending(&self) {
        self.run(Core::purge_pending);
    }

    /// Fail the in-flight write and cancel all queued writes.
    pub fn purge_all(&self) {
        self.run(Core::purge_all);
    }

    /// Whether the connection is attached and accepting new work.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared
            .core
            .try_borrow()
            .map(|core| core.engine.is_connected())
            .unwrap_or(false)
    }

    /// Whether a graceful disconnect is draining.
    #[must_use]
    pub fn is_disconnecting(&self) -> bool {
        self.shared
            .core
            .try_borrow()
            .map(|core| core.engine.is_disconnecting())
            .unwrap_or(false)
    }

    /// Messages waiting in the outbound queue.
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.shared
            .core
            .try_borrow()
            .map(|core| core.engine.pending_writes())
            .unwrap_or(0)
    }

    fn enter(
        &self,
        op: impl FnOnce(&mut Core<C, E, H>) -> Result<(), ControllerError>,
    ) -> Result<(), ControllerError> {
        let result = match self.shared.core.try_borrow_mut() {
            Ok(mut core) => op(&mut core),
            Err(_) => Err(ControllerError::Reentrant),
        };
        self.shared.pump();
        result
    }

    fn run(&self, op: impl FnOnce(&mut Core<C, E, H>)) {
        match self.shared.core.try_borrow_mut() {
            Ok(mut core) => op(&mut core),
            Err(_) => log::warn!("re-entrant controller call ignored; use the ConnectionContext"),
        }
        self.shared.pump();
    }
}
