//! Composed connection state machine and lifecycle transitions.
//!
//! `Engine` owns the codec, the connection state, and the input and output
//! halves. Faults are recorded rather than thrown: any method that hits an
//! unrecoverable condition calls [`Engine::fail`], which tears the
//! connection down immediately and stashes the typed error for the entry
//! point to return.

use std::collections::VecDeque;

use crate::{
    codec::Codec,
    config::ControllerConfig,
    endpoint::{DisconnectCause, Endpoint},
    error::{ControllerError, OutputResult},
};

use super::{
    Waker,
    input::{InputHalf, InputState},
    output::{OutputHalf, OutputState, PostWrite},
};

/// Lifecycle of the transport attachment.
pub(crate) enum ConnectionState<E> {
    /// Detached; the controller may be (re)attached with `connected`.
    NotConnected,
    /// Attached and accepting work in both directions.
    Connected {
        /// Exclusively owned transport handle.
        endpoint: E,
    },
    /// Draining: no new work accepted, outstanding bodies completing.
    Disconnecting {
        /// Exclusively owned transport handle.
        endpoint: E,
    },
}

impl<E> ConnectionState<E> {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::NotConnected => "not connected",
            Self::Connected { .. } => "connected",
            Self::Disconnecting { .. } => "disconnecting",
        }
    }

    pub(crate) fn is_alive(&self) -> bool {
        matches!(self, Self::Connected { .. } | Self::Disconnecting { .. })
    }

    pub(crate) fn is_disconnecting(&self) -> bool {
        matches!(self, Self::Disconnecting { .. })
    }

    pub(crate) fn endpoint_mut(&mut self) -> Option<&mut E> {
        match self {
            Self::Connected { endpoint } | Self::Disconnecting { endpoint } => Some(endpoint),
            Self::NotConnected => None,
        }
    }
}

/// A post-write callback ready to run, paired with its result.
pub(crate) type Completion = (PostWrite, OutputResult);

/// The per-connection framing and flow-control state machine.
pub(crate) struct Engine<C: Codec, E: Endpoint> {
    pub(super) config: ControllerConfig,
    pub(super) codec: C,
    pub(super) state: ConnectionState<E>,
    pub(super) input: InputHalf,
    pub(super) output: OutputHalf<C::Message>,
    /// Post-write callbacks queued in completion order; run by the pump
    /// once the state-machine borrow is released.
    pub(super) completions: VecDeque<Completion>,
    pub(super) waker: Waker,
    /// First unrecoverable fault, taken by the owning entry point.
    pub(super) fault: Option<ControllerError>,
    /// Close cause awaiting delivery to the handler's close hook.
    pub(super) closed_event: Option<DisconnectCause>,
}

impl<C: Codec, E: Endpoint> Engine<C, E> {
    pub(super) fn new(codec: C, config: ControllerConfig) -> Self {
        Self {
            config,
            codec,
            state: ConnectionState::NotConnected,
            input: InputHalf::new(),
            output: OutputHalf::new(),
            completions: VecDeque::new(),
            waker: Waker::default(),
            fault: None,
            closed_event: None,
        }
    }

    /// Attach a transport. Only legal from `NotConnected`; the controller
    /// is reusable across connections once fully closed.
    pub(super) fn connected(&mut self, endpoint: E) {
        if !matches!(self.state, ConnectionState::NotConnected) {
            self.fail(ControllerError::AlreadyConnected {
                state: self.state.name(),
            });
            return;
        }
        log::info!("connection established");
        self.state = ConnectionState::Connected { endpoint };
        self.input = InputHalf::new();
        self.output = OutputHalf::new();
    }

    /// Request a hard close. The endpoint delivers a `connection_closed`
    /// event later; state is unchanged until then.
    pub(super) fn disconnect(&mut self) {
        if let Some(endpoint) = self.state.endpoint_mut() {
            log::info!("disconnect requested");
            endpoint.disconnect();
        }
    }

    /// Stop accepting new work and drain both directions. Repeat calls and
    /// calls while detached are no-ops.
    pub(super) fn graceful_disconnect(&mut self) {
        match std::mem::replace(&mut self.state, ConnectionState::NotConnected) {
            ConnectionState::Connected { endpoint } => {
                log::info!("graceful disconnect: draining both directions");
                self.state = ConnectionState::Disconnecting { endpoint };
                self.input_graceful_disconnect();
                self.settle_output();
                self.check_graceful();
            }
            other => self.state = other,
        }
    }

    /// Close the endpoint once both halves have terminated during a
    /// graceful disconnect. This is the sole path that closes the endpoint
    /// on a drained connection.
    pub(super) fn check_graceful(&mut self) {
        if self.state.is_disconnecting()
            && matches!(self.input.state, InputState::Terminated)
            && matches!(self.output.state, OutputState::Terminated)
        {
            log::info!("graceful disconnect complete");
            self.close_internal(DisconnectCause::Requested, true);
        }
    }

    /// Handle a `connection_closed` / `connection_lost` event from the
    /// endpoint. Events arriving after the controller already detached
    /// (graceful completion, fault teardown) are ignored.
    pub(super) fn connection_event(&mut self, cause: DisconnectCause) {
        if matches!(self.state, ConnectionState::NotConnected) {
            log::trace!("connection event after close ignored: {cause}");
            return;
        }
        self.close_internal(cause, false);
    }

    /// Record an unrecoverable fault and tear the connection down. Only the
    /// first fault is kept.
    pub(super) fn fail(&mut self, err: ControllerError) {
        if self.fault.is_some() {
            return;
        }
        log::warn!("connection fault: {err}");
        self.close_internal(DisconnectCause::Failed(err.to_string()), true);
        self.fault = Some(err);
    }

    /// Detach, failing every outstanding callback and body pipe.
    fn close_internal(&mut self, cause: DisconnectCause, hang_up: bool) {
        match std::mem::replace(&mut self.state, ConnectionState::NotConnected) {
            ConnectionState::NotConnected => {}
            ConnectionState::Connected { mut endpoint }
            | ConnectionState::Disconnecting { mut endpoint } => {
                if hang_up {
                    endpoint.disconnect();
                }
                log::info!("connection closed: {cause}");
                self.input_on_closed();
                self.output_on_closed();
                self.closed_event = Some(cause);
            }
        }
    }

    /// Queue a post-write callback for invocation in completion order.
    pub(super) fn complete(&mut self, post_write: PostWrite, result: OutputResult) {
        self.completions.push_back((post_write, result));
    }

    pub(super) fn is_connected(&self) -> bool {
        matches!(self.state, ConnectionState::Connected { .. })
    }

    pub(super) fn is_disconnecting(&self) -> bool {
        self.state.is_disconnecting()
    }

    pub(super) fn pending_writes(&self) -> usize {
        self.output.queue.len()
    }
}
