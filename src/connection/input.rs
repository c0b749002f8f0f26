//! Inbound half: decode loop and streamed-body routing.
//!
//! Bytes delivered by the endpoint accumulate in a receive buffer; the
//! input machine repeatedly decodes frames out of it or feeds it into the
//! current body sink. Unconsumed bytes (a partial frame, or body bytes a
//! full sink refused) stay in the buffer and are replayed on the next
//! step, so no inbound data is ever dropped while the connection is alive.

use bytes::BytesMut;

use crate::{
    codec::{Codec, Decoded},
    endpoint::Endpoint,
    error::ControllerError,
    pipe::{PipeTermination, PushResult, Sink, Trigger},
};

use super::{
    Wake,
    engine::{ConnectionState, Engine},
};

/// Decode/stream state of the inbound direction.
pub(crate) enum InputState {
    /// Waiting for the next message frame.
    Decoding,
    /// Routing raw bytes into an inbound body pipe.
    ReadingStream {
        /// Producer handle of the body pipe.
        sink: Sink,
    },
    /// The body pipe is full; reads are disabled until the trigger fires.
    BlockedStream {
        /// Producer handle of the body pipe.
        sink: Sink,
        /// Drain notification registered with the controller's waker.
        trigger: Trigger,
    },
    /// No further input; entered during shutdown or teardown.
    Terminated,
}

impl InputState {
    fn name(&self) -> &'static str {
        match self {
            Self::Decoding => "decoding",
            Self::ReadingStream { .. } => "reading stream",
            Self::BlockedStream { .. } => "blocked stream",
            Self::Terminated => "terminated input",
        }
    }
}

pub(crate) struct InputHalf {
    pub(super) state: InputState,
    /// Unconsumed inbound bytes awaiting decode or body routing.
    pub(super) recv: BytesMut,
    /// Application-requested read pause, independent of stream blocking.
    pub(super) paused: bool,
}

impl InputHalf {
    pub(super) fn new() -> Self {
        Self {
            state: InputState::Decoding,
            recv: BytesMut::new(),
            paused: false,
        }
    }
}

/// One turn of the input machine.
pub(super) enum InputStep<M> {
    /// A decoded message to hand to the application.
    Deliver(M),
    /// Progress was made; run another step.
    Again,
    /// Nothing further to do until the next event.
    Settled,
}

impl<C: Codec, E: Endpoint> Engine<C, E> {
    /// Accept a buffer from the endpoint into the receive buffer.
    ///
    /// Data arriving while blocked or terminated is a fault: the endpoint
    /// must not deliver with reads disabled.
    pub(super) fn accept_data(&mut self, data: &[u8]) {
        if !self.state.is_alive() {
            self.fail(ControllerError::UnexpectedData {
                state: self.state.name(),
            });
            return;
        }
        match self.input.state {
            InputState::BlockedStream { .. } | InputState::Terminated => {
                self.fail(ControllerError::UnexpectedData {
                    state: self.input.state.name(),
                });
            }
            InputState::Decoding | InputState::ReadingStream { .. } => {
                self.input.recv.extend_from_slice(data);
            }
        }
    }

    /// Advance the input machine by one step.
    pub(super) fn input_step(&mut self) -> InputStep<C::Message> {
        if self.fault.is_some() || self.input.recv.is_empty() {
            return InputStep::Settled;
        }
        match self.input.state {
            InputState::Decoding => self.decode_step(),
            InputState::ReadingStream { .. } => self.stream_step(),
            InputState::BlockedStream { .. } | InputState::Terminated => InputStep::Settled,
        }
    }

    fn decode_step(&mut self) -> InputStep<C::Message> {
        match self.codec.decode(&mut self.input.recv) {
            Ok(None) => InputStep::Settled,
            Ok(Some(Decoded::Complete(message))) => InputStep::Deliver(message),
            Ok(Some(Decoded::Streamed { message, body })) => {
                log::trace!("streamed frame decoded; routing body bytes");
                self.input.state = InputState::ReadingStream { sink: body };
                InputStep::Deliver(message)
            }
            Err(err) => {
                self.fail(ControllerError::Codec(err));
                InputStep::Settled
            }
        }
    }

    fn stream_step(&mut self) -> InputStep<C::Message> {
        let result = {
            let InputHalf { state, recv, .. } = &mut self.input;
            let InputState::ReadingStream { sink } = state else {
                return InputStep::Settled;
            };
            sink.feed(recv)
        };
        match result {
            PushResult::Ok => InputStep::Again,
            PushResult::Done => self.finish_inbound_body(),
            PushResult::Full(trigger) => {
                log::debug!("inbound body pipe full; disabling reads");
                self.disable_endpoint_reads();
                trigger.fill(self.waker.hook(Wake::InputReady));
                let InputState::ReadingStream { sink } =
                    std::mem::replace(&mut self.input.state, InputState::Terminated)
                else {
                    return InputStep::Settled;
                };
                self.input.state = InputState::BlockedStream { sink, trigger };
                InputStep::Settled
            }
            PushResult::Closed => {
                let bounded = matches!(
                    &self.input.state,
                    InputState::ReadingStream { sink } if sink.is_bounded()
                );
                if bounded {
                    self.input.state = InputState::Terminated;
                    self.fail(ControllerError::InboundBodyAbandoned);
                    InputStep::Settled
                } else {
                    // The consumer has all it wants; the close is a frame
                    // boundary, not an error.
                    self.input.state = InputState::Decoding;
                    InputStep::Again
                }
            }
            PushResult::Terminated(termination) => {
                self.input.state = InputState::Terminated;
                self.fail(ControllerError::InboundBodyLost(termination));
                InputStep::Settled
            }
        }
    }

    /// The current body is complete; either resume decoding or, during a
    /// graceful disconnect, terminate the inbound direction.
    fn finish_inbound_body(&mut self) -> InputStep<C::Message> {
        match &self.state {
            ConnectionState::Disconnecting { .. } => {
                log::debug!("inbound body complete during graceful disconnect");
                self.disable_endpoint_reads();
                self.input.state = InputState::Terminated;
                self.input.recv.clear();
                self.check_graceful();
                InputStep::Settled
            }
            ConnectionState::Connected { .. } => {
                self.input.state = InputState::Decoding;
                InputStep::Again
            }
            ConnectionState::NotConnected => {
                self.input.state = InputState::Terminated;
                self.fail(ControllerError::UnexpectedData {
                    state: self.state.name(),
                });
                InputStep::Settled
            }
        }
    }

    /// Resume a blocked stream after its drain trigger fired. Returns true
    /// when the caller should replay the retained receive buffer.
    pub(super) fn unblock_input(&mut self) -> bool {
        if !matches!(self.input.state, InputState::BlockedStream { .. }) {
            return false;
        }
        let InputState::BlockedStream { sink, trigger } =
            std::mem::replace(&mut self.input.state, InputState::Decoding)
        else {
            return false;
        };
        trigger.cancel();
        if let Some(termination) = sink.termination() {
            self.input.state = InputState::Terminated;
            self.fail(ControllerError::InboundBodyLost(termination));
            return false;
        }
        log::debug!("inbound body pipe drained; resuming reads");
        if !self.input.paused {
            self.enable_endpoint_reads();
        }
        self.input.state = InputState::ReadingStream { sink };
        true
    }

    /// Fail any open body pipe and stop the inbound direction for good.
    pub(super) fn input_on_closed(&mut self) {
        match std::mem::replace(&mut self.input.state, InputState::Terminated) {
            InputState::ReadingStream { sink } => {
                sink.terminate(PipeTermination::ConnectionClosed);
            }
            InputState::BlockedStream { sink, trigger } => {
                trigger.cancel();
                sink.terminate(PipeTermination::ConnectionClosed);
            }
            InputState::Decoding | InputState::Terminated => {}
        }
        self.input.recv.clear();
    }

    /// Begin draining the inbound direction. An in-flight body is left to
    /// finish; `finish_inbound_body` completes the transition.
    pub(super) fn input_graceful_disconnect(&mut self) {
        if matches!(self.input.state, InputState::Decoding) {
            self.disable_endpoint_reads();
            self.input.state = InputState::Terminated;
            self.input.recv.clear();
        }
    }

    /// Application-level read pause.
    pub(super) fn pause_reads(&mut self) {
        if !self.input.paused {
            self.input.paused = true;
            self.disable_endpoint_reads();
        }
    }

    /// Undo an application-level read pause. Reads stay disabled while a
    /// body pipe is blocked; the trigger path re-enables them.
    pub(super) fn resume_reads(&mut self) {
        if self.input.paused {
            self.input.paused = false;
            if !matches!(
                self.input.state,
                InputState::BlockedStream { .. } | InputState::Terminated
            ) {
                self.enable_endpoint_reads();
            }
        }
    }

    fn enable_endpoint_reads(&mut self) {
        if let Some(endpoint) = self.state.endpoint_mut() {
            endpoint.enable_reads();
        }
    }

    fn disable_endpoint_reads(&mut self) {
        if let Some(endpoint) = self.state.endpoint_mut() {
            endpoint.disable_reads();
        }
    }
}
