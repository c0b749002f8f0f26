//! Event dispatch: bridges engine transitions to the application handler.
//!
//! `Core` pairs the state machine with the handler so message delivery and
//! lifecycle hooks run with a [`ConnectionContext`] borrow, and converts
//! recorded faults into the typed results returned by entry points.

use crate::{
    codec::Codec,
    config::ControllerConfig,
    endpoint::{DisconnectCause, Endpoint},
    error::ControllerError,
};

use super::{
    Wake,
    engine::Engine,
    handler::{ConnectionContext, ConnectionHandler},
    input::InputStep,
    output::PostWrite,
};

pub(super) struct Core<C: Codec, E: Endpoint, H> {
    pub(super) handler: H,
    pub(super) engine: Engine<C, E>,
}

impl<C, E, H> Core<C, E, H>
where
    C: Codec,
    E: Endpoint,
    H: ConnectionHandler<C, E>,
{
    pub(super) fn new(codec: C, handler: H, config: ControllerConfig) -> Self {
        Self {
            handler,
            engine: Engine::new(codec, config),
        }
    }

    pub(super) fn connected(&mut self, endpoint: E) -> Result<(), ControllerError> {
        self.engine.connected(endpoint);
        if self.engine.fault.is_none() {
            let Self { handler, engine } = self;
            let mut ctx = ConnectionContext::new(engine);
            handler.connection_opened(&mut ctx);
        }
        self.finish()
    }

    pub(super) fn received_data(&mut self, data: &[u8]) -> Result<(), ControllerError> {
        self.engine.accept_data(data);
        self.pump_input();
        self.finish()
    }

    pub(super) fn ready_for_data(&mut self) -> Result<(), ControllerError> {
        self.engine.ready_for_data();
        self.finish()
    }

    pub(super) fn connection_closed(&mut self, cause: DisconnectCause) {
        log::debug!("connection closed event: {cause}");
        self.engine.connection_event(cause);
        self.finish_logged();
    }

    pub(super) fn connection_lost(&mut self, cause: DisconnectCause) {
        log::warn!("connection lost: {cause}");
        self.engine.connection_event(cause);
        self.finish_logged();
    }

    pub(super) fn handle_wake(&mut self, wake: Wake) {
        match wake {
            Wake::InputReady => {
                if self.engine.unblock_input() {
                    self.pump_input();
                }
            }
            Wake::OutputReady => self.engine.resume_output(),
        }
        self.finish_logged();
    }

    pub(super) fn push(&mut self, message: C::Message, post_write: PostWrite) -> bool {
        let accepted = self.engine.push(message, post_write);
        self.finish_logged();
        accepted
    }

    pub(super) fn graceful_disconnect(&mut self) {
        self.engine.graceful_disconnect();
        self.finish_logged();
    }

    pub(super) fn disconnect(&mut self) {
        self.engine.disconnect();
        self.finish_logged();
    }

    pub(super) fn pause_reads(&mut self) {
        self.engine.pause_reads();
        self.finish_logged();
    }

    pub(super) fn resume_reads(&mut self) {
        self.engine.resume_reads();
        self.finish_logged();
    }

    pub(super) fn pause_writes(&mut self) {
        self.engine.pause_writes();
        self.finish_logged();
    }

    pub(super) fn resume_writes(&mut self) {
        self.engine.resume_writes();
        self.finish_logged();
    }

    pub(super) fn purge_outgoing(&mut self) {
        self.engine.purge_outgoing();
        self.finish_logged();
    }

    pub(super) fn purge_pending(&mut self) {
        self.engine.purge_pending();
        self.finish_logged();
    }

    pub(super) fn purge_all(&mut self) {
        self.engine.purge_all();
        self.finish_logged();
    }

    /// Run input steps until the machine settles, delivering decoded
    /// messages to the handler as they surface.
    fn pump_input(&mut self) {
        loop {
            match self.engine.input_step() {
                InputStep::Deliver(message) => self.deliver(message),
                InputStep::Again => {}
                InputStep::Settled => break,
            }
        }
    }

    fn deliver(&mut self, message: C::Message) {
        let Self { handler, engine } = self;
        let mut ctx = ConnectionContext::new(engine);
        handler.process_message(message, &mut ctx);
    }

    /// Deliver a pending close to the handler's hook and surface the first
    /// recorded fault, if any.
    fn finish(&mut self) -> Result<(), ControllerError> {
        if let Some(cause) = self.engine.closed_event.take() {
            self.handler.connection_closed(&cause);
        }
        match self.engine.fault.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// As `finish`, for call sites with no error channel to the caller.
    fn finish_logged(&mut self) {
        if let Err(err) = self.finish() {
            log::debug!("fault resolved outside an event entry point: {err}");
        }
    }
}
