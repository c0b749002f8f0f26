//! Outbound half: queue, encode, write, and streamed-body draining.
//!
//! Messages wait in a bounded FIFO. `check_queue` pops, encodes, and writes
//! while the connection is writable; a partial write or an outbound body
//! pipe holds the machine in `Writing`/`Streaming` until the endpoint
//! reports `ready_for_data` or the pipe produces more bytes. At most one
//! item is ever in flight, which is what makes post-write invocation order
//! equal push order.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::{
    codec::{Codec, Encoded},
    endpoint::{Endpoint, WriteStatus},
    error::{ControllerError, OutputResult},
    pipe::{PipeTermination, Pull, Source},
};

use super::{Wake, engine::Engine};

/// One-shot callback reporting what became of a pushed message.
pub type PostWrite = Box<dyn FnOnce(OutputResult)>;

/// Write/stream state of the outbound direction.
pub(crate) enum OutputState {
    /// Nothing in flight.
    Idle,
    /// A materialised frame was partially written; awaiting endpoint drain.
    Writing {
        /// Callback for the in-flight item.
        post_write: PostWrite,
    },
    /// An outbound body pipe is being drained to the endpoint.
    Streaming {
        /// Consumer handle of the body pipe.
        source: Source,
        /// Callback for the in-flight item.
        post_write: PostWrite,
    },
    /// No further output; entered during shutdown or teardown.
    Terminated,
}

impl OutputState {
    fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Writing { .. } => "writing",
            Self::Streaming { .. } => "streaming",
            Self::Terminated => "terminated output",
        }
    }
}

pub(super) struct QueuedItem<M> {
    pub(super) message: M,
    pub(super) post_write: PostWrite,
}

pub(crate) struct OutputHalf<M> {
    pub(super) state: OutputState,
    pub(super) writes_enabled: bool,
    pub(super) queue: VecDeque<QueuedItem<M>>,
}

impl<M> OutputHalf<M> {
    pub(super) fn new() -> Self {
        Self {
            state: OutputState::Idle,
            writes_enabled: true,
            queue: VecDeque::new(),
        }
    }
}

impl<C: Codec, E: Endpoint> Engine<C, E> {
    /// Enqueue a message for transmission.
    ///
    /// Refused, without invoking `post_write`, when the controller is not
    /// `Connected` or the queue is at its configured bound. The refusal is
    /// the application-level backpressure signal.
    pub(super) fn push(&mut self, message: C::Message, post_write: PostWrite) -> bool {
        if !self.is_connected() {
            log::debug!("push refused: {}", self.state.name());
            return false;
        }
        if self.output.queue.len() >= self.config.output_buffer_size.get() {
            log::debug!(
                "push refused: outbound queue full ({} items)",
                self.output.queue.len()
            );
            return false;
        }
        self.output.queue.push_back(QueuedItem {
            message,
            post_write,
        });
        self.check_queue();
        true
    }

    /// Encode and write queued messages while the connection is writable
    /// and nothing is in flight.
    pub(super) fn check_queue(&mut self) {
        while self.state.is_alive()
            && self.output.writes_enabled
            && matches!(self.output.state, OutputState::Idle)
        {
            let Some(QueuedItem {
                message,
                post_write,
            }) = self.output.queue.pop_front()
            else {
                break;
            };
            match self.codec.encode(message) {
                Ok(Encoded::Buffer(frame)) => match self.write_frame(frame) {
                    WriteStatus::Complete => self.complete(post_write, OutputResult::Success),
                    WriteStatus::Partial => {
                        log::trace!("partial write; holding queue until endpoint drains");
                        self.output.state = OutputState::Writing { post_write };
                    }
                    WriteStatus::Zero | WriteStatus::Failed => {
                        self.complete(post_write, OutputResult::Failure);
                        self.fail(ControllerError::WriteFailed);
                    }
                },
                Ok(Encoded::Stream(source)) => {
                    self.output.state = OutputState::Streaming { source, post_write };
                    self.drain_stream();
                }
                Err(err) => {
                    self.complete(post_write, OutputResult::Failure);
                    self.fail(ControllerError::Codec(err));
                }
            }
        }
        self.settle_output();
    }

    /// Pull from the outbound body pipe and write until it runs dry, backs
    /// up the endpoint, or finishes.
    pub(super) fn drain_stream(&mut self) {
        loop {
            let pulled = {
                let OutputState::Streaming { source, .. } = &self.output.state else {
                    return;
                };
                source.try_pull()
            };
            match pulled {
                Pull::Item(chunk) => match self.write_frame(chunk) {
                    WriteStatus::Complete => {}
                    WriteStatus::Partial => {
                        log::trace!("partial streamed write; awaiting endpoint drain");
                        return;
                    }
                    WriteStatus::Zero => {
                        self.abort_stream(ControllerError::StalledWrite);
                        return;
                    }
                    WriteStatus::Failed => {
                        self.abort_stream(ControllerError::WriteFailed);
                        return;
                    }
                },
                Pull::Empty => {
                    let hook = self.waker.hook(Wake::OutputReady);
                    let OutputState::Streaming { source, .. } = &self.output.state else {
                        return;
                    };
                    source.notify(hook);
                    return;
                }
                Pull::Closed => {
                    let OutputState::Streaming { post_write, .. } =
                        std::mem::replace(&mut self.output.state, OutputState::Idle)
                    else {
                        return;
                    };
                    self.complete(post_write, OutputResult::Success);
                    return;
                }
                Pull::Terminated(termination) => {
                    // The body is half-sent on the wire; unrecoverable.
                    let OutputState::Streaming { post_write, .. } =
                        std::mem::replace(&mut self.output.state, OutputState::Idle)
                    else {
                        return;
                    };
                    self.complete(post_write, OutputResult::Failure);
                    self.fail(ControllerError::OutboundBodyLost(termination));
                    return;
                }
            }
        }
    }

    fn abort_stream(&mut self, err: ControllerError) {
        let OutputState::Streaming {
            source,
            post_write,
        } = std::mem::replace(&mut self.output.state, OutputState::Idle)
        else {
            return;
        };
        source.terminate(PipeTermination::StreamingInterrupted);
        self.complete(post_write, OutputResult::Failure);
        self.fail(err);
    }

    /// Endpoint write capacity returned.
    pub(super) fn ready_for_data(&mut self) {
        if !self.state.is_alive() {
            self.fail(ControllerError::UnexpectedWriteReady {
                state: self.state.name(),
            });
            return;
        }
        match &self.output.state {
            OutputState::Writing { .. } => {
                let OutputState::Writing { post_write } =
                    std::mem::replace(&mut self.output.state, OutputState::Idle)
                else {
                    return;
                };
                self.complete(post_write, OutputResult::Success);
                self.check_queue();
            }
            OutputState::Streaming { .. } => {
                self.drain_stream();
                self.after_stream_progress();
            }
            OutputState::Idle | OutputState::Terminated => {
                self.fail(ControllerError::UnexpectedWriteReady {
                    state: self.output.state.name(),
                });
            }
        }
    }

    /// The outbound body pipe reported readiness.
    pub(super) fn resume_output(&mut self) {
        if matches!(self.output.state, OutputState::Streaming { .. }) {
            self.drain_stream();
            self.after_stream_progress();
        }
    }

    fn after_stream_progress(&mut self) {
        if matches!(self.output.state, OutputState::Idle) && self.fault.is_none() {
            self.check_queue();
        }
    }

    /// Stop feeding the queue. An in-flight write is never paused.
    pub(super) fn pause_writes(&mut self) {
        self.output.writes_enabled = false;
    }

    pub(super) fn resume_writes(&mut self) {
        if !self.output.writes_enabled {
            self.output.writes_enabled = true;
            if self.state.is_alive() {
                self.check_queue();
            }
        }
    }

    /// Fail the in-flight item, terminating an in-progress body source.
    pub(super) fn purge_outgoing(&mut self) {
        match std::mem::replace(&mut self.output.state, OutputState::Idle) {
            OutputState::Writing { post_write } => {
                self.complete(post_write, OutputResult::Failure);
            }
            OutputState::Streaming {
                source,
                post_write,
            } => {
                source.terminate(PipeTermination::Purged);
                self.complete(post_write, OutputResult::Failure);
            }
            OutputState::Idle => {}
            OutputState::Terminated => {
                self.output.state = OutputState::Terminated;
                return;
            }
        }
        if self.state.is_alive() {
            self.check_queue();
        }
    }

    /// Cancel every queued (not yet in-flight) item.
    pub(super) fn purge_pending(&mut self) {
        let drained: Vec<_> = self.output.queue.drain(..).collect();
        for item in drained {
            self.complete(item.post_write, OutputResult::Cancelled);
        }
        self.settle_output();
    }

    pub(super) fn purge_all(&mut self) {
        self.purge_outgoing();
        self.purge_pending();
    }

    /// Fail the in-flight item and cancel the queue on connection close.
    pub(super) fn output_on_closed(&mut self) {
        match std::mem::replace(&mut self.output.state, OutputState::Terminated) {
            OutputState::Writing { post_write } => {
                self.complete(post_write, OutputResult::Failure);
            }
            OutputState::Streaming {
                source,
                post_write,
            } => {
                source.terminate(PipeTermination::ConnectionClosed);
                self.complete(post_write, OutputResult::Failure);
            }
            OutputState::Idle | OutputState::Terminated => {}
        }
        let drained: Vec<_> = self.output.queue.drain(..).collect();
        for item in drained {
            self.complete(item.post_write, OutputResult::Cancelled);
        }
    }

    /// During a graceful disconnect, terminate the outbound direction once
    /// nothing is queued or in flight.
    pub(super) fn settle_output(&mut self) {
        if self.state.is_disconnecting()
            && matches!(self.output.state, OutputState::Idle)
            && self.output.queue.is_empty()
        {
            log::debug!("output drained during graceful disconnect");
            self.output.state = OutputState::Terminated;
            self.check_graceful();
        }
    }

    fn write_frame(&mut self, frame: Bytes) -> WriteStatus {
        match self.state.endpoint_mut() {
            Some(endpoint) => endpoint.write(frame),
            None => WriteStatus::Failed,
        }
    }
}
