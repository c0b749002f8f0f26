//! Bounded byte-chunk conduits with explicit backpressure signalling.
//!
//! A pipe connects a single producer ([`Sink`]) to a single consumer
//! ([`Source`]). Producers learn about a full pipe through
//! [`PushResult::Full`], which carries a one-shot [`Trigger`] fired once the
//! consumer has drained enough. Streamed message bodies use pipes in both
//! directions: the controller feeds inbound body bytes into a sink handed
//! out by the codec, and drains outbound body bytes from a source supplied
//! by the application.
//!
//! Pipes are single-threaded by construction: handles share an
//! `Rc<RefCell<..>>` and must stay on the thread that owns the connection.

use std::{
    cell::RefCell,
    collections::VecDeque,
    fmt,
    rc::Rc,
};

use bytes::{Bytes, BytesMut};
use thiserror::Error;

/// Reason a pipe stopped delivering data permanently.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PipeTermination {
    /// The owning connection closed while the body was in flight.
    #[error("connection closed")]
    ConnectionClosed,
    /// The endpoint failed while the body was being written.
    #[error("connection closed during streaming")]
    StreamingInterrupted,
    /// The in-flight write was purged by the application.
    #[error("write purged")]
    Purged,
    /// A handle aborted the pipe explicitly.
    #[error("aborted: {0}")]
    Aborted(String),
}

/// Outcome of pushing a chunk into a [`Sink`].
#[derive(Debug)]
#[must_use]
pub enum PushResult {
    /// Accepted; the pipe has capacity for more.
    Ok,
    /// Accepted, and the chunk completed a bounded stream. The pipe is now
    /// closed; further pushes return [`PushResult::Closed`].
    Done,
    /// Rejected; nothing was consumed. The producer must wait for the
    /// trigger to fire before retrying.
    Full(Trigger),
    /// Rejected; the consumer closed the pipe.
    Closed,
    /// Rejected; the pipe was terminated.
    Terminated(PipeTermination),
}

/// Outcome of pulling a chunk from a [`Source`].
#[derive(Debug)]
#[must_use]
pub enum Pull {
    /// A buffered chunk.
    Item(Bytes),
    /// Nothing buffered yet; the producer is still open. Only returned by
    /// [`Source::try_pull`]; callback pulls wait instead.
    Empty,
    /// The producer finished; no further data will arrive.
    Closed,
    /// The pipe was terminated.
    Terminated(PipeTermination),
}

enum TriggerState {
    /// Created but not yet filled; a fire in this state is remembered.
    Waiting,
    /// Holding a callback to run on the next fire.
    Armed(Box<dyn FnOnce()>),
    /// Fired before a callback was registered; `fill` runs immediately.
    Pending,
    /// Fired with a callback, or spent.
    Fired,
    Cancelled,
}

/// One-shot drain notification handed out by [`PushResult::Full`].
///
/// The trigger fires when the pipe drains below its capacity, or when the
/// pipe is closed or terminated (so a blocked producer always wakes up and
/// observes the new state on its retry). `cancel` is idempotent.
pub struct Trigger {
    state: Rc<RefCell<TriggerState>>,
}

impl Trigger {
    fn new() -> (Self, Rc<RefCell<TriggerState>>) {
        let state = Rc::new(RefCell::new(TriggerState::Waiting));
        (
            Self {
                state: Rc::clone(&state),
            },
            state,
        )
    }

    /// Register the callback to run when the pipe has drained enough.
    ///
    /// If the drain already happened the callback runs immediately. Filling
    /// a trigger twice replaces nothing: the second callback is dropped.
    pub fn fill(&self, callback: impl FnOnce() + 'static) {
        {
            let mut state = self.state.borrow_mut();
            match &*state {
                TriggerState::Waiting => {
                    *state = TriggerState::Armed(Box::new(callback));
                    return;
                }
                TriggerState::Pending => *state = TriggerState::Fired,
                TriggerState::Armed(_) | TriggerState::Fired | TriggerState::Cancelled => return,
            }
        }
        callback();
    }

    /// Invalidate the registration. Safe to call at any point.
    pub fn cancel(&self) {
        let mut state = self.state.borrow_mut();
        if !matches!(*state, TriggerState::Fired) {
            *state = TriggerState::Cancelled;
        }
    }
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match &*self.state.borrow() {
            TriggerState::Waiting => "Waiting",
            TriggerState::Armed(_) => "Armed",
            TriggerState::Pending => "Pending",
            TriggerState::Fired => "Fired",
            TriggerState::Cancelled => "Cancelled",
        };
        f.debug_tuple("Trigger").field(&name).finish()
    }
}

/// Fire a trigger slot outside of any pipe borrow.
fn fire_trigger(slot: &Rc<RefCell<TriggerState>>) {
    let callback = {
        let mut state = slot.borrow_mut();
        match std::mem::replace(&mut *state, TriggerState::Fired) {
            TriggerState::Armed(cb) => Some(cb),
            TriggerState::Waiting => {
                *state = TriggerState::Pending;
                None
            }
            TriggerState::Cancelled => {
                *state = TriggerState::Cancelled;
                None
            }
            other @ (TriggerState::Pending | TriggerState::Fired) => {
                *state = other;
                None
            }
        }
    };
    if let Some(cb) = callback {
        cb();
    }
}

struct PipeShared {
    chunks: VecDeque<Bytes>,
    /// Bytes currently buffered across `chunks`.
    buffered: usize,
    /// Soft watermark: pushes are refused once `buffered` reaches this.
    capacity: usize,
    /// Bytes still expected for a bounded body; `None` for unbounded pipes.
    remaining: Option<usize>,
    closed: bool,
    terminated: Option<PipeTermination>,
    pull_waiter: Option<Box<dyn FnOnce(Pull)>>,
    ready_hook: Option<Box<dyn FnOnce()>>,
    triggers: Vec<Rc<RefCell<TriggerState>>>,
}

impl PipeShared {
    fn accept(&mut self, chunk: Bytes) {
        if let Some(remaining) = &mut self.remaining {
            debug_assert!(
                chunk.len() <= *remaining,
                "chunk overruns the declared body length"
            );
            *remaining = remaining.saturating_sub(chunk.len());
            if *remaining == 0 {
                self.closed = true;
            }
        }
        self.buffered += chunk.len();
        self.chunks.push_back(chunk);
    }

    fn take_triggers(&mut self) -> Vec<Rc<RefCell<TriggerState>>> {
        std::mem::take(&mut self.triggers)
    }
}

/// Deferred side effects collected under the pipe borrow and run after it
/// is released, so waiter callbacks may re-enter the pipe.
#[derive(Default)]
struct AfterBorrow {
    deliver: Option<(Box<dyn FnOnce(Pull)>, Pull)>,
    ready: Option<Box<dyn FnOnce()>>,
    triggers: Vec<Rc<RefCell<TriggerState>>>,
}

impl AfterBorrow {
    fn run(self) {
        if let Some((waiter, pull)) = self.deliver {
            waiter(pull);
        }
        if let Some(ready) = self.ready {
            ready();
        }
        for slot in &self.triggers {
            fire_trigger(slot);
        }
    }
}

/// Producer handle of a pipe.
pub struct Sink {
    shared: Rc<RefCell<PipeShared>>,
}

/// Consumer handle of a pipe.
pub struct Source {
    shared: Rc<RefCell<PipeShared>>,
}

/// Create an unbounded-length pipe that refuses pushes once `capacity`
/// bytes are buffered.
///
/// # Examples
///
/// ```
/// use wireflow::pipe::{pipe, Pull, PushResult};
///
/// let (sink, source) = pipe(1024);
/// assert!(matches!(sink.push("hi".into()), PushResult::Ok));
/// assert!(matches!(source.try_pull(), Pull::Item(b) if b.as_ref() == b"hi"));
/// ```
#[must_use]
pub fn pipe(capacity: usize) -> (Sink, Source) {
    build(capacity, None)
}

/// Create a pipe carrying exactly `expected_len` bytes.
///
/// The push that delivers the final byte reports [`PushResult::Done`] and
/// closes the pipe. Codecs use this for length-delimited message bodies.
#[must_use]
pub fn sized_pipe(capacity: usize, expected_len: usize) -> (Sink, Source) {
    build(capacity, Some(expected_len))
}

fn build(capacity: usize, expected_len: Option<usize>) -> (Sink, Source) {
    let shared = Rc::new(RefCell::new(PipeShared {
        chunks: VecDeque::new(),
        buffered: 0,
        capacity: capacity.max(1),
        remaining: expected_len,
        closed: expected_len == Some(0),
        terminated: None,
        pull_waiter: None,
        ready_hook: None,
        triggers: Vec::new(),
    }));
    (
        Sink {
            shared: Rc::clone(&shared),
        },
        Source { shared },
    )
}

impl Sink {
    /// Push a whole chunk.
    ///
    /// All-or-nothing: on [`PushResult::Full`] nothing was accepted, and the
    /// producer should retain its (cheaply cloneable) `Bytes` handle and
    /// retry after the trigger fires. For bounded pipes the chunk must not
    /// exceed [`Sink::remaining`].
    pub fn push(&self, chunk: Bytes) -> PushResult {
        let (result, after) = {
            let mut p = self.shared.borrow_mut();
            if let Some(termination) = &p.terminated {
                return PushResult::Terminated(termination.clone());
            }
            if p.closed {
                return PushResult::Closed;
            }
            if p.buffered >= p.capacity {
                let (trigger, slot) = Trigger::new();
                p.triggers.push(slot);
                return PushResult::Full(trigger);
            }
            if chunk.is_empty() {
                return PushResult::Ok;
            }
            p.accept(chunk);
            self.settle_push(&mut p)
        };
        after.run();
        result
    }

    /// Consume accepted bytes from the front of `buf`.
    ///
    /// Unbounded pipes take the whole buffer; bounded pipes stop at the
    /// declared body length, leaving trailing bytes (the next frame) in
    /// place. On [`PushResult::Full`] nothing is consumed, so the caller's
    /// buffer retains the remainder for replay after the trigger fires.
    pub fn feed(&self, buf: &mut BytesMut) -> PushResult {
        let (result, after) = {
            let mut p = self.shared.borrow_mut();
            if let Some(termination) = &p.terminated {
                return PushResult::Terminated(termination.clone());
            }
            if p.closed {
                return PushResult::Closed;
            }
            if p.buffered >= p.capacity {
                let (trigger, slot) = Trigger::new();
                p.triggers.push(slot);
                return PushResult::Full(trigger);
            }
            let take = match p.remaining {
                Some(remaining) => buf.len().min(remaining),
                None => buf.len(),
            };
            if take == 0 {
                return PushResult::Ok;
            }
            p.accept(buf.split_to(take).freeze());
            self.settle_push(&mut p)
        };
        after.run();
        result
    }

    /// Report acceptance and hand any waiting consumer its data. Runs under
    /// the pipe borrow; side effects are deferred.
    fn settle_push(&self, p: &mut PipeShared) -> (PushResult, AfterBorrow) {
        let mut after = AfterBorrow::default();
        if let Some(waiter) = p.pull_waiter.take() {
            // A registered waiter implies the queue was empty before this
            // push, so the chunk just accepted is the front one.
            if let Some(chunk) = p.chunks.pop_front() {
                p.buffered -= chunk.len();
                after.deliver = Some((waiter, Pull::Item(chunk)));
            } else {
                p.pull_waiter = Some(waiter);
            }
        } else {
            after.ready = p.ready_hook.take();
        }
        if p.closed {
            after.triggers = p.take_triggers();
            (PushResult::Done, after)
        } else {
            (PushResult::Ok, after)
        }
    }

    /// Bytes still expected by a bounded pipe; `None` when unbounded.
    #[must_use]
    pub fn remaining(&self) -> Option<usize> {
        self.shared.borrow().remaining
    }

    /// Whether the pipe carries a declared total length.
    #[must_use]
    pub fn is_bounded(&self) -> bool {
        self.shared.borrow().remaining.is_some()
    }

    /// Whether no further pushes will be accepted.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        let p = self.shared.borrow();
        p.closed || p.terminated.is_some()
    }

    /// The termination reason, if the pipe was terminated.
    #[must_use]
    pub fn termination(&self) -> Option<PipeTermination> {
        self.shared.borrow().terminated.clone()
    }

    /// Signal end-of-stream. Buffered chunks remain pullable; a waiting
    /// consumer is told the pipe closed. Idempotent.
    pub fn close(&self) {
        let after = {
            let mut p = self.shared.borrow_mut();
            if p.closed || p.terminated.is_some() {
                return;
            }
            p.closed = true;
            let mut after = AfterBorrow::default();
            if p.chunks.is_empty() {
                if let Some(waiter) = p.pull_waiter.take() {
                    after.deliver = Some((waiter, Pull::Closed));
                }
            }
            after.ready = p.ready_hook.take();
            after.triggers = p.take_triggers();
            after
        };
        after.run();
    }

    /// Abort the pipe, failing any pending pull and firing any outstanding
    /// trigger. Buffered chunks are discarded.
    pub fn terminate(&self, reason: PipeTermination) {
        terminate(&self.shared, reason);
    }
}

impl Drop for Sink {
    fn drop(&mut self) {
        // A producer vanishing without closing is an implicit end-of-stream,
        // matching channel sender semantics.
        self.close();
    }
}

impl fmt::Debug for Sink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = self.shared.borrow();
        f.debug_struct("Sink")
            .field("buffered", &p.buffered)
            .field("remaining", &p.remaining)
            .field("closed", &p.closed)
            .finish()
    }
}

impl Source {
    /// Pull the next chunk without waiting.
    pub fn try_pull(&self) -> Pull {
        let (pull, after) = {
            let mut p = self.shared.borrow_mut();
            if let Some(termination) = &p.terminated {
                return Pull::Terminated(termination.clone());
            }
            match p.chunks.pop_front() {
                Some(chunk) => {
                    p.buffered -= chunk.len();
                    let mut after = AfterBorrow::default();
                    if p.buffered < p.capacity {
                        after.triggers = p.take_triggers();
                    }
                    (Pull::Item(chunk), after)
                }
                None if p.closed => return Pull::Closed,
                None => return Pull::Empty,
            }
        };
        after.run();
        pull
    }

    /// Deliver the next chunk to `callback`: immediately when data is
    /// buffered or the pipe is finished, otherwise once the producer acts.
    ///
    /// At most one pull may be outstanding; registering a second replaces
    /// the first, which is dropped unfired.
    pub fn pull(&self, callback: impl FnOnce(Pull) + 'static) {
        match self.try_pull() {
            Pull::Empty => {
                self.shared.borrow_mut().pull_waiter = Some(Box::new(callback));
            }
            delivered => callback(delivered),
        }
    }

    /// Register a one-shot readiness hook, run as soon as the pipe has data
    /// or is closed or terminated. Used by drain loops that prefer
    /// [`Source::try_pull`] over callback delivery.
    pub fn notify(&self, hook: impl FnOnce() + 'static) {
        {
            let mut p = self.shared.borrow_mut();
            if p.terminated.is_none() && !p.closed && p.chunks.is_empty() {
                p.ready_hook = Some(Box::new(hook));
                return;
            }
        }
        hook();
    }

    /// The termination reason, if the pipe was terminated.
    #[must_use]
    pub fn termination(&self) -> Option<PipeTermination> {
        self.shared.borrow().terminated.clone()
    }

    /// Close the pipe from the consumer side: this consumer has all the
    /// data it wants. Undelivered chunks are discarded and the producer's
    /// next push reports [`PushResult::Closed`]. For an unbounded inbound
    /// body, the controller treats that as a frame boundary.
    pub fn close(&self) {
        let after = {
            let mut p = self.shared.borrow_mut();
            if p.closed || p.terminated.is_some() {
                return;
            }
            p.closed = true;
            p.chunks.clear();
            p.buffered = 0;
            let mut after = AfterBorrow::default();
            after.ready = p.ready_hook.take();
            after.triggers = p.take_triggers();
            after
        };
        after.run();
    }

    /// Abort the pipe from the consumer side. The producer's next push
    /// reports [`PushResult::Terminated`]; a blocked producer's trigger
    /// fires so it retries and observes the termination.
    pub fn terminate(&self, reason: PipeTermination) {
        terminate(&self.shared, reason);
    }
}

impl Drop for Source {
    fn drop(&mut self) {
        let open = {
            let p = self.shared.borrow();
            !p.closed && p.terminated.is_none()
        };
        if open {
            self.terminate(PipeTermination::Aborted("source dropped".to_owned()));
        }
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = self.shared.borrow();
        f.debug_struct("Source")
            .field("buffered", &p.buffered)
            .field("closed", &p.closed)
            .field("terminated", &p.terminated)
            .finish()
    }
}

fn terminate(shared: &Rc<RefCell<PipeShared>>, reason: PipeTermination) {
    let after = {
        let mut p = shared.borrow_mut();
        if p.terminated.is_some() {
            return;
        }
        log::trace!("pipe terminated: {reason}");
        p.terminated = Some(reason.clone());
        p.chunks.clear();
        p.buffered = 0;
        let mut after = AfterBorrow::default();
        if let Some(waiter) = p.pull_waiter.take() {
            after.deliver = Some((waiter, Pull::Terminated(reason)));
        }
        after.ready = p.ready_hook.take();
        after.triggers = p.take_triggers();
        after
    };
    after.run();
}
