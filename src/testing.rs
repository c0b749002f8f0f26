//! Test doubles for exercising controllers without a reactor.
//!
//! [`MockEndpoint`] is a cloneable scripted transport: one clone is handed
//! to the controller, the other stays with the test to script write
//! statuses and observe writes, read toggles, and disconnects.
//! [`RecordingHandler`] collects delivered messages; [`CompletionLog`]
//! builds post-write callbacks that record their outcome in order.

use std::{cell::RefCell, collections::VecDeque, rc::Rc};

use bytes::Bytes;

use crate::{
    codec::Codec,
    connection::{ConnectionContext, ConnectionHandler},
    endpoint::{Endpoint, WriteStatus},
    error::OutputResult,
};

struct MockState {
    script: VecDeque<WriteStatus>,
    writes: Vec<Bytes>,
    reads_enabled: bool,
    disconnects: usize,
}

/// Scripted in-memory endpoint.
///
/// Writes report scripted statuses in order, defaulting to
/// [`WriteStatus::Complete`] once the script runs out. Buffers are recorded
/// for accepted writes only (`Complete`/`Partial`).
#[derive(Clone)]
pub struct MockEndpoint {
    state: Rc<RefCell<MockState>>,
}

impl MockEndpoint {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(MockState {
                script: VecDeque::new(),
                writes: Vec::new(),
                reads_enabled: true,
                disconnects: 0,
            })),
        }
    }

    /// Queue statuses for upcoming writes.
    pub fn script_writes(&self, statuses: impl IntoIterator<Item = WriteStatus>) {
        self.state.borrow_mut().script.extend(statuses);
    }

    /// Buffers accepted so far, in write order.
    #[must_use]
    pub fn written(&self) -> Vec<Bytes> {
        self.state.borrow().writes.clone()
    }

    /// All accepted bytes, concatenated.
    #[must_use]
    pub fn written_bytes(&self) -> Vec<u8> {
        self.state
            .borrow()
            .writes
            .iter()
            .flat_map(|b| b.iter().copied())
            .collect()
    }

    /// Whether reads are currently enabled.
    #[must_use]
    pub fn reads_enabled(&self) -> bool {
        self.state.borrow().reads_enabled
    }

    /// How many times `disconnect` was invoked.
    #[must_use]
    pub fn disconnects(&self) -> usize {
        self.state.borrow().disconnects
    }
}

impl Default for MockEndpoint {
    fn default() -> Self {
        Self::new()
    }
}

impl Endpoint for MockEndpoint {
    fn write(&mut self, buf: Bytes) -> WriteStatus {
        let mut state = self.state.borrow_mut();
        let status = state.script.pop_front().unwrap_or(WriteStatus::Complete);
        if matches!(status, WriteStatus::Complete | WriteStatus::Partial) {
            state.writes.push(buf);
        }
        status
    }

    fn enable_reads(&mut self) {
        self.state.borrow_mut().reads_enabled = true;
    }

    fn disable_reads(&mut self) {
        self.state.borrow_mut().reads_enabled = false;
    }

    fn disconnect(&mut self) {
        self.state.borrow_mut().disconnects += 1;
    }
}

/// Handler that appends every delivered message to a shared log.
pub struct RecordingHandler<M> {
    seen: Rc<RefCell<Vec<M>>>,
}

impl<M> RecordingHandler<M> {
    /// Build the handler together with the shared message log.
    #[must_use]
    pub fn new() -> (Self, Rc<RefCell<Vec<M>>>) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        (
            Self {
                seen: Rc::clone(&seen),
            },
            seen,
        )
    }
}

impl<C, E> ConnectionHandler<C, E> for RecordingHandler<C::Message>
where
    C: Codec,
    E: Endpoint,
{
    fn process_message(&mut self, message: C::Message, _ctx: &mut ConnectionContext<'_, C, E>) {
        self.seen.borrow_mut().push(message);
    }
}

/// Shared, ordered record of post-write outcomes.
#[derive(Clone, Default)]
pub struct CompletionLog {
    entries: Rc<RefCell<Vec<(String, OutputResult)>>>,
}

impl CompletionLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a post-write callback that records `(label, result)`.
    pub fn callback(&self, label: impl Into<String>) -> impl FnOnce(OutputResult) + 'static {
        let entries = Rc::clone(&self.entries);
        let label = label.into();
        move |result| entries.borrow_mut().push((label, result))
    }

    /// Outcomes recorded so far, in completion order.
    #[must_use]
    pub fn entries(&self) -> Vec<(String, OutputResult)> {
        self.entries.borrow().clone()
    }

    /// Labels recorded so far, in completion order.
    #[must_use]
    pub fn labels(&self) -> Vec<String> {
        self.entries
            .borrow()
            .iter()
            .map(|(label, _)| label.clone())
            .collect()
    }
}
