//! Graceful-disconnect behaviour across both directions.

use std::{cell::RefCell, num::NonZeroUsize, rc::Rc};

use rstest::rstest;
use wireflow::{
    Controller, ControllerConfig, OutputResult, Pull, WriteStatus,
    codec::examples::{LineCodec, LineFrame},
    testing::{CompletionLog, MockEndpoint, RecordingHandler},
};

type LineController = Controller<LineCodec, MockEndpoint, RecordingHandler<LineFrame>>;

fn connected_controller(
    buffer: usize,
) -> (LineController, MockEndpoint, Rc<RefCell<Vec<LineFrame>>>) {
    let endpoint = MockEndpoint::new();
    let (handler, seen) = RecordingHandler::new();
    let config =
        ControllerConfig::with_output_buffer_size(NonZeroUsize::new(buffer).expect("non-zero"));
    let controller = Controller::new(LineCodec::default(), handler, config);
    controller
        .connected(endpoint.clone())
        .expect("fresh controller should connect");
    (controller, endpoint, seen)
}

#[test]
fn graceful_disconnect_at_idle_closes_immediately() {
    let (controller, endpoint, _seen) = connected_controller(4);
    controller.graceful_disconnect();

    assert!(!controller.is_connected());
    assert!(!controller.is_disconnecting(), "close already completed");
    assert_eq!(endpoint.disconnects(), 1);
    assert!(!endpoint.reads_enabled(), "input side disables reads");
}

#[test]
fn graceful_disconnect_waits_for_queued_writes() {
    let (controller, endpoint, _seen) = connected_controller(4);
    let log = CompletionLog::new();
    endpoint.script_writes([WriteStatus::Partial]);

    assert!(controller.push(LineFrame::line("slow"), log.callback("slow")));
    assert!(controller.push(LineFrame::line("queued"), log.callback("queued")));
    controller.graceful_disconnect();

    assert!(controller.is_disconnecting(), "output still draining");
    assert_eq!(endpoint.disconnects(), 0);

    controller.ready_for_data().expect("drain should resume");
    assert!(!controller.is_connected());
    assert!(!controller.is_disconnecting());
    assert_eq!(endpoint.disconnects(), 1);
    assert_eq!(
        log.entries(),
        [
            ("slow".to_owned(), OutputResult::Success),
            ("queued".to_owned(), OutputResult::Success),
        ]
    );
}

#[test]
fn graceful_disconnect_mid_stream_finishes_the_body_first() {
    let codec = LineCodec::default();
    let endpoint = MockEndpoint::new();
    let (handler, seen) = RecordingHandler::new();
    let controller: LineController =
        Controller::new(codec, handler, ControllerConfig::default());
    controller
        .connected(endpoint.clone())
        .expect("fresh controller should connect");

    controller
        .received_data(b"STREAM 8\nhalf")
        .expect("header and half a body");
    let LineFrame::Stream { body: source, .. } = seen.borrow_mut().remove(0) else {
        panic!("expected a stream frame");
    };

    controller.graceful_disconnect();
    assert!(controller.is_disconnecting());
    assert!(
        endpoint.reads_enabled(),
        "reads continue while the body is in flight"
    );

    // The final body bytes complete the stream; trailing bytes of the next
    // frame are dropped, reads go off, and the connection closes once the
    // (already idle) output side terminates.
    controller
        .received_data(b"restDROPPED\n")
        .expect("body completion during graceful disconnect");
    assert!(!endpoint.reads_enabled());
    assert!(!controller.is_connected());
    assert!(!controller.is_disconnecting());
    assert_eq!(endpoint.disconnects(), 1);

    assert!(matches!(source.try_pull(), Pull::Item(b) if b.as_ref() == b"half"));
    assert!(matches!(source.try_pull(), Pull::Item(b) if b.as_ref() == b"rest"));
    assert!(matches!(source.try_pull(), Pull::Closed));
    assert_eq!(seen.borrow().len(), 0, "dropped bytes decode to nothing");
}

#[test]
fn graceful_disconnect_discards_a_buffered_partial_frame() {
    let (controller, endpoint, seen) = connected_controller(4);
    controller
        .received_data(b"PART")
        .expect("partial frame buffers");
    controller.graceful_disconnect();

    assert!(!controller.is_connected());
    assert_eq!(endpoint.disconnects(), 1);
    assert!(seen.borrow().is_empty());
}

#[rstest]
#[case::while_disconnecting(false)]
#[case::after_close(true)]
fn push_is_refused_once_graceful_disconnect_begins(#[case] drain_first: bool) {
    let (controller, endpoint, _seen) = connected_controller(4);
    let log = CompletionLog::new();
    endpoint.script_writes([WriteStatus::Partial]);

    assert!(controller.push(LineFrame::line("inflight"), log.callback("inflight")));
    controller.graceful_disconnect();
    if drain_first {
        controller.ready_for_data().expect("drain should resume");
    }

    assert!(
        !controller.push(LineFrame::line("late"), log.callback("late")),
        "no push is accepted after graceful disconnect"
    );
    assert!(!log.labels().contains(&"late".to_owned()));
}

#[test]
fn repeated_graceful_disconnect_is_a_no_op() {
    let (controller, endpoint, _seen) = connected_controller(4);
    let log = CompletionLog::new();
    endpoint.script_writes([WriteStatus::Partial]);

    assert!(controller.push(LineFrame::line("x"), log.callback("x")));
    controller.graceful_disconnect();
    controller.graceful_disconnect();
    controller.graceful_disconnect();
    assert!(controller.is_disconnecting());
    assert_eq!(endpoint.disconnects(), 0);

    controller.ready_for_data().expect("drain should resume");
    assert_eq!(endpoint.disconnects(), 1, "endpoint closes exactly once");
}

#[test]
fn close_hook_fires_once_on_graceful_completion() {
    use wireflow::{ConnectionContext, ConnectionHandler, DisconnectCause, Endpoint};

    struct ClosedCounter {
        closes: Rc<RefCell<Vec<DisconnectCause>>>,
    }

    impl<C: wireflow::Codec, E: Endpoint> ConnectionHandler<C, E> for ClosedCounter {
        fn process_message(&mut self, _message: C::Message, _ctx: &mut ConnectionContext<'_, C, E>) {}

        fn connection_closed(&mut self, cause: &DisconnectCause) {
            self.closes.borrow_mut().push(cause.clone());
        }
    }

    let closes = Rc::new(RefCell::new(Vec::new()));
    let handler = ClosedCounter {
        closes: Rc::clone(&closes),
    };
    let endpoint = MockEndpoint::new();
    let controller: Controller<LineCodec, MockEndpoint, ClosedCounter> =
        Controller::new(LineCodec::default(), handler, ControllerConfig::default());
    controller
        .connected(endpoint.clone())
        .expect("fresh controller should connect");

    controller.graceful_disconnect();
    // The endpoint's own close event arrives afterwards and must not
    // re-fire the hook.
    controller.connection_closed(DisconnectCause::RemoteClosed);

    assert_eq!(closes.borrow().as_slice(), [DisconnectCause::Requested]);
}
