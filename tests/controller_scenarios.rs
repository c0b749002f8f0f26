//! End-to-end controller scenarios over a scripted endpoint.

use std::{cell::RefCell, num::NonZeroUsize, rc::Rc};

use bytes::Bytes;
use rstest::rstest;
use wireflow::{
    ConnectionContext, ConnectionHandler, Controller, ControllerConfig, OutputResult, Pull,
    PushResult, WriteStatus, pipe,
    codec::examples::{LineCodec, LineFrame},
    testing::{CompletionLog, MockEndpoint, RecordingHandler},
};

type LineController = Controller<LineCodec, MockEndpoint, RecordingHandler<LineFrame>>;

fn connected_controller(
    codec: LineCodec,
    buffer: usize,
) -> (LineController, MockEndpoint, Rc<RefCell<Vec<LineFrame>>>) {
    let endpoint = MockEndpoint::new();
    let (handler, seen) = RecordingHandler::new();
    let config =
        ControllerConfig::with_output_buffer_size(NonZeroUsize::new(buffer).expect("non-zero"));
    let controller = Controller::new(codec, handler, config);
    controller
        .connected(endpoint.clone())
        .expect("fresh controller should connect");
    (controller, endpoint, seen)
}

fn lines(seen: &Rc<RefCell<Vec<LineFrame>>>) -> Vec<String> {
    seen.borrow()
        .iter()
        .filter_map(|frame| frame.as_line().map(str::to_owned))
        .collect()
}

#[test]
fn simple_echo() {
    let (controller, endpoint, seen) = connected_controller(LineCodec::default(), 4);
    let log = CompletionLog::new();

    controller
        .received_data(b"HI\n")
        .expect("line should decode");
    assert_eq!(lines(&seen), ["HI"]);

    assert!(controller.push(LineFrame::line("OK"), log.callback("ok")));
    assert_eq!(endpoint.written_bytes(), b"OK\n");
    assert_eq!(log.entries(), [("ok".to_owned(), OutputResult::Success)]);
}

#[test]
fn partial_write_then_resume() {
    let (controller, endpoint, _seen) = connected_controller(LineCodec::default(), 4);
    let log = CompletionLog::new();
    endpoint.script_writes([WriteStatus::Partial]);

    assert!(controller.push(LineFrame::line("ABCDE"), log.callback("cb")));
    assert!(log.entries().is_empty(), "completion waits for the drain");

    controller.ready_for_data().expect("resume should succeed");
    assert_eq!(log.entries(), [("cb".to_owned(), OutputResult::Success)]);

    // The queue is usable again immediately.
    assert!(controller.push(LineFrame::line("NEXT"), log.callback("next")));
    assert_eq!(endpoint.written_bytes(), b"ABCDE\nNEXT\n");
}

#[test]
fn queue_full_rejects_without_calling_back() {
    let (controller, endpoint, _seen) = connected_controller(LineCodec::default(), 2);
    let log = CompletionLog::new();
    endpoint.script_writes([WriteStatus::Partial]);

    // `a` goes in flight (removed from the queue); `b` and `c` wait.
    assert!(controller.push(LineFrame::line("a"), log.callback("a")));
    assert!(controller.push(LineFrame::line("b"), log.callback("b")));
    assert!(controller.push(LineFrame::line("c"), log.callback("c")));
    assert_eq!(controller.pending_writes(), 2);

    assert!(
        !controller.push(LineFrame::line("d"), log.callback("d")),
        "a full queue must refuse the push"
    );
    assert!(
        log.entries().is_empty(),
        "no callback runs for a refused push"
    );

    controller.ready_for_data().expect("drain should resume");
    assert_eq!(
        log.labels(),
        ["a", "b", "c"],
        "completions follow push order; d never completes"
    );
}

#[test]
fn streamed_response_drains_to_the_endpoint() {
    let (controller, endpoint, _seen) = connected_controller(LineCodec::default(), 4);
    let log = CompletionLog::new();
    let (sink, source) = pipe(1024);

    assert!(controller.push(
        LineFrame::Stream {
            expected: None,
            body: source,
        },
        log.callback("m"),
    ));

    assert!(matches!(sink.push(Bytes::from("B1")), PushResult::Ok));
    assert!(matches!(sink.push(Bytes::from("B2")), PushResult::Ok));
    assert!(log.entries().is_empty(), "stream still open");

    sink.close();
    assert_eq!(endpoint.written_bytes(), b"B1B2");
    assert_eq!(log.entries(), [("m".to_owned(), OutputResult::Success)]);
}

#[test]
fn inbound_body_backpressure_toggles_reads() {
    let codec = LineCodec::default().with_body_capacity(4);
    let (controller, endpoint, seen) = connected_controller(codec, 4);

    controller
        .received_data(b"STREAM 64\n")
        .expect("stream header should decode");
    let LineFrame::Stream { body: source, .. } = seen.borrow_mut().remove(0) else {
        panic!("expected a stream frame");
    };

    controller
        .received_data(b"aaaa")
        .expect("first chunk fills the pipe");
    controller
        .received_data(b"bbbb")
        .expect("overflow chunk blocks the stream");
    assert!(!endpoint.reads_enabled(), "full sink must disable reads");

    // Application drains; the trigger re-enables reads and the retained
    // bytes reach the same sink.
    assert!(matches!(source.try_pull(), Pull::Item(b) if b.as_ref() == b"aaaa"));
    assert!(endpoint.reads_enabled(), "drain must re-enable reads");
    assert!(matches!(source.try_pull(), Pull::Item(b) if b.as_ref() == b"bbbb"));

    // Subsequent inbound bytes flow into the same body.
    controller
        .received_data(b"cccc")
        .expect("stream continues after resume");
    assert!(matches!(source.try_pull(), Pull::Item(b) if b.as_ref() == b"cccc"));
}

#[test]
fn pushed_lines_round_trip_through_a_fresh_codec() {
    use wireflow::{Codec, Decoded};

    let (controller, endpoint, _seen) = connected_controller(LineCodec::default(), 8);
    let outbound = ["alpha", "beta", "gamma"];
    for line in outbound {
        assert!(controller.push(LineFrame::line(line), |_| {}));
    }

    let mut fresh = LineCodec::default();
    let mut wire = bytes::BytesMut::from(endpoint.written_bytes().as_slice());
    let mut decoded = Vec::new();
    while let Some(Decoded::Complete(frame)) = fresh.decode(&mut wire).expect("wire should decode")
    {
        decoded.push(frame.as_line().expect("plain line").to_owned());
    }
    assert!(wire.is_empty());
    assert_eq!(decoded, outbound);
}

fn ignore_message(_message: LineFrame, _ctx: &mut ConnectionContext<'_, LineCodec, MockEndpoint>) {}

#[test]
fn fn_handler_adapts_plain_functions() {
    let endpoint = MockEndpoint::new();
    let controller = Controller::new(
        LineCodec::default(),
        wireflow::FnHandler(ignore_message),
        ControllerConfig::default(),
    );
    controller
        .connected(endpoint.clone())
        .expect("fresh controller should connect");
    controller
        .received_data(b"dropped\n")
        .expect("decode should succeed");
    assert!(controller.is_connected());
}

#[rstest]
#[case::single_buffer(&[b"ONE\nTWO\nTHREE\n".as_slice()])]
#[case::byte_at_a_time(&[
    b"O".as_slice(), b"N".as_slice(), b"E".as_slice(), b"\n".as_slice(),
    b"TWO\nTH".as_slice(), b"REE\n".as_slice(),
])]
fn frames_are_delivered_in_wire_order(#[case] chunks: &[&[u8]]) {
    let (controller, _endpoint, seen) = connected_controller(LineCodec::default(), 4);
    for chunk in chunks {
        controller
            .received_data(chunk)
            .expect("chunked delivery should decode");
    }
    assert_eq!(lines(&seen), ["ONE", "TWO", "THREE"]);
}

#[test]
fn streamed_request_interleaves_with_normal_frames() {
    let (controller, _endpoint, seen) = connected_controller(LineCodec::default(), 4);

    controller
        .received_data(b"BEFORE\nSTREAM 4\nbodyAFTER\n")
        .expect("mixed buffer should decode");

    let frames = seen.borrow();
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[0].as_line(), Some("BEFORE"));
    let LineFrame::Stream { body: source, .. } = &frames[1] else {
        panic!("expected the stream frame second");
    };
    assert!(matches!(source.try_pull(), Pull::Item(b) if b.as_ref() == b"body"));
    assert!(matches!(source.try_pull(), Pull::Closed));
    assert_eq!(frames[2].as_line(), Some("AFTER"));
}

struct ReplyingHandler {
    log: CompletionLog,
    replies: u32,
}

impl ConnectionHandler<LineCodec, MockEndpoint> for ReplyingHandler {
    fn process_message(
        &mut self,
        message: LineFrame,
        ctx: &mut ConnectionContext<'_, LineCodec, MockEndpoint>,
    ) {
        if message.as_line().is_some() {
            self.replies += 1;
            let label = format!("reply-{}", self.replies);
            assert!(ctx.push(LineFrame::line(label.clone()), self.log.callback(label)));
        }
    }
}

#[test]
fn handler_replies_and_completions_preserve_order_under_partial_writes() {
    let endpoint = MockEndpoint::new();
    let log = CompletionLog::new();
    let handler = ReplyingHandler {
        log: log.clone(),
        replies: 0,
    };
    let controller = Controller::new(LineCodec::default(), handler, ControllerConfig::default());
    controller
        .connected(endpoint.clone())
        .expect("fresh controller should connect");

    endpoint.script_writes([WriteStatus::Partial, WriteStatus::Complete, WriteStatus::Partial]);
    controller
        .received_data(b"a\nb\nc\n")
        .expect("decode should succeed");
    controller.ready_for_data().expect("first drain");
    controller.ready_for_data().expect("second drain");

    assert_eq!(log.labels(), ["reply-1", "reply-2", "reply-3"]);
    assert_eq!(endpoint.written_bytes(), b"reply-1\nreply-2\nreply-3\n");
}
