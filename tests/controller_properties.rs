//! Generated checks for the controller's ordering and exactly-once
//! guarantees under random operation sequences.

use std::{cell::RefCell, num::NonZeroUsize, rc::Rc};

use proptest::prelude::*;
use wireflow::{
    Controller, ControllerConfig, DisconnectCause, OutputResult, Pull, WriteStatus,
    codec::examples::{LineCodec, LineFrame},
    testing::{CompletionLog, MockEndpoint, RecordingHandler},
};

type LineController = Controller<LineCodec, MockEndpoint, RecordingHandler<LineFrame>>;

const QUEUE_BOUND: usize = 3;

fn connected_controller(
    codec: LineCodec,
) -> (LineController, MockEndpoint, Rc<RefCell<Vec<LineFrame>>>) {
    let endpoint = MockEndpoint::new();
    let (handler, seen) = RecordingHandler::new();
    let config = ControllerConfig::with_output_buffer_size(
        NonZeroUsize::new(QUEUE_BOUND).expect("non-zero"),
    );
    let controller = Controller::new(codec, handler, config);
    controller
        .connected(endpoint.clone())
        .expect("fresh controller should connect");
    (controller, endpoint, seen)
}

#[derive(Clone, Debug)]
enum Op {
    Push,
    ReadyForData,
    PauseWrites,
    ResumeWrites,
    PurgePending,
    PurgeOutgoing,
}

fn op_strategy(with_purges: bool) -> impl Strategy<Value = Op> {
    if with_purges {
        prop_oneof![
            4 => Just(Op::Push),
            3 => Just(Op::ReadyForData),
            1 => Just(Op::PauseWrites),
            1 => Just(Op::ResumeWrites),
            1 => Just(Op::PurgePending),
            1 => Just(Op::PurgeOutgoing),
        ]
        .boxed()
    } else {
        prop_oneof![
            4 => Just(Op::Push),
            3 => Just(Op::ReadyForData),
            1 => Just(Op::PauseWrites),
            1 => Just(Op::ResumeWrites),
        ]
        .boxed()
    }
}

/// Drive a random op sequence and return the labels of accepted pushes.
fn run_ops(
    controller: &LineController,
    endpoint: &MockEndpoint,
    log: &CompletionLog,
    ops: &[Op],
    statuses: &[bool],
) -> Vec<String> {
    endpoint.script_writes(
        statuses
            .iter()
            .map(|partial| {
                if *partial {
                    WriteStatus::Partial
                } else {
                    WriteStatus::Complete
                }
            })
            .collect::<Vec<_>>(),
    );

    let mut accepted = Vec::new();
    let mut next_id = 0_u32;
    let mut write_ready_possible = false;
    for op in ops {
        match op {
            Op::Push => {
                let label = format!("m{next_id}");
                next_id += 1;
                if controller.push(LineFrame::line(label.clone()), log.callback(label.clone())) {
                    accepted.push(label);
                    write_ready_possible = true;
                }
            }
            Op::ReadyForData => {
                // Only deliver readiness when a write may be in flight;
                // spurious readiness is an invalid-state fault by design.
                if write_ready_possible && controller.is_connected() {
                    let _ = controller.ready_for_data();
                    write_ready_possible = false;
                }
            }
            Op::PauseWrites => controller.pause_writes(),
            Op::ResumeWrites => controller.resume_writes(),
            Op::PurgePending => controller.purge_pending(),
            Op::PurgeOutgoing => controller.purge_outgoing(),
        }
        assert!(
            controller.pending_writes() <= QUEUE_BOUND,
            "queue bound must hold at every observation point"
        );
    }
    accepted
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(192))]

    /// Every accepted push completes exactly once before the connection
    /// reaches the detached state, regardless of purges and write stalls.
    #[test]
    fn accepted_pushes_complete_exactly_once(
        ops in proptest::collection::vec(op_strategy(true), 1..40),
        statuses in proptest::collection::vec(any::<bool>(), 40),
    ) {
        let (controller, endpoint, _seen) = connected_controller(LineCodec::default());
        let log = CompletionLog::new();
        let accepted = run_ops(&controller, &endpoint, &log, &ops, &statuses);

        controller.connection_lost(DisconnectCause::Failed("torn down by test".to_owned()));
        prop_assert!(!controller.is_connected());

        let mut completed = log.labels();
        completed.sort();
        let mut expected = accepted.clone();
        expected.sort();
        prop_assert_eq!(completed, expected);
    }

    /// Without purges, completion order equals push order, and successes
    /// form a prefix-respecting sequence of the accepted pushes.
    #[test]
    fn completion_order_matches_push_order(
        ops in proptest::collection::vec(op_strategy(false), 1..40),
        statuses in proptest::collection::vec(any::<bool>(), 40),
    ) {
        let (controller, endpoint, _seen) = connected_controller(LineCodec::default());
        let log = CompletionLog::new();
        let accepted = run_ops(&controller, &endpoint, &log, &ops, &statuses);

        controller.connection_lost(DisconnectCause::Failed("torn down by test".to_owned()));

        prop_assert_eq!(log.labels(), accepted);
        let entries = log.entries();
        let first_failure = entries
            .iter()
            .position(|(_, r)| *r != OutputResult::Success)
            .unwrap_or(entries.len());
        for (label, result) in &entries[..first_failure] {
            prop_assert_eq!(
                *result,
                OutputResult::Success,
                "unexpected result for {}",
                label
            );
        }
    }

    /// Inbound frames are delivered in wire order no matter how the bytes
    /// are chunked.
    #[test]
    fn delivery_order_matches_wire_order(
        count in 1_usize..12,
        cuts in proptest::collection::vec(1_usize..64, 0..12),
    ) {
        let (controller, _endpoint, seen) = connected_controller(LineCodec::default());

        let expected: Vec<String> = (0..count).map(|n| format!("line-{n}")).collect();
        let mut wire = Vec::new();
        for line in &expected {
            wire.extend_from_slice(line.as_bytes());
            wire.push(b'\n');
        }

        let mut rest = wire.as_slice();
        for cut in cuts {
            if rest.is_empty() {
                break;
            }
            let take = cut.min(rest.len());
            let (chunk, tail) = rest.split_at(take);
            controller.received_data(chunk).expect("chunk should decode");
            rest = tail;
        }
        if !rest.is_empty() {
            controller.received_data(rest).expect("tail should decode");
        }

        let delivered: Vec<String> = seen
            .borrow()
            .iter()
            .filter_map(|frame| frame.as_line().map(str::to_owned))
            .collect();
        prop_assert_eq!(delivered, expected);
    }

    /// Streamed body bytes survive backpressure intact: whatever chunking
    /// the wire uses, the application observes the body in order, and reads
    /// are re-enabled whenever the application drains the pipe.
    #[test]
    fn body_bytes_round_trip_through_backpressure(
        body_len in 1_usize..96,
        cuts in proptest::collection::vec(1_usize..16, 1..24),
    ) {
        let codec = LineCodec::default().with_body_capacity(8);
        let (controller, endpoint, seen) = connected_controller(codec);

        controller
            .received_data(format!("STREAM {body_len}\n").as_bytes())
            .expect("header should decode");
        let LineFrame::Stream { body: source, .. } = seen.borrow_mut().remove(0) else {
            panic!("expected a stream frame");
        };

        let body: Vec<u8> = (0..body_len).map(|n| (n % 251) as u8).collect();
        let mut received = Vec::new();
        let mut rest = body.as_slice();
        let mut cuts = cuts.into_iter().cycle();
        while !rest.is_empty() {
            let take = cuts.next().expect("cycled").min(rest.len());
            let (chunk, tail) = rest.split_at(take);
            controller.received_data(chunk).expect("body chunk");
            rest = tail;
            while let Pull::Item(bytes) = source.try_pull() {
                received.extend_from_slice(&bytes);
            }
            prop_assert!(
                endpoint.reads_enabled(),
                "a drained pipe must leave reads enabled"
            );
        }

        prop_assert_eq!(received, body);
        prop_assert!(matches!(source.try_pull(), Pull::Closed));
    }
}
