//! Restoring the primary's order on a backup: the order queue state machine, and the engine that drains
//! queues onto the invocation pipeline.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        mpsc::{self, Receiver},
        Arc, Condvar, Mutex,
    },
    thread,
    time::Duration,
};

use log::LevelFilter;
use rand::{seq::SliceRandom, thread_rng};
use triangle_rs::{
    backup::{
        engine::ReorderEngine,
        order_queue::{Admission, DiscardReason, OrderQueue, QueueId, QueueReset},
        pipeline::{
            ApplyContext, ApplyError, Completion, CompletionHandle, InvocationPipeline, ValueMatcher,
        },
        state_transfer::{LoggingStateTransfer, ResyncRequest, StateTransfer},
    },
    backup_write::{BackupWrite, Operation, Payload, ProtocolViolation, SingleKeyWrite},
    commands::WriteCommand,
    events::Event,
    types::basic::{Address, Flags, Key, SegmentId, SequenceNumber, TopologyId, Value},
};

mod common;

use crate::common::{
    data_container::{DataContainer, DelayedPipeline},
    fixtures::{numbered_put, put, record, sequences, users, wait_until},
    logging::setup_logger,
};

const PRIMARY: Address = Address::new(1);

fn queue(capacity: usize) -> OrderQueue {
    OrderQueue::new(
        QueueId {
            origin: PRIMARY,
            cache: users(),
            segment: SegmentId::new(0),
        },
        capacity,
    )
}

fn take_all(queue: &mut OrderQueue) -> Vec<SequenceNumber> {
    let mut taken = Vec::new();
    while let Some(record) = queue.take_next() {
        taken.push(record.sequence);
    }
    taken
}

#[test]
fn records_are_released_in_sequence_order() {
    let mut queue = queue(16);

    for sequence in [3, 1, 2] {
        let report = queue.admit(numbered_put(1, 0, sequence));
        assert_eq!(report.admission, Admission::Buffered);
        assert_eq!(report.reset, None);
    }
    assert_eq!(queue.pending_len(), 3);
    assert!(queue.take_next().is_none());

    let report = queue.admit(numbered_put(1, 0, 0));
    assert_eq!(report.admission, Admission::Released { count: 4 });
    assert_eq!(queue.expected(), SequenceNumber::new(4));
    assert_eq!(queue.pending_len(), 0);
    assert_eq!(queue.ready_len(), 4);
    assert_eq!(take_all(&mut queue), sequences(0..4));
}

#[test]
fn any_arrival_order_is_restored() {
    let mut arrival: Vec<u64> = (0..100).collect();
    arrival.shuffle(&mut thread_rng());

    let mut queue = queue(128);
    let mut taken = Vec::new();
    for sequence in arrival {
        queue.admit(numbered_put(1, 0, sequence));
        taken.extend(take_all(&mut queue));
    }

    assert_eq!(taken, sequences(0..100));
}

#[test]
fn duplicates_are_discarded() {
    let mut queue = queue(16);

    queue.admit(numbered_put(1, 0, 0));
    queue.admit(numbered_put(1, 0, 2));

    let expected = SequenceNumber::new(1);
    for sequence in [0, 2] {
        assert_eq!(
            queue.admit(numbered_put(1, 0, sequence)).admission,
            Admission::Discarded(DiscardReason::Duplicate { expected })
        );
    }
    assert_eq!(take_all(&mut queue), sequences([0]));
}

#[test]
fn newer_topology_resets_the_queue() {
    let mut queue = queue(16);

    assert_eq!(
        queue.admit(numbered_put(1, 0, 0)).admission,
        Admission::Released { count: 1 }
    );
    assert_eq!(queue.topology_id(), Some(TopologyId::new(1)));
    queue.admit(numbered_put(1, 0, 2));

    let report = queue.admit(numbered_put(2, 0, 1));
    assert_eq!(
        report.reset,
        Some(QueueReset {
            previous: TopologyId::new(1),
            adopted: TopologyId::new(2),
            dropped: 2,
        })
    );
    assert_eq!(report.admission, Admission::Buffered);
    assert_eq!(queue.topology_id(), Some(TopologyId::new(2)));
    assert_eq!(queue.expected(), SequenceNumber::ZERO);

    assert_eq!(
        queue.admit(numbered_put(1, 0, 0)).admission,
        Admission::Discarded(DiscardReason::StaleTopology {
            accepted: TopologyId::new(2)
        })
    );

    assert_eq!(
        queue.admit(numbered_put(2, 0, 0)).admission,
        Admission::Released { count: 2 }
    );
    let mut taken = Vec::new();
    while let Some(record) = queue.take_next() {
        taken.push((record.topology_id, record.sequence));
    }
    assert_eq!(
        taken,
        vec![
            (TopologyId::new(2), SequenceNumber::new(0)),
            (TopologyId::new(2), SequenceNumber::new(1)),
        ]
    );
}

#[test]
fn reset_to_only_moves_forward() {
    let mut queue = queue(16);

    assert_eq!(queue.reset_to(TopologyId::new(3)), None);
    assert_eq!(queue.topology_id(), Some(TopologyId::new(3)));

    queue.admit(numbered_put(3, 0, 1));
    assert_eq!(queue.reset_to(TopologyId::new(2)), None);
    assert_eq!(queue.reset_to(TopologyId::new(3)), None);
    assert_eq!(queue.pending_len(), 1);

    assert_eq!(
        queue.reset_to(TopologyId::new(4)),
        Some(QueueReset {
            previous: TopologyId::new(3),
            adopted: TopologyId::new(4),
            dropped: 1,
        })
    );
    assert_eq!(queue.pending_len(), 0);
}

#[test]
fn full_buffer_skips_the_gap_and_requests_a_resync() {
    let mut queue = queue(2);

    assert_eq!(queue.admit(numbered_put(1, 0, 5)).admission, Admission::Buffered);
    assert_eq!(queue.admit(numbered_put(1, 0, 6)).admission, Admission::Buffered);

    let report = queue.admit(numbered_put(1, 0, 8));
    assert_eq!(
        report.admission,
        Admission::Overflow {
            request: ResyncRequest {
                origin: PRIMARY,
                cache: users(),
                segment: SegmentId::new(0),
                topology_id: TopologyId::new(1),
                missing_from: SequenceNumber::new(0),
                missing_to: SequenceNumber::new(5),
            },
            count: 2,
        }
    );
    assert_eq!(queue.expected(), SequenceNumber::new(7));
    assert_eq!(take_all(&mut queue), sequences([5, 6]));

    // Records of the skipped range are late beyond repair.
    assert_eq!(
        queue.admit(numbered_put(1, 0, 3)).admission,
        Admission::Discarded(DiscardReason::Duplicate {
            expected: SequenceNumber::new(7)
        })
    );

    assert_eq!(
        queue.admit(numbered_put(1, 0, 7)).admission,
        Admission::Released { count: 2 }
    );
    assert_eq!(take_all(&mut queue), sequences([7, 8]));
}

#[test]
fn applying_any_arrival_order_matches_applying_in_order() {
    setup_logger(LevelFilter::Debug);
    let key = Key::from("counter");
    let write = |sequence: u64| {
        record(
            1,
            0,
            sequence,
            put(&key, &Value::from(format!("{}", sequence).as_str())),
        )
    };

    let in_order = DataContainer::new();
    let shuffled = DataContainer::new();
    let in_order_engine = ReorderEngine::new(in_order.clone(), LoggingStateTransfer, 64, 2, None);
    let shuffled_engine = ReorderEngine::new(shuffled.clone(), LoggingStateTransfer, 64, 2, None);

    let mut arrival: Vec<u64> = (0..50).collect();
    (0..50).for_each(|sequence| in_order_engine.receive(PRIMARY, write(sequence)));
    arrival.shuffle(&mut thread_rng());
    arrival
        .into_iter()
        .for_each(|sequence| shuffled_engine.receive(PRIMARY, write(sequence)));

    wait_until(|| in_order.applied().len() == 50 && shuffled.applied().len() == 50);

    assert_eq!(shuffled.applied_sequences(), sequences(0..50));
    assert_eq!(shuffled.snapshot(), in_order.snapshot());
    assert_eq!(shuffled.get(&key), Some(Value::from("49")));
}

#[test]
fn failed_apply_still_advances_the_queue() {
    setup_logger(LevelFilter::Debug);
    let container = DataContainer::new();
    container.fail_on(Key::from("key-1"));
    let (event_publisher, events) = mpsc::channel();
    let engine = ReorderEngine::new(
        container.clone(),
        LoggingStateTransfer,
        64,
        2,
        Some(event_publisher),
    );

    for sequence in [2, 1, 0] {
        engine.receive(PRIMARY, numbered_put(1, 0, sequence));
    }
    wait_until(|| container.applied().len() == 3 && engine.is_idle());

    assert_eq!(container.applied_sequences(), sequences(0..3));
    assert_eq!(container.get(&Key::from("key-0")), Some(Value::from("value-0")));
    assert_eq!(container.get(&Key::from("key-1")), None);
    assert_eq!(container.get(&Key::from("key-2")), Some(Value::from("value-2")));

    let failures: Vec<(SequenceNumber, ApplyError)> = events
        .try_iter()
        .filter_map(|event| match event {
            Event::ApplyFailure(failure) => Some((failure.sequence, failure.error)),
            _ => None,
        })
        .collect();
    assert_eq!(
        failures,
        vec![(
            SequenceNumber::new(1),
            ApplyError::Failed(String::from("injected failure"))
        )]
    );
}

#[test]
fn a_queue_applies_one_record_at_a_time() {
    setup_logger(LevelFilter::Debug);
    let pipeline = DelayedPipeline::new(DataContainer::new(), Duration::from_millis(5));
    let engine = ReorderEngine::new(pipeline.clone(), LoggingStateTransfer, 64, 4, None);

    let mut arrival: Vec<u64> = (0..20).collect();
    arrival.shuffle(&mut thread_rng());
    for sequence in arrival {
        engine.receive(PRIMARY, numbered_put(1, 0, sequence));
    }

    wait_until(|| pipeline.container().applied().len() == 20 && engine.is_idle());
    assert_eq!(pipeline.container().applied_sequences(), sequences(0..20));
    assert_eq!(pipeline.max_in_flight(), 1);
}

/// Blocks every apply until `parties` applies are in flight at once, or 5 seconds have passed.
struct Rendezvous {
    parties: usize,
    arrived: Mutex<usize>,
    all_arrived: Condvar,
    timed_out: AtomicBool,
}

impl InvocationPipeline for Rendezvous {
    fn apply(&self, _command: WriteCommand, _context: &ApplyContext) -> Completion {
        let mut arrived = self.arrived.lock().unwrap();
        *arrived += 1;
        if *arrived >= self.parties {
            self.all_arrived.notify_all();
        } else {
            let (_arrived, result) = self
                .all_arrived
                .wait_timeout_while(arrived, Duration::from_secs(5), |arrived| {
                    *arrived < self.parties
                })
                .unwrap();
            if result.timed_out() {
                self.timed_out.store(true, Ordering::SeqCst);
            }
        }
        Completion::succeeded()
    }
}

#[test]
fn distinct_queues_apply_in_parallel() {
    setup_logger(LevelFilter::Debug);
    let pipeline = Arc::new(Rendezvous {
        parties: 2,
        arrived: Mutex::new(0),
        all_arrived: Condvar::new(),
        timed_out: AtomicBool::new(false),
    });
    let engine = ReorderEngine::new(pipeline.clone(), LoggingStateTransfer, 64, 2, None);

    engine.receive(PRIMARY, numbered_put(1, 0, 0));
    engine.receive(PRIMARY, numbered_put(1, 1, 0));

    wait_until(|| *pipeline.arrived.lock().unwrap() == 2 && engine.is_idle());
    assert!(!pipeline.timed_out.load(Ordering::SeqCst));
}

/// Applies through a [`DataContainer`], except writes to segment 0, whose completions are kept back until
/// [released](Self::release).
struct StallingPipeline {
    container: Arc<DataContainer>,
    held: Mutex<Vec<(CompletionHandle, WriteCommand, ApplyContext)>>,
    stalled: Arc<AtomicUsize>,
}

impl StallingPipeline {
    fn new() -> StallingPipeline {
        StallingPipeline {
            container: DataContainer::new(),
            held: Mutex::new(Vec::new()),
            stalled: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn held_len(&self) -> usize {
        self.held.lock().unwrap().len()
    }

    fn release(&self) {
        let held = std::mem::take(&mut *self.held.lock().unwrap());
        for (handle, command, context) in held {
            handle.complete(self.container.apply(command, &context).wait());
        }
    }
}

impl InvocationPipeline for StallingPipeline {
    fn apply(&self, command: WriteCommand, context: &ApplyContext) -> Completion {
        if context.segment != SegmentId::new(0) {
            return self.container.apply(command, context);
        }

        let (completion, handle) = Completion::pending();
        self.held
            .lock()
            .unwrap()
            .push((handle, command, context.clone()));
        self.stalled.fetch_add(1, Ordering::SeqCst);
        completion
    }
}

#[test]
fn a_pending_completion_holds_back_only_its_own_queue() {
    setup_logger(LevelFilter::Debug);
    let pipeline = Arc::new(StallingPipeline::new());
    let engine = ReorderEngine::new(pipeline.clone(), LoggingStateTransfer, 64, 1, None);

    engine.receive(PRIMARY, numbered_put(1, 0, 0));
    engine.receive(PRIMARY, numbered_put(1, 0, 1));
    wait_until(|| pipeline.held_len() == 1);

    // A single worker, and more queues than workers.
    for segment in 1..4 {
        engine.receive(PRIMARY, numbered_put(1, segment, 0));
        engine.receive(PRIMARY, numbered_put(1, segment, 1));
    }
    wait_until(|| pipeline.container.applied().len() == 6);
    assert_eq!(pipeline.held_len(), 1);
    assert!(!engine.is_idle());

    pipeline.release();
    wait_until(|| pipeline.held_len() == 1);
    pipeline.release();
    wait_until(|| pipeline.container.applied().len() == 8 && engine.is_idle());

    let segment_0: Vec<SequenceNumber> = pipeline
        .container
        .applied()
        .into_iter()
        .filter(|context| context.segment == SegmentId::new(0))
        .map(|context| context.sequence)
        .collect();
    assert_eq!(segment_0, sequences(0..2));
    assert_eq!(pipeline.stalled.load(Ordering::SeqCst), 2);
}

#[test]
fn dropping_the_engine_does_not_wait_for_pending_completions() {
    setup_logger(LevelFilter::Debug);
    let pipeline = StallingPipeline::new();
    let stalled = pipeline.stalled.clone();
    let engine = ReorderEngine::new(pipeline, LoggingStateTransfer, 64, 1, None);

    engine.receive(PRIMARY, numbered_put(1, 0, 0));
    engine.receive(PRIMARY, numbered_put(1, 0, 1));
    wait_until(|| stalled.load(Ordering::SeqCst) == 1);

    // The engine owns the pipeline, which owns the pending completion's handle.
    let (dropped_sender, dropped) = mpsc::channel();
    thread::spawn(move || {
        drop(engine);
        let _ = dropped_sender.send(());
    });
    assert_eq!(dropped.recv_timeout(Duration::from_secs(5)), Ok(()));
    assert_eq!(stalled.load(Ordering::SeqCst), 1);
}

#[test]
fn dropped_completion_handle_counts_as_abandoned() {
    let (completion, handle) = Completion::pending();
    let (outcome_sender, outcome) = mpsc::channel();
    completion.on_complete(move |result| {
        let _ = outcome_sender.send(result);
    });
    assert!(outcome.try_recv().is_err());

    drop(handle);
    assert_eq!(outcome.try_recv(), Ok(Err(ApplyError::Abandoned)));

    // Completed before the continuation is registered: it runs right away.
    let (completion, handle) = Completion::pending();
    handle.complete(Ok(()));
    let (outcome_sender, outcome) = mpsc::channel();
    completion.on_complete(move |result| {
        let _ = outcome_sender.send(result);
    });
    assert_eq!(outcome.try_recv(), Ok(Ok(())));
}

#[test]
fn queues_are_kept_per_primary() {
    setup_logger(LevelFilter::Debug);
    let container = DataContainer::new();
    let engine = ReorderEngine::new(container.clone(), LoggingStateTransfer, 64, 2, None);

    // Both primaries number segment 0 from zero: neither record is a duplicate of the other.
    engine.receive(PRIMARY, numbered_put(1, 0, 0));
    engine.receive(Address::new(2), numbered_put(1, 0, 0));

    wait_until(|| container.applied().len() == 2);
    let mut origins: Vec<Address> = container
        .applied()
        .into_iter()
        .map(|context| context.origin)
        .collect();
    origins.sort();
    assert_eq!(origins, vec![PRIMARY, Address::new(2)]);
}

#[test]
fn backup_writes_skip_locking_and_match_any_value() {
    setup_logger(LevelFilter::Debug);
    let container = DataContainer::new();
    let engine = ReorderEngine::new(container.clone(), LoggingStateTransfer, 64, 2, None);

    let mut write = numbered_put(1, 3, 0);
    write.flags = Flags::IGNORE_RETURN_VALUES;
    let invocation_id = write.invocation_id;
    engine.receive(PRIMARY, write);

    wait_until(|| container.applied().len() == 1);
    let context = container.applied().remove(0);
    assert_eq!(
        context,
        ApplyContext {
            origin: PRIMARY,
            cache: users(),
            segment: SegmentId::new(3),
            topology_id: TopologyId::new(1),
            sequence: SequenceNumber::new(0),
            invocation_id,
            keys: vec![Key::from("key-0")],
            flags: Flags::IGNORE_RETURN_VALUES | Flags::SKIP_LOCKING | Flags::BACKUP_WRITE,
            value_matcher: ValueMatcher::MatchAlways,
        }
    );
}

#[test]
fn noops_fill_gaps_without_touching_state() {
    setup_logger(LevelFilter::Debug);
    let container = DataContainer::new();
    let engine = ReorderEngine::new(container.clone(), LoggingStateTransfer, 64, 2, None);

    engine.receive(PRIMARY, numbered_put(1, 0, 2));
    engine.receive(PRIMARY, numbered_put(1, 0, 0));
    wait_until(|| container.applied().len() == 1 && engine.is_idle());

    engine.receive(PRIMARY, record(1, 0, 1, BackupWrite::Noop));
    wait_until(|| container.applied().len() == 2 && engine.is_idle());

    assert_eq!(container.applied_sequences(), sequences([0, 2]));
    assert_eq!(container.snapshot().len(), 2);
}

#[test]
fn malformed_record_is_discarded_and_the_queue_moves_on() {
    setup_logger(LevelFilter::Debug);
    let container = DataContainer::new();
    let (event_publisher, events) = mpsc::channel();
    let engine = ReorderEngine::new(
        container.clone(),
        LoggingStateTransfer,
        64,
        2,
        Some(event_publisher),
    );

    let malformed = BackupWrite::SingleKey(SingleKeyWrite {
        key: Key::from("k"),
        operation: Operation::Write,
        payload: Payload::None,
        metadata: None,
        internal_metadata: None,
    });
    engine.receive(PRIMARY, record(1, 0, 0, malformed));
    engine.receive(PRIMARY, numbered_put(1, 0, 1));

    wait_until(|| container.applied().len() == 1 && engine.is_idle());
    assert_eq!(container.applied_sequences(), sequences([1]));

    let discarded: Vec<(SequenceNumber, DiscardReason)> = discards(&events);
    assert_eq!(discarded.len(), 1);
    assert_eq!(discarded[0].0, SequenceNumber::new(0));
    assert!(matches!(
        discarded[0].1,
        DiscardReason::ProtocolViolation(ProtocolViolation::MalformedRecord { .. })
    ));
}

fn discards(events: &Receiver<Event>) -> Vec<(SequenceNumber, DiscardReason)> {
    events
        .try_iter()
        .filter_map(|event| match event {
            Event::DiscardBackupWrite(discard) => Some((discard.sequence, discard.reason)),
            _ => None,
        })
        .collect()
}

#[test]
fn installing_a_topology_drops_records_of_the_old_one() {
    setup_logger(LevelFilter::Debug);
    let container = DataContainer::new();
    let (event_publisher, events) = mpsc::channel();
    let engine = ReorderEngine::new(
        container.clone(),
        LoggingStateTransfer,
        64,
        2,
        Some(event_publisher),
    );

    engine.receive(PRIMARY, numbered_put(1, 0, 1));
    engine.retain_topology(&users(), TopologyId::new(2));

    let resets: Vec<(TopologyId, TopologyId, usize)> = events
        .try_iter()
        .filter_map(|event| match event {
            Event::ResetOrderQueue(reset) => Some((reset.previous, reset.adopted, reset.dropped)),
            _ => None,
        })
        .collect();
    assert_eq!(resets, vec![(TopologyId::new(1), TopologyId::new(2), 1)]);

    engine.receive(PRIMARY, numbered_put(1, 0, 0));
    assert_eq!(
        discards(&events),
        vec![(
            SequenceNumber::new(0),
            DiscardReason::StaleTopology {
                accepted: TopologyId::new(2)
            }
        )]
    );

    engine.receive(PRIMARY, numbered_put(2, 0, 0));
    wait_until(|| container.applied().len() == 1 && engine.is_idle());
    let applied = container.applied();
    assert_eq!(applied[0].topology_id, TopologyId::new(2));
    assert_eq!(applied[0].sequence, SequenceNumber::new(0));
}

#[test]
fn queues_created_after_an_install_discard_records_of_older_topologies() {
    setup_logger(LevelFilter::Debug);
    let container = DataContainer::new();
    let (event_publisher, events) = mpsc::channel();
    let engine = ReorderEngine::new(
        container.clone(),
        LoggingStateTransfer,
        64,
        2,
        Some(event_publisher),
    );

    engine.retain_topology(&users(), TopologyId::new(5));
    engine.receive(PRIMARY, numbered_put(1, 0, 0));
    assert_eq!(
        discards(&events),
        vec![(
            SequenceNumber::new(0),
            DiscardReason::StaleTopology {
                accepted: TopologyId::new(5)
            }
        )]
    );

    // An older install does not lower the floor.
    engine.retain_topology(&users(), TopologyId::new(3));
    engine.receive(PRIMARY, numbered_put(4, 1, 0));
    assert_eq!(
        discards(&events),
        vec![(
            SequenceNumber::new(0),
            DiscardReason::StaleTopology {
                accepted: TopologyId::new(5)
            }
        )]
    );

    engine.receive(PRIMARY, numbered_put(5, 0, 0));
    wait_until(|| container.applied().len() == 1 && engine.is_idle());
    let applied = container.applied();
    assert_eq!(applied[0].topology_id, TopologyId::new(5));
    assert_eq!(applied[0].segment, SegmentId::new(0));
}

#[derive(Default)]
struct RecordingStateTransfer {
    requests: Mutex<Vec<ResyncRequest>>,
}

impl StateTransfer for RecordingStateTransfer {
    fn request_segment_resync(&self, request: &ResyncRequest) {
        self.requests.lock().unwrap().push(request.clone());
    }
}

#[test]
fn overflow_requests_a_resync_and_resumes_applying() {
    setup_logger(LevelFilter::Debug);
    let container = DataContainer::new();
    let state_transfer = Arc::new(RecordingStateTransfer::default());
    let engine = ReorderEngine::new(container.clone(), state_transfer.clone(), 2, 2, None);

    for sequence in [5, 6, 8] {
        engine.receive(PRIMARY, numbered_put(1, 0, sequence));
    }
    wait_until(|| container.applied().len() == 2 && engine.is_idle());
    assert_eq!(
        *state_transfer.requests.lock().unwrap(),
        vec![ResyncRequest {
            origin: PRIMARY,
            cache: users(),
            segment: SegmentId::new(0),
            topology_id: TopologyId::new(1),
            missing_from: SequenceNumber::new(0),
            missing_to: SequenceNumber::new(5),
        }]
    );

    engine.receive(PRIMARY, numbered_put(1, 0, 7));
    wait_until(|| container.applied().len() == 4 && engine.is_idle());
    assert_eq!(container.applied_sequences(), sequences([5, 6, 7, 8]));
}
