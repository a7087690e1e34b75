/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The reorder engine: one [`OrderQueue`] per (primary, cache, segment), drained on the apply executor.
//!
//! [`receive`](ReorderEngine::receive) runs on the receiving thread. It only admits the record into its
//! queue and, if records were released and nobody is draining the queue yet, schedules a drain task. A
//! drain task takes one released record and hands it to the pipeline. The record's completion schedules
//! the next drain task of the queue, until the queue has nothing released left. So within a queue, applying
//! `s` happens-before applying `s + 1`, while a queue waiting on a completion holds no worker and blocks
//! no other queue.
//!
//! Queues created after a topology was [installed](ReorderEngine::retain_topology) start in that topology,
//! so a late record of an older epoch is discarded even if its queue did not exist yet.
//!
//! A record whose apply fails still counts as consumed: the queue moves on, and the failure is logged
//! and published as an [`ApplyFailureEvent`]. Divergence is repaired by state transfer.

use std::{
    collections::HashMap,
    sync::{mpsc::Sender, Arc, Mutex, Weak},
    time::SystemTime,
};

use crate::backup_write::BackupWriteRecord;
use crate::events::*;
use crate::types::basic::{Address, CacheName, SequenceNumber, TopologyId};

use super::{
    dispatcher::{Dispatched, Dispatcher},
    executor::{ApplyExecutor, TaskSender},
    lock,
    order_queue::{Admission, DiscardReason, OrderQueue, QueueId, QueueReset},
    pipeline::{ApplyError, Completion, InvocationPipeline},
    state_transfer::StateTransfer,
};

pub struct ReorderEngine<P: InvocationPipeline, S: StateTransfer> {
    // Dropped before the executor. Drain tasks and completions only hold weak references, so from here on
    // they find the engine gone and do nothing.
    inner: Arc<EngineInner<P, S>>,
    // Only held to join the workers on drop.
    #[allow(dead_code)]
    executor: ApplyExecutor,
}

struct EngineInner<P: InvocationPipeline, S: StateTransfer> {
    queues: Mutex<HashMap<QueueId, Arc<Mutex<OrderQueue>>>>,
    installed: Mutex<HashMap<CacheName, TopologyId>>,
    dispatcher: Dispatcher<P>,
    state_transfer: S,
    buffer_capacity: usize,
    event_publisher: Option<Sender<Event>>,
    tasks: TaskSender,
}

impl<P: InvocationPipeline, S: StateTransfer> ReorderEngine<P, S> {
    /// Create an engine whose queues buffer at most `buffer_capacity` early arrivals each, and which
    /// applies on `apply_threads` workers.
    pub fn new(
        pipeline: P,
        state_transfer: S,
        buffer_capacity: usize,
        apply_threads: usize,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        let executor = ApplyExecutor::new(apply_threads);
        let inner = EngineInner {
            queues: Mutex::new(HashMap::new()),
            installed: Mutex::new(HashMap::new()),
            dispatcher: Dispatcher::new(pipeline),
            state_transfer,
            buffer_capacity,
            event_publisher,
            tasks: executor.task_sender(),
        };
        Self {
            inner: Arc::new(inner),
            executor,
        }
    }

    pub fn pipeline(&self) -> &P {
        self.inner.dispatcher.pipeline()
    }

    /// Admit `record`, sent by the primary `origin`. Never blocks on applying.
    pub fn receive(&self, origin: Address, record: BackupWriteRecord) {
        let id = QueueId::of(origin, &record);
        let (topology_id, sequence) = (record.topology_id, record.sequence);

        Event::publish(
            &self.inner.event_publisher,
            Event::ReceiveBackupWrite(ReceiveBackupWriteEvent {
                timestamp: SystemTime::now(),
                origin,
                cache: id.cache.clone(),
                segment: id.segment,
                topology_id,
                sequence,
            }),
        );

        let queue = self.inner.queue(&id);
        let (report, start_drain) = {
            let mut queue = lock(&queue);
            let report = queue.admit(record);
            (report, queue.begin_drain())
        };

        if let Some(reset) = report.reset {
            self.inner.on_reset(&id, reset);
        }

        match report.admission {
            Admission::Released { .. } => (),
            Admission::Buffered => log::trace!(
                "Buffered {}/{} sequence {} from {}",
                id.cache,
                id.segment,
                sequence,
                origin
            ),
            Admission::Discarded(reason) => {
                log::trace!(
                    "Discarded {}/{} sequence {} of topology {} from {}: {:?}",
                    id.cache,
                    id.segment,
                    sequence,
                    topology_id,
                    origin,
                    reason
                );
                self.inner.on_discard(&id, topology_id, sequence, reason);
            }
            Admission::Overflow { request, count } => {
                log::warn!(
                    "Order queue of {}/{} from {} overflowed: skipping sequences {}..{} and releasing {}",
                    id.cache,
                    id.segment,
                    origin,
                    request.missing_from,
                    request.missing_to,
                    count
                );
                self.inner.state_transfer.request_segment_resync(&request);
                Event::publish(
                    &self.inner.event_publisher,
                    Event::BufferOverflow(BufferOverflowEvent {
                        timestamp: SystemTime::now(),
                        request,
                    }),
                );
            }
        }

        if start_drain {
            self.inner.schedule_drain(id, queue);
        }
    }

    /// Reset every queue of `cache` that accepts a topology older than `topology_id`, and start queues
    /// created from now on in `topology_id`. Called when a new topology is installed, so that records of the
    /// old epoch stop waiting to be applied before any record of the new one arrives.
    pub fn retain_topology(&self, cache: &CacheName, topology_id: TopologyId) {
        {
            let mut installed = lock(&self.inner.installed);
            let floor = installed.entry(cache.clone()).or_insert(topology_id);
            if topology_id > *floor {
                *floor = topology_id;
            }
        }

        let queues: Vec<(QueueId, Arc<Mutex<OrderQueue>>)> = lock(&self.inner.queues)
            .iter()
            .filter(|(id, _)| id.cache == *cache)
            .map(|(id, queue)| (id.clone(), queue.clone()))
            .collect();

        for (id, queue) in queues {
            let reset = lock(&queue).reset_to(topology_id);
            if let Some(reset) = reset {
                self.inner.on_reset(&id, reset);
            }
        }
    }

    /// Whether every queue has applied every record it released.
    pub fn is_idle(&self) -> bool {
        let queues: Vec<Arc<Mutex<OrderQueue>>> =
            lock(&self.inner.queues).values().cloned().collect();
        queues.iter().all(|queue| lock(queue).is_idle())
    }
}

impl<P: InvocationPipeline, S: StateTransfer> EngineInner<P, S> {
    fn queue(&self, id: &QueueId) -> Arc<Mutex<OrderQueue>> {
        let mut queues = lock(&self.queues);
        if let Some(queue) = queues.get(id) {
            return queue.clone();
        }

        // Read under the queues lock, so that a concurrent `retain_topology` either sees this queue or is
        // seen by it.
        let mut queue = OrderQueue::new(id.clone(), self.buffer_capacity);
        if let Some(installed) = lock(&self.installed).get(&id.cache) {
            queue.reset_to(*installed);
        }
        let queue = Arc::new(Mutex::new(queue));
        queues.insert(id.clone(), queue.clone());
        queue
    }

    fn schedule_drain(self: &Arc<Self>, id: QueueId, queue: Arc<Mutex<OrderQueue>>) {
        let inner = Arc::downgrade(self);
        self.tasks.execute(Box::new(move || {
            if let Some(inner) = inner.upgrade() {
                inner.drain(id, queue)
            }
        }));
    }

    /// Hand the next released record of `queue` to the pipeline. Its completion schedules the next drain.
    fn drain(self: &Arc<Self>, id: QueueId, queue: Arc<Mutex<OrderQueue>>) {
        // The queue lock must not be held while applying.
        let next = lock(&queue).take_next();
        let record = match next {
            Some(record) => record,
            None => return,
        };

        let completion = match self.dispatcher.dispatch(id.origin, &record) {
            Ok(Dispatched::Noop) => {
                log::debug!(
                    "Consumed no-op {}/{} sequence {} from {}",
                    id.cache,
                    id.segment,
                    record.sequence,
                    id.origin
                );
                Completion::succeeded()
            }
            Ok(Dispatched::Applying(completion)) => completion,
            Err(violation) => {
                log::error!(
                    "Cannot reconstruct {}/{} sequence {} from {}: {:?}",
                    id.cache,
                    id.segment,
                    record.sequence,
                    id.origin,
                    violation
                );
                self.on_discard(
                    &id,
                    record.topology_id,
                    record.sequence,
                    DiscardReason::ProtocolViolation(violation),
                );
                return self.schedule_drain(id, queue);
            }
        };

        let inner: Weak<Self> = Arc::downgrade(self);
        completion.on_complete(move |outcome| {
            if let Some(inner) = inner.upgrade() {
                inner.on_applied(&id, &record, outcome);
                inner.schedule_drain(id, queue);
            }
        });
    }

    fn on_applied(&self, id: &QueueId, record: &BackupWriteRecord, outcome: Result<(), ApplyError>) {
        match outcome {
            Ok(()) => Event::publish(
                &self.event_publisher,
                Event::ApplyBackupWrite(ApplyBackupWriteEvent {
                    timestamp: SystemTime::now(),
                    origin: id.origin,
                    cache: id.cache.clone(),
                    segment: id.segment,
                    topology_id: record.topology_id,
                    sequence: record.sequence,
                    keys: record.keys(),
                }),
            ),
            Err(error) => {
                log::warn!(
                    "Applying {}/{} sequence {} from {} failed: {:?}",
                    id.cache,
                    id.segment,
                    record.sequence,
                    id.origin,
                    error
                );
                Event::publish(
                    &self.event_publisher,
                    Event::ApplyFailure(ApplyFailureEvent {
                        timestamp: SystemTime::now(),
                        origin: id.origin,
                        cache: id.cache.clone(),
                        segment: id.segment,
                        topology_id: record.topology_id,
                        sequence: record.sequence,
                        error,
                    }),
                );
            }
        }
    }

    fn on_reset(&self, id: &QueueId, reset: QueueReset) {
        log::debug!(
            "Order queue of {}/{} from {} moved from topology {} to {}, dropping {} records",
            id.cache,
            id.segment,
            id.origin,
            reset.previous,
            reset.adopted,
            reset.dropped
        );
        Event::publish(
            &self.event_publisher,
            Event::ResetOrderQueue(ResetOrderQueueEvent {
                timestamp: SystemTime::now(),
                origin: id.origin,
                cache: id.cache.clone(),
                segment: id.segment,
                previous: reset.previous,
                adopted: reset.adopted,
                dropped: reset.dropped,
            }),
        );
    }

    fn on_discard(
        &self,
        id: &QueueId,
        topology_id: TopologyId,
        sequence: SequenceNumber,
        reason: DiscardReason,
    ) {
        Event::publish(
            &self.event_publisher,
            Event::DiscardBackupWrite(DiscardBackupWriteEvent {
                timestamp: SystemTime::now(),
                origin: id.origin,
                cache: id.cache.clone(),
                segment: id.segment,
                topology_id,
                sequence,
                reason,
            }),
        );
    }
}
