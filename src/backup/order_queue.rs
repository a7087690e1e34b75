/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The state machine that restores the primary's order for one (primary, cache, segment).
//!
//! An [`OrderQueue`] tracks the topology it accepts, the next sequence number it expects, and the records
//! that arrived early. [Admitting](OrderQueue::admit) a record with sequence `s` and topology `t`:
//! 1. If `t` is older than the accepted topology, discards the record.
//! 2. If `t` is newer, resets the queue (expected back to 0, early arrivals and unapplied records
//!    dropped) and accepts `t`.
//! 3. If `s` is lower than expected, or already buffered, discards the record as a duplicate.
//! 4. If `s` is the expected number, releases the record and every buffered record that follows it
//!    contiguously.
//! 5. Otherwise buffers the record, unless the buffer is full. See [overflow](#overflow).
//!
//! Released records wait in the queue until the engine [takes](OrderQueue::take_next) them, in sequence
//! order, for applying.
//!
//! ## Overflow
//!
//! The buffer of early arrivals holds at most `capacity` records. A record arriving when it is full means
//! the gap before the lowest buffered record is unlikely to ever be filled (e.g., a no-op was lost). The
//! queue then gives up on the gap: it buffers the record anyway, asks for a [`ResyncRequest`] covering the
//! missing sequence numbers, jumps expected to the lowest buffered record, and releases what became
//! contiguous. Records from the skipped range that still arrive are then discarded as duplicates.

use std::collections::{BTreeMap, VecDeque};

use crate::backup_write::{BackupWriteRecord, ProtocolViolation};
use crate::types::basic::{Address, CacheName, SegmentId, SequenceNumber, TopologyId};

use super::state_transfer::ResyncRequest;

/// Identifies the order queue a record belongs to.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct QueueId {
    /// The primary that sent the record.
    pub origin: Address,
    pub cache: CacheName,
    pub segment: SegmentId,
}

impl QueueId {
    pub fn of(origin: Address, record: &BackupWriteRecord) -> QueueId {
        QueueId {
            origin,
            cache: record.cache.clone(),
            segment: record.segment,
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum DiscardReason {
    /// The record was made under a topology older than the accepted one.
    StaleTopology { accepted: TopologyId },

    /// The record's sequence number was already released or buffered.
    Duplicate { expected: SequenceNumber },

    /// The record could not be reconstructed.
    ProtocolViolation(ProtocolViolation),
}

/// What admitting a record did to it.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Admission {
    /// The record was the expected one. It and `count - 1` buffered records were released.
    Released { count: usize },

    /// The record arrived early and waits for the gap before it to be filled.
    Buffered,

    Discarded(DiscardReason),

    /// The record overflowed the buffer. The queue skipped the gap described by `request` and released
    /// `count` records.
    Overflow { request: ResyncRequest, count: usize },
}

/// An epoch change of a queue.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct QueueReset {
    pub previous: TopologyId,
    pub adopted: TopologyId,

    /// Number of buffered or released records that were dropped without being applied.
    pub dropped: usize,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct AdmitReport {
    pub admission: Admission,

    /// Set if the record's topology superseded the accepted one.
    pub reset: Option<QueueReset>,
}

pub struct OrderQueue {
    id: QueueId,
    topology_id: Option<TopologyId>,
    expected: SequenceNumber,
    pending: BTreeMap<SequenceNumber, BackupWriteRecord>,
    ready: VecDeque<BackupWriteRecord>,
    capacity: usize,
    draining: bool,
}

impl OrderQueue {
    /// Create an empty queue that buffers at most `capacity` early arrivals (at least one).
    pub fn new(id: QueueId, capacity: usize) -> OrderQueue {
        OrderQueue {
            id,
            topology_id: None,
            expected: SequenceNumber::ZERO,
            pending: BTreeMap::new(),
            ready: VecDeque::new(),
            capacity: capacity.max(1),
            draining: false,
        }
    }

    pub fn id(&self) -> &QueueId {
        &self.id
    }

    /// The topology accepted by this queue, if it has admitted any record yet.
    pub fn topology_id(&self) -> Option<TopologyId> {
        self.topology_id
    }

    /// The sequence number the queue releases next.
    pub fn expected(&self) -> SequenceNumber {
        self.expected
    }

    /// Number of early arrivals waiting for a gap to be filled.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Number of released records not yet taken for applying.
    pub fn ready_len(&self) -> usize {
        self.ready.len()
    }

    pub fn admit(&mut self, record: BackupWriteRecord) -> AdmitReport {
        let reset = match self.topology_id {
            Some(accepted) if record.topology_id < accepted => {
                return AdmitReport {
                    admission: Admission::Discarded(DiscardReason::StaleTopology { accepted }),
                    reset: None,
                }
            }
            Some(accepted) if record.topology_id > accepted => {
                Some(self.reset(accepted, record.topology_id))
            }
            Some(_) => None,
            None => {
                self.topology_id = Some(record.topology_id);
                None
            }
        };

        AdmitReport {
            admission: self.admit_in_epoch(record),
            reset,
        }
    }

    /// Move the queue to `topology_id` if it is newer than the accepted topology, dropping everything it
    /// holds for the old one. A queue that has not accepted any topology yet just adopts it.
    pub fn reset_to(&mut self, topology_id: TopologyId) -> Option<QueueReset> {
        match self.topology_id {
            Some(accepted) if topology_id > accepted => Some(self.reset(accepted, topology_id)),
            Some(_) => None,
            None => {
                self.topology_id = Some(topology_id);
                None
            }
        }
    }

    /// Take the next released record for applying. Records are taken in strictly increasing sequence
    /// order.
    pub fn take_next(&mut self) -> Option<BackupWriteRecord> {
        let record = self.ready.pop_front();
        if record.is_none() {
            self.draining = false;
        }
        record
    }

    /// Whether no released record is waiting or being applied. Buffered early arrivals do not count.
    pub fn is_idle(&self) -> bool {
        self.ready.is_empty() && !self.draining
    }

    /// Claim the right to drain this queue. Returns false if there is nothing to drain or another drain is
    /// in flight. The claim ends when [`take_next`](Self::take_next) returns None.
    pub(crate) fn begin_drain(&mut self) -> bool {
        if self.draining || self.ready.is_empty() {
            return false;
        }
        self.draining = true;
        true
    }

    fn admit_in_epoch(&mut self, record: BackupWriteRecord) -> Admission {
        let sequence = record.sequence;

        if sequence < self.expected || self.pending.contains_key(&sequence) {
            return Admission::Discarded(DiscardReason::Duplicate {
                expected: self.expected,
            });
        }

        if sequence == self.expected {
            self.ready.push_back(record);
            self.expected = self.expected.next();
            let count = 1 + self.release_contiguous();
            return Admission::Released { count };
        }

        if self.pending.len() < self.capacity {
            self.pending.insert(sequence, record);
            return Admission::Buffered;
        }

        self.pending.insert(sequence, record);
        self.skip_gap()
    }

    fn skip_gap(&mut self) -> Admission {
        // The buffer is not empty: a record was just inserted into it.
        let lowest = match self.pending.keys().next() {
            Some(lowest) => *lowest,
            None => return Admission::Buffered,
        };

        let request = ResyncRequest {
            origin: self.id.origin,
            cache: self.id.cache.clone(),
            segment: self.id.segment,
            topology_id: self.topology_id.unwrap_or(TopologyId::new(0)),
            missing_from: self.expected,
            missing_to: lowest,
        };

        self.expected = lowest;
        let count = self.release_contiguous();
        Admission::Overflow { request, count }
    }

    fn release_contiguous(&mut self) -> usize {
        let mut count = 0;
        while let Some(record) = self.pending.remove(&self.expected) {
            self.ready.push_back(record);
            self.expected = self.expected.next();
            count += 1;
        }
        count
    }

    fn reset(&mut self, previous: TopologyId, adopted: TopologyId) -> QueueReset {
        let dropped = self.pending.len() + self.ready.len();
        self.pending.clear();
        self.ready.clear();
        self.expected = SequenceNumber::ZERO;
        self.topology_id = Some(adopted);
        QueueReset {
            previous,
            adopted,
            dropped,
        }
    }
}
