/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Per-segment sequence numbers for one cache.
//!
//! Sequence numbers are counted per (segment, topology). The call to
//! [`next_sequence`](PrimarySequencer::next_sequence) that returns first is the one whose write backups
//! apply first: it is the linearization point of the segment's backup order.
//!
//! When the cache's topology advances, every counter starts again from zero. Backups reset their order
//! queues on the same event, so no backup ever waits for a number from a retired topology.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, RwLock,
};

use crate::types::basic::{SegmentId, SequenceNumber, TopologyId};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SequencerError {
    /// The caller's topology is older than the one the sequencer counts for.
    OutdatedTopology {
        current: TopologyId,
        requested: TopologyId,
    },

    UnknownSegment {
        segment: SegmentId,
        num_segments: u32,
    },
}

pub struct PrimarySequencer {
    epoch: RwLock<Arc<EpochCounters>>,
}

struct EpochCounters {
    topology_id: TopologyId,
    counters: Vec<AtomicU64>,
}

impl EpochCounters {
    fn new(topology_id: TopologyId, num_segments: u32) -> Self {
        Self {
            topology_id,
            counters: (0..num_segments).map(|_| AtomicU64::new(0)).collect(),
        }
    }
}

impl PrimarySequencer {
    /// Count `num_segments` segments. Later topologies keep the same segment count.
    pub fn new(topology_id: TopologyId, num_segments: u32) -> Self {
        Self {
            epoch: RwLock::new(Arc::new(EpochCounters::new(topology_id, num_segments))),
        }
    }

    /// The topology the sequencer currently counts for.
    pub fn topology_id(&self) -> TopologyId {
        self.current_epoch().topology_id
    }

    /// Take the next sequence number of `segment` under `topology_id`.
    ///
    /// A `topology_id` newer than the current one starts a new epoch, with every counter at zero. Lock-free
    /// unless that happens.
    pub fn next_sequence(
        &self,
        segment: SegmentId,
        topology_id: TopologyId,
    ) -> Result<SequenceNumber, SequencerError> {
        let mut epoch = self.current_epoch();
        if topology_id > epoch.topology_id {
            epoch = self.advance_to(topology_id);
        }
        if topology_id < epoch.topology_id {
            return Err(SequencerError::OutdatedTopology {
                current: epoch.topology_id,
                requested: topology_id,
            });
        }

        let counter = epoch
            .counters
            .get(segment.index())
            .ok_or(SequencerError::UnknownSegment {
                segment,
                num_segments: epoch.counters.len() as u32,
            })?;
        let sequence = SequenceNumber::new(counter.fetch_add(1, Ordering::SeqCst));

        log::debug!(
            "Assigned sequence {} of segment {} in topology {}",
            sequence,
            segment,
            topology_id
        );
        Ok(sequence)
    }

    fn current_epoch(&self) -> Arc<EpochCounters> {
        match self.epoch.read() {
            Ok(epoch) => epoch.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Start counting for `topology_id` unless another caller already did, or moved past it.
    fn advance_to(&self, topology_id: TopologyId) -> Arc<EpochCounters> {
        let mut epoch = match self.epoch.write() {
            Ok(epoch) => epoch,
            Err(poisoned) => poisoned.into_inner(),
        };
        if topology_id > epoch.topology_id {
            log::debug!(
                "Sequencer moves from topology {} to {}",
                epoch.topology_id,
                topology_id
            );
            *epoch = Arc::new(EpochCounters::new(topology_id, epoch.counters.len() as u32));
        }
        epoch.clone()
    }
}
