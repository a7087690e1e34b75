/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The primary's entry point: turning a locally executed write into backup write records.

use std::sync::{mpsc::Sender, Arc};

use crate::backup_write::encode::encode_write;
use crate::commands::ExecutedWrite;
use crate::events::Event;
use crate::networking::{network::Network, sending::SenderHandle};
use crate::types::{
    basic::{Address, CacheName, CommandInvocationId, Flags, SegmentId, SequenceNumber, TopologyId},
    topology::{CacheTopology, TopologyHandle},
};

use super::{
    reservation::SequenceReservation,
    sequencer::{PrimarySequencer, SequencerError},
};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ReplicationError {
    /// The write was executed under a topology other than the one currently installed. Whoever executed it
    /// must retry under the current topology.
    OutdatedTopology {
        current: TopologyId,
        write: TopologyId,
    },

    /// This node is not the primary owner of the segment.
    NotPrimary { segment: SegmentId },

    Sequencer(SequencerError),
}

impl From<SequencerError> for ReplicationError {
    fn from(value: SequencerError) -> Self {
        ReplicationError::Sequencer(value)
    }
}

/// Replicates the writes of one cache that this node executes as primary owner.
///
/// Cheap to clone. Clones share the sequencer, so writes from any clone are ordered together.
#[derive(Clone)]
pub struct PrimaryReplicator<N: Network> {
    me: Address,
    cache: CacheName,
    topology: TopologyHandle,
    sequencer: Arc<PrimarySequencer>,
    sender: SenderHandle<N>,
    event_publisher: Option<Sender<Event>>,
}

impl<N: Network> PrimaryReplicator<N> {
    pub(crate) fn new(
        me: Address,
        cache: CacheName,
        topology: TopologyHandle,
        sequencer: Arc<PrimarySequencer>,
        sender: SenderHandle<N>,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        Self {
            me,
            cache,
            topology,
            sequencer,
            sender,
            event_publisher,
        }
    }

    pub fn cache(&self) -> &CacheName {
        &self.cache
    }

    /// Replicate `executed` to the backup owners of every segment it wrote to, and return the sequence
    /// number assigned in each of those segments.
    ///
    /// Writes that were local-only or did not succeed are not replicated. Segments this node is not
    /// primary of, or that have no backups, are skipped.
    ///
    /// Sequence numbers are reserved in every segment before any record is sent. If a reservation fails
    /// (e.g., a newer topology was installed meanwhile), no real record is sent: the reservations already
    /// taken send no-ops instead, and the error is returned.
    pub fn on_local_write_executed(
        &self,
        executed: &ExecutedWrite,
    ) -> Result<Vec<(SegmentId, SequenceNumber)>, ReplicationError> {
        if executed.flags.contains(Flags::CACHE_MODE_LOCAL) || !executed.successful {
            return Ok(Vec::new());
        }

        let topology = self.topology.current();
        if executed.topology_id != topology.topology_id() {
            return Err(ReplicationError::OutdatedTopology {
                current: topology.topology_id(),
                write: executed.topology_id,
            });
        }

        let reservations = executed
            .command
            .segments(topology.partitioner())
            .into_iter()
            .filter(|segment| {
                topology.is_primary(&self.me, *segment) && !topology.backups(*segment).is_empty()
            })
            .map(|segment| {
                self.reserve_in(&topology, segment, executed.invocation_id, executed.flags)
            })
            .collect::<Result<Vec<SequenceReservation<N>>, ReplicationError>>()?;

        let mut assigned = Vec::with_capacity(reservations.len());
        for reservation in reservations {
            let segment = reservation.segment();
            assigned.push((segment, reservation.sequence()));
            reservation.send(encode_write(&executed.command, segment, topology.partitioner()));
        }

        Ok(assigned)
    }

    /// Reserve the next sequence number of `segment` under the current topology. For callers that build
    /// their own records: the reservation must be completed, or it sends no-ops when dropped.
    pub fn reserve(
        &self,
        segment: SegmentId,
        invocation_id: CommandInvocationId,
        flags: Flags,
    ) -> Result<SequenceReservation<N>, ReplicationError> {
        let topology = self.topology.current();
        self.reserve_in(&topology, segment, invocation_id, flags)
    }

    fn reserve_in(
        &self,
        topology: &CacheTopology,
        segment: SegmentId,
        invocation_id: CommandInvocationId,
        flags: Flags,
    ) -> Result<SequenceReservation<N>, ReplicationError> {
        if !topology.is_primary(&self.me, segment) {
            return Err(ReplicationError::NotPrimary { segment });
        }

        let sequence = self
            .sequencer
            .next_sequence(segment, topology.topology_id())?;

        Ok(SequenceReservation::new(
            self.cache.clone(),
            segment,
            topology.topology_id(),
            sequence,
            invocation_id,
            flags,
            topology.backups(segment).to_vec(),
            self.sender.clone(),
            self.event_publisher.clone(),
        ))
    }
}
