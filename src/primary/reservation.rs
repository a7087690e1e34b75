/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A sequence number that must reach every backup owner.

use std::{sync::mpsc::Sender, time::SystemTime};

use crate::backup_write::{BackupWrite, BackupWriteRecord};
use crate::events::{Event, SendBackupWriteEvent};
use crate::networking::{network::Network, sending::SenderHandle};
use crate::types::basic::{
    Address, CacheName, CommandInvocationId, Flags, SegmentId, SequenceNumber, TopologyId,
};

/// A sequence number taken from the [sequencer](super::sequencer::PrimarySequencer), together with the
/// backup owners of its segment at the time it was taken.
///
/// Completing the reservation with [`send`](Self::send) or [`send_per_backup`](Self::send_per_backup) sends
/// one record per backup. Dropping it without completing it sends a no-op for the reserved sequence
/// number to every backup instead, so that no backup's order queue waits for it forever.
pub struct SequenceReservation<N: Network> {
    cache: CacheName,
    segment: SegmentId,
    topology_id: TopologyId,
    sequence: SequenceNumber,
    invocation_id: CommandInvocationId,
    flags: Flags,
    backups: Vec<Address>,
    sender: SenderHandle<N>,
    event_publisher: Option<Sender<Event>>,
    completed: bool,
}

impl<N: Network> SequenceReservation<N> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        cache: CacheName,
        segment: SegmentId,
        topology_id: TopologyId,
        sequence: SequenceNumber,
        invocation_id: CommandInvocationId,
        flags: Flags,
        backups: Vec<Address>,
        sender: SenderHandle<N>,
        event_publisher: Option<Sender<Event>>,
    ) -> Self {
        Self {
            cache,
            segment,
            topology_id,
            sequence,
            invocation_id,
            flags,
            backups,
            sender,
            event_publisher,
            completed: false,
        }
    }

    pub fn sequence(&self) -> SequenceNumber {
        self.sequence
    }

    pub fn segment(&self) -> SegmentId {
        self.segment
    }

    pub fn topology_id(&self) -> TopologyId {
        self.topology_id
    }

    pub fn backups(&self) -> &[Address] {
        &self.backups
    }

    /// Send `write` to every backup.
    pub fn send(self, write: BackupWrite) {
        self.send_per_backup(|_| write.clone())
    }

    /// Send each backup the write `write_for` returns for it. Backups a write does not concern must be
    /// given [`BackupWrite::Noop`].
    pub fn send_per_backup(mut self, mut write_for: impl FnMut(Address) -> BackupWrite) {
        self.completed = true;
        for backup in self.backups.clone() {
            let write = write_for(backup);
            self.send_to(backup, write);
        }
    }

    fn send_to(&mut self, backup: Address, write: BackupWrite) {
        let record = BackupWriteRecord {
            cache: self.cache.clone(),
            invocation_id: self.invocation_id,
            topology_id: self.topology_id,
            flags: self.flags,
            sequence: self.sequence,
            segment: self.segment,
            write,
        };
        let noop = record.is_noop();
        self.sender.send(backup, record);

        Event::publish(
            &self.event_publisher,
            Event::SendBackupWrite(SendBackupWriteEvent {
                timestamp: SystemTime::now(),
                peer: backup,
                cache: self.cache.clone(),
                segment: self.segment,
                topology_id: self.topology_id,
                sequence: self.sequence,
                noop,
            }),
        );
    }
}

impl<N: Network> Drop for SequenceReservation<N> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        log::debug!(
            "Sequence {} of {}/{} was reserved but not used, sending a no-op to {} backups",
            self.sequence,
            self.cache,
            self.segment,
            self.backups.len()
        );
        self.completed = true;
        for backup in self.backups.clone() {
            self.send_to(backup, BackupWrite::Noop);
        }
    }
}
