/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of the events a node emits while replicating writes.
//!
//! An event for a given action indicates that the action has been completed. Events are published on a
//! channel by the thread that performed the action, and fired on user-registered handlers (see
//! [`NodeSpec`](crate::node::NodeSpec)) by the [event bus](crate::event_bus) thread. If
//! [`Configuration::log_events`](crate::node::Configuration::log_events) is set, every event is also
//! [logged](crate::logging).

use std::{sync::mpsc::Sender, time::SystemTime};

use crate::{
    backup::{
        order_queue::DiscardReason, pipeline::ApplyError, state_transfer::ResyncRequest,
    },
    types::basic::{Address, CacheName, Key, SegmentId, SequenceNumber, TopologyId},
};

pub enum Event {
    // Events emitted by the primary side.
    SendBackupWrite(SendBackupWriteEvent),

    // Events emitted by the backup side.
    ReceiveBackupWrite(ReceiveBackupWriteEvent),
    ApplyBackupWrite(ApplyBackupWriteEvent),
    DiscardBackupWrite(DiscardBackupWriteEvent),
    ApplyFailure(ApplyFailureEvent),
    ResetOrderQueue(ResetOrderQueueEvent),
    BufferOverflow(BufferOverflowEvent),
}

impl Event {
    /// Publish `event` if anyone is listening. A closed event bus is not an error: events are
    /// diagnostics only.
    pub(crate) fn publish(event_publisher: &Option<Sender<Event>>, event: Event) {
        if let Some(event_publisher) = event_publisher {
            let _ = event_publisher.send(event);
        }
    }
}

/// A backup write record, or a no-op filling its sequence number, was sent to a backup owner.
pub struct SendBackupWriteEvent {
    pub timestamp: SystemTime,
    pub peer: Address,
    pub cache: CacheName,
    pub segment: SegmentId,
    pub topology_id: TopologyId,
    pub sequence: SequenceNumber,
    pub noop: bool,
}

/// A backup write record arrived from the primary `origin`, and is about to be admitted to its queue.
pub struct ReceiveBackupWriteEvent {
    pub timestamp: SystemTime,
    pub origin: Address,
    pub cache: CacheName,
    pub segment: SegmentId,
    pub topology_id: TopologyId,
    pub sequence: SequenceNumber,
}

/// A backup write record was applied to local state, or consumed without effect if it was a no-op.
pub struct ApplyBackupWriteEvent {
    pub timestamp: SystemTime,
    pub origin: Address,
    pub cache: CacheName,
    pub segment: SegmentId,
    pub topology_id: TopologyId,
    pub sequence: SequenceNumber,
    pub keys: Vec<Key>,
}

pub struct DiscardBackupWriteEvent {
    pub timestamp: SystemTime,
    pub origin: Address,
    pub cache: CacheName,
    pub segment: SegmentId,
    pub topology_id: TopologyId,
    pub sequence: SequenceNumber,
    pub reason: DiscardReason,
}

/// Applying a backup write record failed on this node. The record's queue moved on regardless.
pub struct ApplyFailureEvent {
    pub timestamp: SystemTime,
    pub origin: Address,
    pub cache: CacheName,
    pub segment: SegmentId,
    pub topology_id: TopologyId,
    pub sequence: SequenceNumber,
    pub error: ApplyError,
}

/// An order queue adopted a newer topology, dropping every record it buffered for the old one.
pub struct ResetOrderQueueEvent {
    pub timestamp: SystemTime,
    pub origin: Address,
    pub cache: CacheName,
    pub segment: SegmentId,
    pub previous: TopologyId,
    pub adopted: TopologyId,
    pub dropped: usize,
}

/// An order queue's buffer of early arrivals overflowed, and a resync of the segment was requested.
pub struct BufferOverflowEvent {
    pub timestamp: SystemTime,
    pub request: ResyncRequest,
}
