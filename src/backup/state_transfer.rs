/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The seam to the state transfer subsystem, which repairs a segment a backup could not keep in order.

use std::sync::Arc;

use crate::types::basic::{Address, CacheName, SegmentId, SequenceNumber, TopologyId};

/// A request to bring `segment` of `cache` back in sync with its primary `origin`.
///
/// Records with sequence numbers in `missing_from..missing_to` were skipped by the backup and will never
/// be applied from the order queue.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ResyncRequest {
    pub origin: Address,
    pub cache: CacheName,
    pub segment: SegmentId,
    pub topology_id: TopologyId,
    pub missing_from: SequenceNumber,
    pub missing_to: SequenceNumber,
}

pub trait StateTransfer: Send + Sync + 'static {
    /// Called from the receiving thread. Must not block.
    fn request_segment_resync(&self, request: &ResyncRequest);
}

impl<T: StateTransfer> StateTransfer for Arc<T> {
    fn request_segment_resync(&self, request: &ResyncRequest) {
        self.as_ref().request_segment_resync(request)
    }
}

/// A [`StateTransfer`] that only logs requests. For nodes that rely on periodic, external reconciliation.
#[derive(Clone, Copy, Default, Debug)]
pub struct LoggingStateTransfer;

impl StateTransfer for LoggingStateTransfer {
    fn request_segment_resync(&self, request: &ResyncRequest) {
        log::warn!(
            "Segment {} of cache {} needs a resync from {}: sequences {}..{} of topology {} were skipped",
            request.segment,
            request.cache,
            request.origin,
            request.missing_from,
            request.missing_to,
            request.topology_id
        );
    }
}
