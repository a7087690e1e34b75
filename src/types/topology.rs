/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The view this crate needs of the cluster's consistent-hash topology.
//!
//! Computing owners is the job of an external topology component. It publishes each new assignment by
//! [installing](TopologyHandle::install) a [`CacheTopology`], which tells the triangle protocol:
//! 1. Which segment a key belongs to (through a [`KeyPartitioner`]),
//! 2. Which node is the primary owner of a segment, and which nodes are its backup owners,
//! 3. Which topology id the assignment was made under.

use std::{
    fmt::{self, Debug, Formatter},
    sync::{Arc, RwLock},
};

use sha2::{Digest, Sha256};

use super::basic::{Address, Key, SegmentId, TopologyId};

/// Maps keys to segments.
pub trait KeyPartitioner: Send + Sync {
    /// Number of segments keys are spread over. Fixed for the lifetime of a cache.
    fn num_segments(&self) -> u32;

    /// The segment `key` belongs to. Must be lower than [`num_segments`](Self::num_segments).
    fn segment_of(&self, key: &Key) -> SegmentId;
}

/// Default [`KeyPartitioner`]: the first eight bytes of the SHA-256 digest of the key, read big-endian,
/// modulo the number of segments.
#[derive(Clone, Copy, Debug)]
pub struct HashPartitioner {
    num_segments: u32,
}

impl HashPartitioner {
    /// # Panics
    /// `num_segments` must not be zero.
    pub fn new(num_segments: u32) -> Self {
        assert!(num_segments > 0, "a cache must have at least one segment");
        Self { num_segments }
    }
}

impl KeyPartitioner for HashPartitioner {
    fn num_segments(&self) -> u32 {
        self.num_segments
    }

    fn segment_of(&self, key: &Key) -> SegmentId {
        let digest = Sha256::digest(key.bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        SegmentId::new((u64::from_be_bytes(prefix) % self.num_segments as u64) as u32)
    }
}

/// Owners of a single segment.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SegmentOwners {
    pub primary: Address,
    pub backups: Vec<Address>,
}

impl SegmentOwners {
    pub fn new(primary: Address, backups: Vec<Address>) -> Self {
        Self { primary, backups }
    }

    pub fn is_owner(&self, node: &Address) -> bool {
        self.primary == *node || self.backups.contains(node)
    }
}

/// One assignment of segments to owners, identified by its [`TopologyId`].
#[derive(Clone)]
pub struct CacheTopology {
    topology_id: TopologyId,
    owners: Vec<SegmentOwners>,
    partitioner: Arc<dyn KeyPartitioner>,
}

impl CacheTopology {
    /// Create a topology whose keys are partitioned by a [`HashPartitioner`] over `owners.len()` segments.
    pub fn new(topology_id: TopologyId, owners: Vec<SegmentOwners>) -> Self {
        let partitioner = Arc::new(HashPartitioner::new(owners.len() as u32));
        Self::with_partitioner(topology_id, owners, partitioner)
    }

    /// # Panics
    /// `owners` must hold exactly one entry per segment of `partitioner`.
    pub fn with_partitioner(
        topology_id: TopologyId,
        owners: Vec<SegmentOwners>,
        partitioner: Arc<dyn KeyPartitioner>,
    ) -> Self {
        assert_eq!(
            owners.len(),
            partitioner.num_segments() as usize,
            "every segment must have owners"
        );
        Self {
            topology_id,
            owners,
            partitioner,
        }
    }

    pub fn topology_id(&self) -> TopologyId {
        self.topology_id
    }

    pub fn num_segments(&self) -> u32 {
        self.partitioner.num_segments()
    }

    pub fn partitioner(&self) -> &dyn KeyPartitioner {
        self.partitioner.as_ref()
    }

    pub fn segment_of(&self, key: &Key) -> SegmentId {
        self.partitioner.segment_of(key)
    }

    pub fn owners(&self, segment: SegmentId) -> Option<&SegmentOwners> {
        self.owners.get(segment.index())
    }

    pub fn primary(&self, segment: SegmentId) -> Option<Address> {
        self.owners(segment).map(|owners| owners.primary)
    }

    /// Backup owners of `segment`. Empty for unknown segments.
    pub fn backups(&self, segment: SegmentId) -> &[Address] {
        self.owners(segment)
            .map(|owners| owners.backups.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_primary(&self, node: &Address, segment: SegmentId) -> bool {
        self.primary(segment).as_ref() == Some(node)
    }

    /// A copy of this topology with `topology_id` replaced. Convenient for topology components that
    /// bump the id without moving segments.
    pub fn with_topology_id(&self, topology_id: TopologyId) -> Self {
        Self {
            topology_id,
            owners: self.owners.clone(),
            partitioner: self.partitioner.clone(),
        }
    }
}

impl Debug for CacheTopology {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheTopology")
            .field("topology_id", &self.topology_id)
            .field("owners", &self.owners)
            .finish()
    }
}

/// Shared, swappable reference to the current [`CacheTopology`] of a cache.
#[derive(Clone)]
pub struct TopologyHandle(Arc<RwLock<Arc<CacheTopology>>>);

impl TopologyHandle {
    pub fn new(topology: CacheTopology) -> Self {
        Self(Arc::new(RwLock::new(Arc::new(topology))))
    }

    /// The topology currently installed.
    pub fn current(&self) -> Arc<CacheTopology> {
        match self.0.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Install `topology` if it is newer than the current one. Returns whether it was installed.
    pub fn install(&self, topology: CacheTopology) -> bool {
        let mut guard = match self.0.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if topology.topology_id() <= guard.topology_id() {
            return false;
        }
        *guard = Arc::new(topology);
        true
    }
}
