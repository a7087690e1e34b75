/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The compact, replayable description of "a write that already happened on the primary".
//!
//! When a write succeeds on the primary owner of a segment, the primary [encodes](encode::encode) the
//! outcome into a [`BackupWriteRecord`] and unicasts it to every backup owner of the segment. The
//! backup, once the record's turn in the segment's order comes, [reconstructs](reconstruct) an
//! executable [`WriteCommand`](crate::commands::WriteCommand) from it and runs it unconditionally.
//!
//! ## Wire layout
//!
//! Records are borsh-encoded in the declaration order of their fields:
//! 1. Cache name,
//! 2. Command invocation id,
//! 3. Topology id,
//! 4. Flags (64-bit set),
//! 5. Sequence number (64-bit unsigned),
//! 6. Segment id,
//! 7. Discriminant of the [`BackupWrite`] variant, followed by the variant's fields.
//!
//! Reordering fields or variants is a wire change.

use std::collections::{BTreeMap, BTreeSet};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::commands::FunctionalAccess;
use crate::types::{
    basic::{
        CacheName, CommandInvocationId, DataConversion, Flags, FunctionalParams, Key, Metadata,
        PrivateMetadata, SegmentId, SequenceNumber, TopologyId, Value,
    },
    functions::EntryFunction,
};

pub mod encode;

pub mod reconstruct;

pub use encode::encode;
pub use reconstruct::{reconstruct, Reconstructed};

#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct BackupWriteRecord {
    pub cache: CacheName,
    pub invocation_id: CommandInvocationId,
    pub topology_id: TopologyId,
    pub flags: Flags,
    pub sequence: SequenceNumber,
    pub segment: SegmentId,
    pub write: BackupWrite,
}

impl BackupWriteRecord {
    /// Whether this record only occupies its sequence number.
    pub fn is_noop(&self) -> bool {
        matches!(self.write, BackupWrite::Noop)
    }

    pub fn keys(&self) -> Vec<Key> {
        self.write.keys()
    }
}

/// The variant-specific part of a [`BackupWriteRecord`].
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub enum BackupWrite {
    SingleKey(SingleKeyWrite),
    MultiKeyFunctional(MultiKeyFunctionalWrite),
    MultiEntriesFunctional(MultiEntriesFunctionalWrite),
    BulkPut(BulkPutWrite),
    TombstoneRemoval(TombstoneRemovalWrite),

    /// Carries no payload. Sent for a sequence number the primary assigned but could not, or need not,
    /// fill with a real write, so that the backup's order does not stall waiting for it.
    Noop,
}

impl BackupWrite {
    pub fn keys(&self) -> Vec<Key> {
        match self {
            BackupWrite::SingleKey(write) => vec![write.key.clone()],
            BackupWrite::MultiKeyFunctional(write) => write.keys.iter().cloned().collect(),
            BackupWrite::MultiEntriesFunctional(write) => write.entries.keys().cloned().collect(),
            BackupWrite::BulkPut(write) => write.map.keys().cloned().collect(),
            BackupWrite::TombstoneRemoval(write) => write.tombstones.keys().cloned().collect(),
            BackupWrite::Noop => Vec::new(),
        }
    }
}

/// The operation a [`SingleKeyWrite`] replays.
#[derive(Clone, Copy, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub enum Operation {
    Write,
    Remove,
    RemoveExpired,
    Replace,
    Compute,
    ComputeIfPresent,
    ComputeIfAbsent,
}

/// Value or function a [`SingleKeyWrite`] carries, depending on its [`Operation`].
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub enum Payload {
    None,
    Value(Value),
    Function(EntryFunction),
}

#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct SingleKeyWrite {
    pub key: Key,
    pub operation: Operation,
    pub payload: Payload,
    pub metadata: Option<Metadata>,
    pub internal_metadata: Option<PrivateMetadata>,
}

/// A functional write over a set of keys. Only keys of the record's segment are carried.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct MultiKeyFunctionalWrite {
    pub keys: BTreeSet<Key>,
    pub access: FunctionalAccess,
    pub function: EntryFunction,
    pub params: FunctionalParams,
    pub conversion: DataConversion,
}

/// A functional write with one argument per key. Only entries of the record's segment are carried.
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct MultiEntriesFunctionalWrite {
    pub entries: BTreeMap<Key, Value>,
    pub access: FunctionalAccess,
    pub function: EntryFunction,
    pub params: FunctionalParams,
    pub conversion: DataConversion,
}

#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct BulkPutWrite {
    pub map: BTreeMap<Key, Value>,
    pub metadata: Option<Metadata>,
    pub internal_metadata: BTreeMap<Key, PrivateMetadata>,
}

#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub struct TombstoneRemovalWrite {
    pub tombstones: BTreeMap<Key, PrivateMetadata>,
}

/// A record or frame that peers running the same protocol version could never have produced. Indicates
/// a build or version mismatch between peers, and is never retried.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ProtocolViolation {
    /// The frame was written under a different wire or function registry version.
    UnsupportedVersion { wire: u8, functions: u8 },

    /// The frame could not be decoded, e.g., because of an unknown variant or operation tag, or the
    /// payload of a [`SingleKeyWrite`] does not fit its operation.
    MalformedRecord { reason: String },
}
