/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Encoding an executed write into the [`BackupWriteRecord`] destined for one segment.
//!
//! A record sent for segment `S` carries only the keys of `S`. Multi-key and multi-entry writes are
//! filtered with the pure transforms in this module before the record is built. If filtering leaves
//! nothing, the record is a [`BackupWrite::Noop`]: the sequence number was assigned and must still be
//! delivered.

use std::collections::{BTreeMap, BTreeSet};

use crate::commands::{ComputeMode, ExecutedWrite, WriteCommand};
use crate::types::{
    basic::{Key, PrivateMetadata, SegmentId, SequenceNumber},
    topology::KeyPartitioner,
};

use super::{
    BackupWrite, BackupWriteRecord, BulkPutWrite, MultiEntriesFunctionalWrite,
    MultiKeyFunctionalWrite, Operation, Payload, SingleKeyWrite, TombstoneRemovalWrite,
};

/// Encode `executed` into the record for `segment`, stamped with `sequence`.
pub fn encode(
    executed: &ExecutedWrite,
    segment: SegmentId,
    sequence: SequenceNumber,
    partitioner: &dyn KeyPartitioner,
) -> BackupWriteRecord {
    BackupWriteRecord {
        cache: executed.cache.clone(),
        invocation_id: executed.invocation_id,
        topology_id: executed.topology_id,
        flags: executed.flags,
        sequence,
        segment,
        write: encode_write(&executed.command, segment, partitioner),
    }
}

/// The variant-specific part of [`encode`].
pub fn encode_write(
    command: &WriteCommand,
    segment: SegmentId,
    partitioner: &dyn KeyPartitioner,
) -> BackupWrite {
    match command {
        WriteCommand::Put { key, .. }
        | WriteCommand::Remove { key, .. }
        | WriteCommand::RemoveExpired { key, .. }
        | WriteCommand::Replace { key, .. }
        | WriteCommand::Compute { key, .. }
            if partitioner.segment_of(key) != segment =>
        {
            BackupWrite::Noop
        }

        WriteCommand::Put {
            key,
            value,
            metadata,
            private_metadata,
            ..
        } => BackupWrite::SingleKey(SingleKeyWrite {
            key: key.clone(),
            operation: Operation::Write,
            payload: Payload::Value(value.clone()),
            metadata: metadata.clone(),
            internal_metadata: private_metadata.clone(),
        }),

        WriteCommand::Remove {
            key,
            private_metadata,
            ..
        } => BackupWrite::SingleKey(SingleKeyWrite {
            key: key.clone(),
            operation: Operation::Remove,
            payload: Payload::None,
            metadata: None,
            internal_metadata: private_metadata.clone(),
        }),

        WriteCommand::RemoveExpired {
            key,
            value,
            private_metadata,
        } => BackupWrite::SingleKey(SingleKeyWrite {
            key: key.clone(),
            operation: Operation::RemoveExpired,
            payload: value.clone().map_or(Payload::None, Payload::Value),
            metadata: None,
            internal_metadata: private_metadata.clone(),
        }),

        WriteCommand::Replace {
            key,
            new_value,
            metadata,
            private_metadata,
            ..
        } => BackupWrite::SingleKey(SingleKeyWrite {
            key: key.clone(),
            operation: Operation::Replace,
            payload: Payload::Value(new_value.clone()),
            metadata: metadata.clone(),
            internal_metadata: private_metadata.clone(),
        }),

        WriteCommand::Compute {
            key,
            function,
            mode,
            metadata,
            private_metadata,
        } => BackupWrite::SingleKey(SingleKeyWrite {
            key: key.clone(),
            operation: match mode {
                ComputeMode::Compute => Operation::Compute,
                ComputeMode::IfPresent => Operation::ComputeIfPresent,
                ComputeMode::IfAbsent => Operation::ComputeIfAbsent,
            },
            payload: Payload::Function(function.clone()),
            metadata: metadata.clone(),
            internal_metadata: private_metadata.clone(),
        }),

        WriteCommand::FunctionalManyKeys {
            keys,
            access,
            function,
            params,
            conversion,
        } => {
            let keys = keys_in_segment(keys, segment, partitioner);
            if keys.is_empty() {
                return BackupWrite::Noop;
            }
            BackupWrite::MultiKeyFunctional(MultiKeyFunctionalWrite {
                keys,
                access: *access,
                function: function.clone(),
                params: *params,
                conversion: conversion.clone(),
            })
        }

        WriteCommand::FunctionalManyEntries {
            entries,
            access,
            function,
            params,
            conversion,
        } => {
            let entries = entries_in_segment(entries, segment, partitioner);
            if entries.is_empty() {
                return BackupWrite::Noop;
            }
            BackupWrite::MultiEntriesFunctional(MultiEntriesFunctionalWrite {
                entries,
                access: *access,
                function: function.clone(),
                params: *params,
                conversion: conversion.clone(),
            })
        }

        WriteCommand::PutMap {
            map,
            metadata,
            private_metadata,
        } => {
            let map = entries_in_segment(map, segment, partitioner);
            if map.is_empty() {
                return BackupWrite::Noop;
            }
            let internal_metadata = internal_metadata_for(map.keys(), private_metadata);
            BackupWrite::BulkPut(BulkPutWrite {
                map,
                metadata: metadata.clone(),
                internal_metadata,
            })
        }

        WriteCommand::RemoveTombstones { tombstones } => {
            let tombstones = entries_in_segment(tombstones, segment, partitioner);
            if tombstones.is_empty() {
                return BackupWrite::Noop;
            }
            BackupWrite::TombstoneRemoval(TombstoneRemovalWrite { tombstones })
        }
    }
}

/// The keys of `keys` that belong to `segment`.
pub fn keys_in_segment(
    keys: &BTreeSet<Key>,
    segment: SegmentId,
    partitioner: &dyn KeyPartitioner,
) -> BTreeSet<Key> {
    keys.iter()
        .filter(|key| partitioner.segment_of(key) == segment)
        .cloned()
        .collect()
}

/// The entries of `entries` whose keys belong to `segment`.
pub fn entries_in_segment<V: Clone>(
    entries: &BTreeMap<Key, V>,
    segment: SegmentId,
    partitioner: &dyn KeyPartitioner,
) -> BTreeMap<Key, V> {
    entries
        .iter()
        .filter(|(key, _)| partitioner.segment_of(key) == segment)
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// The private metadata in `source` of each of `keys`. Keys without private metadata are left out.
pub fn internal_metadata_for<'a>(
    keys: impl IntoIterator<Item = &'a Key>,
    source: &BTreeMap<Key, PrivateMetadata>,
) -> BTreeMap<Key, PrivateMetadata> {
    keys.into_iter()
        .filter_map(|key| {
            source
                .get(key)
                .map(|metadata| (key.clone(), metadata.clone()))
        })
        .collect()
}
