/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Executable writes: what the invocation pipeline runs on the primary, and what a backup rebuilds from
//! a [backup write record](crate::backup_write::BackupWriteRecord) and runs locally.
//!
//! Conditional writes (`put_if_absent`, `replace(expected, new)`, `remove(expected)`) are decided once, on
//! the primary. The backup must mirror that decision rather than re-evaluate it, so a backup always runs
//! the [unconditional form](WriteCommand::without_conditions) of a command.

use std::collections::{BTreeMap, BTreeSet};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::types::{
    basic::{
        CacheName, CommandInvocationId, DataConversion, Flags, FunctionalParams, Key, Metadata,
        PrivateMetadata, SegmentId, TopologyId, Value,
    },
    functions::EntryFunction,
    topology::KeyPartitioner,
};

/// Which variant of `compute` a [`WriteCommand::Compute`] is.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ComputeMode {
    Compute,
    IfPresent,
    IfAbsent,
}

/// Whether a functional write may read the entries it writes.
#[derive(Clone, Copy, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub enum FunctionalAccess {
    WriteOnly,
    ReadWrite,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum WriteCommand {
    Put {
        key: Key,
        value: Value,
        metadata: Option<Metadata>,
        private_metadata: Option<PrivateMetadata>,
        if_absent: bool,
    },
    Remove {
        key: Key,
        expected: Option<Value>,
        private_metadata: Option<PrivateMetadata>,
    },
    RemoveExpired {
        key: Key,
        value: Option<Value>,
        private_metadata: Option<PrivateMetadata>,
    },
    Replace {
        key: Key,
        expected: Option<Value>,
        new_value: Value,
        metadata: Option<Metadata>,
        private_metadata: Option<PrivateMetadata>,
    },
    Compute {
        key: Key,
        function: EntryFunction,
        mode: ComputeMode,
        metadata: Option<Metadata>,
        private_metadata: Option<PrivateMetadata>,
    },
    FunctionalManyKeys {
        keys: BTreeSet<Key>,
        access: FunctionalAccess,
        function: EntryFunction,
        params: FunctionalParams,
        conversion: DataConversion,
    },
    FunctionalManyEntries {
        entries: BTreeMap<Key, Value>,
        access: FunctionalAccess,
        function: EntryFunction,
        params: FunctionalParams,
        conversion: DataConversion,
    },
    PutMap {
        map: BTreeMap<Key, Value>,
        metadata: Option<Metadata>,
        private_metadata: BTreeMap<Key, PrivateMetadata>,
    },
    RemoveTombstones {
        tombstones: BTreeMap<Key, PrivateMetadata>,
    },
}

impl WriteCommand {
    /// Every key this command writes to, in ascending order.
    pub fn keys(&self) -> Vec<Key> {
        match self {
            WriteCommand::Put { key, .. }
            | WriteCommand::Remove { key, .. }
            | WriteCommand::RemoveExpired { key, .. }
            | WriteCommand::Replace { key, .. }
            | WriteCommand::Compute { key, .. } => vec![key.clone()],
            WriteCommand::FunctionalManyKeys { keys, .. } => keys.iter().cloned().collect(),
            WriteCommand::FunctionalManyEntries { entries, .. } => entries.keys().cloned().collect(),
            WriteCommand::PutMap { map, .. } => map.keys().cloned().collect(),
            WriteCommand::RemoveTombstones { tombstones } => tombstones.keys().cloned().collect(),
        }
    }

    /// The segments this command touches.
    pub fn segments(&self, partitioner: &dyn KeyPartitioner) -> BTreeSet<SegmentId> {
        self.keys()
            .iter()
            .map(|key| partitioner.segment_of(key))
            .collect()
    }

    /// The command a backup runs to mirror this command once it succeeded on the primary.
    pub fn without_conditions(self) -> WriteCommand {
        match self {
            WriteCommand::Put {
                key,
                value,
                metadata,
                private_metadata,
                ..
            } => WriteCommand::Put {
                key,
                value,
                metadata,
                private_metadata,
                if_absent: false,
            },
            WriteCommand::Remove {
                key,
                private_metadata,
                ..
            } => WriteCommand::Remove {
                key,
                expected: None,
                private_metadata,
            },
            WriteCommand::Replace {
                key,
                new_value,
                metadata,
                private_metadata,
                ..
            } => WriteCommand::Replace {
                key,
                expected: None,
                new_value,
                metadata,
                private_metadata,
            },
            other => other,
        }
    }
}

/// A write that already ran through the invocation pipeline on the primary owner.
#[derive(Clone, Debug)]
pub struct ExecutedWrite {
    pub cache: CacheName,
    pub invocation_id: CommandInvocationId,
    pub topology_id: TopologyId,
    pub flags: Flags,
    pub command: WriteCommand,

    /// Whether the write changed the primary's state. Unsuccessful conditional writes are not replicated.
    pub successful: bool,
}
