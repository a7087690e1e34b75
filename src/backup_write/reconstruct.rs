/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Rebuilding an executable [`WriteCommand`] from a [`BackupWrite`].
//!
//! The rebuilt command is always the unconditional form: the primary already decided the outcome of any
//! condition, and the backup only mirrors it.

use crate::commands::{ComputeMode, WriteCommand};
use crate::types::{basic::Key, functions::EntryFunction};

use super::{BackupWrite, Operation, Payload, ProtocolViolation, SingleKeyWrite};

/// What a backup does with a record once its turn comes.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Reconstructed {
    Apply(WriteCommand),

    /// Nothing to run. The record's sequence number is consumed.
    Noop,
}

pub fn reconstruct(write: &BackupWrite) -> Result<Reconstructed, ProtocolViolation> {
    let command = match write {
        BackupWrite::Noop => return Ok(Reconstructed::Noop),

        BackupWrite::SingleKey(write) => single_key(write)?,

        BackupWrite::MultiKeyFunctional(write) => WriteCommand::FunctionalManyKeys {
            keys: write.keys.clone(),
            access: write.access,
            function: write.function.clone(),
            params: write.params,
            conversion: write.conversion.clone(),
        },

        BackupWrite::MultiEntriesFunctional(write) => WriteCommand::FunctionalManyEntries {
            entries: write.entries.clone(),
            access: write.access,
            function: write.function.clone(),
            params: write.params,
            conversion: write.conversion.clone(),
        },

        BackupWrite::BulkPut(write) => WriteCommand::PutMap {
            map: write.map.clone(),
            metadata: write.metadata.clone(),
            private_metadata: write.internal_metadata.clone(),
        },

        BackupWrite::TombstoneRemoval(write) => WriteCommand::RemoveTombstones {
            tombstones: write.tombstones.clone(),
        },
    };

    Ok(Reconstructed::Apply(command))
}

fn single_key(write: &SingleKeyWrite) -> Result<WriteCommand, ProtocolViolation> {
    let key = write.key.clone();
    let metadata = write.metadata.clone();
    let private_metadata = write.internal_metadata.clone();

    let command = match (write.operation, &write.payload) {
        (Operation::Write, Payload::Value(value)) => WriteCommand::Put {
            key,
            value: value.clone(),
            metadata,
            private_metadata,
            if_absent: false,
        },

        (Operation::Remove, Payload::None) => WriteCommand::Remove {
            key,
            expected: None,
            private_metadata,
        },

        (Operation::RemoveExpired, Payload::None) => WriteCommand::RemoveExpired {
            key,
            value: None,
            private_metadata,
        },
        (Operation::RemoveExpired, Payload::Value(value)) => WriteCommand::RemoveExpired {
            key,
            value: Some(value.clone()),
            private_metadata,
        },

        // The primary's expected-value check already passed.
        (Operation::Replace, Payload::Value(value)) => WriteCommand::Replace {
            key,
            expected: None,
            new_value: value.clone(),
            metadata,
            private_metadata,
        },

        (Operation::Compute, Payload::Function(function)) => {
            compute(key, function, ComputeMode::Compute, write)
        }
        (Operation::ComputeIfPresent, Payload::Function(function)) => {
            compute(key, function, ComputeMode::IfPresent, write)
        }
        (Operation::ComputeIfAbsent, Payload::Function(function)) => {
            compute(key, function, ComputeMode::IfAbsent, write)
        }

        (operation, payload) => {
            return Err(ProtocolViolation::MalformedRecord {
                reason: format!("{:?} cannot carry {:?}", operation, payload),
            })
        }
    };

    Ok(command)
}

fn compute(
    key: Key,
    function: &EntryFunction,
    mode: ComputeMode,
    write: &SingleKeyWrite,
) -> WriteCommand {
    WriteCommand::Compute {
        key,
        function: function.clone(),
        mode,
        metadata: write.metadata.clone(),
        private_metadata: write.internal_metadata.clone(),
    }
}
