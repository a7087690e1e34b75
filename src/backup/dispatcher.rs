/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Routing a record whose turn has come to the [`InvocationPipeline`].

use crate::backup_write::{reconstruct, BackupWriteRecord, ProtocolViolation, Reconstructed};
use crate::types::basic::{Address, Flags};

use super::pipeline::{ApplyContext, Completion, InvocationPipeline, ValueMatcher};

/// What the dispatcher did with a record.
pub enum Dispatched {
    /// The record was a no-op. Nothing was handed to the pipeline.
    Noop,

    /// The reconstructed command was handed to the pipeline.
    Applying(Completion),
}

/// Stateless apart from the pipeline it hands commands to.
pub struct Dispatcher<P: InvocationPipeline> {
    pipeline: P,
}

impl<P: InvocationPipeline> Dispatcher<P> {
    pub fn new(pipeline: P) -> Self {
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &P {
        &self.pipeline
    }

    pub fn dispatch(
        &self,
        origin: Address,
        record: &BackupWriteRecord,
    ) -> Result<Dispatched, ProtocolViolation> {
        match reconstruct(&record.write)? {
            Reconstructed::Noop => Ok(Dispatched::Noop),
            Reconstructed::Apply(command) => {
                let context = apply_context(origin, record);
                Ok(Dispatched::Applying(self.pipeline.apply(command, &context)))
            }
        }
    }
}

/// The context a backup write is applied under. The primary already decided the outcome, so the write
/// skips locking and matches any previous value.
pub fn apply_context(origin: Address, record: &BackupWriteRecord) -> ApplyContext {
    ApplyContext {
        origin,
        cache: record.cache.clone(),
        segment: record.segment,
        topology_id: record.topology_id,
        sequence: record.sequence,
        invocation_id: record.invocation_id,
        keys: record.keys(),
        flags: record.flags | Flags::SKIP_LOCKING | Flags::BACKUP_WRITE,
        value_matcher: ValueMatcher::MatchAlways,
    }
}
