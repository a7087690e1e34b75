/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The seam between the triangle protocol and the local invocation pipeline that mutates entries.

use std::{
    mem,
    sync::{mpsc, Arc, Mutex},
};

use crate::commands::WriteCommand;
use crate::types::basic::{
    Address, CacheName, CommandInvocationId, Flags, Key, SegmentId, SequenceNumber, TopologyId,
};

use super::lock;

/// Runs reconstructed writes against local state.
///
/// The pipeline owns locking and any other entry-level discipline. [`apply`](Self::apply) should not block
/// for long: if the write completes asynchronously, return a [pending](Completion::pending) completion and
/// complete it from wherever the write finishes.
pub trait InvocationPipeline: Send + Sync + 'static {
    fn apply(&self, command: WriteCommand, context: &ApplyContext) -> Completion;
}

impl<T: InvocationPipeline> InvocationPipeline for Arc<T> {
    fn apply(&self, command: WriteCommand, context: &ApplyContext) -> Completion {
        self.as_ref().apply(command, context)
    }
}

/// How the pipeline must treat the previous value of an entry when applying a write.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ValueMatcher {
    /// Apply regardless of the previous value. Backup writes always use this.
    MatchAlways,

    /// Apply only if the previous value matches the command's expectation.
    MatchExpected,
}

/// Everything the pipeline needs to know about a backup write beyond the command itself.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ApplyContext {
    /// The primary the write came from.
    pub origin: Address,
    pub cache: CacheName,
    pub segment: SegmentId,
    pub topology_id: TopologyId,
    pub sequence: SequenceNumber,
    pub invocation_id: CommandInvocationId,
    pub keys: Vec<Key>,
    pub flags: Flags,
    pub value_matcher: ValueMatcher,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ApplyError {
    /// The pipeline failed to apply the write.
    Failed(String),

    /// The [`CompletionHandle`] was dropped without completing.
    Abandoned,
}

/// The outcome of [`InvocationPipeline::apply`], available now or later.
///
/// The engine never blocks on a completion: it registers a continuation with
/// [`on_complete`](Self::on_complete), which runs on whichever thread completes the write.
pub struct Completion(CompletionState);

enum CompletionState {
    Ready(Result<(), ApplyError>),
    Pending(Arc<Mutex<Slot>>),
}

type Continuation = Box<dyn FnOnce(Result<(), ApplyError>) + Send + 'static>;

/// Where the outcome and the continuation of a pending completion meet. Whichever arrives second runs the
/// continuation.
enum Slot {
    Empty,
    Completed(Result<(), ApplyError>),
    Waiting(Continuation),
    Done,
}

impl Completion {
    pub fn ready(result: Result<(), ApplyError>) -> Completion {
        Completion(CompletionState::Ready(result))
    }

    pub fn succeeded() -> Completion {
        Completion::ready(Ok(()))
    }

    pub fn failed(reason: impl Into<String>) -> Completion {
        Completion::ready(Err(ApplyError::Failed(reason.into())))
    }

    /// A completion that resolves when the returned handle is completed, or dropped.
    pub fn pending() -> (Completion, CompletionHandle) {
        let slot = Arc::new(Mutex::new(Slot::Empty));
        (
            Completion(CompletionState::Pending(slot.clone())),
            CompletionHandle(Some(slot)),
        )
    }

    /// Run `continuation` with the outcome. Runs it on the calling thread if the outcome is already known,
    /// otherwise on the thread that completes the handle.
    pub fn on_complete(self, continuation: impl FnOnce(Result<(), ApplyError>) + Send + 'static) {
        let slot = match self.0 {
            CompletionState::Ready(result) => return continuation(result),
            CompletionState::Pending(slot) => slot,
        };

        let result = {
            let mut slot = lock(&slot);
            match mem::replace(&mut *slot, Slot::Done) {
                Slot::Completed(result) => result,
                _ => {
                    *slot = Slot::Waiting(Box::new(continuation));
                    return;
                }
            }
        };
        continuation(result)
    }

    /// Block the calling thread until the outcome is known.
    pub fn wait(self) -> Result<(), ApplyError> {
        let (sender, receiver) = mpsc::channel();
        self.on_complete(move |result| {
            let _ = sender.send(result);
        });
        receiver.recv().unwrap_or(Err(ApplyError::Abandoned))
    }
}

/// The completing end of a [pending](Completion::pending) [`Completion`]. Dropping it without completing
/// completes with [`ApplyError::Abandoned`].
pub struct CompletionHandle(Option<Arc<Mutex<Slot>>>);

impl CompletionHandle {
    pub fn complete(mut self, result: Result<(), ApplyError>) {
        self.resolve(result);
    }

    fn resolve(&mut self, result: Result<(), ApplyError>) {
        let slot = match self.0.take() {
            Some(slot) => slot,
            None => return,
        };

        let continuation = {
            let mut slot = lock(&slot);
            match mem::replace(&mut *slot, Slot::Done) {
                Slot::Waiting(continuation) => continuation,
                _ => {
                    *slot = Slot::Completed(result);
                    return;
                }
            }
        };
        // The slot lock is released: the continuation may schedule more work.
        continuation(result)
    }
}

impl Drop for CompletionHandle {
    fn drop(&mut self) {
        self.resolve(Err(ApplyError::Abandoned));
    }
}
