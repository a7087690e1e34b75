/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The backup side of the triangle protocol: restoring the primary's order and applying writes locally.
//!
//! ## Flow
//!
//! 1. The poller hands every received [record](crate::backup_write::BackupWriteRecord) to the
//!    [`ReorderEngine`](engine::ReorderEngine).
//! 2. The engine admits the record into the [`OrderQueue`](order_queue::OrderQueue) of its (primary,
//!    cache, segment). Admission discards stale and duplicate records, buffers early ones, and releases
//!    every record that became contiguous.
//! 3. Released records are applied one at a time per queue on the [apply executor](executor), through
//!    the [`Dispatcher`](dispatcher::Dispatcher) and the user's
//!    [`InvocationPipeline`](pipeline::InvocationPipeline). Distinct queues apply in parallel.

use std::sync::{Mutex, MutexGuard};

pub mod dispatcher;

pub mod engine;

pub(crate) mod executor;

pub mod order_queue;

pub mod pipeline;

pub mod state_transfer;

/// Lock `mutex`, recovering the guard if a thread panicked while holding it. Queue state stays
/// consistent across a panic in a handler, since handlers never run under these locks.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
