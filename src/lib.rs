/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! An implementation of the triangle write-replication protocol for partitioned in-memory data grids.
//!
//! In a data grid, every key belongs to a segment, and every segment has a primary owner and some backup
//! owners. Under the triangle protocol, the primary executes a write, then unicasts its outcome directly
//! to each backup owner, without a synchronous broadcast. Unicast channels do not preserve order, so:
//! 1. The [primary](primary) numbers the writes of each segment with a per-segment sequence number, and
//!    makes sure every number reaches every backup, if only as a no-op.
//! 2. Each [backup](backup) buffers writes that arrive early and applies writes strictly in sequence
//!    order, one order queue per (primary, cache, segment).
//!
//! The writes themselves travel as [backup write records](backup_write::BackupWriteRecord), which
//! describe the outcome the primary already decided, so that backups mirror it instead of re-evaluating
//! conditions.
//!
//! Users plug in the [network](networking::network::Network), the
//! [invocation pipeline](backup::pipeline::InvocationPipeline) that mutates local entries, and the
//! [state transfer](backup::state_transfer::StateTransfer) subsystem, then [start](node) a node.

pub mod backup;

pub mod backup_write;

pub mod commands;

pub(crate) mod event_bus;

pub mod events;

pub mod logging;

pub mod networking;

pub mod node;

pub mod primary;

pub mod types;
