/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the node's
//! [config](crate::node::Configuration).
//!
//! This crate logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages printed
//! onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet is
//! how an [ApplyBackupWrite](crate::events::ApplyBackupWriteEvent) is printed:
//!
//! ```text
//! ApplyBackupWrite, 1701329264, node-1, users, 4, 2, 7, 1, p8Lm3Qa
//! ```
//!
//! In the snippet:
//! - The third value is the primary the record came from.
//! - The fourth to seventh values are the cache, segment, topology id and sequence number of the record.
//! - The eighth value is the number of keys the record wrote to.
//! - The ninth value is the first seven characters of the Base64 encoding of the first of those keys,
//!   or `-` for a no-op.

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use log;
use std::time::SystemTime;

use crate::events::*;

// Names of each event in PascalCase for printing:
pub const SEND_BACKUP_WRITE: &str = "SendBackupWrite";
pub const RECEIVE_BACKUP_WRITE: &str = "ReceiveBackupWrite";
pub const APPLY_BACKUP_WRITE: &str = "ApplyBackupWrite";
pub const DISCARD_BACKUP_WRITE: &str = "DiscardBackupWrite";
pub const APPLY_FAILURE: &str = "ApplyFailure";
pub const RESET_ORDER_QUEUE: &str = "ResetOrderQueue";
pub const BUFFER_OVERFLOW: &str = "BufferOverflow";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for SendBackupWriteEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |send_event: &SendBackupWriteEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}, {}, {}",
                SEND_BACKUP_WRITE,
                secs_since_unix_epoch(send_event.timestamp),
                send_event.peer,
                send_event.cache,
                send_event.segment,
                send_event.topology_id,
                send_event.sequence,
                if send_event.noop { "Noop" } else { "Write" }
            )
        };
        Box::new(logger)
    }
}

impl Logger for ReceiveBackupWriteEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |receive_event: &ReceiveBackupWriteEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}, {}",
                RECEIVE_BACKUP_WRITE,
                secs_since_unix_epoch(receive_event.timestamp),
                receive_event.origin,
                receive_event.cache,
                receive_event.segment,
                receive_event.topology_id,
                receive_event.sequence
            )
        };
        Box::new(logger)
    }
}

impl Logger for ApplyBackupWriteEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |apply_event: &ApplyBackupWriteEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}, {}, {}, {}",
                APPLY_BACKUP_WRITE,
                secs_since_unix_epoch(apply_event.timestamp),
                apply_event.origin,
                apply_event.cache,
                apply_event.segment,
                apply_event.topology_id,
                apply_event.sequence,
                apply_event.keys.len(),
                apply_event
                    .keys
                    .first()
                    .map(|key| first_seven_base64_chars(key.bytes()))
                    .unwrap_or_else(|| String::from("-"))
            )
        };
        Box::new(logger)
    }
}

impl Logger for DiscardBackupWriteEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |discard_event: &DiscardBackupWriteEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}, {}, {:?}",
                DISCARD_BACKUP_WRITE,
                secs_since_unix_epoch(discard_event.timestamp),
                discard_event.origin,
                discard_event.cache,
                discard_event.segment,
                discard_event.topology_id,
                discard_event.sequence,
                discard_event.reason
            )
        };
        Box::new(logger)
    }
}

impl Logger for ApplyFailureEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |failure_event: &ApplyFailureEvent| {
            log::warn!(
                "{}, {}, {}, {}, {}, {}, {}, {:?}",
                APPLY_FAILURE,
                secs_since_unix_epoch(failure_event.timestamp),
                failure_event.origin,
                failure_event.cache,
                failure_event.segment,
                failure_event.topology_id,
                failure_event.sequence,
                failure_event.error
            )
        };
        Box::new(logger)
    }
}

impl Logger for ResetOrderQueueEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |reset_event: &ResetOrderQueueEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}, {}, {}",
                RESET_ORDER_QUEUE,
                secs_since_unix_epoch(reset_event.timestamp),
                reset_event.origin,
                reset_event.cache,
                reset_event.segment,
                reset_event.previous,
                reset_event.adopted,
                reset_event.dropped
            )
        };
        Box::new(logger)
    }
}

impl Logger for BufferOverflowEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |overflow_event: &BufferOverflowEvent| {
            let request = &overflow_event.request;
            log::warn!(
                "{}, {}, {}, {}, {}, {}, {}..{}",
                BUFFER_OVERFLOW,
                secs_since_unix_epoch(overflow_event.timestamp),
                request.origin,
                request.cache,
                request.segment,
                request.topology_id,
                request.missing_from,
                request.missing_to
            )
        };
        Box::new(logger)
    }
}

fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}
