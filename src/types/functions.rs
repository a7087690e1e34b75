/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The registry of functions that functional writes can carry to backups.
//!
//! A functional write is a write expressed as a function applied to an entry instead of a literal value.
//! Shipping arbitrary closures between nodes is not possible without code shipping, so the set of
//! functions is closed: every node understands exactly the variants of [`EntryFunction`] of its
//! [`FUNCTION_REGISTRY_VERSION`]. Adding a variant is a wire change and must bump the version.
//!
//! Functions are pure. [`EntryFunction::apply`] takes the current value of the entry and, for writes that
//! carry one value per key, that key's argument, and returns the [`EntryUpdate`] to perform.

use borsh::{BorshDeserialize, BorshSerialize};

use super::basic::Value;

/// Version of the set of variants in [`EntryFunction`].
pub const FUNCTION_REGISTRY_VERSION: u8 = 1;

#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize)]
pub enum EntryFunction {
    /// Set the entry to a fixed value.
    SetValue(Value),

    /// Set the entry to the per-key argument. Without an argument the entry is left untouched.
    SetArgument,

    /// Remove the entry.
    Remove,

    /// Append fixed bytes to the current value, creating the entry if it is absent.
    Append(Vec<u8>),

    /// Append the per-key argument to the current value, creating the entry if it is absent.
    AppendArgument,

    /// Treat the value as a little-endian `i64` counter (absent or malformed reads as 0) and add to it.
    AddI64(i64),

    /// Set the entry to a fixed value only if it is absent.
    SetIfAbsent(Value),
}

/// What a function decided to do to an entry.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum EntryUpdate {
    Keep,
    Set(Value),
    Remove,
}

impl EntryFunction {
    pub fn apply(&self, current: Option<&Value>, argument: Option<&Value>) -> EntryUpdate {
        match self {
            EntryFunction::SetValue(value) => EntryUpdate::Set(value.clone()),
            EntryFunction::SetArgument => match argument {
                Some(argument) => EntryUpdate::Set(argument.clone()),
                None => EntryUpdate::Keep,
            },
            EntryFunction::Remove => EntryUpdate::Remove,
            EntryFunction::Append(suffix) => EntryUpdate::Set(append(current, suffix)),
            EntryFunction::AppendArgument => match argument {
                Some(argument) => EntryUpdate::Set(append(current, argument.bytes())),
                None => EntryUpdate::Keep,
            },
            EntryFunction::AddI64(delta) => {
                let counter = current.map(read_counter).unwrap_or(0);
                EntryUpdate::Set(Value::new(counter.wrapping_add(*delta).to_le_bytes().to_vec()))
            }
            EntryFunction::SetIfAbsent(value) => match current {
                Some(_) => EntryUpdate::Keep,
                None => EntryUpdate::Set(value.clone()),
            },
        }
    }

    /// Whether this function reads a per-key argument.
    pub fn takes_argument(&self) -> bool {
        matches!(self, EntryFunction::SetArgument | EntryFunction::AppendArgument)
    }
}

fn append(current: Option<&Value>, suffix: &[u8]) -> Value {
    let mut bytes = current.map(|value| value.bytes().to_vec()).unwrap_or_default();
    bytes.extend_from_slice(suffix);
    Value::new(bytes)
}

fn read_counter(value: &Value) -> i64 {
    <[u8; 8]>::try_from(value.bytes())
        .map(i64::from_le_bytes)
        .unwrap_or(0)
}
