/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that exist only to store numbers and bytes, and do not have any major "active" behavior.
//!
//! Most of these follow the newtype pattern. The ones that appear on the wire derive borsh, and their
//! field declaration order is their wire order.

use std::{
    fmt::{self, Debug, Display, Formatter},
    ops::{BitOr, BitOrAssign},
};

use borsh::{BorshDeserialize, BorshSerialize};

/// Identity of a node in the cluster.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct Address(u64);

impl Address {
    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

impl Debug for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

/// Name of the cache that owns the partition a write was made to.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, BorshDeserialize, BorshSerialize)]
pub struct CacheName(String);

impl CacheName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for CacheName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Version of the assignment of segments to owners.
///
/// Every membership change installs a topology with a strictly higher id. Sequence numbers are only
/// comparable between records that carry the same `TopologyId`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct TopologyId(u32);

impl TopologyId {
    pub const fn new(int: u32) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u32 {
        self.0
    }
}

impl Display for TopologyId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Index of a consistent-hash segment: the unit of ownership and of backup write ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct SegmentId(u32);

impl SegmentId {
    pub const fn new(int: u32) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u32 {
        self.0
    }

    pub const fn index(&self) -> usize {
        self.0 as usize
    }
}

impl Display for SegmentId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Position of a backup write in the total order of its (cache, segment, topology).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, BorshDeserialize, BorshSerialize)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    pub const ZERO: SequenceNumber = SequenceNumber(0);

    pub const fn new(int: u64) -> Self {
        Self(int)
    }

    pub const fn int(&self) -> u64 {
        self.0
    }

    pub const fn next(&self) -> SequenceNumber {
        SequenceNumber(self.0 + 1)
    }
}

impl Display for SequenceNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Correlates a backup write with the client write that caused it on the primary.
#[derive(Clone, Copy, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct CommandInvocationId {
    pub origin: Address,
    pub id: u64,
}

impl CommandInvocationId {
    pub const fn new(origin: Address, id: u64) -> Self {
        Self { origin, id }
    }
}

impl Display for CommandInvocationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.origin, self.id)
    }
}

impl Debug for CommandInvocationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

/// Key of a cache entry, as serialized bytes.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, BorshDeserialize, BorshSerialize)]
pub struct Key(Vec<u8>);

impl Key {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key(value.as_bytes().to_vec())
    }
}

/// Value of a cache entry, as serialized bytes.
#[derive(Clone, PartialEq, Eq, Hash, Debug, BorshDeserialize, BorshSerialize)]
pub struct Value(Vec<u8>);

impl Value {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value(value.as_bytes().to_vec())
    }
}

/// User-visible entry metadata (lifespan, max idle, version). Owned by the entry layer and forwarded
/// untouched.
#[derive(Clone, PartialEq, Eq, Hash, Debug, BorshDeserialize, BorshSerialize)]
pub struct Metadata(Vec<u8>);

impl Metadata {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Internal entry metadata (versioning, expiration bookkeeping, tombstones). Owned by the versioning
/// layer and forwarded untouched.
#[derive(Clone, PartialEq, Eq, Hash, Debug, BorshDeserialize, BorshSerialize)]
pub struct PrivateMetadata(Vec<u8>);

impl PrivateMetadata {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Execution flags carried along with a write.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, BorshDeserialize, BorshSerialize)]
pub struct Flags(u64);

impl Flags {
    pub const NONE: Flags = Flags(0);
    pub const ZERO_LOCK_ACQUISITION_TIMEOUT: Flags = Flags(1 << 0);
    pub const CACHE_MODE_LOCAL: Flags = Flags(1 << 1);
    pub const SKIP_LOCKING: Flags = Flags(1 << 2);
    pub const FORCE_WRITE_LOCK: Flags = Flags(1 << 3);
    pub const SKIP_CACHE_LOAD: Flags = Flags(1 << 4);
    pub const SKIP_CACHE_STORE: Flags = Flags(1 << 5);
    pub const IGNORE_RETURN_VALUES: Flags = Flags(1 << 6);
    pub const SKIP_LISTENER_NOTIFICATION: Flags = Flags(1 << 7);
    pub const PUT_FOR_STATE_TRANSFER: Flags = Flags(1 << 8);
    pub const COMMAND_RETRY: Flags = Flags(1 << 9);
    pub const BACKUP_WRITE: Flags = Flags(1 << 10);

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u64 {
        self.0
    }

    pub const fn contains(&self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Flags) -> Flags {
        Flags(self.0 | other.0)
    }
}

impl BitOr for Flags {
    type Output = Flags;
    fn bitor(self, rhs: Flags) -> Self::Output {
        self.union(rhs)
    }
}

impl BitOrAssign for Flags {
    fn bitor_assign(&mut self, rhs: Flags) {
        self.0 |= rhs.0
    }
}

impl Debug for Flags {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Flags({:#x})", self.0)
    }
}

/// Opaque functional-API parameters (persistence, locking and statistics modes), forwarded verbatim.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Debug, BorshDeserialize, BorshSerialize)]
pub struct FunctionalParams(u32);

impl FunctionalParams {
    pub const fn new(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }
}

/// Media types the primary used to convert keys and values before running a function. The backup
/// must run the function under the same conversion.
#[derive(Clone, Default, PartialEq, Eq, Hash, Debug, BorshDeserialize, BorshSerialize)]
pub struct DataConversion {
    pub key_media_type: Option<String>,
    pub value_media_type: Option<String>,
}
