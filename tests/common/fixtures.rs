use std::{
    thread,
    time::{Duration, Instant},
};

use triangle_rs::{
    backup_write::{BackupWrite, BackupWriteRecord, Operation, Payload, SingleKeyWrite},
    types::{
        basic::{
            Address, CacheName, CommandInvocationId, Flags, Key, SegmentId, SequenceNumber,
            TopologyId, Value,
        },
        topology::{CacheTopology, KeyPartitioner, SegmentOwners},
    },
};

pub(crate) fn users() -> CacheName {
    CacheName::new("users")
}

/// The first key of the form `{prefix}-{n}` that belongs to `segment`.
pub(crate) fn key_in_segment(
    partitioner: &dyn KeyPartitioner,
    segment: SegmentId,
    prefix: &str,
) -> Key {
    (0..)
        .map(|n| Key::from(format!("{}-{}", prefix, n).as_str()))
        .find(|key| partitioner.segment_of(key) == segment)
        .unwrap()
}

/// A topology of `num_segments` segments, all with the same primary and backups.
pub(crate) fn uniform_topology(
    topology_id: u32,
    num_segments: u32,
    primary: Address,
    backups: &[Address],
) -> CacheTopology {
    let owners = (0..num_segments)
        .map(|_| SegmentOwners::new(primary, backups.to_vec()))
        .collect();
    CacheTopology::new(TopologyId::new(topology_id), owners)
}

pub(crate) fn put(key: &Key, value: &Value) -> BackupWrite {
    BackupWrite::SingleKey(SingleKeyWrite {
        key: key.clone(),
        operation: Operation::Write,
        payload: Payload::Value(value.clone()),
        metadata: None,
        internal_metadata: None,
    })
}

pub(crate) fn record(
    topology_id: u32,
    segment: u32,
    sequence: u64,
    write: BackupWrite,
) -> BackupWriteRecord {
    BackupWriteRecord {
        cache: users(),
        invocation_id: CommandInvocationId::new(Address::new(0), sequence),
        topology_id: TopologyId::new(topology_id),
        flags: Flags::NONE,
        sequence: SequenceNumber::new(sequence),
        segment: SegmentId::new(segment),
        write,
    }
}

/// A put of `key-{sequence}` to `value-{sequence}`.
pub(crate) fn numbered_put(topology_id: u32, segment: u32, sequence: u64) -> BackupWriteRecord {
    let key = Key::from(format!("key-{}", sequence).as_str());
    let value = Value::from(format!("value-{}", sequence).as_str());
    record(topology_id, segment, sequence, put(&key, &value))
}

pub(crate) fn sequences(sequences: impl IntoIterator<Item = u64>) -> Vec<SequenceNumber> {
    sequences.into_iter().map(SequenceNumber::new).collect()
}

/// Poll `condition` until it holds. Panics after 10 seconds.
pub(crate) fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        if Instant::now() > deadline {
            panic!("condition did not hold within 10 seconds");
        }
        thread::sleep(Duration::from_millis(5));
    }
}
