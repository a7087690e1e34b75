use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    thread,
    time::Duration,
};

use triangle_rs::{
    backup::pipeline::{ApplyContext, Completion, InvocationPipeline},
    commands::{ComputeMode, WriteCommand},
    types::{
        basic::{Key, PrivateMetadata, SequenceNumber, Value},
        functions::{EntryFunction, EntryUpdate},
    },
};

/// An in-memory data container that executes [`WriteCommand`]s.
///
/// On the primary, tests [`execute`](DataContainer::execute) commands directly, conditions included. On a
/// backup, it serves as the [`InvocationPipeline`] reconstructed commands are applied through.
#[derive(Default)]
pub(crate) struct DataContainer {
    entries: Mutex<BTreeMap<Key, Value>>,
    tombstones: Mutex<BTreeMap<Key, PrivateMetadata>>,
    applied: Mutex<Vec<ApplyContext>>,
    failing_keys: Mutex<BTreeSet<Key>>,
}

impl DataContainer {
    pub(crate) fn new() -> Arc<DataContainer> {
        Arc::new(DataContainer::default())
    }

    pub(crate) fn get(&self, key: &Key) -> Option<Value> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    pub(crate) fn snapshot(&self) -> BTreeMap<Key, Value> {
        self.entries.lock().unwrap().clone()
    }

    pub(crate) fn insert_tombstone(&self, key: Key, metadata: PrivateMetadata) {
        self.tombstones.lock().unwrap().insert(key, metadata);
    }

    pub(crate) fn tombstones(&self) -> BTreeMap<Key, PrivateMetadata> {
        self.tombstones.lock().unwrap().clone()
    }

    /// Contexts of every apply handed to this container, in the order they were handed over.
    pub(crate) fn applied(&self) -> Vec<ApplyContext> {
        self.applied.lock().unwrap().clone()
    }

    pub(crate) fn applied_sequences(&self) -> Vec<SequenceNumber> {
        self.applied().iter().map(|context| context.sequence).collect()
    }

    /// Make applies of writes to `key` fail.
    pub(crate) fn fail_on(&self, key: Key) {
        self.failing_keys.lock().unwrap().insert(key);
    }

    /// Execute `command`, honoring its conditions. Returns whether it changed anything.
    pub(crate) fn execute(&self, command: &WriteCommand) -> bool {
        let mut entries = self.entries.lock().unwrap();
        match command {
            WriteCommand::Put {
                key,
                value,
                if_absent,
                ..
            } => {
                if *if_absent && entries.contains_key(key) {
                    return false;
                }
                entries.insert(key.clone(), value.clone());
                true
            }

            WriteCommand::Remove { key, expected, .. } => {
                if !matches_expected(entries.get(key), expected.as_ref()) {
                    return false;
                }
                entries.remove(key).is_some()
            }

            WriteCommand::RemoveExpired { key, value, .. } => {
                if !matches_expected(entries.get(key), value.as_ref()) {
                    return false;
                }
                entries.remove(key).is_some()
            }

            WriteCommand::Replace {
                key,
                expected,
                new_value,
                ..
            } => {
                if !entries.contains_key(key) || !matches_expected(entries.get(key), expected.as_ref()) {
                    return false;
                }
                entries.insert(key.clone(), new_value.clone());
                true
            }

            WriteCommand::Compute {
                key,
                function,
                mode,
                ..
            } => {
                let present = entries.contains_key(key);
                match mode {
                    ComputeMode::IfPresent if !present => return false,
                    ComputeMode::IfAbsent if present => return false,
                    _ => (),
                }
                update(&mut entries, key, function, None)
            }

            WriteCommand::FunctionalManyKeys { keys, function, .. } => keys
                .iter()
                .map(|key| update(&mut entries, key, function, None))
                .fold(false, |changed, updated| changed || updated),

            WriteCommand::FunctionalManyEntries {
                entries: arguments,
                function,
                ..
            } => arguments
                .iter()
                .map(|(key, argument)| update(&mut entries, key, function, Some(argument)))
                .fold(false, |changed, updated| changed || updated),

            WriteCommand::PutMap { map, .. } => {
                entries.extend(map.iter().map(|(key, value)| (key.clone(), value.clone())));
                true
            }

            WriteCommand::RemoveTombstones { tombstones } => {
                let mut stored = self.tombstones.lock().unwrap();
                tombstones.keys().for_each(|key| {
                    stored.remove(key);
                });
                true
            }
        }
    }
}

impl InvocationPipeline for DataContainer {
    fn apply(&self, command: WriteCommand, context: &ApplyContext) -> Completion {
        self.applied.lock().unwrap().push(context.clone());

        let failing = {
            let failing_keys = self.failing_keys.lock().unwrap();
            command.keys().iter().any(|key| failing_keys.contains(key))
        };
        if failing {
            return Completion::failed("injected failure");
        }

        self.execute(&command);
        Completion::succeeded()
    }
}

/// Applies through a [`DataContainer`] asynchronously: every apply completes from another thread, `delay`
/// after it was handed over. Tracks how many applies are in flight at the same time.
pub(crate) struct DelayedPipeline {
    container: Arc<DataContainer>,
    delay: Duration,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl DelayedPipeline {
    pub(crate) fn new(container: Arc<DataContainer>, delay: Duration) -> Arc<DelayedPipeline> {
        Arc::new(DelayedPipeline {
            container,
            delay,
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub(crate) fn container(&self) -> &Arc<DataContainer> {
        &self.container
    }

    /// The highest number of applies that were in flight at the same time.
    pub(crate) fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl InvocationPipeline for DelayedPipeline {
    fn apply(&self, command: WriteCommand, context: &ApplyContext) -> Completion {
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        let (completion, handle) = Completion::pending();
        let container = self.container.clone();
        let context = context.clone();
        let delay = self.delay;
        let in_flight = self.in_flight.clone();
        thread::spawn(move || {
            thread::sleep(delay);
            in_flight.fetch_sub(1, Ordering::SeqCst);
            let result = container.apply(command, &context).wait();
            handle.complete(result);
        });
        completion
    }
}

fn matches_expected(current: Option<&Value>, expected: Option<&Value>) -> bool {
    match expected {
        Some(expected) => current == Some(expected),
        None => true,
    }
}

fn update(
    entries: &mut BTreeMap<Key, Value>,
    key: &Key,
    function: &EntryFunction,
    argument: Option<&Value>,
) -> bool {
    match function.apply(entries.get(key), argument) {
        EntryUpdate::Keep => false,
        EntryUpdate::Set(value) => {
            entries.insert(key.clone(), value);
            true
        }
        EntryUpdate::Remove => entries.remove(key).is_some(),
    }
}
