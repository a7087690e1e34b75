/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build, run, and shut down a node.
//!
//! This module provides:
//! - The builder-pattern interface to construct a [specification of the node](NodeSpec) with:
//!   1. `NodeSpec::builder` to construct a `NodeSpecBuilder`,
//!   2. The setters of the `NodeSpecBuilder`, and
//!   3. The `NodeSpecBuilder::build` method to construct a [`NodeSpec`].
//! - The function to [start](NodeSpec::start) a [`Node`] given its specification.
//! - The type which keeps the node alive, [`Node`].
//!
//! ## Starting a node
//!
//! ```ignore
//! let node =
//!     NodeSpec::builder()
//!     .network(network)
//!     .pipeline(data_container)
//!     .state_transfer(LoggingStateTransfer)
//!     .configuration(configuration)
//!     .on_apply_failure(apply_failure_handler)
//!     .build()
//!     .start();
//!
//! node.install_topology(CacheName::new("users"), topology);
//! let replicator = node.replicator(&CacheName::new("users")).unwrap();
//! ```
//!
//! The node's [configuration](Configuration) can also be defined using the builder pattern, for example:
//!
//! ```ignore
//! let configuration =
//!     Configuration::builder()
//!     .me(Address::new(1))
//!     .reorder_buffer_capacity(4096)
//!     .log_events(true)
//!     .build();
//! ```
//!
//! ## Threads
//!
//! A started node runs:
//! 1. A poller thread, which receives records from the [`Network`] and admits them into the
//!    [`ReorderEngine`],
//! 2. `apply_threads` apply workers, which hand released records to the [`InvocationPipeline`] one at
//!    a time per queue,
//! 3. If any event handler is registered or `log_events` is set, an [event bus](crate::event_bus)
//!    thread.
//!
//! The primary side runs on the caller's threads: a [`PrimaryReplicator`] sends records from whichever
//! thread executed the write.

use std::{
    collections::HashMap,
    sync::{
        mpsc::{self, Sender},
        Arc, Mutex,
    },
    thread::JoinHandle,
};

use typed_builder::TypedBuilder;

use crate::backup::{
    engine::ReorderEngine, lock, pipeline::InvocationPipeline, state_transfer::StateTransfer,
};
use crate::event_bus::*;
use crate::events::*;
use crate::networking::{network::Network, receiving::start_polling, sending::SenderHandle};
use crate::primary::{replicator::PrimaryReplicator, sequencer::PrimarySequencer};
use crate::types::{
    basic::{Address, CacheName},
    topology::{CacheTopology, TopologyHandle},
};

/// Stores the user-defined parameters required to start a node.
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration]. On the builder call the following methods to construct a valid [Configuration].

    Required:
    - `.me(...)`
    - `.log_events(...)`

    Optional:
    - `.reorder_buffer_capacity(...)`
    - `.apply_threads(...)`
"))]
pub struct Configuration {
    #[builder(setter(doc = "Set the address this node is known by to its peers. Required."))]
    pub me: Address,
    #[builder(
        default = 1024,
        setter(doc = "Set the maximum number of early arrivals each order queue buffers before it gives up on the gap and requests a resync. Optional, defaults to 1024.")
    )]
    pub reorder_buffer_capacity: usize,
    #[builder(
        default = 4,
        setter(doc = "Set the number of threads that apply backup writes. Optional, defaults to 4.")
    )]
    pub apply_threads: usize,
    #[builder(setter(doc = "Enable logging? Required."))]
    pub log_events: bool,
}

/// Stores all necessary parameters and trait implementations required to run a node.
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [NodeSpec]. On the builder call the following methods to construct a valid [NodeSpec].

    Required:
    - `.network(...)`
    - `.pipeline(...)`
    - `.state_transfer(...)`
    - `.configuration(...)`

    Optional:
    - `.on_send_backup_write(...)`
    - `.on_receive_backup_write(...)`
    - `.on_apply_backup_write(...)`
    - `.on_discard_backup_write(...)`
    - `.on_apply_failure(...)`
    - `.on_reset_order_queue(...)`
    - `.on_buffer_overflow(...)`
"))]
pub struct NodeSpec<N: Network + 'static, P: InvocationPipeline, S: StateTransfer> {
    #[builder(setter(doc = "Set the implementation of point-to-point networking. The argument must implement the [Network](crate::networking::network::Network) trait. Required."))]
    network: N,
    #[builder(setter(doc = "Set the invocation pipeline backup writes are applied through. The argument must implement the [InvocationPipeline](crate::backup::pipeline::InvocationPipeline) trait. Required."))]
    pipeline: P,
    #[builder(setter(doc = "Set the state transfer subsystem that resyncs segments whose order queue overflowed. The argument must implement the [StateTransfer](crate::backup::state_transfer::StateTransfer) trait. Required."))]
    state_transfer: S,
    #[builder(setter(doc = "Set the [configuration](Configuration). Required."))]
    configuration: Configuration,
    #[builder(default, setter(transform = |handler: impl Fn(&SendBackupWriteEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<SendBackupWriteEvent>),
    doc = "Register a user-defined handler for [SendBackupWriteEvent]. Optional."))]
    on_send_backup_write: Option<HandlerPtr<SendBackupWriteEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ReceiveBackupWriteEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ReceiveBackupWriteEvent>),
    doc = "Register a user-defined handler for [ReceiveBackupWriteEvent]. Optional."))]
    on_receive_backup_write: Option<HandlerPtr<ReceiveBackupWriteEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ApplyBackupWriteEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ApplyBackupWriteEvent>),
    doc = "Register a user-defined handler for [ApplyBackupWriteEvent]. Optional."))]
    on_apply_backup_write: Option<HandlerPtr<ApplyBackupWriteEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&DiscardBackupWriteEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<DiscardBackupWriteEvent>),
    doc = "Register a user-defined handler for [DiscardBackupWriteEvent]. Optional."))]
    on_discard_backup_write: Option<HandlerPtr<DiscardBackupWriteEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ApplyFailureEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ApplyFailureEvent>),
    doc = "Register a user-defined handler for [ApplyFailureEvent]. Optional."))]
    on_apply_failure: Option<HandlerPtr<ApplyFailureEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ResetOrderQueueEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ResetOrderQueueEvent>),
    doc = "Register a user-defined handler for [ResetOrderQueueEvent]. Optional."))]
    on_reset_order_queue: Option<HandlerPtr<ResetOrderQueueEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&BufferOverflowEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<BufferOverflowEvent>),
    doc = "Register a user-defined handler for [BufferOverflowEvent]. Optional."))]
    on_buffer_overflow: Option<HandlerPtr<BufferOverflowEvent>>,
}

impl<N: Network + 'static, P: InvocationPipeline, S: StateTransfer> NodeSpec<N, P, S> {
    /// Starts all threads and channels associated with running a node, and returns the handles to them in
    /// a [`Node`] struct.
    pub fn start(self) -> Node<N, P, S> {
        let configuration = self.configuration;

        let event_handlers = EventHandlers::new(
            configuration.log_events,
            self.on_send_backup_write,
            self.on_receive_backup_write,
            self.on_apply_backup_write,
            self.on_discard_backup_write,
            self.on_apply_failure,
            self.on_reset_order_queue,
            self.on_buffer_overflow,
        );

        let (event_publisher, event_subscriber) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };

        let engine = Arc::new(ReorderEngine::new(
            self.pipeline,
            self.state_transfer,
            configuration.reorder_buffer_capacity,
            configuration.apply_threads,
            event_publisher.clone(),
        ));

        let (poller_shutdown, poller_shutdown_receiver) = mpsc::channel();
        let poller = start_polling(self.network.clone(), engine.clone(), poller_shutdown_receiver);

        let (event_bus, event_bus_shutdown) = match event_subscriber {
            Some(event_subscriber) => {
                let (event_bus_shutdown, event_bus_shutdown_receiver) = mpsc::channel();
                let event_bus =
                    start_event_bus(event_handlers, event_subscriber, event_bus_shutdown_receiver);
                (Some(event_bus), Some(event_bus_shutdown))
            }
            None => (None, None),
        };

        Node {
            me: configuration.me,
            network: self.network,
            caches: Mutex::new(HashMap::new()),
            engine,
            event_publisher,
            poller: Some(poller),
            poller_shutdown,
            event_bus,
            event_bus_shutdown,
        }
    }
}

/// Replication state of one cache on this node.
struct CacheReplication {
    topology: TopologyHandle,
    sequencer: Arc<PrimarySequencer>,
}

/// A handle to the background threads of a node. When this value is dropped, all background threads are
/// gracefully shut down.
pub struct Node<N: Network + 'static, P: InvocationPipeline, S: StateTransfer> {
    me: Address,
    network: N,
    caches: Mutex<HashMap<CacheName, CacheReplication>>,
    engine: Arc<ReorderEngine<P, S>>,
    event_publisher: Option<Sender<Event>>,
    poller: Option<JoinHandle<()>>,
    poller_shutdown: Sender<()>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl<N: Network + 'static, P: InvocationPipeline, S: StateTransfer> Node<N, P, S> {
    pub fn me(&self) -> Address {
        self.me
    }

    /// Install `topology` for `cache` if it is the first topology of the cache or newer than the current
    /// one. Returns whether it was installed. The number of segments of a cache is fixed by its first
    /// topology: a topology with another segment count is refused.
    ///
    /// Installing a newer topology resets every backup order queue of the cache that still waits on the
    /// older one, and makes the cache's sequence numbers start again from zero.
    pub fn install_topology(&self, cache: CacheName, topology: CacheTopology) -> bool {
        let topology_id = topology.topology_id();
        {
            let mut caches = lock(&self.caches);
            match caches.get(&cache) {
                Some(replication) => {
                    let num_segments = replication.topology.current().num_segments();
                    if topology.num_segments() != num_segments {
                        log::warn!(
                            "Refused topology {} of cache {}: it has {} segments instead of {}",
                            topology_id,
                            cache,
                            topology.num_segments(),
                            num_segments
                        );
                        return false;
                    }
                    if !replication.topology.install(topology) {
                        return false;
                    }
                }
                None => {
                    let sequencer = PrimarySequencer::new(topology_id, topology.num_segments());
                    caches.insert(
                        cache.clone(),
                        CacheReplication {
                            topology: TopologyHandle::new(topology),
                            sequencer: Arc::new(sequencer),
                        },
                    );
                }
            }
        }

        log::debug!("Installed topology {} of cache {}", topology_id, cache);
        self.engine.retain_topology(&cache, topology_id);
        true
    }

    /// The topology of `cache` currently installed, if any.
    pub fn topology(&self, cache: &CacheName) -> Option<TopologyHandle> {
        lock(&self.caches)
            .get(cache)
            .map(|replication| replication.topology.clone())
    }

    /// A replicator for the writes this node executes on `cache` as primary owner. None if no topology was
    /// installed for `cache` yet.
    pub fn replicator(&self, cache: &CacheName) -> Option<PrimaryReplicator<N>> {
        lock(&self.caches).get(cache).map(|replication| {
            PrimaryReplicator::new(
                self.me,
                cache.clone(),
                replication.topology.clone(),
                replication.sequencer.clone(),
                SenderHandle::new(self.network.clone()),
                self.event_publisher.clone(),
            )
        })
    }

    /// The invocation pipeline backup writes are applied through.
    pub fn pipeline(&self) -> &P {
        self.engine.pipeline()
    }

    /// Whether every backup write released for applying has been applied.
    pub fn is_idle(&self) -> bool {
        self.engine.is_idle()
    }
}

impl<N: Network + 'static, P: InvocationPipeline, S: StateTransfer> Drop for Node<N, P, S> {
    fn drop(&mut self) {
        // The poller feeds the reorder engine, so it stops first. The engine stops its apply workers when it
        // is dropped after this function returns.
        let _ = self.poller_shutdown.send(());
        if let Some(poller) = self.poller.take() {
            if poller.join().is_err() {
                log::error!("The poller thread panicked");
            }
        }

        if let Some(event_bus_shutdown) = &self.event_bus_shutdown {
            let _ = event_bus_shutdown.send(());
        }
        if let Some(event_bus) = self.event_bus.take() {
            if event_bus.join().is_err() {
                log::error!("The event bus thread panicked");
            }
        }
    }
}
