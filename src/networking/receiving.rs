/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions and types for receiving messages from peers.

use std::{
    sync::{
        mpsc::{Receiver, TryRecvError},
        Arc,
    },
    thread::{self, JoinHandle},
};

use crate::backup::{engine::ReorderEngine, pipeline::InvocationPipeline, state_transfer::StateTransfer};

use super::{messages::Message, network::Network};

/// Spawn the poller thread, which polls the [`Network`] for messages and hands backup write records to
/// the [`ReorderEngine`].
///
/// Admitting a record into its order queue never applies it, so the poller never blocks on the
/// invocation pipeline.
pub(crate) fn start_polling<N, P, S>(
    mut network: N,
    engine: Arc<ReorderEngine<P, S>>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()>
where
    N: Network + 'static,
    P: InvocationPipeline,
    S: StateTransfer,
{
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) => return,
            Err(TryRecvError::Empty) => (),
            Err(TryRecvError::Disconnected) => {
                panic!("Poller thread disconnected from main thread")
            }
        }

        if let Some((origin, msg)) = network.recv() {
            match msg {
                Message::BackupWrite(record) => engine.receive(origin, record),
            }
        } else {
            thread::yield_now()
        }
    })
}
