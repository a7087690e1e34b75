/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A fixed pool of worker threads that drain order queues.
//!
//! Workers take tasks from a shared channel. A drain task hands one record to the pipeline and returns;
//! the record's completion submits the queue's next drain task. Workers are therefore never parked on an
//! apply, and a queue waiting on a slow completion holds no worker.

use std::{
    sync::{
        mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError},
        Arc, Mutex,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use super::lock;

pub(crate) type Task = Box<dyn FnOnce() + Send + 'static>;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Submits tasks to an [`ApplyExecutor`]. Outlives the executor harmlessly: tasks submitted after its
/// workers stopped are never run.
#[derive(Clone)]
pub(crate) struct TaskSender(Sender<Task>);

impl TaskSender {
    pub(crate) fn execute(&self, task: Task) {
        let _ = self.0.send(task);
    }
}

pub(crate) struct ApplyExecutor {
    tasks: Sender<Task>,
    workers: Vec<(Sender<()>, Option<JoinHandle<()>>)>,
}

impl ApplyExecutor {
    /// Spawn `threads` workers (at least one).
    pub(crate) fn new(threads: usize) -> ApplyExecutor {
        let (tasks, task_receiver) = mpsc::channel::<Task>();
        let task_receiver = Arc::new(Mutex::new(task_receiver));

        let workers = (0..threads.max(1))
            .map(|_| {
                let (shutdown, shutdown_receiver) = mpsc::channel();
                let worker = start_worker(task_receiver.clone(), shutdown_receiver);
                (shutdown, Some(worker))
            })
            .collect();

        ApplyExecutor { tasks, workers }
    }

    pub(crate) fn task_sender(&self) -> TaskSender {
        TaskSender(self.tasks.clone())
    }
}

impl Drop for ApplyExecutor {
    fn drop(&mut self) {
        for (shutdown, _) in &self.workers {
            let _ = shutdown.send(());
        }
        for (_, worker) in &mut self.workers {
            if let Some(worker) = worker.take() {
                if worker.join().is_err() {
                    log::error!("An apply worker panicked");
                }
            }
        }
    }
}

fn start_worker(tasks: Arc<Mutex<Receiver<Task>>>, shutdown_signal: Receiver<()>) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => return,
            Err(TryRecvError::Empty) => (),
        }

        let task = lock(&tasks).recv_timeout(POLL_INTERVAL);
        match task {
            Ok(task) => task(),
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => return,
        }
    })
}
