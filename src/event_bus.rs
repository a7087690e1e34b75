/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The event bus thread, which receives [events](crate::events) published by the other threads of a node
//! and fires the handlers registered for them.

use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::events::*;
use crate::logging::Logger;

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

/// Every handler registered for every event type. The default [logger](Logger) of an event type, if
/// enabled, comes first.
pub(crate) struct EventHandlers {
    pub(crate) send_backup_write_handlers: Vec<HandlerPtr<SendBackupWriteEvent>>,
    pub(crate) receive_backup_write_handlers: Vec<HandlerPtr<ReceiveBackupWriteEvent>>,
    pub(crate) apply_backup_write_handlers: Vec<HandlerPtr<ApplyBackupWriteEvent>>,
    pub(crate) discard_backup_write_handlers: Vec<HandlerPtr<DiscardBackupWriteEvent>>,
    pub(crate) apply_failure_handlers: Vec<HandlerPtr<ApplyFailureEvent>>,
    pub(crate) reset_order_queue_handlers: Vec<HandlerPtr<ResetOrderQueueEvent>>,
    pub(crate) buffer_overflow_handlers: Vec<HandlerPtr<BufferOverflowEvent>>,
}

impl EventHandlers {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        log_events: bool,
        on_send_backup_write: Option<HandlerPtr<SendBackupWriteEvent>>,
        on_receive_backup_write: Option<HandlerPtr<ReceiveBackupWriteEvent>>,
        on_apply_backup_write: Option<HandlerPtr<ApplyBackupWriteEvent>>,
        on_discard_backup_write: Option<HandlerPtr<DiscardBackupWriteEvent>>,
        on_apply_failure: Option<HandlerPtr<ApplyFailureEvent>>,
        on_reset_order_queue: Option<HandlerPtr<ResetOrderQueueEvent>>,
        on_buffer_overflow: Option<HandlerPtr<BufferOverflowEvent>>,
    ) -> EventHandlers {
        EventHandlers {
            send_backup_write_handlers: handlers(log_events, on_send_backup_write),
            receive_backup_write_handlers: handlers(log_events, on_receive_backup_write),
            apply_backup_write_handlers: handlers(log_events, on_apply_backup_write),
            discard_backup_write_handlers: handlers(log_events, on_discard_backup_write),
            apply_failure_handlers: handlers(log_events, on_apply_failure),
            reset_order_queue_handlers: handlers(log_events, on_reset_order_queue),
            buffer_overflow_handlers: handlers(log_events, on_buffer_overflow),
        }
    }

    /// Whether no handler at all is registered, in which case the event bus need not be started.
    pub(crate) fn is_empty(&self) -> bool {
        self.send_backup_write_handlers.is_empty()
            && self.receive_backup_write_handlers.is_empty()
            && self.apply_backup_write_handlers.is_empty()
            && self.discard_backup_write_handlers.is_empty()
            && self.apply_failure_handlers.is_empty()
            && self.reset_order_queue_handlers.is_empty()
            && self.buffer_overflow_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::SendBackupWrite(send_backup_write_event) => self
                .send_backup_write_handlers
                .iter()
                .for_each(|handler| handler(&send_backup_write_event)),

            Event::ReceiveBackupWrite(receive_backup_write_event) => self
                .receive_backup_write_handlers
                .iter()
                .for_each(|handler| handler(&receive_backup_write_event)),

            Event::ApplyBackupWrite(apply_backup_write_event) => self
                .apply_backup_write_handlers
                .iter()
                .for_each(|handler| handler(&apply_backup_write_event)),

            Event::DiscardBackupWrite(discard_backup_write_event) => self
                .discard_backup_write_handlers
                .iter()
                .for_each(|handler| handler(&discard_backup_write_event)),

            Event::ApplyFailure(apply_failure_event) => self
                .apply_failure_handlers
                .iter()
                .for_each(|handler| handler(&apply_failure_event)),

            Event::ResetOrderQueue(reset_order_queue_event) => self
                .reset_order_queue_handlers
                .iter()
                .for_each(|handler| handler(&reset_order_queue_event)),

            Event::BufferOverflow(buffer_overflow_event) => self
                .buffer_overflow_handlers
                .iter()
                .for_each(|handler| handler(&buffer_overflow_event)),
        }
    }
}

fn handlers<T: Logger>(log_events: bool, user_handler: Option<HandlerPtr<T>>) -> Vec<HandlerPtr<T>> {
    let mut handlers = Vec::new();
    if log_events {
        handlers.push(T::get_logger());
    }
    handlers.extend(user_handler);
    handlers
}

/// Spawn the event bus thread. It fires handlers for events in the order they were published, until it
/// receives a shutdown signal.
pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => {
                // Fire handlers for events that were published before the shutdown.
                while let Ok(event) = event_subscriber.try_recv() {
                    event_handlers.fire_handlers(event)
                }
                return;
            }
            Err(TryRecvError::Empty) => (),
        }

        match event_subscriber.recv_timeout(Duration::from_millis(10)) {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(RecvTimeoutError::Timeout) => (),
            // Every publisher is gone. Wait for the shutdown signal.
            Err(RecvTimeoutError::Disconnected) => thread::sleep(Duration::from_millis(10)),
        }
    })
}
