/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Thread that receives [events](crate::events) from an [`Acceptor`](crate::acceptor::Acceptor) and
//! fires the handlers registered for them.
//!
//! Handlers run off the acceptance path, so a slow handler never delays acceptance.

use std::{
    sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError},
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{events::*, logging::Logger};

pub type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

/// How long the event bus waits for an event before checking for its shutdown signal again.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Default)]
pub(crate) struct EventHandlers {
    pub(crate) accept_block_handlers: Vec<HandlerPtr<AcceptBlockEvent>>,
    pub(crate) commit_block_handlers: Vec<HandlerPtr<CommitBlockEvent>>,
    pub(crate) option_vote_handlers: Vec<HandlerPtr<OptionVoteEvent>>,
    pub(crate) evict_block_state_handlers: Vec<HandlerPtr<EvictBlockStateEvent>>,
    pub(crate) reject_block_handlers: Vec<HandlerPtr<RejectBlockEvent>>,
}

impl EventHandlers {
    /// Collect the user's handlers. If `log_events` is set, the default logger of every event is
    /// registered ahead of them.
    pub(crate) fn new(
        log_events: bool,
        accept_block_handler: Option<HandlerPtr<AcceptBlockEvent>>,
        commit_block_handler: Option<HandlerPtr<CommitBlockEvent>>,
        option_vote_handler: Option<HandlerPtr<OptionVoteEvent>>,
        evict_block_state_handler: Option<HandlerPtr<EvictBlockStateEvent>>,
        reject_block_handler: Option<HandlerPtr<RejectBlockEvent>>,
    ) -> EventHandlers {
        let mut handlers = EventHandlers::default();

        if log_events {
            handlers
                .accept_block_handlers
                .push(AcceptBlockEvent::get_logger());
            handlers
                .commit_block_handlers
                .push(CommitBlockEvent::get_logger());
            handlers
                .option_vote_handlers
                .push(OptionVoteEvent::get_logger());
            handlers
                .evict_block_state_handlers
                .push(EvictBlockStateEvent::get_logger());
            handlers
                .reject_block_handlers
                .push(RejectBlockEvent::get_logger());
        }

        handlers.accept_block_handlers.extend(accept_block_handler);
        handlers.commit_block_handlers.extend(commit_block_handler);
        handlers.option_vote_handlers.extend(option_vote_handler);
        handlers
            .evict_block_state_handlers
            .extend(evict_block_state_handler);
        handlers.reject_block_handlers.extend(reject_block_handler);

        handlers
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.accept_block_handlers.is_empty()
            && self.commit_block_handlers.is_empty()
            && self.option_vote_handlers.is_empty()
            && self.evict_block_state_handlers.is_empty()
            && self.reject_block_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::AcceptBlock(accept_block_event) => self
                .accept_block_handlers
                .iter()
                .for_each(|handler| handler(&accept_block_event)),

            Event::CommitBlock(commit_block_event) => self
                .commit_block_handlers
                .iter()
                .for_each(|handler| handler(&commit_block_event)),

            Event::OptionVote(option_vote_event) => self
                .option_vote_handlers
                .iter()
                .for_each(|handler| handler(&option_vote_event)),

            Event::EvictBlockState(evict_block_state_event) => self
                .evict_block_state_handlers
                .iter()
                .for_each(|handler| handler(&evict_block_state_event)),

            Event::RejectBlock(reject_block_event) => self
                .reject_block_handlers
                .iter()
                .for_each(|handler| handler(&reject_block_event)),
        }
    }
}

/// Start the event bus thread. It runs until `shutdown_signal` fires or is dropped, or until every
/// publisher of `event_subscriber` is dropped. Events already published when the shutdown signal
/// arrives are still handled.
pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => {
                while let Ok(event) = event_subscriber.try_recv() {
                    event_handlers.fire_handlers(event)
                }
                return;
            }
            Err(TryRecvError::Empty) => (),
        }

        match event_subscriber.recv_timeout(POLL_INTERVAL) {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => return,
        }
    })
}
