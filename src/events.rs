/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of events emitted by the block acceptance engine, for event handling and logging.
//!
//! An event for a given action indicates that the action has been completed. In particular,
//! [`CommitBlockEvent`] is only published after the block's effects are durable.

use std::{sync::mpsc::Sender, time::SystemTime};

use crate::types::{
    block::BlockKind,
    data_types::{BlockHeight, BlockID},
};

pub enum Event {
    // Events that change what the chain considers accepted.
    AcceptBlock(AcceptBlockEvent),
    CommitBlock(CommitBlockEvent),
    // Events that only touch in-memory state.
    OptionVote(OptionVoteEvent),
    EvictBlockState(EvictBlockStateEvent),
    RejectBlock(RejectBlockEvent),
}

impl Event {
    /// Send this event to `event_publisher`, if there is one. A disconnected subscriber is not an error:
    /// events are informational.
    pub(crate) fn publish(self, event_publisher: &Option<Sender<Event>>) {
        if let Some(event_publisher) = event_publisher {
            let _ = event_publisher.send(self);
        }
    }
}

/// A block went through common-accept: it is now the in-memory last accepted block and its records
/// are staged, but not necessarily durable.
pub struct AcceptBlockEvent {
    pub timestamp: SystemTime,
    pub block: BlockID,
    pub height: BlockHeight,
    pub kind: BlockKind,
}

/// A block's effects, and those of its atomic requests, are durable.
pub struct CommitBlockEvent {
    pub timestamp: SystemTime,
    pub block: BlockID,
    pub height: BlockHeight,
    /// Number of peer chains the block's atomic requests were addressed to.
    pub atomic_peers: usize,
}

/// A proposal was decided. `won` is whether its initially preferred option was accepted.
pub struct OptionVoteEvent {
    pub timestamp: SystemTime,
    pub proposal: BlockID,
    pub won: bool,
}

pub struct EvictBlockStateEvent {
    pub timestamp: SystemTime,
    pub block: BlockID,
}

/// A block's execution state was reaped without the block being accepted.
pub struct RejectBlockEvent {
    pub timestamp: SystemTime,
    pub block: BlockID,
}
