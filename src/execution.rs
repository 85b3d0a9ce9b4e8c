/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Transient, in-memory state of blocks that have been verified but not yet accepted.
//!
//! Every block reachable from a block being accepted, back to the last accepted block, must have a
//! [`BlockState`] in the [`BlockStates`] mapping until it is explicitly evicted. A missing entry is
//! always a consistency violation, never "not yet known" and never "already applied".

use std::{collections::HashMap, fmt};

use crate::types::{
    block::Block,
    data_types::{BlockHeight, BlockID},
    update_sets::{AtomicRequests, StateDiff},
};

/// Closure invoked after a block's effects are durable. Not protocol-critical.
pub type OnAcceptCallback = Box<dyn FnOnce() + Send>;

pub struct BlockState {
    pub block: Block,

    /// Mutations to materialize into the persistent state when `block` is accepted.
    pub on_accept_state: StateDiff,

    pub atomic_requests: AtomicRequests,

    pub on_accept: Option<OnAcceptCallback>,

    /// For proposal blocks: whether the local proposer preferred the commit option before the block
    /// was decided. Only ever read to update metrics.
    pub initially_prefer_commit: bool,
}

impl BlockState {
    pub fn new(block: Block, on_accept_state: StateDiff) -> Self {
        BlockState {
            block,
            on_accept_state,
            atomic_requests: AtomicRequests::new(),
            on_accept: None,
            initially_prefer_commit: false,
        }
    }

    pub fn with_atomic_requests(mut self, atomic_requests: AtomicRequests) -> Self {
        self.atomic_requests = atomic_requests;
        self
    }

    pub fn with_on_accept(mut self, on_accept: impl FnOnce() + Send + 'static) -> Self {
        self.on_accept = Some(Box::new(on_accept));
        self
    }

    pub fn with_initial_preference(mut self, prefer_commit: bool) -> Self {
        self.initially_prefer_commit = prefer_commit;
        self
    }

    pub fn id(&self) -> BlockID {
        self.block.id
    }
}

impl fmt::Debug for BlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockState")
            .field("block", &self.block.id)
            .field("height", &self.block.height)
            .field("kind", &self.block.kind())
            .field("atomic_requests", &self.atomic_requests.len())
            .field("on_accept", &self.on_accept.is_some())
            .field("initially_prefer_commit", &self.initially_prefer_commit)
            .finish()
    }
}

/// The execution-state mapping, keyed by block ID.
#[derive(Default, Debug)]
pub struct BlockStates(HashMap<BlockID, BlockState>);

impl BlockStates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `state`, returning the state previously tracked for the same block, if any.
    pub fn insert(&mut self, state: BlockState) -> Option<BlockState> {
        self.0.insert(state.id(), state)
    }

    pub fn get(&self, block: &BlockID) -> Option<&BlockState> {
        self.0.get(block)
    }

    pub fn get_mut(&mut self, block: &BlockID) -> Option<&mut BlockState> {
        self.0.get_mut(block)
    }

    pub fn contains(&self, block: &BlockID) -> bool {
        self.0.contains_key(block)
    }

    /// Evict `block`'s state and hand it to the caller.
    pub fn remove(&mut self, block: &BlockID) -> Option<BlockState> {
        self.0.remove(block)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &BlockID> {
        self.0.keys()
    }

    /// Evict every state whose block is at or below `height`, returning the IDs of evicted blocks in
    /// ascending height order.
    ///
    /// Once a block at `height` is durably accepted, no block at or below it can still be accepted, so
    /// whatever remains there (e.g., the undecided sibling of an accepted option) is dead.
    pub fn reap_at_or_below(&mut self, height: BlockHeight) -> Vec<BlockID> {
        let mut stale: Vec<(BlockHeight, BlockID)> = self
            .0
            .values()
            .filter(|state| state.block.height <= height)
            .map(|state| (state.block.height, state.id()))
            .collect();
        stale.sort();

        stale
            .into_iter()
            .map(|(_, block)| {
                self.0.remove(&block);
                block
            })
            .collect()
    }
}
