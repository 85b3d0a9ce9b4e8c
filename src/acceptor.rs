/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The orchestrator that turns consensus decisions into durable state.
//!
//! Once consensus has decided a block, the host calls [`Acceptor::accept`] on it. What accepting a
//! block means depends on the block's [body](crate::types::block::BlockBody):
//!
//! |Body|Effect|
//! |---|---|
//! |`Proposal`|Only the in-memory last accepted pointer moves. Nothing is written, nothing is counted.|
//! |`Commit`, `Abort`|The parent proposal and then the option are accepted, the option's diff is applied, and everything is committed in one write.|
//! |`Standard`, `Atomic`|The block is accepted, its diff is applied, and the resulting batch is written by the [shared memory](crate::shared_memory) together with the block's atomic requests.|
//!
//! After a successful `accept`, the execution state of every block it accepted is evicted. Accepting
//! the same block again therefore fails instead of applying its diff twice.
//!
//! # Errors
//!
//! Every [`AcceptError`] is fatal. A host that gets one back must stop processing blocks for this chain.
//! Retrying could double-apply atomic requests, and skipping would build later blocks on a state
//! that does not contain this one.

use std::{
    fmt::{self, Display},
    sync::mpsc::Sender,
    time::SystemTime,
};

use crate::{
    config::AcceptorConfiguration,
    events::*,
    execution::{BlockState, BlockStates},
    metrics::{Metrics, MetricsError},
    shared_memory::{SharedMemory, SharedMemoryError},
    state::{
        persistent::{PersistentState, StateError},
        pluggables::{KVGet, KVStore},
    },
    types::{
        block::{Block, BlockBody, Status},
        data_types::{BlockID, ChainID},
    },
    window::Window,
};

/// Accepts decided blocks for a single chain.
///
/// At most one `accept` call may be in flight per chain. `Acceptor` holds no locks: every method takes
/// `&mut self`, so the borrow checker enforces this.
pub struct Acceptor<K: KVStore, S: SharedMemory<K>, M: Metrics> {
    chain_id: ChainID,
    state: PersistentState<K>,
    block_states: BlockStates,
    last_accepted: BlockID,
    bootstrapped: bool,
    metrics: M,
    recently_accepted: Window<BlockID>,
    shared_memory: S,
    event_publisher: Option<Sender<Event>>,
}

impl<K: KVStore, S: SharedMemory<K>, M: Metrics> Acceptor<K, S, M> {
    /// Create an acceptor whose last accepted block is the one recorded in `state`.
    ///
    /// `state` must already be [initialized](PersistentState::initialize).
    pub fn new(
        config: &AcceptorConfiguration,
        state: PersistentState<K>,
        shared_memory: S,
        metrics: M,
        event_publisher: Option<Sender<Event>>,
    ) -> Result<Self, StateError> {
        let last_accepted = state.last_accepted()?;
        log::debug!(
            "starting acceptor for chain {} at last accepted block {}",
            config.chain_id,
            last_accepted
        );

        Ok(Acceptor {
            chain_id: config.chain_id,
            state,
            block_states: BlockStates::new(),
            last_accepted,
            bootstrapped: false,
            metrics,
            recently_accepted: Window::new(config.window_config()),
            shared_memory,
            event_publisher,
        })
    }

    /// Accept `block`, which consensus has decided.
    pub fn accept(&mut self, block: &Block) -> Result<(), AcceptError> {
        log::trace!(
            "accepting block: chain = {}, type = {}, id = {}, height = {}, parent = {}",
            self.chain_id,
            block.type_label(),
            block.id,
            block.height,
            block.parent
        );

        match &block.body {
            BlockBody::Proposal { .. } => self.proposal_block(block),
            BlockBody::Commit => self.option_block(block, true),
            BlockBody::Abort => self.option_block(block, false),
            BlockBody::Standard { .. } | BlockBody::Atomic { .. } => self.decision_block(block),
        }
    }

    /// Start tracking the execution state of a verified block.
    ///
    /// Returns the state previously tracked for the same block, if any.
    pub fn track(&mut self, block_state: BlockState) -> Option<BlockState> {
        self.block_states.insert(block_state)
    }

    /// Evict the execution state of a block that consensus rejected.
    ///
    /// Returns whether the block was being tracked.
    pub fn reject(&mut self, block: &BlockID) -> bool {
        match self.block_states.remove(block) {
            Some(_) => {
                Event::RejectBlock(RejectBlockEvent {
                    timestamp: SystemTime::now(),
                    block: *block,
                })
                .publish(&self.event_publisher);
                true
            }
            None => false,
        }
    }

    /// Evict the execution state of every tracked block at or below the durable height.
    ///
    /// No such block can be accepted anymore. In particular, this evicts the undecided sibling of the
    /// last accepted option block. Returns the IDs of evicted blocks in ascending height order.
    pub fn prune_stale(&mut self) -> Result<Vec<BlockID>, StateError> {
        let durable_height = self
            .state
            .kv_store()
            .height()?
            .ok_or(StateError::NotInitialized)?;

        let pruned = self.block_states.reap_at_or_below(durable_height);
        for block in &pruned {
            Event::RejectBlock(RejectBlockEvent {
                timestamp: SystemTime::now(),
                block: *block,
            })
            .publish(&self.event_publisher);
        }
        Ok(pruned)
    }

    /// Set whether the chain has finished bootstrapping. Option votes are only counted afterwards.
    pub fn set_bootstrapped(&mut self, bootstrapped: bool) {
        self.bootstrapped = bootstrapped
    }

    pub fn is_bootstrapped(&self) -> bool {
        self.bootstrapped
    }

    pub fn chain_id(&self) -> ChainID {
        self.chain_id
    }

    /// Get the last accepted block. This may be a proposal whose option has not been accepted yet, in
    /// which case it differs from the durable last accepted block.
    pub fn last_accepted(&self) -> BlockID {
        self.last_accepted
    }

    pub fn state(&self) -> &PersistentState<K> {
        &self.state
    }

    pub fn block_states(&self) -> &BlockStates {
        &self.block_states
    }

    pub fn metrics(&self) -> &M {
        &self.metrics
    }

    pub fn shared_memory(&self) -> &S {
        &self.shared_memory
    }

    /// Check whether `block` was accepted recently.
    pub fn recently_accepted(&mut self, block: &BlockID) -> bool {
        self.recently_accepted.contains(block)
    }
}

/// Handlers of each kind of block.
impl<K: KVStore, S: SharedMemory<K>, M: Metrics> Acceptor<K, S, M> {
    fn proposal_block(&mut self, block: &Block) -> Result<(), AcceptError> {
        if !self.block_states.contains(&block.id) {
            return Err(AcceptError::MissingBlockState { block: block.id });
        }

        // The proposal stays resident: its option consumes it.
        self.last_accepted = block.id;
        Ok(())
    }

    fn option_block(&mut self, block: &Block, is_commit: bool) -> Result<(), AcceptError> {
        if !self.block_states.contains(&block.id) {
            return Err(AcceptError::MissingBlockState { block: block.id });
        }
        let parent_state =
            self.block_states
                .get(&block.parent)
                .ok_or(AcceptError::MissingParentState {
                    block: block.id,
                    parent: block.parent,
                })?;
        let parent = parent_state.block.clone();
        let won = parent_state.initially_prefer_commit == is_commit;

        self.common_accept(&parent)?;
        self.common_accept(block)?;

        // The option's diff already carries the proposal's effects.
        self.apply_on_accept_state(&block.id)?;
        if let Err(source) = self.state.commit() {
            self.state.abort();
            return Err(AcceptError::Commit {
                block: block.id,
                source,
            });
        }
        self.publish_commit(block, 0);

        // Only a committed option counts as a vote.
        if self.bootstrapped {
            if won {
                self.metrics.mark_option_vote_won();
            } else {
                self.metrics.mark_option_vote_lost();
            }
            Event::OptionVote(OptionVoteEvent {
                timestamp: SystemTime::now(),
                proposal: parent.id,
                won,
            })
            .publish(&self.event_publisher);
        }

        self.evict(&parent.id);
        self.evict(&block.id);
        Ok(())
    }

    /// Standard and atomic blocks.
    fn decision_block(&mut self, block: &Block) -> Result<(), AcceptError> {
        if !self.block_states.contains(&block.id) {
            return Err(AcceptError::MissingBlockState { block: block.id });
        }
        if block.parent != self.last_accepted {
            return Err(if self.block_states.contains(&block.parent) {
                AcceptError::ParentNotAccepted {
                    block: block.id,
                    parent: block.parent,
                    last_accepted: self.last_accepted,
                }
            } else {
                AcceptError::MissingParentState {
                    block: block.id,
                    parent: block.parent,
                }
            });
        }

        self.common_accept(block)?;
        self.apply_on_accept_state(&block.id)?;

        let block_state = self
            .block_states
            .get(&block.id)
            .ok_or(AcceptError::MissingBlockState { block: block.id })?;
        let atomic_peers = block_state.atomic_requests.len();

        // Dropping `batch` on any early return aborts the staged writes.
        let mut batch = self
            .state
            .commit_batch()
            .map_err(|source| AcceptError::CommitBatch {
                block: block.id,
                source,
            })?;
        let local_batch = batch.take().map_err(|source| AcceptError::CommitBatch {
            block: block.id,
            source,
        })?;
        self.shared_memory
            .apply(&block_state.atomic_requests, local_batch)
            .map_err(|source| AcceptError::SharedMemory {
                block: block.id,
                source,
            })?;
        batch.finalize();
        self.publish_commit(block, atomic_peers);

        if let Some(on_accept) = self
            .block_states
            .get_mut(&block.id)
            .and_then(|block_state| block_state.on_accept.take())
        {
            on_accept();
        }
        self.evict(&block.id);
        Ok(())
    }
}

/// Steps shared between handlers.
impl<K: KVStore, S: SharedMemory<K>, M: Metrics> Acceptor<K, S, M> {
    /// Record `block` as accepted in metrics, in memory, and in the staged state. Nothing is
    /// committed.
    ///
    /// On failure, everything staged so far is aborted, including the writes of an option's parent.
    fn common_accept(&mut self, block: &Block) -> Result<(), AcceptError> {
        if let Err(source) = self.metrics.mark_accepted(block) {
            self.state.abort();
            return Err(AcceptError::MarkAccepted {
                block: block.id,
                source,
            });
        }

        self.last_accepted = block.id;
        self.state.set_last_accepted(block.id);
        self.state.set_height(block.height);
        self.state.add_block_record(block, Status::Accepted);
        self.recently_accepted.add(block.id);

        Event::AcceptBlock(AcceptBlockEvent {
            timestamp: SystemTime::now(),
            block: block.id,
            height: block.height,
            kind: block.kind(),
        })
        .publish(&self.event_publisher);

        Ok(())
    }

    fn apply_on_accept_state(&mut self, block: &BlockID) -> Result<(), AcceptError> {
        let block_state = self
            .block_states
            .get(block)
            .ok_or(AcceptError::MissingBlockState { block: *block })?;

        if let Err(source) = self.state.apply_diff(&block_state.on_accept_state) {
            self.state.abort();
            return Err(AcceptError::ApplyDiff {
                block: *block,
                source,
            });
        }
        Ok(())
    }

    fn publish_commit(&self, block: &Block, atomic_peers: usize) {
        Event::CommitBlock(CommitBlockEvent {
            timestamp: SystemTime::now(),
            block: block.id,
            height: block.height,
            atomic_peers,
        })
        .publish(&self.event_publisher);
    }

    fn evict(&mut self, block: &BlockID) {
        if self.block_states.remove(block).is_some() {
            Event::EvictBlockState(EvictBlockStateEvent {
                timestamp: SystemTime::now(),
                block: *block,
            })
            .publish(&self.event_publisher);
        }
    }
}

/// Error when accepting a block. Each variant names the block being accepted.
#[derive(Debug)]
pub enum AcceptError {
    /// The block's parent has no execution state, and is not the last accepted block.
    MissingParentState { block: BlockID, parent: BlockID },

    /// The block itself has no execution state: it was never tracked, or it was already accepted.
    MissingBlockState { block: BlockID },

    /// The block's parent is tracked but is not the last accepted block.
    ParentNotAccepted {
        block: BlockID,
        parent: BlockID,
        last_accepted: BlockID,
    },

    MarkAccepted { block: BlockID, source: MetricsError },

    ApplyDiff { block: BlockID, source: StateError },

    CommitBatch { block: BlockID, source: StateError },

    Commit { block: BlockID, source: StateError },

    SharedMemory {
        block: BlockID,
        source: SharedMemoryError,
    },
}

impl AcceptError {
    /// Whether the host must stop processing blocks for the chain. Always `true`.
    pub fn is_fatal(&self) -> bool {
        true
    }

    pub fn block(&self) -> BlockID {
        match self {
            AcceptError::MissingParentState { block, .. }
            | AcceptError::MissingBlockState { block }
            | AcceptError::ParentNotAccepted { block, .. }
            | AcceptError::MarkAccepted { block, .. }
            | AcceptError::ApplyDiff { block, .. }
            | AcceptError::CommitBatch { block, .. }
            | AcceptError::Commit { block, .. }
            | AcceptError::SharedMemory { block, .. } => *block,
        }
    }
}

impl Display for AcceptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AcceptError::MissingParentState { block, parent } => write!(
                f,
                "accept {}: missing execution state of parent {}",
                block, parent
            ),
            AcceptError::MissingBlockState { block } => {
                write!(f, "accept {}: missing execution state", block)
            }
            AcceptError::ParentNotAccepted {
                block,
                parent,
                last_accepted,
            } => write!(
                f,
                "accept {}: parent {} is not the last accepted block {}",
                block, parent, last_accepted
            ),
            AcceptError::MarkAccepted { block, source } => {
                write!(f, "accept {}: mark accepted: {}", block, source)
            }
            AcceptError::ApplyDiff { block, source } => {
                write!(f, "accept {}: apply diff: {}", block, source)
            }
            AcceptError::CommitBatch { block, source } => {
                write!(f, "accept {}: commit batch: {}", block, source)
            }
            AcceptError::Commit { block, source } => {
                write!(f, "accept {}: commit: {}", block, source)
            }
            AcceptError::SharedMemory { block, source } => {
                write!(f, "accept {}: apply atomic requests: {}", block, source)
            }
        }
    }
}

impl std::error::Error for AcceptError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AcceptError::MarkAccepted { source, .. } => Some(source),
            AcceptError::ApplyDiff { source, .. }
            | AcceptError::CommitBatch { source, .. }
            | AcceptError::Commit { source, .. } => Some(source),
            AcceptError::SharedMemory { source, .. } => Some(source),
            _ => None,
        }
    }
}
