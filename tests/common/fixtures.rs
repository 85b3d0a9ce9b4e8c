//! Builders of blocks and execution states, and test doubles of the acceptor's collaborators.

use std::{
    sync::{
        mpsc::{self, Receiver},
        Arc, Mutex,
    },
    time::Duration,
};

use block_acceptor::{
    acceptor::Acceptor,
    config::AcceptorConfiguration,
    events::Event,
    execution::BlockState,
    metrics::{Metrics, MetricsError},
    shared_memory::{SharedMemory, SharedMemoryError},
    state::persistent::{LocalBatch, PersistentState},
    types::{
        block::{Block, BlockBody, Generation, Transaction},
        data_types::{BlockHeight, BlockID, ChainID, Timestamp},
        update_sets::{AtomicRequests, StateDiff},
    },
};

use super::mem_db::MemDB;

pub(crate) const CHAIN: ChainID = ChainID::new(1);
pub(crate) const PEER: ChainID = ChainID::new(2);

pub(crate) fn genesis() -> Block {
    Block::genesis(Timestamp::new(1_700_000_000))
}

fn random_transaction() -> Transaction {
    Transaction::new(rand::random::<[u8; 16]>().to_vec())
}

pub(crate) fn standard_block(parent: &Block) -> Block {
    Block::new(
        parent.id,
        parent.height + 1,
        Generation::Untimed,
        BlockBody::Standard {
            transactions: vec![random_transaction(), random_transaction()],
        },
    )
}

pub(crate) fn atomic_block(parent: &Block) -> Block {
    Block::new(
        parent.id,
        parent.height + 1,
        Generation::Untimed,
        BlockBody::Atomic {
            transaction: random_transaction(),
        },
    )
}

pub(crate) fn proposal_block(parent: &Block) -> Block {
    Block::new(
        parent.id,
        parent.height + 1,
        Generation::Timed {
            timestamp: Timestamp::new(1_700_000_000 + parent.height.int() + 1),
        },
        BlockBody::Proposal {
            transaction: random_transaction(),
        },
    )
}

pub(crate) fn commit_block(proposal: &Block) -> Block {
    Block::new(
        proposal.id,
        proposal.height + 1,
        proposal.generation,
        BlockBody::Commit,
    )
}

pub(crate) fn abort_block(proposal: &Block) -> Block {
    Block::new(
        proposal.id,
        proposal.height + 1,
        proposal.generation,
        BlockBody::Abort,
    )
}

/// A diff that credits `amount` to `account`.
pub(crate) fn credit(account: &[u8], amount: u64) -> StateDiff {
    let mut diff = StateDiff::new();
    diff.change_balance(account.to_vec(), amount as i128);
    diff
}

/// Record of every call made to [`RecordingMetrics`].
#[derive(Default, Debug)]
pub(crate) struct MetricsLog {
    pub(crate) accepted: Vec<BlockID>,
    pub(crate) votes_won: usize,
    pub(crate) votes_lost: usize,
}

/// [`Metrics`] that records every call. Clones share the same record.
#[derive(Clone, Default)]
pub(crate) struct RecordingMetrics {
    log: Arc<Mutex<MetricsLog>>,
    /// Number of `mark_accepted` calls that succeed before every later one fails.
    fail_after: Option<usize>,
}

impl RecordingMetrics {
    /// Metrics whose `mark_accepted` always fails.
    pub(crate) fn failing() -> RecordingMetrics {
        RecordingMetrics::failing_after(0)
    }

    /// Metrics whose first `successes` calls to `mark_accepted` succeed.
    pub(crate) fn failing_after(successes: usize) -> RecordingMetrics {
        RecordingMetrics {
            log: Arc::default(),
            fail_after: Some(successes),
        }
    }

    pub(crate) fn accepted(&self) -> Vec<BlockID> {
        self.log.lock().unwrap().accepted.clone()
    }

    pub(crate) fn votes(&self) -> (usize, usize) {
        let log = self.log.lock().unwrap();
        (log.votes_won, log.votes_lost)
    }
}

impl Metrics for RecordingMetrics {
    fn mark_accepted(&self, block: &Block) -> Result<(), MetricsError> {
        let mut log = self.log.lock().unwrap();
        if matches!(self.fail_after, Some(successes) if log.accepted.len() >= successes) {
            return Err(MetricsError::HeightOutOfRange(block.height.int()));
        }
        log.accepted.push(block.id);
        Ok(())
    }

    fn mark_option_vote_won(&self) {
        self.log.lock().unwrap().votes_won += 1;
    }

    fn mark_option_vote_lost(&self) {
        self.log.lock().unwrap().votes_lost += 1;
    }
}

/// [`SharedMemory`] that rejects every application without writing anything.
#[derive(Clone, Default)]
pub(crate) struct FailingSharedMemory {
    calls: Arc<Mutex<usize>>,
}

impl FailingSharedMemory {
    pub(crate) fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

impl SharedMemory<MemDB> for FailingSharedMemory {
    fn apply(
        &self,
        _requests: &AtomicRequests,
        _batch: LocalBatch<MemDB>,
    ) -> Result<(), SharedMemoryError> {
        *self.calls.lock().unwrap() += 1;
        Err(SharedMemoryError::Poisoned)
    }
}

/// A freshly initialized chain and the handles tests inspect it through.
pub(crate) struct TestChain<S: SharedMemory<MemDB>> {
    pub(crate) acceptor: Acceptor<MemDB, S, RecordingMetrics>,
    pub(crate) kv_store: MemDB,
    pub(crate) metrics: RecordingMetrics,
    pub(crate) events: Receiver<Event>,
    pub(crate) genesis: Block,
}

impl<S: SharedMemory<MemDB>> TestChain<S> {
    pub(crate) fn new(shared_memory: S) -> TestChain<S> {
        TestChain::with_metrics(shared_memory, RecordingMetrics::default())
    }

    pub(crate) fn with_metrics(shared_memory: S, metrics: RecordingMetrics) -> TestChain<S> {
        let kv_store = MemDB::new();
        let genesis = genesis();
        let mut state = PersistentState::new(kv_store.clone());
        assert!(state.initialize(&genesis).unwrap());

        let configuration = AcceptorConfiguration::builder()
            .chain_id(CHAIN)
            .recently_accepted_window_size(8)
            .recently_accepted_window_ttl(Duration::from_secs(60))
            .log_events(false)
            .build();

        let (event_publisher, events) = mpsc::channel();
        let acceptor = Acceptor::new(
            &configuration,
            state,
            shared_memory,
            metrics.clone(),
            Some(event_publisher),
        )
        .unwrap();

        TestChain {
            acceptor,
            kv_store,
            metrics,
            events,
            genesis,
        }
    }

    /// Track and accept `n` standard blocks on top of `parent`, returning the last one.
    pub(crate) fn accept_standard_blocks(&mut self, parent: &Block, n: u64) -> Block {
        let mut parent = parent.clone();
        for _ in 0..n {
            let block = standard_block(&parent);
            self.acceptor
                .track(BlockState::new(block.clone(), StateDiff::new()));
            self.acceptor.accept(&block).unwrap();
            parent = block;
        }
        parent
    }

    /// Durable height, read straight from the key-value store.
    pub(crate) fn durable_height(&self) -> BlockHeight {
        use block_acceptor::state::pluggables::KVGet;
        self.kv_store.height().unwrap().unwrap()
    }

    pub(crate) fn durable_last_accepted(&self) -> BlockID {
        use block_acceptor::state::pluggables::KVGet;
        self.kv_store.last_accepted().unwrap().unwrap()
    }

    pub(crate) fn drain_events(&self) -> Vec<Event> {
        self.events.try_iter().collect()
    }
}
