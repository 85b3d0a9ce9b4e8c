/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Tests of a [`Chain`](block_acceptor::chain::Chain) started through the builder, with Prometheus
//! metrics and event handlers running on the event bus.

mod common;

use std::sync::{Arc, Mutex};

use block_acceptor::{
    chain::ChainSpec,
    config::AcceptorConfiguration,
    events::{CommitBlockEvent, OptionVoteEvent},
    execution::BlockState,
    metrics::PrometheusMetrics,
    shared_memory::InMemorySharedMemory,
    state::pluggables::KVGet,
    types::{block::BlockKind, data_types::BlockID, update_sets::StateDiff},
};
use log::LevelFilter;
use prometheus::Registry;

use common::{
    fixtures::{commit_block, credit, genesis, proposal_block, standard_block, CHAIN},
    logging::setup_logger,
    mem_db::MemDB,
};

#[test]
fn chain_publishes_events_and_metrics() {
    setup_logger(LevelFilter::Trace);

    let kv_store = MemDB::new();
    let registry = Registry::new();
    let metrics = PrometheusMetrics::register("test_chain", &registry).unwrap();
    let shared_memory = InMemorySharedMemory::new();
    let genesis = genesis();

    let committed: Arc<Mutex<Vec<BlockID>>> = Arc::default();
    let votes: Arc<Mutex<Vec<bool>>> = Arc::default();
    let committed_handle = committed.clone();
    let votes_handle = votes.clone();

    let mut chain = ChainSpec::builder()
        .kv_store(kv_store.clone())
        .shared_memory(shared_memory.for_chain(CHAIN))
        .metrics(metrics.clone())
        .genesis(genesis.clone())
        .configuration(
            AcceptorConfiguration::builder()
                .chain_id(CHAIN)
                .log_events(true)
                .build(),
        )
        .on_commit_block(move |event: &CommitBlockEvent| {
            committed_handle.lock().unwrap().push(event.block)
        })
        .on_option_vote(move |event: &OptionVoteEvent| votes_handle.lock().unwrap().push(event.won))
        .build()
        .start()
        .unwrap();

    let acceptor = chain.acceptor_mut();
    acceptor.set_bootstrapped(true);

    let block = standard_block(&genesis);
    acceptor.track(BlockState::new(block.clone(), credit(b"alice", 3)));
    acceptor.accept(&block).unwrap();

    let proposal = proposal_block(&block);
    let commit = commit_block(&proposal);
    acceptor.track(BlockState::new(proposal.clone(), StateDiff::new()).with_initial_preference(false));
    acceptor.track(BlockState::new(commit.clone(), credit(b"alice", 4)));
    acceptor.accept(&proposal).unwrap();
    acceptor.accept(&commit).unwrap();

    assert_eq!(kv_store.balance(b"alice").unwrap(), 7);
    assert_eq!(kv_store.last_accepted().unwrap(), Some(commit.id));

    assert_eq!(
        metrics
            .blocks_accepted
            .with_label_values(&[BlockKind::Standard.label()])
            .get(),
        1
    );
    assert_eq!(
        metrics
            .blocks_accepted
            .with_label_values(&[BlockKind::Proposal.label()])
            .get(),
        1
    );
    assert_eq!(metrics.txs_accepted.get(), 3);
    assert_eq!(metrics.option_votes_lost.get(), 1);
    assert_eq!(metrics.option_votes_won.get(), 0);
    assert_eq!(metrics.last_accepted_height.get(), 3);
    assert!(!registry.gather().is_empty());

    // Dropping the chain flushes the event bus.
    drop(chain);
    assert_eq!(*committed.lock().unwrap(), vec![block.id, commit.id]);
    assert_eq!(*votes.lock().unwrap(), vec![false]);
}

#[test]
fn restarting_a_chain_does_not_reinitialize_it() {
    let kv_store = MemDB::new();
    let shared_memory = InMemorySharedMemory::new();
    let genesis = genesis();
    let start = || {
        ChainSpec::builder()
            .kv_store(kv_store.clone())
            .shared_memory(shared_memory.for_chain(CHAIN))
            .metrics(PrometheusMetrics::register("restart", &Registry::new()).unwrap())
            .genesis(genesis.clone())
            .configuration(
                AcceptorConfiguration::builder()
                    .chain_id(CHAIN)
                    .log_events(false)
                    .build(),
            )
            .build()
            .start()
            .unwrap()
    };

    let mut chain = start();
    let block = standard_block(&genesis);
    chain
        .acceptor_mut()
        .track(BlockState::new(block.clone(), StateDiff::new()));
    chain.acceptor_mut().accept(&block).unwrap();
    drop(chain);

    let chain = start();
    assert_eq!(chain.acceptor().last_accepted(), block.id);
}
