mod common;

use std::{collections::HashMap, thread};

use block_acceptor::{
    shared_memory::{InMemorySharedMemory, SharedMemory, SharedMemoryError},
    state::{
        persistent::PersistentState,
        pluggables::KVGet,
    },
    types::{
        data_types::ChainID,
        update_sets::{AtomicRequests, Element, Requests},
    },
};

use common::{
    fixtures::{credit, genesis, CHAIN, PEER},
    mem_db::MemDB,
};

fn element(key: &[u8], value: &[u8]) -> Element {
    Element {
        key: key.to_vec(),
        value: value.to_vec(),
        traits: vec![b"owner".to_vec()],
    }
}

fn puts(peer: ChainID, elements: Vec<Element>) -> AtomicRequests {
    let mut requests = HashMap::new();
    requests.insert(
        peer,
        Requests {
            remove_requests: Vec::new(),
            put_requests: elements,
        },
    );
    requests
}

fn removes(peer: ChainID, keys: Vec<Vec<u8>>) -> AtomicRequests {
    let mut requests = HashMap::new();
    requests.insert(
        peer,
        Requests {
            remove_requests: keys,
            put_requests: Vec::new(),
        },
    );
    requests
}

/// A fresh store with `alice` credited 10, staged but not yet written.
fn staged_state() -> (PersistentState<MemDB>, MemDB) {
    let kv_store = MemDB::new();
    let mut state = PersistentState::new(kv_store.clone());
    state.initialize(&genesis()).unwrap();
    state.apply_diff(&credit(b"alice", 10)).unwrap();
    (state, kv_store)
}

#[test]
fn applied_batch_and_requests_land_together() {
    let shared_memory = InMemorySharedMemory::new();
    let (mut state, kv_store) = staged_state();

    let mut batch = state.commit_batch().unwrap();
    shared_memory
        .for_chain(CHAIN)
        .apply(&puts(PEER, vec![element(b"k", b"v")]), batch.take().unwrap())
        .unwrap();
    batch.finalize();

    assert_eq!(kv_store.balance(b"alice").unwrap(), 10);
    assert_eq!(
        shared_memory
            .for_chain(PEER)
            .get(CHAIN, &[b"k".to_vec()])
            .unwrap(),
        vec![b"v".to_vec()]
    );
}

#[test]
fn peer_can_consume_what_was_put() {
    let shared_memory = InMemorySharedMemory::new();
    let (mut state, _) = staged_state();
    let mut batch = state.commit_batch().unwrap();
    shared_memory
        .for_chain(CHAIN)
        .apply(&puts(PEER, vec![element(b"k", b"v")]), batch.take().unwrap())
        .unwrap();
    batch.finalize();

    let (mut peer_state, _) = staged_state();
    let peer = shared_memory.for_chain(PEER);
    let mut batch = peer_state.commit_batch().unwrap();
    peer.apply(&removes(CHAIN, vec![b"k".to_vec()]), batch.take().unwrap())
        .unwrap();
    batch.finalize();

    assert_eq!(
        peer.get(CHAIN, &[b"k".to_vec()]),
        Err(SharedMemoryError::MissingElement {
            peer: CHAIN,
            key: b"k".to_vec()
        })
    );
    assert!(peer.indexed(CHAIN, &[b"owner".to_vec()]).unwrap().is_empty());
}

#[test]
fn rejected_requests_write_nothing() {
    let shared_memory = InMemorySharedMemory::new();
    let handle = shared_memory.for_chain(CHAIN);

    let cases = [
        puts(CHAIN, vec![element(b"k", b"v")]),
        puts(PEER, vec![element(b"k", b"v"), element(b"k", b"w")]),
        removes(PEER, vec![b"absent".to_vec()]),
    ];

    for requests in cases {
        let (mut state, kv_store) = staged_state();
        let batches_before = kv_store.batches_written();

        let mut batch = state.commit_batch().unwrap();
        assert!(handle.apply(&requests, batch.take().unwrap()).is_err());
        drop(batch);

        assert_eq!(kv_store.batches_written(), batches_before);
        assert_eq!(kv_store.balance(b"alice").unwrap(), 0);
        assert!(!state.has_staged_writes());
    }

    assert!(shared_memory
        .for_chain(PEER)
        .indexed(CHAIN, &[b"owner".to_vec()])
        .unwrap()
        .is_empty());
}

#[test]
fn second_put_of_the_same_key_is_rejected() {
    let shared_memory = InMemorySharedMemory::new();
    let handle = shared_memory.for_chain(CHAIN);

    for expect_ok in [true, false] {
        let (mut state, _) = staged_state();
        let mut batch = state.commit_batch().unwrap();
        let result = handle.apply(&puts(PEER, vec![element(b"k", b"v")]), batch.take().unwrap());
        assert_eq!(result.is_ok(), expect_ok);
        if result.is_ok() {
            batch.finalize();
        }
    }
}

#[test]
fn concurrent_chains_are_serialized() {
    let shared_memory = InMemorySharedMemory::new();
    let chains: Vec<ChainID> = (10..18).map(ChainID::new).collect();

    let handles: Vec<_> = chains
        .iter()
        .map(|chain| {
            let handle = shared_memory.for_chain(*chain);
            thread::spawn(move || {
                for i in 0..20u8 {
                    let (mut state, _) = staged_state();
                    let mut batch = state.commit_batch().unwrap();
                    handle
                        .apply(&puts(PEER, vec![element(&[i], &[i])]), batch.take().unwrap())
                        .unwrap();
                    batch.finalize();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let peer = shared_memory.for_chain(PEER);
    for chain in chains {
        assert_eq!(peer.indexed(chain, &[b"owner".to_vec()]).unwrap().len(), 20);
    }
}
