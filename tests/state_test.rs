mod common;

use block_acceptor::{
    state::{
        persistent::{PersistentState, StateError},
        pluggables::KVGet,
    },
    types::{
        block::Status,
        data_types::{BlockHeight, Timestamp},
        update_sets::StateDiff,
    },
};

use common::{
    fixtures::{credit, genesis, standard_block},
    mem_db::MemDB,
};

fn initialized_state() -> (PersistentState<MemDB>, MemDB) {
    let kv_store = MemDB::new();
    let mut state = PersistentState::new(kv_store.clone());
    assert!(state.initialize(&genesis()).unwrap());
    (state, kv_store)
}

#[test]
fn initialize_records_genesis_once() {
    let (mut state, kv_store) = initialized_state();
    let genesis = genesis();

    assert_eq!(kv_store.last_accepted().unwrap(), Some(genesis.id));
    assert_eq!(kv_store.height().unwrap(), Some(BlockHeight::new(0)));
    assert_eq!(kv_store.block_status(&genesis.id).unwrap(), Some(Status::Accepted));
    assert_eq!(kv_store.block(&genesis.id).unwrap(), Some(genesis.clone()));
    assert_eq!(
        kv_store.chain_time().unwrap(),
        Some(Timestamp::new(1_700_000_000))
    );

    assert!(!state.initialize(&genesis).unwrap());
    assert_eq!(kv_store.batches_written(), 1);
}

#[test]
fn uninitialized_state_has_no_last_accepted() {
    let state = PersistentState::new(MemDB::new());
    assert!(matches!(state.last_accepted(), Err(StateError::NotInitialized)));
}

#[test]
fn applying_a_diff_twice_applies_it_twice() {
    let (mut state, kv_store) = initialized_state();
    let diff = credit(b"alice", 10);

    state.apply_diff(&diff).unwrap();
    state.apply_diff(&diff).unwrap();
    assert_eq!(state.balance(b"alice").unwrap(), 20);

    state.commit().unwrap();
    assert_eq!(kv_store.balance(b"alice").unwrap(), 20);
}

#[test]
fn balance_underflow_stages_nothing() {
    let (mut state, kv_store) = initialized_state();

    let mut diff = StateDiff::new();
    diff.insert(b"key".to_vec(), b"value".to_vec());
    diff.transfer(b"alice".to_vec(), b"bob".to_vec(), 5);

    assert!(matches!(
        state.apply_diff(&diff),
        Err(StateError::BalanceUnderflow { .. })
    ));
    assert!(!state.has_staged_writes());
    assert_eq!(state.app_state(b"key"), None);
    assert_eq!(kv_store.batches_written(), 1);
}

#[test]
fn balance_overflow_is_an_error() {
    let (mut state, kv_store) = initialized_state();
    state.apply_diff(&credit(b"alice", 1)).unwrap();
    state.commit().unwrap();

    let mut diff = StateDiff::new();
    diff.change_balance(b"alice".to_vec(), i128::MAX);
    assert!(matches!(
        state.apply_diff(&diff),
        Err(StateError::BalanceOverflow { balance: 1, change: i128::MAX, .. })
    ));

    let mut diff = StateDiff::new();
    diff.change_balance(b"alice".to_vec(), u64::MAX as i128);
    assert!(matches!(
        state.apply_diff(&diff),
        Err(StateError::BalanceOverflow { .. })
    ));

    assert!(!state.has_staged_writes());
    assert_eq!(kv_store.balance(b"alice").unwrap(), 1);
}

#[test]
fn staged_writes_are_readable_but_not_durable() {
    let (mut state, kv_store) = initialized_state();
    let block = standard_block(&genesis());

    state.set_last_accepted(block.id);
    state.set_height(block.height);
    state.add_block_record(&block, Status::Accepted);

    assert_eq!(state.last_accepted().unwrap(), block.id);
    assert_eq!(state.height().unwrap(), BlockHeight::new(1));
    assert_eq!(kv_store.last_accepted().unwrap(), Some(genesis().id));
    assert_eq!(state.block_status(&block.id).unwrap(), None);

    state.commit().unwrap();
    assert_eq!(kv_store.last_accepted().unwrap(), Some(block.id));
    assert_eq!(
        kv_store.block_at_height(BlockHeight::new(1)).unwrap(),
        Some(block.id)
    );
    assert!(!state.has_staged_writes());
}

#[test]
fn abort_discards_staged_writes_and_is_idempotent() {
    let (mut state, kv_store) = initialized_state();

    state.apply_diff(&credit(b"alice", 10)).unwrap();
    state.set_height(BlockHeight::new(7));
    state.abort();
    state.abort();

    assert_eq!(state.balance(b"alice").unwrap(), 0);
    assert_eq!(state.height().unwrap(), BlockHeight::new(0));
    state.commit().unwrap();
    assert_eq!(kv_store.height().unwrap(), Some(BlockHeight::new(0)));
}

#[test]
fn dropped_scoped_batch_aborts() {
    let (mut state, kv_store) = initialized_state();
    state.apply_diff(&credit(b"alice", 10)).unwrap();

    {
        let mut batch = state.commit_batch().unwrap();
        let _unwritten = batch.take().unwrap();
        assert!(matches!(batch.take(), Err(StateError::BatchAlreadyTaken)));
    }

    assert!(!state.has_staged_writes());
    assert_eq!(state.balance(b"alice").unwrap(), 0);
    assert_eq!(kv_store.balance(b"alice").unwrap(), 0);
}

#[test]
fn finalized_scoped_batch_keeps_written_state() {
    let (mut state, kv_store) = initialized_state();
    state.apply_diff(&credit(b"alice", 10)).unwrap();

    let mut batch = state.commit_batch().unwrap();
    batch.take().unwrap().write();
    batch.finalize();

    assert!(!state.has_staged_writes());
    assert_eq!(state.balance(b"alice").unwrap(), 10);
    assert_eq!(kv_store.balance(b"alice").unwrap(), 10);
}
