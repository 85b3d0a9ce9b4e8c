/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Builder-pattern interface to start accepting blocks on a chain.
//!
//! A chain is started by:
//! 1. Building a [`ChainSpec`] with `ChainSpec::builder`, passing the chain's
//!    [key-value store](crate::state::pluggables::KVStore), [shared memory](crate::shared_memory),
//!    [metrics](crate::metrics), genesis block, [configuration](AcceptorConfiguration) and,
//!    optionally, event handlers.
//! 2. Calling [`ChainSpec::start`], which initializes the durable state if it is empty, starts the event
//!    bus if there are any handlers, and returns a [`Chain`].
//!
//! ```ignore
//! let chain = ChainSpec::builder()
//!     .kv_store(kv_store)
//!     .shared_memory(shared_memory.for_chain(chain_id))
//!     .metrics(PrometheusMetrics::register("chain", &registry)?)
//!     .genesis(Block::genesis(Timestamp::new(0)))
//!     .configuration(configuration)
//!     .on_commit_block(|event: &CommitBlockEvent| println!("committed {}", event.block))
//!     .build()
//!     .start()?;
//! ```

use std::{
    sync::mpsc::{self, Sender},
    thread::JoinHandle,
};

use typed_builder::TypedBuilder;

use crate::{
    acceptor::Acceptor,
    config::AcceptorConfiguration,
    event_bus::*,
    events::*,
    metrics::Metrics,
    shared_memory::SharedMemory,
    state::{
        persistent::{PersistentState, StateError},
        pluggables::KVStore,
    },
    types::block::Block,
};

/// Stores all necessary parameters and trait implementations required to start a [`Chain`].
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [ChainSpec]. On the builder call the following methods to construct a valid [ChainSpec].

    Required:
    - `.kv_store(...)`
    - `.shared_memory(...)`
    - `.metrics(...)`
    - `.genesis(...)`
    - `.configuration(...)`

    Optional:
    - `.on_accept_block(...)`
    - `.on_commit_block(...)`
    - `.on_option_vote(...)`
    - `.on_evict_block_state(...)`
    - `.on_reject_block(...)`
"))]
pub struct ChainSpec<K: KVStore, S: SharedMemory<K>, M: Metrics> {
    // Required parameters
    #[builder(setter(doc = "Set the implementation of the chain's Key-Value store. The argument must implement the [KVStore](crate::state::pluggables::KVStore) trait. Required."))]
    kv_store: K,
    #[builder(setter(doc = "Set the chain's view of shared memory. The argument must implement the [SharedMemory](crate::shared_memory::SharedMemory) trait. Required."))]
    shared_memory: S,
    #[builder(setter(doc = "Set the sink of acceptance metrics. The argument must implement the [Metrics](crate::metrics::Metrics) trait. Required."))]
    metrics: M,
    #[builder(setter(doc = "Set the genesis block, recorded as accepted if the Key-Value store is empty. Required."))]
    genesis: Block,
    #[builder(setter(doc = "Set the [configuration](AcceptorConfiguration). Required."))]
    configuration: AcceptorConfiguration,
    // Optional parameters
    #[builder(default, setter(transform = |handler: impl Fn(&AcceptBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<AcceptBlockEvent>),
    doc = "Register a handler closure to be invoked after a block is accepted in memory. Optional."))]
    on_accept_block: Option<HandlerPtr<AcceptBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CommitBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CommitBlockEvent>),
    doc = "Register a handler closure to be invoked after a block's effects are durable. Optional."))]
    on_commit_block: Option<HandlerPtr<CommitBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&OptionVoteEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<OptionVoteEvent>),
    doc = "Register a handler closure to be invoked after a proposal's vote outcome is recorded. Optional."))]
    on_option_vote: Option<HandlerPtr<OptionVoteEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&EvictBlockStateEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<EvictBlockStateEvent>),
    doc = "Register a handler closure to be invoked after an accepted block's execution state is evicted. Optional."))]
    on_evict_block_state: Option<HandlerPtr<EvictBlockStateEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&RejectBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<RejectBlockEvent>),
    doc = "Register a handler closure to be invoked after an unaccepted block's execution state is reaped. Optional."))]
    on_reject_block: Option<HandlerPtr<RejectBlockEvent>>,
}

impl<K: KVStore, S: SharedMemory<K>, M: Metrics> ChainSpec<K, S, M> {
    /// Initialize the chain's durable state if needed, start the event bus, and return the [`Chain`].
    pub fn start(self) -> Result<Chain<K, S, M>, StateError> {
        let mut state = PersistentState::new(self.kv_store);
        if state.initialize(&self.genesis)? {
            log::info!(
                "initialized chain {} with genesis block {}",
                self.configuration.chain_id,
                self.genesis.id
            );
        }

        let event_handlers = EventHandlers::new(
            self.configuration.log_events,
            self.on_accept_block,
            self.on_commit_block,
            self.on_option_vote,
            self.on_evict_block_state,
            self.on_reject_block,
        );

        let (event_publisher, event_subscriber) = if !event_handlers.is_empty() {
            Some(mpsc::channel()).unzip()
        } else {
            (None, None)
        };

        let acceptor = Acceptor::new(
            &self.configuration,
            state,
            self.shared_memory,
            self.metrics,
            event_publisher,
        )?;

        let (event_bus, event_bus_shutdown) = match event_subscriber {
            Some(event_subscriber) => {
                let (shutdown, shutdown_receiver) = mpsc::channel();
                (
                    Some(start_event_bus(
                        event_handlers,
                        event_subscriber,
                        shutdown_receiver,
                    )),
                    Some(shutdown),
                )
            }
            None => (None, None),
        };

        Ok(Chain {
            acceptor,
            event_bus,
            event_bus_shutdown,
        })
    }
}

/// A chain's [`Acceptor`] and the handle to its event bus thread. When this value is dropped, the event
/// bus handles every event already published and then shuts down.
pub struct Chain<K: KVStore, S: SharedMemory<K>, M: Metrics> {
    acceptor: Acceptor<K, S, M>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl<K: KVStore, S: SharedMemory<K>, M: Metrics> Chain<K, S, M> {
    pub fn acceptor(&self) -> &Acceptor<K, S, M> {
        &self.acceptor
    }

    pub fn acceptor_mut(&mut self) -> &mut Acceptor<K, S, M> {
        &mut self.acceptor
    }
}

impl<K: KVStore, S: SharedMemory<K>, M: Metrics> Drop for Chain<K, S, M> {
    fn drop(&mut self) {
        if let Some(shutdown) = self.event_bus_shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(event_bus) = self.event_bus.take() {
            if event_bus.join().is_err() {
                log::error!("event bus of chain {} panicked", self.acceptor.chain_id());
            }
        }
    }
}
