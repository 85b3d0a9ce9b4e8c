//! The durable state of a chain.
//!
//! # Pluggable persistence
//!
//! - The durable state is kept in the node's storage engine, most probably in the host's filesystem.
//! - This crate merely requires that the storage engine implements the abstract functionality of a
//!   key-value store with atomic, batched writes. This abstract functionality is made concrete by the
//!   traits defined in [`pluggables`].
//! - The location of every durable variable in the key-value store is defined in [`variables`].
//!
//! # Accessing the durable state
//!
//! Implementations of the pluggable persistence traits get wrapped in a
//! [`PersistentState`](persistent::PersistentState), which stages writes in memory and exposes the
//! commit primitives the [`Acceptor`](crate::acceptor::Acceptor) drives.

pub mod pluggables;

pub mod variables;

pub mod persistent;
