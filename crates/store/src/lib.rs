//! A cached, write-behind content store for trie payloads.
//!
//! [`PayloadStore`] sits in front of a [`PersistentEngine`] and implements
//! `flow_trie::PayloadSource`, so a [`flow_trie::Trie`] can use it directly
//! as its backing store.

pub mod engine;
pub mod error;
pub mod payload_store;

pub use engine::PersistentEngine;
pub use error::StoreError;
pub use payload_store::{PayloadStore, PayloadStoreOptions};
