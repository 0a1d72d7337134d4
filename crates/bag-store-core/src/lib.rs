#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **bag-store-core** – Storage abstractions shared by the relational and
//! graph drivers (spec §4.5, §6).
//!
//! This crate defines the contracts; `bag-store-postgres`,
//! `bag-store-graph` and `bag-store-memory` provide concrete
//! implementations. Nothing here talks to a network or a disk.

mod debt;
mod error;
mod graph;
mod query;
mod relational;
mod wal;

pub use debt::ReconciliationDebt;
pub use error::StorageError;
pub use graph::GraphStore;
pub use query::{BagFilter, Bottleneck, ConnectionRisk, CurrentLocation, Journey};
pub use relational::RelationalStore;
pub use wal::{
    content_digest, CausalDigest, SequenceNumber, TransactionId, WalEntry, WalEntryState,
    WalOperation, WriteAheadLog,
};
