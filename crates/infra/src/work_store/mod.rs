//! Durable request/item state shared by every worker.
//!
//! The store is the only coordination point between workers: claims, item
//! transitions and terminal decisions are all conditional updates, so any
//! number of processes can run against one Postgres database.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryWorkStore;
pub use postgres::PostgresWorkStore;
pub use r#trait::{
    FinalizeOutcome, ItemStatusCounts, NewRequest, RecoveryReport, RequestFilter, WorkStore,
    WorkStoreError,
};
