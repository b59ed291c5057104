//! `docpipe-core`: foundation building blocks shared by every crate.
//!
//! Pure types only: identifiers and the domain error model. No I/O.

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::{BatchId, ItemId, LoadTestRunId, RequestId, TenantId, WorkerId};
