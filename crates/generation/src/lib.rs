//! `docpipe-generation`: pure domain model of the document generation pipeline.
//!
//! A submission produces one [`GenerationRequest`] and one or more
//! [`GenerationItem`]s. Requests move `PENDING → IN_PROGRESS → terminal`; items do
//! the same independently. Nothing in this crate performs I/O: stores and
//! workers in `docpipe-infra` drive these transitions and persist the results.

pub mod correlation;
pub mod item;
pub mod message;
pub mod outcome;
pub mod request;

pub use correlation::assign_correlation_ids;
pub use item::{
    EnvironmentId, GenerationItem, ItemSpec, ItemStatus, OutputRef, VersionId, VersionSelector,
};
pub use message::{MAX_MESSAGE_CHARS, bounded_message};
pub use outcome::{ProgressCounts, TerminalDecision, derive_terminal_status};
pub use request::{ConcurrencyMode, GenerationRequest, RequestKind, RequestStatus};
