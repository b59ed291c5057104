//! The generation pipeline: submit, claim, execute, aggregate, recover, cancel, sweep.
//!
//! Each component is stateless apart from its collaborators; all mutable state
//! lives in the `WorkStore`, so any worker instance can pick up where another
//! one stopped.

pub mod aggregator;
pub mod cancellation;
pub mod executor;
pub mod recovery;
pub mod retention;
pub mod scheduler;
pub mod submitter;
pub mod worker;

use std::sync::Arc;

use thiserror::Error;

use crate::output_store::{OutputStore, OutputStoreError};
use crate::rendering::{Renderer, TemplateResolver};
use crate::work_store::{WorkStore, WorkStoreError};

pub use aggregator::CompletionAggregator;
pub use cancellation::CancellationHandler;
pub use executor::{ExecutionOutcome, ExecutionReport, Executor, ItemFailure};
pub use recovery::StaleRecoveryMonitor;
pub use retention::{RetentionReport, RetentionSweeper};
pub use scheduler::ClaimScheduler;
pub use submitter::{BatchReceipt, BatchSubmitter};
pub use worker::{PipelineWorker, ProcessedRequest};

/// Error from a pipeline step that touches more than one store.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error(transparent)]
    WorkStore(#[from] WorkStoreError),
    #[error(transparent)]
    OutputStore(#[from] OutputStoreError),
}

/// Shared collaborators of every pipeline component.
#[derive(Clone)]
pub struct PipelineDeps {
    pub store: Arc<dyn WorkStore>,
    pub outputs: Arc<dyn OutputStore>,
    pub resolver: Arc<dyn TemplateResolver>,
    pub renderer: Arc<dyn Renderer>,
}

impl core::fmt::Debug for PipelineDeps {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PipelineDeps").finish_non_exhaustive()
    }
}
