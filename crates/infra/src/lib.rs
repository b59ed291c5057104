//! Infrastructure layer for the document generation pipeline.
//!
//! - `work_store`: durable requests and items (in-memory and Postgres)
//! - `output_store`: rendered documents
//! - `rendering`: template resolution and the rendering seam
//! - `jobs`: submit, claim, execute, aggregate, recover, cancel, sweep
//! - `workers`: background loops hosting the pipeline in a process
//! - `service`: tenant-scoped facade used by the HTTP layer

pub mod config;
pub mod jobs;
pub mod output_store;
pub mod rendering;
pub mod service;
pub mod work_store;
pub mod workers;

#[cfg(test)]
pub(crate) mod test_support;
