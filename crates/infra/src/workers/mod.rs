//! Long-running background loops for a worker process.

mod runtime;

pub use runtime::{WorkerHandle, WorkerRuntime};
