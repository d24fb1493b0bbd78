//! Sliding-window batch pipeline: scheduling, per-batch extraction and
//! classification, and first-wins merging of clauses across batches.

pub mod error;
pub mod types;
pub mod scheduler;
pub mod merge;
pub mod runner;

pub use error::PipelineError;
pub use types::*;
pub use scheduler::*;
pub use merge::*;
pub use runner::PipelineRunner;
