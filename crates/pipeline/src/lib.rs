//! Streaming assembly: batches in over a channel, finished subjects out to a
//! sink.

pub mod driver;
pub mod sink;

pub use driver::{AssemblyPipeline, PipelineReport};
pub use sink::{AssembledSubject, CollectingSink, SubjectSink};

use patchvol_core::AssemblyError;

/// Pipeline errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Batch {batch} rejected: {source}")]
    Assembly {
        batch: u64,
        #[source]
        source: AssemblyError,
    },

    #[error("Sink '{sink}' failed: {reason}")]
    Sink { sink: String, reason: String },

    #[error("Pipeline task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<PipelineError> for patchvol_core::Error {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Assembly { source, .. } => patchvol_core::Error::Assembly(source),
            other => patchvol_core::Error::Internal(other.to_string()),
        }
    }
}
