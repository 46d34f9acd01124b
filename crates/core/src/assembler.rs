//! Assembler trait: the seam between upstream extraction and the engine.

use crate::batch::{BatchMetadata, PatchBatch};
use crate::error::AssemblyError;
use ndarray::ArrayD;

/// Anything that consumes batches of patch predictions.
///
/// Implementations: `patchvol_assembler::SubjectAssembler`.
pub trait Assembler {
    /// Place every item of `prediction` according to `batch`.
    ///
    /// A rejected batch leaves the assembler untouched.
    fn add_sample(&mut self, prediction: &ArrayD<f32>, batch: &BatchMetadata) -> Result<(), AssemblyError>;

    /// Convenience wrapper for an already-paired batch.
    fn add_batch(&mut self, batch: &PatchBatch) -> Result<(), AssemblyError> {
        self.add_sample(&batch.prediction, &batch.metadata)
    }
}
