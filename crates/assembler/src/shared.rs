//! Thread-safe handle around a [`SubjectAssembler`].
//!
//! One mutex guards the whole engine, so the check-allocate-write sequence of
//! a batch and the check-and-remove of a retrieval are each atomic. Clones
//! share the same engine.

use crate::engine::{AssemblyStats, SubjectAssembler};
use ndarray::ArrayD;
use patchvol_core::{Assembler, AssemblerConfig, AssemblyError, BatchMetadata, PatchBatch, SubjectId};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Default)]
pub struct SharedAssembler {
    inner: Arc<Mutex<SubjectAssembler>>,
}

impl SharedAssembler {
    pub fn new(config: AssemblerConfig) -> Self {
        Self::from(SubjectAssembler::with_config(config))
    }

    /// Lock the engine. A panic in another holder does not leave the engine
    /// half-written (batches are validated before mutation), so poisoning is
    /// recovered rather than propagated.
    fn lock(&self) -> MutexGuard<'_, SubjectAssembler> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_sample(&self, prediction: &ArrayD<f32>, batch: &BatchMetadata) -> Result<(), AssemblyError> {
        self.lock().add_sample(prediction, batch)
    }

    pub fn add_batch(&self, batch: &PatchBatch) -> Result<(), AssemblyError> {
        self.lock().add_batch(batch)
    }

    pub fn get_subject(&self, subject: &SubjectId) -> Result<ArrayD<f32>, AssemblyError> {
        self.lock().get_subject(subject)
    }

    pub fn take_ready(&self) -> Vec<(SubjectId, ArrayD<f32>)> {
        self.lock().take_ready()
    }

    pub fn finish(&self) -> Vec<(SubjectId, ArrayD<f32>)> {
        self.lock().finish()
    }

    pub fn ready_subjects(&self) -> Vec<SubjectId> {
        self.lock().ready_subjects()
    }

    pub fn stats(&self) -> AssemblyStats {
        self.lock().stats()
    }

    /// Run `f` with exclusive access to the engine.
    pub fn with<R>(&self, f: impl FnOnce(&mut SubjectAssembler) -> R) -> R {
        f(&mut self.lock())
    }
}

impl From<SubjectAssembler> for SharedAssembler {
    fn from(engine: SubjectAssembler) -> Self {
        Self {
            inner: Arc::new(Mutex::new(engine)),
        }
    }
}
