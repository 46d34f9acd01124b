//! Consumers of assembled subjects.

use crate::PipelineError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ndarray::ArrayD;
use patchvol_core::SubjectId;

/// A complete subject volume handed out by the pipeline.
#[derive(Debug, Clone)]
pub struct AssembledSubject {
    pub subject: SubjectId,
    pub volume: ArrayD<f32>,
    pub completed_at: DateTime<Utc>,
    /// Emitted by the end-of-stream flush rather than a readiness signal.
    pub flushed: bool,
}

/// Where finished subjects go: a writer, an evaluator, a test collector.
#[async_trait]
pub trait SubjectSink: Send {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    /// Take ownership of one finished subject.
    async fn consume(&mut self, subject: AssembledSubject) -> Result<(), PipelineError>;
}

/// Keeps everything it receives, in arrival order.
#[derive(Debug, Default)]
pub struct CollectingSink {
    subjects: Vec<AssembledSubject>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subjects(&self) -> &[AssembledSubject] {
        &self.subjects
    }

    pub fn into_subjects(self) -> Vec<AssembledSubject> {
        self.subjects
    }

    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }
}

#[async_trait]
impl SubjectSink for CollectingSink {
    fn name(&self) -> &str {
        "collect"
    }

    async fn consume(&mut self, subject: AssembledSubject) -> Result<(), PipelineError> {
        self.subjects.push(subject);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    #[tokio::test]
    async fn collecting_sink_keeps_order() {
        let mut sink = CollectingSink::new();
        for name in ["b", "a"] {
            sink.consume(AssembledSubject {
                subject: name.into(),
                volume: ArrayD::zeros(IxDyn(&[1])),
                completed_at: Utc::now(),
                flushed: false,
            })
            .await
            .unwrap();
        }

        assert_eq!(sink.len(), 2);
        let names: Vec<&str> = sink.subjects().iter().map(|s| s.subject.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }
}
