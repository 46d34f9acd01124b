//! The assembly pipeline driver.
//!
//! Receives [`PatchBatch`]es from a bounded channel, feeds them to a
//! [`SubjectAssembler`], and hands every subject that becomes ready to a
//! [`SubjectSink`]. Lifecycle changes are published on an [`EventBus`].

use crate::PipelineError;
use crate::sink::{AssembledSubject, SubjectSink};
use chrono::Utc;
use ndarray::ArrayD;
use patchvol_assembler::SubjectAssembler;
use patchvol_core::{
    Assembler, AssemblerConfig, AssemblyEvent, BatchErrorPolicy, EventBus, PatchBatch,
    PipelineConfig, SubjectId,
};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Summary of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineReport {
    pub run_id: Uuid,
    /// Batches received, accepted or not.
    pub batches: u64,
    pub rejected_batches: u64,
    /// Patches from accepted batches.
    pub patches: u64,
    /// Subjects handed to the sink, flushed ones included.
    pub emitted: usize,
    /// Subjects handed out by the end-of-stream flush.
    pub flushed: usize,
    pub elapsed_ms: u64,
}

impl PipelineReport {
    fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            batches: 0,
            rejected_batches: 0,
            patches: 0,
            emitted: 0,
            flushed: 0,
            elapsed_ms: 0,
        }
    }
}

pub struct AssemblyPipeline {
    run_id: Uuid,
    assembler: SubjectAssembler,
    config: PipelineConfig,
    events: Arc<EventBus>,
}

impl AssemblyPipeline {
    pub fn new(assembler: AssemblerConfig, config: PipelineConfig) -> Self {
        Self::with_assembler(SubjectAssembler::with_config(assembler), config)
    }

    /// Drive an existing engine, e.g. one that already holds buffers.
    pub fn with_assembler(assembler: SubjectAssembler, config: PipelineConfig) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            assembler,
            config,
            events: Arc::new(EventBus::default()),
        }
    }

    /// Publish on a shared bus instead of a private one.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn assembler(&self) -> &SubjectAssembler {
        &self.assembler
    }

    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    /// Consume batches until the producer hangs up.
    pub async fn run<S>(
        &mut self,
        mut rx: mpsc::Receiver<PatchBatch>,
        sink: &mut S,
    ) -> Result<PipelineReport, PipelineError>
    where
        S: SubjectSink + ?Sized,
    {
        let started = Instant::now();
        let mut report = PipelineReport::new(self.run_id);
        info!(run_id = %self.run_id, sink = sink.name(), "Assembly pipeline started");

        while let Some(batch) = rx.recv().await {
            report.batches += 1;
            let buffered_before: HashSet<SubjectId> =
                self.assembler.buffered_subjects().into_iter().collect();

            if let Err(err) = self.assembler.add_batch(&batch) {
                match self.config.on_batch_error {
                    BatchErrorPolicy::Abort => {
                        warn!(run_id = %self.run_id, batch = report.batches, error = %err, "Aborting on rejected batch");
                        return Err(PipelineError::Assembly {
                            batch: report.batches,
                            source: err,
                        });
                    }
                    BatchErrorPolicy::Skip => {
                        warn!(run_id = %self.run_id, batch = report.batches, error = %err, "Skipping rejected batch");
                        report.rejected_batches += 1;
                        self.events.publish(AssemblyEvent::BatchRejected {
                            batch: report.batches,
                            reason: err.to_string(),
                            timestamp: Utc::now(),
                        });
                        continue;
                    }
                }
            }

            report.patches += batch.len() as u64;
            self.publish_transitions(&buffered_before);

            // One subject at a time, so a sink failure leaves the rest buffered
            for subject in self.assembler.ready_subjects() {
                let volume = self.release(&subject, report.batches)?;
                self.emit(sink, subject, volume, false, &mut report).await?;
            }
        }

        if self.config.flush_on_close {
            for subject in self.assembler.buffered_subjects() {
                let volume = self.release(&subject, report.batches)?;
                self.emit(sink, subject, volume, true, &mut report).await?;
            }
        }

        report.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.events.publish(AssemblyEvent::StreamFinished {
            batches: report.batches,
            emitted: report.emitted,
            timestamp: Utc::now(),
        });
        info!(
            run_id = %self.run_id,
            batches = report.batches,
            rejected = report.rejected_batches,
            emitted = report.emitted,
            flushed = report.flushed,
            elapsed_ms = report.elapsed_ms,
            "Assembly pipeline finished"
        );
        Ok(report)
    }

    /// Run on a background task.
    ///
    /// Returns the batch sender (drop it to end the stream) and a handle
    /// resolving to the report and the sink.
    #[allow(clippy::type_complexity)]
    pub fn spawn<S>(
        mut self,
        mut sink: S,
    ) -> (
        mpsc::Sender<PatchBatch>,
        JoinHandle<Result<(PipelineReport, S), PipelineError>>,
    )
    where
        S: SubjectSink + 'static,
    {
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let handle = tokio::spawn(async move {
            let report = self.run(rx, &mut sink).await?;
            Ok((report, sink))
        });
        (tx, handle)
    }

    fn publish_transitions(&self, buffered_before: &HashSet<SubjectId>) {
        let now = Utc::now();
        for subject in self.assembler.buffered_subjects() {
            if !buffered_before.contains(&subject) {
                let shape = self
                    .assembler
                    .shape_of(&subject)
                    .map(<[usize]>::to_vec)
                    .unwrap_or_default();
                self.events.publish(AssemblyEvent::SubjectStarted {
                    subject,
                    shape,
                    timestamp: now,
                });
            }
        }
        for subject in self.assembler.ready_subjects() {
            self.events.publish(AssemblyEvent::SubjectReady {
                subject,
                timestamp: now,
            });
        }
    }

    fn release(&mut self, subject: &SubjectId, batch: u64) -> Result<ArrayD<f32>, PipelineError> {
        self.assembler
            .get_subject(subject)
            .map_err(|source| PipelineError::Assembly { batch, source })
    }

    async fn emit<S>(
        &self,
        sink: &mut S,
        subject: SubjectId,
        volume: ArrayD<f32>,
        flushed: bool,
        report: &mut PipelineReport,
    ) -> Result<(), PipelineError>
    where
        S: SubjectSink + ?Sized,
    {
        debug!(subject = %subject, flushed, sink = sink.name(), "Emitting subject");
        sink.consume(AssembledSubject {
            subject: subject.clone(),
            volume,
            completed_at: Utc::now(),
            flushed,
        })
        .await?;

        report.emitted += 1;
        if flushed {
            report.flushed += 1;
        }
        self.events.publish(AssemblyEvent::SubjectEmitted {
            subject,
            flushed,
            timestamp: Utc::now(),
        });
        Ok(())
    }
}
