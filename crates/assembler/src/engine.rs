//! The subject assembly engine.
//!
//! Patches arrive in batches whose items may belong to several subjects.
//! Each subject gets one zero-filled buffer the first time it is seen; every
//! patch is written into that buffer at its index expression, last write
//! wins. Under the default readiness policy the first patch of a brand-new
//! subject marks every other buffered subject ready, which is only correct
//! for subject-contiguous streams.

use crate::coverage::CoverageMask;
use ndarray::{ArrayD, Axis, IxDyn};
use patchvol_core::{
    Assembler, AssemblerConfig, AssemblyError, BatchItem, BatchItems, BatchMetadata, IndexExpr,
    PatchLayout, ReadinessPolicy, Region, RevisitPolicy, SubjectId,
};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, info, warn};

/// Point-in-time counters of an engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AssemblyStats {
    /// Subjects currently holding a buffer.
    pub buffered: usize,
    /// Buffered subjects flagged ready.
    pub ready: usize,
    /// Subjects handed out so far.
    pub retrieved: usize,
    pub patches_written: u64,
    pub batches_accepted: u64,
}

#[derive(Debug)]
struct SubjectBuffer {
    volume: ArrayD<f32>,
    coverage: Option<CoverageMask>,
}

/// One validated item, ready to be written without further checks.
struct PlannedWrite<'a> {
    item: BatchItem<'a>,
    source: Region,
    target: Region,
    shape_redeclared: bool,
}

/// Rebuilds complete per-subject volumes from a stream of patch batches.
///
/// Owns every in-progress buffer; [`get_subject`](Self::get_subject) moves a
/// buffer out and forgets it.
#[derive(Debug, Default)]
pub struct SubjectAssembler {
    config: AssemblerConfig,
    buffers: HashMap<SubjectId, SubjectBuffer>,
    ready: BTreeSet<SubjectId>,
    retrieved: HashSet<SubjectId>,
    patches_written: u64,
    batches_accepted: u64,
}

impl SubjectAssembler {
    /// Create an engine with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: AssemblerConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &AssemblerConfig {
        &self.config
    }

    // =========================================================================
    // RETRIEVAL
    // =========================================================================

    /// Remove and return the buffer of `subject`.
    ///
    /// Succeeds for ready subjects and, without a readiness flag, for any
    /// buffered subject (a single-subject stream never raises the flag).
    /// Fails for subjects that were never seen or were already retrieved.
    pub fn get_subject(&mut self, subject: &SubjectId) -> Result<ArrayD<f32>, AssemblyError> {
        if !self.ready.contains(subject) && self.buffers.contains_key(subject) {
            debug!(subject = %subject, "Retrieving subject that is not flagged ready");
        }
        self.release(subject)
            .ok_or_else(|| AssemblyError::SubjectNotFound(subject.clone()))
    }

    /// Move a buffer out and record the retrieval.
    fn release(&mut self, subject: &SubjectId) -> Option<ArrayD<f32>> {
        let buffer = self.buffers.remove(subject)?;
        self.ready.remove(subject);
        self.retrieved.insert(subject.clone());
        debug!(subject = %subject, shape = ?buffer.volume.shape(), "Subject retrieved");
        Some(buffer.volume)
    }

    /// Retrieve every ready subject, in key order.
    pub fn take_ready(&mut self) -> Vec<(SubjectId, ArrayD<f32>)> {
        let keys: Vec<SubjectId> = self.ready.iter().cloned().collect();
        self.retrieve_all(keys)
    }

    /// End-of-stream flush: retrieve every buffered subject, ready or not.
    pub fn finish(&mut self) -> Vec<(SubjectId, ArrayD<f32>)> {
        let keys = self.buffered_subjects();
        if !keys.is_empty() {
            info!(subjects = keys.len(), "Flushing buffered subjects");
        }
        self.retrieve_all(keys)
    }

    /// `keys` come from `ready` or `buffers`, so every one has a buffer.
    fn retrieve_all(&mut self, keys: Vec<SubjectId>) -> Vec<(SubjectId, ArrayD<f32>)> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            let volume = self.release(&key);
            debug_assert!(volume.is_some(), "listed subject {key} has no buffer");
            if let Some(volume) = volume {
                out.push((key, volume));
            }
        }
        out
    }

    // =========================================================================
    // INSPECTION
    // =========================================================================

    pub fn is_ready(&self, subject: &SubjectId) -> bool {
        self.ready.contains(subject)
    }

    /// Subjects flagged ready, in key order.
    pub fn ready_subjects(&self) -> Vec<SubjectId> {
        self.ready.iter().cloned().collect()
    }

    /// Subjects holding a buffer, in key order.
    pub fn buffered_subjects(&self) -> Vec<SubjectId> {
        let mut keys: Vec<SubjectId> = self.buffers.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn contains(&self, subject: &SubjectId) -> bool {
        self.buffers.contains_key(subject)
    }

    /// Shape of a buffered subject.
    pub fn shape_of(&self, subject: &SubjectId) -> Option<&[usize]> {
        self.buffers.get(subject).map(|b| b.volume.shape())
    }

    /// Fraction of voxels written so far (coverage policy only).
    pub fn coverage(&self, subject: &SubjectId) -> Option<f64> {
        self.buffers
            .get(subject)
            .and_then(|b| b.coverage.as_ref())
            .map(CoverageMask::fraction)
    }

    /// Number of buffered subjects.
    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }

    pub fn stats(&self) -> AssemblyStats {
        AssemblyStats {
            buffered: self.buffers.len(),
            ready: self.ready.len(),
            retrieved: self.retrieved.len(),
            patches_written: self.patches_written,
            batches_accepted: self.batches_accepted,
        }
    }

    /// Drop all buffers, flags and retrieval history.
    pub fn reset(&mut self) {
        if !self.buffers.is_empty() {
            warn!(subjects = self.buffers.len(), "Resetting assembler with buffered subjects");
        }
        self.buffers.clear();
        self.ready.clear();
        self.retrieved.clear();
        self.patches_written = 0;
        self.batches_accepted = 0;
    }

    // =========================================================================
    // PLACEMENT
    // =========================================================================

    /// Validate every item of a batch without touching any state.
    fn plan<'a>(
        &self,
        prediction: &ArrayD<f32>,
        items: BatchItems<'a>,
    ) -> Result<Vec<PlannedWrite<'a>>, AssemblyError> {
        // Shapes of subjects that will be allocated by this batch
        let mut pending: HashMap<&'a SubjectId, &'a [usize]> = HashMap::new();
        let mut plans = Vec::with_capacity(items.len());

        for item in items.iter() {
            let extent: &[usize] = match self.buffers.get(item.subject) {
                Some(buffer) => buffer.volume.shape(),
                None => match pending.get(item.subject) {
                    Some(shape) => *shape,
                    None => {
                        self.admit(item)?;
                        pending.insert(item.subject, item.shape);
                        item.shape
                    }
                },
            };
            let shape_redeclared = extent != item.shape;

            let target = item
                .index_expr
                .resolve(extent, self.config.bounds)
                .map_err(|fault| fault.for_subject(item.subject))?;

            let patch = prediction.index_axis(Axis(0), item.index);
            let source = match self.config.layout {
                PatchLayout::Aligned => item
                    .index_expr
                    .resolve(patch.shape(), self.config.bounds)
                    .map_err(|fault| fault.for_subject(item.subject))?,
                PatchLayout::Local => {
                    let requested = requested_shape(item.index_expr, extent);
                    if patch.shape() != requested.as_slice() {
                        return Err(AssemblyError::PatchShape {
                            subject: item.subject.clone(),
                            expected: requested,
                            actual: patch.shape().to_vec(),
                        });
                    }
                    // Clipping only shortens the tail, so the kept part is a prefix
                    IndexExpr::from_ranges(target.shape().into_iter().map(|n| 0..n))
                        .resolve(patch.shape(), self.config.bounds)
                        .map_err(|fault| fault.for_subject(item.subject))?
                }
            };

            if source.shape() != target.shape() {
                return Err(AssemblyError::PatchShape {
                    subject: item.subject.clone(),
                    expected: target.shape(),
                    actual: source.shape(),
                });
            }

            plans.push(PlannedWrite {
                item,
                source,
                target,
                shape_redeclared,
            });
        }

        Ok(plans)
    }

    /// Checks for a subject that has no buffer yet.
    fn admit(&self, item: BatchItem<'_>) -> Result<(), AssemblyError> {
        if self.retrieved.contains(item.subject) && self.config.revisit == RevisitPolicy::Reject {
            return Err(AssemblyError::SubjectRevisited(item.subject.clone()));
        }
        // The buffer must be allocatable, or `apply` would panic mid-batch
        let bytes = item
            .shape
            .iter()
            .try_fold(std::mem::size_of::<f32>(), |n, &d| n.checked_mul(d));
        let addressable = bytes.is_some_and(|b| b <= isize::MAX as usize);
        if item.shape.is_empty() || item.shape.contains(&0) || !addressable {
            return Err(AssemblyError::InvalidShape {
                subject: item.subject.clone(),
                shape: item.shape.to_vec(),
            });
        }
        Ok(())
    }

    /// Allocate the buffer of a never-seen subject.
    fn start_subject(&mut self, subject: &SubjectId, shape: &[usize]) {
        if self.config.readiness == ReadinessPolicy::SubjectChange && !self.buffers.is_empty() {
            self.ready = self.buffers.keys().cloned().collect();
            info!(
                subject = %subject,
                ready = self.ready.len(),
                "New subject in stream, buffered subjects marked ready"
            );
        }
        if self.retrieved.remove(subject) {
            warn!(subject = %subject, "Subject reappeared after retrieval, starting a fresh buffer");
        }

        let coverage =
            (self.config.readiness == ReadinessPolicy::Coverage).then(|| CoverageMask::new(shape));
        debug!(subject = %subject, shape = ?shape, "Allocated subject buffer");
        self.buffers.insert(
            subject.clone(),
            SubjectBuffer {
                volume: ArrayD::zeros(IxDyn(shape)),
                coverage,
            },
        );
    }

    fn apply(&mut self, prediction: &ArrayD<f32>, plans: Vec<PlannedWrite<'_>>) {
        for plan in plans {
            let subject = plan.item.subject;
            if !self.buffers.contains_key(subject) {
                self.start_subject(subject, plan.item.shape);
            } else if plan.shape_redeclared {
                warn!(
                    subject = %subject,
                    declared = ?plan.item.shape,
                    "Declared shape differs from the allocated buffer, keeping the first shape"
                );
            }
            if plan.target.was_clipped() {
                warn!(subject = %subject, index_expr = %plan.item.index_expr, "Region clipped to buffer extent");
            }

            let patch = prediction.index_axis(Axis(0), plan.item.index);
            let values = plan.source.read(patch);
            let Some(buffer) = self.buffers.get_mut(subject) else {
                continue;
            };
            plan.target.write(&mut buffer.volume, &values);
            self.patches_written += 1;

            if let Some(mask) = buffer.coverage.as_mut() {
                if mask.mark(&plan.target) {
                    self.ready.insert(subject.clone());
                    info!(subject = %subject, "Subject fully covered, marked ready");
                }
            }
        }
        self.batches_accepted += 1;
    }
}

impl Assembler for SubjectAssembler {
    fn add_sample(&mut self, prediction: &ArrayD<f32>, batch: &BatchMetadata) -> Result<(), AssemblyError> {
        let batch_len = *prediction
            .shape()
            .first()
            .ok_or(AssemblyError::MissingBatchAxis)?;
        let items = batch.items(batch_len)?;
        let plans = self.plan(prediction, items)?;
        debug!(items = plans.len(), "Batch accepted");
        self.apply(prediction, plans);
        Ok(())
    }
}

/// Region shape an expression asks for before any clipping.
fn requested_shape(expr: &IndexExpr, extent: &[usize]) -> Vec<usize> {
    extent
        .iter()
        .enumerate()
        .map(|(axis, &dim)| expr.axes().get(axis).map_or(dim, |slice| slice.len()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use patchvol_core::{
        AssemblyErrorKind, AxisSlice, BoundsPolicy, MetadataField, PatchBatch, PatchRecord,
    };

    /// Ground-truth volume whose values are all non-zero.
    fn truth(shape: &[usize], offset: f32) -> ArrayD<f32> {
        let mut counter = 0.0;
        ArrayD::from_shape_fn(IxDyn(shape), |_| {
            counter += 1.0;
            counter + offset
        })
    }

    fn record(subject: &str, expr: IndexExpr, shape: &[usize], prediction: &ArrayD<f32>) -> PatchRecord {
        PatchRecord {
            subject: subject.into(),
            index_expr: expr,
            shape: shape.to_vec(),
            prediction: prediction.clone(),
        }
    }

    fn batch(records: Vec<PatchRecord>) -> PatchBatch {
        PatchBatch::from_records(records).unwrap()
    }

    /// Two half-volume patches of a 4x3 subject, aligned layout.
    fn halves(subject: &str, volume: &ArrayD<f32>) -> Vec<PatchBatch> {
        vec![
            batch(vec![record(subject, IndexExpr::from_ranges([0..2]), &[4, 3], volume)]),
            batch(vec![record(subject, IndexExpr::from_ranges([2..4]), &[4, 3], volume)]),
        ]
    }

    fn feed(engine: &mut SubjectAssembler, batches: &[PatchBatch]) {
        for b in batches {
            engine.add_batch(b).unwrap();
        }
    }

    #[test]
    fn exact_tiling_reconstructs_without_residue() {
        let volume = truth(&[4, 6], 0.0);
        let mut engine = SubjectAssembler::new();
        let tiles = batch(vec![
            record("a", IndexExpr::from_ranges([0..2, 0..3]), &[4, 6], &volume),
            record("a", IndexExpr::from_ranges([0..2, 3..6]), &[4, 6], &volume),
            record("a", IndexExpr::from_ranges([2..4, 0..3]), &[4, 6], &volume),
            record("a", IndexExpr::from_ranges([2..4, 3..6]), &[4, 6], &volume),
        ]);
        engine.add_batch(&tiles).unwrap();

        let assembled = engine.get_subject(&"a".into()).unwrap();
        assert_eq!(assembled, volume);
        assert!(assembled.iter().all(|v| *v != 0.0));
    }

    #[test]
    fn overlapping_writes_last_one_wins() {
        let first = ArrayD::from_elem(IxDyn(&[4]), 1.0);
        let second = ArrayD::from_elem(IxDyn(&[4]), 2.0);
        let mut engine = SubjectAssembler::new();
        engine
            .add_batch(&batch(vec![record("a", IndexExpr::from_ranges([0..3]), &[4], &first)]))
            .unwrap();
        engine
            .add_batch(&batch(vec![record("a", IndexExpr::from_ranges([1..4]), &[4], &second)]))
            .unwrap();

        let assembled = engine.get_subject(&"a".into()).unwrap();
        assert_eq!(assembled.as_slice().unwrap(), &[1.0, 2.0, 2.0, 2.0]);
    }

    #[test]
    fn later_item_in_same_batch_wins() {
        let first = ArrayD::from_elem(IxDyn(&[3]), 5.0);
        let second = ArrayD::from_elem(IxDyn(&[3]), 7.0);
        let mut engine = SubjectAssembler::new();
        engine
            .add_batch(&batch(vec![
                record("a", IndexExpr::full(), &[3], &first),
                record("a", IndexExpr::from_ranges([1..2]), &[3], &second),
            ]))
            .unwrap();
        let assembled = engine.get_subject(&"a".into()).unwrap();
        assert_eq!(assembled.as_slice().unwrap(), &[5.0, 7.0, 5.0]);
    }

    #[test]
    fn readiness_follows_subject_change() {
        let (a, b, c) = (truth(&[4, 3], 0.0), truth(&[4, 3], 100.0), truth(&[4, 3], 200.0));
        let mut engine = SubjectAssembler::new();

        feed(&mut engine, &halves("A", &a));
        assert!(engine.ready_subjects().is_empty());

        feed(&mut engine, &halves("B", &b));
        assert!(engine.is_ready(&"A".into()));
        assert!(!engine.is_ready(&"B".into()));
        assert_eq!(engine.get_subject(&"A".into()).unwrap(), a);

        feed(&mut engine, &halves("C", &c)[..1]);
        assert_eq!(engine.ready_subjects(), vec![SubjectId::from("B")]);
        assert_eq!(engine.get_subject(&"B".into()).unwrap(), b);
    }

    #[test]
    fn snapshot_includes_unretrieved_subjects() {
        let volume = truth(&[4, 3], 0.0);
        let mut engine = SubjectAssembler::new();
        feed(&mut engine, &halves("A", &volume));
        feed(&mut engine, &halves("B", &volume));
        feed(&mut engine, &halves("C", &volume));
        assert_eq!(
            engine.ready_subjects(),
            vec![SubjectId::from("A"), SubjectId::from("B")]
        );
    }

    #[test]
    fn subject_change_inside_one_batch() {
        let volume = truth(&[4, 3], 0.0);
        let mut engine = SubjectAssembler::new();
        engine
            .add_batch(&batch(vec![
                record("A", IndexExpr::from_ranges([0..2]), &[4, 3], &volume),
                record("A", IndexExpr::from_ranges([2..4]), &[4, 3], &volume),
                record("B", IndexExpr::from_ranges([0..2]), &[4, 3], &volume),
            ]))
            .unwrap();
        assert_eq!(engine.ready_subjects(), vec![SubjectId::from("A")]);
        assert_eq!(engine.len(), 2);
    }

    #[test]
    fn interleaved_stream_flags_subject_early() {
        let volume = truth(&[4, 3], 0.0);
        let [a_top, a_bottom] = <[PatchBatch; 2]>::try_from(halves("A", &volume)).unwrap();
        let mut engine = SubjectAssembler::new();

        // A, B, A: the late A patch arrives after A was already flagged
        engine.add_batch(&a_top).unwrap();
        engine.add_batch(&halves("B", &volume)[0]).unwrap();
        assert!(engine.is_ready(&"A".into()));

        let early = engine.get_subject(&"A".into()).unwrap();
        assert_ne!(early, volume);
        assert!(early.index_axis(Axis(0), 3).iter().all(|v| *v == 0.0));

        assert_eq!(
            engine.add_batch(&a_bottom).unwrap_err(),
            AssemblyError::SubjectRevisited("A".into())
        );
        assert!(!engine.contains(&"A".into()));
    }

    #[test]
    fn late_patch_before_retrieval_still_lands() {
        let volume = truth(&[4, 3], 0.0);
        let a = halves("A", &volume);
        let mut engine = SubjectAssembler::new();

        engine.add_batch(&a[0]).unwrap();
        engine.add_batch(&halves("B", &volume)[0]).unwrap();
        engine.add_batch(&a[1]).unwrap();

        assert_eq!(engine.ready_subjects(), vec![SubjectId::from("A")]);
        assert_eq!(engine.get_subject(&"A".into()).unwrap(), volume);
    }

    #[test]
    fn unallocatable_shape_leaves_state_unchanged() {
        let volume = truth(&[4, 3], 0.0);
        let mut engine = SubjectAssembler::new();
        feed(&mut engine, &halves("A", &volume));
        let before = engine.stats();

        let mut huge = batch(vec![
            record("A", IndexExpr::full(), &[4, 3], &volume),
            record("B", IndexExpr::full(), &[4, 3], &volume),
        ]);
        huge.metadata.shape = Some(vec![vec![4, 3], vec![usize::MAX, 2]]);
        let err = engine.add_batch(&huge).unwrap_err();

        assert!(matches!(err, AssemblyError::InvalidShape { .. }));
        assert!(!engine.contains(&"B".into()));
        assert!(engine.ready_subjects().is_empty());
        assert_eq!(engine.stats(), before);

        let mut overflow = batch(vec![record("C", IndexExpr::full(), &[4, 3], &volume)]);
        overflow.metadata.shape = Some(vec![vec![isize::MAX as usize / 2, 1]]);
        assert!(matches!(
            engine.add_batch(&overflow).unwrap_err(),
            AssemblyError::InvalidShape { .. }
        ));
    }

    #[test]
    fn single_subject_is_retrievable_without_flag() {
        let volume = truth(&[4, 3], 0.0);
        let mut engine = SubjectAssembler::new();
        feed(&mut engine, &halves("A", &volume));

        assert!(engine.ready_subjects().is_empty());
        assert_eq!(engine.get_subject(&"A".into()).unwrap(), volume);
        assert!(engine.is_empty());
    }

    #[test]
    fn second_retrieval_fails() {
        let volume = truth(&[4, 3], 0.0);
        let mut engine = SubjectAssembler::new();
        feed(&mut engine, &halves("A", &volume));
        feed(&mut engine, &halves("B", &volume));

        engine.get_subject(&"A".into()).unwrap();
        let err = engine.get_subject(&"A".into()).unwrap_err();
        assert_eq!(err, AssemblyError::SubjectNotFound("A".into()));
        assert_eq!(err.kind(), AssemblyErrorKind::Lookup);
        assert!(engine.get_subject(&"never".into()).is_err());
    }

    #[test]
    fn missing_index_expr_leaves_state_unchanged() {
        let volume = truth(&[4, 3], 0.0);
        let mut engine = SubjectAssembler::new();
        feed(&mut engine, &halves("A", &volume));
        let before = engine.stats();

        let mut bad = batch(vec![record("B", IndexExpr::full(), &[4, 3], &volume)]);
        bad.metadata.index_expr = None;
        let err = engine.add_batch(&bad).unwrap_err();

        assert_eq!(err, AssemblyError::MissingMetadata(MetadataField::IndexExpr));
        assert!(err.is_configuration());
        assert!(!engine.contains(&"B".into()));
        assert!(engine.ready_subjects().is_empty());
        assert_eq!(engine.stats(), before);
    }

    #[test]
    fn misaligned_metadata_is_rejected() {
        let volume = truth(&[4, 3], 0.0);
        let mut engine = SubjectAssembler::new();
        let mut bad = batch(vec![record("A", IndexExpr::full(), &[4, 3], &volume)]);
        bad.metadata.shape = Some(vec![vec![4, 3], vec![4, 3]]);
        assert!(matches!(
            engine.add_batch(&bad).unwrap_err(),
            AssemblyError::MetadataLength { field: MetadataField::Shape, expected: 1, actual: 2 }
        ));

        let scalar = ArrayD::<f32>::zeros(IxDyn(&[]));
        assert_eq!(
            engine.add_sample(&scalar, &BatchMetadata::default()).unwrap_err(),
            AssemblyError::MissingBatchAxis
        );
    }

    #[test]
    fn first_declared_shape_is_authoritative() {
        let volume = truth(&[4, 3], 0.0);
        let mut engine = SubjectAssembler::new();
        engine
            .add_batch(&batch(vec![record("A", IndexExpr::from_ranges([0..2]), &[4, 3], &volume)]))
            .unwrap();
        engine
            .add_batch(&batch(vec![record("A", IndexExpr::from_ranges([2..4]), &[8, 3], &volume)]))
            .unwrap();

        assert_eq!(engine.shape_of(&"A".into()), Some(&[4usize, 3][..]));
        assert_eq!(engine.get_subject(&"A".into()).unwrap(), volume);
    }

    #[test]
    fn out_of_bounds_rejects_whole_batch() {
        let volume = truth(&[4, 3], 0.0);
        let mut engine = SubjectAssembler::new();
        let err = engine
            .add_batch(&batch(vec![
                record("A", IndexExpr::from_ranges([0..2]), &[4, 3], &volume),
                record("B", IndexExpr::from_ranges([2..6]), &[4, 3], &volume),
            ]))
            .unwrap_err();

        assert!(matches!(err, AssemblyError::RegionOutOfBounds { axis: 0, stop: 6, extent: 4, .. }));
        assert!(engine.is_empty());
        assert_eq!(engine.stats().patches_written, 0);
    }

    #[test]
    fn clip_policy_writes_the_overlap() {
        let patch = ArrayD::from_elem(IxDyn(&[6]), 3.0);
        let mut engine = SubjectAssembler::with_config(AssemblerConfig {
            bounds: BoundsPolicy::Clip,
            ..AssemblerConfig::default()
        });
        engine
            .add_batch(&batch(vec![record("A", IndexExpr::from_ranges([2..6]), &[4], &patch)]))
            .unwrap();
        let assembled = engine.get_subject(&"A".into()).unwrap();
        assert_eq!(assembled.as_slice().unwrap(), &[0.0, 0.0, 3.0, 3.0]);
    }

    #[test]
    fn invalid_shape_is_rejected() {
        let volume = truth(&[4, 3], 0.0);
        let mut engine = SubjectAssembler::new();
        let err = engine
            .add_batch(&batch(vec![record("A", IndexExpr::full(), &[4, 0], &volume)]))
            .unwrap_err();
        assert!(matches!(err, AssemblyError::InvalidShape { .. }));
    }

    #[test]
    fn revisit_after_retrieval_is_rejected_by_default() {
        let volume = truth(&[4, 3], 0.0);
        let mut engine = SubjectAssembler::new();
        feed(&mut engine, &halves("A", &volume));
        engine.get_subject(&"A".into()).unwrap();

        let err = engine.add_batch(&halves("A", &volume)[0]).unwrap_err();
        assert_eq!(err, AssemblyError::SubjectRevisited("A".into()));
        assert!(engine.is_empty());

        engine.reset();
        feed(&mut engine, &halves("A", &volume));
        assert!(engine.contains(&"A".into()));
    }

    #[test]
    fn recreate_policy_starts_fresh_buffer() {
        let volume = truth(&[4, 3], 0.0);
        let mut engine = SubjectAssembler::with_config(AssemblerConfig {
            revisit: RevisitPolicy::Recreate,
            ..AssemblerConfig::default()
        });
        feed(&mut engine, &halves("A", &volume));
        engine.get_subject(&"A".into()).unwrap();

        feed(&mut engine, &halves("A", &volume)[1..]);
        let assembled = engine.get_subject(&"A".into()).unwrap();
        for row in 0..4 {
            for col in 0..3 {
                let ix = IxDyn(&[row, col]);
                let expected = if row < 2 { 0.0 } else { volume[&ix] };
                assert_eq!(assembled[&ix], expected);
            }
        }
    }

    #[test]
    fn coverage_policy_flags_on_full_coverage() {
        let volume = truth(&[4, 3], 0.0);
        let mut engine = SubjectAssembler::with_config(AssemblerConfig {
            readiness: ReadinessPolicy::Coverage,
            ..AssemblerConfig::default()
        });

        let a = halves("A", &volume);
        engine.add_batch(&a[0]).unwrap();
        assert_eq!(engine.coverage(&"A".into()), Some(0.5));
        // Interleaved subject does not flag A under this policy
        engine.add_batch(&halves("B", &volume)[0]).unwrap();
        assert!(engine.ready_subjects().is_empty());

        engine.add_batch(&a[1]).unwrap();
        assert_eq!(engine.ready_subjects(), vec![SubjectId::from("A")]);
        assert_eq!(engine.take_ready(), vec![(SubjectId::from("A"), volume)]);
        assert!(!engine.is_ready(&"B".into()));
    }

    #[test]
    fn local_layout_writes_patch_whole() {
        let mut engine = SubjectAssembler::with_config(AssemblerConfig {
            layout: PatchLayout::Local,
            ..AssemblerConfig::default()
        });
        let left = ArrayD::from_elem(IxDyn(&[2, 2]), 1.0);
        let right = ArrayD::from_elem(IxDyn(&[2, 2]), 2.0);
        engine
            .add_batch(&batch(vec![
                record("A", IndexExpr::from_ranges([0..2, 0..2]), &[2, 4], &left),
                record("A", IndexExpr::from_ranges([0..2, 2..4]), &[2, 4], &right),
            ]))
            .unwrap();
        let assembled = engine.get_subject(&"A".into()).unwrap();
        assert_eq!(assembled.as_slice().unwrap(), &[1.0, 1.0, 2.0, 2.0, 1.0, 1.0, 2.0, 2.0]);
    }

    #[test]
    fn local_layout_rejects_mismatched_patch() {
        let mut engine = SubjectAssembler::with_config(AssemblerConfig {
            layout: PatchLayout::Local,
            ..AssemblerConfig::default()
        });
        let patch = ArrayD::from_elem(IxDyn(&[3, 2]), 1.0);
        let err = engine
            .add_batch(&batch(vec![record("A", IndexExpr::from_ranges([0..2, 0..2]), &[2, 4], &patch)]))
            .unwrap_err();
        assert_eq!(
            err,
            AssemblyError::PatchShape {
                subject: "A".into(),
                expected: vec![2, 2],
                actual: vec![3, 2],
            }
        );
    }

    #[test]
    fn local_layout_with_clip_keeps_prefix() {
        let mut engine = SubjectAssembler::with_config(AssemblerConfig {
            layout: PatchLayout::Local,
            bounds: BoundsPolicy::Clip,
            ..AssemblerConfig::default()
        });
        let patch = ArrayD::from_shape_vec(IxDyn(&[4]), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        engine
            .add_batch(&batch(vec![record("A", IndexExpr::from_ranges([3..7]), &[5], &patch)]))
            .unwrap();
        let assembled = engine.get_subject(&"A".into()).unwrap();
        assert_eq!(assembled.as_slice().unwrap(), &[0.0, 0.0, 0.0, 1.0, 2.0]);
    }

    #[test]
    fn strided_expression_in_aligned_layout() {
        let volume = truth(&[6], 0.0);
        let mut engine = SubjectAssembler::new();
        engine
            .add_batch(&batch(vec![record(
                "A",
                IndexExpr::new(vec![AxisSlice::with_step(1, 6, 2)]),
                &[6],
                &volume,
            )]))
            .unwrap();
        let assembled = engine.get_subject(&"A".into()).unwrap();
        assert_eq!(assembled.as_slice().unwrap(), &[0.0, 2.0, 0.0, 4.0, 0.0, 6.0]);
    }

    #[test]
    fn finish_flushes_everything_in_order() {
        let volume = truth(&[4, 3], 0.0);
        let mut engine = SubjectAssembler::new();
        feed(&mut engine, &halves("B", &volume));
        feed(&mut engine, &halves("A", &volume));

        let flushed: Vec<SubjectId> = engine.finish().into_iter().map(|(k, _)| k).collect();
        assert_eq!(flushed, vec![SubjectId::from("A"), SubjectId::from("B")]);
        assert!(engine.is_empty());
        assert!(engine.ready_subjects().is_empty());
        assert_eq!(engine.stats().retrieved, 2);
    }

    #[test]
    fn stats_track_progress() {
        let volume = truth(&[4, 3], 0.0);
        let mut engine = SubjectAssembler::new();
        feed(&mut engine, &halves("A", &volume));
        feed(&mut engine, &halves("B", &volume));
        engine.get_subject(&"A".into()).unwrap();

        let stats = engine.stats();
        assert_eq!(stats.buffered, 1);
        assert_eq!(stats.ready, 0);
        assert_eq!(stats.retrieved, 1);
        assert_eq!(stats.patches_written, 4);
        assert_eq!(stats.batches_accepted, 4);
        let json = serde_json::to_value(stats).unwrap();
        assert_eq!(json["patches_written"], 4);
    }

    #[test]
    fn engines_are_independent() {
        let volume = truth(&[4, 3], 0.0);
        let mut first = SubjectAssembler::new();
        let mut second = SubjectAssembler::new();
        feed(&mut first, &halves("A", &volume));
        feed(&mut second, &halves("B", &volume));

        assert!(first.contains(&"A".into()) && !first.contains(&"B".into()));
        assert!(second.ready_subjects().is_empty());
    }
}
