//! `patchvol simulate`: Synthetic end-to-end run.
//!
//! Generates random ground-truth volumes, cuts each into tiles, streams the
//! tiles as prediction batches through the assembly pipeline and checks every
//! reassembled subject against its ground truth.

use async_trait::async_trait;
use clap::Args;
use ndarray::{ArrayD, IxDyn};
use patchvol_config::AppConfig;
use patchvol_core::{
    AssemblyError, BoundsPolicy, IndexExpr, PatchBatch, PatchLayout, PatchRecord,
    ReadinessPolicy, SubjectId,
};
use patchvol_image::{ImageProperties, ImageVolume};
use patchvol_pipeline::{AssembledSubject, AssemblyPipeline, PipelineError, SubjectSink};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::ops::Range;
use tracing::{debug, info};

#[derive(Debug, Args)]
pub struct SimulateArgs {
    /// Number of subjects
    #[arg(long)]
    subjects: Option<usize>,

    /// Volume shape, comma separated (e.g. 32,32,16)
    #[arg(long, value_delimiter = ',')]
    volume_shape: Option<Vec<usize>>,

    /// Patch shape, comma separated
    #[arg(long, value_delimiter = ',')]
    patch_shape: Option<Vec<usize>>,

    /// Patches per batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Random seed
    #[arg(long)]
    seed: Option<u64>,

    /// Readiness policy: subject_change | coverage
    #[arg(long)]
    readiness: Option<ReadinessPolicy>,

    /// Bounds policy: strict | clip
    #[arg(long)]
    bounds: Option<BoundsPolicy>,

    /// Patch layout: aligned | local
    #[arg(long)]
    layout: Option<PatchLayout>,

    /// Print the run report as JSON
    #[arg(long)]
    json: bool,
}

impl SimulateArgs {
    fn apply(&self, config: &mut AppConfig) {
        let sim = &mut config.simulation;
        if let Some(n) = self.subjects {
            sim.subjects = n;
        }
        if let Some(shape) = &self.volume_shape {
            sim.volume_shape = shape.clone();
        }
        if let Some(shape) = &self.patch_shape {
            sim.patch_shape = shape.clone();
        }
        if let Some(n) = self.batch_size {
            sim.batch_size = n;
        }
        if let Some(seed) = self.seed {
            sim.seed = seed;
        }
        if let Some(readiness) = self.readiness {
            config.assembler.readiness = readiness;
        }
        if let Some(bounds) = self.bounds {
            config.assembler.bounds = bounds;
        }
        if let Some(layout) = self.layout {
            config.assembler.layout = layout;
        }
    }
}

pub async fn run(mut config: AppConfig, args: SimulateArgs) -> Result<(), Box<dyn std::error::Error>> {
    args.apply(&mut config);
    config.validate()?;
    let sim = &config.simulation;

    let truth = ground_truth(sim.subjects, &sim.volume_shape, sim.seed);
    let batches = build_batches(&truth, &sim.patch_shape, config.assembler.layout, sim.batch_size)?;
    info!(
        subjects = truth.len(),
        batches = batches.len(),
        layout = ?config.assembler.layout,
        "Simulated workload ready"
    );

    let pipeline = AssemblyPipeline::new(config.assembler, config.pipeline);
    let (tx, handle) = pipeline.spawn(VerifyingSink::new(truth));
    for batch in batches {
        if tx.send(batch).await.is_err() {
            // The pipeline stopped early; its error is in the join handle
            break;
        }
    }
    drop(tx);

    let (report, sink) = handle.await??;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("🧩 Assembly run {}", report.run_id);
        println!(
            "   {} batches ({} rejected), {} patches, {} ms",
            report.batches, report.rejected_batches, report.patches, report.elapsed_ms
        );
        println!();
        for check in sink.checks() {
            let mark = if check.matches() { "✅" } else { "❌" };
            println!(
                "   {mark} {:<14} {:?}  max |err| {:.2e}{}",
                check.subject.as_str(),
                check.image.properties().size,
                check.max_abs_error,
                if check.flushed { "  (flushed)" } else { "" }
            );
        }
        for missing in sink.missing() {
            println!("   ❌ {:<14} never emitted", missing.as_str());
        }
    }

    let failed = sink.checks().iter().filter(|c| !c.matches()).count() + sink.missing().len();
    if failed > 0 {
        return Err(format!("{failed} subject(s) did not reassemble to their ground truth").into());
    }
    Ok(())
}

/// Seeded random volumes keyed `subject-000`, `subject-001`, ...
fn ground_truth(subjects: usize, shape: &[usize], seed: u64) -> BTreeMap<SubjectId, ArrayD<f32>> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..subjects)
        .map(|i| {
            let volume = ArrayD::from_shape_simple_fn(IxDyn(shape), || rng.random::<f32>());
            (SubjectId::new(format!("subject-{i:03}")), volume)
        })
        .collect()
}

/// Regular tiling of `shape`; tiles at the upper edge are truncated.
fn tiles(shape: &[usize], patch: &[usize]) -> Vec<Vec<Range<usize>>> {
    let mut out: Vec<Vec<Range<usize>>> = vec![Vec::new()];
    for (&extent, &step) in shape.iter().zip(patch) {
        let spans: Vec<Range<usize>> = (0..extent)
            .step_by(step)
            .map(|start| start..(start + step).min(extent))
            .collect();
        out = out
            .into_iter()
            .flat_map(|prefix| {
                spans.iter().map(move |span| {
                    let mut next = prefix.clone();
                    next.push(span.clone());
                    next
                })
            })
            .collect();
    }
    out
}

/// Cut every subject into tiles and group them, subject by subject, into
/// batches of `batch_size` items.
fn build_batches(
    truth: &BTreeMap<SubjectId, ArrayD<f32>>,
    patch: &[usize],
    layout: PatchLayout,
    batch_size: usize,
) -> Result<Vec<PatchBatch>, AssemblyError> {
    let mut records = Vec::new();
    for (subject, volume) in truth {
        let shape = volume.shape().to_vec();
        for ranges in tiles(&shape, patch) {
            let expr = IndexExpr::from_ranges(ranges);
            let region = expr
                .resolve(&shape, BoundsPolicy::Strict)
                .map_err(|fault| fault.for_subject(subject))?;
            let prediction = match layout {
                PatchLayout::Local => region.read(volume.view()).to_owned(),
                PatchLayout::Aligned => {
                    let mut full = ArrayD::zeros(IxDyn(&shape));
                    region.write(&mut full, &region.read(volume.view()));
                    full
                }
            };
            records.push(PatchRecord {
                subject: subject.clone(),
                index_expr: expr,
                shape: shape.clone(),
                prediction,
            });
        }
    }
    debug!(patches = records.len(), "Tiled ground truth");

    let mut batches = Vec::new();
    let mut records = records.into_iter().peekable();
    while records.peek().is_some() {
        let chunk: Vec<PatchRecord> = records.by_ref().take(batch_size.max(1)).collect();
        batches.push(PatchBatch::from_records(chunk)?);
    }
    Ok(batches)
}

/// Result of comparing one emitted subject with its ground truth.
struct SubjectCheck {
    subject: SubjectId,
    image: ImageVolume,
    max_abs_error: f32,
    flushed: bool,
}

impl SubjectCheck {
    fn matches(&self) -> bool {
        self.max_abs_error == 0.0
    }
}

/// Compares each assembled subject with the volume it was cut from.
struct VerifyingSink {
    truth: BTreeMap<SubjectId, ArrayD<f32>>,
    checks: Vec<SubjectCheck>,
}

impl VerifyingSink {
    fn new(truth: BTreeMap<SubjectId, ArrayD<f32>>) -> Self {
        Self {
            truth,
            checks: Vec::new(),
        }
    }

    fn checks(&self) -> &[SubjectCheck] {
        &self.checks
    }

    /// Ground-truth subjects never handed to this sink.
    fn missing(&self) -> Vec<&SubjectId> {
        self.truth
            .keys()
            .filter(|k| !self.checks.iter().any(|c| &c.subject == *k))
            .collect()
    }
}

#[async_trait]
impl SubjectSink for VerifyingSink {
    fn name(&self) -> &str {
        "verify"
    }

    async fn consume(&mut self, assembled: AssembledSubject) -> Result<(), PipelineError> {
        let sink_error = |reason: String| PipelineError::Sink {
            sink: "verify".into(),
            reason,
        };
        let expected = self
            .truth
            .get(&assembled.subject)
            .ok_or_else(|| sink_error(format!("unexpected subject {}", assembled.subject)))?;

        let max_abs_error = if expected.shape() == assembled.volume.shape() {
            expected
                .iter()
                .zip(assembled.volume.iter())
                .map(|(a, b)| (a - b).abs())
                .fold(0.0_f32, f32::max)
        } else {
            f32::INFINITY
        };

        let properties = ImageProperties::for_array_shape(assembled.volume.shape());
        let image = ImageVolume::from_array(assembled.volume, properties)
            .map_err(|e| sink_error(e.to_string()))?;

        debug!(subject = %assembled.subject, max_abs_error, "Verified subject");
        self.checks.push(SubjectCheck {
            subject: assembled.subject,
            image,
            max_abs_error,
            flushed: assembled.flushed,
        });
        Ok(())
    }
}
