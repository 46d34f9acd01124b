//! # patchvol core
//!
//! Domain types, traits, and error definitions for assembling per-subject
//! prediction volumes from streams of patch predictions.
//!
//! ## Design Philosophy
//!
//! The engine seam ([`Assembler`]) and every value that crosses a crate
//! boundary live here. Implementations live in their respective crates:
//! - `patchvol-assembler`: the subject assembly engine
//! - `patchvol-image`: geometry descriptor and array/volume bridge
//! - `patchvol-pipeline`: async streaming driver

pub mod assembler;
pub mod batch;
pub mod error;
pub mod event;
pub mod region;
pub mod settings;
pub mod subject;

// Re-export key types at crate root for ergonomics
pub use assembler::Assembler;
pub use batch::{BatchItem, BatchItems, BatchMetadata, PatchBatch, PatchRecord};
pub use error::{AssemblyError, AssemblyErrorKind, Error, ImageError, MetadataField, Result};
pub use event::{AssemblyEvent, EventBus};
pub use region::{AxisSlice, IndexExpr, Region, RegionFault};
pub use settings::{
    AssemblerConfig, BatchErrorPolicy, BoundsPolicy, PatchLayout, PipelineConfig, ReadinessPolicy,
    RevisitPolicy,
};
pub use subject::SubjectId;
