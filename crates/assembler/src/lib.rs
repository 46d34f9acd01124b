//! Subject assembly engine for patchvol.
//!
//! [`SubjectAssembler`] owns one zero-initialised accumulation buffer per
//! subject, writes every incoming patch into it and hands finished volumes
//! out exactly once. [`SharedAssembler`] puts the same engine behind a
//! single mutex for producer/consumer threads.

pub mod coverage;
pub mod engine;
pub mod shared;

pub use coverage::CoverageMask;
pub use engine::{AssemblyStats, SubjectAssembler};
pub use shared::SharedAssembler;

// The engine is driven through this trait
pub use patchvol_core::Assembler;
