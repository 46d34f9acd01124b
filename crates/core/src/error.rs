//! Error types for the patchvol domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; [`Error`] aggregates them.

use crate::subject::SubjectId;
use thiserror::Error;

/// The top-level error type for all patchvol operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Assembly errors ---
    #[error("Assembly error: {0}")]
    Assembly(#[from] AssemblyError),

    // --- Image bridge errors ---
    #[error("Image error: {0}")]
    Image(#[from] ImageError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// The three per-item metadata fields every batch must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetadataField {
    Subject,
    IndexExpr,
    Shape,
}

impl MetadataField {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataField::Subject => "subject",
            MetadataField::IndexExpr => "index_expr",
            MetadataField::Shape => "shape",
        }
    }
}

impl std::fmt::Display for MetadataField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse classification of [`AssemblyError`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyErrorKind {
    /// The batch as a whole is malformed (missing or misaligned metadata).
    Configuration,
    /// A single patch cannot be placed into its subject's buffer.
    Placement,
    /// A retrieval named a subject the engine does not hold.
    Lookup,
    /// The stream violated the subject ordering contract.
    Sequencing,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblyError {
    #[error("batch metadata is missing required field `{0}`")]
    MissingMetadata(MetadataField),

    #[error("batch metadata field `{field}` has {actual} entries, prediction batch has {expected}")]
    MetadataLength {
        field: MetadataField,
        expected: usize,
        actual: usize,
    },

    #[error("prediction has no leading batch axis")]
    MissingBatchAxis,

    #[error("subject {subject} declares invalid volume shape {shape:?}")]
    InvalidShape { subject: SubjectId, shape: Vec<usize> },

    #[error("index expression for subject {subject} addresses {axes} axes, target has rank {rank}")]
    RegionRank {
        subject: SubjectId,
        axes: usize,
        rank: usize,
    },

    #[error("index expression for subject {subject} has zero step on axis {axis}")]
    ZeroStep { subject: SubjectId, axis: usize },

    #[error("region {start}..{stop} on axis {axis} exceeds extent {extent} for subject {subject}")]
    RegionOutOfBounds {
        subject: SubjectId,
        axis: usize,
        start: usize,
        stop: usize,
        extent: usize,
    },

    #[error("patch for subject {subject} has shape {actual:?}, region expects {expected:?}")]
    PatchShape {
        subject: SubjectId,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Subject \"{0}\" not in assembler")]
    SubjectNotFound(SubjectId),

    #[error("subject {0} was already retrieved and reappeared in the stream")]
    SubjectRevisited(SubjectId),
}

impl AssemblyError {
    pub fn kind(&self) -> AssemblyErrorKind {
        match self {
            AssemblyError::MissingMetadata(_)
            | AssemblyError::MetadataLength { .. }
            | AssemblyError::MissingBatchAxis => AssemblyErrorKind::Configuration,
            AssemblyError::InvalidShape { .. }
            | AssemblyError::RegionRank { .. }
            | AssemblyError::ZeroStep { .. }
            | AssemblyError::RegionOutOfBounds { .. }
            | AssemblyError::PatchShape { .. } => AssemblyErrorKind::Placement,
            AssemblyError::SubjectNotFound(_) => AssemblyErrorKind::Lookup,
            AssemblyError::SubjectRevisited(_) => AssemblyErrorKind::Sequencing,
        }
    }

    /// Whether the error rejects the batch before any item is looked at.
    pub fn is_configuration(&self) -> bool {
        self.kind() == AssemblyErrorKind::Configuration
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageError {
    #[error("array needs to be {expected}-dimensional, got rank {actual}")]
    ArrayRank { expected: usize, actual: usize },

    #[error("array holds {actual} elements, image needs {expected}")]
    ElementCount { expected: usize, actual: usize },

    #[error("invalid image properties: {0}")]
    InvalidProperties(String),
}
