//! Batches of patch predictions and their placement metadata.
//!
//! Upstream extraction produces one [`PatchBatch`] per model step: a
//! prediction tensor with the items stacked along axis 0, plus parallel
//! per-item lists naming the subject, the index expression and the full
//! volume shape of each item.

use crate::error::{AssemblyError, MetadataField};
use crate::region::IndexExpr;
use crate::subject::SubjectId;
use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn};
use serde::{Deserialize, Serialize};

/// Per-item placement metadata for one batch.
///
/// Every field is optional on the wire so that a batch produced without one
/// of the extractors can be detected and rejected as a whole.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Vec<SubjectId>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_expr: Option<Vec<IndexExpr>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<Vec<Vec<usize>>>,
}

impl BatchMetadata {
    pub fn new(subject: Vec<SubjectId>, index_expr: Vec<IndexExpr>, shape: Vec<Vec<usize>>) -> Self {
        Self {
            subject: Some(subject),
            index_expr: Some(index_expr),
            shape: Some(shape),
        }
    }

    /// Append one item, creating any missing list.
    pub fn push(&mut self, subject: SubjectId, index_expr: IndexExpr, shape: Vec<usize>) {
        self.subject.get_or_insert_with(Vec::new).push(subject);
        self.index_expr.get_or_insert_with(Vec::new).push(index_expr);
        self.shape.get_or_insert_with(Vec::new).push(shape);
    }

    /// Check presence and alignment against a batch of `batch_len` items.
    pub fn items(&self, batch_len: usize) -> Result<BatchItems<'_>, AssemblyError> {
        let subjects = self
            .subject
            .as_deref()
            .ok_or(AssemblyError::MissingMetadata(MetadataField::Subject))?;
        let exprs = self
            .index_expr
            .as_deref()
            .ok_or(AssemblyError::MissingMetadata(MetadataField::IndexExpr))?;
        let shapes = self
            .shape
            .as_deref()
            .ok_or(AssemblyError::MissingMetadata(MetadataField::Shape))?;

        for (field, actual) in [
            (MetadataField::Subject, subjects.len()),
            (MetadataField::IndexExpr, exprs.len()),
            (MetadataField::Shape, shapes.len()),
        ] {
            if actual != batch_len {
                return Err(AssemblyError::MetadataLength {
                    field,
                    expected: batch_len,
                    actual,
                });
            }
        }

        Ok(BatchItems {
            subjects,
            exprs,
            shapes,
        })
    }
}

/// Validated, index-aligned view over a batch's metadata.
#[derive(Debug, Clone, Copy)]
pub struct BatchItems<'a> {
    subjects: &'a [SubjectId],
    exprs: &'a [IndexExpr],
    shapes: &'a [Vec<usize>],
}

/// One item of a [`BatchItems`] view.
#[derive(Debug, Clone, Copy)]
pub struct BatchItem<'a> {
    pub index: usize,
    pub subject: &'a SubjectId,
    pub index_expr: &'a IndexExpr,
    pub shape: &'a [usize],
}

impl<'a> BatchItems<'a> {
    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }

    pub fn iter(self) -> impl Iterator<Item = BatchItem<'a>> + 'a {
        let (subjects, exprs, shapes) = (self.subjects, self.exprs, self.shapes);
        (0..subjects.len()).map(move |index| BatchItem {
            index,
            subject: &subjects[index],
            index_expr: &exprs[index],
            shape: shapes[index].as_slice(),
        })
    }
}

/// A single patch prediction with its placement, before batching.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchRecord {
    pub subject: SubjectId,
    pub index_expr: IndexExpr,
    pub shape: Vec<usize>,
    pub prediction: ArrayD<f32>,
}

/// A prediction tensor together with its batch metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchBatch {
    /// Items stacked along axis 0.
    pub prediction: ArrayD<f32>,
    pub metadata: BatchMetadata,
}

impl PatchBatch {
    pub fn new(prediction: ArrayD<f32>, metadata: BatchMetadata) -> Self {
        Self {
            prediction,
            metadata,
        }
    }

    /// Stack individual patch records into one batch.
    ///
    /// All records must carry predictions of the same shape.
    pub fn from_records(records: Vec<PatchRecord>) -> Result<Self, AssemblyError> {
        let Some(first) = records.first() else {
            return Ok(Self::new(
                ArrayD::zeros(IxDyn(&[0])),
                BatchMetadata::new(vec![], vec![], vec![]),
            ));
        };
        let item_shape = first.prediction.shape().to_vec();
        if let Some(odd) = records.iter().find(|r| r.prediction.shape() != item_shape.as_slice()) {
            return Err(AssemblyError::PatchShape {
                subject: odd.subject.clone(),
                expected: item_shape,
                actual: odd.prediction.shape().to_vec(),
            });
        }

        let views: Vec<ArrayViewD<'_, f32>> = records.iter().map(|r| r.prediction.view()).collect();
        let prediction = ndarray::stack(Axis(0), &views).map_err(|_| AssemblyError::PatchShape {
            subject: first.subject.clone(),
            expected: item_shape.clone(),
            actual: item_shape.clone(),
        })?;

        let mut metadata = BatchMetadata::default();
        for record in records {
            metadata.push(record.subject, record.index_expr, record.shape);
        }
        Ok(Self::new(prediction, metadata))
    }

    /// Number of items along the leading axis (0 for a rank-0 tensor).
    pub fn len(&self) -> usize {
        self.prediction.shape().first().copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
