//! Index expressions: per-axis region descriptors.
//!
//! An [`IndexExpr`] names a (possibly strided) sub-region of an n-dimensional
//! array. Resolving it against a concrete extent yields a [`Region`], which
//! can be applied as a read-view on a source tensor and as a write-view on a
//! destination buffer.

use crate::error::AssemblyError;
use crate::settings::BoundsPolicy;
use crate::subject::SubjectId;
use ndarray::{ArrayD, ArrayViewD, ArrayViewMutD, SliceInfoElem};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// A `start..stop` selection with a positive step on one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AxisSlice {
    pub start: usize,
    pub stop: usize,
    #[serde(default = "default_step")]
    pub step: usize,
}

fn default_step() -> usize {
    1
}

impl AxisSlice {
    pub fn new(start: usize, stop: usize) -> Self {
        Self {
            start,
            stop,
            step: 1,
        }
    }

    pub fn with_step(start: usize, stop: usize, step: usize) -> Self {
        Self { start, stop, step }
    }

    /// Select the single index `i` while keeping the axis (`i..i+1`).
    pub fn at(index: usize) -> Self {
        Self::new(index, index + 1)
    }

    /// Number of indices selected on this axis.
    pub fn len(&self) -> usize {
        if self.stop <= self.start || self.step == 0 {
            return 0;
        }
        (self.stop - self.start).div_ceil(self.step)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn to_slice_elem(self) -> SliceInfoElem {
        SliceInfoElem::Slice {
            start: self.start as isize,
            end: Some(self.stop as isize),
            step: self.step as isize,
        }
    }
}

impl From<Range<usize>> for AxisSlice {
    fn from(range: Range<usize>) -> Self {
        Self::new(range.start, range.end)
    }
}

impl std::fmt::Display for AxisSlice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.step == 1 {
            write!(f, "{}:{}", self.start, self.stop)
        } else {
            write!(f, "{}:{}:{}", self.start, self.stop, self.step)
        }
    }
}

/// A region descriptor over the leading axes of an array.
///
/// Axes past the end of the expression are taken whole, so an empty
/// expression addresses the entire array.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IndexExpr {
    axes: Vec<AxisSlice>,
}

impl IndexExpr {
    pub fn new(axes: Vec<AxisSlice>) -> Self {
        Self { axes }
    }

    /// Build an expression from plain unit-step ranges.
    pub fn from_ranges<I>(ranges: I) -> Self
    where
        I: IntoIterator<Item = Range<usize>>,
    {
        Self {
            axes: ranges.into_iter().map(AxisSlice::from).collect(),
        }
    }

    /// The expression that selects everything.
    pub fn full() -> Self {
        Self::default()
    }

    pub fn axes(&self) -> &[AxisSlice] {
        &self.axes
    }

    /// Number of axes named explicitly.
    pub fn rank(&self) -> usize {
        self.axes.len()
    }

    /// Resolve against an array extent, validating or clipping bounds.
    pub fn resolve(&self, extent: &[usize], bounds: BoundsPolicy) -> Result<Region, RegionFault> {
        if self.axes.len() > extent.len() {
            return Err(RegionFault::Rank {
                axes: self.axes.len(),
                rank: extent.len(),
            });
        }

        let mut axes = Vec::with_capacity(extent.len());
        let mut clipped = false;
        for (axis, &dim) in extent.iter().enumerate() {
            let Some(slice) = self.axes.get(axis).copied() else {
                axes.push(AxisSlice::new(0, dim));
                continue;
            };
            if slice.step == 0 {
                return Err(RegionFault::ZeroStep { axis });
            }
            if slice.start <= slice.stop && slice.stop <= dim {
                axes.push(slice);
                continue;
            }
            match bounds {
                BoundsPolicy::Strict => {
                    return Err(RegionFault::OutOfBounds {
                        axis,
                        start: slice.start,
                        stop: slice.stop,
                        extent: dim,
                    });
                }
                BoundsPolicy::Clip => {
                    let stop = slice.stop.min(dim);
                    let start = slice.start.min(stop);
                    clipped = true;
                    axes.push(AxisSlice::with_step(start, stop, slice.step));
                }
            }
        }

        Ok(Region { axes, clipped })
    }
}

impl From<Vec<Range<usize>>> for IndexExpr {
    fn from(ranges: Vec<Range<usize>>) -> Self {
        Self::from_ranges(ranges)
    }
}

impl std::fmt::Display for IndexExpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (i, axis) in self.axes.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{axis}")?;
        }
        write!(f, "]")
    }
}

/// Why an [`IndexExpr`] could not be resolved against an extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionFault {
    Rank { axes: usize, rank: usize },
    ZeroStep { axis: usize },
    OutOfBounds {
        axis: usize,
        start: usize,
        stop: usize,
        extent: usize,
    },
}

impl RegionFault {
    /// Attach the subject the region was resolved for.
    pub fn for_subject(self, subject: &SubjectId) -> AssemblyError {
        let subject = subject.clone();
        match self {
            RegionFault::Rank { axes, rank } => AssemblyError::RegionRank {
                subject,
                axes,
                rank,
            },
            RegionFault::ZeroStep { axis } => AssemblyError::ZeroStep { subject, axis },
            RegionFault::OutOfBounds {
                axis,
                start,
                stop,
                extent,
            } => AssemblyError::RegionOutOfBounds {
                subject,
                axis,
                start,
                stop,
                extent,
            },
        }
    }
}

/// An [`IndexExpr`] resolved against a concrete extent: one in-bounds slice
/// per axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    axes: Vec<AxisSlice>,
    clipped: bool,
}

impl Region {
    pub fn axes(&self) -> &[AxisSlice] {
        &self.axes
    }

    /// Shape of the selected sub-array.
    pub fn shape(&self) -> Vec<usize> {
        self.axes.iter().map(AxisSlice::len).collect()
    }

    /// Number of elements selected.
    pub fn len(&self) -> usize {
        self.axes.iter().map(AxisSlice::len).product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether resolution had to shrink the expression to fit.
    pub fn was_clipped(&self) -> bool {
        self.clipped
    }

    fn slice_info(&self) -> Vec<SliceInfoElem> {
        self.axes.iter().map(|a| a.to_slice_elem()).collect()
    }

    /// Apply as a read-view on `source`.
    ///
    /// `source` must have the extent this region was resolved against.
    pub fn read<'a, A>(&self, source: ArrayViewD<'a, A>) -> ArrayViewD<'a, A> {
        source.slice_move(self.slice_info().as_slice())
    }

    /// Apply as a write-view on `target`.
    pub fn view_mut<'a, A>(&self, target: &'a mut ArrayD<A>) -> ArrayViewMutD<'a, A> {
        target.slice_mut(self.slice_info().as_slice())
    }

    /// Overwrite the region of `target` with `values` (shapes must agree).
    pub fn write<A: Clone>(&self, target: &mut ArrayD<A>, values: &ArrayViewD<'_, A>) {
        self.view_mut(target).assign(values);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn};

    #[test]
    fn unnamed_trailing_axes_are_taken_whole() {
        let expr = IndexExpr::from_ranges([2..4]);
        let region = expr.resolve(&[8, 5, 3], BoundsPolicy::Strict).unwrap();
        assert_eq!(region.shape(), vec![2, 5, 3]);
        assert_eq!(region.len(), 30);
        assert!(!region.was_clipped());
    }

    #[test]
    fn strided_axis_length() {
        assert_eq!(AxisSlice::with_step(0, 10, 3).len(), 4);
        assert_eq!(AxisSlice::with_step(1, 2, 5).len(), 1);
        assert_eq!(AxisSlice::new(4, 4).len(), 0);
        assert!(AxisSlice::new(5, 3).is_empty());
        assert_eq!(AxisSlice::at(7), AxisSlice::new(7, 8));
    }

    #[test]
    fn strict_bounds_reject_overrun() {
        let expr = IndexExpr::from_ranges([0..4, 6..10]);
        let fault = expr.resolve(&[4, 8], BoundsPolicy::Strict).unwrap_err();
        assert_eq!(
            fault,
            RegionFault::OutOfBounds {
                axis: 1,
                start: 6,
                stop: 10,
                extent: 8
            }
        );
    }

    #[test]
    fn clip_bounds_shrink_to_extent() {
        let expr = IndexExpr::from_ranges([0..4, 6..10]);
        let region = expr.resolve(&[4, 8], BoundsPolicy::Clip).unwrap();
        assert!(region.was_clipped());
        assert_eq!(region.shape(), vec![4, 2]);

        let past_end = IndexExpr::from_ranges([9..12]);
        let region = past_end.resolve(&[8], BoundsPolicy::Clip).unwrap();
        assert!(region.is_empty());
    }

    #[test]
    fn too_many_axes_is_a_rank_fault() {
        let expr = IndexExpr::from_ranges([0..1, 0..1, 0..1]);
        let fault = expr.resolve(&[4, 4], BoundsPolicy::Clip).unwrap_err();
        assert_eq!(fault, RegionFault::Rank { axes: 3, rank: 2 });
        let err = fault.for_subject(&SubjectId::from("s1"));
        assert!(err.to_string().contains("s1"));
    }

    #[test]
    fn zero_step_is_rejected() {
        let expr = IndexExpr::new(vec![AxisSlice::with_step(0, 4, 0)]);
        assert_eq!(
            expr.resolve(&[4], BoundsPolicy::Clip).unwrap_err(),
            RegionFault::ZeroStep { axis: 0 }
        );
    }

    #[test]
    fn read_and_write_views_share_the_region() {
        let source = ArrayD::from_shape_fn(IxDyn(&[4, 4]), |ix| (ix[0] * 4 + ix[1]) as f32);
        let mut target = ArrayD::<f32>::zeros(IxDyn(&[4, 4]));
        let region = IndexExpr::from_ranges([1..3, 2..4])
            .resolve(&[4, 4], BoundsPolicy::Strict)
            .unwrap();

        let values = region.read(source.view());
        region.write(&mut target, &values);

        assert_eq!(target[IxDyn(&[1, 2])], 6.0);
        assert_eq!(target[IxDyn(&[2, 3])], 11.0);
        assert_eq!(target[IxDyn(&[0, 0])], 0.0);
        assert_eq!(target.iter().filter(|v| **v != 0.0).count(), 4);
    }

    #[test]
    fn strided_write_skips_elements() {
        let mut target = ArrayD::<f32>::zeros(IxDyn(&[6]));
        let region = IndexExpr::new(vec![AxisSlice::with_step(0, 6, 2)])
            .resolve(&[6], BoundsPolicy::Strict)
            .unwrap();
        let ones = ArrayD::<f32>::ones(IxDyn(&[3]));
        region.write(&mut target, &ones.view());
        assert_eq!(target.as_slice().unwrap(), &[1.0, 0.0, 1.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn display_uses_slice_notation() {
        let expr = IndexExpr::new(vec![AxisSlice::new(0, 16), AxisSlice::with_step(2, 10, 2)]);
        assert_eq!(expr.to_string(), "[0:16, 2:10:2]");
    }

    #[test]
    fn expression_roundtrips_through_json() {
        let expr = IndexExpr::from_ranges([0..8, 8..16]);
        let json = serde_json::to_string(&expr).unwrap();
        let back: IndexExpr = serde_json::from_str(&json).unwrap();
        assert_eq!(back, expr);

        let without_step: IndexExpr = serde_json::from_str(r#"[{"start":1,"stop":3}]"#).unwrap();
        assert_eq!(without_step.axes()[0].step, 1);
    }
}
