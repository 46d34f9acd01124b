//! Voxel coverage tracking for the coverage readiness policy.

use ndarray::{ArrayD, IxDyn};
use patchvol_core::Region;

/// Remembers which voxels of a buffer have been written at least once.
#[derive(Debug, Clone)]
pub struct CoverageMask {
    written: ArrayD<bool>,
    covered: usize,
}

impl CoverageMask {
    pub fn new(shape: &[usize]) -> Self {
        Self {
            written: ArrayD::from_elem(IxDyn(shape), false),
            covered: 0,
        }
    }

    /// Mark `region` as written. Returns `true` when this call completed the mask.
    pub fn mark(&mut self, region: &Region) -> bool {
        if self.is_complete() {
            return false;
        }
        let mut newly = 0;
        for cell in region.view_mut(&mut self.written).iter_mut() {
            if !*cell {
                *cell = true;
                newly += 1;
            }
        }
        self.covered += newly;
        self.is_complete()
    }

    pub fn covered(&self) -> usize {
        self.covered
    }

    pub fn total(&self) -> usize {
        self.written.len()
    }

    pub fn is_complete(&self) -> bool {
        self.covered == self.total()
    }

    /// Fraction of voxels written, in `[0, 1]`.
    pub fn fraction(&self) -> f64 {
        if self.total() == 0 {
            return 1.0;
        }
        self.covered as f64 / self.total() as f64
    }
}
