//! Spatial description of an image.

use patchvol_core::ImageError;
use serde::{Deserialize, Serialize};

/// Geometry of an image: extent per axis, physical placement and voxel
/// components.
///
/// `size` is in image order (x, y, z). Arrays store the axes reversed, see
/// [`ImageProperties::array_shape`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageProperties {
    pub size: Vec<usize>,
    pub origin: Vec<f64>,
    pub spacing: Vec<f64>,
    /// Row-major direction cosine matrix, `dimensions²` entries.
    pub direction: Vec<f64>,
    /// Components per voxel; more than one makes a vector image.
    pub components: usize,
}

impl ImageProperties {
    /// Scalar image of the given size with unit geometry: origin at zero,
    /// unit spacing, identity direction.
    pub fn new(size: Vec<usize>) -> Self {
        let dims = size.len();
        let mut direction = vec![0.0; dims * dims];
        for i in 0..dims {
            direction[i * dims + i] = 1.0;
        }
        Self {
            size,
            origin: vec![0.0; dims],
            spacing: vec![1.0; dims],
            direction,
            components: 1,
        }
    }

    /// Unit-geometry properties for an array of `shape` (array axis order).
    pub fn for_array_shape(shape: &[usize]) -> Self {
        Self::new(shape.iter().rev().copied().collect())
    }

    pub fn with_origin(mut self, origin: Vec<f64>) -> Self {
        self.origin = origin;
        self
    }

    pub fn with_spacing(mut self, spacing: Vec<f64>) -> Self {
        self.spacing = spacing;
        self
    }

    pub fn with_direction(mut self, direction: Vec<f64>) -> Self {
        self.direction = direction;
        self
    }

    pub fn with_components(mut self, components: usize) -> Self {
        self.components = components;
        self
    }

    pub fn dimensions(&self) -> usize {
        self.size.len()
    }

    pub fn is_two_dimensional(&self) -> bool {
        self.dimensions() == 2
    }

    pub fn is_three_dimensional(&self) -> bool {
        self.dimensions() == 3
    }

    pub fn is_vector_image(&self) -> bool {
        self.components > 1
    }

    /// Number of voxels, not counting components.
    pub fn voxel_count(&self) -> usize {
        self.size.iter().product()
    }

    /// Array shape holding this image: the size reversed, plus a trailing
    /// component axis for vector images.
    pub fn array_shape(&self) -> Vec<usize> {
        let mut shape: Vec<usize> = self.size.iter().rev().copied().collect();
        if self.is_vector_image() {
            shape.push(self.components);
        }
        shape
    }

    pub fn validate(&self) -> Result<(), ImageError> {
        let dims = self.dimensions();
        if dims == 0 {
            return Err(ImageError::InvalidProperties("size is empty".into()));
        }
        if self.origin.len() != dims {
            return Err(ImageError::InvalidProperties(format!(
                "origin has {} entries, expected {dims}",
                self.origin.len()
            )));
        }
        if self.spacing.len() != dims {
            return Err(ImageError::InvalidProperties(format!(
                "spacing has {} entries, expected {dims}",
                self.spacing.len()
            )));
        }
        if self.direction.len() != dims * dims {
            return Err(ImageError::InvalidProperties(format!(
                "direction has {} entries, expected {}",
                self.direction.len(),
                dims * dims
            )));
        }
        if self.spacing.iter().any(|s| s.is_nan() || *s <= 0.0) {
            return Err(ImageError::InvalidProperties(
                "spacing must be positive".into(),
            ));
        }
        if self.components == 0 {
            return Err(ImageError::InvalidProperties(
                "an image needs at least one component".into(),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Display for ImageProperties {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "ImageProperties:")?;
        writeln!(f, " size:       {:?}", self.size)?;
        writeln!(f, " origin:     {:?}", self.origin)?;
        writeln!(f, " spacing:    {:?}", self.spacing)?;
        writeln!(f, " direction:  {:?}", self.direction)?;
        writeln!(f, " dimensions: {}", self.dimensions())?;
        write!(f, " components: {}", self.components)
    }
}
