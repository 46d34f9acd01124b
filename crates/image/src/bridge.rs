//! Pairing arrays with image geometry.

use crate::properties::ImageProperties;
use ndarray::{ArrayD, IxDyn};
use patchvol_core::ImageError;

/// An array laid out as [`ImageProperties::array_shape`] together with the
/// geometry it was acquired in.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageVolume<A = f32> {
    data: ArrayD<A>,
    properties: ImageProperties,
}

impl<A: Clone> ImageVolume<A> {
    /// Build a volume from `array`.
    ///
    /// An array already shaped like the image is taken as-is. Otherwise a
    /// scalar image expects a flat `(n,)` array and a vector image a
    /// `(n, components)` array, which are reshaped in row-major order.
    pub fn from_array(array: ArrayD<A>, properties: ImageProperties) -> Result<Self, ImageError> {
        properties.validate()?;
        let target = properties.array_shape();
        if array.shape() == target.as_slice() {
            return Ok(Self {
                data: array,
                properties,
            });
        }

        let expected_rank = if properties.is_vector_image() { 2 } else { 1 };
        if array.ndim() != expected_rank {
            return Err(ImageError::ArrayRank {
                expected: expected_rank,
                actual: array.ndim(),
            });
        }

        let data = reshape(array, &target)?;
        Ok(Self { data, properties })
    }

    /// Build a vector volume from a `(n, components)` array and the
    /// properties of the matching scalar image.
    pub fn from_vector_array(
        array: ArrayD<A>,
        properties: ImageProperties,
    ) -> Result<Self, ImageError> {
        if array.ndim() != 2 {
            return Err(ImageError::ArrayRank {
                expected: 2,
                actual: array.ndim(),
            });
        }
        let components = array.shape()[1];
        let properties = properties.with_components(components);
        properties.validate()?;
        let data = reshape(array, &properties.array_shape())?;
        Ok(Self { data, properties })
    }

    /// Flatten to `(n,)` for scalar images, `(n, components)` for vector
    /// images.
    pub fn to_flat(&self) -> ArrayD<A> {
        let n = self.properties.voxel_count();
        let shape = if self.properties.is_vector_image() {
            vec![n, self.properties.components]
        } else {
            vec![n]
        };
        // Element count is fixed by construction.
        ArrayD::from_shape_vec(IxDyn(&shape), self.data.iter().cloned().collect())
            .unwrap_or_else(|_| self.data.clone())
    }

    pub fn data(&self) -> &ArrayD<A> {
        &self.data
    }

    pub fn properties(&self) -> &ImageProperties {
        &self.properties
    }

    pub fn into_parts(self) -> (ArrayD<A>, ImageProperties) {
        (self.data, self.properties)
    }
}

fn reshape<A: Clone>(array: ArrayD<A>, shape: &[usize]) -> Result<ArrayD<A>, ImageError> {
    let expected: usize = shape.iter().product();
    if array.len() != expected {
        return Err(ImageError::ElementCount {
            expected,
            actual: array.len(),
        });
    }
    ArrayD::from_shape_vec(IxDyn(shape), array.into_iter().collect()).map_err(|_| {
        ImageError::ElementCount {
            expected,
            actual: 0,
        }
    })
}
