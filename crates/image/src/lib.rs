//! Image geometry and the bridge between flat predictions and volumes.
//!
//! Assembled subjects come out of the engine as bare arrays; this crate pairs
//! them with the spatial description of the image they belong to.

pub mod bridge;
pub mod properties;

pub use bridge::ImageVolume;
pub use patchvol_core::ImageError;
pub use properties::ImageProperties;
