//! Sparse visual features for pixel games.
//!
//! A screen is a grid of raw color-indexed pixels. Feature extraction runs in two
//! stages:
//!
//! 1. Locate objects: either connected single-color regions ([`BlobDetector`]) or
//!    coarse tiles that contain a color ([`TileFeatures`]).
//! 2. Encode their positions, pairwise offsets and frame-to-frame offsets as
//!    integer [`FeatureId`]s ([`OffsetEncoder`]).
//!
//! [`FeatureExtractor`] selects one of the two variants at construction time and
//! exposes both through the [`FeatureSet`] trait.

pub use self::{background::*, blob::*, encoder::*, extractor::*, screen::*};

mod background;
mod blob;
mod encoder;
mod extractor;
mod screen;

/// Index into the sparse feature space of an extractor.
pub type FeatureId = u64;
