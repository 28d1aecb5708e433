//! Nearest material recovery facility for every census tract.
//!
//! The core is two pure steps: [`normalize::normalize`] co-projects tracts
//! and facilities and derives tract centroids, then
//! [`matcher::match_nearest`] joins each centroid to its nearest facility.
//! [`data`], [`output`] and [`config`] are the file plumbing around them.

pub mod config;
pub mod data;
pub mod error;
pub mod frame;
pub mod index;
pub mod matcher;
pub mod normalize;
pub mod output;
pub mod types;

pub use error::{JoinError, Result};
pub use frame::{CoordinateFrame, FrameRegistry, Projection};
pub use matcher::{match_nearest, MatchOptions, MatchStrategy};
pub use normalize::{normalize, NormalizedLayers};
pub use types::{Facility, Layer, MatchResult, NormalizedUnit, ReferenceUnit};
