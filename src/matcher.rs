//! Nearest-facility join.
//!
//! For every unit centroid, picks the facility at minimum planar distance.
//! Lookups are independent, so they run on the rayon pool against a lookup
//! structure that is built once and shared read-only.

use crate::error::{JoinError, Result};
use crate::index::{scan_nearest, FacilityIndex, Nearest};
use crate::types::{Facility, Layer, MatchResult, NormalizedUnit};
use geo::Point;
use rayon::prelude::*;
use serde::Deserialize;
use tracing::debug;

/// Default tie tolerance in projected units (a micrometre for metre frames).
pub const DEFAULT_TIE_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    /// Full O(R·F) scan.
    BruteForce,
    /// R-tree over facilities, O(R·log F).
    #[default]
    Indexed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchOptions {
    pub strategy: MatchStrategy,
    /// Facilities within this distance of the best one count as tied.
    pub tie_tolerance: f64,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            strategy: MatchStrategy::default(),
            tie_tolerance: DEFAULT_TIE_TOLERANCE,
        }
    }
}

impl MatchOptions {
    pub fn with_strategy(strategy: MatchStrategy) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<()> {
        if !(self.tie_tolerance.is_finite() && self.tie_tolerance >= 0.0) {
            return Err(JoinError::InvalidOptions {
                reason: format!(
                    "tie tolerance must be finite and non-negative, got {}",
                    self.tie_tolerance
                ),
            });
        }
        Ok(())
    }
}

enum Lookup<'a> {
    Scan(&'a [Facility]),
    Index(FacilityIndex<'a>),
}

impl<'a> Lookup<'a> {
    fn build(facilities: &'a [Facility], strategy: MatchStrategy) -> Self {
        match strategy {
            MatchStrategy::BruteForce => Lookup::Scan(facilities),
            MatchStrategy::Indexed => {
                let index = FacilityIndex::build(facilities);
                debug!(facilities = index.len(), "built facility index");
                Lookup::Index(index)
            }
        }
    }

    fn nearest(&self, query: Point<f64>, tolerance: f64) -> Option<Nearest> {
        match self {
            Lookup::Scan(facilities) => scan_nearest(facilities, query, tolerance),
            Lookup::Index(index) => index.nearest(query, tolerance),
        }
    }
}

/// Joins every unit to its nearest facility.
///
/// Results come back in unit order. Fails without partial output if the
/// layers are in different frames or if there is nothing to match against.
pub fn match_nearest(
    units: &Layer<NormalizedUnit>,
    facilities: &Layer<Facility>,
    options: &MatchOptions,
) -> Result<Vec<MatchResult>> {
    if units.frame != facilities.frame {
        return Err(JoinError::FrameMismatch {
            units: units.frame.clone(),
            facilities: facilities.frame.clone(),
        });
    }
    options.validate()?;

    if units.is_empty() {
        return Ok(Vec::new());
    }
    if facilities.is_empty() {
        return Err(no_facilities(&units.records));
    }

    let lookup = Lookup::build(&facilities.records, options.strategy);
    let tolerance = options.tie_tolerance;

    let results = units
        .records
        .par_iter()
        .map(|unit| -> Result<MatchResult> {
            let nearest = lookup
                .nearest(unit.centroid(), tolerance)
                .ok_or_else(|| no_facilities(std::slice::from_ref(unit)))?;
            Ok(joined(unit, &facilities.records[nearest.index], nearest))
        })
        .collect::<Result<Vec<_>>>()?;

    debug!(
        units = results.len(),
        strategy = ?options.strategy,
        "matched units to facilities"
    );
    Ok(results)
}

fn joined(unit: &NormalizedUnit, facility: &Facility, nearest: Nearest) -> MatchResult {
    MatchResult {
        unit_id: unit.id().to_string(),
        unit_attributes: unit.attributes().clone(),
        centroid: unit.centroid(),
        facility_id: facility.id.clone(),
        facility_location: facility.location,
        facility_attributes: facility.attributes.clone(),
        distance: nearest.distance(),
    }
}

fn no_facilities(units: &[NormalizedUnit]) -> JoinError {
    JoinError::NoFacilities {
        unit_count: units.len(),
        unit_ids: units.iter().map(|u| u.id().to_string()).collect(),
    }
}
