//! Brings tracts and facilities into one projected frame and derives the
//! representative point of every tract.

use crate::error::{GeometryIssue, JoinError, Result, Subject};
use crate::frame::{CoordinateFrame, FrameRegistry, FrameTransform};
use crate::types::{Facility, Layer, NormalizedUnit, ReferenceUnit};
use geo::{Area, Centroid, ConvexHull, Coord, Intersects, MapCoords, MultiPolygon, Point};
use rayon::prelude::*;
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct NormalizedLayers {
    pub units: Layer<NormalizedUnit>,
    pub facilities: Layer<Facility>,
}

/// Re-expresses both layers in `target` and computes unit centroids.
///
/// Every invalid record in either layer is reported in a single
/// [`JoinError::InvalidGeometry`]; nothing is returned partially.
pub fn normalize(
    units: Layer<ReferenceUnit>,
    facilities: Layer<Facility>,
    target: &CoordinateFrame,
    registry: &FrameRegistry,
) -> Result<NormalizedLayers> {
    ensure_projected(target, registry)?;
    let unit_transform = registry.transform(&units.frame, target)?;
    let facility_transform = registry.transform(&facilities.frame, target)?;
    ensure_unique_ids(&facilities.records)?;

    let (units, mut issues) = project_units(units.records, &unit_transform);
    let (facilities, facility_issues) = project_facilities(facilities.records, &facility_transform);
    issues.extend(facility_issues);

    if !issues.is_empty() {
        return Err(JoinError::InvalidGeometry { issues });
    }

    debug!(
        units = units.len(),
        facilities = facilities.len(),
        frame = %target,
        "normalized layers"
    );

    Ok(NormalizedLayers {
        units: Layer::new(target.clone(), units),
        facilities: Layer::new(target.clone(), facilities),
    })
}

/// Unit-only normalization, used when tracts are pre-projected on their own.
pub fn normalize_units(
    units: Layer<ReferenceUnit>,
    target: &CoordinateFrame,
    registry: &FrameRegistry,
) -> Result<Layer<NormalizedUnit>> {
    ensure_projected(target, registry)?;
    let transform = registry.transform(&units.frame, target)?;
    let (units, issues) = project_units(units.records, &transform);
    if !issues.is_empty() {
        return Err(JoinError::InvalidGeometry { issues });
    }
    Ok(Layer::new(target.clone(), units))
}

/// Planar distances are meaningless in lon/lat, so the target must be projected.
fn ensure_projected(target: &CoordinateFrame, registry: &FrameRegistry) -> Result<()> {
    if registry.resolve(target)?.is_geographic() {
        return Err(JoinError::GeographicTarget {
            frame: target.clone(),
        });
    }
    Ok(())
}

fn ensure_unique_ids(facilities: &[Facility]) -> Result<()> {
    let mut seen = HashSet::with_capacity(facilities.len());
    for facility in facilities {
        if !seen.insert(facility.id.as_str()) {
            return Err(JoinError::DuplicateFacilityId {
                id: facility.id.clone(),
            });
        }
    }
    Ok(())
}

fn project_units(
    units: Vec<ReferenceUnit>,
    transform: &FrameTransform,
) -> (Vec<NormalizedUnit>, Vec<GeometryIssue>) {
    let results: Vec<std::result::Result<NormalizedUnit, GeometryIssue>> = units
        .into_par_iter()
        .map(|unit| normalize_unit(unit, transform))
        .collect();
    split(results)
}

fn project_facilities(
    facilities: Vec<Facility>,
    transform: &FrameTransform,
) -> (Vec<Facility>, Vec<GeometryIssue>) {
    let results: Vec<std::result::Result<Facility, GeometryIssue>> = facilities
        .into_par_iter()
        .map(|facility| normalize_facility(facility, transform))
        .collect();
    split(results)
}

fn split<T>(results: Vec<std::result::Result<T, GeometryIssue>>) -> (Vec<T>, Vec<GeometryIssue>) {
    let mut ok = Vec::with_capacity(results.len());
    let mut issues = Vec::new();
    for result in results {
        match result {
            Ok(value) => ok.push(value),
            Err(issue) => issues.push(issue),
        }
    }
    (ok, issues)
}

fn normalize_unit(
    unit: ReferenceUnit,
    transform: &FrameTransform,
) -> std::result::Result<NormalizedUnit, GeometryIssue> {
    let issue = |reason: String| GeometryIssue {
        subject: Subject::Unit(unit.id.clone()),
        reason,
    };

    if boundary_is_empty(&unit.boundary) {
        return Err(issue("boundary is empty".to_string()));
    }

    let projected: MultiPolygon<f64> = unit
        .boundary
        .try_map_coords(|c| transform.apply(c).ok_or(c))
        .map_err(|c| issue(unprojectable(c, transform)))?;

    let area = projected.unsigned_area();
    if !(area.is_finite() && area > 0.0) {
        return Err(issue("boundary has zero area".to_string()));
    }

    let centroid = projected
        .centroid()
        .filter(|p| p.x().is_finite() && p.y().is_finite())
        .ok_or_else(|| issue("centroid could not be computed".to_string()))?;

    // Self-intersecting rings can push the signed-area centroid off the shape.
    if !projected.convex_hull().intersects(&centroid) {
        return Err(issue(format!(
            "boundary is self-intersecting; centroid ({}, {}) falls outside its convex hull",
            centroid.x(),
            centroid.y()
        )));
    }

    Ok(NormalizedUnit::new(
        unit.id,
        projected,
        centroid,
        unit.attributes,
    ))
}

fn normalize_facility(
    facility: Facility,
    transform: &FrameTransform,
) -> std::result::Result<Facility, GeometryIssue> {
    let source = facility.location.0;
    match transform.apply(source) {
        Some(c) => Ok(Facility {
            location: Point::from(c),
            ..facility
        }),
        None => Err(GeometryIssue {
            subject: Subject::Facility(facility.id),
            reason: unprojectable(source, transform),
        }),
    }
}

fn boundary_is_empty(boundary: &MultiPolygon<f64>) -> bool {
    boundary.0.iter().all(|p| p.exterior().0.is_empty())
}

fn unprojectable(c: Coord<f64>, transform: &FrameTransform) -> String {
    if !(c.x.is_finite() && c.y.is_finite()) {
        format!("coordinate ({}, {}) is not finite", c.x, c.y)
    } else if transform.source_is_geographic() {
        format!(
            "coordinate ({}, {}) is outside the longitude/latitude range or cannot be projected",
            c.x, c.y
        )
    } else {
        format!("coordinate ({}, {}) cannot be projected", c.x, c.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, MultiPolygon, Polygon};

    fn square(x0: f64, y0: f64, size: f64) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![
            (x: x0, y: y0),
            (x: x0 + size, y: y0),
            (x: x0 + size, y: y0 + size),
            (x: x0, y: y0 + size),
            (x: x0, y: y0),
        ]])
    }

    fn unit(id: &str, boundary: MultiPolygon<f64>) -> ReferenceUnit {
        ReferenceUnit {
            id: id.to_string(),
            boundary,
            attributes: vec![],
        }
    }

    fn facility(id: &str, x: f64, y: f64) -> Facility {
        Facility {
            id: id.to_string(),
            location: Point::new(x, y),
            attributes: vec![("name".into(), format!("MRF {}", id))],
        }
    }

    fn albers() -> CoordinateFrame {
        CoordinateFrame::epsg(3488)
    }

    #[test]
    fn centroid_of_projected_square() {
        let registry = FrameRegistry::with_defaults();
        let out = normalize(
            Layer::new(albers(), vec![unit("t1", square(0.0, 0.0, 10.0))]),
            Layer::new(albers(), vec![facility("a", 3.0, 4.0)]),
            &albers(),
            &registry,
        )
        .unwrap();

        assert_eq!(out.units.frame, albers());
        assert_eq!(out.facilities.frame, albers());
        assert_eq!(out.units.records[0].centroid(), Point::new(5.0, 5.0));
        assert_eq!(out.facilities.records[0].location, Point::new(3.0, 4.0));
    }

    #[test]
    fn facilities_are_projected_from_lon_lat() {
        let registry = FrameRegistry::with_defaults();
        let out = normalize(
            Layer::new(albers(), vec![unit("t1", square(0.0, 0.0, 10.0))]),
            Layer::new(CoordinateFrame::epsg(4326), vec![facility("a", -120.0, 0.0)]),
            &albers(),
            &registry,
        )
        .unwrap();

        let loc = out.facilities.records[0].location;
        assert!(loc.x().abs() < 1e-6);
        assert!((loc.y() + 4_000_000.0).abs() < 1e-6);
        assert_eq!(out.facilities.records[0].attributes[0].1, "MRF a");
    }

    #[test]
    fn empty_boundary_is_invalid() {
        let registry = FrameRegistry::with_defaults();
        let err = normalize(
            Layer::new(albers(), vec![unit("empty", MultiPolygon::new(vec![]))]),
            Layer::new(albers(), vec![facility("a", 0.0, 0.0)]),
            &albers(),
            &registry,
        )
        .unwrap_err();

        match err {
            JoinError::InvalidGeometry { issues } => {
                assert_eq!(issues.len(), 1);
                assert_eq!(issues[0].subject, Subject::Unit("empty".into()));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn degenerate_bowtie_is_invalid() {
        let bowtie: Polygon<f64> = polygon![
            (x: 0.0, y: 0.0),
            (x: 2.0, y: 2.0),
            (x: 2.0, y: 0.0),
            (x: 0.0, y: 2.0),
            (x: 0.0, y: 0.0),
        ];
        let registry = FrameRegistry::with_defaults();
        let err = normalize_units(
            Layer::new(albers(), vec![unit("bowtie", MultiPolygon::new(vec![bowtie]))]),
            &albers(),
            &registry,
        )
        .unwrap_err();
        assert!(matches!(err, JoinError::InvalidGeometry { .. }));
    }

    #[test]
    fn lopsided_figure_eight_is_invalid() {
        let figure_eight: Polygon<f64> = polygon![
            (x: 0.0, y: 0.0),
            (x: 10.0, y: 10.0),
            (x: 10.0, y: 0.0),
            (x: 0.0, y: 9.0),
            (x: 0.0, y: 0.0),
        ];
        let registry = FrameRegistry::with_defaults();
        let err = normalize_units(
            Layer::new(albers(), vec![unit("eight", MultiPolygon::new(vec![figure_eight]))]),
            &albers(),
            &registry,
        )
        .unwrap_err();

        match err {
            JoinError::InvalidGeometry { issues } => {
                assert_eq!(issues[0].subject, Subject::Unit("eight".into()));
                assert!(issues[0].reason.contains("self-intersecting"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn concave_tract_keeps_its_centroid() {
        let l_shape: Polygon<f64> = polygon![
            (x: 0.0, y: 0.0),
            (x: 10.0, y: 0.0),
            (x: 10.0, y: 1.0),
            (x: 1.0, y: 1.0),
            (x: 1.0, y: 10.0),
            (x: 0.0, y: 10.0),
            (x: 0.0, y: 0.0),
        ];
        let registry = FrameRegistry::with_defaults();
        let units = normalize_units(
            Layer::new(albers(), vec![unit("l", MultiPolygon::new(vec![l_shape]))]),
            &albers(),
            &registry,
        )
        .unwrap();
        assert_eq!(units.len(), 1);
    }

    #[test]
    fn geographic_target_is_rejected() {
        let registry = FrameRegistry::with_defaults();
        let lon_lat = CoordinateFrame::epsg(4326);
        let err = normalize(
            Layer::new(lon_lat.clone(), vec![unit("t1", square(-120.0, 60.0, 0.1))]),
            Layer::new(lon_lat.clone(), vec![facility("a", -118.5, 60.0)]),
            &lon_lat,
            &registry,
        )
        .unwrap_err();
        assert!(matches!(err, JoinError::GeographicTarget { frame } if frame.code() == 4326));

        let err = normalize_units(
            Layer::new(lon_lat.clone(), vec![unit("t1", square(-120.0, 60.0, 0.1))]),
            &CoordinateFrame::epsg(4269),
            &registry,
        )
        .unwrap_err();
        assert!(matches!(err, JoinError::GeographicTarget { .. }));
    }

    #[test]
    fn out_of_range_facilities_are_all_reported() {
        let registry = FrameRegistry::with_defaults();
        let err = normalize(
            Layer::new(albers(), vec![unit("t1", square(0.0, 0.0, 1.0))]),
            Layer::new(
                CoordinateFrame::epsg(4326),
                vec![
                    facility("ok", -120.0, 37.0),
                    facility("lat", -120.0, 91.0),
                    facility("lon", -181.0, 37.0),
                    facility("nan", f64::NAN, 37.0),
                ],
            ),
            &albers(),
            &registry,
        )
        .unwrap_err();

        match err {
            JoinError::InvalidGeometry { issues } => {
                let ids: Vec<_> = issues.iter().map(|i| i.subject.clone()).collect();
                assert_eq!(
                    ids,
                    vec![
                        Subject::Facility("lat".into()),
                        Subject::Facility("lon".into()),
                        Subject::Facility("nan".into()),
                    ]
                );
                assert!(issues[2].reason.contains("not finite"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn unknown_target_frame() {
        let registry = FrameRegistry::with_defaults();
        let err = normalize(
            Layer::new(albers(), vec![]),
            Layer::new(albers(), vec![]),
            &CoordinateFrame::epsg(9999),
            &registry,
        )
        .unwrap_err();
        assert!(matches!(err, JoinError::UnknownFrame { .. }));
    }

    #[test]
    fn duplicate_facility_ids_are_rejected() {
        let registry = FrameRegistry::with_defaults();
        let err = normalize(
            Layer::new(albers(), vec![]),
            Layer::new(albers(), vec![facility("a", 0.0, 0.0), facility("a", 1.0, 1.0)]),
            &albers(),
            &registry,
        )
        .unwrap_err();
        assert!(matches!(err, JoinError::DuplicateFacilityId { id } if id == "a"));
    }

    #[test]
    fn tract_boundaries_are_reprojected_before_centroid() {
        let registry = FrameRegistry::with_defaults();
        let units = normalize_units(
            Layer::new(
                CoordinateFrame::epsg(4326),
                vec![unit("sf", square(-122.5, 37.7, 0.1))],
            ),
            &albers(),
            &registry,
        )
        .unwrap();

        let c = units.records[0].centroid();
        // Inside the projected boundary, far from the lon/lat values.
        assert!(c.x() < -100_000.0 && c.x() > -300_000.0);
        assert!(c.y() < 100_000.0 && c.y() > -200_000.0);
    }
}
