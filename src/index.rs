//! Static R-tree over facility locations.
//!
//! Built once per join and then only read, so it can be shared by reference
//! across rayon workers. Both the index and the linear scan go through
//! [`squared_distance`] and [`tie_limit`], which keeps their answers
//! identical down to the bit.

use crate::types::Facility;
use geo::Point;
use rstar::{PointDistance, RTree, RTreeObject, AABB};

/// Squared Euclidean distance between two planar positions.
#[inline]
pub fn squared_distance(a: [f64; 2], b: [f64; 2]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    dx * dx + dy * dy
}

/// Largest squared distance still considered tied with `best_2`.
///
/// Never below `best_2`: squaring the root can round down (13, 29, ...).
#[inline]
pub fn tie_limit(best_2: f64, tolerance: f64) -> f64 {
    let reach = best_2.sqrt() + tolerance;
    (reach * reach).max(best_2)
}

/// Winner of a nearest-facility lookup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Nearest {
    /// Position of the facility in the slice the lookup was built over.
    pub index: usize,
    pub distance_2: f64,
}

impl Nearest {
    pub fn distance(&self) -> f64 {
        self.distance_2.sqrt()
    }
}

/// Keeps whichever candidate has the smaller facility id.
#[inline]
pub(crate) fn prefer_smaller_id(facilities: &[Facility], current: Nearest, candidate: Nearest) -> Nearest {
    if facilities[candidate.index].id < facilities[current.index].id {
        candidate
    } else {
        current
    }
}

// Wrapper so the tree stores positions plus a back-reference into the
// facility slice instead of cloning attribute payloads.
struct FacilityPoint {
    index: usize,
    position: [f64; 2],
}

impl RTreeObject for FacilityPoint {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.position)
    }
}

impl PointDistance for FacilityPoint {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        squared_distance(self.position, *point)
    }
}

pub struct FacilityIndex<'a> {
    facilities: &'a [Facility],
    tree: RTree<FacilityPoint>,
}

impl<'a> FacilityIndex<'a> {
    /// Bulk-loads the tree; O(F log F).
    pub fn build(facilities: &'a [Facility]) -> Self {
        let points: Vec<FacilityPoint> = facilities
            .iter()
            .enumerate()
            .map(|(index, facility)| FacilityPoint {
                index,
                position: position(facility.location),
            })
            .collect();

        Self {
            facilities,
            tree: RTree::bulk_load(points),
        }
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Nearest facility to `query`; ties within `tolerance` go to the
    /// smallest id. `None` only when the index is empty.
    pub fn nearest(&self, query: Point<f64>, tolerance: f64) -> Option<Nearest> {
        let query = position(query);
        let mut candidates = self.tree.nearest_neighbor_iter_with_distance_2(&query);

        let (first, best_2) = candidates.next()?;
        let limit = tie_limit(best_2, tolerance);
        let mut winner = Nearest {
            index: first.index,
            distance_2: best_2,
        };

        // The iterator yields in non-decreasing distance order.
        for (point, distance_2) in candidates {
            if distance_2 > limit {
                break;
            }
            winner = prefer_smaller_id(
                self.facilities,
                winner,
                Nearest {
                    index: point.index,
                    distance_2,
                },
            );
        }

        Some(winner)
    }
}

/// Linear scan with the same distance and tie rule as [`FacilityIndex`].
pub fn scan_nearest(facilities: &[Facility], query: Point<f64>, tolerance: f64) -> Option<Nearest> {
    let query = position(query);
    let distances: Vec<f64> = facilities
        .iter()
        .map(|f| squared_distance(position(f.location), query))
        .collect();

    let best_2 = distances.iter().copied().reduce(f64::min)?;
    let limit = tie_limit(best_2, tolerance);

    distances
        .iter()
        .enumerate()
        .filter(|(_, d)| **d <= limit)
        .map(|(index, &distance_2)| Nearest { index, distance_2 })
        .reduce(|current, candidate| prefer_smaller_id(facilities, current, candidate))
}

#[inline]
fn position(p: Point<f64>) -> [f64; 2] {
    [p.x(), p.y()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facility(id: &str, x: f64, y: f64) -> Facility {
        Facility {
            id: id.to_string(),
            location: Point::new(x, y),
            attributes: vec![],
        }
    }

    #[test]
    fn index_finds_closest() {
        let facilities = vec![facility("far", 10.0, 0.0), facility("near", 0.0, 5.0)];
        let index = FacilityIndex::build(&facilities);
        let nearest = index.nearest(Point::new(0.0, 0.0), 0.0).unwrap();
        assert_eq!(facilities[nearest.index].id, "near");
        assert_eq!(nearest.distance(), 5.0);
    }

    #[test]
    fn ties_go_to_smallest_id_regardless_of_order() {
        let facilities = vec![
            facility("C", 0.0, -3.0),
            facility("B", 3.0, 0.0),
            facility("A", -3.0, 0.0),
            facility("D", 0.0, 4.0),
        ];
        let index = FacilityIndex::build(&facilities);
        let indexed = index.nearest(Point::new(0.0, 0.0), 1e-9).unwrap();
        let scanned = scan_nearest(&facilities, Point::new(0.0, 0.0), 1e-9).unwrap();
        assert_eq!(facilities[indexed.index].id, "A");
        assert_eq!(indexed, scanned);
    }

    #[test]
    fn tolerance_widens_the_tie() {
        let facilities = vec![facility("b", 1.0, 0.0), facility("a", 1.0005, 0.0)];
        let strict = scan_nearest(&facilities, Point::new(0.0, 0.0), 0.0).unwrap();
        let loose = scan_nearest(&facilities, Point::new(0.0, 0.0), 0.001).unwrap();
        assert_eq!(facilities[strict.index].id, "b");
        assert_eq!(facilities[loose.index].id, "a");

        let index = FacilityIndex::build(&facilities);
        assert_eq!(index.nearest(Point::new(0.0, 0.0), 0.001), Some(loose));
    }

    #[test]
    fn tie_limit_never_excludes_the_minimum() {
        for best_2 in (1..2_000).map(f64::from) {
            assert!(tie_limit(best_2, 0.0) >= best_2, "limit below {}", best_2);
        }
    }

    #[test]
    fn zero_tolerance_with_inexact_root() {
        // d² = 13 for both; sqrt(13) is not representable.
        let single = vec![facility("only", 2.0, 3.0)];
        let scanned = scan_nearest(&single, Point::new(0.0, 0.0), 0.0).unwrap();
        assert_eq!(scanned.distance_2, 13.0);
        assert_eq!(FacilityIndex::build(&single).nearest(Point::new(0.0, 0.0), 0.0), Some(scanned));

        let tied = vec![facility("B", 2.0, 3.0), facility("A", 3.0, -2.0)];
        let scanned = scan_nearest(&tied, Point::new(0.0, 0.0), 0.0).unwrap();
        let indexed = FacilityIndex::build(&tied).nearest(Point::new(0.0, 0.0), 0.0).unwrap();
        assert_eq!(tied[scanned.index].id, "A");
        assert_eq!(indexed, scanned);
    }

    #[test]
    fn empty_inputs_have_no_nearest() {
        let index = FacilityIndex::build(&[]);
        assert!(index.is_empty());
        assert!(index.nearest(Point::new(0.0, 0.0), 0.0).is_none());
        assert!(scan_nearest(&[], Point::new(0.0, 0.0), 0.0).is_none());
    }
}
