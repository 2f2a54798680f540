//! Point-in-polygon and ground-point projection.
//!
//! Pure functions, no state. Every detection is reduced to a single
//! ground-contact point before zone membership is tested; zones are never
//! tested by full-box overlap.

use crate::detect::BoundingBox;
use crate::Point;

/// Ray-casting point-in-polygon test over an ordered vertex list.
///
/// The closing edge from the last vertex back to the first is implicit.
/// Horizontal edges (both y values equal) contribute no crossing, so no
/// division by zero occurs. Points exactly on the boundary are classified
/// consistently but the side is implementation-defined.
pub fn point_in_polygon(point: Point, polygon: &[Point]) -> bool {
    let n = polygon.len();
    if n < 3 {
        return false;
    }

    let (x, y) = (point.x, point.y);
    let mut inside = false;

    let mut p1 = polygon[0];
    for i in 1..=n {
        let p2 = polygon[i % n];
        if y > p1.y.min(p2.y) && y <= p1.y.max(p2.y) && x <= p1.x.max(p2.x) {
            // Only compute the x-intersection when the edge is not
            // horizontal; a horizontal edge treats the point's x as adjacent.
            let crosses = if p1.y != p2.y {
                let x_intersect = (y - p1.y) * (p2.x - p1.x) / (p2.y - p1.y) + p1.x;
                p1.x == p2.x || x <= x_intersect
            } else {
                p1.x == p2.x
            };
            if crosses {
                inside = !inside;
            }
        }
        p1 = p2;
    }

    inside
}

/// Project a detection's bounding box to its ground-contact point:
/// horizontal midpoint at the bottom edge (feet position).
pub fn ground_point(bbox: &BoundingBox) -> Point {
    Point::new(
        f64::from(bbox.x_min + bbox.x_max) / 2.0,
        f64::from(bbox.y_max),
    )
}
