//! geometry.rs — 2D/3D primitives for wall intersection and path lengths
//!
//! Pure math, no I/O, no panics. Every degenerate input (zero-length
//! vectors, vertical lines, parallel sightlines) has a documented finite
//! fallback — `NaN`/`Inf` never escapes to a caller.

use rf_types::Vector;

const EPS: f64 = 1e-9;

// ── Vector basics ─────────────────────────────────────────────────────────────

/// Euclidean norm; 0 only for the zero vector.
pub fn magnitude(v: &Vector) -> f64 {
    (v.x * v.x + v.y * v.y + v.z * v.z).sqrt()
}

// ── 1D / 2D intersection tests ────────────────────────────────────────────────

/// 1D interval overlap test. Order-independent: both ranges are normalized
/// before comparison.
pub fn projections_intersect(a0: f64, a1: f64, b0: f64, b1: f64) -> bool {
    let (a_lo, a_hi) = if a0 <= a1 { (a0, a1) } else { (a1, a0) };
    let (b_lo, b_hi) = if b0 <= b1 { (b0, b1) } else { (b1, b0) };
    a_lo <= b_hi && b_lo <= a_hi
}

/// CCW cross-product sign of (o→a) × (o→b), z ignored.
fn cross(o: &Vector, a: &Vector, b: &Vector) -> f64 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

/// `p` is known collinear with the a–b line; true iff it lies within the
/// segment's bounding box, i.e. on the segment itself.
fn on_segment(a: &Vector, b: &Vector, p: &Vector) -> bool {
    p.x >= a.x.min(b.x) && p.x <= a.x.max(b.x) && p.y >= a.y.min(b.y) && p.y <= a.y.max(b.y)
}

/// Segment intersection in the x/y plane: bounding-box pre-check on both
/// axes, then the four-determinant orientation test. Touching endpoints and
/// collinear overlap count as intersecting. A zero determinant alone only
/// proves collinearity with the other segment's infinite line, so each
/// collinear endpoint is re-checked against the segment proper.
pub fn segments_intersect_2d(p1: &Vector, p2: &Vector, q1: &Vector, q2: &Vector) -> bool {
    if !projections_intersect(p1.x, p2.x, q1.x, q2.x)
        || !projections_intersect(p1.y, p2.y, q1.y, q2.y)
    {
        return false;
    }
    let d1 = cross(q1, q2, p1);
    let d2 = cross(q1, q2, p2);
    let d3 = cross(p1, p2, q1);
    let d4 = cross(p1, p2, q2);
    if ((d1 > 0.0 && d2 < 0.0) || (d1 < 0.0 && d2 > 0.0))
        && ((d3 > 0.0 && d4 < 0.0) || (d3 < 0.0 && d4 > 0.0))
    {
        return true;
    }
    (d1 == 0.0 && on_segment(q1, q2, p1))
        || (d2 == 0.0 && on_segment(q1, q2, p2))
        || (d3 == 0.0 && on_segment(p1, p2, q1))
        || (d4 == 0.0 && on_segment(p1, p2, q2))
}

/// Infinite-line intersection in slope/intercept form. Vertical lines are
/// special-cased (infinite slope would otherwise produce NaN/Inf); `None`
/// means parallel, including two verticals.
pub fn lines_intersection_2d(
    p1: &Vector,
    p2: &Vector,
    q1: &Vector,
    q2: &Vector,
) -> Option<(f64, f64)> {
    let p_vertical = (p2.x - p1.x).abs() < EPS;
    let q_vertical = (q2.x - q1.x).abs() < EPS;

    if p_vertical && q_vertical {
        return None;
    }
    if p_vertical {
        let mq = (q2.y - q1.y) / (q2.x - q1.x);
        return Some((p1.x, mq * (p1.x - q1.x) + q1.y));
    }
    if q_vertical {
        let mp = (p2.y - p1.y) / (p2.x - p1.x);
        return Some((q1.x, mp * (q1.x - p1.x) + p1.y));
    }

    let mp = (p2.y - p1.y) / (p2.x - p1.x);
    let mq = (q2.y - q1.y) / (q2.x - q1.x);
    if (mp - mq).abs() < EPS {
        return None;
    }
    let bp = p1.y - mp * p1.x;
    let bq = q1.y - mq * q1.x;
    let x = (bq - bp) / (mp - mq);
    Some((x, mp * x + bp))
}

// ── Angles ────────────────────────────────────────────────────────────────────

/// Horizontal azimuth of `v` in whole degrees, `[0, 360)`, 0° pointing
/// toward negative y. `offset_deg` is added modulo 360.
pub fn azimuth_deg(v: &Vector, offset_deg: i32) -> i32 {
    let angle = v.x.atan2(-v.y).to_degrees().rem_euclid(360.0);
    (angle.round() as i32 + offset_deg).rem_euclid(360)
}

/// Vertical plunge of `v` in whole degrees, `[0, 360)`. Zero vector plunges
/// to 0 rather than NaN.
pub fn plunge_deg(v: &Vector, offset_deg: i32) -> i32 {
    let mag = magnitude(v);
    if mag < EPS {
        return offset_deg.rem_euclid(360);
    }
    let angle = (v.z / mag).asin().to_degrees().rem_euclid(360.0);
    (angle.round() as i32 + offset_deg).rem_euclid(360)
}

// ── Wall path length ──────────────────────────────────────────────────────────

/// Length of the client→sensor sightline inside one wall, meters.
///
/// Returns 0 when the sightline does not cross the wall segment in 2D.
/// Otherwise the in-wall length is `thickness / sin(angle)` combined with
/// the vertical rise of the sightline at the crossing point. Degenerate
/// angles fall back to `thickness` (perpendicular / unresolvable) or to the
/// collinear overlap length (parallel) — never NaN or Inf.
pub fn wall_path_length_through(
    client: &Vector,
    sensor: &Vector,
    wall_p1: &Vector,
    wall_p2: &Vector,
    thickness_m: f64,
    cell_size_m: f64,
) -> f64 {
    if thickness_m <= 0.0 {
        return 0.0;
    }
    if !segments_intersect_2d(client, sensor, wall_p1, wall_p2) {
        return 0.0;
    }

    let sight = sensor.sub(client);
    let wall = wall_p2.sub(wall_p1);
    let sight_2d = sight.len_2d();
    let wall_2d = wall.len_2d();

    let denom = sight_2d * wall_2d;
    let cos_angle = if denom < EPS {
        f64::NAN
    } else {
        (sight.x * wall.x + sight.y * wall.y) / denom
    };

    if cos_angle.is_nan() {
        // Zero-length sightline or wall; treat as one perpendicular crossing
        return thickness_m;
    }

    if cos_angle.abs() >= 1.0 - EPS {
        // Parallel and intersecting in 2D means collinear: the in-wall length
        // is the overlap of the two segments along the shared direction.
        let ux = wall.x / wall_2d;
        let uy = wall.y / wall_2d;
        let sc = (client.x - wall_p1.x) * ux + (client.y - wall_p1.y) * uy;
        let ss = (sensor.x - wall_p1.x) * ux + (sensor.y - wall_p1.y) * uy;
        let (s_lo, s_hi) = if sc <= ss { (sc, ss) } else { (ss, sc) };
        let overlap_cells = (s_hi.min(wall_2d) - s_lo.max(0.0)).max(0.0);
        let vertical = if sight_2d < EPS {
            sight.z
        } else {
            sight.z * (overlap_cells / sight_2d)
        };
        if overlap_cells <= EPS {
            // Touching at a single point: one thickness plus the rise
            return thickness_m.hypot(vertical * cell_size_m);
        }
        return (overlap_cells * cell_size_m).hypot(vertical * cell_size_m);
    }

    let sin_angle = (1.0 - cos_angle * cos_angle).sqrt().max(EPS);

    // Vertical component: sightline height delta scaled by the fractional
    // position of the 2D crossing point along the sightline
    let frac = match lines_intersection_2d(client, sensor, wall_p1, wall_p2) {
        Some((ix, iy)) if sight_2d >= EPS => {
            ((ix - client.x).hypot(iy - client.y) / sight_2d).clamp(0.0, 1.0)
        }
        _ => 0.0,
    };
    let vertical = sight.z * frac;

    let length = (thickness_m / sin_angle).hypot(vertical * cell_size_m);
    if length.is_finite() {
        length
    } else {
        thickness_m
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
