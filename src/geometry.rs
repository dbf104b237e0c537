use anyhow::Result;
use geo::{Closest, ClosestPoint, Coord, Distance, Haversine, LineString, Point};

/// Decodes an encoded route polyline (precision 5) into coordinates with
/// x = longitude, y = latitude.
pub fn decode_route(points: &str) -> Result<Vec<Coord>> {
    let line = polyline::decode_polyline(points, 5)
        .map_err(|e| anyhow::anyhow!("polyline decode failed: {}", e))?;
    Ok(line.0)
}

/// Fixed-stride downsampling to at most `max_points` coordinates. The first
/// point is always kept (index 0 matches every stride).
pub fn downsample(coords: &[Coord], max_points: usize) -> Vec<Coord> {
    if coords.len() <= max_points {
        return coords.to_vec();
    }
    let stride = coords.len().div_ceil(max_points);
    coords
        .iter()
        .enumerate()
        .filter(|(i, _)| i % stride == 0)
        .map(|(_, c)| *c)
        .collect()
}

/// True when `p` lies outside the bounding box of `coords` expanded by
/// `buffer_deg` degrees on every side. Cheap rejection before the full
/// nearest-point computation.
pub fn outside_buffered_bbox(coords: &[Coord], p: Coord, buffer_deg: f64) -> bool {
    let Some(first) = coords.first() else {
        return false;
    };
    let mut min_x = first.x;
    let mut max_x = first.x;
    let mut min_y = first.y;
    let mut max_y = first.y;
    for c in coords {
        min_x = min_x.min(c.x);
        max_x = max_x.max(c.x);
        min_y = min_y.min(c.y);
        max_y = max_y.max(c.y);
    }
    p.x < min_x - buffer_deg
        || p.x > max_x + buffer_deg
        || p.y < min_y - buffer_deg
        || p.y > max_y + buffer_deg
}

/// Haversine distance in meters.
pub fn distance_m(a: Point, b: Point) -> f64 {
    Haversine.distance(a, b)
}

/// Minimum Haversine distance (km) from `p` to the line. `None` when the
/// line is degenerate and no nearest point exists.
pub fn distance_to_line_km(line: &LineString, p: Point) -> Option<f64> {
    match line.closest_point(&p) {
        Closest::Intersection(nearest) | Closest::SinglePoint(nearest) => {
            Some(Haversine.distance(p, nearest) / 1000.0)
        }
        Closest::Indeterminate => None,
    }
}

/// Initial bearing from one coordinate to another, in degrees [0, 360).
pub fn bearing(from: Coord, to: Coord) -> f64 {
    let d_lon = (to.x - from.x).to_radians();
    let lat1 = from.y.to_radians();
    let lat2 = to.y.to_radians();

    let y = d_lon.sin() * lat2.cos();
    let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lon.cos();

    (y.atan2(x).to_degrees() + 360.0) % 360.0
}

/// Total planar length of the polyline, in coordinate units.
pub fn planar_length(coords: &[Coord]) -> f64 {
    coords
        .windows(2)
        .map(|w| planar_distance(w[0], w[1]))
        .sum()
}

fn planar_distance(a: Coord, b: Coord) -> f64 {
    ((b.x - a.x).powi(2) + (b.y - a.y).powi(2)).sqrt()
}

/// Projects `p` onto the segment `a`-`b`. Returns (distance along the
/// segment to the foot point, planar distance from `p` to it).
fn project_onto_segment(a: Coord, b: Coord, p: Coord) -> (f64, f64) {
    let seg = Coord {
        x: b.x - a.x,
        y: b.y - a.y,
    };
    let len_sq = seg.x * seg.x + seg.y * seg.y;
    if len_sq == 0.0 {
        return (0.0, planar_distance(a, p));
    }
    let t = (((p.x - a.x) * seg.x + (p.y - a.y) * seg.y) / len_sq).clamp(0.0, 1.0);
    let foot = Coord {
        x: a.x + t * seg.x,
        y: a.y + t * seg.y,
    };
    (t * len_sq.sqrt(), planar_distance(foot, p))
}

/// Planar projection of `p` onto the polyline: distance along the line to
/// the nearest point, in coordinate units.
pub fn project(coords: &[Coord], p: Coord) -> f64 {
    let mut best_along = 0.0;
    let mut best_dist = f64::INFINITY;
    let mut walked = 0.0;
    for w in coords.windows(2) {
        let (along, dist) = project_onto_segment(w[0], w[1], p);
        if dist < best_dist {
            best_dist = dist;
            best_along = walked + along;
        }
        walked += planar_distance(w[0], w[1]);
    }
    best_along
}

/// Point at `dist` along the polyline (planar), clamped to the endpoints.
pub fn interpolate(coords: &[Coord], dist: f64) -> Coord {
    let Some(&first) = coords.first() else {
        return Coord { x: 0.0, y: 0.0 };
    };
    if dist <= 0.0 {
        return first;
    }
    let mut walked = 0.0;
    for w in coords.windows(2) {
        let seg_len = planar_distance(w[0], w[1]);
        if walked + seg_len >= dist && seg_len > 0.0 {
            let t = (dist - walked) / seg_len;
            return Coord {
                x: w[0].x + t * (w[1].x - w[0].x),
                y: w[0].y + t * (w[1].y - w[0].y),
            };
        }
        walked += seg_len;
    }
    *coords.last().unwrap_or(&first)
}

fn heading_diff(a: f64, b: f64) -> f64 {
    let diff = (a - b).abs();
    if diff > 180.0 { 360.0 - diff } else { diff }
}

/// Projects a vehicle onto the route, preferring segments whose bearing
/// aligns with the vehicle heading (within 90 degrees). Plain projection
/// misplaces vehicles where the route loops back on itself or crosses an
/// earlier section; the heading disambiguates which pass the vehicle is on.
pub fn project_with_heading(coords: &[Coord], p: Coord, heading: Option<f64>) -> f64 {
    let default_proj = project(coords, p);

    let Some(heading) = heading else {
        return default_proj;
    };

    // Sample a tiny step ahead of the default projection to get the local
    // route bearing there.
    let delta = 1e-5;
    let total = planar_length(coords);
    let route_bearing = if default_proj + delta > total {
        let p_curr = interpolate(coords, default_proj - delta);
        let p_next = interpolate(coords, default_proj);
        bearing(p_next, p_curr)
    } else {
        let p_curr = interpolate(coords, default_proj);
        let p_next = interpolate(coords, default_proj + delta);
        bearing(p_curr, p_next)
    };

    if heading_diff(heading, route_bearing) <= 90.0 {
        return default_proj;
    }

    // Scan for the nearest segment that does align with the heading.
    let mut best_along = default_proj;
    let mut min_dist = f64::INFINITY;
    let mut found_better = false;
    let mut walked = 0.0;

    for w in coords.windows(2) {
        let seg_len = planar_distance(w[0], w[1]);
        if seg_len == 0.0 {
            continue;
        }
        let seg_bearing = bearing(w[0], w[1]);
        if heading_diff(heading, seg_bearing) <= 90.0 {
            let (along, dist) = project_onto_segment(w[0], w[1], p);
            if dist < min_dist {
                min_dist = dist;
                best_along = walked + along;
                found_better = true;
            }
        }
        walked += seg_len;
    }

    if found_better { best_along } else { default_proj }
}
