//! Planar geometry primitives used by the geometry and relation checks.
//!
//! Rings may be given closed (first vertex repeated at the end) or open; every
//! function here treats both forms the same.

use std::collections::HashMap;

use geoval_model::{Coord, Geometry, LineString, Polygon};

/// Numerical noise floor for orientation and parameter tests.
pub const EPSILON: f64 = 1e-12;

/// Distance below which two points are the same location.
pub const SNAP: f64 = 1e-9;

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub min: Coord,
    pub max: Coord,
}

impl Rect {
    pub fn of(coords: impl IntoIterator<Item = Coord>) -> Option<Self> {
        let mut iter = coords.into_iter();
        let first = iter.next()?;
        let mut rect = Rect {
            min: first,
            max: first,
        };
        for c in iter {
            rect.min.x = rect.min.x.min(c.x);
            rect.min.y = rect.min.y.min(c.y);
            rect.max.x = rect.max.x.max(c.x);
            rect.max.y = rect.max.y.max(c.y);
        }
        Some(rect)
    }

    pub fn of_geometry(geometry: &Geometry) -> Option<Self> {
        Self::of(geometry.vertices())
    }

    #[must_use]
    pub fn expand(self, by: f64) -> Self {
        Rect {
            min: Coord::new(self.min.x - by, self.min.y - by),
            max: Coord::new(self.max.x + by, self.max.y + by),
        }
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.min.x <= other.max.x
            && other.min.x <= self.max.x
            && self.min.y <= other.max.y
            && other.min.y <= self.max.y
    }
}

/// Entries covering more cells than this are kept in a shared overflow list.
const MAX_CELLS_PER_ENTRY: i64 = 1024;

/// Uniform grid of bounding boxes for candidate lookup.
///
/// Entries are numbered in insertion order, so callers can keep the matching
/// records in a `Vec` and index them with the returned positions.
#[derive(Debug)]
pub struct GridIndex {
    cell: f64,
    cells: HashMap<(i64, i64), Vec<usize>>,
    oversized: Vec<usize>,
    len: usize,
}

impl GridIndex {
    pub fn new(cell: f64) -> Self {
        Self {
            cell: if cell.is_finite() && cell > EPSILON { cell } else { 1.0 },
            cells: HashMap::new(),
            oversized: Vec::new(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Register `bounds` and return its position.
    pub fn insert(&mut self, bounds: &Rect) -> usize {
        let entry = self.len;
        self.len += 1;
        match self.span(bounds) {
            Some((x0, y0, x1, y1)) => {
                for x in x0..=x1 {
                    for y in y0..=y1 {
                        self.cells.entry((x, y)).or_default().push(entry);
                    }
                }
            }
            None => self.oversized.push(entry),
        }
        entry
    }

    /// Positions of entries whose cells touch `window`, ascending.
    pub fn query(&self, window: &Rect) -> Vec<usize> {
        let Some((x0, y0, x1, y1)) = self.span(window) else {
            return (0..self.len).collect();
        };
        let mut found = self.oversized.clone();
        for x in x0..=x1 {
            for y in y0..=y1 {
                if let Some(entries) = self.cells.get(&(x, y)) {
                    found.extend_from_slice(entries);
                }
            }
        }
        found.sort_unstable();
        found.dedup();
        found
    }

    fn span(&self, rect: &Rect) -> Option<(i64, i64, i64, i64)> {
        let key = |value: f64| (value / self.cell).floor() as i64;
        let (x0, y0) = (key(rect.min.x), key(rect.min.y));
        let (x1, y1) = (key(rect.max.x), key(rect.max.y));
        let columns = x1.saturating_sub(x0).saturating_add(1);
        let rows = y1.saturating_sub(y0).saturating_add(1);
        (columns.saturating_mul(rows) <= MAX_CELLS_PER_ENTRY).then_some((x0, y0, x1, y1))
    }
}

fn sub(a: Coord, b: Coord) -> Coord {
    Coord::new(a.x - b.x, a.y - b.y)
}

fn dot(a: Coord, b: Coord) -> f64 {
    a.x * b.x + a.y * b.y
}

fn cross2(a: Coord, b: Coord) -> f64 {
    a.x * b.y - a.y * b.x
}

fn norm(a: Coord) -> f64 {
    a.x.hypot(a.y)
}

fn lerp(a: Coord, b: Coord, t: f64) -> Coord {
    Coord::new(a.x + (b.x - a.x) * t, a.y + (b.y - a.y) * t)
}

/// Orientation of `c` relative to the directed line `a -> b`; positive is left.
pub fn orient(a: Coord, b: Coord, c: Coord) -> f64 {
    cross2(sub(b, a), sub(c, a))
}

pub fn distance(a: Coord, b: Coord) -> f64 {
    norm(sub(a, b))
}

pub fn closest_point_on_segment(p: Coord, a: Coord, b: Coord) -> Coord {
    let ab = sub(b, a);
    let len2 = dot(ab, ab);
    if len2 < EPSILON {
        return a;
    }
    let t = (dot(sub(p, a), ab) / len2).clamp(0.0, 1.0);
    lerp(a, b, t)
}

pub fn point_segment_distance(p: Coord, a: Coord, b: Coord) -> f64 {
    distance(p, closest_point_on_segment(p, a, b))
}

/// How two segments meet.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SegmentIntersection {
    None,
    /// Single shared point at parameter `t` along the first segment and `u`
    /// along the second.
    Point { at: Coord, t: f64, u: f64 },
    /// Collinear overlap between two points of the first segment.
    Overlap(Coord, Coord),
}

pub fn intersect_segments(a: Coord, b: Coord, c: Coord, d: Coord) -> SegmentIntersection {
    let r = sub(b, a);
    let s = sub(d, c);
    let r_len = norm(r);
    let s_len = norm(s);

    if r_len < EPSILON || s_len < EPSILON {
        // Degenerate segments behave as points.
        let (p, seg_a, seg_b) = if r_len < EPSILON { (a, c, d) } else { (c, a, b) };
        if point_segment_distance(p, seg_a, seg_b) > SNAP {
            return SegmentIntersection::None;
        }
        let at = if r_len < EPSILON {
            a
        } else {
            closest_point_on_segment(c, a, b)
        };
        let t = if r_len < EPSILON { 0.0 } else { dot(sub(at, a), r) / (r_len * r_len) };
        let u = if s_len < EPSILON { 0.0 } else { dot(sub(at, c), s) / (s_len * s_len) };
        return SegmentIntersection::Point { at, t, u };
    }

    let qp = sub(c, a);
    let denom = cross2(r, s);
    if denom.abs() <= EPSILON * r_len * s_len {
        // Parallel: overlap only when collinear.
        if cross2(qp, r).abs() / r_len > SNAP {
            return SegmentIntersection::None;
        }
        let rr = r_len * r_len;
        let t0 = dot(qp, r) / rr;
        let t1 = dot(sub(d, a), r) / rr;
        let lo = t0.min(t1).max(0.0);
        let hi = t0.max(t1).min(1.0);
        let tolerance = SNAP / r_len;
        if hi < lo - tolerance {
            return SegmentIntersection::None;
        }
        if hi - lo <= tolerance {
            let at = lerp(a, b, lo);
            let u = dot(sub(at, c), s) / (s_len * s_len);
            return SegmentIntersection::Point { at, t: lo, u };
        }
        return SegmentIntersection::Overlap(lerp(a, b, lo), lerp(a, b, hi));
    }

    let t = cross2(qp, s) / denom;
    let u = cross2(qp, r) / denom;
    let t_slack = SNAP / r_len;
    let u_slack = SNAP / s_len;
    if t < -t_slack || t > 1.0 + t_slack || u < -u_slack || u > 1.0 + u_slack {
        return SegmentIntersection::None;
    }
    let t = t.clamp(0.0, 1.0);
    SegmentIntersection::Point {
        at: lerp(a, b, t),
        t,
        u: u.clamp(0.0, 1.0),
    }
}

/// Angle at `vertex` between the segments to `prev` and `next`, in degrees
/// within `[0, 180]`. `None` when either segment has zero length.
pub fn vertex_angle(prev: Coord, vertex: Coord, next: Coord) -> Option<f64> {
    let a = sub(prev, vertex);
    let b = sub(next, vertex);
    let (la, lb) = (norm(a), norm(b));
    if la < EPSILON || lb < EPSILON {
        return None;
    }
    Some((dot(a, b) / (la * lb)).clamp(-1.0, 1.0).acos().to_degrees())
}

/// Acute angle between the directions of two segments, in degrees within `[0, 90]`.
pub fn crossing_angle(a: Coord, b: Coord, c: Coord, d: Coord) -> f64 {
    let r = sub(b, a);
    let s = sub(d, c);
    let (lr, ls) = (norm(r), norm(s));
    if lr < EPSILON || ls < EPSILON {
        return 0.0;
    }
    (dot(r, s).abs() / (lr * ls)).clamp(0.0, 1.0).acos().to_degrees()
}

/// Ring vertices without the closing duplicate.
pub fn open_ring(ring: &[Coord]) -> &[Coord] {
    match ring {
        [first, .., last] if ring.len() > 1 && distance(*first, *last) <= SNAP => {
            &ring[..ring.len() - 1]
        }
        _ => ring,
    }
}

/// Whether the ring's first and last vertices coincide within `tolerance`.
pub fn is_closed(ring: &[Coord], tolerance: f64) -> bool {
    match (ring.first(), ring.last()) {
        (Some(first), Some(last)) => ring.len() > 1 && distance(*first, *last) <= tolerance,
        _ => false,
    }
}

/// Edges of a ring including the closing edge.
pub fn ring_edges(ring: &[Coord]) -> impl Iterator<Item = (Coord, Coord)> + '_ {
    let open = open_ring(ring);
    let n = open.len();
    let count = if n >= 2 { n } else { 0 };
    (0..count).map(move |i| (open[i], open[(i + 1) % n]))
}

/// Shoelace area; positive for counter-clockwise rings.
pub fn signed_ring_area(ring: &[Coord]) -> f64 {
    ring_edges(ring)
        .map(|(a, b)| a.x * b.y - b.x * a.y)
        .sum::<f64>()
        / 2.0
}

pub fn ring_area(ring: &[Coord]) -> f64 {
    signed_ring_area(ring).abs()
}

pub fn ring_length(ring: &[Coord]) -> f64 {
    ring_edges(ring).map(|(a, b)| distance(a, b)).sum()
}

/// Exterior area minus hole areas, never negative.
pub fn polygon_area(polygon: &Polygon) -> f64 {
    let holes: f64 = polygon.interiors.iter().map(|r| ring_area(r.coords())).sum();
    (ring_area(polygon.exterior.coords()) - holes).max(0.0)
}

pub fn polygon_perimeter(polygon: &Polygon) -> f64 {
    polygon.rings().map(|r| ring_length(r.coords())).sum()
}

pub fn line_length(line: &LineString) -> f64 {
    line.segments().map(|(a, b)| distance(a, b)).sum()
}

/// Even-odd containment test against a single ring.
pub fn point_in_ring(p: Coord, ring: &[Coord]) -> bool {
    let ring = open_ring(ring);
    let n = ring.len();
    if n < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (a, b) = (ring[i], ring[j]);
        if (a.y > p.y) != (b.y > p.y) && p.x < (b.x - a.x) * (p.y - a.y) / (b.y - a.y) + a.x {
            inside = !inside;
        }
        j = i;
    }
    inside
}

pub fn distance_to_ring(p: Coord, ring: &[Coord]) -> f64 {
    ring_edges(ring)
        .map(|(a, b)| point_segment_distance(p, a, b))
        .fold(f64::INFINITY, f64::min)
}

pub fn distance_to_polygon_boundary(p: Coord, polygon: &Polygon) -> f64 {
    polygon
        .rings()
        .map(|ring| distance_to_ring(p, ring.coords()))
        .fold(f64::INFINITY, f64::min)
}

/// Strictly inside the exterior and outside every hole.
pub fn point_in_polygon(p: Coord, polygon: &Polygon) -> bool {
    point_in_ring(p, polygon.exterior.coords())
        && !polygon
            .interiors
            .iter()
            .any(|hole| point_in_ring(p, hole.coords()))
}

/// Inside, or on the boundary within `tolerance`.
pub fn point_covered_by(p: Coord, polygon: &Polygon, tolerance: f64) -> bool {
    point_in_polygon(p, polygon) || distance_to_polygon_boundary(p, polygon) <= tolerance.max(SNAP)
}

/// Distance from `p` to the polygon; zero when covered.
pub fn distance_to_polygon(p: Coord, polygon: &Polygon) -> f64 {
    if point_in_polygon(p, polygon) {
        0.0
    } else {
        distance_to_polygon_boundary(p, polygon)
    }
}

pub fn distance_to_line(p: Coord, line: &LineString) -> f64 {
    match line.coords() {
        [] => f64::INFINITY,
        [only] => distance(p, *only),
        _ => line
            .segments()
            .map(|(a, b)| point_segment_distance(p, a, b))
            .fold(f64::INFINITY, f64::min),
    }
}

/// Convex hull (counter-clockwise, no repeated vertex) by monotone chain.
pub fn convex_hull(points: &[Coord]) -> Vec<Coord> {
    let mut pts: Vec<Coord> = points.to_vec();
    pts.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    pts.dedup_by(|a, b| distance(*a, *b) <= EPSILON);
    if pts.len() < 3 {
        return pts;
    }
    let mut hull: Vec<Coord> = Vec::with_capacity(pts.len() * 2);
    for &p in &pts {
        while hull.len() >= 2 && orient(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(p);
    }
    let lower_len = hull.len() + 1;
    for &p in pts.iter().rev().skip(1) {
        while hull.len() >= lower_len
            && orient(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0
        {
            hull.pop();
        }
        hull.push(p);
    }
    hull.pop();
    hull
}

/// Long and short side of the minimum-area bounding rectangle.
pub fn min_area_rect_sides(points: &[Coord]) -> (f64, f64) {
    let hull = convex_hull(points);
    match hull.len() {
        0 | 1 => return (0.0, 0.0),
        2 => return (distance(hull[0], hull[1]), 0.0),
        _ => {}
    }
    let mut best: Option<(f64, f64, f64)> = None;
    for i in 0..hull.len() {
        let a = hull[i];
        let b = hull[(i + 1) % hull.len()];
        let edge = sub(b, a);
        let len = norm(edge);
        if len < EPSILON {
            continue;
        }
        let u = Coord::new(edge.x / len, edge.y / len);
        let v = Coord::new(-u.y, u.x);
        let (mut min_u, mut max_u, mut min_v, mut max_v) = (
            f64::INFINITY,
            f64::NEG_INFINITY,
            f64::INFINITY,
            f64::NEG_INFINITY,
        );
        for &p in &hull {
            let d = sub(p, a);
            let (pu, pv) = (dot(d, u), dot(d, v));
            min_u = min_u.min(pu);
            max_u = max_u.max(pu);
            min_v = min_v.min(pv);
            max_v = max_v.max(pv);
        }
        let (w, h) = (max_u - min_u, max_v - min_v);
        let area = w * h;
        if best.is_none_or(|(best_area, _, _)| area < best_area) {
            best = Some((area, w.max(h), w.min(h)));
        }
    }
    best.map_or((0.0, 0.0), |(_, long, short)| (long, short))
}

fn point_in_triangle(p: Coord, a: Coord, b: Coord, c: Coord) -> bool {
    orient(a, b, p) >= 0.0 && orient(b, c, p) >= 0.0 && orient(c, a, p) >= 0.0
}

/// Ear-clipping triangulation of a simple ring. Triangles are counter-clockwise.
///
/// Self-intersecting input yields a partial triangulation rather than an error.
pub fn triangulate(ring: &[Coord]) -> Vec<[Coord; 3]> {
    let mut pts: Vec<Coord> = open_ring(ring).to_vec();
    pts.dedup_by(|a, b| distance(*a, *b) <= EPSILON);
    if pts.len() < 3 {
        return Vec::new();
    }
    if signed_ring_area(&pts) < 0.0 {
        pts.reverse();
    }

    let mut idx: Vec<usize> = (0..pts.len()).collect();
    let mut triangles = Vec::with_capacity(pts.len() - 2);
    while idx.len() > 3 {
        let m = idx.len();
        let mut ear = None;
        for i in 0..m {
            let (ia, ib, ic) = (idx[(i + m - 1) % m], idx[i], idx[(i + 1) % m]);
            let (a, b, c) = (pts[ia], pts[ib], pts[ic]);
            if orient(a, b, c) <= EPSILON {
                continue;
            }
            let blocked = idx.iter().any(|&k| {
                let p = pts[k];
                k != ia
                    && k != ib
                    && k != ic
                    && distance(p, a) > EPSILON
                    && distance(p, b) > EPSILON
                    && distance(p, c) > EPSILON
                    && point_in_triangle(p, a, b, c)
            });
            if !blocked {
                ear = Some((i, [a, b, c]));
                break;
            }
        }
        match ear {
            Some((i, triangle)) => {
                triangles.push(triangle);
                idx.remove(i);
            }
            None => {
                // No ear: drop a collinear vertex if there is one, otherwise give up.
                let flat = (0..m).find(|&i| {
                    let (ia, ib, ic) = (idx[(i + m - 1) % m], idx[i], idx[(i + 1) % m]);
                    orient(pts[ia], pts[ib], pts[ic]).abs() <= EPSILON
                });
                match flat {
                    Some(i) => {
                        idx.remove(i);
                    }
                    None => break,
                }
            }
        }
    }
    if idx.len() == 3 {
        let triangle = [pts[idx[0]], pts[idx[1]], pts[idx[2]]];
        if orient(triangle[0], triangle[1], triangle[2]) > EPSILON {
            triangles.push(triangle);
        }
    }
    triangles
}

fn line_intersection(p: Coord, q: Coord, a: Coord, b: Coord) -> Coord {
    let r = sub(q, p);
    let s = sub(b, a);
    let denom = cross2(r, s);
    if denom.abs() < EPSILON {
        return p;
    }
    lerp(p, q, cross2(sub(a, p), s) / denom)
}

/// Sutherland-Hodgman clip of `subject` by a convex counter-clockwise `clip`.
pub fn clip_convex(subject: &[Coord], clip: &[Coord]) -> Vec<Coord> {
    let mut output = subject.to_vec();
    for i in 0..clip.len() {
        if output.is_empty() {
            break;
        }
        let (a, b) = (clip[i], clip[(i + 1) % clip.len()]);
        let input = std::mem::take(&mut output);
        for j in 0..input.len() {
            let current = input[j];
            let previous = input[(j + input.len() - 1) % input.len()];
            let current_in = orient(a, b, current) >= 0.0;
            let previous_in = orient(a, b, previous) >= 0.0;
            if current_in {
                if !previous_in {
                    output.push(line_intersection(previous, current, a, b));
                }
                output.push(current);
            } else if previous_in {
                output.push(line_intersection(previous, current, a, b));
            }
        }
    }
    output
}

/// Area shared by two simple rings.
pub fn ring_intersection_area(a: &[Coord], b: &[Coord]) -> f64 {
    let (Some(ra), Some(rb)) = (Rect::of(a.iter().copied()), Rect::of(b.iter().copied())) else {
        return 0.0;
    };
    if !ra.intersects(&rb) {
        return 0.0;
    }
    let ta = triangulate(a);
    let tb = triangulate(b);
    let mut area = 0.0;
    for t1 in &ta {
        let r1 = Rect::of(t1.iter().copied());
        for t2 in &tb {
            let r2 = Rect::of(t2.iter().copied());
            if let (Some(r1), Some(r2)) = (r1, r2)
                && !r1.intersects(&r2)
            {
                continue;
            }
            area += ring_area(&clip_convex(t1, t2));
        }
    }
    area
}

/// Area shared by two polygons, holes included.
///
/// Holes are assumed to lie inside their exterior and not to overlap each
/// other, which makes inclusion-exclusion over the rings exact.
pub fn polygon_intersection_area(a: &Polygon, b: &Polygon) -> f64 {
    let ext_a = a.exterior.coords();
    let ext_b = b.exterior.coords();
    let mut area = ring_intersection_area(ext_a, ext_b);
    if area <= 0.0 {
        return 0.0;
    }
    for hole in &a.interiors {
        area -= ring_intersection_area(hole.coords(), ext_b);
    }
    for hole in &b.interiors {
        area -= ring_intersection_area(ext_a, hole.coords());
    }
    for ha in &a.interiors {
        for hb in &b.interiors {
            area += ring_intersection_area(ha.coords(), hb.coords());
        }
    }
    area.max(0.0)
}

/// Length of `line` lying outside every polygon in `polygons`.
pub fn length_outside(line: &LineString, polygons: &[&Polygon], tolerance: f64) -> f64 {
    let mut outside = 0.0;
    for (a, b) in line.segments() {
        let length = distance(a, b);
        if length < EPSILON {
            continue;
        }
        let mut cuts = vec![0.0, 1.0];
        for polygon in polygons {
            for ring in polygon.rings() {
                for (c, d) in ring_edges(ring.coords()) {
                    match intersect_segments(a, b, c, d) {
                        SegmentIntersection::Point { t, .. } => cuts.push(t),
                        SegmentIntersection::Overlap(p, q) => {
                            cuts.push(distance(a, p) / length);
                            cuts.push(distance(a, q) / length);
                        }
                        SegmentIntersection::None => {}
                    }
                }
            }
        }
        cuts.sort_by(f64::total_cmp);
        cuts.dedup_by(|x, y| (*x - *y).abs() <= EPSILON);
        for pair in cuts.windows(2) {
            let (t0, t1) = (pair[0], pair[1]);
            let mid = lerp(a, b, (t0 + t1) / 2.0);
            if !polygons.iter().any(|p| point_covered_by(mid, p, tolerance)) {
                outside += (t1 - t0) * length;
            }
        }
    }
    outside
}
