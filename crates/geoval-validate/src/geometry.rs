//! Stage 3: geometry checks.
//!
//! Per-feature checks run while streaming the layer. Pairwise checks
//! (duplicate, overlap) compare each feature with the ones already seen, and
//! the network checks (undershoot, overshoot) run once the whole line layer
//! has been read. Every check is gated by the layer's geometry family.

use std::f64::consts::PI;

use tracing::{debug, info_span};

use geoval_model::{
    Coord, Feature, Geometry, GeometryType, HoleDefect, Issue, LineString, OverlapMeasure, Polygon,
    StageKind,
};
use geoval_rules::{Criteria, GeometryCheck, GeometryRule, names};

use crate::engine::{StageContext, StageInput, StageRunner, feature_units, resolve_layer};
use crate::error::Result;
use crate::geom::{
    self, EPSILON, GridIndex, Rect, SegmentIntersection, crossing_angle, distance,
    intersect_segments, open_ring, ring_edges, vertex_angle,
};

pub struct GeometryStage;

impl StageRunner for GeometryStage {
    fn kind(&self) -> StageKind {
        StageKind::Geometry
    }

    fn estimate_units(&self, input: &StageInput<'_>) -> u64 {
        feature_units(input, &input.selected_items(StageKind::Geometry))
    }

    fn run(&self, input: &StageInput<'_>, ctx: &mut dyn StageContext) -> Result<()> {
        let layers = input.provider.list_layers()?;
        let total = self.estimate_units(input);
        let mut processed = 0u64;

        for rule in input
            .rules
            .geometries
            .iter()
            .filter(|rule| input.scope.includes(&rule.table_id))
        {
            ctx.checkpoint()?;
            let Some(layer) = resolve_layer(&layers, &rule.table_id) else {
                debug!(table = %rule.table_id, "geometry rules skipped, table absent");
                continue;
            };
            let _span = info_span!("geometry_table", table = %rule.table_id).entered();
            let thresholds = Thresholds::resolve(rule, &input.rules.criteria)?;
            let declared = rule.geometry_type.or(layer.geometry_type);
            let mut scan = LayerScan::new(&rule.table_id, rule, thresholds);

            for feature in input.provider.iterate_features(&layer.id)? {
                ctx.checkpoint()?;
                let feature = feature?;
                for issue in scan.add(feature, declared) {
                    ctx.push_finding(issue);
                }
                processed += 1;
                ctx.report_progress(processed, total);
            }
            for issue in scan.finish(ctx)? {
                ctx.push_finding(issue);
            }
        }
        Ok(())
    }
}

/// Resolved thresholds for the checks enabled on one table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Thresholds {
    pub duplicate: Option<f64>,
    pub overlap: Option<f64>,
    pub self_intersection: Option<f64>,
    /// Area, shape index and elongation thresholds.
    pub sliver: Option<(f64, f64, f64)>,
    pub short_segment: Option<f64>,
    pub small_polygon: Option<f64>,
    pub invalid_hole: bool,
    pub minimum_vertices: bool,
    pub spike: Option<f64>,
    pub self_overlap: bool,
    pub undershoot: Option<f64>,
    pub overshoot: Option<f64>,
    pub ring_closure: f64,
}

impl Thresholds {
    pub fn resolve(rule: &GeometryRule, criteria: &Criteria) -> Result<Self> {
        let need = |check: GeometryCheck, name: &str| -> Result<Option<f64>> {
            if rule.is_enabled(check) {
                Ok(Some(
                    criteria.require(name, &format!("{check} on {}", rule.table_id))?,
                ))
            } else {
                Ok(None)
            }
        };
        let sliver = if rule.is_enabled(GeometryCheck::Sliver) {
            let by = format!("{} on {}", GeometryCheck::Sliver, rule.table_id);
            Some((
                criteria.require(names::SLIVER_AREA, &by)?,
                criteria.require(names::SLIVER_SHAPE_INDEX, &by)?,
                criteria.require(names::SLIVER_ELONGATION, &by)?,
            ))
        } else {
            None
        };
        Ok(Self {
            duplicate: need(GeometryCheck::Duplicate, names::DUPLICATE_TOLERANCE)?,
            overlap: need(GeometryCheck::Overlap, names::OVERLAP_TOLERANCE)?,
            self_intersection: need(
                GeometryCheck::SelfIntersection,
                names::SELF_INTERSECTION_ANGLE,
            )?,
            sliver,
            short_segment: need(GeometryCheck::ShortSegment, names::MIN_LINE_LENGTH)?,
            small_polygon: need(GeometryCheck::SmallPolygon, names::MIN_POLYGON_AREA)?,
            invalid_hole: rule.is_enabled(GeometryCheck::InvalidHole),
            minimum_vertices: rule.is_enabled(GeometryCheck::MinimumVertices),
            spike: need(GeometryCheck::Spike, names::SPIKE_ANGLE)?,
            self_overlap: rule.is_enabled(GeometryCheck::SelfOverlap),
            undershoot: need(GeometryCheck::Undershoot, names::NETWORK_SEARCH_DISTANCE)?,
            overshoot: need(GeometryCheck::Overshoot, names::NETWORK_SEARCH_DISTANCE)?,
            ring_closure: criteria.ring_closure_tolerance(),
        })
    }
}

struct Seen {
    id: String,
    geometry: Geometry,
    bounds: Rect,
}

/// Streaming state for one layer.
struct LayerScan<'a> {
    table: &'a str,
    rule: &'a GeometryRule,
    thresholds: Thresholds,
    declared: Option<GeometryType>,
    seen: Vec<Seen>,
    index: Option<GridIndex>,
}

impl<'a> LayerScan<'a> {
    fn new(table: &'a str, rule: &'a GeometryRule, thresholds: Thresholds) -> Self {
        Self {
            table,
            rule,
            thresholds,
            declared: None,
            seen: Vec::new(),
            index: None,
        }
    }

    /// Seen features whose bounds intersect `window`, in reading order.
    fn candidates(&self, window: Rect) -> impl Iterator<Item = &Seen> {
        self.index
            .iter()
            .flat_map(move |index| index.query(&window))
            .map(move |position| &self.seen[position])
            .filter(move |seen| seen.bounds.intersects(&window))
    }

    fn enabled(&self, check: GeometryCheck, family: GeometryType) -> bool {
        self.rule.is_enabled(check) && check.applies_to(family)
    }

    fn keeps_history(&self, family: GeometryType) -> bool {
        [
            GeometryCheck::Duplicate,
            GeometryCheck::Overlap,
            GeometryCheck::Undershoot,
            GeometryCheck::Overshoot,
        ]
        .into_iter()
        .any(|check| self.enabled(check, family))
    }

    fn add(&mut self, feature: Feature, declared: Option<GeometryType>) -> Vec<Issue> {
        let Some(geometry) = feature.geometry else {
            return vec![Issue::MissingGeometry {
                table: self.table.to_string(),
                feature: feature.id,
            }];
        };
        let family = declared.unwrap_or_else(|| geometry.geometry_type());
        self.declared = Some(family);
        let mut issues = check_feature(
            self.table,
            &feature.id,
            &geometry,
            family,
            self.rule,
            &self.thresholds,
        );

        let Some(bounds) = Rect::of_geometry(&geometry) else {
            return issues;
        };
        if self.enabled(GeometryCheck::Duplicate, family)
            && let Some(tolerance) = self.thresholds.duplicate
            && let Some(original) = self
                .candidates(bounds.expand(tolerance))
                .find(|other| within_distance(&other.geometry, &geometry, tolerance))
        {
            issues.push(Issue::DuplicateGeometry {
                table: self.table.to_string(),
                feature: feature.id.clone(),
                duplicate_of: original.id.clone(),
                tolerance,
            });
        }
        if self.enabled(GeometryCheck::Overlap, family)
            && let Some(tolerance) = self.thresholds.overlap
        {
            for other in self.candidates(bounds) {
                if let Some((measure, amount)) = overlap_amount(&other.geometry, &geometry, family)
                    && amount > tolerance
                {
                    issues.push(Issue::Overlap {
                        table: self.table.to_string(),
                        feature: feature.id.clone(),
                        other: other.id.clone(),
                        measure,
                        amount,
                        tolerance,
                    });
                }
            }
        }
        if self.keeps_history(family) {
            let cell = cell_size(&bounds, &self.thresholds);
            self.index
                .get_or_insert_with(|| GridIndex::new(cell))
                .insert(&bounds);
            self.seen.push(Seen {
                id: feature.id,
                geometry,
                bounds,
            });
        }
        issues
    }

    fn finish(self, ctx: &mut dyn StageContext) -> Result<Vec<Issue>> {
        let Some(family) = self.declared else {
            return Ok(Vec::new());
        };
        let undershoot = self
            .thresholds
            .undershoot
            .filter(|_| self.enabled(GeometryCheck::Undershoot, family));
        let overshoot = self
            .thresholds
            .overshoot
            .filter(|_| self.enabled(GeometryCheck::Overshoot, family));
        let Some(index) = &self.index else {
            return Ok(Vec::new());
        };
        if undershoot.is_none() && overshoot.is_none() {
            return Ok(Vec::new());
        }
        network_checks(
            self.table,
            &self.seen,
            index,
            undershoot,
            overshoot,
            self.thresholds.ring_closure,
            ctx,
        )
    }
}

/// Grid cell sized from the first feature and the widest search reach.
fn cell_size(first: &Rect, thresholds: &Thresholds) -> f64 {
    let extent = (first.max.x - first.min.x).max(first.max.y - first.min.y);
    let reach = [thresholds.duplicate, thresholds.undershoot, thresholds.overshoot]
        .into_iter()
        .flatten()
        .fold(0.0, f64::max);
    4.0 * extent.max(reach)
}

/// A vertex sequence checked as one unit: a line or a polygon ring.
struct Part<'g> {
    coords: &'g [Coord],
    ring: bool,
}

fn parts(geometry: &Geometry) -> Vec<Part<'_>> {
    let mut parts: Vec<Part<'_>> = geometry
        .lines()
        .into_iter()
        .map(|line| Part {
            coords: line.coords(),
            ring: false,
        })
        .collect();
    for polygon in geometry.polygons() {
        parts.extend(polygon.rings().map(|ring| Part {
            coords: ring.coords(),
            ring: true,
        }));
    }
    parts
}

fn segments_of(part: &Part<'_>) -> Vec<(Coord, Coord)> {
    if part.ring {
        ring_edges(part.coords).collect()
    } else {
        part.coords.windows(2).map(|w| (w[0], w[1])).collect()
    }
}

fn dedup_consecutive(coords: &[Coord]) -> Vec<Coord> {
    let mut out: Vec<Coord> = coords.to_vec();
    out.dedup_by(|a, b| distance(*a, *b) <= EPSILON);
    out
}

/// Checks that look at one feature in isolation.
pub fn check_feature(
    table: &str,
    feature: &str,
    geometry: &Geometry,
    family: GeometryType,
    rule: &GeometryRule,
    thresholds: &Thresholds,
) -> Vec<Issue> {
    let enabled = |check: GeometryCheck| rule.is_enabled(check) && check.applies_to(family);
    let mut issues = Vec::new();
    let all_parts = parts(geometry);

    if enabled(GeometryCheck::MinimumVertices) {
        for part in &all_parts {
            let minimum = if part.ring { 4 } else { 2 };
            if part.coords.len() < minimum {
                issues.push(Issue::TooFewVertices {
                    table: table.to_string(),
                    feature: feature.to_string(),
                    count: part.coords.len(),
                    minimum,
                });
            }
        }
    }

    if enabled(GeometryCheck::SelfIntersection)
        && let Some(tolerance) = thresholds.self_intersection
    {
        for part in &all_parts {
            if let Some((at, angle)) = self_crossing(part, tolerance) {
                issues.push(Issue::SelfIntersection {
                    table: table.to_string(),
                    feature: feature.to_string(),
                    at,
                    angle,
                    tolerance,
                });
            }
        }
    }

    if enabled(GeometryCheck::SelfOverlap) {
        let length: f64 = all_parts
            .iter()
            .map(|part| self_overlap_length(part, thresholds.ring_closure))
            .sum();
        if length > 0.0 {
            issues.push(Issue::SelfOverlap {
                table: table.to_string(),
                feature: feature.to_string(),
                length,
            });
        }
    }

    if enabled(GeometryCheck::Spike)
        && let Some(threshold) = thresholds.spike
    {
        for part in &all_parts {
            for (at, angle) in spikes(part, threshold) {
                issues.push(Issue::Spike {
                    table: table.to_string(),
                    feature: feature.to_string(),
                    at,
                    angle,
                    threshold,
                });
            }
        }
    }

    if enabled(GeometryCheck::ShortSegment)
        && let Some(minimum) = thresholds.short_segment
    {
        for line in geometry.lines() {
            for (a, b) in line.segments() {
                let length = distance(a, b);
                if length < minimum {
                    issues.push(Issue::ShortSegment {
                        table: table.to_string(),
                        feature: feature.to_string(),
                        at: a,
                        length,
                        minimum,
                    });
                }
            }
        }
    }

    for polygon in geometry.polygons() {
        if enabled(GeometryCheck::SmallPolygon)
            && let Some(minimum) = thresholds.small_polygon
        {
            let area = geom::polygon_area(polygon);
            if area < minimum {
                issues.push(Issue::SmallPolygon {
                    table: table.to_string(),
                    feature: feature.to_string(),
                    area,
                    minimum,
                });
            }
        }
        if enabled(GeometryCheck::Sliver)
            && let Some((area_threshold, shape_index_threshold, elongation_threshold)) =
                thresholds.sliver
        {
            let shape = SliverShape::of(polygon);
            if shape.area < area_threshold
                && (shape.shape_index < shape_index_threshold
                    || shape.elongation > elongation_threshold)
            {
                issues.push(Issue::SliverPolygon {
                    table: table.to_string(),
                    feature: feature.to_string(),
                    area: shape.area,
                    shape_index: shape.shape_index,
                    elongation: shape.elongation,
                    area_threshold,
                    shape_index_threshold,
                    elongation_threshold,
                });
            }
        }
        if enabled(GeometryCheck::InvalidHole) {
            for (index, hole) in polygon.interiors.iter().enumerate() {
                if let Some(defect) = hole_defect(&polygon.exterior, hole, thresholds.ring_closure)
                {
                    issues.push(Issue::InvalidHole {
                        table: table.to_string(),
                        feature: feature.to_string(),
                        ring: index + 1,
                        defect,
                    });
                }
            }
        }
    }
    issues
}

/// Measured shape of a polygon for the sliver test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SliverShape {
    pub area: f64,
    /// `4π·A / P²`: 1 for a circle, towards 0 for thin shapes.
    pub shape_index: f64,
    /// Long over short side of the minimum-area bounding rectangle.
    pub elongation: f64,
}

impl SliverShape {
    pub fn of(polygon: &Polygon) -> Self {
        let area = geom::polygon_area(polygon);
        let perimeter = geom::polygon_perimeter(polygon);
        let shape_index = if perimeter > EPSILON {
            4.0 * PI * area / (perimeter * perimeter)
        } else {
            0.0
        };
        let (long, short) = geom::min_area_rect_sides(polygon.exterior.coords());
        let elongation = if short > EPSILON {
            long / short
        } else {
            f64::MAX
        };
        Self {
            area,
            shape_index,
            elongation,
        }
    }
}

fn adjacent(i: usize, j: usize, count: usize, closed: bool) -> bool {
    j == i + 1 || (closed && i == 0 && j + 1 == count)
}

/// First crossing of non-adjacent segments whose angle exceeds `tolerance`.
fn self_crossing(part: &Part<'_>, tolerance: f64) -> Option<(Coord, f64)> {
    let coords = dedup_consecutive(part.coords);
    let segments = segments_of(&Part {
        coords: &coords,
        ring: part.ring,
    });
    let closed = part.ring || geom::is_closed(&coords, geom::SNAP);
    for i in 0..segments.len() {
        for j in (i + 1)..segments.len() {
            if adjacent(i, j, segments.len(), closed) {
                continue;
            }
            let (a, b) = segments[i];
            let (c, d) = segments[j];
            if let SegmentIntersection::Point { at, .. } = intersect_segments(a, b, c, d) {
                let angle = crossing_angle(a, b, c, d);
                if angle > tolerance {
                    return Some((at, angle));
                }
            }
        }
    }
    None
}

/// Total length over which a part retraces itself.
fn self_overlap_length(part: &Part<'_>, tolerance: f64) -> f64 {
    let coords = dedup_consecutive(part.coords);
    let segments = segments_of(&Part {
        coords: &coords,
        ring: part.ring,
    });
    let mut length = 0.0;
    for i in 0..segments.len() {
        for j in (i + 1)..segments.len() {
            let (a, b) = segments[i];
            let (c, d) = segments[j];
            if let SegmentIntersection::Overlap(p, q) = intersect_segments(a, b, c, d) {
                let overlap = distance(p, q);
                if overlap > tolerance {
                    length += overlap;
                }
            }
        }
    }
    length
}

fn spikes(part: &Part<'_>, threshold: f64) -> Vec<(Coord, f64)> {
    let coords = if part.ring {
        dedup_consecutive(open_ring(part.coords))
    } else {
        dedup_consecutive(part.coords)
    };
    let n = coords.len();
    let mut found = Vec::new();
    if n < 3 {
        return found;
    }
    let (start, end) = if part.ring { (0, n) } else { (1, n - 1) };
    for i in start..end {
        let prev = coords[(i + n - 1) % n];
        let next = coords[(i + 1) % n];
        if let Some(angle) = vertex_angle(prev, coords[i], next)
            && angle < threshold
        {
            found.push((coords[i], angle));
        }
    }
    found
}

fn hole_defect(exterior: &LineString, hole: &LineString, tolerance: f64) -> Option<HoleDefect> {
    if !geom::is_closed(hole.coords(), tolerance) {
        return Some(HoleDefect::NotClosed);
    }
    let ext = exterior.coords();
    let vertices = open_ring(hole.coords());
    let mut inside = false;
    let mut outside = false;
    let mut on_boundary = false;
    for &v in vertices {
        if geom::distance_to_ring(v, ext) <= tolerance.max(geom::SNAP) {
            on_boundary = true;
        } else if geom::point_in_ring(v, ext) {
            inside = true;
        } else {
            outside = true;
        }
    }
    match (inside, outside) {
        (true, true) => return Some(HoleDefect::CrossesExterior),
        (false, true) => return Some(HoleDefect::OutsideExterior),
        _ => {}
    }
    let mut touches = on_boundary;
    for (a, b) in ring_edges(hole.coords()) {
        for (c, d) in ring_edges(ext) {
            match intersect_segments(a, b, c, d) {
                SegmentIntersection::Point { t, u, .. } => {
                    let interior = |x: f64| x > EPSILON && x < 1.0 - EPSILON;
                    if interior(t) && interior(u) && !on_boundary {
                        return Some(HoleDefect::CrossesExterior);
                    }
                    touches = true;
                }
                SegmentIntersection::Overlap(..) => touches = true,
                SegmentIntersection::None => {}
            }
        }
    }
    touches.then_some(HoleDefect::TouchesExterior)
}

/// Every vertex of each geometry lies within `tolerance` of the other one.
fn within_distance(a: &Geometry, b: &Geometry, tolerance: f64) -> bool {
    if a.geometry_type() != b.geometry_type() {
        return false;
    }
    let covered = |from: &Geometry, to: &Geometry| {
        let vertices = from.vertices();
        !vertices.is_empty()
            && vertices
                .into_iter()
                .all(|p| distance_to_geometry(p, to) <= tolerance)
    };
    covered(a, b) && covered(b, a)
}

/// Distance from `p` to the nearest point, line or polygon ring of `geometry`.
fn distance_to_geometry(p: Coord, geometry: &Geometry) -> f64 {
    let points = geometry.points().into_iter().map(|q| distance(p, q));
    let lines = geometry
        .lines()
        .into_iter()
        .map(|line| geom::distance_to_line(p, line));
    let rings = geometry
        .polygons()
        .into_iter()
        .map(|polygon| geom::distance_to_polygon_boundary(p, polygon));
    points.chain(lines).chain(rings).fold(f64::INFINITY, f64::min)
}

fn overlap_amount(
    a: &Geometry,
    b: &Geometry,
    family: GeometryType,
) -> Option<(OverlapMeasure, f64)> {
    match family {
        GeometryType::Polygon => {
            let mut area = 0.0;
            for pa in a.polygons() {
                for pb in b.polygons() {
                    area += geom::polygon_intersection_area(pa, pb);
                }
            }
            Some((OverlapMeasure::Area, area))
        }
        GeometryType::Line => {
            let mut length = 0.0;
            for la in a.lines() {
                for lb in b.lines() {
                    for (p, q) in la.segments() {
                        for (r, s) in lb.segments() {
                            if let SegmentIntersection::Overlap(x, y) = intersect_segments(p, q, r, s)
                            {
                                length += distance(x, y);
                            }
                        }
                    }
                }
            }
            Some((OverlapMeasure::Length, length))
        }
        GeometryType::Point => None,
    }
}

struct Endpoint {
    at: Coord,
    /// Neighbouring vertex along the line, defining the end segment.
    inner: Coord,
}

fn endpoints(line: &LineString) -> Vec<Endpoint> {
    let coords = dedup_consecutive(line.coords());
    if coords.len() < 2 || geom::is_closed(&coords, geom::SNAP) {
        return Vec::new();
    }
    vec![
        Endpoint {
            at: coords[0],
            inner: coords[1],
        },
        Endpoint {
            at: coords[coords.len() - 1],
            inner: coords[coords.len() - 2],
        },
    ]
}

fn network_checks(
    table: &str,
    lines: &[Seen],
    index: &GridIndex,
    undershoot: Option<f64>,
    overshoot: Option<f64>,
    snap: f64,
    ctx: &mut dyn StageContext,
) -> Result<Vec<Issue>> {
    let search = undershoot.unwrap_or(0.0).max(overshoot.unwrap_or(0.0));
    let mut issues = Vec::new();

    for (position, entry) in lines.iter().enumerate() {
        ctx.checkpoint()?;
        for line in entry.geometry.lines() {
            for end in endpoints(line) {
                let window = Rect {
                    min: end.at,
                    max: end.at,
                }
                .expand(search + snap);
                let neighbours = nearby(lines, index, position, window);

                let connected = neighbours.iter().any(|other| {
                    other
                        .geometry
                        .lines()
                        .iter()
                        .any(|l| geom::distance_to_line(end.at, l) <= snap.max(geom::SNAP))
                });
                if connected {
                    continue;
                }

                if let Some((other, at, beyond)) = nearest_crossing(&end, &neighbours, snap) {
                    if let Some(search_distance) = overshoot
                        && beyond <= search_distance
                    {
                        issues.push(Issue::Overshoot {
                            table: table.to_string(),
                            feature: entry.id.clone(),
                            other: other.to_string(),
                            at,
                            overshoot: beyond,
                            search_distance,
                        });
                    }
                    continue;
                }

                if let Some(search_distance) = undershoot
                    && let Some((other, gap)) = nearest_line(end.at, &neighbours)
                    && gap <= search_distance
                {
                    issues.push(Issue::Undershoot {
                        table: table.to_string(),
                        feature: entry.id.clone(),
                        other: other.to_string(),
                        at: end.at,
                        distance: gap,
                        search_distance,
                    });
                }
            }
        }
    }
    Ok(issues)
}

/// Other lines of the layer whose bounds intersect `window`.
fn nearby<'s>(
    lines: &'s [Seen],
    index: &GridIndex,
    position: usize,
    window: Rect,
) -> Vec<&'s Seen> {
    index
        .query(&window)
        .into_iter()
        .filter(|&other| other != position)
        .map(|other| &lines[other])
        .filter(|seen| seen.bounds.intersects(&window))
        .collect()
}

/// Crossing of the end segment with another line closest to the endpoint:
/// `(other id, crossing point, distance from crossing to endpoint)`.
fn nearest_crossing<'s>(
    end: &Endpoint,
    neighbours: &[&'s Seen],
    snap: f64,
) -> Option<(&'s str, Coord, f64)> {
    let mut best: Option<(&str, Coord, f64)> = None;
    for &other in neighbours {
        for line in other.geometry.lines() {
            for (c, d) in line.segments() {
                if let SegmentIntersection::Point { at, .. } = intersect_segments(end.at, end.inner, c, d)
                {
                    let beyond = distance(end.at, at);
                    if beyond > snap && best.is_none_or(|(_, _, current)| beyond < current) {
                        best = Some((other.id.as_str(), at, beyond));
                    }
                }
            }
        }
    }
    best
}

fn nearest_line<'s>(p: Coord, neighbours: &[&'s Seen]) -> Option<(&'s str, f64)> {
    neighbours
        .iter()
        .copied()
        .flat_map(|other: &'s Seen| {
            other
                .geometry
                .lines()
                .into_iter()
                .map(move |line| (other.id.as_str(), geom::distance_to_line(p, line)))
        })
        .min_by(|a, b| a.1.total_cmp(&b.1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn rule(checks: &[GeometryCheck]) -> GeometryRule {
        GeometryRule {
            table_id: "t".into(),
            geometry_type: None,
            checks: checks.iter().copied().collect::<BTreeSet<_>>(),
        }
    }

    fn polygon(coords: &[(f64, f64)]) -> Geometry {
        Geometry::Polygon(Polygon::new(coords.iter().copied().collect(), vec![]))
    }

    fn line(coords: &[(f64, f64)]) -> Geometry {
        Geometry::LineString(coords.iter().copied().collect())
    }

    #[test]
    fn bow_tie_self_intersects() {
        let rule = rule(&[GeometryCheck::SelfIntersection]);
        let thresholds = Thresholds {
            self_intersection: Some(5.0),
            ..Thresholds::default()
        };
        let bow_tie = polygon(&[(0.0, 0.0), (2.0, 2.0), (2.0, 0.0), (0.0, 2.0), (0.0, 0.0)]);
        let issues = check_feature("t", "1", &bow_tie, GeometryType::Polygon, &rule, &thresholds);
        assert!(matches!(issues.as_slice(), [Issue::SelfIntersection { angle, .. }] if *angle > 80.0));

        let square = polygon(&[(0.0, 0.0), (2.0, 0.0), (2.0, 2.0), (0.0, 2.0), (0.0, 0.0)]);
        assert!(check_feature("t", "2", &square, GeometryType::Polygon, &rule, &thresholds).is_empty());
    }

    #[test]
    fn spike_vertex_is_reported() {
        let rule = rule(&[GeometryCheck::Spike]);
        let thresholds = Thresholds {
            spike: Some(10.0),
            ..Thresholds::default()
        };
        let spiky = line(&[(0.0, 0.0), (10.0, 0.0), (0.0, 0.5)]);
        let issues = check_feature("t", "1", &spiky, GeometryType::Line, &rule, &thresholds);
        assert_eq!(issues.len(), 1);
        assert!(matches!(issues[0], Issue::Spike { at, .. } if at == Coord::new(10.0, 0.0)));
    }

    #[test]
    fn thin_polygon_is_a_sliver() {
        let thin = Polygon::new(
            [(0.0, 0.0), (10.0, 0.0), (10.0, 0.1), (0.0, 0.1), (0.0, 0.0)]
                .into_iter()
                .collect(),
            vec![],
        );
        let shape = SliverShape::of(&thin);
        assert!((shape.area - 1.0).abs() < 1e-9);
        assert!((shape.elongation - 100.0).abs() < 1e-6);
        assert!(shape.shape_index < 0.2);
    }

    #[test]
    fn hole_outside_exterior_is_invalid() {
        let exterior: LineString = [(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 4.0), (0.0, 0.0)]
            .into_iter()
            .collect();
        let inside: LineString = [(1.0, 1.0), (2.0, 1.0), (2.0, 2.0), (1.0, 1.0)]
            .into_iter()
            .collect();
        let outside: LineString = [(5.0, 5.0), (6.0, 5.0), (6.0, 6.0), (5.0, 5.0)]
            .into_iter()
            .collect();
        let open: LineString = [(1.0, 1.0), (2.0, 1.0), (2.0, 2.0)].into_iter().collect();
        let straddling: LineString = [(3.0, 1.0), (5.0, 1.0), (5.0, 2.0), (3.0, 1.0)]
            .into_iter()
            .collect();
        assert_eq!(hole_defect(&exterior, &inside, 1e-8), None);
        assert_eq!(
            hole_defect(&exterior, &outside, 1e-8),
            Some(HoleDefect::OutsideExterior)
        );
        assert_eq!(hole_defect(&exterior, &open, 1e-8), Some(HoleDefect::NotClosed));
        assert_eq!(
            hole_defect(&exterior, &straddling, 1e-8),
            Some(HoleDefect::CrossesExterior)
        );
    }

    #[test]
    fn retraced_line_self_overlaps() {
        let rule = rule(&[GeometryCheck::SelfOverlap]);
        let thresholds = Thresholds {
            ring_closure: 1e-8,
            ..Thresholds::default()
        };
        let retrace = line(&[(0.0, 0.0), (4.0, 0.0), (1.0, 0.0)]);
        let issues = check_feature("t", "1", &retrace, GeometryType::Line, &rule, &thresholds);
        assert!(matches!(issues.as_slice(), [Issue::SelfOverlap { length, .. }] if (*length - 3.0).abs() < 1e-9));
    }

    #[test]
    fn repeated_vertex_is_not_a_crossing() {
        let rule = rule(&[GeometryCheck::SelfIntersection, GeometryCheck::SelfOverlap]);
        let thresholds = Thresholds {
            self_intersection: Some(5.0),
            self_overlap: true,
            ring_closure: 1e-8,
            ..Thresholds::default()
        };
        let bend = line(&[(0.0, 0.0), (1.0, 0.0), (1.0, 0.0), (1.0, 1.0)]);
        assert!(check_feature("t", "1", &bend, GeometryType::Line, &rule, &thresholds).is_empty());
        let square = polygon(&[(0.0, 0.0), (2.0, 0.0), (2.0, 0.0), (2.0, 2.0), (0.0, 2.0), (0.0, 0.0)]);
        assert!(
            check_feature("t", "2", &square, GeometryType::Polygon, &rule, &thresholds).is_empty()
        );
    }

    #[test]
    fn duplicates_match_by_distance_not_vertex_order() {
        let rule = rule(&[GeometryCheck::Duplicate]);
        let thresholds = Thresholds {
            duplicate: Some(0.01),
            ..Thresholds::default()
        };
        let mut scan = LayerScan::new("t", &rule, thresholds);
        let square = [(0.0, 0.0), (2.0, 0.0), (2.0, 2.0), (0.0, 2.0), (0.0, 0.0)];
        let rotated = [(2.0, 0.0), (2.0, 2.0), (0.0, 2.0), (0.0, 0.0), (2.0, 0.0)];
        let densified = [(0.0, 0.0), (1.0, 0.0), (2.0, 0.0), (2.0, 2.0), (0.0, 2.0), (0.0, 0.0)];
        let shifted = [(0.5, 0.0), (2.5, 0.0), (2.5, 2.0), (0.5, 2.0), (0.5, 0.0)];

        let mut add = |id: &str, coords: &[(f64, f64)]| {
            scan.add(Feature::new(id, Some(polygon(coords))), None)
        };
        assert!(add("a", &square).is_empty());
        let issues = add("b", &rotated);
        assert!(matches!(
            issues.as_slice(),
            [Issue::DuplicateGeometry { feature, duplicate_of, .. }] if feature == "b" && duplicate_of == "a"
        ));
        let issues = add("c", &densified);
        assert!(matches!(
            issues.as_slice(),
            [Issue::DuplicateGeometry { duplicate_of, .. }] if duplicate_of == "a"
        ));
        assert!(add("d", &shifted).is_empty());
    }

    #[test]
    fn checks_are_gated_by_family() {
        let rule = rule(&[GeometryCheck::SmallPolygon, GeometryCheck::ShortSegment]);
        let thresholds = Thresholds {
            small_polygon: Some(10.0),
            short_segment: Some(10.0),
            ..Thresholds::default()
        };
        let road = line(&[(0.0, 0.0), (1.0, 0.0)]);
        let issues = check_feature("t", "1", &road, GeometryType::Line, &rule, &thresholds);
        assert!(matches!(issues.as_slice(), [Issue::ShortSegment { .. }]));
    }
}
