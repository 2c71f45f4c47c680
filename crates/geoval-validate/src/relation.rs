//! Stage 5: spatial relations between a main and a related table.

use tracing::{debug, info_span};

use geoval_model::{Coord, Feature, Geometry, Issue, LineString, Polygon, StageKind};
use geoval_rules::{RelationKind, RelationRule};

use crate::engine::{StageContext, StageInput, StageRunner, resolve_layer};
use crate::error::Result;
use crate::geom::{self, Rect};

pub struct RelationStage;

impl StageRunner for RelationStage {
    fn kind(&self) -> StageKind {
        StageKind::Relation
    }

    fn estimate_units(&self, input: &StageInput<'_>) -> u64 {
        let Ok(layers) = input.provider.list_layers() else {
            return 0;
        };
        selected(input)
            .filter_map(|rule| resolve_layer(&layers, &rule.main_table))
            .map(|layer| layer.feature_count)
            .sum()
    }

    fn run(&self, input: &StageInput<'_>, ctx: &mut dyn StageContext) -> Result<()> {
        let layers = input.provider.list_layers()?;
        let total = self.estimate_units(input);
        let mut processed = 0u64;

        for rule in selected(input) {
            ctx.checkpoint()?;
            let _span = info_span!(
                "relation",
                kind = %rule.kind,
                main = %rule.main_table,
                related = %rule.related_table
            )
            .entered();
            let Some(main) = resolve_layer(&layers, &rule.main_table) else {
                debug!("relation skipped, main table absent");
                continue;
            };
            let Some(related) = resolve_layer(&layers, &rule.related_table) else {
                ctx.push_finding(Issue::RelatedTableMissing {
                    table: rule.main_table.clone(),
                    related_table: rule.related_table.clone(),
                });
                processed += main.feature_count;
                ctx.report_progress(processed, total);
                continue;
            };

            let mut targets = Vec::new();
            for feature in input.provider.iterate_features(&related.id)? {
                ctx.checkpoint()?;
                let feature = feature?;
                if rule
                    .field_filter
                    .as_ref()
                    .is_none_or(|filter| filter.matches(&feature))
                    && let Some(target) = Target::new(feature)
                {
                    targets.push(target);
                }
            }
            let same_table = main.id == related.id;

            for feature in input.provider.iterate_features(&main.id)? {
                ctx.checkpoint()?;
                let feature = feature?;
                if let Some(geometry) = &feature.geometry {
                    let candidates: Vec<&Target> = targets
                        .iter()
                        .filter(|target| !(same_table && target.id == feature.id))
                        .collect();
                    for issue in evaluate(rule, &feature.id, geometry, &candidates) {
                        ctx.push_finding(issue);
                    }
                }
                processed += 1;
                ctx.report_progress(processed, total);
            }
        }
        Ok(())
    }
}

fn selected<'a>(input: &'a StageInput<'_>) -> impl Iterator<Item = &'a RelationRule> + 'a {
    input
        .rules
        .relations
        .iter()
        .filter(|rule| input.scope.includes(&rule.main_table))
}

/// A related feature, pre-bounded for candidate filtering.
pub struct Target {
    pub id: String,
    pub geometry: Geometry,
    bounds: Rect,
}

impl Target {
    pub fn new(feature: Feature) -> Option<Self> {
        let geometry = feature.geometry?;
        let bounds = Rect::of_geometry(&geometry)?;
        Some(Self {
            id: feature.id,
            geometry,
            bounds,
        })
    }
}

fn near<'t>(targets: &[&'t Target], bounds: Rect, reach: f64) -> Vec<&'t Target> {
    let window = bounds.expand(reach);
    targets
        .iter()
        .copied()
        .filter(|target| target.bounds.intersects(&window))
        .collect()
}

fn polygons_of<'t>(targets: &[&'t Target]) -> Vec<&'t Polygon> {
    targets
        .iter()
        .copied()
        .flat_map(|target: &'t Target| target.geometry.polygons())
        .collect()
}

/// Apply one relation rule to one main feature.
pub fn evaluate(
    rule: &RelationRule,
    feature: &str,
    geometry: &Geometry,
    targets: &[&Target],
) -> Vec<Issue> {
    let tolerance = rule.effective_tolerance();
    let Some(bounds) = Rect::of_geometry(geometry) else {
        return Vec::new();
    };
    let table = rule.main_table.clone();
    let related_table = rule.related_table.clone();
    let mut issues = Vec::new();

    match rule.kind {
        RelationKind::PointInsidePolygon => {
            let polygons = polygons_of(targets);
            for point in geometry.points() {
                let distance = polygons
                    .iter()
                    .map(|polygon| geom::distance_to_polygon(point, polygon))
                    .fold(f64::INFINITY, f64::min);
                if distance > tolerance {
                    issues.push(Issue::PointOutsidePolygon {
                        table: table.clone(),
                        feature: feature.to_string(),
                        related_table: related_table.clone(),
                        distance: finite(distance),
                        tolerance,
                    });
                }
            }
        }
        RelationKind::LineWithinPolygon => {
            let candidates = near(targets, bounds, tolerance);
            let polygons = polygons_of(&candidates);
            let outside_length: f64 = geometry
                .lines()
                .into_iter()
                .map(|line| geom::length_outside(line, &polygons, tolerance))
                .sum();
            if outside_length > tolerance {
                issues.push(Issue::LineOutsidePolygon {
                    table,
                    feature: feature.to_string(),
                    related_table,
                    outside_length,
                    tolerance,
                });
            }
        }
        RelationKind::PolygonWithinPolygon => {
            let candidates = near(targets, bounds, tolerance);
            let polygons = polygons_of(&candidates);
            let mut outside_area = 0.0;
            for polygon in geometry.polygons() {
                let covered: f64 = polygons
                    .iter()
                    .map(|other| geom::polygon_intersection_area(polygon, other))
                    .sum();
                outside_area += (geom::polygon_area(polygon) - covered).max(0.0);
            }
            if outside_area > tolerance {
                issues.push(Issue::PolygonOutsidePolygon {
                    table,
                    feature: feature.to_string(),
                    related_table,
                    outside_area,
                    tolerance,
                });
            }
        }
        RelationKind::PolygonNotWithinPolygon => {
            let area: f64 = geometry.polygons().into_iter().map(geom::polygon_area).sum();
            if area <= 0.0 {
                return issues;
            }
            for target in near(targets, bounds, 0.0) {
                let shared: f64 = geometry
                    .polygons()
                    .into_iter()
                    .flat_map(|a| {
                        target
                            .geometry
                            .polygons()
                            .into_iter()
                            .map(move |b| geom::polygon_intersection_area(a, b))
                    })
                    .sum();
                if shared > 0.0 && area - shared <= tolerance {
                    issues.push(Issue::PolygonWithinPolygon {
                        table: table.clone(),
                        feature: feature.to_string(),
                        related_table: related_table.clone(),
                        related_feature: target.id.clone(),
                    });
                }
            }
        }
        RelationKind::LineConnectivity => {
            let candidates = near(targets, bounds, tolerance);
            for line in geometry.lines() {
                for at in line_ends(line) {
                    if !connects(at, &candidates, tolerance) {
                        issues.push(Issue::Disconnected {
                            table: table.clone(),
                            feature: feature.to_string(),
                            related_table: related_table.clone(),
                            at,
                            search_distance: tolerance,
                        });
                    }
                }
            }
        }
    }
    issues
}

fn finite(value: f64) -> f64 {
    if value.is_finite() { value } else { f64::MAX }
}

fn line_ends(line: &LineString) -> Vec<Coord> {
    match (line.first(), line.last()) {
        (Some(first), Some(last)) if geom::distance(first, last) > geom::SNAP => vec![first, last],
        _ => Vec::new(),
    }
}

/// Whether `at` meets an endpoint of another line within `search_distance`.
fn connects(at: Coord, candidates: &[&Target], search_distance: f64) -> bool {
    candidates.iter().any(|target| {
        target
            .geometry
            .lines()
            .into_iter()
            .flat_map(line_ends)
            .any(|end| geom::distance(at, end) <= search_distance)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(id: &str, x: f64, y: f64, size: f64) -> Target {
        let ring: LineString = [
            (x, y),
            (x + size, y),
            (x + size, y + size),
            (x, y + size),
            (x, y),
        ]
        .into_iter()
        .collect();
        Target::new(Feature::new(id, Some(Geometry::Polygon(Polygon::new(ring, vec![])))))
            .expect("square target")
    }

    fn rule(kind: RelationKind, tolerance: Option<f64>) -> RelationRule {
        RelationRule {
            kind,
            main_table: "main".into(),
            related_table: "related".into(),
            field_filter: None,
            tolerance,
        }
    }

    #[test]
    fn point_inside_polygon_within_tolerance() {
        let block = square("b1", 0.0, 0.0, 10.0);
        let targets = [&block];
        let rule = rule(RelationKind::PointInsidePolygon, Some(0.5));
        let inside = Geometry::Point(Coord::new(5.0, 5.0));
        let near_edge = Geometry::Point(Coord::new(10.3, 5.0));
        let outside = Geometry::Point(Coord::new(12.0, 5.0));
        assert!(evaluate(&rule, "1", &inside, &targets).is_empty());
        assert!(evaluate(&rule, "2", &near_edge, &targets).is_empty());
        let issues = evaluate(&rule, "3", &outside, &targets);
        assert!(matches!(issues.as_slice(), [Issue::PointOutsidePolygon { distance, .. }] if (*distance - 2.0).abs() < 1e-9));
    }

    #[test]
    fn polygon_partly_outside_is_reported() {
        let block = square("b1", 0.0, 0.0, 10.0);
        let targets = [&block];
        let rule = rule(RelationKind::PolygonWithinPolygon, None);
        let parcel = square("p", 8.0, 0.0, 4.0).geometry;
        let issues = evaluate(&rule, "p", &parcel, &targets);
        assert!(matches!(issues.as_slice(), [Issue::PolygonOutsidePolygon { outside_area, .. }] if (*outside_area - 8.0).abs() < 1e-9));
    }

    #[test]
    fn polygon_not_within_flags_contained_polygon() {
        let block = square("b1", 0.0, 0.0, 10.0);
        let targets = [&block];
        let rule = rule(RelationKind::PolygonNotWithinPolygon, None);
        let contained = square("c", 2.0, 2.0, 2.0).geometry;
        let straddling = square("s", 9.0, 9.0, 2.0).geometry;
        assert_eq!(evaluate(&rule, "c", &contained, &targets).len(), 1);
        assert!(evaluate(&rule, "s", &straddling, &targets).is_empty());
    }

    fn road(id: &str, coords: &[(f64, f64)]) -> Target {
        let line: LineString = coords.iter().copied().collect();
        Target::new(Feature::new(id, Some(Geometry::LineString(line)))).expect("road target")
    }

    #[test]
    fn dangling_line_end_is_disconnected() {
        let other = road("r2", &[(0.0, 0.0), (10.0, 0.0)]);
        let targets = [&other];
        let rule = rule(RelationKind::LineConnectivity, Some(1.0));
        let spur = Geometry::LineString([(10.5, 0.5), (10.0, 8.0)].into_iter().collect());
        let issues = evaluate(&rule, "r1", &spur, &targets);
        assert!(matches!(issues.as_slice(), [Issue::Disconnected { at, .. }] if *at == Coord::new(10.0, 8.0)));
    }

    #[test]
    fn end_touching_a_line_interior_is_disconnected() {
        let other = road("r2", &[(0.0, 0.0), (10.0, 0.0)]);
        let targets = [&other];
        let rule = rule(RelationKind::LineConnectivity, Some(1.0));
        let spur = Geometry::LineString([(5.0, 0.0), (5.0, 8.0)].into_iter().collect());
        let issues = evaluate(&rule, "r1", &spur, &targets);
        let ends: Vec<Coord> = issues
            .iter()
            .filter_map(|issue| match issue {
                Issue::Disconnected { at, .. } => Some(*at),
                _ => None,
            })
            .collect();
        assert_eq!(ends, vec![Coord::new(5.0, 0.0), Coord::new(5.0, 8.0)]);
    }
}
