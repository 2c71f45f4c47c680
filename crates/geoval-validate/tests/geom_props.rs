use geoval_model::{Coord, LineString, Polygon};
use geoval_validate::geom::{polygon_area, polygon_intersection_area, ring_area, triangulate};
use proptest::prelude::*;

fn rect(x: f64, y: f64, w: f64, h: f64) -> Polygon {
    let ring: LineString = [(x, y), (x + w, y), (x + w, y + h), (x, y + h), (x, y)]
        .into_iter()
        .collect();
    Polygon::new(ring, vec![])
}

proptest! {
    #[test]
    fn rectangle_intersection_matches_closed_form(
        ax in -50.0f64..50.0, ay in -50.0f64..50.0, aw in 0.5f64..40.0, ah in 0.5f64..40.0,
        bx in -50.0f64..50.0, by in -50.0f64..50.0, bw in 0.5f64..40.0, bh in 0.5f64..40.0,
    ) {
        let a = rect(ax, ay, aw, ah);
        let b = rect(bx, by, bw, bh);
        let overlap_w = ((ax + aw).min(bx + bw) - ax.max(bx)).max(0.0);
        let overlap_h = ((ay + ah).min(by + bh) - ay.max(by)).max(0.0);
        let expected = overlap_w * overlap_h;
        let forward = polygon_intersection_area(&a, &b);
        let backward = polygon_intersection_area(&b, &a);
        prop_assert!((forward - expected).abs() < 1e-6, "{forward} vs {expected}");
        prop_assert!((forward - backward).abs() < 1e-6);
    }

    #[test]
    fn triangulation_preserves_convex_area(
        cx in -10.0f64..10.0, cy in -10.0f64..10.0, r in 1.0f64..20.0, n in 3usize..24,
    ) {
        let ring: Vec<Coord> = (0..=n)
            .map(|i| {
                let angle = std::f64::consts::TAU * (i % n) as f64 / n as f64;
                Coord::new(cx + r * angle.cos(), cy + r * angle.sin())
            })
            .collect();
        let area: f64 = triangulate(&ring).iter().map(|t| ring_area(t.as_slice())).sum();
        let polygon = Polygon::new(LineString::new(ring), vec![]);
        prop_assert!((area - polygon_area(&polygon)).abs() < 1e-6 * polygon_area(&polygon).max(1.0));
    }
}
