use pcbmill_camtools::geometry::{deskew, AffineTransform, BoundingBox, Point};
use proptest::prelude::*;

fn coord() -> impl Strategy<Value = f64> {
    -200.0..200.0f64
}

fn point() -> impl Strategy<Value = Point> {
    (coord(), coord()).prop_map(|(x, y)| Point::new(x, y))
}

fn transform() -> impl Strategy<Value = AffineTransform> {
    (-3.1..3.1f64, coord(), coord(), 0.2..5.0f64, 0.2..5.0f64).prop_map(|(theta, dx, dy, sx, sy)| {
        AffineTransform::scale(sx, sy)
            .then(&AffineTransform::rotate(theta))
            .then(&AffineTransform::translate(dx, dy))
    })
}

proptest! {
    #[test]
    fn deskew_recovers_rigid_motion(
        a0 in point(),
        b0 in point(),
        theta in -3.1..3.1f64,
        tx in coord(),
        ty in coord(),
    ) {
        prop_assume!(a0.distance_to(b0) > 1.0);
        let truth = AffineTransform::rotate(theta).then(&AffineTransform::translate(tx, ty));
        let result = deskew(a0, b0, truth.apply(a0), truth.apply(b0)).unwrap();

        prop_assert!((result.rotation - theta).abs() < 1e-9);
        prop_assert!((result.offset.x - tx).abs() < 1e-7);
        prop_assert!((result.offset.y - ty).abs() < 1e-7);
    }

    #[test]
    fn bounding_box_never_shrinks(points in prop::collection::vec(point(), 1..40)) {
        let mut bbox = BoundingBox::new();
        for p in points {
            let before = bbox;
            bbox.check_coord(p);
            prop_assert!(bbox.valid());
            prop_assert!(bbox.width() >= 0.0 && bbox.height() >= 0.0);
            if before.valid() {
                prop_assert!(bbox.min.x <= before.min.x && bbox.min.y <= before.min.y);
                prop_assert!(bbox.max.x >= before.max.x && bbox.max.y >= before.max.y);
            }
        }
    }

    #[test]
    fn composition_is_associative(a in transform(), b in transform(), c in transform(), p in point()) {
        let left = AffineTransform::compose(&AffineTransform::compose(&a, &b), &c).apply(p);
        let right = AffineTransform::compose(&a, &AffineTransform::compose(&b, &c)).apply(p);
        let scale = 1.0 + left.x.abs().max(left.y.abs());
        prop_assert!(left.distance_to(right) < 1e-9 * scale);
    }

    #[test]
    fn composition_matches_sequential_application(a in transform(), b in transform(), p in point()) {
        let composed = AffineTransform::compose(&a, &b).apply(p);
        let stepped = a.apply(b.apply(p));
        let scale = 1.0 + composed.x.abs().max(composed.y.abs());
        prop_assert!(composed.distance_to(stepped) < 1e-9 * scale);
    }
}

#[test]
fn identity_is_neutral() {
    let t = AffineTransform::rotate(0.7).then(&AffineTransform::translate(3.0, 4.0));
    let p = Point::new(12.5, -3.25);
    let id = AffineTransform::identity();
    assert_eq!(AffineTransform::compose(&id, &t).apply(p), t.apply(p));
    assert_eq!(AffineTransform::compose(&t, &id).apply(p), t.apply(p));
}
