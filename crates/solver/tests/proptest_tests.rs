//! Property-based tests for distance-limit invariants using the `proptest` crate.

use proptest::prelude::*;

use ik_solver::{
    Bone, BoneId, DistanceLimit, IkConstraint, PermutationMapper, Quaternion, Skeleton, Vector3,
};

// ---------------------------------------------------------------------------
// Strategy helpers
// ---------------------------------------------------------------------------

fn arb_vector() -> impl Strategy<Value = Vector3<f64>> {
    (-100.0f64..100.0, -100.0f64..100.0, -100.0f64..100.0).prop_map(|(x, y, z)| Vector3::new(x, y, z))
}

/// Arbitrary orientation from a scaled rotation axis (angle below pi).
fn arb_orientation() -> impl Strategy<Value = Quaternion> {
    (-1.8f64..1.8, -1.8f64..1.8, -1.8f64..1.8)
        .prop_map(|(x, y, z)| Quaternion::from_scaled_axis(Vector3::new(x, y, z)))
}

fn arb_bone() -> impl Strategy<Value = Bone> {
    (arb_vector(), arb_orientation()).prop_map(|(p, q)| Bone::new(p, q, 0.1, 1.0))
}

fn build(
    bone_a: Bone,
    bone_b: Bone,
    anchor_a: Vector3<f64>,
    anchor_b: Vector3<f64>,
    min: f64,
    max: f64,
) -> (Skeleton, BoneId, BoneId, DistanceLimit) {
    let mut skeleton = Skeleton::new();
    let a = skeleton.add_bone(bone_a);
    let b = skeleton.add_bone(bone_b);
    let limit = DistanceLimit::new(&skeleton, a, b, anchor_a, anchor_b, min, max).unwrap();
    (skeleton, a, b, limit)
}

const TOL: f64 = 1e-9;

// ---------------------------------------------------------------------------
// 1. Anchor round trip: set then get returns the same world point
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn anchor_round_trip(
        bone_a in arb_bone(),
        bone_b in arb_bone(),
        p in arb_vector(),
        q in arb_vector(),
    ) {
        let (skeleton, _, _, mut limit) =
            build(bone_a, bone_b, Vector3::zeros(), Vector3::zeros(), 0.0, 1.0);

        limit.set_anchor_a(&skeleton, p).unwrap();
        limit.set_anchor_b(&skeleton, q).unwrap();
        let got_a = limit.anchor_a(&skeleton).unwrap();
        let got_b = limit.anchor_b(&skeleton).unwrap();
        prop_assert!((got_a - p).norm() < TOL, "anchor A {} != {}", got_a, p);
        prop_assert!((got_b - q).norm() < TOL, "anchor B {} != {}", got_b, q);
    }
}

// ---------------------------------------------------------------------------
// 2. Distance setters store max(0, v)
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn distance_bounds_clamp(v in -1.0e6f64..1.0e6, w in -1.0e6f64..1.0e6) {
        let (_, _, _, mut limit) = build(
            Bone::new(Vector3::zeros(), Quaternion::identity(), 0.1, 1.0),
            Bone::new(Vector3::x(), Quaternion::identity(), 0.1, 1.0),
            Vector3::zeros(),
            Vector3::x(),
            0.0,
            1.0,
        );
        limit.set_minimum_distance(v);
        limit.set_maximum_distance(w);
        prop_assert_eq!(limit.minimum_distance(), v.max(0.0));
        prop_assert_eq!(limit.maximum_distance(), w.max(0.0));
    }
}

// ---------------------------------------------------------------------------
// 3. Linear Jacobians are exact negations and unit length when non-degenerate
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn linear_jacobians_antisymmetric(
        bone_a in arb_bone(),
        bone_b in arb_bone(),
        p in arb_vector(),
        q in arb_vector(),
        min in 0.0f64..50.0,
        extra in 0.0f64..50.0,
    ) {
        let (skeleton, a, b, mut limit) = build(bone_a, bone_b, p, q, min, min + extra);
        limit.recompute(skeleton.bone(a).unwrap(), skeleton.bone(b).unwrap());

        let row_a = limit.state().linear_jacobian_a().row(0).transpose();
        let row_b = limit.state().linear_jacobian_b().row(0).transpose();
        prop_assert_eq!(row_b, -row_a);
        if (q - p).norm() > 1e-6 {
            prop_assert!((row_a.norm() - 1.0).abs() < 1e-9);
        }
    }
}

// ---------------------------------------------------------------------------
// 4. Error is never negative and matches band violation
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn error_matches_band_violation(
        bone_a in arb_bone(),
        bone_b in arb_bone(),
        p in arb_vector(),
        q in arb_vector(),
        min in 0.0f64..150.0,
        extra in 0.0f64..150.0,
    ) {
        let max = min + extra;
        let (skeleton, a, b, mut limit) = build(bone_a, bone_b, p, q, min, max);
        limit.recompute(skeleton.bone(a).unwrap(), skeleton.bone(b).unwrap());

        let d = (q - p).norm();
        prop_assume!(d > 1e-6);
        let expected = if d > max { d - max } else if d < min { min - d } else { 0.0 };
        let error = limit.state().error();
        prop_assert!(error >= 0.0);
        prop_assert!((error - expected).abs() < 1e-6, "error {} expected {}", error, expected);
    }
}

// ---------------------------------------------------------------------------
// 5. Permutation mapping is a bijection
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn permutation_is_bijective(count in 1usize..200, permutation_index in 0u64..1000) {
        let mapper = PermutationMapper { permutation_index };
        let mut seen = vec![false; count];
        for i in 0..count {
            let j = mapper.mapped_index(i, count);
            prop_assert!(j < count);
            prop_assert!(!seen[j]);
            seen[j] = true;
        }
    }
}
