//! Keeps two bone-attached anchors within a `[minimum, maximum]` distance band.

use tracing::trace;

use crate::bone::{Bone, BoneId, Skeleton};
use crate::constraint::{
    ConstraintError, ConstraintKind, ConstraintState, IkConstraint, ERROR_THRESHOLD,
};
use crate::math::{clamp_non_negative, jacobian_row, Vector3, EPSILON};

/// One-DOF limit on the distance between an anchor on each of two bones.
///
/// Anchors are stored in their bone's local frame so they follow the bone.
/// Nothing ties `minimum_distance` to `maximum_distance` once constructed;
/// keeping `minimum <= maximum` through the setters is up to the caller.
#[derive(Debug, Clone)]
pub struct DistanceLimit {
    state: ConstraintState,
    /// Anchor on bone A, in bone A's local frame.
    pub local_anchor_a: Vector3<f64>,
    /// Anchor on bone B, in bone B's local frame.
    pub local_anchor_b: Vector3<f64>,
    minimum_distance: f64,
    maximum_distance: f64,
}

impl DistanceLimit {
    /// Build a limit from world-space anchors, captured against the bones'
    /// current pose.
    ///
    /// Both distances are clamped to be non-negative. Fails if either bone is
    /// absent, both handles name the same bone, or the clamped minimum exceeds
    /// the clamped maximum.
    pub fn new(
        skeleton: &Skeleton,
        bone_a: BoneId,
        bone_b: BoneId,
        anchor_a: Vector3<f64>,
        anchor_b: Vector3<f64>,
        minimum_distance: f64,
        maximum_distance: f64,
    ) -> Result<Self, ConstraintError> {
        if bone_a == bone_b {
            return Err(ConstraintError::InvalidConfiguration(
                "a distance limit must connect two different bones".into(),
            ));
        }
        let a = skeleton.bone(bone_a).ok_or(ConstraintError::MissingBone(bone_a))?;
        let b = skeleton.bone(bone_b).ok_or(ConstraintError::MissingBone(bone_b))?;

        let mut limit = Self {
            state: ConstraintState::new(bone_a, bone_b),
            local_anchor_a: a.world_to_local(&anchor_a),
            local_anchor_b: b.world_to_local(&anchor_b),
            minimum_distance: 0.0,
            maximum_distance: 0.0,
        };
        limit.set_minimum_distance(minimum_distance);
        limit.set_maximum_distance(maximum_distance);

        if limit.minimum_distance > limit.maximum_distance {
            return Err(ConstraintError::InvalidConfiguration(format!(
                "minimum distance {} exceeds maximum distance {}",
                limit.minimum_distance, limit.maximum_distance
            )));
        }
        Ok(limit)
    }

    /// World-space anchor on bone A.
    pub fn anchor_a(&self, skeleton: &Skeleton) -> Result<Vector3<f64>, ConstraintError> {
        let bone = Self::lookup(skeleton, self.state.bone_a())?;
        Ok(bone.local_to_world(&self.local_anchor_a))
    }

    /// Re-anchor bone A at a world-space point.
    pub fn set_anchor_a(
        &mut self,
        skeleton: &Skeleton,
        anchor: Vector3<f64>,
    ) -> Result<(), ConstraintError> {
        let bone = Self::lookup(skeleton, self.state.bone_a())?;
        self.local_anchor_a = bone.world_to_local(&anchor);
        Ok(())
    }

    /// World-space anchor on bone B.
    pub fn anchor_b(&self, skeleton: &Skeleton) -> Result<Vector3<f64>, ConstraintError> {
        let bone = Self::lookup(skeleton, self.state.bone_b())?;
        Ok(bone.local_to_world(&self.local_anchor_b))
    }

    /// Re-anchor bone B at a world-space point.
    pub fn set_anchor_b(
        &mut self,
        skeleton: &Skeleton,
        anchor: Vector3<f64>,
    ) -> Result<(), ConstraintError> {
        let bone = Self::lookup(skeleton, self.state.bone_b())?;
        self.local_anchor_b = bone.world_to_local(&anchor);
        Ok(())
    }

    pub fn minimum_distance(&self) -> f64 {
        self.minimum_distance
    }

    /// Stored as `max(0, distance)`.
    pub fn set_minimum_distance(&mut self, distance: f64) {
        self.minimum_distance = clamp_non_negative(distance);
    }

    pub fn maximum_distance(&self) -> f64 {
        self.maximum_distance
    }

    /// Stored as `max(0, distance)`.
    pub fn set_maximum_distance(&mut self, distance: f64) {
        self.maximum_distance = clamp_non_negative(distance);
    }

    fn lookup<'s>(skeleton: &'s Skeleton, id: BoneId) -> Result<&'s Bone, ConstraintError> {
        skeleton.bone(id).ok_or(ConstraintError::MissingBone(id))
    }
}

impl IkConstraint for DistanceLimit {
    fn state(&self) -> &ConstraintState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ConstraintState {
        &mut self.state
    }

    fn kind(&self) -> ConstraintKind {
        ConstraintKind::Limit
    }

    fn recompute(&mut self, bone_a: &Bone, bone_b: &Bone) {
        let offset_a = bone_a.orientation.transform_vector(&self.local_anchor_a);
        let offset_b = bone_b.orientation.transform_vector(&self.local_anchor_b);
        let anchor_a = bone_a.position + offset_a;
        let anchor_b = bone_b.position + offset_b;

        let separation = anchor_b - anchor_a;
        let current_distance = separation.norm();

        let (min, max) = (self.minimum_distance, self.maximum_distance);
        let ecf = self.state.error_correction_factor;

        let (linear_a, error, bias) = if current_distance > EPSILON {
            let direction = separation / current_distance;
            if current_distance > max {
                // Too far apart: pull together.
                let error = current_distance - max;
                (direction, error, ecf * error)
            } else if current_distance < min {
                // Too close: push apart. The limit only pushes one way, so flip the axis.
                let error = min - current_distance;
                (-direction, error, ecf * error)
            } else if current_distance - min > (max - min) * 0.5 {
                // Inside the band, nearer the maximum.
                (direction, 0.0, current_distance - max)
            } else {
                // Inside the band, nearer the minimum.
                (-direction, 0.0, min - current_distance)
            }
        } else {
            (Vector3::zeros(), 0.0, 0.0)
        };

        let angular_a = offset_a.cross(&linear_a);
        // linear_b = -linear_a; swapping the cross order absorbs the sign.
        let angular_b = linear_a.cross(&offset_b);

        self.state.error = error;
        self.state.velocity_bias = Vector3::new(bias, 0.0, 0.0);
        self.state.linear_jacobian_a = jacobian_row(&linear_a);
        self.state.linear_jacobian_b = jacobian_row(&-linear_a);
        self.state.angular_jacobian_a = jacobian_row(&angular_a);
        self.state.angular_jacobian_b = jacobian_row(&angular_b);

        trace!(current_distance, error, bias, "distance limit recomputed");
    }

    fn has_error(&self) -> bool {
        self.state.error.abs() >= ERROR_THRESHOLD
    }
}
