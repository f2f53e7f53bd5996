//! Shared state and contract for every constraint the IK solver can drive.
//!
//! Each constraint exposes up to three degrees of freedom through four 3x3
//! Jacobian containers (linear/angular for each of its two bones). Rows past
//! the constraint's DOF count are zero.

use thiserror::Error;

use crate::bone::{Bone, BoneId};
use crate::math::{adaptive_invert, Matrix3, Vector3};

/// `|error|` below this counts as satisfied.
pub const ERROR_THRESHOLD: f64 = 1e-4;

/// Default spring rigidity for new constraints.
pub const DEFAULT_RIGIDITY: f64 = 16.0;

const STIFFNESS_OVER_DAMPING: f64 = 0.25;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConstraintError {
    #[error("Bone {0:?} is not part of the skeleton")]
    MissingBone(BoneId),
    #[error("Invalid constraint configuration: {0}")]
    InvalidConfiguration(String),
}

/// How accumulated impulses are treated during velocity iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    /// Bilateral: impulses may push or pull.
    Joint,
    /// Unilateral: accumulated impulse is clamped to be non-negative.
    Limit,
}

/// State common to every constraint kind.
#[derive(Debug, Clone)]
pub struct ConstraintState {
    bone_a: BoneId,
    bone_b: BoneId,

    pub(crate) linear_jacobian_a: Matrix3<f64>,
    pub(crate) linear_jacobian_b: Matrix3<f64>,
    pub(crate) angular_jacobian_a: Matrix3<f64>,
    pub(crate) angular_jacobian_b: Matrix3<f64>,
    pub(crate) velocity_bias: Vector3<f64>,
    pub(crate) error: f64,

    /// Spring rigidity; higher values correct error faster and resist softening.
    pub rigidity: f64,
    /// Upper bound on the accumulated force per solve.
    pub maximum_force: f64,

    pub(crate) error_correction_factor: f64,
    pub(crate) softness: f64,
    maximum_impulse: f64,
    maximum_impulse_squared: f64,
    effective_mass: Matrix3<f64>,
    accumulated_impulse: Vector3<f64>,
}

impl ConstraintState {
    pub fn new(bone_a: BoneId, bone_b: BoneId) -> Self {
        Self {
            bone_a,
            bone_b,
            linear_jacobian_a: Matrix3::zeros(),
            linear_jacobian_b: Matrix3::zeros(),
            angular_jacobian_a: Matrix3::zeros(),
            angular_jacobian_b: Matrix3::zeros(),
            velocity_bias: Vector3::zeros(),
            error: 0.0,
            rigidity: DEFAULT_RIGIDITY,
            maximum_force: f64::MAX,
            error_correction_factor: 0.0,
            softness: 0.0,
            maximum_impulse: f64::MAX,
            maximum_impulse_squared: f64::MAX,
            effective_mass: Matrix3::zeros(),
            accumulated_impulse: Vector3::zeros(),
        }
    }

    pub fn bone_a(&self) -> BoneId {
        self.bone_a
    }

    pub fn bone_b(&self) -> BoneId {
        self.bone_b
    }

    pub fn linear_jacobian_a(&self) -> &Matrix3<f64> {
        &self.linear_jacobian_a
    }

    pub fn linear_jacobian_b(&self) -> &Matrix3<f64> {
        &self.linear_jacobian_b
    }

    pub fn angular_jacobian_a(&self) -> &Matrix3<f64> {
        &self.angular_jacobian_a
    }

    pub fn angular_jacobian_b(&self) -> &Matrix3<f64> {
        &self.angular_jacobian_b
    }

    pub fn velocity_bias(&self) -> &Vector3<f64> {
        &self.velocity_bias
    }

    pub fn error(&self) -> f64 {
        self.error
    }

    pub fn error_correction_factor(&self) -> f64 {
        self.error_correction_factor
    }

    pub fn softness(&self) -> f64 {
        self.softness
    }

    pub fn effective_mass(&self) -> &Matrix3<f64> {
        &self.effective_mass
    }

    pub fn accumulated_impulse(&self) -> &Vector3<f64> {
        &self.accumulated_impulse
    }

    /// Derive the spring coefficients for a time step.
    pub fn preupdate(&mut self, dt: f64, update_rate: f64) {
        let stiffness = STIFFNESS_OVER_DAMPING * self.rigidity;
        let damping = self.rigidity;
        let multiplier = 1.0 / (dt * stiffness + damping);
        self.error_correction_factor = stiffness * multiplier;
        self.softness = update_rate * multiplier;
        self.maximum_impulse = self.maximum_force * dt;
        self.maximum_impulse_squared = self.maximum_impulse * self.maximum_impulse;
    }

    /// `(J M^-1 J^T + softness I)^-1`, summed over both unpinned bones.
    pub fn compute_effective_mass(&mut self, bone_a: &Bone, bone_b: &Bone) {
        let mut m = Matrix3::zeros();

        let inv_mass_a = bone_a.effective_inverse_mass();
        let inv_inertia_a = bone_a.effective_inertia_tensor_inverse();
        m += self.linear_jacobian_a * self.linear_jacobian_a.transpose() * inv_mass_a;
        m += self.angular_jacobian_a * inv_inertia_a * self.angular_jacobian_a.transpose();

        let inv_mass_b = bone_b.effective_inverse_mass();
        let inv_inertia_b = bone_b.effective_inertia_tensor_inverse();
        m += self.linear_jacobian_b * self.linear_jacobian_b.transpose() * inv_mass_b;
        m += self.angular_jacobian_b * inv_inertia_b * self.angular_jacobian_b.transpose();

        m += Matrix3::identity() * self.softness;
        self.effective_mass = adaptive_invert(&m);
    }

    /// Reapply the impulse accumulated so far.
    pub fn warm_start(&self, bone_a: &mut Bone, bone_b: &mut Bone) {
        self.apply_impulse(&self.accumulated_impulse, bone_a, bone_b);
    }

    /// Push a constraint-space impulse back out to bone velocities (`J^T λ`).
    pub fn apply_impulse(&self, impulse: &Vector3<f64>, bone_a: &mut Bone, bone_b: &mut Bone) {
        if !bone_a.pinned {
            let linear = self.linear_jacobian_a.transpose() * impulse;
            bone_a.linear_velocity += linear * bone_a.effective_inverse_mass();
            let angular = self.angular_jacobian_a.transpose() * impulse;
            bone_a.angular_velocity += bone_a.effective_inertia_tensor_inverse() * angular;
        }
        if !bone_b.pinned {
            let linear = self.linear_jacobian_b.transpose() * impulse;
            bone_b.linear_velocity += linear * bone_b.effective_inverse_mass();
            let angular = self.angular_jacobian_b.transpose() * impulse;
            bone_b.angular_velocity += bone_b.effective_inertia_tensor_inverse() * angular;
        }
    }

    /// Relative velocity of the two bones projected onto the constraint axes.
    pub fn velocity_error(&self, bone_a: &Bone, bone_b: &Bone) -> Vector3<f64> {
        self.linear_jacobian_a * bone_a.linear_velocity
            + self.angular_jacobian_a * bone_a.angular_velocity
            + self.linear_jacobian_b * bone_b.linear_velocity
            + self.angular_jacobian_b * bone_b.angular_velocity
    }

    /// One sequential-impulse step.
    pub fn solve_velocity_iteration(
        &mut self,
        kind: ConstraintKind,
        bone_a: &mut Bone,
        bone_b: &mut Bone,
    ) {
        let velocity_error = self.velocity_error(bone_a, bone_b);
        let correction =
            self.velocity_bias - velocity_error - self.accumulated_impulse * self.softness;
        let mut impulse = self.effective_mass * correction;

        let previous = self.accumulated_impulse;
        self.accumulated_impulse += impulse;

        if kind == ConstraintKind::Limit {
            self.accumulated_impulse = self.accumulated_impulse.map(|v| v.max(0.0));
        }

        let impulse_squared = self.accumulated_impulse.norm_squared();
        if impulse_squared > self.maximum_impulse_squared {
            self.accumulated_impulse *= self.maximum_impulse / impulse_squared.sqrt();
        }
        impulse = self.accumulated_impulse - previous;

        self.apply_impulse(&impulse, bone_a, bone_b);
    }

    pub fn clear_accumulated_impulses(&mut self) {
        self.accumulated_impulse = Vector3::zeros();
    }
}

/// Contract the solver drives every constraint through.
///
/// Implementors only provide the geometry ([`recompute`](Self::recompute));
/// the impulse machinery is shared through [`ConstraintState`].
pub trait IkConstraint: std::fmt::Debug {
    fn state(&self) -> &ConstraintState;

    fn state_mut(&mut self) -> &mut ConstraintState;

    fn kind(&self) -> ConstraintKind;

    /// Refresh Jacobians, error and velocity bias for the bones' current pose.
    ///
    /// `bone_a` and `bone_b` must be the bones named by [`state`](Self::state).
    fn recompute(&mut self, bone_a: &Bone, bone_b: &Bone);

    /// Whether the constraint wants impulses this iteration.
    fn has_error(&self) -> bool {
        true
    }

    fn bone_a(&self) -> BoneId {
        self.state().bone_a()
    }

    fn bone_b(&self) -> BoneId {
        self.state().bone_b()
    }

    fn solve_velocity_iteration(&mut self, bone_a: &mut Bone, bone_b: &mut Bone) {
        let kind = self.kind();
        self.state_mut().solve_velocity_iteration(kind, bone_a, bone_b);
    }
}
