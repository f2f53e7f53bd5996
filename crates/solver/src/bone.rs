use nalgebra::Quaternion as RawQuaternion;
use serde::{Deserialize, Serialize};
use slotmap::{new_key_type, SlotMap};

use crate::math::{Matrix3, Quaternion, Vector3};

new_key_type! {
    /// Handle to a bone stored in a [`Skeleton`].
    ///
    /// Constraints hold these instead of references; the skeleton must outlive
    /// every constraint that names one of its bones.
    pub struct BoneId;
}

/// Local inertia is inflated by this factor to keep rotations from dominating.
pub const INERTIA_TENSOR_SCALING: f64 = 2.5;

/// Floor applied to mass and inertia so inverses stay finite.
const MIN_MASS: f64 = 1e-10;

/// A rigid segment of the skeleton.
///
/// Modeled as a solid cylinder whose axis is the bone's local Y.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bone {
    pub position: Vector3<f64>,
    pub orientation: Quaternion,
    pub linear_velocity: Vector3<f64>,
    pub angular_velocity: Vector3<f64>,
    /// Pinned bones are never moved by constraint impulses.
    pub pinned: bool,
    radius: f64,
    height: f64,
    inverse_mass: f64,
    local_inertia_tensor_inverse: Matrix3<f64>,
    inertia_tensor_inverse: Matrix3<f64>,
}

impl Bone {
    /// Create a unit-mass bone at the given world pose.
    pub fn new(position: Vector3<f64>, orientation: Quaternion, radius: f64, height: f64) -> Self {
        let mut bone = Self {
            position,
            orientation,
            linear_velocity: Vector3::zeros(),
            angular_velocity: Vector3::zeros(),
            pinned: false,
            radius,
            height,
            inverse_mass: 1.0,
            local_inertia_tensor_inverse: Matrix3::identity(),
            inertia_tensor_inverse: Matrix3::identity(),
        };
        bone.set_mass(1.0);
        bone
    }

    /// Builder-style pin.
    pub fn pinned(mut self) -> Self {
        self.pinned = true;
        self
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn mass(&self) -> f64 {
        1.0 / self.inverse_mass
    }

    /// Set the mass and rebuild the local inertia tensor of the cylinder.
    pub fn set_mass(&mut self, mass: f64) {
        let mass = mass.max(MIN_MASS);
        self.inverse_mass = 1.0 / mass;

        let r2 = self.radius * self.radius;
        let h2 = self.height * self.height;
        let transverse = (INERTIA_TENSOR_SCALING * mass * (3.0 * r2 + h2) / 12.0).max(MIN_MASS);
        let axial = (INERTIA_TENSOR_SCALING * mass * r2 / 2.0).max(MIN_MASS);
        self.local_inertia_tensor_inverse =
            Matrix3::from_diagonal(&Vector3::new(1.0 / transverse, 1.0 / axial, 1.0 / transverse));
        self.update_inertia_tensor();
    }

    /// Inverse mass seen by the solver. Zero when pinned.
    pub fn effective_inverse_mass(&self) -> f64 {
        if self.pinned { 0.0 } else { self.inverse_mass }
    }

    /// World-space inverse inertia seen by the solver. Zero when pinned.
    pub fn effective_inertia_tensor_inverse(&self) -> Matrix3<f64> {
        if self.pinned {
            Matrix3::zeros()
        } else {
            self.inertia_tensor_inverse
        }
    }

    /// Rotate the local inverse inertia into world space for the current orientation.
    pub fn update_inertia_tensor(&mut self) {
        let r = self.orientation.to_rotation_matrix();
        let r = r.matrix();
        self.inertia_tensor_inverse = r * self.local_inertia_tensor_inverse * r.transpose();
    }

    /// World-space point for an offset expressed in this bone's local frame.
    pub fn local_to_world(&self, local: &Vector3<f64>) -> Vector3<f64> {
        self.position + self.orientation.transform_vector(local)
    }

    /// Offset in this bone's local frame for a world-space point.
    pub fn world_to_local(&self, world: &Vector3<f64>) -> Vector3<f64> {
        self.orientation.conjugate().transform_vector(&(world - self.position))
    }

    /// Advance the pose by the accumulated velocities, then zero them.
    ///
    /// Velocities never persist between iterations: the solver is a position
    /// solver and leftover momentum would make bones drift.
    pub fn integrate(&mut self, dt: f64) {
        self.position += self.linear_velocity * dt;

        let half = self.angular_velocity * (0.5 * dt);
        let spin = RawQuaternion::new(0.0, half.x, half.y, half.z);
        let q = *self.orientation.quaternion();
        self.orientation = Quaternion::new_normalize(q + spin * q);

        self.linear_velocity = Vector3::zeros();
        self.angular_velocity = Vector3::zeros();
    }
}

/// Arena owning every bone a solve can touch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Skeleton {
    bones: SlotMap<BoneId, Bone>,
}

impl Skeleton {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a bone, returning its handle.
    pub fn add_bone(&mut self, bone: Bone) -> BoneId {
        self.bones.insert(bone)
    }

    /// Remove a bone. Constraints still naming it will be rejected by the solver.
    pub fn remove_bone(&mut self, id: BoneId) -> Option<Bone> {
        self.bones.remove(id)
    }

    pub fn bone(&self, id: BoneId) -> Option<&Bone> {
        self.bones.get(id)
    }

    pub fn bone_mut(&mut self, id: BoneId) -> Option<&mut Bone> {
        self.bones.get_mut(id)
    }

    pub fn contains(&self, id: BoneId) -> bool {
        self.bones.contains_key(id)
    }

    /// Mutable access to two distinct bones at once.
    /// Returns `None` if either is missing or `a == b`.
    pub fn pair_mut(&mut self, a: BoneId, b: BoneId) -> Option<(&mut Bone, &mut Bone)> {
        let [bone_a, bone_b] = self.bones.get_disjoint_mut([a, b])?;
        Some((bone_a, bone_b))
    }

    pub fn len(&self) -> usize {
        self.bones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (BoneId, &Bone)> {
        self.bones.iter()
    }

    pub(crate) fn bones_mut(&mut self) -> impl Iterator<Item = &mut Bone> {
        self.bones.values_mut()
    }
}
