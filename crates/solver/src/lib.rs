//! Constraint-based inverse kinematics for articulated skeletons.
//!
//! Bones live in a [`Skeleton`] arena and are posed by an [`IkSolver`] that
//! repeatedly recomputes each constraint's Jacobians and velocity bias,
//! applies sequential impulses, and integrates the bones forward.

pub mod bone;
pub mod constraint;
pub mod distance_limit;
pub mod math;
pub mod solver;

pub use bone::*;
pub use constraint::*;
pub use distance_limit::*;
pub use math::{Matrix3, Quaternion, Vector3};
pub use solver::*;
