use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::bone::{Bone, BoneId, Skeleton};
use crate::constraint::IkConstraint;

/// Outcome of [`IkSolver::solve`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolveReport {
    pub iterations: usize,
    /// Constraints whose `has_error()` was still true after the final pose.
    pub constraints_in_error: usize,
    /// Largest `|error|` over all constraints after the final pose.
    pub max_error: f64,
}

impl SolveReport {
    pub fn satisfied(&self) -> bool {
        self.constraints_in_error == 0
    }
}

#[derive(Debug, Error)]
pub enum SolverError {
    #[error("Constraint {constraint} references bone {bone:?}, which is not in the skeleton")]
    MissingBone { constraint: usize, bone: BoneId },
    #[error("Constraint {constraint} connects bone {bone:?} to itself")]
    DegenerateConnection { constraint: usize, bone: BoneId },
    #[error("Invalid solver configuration: {0}")]
    InvalidConfig(String),
}

/// Configuration for the sequential-impulse IK solver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Pseudo time step; scales integration and the constraint springs.
    pub time_step_duration: f64,
    /// Position iterations: recompute, solve velocities, integrate.
    pub iteration_count: usize,
    /// Velocity passes over the active constraints per iteration.
    pub velocity_subiteration_count: usize,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            time_step_duration: 1.0,
            iteration_count: 50,
            velocity_subiteration_count: 2,
        }
    }
}

/// Remaps constraint indices so each velocity pass visits them in a different order.
#[derive(Debug, Clone, Default)]
pub struct PermutationMapper {
    pub permutation_index: u64,
}

impl PermutationMapper {
    const PRIMES: [u64; 5] = [104_729, 999_983, 1_000_003, 1_299_709, 15_485_863];

    /// Bijective on `0..count` for any fixed `permutation_index`.
    pub fn mapped_index(&self, index: usize, count: usize) -> usize {
        if count == 0 {
            return index;
        }
        let count = count as u64;
        let mut prime = Self::PRIMES[(self.permutation_index % Self::PRIMES.len() as u64) as usize];
        if count % prime == 0 {
            prime = 1;
        }
        let offset = self.permutation_index % count;
        ((index as u64 % count * (prime % count) + offset) % count) as usize
    }
}

/// Drives a set of constraints toward satisfaction by moving the skeleton's bones.
pub struct IkSolver {
    config: SolverConfig,
}

impl IkSolver {
    pub const fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(SolverConfig::default())
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    /// Solve `constraints` in place against `skeleton`.
    ///
    /// Each iteration recomputes every constraint from the current pose. Only
    /// constraints reporting `has_error()` receive impulses; the rest drop
    /// their accumulated impulse for that iteration. Accumulated impulses are
    /// cleared on return.
    #[instrument(skip_all, fields(bones = skeleton.len(), constraints = constraints.len()))]
    pub fn solve(
        &self,
        skeleton: &mut Skeleton,
        constraints: &mut [Box<dyn IkConstraint>],
    ) -> Result<SolveReport, SolverError> {
        let dt = self.config.time_step_duration;
        if !(dt.is_finite() && dt > 0.0) {
            return Err(SolverError::InvalidConfig(format!(
                "time step must be positive and finite, got {dt}"
            )));
        }
        validate_connections(skeleton, constraints)?;

        if constraints.is_empty() {
            return Ok(SolveReport {
                iterations: 0,
                constraints_in_error: 0,
                max_error: 0.0,
            });
        }

        let update_rate = 1.0 / dt;
        for constraint in constraints.iter_mut() {
            constraint.state_mut().preupdate(dt, update_rate);
        }

        let count = constraints.len();
        let mut active = vec![false; count];
        let mut mapper = PermutationMapper::default();
        let mut iterations = 0;

        for iteration in 0..self.config.iteration_count {
            for bone in skeleton.bones_mut() {
                bone.update_inertia_tensor();
            }

            for (index, constraint) in constraints.iter_mut().enumerate() {
                let (bone_a, bone_b) = connected_bones(skeleton, index, &**constraint)?;
                constraint.recompute(bone_a, bone_b);
                active[index] = constraint.has_error();
                if active[index] {
                    constraint.state_mut().compute_effective_mass(bone_a, bone_b);
                    constraint.state().warm_start(bone_a, bone_b);
                } else {
                    constraint.state_mut().clear_accumulated_impulses();
                }
            }

            let active_count = active.iter().filter(|&&a| a).count();
            debug!(iteration, active = active_count, "solver iteration");
            if active_count == 0 {
                break;
            }

            for _ in 0..self.config.velocity_subiteration_count {
                for slot in 0..count {
                    let index = mapper.mapped_index(slot, count);
                    if !active[index] {
                        continue;
                    }
                    let constraint = &mut constraints[index];
                    let (bone_a, bone_b) = connected_bones(skeleton, index, &**constraint)?;
                    constraint.solve_velocity_iteration(bone_a, bone_b);
                }
                mapper.permutation_index += 1;
            }

            for bone in skeleton.bones_mut() {
                bone.integrate(dt);
            }
            iterations += 1;
        }

        let mut report = SolveReport {
            iterations,
            constraints_in_error: 0,
            max_error: 0.0,
        };
        for (index, constraint) in constraints.iter_mut().enumerate() {
            constraint.state_mut().clear_accumulated_impulses();
            let (bone_a, bone_b) = connected_bones(skeleton, index, &**constraint)?;
            constraint.recompute(bone_a, bone_b);
            if constraint.has_error() {
                report.constraints_in_error += 1;
            }
            report.max_error = report.max_error.max(constraint.state().error().abs());
        }

        if !report.satisfied() {
            warn!(
                remaining = report.constraints_in_error,
                max_error = report.max_error,
                "solve finished with constraints still in error"
            );
        }
        Ok(report)
    }
}

fn validate_connections(
    skeleton: &Skeleton,
    constraints: &[Box<dyn IkConstraint>],
) -> Result<(), SolverError> {
    for (index, constraint) in constraints.iter().enumerate() {
        let (a, b) = (constraint.bone_a(), constraint.bone_b());
        if a == b {
            return Err(SolverError::DegenerateConnection { constraint: index, bone: a });
        }
        for bone in [a, b] {
            if !skeleton.contains(bone) {
                return Err(SolverError::MissingBone { constraint: index, bone });
            }
        }
    }
    Ok(())
}

fn connected_bones<'s>(
    skeleton: &'s mut Skeleton,
    index: usize,
    constraint: &dyn IkConstraint,
) -> Result<(&'s mut Bone, &'s mut Bone), SolverError> {
    let (a, b) = (constraint.bone_a(), constraint.bone_b());
    skeleton
        .pair_mut(a, b)
        .ok_or(SolverError::MissingBone { constraint: index, bone: a })
}
