//! Damped Gauss-Newton whole-body inverse kinematics (C4).

use nalgebra::{DMatrix, DVector, Isometry3, Vector3};
use tracing::{debug, instrument, warn};

use crate::config::KinematicsConfig;
use crate::types::{ModelJointVector, NUM_MODEL_DOF};

use super::model::KinematicModel;

/// A single Cartesian constraint against one body in the tree.
#[derive(Debug, Clone)]
struct Constraint {
    body_id: usize,
    /// Offset of the constrained point in the body's own frame.
    body_point: Vector3<f64>,
    target_position: Vector3<f64>,
    target_orientation: Option<nalgebra::UnitQuaternion<f64>>,
}

impl Constraint {
    fn residual_len(&self) -> usize {
        if self.target_orientation.is_some() {
            6
        } else {
            3
        }
    }
}

/// Target pose for one IK sample: CoM position, left/right sole position + orientation.
#[derive(Debug, Clone, Copy)]
pub struct IkTarget {
    pub com_position: Vector3<f64>,
    pub left_sole: Isometry3<f64>,
    pub right_sole: Isometry3<f64>,
    pub root_orientation: nalgebra::UnitQuaternion<f64>,
}

/// Outcome of one `Inverse` sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IkOutcome {
    pub converged: bool,
    pub iterations: usize,
}

/// Whole-body IK solver: damped least-squares Gauss-Newton with warm start
/// and a CoM body-point refresh against the chest body.
pub struct InverseKinematics {
    model: KinematicModel,
    config: KinematicsConfig,
    q: ModelJointVector,
    initialized: bool,
}

impl InverseKinematics {
    #[must_use]
    pub fn new(model: KinematicModel, config: KinematicsConfig) -> Self {
        Self {
            model,
            config,
            q: ModelJointVector::zeros(),
            initialized: false,
        }
    }

    #[must_use]
    pub fn current_joints(&self) -> ModelJointVector {
        self.q
    }

    pub fn reset_to(&mut self, q: ModelJointVector) {
        self.q = q;
        self.initialized = false;
    }

    /// Solves one sample. On the first call, runs `n_init` unconstrained
    /// warm-up iterations before activating the constraints (locks in
    /// body-point alignment); subsequent calls warm-start from the previous `q`.
    #[instrument(skip_all)]
    pub fn inverse(&mut self, target: &IkTarget) -> IkOutcome {
        let description = self.model.description().clone();

        if !self.initialized {
            for _ in 0..self.config.n_init {
                let constraints = self.build_constraints(&description, target);
                self.gauss_newton_step(&constraints);
            }
            self.initialized = true;
            debug!(n_init = self.config.n_init, "IK warm-up complete");
        }

        let mut outcome = IkOutcome {
            converged: false,
            iterations: 0,
        };

        for step in 0..self.config.num_steps {
            // Refresh the CoM body point relative to the chest before each
            // iteration, so the constraint tracks the body as it moves.
            let constraints = self.build_constraints(&description, target);
            let delta_norm = self.gauss_newton_step(&constraints);
            outcome.iterations = step + 1;
            if delta_norm < self.config.step_tol {
                outcome.converged = true;
                break;
            }
        }

        if !outcome.converged {
            warn!(iterations = outcome.iterations, "IK did not converge within num_steps");
        }

        outcome
    }

    fn build_constraints(
        &self,
        description: &super::model::ModelDescription,
        target: &IkTarget,
    ) -> Vec<Constraint> {
        let forward = self.model.forward(&self.q);
        let chest_transform = forward.body_transforms[description.chest_id];

        // CoM body-point refresh: recompute the CoM's coordinates relative to
        // the chest body from the current `q`, so the constraint moves with it.
        let com_body_point =
            chest_transform.inverse_transform_point(&nalgebra::Point3::from(forward.com));

        vec![
            Constraint {
                body_id: description.chest_id,
                body_point: com_body_point.coords,
                target_position: target.com_position,
                target_orientation: None,
            },
            Constraint {
                body_id: description.root_id,
                body_point: Vector3::zeros(),
                target_position: forward.body_transforms[description.root_id].translation.vector,
                target_orientation: Some(target.root_orientation),
            },
            Constraint {
                body_id: description.left_sole_id,
                body_point: self.config.left_foot_body_point,
                target_position: target.left_sole.translation.vector,
                target_orientation: Some(target.left_sole.rotation),
            },
            Constraint {
                body_id: description.right_sole_id,
                body_point: self.config.right_foot_body_point,
                target_position: target.right_sole.translation.vector,
                target_orientation: Some(target.right_sole.rotation),
            },
        ]
    }

    /// Performs one damped Gauss-Newton step and returns `||Δq||`.
    fn gauss_newton_step(&mut self, constraints: &[Constraint]) -> f64 {
        let residual_len: usize = constraints.iter().map(Constraint::residual_len).sum();
        let mut error = DVector::<f64>::zeros(residual_len);
        let mut jacobian = DMatrix::<f64>::zeros(residual_len, NUM_MODEL_DOF);

        let forward0 = self.model.forward(&self.q);
        self.fill_error(constraints, &forward0, &mut error);

        const EPS: f64 = 1e-6;
        for joint in 0..NUM_MODEL_DOF {
            let mut q_perturbed = self.q;
            q_perturbed[joint] += EPS;
            let forward_perturbed = self.model.forward(&q_perturbed);

            let mut error_perturbed = DVector::<f64>::zeros(residual_len);
            self.fill_error(constraints, &forward_perturbed, &mut error_perturbed);

            let column = (error_perturbed - &error) / EPS;
            jacobian.set_column(joint, &column);
        }

        let lambda_sq = self.config.lambda * self.config.lambda;
        let jt = jacobian.transpose();
        let normal_matrix = &jt * &jacobian + DMatrix::identity(NUM_MODEL_DOF, NUM_MODEL_DOF) * lambda_sq;
        let rhs = jt * error;

        let delta = normal_matrix
            .lu()
            .solve(&rhs)
            .unwrap_or_else(|| DVector::zeros(NUM_MODEL_DOF));

        for i in 0..NUM_MODEL_DOF {
            self.q[i] += delta[i];
        }

        delta.norm()
    }

    fn fill_error(
        &self,
        constraints: &[Constraint],
        forward: &super::model::ForwardResult,
        error: &mut DVector<f64>,
    ) {
        let mut offset = 0;
        for constraint in constraints {
            let body_transform = forward.body_transforms[constraint.body_id];
            let current_position =
                body_transform.transform_point(&nalgebra::Point3::from(constraint.body_point));
            let position_error = constraint.target_position - current_position.coords;
            error[offset] = position_error.x;
            error[offset + 1] = position_error.y;
            error[offset + 2] = position_error.z;
            offset += 3;

            if let Some(target_orientation) = constraint.target_orientation {
                let relative = target_orientation * body_transform.rotation.inverse();
                let rotation_error = relative.scaled_axis();
                error[offset] = rotation_error.x;
                error[offset + 1] = rotation_error.y;
                error[offset + 2] = rotation_error.z;
                offset += 3;
            }
        }
    }
}
