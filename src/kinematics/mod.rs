//! Forward and inverse kinematics over the rigid-body tree (C4).

pub mod inverse;
pub mod model;

use nalgebra::{Isometry3, UnitQuaternion, Vector3};

use crate::config::KinematicsConfig;
use crate::error::WarningKind;
use crate::interpolation::CommandSample;
use crate::types::{ActuatedJointVector, ModelJointVector, NUM_ACTUATED_JOINTS};

pub use inverse::{IkOutcome, IkTarget, InverseKinematics};
pub use model::{KinematicModel, ModelDescription};

/// Measured or forward-computed CoM state, used both to report the robot's
/// current CoM and to feed it back into the pattern generator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForwardKinematicsResult {
    pub com_position: Vector3<f64>,
    pub com_velocity: Vector3<f64>,
    pub left_sole: Isometry3<f64>,
    pub right_sole: Isometry3<f64>,
}

/// One column of the `Inverse` result: the actuated joint vector plus the
/// floating-base DoF, and whether that sample's IK converged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IkSample {
    pub q: ModelJointVector,
    pub actuated: ActuatedJointVector,
    pub converged: bool,
}

/// The whole-body kinematics component: wraps the immutable model and the
/// mutable IK solver state (current `q`, warm-start, initialization flag).
pub struct Kinematics {
    model: KinematicModel,
    ik: InverseKinematics,
}

impl Kinematics {
    #[must_use]
    pub fn new(model: KinematicModel, config: KinematicsConfig) -> Self {
        let ik = InverseKinematics::new(model.clone(), config);
        Self { model, ik }
    }

    /// Forward kinematics: maps a joint vector to CoM position/velocity and
    /// both sole poses. Velocity is obtained by finite-differencing against
    /// the previous call's joints (good enough at command rate).
    #[must_use]
    pub fn forward(&self, q: &ModelJointVector, q_dot: &ModelJointVector, _q_ddot: &ModelJointVector) -> ForwardKinematicsResult {
        let description = self.model.description();
        let result = self.model.forward(q);

        const EPS: f64 = 1e-6;
        let q_next = q + q_dot * EPS;
        let result_next = self.model.forward(&q_next);
        let com_velocity = (result_next.com - result.com) / EPS;

        ForwardKinematicsResult {
            com_position: result.com,
            com_velocity,
            left_sole: result.body_transforms[description.left_sole_id],
            right_sole: result.body_transforms[description.right_sole_id],
        }
    }

    /// Runs IK over a full command-rate trajectory, one sample per column,
    /// warm-starting from the previous column's result. Non-convergence on
    /// any sample is recorded but does not stop the trajectory.
    pub fn inverse(&mut self, samples: &[CommandSample]) -> (Vec<IkSample>, WarningKind) {
        let mut results = Vec::with_capacity(samples.len());
        let mut warning = WarningKind::NoWarnings;

        for sample in samples {
            let target = IkTarget {
                com_position: sample.com.position,
                left_sole: sole_isometry(&sample.left_foot),
                right_sole: sole_isometry(&sample.right_foot),
                root_orientation: UnitQuaternion::from_euler_angles(0.0, 0.0, sample.com.yaw),
            };

            let outcome = self.ik.inverse(&target);
            if !outcome.converged {
                warning = WarningKind::IkDidNotConverge;
            }

            let q = self.ik.current_joints();
            results.push(IkSample {
                q,
                actuated: actuated_subset(&q),
                converged: outcome.converged,
            });
        }

        (results, warning)
    }

    #[must_use]
    pub fn model(&self) -> &KinematicModel {
        &self.model
    }
}

fn sole_isometry(pose: &crate::types::PoseSample) -> Isometry3<f64> {
    Isometry3::from_parts(
        nalgebra::Translation3::from(pose.position),
        UnitQuaternion::from_euler_angles(0.0, 0.0, pose.yaw),
    )
}

/// Extracts the last 15 DoF (torso + both legs) from the full 21-DoF model vector.
#[must_use]
pub fn actuated_subset(q: &ModelJointVector) -> ActuatedJointVector {
    let mut actuated = ActuatedJointVector::zeros();
    let offset = q.len() - NUM_ACTUATED_JOINTS;
    for i in 0..NUM_ACTUATED_JOINTS {
        actuated[i] = q[offset + i];
    }
    actuated
}
