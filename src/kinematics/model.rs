//! The immutable rigid-body kinematic tree: 6 floating-base DoF followed by
//! 15 actuated torso/leg joints, built once from a [`ModelDescription`].

use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::ModelLoadError;
use crate::types::{ModelJointVector, NUM_MODEL_DOF};

/// How a single joint's DoF contributes to its body's transform relative to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum JointAxis {
    LinearX,
    LinearY,
    LinearZ,
    RotX,
    RotY,
    RotZ,
}

impl JointAxis {
    fn local_transform(self, value: f64) -> Isometry3<f64> {
        match self {
            JointAxis::LinearX => Isometry3::translation(value, 0.0, 0.0),
            JointAxis::LinearY => Isometry3::translation(0.0, value, 0.0),
            JointAxis::LinearZ => Isometry3::translation(0.0, 0.0, value),
            JointAxis::RotX => Isometry3::rotation(Vector3::x() * value),
            JointAxis::RotY => Isometry3::rotation(Vector3::y() * value),
            JointAxis::RotZ => Isometry3::rotation(Vector3::z() * value),
        }
    }
}

/// A single body in the tree: a fixed offset from its parent body's frame,
/// followed by one joint DoF.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodySpec {
    pub name: String,
    pub parent: Option<usize>,
    pub offset_from_parent: Vector3<f64>,
    pub axis: JointAxis,
    pub mass: f64,
    pub local_com: Vector3<f64>,
    pub joint_min: f64,
    pub joint_max: f64,
}

/// The on-disk description of a kinematic tree (loading it from a file is
/// out of scope; this is the in-memory shape callers construct directly).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescription {
    pub bodies: Vec<BodySpec>,
    pub com_id: usize,
    pub chest_id: usize,
    pub root_id: usize,
    pub left_sole_id: usize,
    pub right_sole_id: usize,
}

/// Result of a forward-kinematics evaluation: every body's world transform,
/// plus the mass-weighted center of mass.
#[derive(Debug, Clone)]
pub struct ForwardResult {
    pub body_transforms: Vec<Isometry3<f64>>,
    pub com: Vector3<f64>,
}

/// The immutable rigid-body tree.
#[derive(Debug, Clone)]
pub struct KinematicModel {
    description: ModelDescription,
}

impl KinematicModel {
    pub fn new(description: ModelDescription) -> Result<Self, ModelLoadError> {
        if description.bodies.len() != NUM_MODEL_DOF {
            return Err(ModelLoadError::BodyJointMismatch {
                bodies: description.bodies.len(),
                joints: NUM_MODEL_DOF,
            });
        }
        for (index, body) in description.bodies.iter().enumerate() {
            if let Some(parent) = body.parent {
                if parent >= index {
                    return Err(ModelLoadError::DanglingJoint(index));
                }
            }
        }
        Ok(Self { description })
    }

    #[must_use]
    pub fn description(&self) -> &ModelDescription {
        &self.description
    }

    #[must_use]
    pub fn total_mass(&self) -> f64 {
        self.description.bodies.iter().map(|body| body.mass).sum()
    }

    /// Composes every body's world transform from the joint vector, and the
    /// mass-weighted center of mass.
    #[must_use]
    pub fn forward(&self, q: &ModelJointVector) -> ForwardResult {
        let mut transforms = Vec::with_capacity(self.description.bodies.len());

        for (index, body) in self.description.bodies.iter().enumerate() {
            let parent_transform = body
                .parent
                .map_or_else(Isometry3::identity, |parent| transforms[parent]);
            let offset = Isometry3::from_parts(Translation3::from(body.offset_from_parent), UnitQuaternion::identity());
            let joint = body.axis.local_transform(q[index]);
            transforms.push(parent_transform * offset * joint);
        }

        let total_mass = self.total_mass().max(f64::EPSILON);
        let com = self
            .description
            .bodies
            .iter()
            .zip(transforms.iter())
            .map(|(body, transform)| (transform * body.local_com) * body.mass)
            .fold(Vector3::zeros(), |acc, contribution| acc + contribution)
            / total_mass;

        ForwardResult {
            body_transforms: transforms,
            com,
        }
    }

    #[must_use]
    pub fn joint_limits(&self) -> (ModelJointVector, ModelJointVector) {
        let mut min = ModelJointVector::zeros();
        let mut max = ModelJointVector::zeros();
        for (index, body) in self.description.bodies.iter().enumerate() {
            min[index] = body.joint_min;
            max[index] = body.joint_max;
        }
        (min, max)
    }

    /// A reasonable default tree matching the spec's 6 floating-base + torso(3)
    /// + left-leg(6) + right-leg(6) layout.
    #[must_use]
    pub fn default_biped() -> Self {
        let joint = |name: &str, parent: Option<usize>, offset: Vector3<f64>, axis: JointAxis, mass: f64, local_com: Vector3<f64>| {
            BodySpec {
                name: name.to_string(),
                parent,
                offset_from_parent: offset,
                axis,
                mass,
                local_com,
                joint_min: -2.5,
                joint_max: 2.5,
            }
        };

        let z = Vector3::zeros();
        let mut bodies = vec![
            joint("floating_x", None, z, JointAxis::LinearX, 0.0, z),
            joint("floating_y", Some(0), z, JointAxis::LinearY, 0.0, z),
            joint("floating_z", Some(1), z, JointAxis::LinearZ, 0.0, z),
            joint("floating_yaw", Some(2), z, JointAxis::RotZ, 0.0, z),
            joint("floating_pitch", Some(3), z, JointAxis::RotY, 0.0, z),
            joint("root_link", Some(4), z, JointAxis::RotX, 5.0, Vector3::new(0.0, 0.0, 0.05)),
        ];
        let root_id = bodies.len() - 1;

        bodies.push(joint("waist_yaw", Some(root_id), Vector3::new(0.0, 0.0, 0.1), JointAxis::RotZ, 2.0, z));
        bodies.push(joint("waist_roll", Some(root_id + 1), z, JointAxis::RotX, 2.0, z));
        bodies.push(joint("chest", Some(root_id + 2), z, JointAxis::RotY, 8.0, Vector3::new(0.0, 0.0, 0.15)));
        let chest_id = bodies.len() - 1;

        let mut leg = |prefix: &str, hip_offset: Vector3<f64>| {
            let base = bodies.len();
            bodies.push(joint(&format!("{prefix}_hip_yaw"), Some(chest_id), hip_offset, JointAxis::RotZ, 1.0, z));
            bodies.push(joint(&format!("{prefix}_hip_roll"), Some(base), z, JointAxis::RotX, 1.0, z));
            bodies.push(joint(&format!("{prefix}_hip_pitch"), Some(base + 1), z, JointAxis::RotY, 2.0, Vector3::new(0.0, 0.0, -0.1)));
            bodies.push(joint(&format!("{prefix}_knee"), Some(base + 2), Vector3::new(0.0, 0.0, -0.3), JointAxis::RotY, 1.5, Vector3::new(0.0, 0.0, -0.1)));
            bodies.push(joint(&format!("{prefix}_ankle_pitch"), Some(base + 3), Vector3::new(0.0, 0.0, -0.3), JointAxis::RotY, 0.5, z));
            bodies.push(joint(&format!("{prefix}_ankle_roll"), Some(base + 4), z, JointAxis::RotX, 0.3, Vector3::new(0.0, 0.0, -0.05)));
            bodies.len() - 1
        };

        let left_sole_id = leg("left", Vector3::new(0.0, 0.08, 0.0));
        let right_sole_id = leg("right", Vector3::new(0.0, -0.08, 0.0));

        let description = ModelDescription {
            bodies,
            com_id: chest_id,
            chest_id,
            root_id,
            left_sole_id,
            right_sole_id,
        };

        Self::new(description).expect("built-in default model is well-formed")
    }
}
