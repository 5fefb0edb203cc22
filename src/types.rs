//! Shared data types: status enums, joint vectors, and support-foot bookkeeping.

use nalgebra::{SVector, Vector3};
use serde::{Deserialize, Serialize};

/// Number of actuated degrees of freedom published on the joint-out channel
/// (torso + both legs). The kinematic model carries 6 additional floating-base
/// DoF ahead of these in its internal joint vector.
pub const NUM_ACTUATED_JOINTS: usize = 15;
/// Total DoF of the kinematic model: 6 floating-base + 15 actuated.
pub const NUM_MODEL_DOF: usize = 21;

pub type ActuatedJointVector = SVector<f64, NUM_ACTUATED_JOINTS>;
pub type ModelJointVector = SVector<f64, NUM_MODEL_DOF>;

/// Lifecycle of the walking loop, mirrored 1:1 on the `/reader/robot_status` channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display, strum::FromRepr)]
#[repr(u8)]
pub enum RobotStatus {
    NotConnected = 0,
    #[default]
    NotInitialized = 1,
    Initializing = 2,
    Initialized = 3,
    Stopping = 4,
}

/// Which foot is currently bearing weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Foot {
    Left,
    Right,
}

impl Foot {
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Foot::Left => Foot::Right,
            Foot::Right => Foot::Left,
        }
    }
}

/// Support phase of the gait, ticking deterministically from preview timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum SupportPhase {
    SingleSupport(Foot),
    DoubleSupport,
}

/// A 2-D pose with yaw, as used for foot landings and CoM planar state.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PlanarPose {
    pub x: f64,
    pub y: f64,
    pub yaw: f64,
}

/// Desired body-frame velocity command: forward, lateral, yaw rate.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VelocityReference {
    pub vx: f64,
    pub vy: f64,
    pub vyaw: f64,
}

/// A full 3-D Cartesian pose and its first two time derivatives, used for the
/// command-rate CoM and foot trajectory samples.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PoseSample {
    pub position: Vector3<f64>,
    pub yaw: f64,
    pub velocity: Vector3<f64>,
    pub yaw_rate: f64,
    pub acceleration: Vector3<f64>,
    pub yaw_accel: f64,
}

impl PoseSample {
    #[must_use]
    pub fn at_rest(position: Vector3<f64>, yaw: f64) -> Self {
        Self {
            position,
            yaw,
            ..Default::default()
        }
    }
}
