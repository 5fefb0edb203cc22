pub mod config;
pub mod error;
pub mod interpolation;
pub mod kinematics;
pub mod pattern_generator;
pub mod types;
pub mod walking_loop;

pub use error::{Result, WalkingError};

/// Commonly needed types and traits for building on top of the walking core.
pub mod prelude {
    pub use crate::config::{KinematicsConfig, PatternGeneratorConfig};
    pub use crate::error::{Result, WalkingError, WarningKind};
    pub use crate::types::{Foot, PlanarPose, RobotStatus, VelocityReference};
    pub use crate::walking_loop::{TickOutput, WalkingLoop, WalkingLoopPlugin};
}
