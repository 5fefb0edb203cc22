//! Typed error and warning propagation for the walking core.

use thiserror::Error;

/// Fatal conditions that stop motion and force the walking loop into a
/// safe state. Matches `ErrorKind` from the wire-level status enum.
#[derive(Debug, Error, miette::Diagnostic)]
pub enum WalkingError {
    #[error("QP solver reported infeasibility")]
    #[diagnostic(code(biped_gait::qp_infeasible))]
    QpInfeasible,

    #[error("joint {joint} = {value} outside limits [{min}, {max}]")]
    #[diagnostic(code(biped_gait::hardware_limits))]
    HardwareLimits {
        joint: usize,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("failed to load kinematic model")]
    #[diagnostic(code(biped_gait::model_load))]
    ModelLoad(#[source] ModelLoadError),

    #[error("required channel '{0}' is not open")]
    #[diagnostic(code(biped_gait::channel_closed))]
    ChannelClosed(&'static str),
}

/// Errors surfaced while parsing or validating a kinematic model description.
#[derive(Debug, Error, miette::Diagnostic)]
pub enum ModelLoadError {
    #[error("joint {0} has no parent body registered")]
    DanglingJoint(usize),

    #[error("body count does not match joint count: {bodies} bodies, {joints} joints")]
    BodyJointMismatch { bodies: usize, joints: usize },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

/// Non-fatal conditions that are recorded on the tick result rather than
/// propagated as an `Err`. Matches `WarningKind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::Display)]
pub enum WarningKind {
    #[default]
    NoWarnings,
    IkDidNotConverge,
}

pub type Result<T, E = WalkingError> = std::result::Result<T, E>;
