//! Configuration structs for each subsystem.
//!
//! Loading (file discovery, overlay merging) is out of scope; these are
//! plain `serde`-derived structs constructed directly by callers and tests.

use serde::{Deserialize, Serialize};

/// Configuration for the preview-horizon pattern generator (C1/C2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternGeneratorConfig {
    /// Preview sample period `T`, seconds.
    pub t: f64,
    /// Command period `T_c`, seconds.
    pub t_c: f64,
    /// Preview horizon length `N`, in preview samples.
    pub n: usize,
    /// Number of foot-position decision variables in the horizon.
    pub n_foot_positions: usize,
    /// CoM height above the ground, meters.
    pub h_com: f64,
    /// Gravitational acceleration, m/s^2.
    pub g: f64,
    /// Nominal single-support step duration, seconds.
    pub t_step: f64,
    /// Double-support duration, seconds.
    pub t_ds: f64,
    /// Jerk regularization weight.
    pub alpha: f64,
    /// Velocity-tracking weight.
    pub beta: f64,
    /// ZMP-reference weight.
    pub gamma: f64,
    /// Foot-yaw-reference weight.
    pub delta: f64,
    /// Half-width/half-depth of the support polygon, meters.
    pub support_polygon: PolygonExtent,
    /// Half-width/half-depth of the kinematic reachability polygon, meters.
    pub reachability_polygon: PolygonExtent,
    /// Security margin shrinking the support polygon, meters.
    pub security_margin: (f64, f64),
    /// Max yaw change per footstep, radians.
    pub max_step_yaw: f64,
    /// Maximum sequential-QP refinement iterations for `F_q`.
    pub max_sqp_iterations: usize,
    /// Apex height of the swing-foot z profile, meters.
    pub step_height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolygonExtent {
    pub half_width: f64,
    pub half_depth: f64,
}

impl Default for PatternGeneratorConfig {
    fn default() -> Self {
        Self {
            t: 0.1,
            t_c: 0.01,
            n: 16,
            n_foot_positions: 2,
            h_com: 0.814,
            g: 9.81,
            t_step: 0.8,
            t_ds: 0.1,
            alpha: 1e-6,
            beta: 1.0,
            gamma: 1e-6,
            delta: 1e-6,
            support_polygon: PolygonExtent {
                half_width: 0.07,
                half_depth: 0.03,
            },
            reachability_polygon: PolygonExtent {
                half_width: 0.15,
                half_depth: 0.1,
            },
            security_margin: (0.02, 0.02),
            max_step_yaw: 0.3,
            max_sqp_iterations: 3,
            step_height: 0.02,
        }
    }
}

/// Configuration for whole-body inverse kinematics (C4).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KinematicsConfig {
    /// Path to the rigid-body description file.
    pub model_path: String,
    /// Convergence tolerance on `||Δq||`.
    pub step_tol: f64,
    /// Damping factor `λ` in `(JᵀJ + λ²I) Δq = Jᵀ err`.
    pub lambda: f64,
    /// Maximum Gauss-Newton iterations per sample.
    pub num_steps: usize,
    /// Number of unconstrained warm-up iterations on the first call.
    pub n_init: usize,
    /// CoM body-point offset relative to the chest body.
    pub com_body_point: nalgebra::Vector3<f64>,
    /// Left-foot body-point offset relative to the left sole body.
    pub left_foot_body_point: nalgebra::Vector3<f64>,
    /// Right-foot body-point offset relative to the right sole body.
    pub right_foot_body_point: nalgebra::Vector3<f64>,
}

impl Default for KinematicsConfig {
    fn default() -> Self {
        Self {
            model_path: "config/model.toml".into(),
            step_tol: 1e-6,
            lambda: 1e-3,
            num_steps: 50,
            n_init: 10,
            com_body_point: nalgebra::Vector3::zeros(),
            left_foot_body_point: nalgebra::Vector3::zeros(),
            right_foot_body_point: nalgebra::Vector3::zeros(),
        }
    }
}

/// Interface-only description of the robot-bus I/O (out of scope to implement).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IoConfig {
    pub parts: Vec<String>,
    pub joint_indices: Vec<usize>,
    pub joint_port_name: String,
    pub camera_parts: Vec<String>,
}
