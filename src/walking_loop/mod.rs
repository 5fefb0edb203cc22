//! Glues C2 → C3 → C4 into the closed control loop, performs feedback
//! embedding, enforces hardware limits, and reports typed errors (C5).

use bevy::prelude::*;
use nalgebra::Vector3;
use tracing::{error, info, instrument, warn};

use crate::config::{KinematicsConfig, PatternGeneratorConfig};
use crate::error::{Result, WalkingError, WarningKind};
use crate::interpolation::{CommandSample, HorizonStep, InterpolationMode, Interpolator};
use crate::kinematics::{actuated_subset, IkTarget, Kinematics, KinematicModel};
use crate::pattern_generator::NmpcGenerator;
use crate::types::{ActuatedJointVector, Foot, ModelJointVector, PlanarPose, PoseSample, RobotStatus, VelocityReference};

mod schedule;
pub use schedule::{LatestTickOutput, MeasuredJoints, VelocityCommand, WalkingLoopPlugin};

/// The hard-coded crouched seed pose (radians) published while `NOT_INITIALIZED`.
#[must_use]
pub fn seed_pose() -> ModelJointVector {
    let mut q = ModelJointVector::zeros();
    q[2] = 0.6;
    q[6] = 0.54;
    q[9] = -0.57;
    q[10] = -0.23;
    q[12] = 0.54;
    q[15] = -0.57;
    q[16] = -0.23;
    q
}

/// Result of a single control tick.
#[derive(Debug, Clone)]
pub struct TickOutput {
    pub q_traj: Vec<ActuatedJointVector>,
    pub warning: WarningKind,
}

/// Owns the three core components and the command-tick state machine.
#[derive(Resource)]
pub struct WalkingLoop {
    pattern_generator: NmpcGenerator,
    interpolator: Interpolator,
    kinematics: Kinematics,
    status: RobotStatus,
    last_velocity: VelocityReference,
    q_min: ActuatedJointVector,
    q_max: ActuatedJointVector,
    last_error: Option<WalkingError>,
    swing_start: PoseSample,
    time_into_step: f64,
}

impl WalkingLoop {
    #[must_use]
    pub fn new(pg_config: PatternGeneratorConfig, ik_config: KinematicsConfig) -> Self {
        let model = KinematicModel::default_biped();
        let (q_min_full, q_max_full) = model.joint_limits();
        let q_min = actuated_subset(&q_min_full);
        let q_max = actuated_subset(&q_max_full);

        let support_foot_pose = PlanarPose {
            x: 0.0,
            y: -0.05,
            yaw: 0.0,
        };

        Self {
            pattern_generator: NmpcGenerator::new(pg_config.clone(), Foot::Right, support_foot_pose),
            interpolator: Interpolator::new(pg_config),
            kinematics: Kinematics::new(model, ik_config),
            status: RobotStatus::NotConnected,
            last_velocity: VelocityReference::default(),
            q_min,
            q_max,
            last_error: None,
            swing_start: PoseSample::at_rest(Vector3::new(0.0, 0.05, 0.0), 0.0),
            time_into_step: 0.0,
        }
    }

    #[must_use]
    pub fn status(&self) -> RobotStatus {
        self.status
    }

    #[must_use]
    pub fn last_error(&self) -> Option<&WalkingError> {
        self.last_error.as_ref()
    }

    pub fn connect(&mut self) {
        if self.status == RobotStatus::NotConnected {
            self.status = RobotStatus::NotInitialized;
        }
    }

    pub fn begin_initializing(&mut self) {
        if self.status == RobotStatus::NotInitialized {
            self.status = RobotStatus::Initializing;
        }
    }

    pub fn finish_initializing(&mut self) {
        if self.status == RobotStatus::Initializing {
            self.status = RobotStatus::Initialized;
            info!("walking loop initialized");
        }
    }

    /// Broadcast emergency stop: zero the velocity reference, drop to
    /// `NOT_INITIALIZED`. Non-destructive — the robot remains in its last
    /// published pose.
    pub fn emergency_stop(&mut self) {
        self.last_velocity = VelocityReference::default();
        self.status = RobotStatus::NotInitialized;
        warn!("emergency stop engaged");
    }

    /// Runs one command tick. While `NOT_INITIALIZED`, runs IK once against
    /// the seed pose. While `INITIALIZED`, runs the full C2→C3→C4 pipeline.
    #[instrument(skip_all)]
    pub fn tick(&mut self, measured_q: Option<ModelJointVector>, velocity: Option<VelocityReference>) -> Result<TickOutput> {
        match self.status {
            RobotStatus::Initialized => self.tick_walking(measured_q, velocity),
            RobotStatus::NotInitialized => Ok(self.tick_seed_pose()),
            _ => Ok(TickOutput {
                q_traj: Vec::new(),
                warning: WarningKind::NoWarnings,
            }),
        }
    }

    fn tick_seed_pose(&mut self) -> TickOutput {
        let seed = seed_pose();
        let forward = self.kinematics.model().forward(&seed);
        let description = self.kinematics.model().description();

        let target = IkTarget {
            com_position: forward.com,
            left_sole: forward.body_transforms[description.left_sole_id],
            right_sole: forward.body_transforms[description.right_sole_id],
            root_orientation: nalgebra::UnitQuaternion::identity(),
        };
        let sample = CommandSample {
            com: PoseSample::at_rest(target.com_position, 0.0),
            zmp: target.com_position,
            left_foot: PoseSample::at_rest(target.left_sole.translation.vector, 0.0),
            right_foot: PoseSample::at_rest(target.right_sole.translation.vector, 0.0),
        };
        let (samples, warning) = self.kinematics.inverse(std::slice::from_ref(&sample));
        let q_traj = samples.into_iter().map(|sample| sample.actuated).collect();
        TickOutput { q_traj, warning }
    }

    fn tick_walking(&mut self, measured_q: Option<ModelJointVector>, velocity: Option<VelocityReference>) -> Result<TickOutput> {
        // 1. Read latest velocity reference (retain previous if absent).
        if let Some(velocity) = velocity {
            self.last_velocity = velocity;
        } else {
            warn!("missing velocity reference, retaining previous");
        }
        self.pattern_generator.set_velocity_reference(self.last_velocity);

        // 2. Compute measured CoM via forward kinematics, if joints were read.
        let measured_com = measured_q.map(|q| {
            let zero = ModelJointVector::zeros();
            self.kinematics.forward(&q, &zero, &zero)
        });

        // 3. At a preview-tick boundary: inject feedback, solve, simulate, update.
        if self.interpolator.at_preview_boundary() {
            let mut state = self.pattern_generator.base().current_state();
            if let Some(measured) = measured_com {
                state.com_x[0] = measured.com_position.x;
                state.com_y[0] = measured.com_position.y;
            }
            self.pattern_generator.set_initial_values(&state);
            self.pattern_generator.solve(&state)?;
            self.pattern_generator.simulate();

            let old_support = self.pattern_generator.base().current_support();
            let old_support_pose = self.pattern_generator.base().support_foot_pose();
            self.pattern_generator.update();
            let new_support = self.pattern_generator.base().current_support();

            if new_support != old_support {
                // The foot that was support just became the swing foot,
                // starting from where it was last planted.
                self.swing_start = PoseSample::at_rest(
                    Vector3::new(old_support_pose.x, old_support_pose.y, 0.0),
                    old_support_pose.yaw,
                );
                self.time_into_step = 0.0;
            }
        } else {
            self.time_into_step += self.pattern_generator.base().config().t_c;
        }

        // 4. Produce this tick's command sample.
        let result = self
            .pattern_generator
            .last_result()
            .cloned()
            .ok_or(WalkingError::QpInfeasible)?;
        let state = self.pattern_generator.base().current_state();
        let landing = result
            .foot_x
            .first()
            .zip(result.foot_y.first())
            .zip(result.foot_yaw.first())
            .map(|((x, y), yaw)| PlanarPose { x: *x, y: *y, yaw: *yaw })
            .unwrap_or(state.support_foot);

        let step = HorizonStep {
            jerk_x: result.jerk_x.first().copied().unwrap_or(0.0),
            jerk_y: result.jerk_y.first().copied().unwrap_or(0.0),
            support: state.support,
            support_foot_pose: state.support_foot,
            swing_start: self.swing_start,
            landing,
            time_into_step: self.time_into_step,
            step_duration: self.pattern_generator.base().config().t_step,
        };
        self.interpolator.interpolate(InterpolationMode::PerTick, std::slice::from_ref(&step));

        // 5. Extract CoM and both foot poses; run IK.
        let sample = *self.interpolator.buffer().last().expect("interpolate pushed a sample");
        let (samples, warning) = self.kinematics.inverse(std::slice::from_ref(&sample));
        let q_traj: Vec<ActuatedJointVector> = samples.iter().map(|sample| sample.actuated).collect();

        // 6. Hardware-limit check: OR across joints, any violation is fatal.
        for column in &q_traj {
            for i in 0..column.len() {
                if column[i] < self.q_min[i] || column[i] > self.q_max[i] {
                    self.last_error = Some(WalkingError::HardwareLimits {
                        joint: i,
                        value: column[i],
                        min: self.q_min[i],
                        max: self.q_max[i],
                    });
                    self.status = RobotStatus::NotInitialized;
                    error!(joint = i, value = column[i], "hardware limit violated, halting");
                    return Err(WalkingError::HardwareLimits {
                        joint: i,
                        value: column[i],
                        min: self.q_min[i],
                        max: self.q_max[i],
                    });
                }
            }
        }

        Ok(TickOutput { q_traj, warning })
    }

    #[cfg(test)]
    pub(crate) fn set_joint_limits_for_test(&mut self, min: ActuatedJointVector, max: ActuatedJointVector) {
        self.q_min = min;
        self.q_max = max;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NUM_ACTUATED_JOINTS;

    fn initialized_loop() -> WalkingLoop {
        let mut walking_loop = WalkingLoop::new(PatternGeneratorConfig::default(), KinematicsConfig::default());
        walking_loop.connect();
        walking_loop.begin_initializing();
        walking_loop.finish_initializing();
        walking_loop
    }

    #[test]
    fn status_lifecycle_reaches_initialized() {
        let mut walking_loop = WalkingLoop::new(PatternGeneratorConfig::default(), KinematicsConfig::default());
        assert_eq!(walking_loop.status(), RobotStatus::NotConnected);
        walking_loop.connect();
        assert_eq!(walking_loop.status(), RobotStatus::NotInitialized);
        walking_loop.begin_initializing();
        assert_eq!(walking_loop.status(), RobotStatus::Initializing);
        walking_loop.finish_initializing();
        assert_eq!(walking_loop.status(), RobotStatus::Initialized);
    }

    #[test]
    fn seed_pose_published_while_not_initialized() {
        let mut walking_loop = WalkingLoop::new(PatternGeneratorConfig::default(), KinematicsConfig::default());
        let output = walking_loop.tick(None, None).expect("seed-pose tick never fails");
        assert_eq!(output.q_traj.len(), 1);
        assert_eq!(output.q_traj[0].len(), NUM_ACTUATED_JOINTS);
    }

    /// E1-style: holding a forward+yaw velocity reference for many ticks
    /// never errors and always publishes a full joint column.
    #[test]
    fn walking_for_many_ticks_produces_no_errors() {
        let mut walking_loop = initialized_loop();
        let velocity = VelocityReference {
            vx: 0.1,
            vy: 0.0,
            vyaw: 0.1,
        };
        for _ in 0..200 {
            let output = walking_loop
                .tick(None, Some(velocity))
                .expect("nominal forward walking must not error");
            assert_eq!(output.q_traj.len(), 1);
            assert_eq!(output.q_traj[0].len(), NUM_ACTUATED_JOINTS);
        }
        assert_eq!(walking_loop.status(), RobotStatus::Initialized);
    }

    /// E4: an impossibly tight joint range forces a fatal `HardwareLimits`
    /// error and drops the loop out of `INITIALIZED`.
    #[test]
    fn hardware_limit_violation_halts_loop() {
        let mut walking_loop = initialized_loop();
        let zero = ActuatedJointVector::zeros();
        walking_loop.set_joint_limits_for_test(zero, zero);

        let result = walking_loop.tick(None, Some(VelocityReference::default()));
        assert!(matches!(result, Err(WalkingError::HardwareLimits { .. })));
        assert_eq!(walking_loop.status(), RobotStatus::NotInitialized);
        assert!(walking_loop.last_error().is_some());
    }

    /// Missing velocity reference retains the previous one rather than
    /// erroring or resetting to zero.
    #[test]
    fn missing_velocity_reference_is_tolerated() {
        let mut walking_loop = initialized_loop();
        walking_loop
            .tick(None, Some(VelocityReference { vx: 0.1, vy: 0.0, vyaw: 0.0 }))
            .expect("first tick must succeed");
        let output = walking_loop.tick(None, None).expect("missing velocity reference must not error");
        assert_eq!(output.q_traj[0].len(), NUM_ACTUATED_JOINTS);
    }
}
