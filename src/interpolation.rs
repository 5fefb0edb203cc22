//! Upsamples the preview-horizon plan to command-rate trajectories (C3).

use nalgebra::{DMatrix, DVector, Vector3};
use tracing::instrument;

use crate::config::PatternGeneratorConfig;
use crate::pattern_generator::base::AxisState;
use crate::types::{Foot, PlanarPose, PoseSample};

/// One command-rate sample: CoM pose, ZMP, and both foot poses.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CommandSample {
    pub com: PoseSample,
    pub zmp: Vector3<f64>,
    pub left_foot: PoseSample,
    pub right_foot: PoseSample,
}

/// Which swing sub-interval a single-support sample falls in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SwingPhase {
    LiftOff,
    Motion,
    DropDown,
}

/// Calling policy for [`Interpolator::interpolate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpolationMode {
    /// Fill one command cycle's worth of samples, advancing the rolling pointer.
    PerTick,
    /// Fill the entire horizon buffer from scratch, stepping through each
    /// preview step's own jerk, support foot, and swing target.
    WholeHorizon,
}

/// One preview step's worth of interpolation input, as consumed by
/// [`InterpolationMode::WholeHorizon`] (one entry per preview step) or
/// [`InterpolationMode::PerTick`] (exactly one entry).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HorizonStep {
    pub jerk_x: f64,
    pub jerk_y: f64,
    pub support: Foot,
    pub support_foot_pose: PlanarPose,
    pub swing_start: PoseSample,
    pub landing: PlanarPose,
    pub time_into_step: f64,
    pub step_duration: f64,
}

pub struct Interpolator {
    config: PatternGeneratorConfig,
    intervals: usize,
    current_interval: usize,
    buffer: Vec<CommandSample>,
    com_x: AxisState,
    com_y: AxisState,
}

impl Interpolator {
    #[must_use]
    pub fn new(config: PatternGeneratorConfig) -> Self {
        let intervals = (config.t / config.t_c).round().max(1.0) as usize;
        Self {
            config,
            intervals,
            current_interval: 0,
            buffer: Vec::new(),
            com_x: AxisState::zeros(),
            com_y: AxisState::zeros(),
        }
    }

    #[must_use]
    pub fn intervals(&self) -> usize {
        self.intervals
    }

    #[must_use]
    pub fn current_interval(&self) -> usize {
        self.current_interval
    }

    /// True at the instant a new preview tick begins, i.e. when the rolling
    /// command-rate pointer wraps back to the start of a preview period.
    #[must_use]
    pub fn at_preview_boundary(&self) -> bool {
        self.current_interval % self.intervals == 0
    }

    #[must_use]
    pub fn buffer(&self) -> &[CommandSample] {
        &self.buffer
    }

    /// Upsamples the given preview-horizon plan into command-rate samples,
    /// per the selected calling mode. `PerTick` consumes exactly one
    /// [`HorizonStep`] and appends one sample to the rolling buffer, which
    /// is kept capped at `intervals` entries. `WholeHorizon` consumes one
    /// `HorizonStep` per preview step and refills the buffer from scratch,
    /// `intervals` command-rate samples per step.
    #[instrument(skip_all)]
    pub fn interpolate(&mut self, mode: InterpolationMode, steps: &[HorizonStep]) {
        match mode {
            InterpolationMode::PerTick => {
                let Some(step) = steps.first() else { return };
                let sample = self.sample_from_step(step);
                self.buffer.push(sample);
                if self.buffer.len() > self.intervals {
                    self.buffer.remove(0);
                }
                self.current_interval = (self.current_interval + 1) % self.intervals;
            }
            InterpolationMode::WholeHorizon => {
                self.buffer.clear();
                self.current_interval = 0;
                let t_c = self.config.t_c;
                for step in steps {
                    for k in 0..self.intervals {
                        // Hold this preview step's jerk/support/landing fixed
                        // but advance the swing-phase clock through its
                        // command-rate sub-intervals.
                        let mut sub_step = *step;
                        sub_step.time_into_step = step.time_into_step + k as f64 * t_c;
                        let sample = self.sample_from_step(&sub_step);
                        self.buffer.push(sample);
                        self.current_interval = (self.current_interval + 1) % self.intervals;
                    }
                }
            }
        }
    }

    fn sample_from_step(&mut self, step: &HorizonStep) -> CommandSample {
        self.sample_one_tick(
            step.jerk_x,
            step.jerk_y,
            step.support,
            step.support_foot_pose,
            step.swing_start,
            step.landing,
            step.time_into_step,
            step.step_duration,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn sample_one_tick(
        &mut self,
        jerk_x: f64,
        jerk_y: f64,
        support: Foot,
        support_foot_pose: PlanarPose,
        swing_start: PoseSample,
        landing: PlanarPose,
        time_into_step: f64,
        step_duration: f64,
    ) -> CommandSample {
        let t_c = self.config.t_c;
        let a = Self::lipm_a(t_c);
        let b = Self::lipm_b(t_c);

        self.com_x = a * self.com_x + b * jerk_x;
        self.com_y = a * self.com_y + b * jerk_y;

        let zmp_x = self.com_x[0] - (self.config.h_com / self.config.g) * self.com_x[2];
        let zmp_y = self.com_y[0] - (self.config.h_com / self.config.g) * self.com_y[2];

        let swing_pose = swing_foot_pose(
            &self.config,
            swing_start,
            landing,
            time_into_step,
            step_duration,
        );

        let support_pose = PoseSample::at_rest(
            Vector3::new(support_foot_pose.x, support_foot_pose.y, 0.0),
            support_foot_pose.yaw,
        );

        let (left_foot, right_foot) = match support {
            Foot::Left => (support_pose, swing_pose),
            Foot::Right => (swing_pose, support_pose),
        };

        let com_yaw = left_foot.yaw.max(right_foot.yaw);

        let com = PoseSample {
            position: Vector3::new(self.com_x[0], self.com_y[0], self.config.h_com),
            yaw: com_yaw,
            velocity: Vector3::new(self.com_x[1], self.com_y[1], 0.0),
            yaw_rate: 0.0,
            acceleration: Vector3::new(self.com_x[2], self.com_y[2], 0.0),
            yaw_accel: 0.0,
        };

        CommandSample {
            com,
            zmp: Vector3::new(zmp_x, zmp_y, 0.0),
            left_foot,
            right_foot,
        }
    }

    fn lipm_a(t_c: f64) -> nalgebra::Matrix3<f64> {
        nalgebra::Matrix3::new(1.0, t_c, t_c * t_c / 2.0, 0.0, 1.0, t_c, 0.0, 0.0, 1.0)
    }

    fn lipm_b(t_c: f64) -> AxisState {
        AxisState::new(t_c * t_c * t_c / 6.0, t_c * t_c / 2.0, t_c)
    }
}

fn swing_foot_phase(time_into_step: f64, step_duration: f64) -> SwingPhase {
    let transition = 0.05 * step_duration;
    if time_into_step < transition {
        SwingPhase::LiftOff
    } else if time_into_step > step_duration - transition {
        SwingPhase::DropDown
    } else {
        SwingPhase::Motion
    }
}

fn swing_foot_pose(
    config: &PatternGeneratorConfig,
    start: PoseSample,
    landing: PlanarPose,
    time_into_step: f64,
    step_duration: f64,
) -> PoseSample {
    let phase = swing_foot_phase(time_into_step, step_duration);
    let transition = 0.05 * step_duration;
    let motion_duration = (step_duration - 2.0 * transition).max(1e-6);
    let motion_time = (time_into_step - transition).clamp(0.0, motion_duration);

    match phase {
        SwingPhase::LiftOff => PoseSample::at_rest(start.position, start.yaw),
        SwingPhase::DropDown => PoseSample::at_rest(
            Vector3::new(landing.x, landing.y, 0.0),
            landing.yaw,
        ),
        SwingPhase::Motion => {
            let x = quintic(start.position.x, start.velocity.x, start.acceleration.x, landing.x, 0.0, 0.0, motion_time, motion_duration);
            let y = quintic(start.position.y, start.velocity.y, start.acceleration.y, landing.y, 0.0, 0.0, motion_time, motion_duration);
            let yaw = quintic(start.yaw, start.yaw_rate, start.yaw_accel, landing.yaw, 0.0, 0.0, motion_time, motion_duration);
            let z = quartic_swing_height(config.step_height, motion_time, motion_duration);

            PoseSample {
                position: Vector3::new(x.0, y.0, z.0),
                yaw: yaw.0,
                velocity: Vector3::new(x.1, y.1, z.1),
                yaw_rate: yaw.1,
                acceleration: Vector3::new(x.2, y.2, z.2),
                yaw_accel: yaw.2,
            }
        }
    }
}

/// Evaluates the quintic polynomial through boundary conditions
/// `(pos0,vel0,acc0)` at `t=0` and `(pos1,vel1,acc1)` at `t=duration`, at
/// time `t`, returning `(pos, vel, acc)`.
#[allow(clippy::too_many_arguments)]
fn quintic(pos0: f64, vel0: f64, acc0: f64, pos1: f64, vel1: f64, acc1: f64, t: f64, duration: f64) -> (f64, f64, f64) {
    if duration <= 0.0 {
        return (pos1, vel1, acc1);
    }
    let coeffs = fit_polynomial(
        5,
        &[
            (0.0, 0, pos0),
            (0.0, 1, vel0),
            (0.0, 2, acc0),
            (duration, 0, pos1),
            (duration, 1, vel1),
            (duration, 2, acc1),
        ],
    );
    (
        eval_polynomial(&coeffs, t, 0),
        eval_polynomial(&coeffs, t, 1),
        eval_polynomial(&coeffs, t, 2),
    )
}

/// Evaluates the quartic z profile: starts at `z=0, ż=0`, reaches
/// `step_height` with zero velocity at the swing midpoint, and returns to
/// `z=0, ż=0` at the end of the motion phase.
fn quartic_swing_height(step_height: f64, t: f64, duration: f64) -> (f64, f64, f64) {
    if duration <= 0.0 {
        return (0.0, 0.0, 0.0);
    }
    let mid = duration / 2.0;
    let coeffs = fit_polynomial(
        4,
        &[
            (0.0, 0, 0.0),
            (0.0, 1, 0.0),
            (mid, 0, step_height),
            (mid, 1, 0.0),
            (duration, 0, 0.0),
        ],
    );
    (
        eval_polynomial(&coeffs, t, 0),
        eval_polynomial(&coeffs, t, 1),
        eval_polynomial(&coeffs, t, 2),
    )
}

/// Fits a polynomial of the given `degree` to `constraints` of
/// `(time, derivative_order, value)`, one constraint per coefficient.
fn fit_polynomial(degree: usize, constraints: &[(f64, usize, f64)]) -> DVector<f64> {
    let n = degree + 1;
    assert_eq!(constraints.len(), n, "need exactly one constraint per coefficient");

    let mut a = DMatrix::<f64>::zeros(n, n);
    let mut rhs = DVector::<f64>::zeros(n);

    for (row, &(t, order, value)) in constraints.iter().enumerate() {
        for k in 0..n {
            a[(row, k)] = monomial_derivative(k, order, t);
        }
        rhs[row] = value;
    }

    a.lu().solve(&rhs).expect("polynomial boundary system is well-posed")
}

fn eval_polynomial(coeffs: &DVector<f64>, t: f64, order: usize) -> f64 {
    (0..coeffs.len())
        .map(|k| monomial_derivative(k, order, t) * coeffs[k])
        .sum()
}

/// `d^order/dt^order [t^k]` evaluated at `t`.
fn monomial_derivative(k: usize, order: usize, t: f64) -> f64 {
    if order > k {
        return 0.0;
    }
    let mut coefficient = 1.0;
    for i in 0..order {
        coefficient *= (k - i) as f64;
    }
    coefficient * t.powi((k - order) as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn quintic_matches_boundary_conditions() {
        let (pos, vel, acc) = quintic(0.0, 0.0, 0.0, 0.1, 0.0, 0.0, 0.0, 0.5);
        assert_relative_eq!(pos, 0.0, epsilon = 1e-9);
        assert_relative_eq!(vel, 0.0, epsilon = 1e-9);
        assert_relative_eq!(acc, 0.0, epsilon = 1e-9);

        let (pos, vel, acc) = quintic(0.0, 0.0, 0.0, 0.1, 0.0, 0.0, 0.5, 0.5);
        assert_relative_eq!(pos, 0.1, epsilon = 1e-9);
        assert_relative_eq!(vel, 0.0, epsilon = 1e-6);
        assert_relative_eq!(acc, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn quartic_returns_to_ground_at_heel_strike() {
        let (z_start, _, _) = quartic_swing_height(0.02, 0.0, 0.4);
        let (z_end, zdot_end, _) = quartic_swing_height(0.02, 0.4, 0.4);
        assert_relative_eq!(z_start, 0.0, epsilon = 1e-9);
        assert_relative_eq!(z_end, 0.0, epsilon = 1e-6);
        assert_relative_eq!(zdot_end, 0.0, epsilon = 1e-6);

        let (z_mid, zdot_mid, _) = quartic_swing_height(0.02, 0.2, 0.4);
        assert_relative_eq!(z_mid, 0.02, epsilon = 1e-9);
        assert_relative_eq!(zdot_mid, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn lipm_relation_holds_for_every_sample() {
        let config = PatternGeneratorConfig::default();
        let mut interpolator = Interpolator::new(config.clone());
        let sample = interpolator.sample_one_tick(
            0.01,
            0.0,
            Foot::Left,
            PlanarPose::default(),
            PoseSample::default(),
            PlanarPose { x: 0.1, y: 0.0, yaw: 0.0 },
            0.1,
            0.8,
        );
        let expected_zmp = sample.com.position.x - (config.h_com / config.g) * sample.com.acceleration.x;
        assert_relative_eq!(sample.zmp.x, expected_zmp, epsilon = 1e-9);
    }

    #[test]
    fn per_tick_buffer_stays_capped_at_intervals() {
        let config = PatternGeneratorConfig::default();
        let mut interpolator = Interpolator::new(config);
        let step = HorizonStep {
            jerk_x: 0.0,
            jerk_y: 0.0,
            support: Foot::Left,
            support_foot_pose: PlanarPose::default(),
            swing_start: PoseSample::default(),
            landing: PlanarPose { x: 0.1, y: 0.0, yaw: 0.0 },
            time_into_step: 0.1,
            step_duration: 0.8,
        };
        for _ in 0..10 * interpolator.intervals() {
            interpolator.interpolate(InterpolationMode::PerTick, std::slice::from_ref(&step));
            assert!(interpolator.buffer().len() <= interpolator.intervals());
        }
    }

    #[test]
    fn whole_horizon_fills_intervals_per_step_from_distinct_inputs() {
        let config = PatternGeneratorConfig::default();
        let mut interpolator = Interpolator::new(config);
        let steps = vec![
            HorizonStep {
                jerk_x: 0.01,
                jerk_y: 0.0,
                support: Foot::Left,
                support_foot_pose: PlanarPose::default(),
                swing_start: PoseSample::default(),
                landing: PlanarPose { x: 0.1, y: 0.0, yaw: 0.0 },
                time_into_step: 0.0,
                step_duration: 0.8,
            },
            HorizonStep {
                jerk_x: -0.01,
                jerk_y: 0.0,
                support: Foot::Right,
                support_foot_pose: PlanarPose { x: 0.1, y: 0.0, yaw: 0.0 },
                swing_start: PoseSample::at_rest(Vector3::new(0.0, 0.0, 0.0), 0.0),
                landing: PlanarPose { x: 0.2, y: 0.0, yaw: 0.0 },
                time_into_step: 0.0,
                step_duration: 0.8,
            },
        ];
        interpolator.interpolate(InterpolationMode::WholeHorizon, &steps);
        assert_eq!(interpolator.buffer().len(), 2 * interpolator.intervals());
        let first_step_last = interpolator.buffer()[interpolator.intervals() - 1];
        let second_step_first = interpolator.buffer()[interpolator.intervals()];
        assert_ne!(first_step_last.left_foot.position, second_step_first.left_foot.position);
    }
}
