//! Preview matrices, LIPM dynamics, and support-phase bookkeeping shared by
//! the NMPC pattern generator.

use nalgebra::{DMatrix, Matrix3, RowVector3, Vector3};

use crate::config::PatternGeneratorConfig;
use crate::types::{Foot, PlanarPose, SupportPhase};

/// One axis (x, y, or yaw) of CoM state: position, velocity, acceleration.
pub type AxisState = Vector3<f64>;

/// The handoff point between ticks: CoM state on both horizontal axes, yaw,
/// CoM height, and the current support foot.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternGeneratorState {
    pub com_x: AxisState,
    pub com_y: AxisState,
    pub com_yaw: AxisState,
    pub h_com: f64,
    pub support_foot: PlanarPose,
    pub support: Foot,
}

impl PatternGeneratorState {
    #[must_use]
    pub fn at_rest(h_com: f64, support_foot: PlanarPose, support: Foot) -> Self {
        Self {
            com_x: Vector3::new(support_foot.x, 0.0, 0.0),
            com_y: Vector3::new(support_foot.y, 0.0, 0.0),
            com_yaw: Vector3::zeros(),
            h_com,
            support_foot,
            support,
        }
    }
}

/// One upcoming landing: which step index in the preview horizon it begins
/// at, and how many horizon steps it spans.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimelineEntry {
    pub phase: SupportPhase,
    /// Number of preview steps remaining in this phase, counted from "now".
    pub steps_remaining: usize,
    /// Index into the foot-landing decision vector this phase belongs to
    /// (`None` for the currently-supported foot, which is not a decision variable).
    pub landing_index: Option<usize>,
}

/// Time-invariant linear machinery of the preview controller: preview
/// matrices, the discretized triple-integrator, and the rolling support
/// timeline.
#[derive(Debug, Clone)]
pub struct BaseGenerator {
    config: PatternGeneratorConfig,

    /// Triple-integrator dynamics at the preview period `T`.
    a: Matrix3<f64>,
    b: Vector3<f64>,
    c_zmp: RowVector3<f64>,

    /// `P_ps[i, :] = e_pos^T A^{i+1}`, position preview from initial state.
    pub p_ps: DMatrix<f64>,
    /// `P_pu[i, j] = e_pos^T A^{i-j} B` (lower triangular), position preview from jerks.
    pub p_pu: DMatrix<f64>,
    pub p_vs: DMatrix<f64>,
    pub p_vu: DMatrix<f64>,
    pub p_zs: DMatrix<f64>,
    pub p_zu: DMatrix<f64>,

    timeline: Vec<TimelineEntry>,
    landings: Vec<PlanarPose>,
    support: Foot,
    support_foot_pose: PlanarPose,
    time_in_phase: f64,

    com_x: AxisState,
    com_y: AxisState,
    com_yaw: AxisState,
}

impl BaseGenerator {
    #[must_use]
    pub fn new(config: PatternGeneratorConfig, initial_support: Foot, support_foot_pose: PlanarPose) -> Self {
        let t = config.t;
        let h = config.h_com;
        let g = config.g;

        let a = Matrix3::new(1.0, t, t * t / 2.0, 0.0, 1.0, t, 0.0, 0.0, 1.0);
        let b = Vector3::new(t * t * t / 6.0, t * t / 2.0, t);
        let c_zmp = RowVector3::new(1.0, 0.0, -h / g);

        let e_pos = RowVector3::new(1.0, 0.0, 0.0);
        let e_vel = RowVector3::new(0.0, 1.0, 0.0);

        let n = config.n;
        let (p_ps, p_pu) = Self::build_preview(n, &a, &b, &e_pos);
        let (p_vs, p_vu) = Self::build_preview(n, &a, &b, &e_vel);
        let (p_zs, p_zu) = Self::build_preview(n, &a, &b, &c_zmp);

        let timeline = Self::initial_timeline(&config);

        Self {
            config,
            a,
            b,
            c_zmp,
            p_ps,
            p_pu,
            p_vs,
            p_vu,
            p_zs,
            p_zu,
            timeline,
            landings: Vec::new(),
            support: initial_support,
            support_foot_pose,
            time_in_phase: 0.0,
            com_x: AxisState::new(support_foot_pose.x, 0.0, 0.0),
            com_y: AxisState::new(support_foot_pose.y, 0.0, 0.0),
            com_yaw: AxisState::zeros(),
        }
    }

    /// Overwrites the internal CoM state directly, e.g. after injecting a
    /// measured CoM at a preview-tick boundary.
    pub fn overwrite_state(&mut self, state: &PatternGeneratorState) {
        self.com_x = state.com_x;
        self.com_y = state.com_y;
        self.com_yaw = state.com_yaw;
        self.support_foot_pose = state.support_foot;
        self.support = state.support;
    }

    /// Applies one jerk per axis, advancing the internal CoM state by one tick.
    pub fn apply_jerk(&mut self, jerk_x: f64, jerk_y: f64) {
        self.com_x = self.simulate_axis(self.com_x, jerk_x);
        self.com_y = self.simulate_axis(self.com_y, jerk_y);
    }

    #[must_use]
    pub fn current_state(&self) -> PatternGeneratorState {
        PatternGeneratorState {
            com_x: self.com_x,
            com_y: self.com_y,
            com_yaw: self.com_yaw,
            h_com: self.config.h_com,
            support_foot: self.support_foot_pose,
            support: self.support,
        }
    }

    fn build_preview(
        n: usize,
        a: &Matrix3<f64>,
        b: &Vector3<f64>,
        c: &RowVector3<f64>,
    ) -> (DMatrix<f64>, DMatrix<f64>) {
        let mut powers = Vec::with_capacity(n + 1);
        powers.push(Matrix3::identity());
        for i in 1..=n {
            powers.push(powers[i - 1] * a);
        }

        let mut p_s = DMatrix::zeros(n, 3);
        for i in 0..n {
            let row = c * powers[i + 1];
            p_s.set_row(i, &row);
        }

        let mut p_u = DMatrix::zeros(n, n);
        for i in 0..n {
            for j in 0..=i {
                let value = (c * powers[i - j] * b)[(0, 0)];
                p_u[(i, j)] = value;
            }
        }

        (p_s, p_u)
    }

    fn initial_timeline(config: &PatternGeneratorConfig) -> Vec<TimelineEntry> {
        let steps_per_ss = (config.t_step / config.t).round() as usize;
        let steps_per_ds = (config.t_ds / config.t).round().max(1.0) as usize;

        let mut timeline = Vec::with_capacity(config.n);
        // The horizon starts mid-stance on the already-placed support foot;
        // that foot is a known constant, not a decision variable, until the
        // swing in progress lands and a landing index is assigned.
        let mut landing_index: Option<usize> = None;
        let mut remaining_ss = steps_per_ss;
        let mut remaining_ds = steps_per_ds;
        let mut in_ds = false;

        for _ in 0..config.n {
            if in_ds {
                timeline.push(TimelineEntry {
                    phase: SupportPhase::DoubleSupport,
                    steps_remaining: remaining_ds,
                    landing_index,
                });
                remaining_ds -= 1;
                if remaining_ds == 0 {
                    in_ds = false;
                    remaining_ss = steps_per_ss;
                }
            } else {
                timeline.push(TimelineEntry {
                    phase: SupportPhase::SingleSupport(Foot::Left),
                    steps_remaining: remaining_ss,
                    landing_index,
                });
                remaining_ss -= 1;
                if remaining_ss == 0 {
                    in_ds = true;
                    remaining_ds = steps_per_ds;
                    landing_index = Some(landing_index.map_or(0, |i| i + 1));
                }
            }
        }

        timeline
    }

    #[must_use]
    pub fn timeline(&self) -> &[TimelineEntry] {
        &self.timeline
    }

    #[must_use]
    pub fn landings(&self) -> &[PlanarPose] {
        &self.landings
    }

    #[must_use]
    pub fn set_landings(&mut self, landings: Vec<PlanarPose>) {
        self.landings = landings;
    }

    #[must_use]
    pub fn current_support(&self) -> Foot {
        self.support
    }

    #[must_use]
    pub fn support_foot_pose(&self) -> PlanarPose {
        self.support_foot_pose
    }

    #[must_use]
    pub fn config(&self) -> &PatternGeneratorConfig {
        &self.config
    }

    /// Advances the support timeline by one preview tick: pops the leading
    /// step, and if it was the last step of a single-support phase, rotates
    /// support and records the completed landing as the new support pose.
    pub fn advance_one_tick(&mut self, new_landing: Option<PlanarPose>) {
        self.time_in_phase += self.config.t;

        if self.timeline.is_empty() {
            return;
        }

        let finished = self.timeline.remove(0);
        if finished.steps_remaining == 1 {
            if let SupportPhase::SingleSupport(_) = finished.phase {
                if let Some(landing) = new_landing {
                    self.support = self.support.opposite();
                    self.support_foot_pose = landing;
                }
                self.time_in_phase = 0.0;
            }
        }

        let steps_per_ss = (self.config.t_step / self.config.t).round() as usize;
        let steps_per_ds = (self.config.t_ds / self.config.t).round().max(1.0) as usize;
        let last_landing_index = self
            .timeline
            .last()
            .and_then(|entry| entry.landing_index)
            .unwrap_or(0);
        let last_phase = self.timeline.last().map(|entry| entry.phase);

        let (next_phase, next_remaining, next_landing_index) = match last_phase {
            Some(SupportPhase::DoubleSupport) => {
                (SupportPhase::SingleSupport(self.support.opposite()), steps_per_ss, last_landing_index)
            }
            Some(SupportPhase::SingleSupport(_)) => {
                (SupportPhase::DoubleSupport, steps_per_ds, last_landing_index + 1)
            }
            None => (SupportPhase::SingleSupport(self.support.opposite()), steps_per_ss, 0),
        };

        self.timeline.push(TimelineEntry {
            phase: next_phase,
            steps_remaining: next_remaining,
            landing_index: Some(next_landing_index),
        });
    }

    /// Number of distinct upcoming landings referenced by the current
    /// timeline, capped at `config.n_foot_positions` decision variables.
    #[must_use]
    pub fn num_foot_decision_vars(&self) -> usize {
        let in_timeline = self
            .timeline
            .iter()
            .filter_map(|entry| entry.landing_index)
            .max()
            .map_or(0, |max| max + 1);
        in_timeline.min(self.config.n_foot_positions)
    }

    /// Advances one axis of CoM state by one preview tick given a jerk.
    #[must_use]
    pub fn simulate_axis(&self, state: AxisState, jerk: f64) -> AxisState {
        self.a * state + self.b * jerk
    }

    #[must_use]
    pub fn zmp_of_axis(&self, state: AxisState) -> f64 {
        (self.c_zmp * state)[(0, 0)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn test_config() -> PatternGeneratorConfig {
        PatternGeneratorConfig {
            n: 4,
            t: 0.1,
            t_step: 0.2,
            t_ds: 0.1,
            ..Default::default()
        }
    }

    #[test]
    fn preview_matrices_reproduce_state_propagation() {
        let generator = BaseGenerator::new(
            test_config(),
            Foot::Left,
            PlanarPose::default(),
        );

        let s0 = AxisState::new(0.0, 0.0, 0.0);
        let jerk = AxisState::from_element(1.0);

        let mut expected = s0;
        for k in 0..jerk.len() {
            expected = generator.simulate_axis(expected, jerk[k]);
        }

        let predicted_position = generator.p_ps.row(jerk.len() - 1) * s0
            + generator.p_pu.row(jerk.len() - 1) * jerk;

        assert_relative_eq!(predicted_position[(0, 0)], expected[0], epsilon = 1e-9);
    }

    #[test]
    fn zmp_matches_lipm_relation() {
        let generator = BaseGenerator::new(test_config(), Foot::Left, PlanarPose::default());
        let state = AxisState::new(0.3, 0.0, 0.2);
        let zmp = generator.zmp_of_axis(state);
        let expected = state[0] - (generator.config.h_com / generator.config.g) * state[2];
        assert_relative_eq!(zmp, expected, epsilon = 1e-12);
    }

    #[test]
    fn advance_one_tick_shrinks_then_regrows_timeline() {
        let mut generator = BaseGenerator::new(test_config(), Foot::Left, PlanarPose::default());
        let len_before = generator.timeline().len();
        generator.advance_one_tick(Some(PlanarPose { x: 0.1, y: 0.0, yaw: 0.0 }));
        assert_eq!(generator.timeline().len(), len_before);
    }
}
