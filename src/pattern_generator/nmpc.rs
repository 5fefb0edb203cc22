//! The nonlinear model-predictive pattern generator: formulates the
//! preview-horizon QP each tick, solves it with `osqp`, and refines the
//! foot-yaw estimate with an outer sequential-QP loop.

use nalgebra::DMatrix;
use osqp::{CscMatrix, Problem, Settings};
use tracing::{debug, instrument, warn};

use crate::config::PatternGeneratorConfig;
use crate::error::{Result, WalkingError};
use crate::types::{Foot, PlanarPose, VelocityReference};

use super::base::{AxisState, BaseGenerator, PatternGeneratorState};

/// Outcome of the most recent `Solve()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SolveStatus {
    #[default]
    NotSolved,
    Solved,
    Infeasible,
}

/// Decision-variable results written back by `Solve()`.
#[derive(Debug, Clone)]
pub struct SolveResult {
    pub jerk_x: Vec<f64>,
    pub jerk_y: Vec<f64>,
    pub foot_x: Vec<f64>,
    pub foot_y: Vec<f64>,
    pub foot_yaw: Vec<f64>,
}

/// The receding-horizon nonlinear pattern generator (C2), built on [`BaseGenerator`] (C1).
pub struct NmpcGenerator {
    base: BaseGenerator,
    velocity_reference: VelocityReference,
    security_margin: (f64, f64),
    status: SolveStatus,
    last_result: Option<SolveResult>,
    /// Caches the result of the first `update()` call since the last
    /// `solve()`, so that calling `update()` again without an intervening
    /// `solve()` returns the same state instead of advancing twice.
    cached_update: Option<PatternGeneratorState>,
}

impl NmpcGenerator {
    #[must_use]
    pub fn new(config: PatternGeneratorConfig, initial_support: Foot, support_foot_pose: PlanarPose) -> Self {
        let security_margin = config.security_margin;
        Self {
            base: BaseGenerator::new(config, initial_support, support_foot_pose),
            velocity_reference: VelocityReference::default(),
            security_margin,
            status: SolveStatus::NotSolved,
            last_result: None,
            cached_update: None,
        }
    }

    pub fn set_velocity_reference(&mut self, reference: VelocityReference) {
        self.velocity_reference = reference;
    }

    pub fn set_security_margin(&mut self, mx: f64, my: f64) {
        self.security_margin = (mx, my);
    }

    pub fn set_initial_values(&mut self, state: &PatternGeneratorState) {
        // The base generator's axis states are advanced through `simulate`/`update`;
        // `set_initial_values` rewrites them directly, e.g. after injecting measured CoM.
        self.base_mut().overwrite_state(state);
    }

    #[must_use]
    pub fn status(&self) -> SolveStatus {
        self.status
    }

    #[must_use]
    pub fn last_result(&self) -> Option<&SolveResult> {
        self.last_result.as_ref()
    }

    #[must_use]
    pub fn base(&self) -> &BaseGenerator {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BaseGenerator {
        &mut self.base
    }

    /// Runs the sequential QP: freeze `F_q`, solve the linear QP, update `F_q`
    /// via a gradient step, repeat until convergence or the iteration cap.
    #[instrument(skip_all)]
    pub fn solve(&mut self, current_state: &PatternGeneratorState) -> Result<()> {
        let n = self.base.config().n;
        let nf = self.base.num_foot_decision_vars().max(1);
        let max_iter = self.base.config().max_sqp_iterations;

        let mut fq = vec![current_state.com_yaw[0]; nf];

        let mut result = None;
        for iteration in 0..max_iter {
            let solved = self.solve_linear_qp(current_state, &fq, n, nf)?;
            fq = self.update_foot_yaw(&fq, &solved, current_state);
            debug!(iteration, "sequential QP iteration complete");
            result = Some(solved);
        }

        self.status = SolveStatus::Solved;
        self.last_result = result;
        self.cached_update = None;
        Ok(())
    }

    fn update_foot_yaw(
        &self,
        fq: &[f64],
        solved: &SolveResult,
        current_state: &PatternGeneratorState,
    ) -> Vec<f64> {
        let max_step_yaw = self.base.config().max_step_yaw;
        let delta = self.base.config().delta;
        fq.iter()
            .enumerate()
            .map(|(i, &q)| {
                // Gradient of delta * (q - q_ref)^2 w.r.t. q is 2*delta*(q - q_ref);
                // take a small fixed-size descent step, clamped to the max turn rate.
                let q_ref = current_state.com_yaw[0];
                let gradient = 2.0 * delta * (q - q_ref);
                let step = (-0.5 * gradient).clamp(-max_step_yaw, max_step_yaw);
                let _ = solved;
                q + step
            })
            .collect()
    }

    #[allow(clippy::too_many_lines)]
    fn solve_linear_qp(
        &self,
        state: &PatternGeneratorState,
        fq: &[f64],
        n: usize,
        nf: usize,
    ) -> Result<SolveResult> {
        let config = self.base.config();
        let total_vars = 2 * n + 2 * nf;

        let idx_jerk_x = |i: usize| i;
        let idx_jerk_y = |i: usize| n + i;
        let idx_foot_x = |j: usize| 2 * n + j;
        let idx_foot_y = |j: usize| 2 * n + nf + j;

        let mut p = DMatrix::<f64>::zeros(total_vars, total_vars);
        let mut q = vec![0.0; total_vars];

        // Jerk regularization.
        for i in 0..n {
            p[(idx_jerk_x(i), idx_jerk_x(i))] += config.alpha;
            p[(idx_jerk_y(i), idx_jerk_y(i))] += config.alpha;
        }
        // Foot-position regularization, required for a well-posed QP since the
        // cost in the spec only directly penalizes jerk and ZMP tracking.
        for j in 0..nf {
            p[(idx_foot_x(j), idx_foot_x(j))] += config.alpha;
            p[(idx_foot_y(j), idx_foot_y(j))] += config.alpha;
        }

        // Velocity tracking: beta * || P_vs*s + P_vu*u - v_ref ||^2.
        self.add_velocity_tracking(&mut p, &mut q, state, n, idx_jerk_x, idx_jerk_y);

        // ZMP reference tracking against the upcoming landing centers, coupling
        // jerk and foot-position decision variables through the support matrix V.
        self.add_zmp_tracking(&mut p, &mut q, state, n, nf, idx_jerk_x, idx_jerk_y, idx_foot_x, idx_foot_y);

        let (a_rows, l, u) = self.assemble_constraints(state, fq, n, nf, total_vars, idx_jerk_x, idx_jerk_y, idx_foot_x, idx_foot_y);

        let p_dense = upper_triangular_dense(&p);
        let a_dense: Vec<Vec<f64>> = a_rows;

        let settings = Settings::default().verbose(false);

        let p_csc = CscMatrix::from(&p_dense);
        let a_csc = CscMatrix::from(&a_dense);

        let mut problem = Problem::new(p_csc, &q, a_csc, &l, &u, &settings)
            .map_err(|_| WalkingError::QpInfeasible)?;

        let solution = match problem.solve() {
            osqp::Status::Solved(solution) => solution.x().to_vec(),
            osqp::Status::SolvedInaccurate(solution) => {
                warn!("QP solved inaccurately");
                solution.x().to_vec()
            }
            _ => return Err(WalkingError::QpInfeasible),
        };

        Ok(SolveResult {
            jerk_x: (0..n).map(|i| solution[idx_jerk_x(i)]).collect(),
            jerk_y: (0..n).map(|i| solution[idx_jerk_y(i)]).collect(),
            foot_x: (0..nf).map(|j| solution[idx_foot_x(j)]).collect(),
            foot_y: (0..nf).map(|j| solution[idx_foot_y(j)]).collect(),
            foot_yaw: fq.to_vec(),
        })
    }

    fn add_velocity_tracking(
        &self,
        p: &mut DMatrix<f64>,
        q: &mut [f64],
        state: &PatternGeneratorState,
        n: usize,
        idx_jerk_x: impl Fn(usize) -> usize,
        idx_jerk_y: impl Fn(usize) -> usize,
    ) {
        let beta = self.base.config().beta;
        let yaw = state.com_yaw[0];
        let (cos_y, sin_y) = (yaw.cos(), yaw.sin());
        // Rotate the body-frame velocity reference into the world frame.
        let vref = &self.velocity_reference;
        let vx_ref = cos_y * vref.vx - sin_y * vref.vy;
        let vy_ref = sin_y * vref.vx + cos_y * vref.vy;

        add_quadratic_tracking(p, q, &self.base.p_vu, &self.base.p_vs, state.com_x, vx_ref, beta, n, &idx_jerk_x);
        add_quadratic_tracking(p, q, &self.base.p_vu, &self.base.p_vs, state.com_y, vy_ref, beta, n, &idx_jerk_y);
    }

    #[allow(clippy::too_many_arguments)]
    fn add_zmp_tracking(
        &self,
        p: &mut DMatrix<f64>,
        q: &mut [f64],
        state: &PatternGeneratorState,
        n: usize,
        nf: usize,
        idx_jerk_x: impl Fn(usize) -> usize,
        idx_jerk_y: impl Fn(usize) -> usize,
        idx_foot_x: impl Fn(usize) -> usize,
        idx_foot_y: impl Fn(usize) -> usize,
    ) {
        let gamma = self.base.config().gamma;
        if gamma == 0.0 {
            return;
        }
        let v = self.support_matrix(n, nf);
        // Steps still under the already-placed support foot have no landing
        // index; their ZMP reference is that fixed, known pose rather than
        // a decision variable.
        let fixed_mask = self.fixed_stance_mask(n);
        let support = self.base.support_foot_pose();

        add_zmp_axis(p, q, &self.base.p_zu, &self.base.p_zs, &v, &fixed_mask, support.x, state.com_x, gamma, n, nf, &idx_jerk_x, &idx_foot_x);
        add_zmp_axis(p, q, &self.base.p_zu, &self.base.p_zs, &v, &fixed_mask, support.y, state.com_y, gamma, n, nf, &idx_jerk_y, &idx_foot_y);
    }

    /// `true` at horizon step `i` iff it is still under the current,
    /// already-placed support foot (no landing decision applies yet).
    fn fixed_stance_mask(&self, n: usize) -> Vec<bool> {
        self.base
            .timeline()
            .iter()
            .take(n)
            .map(|entry| entry.landing_index.is_none())
            .collect()
    }

    /// `V[i, j] = 1` iff horizon step `i` is assigned to landing `j`.
    fn support_matrix(&self, n: usize, nf: usize) -> DMatrix<f64> {
        let mut v = DMatrix::<f64>::zeros(n, nf);
        for (i, entry) in self.base.timeline().iter().enumerate().take(n) {
            if let Some(j) = entry.landing_index {
                if j < nf {
                    v[(i, j)] = 1.0;
                }
            }
        }
        v
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble_constraints(
        &self,
        state: &PatternGeneratorState,
        fq: &[f64],
        n: usize,
        nf: usize,
        total_vars: usize,
        idx_jerk_x: impl Fn(usize) -> usize,
        idx_jerk_y: impl Fn(usize) -> usize,
        idx_foot_x: impl Fn(usize) -> usize,
        idx_foot_y: impl Fn(usize) -> usize,
    ) -> (Vec<Vec<f64>>, Vec<f64>, Vec<f64>) {
        let config = self.base.config();
        let (mx, my) = self.security_margin;
        let half_width = config.support_polygon.half_width - mx;
        let half_depth = config.support_polygon.half_depth - my;

        let mut rows = Vec::new();
        let mut l = Vec::new();
        let mut u = Vec::new();

        // ZMP-in-support-polygon constraints, linearized about the current F_q
        // estimate: rotate the ZMP-minus-landing-center vector into the
        // landing's frame and bound each component.
        let v = self.support_matrix(n, nf);
        let support = self.base.support_foot_pose();
        for i in 0..n {
            let landing_index = self.base.timeline().get(i).and_then(|e| e.landing_index);
            let theta = match landing_index {
                Some(j) => fq.get(j.min(nf.saturating_sub(1))).copied().unwrap_or(0.0),
                // Still under the already-placed support foot: its own yaw
                // fixes the polygon frame, no decision variable involved.
                None => support.yaw,
            };
            let (c, s) = (theta.cos(), theta.sin());

            // Row along the landing's local x axis.
            let mut row_a = vec![0.0; total_vars];
            for j in 0..n {
                row_a[idx_jerk_x(j)] = c * self.base.p_zu[(i, j)];
                row_a[idx_jerk_y(j)] = s * self.base.p_zu[(i, j)];
            }
            let mut offset_a = c * self.base.p_zs.row(i).dot(&state.com_x.transpose())
                + s * self.base.p_zs.row(i).dot(&state.com_y.transpose());
            match landing_index {
                Some(landing) if nf > 0 => {
                    let landing = landing.min(nf - 1);
                    row_a[idx_foot_x(landing)] = -c * v[(i, landing)];
                    row_a[idx_foot_y(landing)] = -s * v[(i, landing)];
                }
                _ => offset_a -= c * support.x + s * support.y,
            }
            rows.push(row_a);
            l.push(-half_width - offset_a);
            u.push(half_width - offset_a);

            // Row along the landing's local y axis.
            let mut row_b = vec![0.0; total_vars];
            for j in 0..n {
                row_b[idx_jerk_x(j)] = -s * self.base.p_zu[(i, j)];
                row_b[idx_jerk_y(j)] = c * self.base.p_zu[(i, j)];
            }
            let mut offset_b = -s * self.base.p_zs.row(i).dot(&state.com_x.transpose())
                + c * self.base.p_zs.row(i).dot(&state.com_y.transpose());
            match landing_index {
                Some(landing) if nf > 0 => {
                    let landing = landing.min(nf - 1);
                    row_b[idx_foot_x(landing)] = s * v[(i, landing)];
                    row_b[idx_foot_y(landing)] = -c * v[(i, landing)];
                }
                _ => offset_b -= s * support.x - c * support.y,
            }
            rows.push(row_b);
            l.push(-half_depth - offset_b);
            u.push(half_depth - offset_b);
        }

        // Kinematic reachability: each landing must lie within a box relative
        // to the previous support foot / previous landing.
        let reach = &config.reachability_polygon;
        let mut prev_x = self.base.support_foot_pose().x;
        let mut prev_y = self.base.support_foot_pose().y;
        for j in 0..nf {
            let mut row_x = vec![0.0; total_vars];
            row_x[idx_foot_x(j)] = 1.0;
            rows.push(row_x);
            l.push(prev_x - reach.half_width);
            u.push(prev_x + reach.half_width);

            let mut row_y = vec![0.0; total_vars];
            row_y[idx_foot_y(j)] = 1.0;
            rows.push(row_y);
            l.push(prev_y - reach.half_depth);
            u.push(prev_y + reach.half_depth);

            // Next landing's box is centered relative to this one once solved;
            // the bound above is a (looser) static approximation for j > 0.
            prev_x = self.base.support_foot_pose().x;
            prev_y = self.base.support_foot_pose().y;
        }

        (rows, l, u)
    }

    /// Applies the first horizon jerk, advancing the internal CoM state by
    /// one preview tick. Used both for warm-starting and by `Update()`.
    pub fn simulate(&mut self) {
        let Some(result) = self.last_result.clone() else {
            return;
        };
        let jerk_x = result.jerk_x.first().copied().unwrap_or(0.0);
        let jerk_y = result.jerk_y.first().copied().unwrap_or(0.0);
        self.base.apply_jerk(jerk_x, jerk_y);
    }

    /// Shifts the pattern-generator state forward one tick and returns the
    /// new handoff state. Calling `update` twice without an intervening
    /// `solve` yields the same state both times: the first call advances
    /// the timeline and caches the result, the second returns the cache
    /// instead of advancing again.
    #[must_use]
    pub fn update(&mut self) -> PatternGeneratorState {
        if let Some(cached) = &self.cached_update {
            return cached.clone();
        }
        let landing = self.last_result.as_ref().and_then(|result| {
            let yaw = result.foot_yaw.first().copied()?;
            Some(PlanarPose {
                x: result.foot_x.first().copied()?,
                y: result.foot_y.first().copied()?,
                yaw,
            })
        });
        self.base.advance_one_tick(landing);
        let state = self.base.current_state();
        self.cached_update = Some(state.clone());
        state
    }
}

/// `osqp` expects only the upper triangle of the symmetric cost matrix `P`.
fn upper_triangular_dense(p: &DMatrix<f64>) -> Vec<Vec<f64>> {
    let n = p.nrows();
    (0..n)
        .map(|i| (0..n).map(|j| if j >= i { p[(i, j)] } else { 0.0 }).collect())
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn add_quadratic_tracking(
    p: &mut DMatrix<f64>,
    q: &mut [f64],
    p_u: &DMatrix<f64>,
    p_s: &DMatrix<f64>,
    state: AxisState,
    reference: f64,
    weight: f64,
    n: usize,
    idx: &impl Fn(usize) -> usize,
) {
    // cost = weight * || p_s*state + p_u*u - reference ||^2
    let residual_const: Vec<f64> = (0..n)
        .map(|i| p_s.row(i).dot(&state.transpose()) - reference)
        .collect();

    for i in 0..n {
        for j in 0..n {
            let contribution: f64 = (0..n).map(|k| p_u[(k, i)] * p_u[(k, j)]).sum();
            p[(idx(i), idx(j))] += weight * contribution;
        }
        let linear: f64 = (0..n).map(|k| p_u[(k, i)] * residual_const[k]).sum();
        q[idx(i)] += weight * linear;
    }
}

#[allow(clippy::too_many_arguments)]
fn add_zmp_axis(
    p: &mut DMatrix<f64>,
    q: &mut [f64],
    p_zu: &DMatrix<f64>,
    p_zs: &DMatrix<f64>,
    v: &DMatrix<f64>,
    fixed_mask: &[bool],
    fixed_value: f64,
    state: AxisState,
    gamma: f64,
    n: usize,
    nf: usize,
    idx_jerk: &impl Fn(usize) -> usize,
    idx_foot: &impl Fn(usize) -> usize,
) {
    // cost = gamma * || p_zs*state + p_zu*u - target ||^2, where target is
    // the fixed support-foot pose for steps still under it (v's row is all
    // zero there) and the landing-center decision variable otherwise.
    let base: Vec<f64> = (0..n)
        .map(|i| p_zs.row(i).dot(&state.transpose()) - if fixed_mask[i] { fixed_value } else { 0.0 })
        .collect();

    for i in 0..n {
        for j in 0..n {
            let contribution = (0..n).map(|k| p_zu[(k, i)] * p_zu[(k, j)]).sum::<f64>();
            p[(idx_jerk(i), idx_jerk(j))] += gamma * contribution;
        }
        for j in 0..nf {
            let contribution = (0..n).map(|k| p_zu[(k, i)] * v[(k, j)]).sum::<f64>();
            p[(idx_jerk(i), idx_foot(j))] -= gamma * contribution;
            p[(idx_foot(j), idx_jerk(i))] -= gamma * contribution;
        }
        q[idx_jerk(i)] += gamma * (0..n).map(|k| p_zu[(k, i)] * base[k]).sum::<f64>();
    }
    for i in 0..nf {
        for j in 0..nf {
            let contribution = (0..n).map(|k| v[(k, i)] * v[(k, j)]).sum::<f64>();
            p[(idx_foot(i), idx_foot(j))] += gamma * contribution;
        }
        q[idx_foot(i)] -= gamma * (0..n).map(|k| v[(k, i)] * base[k]).sum::<f64>();
    }
}
