//! Maximum likelihood estimation over a [`StateSpaceModel`].
//!
//! The optimizer searches the unconstrained parameter space; each trial point
//! is transformed to the constrained space, pushed into the system matrices
//! via the model's `update` hook, and scored with one Kalman filter pass.
//! Numerically infeasible trial points (singular prediction error covariance)
//! receive a large finite penalty instead of aborting the fit.

use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::neldermead::NelderMead;
use argmin::solver::quasinewton::LBFGS;

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use nalgebra::DVector;

use crate::error::{Result, StateSpaceError};
use crate::initialization::KalmanInit;
use crate::kalman::{kalman_filter, FilterOutput};
use crate::matrices::SystemMatrices;
use crate::model::StateSpaceModel;

/// Penalty objective assigned to infeasible trial points.
const INFEASIBLE_COST: f64 = f64::MAX / 2.0;

/// Cooperative cancellation handle for long-running fits.
///
/// Cancellation takes effect at the next trial-evaluation boundary: the filter
/// pass in flight completes, after which the optimizer winds down and `fit`
/// returns the best point found so far with `converged = false`.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Options controlling a fit.
#[derive(Debug, Clone, Default)]
pub struct FitOptions {
    /// Optimizer name: "lbfgs" (default) or "nelder-mead"/"nm".
    pub method: Option<String>,
    /// Iteration budget (default 500).
    pub maxiter: Option<u64>,
    /// Wall-clock budget, checked between trial evaluations.
    pub timeout: Option<Duration>,
    /// When true, non-convergence is an error instead of a warning.
    pub strict: bool,
    /// Cooperative cancellation handle.
    pub cancel: Option<CancelToken>,
}

/// Fitted (or externally evaluated) model results.
#[derive(Debug, Clone)]
pub struct MleResults {
    /// Constrained parameter estimates, ordered as `param_names`.
    pub params: Vec<f64>,
    pub param_names: Vec<String>,
    pub loglike: f64,
    pub aic: f64,
    pub bic: f64,
    pub n_obs: usize,
    pub n_params: usize,
    pub n_iter: u64,
    pub converged: bool,
    pub method: String,
    /// Filter output at the final parameter vector.
    pub filter: FilterOutput,
    /// System matrices populated with the final parameter vector.
    pub matrices: SystemMatrices,
    pub init: KalmanInit,
    /// The observation series the results were computed from.
    pub endog: Vec<DVector<f64>>,
}

impl MleResults {
    /// Plain-text summary: parameter estimates by name plus fit diagnostics.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        out.push_str("              Statespace Model Results\n");
        out.push_str("====================================================\n");
        out.push_str(&format!("No. Observations:  {}\n", self.n_obs));
        out.push_str(&format!("Log Likelihood:    {:.4}\n", self.loglike));
        out.push_str(&format!("AIC:               {:.4}\n", self.aic));
        out.push_str(&format!("BIC:               {:.4}\n", self.bic));
        out.push_str(&format!(
            "Method:            {} ({} iterations, converged: {})\n",
            self.method, self.n_iter, self.converged
        ));
        out.push_str("----------------------------------------------------\n");
        for (name, value) in self.param_names.iter().zip(self.params.iter()) {
            out.push_str(&format!("{:<24} {:>14.6}\n", name, value));
        }
        out.push_str("====================================================\n");
        out
    }
}

// ---------------------------------------------------------------------------
// Objective function for argmin
// ---------------------------------------------------------------------------

struct MleObjective<'a, M: StateSpaceModel + ?Sized> {
    model: &'a M,
    /// Working copy of the system matrices, refreshed by `update` per trial.
    mats: RefCell<SystemMatrices>,
    init: KalmanInit,
    cancel: Option<CancelToken>,
    deadline: Option<Instant>,
    /// Best finite cost seen so far, returned verbatim once halted so the
    /// solver terminates instead of exploring further.
    best_seen: RefCell<f64>,
}

impl<M: StateSpaceModel + ?Sized> Clone for MleObjective<'_, M> {
    fn clone(&self) -> Self {
        Self {
            model: self.model,
            mats: RefCell::new(self.mats.borrow().clone()),
            init: self.init.clone(),
            cancel: self.cancel.clone(),
            deadline: self.deadline,
            best_seen: RefCell::new(*self.best_seen.borrow()),
        }
    }
}

impl<M: StateSpaceModel + ?Sized> MleObjective<'_, M> {
    fn halted(&self) -> bool {
        if let Some(token) = &self.cancel {
            if token.is_cancelled() {
                return true;
            }
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return true;
            }
        }
        false
    }

    /// Negative log-likelihood at an unconstrained trial point.
    fn eval_negloglike(&self, unconstrained: &[f64]) -> Result<f64> {
        let constrained = self.model.transform_params(unconstrained);
        let mut mats = self.mats.borrow_mut();
        self.model.update(&constrained, &mut mats)?;
        let output = kalman_filter(self.model.endog(), &mats, &self.init)?;
        if output.loglike.is_finite() {
            Ok(-output.loglike)
        } else {
            Err(StateSpaceError::OptimizationFailed(
                "non-finite log-likelihood".into(),
            ))
        }
    }
}

impl<M: StateSpaceModel + ?Sized> CostFunction for MleObjective<'_, M> {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, param: &Vec<f64>) -> std::result::Result<f64, argmin::core::Error> {
        if self.halted() {
            // Repeat the best cost with no descent signal so the solver
            // terminates at the next boundary.
            return Ok(*self.best_seen.borrow());
        }
        match self.eval_negloglike(param) {
            Ok(cost) => {
                let mut best = self.best_seen.borrow_mut();
                if cost < *best {
                    *best = cost;
                }
                Ok(cost)
            }
            // Infeasible trial point (singular covariance or invalid params):
            // worst-possible objective rather than a fatal error.
            Err(_) => Ok(INFEASIBLE_COST),
        }
    }
}

impl<M: StateSpaceModel + ?Sized> Gradient for MleObjective<'_, M> {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, param: &Vec<f64>) -> std::result::Result<Vec<f64>, argmin::core::Error> {
        let n = param.len();
        if self.halted() {
            return Ok(vec![0.0; n]);
        }

        // Forward differences, with a central-difference retry when the
        // one-sided estimate is not finite.
        let eps = f64::EPSILON.sqrt();
        let f0 = self.cost(param)?;
        let mut grad = vec![0.0; n];
        let mut p_work = param.clone();

        for i in 0..n {
            let orig = p_work[i];
            p_work[i] = orig + eps;
            let f_plus = self.cost(&p_work)?;
            p_work[i] = orig;

            grad[i] = (f_plus - f0) / eps;

            if !grad[i].is_finite() {
                p_work[i] = orig + eps;
                let fp = self.cost(&p_work)?;
                p_work[i] = orig - eps;
                let fm = self.cost(&p_work)?;
                p_work[i] = orig;
                grad[i] = (fp - fm) / (2.0 * eps);
                if !grad[i].is_finite() {
                    grad[i] = 0.0;
                }
            }
        }

        Ok(grad)
    }
}

// ---------------------------------------------------------------------------
// Solver runners
// ---------------------------------------------------------------------------

fn run_lbfgs<O>(
    objective: O,
    init_params: Vec<f64>,
    maxiter: u64,
) -> std::result::Result<(Vec<f64>, f64, u64, bool), String>
where
    O: CostFunction<Param = Vec<f64>, Output = f64>
        + Gradient<Param = Vec<f64>, Gradient = Vec<f64>>,
{
    let linesearch = MoreThuenteLineSearch::new();
    let solver = LBFGS::new(linesearch, 10)
        .with_tolerance_grad(1e-5)
        .map_err(|e| e.to_string())?
        .with_tolerance_cost(1e-9)
        .map_err(|e| e.to_string())?;

    let result = Executor::new(objective, solver)
        .configure(
            |state: argmin::core::IterState<Vec<f64>, Vec<f64>, (), (), (), f64>| {
                state.param(init_params).max_iters(maxiter)
            },
        )
        .run()
        .map_err(|e| format!("L-BFGS failed: {}", e))?;

    let state = result.state();
    let best_param = state
        .get_best_param()
        .ok_or("L-BFGS: no best parameter found")?
        .clone();
    let best_cost = state.get_best_cost();
    let n_iter = state.get_iter();
    let term_reason = state.get_termination_reason();
    let converged = term_reason == Some(&TerminationReason::SolverConverged)
        || term_reason == Some(&TerminationReason::TargetCostReached);

    Ok((best_param, best_cost, n_iter, converged))
}

fn run_nelder_mead<O>(
    objective: O,
    init_params: Vec<f64>,
    maxiter: u64,
) -> std::result::Result<(Vec<f64>, f64, u64, bool), String>
where
    O: CostFunction<Param = Vec<f64>, Output = f64>,
{
    let n = init_params.len();

    // Simplex: the starting point plus one perturbed vertex per dimension.
    let mut simplex = vec![init_params.clone()];
    for i in 0..n {
        let mut vertex = init_params.clone();
        let delta = if vertex[i].abs() > 1e-8 {
            vertex[i] * 0.05
        } else {
            0.00025
        };
        vertex[i] += delta;
        simplex.push(vertex);
    }

    let solver = NelderMead::new(simplex)
        .with_sd_tolerance(1e-6)
        .map_err(|e| e.to_string())?;

    let result = Executor::new(objective, solver)
        .configure(
            |state: argmin::core::IterState<Vec<f64>, (), (), (), (), f64>| {
                state.max_iters(maxiter)
            },
        )
        .run()
        .map_err(|e| format!("Nelder-Mead failed: {}", e))?;

    let state = result.state();
    let best_param = state
        .get_best_param()
        .ok_or("Nelder-Mead: no best parameter found")?
        .clone();
    let best_cost = state.get_best_cost();
    let n_iter = state.get_iter();
    let term_reason = state.get_termination_reason();
    let converged = term_reason == Some(&TerminationReason::SolverConverged)
        || term_reason == Some(&TerminationReason::TargetCostReached);

    Ok((best_param, best_cost, n_iter, converged))
}

// ---------------------------------------------------------------------------
// Public entry points
// ---------------------------------------------------------------------------

/// Evaluate the log-likelihood at a constrained parameter vector.
pub fn loglike<M: StateSpaceModel + ?Sized>(model: &M, params: &[f64]) -> Result<f64> {
    let (_, output, _) = filter_once(model, params)?;
    Ok(output.loglike)
}

/// Run the filter at a constrained parameter vector and package the results.
///
/// This is the entry point for post-estimation queries against externally
/// supplied parameters (no optimization is performed).
pub fn filter_at<M: StateSpaceModel + ?Sized>(model: &M, params: &[f64]) -> Result<MleResults> {
    let names = model.param_names();
    if names.len() != params.len() {
        return Err(StateSpaceError::ParamLengthMismatch {
            expected: names.len(),
            got: params.len(),
        });
    }
    let (mats, output, init) = filter_once(model, params)?;
    Ok(build_results(
        model,
        params.to_vec(),
        names,
        output,
        mats,
        init,
        0,
        true,
        "filter".to_string(),
    ))
}

fn filter_once<M: StateSpaceModel + ?Sized>(
    model: &M,
    params: &[f64],
) -> Result<(SystemMatrices, FilterOutput, KalmanInit)> {
    let mut mats = build_validated_matrices(model)?;
    model.update(params, &mut mats)?;
    mats.validate()?;
    let init = model.initialization();
    let output = kalman_filter(model.endog(), &mats, &init)?;
    Ok((mats, output, init))
}

fn build_validated_matrices<M: StateSpaceModel + ?Sized>(model: &M) -> Result<SystemMatrices> {
    if model.endog().is_empty() {
        return Err(StateSpaceError::DataError(
            "observation series is empty".into(),
        ));
    }
    let mats = model.build_matrices()?;
    if mats.k_states() != model.k_states()
        || mats.k_posdef() != model.k_posdef()
        || mats.k_endog() != model.k_endog()
    {
        return Err(StateSpaceError::ConfigError(format!(
            "matrices declare ({}, {}, {}) but model declares (k_endog={}, k_states={}, k_posdef={})",
            mats.k_endog(),
            mats.k_states(),
            mats.k_posdef(),
            model.k_endog(),
            model.k_states(),
            model.k_posdef()
        )));
    }
    mats.validate()?;
    Ok(mats)
}

#[allow(clippy::too_many_arguments)]
fn build_results<M: StateSpaceModel + ?Sized>(
    model: &M,
    params: Vec<f64>,
    param_names: Vec<String>,
    filter: FilterOutput,
    matrices: SystemMatrices,
    init: KalmanInit,
    n_iter: u64,
    converged: bool,
    method: String,
) -> MleResults {
    let n_obs = model.endog().len();
    let n_params = params.len();
    let k = n_params as f64;
    let aic = -2.0 * filter.loglike + 2.0 * k;
    let bic = -2.0 * filter.loglike + k * (n_obs as f64).ln();
    MleResults {
        params,
        param_names,
        loglike: filter.loglike,
        aic,
        bic,
        n_obs,
        n_params,
        n_iter,
        converged,
        method,
        filter,
        matrices,
        init,
        endog: model.endog().to_vec(),
    }
}

/// Fit a state space model by maximum likelihood.
///
/// Obtains `start_params` from the model, maps them to the unconstrained
/// space, and minimizes the negative log-likelihood with the selected
/// optimizer. Exceeding the iteration budget, cancellation, and timeout all
/// surface as `converged = false` (with a warning) alongside the best point
/// found; in strict mode non-convergence is an error instead.
pub fn fit<M: StateSpaceModel + ?Sized>(model: &M, options: &FitOptions) -> Result<MleResults> {
    let maxiter = options.maxiter.unwrap_or(500);
    let method = options.method.as_deref().unwrap_or("lbfgs");

    let names = model.param_names();
    let start = model.start_params();
    if names.len() != start.len() {
        return Err(StateSpaceError::ConfigError(format!(
            "param_names has length {} but start_params has length {}",
            names.len(),
            start.len()
        )));
    }

    let mut mats = build_validated_matrices(model)?;
    model.update(&start, &mut mats)?;
    mats.validate()?;
    let init = model.initialization();

    // maxiter = 0: evaluate the start point, report non-convergence.
    if maxiter == 0 {
        let output = kalman_filter(model.endog(), &mats, &init)?;
        if options.strict {
            return Err(StateSpaceError::NotConverged {
                n_iter: 0,
                best_cost: -output.loglike,
            });
        }
        log::warn!("fit called with maxiter=0; returning start parameters unoptimized");
        return Ok(build_results(
            model,
            start,
            names,
            output,
            mats,
            init,
            0,
            false,
            method.to_string(),
        ));
    }

    let unconstrained_start = model.untransform_params(&start);
    if unconstrained_start.len() != start.len() {
        return Err(StateSpaceError::ConfigError(format!(
            "untransform_params changed the parameter count: {} -> {}",
            start.len(),
            unconstrained_start.len()
        )));
    }

    let deadline = options.timeout.map(|d| Instant::now() + d);
    let objective = MleObjective {
        model,
        mats: RefCell::new(mats),
        init: init.clone(),
        cancel: options.cancel.clone(),
        deadline,
        best_seen: RefCell::new(INFEASIBLE_COST),
    };

    let (best_unconstrained, _best_cost, n_iter, solver_converged, used_method) = match method {
        "nelder-mead" | "nm" => {
            let (p, c, n, conv) = run_nelder_mead(objective.clone(), unconstrained_start, maxiter)
                .map_err(StateSpaceError::OptimizationFailed)?;
            (p, c, n, conv, "nelder-mead".to_string())
        }
        "lbfgs" => {
            match run_lbfgs(objective.clone(), unconstrained_start.clone(), maxiter) {
                Ok((p, c, n, conv)) => (p, c, n, conv, "lbfgs".to_string()),
                Err(_) => {
                    // L-BFGS failed outright (e.g. degenerate line search):
                    // fall back to the gradient-free solver.
                    let (p, c, n, conv) =
                        run_nelder_mead(objective.clone(), unconstrained_start, maxiter)
                            .map_err(StateSpaceError::OptimizationFailed)?;
                    (p, c, n, conv, "nelder-mead (fallback)".to_string())
                }
            }
        }
        _ => {
            return Err(StateSpaceError::OptimizationFailed(format!(
                "unknown method: '{}'. Use 'lbfgs' or 'nelder-mead'",
                method
            )));
        }
    };

    let halted = objective.halted();
    let converged = solver_converged && !halted;

    // Final evaluation at the accepted point.
    let final_params = model.transform_params(&best_unconstrained);
    let (final_mats, output, init) = filter_once(model, &final_params)?;

    if halted {
        log::warn!(
            "fit halted cooperatively ({}) after {} iterations; returning best point found",
            if options.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
                "cancelled"
            } else {
                "timeout"
            },
            n_iter
        );
    } else if !converged {
        log::warn!(
            "optimizer did not converge within {} iterations (method {})",
            maxiter,
            used_method
        );
    }

    if options.strict && !converged {
        return Err(StateSpaceError::NotConverged {
            n_iter,
            best_cost: -output.loglike,
        });
    }

    Ok(build_results(
        model,
        final_params,
        names,
        output,
        final_mats,
        init,
        n_iter,
        converged,
        used_method,
    ))
}
