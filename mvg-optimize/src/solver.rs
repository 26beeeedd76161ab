use crate::{
    ConjugateGradientSettings, LevenbergMarquardtSettings, NelderMeadSettings, OptimizerSettings,
};
use argmin::{
    core::{ArgminKV, ArgminOp, Error, Executor, IterState, Observe, ObserverMode},
    solver::{
        conjugategradient::{beta::PolakRibiere, NonlinearConjugateGradient},
        linesearch::MoreThuenteLineSearch,
        neldermead::NelderMead,
    },
};
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use log::*;
use mvg_core::nalgebra::{
    dimension::{Dynamic, U1},
    DMatrix, DVector, VecStorage,
};
use std::sync::{Arc, Mutex};

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// A least-squares criterion: a fixed-length residual vector over a parameter vector.
///
/// The scalar cost is the squared norm of the residuals. The same function drives every
/// [`Backend`]: the derivative-free one only evaluates the cost, Levenberg-Marquardt consumes the
/// residuals and their Jacobian, and the conjugate gradient uses the gradient `2 Jᵀ r`.
pub trait ResidualFunction {
    fn residuals(&self, params: &DVector<f64>) -> DVector<f64>;

    fn cost(&self, params: &DVector<f64>) -> f64 {
        self.residuals(params).norm_squared()
    }

    /// Central-difference Jacobian of the residuals.
    fn jacobian(&self, params: &DVector<f64>) -> DMatrix<f64> {
        let mut shifted = params.clone();
        let mut columns = Vec::with_capacity(params.len());
        for ix in 0..params.len() {
            let h = f64::EPSILON.cbrt() * params[ix].abs().max(1.0);
            shifted[ix] = params[ix] + h;
            let plus = self.residuals(&shifted);
            shifted[ix] = params[ix] - h;
            let minus = self.residuals(&shifted);
            shifted[ix] = params[ix];
            columns.push((plus - minus) / (2.0 * h));
        }
        if columns.is_empty() {
            DMatrix::zeros(self.residuals(params).len(), 0)
        } else {
            DMatrix::from_columns(&columns)
        }
    }

    fn gradient(&self, params: &DVector<f64>) -> DVector<f64> {
        self.jacobian(params).tr_mul(&self.residuals(params)) * 2.0
    }
}

/// The numerical method used to minimize a [`ResidualFunction`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub enum Backend {
    /// Nelder-Mead simplex.
    DerivativeFree,
    LevenbergMarquardt,
    /// Nonlinear conjugate gradient.
    ConjugateGradient,
}

/// The best parameters found by a minimization, along with the cost before and after.
#[derive(Debug, Clone, PartialEq)]
pub struct Minimum {
    pub params: DVector<f64>,
    pub start_cost: f64,
    pub cost: f64,
}

impl Minimum {
    fn unchanged(params: DVector<f64>, cost: f64) -> Self {
        Self {
            params,
            start_cost: cost,
            cost,
        }
    }

    /// Keeps the candidate only if it improves on the start.
    fn better_of(start: DVector<f64>, start_cost: f64, candidate: Vec<f64>, cost: f64) -> Self {
        if candidate.len() == start.len() && cost.is_finite() && cost < start_cost {
            Self {
                params: DVector::from_vec(candidate),
                start_cost,
                cost,
            }
        } else {
            Self::unchanged(start, start_cost)
        }
    }
}

struct OptimizationObserver;

impl<T: ArgminOp> Observe<T> for OptimizationObserver
where
    T::Param: std::fmt::Debug,
{
    fn observe_iter(&mut self, state: &IterState<T>, _kv: &ArgminKV) -> Result<(), Error> {
        debug!(
            "on iteration {} out of {} with total evaluations {} and current cost {}, params {:?}",
            state.iter, state.max_iters, state.cost_func_count, state.cost, state.param
        );
        Ok(())
    }
}

/// Remembers the best iterate so that it survives a solver that bails out with an error.
#[derive(Clone, Default)]
struct BestIterate(Arc<Mutex<Option<(Vec<f64>, f64)>>>);

impl BestIterate {
    fn take(&self) -> Option<(Vec<f64>, f64)> {
        self.0.lock().ok().and_then(|mut best| best.take())
    }
}

impl<T> Observe<T> for BestIterate
where
    T: ArgminOp<Param = Vec<f64>, Float = f64>,
{
    fn observe_iter(&mut self, state: &IterState<T>, _kv: &ArgminKV) -> Result<(), Error> {
        if let Ok(mut best) = self.0.lock() {
            if best.as_ref().map_or(true, |&(_, cost)| state.best_cost < cost) {
                *best = Some((state.best_param.clone(), state.best_cost));
            }
        }
        Ok(())
    }
}

/// Exposes a [`ResidualFunction`] to argmin.
#[derive(Clone)]
struct CostOp<F>(F);

impl<F> ArgminOp for CostOp<F>
where
    F: ResidualFunction + Clone,
{
    type Param = Vec<f64>;
    type Output = f64;
    type Hessian = ();
    type Jacobian = ();
    type Float = f64;

    fn apply(&self, p: &Self::Param) -> Result<Self::Output, Error> {
        Ok(self.0.cost(&DVector::from_column_slice(p)))
    }

    fn gradient(&self, p: &Self::Param) -> Result<Self::Param, Error> {
        Ok(self
            .0
            .gradient(&DVector::from_column_slice(p))
            .as_slice()
            .to_vec())
    }
}

/// Exposes a [`ResidualFunction`] to the Levenberg-Marquardt solver.
struct LeastSquares<F> {
    function: F,
    params: DVector<f64>,
}

impl<F> LeastSquaresProblem<f64, Dynamic, Dynamic> for LeastSquares<F>
where
    F: ResidualFunction,
{
    type ResidualStorage = VecStorage<f64, Dynamic, U1>;
    type JacobianStorage = VecStorage<f64, Dynamic, Dynamic>;
    type ParameterStorage = VecStorage<f64, Dynamic, U1>;

    fn set_params(&mut self, params: &DVector<f64>) {
        self.params.copy_from(params);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        Some(self.function.residuals(&self.params))
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        Some(self.function.jacobian(&self.params))
    }
}

/// Simplex steps for an se(3) pose vector, translation first.
///
/// The translation steps are relative to the existing translation and the rotation steps stay
/// within a small rotation (`2 pi` would be a complete revolution).
pub fn pose_simplex_steps(se3: &[f64]) -> Vec<f64> {
    let translation_scale = se3[..3].iter().map(|n| n.powi(2)).sum::<f64>().sqrt() * 0.5;
    let translation_step = if translation_scale > 0.0 {
        translation_scale * 0.01
    } else {
        0.01
    };
    (0..se3.len())
        .map(|ix| {
            if ix < 3 {
                translation_step
            } else {
                std::f64::consts::PI * 0.001
            }
        })
        .collect()
}

/// Simplex steps of 5% of each parameter, or `0.00025` for zero parameters.
pub fn relative_simplex_steps(params: &[f64]) -> Vec<f64> {
    params
        .iter()
        .map(|&p| if p != 0.0 { 0.05 * p } else { 0.00025 })
        .collect()
}

/// `n` copies of `start` each moved along one axis, followed by `start` itself.
fn nelder_mead_simplex(start: &[f64], steps: &[f64]) -> NelderMead<Vec<f64>, f64> {
    let mut variants = vec![start.to_vec(); start.len() + 1];
    for (ix, step) in steps.iter().enumerate().take(start.len()) {
        variants[ix][ix] += step;
    }
    NelderMead::new().with_initial_params(variants)
}

/// Minimizes with Nelder-Mead, rebuilding the simplex around the best vertex until a run stops
/// paying off.
pub fn minimize_nelder_mead<F>(
    function: F,
    start: DVector<f64>,
    steps: &[f64],
    settings: &NelderMeadSettings,
) -> Result<Minimum, Error>
where
    F: ResidualFunction + Clone,
{
    let start_cost = function.cost(&start);
    let mut best = Minimum::unchanged(start, start_cost);
    if best.params.is_empty() {
        return Ok(best);
    }
    for restart in 0..=settings.max_restarts {
        let solver = nelder_mead_simplex(best.params.as_slice(), steps)
            .sd_tolerance(settings.sd_tolerance);
        let state = Executor::new(
            CostOp(function.clone()),
            solver,
            best.params.as_slice().to_vec(),
        )
        .add_observer(OptimizationObserver, ObserverMode::Always)
        .max_iters(settings.max_iterations)
        .run()?
        .state;

        let previous_cost = best.cost;
        let candidate = Minimum::better_of(
            best.params.clone(),
            previous_cost,
            state.best_param,
            state.best_cost,
        );
        if candidate.cost >= previous_cost {
            break;
        }
        debug!(
            "nelder-mead run {} lowered the cost from {} to {}",
            restart, previous_cost, candidate.cost
        );
        best.params = candidate.params;
        best.cost = candidate.cost;
        if previous_cost - best.cost <= settings.restart_tolerance * previous_cost {
            break;
        }
    }
    best.start_cost = start_cost;
    Ok(best)
}

/// One conjugate gradient run from `start`.
///
/// A line search that fails once the minimum is reached ends the run with the best iterate seen
/// so far instead of an error.
fn conjugate_gradient_run<F>(
    function: F,
    start: &DVector<f64>,
    settings: &ConjugateGradientSettings,
) -> Result<Option<(Vec<f64>, f64)>, Error>
where
    F: ResidualFunction + Clone,
{
    let best = BestIterate::default();
    let linesearch = MoreThuenteLineSearch::new();
    let solver = NonlinearConjugateGradient::new(linesearch, PolakRibiere::new())?
        .restart_iters(settings.restart_iterations)
        .restart_orthogonality(settings.restart_orthogonality);
    let outcome = Executor::new(CostOp(function), solver, start.as_slice().to_vec())
        .add_observer(OptimizationObserver, ObserverMode::Always)
        .add_observer(best.clone(), ObserverMode::Always)
        .max_iters(settings.max_iterations)
        .run();
    Ok(match outcome {
        Ok(result) => Some((result.state.best_param, result.state.best_cost)),
        Err(e) => {
            debug!("conjugate gradient stopped early: {}", e);
            best.take()
        }
    })
}

/// Minimizes with Polak-Ribière conjugate gradients.
///
/// Runs are chained from the best iterate of the previous one until a run no longer lowers the
/// cost or `max_restarts` is reached.
pub fn minimize_conjugate_gradient<F>(
    function: F,
    start: DVector<f64>,
    settings: &ConjugateGradientSettings,
) -> Result<Minimum, Error>
where
    F: ResidualFunction + Clone,
{
    let start_cost = function.cost(&start);
    let mut best = Minimum::unchanged(start, start_cost);
    if best.params.is_empty() {
        return Ok(best);
    }
    for restart in 0..=settings.max_restarts {
        let previous_cost = best.cost;
        let candidate = match conjugate_gradient_run(function.clone(), &best.params, settings)? {
            Some((params, cost)) => {
                Minimum::better_of(best.params.clone(), previous_cost, params, cost)
            }
            None => break,
        };
        if candidate.cost >= previous_cost {
            break;
        }
        debug!(
            "conjugate gradient run {} lowered the cost from {} to {}",
            restart, previous_cost, candidate.cost
        );
        best.params = candidate.params;
        best.cost = candidate.cost;
    }
    best.start_cost = start_cost;
    Ok(best)
}

pub fn minimize_levenberg_marquardt<F>(
    function: F,
    start: DVector<f64>,
    settings: &LevenbergMarquardtSettings,
) -> Minimum
where
    F: ResidualFunction,
{
    let start_cost = function.cost(&start);
    if start.is_empty() {
        return Minimum::unchanged(start, start_cost);
    }
    let problem = LeastSquares {
        function,
        params: start.clone(),
    };
    let (problem, report) = LevenbergMarquardt::new()
        .with_ftol(settings.ftol)
        .with_xtol(settings.xtol)
        .with_gtol(settings.gtol)
        .with_patience(settings.patience)
        .minimize(problem);
    debug!(
        "levenberg-marquardt terminated with {:?} after {} evaluations",
        report.termination, report.number_of_evaluations
    );
    let cost = problem.function.cost(&problem.params);
    Minimum::better_of(start, start_cost, problem.params.as_slice().to_vec(), cost)
}

/// Minimizes `function` from `start` with the chosen backend.
///
/// `steps` are the initial simplex steps of the derivative-free backend.
pub fn minimize<F>(
    function: F,
    start: DVector<f64>,
    steps: &[f64],
    backend: Backend,
    settings: &OptimizerSettings,
) -> Result<Minimum, Error>
where
    F: ResidualFunction + Clone,
{
    match backend {
        Backend::DerivativeFree => {
            minimize_nelder_mead(function, start, steps, &settings.nelder_mead)
        }
        Backend::LevenbergMarquardt => Ok(minimize_levenberg_marquardt(
            function,
            start,
            &settings.levenberg_marquardt,
        )),
        Backend::ConjugateGradient => {
            minimize_conjugate_gradient(function, start, &settings.conjugate_gradient)
        }
    }
}
