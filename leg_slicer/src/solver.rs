//! Nonlinear least squares.
//!
//! [`LeastSquaresSolver`] is the seam the slice fitter talks to. The shipped
//! implementation hands a [`CurveProblem`] to the MINPACK-style minimizer of
//! the `levenberg-marquardt` crate, supplying a central-difference Jacobian
//! of the forward model.

use std::cell::Cell;

use levenberg_marquardt::{LeastSquaresProblem, TerminationReason};
use nalgebra::storage::Owned;
use nalgebra::{DMatrix, DVector, Dyn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    #[error("no convergence after {0} iterations")]
    MaxIterations(usize),
    #[error("residual evaluation produced a non-finite value")]
    NonFinite,
    #[error("shape mismatch: {targets} targets but {weights} weights")]
    ShapeMismatch { targets: usize, weights: usize },
    #[error("empty parameter vector")]
    NoParameters,
    #[error("minimizer stopped: {0}")]
    Terminated(String),
}

/// Best-fit parameters returned by a converged solve.
#[derive(Clone, Debug, PartialEq)]
pub struct Solution {
    pub parameters: Vec<f64>,
    /// Weighted root-mean-square residual at `parameters`.
    pub rms_error: f64,
    /// Residual evaluations spent by the minimizer.
    pub evaluations: usize,
}

/// A weighted least-squares problem over a forward model.
///
/// `model(params, values)` fills `values` with the model prediction for every
/// target; residuals are `difference(value, target)`, which lets angular
/// problems take the short way round the circle.
pub struct CurveProblem<'a, M> {
    pub model: M,
    pub targets: &'a [f64],
    pub weights: &'a [f64],
    pub difference: fn(f64, f64) -> f64,
}

impl<'a, M> CurveProblem<'a, M>
where
    M: Fn(&[f64], &mut [f64]),
{
    /// Plain `value - target` residuals.
    pub fn new(model: M, targets: &'a [f64], weights: &'a [f64]) -> Self {
        Self {
            model,
            targets,
            weights,
            difference: |value, target| value - target,
        }
    }

    pub fn with_difference(mut self, difference: fn(f64, f64) -> f64) -> Self {
        self.difference = difference;
        self
    }

    /// Residuals scaled by `√wᵢ`, so their squared norm is the weighted cost.
    /// `None` if any is not finite.
    fn weighted_residuals(&self, params: &[f64]) -> Option<DVector<f64>> {
        let mut values = vec![0.0; self.targets.len()];
        (self.model)(params, &mut values);
        let residuals = DVector::from_iterator(
            values.len(),
            values
                .iter()
                .zip(self.targets)
                .zip(self.weights)
                .map(|((&value, &target), &w)| w.sqrt() * (self.difference)(value, target)),
        );
        residuals.iter().all(|r| r.is_finite()).then_some(residuals)
    }
}

/// Anything that can minimize a [`CurveProblem`] from an initial guess.
pub trait LeastSquaresSolver {
    fn solve<M>(
        &self,
        problem: &CurveProblem<'_, M>,
        initial: &[f64],
    ) -> Result<Solution, SolverError>
    where
        M: Fn(&[f64], &mut [f64]);
}

/// Tuning for [`LevenbergMarquardt`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LmConfig {
    /// Iteration bound; the minimizer may spend `max_iterations · (m + 1)`
    /// residual evaluations for `m` parameters. Default: 10 000
    pub max_iterations: usize,
    /// Relative reduction of the cost below which the fit has converged.
    pub ftol: f64,
    /// Relative change of the parameters below which the fit has converged.
    pub xtol: f64,
    /// Orthogonality between residuals and Jacobian columns.
    pub gtol: f64,
    /// Initial step bound factor.
    pub stepbound: f64,
    pub scale_diag: bool,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10_000,
            ftol: 30.0 * f64::EPSILON,
            xtol: 30.0 * f64::EPSILON,
            gtol: 0.0,
            stepbound: 100.0,
            scale_diag: true,
        }
    }
}

impl LmConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = iterations;
        self
    }

    pub fn with_tolerance(mut self, tol: f64) -> Self {
        self.ftol = tol;
        self.xtol = tol;
        self
    }
}

#[derive(Clone, Debug, Default)]
pub struct LevenbergMarquardt {
    config: LmConfig,
}

impl LevenbergMarquardt {
    pub fn new(config: LmConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LmConfig {
        &self.config
    }

    fn minimizer(&self) -> levenberg_marquardt::LevenbergMarquardt<f64> {
        let cfg = &self.config;
        levenberg_marquardt::LevenbergMarquardt::new()
            .with_ftol(cfg.ftol)
            .with_xtol(cfg.xtol)
            .with_gtol(cfg.gtol)
            .with_stepbound(cfg.stepbound)
            .with_scale_diag(cfg.scale_diag)
            .with_patience(cfg.max_iterations)
    }
}

impl LeastSquaresSolver for LevenbergMarquardt {
    fn solve<M>(
        &self,
        problem: &CurveProblem<'_, M>,
        initial: &[f64],
    ) -> Result<Solution, SolverError>
    where
        M: Fn(&[f64], &mut [f64]),
    {
        if initial.is_empty() {
            return Err(SolverError::NoParameters);
        }
        if problem.weights.len() != problem.targets.len() {
            return Err(SolverError::ShapeMismatch {
                targets: problem.targets.len(),
                weights: problem.weights.len(),
            });
        }
        if self.config.max_iterations == 0 {
            return Err(SolverError::MaxIterations(0));
        }
        if problem.weighted_residuals(initial).is_none() {
            return Err(SolverError::NonFinite);
        }

        let adapter = ForwardModel {
            problem,
            params: DVector::from_column_slice(initial),
            non_finite: Cell::new(false),
        };
        let (adapter, report) = self.minimizer().minimize(adapter);

        if adapter.non_finite.get() {
            return Err(SolverError::NonFinite);
        }
        match report.termination {
            TerminationReason::ResidualsZero
            | TerminationReason::Orthogonal
            | TerminationReason::Converged { .. }
            | TerminationReason::NoImprovementPossible(_) => {}
            TerminationReason::LostPatience => {
                return Err(SolverError::MaxIterations(self.config.max_iterations))
            }
            other => return Err(SolverError::Terminated(format!("{other:?}"))),
        }

        let residuals = problem
            .weighted_residuals(adapter.params.as_slice())
            .ok_or(SolverError::NonFinite)?;
        let weight_sum: f64 = problem.weights.iter().sum();
        let rms_error = if weight_sum > 0.0 {
            (residuals.norm_squared() / weight_sum).sqrt()
        } else {
            0.0
        };
        Ok(Solution {
            parameters: adapter.params.as_slice().to_vec(),
            rms_error,
            evaluations: report.number_of_evaluations,
        })
    }
}

/// [`CurveProblem`] as seen by the minimizer.
struct ForwardModel<'p, 'a, M> {
    problem: &'p CurveProblem<'a, M>,
    params: DVector<f64>,
    non_finite: Cell<bool>,
}

impl<M> ForwardModel<'_, '_, M>
where
    M: Fn(&[f64], &mut [f64]),
{
    fn residuals_at(&self, params: &[f64]) -> Option<DVector<f64>> {
        let residuals = self.problem.weighted_residuals(params);
        if residuals.is_none() {
            self.non_finite.set(true);
        }
        residuals
    }
}

impl<M> LeastSquaresProblem<f64, Dyn, Dyn> for ForwardModel<'_, '_, M>
where
    M: Fn(&[f64], &mut [f64]),
{
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.params.copy_from(x);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        self.residuals_at(self.params.as_slice())
    }

    /// Central differences, `n × m`.
    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let n = self.problem.targets.len();
        let m = self.params.len();
        let mut jacobian = DMatrix::zeros(n, m);
        let mut shifted = self.params.as_slice().to_vec();

        for j in 0..m {
            let x = self.params[j];
            let h = 1e-7 * (1.0 + x.abs());
            shifted[j] = x + h;
            let forward = self.residuals_at(&shifted)?;
            shifted[j] = x - h;
            let backward = self.residuals_at(&shifted)?;
            shifted[j] = x;
            jacobian.set_column(j, &((forward - backward) / (2.0 * h)));
        }
        Some(jacobian)
    }
}
