//! Scoring how well one curve explains a slice of the series.

use tracing::warn;

use crate::curve::CurveFunction;
use crate::normalize::{angular_difference, NormalizedSeries};
use crate::solver::{CurveProblem, LeastSquaresSolver, SolverError};
use crate::Period;

/// Smallest `end - start` a slice may have before it is fitted.
pub const MIN_SLICE_SPAN: usize = 4;

#[derive(Clone, Debug, PartialEq)]
pub enum FitStatus {
    Converged,
    /// Fewer samples than [`MIN_SLICE_SPAN`] allows; the solver never ran.
    TooShort,
    SolverFailed(SolverError),
}

/// Outcome of fitting one slice.
///
/// The curve is evaluated at `x - origin`, where `origin` is the normalized
/// time of the slice's first sample, so `coefficients[0]` is the fitted
/// bearing at the start of the slice.
#[derive(Clone, Debug, PartialEq)]
pub struct FitResult {
    pub coefficients: Vec<f64>,
    pub origin: f64,
    /// RMS residual divided by the number of samples; `+∞` when unscored.
    pub rms_error: f64,
    /// RMS residual (normalized radians) before division; `+∞` when unscored.
    pub residual_rms: f64,
    pub status: FitStatus,
}

impl FitResult {
    /// True when the fit converged to a finite score.
    pub fn is_scored(&self) -> bool {
        self.status == FitStatus::Converged && self.rms_error.is_finite()
    }

    /// Fitted bearing (normalized radians) at normalized time `x`.
    pub fn predict<F: CurveFunction + ?Sized>(&self, function: &F, x: f64) -> f64 {
        function.value_at(x - self.origin, &self.coefficients)
    }
}

/// Fits a [`CurveFunction`] to index ranges of one normalized series.
pub struct SliceFitter<'a, F: ?Sized, S> {
    series: &'a NormalizedSeries,
    function: &'a F,
    solver: S,
}

impl<'a, F, S> SliceFitter<'a, F, S>
where
    F: CurveFunction + ?Sized,
    S: LeastSquaresSolver,
{
    pub fn new(series: &'a NormalizedSeries, function: &'a F, solver: S) -> Self {
        Self {
            series,
            function,
            solver,
        }
    }

    pub fn series(&self) -> &'a NormalizedSeries {
        self.series
    }

    pub fn function(&self) -> &'a F {
        self.function
    }

    /// Fit the curve over `period` (inclusive) starting from `initial`.
    ///
    /// The first seed is replaced by the observed bearing at `period.start`.
    /// Slices shorter than [`MIN_SLICE_SPAN`] and solver failures both score
    /// `+∞`; the status says which.
    pub fn score_slice(&self, period: Period, initial: &[f64]) -> FitResult {
        assert!(
            period.end < self.series.len(),
            "slice {}..={} outside series of {} samples",
            period.start,
            period.end,
            self.series.len()
        );
        assert_eq!(
            initial.len(),
            self.function.param_count(),
            "initial parameters do not match the {} curve",
            self.function.name()
        );

        let times = &self.series.times()[period.start..=period.end];
        let targets = &self.series.bearings()[period.start..=period.end];
        let origin = times[0];
        let mut seed = initial.to_vec();
        seed[0] = targets[0];

        if period.span() < MIN_SLICE_SPAN {
            return FitResult {
                coefficients: seed,
                origin,
                rms_error: f64::INFINITY,
                residual_rms: f64::INFINITY,
                status: FitStatus::TooShort,
            };
        }

        let function = self.function;
        let weights = vec![1.0; targets.len()];
        let problem = CurveProblem::new(
            |params: &[f64], values: &mut [f64]| {
                for (value, &t) in values.iter_mut().zip(times.iter()) {
                    *value = function.value_at(t - origin, params);
                }
            },
            targets,
            &weights,
        )
        .with_difference(angular_difference);

        match self.solver.solve(&problem, &seed) {
            Ok(solution) => FitResult {
                coefficients: solution.parameters,
                origin,
                rms_error: solution.rms_error / targets.len() as f64,
                residual_rms: solution.rms_error,
                status: FitStatus::Converged,
            },
            Err(err) => {
                warn!(
                    start = period.start,
                    end = period.end,
                    curve = function.name(),
                    error = %err,
                    "slice fit failed"
                );
                FitResult {
                    coefficients: seed,
                    origin,
                    rms_error: f64::INFINITY,
                    residual_rms: f64::INFINITY,
                    status: FitStatus::SolverFailed(err),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::{ArcTanFunction, LinearRateFunction};
    use crate::solver::{LevenbergMarquardt, LmConfig};

    fn arctan_series(params: [f64; 3], len: usize) -> NormalizedSeries {
        let f = ArcTanFunction;
        let times: Vec<f64> = (0..len).map(|i| i as f64 / (len - 1) as f64).collect();
        let bearings = times.iter().map(|&x| f.value_at(x, &params)).collect();
        NormalizedSeries::from_normalized(times, bearings)
    }

    #[test]
    fn short_slice_is_not_fitted() {
        let series = arctan_series([0.3, 0.5, 0.1], 20);
        let fitter = SliceFitter::new(&series, &ArcTanFunction, LevenbergMarquardt::default());
        let fit = fitter.score_slice(Period::new(2, 5), &[0.0, 0.0, 0.0]);
        assert_eq!(fit.status, FitStatus::TooShort);
        assert!(fit.rms_error.is_infinite());
        assert!(fit.residual_rms.is_infinite());
        assert!(!fit.is_scored());
    }

    #[test]
    fn exact_curve_scores_near_zero() {
        let series = arctan_series([0.4, 0.8, -0.3], 30);
        let fitter = SliceFitter::new(&series, &ArcTanFunction, LevenbergMarquardt::default());
        let fit = fitter.score_slice(Period::new(0, 29), &[0.0, 0.0, 0.0]);
        assert!(fit.is_scored());
        assert!(fit.rms_error < 1e-8, "score {}", fit.rms_error);
        for i in 0..30 {
            let x = series.times()[i];
            let err = angular_difference(fit.predict(&ArcTanFunction, x), series.bearings()[i]);
            assert!(err.abs() < 1e-6);
        }
    }

    #[test]
    fn interior_slice_uses_local_origin() {
        let series = arctan_series([1.0, -0.6, 0.4], 40);
        let fitter = SliceFitter::new(&series, &ArcTanFunction, LevenbergMarquardt::default());
        let fit = fitter.score_slice(Period::new(20, 35), &[0.0, 0.0, 0.0]);
        assert!(fit.is_scored());
        assert_eq!(fit.origin, series.times()[20]);
        assert!((fit.coefficients[0] - series.bearings()[20]).abs() < 1e-6);
    }

    #[test]
    fn fits_across_the_half_turn() {
        // Starts just below +π and finishes beyond it, i.e. wrapped near -π.
        let series = arctan_series([3.0, -0.5, 0.0], 25);
        assert!(series.bearings().iter().any(|&b| b < 0.0));
        let fitter = SliceFitter::new(&series, &ArcTanFunction, LevenbergMarquardt::default());
        let fit = fitter.score_slice(Period::new(0, 24), &[0.0, 0.0, 0.0]);
        assert!(fit.is_scored());
        assert!(fit.rms_error < 1e-8, "score {}", fit.rms_error);
    }

    #[test]
    fn solver_failure_is_reported_not_raised() {
        let series = arctan_series([0.4, 0.8, -0.3], 30);
        let solver = LevenbergMarquardt::new(LmConfig::default().with_max_iterations(0));
        let fitter = SliceFitter::new(&series, &ArcTanFunction, solver);
        let fit = fitter.score_slice(Period::new(0, 29), &[0.0, 0.0, 0.0]);
        assert!(matches!(fit.status, FitStatus::SolverFailed(SolverError::MaxIterations(0))));
        assert!(fit.rms_error.is_infinite());
    }

    #[test]
    fn other_curve_families_plug_in() {
        let times: Vec<f64> = (0..12).map(|i| i as f64 / 11.0).collect();
        let bearings = times.iter().map(|x| 0.2 + 0.7 * x).collect();
        let series = NormalizedSeries::from_normalized(times, bearings);
        let fitter = SliceFitter::new(&series, &LinearRateFunction, LevenbergMarquardt::default());
        let fit = fitter.score_slice(Period::new(0, 11), &[0.0, 0.0]);
        assert!(fit.is_scored());
        assert!((fit.coefficients[1] - 0.7).abs() < 1e-6);
    }
}
