//! Splitting a bearing track into legs of steady relative motion.
//!
//! A [`Series`] of timestamped bearings is normalized once, then partitioned
//! by [`segment`] into [`Zone`]s, each well explained by one member of a
//! [`CurveFunction`] family. [`get_zones`] is the short form that only takes
//! a tolerance and a minimum leg length.

pub mod boundary;
pub mod curve;
pub mod fitter;
pub mod ingest;
pub mod normalize;
pub mod segmenter;
pub mod solver;
pub mod synthetic;
pub mod window;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub use crate::curve::{ArcTanFunction, CurveFunction, LinearRateFunction};
pub use crate::fitter::{FitResult, FitStatus, SliceFitter, MIN_SLICE_SPAN};
pub use crate::normalize::NormalizedSeries;
pub use crate::segmenter::{Segmentation, SegmentationStats, Segmenter, Zone, ZoneKind};
pub use crate::solver::{LevenbergMarquardt, LmConfig};

use crate::boundary::{DEFAULT_BOUNDARY_WINDOW, DEFAULT_NOISE_FLOOR, DEFAULT_NOISE_SCALE};
use crate::window::{SmoothWindowFinder, DEFAULT_WIDE_WINDOW, DEFAULT_WINDOW_STEPS};

#[derive(Error, Debug)]
pub enum SliceError {
    #[error("invalid input series: {0}")]
    InvalidInput(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("failed to read records: {0}")]
    Ingest(String),
}

/// Timestamped bearing observations, strictly increasing in time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Series {
    times: Vec<i64>,
    bearings: Vec<f64>,
}

impl Series {
    /// `times` in epoch milliseconds, `bearings` in compass degrees.
    pub fn new(times: Vec<i64>, bearings: Vec<f64>) -> Result<Self, SliceError> {
        if times.is_empty() {
            return Err(SliceError::InvalidInput("series is empty".into()));
        }
        if times.len() != bearings.len() {
            return Err(SliceError::InvalidInput(format!(
                "{} timestamps but {} bearings",
                times.len(),
                bearings.len()
            )));
        }
        if let Some(i) = times.windows(2).position(|w| w[1] <= w[0]) {
            return Err(SliceError::InvalidInput(format!(
                "timestamp at index {} does not increase",
                i + 1
            )));
        }
        if let Some(i) = bearings.iter().position(|b| !b.is_finite()) {
            return Err(SliceError::InvalidInput(format!(
                "bearing at index {i} is not finite"
            )));
        }
        Ok(Self { times, bearings })
    }

    pub fn times(&self) -> &[i64] {
        &self.times
    }

    pub fn bearings(&self) -> &[f64] {
        &self.bearings
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn duration_ms(&self) -> i64 {
        self.times[self.times.len() - 1] - self.times[0]
    }
}

/// Closed index range `[start, end]` with `start < end`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Period {
    pub start: usize,
    pub end: usize,
}

impl Period {
    pub fn new(start: usize, end: usize) -> Self {
        assert!(start < end, "empty period {start}..={end}");
        Self { start, end }
    }

    pub fn try_new(start: usize, end: usize) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    /// Number of samples covered.
    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    pub fn span(&self) -> usize {
        self.end - self.start
    }
}

/// What happens to a period no steady interior can be found in.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResidualPolicy {
    Discard,
    /// Emit it as a [`ZoneKind::Residual`] zone when long enough.
    EmitBestEffort,
}

impl Default for ResidualPolicy {
    fn default() -> Self {
        ResidualPolicy::Discard
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Params {
    /// Highest normalized RMS score a zone may have.
    pub fit_tolerance: f64,
    pub min_leg_ms: i64,
    /// Solver seeds; the first is replaced by each slice's first bearing.
    pub initial_parameters: Vec<f64>,
    pub max_iterations: usize,
    pub boundary_window: usize,
    pub boundary_noise_floor: f64,
    /// Boundary band width in multiples of the fit's RMS residual.
    pub boundary_noise_scale: f64,
    /// `(period length below, window)` steps for the anchor search.
    pub window_thresholds: Vec<(usize, usize)>,
    pub wide_window: usize,
    pub residual_policy: ResidualPolicy,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            fit_tolerance: 1e-3,
            min_leg_ms: 5 * 60 * 1000,
            initial_parameters: vec![0.0; 3],
            max_iterations: 10_000,
            boundary_window: DEFAULT_BOUNDARY_WINDOW,
            boundary_noise_floor: DEFAULT_NOISE_FLOOR,
            boundary_noise_scale: DEFAULT_NOISE_SCALE,
            window_thresholds: DEFAULT_WINDOW_STEPS.to_vec(),
            wide_window: DEFAULT_WIDE_WINDOW,
            residual_policy: ResidualPolicy::default(),
        }
    }
}

impl Params {
    /// Defaults with seeds sized for `function`.
    pub fn for_function<F: CurveFunction + ?Sized>(function: &F) -> Self {
        Self {
            initial_parameters: vec![0.0; function.param_count()],
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), SliceError> {
        let invalid = |msg: String| Err(SliceError::InvalidParameter(msg));
        if !self.fit_tolerance.is_finite() || self.fit_tolerance < 0.0 {
            return invalid(format!("fit tolerance {} must be >= 0", self.fit_tolerance));
        }
        if self.min_leg_ms < 0 {
            return invalid(format!("minimum leg {} ms must be >= 0", self.min_leg_ms));
        }
        if self.initial_parameters.is_empty() {
            return invalid("initial parameters are empty".into());
        }
        if self.initial_parameters.iter().any(|p| !p.is_finite()) {
            return invalid("initial parameters must be finite".into());
        }
        if self.max_iterations == 0 {
            return invalid("iteration bound must be positive".into());
        }
        if self.boundary_window < 2 {
            return invalid(format!(
                "boundary window {} must cover at least 2 samples",
                self.boundary_window
            ));
        }
        if !self.boundary_noise_floor.is_finite() || self.boundary_noise_floor < 0.0 {
            return invalid(format!(
                "boundary noise floor {} must be >= 0",
                self.boundary_noise_floor
            ));
        }
        if !self.boundary_noise_scale.is_finite() || self.boundary_noise_scale < 0.0 {
            return invalid(format!(
                "boundary noise scale {} must be >= 0",
                self.boundary_noise_scale
            ));
        }

        let mut last: Option<(usize, usize)> = None;
        for &(below, window) in &self.window_thresholds {
            if window <= MIN_SLICE_SPAN {
                return invalid(format!(
                    "anchor window {window} must exceed {MIN_SLICE_SPAN} samples"
                ));
            }
            if let Some((last_below, last_window)) = last {
                if below <= last_below || window < last_window {
                    return invalid("window thresholds must be increasing".into());
                }
            }
            last = Some((below, window));
        }
        let widest = last.map(|(_, w)| w).unwrap_or(MIN_SLICE_SPAN + 1);
        if self.wide_window < widest {
            return invalid(format!(
                "wide window {} is narrower than {widest}",
                self.wide_window
            ));
        }
        Ok(())
    }

    /// [`Params::validate`], plus a seed count matching `function`.
    pub fn validate_for<F: CurveFunction + ?Sized>(&self, function: &F) -> Result<(), SliceError> {
        self.validate()?;
        if self.initial_parameters.len() != function.param_count() {
            return Err(SliceError::InvalidParameter(format!(
                "{} initial parameters for the {} curve, which takes {}",
                self.initial_parameters.len(),
                function.name(),
                function.param_count()
            )));
        }
        Ok(())
    }

    pub fn window_finder(&self) -> SmoothWindowFinder {
        SmoothWindowFinder::new(self.window_thresholds.clone(), self.wide_window)
    }

    pub fn solver(&self) -> LevenbergMarquardt {
        LevenbergMarquardt::new(LmConfig::default().with_max_iterations(self.max_iterations))
    }
}

/// Partition `series` into zones explained by `function`.
pub fn segment<F: CurveFunction + ?Sized>(
    series: &Series,
    function: &F,
    params: &Params,
) -> Result<Segmentation, SliceError> {
    params.validate_for(function)?;

    let normalized = NormalizedSeries::from_series(series);
    debug!(
        samples = series.len(),
        curve = function.name(),
        tolerance = params.fit_tolerance,
        min_leg_ms = params.min_leg_ms,
        "segmenting series"
    );
    let segmenter = Segmenter::new(series, &normalized, function, params.solver(), params)?;
    Ok(segmenter.run())
}

/// Zones of `series` scoring at most `fit_tolerance` and lasting at least
/// `min_leg_ms`, in time order.
pub fn get_zones<F: CurveFunction + ?Sized>(
    series: &Series,
    function: &F,
    fit_tolerance: f64,
    min_leg_ms: i64,
) -> Result<Vec<Zone>, SliceError> {
    let params = Params {
        fit_tolerance,
        min_leg_ms,
        ..Params::for_function(function)
    };
    segment(series, function, &params).map(|segmentation| segmentation.zones)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn series_rejects_bad_input() {
        assert!(matches!(
            Series::new(vec![], vec![]),
            Err(SliceError::InvalidInput(_))
        ));
        assert!(Series::new(vec![0, 1], vec![1.0]).is_err());
        assert!(Series::new(vec![0, 5, 5], vec![1.0, 2.0, 3.0]).is_err());
        assert!(Series::new(vec![0, 1], vec![1.0, f64::NAN]).is_err());
        let series = Series::new(vec![0, 1_000, 3_000], vec![1.0, 2.0, 3.0]).unwrap();
        assert_eq!(series.len(), 3);
        assert_eq!(series.duration_ms(), 3_000);
    }

    #[test]
    fn period_lengths() {
        let period = Period::new(3, 7);
        assert_eq!(period.len(), 5);
        assert_eq!(period.span(), 4);
        assert!(Period::try_new(4, 4).is_none());
    }

    #[test]
    #[should_panic]
    fn empty_period_panics() {
        let _ = Period::new(5, 5);
    }

    #[test]
    fn default_params_validate() {
        assert!(Params::default().validate().is_ok());
        assert!(Params::for_function(&LinearRateFunction).validate().is_ok());
    }

    #[test]
    fn invalid_params_are_rejected() {
        let cases = [
            Params {
                fit_tolerance: -1.0,
                ..Params::default()
            },
            Params {
                fit_tolerance: f64::NAN,
                ..Params::default()
            },
            Params {
                initial_parameters: vec![],
                ..Params::default()
            },
            Params {
                max_iterations: 0,
                ..Params::default()
            },
            Params {
                boundary_window: 1,
                ..Params::default()
            },
            Params {
                boundary_noise_scale: -0.5,
                ..Params::default()
            },
            Params {
                window_thresholds: vec![(20, 4)],
                ..Params::default()
            },
            Params {
                window_thresholds: vec![(40, 7), (20, 5)],
                ..Params::default()
            },
            Params {
                wide_window: 6,
                ..Params::default()
            },
        ];
        for params in cases {
            assert!(
                matches!(params.validate(), Err(SliceError::InvalidParameter(_))),
                "{params:?}"
            );
        }
    }

    #[test]
    fn params_load_partial_json() {
        let params: Params =
            serde_json::from_str(r#"{"fit_tolerance": 0.01, "residual_policy": "emit_best_effort"}"#)
                .unwrap();
        assert_eq!(params.fit_tolerance, 0.01);
        assert_eq!(params.residual_policy, ResidualPolicy::EmitBestEffort);
        assert_eq!(params.min_leg_ms, Params::default().min_leg_ms);
    }

    #[test]
    fn seed_length_must_match_curve() {
        let series = Series::new((0..30).map(|i| i * 1_000).collect(), vec![10.0; 30]).unwrap();
        let err = segment(&series, &LinearRateFunction, &Params::default()).unwrap_err();
        assert!(matches!(err, SliceError::InvalidParameter(_)));
    }
}
