//! Worklist-driven partition of a series into legs.
//!
//! Each pending [`Period`] is anchored on its steadiest window, the anchor is
//! fitted and grown one sample at a time while both ends stay acceptable,
//! and the grown range is either accepted as a [`Zone`] or discarded. Any
//! remainder on either side goes back on the worklist. Every step removes at
//! least the anchor from further consideration, so the loop terminates.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::boundary::BoundaryTester;
use crate::curve::CurveFunction;
use crate::fitter::{FitResult, FitStatus, SliceFitter, MIN_SLICE_SPAN};
use crate::normalize::NormalizedSeries;
use crate::solver::LeastSquaresSolver;
use crate::window::SmoothWindowFinder;
use crate::{Params, Period, ResidualPolicy, Series, SliceError};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneKind {
    /// Grown from an anchor and scored within tolerance.
    Fitted,
    /// A remainder no anchor could be found in, emitted on request.
    Residual,
}

/// A contiguous time range explained by one curve.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    /// Timestamp (ms) of the first sample.
    pub start: i64,
    /// Timestamp (ms) of the last sample.
    pub end: i64,
    pub start_index: usize,
    pub end_index: usize,
    /// Normalized RMS score of the final fit; `None` if it could not be scored.
    pub score: Option<f64>,
    pub kind: ZoneKind,
    /// Fitted compass bearing (degrees) at either end.
    pub start_bearing_deg: f64,
    pub end_bearing_deg: f64,
}

impl Zone {
    pub fn duration_ms(&self) -> i64 {
        self.end - self.start
    }

    pub fn period(&self) -> Period {
        Period::new(self.start_index, self.end_index)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentationStats {
    pub periods_processed: usize,
    pub fits: usize,
    pub solver_failures: usize,
    pub unsliceable_periods: usize,
    pub discarded_ranges: usize,
    pub zones: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Segmentation {
    /// Zones in index order, non-overlapping.
    pub zones: Vec<Zone>,
    pub stats: SegmentationStats,
}

pub struct Segmenter<'a, F: ?Sized, S> {
    series: &'a Series,
    fitter: SliceFitter<'a, F, S>,
    finder: SmoothWindowFinder,
    tester: BoundaryTester<'a, F>,
    params: &'a Params,
}

impl<'a, F, S> Segmenter<'a, F, S>
where
    F: CurveFunction + ?Sized,
    S: LeastSquaresSolver,
{
    /// Fails if `params` do not validate for `function`.
    pub fn new(
        series: &'a Series,
        normalized: &'a NormalizedSeries,
        function: &'a F,
        solver: S,
        params: &'a Params,
    ) -> Result<Self, SliceError> {
        params.validate_for(function)?;
        Ok(Self {
            series,
            fitter: SliceFitter::new(normalized, function, solver),
            finder: params.window_finder(),
            tester: BoundaryTester::new(normalized, function)
                .with_window(params.boundary_window)
                .with_noise_floor(params.boundary_noise_floor)
                .with_noise_scale(params.boundary_noise_scale),
            params,
        })
    }

    /// Drain the worklist, starting from the whole series.
    pub fn run(&self) -> Segmentation {
        let mut stats = SegmentationStats::default();
        let mut zones = Vec::new();
        let mut pending = Vec::new();

        if let Some(whole) = Period::try_new(0, self.series.len().saturating_sub(1)) {
            pending.push(whole);
        }

        while let Some(period) = pending.pop() {
            stats.periods_processed += 1;
            self.process(period, &mut pending, &mut zones, &mut stats);
        }

        zones.sort_by_key(|zone: &Zone| zone.start_index);
        stats.zones = zones.len();
        debug!(
            zones = stats.zones,
            fits = stats.fits,
            solver_failures = stats.solver_failures,
            "segmentation finished"
        );
        Segmentation { zones, stats }
    }

    fn process(
        &self,
        period: Period,
        pending: &mut Vec<Period>,
        zones: &mut Vec<Zone>,
        stats: &mut SegmentationStats,
    ) {
        let normalized = self.fitter.series();
        let Some(anchor) = self.finder.find_smooth_interior(normalized, period) else {
            stats.unsliceable_periods += 1;
            debug!(start = period.start, end = period.end, "no steady interior");
            if self.params.residual_policy == ResidualPolicy::EmitBestEffort {
                self.emit_residual(period, zones, stats);
            }
            return;
        };
        debug!(
            start = period.start,
            end = period.end,
            anchor_start = anchor.start,
            anchor_end = anchor.end,
            "anchored period"
        );

        let anchor_fit = self.fit(anchor, &self.params.initial_parameters, stats);
        let grown = if anchor_fit.is_scored() {
            let grown = self.grow(period, anchor, anchor_fit, stats);
            let fit = self.fit(grown, &self.params.initial_parameters, stats);
            if self.acceptable(grown, &fit) {
                debug!(start = grown.start, end = grown.end, score = fit.rms_error, "zone accepted");
                zones.push(self.zone(grown, &fit, ZoneKind::Fitted));
            } else {
                stats.discarded_ranges += 1;
                debug!(start = grown.start, end = grown.end, score = fit.rms_error, "range discarded");
            }
            grown
        } else {
            stats.discarded_ranges += 1;
            anchor
        };

        // Remainders either side of what was just consumed.
        if grown.start > period.start {
            if let Some(left) = Period::try_new(period.start, grown.start - 1) {
                self.requeue(left, pending);
            }
        }
        if grown.end < period.end {
            if let Some(right) = Period::try_new(grown.end + 1, period.end) {
                self.requeue(right, pending);
            }
        }
    }

    fn requeue(&self, remainder: Period, pending: &mut Vec<Period>) {
        if remainder.span() >= MIN_SLICE_SPAN {
            pending.push(remainder);
        } else {
            trace!(start = remainder.start, end = remainder.end, "remainder too short");
        }
    }

    /// Extend `anchor` outward within `period`, one sample per step.
    ///
    /// Each candidate sample is checked against the fit of the range accepted
    /// so far; only once it passes is the range re-fitted around it.
    fn grow(
        &self,
        period: Period,
        anchor: Period,
        mut fit: FitResult,
        stats: &mut SegmentationStats,
    ) -> Period {
        let mut current = anchor;

        while current.start > period.start {
            let candidate = Period::new(current.start - 1, current.end);
            match self.extend(candidate, &fit, stats) {
                Some(refit) => {
                    current = candidate;
                    fit = refit;
                }
                None => break,
            }
        }

        while current.end < period.end {
            let candidate = Period::new(current.start, current.end + 1);
            match self.extend(candidate, &fit, stats) {
                Some(refit) => {
                    current = candidate;
                    fit = refit;
                }
                None => break,
            }
        }

        current
    }

    fn extend(
        &self,
        candidate: Period,
        fit: &FitResult,
        stats: &mut SegmentationStats,
    ) -> Option<FitResult> {
        if !self.tester.both_ends_acceptable(fit, candidate) {
            trace!(start = candidate.start, end = candidate.end, "boundary rejected");
            return None;
        }
        let refit = self.fit(candidate, &fit.coefficients, stats);
        refit.is_scored().then_some(refit)
    }

    fn fit(&self, period: Period, initial: &[f64], stats: &mut SegmentationStats) -> FitResult {
        let fit = self.fitter.score_slice(period, initial);
        if fit.status != FitStatus::TooShort {
            stats.fits += 1;
        }
        if matches!(fit.status, FitStatus::SolverFailed(_)) {
            stats.solver_failures += 1;
        }
        fit
    }

    fn acceptable(&self, period: Period, fit: &FitResult) -> bool {
        fit.is_scored()
            && fit.rms_error <= self.params.fit_tolerance
            && self.duration_ms(period) >= self.params.min_leg_ms
    }

    fn duration_ms(&self, period: Period) -> i64 {
        let times = self.series.times();
        times[period.end] - times[period.start]
    }

    fn emit_residual(&self, period: Period, zones: &mut Vec<Zone>, stats: &mut SegmentationStats) {
        if period.span() < MIN_SLICE_SPAN || self.duration_ms(period) < self.params.min_leg_ms {
            return;
        }
        let fit = self.fit(period, &self.params.initial_parameters, stats);
        zones.push(self.zone(period, &fit, ZoneKind::Residual));
    }

    fn zone(&self, period: Period, fit: &FitResult, kind: ZoneKind) -> Zone {
        let normalized = self.fitter.series();
        let function = self.fitter.function();
        let to_degrees = normalized.bearing_normaliser();
        let bearing_at = |index: usize| {
            if fit.is_scored() {
                to_degrees.denormalize(fit.predict(function, normalized.times()[index]))
            } else {
                self.series.bearings()[index]
            }
        };
        let times = self.series.times();
        Zone {
            start: times[period.start],
            end: times[period.end],
            start_index: period.start,
            end_index: period.end,
            score: fit.is_scored().then_some(fit.rms_error),
            kind,
            start_bearing_deg: bearing_at(period.start),
            end_bearing_deg: bearing_at(period.end),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::ArcTanFunction;
    use crate::solver::LevenbergMarquardt;
    use crate::synthetic::{LegSpec, Track};

    fn run(series: &Series, params: &Params) -> Segmentation {
        let normalized = NormalizedSeries::from_series(series);
        Segmenter::new(
            series,
            &normalized,
            &ArcTanFunction,
            LevenbergMarquardt::default(),
            params,
        )
        .unwrap()
        .run()
    }

    fn params() -> Params {
        Params {
            min_leg_ms: 60_000,
            ..Params::default()
        }
    }

    #[test]
    fn single_sample_series_has_no_zones() {
        let series = Series::new(vec![0], vec![10.0]).unwrap();
        let result = run(&series, &params());
        assert!(result.zones.is_empty());
        assert_eq!(result.stats.periods_processed, 0);
    }

    #[test]
    fn short_series_is_unsliceable() {
        let series = Series::new((0..8).map(|i| i * 10_000).collect(), vec![45.0; 8]).unwrap();
        let result = run(&series, &params());
        assert!(result.zones.is_empty());
        assert_eq!(result.stats.unsliceable_periods, 1);
    }

    #[test]
    fn residual_policy_emits_best_effort_zone() {
        let series = Series::new((0..8).map(|i| i * 10_000).collect(), vec![45.0; 8]).unwrap();
        let params = Params {
            residual_policy: ResidualPolicy::EmitBestEffort,
            ..params()
        };
        let result = run(&series, &params);
        assert_eq!(result.zones.len(), 1);
        assert_eq!(result.zones[0].kind, ZoneKind::Residual);
        assert_eq!(result.zones[0].period(), Period::new(0, 7));
    }

    #[test]
    fn zones_do_not_overlap_and_are_ordered() {
        let track = Track {
            legs: vec![
                LegSpec::new(30, 0.5, 0.2),
                LegSpec::new(30, -1.2, 0.4),
                LegSpec::new(30, 0.9, -0.5),
            ],
            ..Track::default()
        };
        let series = track.generate().unwrap();
        let result = run(&series, &params());
        assert!(!result.zones.is_empty());
        for pair in result.zones.windows(2) {
            assert!(pair[0].end_index < pair[1].start_index, "{pair:?}");
        }
        assert_eq!(result.stats.zones, result.zones.len());
    }

    #[test]
    fn unreachable_tolerance_discards_every_range() {
        let series = Track {
            legs: vec![LegSpec::new(40, 0.5, 0.2)],
            noise_deg: 0.5,
            ..Track::default()
        }
        .generate()
        .unwrap();
        let params = Params {
            fit_tolerance: 0.0,
            ..params()
        };
        let result = run(&series, &params);
        assert!(result.zones.is_empty());
        assert!(result.stats.discarded_ranges >= 1);
    }

    #[test]
    fn construction_rejects_unusable_params() {
        let series = Series::new((0..8).map(|i| i * 10_000).collect(), vec![45.0; 8]).unwrap();
        let normalized = NormalizedSeries::from_series(&series);
        let cases = [
            Params {
                initial_parameters: vec![0.0; 2],
                ..params()
            },
            Params {
                wide_window: 0,
                window_thresholds: vec![],
                ..params()
            },
        ];
        for params in &cases {
            let built = Segmenter::new(
                &series,
                &normalized,
                &ArcTanFunction,
                LevenbergMarquardt::default(),
                params,
            );
            assert!(matches!(built, Err(SliceError::InvalidParameter(_))));
        }
    }
}
