//! Weight and flow estimators.
//!
//! Each [`Estimator`] reads a [`HistorySnapshot`] and produces one
//! [`Estimate`] for its [`Slot`], or skips when it lacks data. The
//! [`EstimatorPipeline`] runs them in a fixed order and writes results into
//! [`Estimates`]; a skip or an error leaves the slot's previous value alone.
//!
//! | Estimator | Needs | Value |
//! |-----------|-------|-------|
//! | [`CurrentWeight`] | 1 sample | newest weight |
//! | [`AverageFlow`] | 2 samples | least-squares slope over the window |
//! | [`MedianWeight`] | 1 sample | median weight over the window |
//! | [`MedianFlow`] | `subwindow` samples | median of sub-window endpoint slopes |

use std::panic::{AssertUnwindSafe, catch_unwind};

use thiserror::Error;
use tracing::warn;

use crema_types::Estimate;

use crate::error::{Error, Result};
use crate::history::HistorySnapshot;

/// Outcome of one estimator pass: `Ok(None)` skips the pass.
pub type EstimateResult = std::result::Result<Option<Estimate>, EstimateError>;

/// Default window for the bundled estimators.
pub const DEFAULT_WINDOW: usize = 10;

/// Default sub-window for [`MedianFlow`].
pub const DEFAULT_SUBWINDOW: usize = 5;

/// Failure inside an estimator. Logged by the pipeline, never propagated.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum EstimateError {
    /// The samples span no time, so no rate exists.
    #[error("degenerate time base over {samples} samples")]
    DegenerateTime { samples: usize },

    /// The computation produced NaN or infinity.
    #[error("non-finite result {0}")]
    NonFinite(f64),

    /// The estimator panicked.
    #[error("estimator panicked")]
    Panicked,
}

/// Output slot owned by an estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    CurrentWeight,
    AverageFlow,
    MedianWeight,
    MedianFlow,
}

/// One `(value, time)` pair per slot.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Estimates {
    pub current_weight: Estimate,
    pub average_flow: Estimate,
    pub median_weight: Estimate,
    pub median_flow: Estimate,
}

impl Estimates {
    /// Value currently held in `slot`.
    pub fn get(&self, slot: Slot) -> Estimate {
        match slot {
            Slot::CurrentWeight => self.current_weight,
            Slot::AverageFlow => self.average_flow,
            Slot::MedianWeight => self.median_weight,
            Slot::MedianFlow => self.median_flow,
        }
    }

    fn slot_mut(&mut self, slot: Slot) -> &mut Estimate {
        match slot {
            Slot::CurrentWeight => &mut self.current_weight,
            Slot::AverageFlow => &mut self.average_flow,
            Slot::MedianWeight => &mut self.median_weight,
            Slot::MedianFlow => &mut self.median_flow,
        }
    }
}

/// A pure function of recent history.
pub trait Estimator: Send + Sync + std::fmt::Debug {
    /// Slot this estimator writes.
    fn slot(&self) -> Slot;

    /// Number of most-recent samples considered.
    fn window(&self) -> usize;

    /// Compute an estimate, or `Ok(None)` to skip this pass.
    ///
    /// A panic is caught by the pipeline and handled like an error.
    fn estimate(&self, history: &HistorySnapshot) -> EstimateResult;
}

/// Newest sample's weight.
#[derive(Debug, Clone, Default)]
pub struct CurrentWeight;

impl Estimator for CurrentWeight {
    fn slot(&self) -> Slot {
        Slot::CurrentWeight
    }

    fn window(&self) -> usize {
        1
    }

    fn estimate(&self, history: &HistorySnapshot) -> EstimateResult {
        Ok(history.latest().map(|(t, w)| Estimate::new(w, t)))
    }
}

/// Least-squares mass flow over the window.
#[derive(Debug, Clone)]
pub struct AverageFlow {
    window: usize,
}

impl AverageFlow {
    /// Create with a window of at least 2 samples.
    pub fn new(window: usize) -> Result<Self> {
        if window < 2 {
            return Err(Error::invalid_config(format!(
                "average flow window must be >= 2, got {}",
                window
            )));
        }
        Ok(Self { window })
    }
}

impl Estimator for AverageFlow {
    fn slot(&self) -> Slot {
        Slot::AverageFlow
    }

    fn window(&self) -> usize {
        self.window
    }

    fn estimate(&self, history: &HistorySnapshot) -> EstimateResult {
        let (times, weights) = history.tail(self.window);
        if times.len() < 2 {
            return Ok(None);
        }
        let slope = least_squares_slope(times, weights)?;
        Ok(Some(Estimate::new(slope, times[times.len() - 1])))
    }
}

/// Median weight over the window.
#[derive(Debug, Clone)]
pub struct MedianWeight {
    window: usize,
}

impl MedianWeight {
    /// Create with a window of at least 1 sample.
    pub fn new(window: usize) -> Result<Self> {
        if window == 0 {
            return Err(Error::invalid_config("median weight window must be >= 1"));
        }
        Ok(Self { window })
    }
}

impl Estimator for MedianWeight {
    fn slot(&self) -> Slot {
        Slot::MedianWeight
    }

    fn window(&self) -> usize {
        self.window
    }

    fn estimate(&self, history: &HistorySnapshot) -> EstimateResult {
        let (times, weights) = history.tail(self.window);
        let Some(&time) = times.last() else {
            return Ok(None);
        };
        let value = median(weights.to_vec()).ok_or(EstimateError::NonFinite(f64::NAN))?;
        Ok(Some(Estimate::new(value, time)))
    }
}

/// Median of the flows over sliding sub-windows.
///
/// Every run of `subwindow` consecutive samples inside the last `window`
/// contributes one endpoint slope; the median of those rejects single-sample
/// spikes that would skew a plain fit.
#[derive(Debug, Clone)]
pub struct MedianFlow {
    window: usize,
    subwindow: usize,
}

impl MedianFlow {
    /// Create with `2 <= subwindow <= window`.
    pub fn new(window: usize, subwindow: usize) -> Result<Self> {
        if subwindow < 2 || subwindow > window {
            return Err(Error::invalid_config(format!(
                "median flow requires 2 <= subwindow <= window, got subwindow={} window={}",
                subwindow, window
            )));
        }
        Ok(Self { window, subwindow })
    }
}

impl Estimator for MedianFlow {
    fn slot(&self) -> Slot {
        Slot::MedianFlow
    }

    fn window(&self) -> usize {
        self.window
    }

    fn estimate(&self, history: &HistorySnapshot) -> EstimateResult {
        let (times, weights) = history.tail(self.window);
        if times.len() < self.subwindow {
            return Ok(None);
        }
        let mut rates = Vec::with_capacity(times.len() - self.subwindow + 1);
        for start in 0..=times.len() - self.subwindow {
            let end = start + self.subwindow - 1;
            let dt = times[end] - times[start];
            if dt > 0.0 {
                rates.push((weights[end] - weights[start]) / dt);
            }
        }
        if rates.is_empty() {
            return Err(EstimateError::DegenerateTime {
                samples: times.len(),
            });
        }
        let value = median(rates).ok_or(EstimateError::NonFinite(f64::NAN))?;
        Ok(Some(Estimate::new(value, times[times.len() - 1])))
    }
}

/// Ordered set of estimators.
#[derive(Debug)]
pub struct EstimatorPipeline {
    estimators: Vec<Box<dyn Estimator>>,
}

impl Default for EstimatorPipeline {
    fn default() -> Self {
        Self::standard(DEFAULT_WINDOW, DEFAULT_SUBWINDOW)
            .unwrap_or_else(|_| Self::new(vec![Box::new(CurrentWeight)]))
    }
}

impl EstimatorPipeline {
    /// Build a pipeline from estimators, run in the given order.
    pub fn new(estimators: Vec<Box<dyn Estimator>>) -> Self {
        Self { estimators }
    }

    /// The four bundled estimators with the given windows.
    pub fn standard(window: usize, subwindow: usize) -> Result<Self> {
        Ok(Self::new(vec![
            Box::new(CurrentWeight),
            Box::new(AverageFlow::new(window)?),
            Box::new(MedianWeight::new(window)?),
            Box::new(MedianFlow::new(window, subwindow)?),
        ]))
    }

    /// Largest window any estimator asks for.
    pub fn required_history(&self) -> usize {
        self.estimators.iter().map(|e| e.window()).max().unwrap_or(1)
    }

    /// Number of estimators.
    pub fn len(&self) -> usize {
        self.estimators.len()
    }

    /// Whether the pipeline has no estimators.
    pub fn is_empty(&self) -> bool {
        self.estimators.is_empty()
    }

    /// Run every estimator over `history` and store the results.
    ///
    /// Each slot is written whole or not at all.
    pub fn run(&self, history: &HistorySnapshot, estimates: &mut Estimates) {
        for estimator in &self.estimators {
            let result = catch_unwind(AssertUnwindSafe(|| estimator.estimate(history)))
                .unwrap_or(Err(EstimateError::Panicked));
            match result {
                Ok(Some(estimate)) if estimate.value.is_finite() && estimate.time.is_finite() => {
                    *estimates.slot_mut(estimator.slot()) = estimate;
                }
                Ok(Some(estimate)) => {
                    warn!(
                        "{:?} produced non-finite estimate {:?}, keeping previous",
                        estimator, estimate
                    );
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("{:?} failed: {}, keeping previous", estimator, e);
                }
            }
        }
    }
}

fn least_squares_slope(times: &[f64], weights: &[f64]) -> std::result::Result<f64, EstimateError> {
    let n = times.len() as f64;
    let mean_t = times.iter().sum::<f64>() / n;
    let mean_w = weights.iter().sum::<f64>() / n;
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for (t, w) in times.iter().zip(weights) {
        let dt = t - mean_t;
        sxx += dt * dt;
        sxy += dt * (w - mean_w);
    }
    if sxx <= f64::EPSILON {
        return Err(EstimateError::DegenerateTime {
            samples: times.len(),
        });
    }
    let slope = sxy / sxx;
    if slope.is_finite() {
        Ok(slope)
    } else {
        Err(EstimateError::NonFinite(slope))
    }
}

fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() || values.iter().any(|v| v.is_nan()) {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn three_samples() -> HistorySnapshot {
        HistorySnapshot::from_pairs(&[(0.0, 0.0), (0.5, 10.0), (1.0, 20.0)])
    }

    #[test]
    fn test_current_weight() {
        let e = CurrentWeight.estimate(&three_samples()).unwrap().unwrap();
        assert_eq!(e, Estimate::new(20.0, 1.0));
        assert_eq!(CurrentWeight.estimate(&HistorySnapshot::default()).unwrap(), None);
    }

    #[test]
    fn test_average_flow_linear_ramp() {
        let e = AverageFlow::new(10)
            .unwrap()
            .estimate(&three_samples())
            .unwrap()
            .unwrap();
        assert!(approx(e.value, 20.0));
        assert_eq!(e.time, 1.0);
    }

    #[test]
    fn test_average_flow_irregular_spacing() {
        // 4 g/s sampled at uneven intervals
        let snap = HistorySnapshot::from_pairs(&[(0.0, 1.0), (0.1, 1.4), (0.7, 3.8), (0.75, 4.0)]);
        let e = AverageFlow::new(10).unwrap().estimate(&snap).unwrap().unwrap();
        assert!(approx(e.value, 4.0));
    }

    #[test]
    fn test_average_flow_uses_only_window() {
        let snap = HistorySnapshot::from_pairs(&[(0.0, 100.0), (1.0, 0.0), (2.0, 2.0), (3.0, 4.0)]);
        let e = AverageFlow::new(3).unwrap().estimate(&snap).unwrap().unwrap();
        assert!(approx(e.value, 2.0));
    }

    #[test]
    fn test_average_flow_skips_single_sample() {
        let snap = HistorySnapshot::from_pairs(&[(0.0, 1.0)]);
        assert_eq!(AverageFlow::new(10).unwrap().estimate(&snap).unwrap(), None);
    }

    #[test]
    fn test_average_flow_degenerate_time() {
        let snap = HistorySnapshot::from_pairs(&[(1.0, 1.0), (1.0, 2.0)]);
        let err = AverageFlow::new(10).unwrap().estimate(&snap).unwrap_err();
        assert_eq!(err, EstimateError::DegenerateTime { samples: 2 });
    }

    #[test]
    fn test_median_weight() {
        let e = MedianWeight::new(10)
            .unwrap()
            .estimate(&three_samples())
            .unwrap()
            .unwrap();
        assert_eq!(e, Estimate::new(10.0, 1.0));

        let even = HistorySnapshot::from_pairs(&[(0.0, 1.0), (1.0, 3.0), (2.0, 100.0), (3.0, 5.0)]);
        let e = MedianWeight::new(10).unwrap().estimate(&even).unwrap().unwrap();
        assert_eq!(e.value, 4.0);
    }

    #[test]
    fn test_median_flow_rejects_spike() {
        // Steady 2 g/s with one wild reading
        let mut pairs: Vec<(f64, f64)> = (0..10).map(|i| (i as f64, 2.0 * i as f64)).collect();
        pairs[6].1 = 500.0;
        let snap = HistorySnapshot::from_pairs(&pairs);

        let e = MedianFlow::new(10, 5).unwrap().estimate(&snap).unwrap().unwrap();
        assert!(approx(e.value, 2.0), "got {}", e.value);
        assert_eq!(e.time, 9.0);
    }

    #[test]
    fn test_median_flow_requires_subwindow() {
        let est = MedianFlow::new(10, 5).unwrap();
        let snap = HistorySnapshot::from_pairs(&[(0.0, 0.0), (1.0, 1.0), (2.0, 2.0), (3.0, 3.0)]);
        assert_eq!(est.estimate(&snap).unwrap(), None);
    }

    #[test]
    fn test_constructor_validation() {
        assert!(AverageFlow::new(1).is_err());
        assert!(MedianWeight::new(0).is_err());
        assert!(MedianFlow::new(10, 1).is_err());
        assert!(MedianFlow::new(4, 5).is_err());
        assert!(EstimatorPipeline::standard(10, 11).is_err());
    }

    #[test]
    fn test_pipeline_required_history() {
        assert_eq!(EstimatorPipeline::default().required_history(), 10);
        let pipeline = EstimatorPipeline::standard(25, 5).unwrap();
        assert_eq!(pipeline.required_history(), 25);
        assert_eq!(pipeline.len(), 4);
    }

    #[test]
    fn test_pipeline_skip_retains_previous() {
        let pipeline = EstimatorPipeline::default();
        let mut estimates = Estimates::default();

        pipeline.run(&HistorySnapshot::from_pairs(&[(2.0, 7.0)]), &mut estimates);

        assert_eq!(estimates.current_weight, Estimate::new(7.0, 2.0));
        assert_eq!(estimates.median_weight, Estimate::new(7.0, 2.0));
        // Not enough samples for either flow estimate
        assert_eq!(estimates.average_flow, Estimate::default());
        assert_eq!(estimates.median_flow, Estimate::default());
    }

    #[derive(Debug)]
    struct Broken;

    impl Estimator for Broken {
        fn slot(&self) -> Slot {
            Slot::AverageFlow
        }
        fn window(&self) -> usize {
            1
        }
        fn estimate(&self, _: &HistorySnapshot) -> EstimateResult {
            Err(EstimateError::NonFinite(f64::INFINITY))
        }
    }

    #[test]
    fn test_pipeline_failure_does_not_block_others() {
        let pipeline = EstimatorPipeline::new(vec![Box::new(Broken), Box::new(CurrentWeight)]);
        let mut estimates = Estimates {
            average_flow: Estimate::new(3.0, 0.5),
            ..Default::default()
        };

        pipeline.run(&three_samples(), &mut estimates);

        assert_eq!(estimates.average_flow, Estimate::new(3.0, 0.5));
        assert_eq!(estimates.current_weight, Estimate::new(20.0, 1.0));
    }

    #[derive(Debug)]
    struct Panicking;

    impl Estimator for Panicking {
        fn slot(&self) -> Slot {
            Slot::MedianFlow
        }
        fn window(&self) -> usize {
            1
        }
        fn estimate(&self, _: &HistorySnapshot) -> EstimateResult {
            panic!("estimator bug")
        }
    }

    #[test]
    fn test_pipeline_contains_panicking_estimator() {
        let pipeline = EstimatorPipeline::new(vec![Box::new(Panicking), Box::new(CurrentWeight)]);
        let mut estimates = Estimates {
            median_flow: Estimate::new(1.0, 0.5),
            ..Default::default()
        };

        pipeline.run(&three_samples(), &mut estimates);
        pipeline.run(&three_samples(), &mut estimates);

        assert_eq!(estimates.median_flow, Estimate::new(1.0, 0.5));
        assert_eq!(estimates.current_weight, Estimate::new(20.0, 1.0));
    }

    #[test]
    fn test_estimates_get() {
        let estimates = Estimates {
            median_flow: Estimate::new(1.5, 4.0),
            ..Default::default()
        };
        assert_eq!(estimates.get(Slot::MedianFlow), Estimate::new(1.5, 4.0));
        assert_eq!(estimates.get(Slot::CurrentWeight), Estimate::default());
    }
}
