//! # Stage: Anomaly Scanner
//!
//! ## Responsibility
//! Flag metric observations that deviate from their baseline by at least
//! `z_threshold` standard deviations, for every tracked metric on every
//! requested channel.
//!
//! Per channel and metric:
//! 1. Keep points dated on or before `window.end`.
//! 2. Current value = latest of those, if it is at most
//!    `max_current_age_days` older than `window.end`; otherwise stale, skip.
//! 3. Baseline = points with `window.start ≤ date < current.date`; when that
//!    has fewer than `min_baseline_points`, use the
//!    `fallback_lookback_points` points right before `current.date` instead.
//! 4. Sample mean and standard deviation; skip if the deviation is zero or
//!    undefined (fewer than two points).
//! 5. `z = (current − mean) / std`; emit iff `|z| ≥ z_threshold`.
//!
//! ## Guarantees
//! - Deterministic: same snapshot and window, same anomalies in the same order
//! - Output sorted critical → low, ties in channel/metric order
//! - Non-panicking: degenerate series are skipped, never an error
//! - An unhealthy store yields an empty result
//!
//! ## NOT Responsible For
//! - Choosing which anomaly to investigate (orchestrator)
//! - Seasonality adjustment

use std::cmp::Reverse;

use chrono::Duration;
use tracing::{debug, warn};

use crate::config::ScannerConfig;
use crate::model::{AnalysisWindow, Anomaly, Direction, MetricPoint, Severity};
use crate::ports::sources::MetricStore;

// ---------------------------------------------------------------------------
// Baseline statistics
// ---------------------------------------------------------------------------

/// Mean and sample standard deviation of a baseline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Baseline {
    pub mean: f64,
    pub std_dev: f64,
    pub samples: usize,
}

impl Baseline {
    /// `None` when fewer than two samples or the deviation is not a positive
    /// finite number.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        let n = values.len();
        if n < 2 {
            return None;
        }
        let mean = values.iter().sum::<f64>() / n as f64;
        let variance = values.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / (n as f64 - 1.0);
        let std_dev = variance.sqrt();
        if !std_dev.is_finite() || std_dev < 1e-10 {
            return None;
        }
        Some(Self { mean, std_dev, samples: n })
    }

    pub fn z_score(&self, value: f64) -> f64 {
        (value - self.mean) / self.std_dev
    }

    /// Percent deviation from the mean; 0 when the mean is 0.
    pub fn deviation_pct(&self, value: f64) -> f64 {
        if self.mean == 0.0 {
            0.0
        } else {
            (value - self.mean) / self.mean * 100.0
        }
    }
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

pub struct Scanner {
    config: ScannerConfig,
}

impl Scanner {
    pub fn new(config: ScannerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Scan every channel in `channels`.
    pub fn scan(&self, store: &dyn MetricStore, channels: &[String], window: &AnalysisWindow) -> Vec<Anomaly> {
        if !store.health() {
            warn!("metric store unhealthy; scan returns no anomalies");
            return Vec::new();
        }
        let mut found: Vec<Anomaly> = channels
            .iter()
            .flat_map(|c| self.scan_channel(store, c, window))
            .collect();
        // Stable: equal severities keep channel/metric order.
        found.sort_by_key(|a| Reverse(a.severity));
        found
    }

    /// Scan the store's full channel list.
    pub fn scan_all(&self, store: &dyn MetricStore, window: &AnalysisWindow) -> Vec<Anomaly> {
        self.scan(store, &store.list_channels(), window)
    }

    pub fn scan_one(&self, store: &dyn MetricStore, channel: &str, window: &AnalysisWindow) -> Vec<Anomaly> {
        self.scan(store, &[channel.to_string()], window)
    }

    fn scan_channel(&self, store: &dyn MetricStore, channel: &str, window: &AnalysisWindow) -> Vec<Anomaly> {
        self.config
            .tracked_metrics
            .iter()
            .filter_map(|metric| match store.get_series(channel, metric, None, window.end) {
                Ok(series) => self.evaluate(channel, metric, &series.points, window),
                Err(e) => {
                    debug!(error = %e, channel, metric = %metric, "series unavailable; skipped");
                    None
                }
            })
            .collect()
    }

    /// Evaluate one series. `points` must be sorted by date.
    pub fn evaluate(&self, channel: &str, metric: &str, points: &[MetricPoint], window: &AnalysisWindow) -> Option<Anomaly> {
        let visible: Vec<&MetricPoint> = points.iter().filter(|p| p.date <= window.end).collect();
        let current = *visible.last()?;
        if window.end - current.date > Duration::days(self.config.max_current_age_days) {
            debug!(channel, metric, latest = %current.date, "latest point too old; channel stale");
            return None;
        }

        let prior: Vec<&MetricPoint> = visible.iter().copied().filter(|p| p.date < current.date).collect();
        let mut baseline_values: Vec<f64> = prior
            .iter()
            .filter(|p| p.date >= window.start)
            .map(|p| p.value)
            .collect();
        if baseline_values.len() < self.config.min_baseline_points {
            let skip = prior.len().saturating_sub(self.config.fallback_lookback_points);
            baseline_values = prior[skip..].iter().map(|p| p.value).collect();
        }

        let baseline = Baseline::from_values(&baseline_values)?;
        let z = baseline.z_score(current.value);
        if !z.is_finite() || z.abs() < self.config.z_threshold {
            return None;
        }

        Some(Anomaly {
            id: Anomaly::derive_id(channel, metric, current.date),
            channel: channel.to_string(),
            metric: metric.to_string(),
            current_value: current.value,
            expected_value: baseline.mean,
            deviation_pct: baseline.deviation_pct(current.value),
            z_score: z,
            severity: Severity::from_z(z),
            direction: if z > 0.0 { Direction::Spike } else { Direction::Drop },
            detected_at: current.date,
            analysis_window: *window,
        })
    }
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new(ScannerConfig::default())
    }
}
