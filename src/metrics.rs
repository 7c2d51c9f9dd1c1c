//! In-memory metrics store for per-step benchmark results.
//!
//! The coordinator opens the store just before the first step and closes
//! it at the final barrier. During a step, post-processing feeds it metric
//! points (latency, service time, throughput); at each barrier the store
//! is externalized into a serializable [`MetricsBatch`] and cleared.

use std::time::Instant;

use hdrhistogram::Histogram;
use itertools::Itertools;
use serde::Serialize;

use crate::{
    sample::SampleKind,
    track::{MetaMap, Operation},
};

/// One recorded metric value.
#[derive(Debug, Clone, Serialize)]
pub struct MetricPoint {
    /// Metric name (`"latency"`, `"service_time"`, `"throughput"`).
    pub name: String,
    /// The value.
    pub value: f64,
    /// Unit of the value (e.g. `"ms"`, `"docs/s"`).
    pub unit: String,
    /// Operation the value belongs to.
    pub operation: String,
    /// The operation's runner selector.
    pub operation_kind: String,
    /// Warmup or measurement.
    pub sample_kind: SampleKind,
    /// Wall-clock time of the measurement, in epoch seconds.
    pub absolute_time: f64,
    /// Seconds relative to the store's current origin.
    pub relative_time: f64,
    /// Merged metadata for this point.
    pub meta: MetaMap,
}

/// Percentile summary over one metric of one operation.
#[derive(Debug, Clone, Serialize)]
pub struct MetricSummary {
    /// Metric name.
    pub name: String,
    /// Operation name.
    pub operation: String,
    /// Number of recorded values.
    pub count: u64,
    /// Mean value in milliseconds.
    pub mean: f64,
    /// Median value in milliseconds.
    pub median: f64,
    /// 90th percentile in milliseconds.
    pub p90: f64,
    /// 99th percentile in milliseconds.
    pub p99: f64,
    /// Largest recorded value in milliseconds.
    pub max: f64,
}

/// A serializable snapshot of the store, produced at each barrier.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsBatch {
    /// Track name.
    pub track: String,
    /// Challenge name.
    pub challenge: String,
    /// Store-level metadata.
    pub meta: MetaMap,
    /// All metric points recorded since the last externalization.
    pub points: Vec<MetricPoint>,
    /// Percentile summaries for millisecond-valued metrics.
    pub summaries: Vec<MetricSummary>,
}

/// The in-memory metrics store.
pub struct MetricsStore {
    meta: MetaMap,
    track: String,
    challenge: String,
    origin: Option<Instant>,
    points: Vec<MetricPoint>,
}

impl MetricsStore {
    /// Creates a closed store carrying the given meta info. An internal
    /// timer starts only when the store is opened.
    pub fn new(meta: MetaMap) -> Self {
        Self {
            meta,
            track: String::new(),
            challenge: String::new(),
            origin: None,
            points: Vec::new(),
        }
    }

    /// Opens the store and starts its relative-time origin.
    pub fn open(&mut self, track: impl Into<String>, challenge: impl Into<String>) {
        self.track = track.into();
        self.challenge = challenge.into();
        self.origin = Some(Instant::now());
    }

    /// Whether the store is currently open.
    pub fn is_open(&self) -> bool {
        self.origin.is_some()
    }

    /// Records one metric value.
    ///
    /// `relative_time` defaults to the store's own origin when not
    /// supplied by the caller.
    #[allow(clippy::too_many_arguments)]
    pub fn put_value(
        &mut self,
        name: impl Into<String>,
        value: f64,
        unit: impl Into<String>,
        operation: &Operation,
        sample_kind: SampleKind,
        absolute_time: f64,
        relative_time: Option<f64>,
        meta: MetaMap,
    ) {
        let relative_time = relative_time
            .unwrap_or_else(|| self.origin.map(|o| o.elapsed().as_secs_f64()).unwrap_or(0.0));
        self.points.push(MetricPoint {
            name: name.into(),
            value,
            unit: unit.into(),
            operation: operation.name.clone(),
            operation_kind: operation.kind.clone(),
            sample_kind,
            absolute_time,
            relative_time,
            meta,
        });
    }

    /// Resets the relative-time origin to now.
    pub fn reset_relative_time(&mut self) {
        if self.origin.is_some() {
            tracing::info!("resetting relative time of metrics store");
            self.origin = Some(Instant::now());
        }
    }

    /// Snapshots the store into a batch, optionally clearing it.
    pub fn to_externalizable(&mut self, clear: bool) -> MetricsBatch {
        let points =
            if clear { std::mem::take(&mut self.points) } else { self.points.clone() };
        let summaries = summarize(&points);
        MetricsBatch {
            track: self.track.clone(),
            challenge: self.challenge.clone(),
            meta: self.meta.clone(),
            points,
            summaries,
        }
    }

    /// Closes the store, discarding any remaining points.
    pub fn close(&mut self) {
        self.origin = None;
        self.points.clear();
    }
}

/// Builds percentile summaries for all millisecond-valued metrics,
/// excluding warmup points.
fn summarize(points: &[MetricPoint]) -> Vec<MetricSummary> {
    points
        .iter()
        .filter(|p| p.unit == "ms" && p.sample_kind == SampleKind::Normal)
        .map(|p| ((p.name.clone(), p.operation.clone()), p.value))
        .into_group_map()
        .into_iter()
        .sorted_by(|(a, _), (b, _)| a.cmp(b))
        .map(|((name, operation), values)| {
            let mut hist = Histogram::<u64>::new(3).expect("create histogram");
            for v in &values {
                // Record with microsecond resolution.
                hist.saturating_record((v * 1e3).max(0.0) as u64);
            }
            let ms = |micros: u64| micros as f64 / 1e3;
            MetricSummary {
                name,
                operation,
                count: hist.len(),
                mean: hist.mean() / 1e3,
                median: ms(hist.value_at_quantile(0.5)),
                p90: ms(hist.value_at_quantile(0.9)),
                p99: ms(hist.value_at_quantile(0.99)),
                max: ms(hist.max()),
            }
        })
        .collect()
}
