//! Timing samples produced by executors.
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::track::{MetaMap, Operation, Task};

/// Classification of a sample relative to the task's warmup phase.
///
/// The ordering matters: global throughput aggregation promotes the
/// current kind once a `Normal` sample is seen and never goes back.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SampleKind {
    /// Collected during the warmup period or warmup iterations; excluded
    /// from reported performance metrics.
    Warmup,
    /// A regular measurement sample.
    Normal,
}

/// Per-request outcome attached to a sample.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestMeta {
    /// Whether the request succeeded.
    pub success: bool,
    /// Error description for failed requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Protocol status code, when the transport reported one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<i64>,
    /// Additional runner-provided metadata.
    #[serde(default)]
    pub extra: MetaMap,
}

impl RequestMeta {
    /// A successful request with no extra metadata.
    pub fn success() -> Self {
        Self { success: true, ..Self::default() }
    }

    /// A failed request with the given error description.
    pub fn failure(error: impl Into<String>, http_status: Option<i64>) -> Self {
        Self { success: false, error: Some(error.into()), http_status, extra: MetaMap::new() }
    }

    /// Flattens this outcome into a metadata map for metric points.
    pub(crate) fn to_meta(&self) -> MetaMap {
        let mut meta = self.extra.clone();
        meta.insert("success".into(), self.success.into());
        if let Some(error) = &self.error {
            meta.insert("error-description".into(), error.as_str().into());
        }
        if let Some(status) = self.http_status {
            meta.insert("http-status".into(), status.into());
        }
        meta
    }
}

/// A single timing measurement taken by one worker for one iteration.
#[derive(Debug, Clone)]
pub struct Sample {
    /// The worker that produced this sample.
    pub client_id: u32,
    /// Wall-clock time of the measurement, in epoch seconds.
    pub absolute_time: f64,
    /// Monotonic seconds since the worker started the current task.
    pub relative_time: f64,
    /// The task being executed.
    pub task: Arc<Task>,
    /// Warmup or measurement sample.
    pub kind: SampleKind,
    /// Request outcome.
    pub request: RequestMeta,
    /// End-to-end latency in milliseconds. Equal to `service_time_ms`
    /// unless throughput is throttled, in which case scheduling delay is
    /// included.
    pub latency_ms: f64,
    /// Time spent in the runner, in milliseconds.
    pub service_time_ms: f64,
    /// Operations performed by this iteration.
    pub ops: u64,
    /// Unit of `ops` (e.g. `"ops"`, `"docs"`).
    pub ops_unit: String,
    /// Seconds elapsed since the task started when this sample was taken.
    pub elapsed: f64,
    /// Task progress in `[0, 1]`, or `None` for eternal tasks.
    pub progress: Option<f64>,
}

impl Sample {
    /// The operation this sample measures.
    pub fn operation(&self) -> &Operation {
        &self.task.operation
    }
}

impl std::fmt::Display for Sample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{:.6}; {:.6}] [client [{}]] [{}] [{}]: [{:.3}] ms request latency, [{:.3}] ms service time, [{} {}]",
            self.absolute_time,
            self.relative_time,
            self.client_id,
            self.task,
            self.kind,
            self.latency_ms,
            self.service_time_ms,
            self.ops,
            self.ops_unit,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warmup_orders_before_normal() {
        assert!(SampleKind::Warmup < SampleKind::Normal);
    }

    #[test]
    fn request_meta_flattens_error_fields() {
        let meta = RequestMeta::failure("boom", Some(503)).to_meta();
        assert_eq!(meta["success"], false);
        assert_eq!(meta["error-description"], "boom");
        assert_eq!(meta["http-status"], 503);
    }

    #[test]
    fn request_meta_keeps_extra_fields() {
        let mut req = RequestMeta::success();
        req.extra.insert("took".into(), 3.into());
        let meta = req.to_meta();
        assert_eq!(meta["took"], 3);
        assert_eq!(meta["success"], true);
        assert!(!meta.contains_key("error-description"));
    }
}
