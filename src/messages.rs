//! Messages exchanged between the coordinator, its workers, and the
//! caller. All messages are values; nothing is shared across actors.
use std::sync::Arc;

use crate::{
    actor::HostSpec,
    allocator::{JoinPoint, TaskCell},
    config::DriverConfig,
    metrics::MetricsBatch,
    sample::Sample,
    track::{MetaMap, Track},
};

/// Starts a benchmark on the coordinator.
pub struct StartBenchmark {
    /// Run configuration.
    pub config: DriverConfig,
    /// The track to execute.
    pub track: Arc<Track>,
    /// Meta info recorded on every externalized metrics batch.
    pub metrics_meta: MetaMap,
}

/// Starts a load worker on its column of the allocation matrix.
pub struct StartLoadGenerator {
    /// The worker's index.
    pub client_id: u32,
    /// Run configuration.
    pub config: DriverConfig,
    /// The track being executed.
    pub track: Arc<Track>,
    /// This worker's column: tasks, barriers and idle markers.
    pub tasks: Vec<TaskCell>,
}

/// Mailbox of a load worker.
pub enum WorkerMsg {
    /// Initialize and start driving the column.
    Start(StartLoadGenerator),
    /// Resume driving at the given worker-local monotonic time, after a
    /// join point.
    Drive {
        /// Worker-local monotonic resume time, in seconds.
        resume_at: f64,
    },
    /// Prematurely complete the current task (parallel task dependency).
    CompleteCurrentTask,
    /// Cooperative user cancellation.
    Cancel,
    /// Periodic self-message while a task runs.
    Wakeup,
    /// Shut the worker down.
    Exit,
}

/// Mailbox of the coordinator.
pub enum CoordinatorMsg {
    /// Starts the benchmark.
    Start(StartBenchmark),
    /// One host finished preparing the track.
    TrackPrepared {
        /// The host that is ready.
        host: HostSpec,
    },
    /// A worker reached a join point and is blocked.
    JoinPointReached {
        /// The reporting worker.
        client_id: u32,
        /// The worker's local monotonic timestamp at arrival. Only ever
        /// interpreted relative to other timestamps from the same worker.
        client_local_time: f64,
        /// The join point that was reached.
        join_point: Arc<JoinPoint>,
    },
    /// A worker ships a batch of samples.
    UpdateSamples {
        /// The shipping worker.
        client_id: u32,
        /// The samples, in per-worker order.
        samples: Vec<Sample>,
    },
    /// A fatal error somewhere in the benchmark.
    Failure {
        /// Human-readable summary.
        message: String,
        /// The underlying cause.
        cause: String,
    },
    /// A worker observed the user cancellation.
    Cancelled,
    /// The caller requests cooperative cancellation.
    CancelRequested,
    /// Tagged self-tick.
    Tick(TickKind),
    /// A supervised worker's message loop ended.
    WorkerExited {
        /// The worker that exited.
        client_id: u32,
        /// Whether the exit was an orderly stop.
        requested: bool,
    },
}

/// What a coordinator self-tick is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum TickKind {
    /// Update the progress line.
    Progress,
    /// Reset the metrics store's relative-time origin at the start of the
    /// next step.
    RelativeReset,
}

/// Events the coordinator reports to the caller.
pub enum BenchmarkEvent {
    /// A step finished; the next one starts after the given delay.
    TaskFinished {
        /// The step's externalized metrics.
        metrics: MetricsBatch,
        /// Seconds until the next step starts.
        next_task_in: f64,
    },
    /// The whole benchmark finished.
    Complete {
        /// The final step's externalized metrics.
        metrics: MetricsBatch,
    },
    /// The benchmark was aborted.
    Failure {
        /// Human-readable summary.
        message: String,
        /// The underlying cause.
        cause: String,
    },
    /// The benchmark was cancelled by the user.
    Cancelled,
}
