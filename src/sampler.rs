//! Bounded in-memory buffering of samples between executor and worker.
use std::{collections::VecDeque, sync::Arc, time::Instant};

use parking_lot::Mutex;

use crate::{
    sample::{RequestMeta, Sample, SampleKind},
    track::Task,
};

/// Upper bound on buffered samples per task. Ingestion beyond this drops
/// samples rather than blocking the executor.
pub(crate) const QUEUE_CAPACITY: usize = 16_384;

/// Collects samples produced by an executor until the worker drains them.
///
/// `add` never blocks: when the queue is full the sample is dropped with a
/// warning, preserving soft real-time behavior under ingestion pressure.
pub struct Sampler {
    client_id: u32,
    task: Arc<Task>,
    start: Instant,
    queue: Mutex<VecDeque<Sample>>,
}

impl Sampler {
    /// Creates a sampler for the given worker and task. The creation
    /// instant becomes the origin for relative sample timestamps.
    pub fn new(client_id: u32, task: Arc<Task>) -> Self {
        Self { client_id, task, start: Instant::now(), queue: Mutex::new(VecDeque::new()) }
    }

    /// Records one sample, stamping wall-clock and relative timestamps.
    #[allow(clippy::too_many_arguments)]
    pub fn add(
        &self,
        kind: SampleKind,
        request: RequestMeta,
        latency_ms: f64,
        service_time_ms: f64,
        ops: u64,
        ops_unit: impl Into<String>,
        elapsed: f64,
        progress: Option<f64>,
    ) {
        let sample = Sample {
            client_id: self.client_id,
            absolute_time: epoch_secs(),
            relative_time: self.start.elapsed().as_secs_f64(),
            task: self.task.clone(),
            kind,
            request,
            latency_ms,
            service_time_ms,
            ops,
            ops_unit: ops_unit.into(),
            elapsed,
            progress,
        };

        let mut queue = self.queue.lock();
        if queue.len() >= QUEUE_CAPACITY {
            drop(queue);
            tracing::warn!(
                operation = %self.task.operation.name,
                "dropping sample due to a full sampling queue"
            );
            return;
        }
        queue.push_back(sample);
    }

    /// Removes and returns all currently queued samples.
    pub fn drain(&self) -> Vec<Sample> {
        self.queue.lock().drain(..).collect()
    }
}

/// Current wall-clock time in epoch seconds.
pub(crate) fn epoch_secs() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1e6
}
