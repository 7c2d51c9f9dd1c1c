//! Per-step sample post-processing.
//!
//! At each barrier the coordinator turns the step's raw samples into
//! metric points: per-sample latency and service time, and a global
//! throughput time series per task, bucketized over one-second intervals
//! across all workers.

use std::collections::HashMap;

use crate::{
    metrics::MetricsStore,
    sample::{Sample, SampleKind},
    track::{Challenge, MetaMap, TaskRef, Track},
};

/// One point of a task's global throughput series.
#[derive(Debug, Clone, PartialEq)]
pub struct ThroughputPoint {
    /// Wall-clock time of the emitting sample, in epoch seconds.
    pub absolute_time: f64,
    /// The emitting sample's relative timestamp.
    pub relative_time: f64,
    /// The sample kind in effect; once promoted to measurement it never
    /// reverts to warmup.
    pub kind: SampleKind,
    /// Throughput value.
    pub value: f64,
    /// Throughput unit, e.g. `"ops/s"`.
    pub unit: String,
}

/// Merges metadata maps; later maps win on key conflicts.
fn merge<'a>(maps: impl IntoIterator<Item = &'a MetaMap>) -> MetaMap {
    let mut result = MetaMap::new();
    for map in maps {
        for (k, v) in map {
            result.insert(k.clone(), v.clone());
        }
    }
    result
}

/// Stores latency, service time and global throughput for one step's
/// samples. Metadata precedence: track < challenge < operation < task <
/// request.
pub(crate) fn post_process_samples(
    store: &mut MetricsStore,
    track: &Track,
    challenge: &Challenge,
    samples: &[Sample],
) {
    for sample in samples {
        let op = sample.operation();
        let meta = merge([
            &track.meta,
            &challenge.meta,
            &op.meta,
            &sample.task.meta,
            &sample.request.to_meta(),
        ]);

        store.put_value(
            "latency",
            sample.latency_ms,
            "ms",
            op,
            sample.kind,
            sample.absolute_time,
            Some(sample.relative_time),
            meta.clone(),
        );
        store.put_value(
            "service_time",
            sample.service_time_ms,
            "ms",
            op,
            sample.kind,
            sample.absolute_time,
            Some(sample.relative_time),
            meta,
        );
    }

    for (task, points) in calculate_global_throughput(samples) {
        let op = &task.operation;
        let meta = merge([&track.meta, &challenge.meta, &op.meta, &task.meta]);
        for point in points {
            store.put_value(
                "throughput",
                point.value,
                point.unit,
                op,
                point.kind,
                point.absolute_time,
                Some(point.relative_time),
                meta.clone(),
            );
        }
    }
}

/// Calculates global throughput per task from samples gathered across all
/// workers.
///
/// Samples are ordered by wall-clock time only; cross-worker message
/// arrival order does not matter. One point is emitted per elapsed
/// one-second bucket; if a task's final sample kind produced no point at
/// all, a final point is emitted at the last sample's timestamps so short
/// tasks still report throughput.
pub fn calculate_global_throughput(samples: &[Sample]) -> HashMap<TaskRef, Vec<ThroughputPoint>> {
    let mut per_task: HashMap<TaskRef, Vec<&Sample>> = HashMap::new();
    for sample in samples {
        per_task.entry(TaskRef(sample.task.clone())).or_default().push(sample);
    }

    let mut global = HashMap::new();
    for (task, mut task_samples) in per_task {
        task_samples.sort_by(|a, b| a.absolute_time.total_cmp(&b.absolute_time));

        let first = task_samples[0];
        let start = first.absolute_time - first.elapsed;
        let mut current_kind = first.kind;
        let mut points_for_kind = 0usize;
        let mut total_ops = 0u64;
        let mut interval = 0.0f64;
        let mut next_bucket = 0.0f64;
        let mut points = Vec::new();

        for sample in &task_samples {
            // Once a measurement sample is seen, stick to that kind.
            if sample.kind > current_kind {
                current_kind = sample.kind;
                points_for_kind = 0;
            }

            total_ops += sample.ops;
            interval = interval.max(sample.absolute_time - start);

            if interval > 0.0 && interval >= next_bucket {
                points_for_kind += 1;
                next_bucket = interval.floor() + 1.0;
                points.push(ThroughputPoint {
                    absolute_time: sample.absolute_time,
                    relative_time: sample.relative_time,
                    kind: current_kind,
                    value: total_ops as f64 / interval,
                    unit: format!("{}/s", sample.ops_unit),
                });
            }
        }

        // Keep throughput visible for kinds that never filled a bucket.
        if interval > 0.0 && points_for_kind == 0 {
            if let Some(last) = task_samples.last() {
                points.push(ThroughputPoint {
                    absolute_time: last.absolute_time,
                    relative_time: last.relative_time,
                    kind: current_kind,
                    value: total_ops as f64 / interval,
                    unit: format!("{}/s", last.ops_unit),
                });
            }
        }

        global.insert(task, points);
    }
    global
}
