//! Execution of one task schedule on one worker.
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use tokio::sync::Mutex;

use crate::{
    error::Result,
    runner::{OperationRunner, execute_single},
    sampler::Sampler,
    schedule::ScheduleGen,
    track::Task,
};

/// Runs a task's schedule to completion, pushing samples into the
/// worker's sampler.
///
/// The executor owns no control channel. It cooperates through two shared
/// flags: `cancel` (checked between iterations, exits the loop) and
/// `complete` (checked after every iteration; the final sample's progress
/// is forced to 1.0). When the task completes its parent group, the
/// executor sets `complete` on any exit path so sibling executors stop.
pub(crate) struct Executor<C> {
    task: Arc<Task>,
    schedule: ScheduleGen,
    client: Arc<Mutex<C>>,
    runner: Arc<dyn OperationRunner<C>>,
    sampler: Arc<Sampler>,
    cancel: Arc<AtomicBool>,
    complete: Arc<AtomicBool>,
}

impl<C: Send + 'static> Executor<C> {
    pub(crate) fn new(
        task: Arc<Task>,
        schedule: ScheduleGen,
        client: Arc<Mutex<C>>,
        runner: Arc<dyn OperationRunner<C>>,
        sampler: Arc<Sampler>,
        cancel: Arc<AtomicBool>,
        complete: Arc<AtomicBool>,
    ) -> Self {
        Self { task, schedule, client, runner, sampler, cancel, complete }
    }

    /// Drives the schedule until it ends, is cancelled, or is completed
    /// externally. Fatal runner errors propagate to the worker.
    pub(crate) async fn run(mut self) -> Result<()> {
        let result = self.drive().await;
        if self.task.completes_parent {
            self.complete.store(true, Ordering::SeqCst);
        }
        result
    }

    async fn drive(&mut self) -> Result<()> {
        let task_start = Instant::now();
        let mut client = self.client.clone().lock_owned().await;

        while let Some(iter) = self.schedule.next()? {
            if self.cancel.load(Ordering::SeqCst) {
                tracing::info!(task = %self.task, "user cancelled execution");
                break;
            }

            // A positive dispatch offset means throughput is throttled;
            // scheduling delay then counts towards latency.
            let throttled = iter.dispatch_offset > 0.0;
            let expected_dispatch = task_start + Duration::from_secs_f64(iter.dispatch_offset);
            if throttled {
                let now = Instant::now();
                if expected_dispatch > now {
                    tokio::time::sleep(expected_dispatch - now).await;
                }
            }

            let start = Instant::now();
            let (ops, unit, request) = execute_single(
                self.runner.as_ref(),
                &mut client,
                &self.task.operation,
                &iter.params,
            )
            .await?;
            let stop = Instant::now();

            let service_time = stop - start;
            let latency =
                if throttled { stop.saturating_duration_since(expected_dispatch) } else { service_time };

            // The last sample bumps progress to 100% when the task was
            // completed externally.
            let progress = if self.complete.load(Ordering::SeqCst) { Some(1.0) } else { iter.progress };
            self.sampler.add(
                iter.kind,
                request,
                latency.as_secs_f64() * 1e3,
                service_time.as_secs_f64() * 1e3,
                ops,
                unit,
                stop.duration_since(task_start).as_secs_f64(),
                progress,
            );

            if self.complete.load(Ordering::SeqCst) {
                tracing::info!(task = %self.task, "task completed due to external event");
                break;
            }
        }
        Ok(())
    }
}
