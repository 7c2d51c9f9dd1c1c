//! Per-worker iteration schedules.
//!
//! [`schedule_for`] expands one task into a lazy stream of scheduled
//! iterations for one worker: each item carries the dispatch offset
//! produced by the task's [`Scheduler`], the sample kind (warmup or
//! measurement), the task progress, and the iteration's parameters.
//!
//! Two shapes exist, selected by the task bounds:
//!
//! - **Iteration-count**: yields exactly `⌊(warmup + measure) / clients⌋`
//!   items, the first `⌊warmup / clients⌋` of them as warmup.
//! - **Time-period**: yields while the warmup + measurement period has
//!   not elapsed. Without a measurement period, a finite parameter source
//!   is iterated through once; an infinite source yields indefinitely
//!   with undefined progress (an *eternal* task, terminated only through
//!   early completion).
//!
//! Schedules are not restartable; a fresh one is built per task execution.

mod scheduler;

pub use scheduler::{
    DeterministicScheduler, PoissonScheduler, Scheduler, UnthrottledScheduler, scheduler_for,
};

use std::time::Instant;

use crate::{
    error::{DriverError, Result},
    params::{ParamProvider, ParamSource, Params},
    sample::SampleKind,
    track::{Task, TaskBounds},
};

/// One scheduled iteration of a task on one worker.
pub struct ScheduledIter {
    /// Seconds from task start at which this iteration should dispatch.
    /// Zero means back-to-back (unthrottled).
    pub dispatch_offset: f64,
    /// Warmup or measurement.
    pub kind: SampleKind,
    /// Task progress in `[0, 1]`, `None` for eternal tasks.
    pub progress: Option<f64>,
    /// Parameters for the runner.
    pub params: Params,
}

/// A lazy, non-restartable iteration schedule for one worker.
///
/// If the parameter source runs dry before the configured bounds are
/// reached, the schedule terminates early.
pub struct ScheduleGen {
    scheduler: Box<dyn Scheduler>,
    provider: Box<dyn ParamProvider>,
    next_scheduled: f64,
    shape: Shape,
}

enum Shape {
    IterationCount { warmup: u64, total: u64, it: u64 },
    TimePeriod { start: Instant, warmup: f64, total: f64 },
    SourceBound { start: Instant, warmup: f64, total: u64, it: u64 },
    Eternal { start: Instant, warmup: f64 },
}

/// Builds the schedule for `task` as seen by worker `client_index`.
pub fn schedule_for(
    task: &Task,
    client_index: u32,
    source: &dyn ParamSource,
) -> Result<ScheduleGen> {
    let num_clients = task.clients.max(1);
    let provider = source.partition(client_index, num_clients);
    let scheduler = scheduler_for(&task.schedule);

    let shape = match task.bounds {
        TaskBounds::Iterations { warmup, measure } => {
            let n = num_clients as u64;
            let total = (warmup + measure) / n;
            if total == 0 {
                return Err(DriverError::Assertion(format!(
                    "operation [{}] must run for at least one iteration per client",
                    task.operation.name
                )));
            }
            Shape::IterationCount { warmup: warmup / n, total, it: 0 }
        }
        TaskBounds::TimePeriod { warmup, period: Some(period) } => Shape::TimePeriod {
            start: Instant::now(),
            warmup: warmup.as_secs_f64(),
            total: warmup.as_secs_f64() + period.as_secs_f64(),
        },
        TaskBounds::TimePeriod { warmup, period: None } => match provider.size() {
            Some(total) => Shape::SourceBound {
                start: Instant::now(),
                warmup: warmup.as_secs_f64(),
                total,
                it: 0,
            },
            None => Shape::Eternal { start: Instant::now(), warmup: warmup.as_secs_f64() },
        },
    };

    Ok(ScheduleGen { scheduler, provider, next_scheduled: 0.0, shape })
}

impl ScheduleGen {
    /// Yields the next scheduled iteration, or `None` once the schedule
    /// is complete. Parameter-source errors are fatal.
    pub fn next(&mut self) -> Result<Option<ScheduledIter>> {
        let (kind, progress) = match &mut self.shape {
            Shape::IterationCount { warmup, total, it } => {
                if *it >= *total {
                    return Ok(None);
                }
                let kind = if *it < *warmup { SampleKind::Warmup } else { SampleKind::Normal };
                let progress = (*it + 1) as f64 / *total as f64;
                *it += 1;
                (kind, Some(progress))
            }
            Shape::TimePeriod { start, warmup, total } => {
                let now = start.elapsed().as_secs_f64();
                if now >= *total {
                    return Ok(None);
                }
                let kind = if now < *warmup { SampleKind::Warmup } else { SampleKind::Normal };
                (kind, Some(now / *total))
            }
            Shape::SourceBound { start, warmup, total, it } => {
                if *it >= *total {
                    return Ok(None);
                }
                let elapsed = start.elapsed().as_secs_f64();
                let kind = if elapsed < *warmup { SampleKind::Warmup } else { SampleKind::Normal };
                let progress = (*it + 1) as f64 / *total as f64;
                *it += 1;
                (kind, Some(progress))
            }
            Shape::Eternal { start, warmup } => {
                let elapsed = start.elapsed().as_secs_f64();
                let kind = if elapsed < *warmup { SampleKind::Warmup } else { SampleKind::Normal };
                (kind, None)
            }
        };

        let Some(params) = self.provider.next_params()? else {
            return Ok(None);
        };

        let dispatch_offset = self.next_scheduled;
        self.next_scheduled = self.scheduler.next(self.next_scheduled);

        Ok(Some(ScheduledIter { dispatch_offset, kind, progress, params }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        params::{FiniteParams, StaticParams},
        track::{Operation, ScheduleKind},
    };
    use std::time::Duration;

    fn task(clients: u32, bounds: TaskBounds) -> Task {
        Task::new(Operation::new("op", "noop"), clients, bounds)
    }

    fn collect(mut sched: ScheduleGen, limit: usize) -> Vec<ScheduledIter> {
        let mut items = Vec::new();
        while items.len() < limit {
            match sched.next().unwrap() {
                Some(item) => items.push(item),
                None => break,
            }
        }
        items
    }

    #[test]
    fn iteration_count_splits_warmup_and_measure() {
        let t = task(2, TaskBounds::Iterations { warmup: 4, measure: 10 });
        let sched = schedule_for(&t, 0, &StaticParams::default()).unwrap();
        let items = collect(sched, 100);

        // (4 + 10) / 2 = 7 per client, 4 / 2 = 2 of them warmup.
        assert_eq!(items.len(), 7);
        assert!(items[..2].iter().all(|i| i.kind == SampleKind::Warmup));
        assert!(items[2..].iter().all(|i| i.kind == SampleKind::Normal));
        assert_eq!(items.last().unwrap().progress, Some(1.0));
    }

    #[test]
    fn zero_iterations_is_an_error() {
        let t = task(4, TaskBounds::Iterations { warmup: 1, measure: 2 });
        assert!(matches!(
            schedule_for(&t, 0, &StaticParams::default()),
            Err(DriverError::Assertion(_))
        ));
    }

    #[test]
    fn deterministic_offsets_advance_by_interval() {
        let t = task(1, TaskBounds::Iterations { warmup: 0, measure: 5 })
            .with_schedule(ScheduleKind::Deterministic { target_throughput: 100.0 });
        let sched = schedule_for(&t, 0, &StaticParams::default()).unwrap();
        let offsets: Vec<f64> = collect(sched, 10).iter().map(|i| i.dispatch_offset).collect();
        for (i, offset) in offsets.iter().enumerate() {
            assert!((offset - i as f64 * 0.01).abs() < 1e-9);
        }
    }

    #[test]
    fn time_period_progress_stays_in_unit_interval() {
        let t = task(
            1,
            TaskBounds::TimePeriod {
                warmup: Duration::from_millis(20),
                period: Some(Duration::from_millis(30)),
            },
        );
        let mut sched = schedule_for(&t, 0, &StaticParams::default()).unwrap();
        let mut saw_warmup = false;
        let mut saw_normal = false;
        while let Some(item) = sched.next().unwrap() {
            let progress = item.progress.unwrap();
            assert!((0.0..=1.0).contains(&progress));
            match item.kind {
                SampleKind::Warmup => {
                    assert!(!saw_normal, "warmup after measurement sample");
                    saw_warmup = true;
                }
                SampleKind::Normal => saw_normal = true,
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(saw_warmup && saw_normal);
    }

    #[test]
    fn unset_period_with_finite_source_iterates_once() {
        let source =
            FiniteParams::new((0..4).map(|_| crate::params::Params::new()).collect());
        let t = task(
            1,
            TaskBounds::TimePeriod { warmup: Duration::ZERO, period: None },
        );
        let sched = schedule_for(&t, 0, &source).unwrap();
        let items = collect(sched, 100);
        assert_eq!(items.len(), 4);
        assert_eq!(items.last().unwrap().progress, Some(1.0));
    }

    #[test]
    fn unset_period_with_infinite_source_is_eternal() {
        let t = task(
            1,
            TaskBounds::TimePeriod { warmup: Duration::ZERO, period: None },
        );
        let sched = schedule_for(&t, 0, &StaticParams::default()).unwrap();
        let items = collect(sched, 50);
        assert_eq!(items.len(), 50);
        assert!(items.iter().all(|i| i.progress.is_none()));
    }

    #[test]
    fn exhausted_source_ends_schedule_early() {
        let source = FiniteParams::new(vec![crate::params::Params::new(); 2]);
        let t = task(1, TaskBounds::Iterations { warmup: 0, measure: 10 });
        let sched = schedule_for(&t, 0, &source).unwrap();
        assert_eq!(collect(sched, 100).len(), 2);
    }
}
