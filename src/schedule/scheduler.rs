//! Inter-arrival schedulers controlling iteration dispatch times.
use rand::{Rng, SeedableRng, rngs::SmallRng};

use crate::track::ScheduleKind;

/// Produces a monotonically non-decreasing sequence of dispatch offsets,
/// in seconds from the task's start.
pub trait Scheduler: Send {
    /// Returns the dispatch offset following `prev`.
    fn next(&mut self, prev: f64) -> f64;
}

/// Fixed inter-arrival time of `1 / rate` seconds.
pub struct DeterministicScheduler {
    interval: f64,
}

impl DeterministicScheduler {
    /// Creates a scheduler targeting `rate` operations per second.
    pub fn new(rate: f64) -> Self {
        Self { interval: 1.0 / rate }
    }
}

impl Scheduler for DeterministicScheduler {
    fn next(&mut self, prev: f64) -> f64 {
        prev + self.interval
    }
}

/// Exponentially distributed inter-arrival times with mean `1 / rate`,
/// modelling a Poisson arrival process.
pub struct PoissonScheduler {
    rate: f64,
    rng: SmallRng,
}

impl PoissonScheduler {
    /// Creates a scheduler targeting `rate` operations per second.
    pub fn new(rate: f64) -> Self {
        Self { rate, rng: SmallRng::from_entropy() }
    }
}

impl Scheduler for PoissonScheduler {
    fn next(&mut self, prev: f64) -> f64 {
        // Inverse transform sampling of Exp(rate).
        let u: f64 = self.rng.gen_range(0.0..1.0);
        prev + (-(1.0 - u).ln() / self.rate)
    }
}

/// Back-to-back dispatch: every iteration is scheduled at offset zero, so
/// the executor never sleeps and latency equals service time.
pub struct UnthrottledScheduler;

impl Scheduler for UnthrottledScheduler {
    fn next(&mut self, _prev: f64) -> f64 {
        0.0
    }
}

/// Selects the scheduler for a task's schedule descriptor.
pub fn scheduler_for(kind: &ScheduleKind) -> Box<dyn Scheduler> {
    match *kind {
        ScheduleKind::Deterministic { target_throughput } => {
            Box::new(DeterministicScheduler::new(target_throughput))
        }
        ScheduleKind::Poisson { target_throughput } => {
            Box::new(PoissonScheduler::new(target_throughput))
        }
        ScheduleKind::Unthrottled => Box::new(UnthrottledScheduler),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_advances_by_fixed_interval() {
        let mut sched = DeterministicScheduler::new(100.0);
        let mut prev = 0.0;
        for i in 1..=10 {
            prev = sched.next(prev);
            assert!((prev - i as f64 * 0.01).abs() < 1e-9);
        }
    }

    #[test]
    fn poisson_is_monotonically_non_decreasing() {
        let mut sched = PoissonScheduler::new(50.0);
        let mut prev = 0.0;
        for _ in 0..1000 {
            let next = sched.next(prev);
            assert!(next >= prev);
            prev = next;
        }
    }

    #[test]
    fn poisson_mean_interval_tracks_rate() {
        let rate = 200.0;
        let mut sched = PoissonScheduler::new(rate);
        let n = 20_000;
        let mut prev = 0.0;
        for _ in 0..n {
            prev = sched.next(prev);
        }
        let mean = prev / n as f64;
        // Within 10% of 1/rate over 20k draws.
        assert!((mean - 1.0 / rate).abs() < 0.1 / rate, "mean interval was {mean}");
    }

    #[test]
    fn unthrottled_never_schedules_ahead() {
        let mut sched = UnthrottledScheduler;
        assert_eq!(sched.next(0.0), 0.0);
        assert_eq!(sched.next(42.0), 0.0);
    }
}
