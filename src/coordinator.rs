//! The coordinator: drives all workers through the allocation matrix.
//!
//! The coordinator is an actor that owns the benchmark lifecycle: it fans
//! out track preparation to every load driver host, expands the challenge
//! into the allocation matrix, places one worker actor per client
//! round-robin across hosts, and then advances the whole fleet step by
//! step using join points.
//!
//! Advancing a step is where clock skew is handled. Workers report their
//! *local* monotonic timestamp at a join point; the coordinator records
//! the pair `(client_local, master_receive)` per worker and, once all
//! have arrived, picks a global resume instant `start_next` on its own
//! clock. Each worker then gets `resume = client_local + (start_next -
//! master_receive)`: a resume time in that worker's own clock frame. No
//! clock synchronization is required, only that the one-way message delay
//! is small against the inter-step handoff delay.

use std::{
    collections::HashMap,
    sync::Arc,
    time::Instant,
};

use async_trait::async_trait;
use itertools::Itertools;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    actor::{Actor, ActorSystem, ActorSystemConfig, Addr, ExitReason, Flow, HostSpec, SystemBase},
    allocator::{Allocation, Allocator},
    config::DriverConfig,
    error::{DriverError, Result},
    messages::{
        BenchmarkEvent, CoordinatorMsg, StartBenchmark, StartLoadGenerator, TickKind, WorkerMsg,
    },
    metrics::{MetricsBatch, MetricsStore},
    runner::LoadTarget,
    sample::Sample,
    throughput::post_process_samples,
    track::{Challenge, MetaMap, Track},
    worker::LoadWorker,
};

/// Translates a global resume instant into one worker's clock frame.
///
/// `client_end` is the worker's join point report: its local timestamp
/// paired with the master timestamp at receipt. `start_next` is the
/// resume instant on the master clock.
pub(crate) fn resume_time(client_end: (f64, f64), start_next: f64) -> f64 {
    let (client_local, master_received) = client_end;
    client_local + (start_next - master_received)
}

enum PreparatorMsg {
    Prepare,
}

/// Prepares the track on one load driver host, then stops.
struct TrackPreparator<T: LoadTarget> {
    target: T,
    track: Arc<Track>,
    master: Addr<CoordinatorMsg>,
    host: HostSpec,
}

#[async_trait]
impl<T: LoadTarget> Actor for TrackPreparator<T> {
    type Msg = PreparatorMsg;

    async fn handle(&mut self, msg: PreparatorMsg) -> Flow {
        match msg {
            PreparatorMsg::Prepare => {
                tracing::info!(host = %self.host, track = %self.track.name, "preparing track");
                match self.target.prepare(&self.track).await {
                    Ok(()) => {
                        self.master
                            .send(CoordinatorMsg::TrackPrepared { host: self.host.clone() });
                    }
                    Err(e) => {
                        let err = DriverError::TrackPreparation {
                            track: self.track.name.clone(),
                            reason: e.to_string(),
                        };
                        tracing::error!(host = %self.host, error = %err, "track preparation failed");
                        self.master.send(CoordinatorMsg::Failure {
                            message: "Could not prepare track".to_string(),
                            cause: err.to_string(),
                        });
                    }
                }
                Flow::Stop
            }
        }
    }
}

/// The benchmark coordinator actor.
pub(crate) struct Coordinator<T: LoadTarget> {
    target: T,
    system: Arc<ActorSystem>,
    self_addr: Addr<CoordinatorMsg>,
    events: mpsc::UnboundedSender<BenchmarkEvent>,
    config: DriverConfig,
    track: Option<Arc<Track>>,
    challenge: Option<Arc<Challenge>>,
    metrics: Option<MetricsStore>,
    workers: Vec<Addr<WorkerMsg>>,
    allocation: Option<Allocation>,
    current_step: i64,
    client_end_times: HashMap<u32, (f64, f64)>,
    complete_current_task_sent: bool,
    raw_samples: Vec<Sample>,
    most_recent_sample: HashMap<u32, Sample>,
    pending_preparators: usize,
    epoch: Instant,
    shutting_down: bool,
}

impl<T: LoadTarget> Coordinator<T> {
    pub(crate) fn new(
        target: T,
        system: Arc<ActorSystem>,
        self_addr: Addr<CoordinatorMsg>,
        events: mpsc::UnboundedSender<BenchmarkEvent>,
    ) -> Self {
        Self {
            target,
            system,
            self_addr,
            events,
            config: DriverConfig::default(),
            track: None,
            challenge: None,
            metrics: None,
            workers: Vec::new(),
            allocation: None,
            current_step: -1,
            client_end_times: HashMap::new(),
            complete_current_task_sent: false,
            raw_samples: Vec::new(),
            most_recent_sample: HashMap::new(),
            pending_preparators: 0,
            epoch: Instant::now(),
            shutting_down: false,
        }
    }

    fn master_now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }

    fn finished(&self) -> bool {
        match &self.allocation {
            Some(alloc) => self.current_step >= alloc.steps() as i64,
            None => false,
        }
    }

    fn start(&mut self, msg: StartBenchmark) -> Result<()> {
        self.config = msg.config;
        let challenge = msg.track.find_challenge_or_default(self.config.challenge.as_deref())?;
        tracing::info!(
            track = %msg.track.name,
            challenge = %challenge.name,
            "benchmark is about to start"
        );

        // Created but not yet opened: the store's timer starts at open.
        self.metrics = Some(MetricsStore::new(msg.metrics_meta));
        self.challenge = Some(challenge);
        self.track = Some(msg.track.clone());

        let hosts = self.config.hosts()?;
        self.pending_preparators = hosts.len();
        for (i, host) in hosts.iter().enumerate() {
            let preparator = TrackPreparator {
                target: self.target.clone(),
                track: msg.track.clone(),
                master: self.self_addr.clone(),
                host: host.clone(),
            };
            let r = self
                .system
                .spawn(&format!("/driver/track-preparator/{i}"), host, move |_| preparator);
            r.addr().send(PreparatorMsg::Prepare);
        }

        self.self_addr
            .send_after(self.config.progress_interval, CoordinatorMsg::Tick(TickKind::Progress));
        Ok(())
    }

    fn after_track_prepared(&mut self) -> Result<()> {
        let (Some(track), Some(challenge), Some(metrics)) =
            (self.track.clone(), self.challenge.clone(), self.metrics.as_mut())
        else {
            return Err(DriverError::Assertion("track prepared before start".to_string()));
        };

        tracing::info!(
            track = %track.name,
            challenge = %challenge.name,
            "all hosts prepared, starting load workers"
        );
        metrics.open(track.name.clone(), challenge.name.clone());

        let allocation = Allocator::new(&challenge.schedule).allocate();
        tracing::info!(
            steps = allocation.steps(),
            clients = allocation.clients(),
            "allocation matrix computed"
        );

        for client_id in 0..allocation.clients() {
            let host = self.system.host_for(client_id as usize).clone();
            tracing::info!(client_id, host = %host, "allocating load worker");

            let target = self.target.clone();
            let master = self.self_addr.clone();
            let r = self
                .system
                .spawn(&format!("/driver/worker/{client_id}"), &host, move |addr| {
                    LoadWorker::new(target, master, addr)
                });
            self.workers.push(r.addr());

            let self_addr = self.self_addr.clone();
            tokio::spawn(async move {
                let reason = r.exited().await;
                self_addr.send(CoordinatorMsg::WorkerExited {
                    client_id,
                    requested: reason == ExitReason::Stopped,
                });
            });
        }

        for (client_id, worker) in self.workers.iter().enumerate() {
            tracing::info!(client_id, "starting load worker");
            worker.send(WorkerMsg::Start(StartLoadGenerator {
                client_id: client_id as u32,
                config: self.config.clone(),
                track: track.clone(),
                tasks: allocation.matrix[client_id].clone(),
            }));
        }

        self.allocation = Some(allocation);
        Ok(())
    }

    fn join_point_reached(
        &mut self,
        client_id: u32,
        client_local_time: f64,
        join_point: &crate::allocator::JoinPoint,
    ) -> Result<Flow> {
        let received_at = self.master_now();
        if self
            .client_end_times
            .insert(client_id, (client_local_time, received_at))
            .is_some()
        {
            return Err(DriverError::Assertion(format!(
                "worker [{client_id}] reported join point [{}] twice",
                join_point.id
            )));
        }

        let total = self.workers.len();
        let arrived = self.client_end_times.len();
        tracing::info!(
            "[{arrived}/{total}] workers reached join point [{}/{}]",
            self.current_step + 1,
            self.allocation.as_ref().map(|a| a.steps()).unwrap_or(0),
        );

        if arrived == total {
            return self.step_complete();
        }

        // Tasks before this join point can complete the whole group: once
        // every worker running such a task has arrived, tell the rest to
        // finish up. Memoized per step so we don't re-send while waiting.
        if join_point.preceding_task_completes_parent() && !self.complete_current_task_sent {
            let all_done = join_point
                .completing_clients
                .iter()
                .all(|c| self.client_end_times.contains_key(c));
            if all_done {
                self.complete_current_task_sent = true;
                tracing::info!(
                    join_point = join_point.id,
                    "all completing workers finished, completing current tasks"
                );
                for worker in &self.workers {
                    worker.send(WorkerMsg::CompleteCurrentTask);
                }
            }
        }
        Ok(Flow::Continue)
    }

    fn step_complete(&mut self) -> Result<Flow> {
        let client_end_times = std::mem::take(&mut self.client_end_times);
        self.complete_current_task_sent = false;
        self.update_progress(true);
        self.most_recent_sample.clear();
        self.current_step += 1;

        let is_finished = self.finished();
        let (Some(track), Some(challenge), Some(metrics)) =
            (self.track.clone(), self.challenge.clone(), self.metrics.as_mut())
        else {
            return Err(DriverError::Assertion("step completed before start".to_string()));
        };

        tracing::info!("postprocessing samples");
        let samples = std::mem::take(&mut self.raw_samples);
        post_process_samples(metrics, &track, &challenge, &samples);
        let batch = metrics.to_externalizable(true);

        if is_finished {
            tracing::info!("all steps completed, closing metrics store");
            metrics.close();
            let _ = self.events.send(BenchmarkEvent::Complete { metrics: batch });
            self.shutdown_workers();
            return Ok(Flow::Stop);
        }

        let waiting_period = self.config.handoff_delay();
        let _ = self.events.send(BenchmarkEvent::TaskFinished {
            metrics: batch,
            next_task_in: waiting_period.as_secs_f64(),
        });
        if waiting_period.is_zero() {
            if let Some(metrics) = self.metrics.as_mut() {
                metrics.reset_relative_time();
            }
        } else {
            self.self_addr
                .send_after(waiting_period, CoordinatorMsg::Tick(TickKind::RelativeReset));
        }

        let start_next = self.master_now() + waiting_period.as_secs_f64();
        for (client_id, worker) in self.workers.iter().enumerate() {
            let end_times = client_end_times.get(&(client_id as u32)).copied().ok_or_else(
                || DriverError::Assertion(format!("no join point report from [{client_id}]")),
            )?;
            let resume_at = resume_time(end_times, start_next);
            tracing::info!(
                client_id,
                "scheduling next task at worker timestamp [{resume_at:.3}] (master [{start_next:.3}])"
            );
            worker.send(WorkerMsg::Drive { resume_at });
        }
        Ok(Flow::Continue)
    }

    fn update_progress(&self, task_finished: bool) {
        if self.config.quiet || self.current_step < 0 {
            return;
        }
        let Some(alloc) = &self.allocation else { return };
        let Some(ops) = alloc.ops_per_step.get(self.current_step as usize) else { return };

        // Only workers whose most recent sample defines progress count;
        // eternal tasks depend entirely on their completing sibling.
        let total_progress = if task_finished {
            1.0
        } else {
            let progress: Vec<f64> =
                self.most_recent_sample.values().filter_map(|s| s.progress).collect();
            progress.iter().sum::<f64>() / progress.len().max(1) as f64
        };
        tracing::info!(
            "Running {} [{:3.0}% done]",
            ops.iter().join(","),
            (total_progress * 100.0).round()
        );
    }

    fn shutdown_workers(&mut self) {
        self.shutting_down = true;
        for worker in &self.workers {
            worker.send(WorkerMsg::Exit);
        }
    }

    fn teardown(&mut self, event: BenchmarkEvent) -> Flow {
        if let Some(metrics) = self.metrics.as_mut() {
            metrics.close();
        }
        let _ = self.events.send(event);
        self.shutdown_workers();
        Flow::Stop
    }

    fn fatal(&mut self, err: DriverError) -> Flow {
        tracing::error!(error = %err, "fatal driver error, shutting down");
        self.teardown(BenchmarkEvent::Failure {
            message: "Could not execute benchmark".to_string(),
            cause: err.to_string(),
        })
    }
}

#[async_trait]
impl<T: LoadTarget> Actor for Coordinator<T> {
    type Msg = CoordinatorMsg;

    async fn handle(&mut self, msg: CoordinatorMsg) -> Flow {
        match msg {
            CoordinatorMsg::Start(start) => match self.start(start) {
                Ok(()) => Flow::Continue,
                Err(e) => self.fatal(e),
            },
            CoordinatorMsg::TrackPrepared { host } => {
                tracing::info!(host = %host, "track prepared");
                self.pending_preparators = self.pending_preparators.saturating_sub(1);
                if self.pending_preparators == 0 {
                    match self.after_track_prepared() {
                        Ok(()) => Flow::Continue,
                        Err(e) => self.fatal(e),
                    }
                } else {
                    Flow::Continue
                }
            }
            CoordinatorMsg::JoinPointReached { client_id, client_local_time, join_point } => {
                match self.join_point_reached(client_id, client_local_time, &join_point) {
                    Ok(flow) => flow,
                    Err(e) => self.fatal(e),
                }
            }
            CoordinatorMsg::UpdateSamples { client_id, samples } => {
                if let Some(last) = samples.last() {
                    self.most_recent_sample.insert(client_id, last.clone());
                }
                self.raw_samples.extend(samples);
                Flow::Continue
            }
            CoordinatorMsg::Tick(TickKind::Progress) => {
                if !self.finished() && !self.shutting_down {
                    self.update_progress(false);
                    self.self_addr.send_after(
                        self.config.progress_interval,
                        CoordinatorMsg::Tick(TickKind::Progress),
                    );
                }
                Flow::Continue
            }
            CoordinatorMsg::Tick(TickKind::RelativeReset) => {
                if let Some(metrics) = self.metrics.as_mut() {
                    metrics.reset_relative_time();
                }
                Flow::Continue
            }
            CoordinatorMsg::Failure { message, cause } => {
                tracing::error!(%message, %cause, "received fatal failure, shutting down");
                self.teardown(BenchmarkEvent::Failure { message, cause })
            }
            CoordinatorMsg::Cancelled => {
                tracing::info!("benchmark has been cancelled");
                self.teardown(BenchmarkEvent::Cancelled)
            }
            CoordinatorMsg::CancelRequested => {
                if self.workers.is_empty() {
                    return self.teardown(BenchmarkEvent::Cancelled);
                }
                for worker in &self.workers {
                    worker.send(WorkerMsg::Cancel);
                }
                Flow::Continue
            }
            CoordinatorMsg::WorkerExited { client_id, requested } => {
                if self.shutting_down || requested {
                    tracing::info!(client_id, "load worker has exited");
                    Flow::Continue
                } else {
                    tracing::error!(client_id, "load worker has exited prematurely, aborting");
                    let err = DriverError::WorkerExited { client_id };
                    self.teardown(BenchmarkEvent::Failure {
                        message: err.to_string(),
                        cause: String::new(),
                    })
                }
            }
        }
    }
}

/// The overall result of a benchmark run.
#[derive(Debug)]
pub enum BenchmarkOutcome {
    /// Every step completed; one metrics batch per step, in order.
    Complete {
        /// Externalized per-step metrics, the final step last.
        steps: Vec<MetricsBatch>,
    },
    /// The benchmark was aborted by a fatal error.
    Failed {
        /// Human-readable summary.
        message: String,
        /// The underlying cause.
        cause: String,
    },
    /// The benchmark was cancelled by the user.
    Cancelled,
}

/// Runs a benchmark to completion.
///
/// Wires up the actor system from the configured hosts, spawns the
/// coordinator, and consumes its events until the benchmark completes,
/// fails, or is cancelled via `cancel`.
pub async fn run_benchmark<T: LoadTarget>(
    target: T,
    config: DriverConfig,
    track: Track,
    cancel: CancellationToken,
) -> anyhow::Result<BenchmarkOutcome> {
    let hosts = config.hosts()?;
    let system = Arc::new(ActorSystem::new(ActorSystemConfig {
        base: SystemBase::InProcess,
        hosts,
    }));
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let track = Arc::new(track);

    let system_for_coordinator = system.clone();
    let r = system.spawn("/driver/coordinator", &HostSpec::Coordinator, move |addr| {
        Coordinator::new(target, system_for_coordinator, addr, events_tx)
    });
    let coordinator = r.addr();
    coordinator.send(CoordinatorMsg::Start(StartBenchmark {
        config,
        track,
        metrics_meta: MetaMap::new(),
    }));

    let mut steps = Vec::new();
    let mut cancel_requested = false;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled(), if !cancel_requested => {
                cancel_requested = true;
                coordinator.send(CoordinatorMsg::CancelRequested);
            }
            event = events_rx.recv() => match event {
                Some(BenchmarkEvent::TaskFinished { metrics, next_task_in }) => {
                    tracing::debug!(next_task_in, "task finished");
                    steps.push(metrics);
                }
                Some(BenchmarkEvent::Complete { metrics }) => {
                    steps.push(metrics);
                    return Ok(BenchmarkOutcome::Complete { steps });
                }
                Some(BenchmarkEvent::Failure { message, cause }) => {
                    return Ok(BenchmarkOutcome::Failed { message, cause });
                }
                Some(BenchmarkEvent::Cancelled) => return Ok(BenchmarkOutcome::Cancelled),
                None => anyhow::bail!("coordinator exited without reporting a result"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        params::{ParamSource, Params, StaticParams},
        runner::{OperationRunner, RunnerError, RunnerOutcome},
        track::{Operation, ParallelGroup, Task, TaskBounds},
    };
    use std::time::Duration;
    use tokio::time::timeout;

    #[derive(Clone)]
    struct CountingTarget {
        delay: Duration,
    }

    struct CountingRunner {
        delay: Duration,
    }

    #[async_trait]
    impl OperationRunner<()> for CountingRunner {
        async fn run(
            &self,
            _: &mut (),
            _: &Params,
        ) -> std::result::Result<RunnerOutcome, RunnerError> {
            tokio::time::sleep(self.delay).await;
            Ok(RunnerOutcome::Count(1, "ops".to_string()))
        }
    }

    #[async_trait]
    impl LoadTarget for CountingTarget {
        type Client = ();

        async fn connect(&self, _client_id: u32) -> anyhow::Result<()> {
            Ok(())
        }

        fn runner(
            &self,
            _: &Operation,
        ) -> anyhow::Result<Arc<dyn OperationRunner<()>>> {
            Ok(Arc::new(CountingRunner { delay: self.delay }))
        }

        fn params(&self, _: &Operation) -> anyhow::Result<Arc<dyn ParamSource>> {
            Ok(Arc::new(StaticParams::default()))
        }
    }

    fn test_config() -> DriverConfig {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
        DriverConfig { test_mode: true, quiet: true, ..Default::default() }
    }

    fn iter_task(name: &str, clients: u32, measure: u64) -> Task {
        Task::new(
            Operation::new(name, "noop"),
            clients,
            TaskBounds::Iterations { warmup: 0, measure },
        )
    }

    fn track_of(groups: Vec<ParallelGroup>) -> Track {
        Track::new("test-track", vec![Challenge::new("default", groups).as_default()])
    }

    async fn run(track: Track) -> BenchmarkOutcome {
        timeout(
            Duration::from_secs(30),
            run_benchmark(
                CountingTarget { delay: Duration::from_millis(1) },
                test_config(),
                track,
                CancellationToken::new(),
            ),
        )
        .await
        .expect("benchmark timed out")
        .expect("benchmark errored")
    }

    fn latency_count(batch: &MetricsBatch, operation: &str) -> usize {
        batch
            .points
            .iter()
            .filter(|p| p.name == "latency" && p.operation == operation)
            .count()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn two_workers_two_sequential_tasks() {
        let track = track_of(vec![
            ParallelGroup::new(vec![iter_task("t1", 2, 10)]),
            ParallelGroup::new(vec![iter_task("t2", 2, 4)]),
        ]);

        let BenchmarkOutcome::Complete { steps } = run(track).await else {
            panic!("expected completion")
        };

        // Initial barrier, then one batch per group.
        assert_eq!(steps.len(), 3);
        assert!(steps[0].points.is_empty());
        // 10 iterations split across 2 workers, one latency point each.
        assert_eq!(latency_count(&steps[1], "t1"), 10);
        assert_eq!(latency_count(&steps[2], "t2"), 4);
        assert!(steps[1].points.iter().any(|p| p.name == "throughput" && p.operation == "t1"));
        assert!(steps[2].points.iter().any(|p| p.name == "throughput" && p.operation == "t2"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn completing_task_terminates_its_eternal_sibling() {
        let finite = Task::new(
            Operation::new("finite", "noop"),
            1,
            TaskBounds::TimePeriod {
                warmup: Duration::ZERO,
                period: Some(Duration::from_millis(300)),
            },
        )
        .completing_parent();
        let eternal = Task::new(
            Operation::new("eternal", "noop"),
            1,
            TaskBounds::TimePeriod { warmup: Duration::ZERO, period: None },
        );
        let track = track_of(vec![ParallelGroup::new(vec![finite, eternal])]);

        let started = Instant::now();
        let BenchmarkOutcome::Complete { steps } = run(track).await else {
            panic!("expected completion: the eternal task must be completed by its sibling")
        };
        assert!(started.elapsed() < Duration::from_secs(20));

        let eternal_points: Vec<_> = steps[1]
            .points
            .iter()
            .filter(|p| p.name == "latency" && p.operation == "eternal")
            .collect();
        assert!(!eternal_points.is_empty(), "the eternal sibling must have produced samples");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn premature_worker_exit_aborts_the_benchmark() {
        let system = Arc::new(ActorSystem::new(ActorSystemConfig::default()));
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let target = CountingTarget { delay: Duration::from_millis(1) };

        let eternal = |name: &str| {
            Task::new(
                Operation::new(name, "noop"),
                1,
                TaskBounds::TimePeriod { warmup: Duration::ZERO, period: None },
            )
        };
        let track = Arc::new(track_of(vec![ParallelGroup::new(vec![
            eternal("a"),
            eternal("b"),
        ])]));

        let system_for_coordinator = system.clone();
        let r = system.spawn("/driver/coordinator", &HostSpec::Coordinator, move |addr| {
            Coordinator::new(target, system_for_coordinator, addr, events_tx)
        });
        r.addr().send(CoordinatorMsg::Start(StartBenchmark {
            config: test_config(),
            track,
            metrics_meta: MetaMap::new(),
        }));

        // Let both workers pass the initial barrier and start their
        // eternal tasks, then kill one of them.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(system.abort("/driver/worker/1"));

        let event = timeout(Duration::from_secs(10), async {
            loop {
                match events_rx.recv().await {
                    Some(BenchmarkEvent::TaskFinished { .. }) => continue,
                    other => break other,
                }
            }
        })
        .await
        .expect("timed out waiting for failure");
        match event {
            Some(BenchmarkEvent::Failure { message, .. }) => {
                assert!(message.contains("exited prematurely"), "message was: {message}");
            }
            other => panic!("expected failure, got {:?}", other.is_some()),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn cancellation_produces_a_cancelled_outcome() {
        let eternal = Task::new(
            Operation::new("eternal", "noop"),
            1,
            TaskBounds::TimePeriod { warmup: Duration::ZERO, period: None },
        );
        let track = track_of(vec![ParallelGroup::new(vec![eternal])]);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            trigger.cancel();
        });

        let outcome = timeout(
            Duration::from_secs(30),
            run_benchmark(
                CountingTarget { delay: Duration::from_millis(1) },
                test_config(),
                track,
                cancel,
            ),
        )
        .await
        .expect("benchmark timed out")
        .expect("benchmark errored");
        assert!(matches!(outcome, BenchmarkOutcome::Cancelled));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_parameters_fail_the_benchmark() {
        #[derive(Clone)]
        struct BrokenTarget;

        struct BrokenRunner;

        #[async_trait]
        impl OperationRunner<()> for BrokenRunner {
            async fn run(
                &self,
                _: &mut (),
                _: &Params,
            ) -> std::result::Result<RunnerOutcome, RunnerError> {
                Err(RunnerError::MissingParameter("index".to_string()))
            }
        }

        #[async_trait]
        impl LoadTarget for BrokenTarget {
            type Client = ();

            async fn connect(&self, _client_id: u32) -> anyhow::Result<()> {
                Ok(())
            }

            fn runner(
                &self,
                _: &Operation,
            ) -> anyhow::Result<Arc<dyn OperationRunner<()>>> {
                Ok(Arc::new(BrokenRunner))
            }

            fn params(&self, _: &Operation) -> anyhow::Result<Arc<dyn ParamSource>> {
                Ok(Arc::new(StaticParams::default()))
            }
        }

        let track = track_of(vec![ParallelGroup::new(vec![iter_task("t1", 1, 5)])]);
        let outcome = timeout(
            Duration::from_secs(30),
            run_benchmark(BrokenTarget, test_config(), track, CancellationToken::new()),
        )
        .await
        .expect("benchmark timed out")
        .expect("benchmark errored");
        assert!(matches!(outcome, BenchmarkOutcome::Failed { .. }));
    }

    #[test]
    fn skew_compensation_translates_into_each_worker_frame() {
        // Two workers whose monotonic clocks are 3s apart report "now":
        // worker 0 at local 10.0, worker 1 at local 13.0. The master saw
        // both at its own 100.0 and wants to resume at 105.0.
        let resume_0 = resume_time((10.0, 100.0), 105.0);
        let resume_1 = resume_time((13.0, 100.0), 105.0);

        assert_eq!(resume_0, 15.0);
        assert_eq!(resume_1, 18.0);
        // The frames differ by exactly the clock offset, so the actual
        // resume instants coincide.
        assert_eq!(resume_1 - resume_0, 3.0);
    }

    #[test]
    fn skew_compensation_accounts_for_receive_delay() {
        // Worker 1's report arrived 0.5s after worker 0's; both resume
        // 5s after the last arrival on the master clock.
        let resume_0 = resume_time((10.0, 100.0), 105.5);
        let resume_1 = resume_time((13.0, 100.5), 105.5);

        // Worker 0 waits 5.5s from its report, worker 1 waits 5.0s; both
        // land on the same wall-clock instant.
        assert_eq!(resume_0 - 10.0, 5.5);
        assert_eq!(resume_1 - 13.0, 5.0);
    }
}
