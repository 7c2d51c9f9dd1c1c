//! The load worker: one actor per client driving its matrix column.
//!
//! A worker walks its column cell by cell. Task cells spawn an executor
//! on a dedicated task so the actor loop stays responsive to control
//! messages; barrier cells report the worker's local monotonic timestamp
//! to the coordinator and block until the next `Drive`. While a task
//! runs, a periodic wakeup drains the sampler, ships samples, and checks
//! the executor for completion or failure.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use tokio::{sync::Mutex, task::JoinHandle};

use crate::{
    actor::{Actor, Addr, Flow},
    allocator::TaskCell,
    config::DriverConfig,
    error::{DriverError, Result},
    executor::Executor,
    messages::{CoordinatorMsg, StartLoadGenerator, WorkerMsg},
    runner::LoadTarget,
    sampler::Sampler,
    schedule::schedule_for,
};

/// A worker-local monotonic clock.
///
/// Timestamps from this clock are only ever compared against other
/// timestamps from the same worker; the coordinator translates between
/// clocks without assuming any synchronization.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WorkerClock {
    epoch: Instant,
    offset: f64,
}

impl WorkerClock {
    pub(crate) fn new() -> Self {
        Self { epoch: Instant::now(), offset: 0.0 }
    }

    /// A clock whose origin is shifted, as on a host booted at a
    /// different time.
    #[cfg(test)]
    pub(crate) fn with_offset(offset: f64) -> Self {
        Self { epoch: Instant::now(), offset }
    }

    pub(crate) fn now(&self) -> f64 {
        self.offset + self.epoch.elapsed().as_secs_f64()
    }
}

/// The per-worker driver state machine.
pub(crate) struct LoadWorker<T: LoadTarget> {
    target: T,
    master: Addr<CoordinatorMsg>,
    self_addr: Addr<WorkerMsg>,
    clock: WorkerClock,
    client_id: u32,
    config: DriverConfig,
    tasks: Vec<TaskCell>,
    idx: usize,
    at_join_point: bool,
    client: Option<Arc<Mutex<T::Client>>>,
    cancel: Arc<AtomicBool>,
    complete: Arc<AtomicBool>,
    executor: Option<JoinHandle<Result<()>>>,
    sampler: Option<Arc<Sampler>>,
    start_driving: bool,
    wakeup_interval: Duration,
}

impl<T: LoadTarget> LoadWorker<T> {
    pub(crate) fn new(target: T, master: Addr<CoordinatorMsg>, self_addr: Addr<WorkerMsg>) -> Self {
        Self {
            target,
            master,
            self_addr,
            clock: WorkerClock::new(),
            client_id: 0,
            config: DriverConfig::default(),
            tasks: Vec::new(),
            idx: 0,
            at_join_point: false,
            client: None,
            cancel: Arc::new(AtomicBool::new(false)),
            complete: Arc::new(AtomicBool::new(false)),
            executor: None,
            sampler: None,
            start_driving: false,
            wakeup_interval: Duration::from_secs(5),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_clock(mut self, clock: WorkerClock) -> Self {
        self.clock = clock;
        self
    }

    async fn start(&mut self, msg: StartLoadGenerator) -> Result<()> {
        tracing::info!(
            client_id = msg.client_id,
            track = %msg.track.name,
            "load worker is about to start"
        );
        self.client_id = msg.client_id;
        self.config = msg.config;
        self.tasks = msg.tasks;
        self.idx = 0;
        self.cancel.store(false, Ordering::SeqCst);
        self.complete.store(false, Ordering::SeqCst);
        self.wakeup_interval = self.config.worker_wakeup();

        let client = self.target.connect(self.client_id).await?;
        self.client = Some(Arc::new(Mutex::new(client)));
        self.drive().await
    }

    /// Advances through the column until something blocks: a spawned
    /// task, a reported barrier, or the end of the column.
    async fn drive(&mut self) -> Result<()> {
        loop {
            let cell = match self.tasks.get(self.idx) {
                Some(cell) => cell.clone(),
                None => return Ok(()),
            };
            match cell {
                TaskCell::Idle => {
                    self.idx += 1;
                }
                TaskCell::Barrier(join_point) => {
                    // Workers that executed a task wait for their executor
                    // before reporting.
                    if let Some(handle) = self.executor.take() {
                        join_executor(handle).await?;
                    }
                    self.ship_samples();
                    self.cancel.store(false, Ordering::SeqCst);
                    self.complete.store(false, Ordering::SeqCst);
                    self.sampler = None;
                    self.at_join_point = true;
                    self.idx += 1;

                    tracing::info!(
                        client_id = self.client_id,
                        join_point = join_point.id,
                        "reached join point"
                    );
                    self.master.send(CoordinatorMsg::JoinPointReached {
                        client_id: self.client_id,
                        client_local_time: self.clock.now(),
                        join_point,
                    });
                    return Ok(());
                }
                TaskCell::Task(task) => {
                    self.at_join_point = false;
                    // Once asked to complete, skip every scheduled task up
                    // to the next join point, not just the running one.
                    if self.complete.load(Ordering::SeqCst) {
                        tracing::info!(
                            client_id = self.client_id,
                            task = %task,
                            "skipping task; completing all tasks until next join point"
                        );
                        self.idx += 1;
                        continue;
                    }

                    tracing::info!(client_id = self.client_id, task = %task, "executing task");
                    let sampler = Arc::new(Sampler::new(self.client_id, task.clone()));
                    self.sampler = Some(sampler.clone());

                    let operation = &task.operation;
                    let source = self.target.params(operation)?;
                    let runner = self.target.runner(operation)?;
                    // Partition indices stay within [0, task.clients).
                    let schedule =
                        schedule_for(&task, self.client_id % task.clients.max(1), source.as_ref())?;

                    let client = self.client.clone().ok_or_else(|| {
                        DriverError::Assertion("worker driving without a client".to_string())
                    })?;
                    let executor = Executor::new(
                        task,
                        schedule,
                        client,
                        runner,
                        sampler,
                        self.cancel.clone(),
                        self.complete.clone(),
                    );
                    self.executor = Some(tokio::spawn(executor.run()));
                    self.idx += 1;
                    self.self_addr.send_after(self.wakeup_interval, WorkerMsg::Wakeup);
                    return Ok(());
                }
            }
        }
    }

    async fn on_wakeup(&mut self) -> Flow {
        if self.start_driving {
            self.start_driving = false;
            tracing::info!(client_id = self.client_id, "starts driving now");
            if let Err(e) = self.drive().await {
                self.fail(e);
            }
            return Flow::Continue;
        }

        self.ship_samples();

        if self.cancel.load(Ordering::SeqCst) {
            tracing::info!(
                client_id = self.client_id,
                "benchmark has been cancelled, notifying master"
            );
            if let Some(handle) = self.executor.take() {
                handle.abort();
            }
            self.master.send(CoordinatorMsg::Cancelled);
            return Flow::Stop;
        }

        match self.executor.take() {
            Some(handle) if handle.is_finished() => match join_executor(handle).await {
                Ok(()) => {
                    tracing::info!(client_id = self.client_id, "ready for the next task");
                    if let Err(e) = self.drive().await {
                        self.fail(e);
                    }
                }
                Err(e) => self.fail(e),
            },
            Some(handle) => {
                self.executor = Some(handle);
                self.self_addr.send_after(self.wakeup_interval, WorkerMsg::Wakeup);
            }
            None => {}
        }
        Flow::Continue
    }

    /// Drains the sampler and ships everything to the coordinator.
    fn ship_samples(&mut self) {
        let Some(sampler) = &self.sampler else { return };
        let samples = sampler.drain();
        if samples.is_empty() {
            return;
        }
        if let Some(last) = samples.last() {
            match last.progress {
                Some(p) => tracing::debug!(
                    client_id = self.client_id,
                    task = %last.task,
                    "executing ({:.2}% complete)",
                    p * 100.0
                ),
                None => tracing::debug!(
                    client_id = self.client_id,
                    task = %last.task,
                    "executing (dependent eternal task)"
                ),
            }
        }
        self.master
            .send(CoordinatorMsg::UpdateSamples { client_id: self.client_id, samples });
    }

    fn fail(&self, err: DriverError) {
        tracing::error!(client_id = self.client_id, error = %err, "benchmark failure");
        self.master.send(CoordinatorMsg::Failure {
            message: format!("Error in load worker [{}]", self.client_id),
            cause: err.to_string(),
        });
    }
}

async fn join_executor(handle: JoinHandle<Result<()>>) -> Result<()> {
    match handle.await {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => Ok(()),
        Err(e) => Err(DriverError::Assertion(format!("executor task failed: {e}"))),
    }
}

#[async_trait]
impl<T: LoadTarget> Actor for LoadWorker<T> {
    type Msg = WorkerMsg;

    async fn handle(&mut self, msg: WorkerMsg) -> Flow {
        match msg {
            WorkerMsg::Start(start) => {
                if let Err(e) = self.start(start).await {
                    self.fail(e);
                }
                Flow::Continue
            }
            WorkerMsg::Drive { resume_at } => {
                let delay = (resume_at - self.clock.now()).max(0.0);
                tracing::info!(
                    client_id = self.client_id,
                    task_index = self.idx,
                    "continuing work in {:.3}s",
                    delay
                );
                self.start_driving = true;
                self.self_addr.send_after(Duration::from_secs_f64(delay), WorkerMsg::Wakeup);
                Flow::Continue
            }
            WorkerMsg::CompleteCurrentTask => {
                if self.at_join_point {
                    tracing::info!(
                        client_id = self.client_id,
                        "received CompleteCurrentTask at a join point, ignoring"
                    );
                } else {
                    tracing::info!(client_id = self.client_id, "completing current task");
                    self.complete.store(true, Ordering::SeqCst);
                }
                Flow::Continue
            }
            WorkerMsg::Cancel => {
                self.cancel.store(true, Ordering::SeqCst);
                // Wake immediately so the cancellation is noticed even
                // while parked at a join point.
                self.self_addr.send(WorkerMsg::Wakeup);
                Flow::Continue
            }
            WorkerMsg::Wakeup => self.on_wakeup().await,
            WorkerMsg::Exit => {
                tracing::info!(client_id = self.client_id, "exiting on request");
                self.cancel.store(true, Ordering::SeqCst);
                if let Some(handle) = self.executor.take() {
                    handle.abort();
                }
                Flow::Stop
            }
        }
    }
}
