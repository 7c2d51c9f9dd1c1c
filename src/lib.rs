//! A distributed benchmark load driver with barrier-synchronized workers.
//!
//! This crate turns a declarative benchmark description (a [`Track`]
//! whose [`Challenge`] is a sequence of parallel task groups) into
//! coordinated workload execution across many concurrent workers, which
//! may be spread over several hosts.
//!
//! ## How it works
//!
//! The [`allocator`] expands the schedule into a rectangular per-worker
//! task matrix separated by join points. A [`coordinator`] actor drives
//! one worker actor per client through the matrix: workers execute their
//! tasks, stream timing [`Sample`]s back, and block at each join point
//! until every worker has arrived. The coordinator then computes a
//! skew-compensated resume time per worker and releases the next step.
//! At every barrier, the step's samples are post-processed into latency,
//! service time and global [`throughput`] metrics.
//!
//! Parallel groups support cooperative early completion: when a task
//! marked as completing its parent finishes, sibling tasks are told to
//! stop, including eternal ones that would otherwise run forever.
//!
//! ## Example
//!
//! A benchmark needs a [`LoadTarget`] describing the system under test:
//!
//! ```no_run
//! use std::sync::Arc;
//! use anyhow::Result;
//! use async_trait::async_trait;
//! use drover::{
//!     LoadTarget, Operation, OperationRunner, RunnerError, RunnerOutcome,
//!     params::{ParamSource, Params, StaticParams},
//! };
//!
//! #[derive(Clone)]
//! struct MyTarget;
//!
//! struct Ping;
//!
//! #[async_trait]
//! impl OperationRunner<reqwest_like::Client> for Ping {
//!     async fn run(
//!         &self,
//!         client: &mut reqwest_like::Client,
//!         _params: &Params,
//!     ) -> Result<RunnerOutcome, RunnerError> {
//!         client.ping().await.map_err(|e| RunnerError::Transport {
//!             description: e.to_string(),
//!             status: None,
//!         })?;
//!         Ok(RunnerOutcome::Unit)
//!     }
//! }
//!
//! #[async_trait]
//! impl LoadTarget for MyTarget {
//!     type Client = reqwest_like::Client;
//!
//!     async fn connect(&self, _client_id: u32) -> Result<Self::Client> {
//!         Ok(reqwest_like::Client::new())
//!     }
//!
//!     fn runner(&self, _op: &Operation) -> Result<Arc<dyn OperationRunner<Self::Client>>> {
//!         Ok(Arc::new(Ping))
//!     }
//!
//!     fn params(&self, _op: &Operation) -> Result<Arc<dyn ParamSource>> {
//!         Ok(Arc::new(StaticParams::default()))
//!     }
//! }
//! # mod reqwest_like {
//! #     pub struct Client;
//! #     impl Client {
//! #         pub fn new() -> Self { Client }
//! #         pub async fn ping(&self) -> anyhow::Result<()> { Ok(()) }
//! #     }
//! # }
//! ```
//!
//! Then run it with [`run_benchmark`], or embed
//! [`cli::DriverCli`](crate::cli::DriverCli) into your own CLI and call
//! [`cli::run`](crate::cli::run).
#![deny(missing_docs)]

mod executor;
mod sampler;
mod worker;

pub mod actor;
pub mod allocator;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod messages;
pub mod metrics;
pub mod params;
pub mod runner;
pub mod sample;
pub mod schedule;
pub mod throughput;
pub mod track;

pub use crate::{
    config::DriverConfig,
    coordinator::{BenchmarkOutcome, run_benchmark},
    error::DriverError,
    runner::{LoadTarget, OperationRunner, RunnerError, RunnerOutcome, RunnerRecord},
    sample::{Sample, SampleKind},
    track::{Challenge, Operation, ParallelGroup, ScheduleKind, Task, TaskBounds, Track},
};
