//! Contracts between the driver and the system under test.
//!
//! An [`OperationRunner`] issues one request against the target cluster
//! client and reports what it did through a tagged [`RunnerOutcome`].
//! The [`LoadTarget`] trait bundles everything the driver needs from the
//! outside world: client construction, runner lookup, parameter sources,
//! and per-host track preparation.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::{
    error::DriverError,
    params::{ParamSource, Params},
    sample::RequestMeta,
    track::{MetaMap, Operation, Track},
};

/// What a runner reports about one invocation.
///
/// `Count` and `Unit` imply success; a `Record` carries its own outcome,
/// including failures the runner chose to absorb.
#[derive(Debug, Clone)]
pub enum RunnerOutcome {
    /// `ops` operations of the given unit were performed.
    Count(u64, String),
    /// A detailed record of the invocation.
    Record(RunnerRecord),
    /// One operation of unit `"ops"` was performed.
    Unit,
}

/// Detailed invocation record with defaults matching a single successful
/// operation.
#[derive(Debug, Clone)]
pub struct RunnerRecord {
    /// Operations performed. Defaults to 1.
    pub ops: u64,
    /// Unit of `ops`. Defaults to `"ops"`.
    pub unit: String,
    /// Whether the request succeeded. Defaults to true.
    pub success: bool,
    /// Error description for absorbed failures.
    pub error: Option<String>,
    /// Protocol status code, when available.
    pub http_status: Option<i64>,
    /// Additional request metadata merged into reported metric points.
    pub meta: MetaMap,
}

impl Default for RunnerRecord {
    fn default() -> Self {
        Self {
            ops: 1,
            unit: "ops".to_string(),
            success: true,
            error: None,
            http_status: None,
            meta: MetaMap::new(),
        }
    }
}

#[cfg(feature = "http")]
impl RunnerRecord {
    /// Derives success and status code from an HTTP status.
    pub fn with_status(mut self, status: http::StatusCode) -> Self {
        self.success = status.is_success();
        self.http_status = Some(status.as_u16().into());
        self
    }
}

/// Errors a runner can raise.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// A protocol or transport failure. Recoverable: recorded as a failed
    /// sample, the task continues.
    #[error("transport error: {description}")]
    Transport {
        /// Description of the failure.
        description: String,
        /// Protocol status code, when the transport reported one.
        status: Option<i64>,
    },

    /// Required parameters were missing. Fatal for the benchmark.
    #[error("missing parameter: {0}")]
    MissingParameter(String),

    /// Any other runner failure. Fatal for the benchmark.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Executes one operation against the target.
///
/// `C` is the target cluster client created by [`LoadTarget::connect`];
/// one runner instance serves all iterations of a task.
#[async_trait]
pub trait OperationRunner<C>: Send + Sync {
    /// Issues one request with the given parameters.
    async fn run(&self, client: &mut C, params: &Params) -> Result<RunnerOutcome, RunnerError>;
}

/// The narrow seam to everything outside the driver core.
#[async_trait]
pub trait LoadTarget: Clone + Send + Sync + 'static {
    /// The per-worker cluster client.
    type Client: Send + 'static;

    /// Creates the cluster client for one worker. Called once per worker,
    /// before its first task; the client is reused across tasks.
    async fn connect(&self, client_id: u32) -> anyhow::Result<Self::Client>;

    /// Resolves the runner for an operation kind.
    fn runner(
        &self,
        operation: &Operation,
    ) -> anyhow::Result<Arc<dyn OperationRunner<Self::Client>>>;

    /// Resolves the parameter source for an operation.
    fn params(&self, operation: &Operation) -> anyhow::Result<Arc<dyn ParamSource>>;

    /// Prepares the track on one load driver host before workers start.
    async fn prepare(&self, track: &Track) -> anyhow::Result<()> {
        let _ = track;
        Ok(())
    }
}

/// Invokes the runner once and normalizes its outcome.
///
/// Transport errors become failed request metadata with zero ops; missing
/// parameters and other failures propagate as fatal driver errors.
pub(crate) async fn execute_single<C>(
    runner: &dyn OperationRunner<C>,
    client: &mut C,
    operation: &Operation,
    params: &Params,
) -> Result<(u64, String, RequestMeta), DriverError> {
    match runner.run(client, params).await {
        Ok(RunnerOutcome::Count(ops, unit)) => Ok((ops, unit, RequestMeta::success())),
        Ok(RunnerOutcome::Record(record)) => {
            let meta = RequestMeta {
                success: record.success,
                error: record.error,
                http_status: record.http_status,
                extra: record.meta,
            };
            Ok((record.ops, record.unit, meta))
        }
        Ok(RunnerOutcome::Unit) => Ok((1, "ops".to_string(), RequestMeta::success())),
        Err(RunnerError::Transport { description, status }) => {
            Ok((0, "ops".to_string(), RequestMeta::failure(description, status)))
        }
        Err(RunnerError::MissingParameter(reason)) => {
            Err(DriverError::MissingParameter { operation: operation.name.clone(), reason })
        }
        Err(RunnerError::Other(cause)) => Err(DriverError::Other(cause)),
    }
}
