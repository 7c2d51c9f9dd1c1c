//! The declarative benchmark description.
//!
//! A [`Track`] names the workload; a [`Challenge`] is one executable
//! benchmark within it, composed of an ordered sequence of
//! [`ParallelGroup`]s. Each group holds [`Task`]s that run concurrently
//! between two barriers. All of these types are immutable during a run.

use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::{DriverError, Result};

/// Opaque metadata attached to tracks, challenges, operations, tasks and
/// individual requests. Merged by precedence when samples are
/// post-processed.
pub type MetaMap = serde_json::Map<String, serde_json::Value>;

/// Identity of a benchmarked operation.
///
/// The operation's `kind` selects the runner; `name` keys all reported
/// metrics. Parameter sources and runners are resolved externally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    /// Metric key for this operation.
    pub name: String,
    /// Runner selector (e.g. `"search"`, `"bulk-index"`).
    pub kind: String,
    /// Opaque operation metadata.
    #[serde(default)]
    pub meta: MetaMap,
}

impl Operation {
    /// Creates an operation with empty metadata.
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self { name: name.into(), kind: kind.into(), meta: MetaMap::new() }
    }
}

/// How iteration dispatch times advance for a task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ScheduleKind {
    /// Fixed inter-arrival time of `1 / target_throughput` seconds.
    Deterministic {
        /// Target rate in operations per second.
        target_throughput: f64,
    },
    /// Exponentially distributed inter-arrival times with the given mean
    /// rate.
    Poisson {
        /// Target rate in operations per second.
        target_throughput: f64,
    },
    /// Back-to-back dispatch with no pacing. Latency equals service time
    /// for unthrottled tasks.
    Unthrottled,
}

/// Termination condition of a task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskBounds {
    /// Run a fixed number of iterations, split evenly across the task's
    /// clients.
    Iterations {
        /// Warmup iterations (reported as warmup samples).
        warmup: u64,
        /// Measurement iterations.
        measure: u64,
    },
    /// Run for a wall-clock period.
    ///
    /// When `period` is unset the task is *eternal* if its parameter
    /// source is infinite: it yields indefinitely with undefined progress
    /// and only terminates when a completing sibling finishes. A finite
    /// parameter source is iterated through once instead.
    TimePeriod {
        /// Warmup period (reported as warmup samples).
        warmup: Duration,
        /// Measurement period, or `None` for source-bound / eternal tasks.
        period: Option<Duration>,
    },
}

/// A single unit of load: an operation plus its execution parameters.
#[derive(Debug, Serialize, Deserialize)]
pub struct Task {
    /// The operation this task executes.
    pub operation: Operation,
    /// Degree of parallelism: how many workers execute this task.
    pub clients: u32,
    /// Dispatch pacing.
    pub schedule: ScheduleKind,
    /// Termination condition.
    pub bounds: TaskBounds,
    /// When true, completion of this task forces its siblings in the same
    /// parallel group to stop.
    #[serde(default)]
    pub completes_parent: bool,
    /// Opaque task metadata.
    #[serde(default)]
    pub meta: MetaMap,
}

impl Task {
    /// Creates an unthrottled task with empty metadata.
    pub fn new(operation: Operation, clients: u32, bounds: TaskBounds) -> Self {
        Self {
            operation,
            clients,
            schedule: ScheduleKind::Unthrottled,
            bounds,
            completes_parent: false,
            meta: MetaMap::new(),
        }
    }

    /// Sets the dispatch schedule.
    pub fn with_schedule(mut self, schedule: ScheduleKind) -> Self {
        self.schedule = schedule;
        self
    }

    /// Marks this task as completing its parallel group.
    pub fn completing_parent(mut self) -> Self {
        self.completes_parent = true;
        self
    }
}

impl std::fmt::Display for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.operation.name)
    }
}

/// A shared task reference usable as a grouping key.
///
/// Matrix cells and samples refer to the same task instance; equality and
/// hashing are by instance identity, matching the lock-step invariant of
/// the allocation matrix.
#[derive(Debug, Clone)]
pub struct TaskRef(pub Arc<Task>);

impl std::ops::Deref for TaskRef {
    type Target = Task;

    fn deref(&self) -> &Task {
        &self.0
    }
}

impl PartialEq for TaskRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for TaskRef {}

impl std::hash::Hash for TaskRef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

/// An ordered list of tasks intended to run concurrently between two
/// barriers.
#[derive(Debug, Clone)]
pub struct ParallelGroup {
    /// The tasks of this group.
    pub tasks: Vec<Arc<Task>>,
    /// Caps the number of workers this group uses. With fewer workers
    /// than sub-tasks, workers run several of the group's tasks in
    /// sequence.
    pub clients: Option<u32>,
}

impl ParallelGroup {
    /// Creates a group from the given tasks, using one worker per
    /// sub-task client.
    pub fn new(tasks: impl IntoIterator<Item = Task>) -> Self {
        Self { tasks: tasks.into_iter().map(Arc::new).collect(), clients: None }
    }

    /// Caps the group's worker count.
    pub fn with_clients(mut self, clients: u32) -> Self {
        self.clients = Some(clients);
        self
    }

    /// The number of workers this group occupies: the configured cap, or
    /// the total clients over all sub-tasks.
    pub fn clients(&self) -> u32 {
        self.clients.unwrap_or_else(|| self.tasks.iter().map(|t| t.clients).sum())
    }
}

/// One executable benchmark within a track.
#[derive(Debug, Clone)]
pub struct Challenge {
    /// Challenge name, used to select it from the track.
    pub name: String,
    /// Whether this challenge is the track's default.
    pub default: bool,
    /// The groups to execute, in order, separated by implicit barriers.
    pub schedule: Vec<ParallelGroup>,
    /// Opaque challenge metadata.
    pub meta: MetaMap,
}

impl Challenge {
    /// Creates a non-default challenge with empty metadata.
    pub fn new(name: impl Into<String>, schedule: Vec<ParallelGroup>) -> Self {
        Self { name: name.into(), default: false, schedule, meta: MetaMap::new() }
    }

    /// Marks this challenge as the track default.
    pub fn as_default(mut self) -> Self {
        self.default = true;
        self
    }
}

/// The complete workload description.
#[derive(Debug, Clone)]
pub struct Track {
    /// Track name.
    pub name: String,
    /// Opaque track metadata.
    pub meta: MetaMap,
    /// The challenges this track offers.
    pub challenges: Vec<Arc<Challenge>>,
}

impl Track {
    /// Creates a track from the given challenges.
    pub fn new(name: impl Into<String>, challenges: Vec<Challenge>) -> Self {
        Self {
            name: name.into(),
            meta: MetaMap::new(),
            challenges: challenges.into_iter().map(Arc::new).collect(),
        }
    }

    /// Selects a challenge by name, falling back to the default challenge
    /// when no name is given.
    pub fn find_challenge_or_default(&self, name: Option<&str>) -> Result<Arc<Challenge>> {
        let found = match name {
            Some(n) => self.challenges.iter().find(|c| c.name == n),
            None => self.challenges.iter().find(|c| c.default).or(self.challenges.first()),
        };
        found.cloned().ok_or_else(|| DriverError::UnknownChallenge {
            challenge: name.unwrap_or("<default>").to_string(),
            track: self.name.clone(),
        })
    }
}
