//! The messaging substrate connecting coordinator and workers.
//!
//! Actors are named, single-threaded message loops with typed FIFO
//! mailboxes. They are placed on hosts via capability requirements:
//! either the coordinator host or a specific IP. This module provides the
//! in-process realization of that contract; a remote transport slots in
//! behind the same [`ActorSystem`] constructor via [`SystemBase`].
//!
//! Messages are values: actors share nothing except what they exchange
//! through [`Addr`]s. Delivery is FIFO per sender, and an actor processes
//! one message at a time. Delayed self-messages ([`Addr::send_after`])
//! implement wakeup timers.

use std::{collections::HashMap, net::IpAddr, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

/// Host placement capability for an actor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HostSpec {
    /// Place on the host running the coordinator.
    Coordinator,
    /// Place on the load driver host with this address.
    Ip(IpAddr),
}

impl HostSpec {
    /// Parses a configured host name. `"localhost"` maps to the
    /// coordinator host, anything else must be an IP address.
    pub fn parse(host: &str) -> anyhow::Result<Self> {
        if host == "localhost" {
            Ok(Self::Coordinator)
        } else {
            Ok(Self::Ip(host.parse().map_err(|e| {
                anyhow::anyhow!("invalid load driver host [{host}]: {e}")
            })?))
        }
    }
}

impl std::fmt::Display for HostSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Coordinator => write!(f, "coordinator"),
            Self::Ip(ip) => write!(f, "{ip}"),
        }
    }
}

/// Which actor-system backend to construct.
///
/// Only the in-process base ships with the driver core; distributed bases
/// implement the same spawning and messaging contract.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SystemBase {
    /// All actors run as tasks inside the current process.
    #[default]
    InProcess,
}

/// Configuration for the actor system.
#[derive(Debug, Clone)]
pub struct ActorSystemConfig {
    /// The backend to use.
    pub base: SystemBase,
    /// Load driver hosts available for placement, in round-robin order.
    pub hosts: Vec<HostSpec>,
}

impl Default for ActorSystemConfig {
    fn default() -> Self {
        Self { base: SystemBase::InProcess, hosts: vec![HostSpec::Coordinator] }
    }
}

/// Whether the actor keeps running after a message.
pub enum Flow {
    /// Keep processing messages.
    Continue,
    /// Stop the actor; its mailbox is dropped.
    Stop,
}

/// A single-threaded message handler.
#[async_trait]
pub trait Actor: Send + 'static {
    /// The mailbox message type.
    type Msg: Send + 'static;

    /// Processes one message.
    async fn handle(&mut self, msg: Self::Msg) -> Flow;
}

/// A cloneable address for sending messages to one actor.
#[derive(Debug)]
pub struct Addr<M> {
    tx: mpsc::UnboundedSender<M>,
}

impl<M> Clone for Addr<M> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<M: Send + 'static> Addr<M> {
    /// Sends a message. Messages to a stopped actor are dropped silently.
    pub fn send(&self, msg: M) {
        let _ = self.tx.send(msg);
    }

    /// Delivers a message after the given delay. Used for wakeup timers.
    pub fn send_after(&self, delay: Duration, msg: M) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(msg);
        });
    }
}

/// Creates a bare address backed by a plain channel, for callers that
/// consume messages outside an actor loop.
pub(crate) fn addr_channel<M>() -> (Addr<M>, mpsc::UnboundedReceiver<M>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Addr { tx }, rx)
}

/// Why an actor's message loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// The actor chose to stop ([`Flow::Stop`]).
    Stopped,
    /// Every address was dropped.
    MailboxClosed,
    /// The actor was aborted or panicked.
    Aborted,
}

/// A spawned actor: its address plus exit observation.
pub struct ActorRef<M> {
    addr: Addr<M>,
    host: HostSpec,
    exit: oneshot::Receiver<ExitReason>,
}

impl<M: Send + 'static> ActorRef<M> {
    /// The actor's address.
    pub fn addr(&self) -> Addr<M> {
        self.addr.clone()
    }

    /// The host the actor was placed on.
    pub fn host(&self) -> &HostSpec {
        &self.host
    }

    /// Waits until the actor's message loop ends.
    pub async fn exited(self) -> ExitReason {
        self.exit.await.unwrap_or(ExitReason::Aborted)
    }
}

/// Spawns and tracks named actors.
pub struct ActorSystem {
    config: ActorSystemConfig,
    registry: Mutex<HashMap<String, tokio::task::AbortHandle>>,
}

impl ActorSystem {
    /// Creates an actor system for the given backend and hosts.
    pub fn new(config: ActorSystemConfig) -> Self {
        let mut config = config;
        if config.hosts.is_empty() {
            config.hosts.push(HostSpec::Coordinator);
        }
        Self { config, registry: Mutex::new(HashMap::new()) }
    }

    /// The configured placement hosts.
    pub fn hosts(&self) -> &[HostSpec] {
        &self.config.hosts
    }

    /// Round-robin host for the given placement index.
    pub fn host_for(&self, index: usize) -> &HostSpec {
        &self.config.hosts[index % self.config.hosts.len()]
    }

    /// Spawns a named actor on a host. The factory receives the actor's
    /// own address so it can schedule self-messages.
    pub fn spawn<A, F>(&self, name: &str, host: &HostSpec, make: F) -> ActorRef<A::Msg>
    where
        A: Actor,
        F: FnOnce(Addr<A::Msg>) -> A,
    {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let addr = Addr { tx };
        let mut actor = make(addr.clone());
        let (exit_tx, exit_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            let reason = loop {
                match rx.recv().await {
                    Some(msg) => {
                        if let Flow::Stop = actor.handle(msg).await {
                            break ExitReason::Stopped;
                        }
                    }
                    None => break ExitReason::MailboxClosed,
                }
            };
            let _ = exit_tx.send(reason);
        });

        tracing::debug!(name, host = %host, "spawned actor");
        self.registry.lock().insert(name.to_string(), task.abort_handle());
        ActorRef { addr, host: host.clone(), exit: exit_rx }
    }

    /// Forcibly terminates a named actor. Returns false when the name is
    /// unknown.
    pub fn abort(&self, name: &str) -> bool {
        match self.registry.lock().get(name) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }
}
