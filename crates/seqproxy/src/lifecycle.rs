//! Run controller: binds the listener, serves, drives, and races completion
//! against the timeout.

use crate::config::TestPlan;
use crate::driver::DriverCommand;
use crate::engine::Engine;
use crate::error::HarnessError;
use crate::proxy::{create_listener, ProxyServer};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Process-level phase of a run. Phases only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Idle,
    Listening,
    Running,
    Completed,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Failed)
    }
}

/// Shared, forward-only phase state.
#[derive(Clone)]
pub struct PhaseTracker {
    tx: Arc<watch::Sender<Phase>>,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Phase::Idle);
        Self { tx: Arc::new(tx) }
    }

    /// Move to `to`. Returns false (and changes nothing) if that would go
    /// backwards or leave a terminal phase.
    pub fn advance(&self, to: Phase) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_terminal() || to <= *current {
                return false;
            }
            debug!("Phase {:?} -> {:?}", current, to);
            *current = to;
            true
        })
    }

    pub fn current(&self) -> Phase {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.tx.subscribe()
    }
}

/// Result of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub assertions: usize,
    pub port: u16,
    pub elapsed: Duration,
}

/// What the serving path reports to the controller: completion or the first fatal error.
pub type Outcome = Result<(), HarnessError>;

/// A test plan ready to run.
pub struct Harness {
    plan: Arc<TestPlan>,
    phase: PhaseTracker,
}

impl Harness {
    /// Wrap `plan`. Nothing is bound until [`Harness::bind`].
    pub fn new(plan: TestPlan) -> Self {
        Self {
            plan: Arc::new(plan),
            phase: PhaseTracker::new(),
        }
    }

    /// Bind the listener. The resolved port is available on the result.
    pub async fn bind(self) -> Result<BoundHarness, HarnessError> {
        let port = self.plan.listen_port;
        let bound = create_listener(port)
            .and_then(|listener| Ok((listener.local_addr()?, listener)))
            .map_err(|e| {
                self.phase.advance(Phase::Failed);
                HarnessError::ListenerBind(port, e.to_string())
            })?;
        let (local_addr, listener) = bound;

        self.phase.advance(Phase::Listening);
        info!("Listening on {}", local_addr);
        info!(
            "Proxying to localhost:{} with {} assertions",
            self.plan.target_port,
            self.plan.len()
        );

        Ok(BoundHarness {
            plan: self.plan,
            phase: self.phase,
            listener,
            local_addr,
        })
    }

    /// Bind and run to completion.
    pub async fn run(self) -> Result<RunSummary, HarnessError> {
        self.bind().await?.run().await
    }
}

/// A harness with its listener bound, not yet serving.
pub struct BoundHarness {
    plan: Arc<TestPlan>,
    phase: PhaseTracker,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl BoundHarness {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Resolved listening port, which is what `%port` expands to.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Watch the run phase.
    pub fn phase(&self) -> watch::Receiver<Phase> {
        self.phase.subscribe()
    }

    /// Serve, run the driver commands, and wait for the plan to complete or
    /// the timeout to fire, whichever happens first.
    pub async fn run(self) -> Result<RunSummary, HarnessError> {
        let started = Instant::now();
        let port = self.port();
        let shutdown = CancellationToken::new();
        let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel();

        let engine = Arc::new(Engine::new(Arc::clone(&self.plan), self.phase.clone()));
        let server = ProxyServer::new(engine, outcome_tx, shutdown.clone());
        let serving = tokio::spawn(server.run(self.listener));

        let work = drive(&self.plan, port, &mut outcome_rx);
        let result = match self.plan.timeout {
            Some(limit) => tokio::time::timeout(limit, work)
                .await
                .unwrap_or(Err(HarnessError::Timeout(limit))),
            None => work.await,
        };

        shutdown.cancel();
        if let Err(err) = serving.await {
            debug!("Serving task ended abnormally: {}", err);
        }

        match result {
            Ok(()) => {
                self.phase.advance(Phase::Completed);
                let summary = RunSummary {
                    assertions: self.plan.len(),
                    port,
                    elapsed: started.elapsed(),
                };
                info!(
                    "All {} assertions passed in {:?}",
                    summary.assertions, summary.elapsed
                );
                Ok(summary)
            }
            Err(err) => {
                self.phase.advance(Phase::Failed);
                Err(err)
            }
        }
    }
}

/// Run the driver commands in order, then wait for the plan outcome.
///
/// A failure reported by the engine aborts the command sequence, even after
/// the plan has completed: an extra request is still a failed run. Completion
/// reported while commands are still running lets them finish.
async fn drive(
    plan: &TestPlan,
    port: u16,
    outcomes: &mut mpsc::UnboundedReceiver<Outcome>,
) -> Result<(), HarnessError> {
    let mut completed = plan.is_empty();
    let mut listening = true;

    for template in &plan.commands {
        let command = DriverCommand::render(template, port)?;
        info!("cmd: {}", command);
        let run = command.run();
        tokio::pin!(run);
        loop {
            tokio::select! {
                result = &mut run => {
                    result?;
                    break;
                }
                outcome = outcomes.recv(), if listening => match outcome {
                    Some(Ok(())) => completed = true,
                    Some(Err(err)) => return Err(err),
                    None if completed => listening = false,
                    None => return Err(HarnessError::ServerStopped),
                },
            }
        }
    }

    if !completed {
        outcomes
            .recv()
            .await
            .unwrap_or(Err(HarnessError::ServerStopped))?;
    }
    while let Ok(outcome) = outcomes.try_recv() {
        outcome?;
    }
    Ok(())
}
