//! Dispatcher Actor
//!
//! This module provides the async actor that owns the work queue. Every
//! serial transaction in the process, whether a greeting probe during a
//! scan or a caller's command, runs inside this one task, one at a time.
//!
//! # Architecture
//!
//! Callers hold a cloneable [`Dispatcher`] handle. Submitting a command
//! pushes a [`CommandJob`] onto an `mpsc` channel and awaits a oneshot for
//! the outcome; the caller's own task is never blocked on serial I/O.
//!
//! The actor pops work strictly in arrival order. After a scan it first
//! moves everything that arrived during the scan into its local backlog,
//! then appends the clock synchronization jobs, so user commands issued
//! while scanning are never overtaken.
//!
//! # Example
//!
//! ```rust,ignore
//! use relay_dispatch::actor::{run_dispatch_actor, DispatchActorCommand};
//! use tokio::sync::mpsc;
//!
//! let (cmd_tx, cmd_rx) = mpsc::channel(256);
//!
//! // Spawn the actor
//! tokio::spawn(run_dispatch_actor(cmd_rx, context));
//!
//! // Send jobs and scans through cmd_tx
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use relay_detect::{
    execute_transaction, PortScanner, ScanReport, ScannerConfig, SerialBackend, SerialPortInfo,
    TransactionConfig,
};
use relay_protocol::DeviceCommand;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::error::DispatchError;
use crate::events::DispatchEvent;
use crate::job::{CommandJob, JobId, JobOutcome, JobState};
use crate::registry::DeviceRegistry;

/// Capacity of the event broadcast channel
const EVENT_CAPACITY: usize = 256;

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Open and response deadlines for command jobs
    pub transaction: TransactionConfig,
    /// Port filtering and greeting probe settings for scans
    pub scanner: ScannerConfig,
    /// Maximum number of queued items before submitters wait
    pub queue_capacity: usize,
    /// Queue a clock synchronization job for every device after each scan
    pub clock_sync: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            transaction: TransactionConfig::default(),
            scanner: ScannerConfig::default(),
            queue_capacity: 256,
            clock_sync: true,
        }
    }
}

/// Work items sent to the dispatcher actor
#[derive(Debug)]
pub enum DispatchActorCommand {
    /// Run one command job
    Submit(CommandJob),

    /// Rebuild the registry
    Scan {
        /// Ports to probe; `None` enumerates the backend's ports
        ports: Option<Vec<SerialPortInfo>>,
        /// Channel to send back the scan report
        response: Option<oneshot::Sender<Result<ScanReport, DispatchError>>>,
    },

    /// Stop the actor; work still queued behind this is dropped
    Shutdown,
}

/// Everything the actor needs to execute work
pub struct DispatchContext {
    /// Source of serial ports
    pub backend: Arc<dyn SerialBackend>,
    /// Registry shared with the handles
    pub registry: DeviceRegistry,
    /// Scanner used for discovery
    pub scanner: PortScanner,
    /// Deadlines for command jobs
    pub transaction: TransactionConfig,
    /// Queue clock sync jobs after a scan
    pub clock_sync: bool,
    /// Event stream
    pub events: broadcast::Sender<DispatchEvent>,
    /// Job id allocator shared with the handles
    pub next_id: Arc<AtomicU64>,
}

impl DispatchContext {
    fn allocate_id(&self) -> JobId {
        JobId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn emit(&self, event: DispatchEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Announce a job entering the queue
fn announce_queued(events: &broadcast::Sender<DispatchEvent>, job: &CommandJob) {
    let _ = events.send(DispatchEvent::JobQueued {
        id: job.id,
        device: job.device.clone(),
        command: job.command.clone(),
    });
    let _ = events.send(DispatchEvent::JobStateChanged {
        id: job.id,
        state: JobState::Queued,
    });
}

/// Run one command job to its terminal outcome
async fn run_job(ctx: &DispatchContext, job: CommandJob) {
    let id = job.id;

    let outcome = match ctx.registry.resolve_key(&job.device).await {
        None => {
            let e = DispatchError::UnrecognizedDevice(job.device.clone());
            info!("Job {}: {}", id, e);
            JobOutcome::from(e)
        }
        Some(port) => {
            debug!(
                "Job {}: {} on {} <- {:?}",
                id,
                job.device,
                port,
                job.command.payload()
            );

            let result = execute_transaction(
                ctx.backend.as_ref(),
                &port,
                &job.command,
                &ctx.transaction,
                |state| {
                    let state = JobState::from(state);
                    trace!("Job {} -> {:?}", id, state);
                    if state != JobState::Done {
                        ctx.emit(DispatchEvent::JobStateChanged { id, state });
                    }
                },
            )
            .await;

            match result {
                Ok(line) => JobOutcome::Ok(line.trim().to_string()),
                Err(e) => {
                    let e = DispatchError::from(e);
                    if job.reply.is_some() {
                        warn!("Job {} for {} failed: {}", id, job.device, e);
                    } else {
                        debug!("Detached job {} for {} failed: {}", id, job.device, e);
                    }
                    JobOutcome::from(e)
                }
            }
        }
    };

    debug!("Job {} done: {}", id, outcome.status());
    ctx.emit(DispatchEvent::JobStateChanged {
        id,
        state: JobState::Done,
    });
    ctx.emit(DispatchEvent::JobCompleted {
        id,
        outcome: outcome.clone(),
    });
    job.complete(outcome);
}

/// Probe ports and replace the registry
async fn run_scan(
    ctx: &DispatchContext,
    ports: Option<Vec<SerialPortInfo>>,
) -> Result<ScanReport, DispatchError> {
    let ports = match ports {
        Some(ports) => ports,
        None => ctx.scanner.enumerate_ports(ctx.backend.as_ref())?,
    };

    ctx.emit(DispatchEvent::ScanStarted { ports: ports.len() });
    let report = ctx.scanner.scan(ctx.backend.as_ref(), &ports).await;

    ctx.registry.replace(&report.devices).await;
    info!(
        "Registry rebuilt with {} device(s)",
        ctx.registry.len().await
    );

    ctx.emit(DispatchEvent::ScanCompleted {
        report: report.clone(),
    });
    Ok(report)
}

/// Run the dispatcher actor
///
/// Processes work strictly one item at a time until it receives
/// [`DispatchActorCommand::Shutdown`] or every sender is dropped.
///
/// # Arguments
///
/// * `cmd_rx` - Receiver for work sent to the actor
/// * `ctx` - Backend, registry and settings the work runs against
pub async fn run_dispatch_actor(
    mut cmd_rx: mpsc::Receiver<DispatchActorCommand>,
    ctx: DispatchContext,
) {
    let mut backlog: VecDeque<DispatchActorCommand> = VecDeque::new();
    info!("Dispatcher actor started");

    loop {
        let cmd = match backlog.pop_front() {
            Some(cmd) => cmd,
            None => match cmd_rx.recv().await {
                Some(cmd) => cmd,
                None => break,
            },
        };

        match cmd {
            DispatchActorCommand::Submit(job) => run_job(&ctx, job).await,

            DispatchActorCommand::Scan { ports, response } => {
                let result = run_scan(&ctx, ports).await;

                match &result {
                    Ok(_) if ctx.clock_sync => {
                        // Work that arrived during the scan keeps its place
                        while let Ok(cmd) = cmd_rx.try_recv() {
                            backlog.push_back(cmd);
                        }

                        for id in ctx.registry.ids().await {
                            let job = CommandJob::detached(
                                ctx.allocate_id(),
                                id.to_string(),
                                DeviceCommand::clock_sync_now(),
                            );
                            debug!("Queueing clock sync {} for {}", job.id, id);
                            announce_queued(&ctx.events, &job);
                            backlog.push_back(DispatchActorCommand::Submit(job));
                        }
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Scan failed: {}", e);
                        ctx.emit(DispatchEvent::ScanFailed {
                            message: e.to_string(),
                        });
                    }
                }

                if let Some(response) = response {
                    let _ = response.send(result);
                }
            }

            DispatchActorCommand::Shutdown => {
                info!("Shutdown requested for dispatcher");
                break;
            }
        }
    }

    info!("Dispatcher actor stopped");
}

/// Cloneable handle for submitting work to the dispatcher
#[derive(Clone)]
pub struct Dispatcher {
    cmd_tx: mpsc::Sender<DispatchActorCommand>,
    registry: DeviceRegistry,
    events: broadcast::Sender<DispatchEvent>,
    next_id: Arc<AtomicU64>,
}

impl Dispatcher {
    /// Spawn the actor on the current runtime and return a handle to it
    pub fn spawn(
        backend: Arc<dyn SerialBackend>,
        config: DispatchConfig,
    ) -> (Self, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let registry = DeviceRegistry::new();
        let next_id = Arc::new(AtomicU64::new(1));

        let ctx = DispatchContext {
            backend,
            registry: registry.clone(),
            scanner: PortScanner::with_config(config.scanner),
            transaction: config.transaction,
            clock_sync: config.clock_sync,
            events: events.clone(),
            next_id: Arc::clone(&next_id),
        };
        let actor = tokio::spawn(run_dispatch_actor(cmd_rx, ctx));

        (
            Self {
                cmd_tx,
                registry,
                events,
                next_id,
            },
            actor,
        )
    }

    /// Registry the actor resolves identifiers against
    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Subscribe to the event stream
    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.events.subscribe()
    }

    /// Submit a command and wait for its outcome
    pub async fn submit(
        &self,
        device: &str,
        command: DeviceCommand,
    ) -> Result<JobOutcome, DispatchError> {
        let (tx, rx) = oneshot::channel();
        let job = CommandJob::new(self.allocate_id(), device, command, tx);
        self.enqueue(job).await?;
        rx.await.map_err(|_| DispatchError::Closed)
    }

    /// Submit a command without waiting for its outcome
    pub async fn submit_detached(
        &self,
        device: &str,
        command: DeviceCommand,
    ) -> Result<JobId, DispatchError> {
        let job = CommandJob::detached(self.allocate_id(), device, command);
        let id = job.id;
        self.enqueue(job).await?;
        Ok(id)
    }

    /// Enumerate the backend's ports, probe them and rebuild the registry
    pub async fn scan(&self) -> Result<ScanReport, DispatchError> {
        self.request_scan(None).await
    }

    /// Probe the given ports and rebuild the registry
    pub async fn scan_ports(
        &self,
        ports: Vec<SerialPortInfo>,
    ) -> Result<ScanReport, DispatchError> {
        self.request_scan(Some(ports)).await
    }

    /// Queue a scan of every backend port without waiting for it
    pub async fn scan_detached(&self) -> Result<(), DispatchError> {
        self.cmd_tx
            .send(DispatchActorCommand::Scan {
                ports: None,
                response: None,
            })
            .await
            .map_err(|_| DispatchError::Closed)
    }

    /// Ask the actor to stop after the work queued ahead of this request
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(DispatchActorCommand::Shutdown).await;
    }

    fn allocate_id(&self) -> JobId {
        JobId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    async fn enqueue(&self, job: CommandJob) -> Result<(), DispatchError> {
        trace!("Queueing job {} for {}", job.id, job.device);
        announce_queued(&self.events, &job);
        self.cmd_tx
            .send(DispatchActorCommand::Submit(job))
            .await
            .map_err(|_| DispatchError::Closed)
    }

    async fn request_scan(
        &self,
        ports: Option<Vec<SerialPortInfo>>,
    ) -> Result<ScanReport, DispatchError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(DispatchActorCommand::Scan {
                ports,
                response: Some(tx),
            })
            .await
            .map_err(|_| DispatchError::Closed)?;
        rx.await.map_err(|_| DispatchError::Closed)?
    }
}
