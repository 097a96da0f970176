//! Multiplexing engine
//!
//! The engine actor owns the set of registered devices and drives any
//! number of device sessions concurrently. Each session runs in its own
//! spawned task; the actor never awaits a session inline, so readiness
//! on one connection never stalls another, and zero active sessions
//! just idles on the command channel.
//!
//! The one cross-session rule lives here: at most one session runs
//! against a device at a time. A job arriving for a busy device queues
//! FIFO behind the current one and starts the moment it finishes.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use pdu_script::{ConnectParams, DeviceInstance, DeviceType, ScriptKind};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::connect::Connector;
use crate::error::MuxError;
use crate::events::EngineEvent;
use crate::session::{DeviceSession, ScriptJob, SessionOutcome};

/// Commands sent to the engine actor
#[derive(Debug)]
pub enum EngineCommand {
    /// Register a device instance
    AddDevice {
        /// The device to register
        instance: DeviceInstance,
        /// Its compiled type
        dtype: Arc<DeviceType>,
        /// Channel to send back the result
        reply: oneshot::Sender<Result<(), MuxError>>,
    },

    /// Unregister a device; queued jobs are failed, a running session
    /// finishes and still reports
    RemoveDevice {
        /// Identifier of the device to remove
        device: String,
    },

    /// Run a script job on a device, queueing behind any running session
    StartJob {
        /// Target device identifier
        device: String,
        /// Caller's correlation token, echoed back in the report
        token: u64,
        /// The job to run
        job: ScriptJob,
        /// Where to deliver the terminal outcome
        report: mpsc::Sender<JobReport>,
    },

    /// Shut the actor down
    Shutdown,
}

/// Terminal report for one job, delivered to the channel passed with
/// `StartJob`
#[derive(Debug)]
pub struct JobReport {
    /// The token passed with `StartJob`
    pub token: u64,
    /// Device the job ran against
    pub device: String,
    /// The session's terminal outcome
    pub outcome: SessionOutcome,
}

struct QueuedJob {
    token: u64,
    job: ScriptJob,
    report: mpsc::Sender<JobReport>,
}

struct DeviceEntry {
    instance: DeviceInstance,
    dtype: Arc<DeviceType>,
    queue: VecDeque<QueuedJob>,
}

struct RunningJob {
    token: u64,
    kind: ScriptKind,
    report: mpsc::Sender<JobReport>,
}

struct SessionDone {
    device: String,
    outcome: SessionOutcome,
}

struct EngineState {
    devices: HashMap<String, DeviceEntry>,
    running: HashMap<String, RunningJob>,
}

/// Run the multiplexing engine actor
///
/// Processes commands until the channel closes or `Shutdown` arrives.
/// All activity is emitted through `event_tx` as a single ordered
/// stream.
pub async fn run_engine(
    connector: Arc<dyn Connector>,
    mut cmd_rx: mpsc::Receiver<EngineCommand>,
    event_tx: mpsc::Sender<EngineEvent>,
) {
    let mut state = EngineState {
        devices: HashMap::new(),
        running: HashMap::new(),
    };
    let (done_tx, mut done_rx) = mpsc::channel::<SessionDone>(64);

    info!("Multiplexing engine started");

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break };
                match cmd {
                    EngineCommand::AddDevice { instance, dtype, reply } => {
                        if state.devices.contains_key(&instance.id) {
                            let _ = reply.send(Err(MuxError::DeviceExists(instance.id)));
                            continue;
                        }
                        info!(
                            "Registered device {} ({}) at {}",
                            instance.id,
                            dtype.name(),
                            instance.params.label()
                        );
                        let id = instance.id.clone();
                        state.devices.insert(
                            id,
                            DeviceEntry {
                                instance,
                                dtype,
                                queue: VecDeque::new(),
                            },
                        );
                        let _ = reply.send(Ok(()));
                    }

                    EngineCommand::RemoveDevice { device } => {
                        let Some(entry) = state.devices.remove(&device) else { continue };
                        info!("Unregistered device {}", device);
                        // Jobs still queued will never run; fail them now. A
                        // running session keeps its reporter in `running` and
                        // still delivers when it finishes.
                        for queued in entry.queue {
                            let outcome = SessionOutcome::connect_failed(
                                &device,
                                queued.job.kind,
                                "device removed",
                            );
                            let _ = queued
                                .report
                                .send(JobReport {
                                    token: queued.token,
                                    device: device.clone(),
                                    outcome,
                                })
                                .await;
                        }
                    }

                    EngineCommand::StartJob { device, token, job, report } => {
                        let Some(entry) = state.devices.get_mut(&device) else {
                            debug!("Job for unregistered device {}", device);
                            let outcome = SessionOutcome::connect_failed(
                                &device,
                                job.kind,
                                "device not registered",
                            );
                            let _ = report
                                .send(JobReport { token, device, outcome })
                                .await;
                            continue;
                        };

                        let queued = QueuedJob { token, job, report };
                        if state.running.contains_key(&device) {
                            let kind = queued.job.kind;
                            entry.queue.push_back(queued);
                            let depth = entry.queue.len();
                            debug!("Device {} busy, queued job (depth {})", device, depth);
                            let _ = event_tx
                                .send(EngineEvent::JobQueued {
                                    device: device.clone(),
                                    kind,
                                    depth,
                                })
                                .await;
                        } else {
                            let params = entry.instance.params.clone();
                            let dtype = entry.dtype.clone();
                            start_session(
                                &connector,
                                &event_tx,
                                &done_tx,
                                &mut state.running,
                                &device,
                                params,
                                dtype,
                                queued,
                            )
                            .await;
                        }
                    }

                    EngineCommand::Shutdown => break,
                }
            }

            done = done_rx.recv() => {
                // done_tx is held by this scope, so recv() cannot return None
                let Some(done) = done else { break };
                finish_session(&connector, &event_tx, &done_tx, &mut state, done).await;
            }
        }
    }

    info!("Multiplexing engine stopped");
}

/// Mark the device busy and spawn the session task
#[allow(clippy::too_many_arguments)]
async fn start_session(
    connector: &Arc<dyn Connector>,
    event_tx: &mpsc::Sender<EngineEvent>,
    done_tx: &mpsc::Sender<SessionDone>,
    running: &mut HashMap<String, RunningJob>,
    device: &str,
    params: ConnectParams,
    dtype: Arc<DeviceType>,
    queued: QueuedJob,
) {
    running.insert(
        device.to_string(),
        RunningJob {
            token: queued.token,
            kind: queued.job.kind,
            report: queued.report,
        },
    );

    let _ = event_tx
        .send(EngineEvent::SessionStarted {
            device: device.to_string(),
            kind: queued.job.kind,
        })
        .await;

    let connector = connector.clone();
    let event_tx = event_tx.clone();
    let done_tx = done_tx.clone();
    let device = device.to_string();
    let job = queued.job;

    tokio::spawn(async move {
        let outcome = match connector.connect(&device, &params).await {
            Ok(io) => {
                let mut session =
                    DeviceSession::new(&device, dtype, io).with_events(event_tx.clone());
                if matches!(params, ConnectParams::Telnet { .. }) {
                    session = session.with_telnet_filter();
                }
                let outcome = session.run(&job).await;
                session.close();
                outcome
            }
            Err(e) => {
                warn!("Connect to {} failed: {}", device, e);
                let _ = event_tx
                    .send(EngineEvent::Error {
                        source: device.clone(),
                        message: format!("connect failed: {}", e),
                    })
                    .await;
                SessionOutcome::connect_failed(&device, job.kind, format!("connect failed: {}", e))
            }
        };

        let _ = done_tx.send(SessionDone { device, outcome }).await;
    });
}

/// Deliver a finished session's outcome and start the next queued job
async fn finish_session(
    connector: &Arc<dyn Connector>,
    event_tx: &mpsc::Sender<EngineEvent>,
    done_tx: &mpsc::Sender<SessionDone>,
    state: &mut EngineState,
    done: SessionDone,
) {
    let SessionDone { device, outcome } = done;

    if let Some(run) = state.running.remove(&device) {
        let _ = event_tx
            .send(EngineEvent::SessionFinished {
                device: device.clone(),
                kind: run.kind,
                status: outcome.status.clone(),
            })
            .await;
        let _ = run
            .report
            .send(JobReport {
                token: run.token,
                device: device.clone(),
                outcome,
            })
            .await;
    }

    // The device may have been removed while the session ran
    if let Some(entry) = state.devices.get_mut(&device) {
        if let Some(next) = entry.queue.pop_front() {
            let params = entry.instance.params.clone();
            let dtype = entry.dtype.clone();
            start_session(
                connector,
                event_tx,
                done_tx,
                &mut state.running,
                &device,
                params,
                dtype,
                next,
            )
            .await;
        }
    }
}
