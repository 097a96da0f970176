//! Action dispatcher
//!
//! Translates cluster-level requests ("power these nodes on") into
//! per-device script jobs, fans them out through the engine, and folds
//! the per-plug outcomes back into one per-node result map. A request
//! is never collapsed to a single pass/fail: every requested node gets
//! its own outcome, and one bad device never drops its siblings.

use std::collections::HashMap;
use std::sync::Arc;

use pdu_script::{Operation, PlugStatus, Topology};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::engine::{EngineCommand, JobReport};
use crate::error::MuxError;
use crate::session::{ScriptJob, SessionOutcome, SessionStatus};

/// Correlation id for a submitted action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionId(pub u64);

impl ActionId {
    /// Get the raw id value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ActionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "action-{}", self.0)
    }
}

/// Per-node outcome of a cluster-level request
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeOutcome {
    /// Plug confirmed (or commanded) on
    On,
    /// Plug confirmed (or commanded) off
    Off,
    /// Device answered but the state could not be derived
    Unknown,
    /// The device's script failed mid-sequence
    Error(String),
    /// The device stayed silent past an expect deadline
    Timeout,
    /// No session ever ran against the node's device
    Unreachable,
    /// The node's device type has no script for the operation
    Unsupported,
}

/// Aggregated result of one action
#[derive(Debug, Clone)]
pub struct ActionResult {
    /// Correlation id of the action
    pub id: ActionId,
    /// The requested operation
    pub op: Operation,
    /// Outcome per requested node
    pub nodes: HashMap<String, NodeOutcome>,
}

/// Commands sent to the dispatcher actor
#[derive(Debug)]
pub enum DispatcherCommand {
    /// Submit a cluster-level request
    Submit {
        /// Resolved node names (hostlist expansion happens upstream)
        nodes: Vec<String>,
        /// The operation to perform
        op: Operation,
        /// Channel to send back the correlation id
        id_reply: oneshot::Sender<ActionId>,
        /// Channel the aggregated result is delivered on
        result_tx: oneshot::Sender<ActionResult>,
    },

    /// Cancel a pending action: late session outcomes are discarded,
    /// in-flight sessions still run to their own terminal state
    Cancel {
        /// Correlation id returned from submit
        id: ActionId,
    },
}

/// Handle for submitting actions to a running dispatcher actor
#[derive(Debug, Clone)]
pub struct Dispatcher {
    cmd_tx: mpsc::Sender<DispatcherCommand>,
}

impl Dispatcher {
    /// Wrap the command channel of a spawned `run_dispatcher`
    pub fn new(cmd_tx: mpsc::Sender<DispatcherCommand>) -> Self {
        Self { cmd_tx }
    }

    /// Submit an operation for a set of nodes
    ///
    /// Returns the correlation id and the receiver the aggregated
    /// result arrives on. The receiver errors if the action is
    /// cancelled before completion.
    pub async fn submit(
        &self,
        nodes: Vec<String>,
        op: Operation,
    ) -> Result<(ActionId, oneshot::Receiver<ActionResult>), MuxError> {
        let (id_tx, id_rx) = oneshot::channel();
        let (result_tx, result_rx) = oneshot::channel();
        self.cmd_tx
            .send(DispatcherCommand::Submit {
                nodes,
                op,
                id_reply: id_tx,
                result_tx,
            })
            .await
            .map_err(|_| MuxError::EngineClosed)?;
        let id = id_rx.await.map_err(|_| MuxError::EngineClosed)?;
        Ok((id, result_rx))
    }

    /// Cancel a pending action by correlation id
    pub async fn cancel(&self, id: ActionId) -> Result<(), MuxError> {
        self.cmd_tx
            .send(DispatcherCommand::Cancel { id })
            .await
            .map_err(|_| MuxError::EngineClosed)
    }
}

struct PendingAction {
    op: Operation,
    results: HashMap<String, NodeOutcome>,
    /// device -> (node, plug) pairs still awaiting a session report
    node_plugs: HashMap<String, Vec<(String, String)>>,
    outstanding: usize,
    result_tx: Option<oneshot::Sender<ActionResult>>,
    cancelled: bool,
}

/// Run the dispatcher actor
///
/// Resolves node sets against the topology, starts one job per distinct
/// device through the engine, and aggregates session reports into
/// per-node results.
pub async fn run_dispatcher(
    topology: Arc<Topology>,
    engine_tx: mpsc::Sender<EngineCommand>,
    mut cmd_rx: mpsc::Receiver<DispatcherCommand>,
) {
    let mut next_id: u64 = 1;
    let mut next_token: u64 = 1;
    let mut actions: HashMap<u64, PendingAction> = HashMap::new();
    let mut tokens: HashMap<u64, u64> = HashMap::new();
    let (report_tx, mut report_rx) = mpsc::channel::<JobReport>(64);

    info!("Action dispatcher started");

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else { break };
                match cmd {
                    DispatcherCommand::Submit { nodes, op, id_reply, result_tx } => {
                        let id = next_id;
                        next_id += 1;
                        submit_action(
                            &topology,
                            &engine_tx,
                            &report_tx,
                            &mut actions,
                            &mut tokens,
                            &mut next_token,
                            id,
                            nodes,
                            op,
                            id_reply,
                            result_tx,
                        )
                        .await;
                    }
                    DispatcherCommand::Cancel { id } => {
                        if let Some(action) = actions.get_mut(&id.0) {
                            info!("{} cancelled with {} device(s) outstanding", id, action.outstanding);
                            action.cancelled = true;
                            // dropping the sender tells the caller
                            action.result_tx = None;
                        }
                    }
                }
            }

            report = report_rx.recv() => {
                // report_tx is held by this scope, so recv() cannot return None
                let Some(report) = report else { break };
                handle_report(&mut actions, &mut tokens, report);
            }
        }
    }

    info!("Action dispatcher stopped");
}

/// Resolve one submitted request and start its device jobs
#[allow(clippy::too_many_arguments)]
async fn submit_action(
    topology: &Topology,
    engine_tx: &mpsc::Sender<EngineCommand>,
    report_tx: &mpsc::Sender<JobReport>,
    actions: &mut HashMap<u64, PendingAction>,
    tokens: &mut HashMap<u64, u64>,
    next_token: &mut u64,
    id: u64,
    nodes: Vec<String>,
    op: Operation,
    id_reply: oneshot::Sender<ActionId>,
    result_tx: oneshot::Sender<ActionResult>,
) {
    let kind = op.script_kind();
    let mut results: HashMap<String, NodeOutcome> = HashMap::new();
    let mut node_plugs: HashMap<String, Vec<(String, String)>> = HashMap::new();
    let mut outstanding = 0;

    let (grouped, unknown) = topology.group_by_device(nodes.iter().map(String::as_str));
    for node in unknown {
        results.insert(node, NodeOutcome::Unreachable);
    }

    for (device, pairs) in grouped {
        match topology.device_type_of(&device) {
            Some(dtype) if dtype.supports(kind) => {
                let plugs: Vec<String> = pairs.iter().map(|(_, plug)| plug.clone()).collect();
                let token = *next_token;
                *next_token += 1;

                let start = EngineCommand::StartJob {
                    device: device.clone(),
                    token,
                    job: ScriptJob::new(kind, plugs),
                    report: report_tx.clone(),
                };
                if engine_tx.send(start).await.is_err() {
                    for (node, _) in &pairs {
                        results
                            .insert(node.clone(), NodeOutcome::Error("engine unavailable".to_string()));
                    }
                    continue;
                }

                tokens.insert(token, id);
                node_plugs.insert(device, pairs);
                outstanding += 1;
            }
            Some(_) => {
                debug!(
                    "Device {} does not support {}, nodes unsupported",
                    device,
                    op.name()
                );
                for (node, _) in pairs {
                    results.insert(node, NodeOutcome::Unsupported);
                }
            }
            None => {
                for (node, _) in pairs {
                    results.insert(node, NodeOutcome::Unreachable);
                }
            }
        }
    }

    info!(
        "{} {} for {} node(s) across {} device(s)",
        ActionId(id),
        op.name(),
        results.len() + node_plugs.values().map(Vec::len).sum::<usize>(),
        outstanding
    );

    let _ = id_reply.send(ActionId(id));

    if outstanding == 0 {
        // nothing to wait for; deliver immediately
        let _ = result_tx.send(ActionResult {
            id: ActionId(id),
            op,
            nodes: results,
        });
    } else {
        actions.insert(
            id,
            PendingAction {
                op,
                results,
                node_plugs,
                outstanding,
                result_tx: Some(result_tx),
                cancelled: false,
            },
        );
    }
}

/// Merge one session report into its pending action
fn handle_report(
    actions: &mut HashMap<u64, PendingAction>,
    tokens: &mut HashMap<u64, u64>,
    report: JobReport,
) {
    let Some(action_id) = tokens.remove(&report.token) else {
        debug!("Stale job report for token {}", report.token);
        return;
    };
    let Some(action) = actions.get_mut(&action_id) else {
        return;
    };

    let pairs = action
        .node_plugs
        .remove(&report.device)
        .unwrap_or_default();

    if action.cancelled {
        debug!(
            "{} cancelled, discarding report from {}",
            ActionId(action_id),
            report.device
        );
    } else {
        merge_outcome(&mut action.results, &pairs, &report.outcome);
    }

    action.outstanding -= 1;
    if action.outstanding == 0 {
        if let Some(action) = actions.remove(&action_id) {
            if let Some(tx) = action.result_tx {
                let _ = tx.send(ActionResult {
                    id: ActionId(action_id),
                    op: action.op,
                    nodes: action.results,
                });
            }
        }
    }
}

/// Fold one device's session outcome into per-node results
fn merge_outcome(
    results: &mut HashMap<String, NodeOutcome>,
    pairs: &[(String, String)],
    outcome: &SessionOutcome,
) {
    match &outcome.status {
        SessionStatus::Succeeded => {
            for (node, plug) in pairs {
                // Prefer the topology plug; fall back to a plug the
                // script dynamically bound to this node.
                let bound = outcome
                    .bindings
                    .iter()
                    .find(|(_, n)| n.as_str() == node)
                    .map(|(p, _)| p);
                let status = outcome
                    .plugs
                    .get(plug)
                    .copied()
                    .filter(|s| *s != PlugStatus::Pending)
                    .or_else(|| bound.and_then(|p| outcome.plugs.get(p)).copied());

                let node_outcome = match status {
                    Some(PlugStatus::On) => NodeOutcome::On,
                    Some(PlugStatus::Off) => NodeOutcome::Off,
                    _ => NodeOutcome::Unknown,
                };
                results.insert(node.clone(), node_outcome);
            }
        }
        SessionStatus::TimedOut => {
            for (node, _) in pairs {
                results.insert(node.clone(), NodeOutcome::Timeout);
            }
        }
        SessionStatus::Failed(reason) => {
            // No step ever executed means the device itself was out of
            // reach; anything later is a script error.
            let node_outcome = match &outcome.last_step {
                None => NodeOutcome::Unreachable,
                Some(step) => NodeOutcome::Error(format!("{} (at {})", reason, step)),
            };
            for (node, _) in pairs {
                results.insert(node.clone(), node_outcome.clone());
            }
        }
    }
}
