//! Device sessions: the script interpreter
//!
//! One `DeviceSession` exists per live device connection. It walks a
//! script's statements against the connection: sends are written and
//! flushed, expects re-run the pattern matcher as bytes arrive and
//! enforce a per-statement deadline, setstatus/setplugname mutate the
//! session's plug table from the latest captures, delays suspend the
//! session without blocking anything else.
//!
//! Generic over the I/O type so real serial/TCP connections and
//! `tokio::io::duplex` test streams share one code path.

use std::collections::HashMap;
use std::sync::Arc;

use pdu_script::{
    find_match, Deadline, DeviceType, PlugRef, PlugStatus, PlugTable, Script, ScriptKind, Stmt,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::events::EngineEvent;
use crate::telnet::TelnetFilter;

/// Terminal status of one script job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    /// Every statement completed
    Succeeded,
    /// Connection or interpretation error
    Failed(String),
    /// An expect statement's deadline passed without a match
    TimedOut,
}

impl SessionStatus {
    /// True only for `Succeeded`
    pub fn is_success(&self) -> bool {
        matches!(self, SessionStatus::Succeeded)
    }
}

/// Lifecycle state of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Created, no script running yet
    Connecting,
    /// Executing the statement at `step` of the current script
    Running {
        /// Zero-based statement index
        step: usize,
    },
    /// The last job reached a terminal status
    Done(SessionStatus),
    /// Connection torn down
    Closed,
}

/// One script job: which script to run, and for which plugs
#[derive(Debug, Clone)]
pub struct ScriptJob {
    /// The script kind to execute
    pub kind: ScriptKind,
    /// Target plugs; a plug-addressed script runs once per entry
    pub plugs: Vec<String>,
}

impl ScriptJob {
    /// Build a job
    pub fn new(kind: ScriptKind, plugs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            kind,
            plugs: plugs.into_iter().map(Into::into).collect(),
        }
    }
}

/// What a session reports when a job reaches a terminal state
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    /// Device the session ran against
    pub device: String,
    /// Script kind that was run
    pub kind: ScriptKind,
    /// Terminal status
    pub status: SessionStatus,
    /// Snapshot of the plug table
    pub plugs: HashMap<String, PlugStatus>,
    /// Plug identifiers bound to node names by setplugname statements
    pub bindings: HashMap<String, String>,
    /// Tag of the last executed step ("on[1]/expect"), if any ran
    pub last_step: Option<String>,
}

impl SessionOutcome {
    /// Outcome for a device that could not be reached at all
    ///
    /// `last_step` stays `None`: no statement ever executed, which is
    /// how the dispatcher tells "unreachable" apart from "error".
    pub fn connect_failed(
        device: impl Into<String>,
        kind: ScriptKind,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            device: device.into(),
            kind,
            status: SessionStatus::Failed(reason.into()),
            plugs: HashMap::new(),
            bindings: HashMap::new(),
            last_step: None,
        }
    }
}

/// A per-device script interpreter over an established connection
pub struct DeviceSession<S> {
    device: String,
    dtype: Arc<DeviceType>,
    io: S,
    rx: Vec<u8>,
    chunk: Vec<u8>,
    captures: Vec<Option<String>>,
    plugs: PlugTable,
    bindings: HashMap<String, String>,
    telnet: Option<TelnetFilter>,
    event_tx: Option<mpsc::Sender<EngineEvent>>,
    state: SessionState,
    last_step: Option<String>,
}

impl<S> DeviceSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Create a session over an established connection
    pub fn new(device: impl Into<String>, dtype: Arc<DeviceType>, io: S) -> Self {
        Self {
            device: device.into(),
            dtype,
            io,
            rx: Vec::new(),
            chunk: vec![0u8; 1024],
            captures: Vec::new(),
            plugs: PlugTable::default(),
            bindings: HashMap::new(),
            telnet: None,
            event_tx: None,
            state: SessionState::Connecting,
            last_step: None,
        }
    }

    /// Emit traffic events through the engine's event channel
    pub fn with_events(mut self, tx: mpsc::Sender<EngineEvent>) -> Self {
        self.event_tx = Some(tx);
        self
    }

    /// Strip telnet option negotiation from inbound data
    pub fn with_telnet_filter(mut self) -> Self {
        self.telnet = Some(TelnetFilter::new());
        self
    }

    /// Current lifecycle state
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Mark the connection torn down
    pub fn close(&mut self) {
        self.state = SessionState::Closed;
    }

    /// Run one job to a terminal state and report the outcome
    ///
    /// The session can run a follow-up job afterwards (the engine reuses
    /// it for login/logout bracketing internally; callers may reuse the
    /// connection the same way).
    pub async fn run(&mut self, job: &ScriptJob) -> SessionOutcome {
        info!(
            "Session on {} running {} for {} plug(s)",
            self.device,
            job.kind.name(),
            job.plugs.len()
        );

        self.plugs = PlugTable::new(job.plugs.iter().cloned());
        self.last_step = None;

        let status = self.drive(job).await;

        match &status {
            SessionStatus::Succeeded => {
                info!("Session on {} finished {}", self.device, job.kind.name());
            }
            SessionStatus::TimedOut => {
                warn!(
                    "Session on {} timed out at {}",
                    self.device,
                    self.last_step.as_deref().unwrap_or("start")
                );
            }
            SessionStatus::Failed(reason) => {
                warn!("Session on {} failed: {}", self.device, reason);
            }
        }

        self.state = SessionState::Done(status.clone());

        SessionOutcome {
            device: self.device.clone(),
            kind: job.kind,
            status,
            plugs: self.plugs.clone().into_map(),
            bindings: self.bindings.clone(),
            last_step: self.last_step.clone(),
        }
    }

    /// Login bracket, operation script (per plug where addressed),
    /// logout bracket
    async fn drive(&mut self, job: &ScriptJob) -> SessionStatus {
        let dtype = self.dtype.clone();

        if let Some(login) = dtype.script(ScriptKind::Login) {
            let status = self.run_script(ScriptKind::Login, login, None).await;
            if !status.is_success() {
                return status;
            }
        }

        let Some(script) = dtype.script(job.kind) else {
            return SessionStatus::Failed(format!(
                "device type {} has no {} script",
                dtype.name(),
                job.kind.name()
            ));
        };

        if script.wants_plug() {
            for plug in &job.plugs {
                let status = self.run_script(job.kind, script, Some(plug)).await;
                if !status.is_success() {
                    return status;
                }
                // A command script that recorded nothing still implies the
                // state the device was told to reach.
                if self.plugs.get(plug) == Some(PlugStatus::Pending) {
                    if let Some(implied) = implied_status(job.kind) {
                        self.plugs.set(plug.clone(), implied);
                    }
                }
            }
        } else {
            let status = self.run_script(job.kind, script, None).await;
            if !status.is_success() {
                return status;
            }
        }

        if let Some(logout) = dtype.script(ScriptKind::Logout) {
            let status = self.run_script(ScriptKind::Logout, logout, None).await;
            if !status.is_success() {
                return status;
            }
        }

        SessionStatus::Succeeded
    }

    /// Execute one script front to back for one plug context
    async fn run_script(
        &mut self,
        kind: ScriptKind,
        script: &Script,
        plug: Option<&str>,
    ) -> SessionStatus {
        for (index, stmt) in script.stmts().iter().enumerate() {
            self.state = SessionState::Running { step: index };
            self.last_step = Some(format!("{}[{}]/{}", kind.name(), index, stmt.tag()));

            let result = match stmt {
                Stmt::Send { fmt } => self.exec_send(fmt, plug).await,
                Stmt::Expect { pattern, timeout } => {
                    let timeout = (*timeout)
                        .or(script.timeout())
                        .unwrap_or_else(|| self.dtype.expect_timeout());
                    self.exec_expect(pattern, timeout).await
                }
                Stmt::SetStatus {
                    plug: plug_ref,
                    status_group,
                } => self.exec_set_status(plug_ref, *status_group, plug),
                Stmt::SetPlugName {
                    plug_group,
                    node_group,
                } => self.exec_set_plug_name(*plug_group, *node_group),
                Stmt::Delay { duration } => {
                    tokio::time::sleep(*duration).await;
                    Ok(())
                }
            };

            if let Err(status) = result {
                return status;
            }
        }
        SessionStatus::Succeeded
    }

    async fn exec_send(
        &mut self,
        fmt: &pdu_script::SendTemplate,
        plug: Option<&str>,
    ) -> Result<(), SessionStatus> {
        let line = fmt
            .expand(plug)
            .map_err(|e| SessionStatus::Failed(e.to_string()))?;

        debug!(
            "OUT ->{} {:02X?}",
            self.device,
            &line.as_bytes()[..line.len().min(64)]
        );

        self.io
            .write_all(line.as_bytes())
            .await
            .map_err(|e| SessionStatus::Failed(format!("write failed: {}", e)))?;
        self.io
            .flush()
            .await
            .map_err(|e| SessionStatus::Failed(format!("flush failed: {}", e)))?;

        self.emit(EngineEvent::DataOut {
            device: self.device.clone(),
            data: line.into_bytes(),
        })
        .await;

        Ok(())
    }

    async fn exec_expect(
        &mut self,
        pattern: &regex::bytes::Regex,
        timeout: std::time::Duration,
    ) -> Result<(), SessionStatus> {
        let deadline = Deadline::after(timeout);

        loop {
            if let Some(span) = find_match(pattern, &self.rx) {
                self.captures = span.captures;
                // consumed bytes are never re-examined
                self.rx.drain(..span.end);
                return Ok(());
            }

            let remaining = deadline.remaining();
            if remaining.is_zero() {
                return Err(SessionStatus::TimedOut);
            }

            match tokio::time::timeout(remaining, self.io.read(&mut self.chunk)).await {
                Ok(Ok(0)) => {
                    return Err(SessionStatus::Failed(
                        "connection closed by device".to_string(),
                    ));
                }
                Ok(Ok(n)) => {
                    let mut data = self.chunk[..n].to_vec();
                    if let Some(filter) = self.telnet.as_mut() {
                        let (clean, replies) = filter.feed(&data);
                        if !replies.is_empty() {
                            self.io.write_all(&replies).await.map_err(|e| {
                                SessionStatus::Failed(format!("write failed: {}", e))
                            })?;
                        }
                        data = clean;
                    }
                    if data.is_empty() {
                        continue;
                    }
                    debug!(
                        "IN  <-{} {:02X?}",
                        self.device,
                        &data[..data.len().min(64)]
                    );
                    self.emit(EngineEvent::DataIn {
                        device: self.device.clone(),
                        data: data.clone(),
                    })
                    .await;
                    self.rx.extend_from_slice(&data);
                }
                Ok(Err(e)) => {
                    return Err(SessionStatus::Failed(format!("read failed: {}", e)));
                }
                Err(_) => return Err(SessionStatus::TimedOut),
            }
        }
    }

    fn exec_set_status(
        &mut self,
        plug_ref: &PlugRef,
        status_group: usize,
        current: Option<&str>,
    ) -> Result<(), SessionStatus> {
        let plug = match plug_ref {
            PlugRef::Literal(name) => name.clone(),
            PlugRef::Group(group) => self.capture(*group)?,
            PlugRef::Current => current
                .ok_or_else(|| {
                    SessionStatus::Failed("setstatus outside a plug context".to_string())
                })?
                .to_string(),
        };

        let text = self.capture(status_group)?;
        let status = self.dtype.classify_status(&text);
        debug!("Device {} plug {} is {}", self.device, plug, status.name());
        self.plugs.set(plug, status);
        Ok(())
    }

    fn exec_set_plug_name(
        &mut self,
        plug_group: usize,
        node_group: usize,
    ) -> Result<(), SessionStatus> {
        let plug = self.capture(plug_group)?;
        let node = self.capture(node_group)?;
        debug!("Device {} plug {} is node {}", self.device, plug, node);
        self.bindings.insert(plug, node);
        Ok(())
    }

    /// Captured text of a group from the most recent expect match
    fn capture(&self, group: usize) -> Result<String, SessionStatus> {
        self.captures
            .get(group)
            .and_then(|c| c.clone())
            .ok_or_else(|| {
                SessionStatus::Failed(format!(
                    "last expect match has no capture group {}",
                    group
                ))
            })
    }

    async fn emit(&self, event: EngineEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(event).await;
        }
    }
}

/// State a successful command script implies for its target plug when
/// the script itself recorded nothing
fn implied_status(kind: ScriptKind) -> Option<PlugStatus> {
    match kind {
        ScriptKind::On => Some(PlugStatus::On),
        ScriptKind::Off => Some(PlugStatus::Off),
        // the device picks the final state; only a status script confirms it
        ScriptKind::Cycle | ScriptKind::Reset => Some(PlugStatus::Unknown),
        _ => None,
    }
}
