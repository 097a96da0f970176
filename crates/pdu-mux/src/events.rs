//! Unified event stream for the engine
//!
//! All engine activity (session lifecycle, queueing, raw traffic,
//! errors) is emitted through a single event channel, so a listener or
//! traffic monitor observes everything in one consistent order.

use pdu_script::ScriptKind;

use crate::session::SessionStatus;

/// Unified event enum for all engine activity
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A session started running a script on a device
    SessionStarted {
        /// Device identifier
        device: String,
        /// Script kind being run
        kind: ScriptKind,
    },

    /// A session reached a terminal state
    SessionFinished {
        /// Device identifier
        device: String,
        /// Script kind that was run
        kind: ScriptKind,
        /// Terminal status
        status: SessionStatus,
    },

    /// A job arrived while its device was busy and was queued
    JobQueued {
        /// Device identifier
        device: String,
        /// Script kind of the queued job
        kind: ScriptKind,
        /// Queue depth including this job
        depth: usize,
    },

    /// Data received from a device (device -> engine)
    DataIn {
        /// Device identifier
        device: String,
        /// Raw data bytes
        data: Vec<u8>,
    },

    /// Data sent to a device (engine -> device)
    DataOut {
        /// Device identifier
        device: String,
        /// Raw data bytes
        data: Vec<u8>,
    },

    /// An error occurred outside any session's terminal status
    Error {
        /// Source of the error
        source: String,
        /// Error message
        message: String,
    },
}

impl EngineEvent {
    /// Check if this is a traffic event (for traffic monitor filtering)
    pub fn is_traffic(&self) -> bool {
        matches!(
            self,
            EngineEvent::DataIn { .. } | EngineEvent::DataOut { .. }
        )
    }

    /// Check if this is a session lifecycle event
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            EngineEvent::SessionStarted { .. }
                | EngineEvent::SessionFinished { .. }
                | EngineEvent::JobQueued { .. }
        )
    }

    /// The device this event is associated with, if any
    pub fn device(&self) -> Option<&str> {
        match self {
            EngineEvent::SessionStarted { device, .. }
            | EngineEvent::SessionFinished { device, .. }
            | EngineEvent::JobQueued { device, .. }
            | EngineEvent::DataIn { device, .. }
            | EngineEvent::DataOut { device, .. } => Some(device),
            EngineEvent::Error { .. } => None,
        }
    }
}
