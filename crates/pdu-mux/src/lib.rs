//! Cluster Power Multiplexing Engine
//!
//! This crate drives any number of power controllers concurrently and
//! folds their per-plug results into cluster-level node operations.
//!
//! # Architecture
//!
//! Three layers, leaf to root:
//!
//! - **Device sessions** interpret one script against one live
//!   connection: send, expect-with-deadline, setstatus, setplugname,
//!   delay. Generic over the stream type, so serial lines, TCP, telnet,
//!   and in-memory test streams all share one interpreter.
//! - **The engine actor** owns the device registry and spawns one task
//!   per session; it enforces the single cross-session rule (one
//!   running session per device, later jobs queue FIFO) and emits all
//!   activity through a unified [`EngineEvent`] stream.
//! - **The dispatcher actor** resolves node sets against the topology,
//!   starts one job per distinct device, and aggregates session
//!   outcomes into a per-node result map. Partial failure is a result,
//!   not an error: every requested node always gets an outcome.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use pdu_mux::{run_dispatcher, run_engine, Dispatcher, NetConnector};
//! use pdu_script::Operation;
//! use tokio::sync::mpsc;
//!
//! let (engine_tx, engine_rx) = mpsc::channel(64);
//! let (event_tx, _event_rx) = mpsc::channel(256);
//! tokio::spawn(run_engine(Arc::new(NetConnector::new()), engine_rx, event_tx));
//!
//! let (cmd_tx, cmd_rx) = mpsc::channel(64);
//! tokio::spawn(run_dispatcher(topology, engine_tx, cmd_rx));
//!
//! let dispatcher = Dispatcher::new(cmd_tx);
//! let (id, result) = dispatcher
//!     .submit(vec!["n1".into(), "n2".into()], Operation::On)
//!     .await?;
//! let result = result.await?;
//! ```

pub mod connect;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod events;
pub mod session;
pub mod telnet;

pub use connect::{BoxedIo, Connector, NetConnector, SessionIo};
pub use dispatcher::{
    run_dispatcher, ActionId, ActionResult, Dispatcher, DispatcherCommand, NodeOutcome,
};
pub use engine::{run_engine, EngineCommand, JobReport};
pub use error::MuxError;
pub use events::EngineEvent;
pub use session::{
    DeviceSession, ScriptJob, SessionOutcome, SessionState, SessionStatus,
};
pub use telnet::TelnetFilter;
