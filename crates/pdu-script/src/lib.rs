//! Power Device Script Library
//!
//! This crate provides the static model for driving network- and
//! serial-attached power controllers (PDUs, RPCs, managed power strips)
//! through small per-device-type command/response scripts:
//!
//! - **Statements**: the five script statement kinds (send, expect,
//!   setstatus, setplugname, delay)
//! - **Scripts**: ordered statement sequences keyed by script kind
//!   (login, on, off, status, ...)
//! - **Device types**: immutable per-type descriptions shared by every
//!   live session of that type
//! - **Topology**: device instances and the node-to-plug mapping the
//!   runtime resolves requests against
//!
//! # Architecture
//!
//! Everything here is I/O-free. Definition types (`DeviceTypeDef`,
//! `ScriptDef`, `StmtDef`) carry raw pattern and template strings and can
//! be deserialized by a configuration layer; `compile()` turns them into
//! the immutable runtime forms, rejecting bad regular expressions at load
//! time so a session can never trip over one. Compiled `DeviceType`s are
//! shared read-only (wrap them in `Arc`), never copied per session.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use pdu_script::{DeviceTypeDef, ScriptDef, ScriptKind, StmtDef, ConnectClass};
//!
//! let def = DeviceTypeDef::new("rpc3", ConnectClass::Telnet, ["1", "2"])
//!     .with_script(
//!         ScriptKind::On,
//!         ScriptDef::new([
//!             StmtDef::send("on %s\r\n"),
//!             StmtDef::expect("OK"),
//!         ]),
//!     );
//!
//! let dtype = def.compile().unwrap();
//! assert!(dtype.supports(ScriptKind::On));
//! assert_eq!(dtype.expect_timeout(), Duration::from_secs(10));
//! ```

pub mod deadline;
pub mod device;
pub mod error;
pub mod matcher;
pub mod plug;
pub mod stmt;
pub mod template;
pub mod topology;

pub use deadline::Deadline;
pub use device::{ConnectClass, DeviceType, DeviceTypeDef, Operation, ScriptKind};
pub use error::ConfigError;
pub use matcher::{find_match, MatchSpan};
pub use plug::{PlugStatus, PlugTable};
pub use stmt::{PlugRef, Script, ScriptDef, Stmt, StmtDef};
pub use template::SendTemplate;
pub use topology::{ConnectParams, DeviceInstance, PlugBinding, Topology};
