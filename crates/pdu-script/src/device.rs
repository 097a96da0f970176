//! Device types
//!
//! A device type describes one model of power controller: how it is
//! reached, what plugs it has, which status texts mean on and off, and
//! the scripts it speaks. Compiled device types are immutable and shared
//! read-only (via `Arc`) by every live session of that type.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::ConfigError;
use crate::plug::PlugStatus;
use crate::stmt::{Script, ScriptDef};

/// Default expect timeout when neither statement, script, nor device
/// type definition names one
pub const DEFAULT_EXPECT_TIMEOUT_MS: u64 = 10_000;

/// How a device is reached on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ConnectClass {
    /// Serial-attached (tty)
    Serial,
    /// Raw TCP stream
    Tcp,
    /// TCP with telnet option negotiation to strip
    Telnet,
}

impl ConnectClass {
    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            ConnectClass::Serial => "serial",
            ConnectClass::Tcp => "tcp",
            ConnectClass::Telnet => "telnet",
        }
    }
}

/// The script slots a device type may fill
///
/// A device type owns zero or one script per kind; an absent kind makes
/// the corresponding operation unsupported for that type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ScriptKind {
    /// Run once after connecting, before any operation script
    Login,
    /// Run once before teardown of a successful session
    Logout,
    /// Query plug power state
    Status,
    /// Power a plug on
    On,
    /// Power a plug off
    Off,
    /// Power-cycle a plug
    Cycle,
    /// Hardware reset line, where the device has one
    Reset,
    /// Keepalive probe
    Ping,
}

impl ScriptKind {
    /// All script kinds, in no significant order
    pub const ALL: [ScriptKind; 8] = [
        ScriptKind::Login,
        ScriptKind::Logout,
        ScriptKind::Status,
        ScriptKind::On,
        ScriptKind::Off,
        ScriptKind::Cycle,
        ScriptKind::Reset,
        ScriptKind::Ping,
    ];

    /// Human-readable name, also used in step diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            ScriptKind::Login => "login",
            ScriptKind::Logout => "logout",
            ScriptKind::Status => "status",
            ScriptKind::On => "on",
            ScriptKind::Off => "off",
            ScriptKind::Cycle => "cycle",
            ScriptKind::Reset => "reset",
            ScriptKind::Ping => "ping",
        }
    }
}

/// A cluster-level power operation, as submitted by a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Operation {
    /// Power nodes on
    On,
    /// Power nodes off
    Off,
    /// Power-cycle nodes
    Cycle,
    /// Query node power state
    Status,
    /// Assert the hardware reset line
    Reset,
}

impl Operation {
    /// The script kind that carries out this operation
    pub fn script_kind(self) -> ScriptKind {
        match self {
            Operation::On => ScriptKind::On,
            Operation::Off => ScriptKind::Off,
            Operation::Cycle => ScriptKind::Cycle,
            Operation::Status => ScriptKind::Status,
            Operation::Reset => ScriptKind::Reset,
        }
    }

    /// Human-readable name
    pub fn name(&self) -> &'static str {
        self.script_kind().name()
    }
}

/// Serde-facing device type definition
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeviceTypeDef {
    /// Type name ("baytech-rpc3", "icebox-v3", ...)
    pub name: String,
    /// How instances of this type are reached
    pub connect: ConnectClass,
    /// Plug names, in the device's own order
    pub plugs: Vec<String>,
    /// Status text meaning "on" in this device's dialect
    #[cfg_attr(feature = "serde", serde(default = "default_on_value"))]
    pub on_value: String,
    /// Status text meaning "off" in this device's dialect
    #[cfg_attr(feature = "serde", serde(default = "default_off_value"))]
    pub off_value: String,
    /// Default expect timeout in milliseconds
    #[cfg_attr(feature = "serde", serde(default = "default_expect_timeout_ms"))]
    pub expect_timeout_ms: u64,
    /// The scripts this type speaks
    #[cfg_attr(feature = "serde", serde(default))]
    pub scripts: HashMap<ScriptKind, ScriptDef>,
}

fn default_on_value() -> String {
    "on".to_string()
}

fn default_off_value() -> String {
    "off".to_string()
}

fn default_expect_timeout_ms() -> u64 {
    DEFAULT_EXPECT_TIMEOUT_MS
}

impl DeviceTypeDef {
    /// Start a definition with the common defaults
    pub fn new(
        name: impl Into<String>,
        connect: ConnectClass,
        plugs: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            connect,
            plugs: plugs.into_iter().map(Into::into).collect(),
            on_value: default_on_value(),
            off_value: default_off_value(),
            expect_timeout_ms: default_expect_timeout_ms(),
            scripts: HashMap::new(),
        }
    }

    /// Add or replace a script slot
    pub fn with_script(mut self, kind: ScriptKind, script: ScriptDef) -> Self {
        self.scripts.insert(kind, script);
        self
    }

    /// Override the default expect timeout
    pub fn with_expect_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.expect_timeout_ms = timeout_ms;
        self
    }

    /// Override the on/off status texts
    pub fn with_status_values(
        mut self,
        on_value: impl Into<String>,
        off_value: impl Into<String>,
    ) -> Self {
        self.on_value = on_value.into();
        self.off_value = off_value.into();
        self
    }

    /// Compile every script, rejecting the whole type on the first bad
    /// pattern or template
    pub fn compile(self) -> Result<DeviceType, ConfigError> {
        let mut scripts = HashMap::with_capacity(self.scripts.len());
        for (kind, def) in &self.scripts {
            scripts.insert(*kind, def.compile()?);
        }
        Ok(DeviceType {
            name: self.name,
            connect: self.connect,
            plugs: self.plugs,
            on_value: self.on_value,
            off_value: self.off_value,
            expect_timeout: Duration::from_millis(self.expect_timeout_ms),
            scripts,
        })
    }
}

/// A compiled, immutable device type
#[derive(Debug, Clone)]
pub struct DeviceType {
    name: String,
    connect: ConnectClass,
    plugs: Vec<String>,
    on_value: String,
    off_value: String,
    expect_timeout: Duration,
    scripts: HashMap<ScriptKind, Script>,
}

impl DeviceType {
    /// Type name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Connection class of instances of this type
    pub fn connect(&self) -> ConnectClass {
        self.connect
    }

    /// Plug names, in device order
    pub fn plugs(&self) -> &[String] {
        &self.plugs
    }

    /// Number of plugs
    pub fn plug_count(&self) -> usize {
        self.plugs.len()
    }

    /// Does this type have a plug with the given name?
    pub fn has_plug(&self, plug: &str) -> bool {
        self.plugs.iter().any(|p| p == plug)
    }

    /// The script for a kind, if the type defines one
    pub fn script(&self, kind: ScriptKind) -> Option<&Script> {
        self.scripts.get(&kind)
    }

    /// Does this type support a script kind?
    pub fn supports(&self, kind: ScriptKind) -> bool {
        self.scripts.contains_key(&kind)
    }

    /// Default deadline for expect statements of this type
    pub fn expect_timeout(&self) -> Duration {
        self.expect_timeout
    }

    /// Map a captured status text onto a plug status
    pub fn classify_status(&self, text: &str) -> PlugStatus {
        if text == self.on_value {
            PlugStatus::On
        } else if text == self.off_value {
            PlugStatus::Off
        } else {
            PlugStatus::Unknown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stmt::StmtDef;

    fn on_script() -> ScriptDef {
        ScriptDef::new([StmtDef::send("on %s\r\n"), StmtDef::expect("OK")])
    }

    #[test]
    fn absent_script_kind_is_unsupported() {
        let dtype = DeviceTypeDef::new("rpc", ConnectClass::Tcp, ["1", "2"])
            .with_script(ScriptKind::On, on_script())
            .compile()
            .unwrap();

        assert!(dtype.supports(ScriptKind::On));
        assert!(!dtype.supports(ScriptKind::Cycle));
        assert!(dtype.script(ScriptKind::Cycle).is_none());
    }

    #[test]
    fn bad_pattern_rejects_the_whole_type() {
        let err = DeviceTypeDef::new("rpc", ConnectClass::Tcp, ["1"])
            .with_script(
                ScriptKind::Status,
                ScriptDef::new([StmtDef::expect("plug ([0-9]+")]),
            )
            .compile()
            .unwrap_err();
        assert!(matches!(err, ConfigError::BadPattern { .. }));
    }

    #[test]
    fn classify_status_uses_configured_values() {
        let dtype = DeviceTypeDef::new("icebox", ConnectClass::Tcp, ["1"])
            .with_status_values("ON", "OFF")
            .compile()
            .unwrap();

        assert_eq!(dtype.classify_status("ON"), PlugStatus::On);
        assert_eq!(dtype.classify_status("OFF"), PlugStatus::Off);
        assert_eq!(dtype.classify_status("on"), PlugStatus::Unknown);
        assert_eq!(dtype.classify_status("tripped"), PlugStatus::Unknown);
    }

    #[test]
    fn operations_map_onto_script_kinds() {
        assert_eq!(Operation::On.script_kind(), ScriptKind::On);
        assert_eq!(Operation::Status.script_kind(), ScriptKind::Status);
        assert_eq!(Operation::Cycle.name(), "cycle");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn device_type_def_loads_from_json() {
        let json = r#"{
            "name": "rpc3",
            "connect": "telnet",
            "plugs": ["1", "2", "3", "4"],
            "expect_timeout_ms": 5000,
            "scripts": {
                "on": { "stmts": [
                    { "stmt": "send", "fmt": "on %s\r\n" },
                    { "stmt": "expect", "pattern": "OK" }
                ]},
                "status": { "stmts": [
                    { "stmt": "send", "fmt": "status\r\n" },
                    { "stmt": "expect", "pattern": "plug ([0-9]+): (on|off)" },
                    { "stmt": "setstatus", "plug_group": 1, "status_group": 2 }
                ]}
            }
        }"#;

        let def: DeviceTypeDef = serde_json::from_str(json).unwrap();
        let dtype = def.compile().unwrap();
        assert_eq!(dtype.name(), "rpc3");
        assert_eq!(dtype.connect(), ConnectClass::Telnet);
        assert_eq!(dtype.plug_count(), 4);
        assert_eq!(dtype.expect_timeout(), Duration::from_millis(5_000));
        assert!(dtype.supports(ScriptKind::On));
        assert!(dtype.supports(ScriptKind::Status));
        assert!(!dtype.supports(ScriptKind::Off));
    }
}
