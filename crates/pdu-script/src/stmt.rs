//! Script statements
//!
//! A script is an ordered sequence of statements of five kinds: send,
//! expect, setstatus, setplugname, and delay. Order is significant and
//! execution is strictly sequential; there is no branching or looping.
//!
//! Statements come in two forms: the serde-facing definition types
//! (`StmtDef`, `ScriptDef`) carrying raw strings, and the compiled
//! runtime types (`Stmt`, `Script`) carrying compiled regexes and parsed
//! templates. Compilation is where bad patterns are rejected.

use std::time::Duration;

use regex::bytes::Regex;

use crate::error::ConfigError;
use crate::template::SendTemplate;

/// How a setstatus statement names the plug it applies to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlugRef {
    /// A fixed plug name from the configuration
    Literal(String),
    /// A capture group of the preceding expect match
    Group(usize),
    /// The plug the script run is currently addressing
    Current,
}

/// One compiled script statement
#[derive(Debug, Clone)]
pub enum Stmt {
    /// Write a template-expanded string to the device
    Send {
        /// Template with `%s` plug substitution
        fmt: SendTemplate,
    },
    /// Wait for a pattern in the receive stream
    Expect {
        /// Compiled pattern, searched over the unconsumed buffer
        pattern: Regex,
        /// Per-statement deadline override
        timeout: Option<Duration>,
    },
    /// Derive a plug's status from the latest expect captures
    SetStatus {
        /// Which plug the status applies to
        plug: PlugRef,
        /// Capture group holding the status text
        status_group: usize,
    },
    /// Bind a discovered plug identifier to a node name
    SetPlugName {
        /// Capture group holding the plug identifier
        plug_group: usize,
        /// Capture group holding the node name
        node_group: usize,
    },
    /// Pause without I/O
    Delay {
        /// How long to suspend the session
        duration: Duration,
    },
}

impl Stmt {
    /// Short tag used in step diagnostics ("on[2]/expect")
    pub fn tag(&self) -> &'static str {
        match self {
            Stmt::Send { .. } => "send",
            Stmt::Expect { .. } => "expect",
            Stmt::SetStatus { .. } => "setstatus",
            Stmt::SetPlugName { .. } => "setplugname",
            Stmt::Delay { .. } => "delay",
        }
    }
}

/// A compiled, immutable statement sequence
#[derive(Debug, Clone)]
pub struct Script {
    stmts: Vec<Stmt>,
    timeout: Option<Duration>,
}

impl Script {
    /// The statements in execution order
    pub fn stmts(&self) -> &[Stmt] {
        &self.stmts
    }

    /// Number of statements
    pub fn len(&self) -> usize {
        self.stmts.len()
    }

    /// True for an empty script
    pub fn is_empty(&self) -> bool {
        self.stmts.is_empty()
    }

    /// Script-level expect timeout override
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Does any statement address the current plug?
    ///
    /// A script that wants a plug is run once per target plug; one that
    /// does not is run once per device.
    pub fn wants_plug(&self) -> bool {
        self.stmts.iter().any(|s| match s {
            Stmt::Send { fmt } => fmt.wants_plug(),
            Stmt::SetStatus {
                plug: PlugRef::Current,
                ..
            } => true,
            _ => false,
        })
    }
}

/// Serde-facing statement definition
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "stmt", rename_all = "lowercase"))]
pub enum StmtDef {
    /// Send a template-expanded string
    Send {
        /// Raw template text
        fmt: String,
    },
    /// Wait for a pattern
    Expect {
        /// Raw pattern text
        pattern: String,
        /// Per-statement timeout in milliseconds
        #[cfg_attr(feature = "serde", serde(default))]
        timeout_ms: Option<u64>,
    },
    /// Record a plug status from a capture group
    SetStatus {
        /// Fixed plug name; wins over `plug_group` when both are given
        #[cfg_attr(feature = "serde", serde(default))]
        plug: Option<String>,
        /// Capture group naming the plug; absent means the current plug
        #[cfg_attr(feature = "serde", serde(default))]
        plug_group: Option<usize>,
        /// Capture group holding the status text
        status_group: usize,
    },
    /// Bind a discovered plug name to a node
    SetPlugName {
        /// Capture group holding the plug identifier
        plug_group: usize,
        /// Capture group holding the node name
        node_group: usize,
    },
    /// Pause without I/O
    Delay {
        /// Pause length in milliseconds
        delay_ms: u64,
    },
}

impl StmtDef {
    /// Shorthand for a send definition
    pub fn send(fmt: impl Into<String>) -> Self {
        StmtDef::Send { fmt: fmt.into() }
    }

    /// Shorthand for an expect definition with the default timeout
    pub fn expect(pattern: impl Into<String>) -> Self {
        StmtDef::Expect {
            pattern: pattern.into(),
            timeout_ms: None,
        }
    }

    /// Shorthand for a setstatus applying to the current plug
    pub fn set_status_current(status_group: usize) -> Self {
        StmtDef::SetStatus {
            plug: None,
            plug_group: None,
            status_group,
        }
    }

    /// Shorthand for a setstatus naming the plug by capture group
    pub fn set_status_group(plug_group: usize, status_group: usize) -> Self {
        StmtDef::SetStatus {
            plug: None,
            plug_group: Some(plug_group),
            status_group,
        }
    }

    /// Shorthand for a delay definition
    pub fn delay(delay_ms: u64) -> Self {
        StmtDef::Delay { delay_ms }
    }

    /// Compile into the runtime form
    pub fn compile(&self) -> Result<Stmt, ConfigError> {
        match self {
            StmtDef::Send { fmt } => Ok(Stmt::Send {
                fmt: SendTemplate::parse(fmt)?,
            }),
            StmtDef::Expect {
                pattern,
                timeout_ms,
            } => {
                let compiled = Regex::new(pattern).map_err(|source| ConfigError::BadPattern {
                    pattern: pattern.clone(),
                    source,
                })?;
                Ok(Stmt::Expect {
                    pattern: compiled,
                    timeout: timeout_ms.map(Duration::from_millis),
                })
            }
            StmtDef::SetStatus {
                plug,
                plug_group,
                status_group,
            } => {
                let plug = match (plug, plug_group) {
                    (Some(name), _) => PlugRef::Literal(name.clone()),
                    (None, Some(group)) => PlugRef::Group(*group),
                    (None, None) => PlugRef::Current,
                };
                Ok(Stmt::SetStatus {
                    plug,
                    status_group: *status_group,
                })
            }
            StmtDef::SetPlugName {
                plug_group,
                node_group,
            } => Ok(Stmt::SetPlugName {
                plug_group: *plug_group,
                node_group: *node_group,
            }),
            StmtDef::Delay { delay_ms } => Ok(Stmt::Delay {
                duration: Duration::from_millis(*delay_ms),
            }),
        }
    }
}

/// Serde-facing script definition
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScriptDef {
    /// Statements in execution order
    pub stmts: Vec<StmtDef>,
    /// Script-level expect timeout in milliseconds
    #[cfg_attr(feature = "serde", serde(default))]
    pub timeout_ms: Option<u64>,
}

impl ScriptDef {
    /// Build a script definition from statements
    pub fn new(stmts: impl IntoIterator<Item = StmtDef>) -> Self {
        Self {
            stmts: stmts.into_iter().collect(),
            timeout_ms: None,
        }
    }

    /// Set the script-level expect timeout
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Compile every statement, failing on the first bad one
    pub fn compile(&self) -> Result<Script, ConfigError> {
        let stmts = self
            .stmts
            .iter()
            .map(StmtDef::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Script {
            stmts,
            timeout: self.timeout_ms.map(Duration::from_millis),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_preserves_statement_order() {
        let script = ScriptDef::new([
            StmtDef::send("on %s\r\n"),
            StmtDef::expect("OK"),
            StmtDef::set_status_current(0),
        ])
        .compile()
        .unwrap();

        let tags: Vec<_> = script.stmts().iter().map(Stmt::tag).collect();
        assert_eq!(tags, ["send", "expect", "setstatus"]);
    }

    #[test]
    fn bad_pattern_fails_compile() {
        let err = StmtDef::expect("plug ([0-9]+").compile().unwrap_err();
        assert!(matches!(err, ConfigError::BadPattern { .. }));
    }

    #[test]
    fn bad_template_fails_compile() {
        let err = StmtDef::send("on %d\r\n").compile().unwrap_err();
        assert!(matches!(err, ConfigError::BadTemplate(_)));
    }

    #[test]
    fn wants_plug_detects_send_templates() {
        let per_plug = ScriptDef::new([StmtDef::send("on %s\r\n")]).compile().unwrap();
        assert!(per_plug.wants_plug());

        let whole_device = ScriptDef::new([StmtDef::send("status\r\n")]).compile().unwrap();
        assert!(!whole_device.wants_plug());
    }

    #[test]
    fn wants_plug_detects_current_plug_setstatus() {
        let script = ScriptDef::new([
            StmtDef::send("query\r\n"),
            StmtDef::expect("(on|off)"),
            StmtDef::set_status_current(1),
        ])
        .compile()
        .unwrap();
        assert!(script.wants_plug());
    }

    #[test]
    fn setstatus_literal_plug_wins() {
        let def = StmtDef::SetStatus {
            plug: Some("1".to_string()),
            plug_group: Some(2),
            status_group: 1,
        };
        match def.compile().unwrap() {
            Stmt::SetStatus { plug, .. } => assert_eq!(plug, PlugRef::Literal("1".to_string())),
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[test]
    fn statement_timeout_is_carried() {
        let def = StmtDef::Expect {
            pattern: "OK".to_string(),
            timeout_ms: Some(250),
        };
        match def.compile().unwrap() {
            Stmt::Expect { timeout, .. } => {
                assert_eq!(timeout, Some(Duration::from_millis(250)));
            }
            other => panic!("unexpected statement: {:?}", other),
        }
    }

    #[cfg(feature = "serde")]
    #[test]
    fn script_def_roundtrips_through_json() {
        let def = ScriptDef::new([
            StmtDef::send("off %s\r\n"),
            StmtDef::expect("OK"),
            StmtDef::delay(100),
        ])
        .with_timeout_ms(5_000);

        let json = serde_json::to_string(&def).unwrap();
        let back: ScriptDef = serde_json::from_str(&json).unwrap();
        assert_eq!(back, def);
    }
}
