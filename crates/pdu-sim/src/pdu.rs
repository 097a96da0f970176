//! Simulated power controller
//!
//! A `SimPdu` models a small network-attached power controller: it
//! greets with a banner and prompt, answers line-oriented commands from
//! a rule table, and tracks per-plug power state. The stock dialect is
//! modeled on a generic 8-plug RPC unit; custom rules can be layered on
//! for device-specific quirks.

use std::collections::VecDeque;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// What a matched command does
#[derive(Debug, Clone)]
enum SimAction {
    /// Send a fixed reply
    Reply(String),
    /// Turn the captured plug on and acknowledge
    PlugOn,
    /// Turn the captured plug off and acknowledge
    PlugOff,
    /// Cycle the captured plug (ends on) and acknowledge
    PlugCycle,
    /// Report the captured plug's state
    ReportOne,
    /// Report every plug's state
    ReportAll,
}

#[derive(Debug, Clone)]
struct SimRule {
    pattern: Regex,
    action: SimAction,
}

/// Configuration for creating a simulated PDU
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimPduConfig {
    /// Display name/identifier
    pub name: String,
    /// Number of plugs, named "1" through plug_count
    pub plug_count: usize,
    /// Text sent once on connect, before the first prompt
    pub banner: Option<String>,
    /// Prompt appended after the banner and every reply
    pub prompt: String,
    /// Artificial delay before each reply, for pacing tests
    pub reply_delay_ms: u64,
    /// Swallow commands without replying (deadline tests)
    pub silent: bool,
}

impl Default for SimPduConfig {
    fn default() -> Self {
        Self {
            name: "sim-pdu".to_string(),
            plug_count: 8,
            banner: Some("RPC-3 Telnet Host\r\n".to_string()),
            prompt: "RPC> ".to_string(),
            reply_delay_ms: 0,
            silent: false,
        }
    }
}

/// A simulated power controller
#[derive(Debug)]
pub struct SimPdu {
    config: SimPduConfig,
    rules: Vec<SimRule>,
    plugs: Vec<bool>,
    line: Vec<u8>,
    pending: VecDeque<Vec<u8>>,
}

impl SimPdu {
    /// Create a simulated PDU with the stock command dialect
    pub fn new(config: SimPduConfig) -> Self {
        let rules = vec![
            rule(r"^on ([0-9]+)$", SimAction::PlugOn),
            rule(r"^off ([0-9]+)$", SimAction::PlugOff),
            rule(r"^reboot ([0-9]+)$", SimAction::PlugCycle),
            rule(r"^status ([0-9]+)$", SimAction::ReportOne),
            rule(r"^status$", SimAction::ReportAll),
            rule(r"^logout$", SimAction::Reply("bye\r\n".to_string())),
        ];
        let plugs = vec![false; config.plug_count];
        Self {
            config,
            rules,
            plugs,
            line: Vec::new(),
            pending: VecDeque::new(),
        }
    }

    /// A stock 8-plug unit with default settings
    pub fn stock() -> Self {
        Self::new(SimPduConfig::default())
    }

    /// Layer a custom fixed-reply rule in front of the stock dialect
    ///
    /// Rules are checked in order, so custom rules win over stock ones.
    /// Panics on a bad pattern; simulated dialects are test fixtures.
    pub fn with_rule(mut self, pattern: &str, reply: &str) -> Self {
        self.rules.insert(0, rule(pattern, SimAction::Reply(reply.to_string())));
        self
    }

    /// The unit's display name
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Number of plugs
    pub fn plug_count(&self) -> usize {
        self.plugs.len()
    }

    /// Artificial reply delay
    pub fn reply_delay(&self) -> Duration {
        Duration::from_millis(self.config.reply_delay_ms)
    }

    /// State of a plug by its 1-based name
    pub fn plug(&self, n: usize) -> Option<bool> {
        if n == 0 {
            return None;
        }
        self.plugs.get(n - 1).copied()
    }

    /// Force a plug's state (test setup)
    pub fn set_plug(&mut self, n: usize, on: bool) {
        if n >= 1 && n <= self.plugs.len() {
            self.plugs[n - 1] = on;
        }
    }

    /// Banner plus first prompt, sent once on connect
    pub fn greeting(&self) -> Option<Vec<u8>> {
        if self.config.silent {
            return None;
        }
        let mut out = Vec::new();
        if let Some(banner) = &self.config.banner {
            out.extend_from_slice(banner.as_bytes());
        }
        out.extend_from_slice(self.config.prompt.as_bytes());
        if out.is_empty() {
            None
        } else {
            Some(out)
        }
    }

    /// Feed raw inbound bytes; complete lines are executed
    pub fn feed(&mut self, data: &[u8]) {
        for &byte in data {
            if byte == b'\n' {
                let raw = std::mem::take(&mut self.line);
                let text = String::from_utf8_lossy(&raw);
                let trimmed = text.trim_end_matches(['\r', '\n']).trim();
                if !trimmed.is_empty() {
                    self.handle_line(trimmed);
                }
            } else {
                self.line.push(byte);
            }
        }
    }

    /// Take the next pending reply
    pub fn take_output(&mut self) -> Option<Vec<u8>> {
        self.pending.pop_front()
    }

    /// Check if there is pending output
    pub fn has_output(&self) -> bool {
        !self.pending.is_empty()
    }

    fn handle_line(&mut self, line: &str) {
        if self.config.silent {
            return;
        }

        let matched = self
            .rules
            .iter()
            .find_map(|r| r.pattern.captures(line).map(|c| (r.action.clone(), c)));

        let reply = match matched {
            Some((SimAction::Reply(text), _)) => text,
            Some((SimAction::PlugOn, caps)) => self.switch_plug(caps.get(1), true),
            Some((SimAction::PlugOff, caps)) => self.switch_plug(caps.get(1), false),
            Some((SimAction::PlugCycle, caps)) => self.switch_plug(caps.get(1), true),
            Some((SimAction::ReportOne, caps)) => match plug_number(caps.get(1)) {
                Some(n) if n >= 1 && n <= self.plugs.len() => {
                    format!("plug {}: {}\r\n", n, onoff(self.plugs[n - 1]))
                }
                _ => "ERROR\r\n".to_string(),
            },
            Some((SimAction::ReportAll, _)) => {
                let mut out = String::new();
                for (i, on) in self.plugs.iter().enumerate() {
                    out.push_str(&format!("plug {}: {}\r\n", i + 1, onoff(*on)));
                }
                out
            }
            None => "ERROR\r\n".to_string(),
        };

        let mut bytes = reply.into_bytes();
        bytes.extend_from_slice(self.config.prompt.as_bytes());
        self.pending.push_back(bytes);
    }

    fn switch_plug(&mut self, group: Option<regex::Match<'_>>, on: bool) -> String {
        match plug_number(group) {
            Some(n) if n >= 1 && n <= self.plugs.len() => {
                self.plugs[n - 1] = on;
                "OK\r\n".to_string()
            }
            _ => "ERROR\r\n".to_string(),
        }
    }
}

fn rule(pattern: &str, action: SimAction) -> SimRule {
    SimRule {
        pattern: Regex::new(pattern).expect("sim rule pattern"),
        action,
    }
}

fn plug_number(group: Option<regex::Match<'_>>) -> Option<usize> {
    group?.as_str().parse().ok()
}

fn onoff(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}
