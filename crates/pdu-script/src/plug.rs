//! Per-device plug state

use std::collections::HashMap;

/// Power state of a single plug
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum PlugStatus {
    /// Confirmed powered on
    On,
    /// Confirmed powered off
    Off,
    /// Device answered but the answer matched neither on nor off
    Unknown,
    /// No answer recorded yet for this script run
    Pending,
}

impl PlugStatus {
    /// Human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            PlugStatus::On => "on",
            PlugStatus::Off => "off",
            PlugStatus::Unknown => "unknown",
            PlugStatus::Pending => "pending",
        }
    }
}

/// Plug name to status table, owned by exactly one session while running
#[derive(Debug, Clone, Default)]
pub struct PlugTable {
    entries: HashMap<String, PlugStatus>,
}

impl PlugTable {
    /// Create a table with every listed plug pending
    pub fn new(plugs: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            entries: plugs
                .into_iter()
                .map(|p| (p.into(), PlugStatus::Pending))
                .collect(),
        }
    }

    /// Record a plug's status, inserting the plug if it was discovered
    /// at runtime rather than listed up front
    pub fn set(&mut self, plug: impl Into<String>, status: PlugStatus) {
        self.entries.insert(plug.into(), status);
    }

    /// Status of a plug, if tracked
    pub fn get(&self, plug: &str) -> Option<PlugStatus> {
        self.entries.get(plug).copied()
    }

    /// Number of tracked plugs
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no plugs are tracked
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over (plug, status) pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, PlugStatus)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Consume the table into a plain map (the terminal snapshot)
    pub fn into_map(self) -> HashMap<String, PlugStatus> {
        self.entries
    }
}
