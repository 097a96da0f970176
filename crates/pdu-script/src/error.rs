//! Error types for script and topology loading

use thiserror::Error;

/// Errors raised while compiling definitions into their runtime forms
///
/// All of these are configuration-time failures: a device type that
/// produces one is rejected before any session can reference it.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An expect pattern failed to compile
    #[error("bad pattern '{pattern}': {source}")]
    BadPattern {
        /// The offending pattern text
        pattern: String,
        /// The underlying regex error
        #[source]
        source: regex::Error,
    },

    /// A send template contains an unknown `%` directive
    #[error("bad send template '{0}': only %s and %% are recognized")]
    BadTemplate(String),

    /// A template referenced the plug name with no plug in scope
    #[error("send template needs a plug name but none is in scope")]
    MissingPlug,

    /// A device references a device type that was never loaded
    #[error("unknown device type: {0}")]
    UnknownDeviceType(String),

    /// A node references a device that was never loaded
    #[error("unknown device: {0}")]
    UnknownDevice(String),

    /// A node references a plug its device does not have
    #[error("device {device} has no plug named {plug}")]
    UnknownPlug {
        /// Device identifier
        device: String,
        /// Requested plug name
        plug: String,
    },

    /// The same node name was mapped twice
    #[error("duplicate node name: {0}")]
    DuplicateNode(String),

    /// The same device identifier was loaded twice
    #[error("duplicate device: {0}")]
    DuplicateDevice(String),
}
