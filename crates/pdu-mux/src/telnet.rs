//! Telnet option stripping
//!
//! Network-attached power controllers frequently speak telnet rather
//! than raw TCP. Scripts match on the device's text, so option
//! negotiation bytes must never reach the receive buffer. The filter
//! removes IAC sequences from inbound data and queues refusals
//! (IAC DONT / IAC WONT) for every option the peer tries to negotiate,
//! leaving the connection in plain NVT mode.

const IAC: u8 = 255;
const DONT: u8 = 254;
const DO: u8 = 253;
const WONT: u8 = 252;
const WILL: u8 = 251;
const SB: u8 = 250;
const SE: u8 = 240;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterState {
    Data,
    Iac,
    Opt(u8),
    Sub,
    SubIac,
}

/// Stateful inbound telnet filter
///
/// Feed it raw bytes from the wire; it returns the cleaned data and any
/// refusal bytes that should be written back to the peer. State carries
/// across calls, so sequences split over reads are handled.
#[derive(Debug)]
pub struct TelnetFilter {
    state: FilterState,
}

impl TelnetFilter {
    /// A filter in the initial data state
    pub fn new() -> Self {
        Self {
            state: FilterState::Data,
        }
    }

    /// Filter one chunk of inbound bytes
    ///
    /// Returns `(clean, replies)`: the bytes to append to the receive
    /// buffer and the refusals to send back.
    pub fn feed(&mut self, data: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let mut clean = Vec::with_capacity(data.len());
        let mut replies = Vec::new();

        for &byte in data {
            self.state = match self.state {
                FilterState::Data => {
                    if byte == IAC {
                        FilterState::Iac
                    } else {
                        clean.push(byte);
                        FilterState::Data
                    }
                }
                FilterState::Iac => match byte {
                    IAC => {
                        // escaped literal 0xFF
                        clean.push(IAC);
                        FilterState::Data
                    }
                    WILL | WONT | DO | DONT => FilterState::Opt(byte),
                    SB => FilterState::Sub,
                    // NOP, AYT, and friends carry no option byte
                    _ => FilterState::Data,
                },
                FilterState::Opt(cmd) => {
                    match cmd {
                        WILL => replies.extend_from_slice(&[IAC, DONT, byte]),
                        DO => replies.extend_from_slice(&[IAC, WONT, byte]),
                        // peer refusing is exactly what we want
                        _ => {}
                    }
                    FilterState::Data
                }
                FilterState::Sub => {
                    if byte == IAC {
                        FilterState::SubIac
                    } else {
                        FilterState::Sub
                    }
                }
                FilterState::SubIac => {
                    if byte == SE {
                        FilterState::Data
                    } else {
                        FilterState::Sub
                    }
                }
            };
        }

        (clean, replies)
    }
}

impl Default for TelnetFilter {
    fn default() -> Self {
        Self::new()
    }
}
