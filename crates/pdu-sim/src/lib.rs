//! Power Controller Simulation Library
//!
//! This crate provides simulated power controllers for testing the
//! multiplexing engine without physical hardware. It includes:
//!
//! - **SimPdu**: a rule-driven device model with per-plug state,
//!   banner/prompt dialect, configurable reply pacing, and a silent
//!   mode for deadline tests
//! - **run_sim_pdu**: an actor task serving a `SimPdu` over any async
//!   stream (one end of `tokio::io::duplex` in tests)
//!
//! # Example
//!
//! ```rust
//! use pdu_sim::SimPdu;
//!
//! let mut pdu = SimPdu::stock();
//! pdu.feed(b"on 3\r\n");
//! assert_eq!(pdu.plug(3), Some(true));
//!
//! while let Some(reply) = pdu.take_output() {
//!     println!("PDU replied: {}", String::from_utf8_lossy(&reply));
//! }
//! ```

pub mod pdu;
pub mod task;

pub use pdu::{SimPdu, SimPduConfig};
pub use task::{run_sim_pdu, SimCommand};
