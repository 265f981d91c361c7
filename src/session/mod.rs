//! Viewer session state
//!
//! Each connected viewer has an admission state machine (waiting for a key
//! frame, then locked) and a bounded queue of outbound segments.

pub mod client;
pub mod state;

pub use client::{ClientId, ClientLink, ClientSession, Delivery};
pub use state::{Admission, SessionPhase, SessionState};
