//! Capture input
//!
//! Turns a raw H.264 byte stream (camera pipe, file, stdin) into the stream
//! configuration and the sequence of coded frames the hub consumes.

pub mod annexb;
pub mod capture;

pub use annexb::AnnexBReader;
pub use capture::AnnexBSource;
