//! Viewer transport
//!
//! Browsers attach over a WebSocket at [`listener::WEBSOCKET_PATH`]. Every
//! initialization and media segment is sent as one binary message, in
//! queue order. Transport failures end only the affected viewer.

pub mod config;
pub mod connection;
pub mod listener;

pub use config::{ServerConfig, DEFAULT_PORT};
pub use connection::{pump_segments, serve_viewer};
pub use listener::{RelayServer, WEBSOCKET_PATH};
