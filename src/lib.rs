//! Low-latency H.264 relay for browser Media Source Extensions viewers
//!
//! A capture source delivers raw H.264 NAL units. Each picture is wrapped in
//! its own fragmented MP4 media segment and broadcast over WebSocket to
//! every viewer that has synchronized on a key frame.
//!
//! # Architecture
//!
//! ```text
//!   Annex B input ──► AnnexBSource ──► FrameSender ──► Hub (single task)
//!   (pipe/file)       SPS+PPS ─► StreamConfig            │ per viewer:
//!                                                         │  admit ─► moof+mdat
//!                                                         ▼
//!                                         bounded queue per viewer
//!                                                         │
//!                                RelayServer (/websocket) ▼
//!                                    init segment, then media segments
//! ```
//!
//! # Example
//!
//! ```no_run
//! use mse_relay::hub::{Hub, HubConfig};
//! use mse_relay::source::AnnexBSource;
//! use mse_relay::{RelayServer, ServerConfig};
//!
//! # async fn example() -> mse_relay::Result<()> {
//! let (stream, source) = AnnexBSource::open(tokio::io::stdin(), 1280, 720).await?;
//! let (hub, handle, frames) = Hub::new(HubConfig::default(), stream);
//! tokio::spawn(hub.run());
//! tokio::spawn(source.run(frames));
//!
//! RelayServer::new(ServerConfig::default(), handle).run().await
//! # }
//! ```

pub mod error;
pub mod hub;
pub mod media;
pub mod server;
pub mod session;
pub mod source;
pub mod stats;

pub use error::{Error, Result};
pub use hub::{Hub, HubConfig, HubHandle};
pub use media::StreamConfig;
pub use server::{RelayServer, ServerConfig};
