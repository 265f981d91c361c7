//! Broadcast hub
//!
//! The hub is a single task that owns the viewer registry. Registrations,
//! unregistrations and frames all arrive as messages, so the per-viewer
//! lock and sequence state is only ever touched from one place.
//!
//! # Architecture
//!
//! ```text
//!   [Capture source]                 [Viewer conn]       [Viewer conn]
//!   FrameSender::send()              HubHandle           HubHandle
//!         │ mpsc(1) + ack             register()          unregister()
//!         │                               └──── control (FIFO) ─┘
//!         ▼                                          │
//!   ┌────────────────────────────────────────────────┴───────────┐
//!   │ Hub::run()                                                 │
//!   │   clients: HashMap<ClientId, ClientSession {               │
//!   │     state: SessionState,                                   │
//!   │     outbound: mpsc::Sender<Bytes>,   (bounded)             │
//!   │   }>                                                       │
//!   └───────────┬──────────────────────────────┬─────────────────┘
//!               │ try_send(moof+mdat)          │ try_send(moof+mdat)
//!               ▼                              ▼
//!        ClientLink.segments            ClientLink.segments ──► WebSocket
//! ```
//!
//! # Backpressure
//!
//! The hub never waits on a viewer. A full outbound queue means the viewer
//! is lagging, and it is dropped on the spot while everyone else carries
//! on. Segments are `bytes::Bytes`, so queuing one is a reference count
//! bump rather than a copy.

pub mod actor;
pub mod config;
pub mod error;
pub mod handle;

pub use actor::Hub;
pub use config::HubConfig;
pub use error::HubError;
pub use handle::{FrameSender, HubHandle};
