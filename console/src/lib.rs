//! # Console Session Client Library
//!
//! This library implements the live console session for a remotely managed
//! server instance: a per-instance, bidirectional, real-time channel that
//! streams process output to an observer and accepts typed commands from it,
//! kept in lockstep with lifecycle transitions (start / stop / restart)
//! issued through a separate control-plane API.
//!
//! ## Architecture Overview
//!
//! The session is built from four components layered leaves-first:
//!
//! ### Control Plane (`control`)
//! A plain request/response client that issues lifecycle requests
//! (`POST /server/{id}/start|stop|restart`) and reports acknowledgement or
//! failure. It holds no connection and knows nothing about the console
//! socket.
//!
//! ### Socket Layer (`socket`)
//! One WebSocket per (instance, generation) pair with a fixed event
//! contract: exactly one `Opened`, frames in transport order, exactly one
//! `Closed(reason)`. The stream itself lives in a background task; the
//! owning controller receives events through a single-consumer channel, so
//! delivery is serialized and never concurrent.
//!
//! ### Log Buffer (`buffer`)
//! An append-only sequence of received lines tagged with a monotonically
//! increasing sequence number per socket generation. Reconnects start a new
//! generation and reset the sequence to 0; retained lines are never
//! reordered or rewritten.
//!
//! ### Session Controller (`session`)
//! The orchestrator. It owns the single active socket, tracks the desired
//! lifecycle state as last acknowledged by the control plane, and runs the
//! connection-phase state machine (Idle, Connecting, Connected, Closing).
//! The key decoupling: a socket dying on its own never changes the desired
//! state, it only triggers a reconnect if the desired state still wants a
//! socket; conversely a stop acknowledgement closes a perfectly healthy
//! socket.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use console::control::ControlPlaneClient;
//! use console::session::SessionController;
//! use console::socket::WsConnector;
//! use shared::{InstanceId, LifecycleTarget};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let instance: InstanceId = "survival".parse()?;
//!     let connector = WsConnector::new("http://127.0.0.1:8080");
//!     let control = ControlPlaneClient::new("http://127.0.0.1:8080");
//!     let mut controller = SessionController::mount(instance, connector, control);
//!
//!     controller.set_lifecycle(LifecycleTarget::Start).await?;
//!     loop {
//!         let event = controller.next_event().await;
//!         controller.handle_event(event).await;
//!         if let Some(line) = controller.snapshot().last() {
//!             println!("{}", line.text);
//!         }
//!     }
//! }
//! ```
//!
//! ## Error Handling
//!
//! Transport failures are absorbed by the controller (reconnect or stay
//! idle); only control-plane failures and `NotConnected` rejections surface
//! to the caller. Nothing in this library is fatal to the hosting process:
//! the worst case is an idle session with a visible error.

pub mod buffer;
pub mod control;
pub mod error;
pub mod session;
pub mod socket;
