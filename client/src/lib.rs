//! # POI Minigame Client Library
//!
//! A small WebSocket client for the coordination server. It is what the
//! `poi-client` scout tool and the end-to-end tests use to speak the protocol.
//!
//! ## Protocol Walkthrough
//!
//! 1. Open the socket with [`network::Scout::connect`].
//! 2. Send `connect` with the protocol version; the server answers either
//!    `connected` with a session id (followed by one `poi` per known POI, and
//!    `start` if a measurement window is open) or `failed` with its own
//!    version, after which it hangs up.
//! 3. Report POIs and events. Every accepted POI comes back to every
//!    connected client as the full merged record.
//! 4. Any malformed message earns a `badLlama` notice and a closed socket.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::Scout;
//! use shared::{ServerMessage, PROTOCOL_VERSION};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut scout = Scout::connect("ws://127.0.0.1:6543").await?;
//!     let session = scout.handshake(PROTOCOL_VERSION).await?;
//!     println!("session {}", session);
//!
//!     scout.report_poi("g1", 52_520_008, 13_404_954).await?;
//!     while let Some(message) = scout.recv().await? {
//!         if let ServerMessage::Poi { guid, data } = message {
//!             println!("{} -> {:?}", guid, data);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod network;
