//! # POI Minigame Coordination Server
//!
//! This library provides the real-time coordination server for a location-based
//! multiplayer minigame. Clients connect over a (optionally TLS-encrypted)
//! WebSocket, report points of interest (POIs) and gameplay events, and receive
//! broadcast state about the shared game world.
//!
//! ## Core Responsibilities
//!
//! ### Session Protocol
//! Every connection is a [`session::Session`] state machine. A session starts
//! pending, becomes connected after a `connect` handshake with a matching
//! protocol version, and is closed on any protocol violation, explicit
//! disconnect or transport error. Malformed input is never tolerated: the
//! client receives a `badLlama` notice and the connection is dropped.
//!
//! ### World State
//! POI reports are shallow-merged into [`world::WorldState`], last writer wins
//! per field. After every merge the full merged record is broadcast to every
//! connected session, including the sender.
//!
//! ### Measurement Window
//! The operator console toggles a game-wide measurement flag. Changes are
//! broadcast as `start`/`end`; redundant toggles are no-ops.
//!
//! ## Architecture Design
//!
//! ### Single-Owner Event Loop
//! The [`coordinator::Coordinator`] owns the session registry and the world
//! state and runs on one task. Connection tasks and the console only talk to
//! it through a channel, so merges, broadcasts and registry changes happen in
//! one well-defined order and a closed session is removed before any later
//! broadcast can see it.
//!
//! ### Per-Connection Tasks
//! Each socket has a reader task forwarding frames in arrival order and a
//! writer task draining the session's outbound queue.
//!
//! ## Module Organization
//!
//! - `session`: protocol state machine and validation
//! - `registry`: live sessions keyed by identifier
//! - `broadcast`: fan-out to every connected session
//! - `world`: POI store and measurement flag
//! - `coordinator`: applies session transitions to registry and world
//! - `insults`: random insult for `badLlama` notices
//! - `network`: WebSocket/TLS transport and the event loop
//! - `console`: operator commands on stdin
//! - `persistence`: save file load, backup and atomic save
//! - `config`: command line configuration
//! - `error`: I/O level error type
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use clap::Parser;
//! use server::config::ServerConfig;
//! use server::network::Server;
//! use server::persistence;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::parse();
//!     let world = persistence::load(&config.state_file, &config.game_type)?;
//!
//!     let server = Server::bind(&config, world).await?;
//!     let handle = server.handle();
//!     let task = tokio::spawn(server.run());
//!
//!     handle.start_measurement().await;
//!     handle.shutdown();
//!
//!     let world = task.await?;
//!     persistence::save(&config.state_file, &world)?;
//!     Ok(())
//! }
//! ```

pub mod broadcast;
pub mod config;
pub mod console;
pub mod coordinator;
pub mod error;
pub mod insults;
pub mod network;
pub mod persistence;
pub mod registry;
pub mod session;
pub mod world;
