//! Fan-out of one message to every session in the registry.

use crate::registry::SessionRegistry;
use log::{debug, error};
use shared::ServerMessage;

/// Sends `message` to every registered session and returns how many got it.
///
/// The message is encoded once. Pending sessions drop it (see
/// [`Session::deliver`](crate::session::Session::deliver)); nothing is queued
/// for them. Per-session order follows call order, cross-session order is
/// unspecified.
pub fn broadcast(registry: &SessionRegistry, message: &ServerMessage) -> usize {
    let text = match message.to_json() {
        Ok(text) => text,
        Err(e) => {
            error!("Failed to encode broadcast: {}", e);
            return 0;
        }
    };

    let delivered = registry
        .iter()
        .filter(|session| session.deliver(&text))
        .count();
    debug!(
        "Broadcast delivered to {}/{} sessions",
        delivered,
        registry.len()
    );
    delivered
}
