use crate::broadcast::broadcast;
use crate::insults::random_insult;
use crate::registry::SessionRegistry;
use crate::session::{ConnectionHandle, Rejection, Session, SessionId, Transition};
use crate::world::WorldState;
use log::{debug, info};
use shared::{PoiData, ProtocolError, ServerMessage, PROTOCOL_VERSION};

/// Aggregate counters shown by the operator console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    pub sessions: usize,
    pub connected: usize,
    pub pois: usize,
    pub events: u64,
    pub measuring: bool,
}

/// Single owner of the session registry and the world state.
///
/// Every mutation goes through `&mut self`, so running one coordinator on
/// one task serialises merges, broadcasts and registry changes.
#[derive(Debug)]
pub struct Coordinator {
    registry: SessionRegistry,
    world: WorldState,
}

impl Coordinator {
    pub fn new(world: WorldState) -> Self {
        Self {
            registry: SessionRegistry::new(),
            world,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn world(&self) -> &WorldState {
        &self.world
    }

    /// Registers a fresh pending session under a newly generated id.
    pub fn open_session(&mut self, handle: ConnectionHandle) -> SessionId {
        let id = self.registry.generate_id();
        self.registry.insert(Session::new(id.clone(), handle));
        id
    }

    /// Runs one inbound frame through the session's state machine.
    pub fn handle_frame(&mut self, id: &str, frame: &str) {
        let Some(session) = self.registry.get(id) else {
            debug!("[{}] Frame for unknown session ignored", id);
            return;
        };
        debug!("[{}] Received: {}", id, frame);

        match session.interpret(frame, &self.world) {
            Ok(Transition::Accept) => self.complete_handshake(id),
            Ok(Transition::Reject(rejection)) => self.reject_handshake(id, rejection),
            Ok(Transition::MergePoi { guid, data }) => self.merge_poi(&guid, data),
            Ok(Transition::RecordEvent(event)) => self.world.record_event(&event),
            Err(violation) => self.bad_llama(id, &violation.reason),
        }
    }

    /// A frame arrived that is not text at all.
    pub fn handle_undecodable(&mut self, id: &str) {
        self.bad_llama(id, &ProtocolError::Decode.to_string());
    }

    /// Transport went away. Returns false if the session was already gone.
    pub fn close_session(&mut self, id: &str) -> bool {
        match self.registry.remove(id) {
            Some(mut session) => {
                info!("[{}] Client disconnected", id);
                session.close();
                true
            }
            None => false,
        }
    }

    /// Returns false, and broadcasts nothing, if measurement was already active.
    pub fn start_measurement(&mut self) -> bool {
        self.toggle_measurement(true)
    }

    /// Returns false, and broadcasts nothing, if measurement was already inactive.
    pub fn end_measurement(&mut self) -> bool {
        self.toggle_measurement(false)
    }

    pub fn stats(&self) -> Stats {
        Stats {
            sessions: self.registry.len(),
            connected: self.registry.connected_count(),
            pois: self.world.poi_count(),
            events: self.world.events_recorded(),
            measuring: self.world.is_measuring(),
        }
    }

    /// Closes every session. The returned handles let the caller wait until
    /// the close frames are written.
    pub fn close_all(&mut self) -> Vec<ConnectionHandle> {
        self.registry
            .drain()
            .into_iter()
            .map(|mut session| {
                session.close();
                session.connection().clone()
            })
            .collect()
    }

    /// Closes any remaining sessions and hands the world back for persistence.
    pub fn into_world(mut self) -> WorldState {
        self.close_all();
        self.world
    }

    fn toggle_measurement(&mut self, active: bool) -> bool {
        if !self.world.set_measuring(active) {
            return false;
        }
        let message = if active {
            ServerMessage::Start
        } else {
            ServerMessage::End
        };
        let delivered = broadcast(&self.registry, &message);
        info!(
            "Measurement {} ({} sessions notified)",
            if active { "started" } else { "ended" },
            delivered
        );
        true
    }

    /// Marks the session connected, acknowledges, then pushes the full world.
    fn complete_handshake(&mut self, id: &str) {
        let Some(session) = self.registry.get_mut(id) else {
            return;
        };
        session.mark_connected();
        info!("[{}] Handshake complete", id);

        session.reply(&ServerMessage::Connected {
            session: id.to_string(),
        });

        for (guid, record) in self.world.pois() {
            let message = ServerMessage::Poi {
                guid: guid.clone(),
                data: record.clone(),
            };
            if let Ok(text) = message.to_json() {
                session.deliver(&text);
            }
        }
        if self.world.is_measuring() {
            if let Ok(text) = ServerMessage::Start.to_json() {
                session.deliver(&text);
            }
        }
    }

    fn reject_handshake(&mut self, id: &str, rejection: Rejection) {
        let Some(mut session) = self.registry.remove(id) else {
            return;
        };
        match rejection {
            Rejection::VersionMismatch { requested } => info!(
                "[{}] Handshake refused: client version {:?}, server version {}",
                id, requested, PROTOCOL_VERSION
            ),
            Rejection::ResumptionUnsupported => {
                info!("[{}] Handshake refused: session resumption is not supported", id)
            }
        }
        session.reply(&ServerMessage::Failed {
            version: PROTOCOL_VERSION,
        });
        session.close();
    }

    /// Merges, then broadcasts the full merged record to everyone, sender included.
    fn merge_poi(&mut self, guid: &str, data: PoiData) {
        let merged = self.world.merge_poi(guid, data).clone();
        broadcast(
            &self.registry,
            &ServerMessage::Poi {
                guid: guid.to_string(),
                data: merged,
            },
        );
    }

    /// Tells the client off for not following the protocol, then hangs up.
    fn bad_llama(&mut self, id: &str, reason: &str) {
        info!("[{}] Bad Llama: {}", id, reason);

        let Some(mut session) = self.registry.remove(id) else {
            return;
        };
        session.reply(&ServerMessage::BadLlama {
            reason: reason.to_string(),
            insult: random_insult().to_string(),
        });
        session.close();
    }
}
