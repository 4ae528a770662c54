//! Per-connection protocol state machine.
//!
//! A session starts `Pending`, becomes `Connected` after a successful
//! `connect` handshake and ends `Closed`. It never goes back to `Pending`.
//!
//! [`Session::interpret`] only decides what an inbound frame means; it never
//! mutates shared state. The coordinator applies the resulting
//! [`Transition`], which keeps every validation failure free of side effects.

use crate::world::WorldState;
use log::{debug, warn};
use shared::{
    ClientMessage, Envelope, GameEvent, PoiData, ProtocolError, ServerMessage, LAT_FIELD,
    LNG_FIELD, PROTOCOL_VERSION,
};
use tokio::sync::mpsc;

/// Opaque session identifier, stable for the lifetime of the socket.
pub type SessionId = String;

/// Instructions for the task that owns the socket's write half.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close,
}

/// The session's exclusive handle on its connection.
pub type ConnectionHandle = mpsc::UnboundedSender<Outbound>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Pending,
    Connected,
    Closed,
}

/// A frame that breaks the protocol. Always fatal to the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolViolation {
    pub reason: String,
}

impl ProtocolViolation {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl From<ProtocolError> for ProtocolViolation {
    fn from(err: ProtocolError) -> Self {
        Self::new(err.to_string())
    }
}

pub const EXPECTING_CONNECT: &str = "expecting `connect`";
pub const COORDINATES_REQUIRED: &str = "`poi` data requires numeric `latE6` and `lngE6`";

/// Why a handshake was refused. Neither case is client misbehaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    VersionMismatch { requested: Option<i64> },
    ResumptionUnsupported,
}

/// The effect a well-formed frame has on the server.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Accept,
    Reject(Rejection),
    MergePoi { guid: String, data: PoiData },
    RecordEvent(GameEvent),
}

/// Server-side state for one client connection.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    state: SessionState,
    handle: ConnectionHandle,
}

impl Session {
    pub fn new(id: SessionId, handle: ConnectionHandle) -> Self {
        Self {
            id,
            state: SessionState::Pending,
            handle,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.handle
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    /// Decodes and validates one inbound frame against the current state.
    pub fn interpret(
        &self,
        frame: &str,
        world: &WorldState,
    ) -> Result<Transition, ProtocolViolation> {
        let envelope = Envelope::parse(frame)?;

        match self.state {
            SessionState::Pending => {
                if envelope.kind() != Some("connect") {
                    return Err(ProtocolViolation::new(EXPECTING_CONNECT));
                }
                match envelope.into_message()? {
                    ClientMessage::Connect { version, session } => {
                        Ok(handshake(version, session.as_deref()))
                    }
                    _ => Err(ProtocolViolation::new(EXPECTING_CONNECT)),
                }
            }
            SessionState::Connected => match envelope.into_message()? {
                ClientMessage::Poi { guid, data } => {
                    check_coordinates(world, &guid, &data)?;
                    Ok(Transition::MergePoi { guid, data })
                }
                ClientMessage::Event(event) => Ok(Transition::RecordEvent(event)),
                ClientMessage::Connect { .. } => {
                    Err(ProtocolError::UnknownType("connect".to_string()).into())
                }
            },
            SessionState::Closed => Err(ProtocolViolation::new("session is closed")),
        }
    }

    /// Completes the handshake. Only a pending session can become connected.
    pub fn mark_connected(&mut self) -> bool {
        if self.state != SessionState::Pending {
            return false;
        }
        self.state = SessionState::Connected;
        true
    }

    /// Sends a reply to this session's own frame, whatever its state.
    pub fn reply(&self, message: &ServerMessage) {
        match message.to_json() {
            Ok(text) => self.push(text),
            Err(e) => warn!("[{}] Failed to encode reply: {}", self.id, e),
        }
    }

    /// Delivers broadcast traffic. Dropped on the floor unless connected.
    pub fn deliver(&self, text: &str) -> bool {
        if !self.is_connected() {
            return false;
        }
        self.push(text.to_string());
        true
    }

    /// Releases the transport. Queued messages are flushed before the close frame.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        debug!("[{}] Going away", self.id);
        self.state = SessionState::Closed;
        let _ = self.handle.send(Outbound::Close);
    }

    fn push(&self, text: String) {
        if self.state == SessionState::Closed {
            return;
        }
        debug!("[{}] Sending: {}", self.id, text);
        if self.handle.send(Outbound::Text(text)).is_err() {
            debug!("[{}] Writer already gone, message dropped", self.id);
        }
    }
}

fn handshake(version: Option<i64>, session: Option<&str>) -> Transition {
    if version != Some(PROTOCOL_VERSION) {
        return Transition::Reject(Rejection::VersionMismatch { requested: version });
    }
    if session.is_some() {
        return Transition::Reject(Rejection::ResumptionUnsupported);
    }
    Transition::Accept
}

/// Coordinates must be numeric when present, and a new POI must carry both.
fn check_coordinates(
    world: &WorldState,
    guid: &str,
    data: &PoiData,
) -> Result<(), ProtocolViolation> {
    let known = world.poi(guid).is_some();
    for field in [LAT_FIELD, LNG_FIELD] {
        match data.get(field) {
            Some(value) if value.is_number() => {}
            None if known => {}
            _ => return Err(ProtocolViolation::new(COORDINATES_REQUIRED)),
        }
    }
    Ok(())
}
