//! Wire protocol shared by the POI minigame server and its clients.
//!
//! Every WebSocket text frame carries exactly one JSON object whose `msg`
//! field names the message type. Outbound server messages are a plain serde
//! tagged union. Inbound client messages go through [`Envelope`] first so the
//! server can look at the declared type before deciding which fields it
//! requires, which keeps the handshake ordering rules out of serde.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// Protocol revision spoken by this server. Revision 2 requires coordinates on POIs.
pub const PROTOCOL_VERSION: i64 = 2;
pub const DEFAULT_PORT: u16 = 6543;

pub const LAT_FIELD: &str = "latE6";
pub const LNG_FIELD: &str = "lngE6";

/// Open-ended POI attributes. Unknown fields are carried through untouched.
pub type PoiData = Map<String, Value>;

/// Messages sent from the server to a client.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "msg", rename_all = "camelCase")]
pub enum ServerMessage {
    Connected { session: String },
    Failed { version: i64 },
    Poi { guid: String, data: PoiData },
    Start,
    End,
    BadLlama { reason: String, insult: String },
}

impl ServerMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// A gameplay event reported by a client.
///
/// Fields beyond `type`, `timestamp` and `team` are kept in `extra` so the
/// event can be logged as the client sent it.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct GameEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: Number,
    pub team: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Messages sent from a client to the server.
#[derive(Debug, Serialize, Clone, PartialEq)]
#[serde(tag = "msg", rename_all = "camelCase")]
pub enum ClientMessage {
    Connect {
        /// `None` when the client sent no integer version at all.
        #[serde(skip_serializing_if = "Option::is_none")]
        version: Option<i64>,
        /// Resumption token. Empty strings and `null` are normalised to `None`.
        #[serde(skip_serializing_if = "Option::is_none")]
        session: Option<String>,
    },
    Poi {
        guid: String,
        data: PoiData,
    },
    Event(GameEvent),
}

impl ClientMessage {
    pub fn connect(version: i64) -> Self {
        ClientMessage::Connect {
            version: Some(version),
            session: None,
        }
    }
}

/// Why an inbound frame could not be turned into a [`ClientMessage`].
///
/// The `Display` text is the reason string reported back to the client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("failed to decode message")]
    Decode,
    #[error("unknown or unexpected message type `{0}`")]
    UnknownType(String),
    #[error("{0}")]
    Schema(&'static str),
}

pub const POI_SCHEMA: &str = "expecting `guid` to be string and `data` to be an object";
pub const EVENT_SCHEMA: &str = "`event` requires `type`, `timestamp`, and `team`";
pub const SESSION_SCHEMA: &str = "expecting `session` to be a string";

/// JSON numbers compare by value, so `2.0` is the same version as `2`.
fn integral(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
            .map(|f| f as i64)
    })
}

/// A decoded JSON object whose type tag has been split off but whose
/// fields have not been validated yet.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    kind: Option<String>,
    fields: Map<String, Value>,
}

impl Envelope {
    /// Decodes one frame. Anything other than a JSON object is a decode failure.
    pub fn parse(frame: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(frame).map_err(|_| ProtocolError::Decode)?;
        let Value::Object(mut fields) = value else {
            return Err(ProtocolError::Decode);
        };

        let kind = match fields.remove("msg") {
            Some(Value::String(kind)) => Some(kind),
            _ => None,
        };

        Ok(Self { kind, fields })
    }

    /// The declared message type, if the `msg` field was a string.
    pub fn kind(&self) -> Option<&str> {
        self.kind.as_deref()
    }

    /// Validates the required fields for the declared type.
    pub fn into_message(mut self) -> Result<ClientMessage, ProtocolError> {
        match self.kind.as_deref() {
            Some("connect") => {
                let version = self.fields.get("version").and_then(integral);
                let session = match self.fields.remove("session") {
                    None | Some(Value::Null) => None,
                    Some(Value::String(token)) if token.is_empty() => None,
                    Some(Value::String(token)) => Some(token),
                    Some(_) => return Err(ProtocolError::Schema(SESSION_SCHEMA)),
                };
                Ok(ClientMessage::Connect { version, session })
            }
            Some("poi") => match (self.fields.remove("guid"), self.fields.remove("data")) {
                (Some(Value::String(guid)), Some(Value::Object(data))) => {
                    Ok(ClientMessage::Poi { guid, data })
                }
                _ => Err(ProtocolError::Schema(POI_SCHEMA)),
            },
            Some("event") => {
                let kind = self.fields.remove("type");
                let timestamp = self.fields.remove("timestamp");
                let team = self.fields.remove("team");
                match (kind, timestamp, team) {
                    (
                        Some(Value::String(kind)),
                        Some(Value::Number(timestamp)),
                        Some(Value::String(team)),
                    ) => Ok(ClientMessage::Event(GameEvent {
                        kind,
                        timestamp,
                        team,
                        extra: self.fields,
                    })),
                    _ => Err(ProtocolError::Schema(EVENT_SCHEMA)),
                }
            }
            other => Err(ProtocolError::UnknownType(
                other.unwrap_or_default().to_string(),
            )),
        }
    }
}
