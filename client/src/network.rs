use futures_util::{SinkExt, StreamExt};
use log::{debug, info};
use serde_json::{Map, Number, Value};
use shared::{ClientMessage, GameEvent, ServerMessage, LAT_FIELD, LNG_FIELD};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

#[derive(Debug, thiserror::Error)]
pub enum ScoutError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("handshake failed, server speaks version {version}")]
    Rejected { version: i64 },
    #[error("told off by the server: {reason} ({insult})")]
    BadLlama { reason: String, insult: String },
    #[error("connection closed by server")]
    Closed,
    #[error("unexpected message during handshake: {0:?}")]
    Unexpected(ServerMessage),
}

/// A client connection to the coordination server.
pub struct Scout {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    session: Option<String>,
}

impl Scout {
    pub async fn connect(url: &str) -> Result<Self, ScoutError> {
        info!("Connecting to {}...", url);
        let (stream, _) = connect_async(url).await?;
        Ok(Scout {
            stream,
            session: None,
        })
    }

    /// Session id assigned by the server, once the handshake succeeded.
    pub fn session(&self) -> Option<&str> {
        self.session.as_deref()
    }

    /// Sends `connect` and waits for `connected` or `failed`.
    pub async fn handshake(&mut self, version: i64) -> Result<String, ScoutError> {
        self.send(&ClientMessage::connect(version)).await?;

        match self.recv().await? {
            Some(ServerMessage::Connected { session }) => {
                info!("Connected! Session: {}", session);
                self.session = Some(session.clone());
                Ok(session)
            }
            Some(ServerMessage::Failed { version }) => Err(ScoutError::Rejected { version }),
            Some(ServerMessage::BadLlama { reason, insult }) => {
                Err(ScoutError::BadLlama { reason, insult })
            }
            Some(other) => Err(ScoutError::Unexpected(other)),
            None => Err(ScoutError::Closed),
        }
    }

    pub async fn send(&mut self, message: &ClientMessage) -> Result<(), ScoutError> {
        let text = serde_json::to_string(message)?;
        self.send_raw(&text).await
    }

    /// Sends a frame verbatim, well-formed or not.
    pub async fn send_raw(&mut self, text: &str) -> Result<(), ScoutError> {
        debug!("Sending: {}", text);
        self.stream.send(Message::Text(text.to_string())).await?;
        Ok(())
    }

    /// Reports a POI position in micro-degrees.
    pub async fn report_poi(&mut self, guid: &str, lat_e6: i64, lng_e6: i64) -> Result<(), ScoutError> {
        let mut data = Map::new();
        data.insert(LAT_FIELD.to_string(), Value::from(lat_e6));
        data.insert(LNG_FIELD.to_string(), Value::from(lng_e6));
        self.send(&ClientMessage::Poi {
            guid: guid.to_string(),
            data,
        })
        .await
    }

    /// Reports a gameplay event stamped with the current time.
    pub async fn report_event(&mut self, kind: &str, team: &str) -> Result<(), ScoutError> {
        let event = GameEvent {
            kind: kind.to_string(),
            timestamp: Number::from(timestamp_millis()),
            team: team.to_string(),
            extra: Map::new(),
        };
        self.send(&ClientMessage::Event(event)).await
    }

    /// Next message from the server, or `None` once the connection is closed.
    pub async fn recv(&mut self) -> Result<Option<ServerMessage>, ScoutError> {
        while let Some(frame) = self.stream.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    debug!("Received: {}", text);
                    return Ok(Some(serde_json::from_str(&text)?));
                }
                Ok(Message::Close(_)) => return Ok(None),
                Ok(_) => continue,
                Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                    return Ok(None)
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    pub async fn close(mut self) -> Result<(), ScoutError> {
        self.stream.close(None).await?;
        Ok(())
    }
}

fn timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}
