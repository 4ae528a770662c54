//! Server network layer: WebSocket transport and the coordinator event loop

use crate::config::ServerConfig;
use crate::coordinator::{Coordinator, Stats};
use crate::error::ServerError;
use crate::session::{ConnectionHandle, Outbound, SessionId};
use crate::world::WorldState;
use futures_util::future::join_all;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_rustls::rustls::crypto::ring;
use tokio_rustls::rustls::ServerConfig as TlsConfig;
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

/// How long shutdown waits for close frames to reach the clients
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Messages sent from connection tasks and operators to the coordinator loop
#[derive(Debug)]
pub enum ServerEvent {
    Opened {
        handle: ConnectionHandle,
        assigned: oneshot::Sender<SessionId>,
    },
    Frame {
        session_id: SessionId,
        text: String,
    },
    /// A binary frame that is not valid UTF-8
    Undecodable {
        session_id: SessionId,
    },
    Closed {
        session_id: SessionId,
    },
    Measurement {
        active: bool,
        changed: oneshot::Sender<bool>,
    },
    Status {
        reply: oneshot::Sender<Stats>,
    },
    Shutdown,
}

/// Cloneable handle for talking to a running server
#[derive(Debug, Clone)]
pub struct ServerHandle {
    events: mpsc::UnboundedSender<ServerEvent>,
}

impl ServerHandle {
    /// Returns whether the flag changed, or `None` if the server is gone.
    pub async fn start_measurement(&self) -> Option<bool> {
        self.set_measurement(true).await
    }

    /// Returns whether the flag changed, or `None` if the server is gone.
    pub async fn end_measurement(&self) -> Option<bool> {
        self.set_measurement(false).await
    }

    pub async fn stats(&self) -> Option<Stats> {
        let (reply, rx) = oneshot::channel();
        self.events.send(ServerEvent::Status { reply }).ok()?;
        rx.await.ok()
    }

    pub fn shutdown(&self) {
        if self.events.send(ServerEvent::Shutdown).is_err() {
            debug!("Shutdown requested but server loop already stopped");
        }
    }

    async fn set_measurement(&self, active: bool) -> Option<bool> {
        let (changed, rx) = oneshot::channel();
        self.events
            .send(ServerEvent::Measurement { active, changed })
            .ok()?;
        rx.await.ok()
    }
}

/// Loads a TLS acceptor from PEM certificate chain and private key files
pub fn load_tls(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, ServerError> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(File::open(cert_path)?))
        .collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(ServerError::Tls(format!(
            "no certificates found in {}",
            cert_path.display()
        )));
    }

    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key_path)?))?
        .ok_or_else(|| {
            ServerError::Tls(format!("no private key found in {}", key_path.display()))
        })?;

    let config = TlsConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()
        .map_err(|e| ServerError::Tls(e.to_string()))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| ServerError::Tls(e.to_string()))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Coordination server: accepts connections and runs the coordinator loop
pub struct Server {
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    coordinator: Coordinator,

    events_tx: mpsc::UnboundedSender<ServerEvent>,
    events_rx: mpsc::UnboundedReceiver<ServerEvent>,
}

impl Server {
    pub async fn bind(config: &ServerConfig, world: WorldState) -> Result<Self, ServerError> {
        let tls = match config.tls_files() {
            Some((cert, key)) => Some(load_tls(cert, key)?),
            None => None,
        };

        let listener = TcpListener::bind(config.address()).await?;
        info!(
            "Server listening on {} ({})",
            listener.local_addr()?,
            if tls.is_some() { "wss" } else { "ws" }
        );

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Ok(Server {
            listener,
            tls,
            coordinator: Coordinator::new(world),
            events_tx,
            events_rx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            events: self.events_tx.clone(),
        }
    }

    /// Runs until a shutdown is requested, then returns the world for saving.
    pub async fn run(self) -> WorldState {
        let Server {
            listener,
            tls,
            mut coordinator,
            events_tx,
            mut events_rx,
        } = self;

        let acceptor = tokio::spawn(accept_loop(listener, tls, events_tx));
        info!("Server started successfully");

        while let Some(event) = events_rx.recv().await {
            match event {
                ServerEvent::Opened { handle, assigned } => {
                    let id = coordinator.open_session(handle);
                    if assigned.send(id.clone()).is_err() {
                        coordinator.close_session(&id);
                    }
                }
                ServerEvent::Frame { session_id, text } => {
                    coordinator.handle_frame(&session_id, &text);
                }
                ServerEvent::Undecodable { session_id } => {
                    coordinator.handle_undecodable(&session_id);
                }
                ServerEvent::Closed { session_id } => {
                    coordinator.close_session(&session_id);
                }
                ServerEvent::Measurement { active, changed } => {
                    let result = if active {
                        coordinator.start_measurement()
                    } else {
                        coordinator.end_measurement()
                    };
                    let _ = changed.send(result);
                }
                ServerEvent::Status { reply } => {
                    let _ = reply.send(coordinator.stats());
                }
                ServerEvent::Shutdown => {
                    info!("Server shutting down");
                    break;
                }
            }
        }

        acceptor.abort();
        flush_writers(coordinator.close_all()).await;
        coordinator.into_world()
    }
}

/// Waits for every writer task to send its close frame and let go of its queue
async fn flush_writers(handles: Vec<ConnectionHandle>) {
    if handles.is_empty() {
        return;
    }
    let count = handles.len();
    let drained = join_all(handles.iter().map(|handle| handle.closed()));
    match tokio::time::timeout(SHUTDOWN_GRACE, drained).await {
        Ok(_) => debug!("Closed {} connections", count),
        Err(_) => warn!("Gave up waiting for {} connections to close", count),
    }
}

/// Accepts TCP connections and spawns a task per connection
async fn accept_loop(
    listener: TcpListener,
    tls: Option<TlsAcceptor>,
    events: mpsc::UnboundedSender<ServerEvent>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!("New connection from {}", addr);
                let tls = tls.clone();
                let events = events.clone();

                tokio::spawn(async move {
                    let result = match tls {
                        Some(acceptor) => match acceptor.accept(stream).await {
                            Ok(stream) => serve_connection(stream, addr, events).await,
                            Err(e) => Err(ServerError::Io(e)),
                        },
                        None => serve_connection(stream, addr, events).await,
                    };
                    if let Err(e) = result {
                        warn!("Connection from {} ended with error: {}", addr, e);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {}", e);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }
}

/// Drives one WebSocket: frames in go to the coordinator in arrival order,
/// the session's outbound queue drains into the socket.
async fn serve_connection<S>(
    stream: S,
    addr: SocketAddr,
    events: mpsc::UnboundedSender<ServerEvent>,
) -> Result<(), ServerError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let ws = accept_async(stream).await?;
    let (mut sink, mut source) = ws.split();

    let (handle, mut outbound) = mpsc::unbounded_channel::<Outbound>();
    let (assigned, assigned_rx) = oneshot::channel();
    events
        .send(ServerEvent::Opened { handle, assigned })
        .map_err(|_| ServerError::ShuttingDown)?;
    let session_id = assigned_rx.await.map_err(|_| ServerError::ShuttingDown)?;
    debug!("[{}] Connected from {}", session_id, addr);

    tokio::spawn(async move {
        while let Some(out) = outbound.recv().await {
            match out {
                Outbound::Text(text) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        debug!("Failed to write to {}: {}", addr, e);
                        break;
                    }
                }
                Outbound::Close => break,
            }
        }
        // Sends the close frame if the peer has not closed first
        let _ = sink.close().await;
    });

    while let Some(frame) = source.next().await {
        let frame_event = match frame {
            Ok(Message::Text(text)) => ServerEvent::Frame {
                session_id: session_id.clone(),
                text,
            },
            Ok(Message::Binary(data)) => match String::from_utf8(data) {
                Ok(text) => ServerEvent::Frame {
                    session_id: session_id.clone(),
                    text,
                },
                Err(_) => ServerEvent::Undecodable {
                    session_id: session_id.clone(),
                },
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!("[{}] Transport error: {}", session_id, e);
                break;
            }
        };
        if events.send(frame_event).is_err() {
            break;
        }
    }

    let _ = events.send(ServerEvent::Closed { session_id });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::ServerMessage;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use tokio::net::TcpStream;
    use tokio::task::JoinHandle;
    use tokio::time::timeout;
    use tokio_rustls::rustls::pki_types::ServerName;
    use tokio_rustls::rustls::{ClientConfig, RootCertStore};
    use tokio_rustls::TlsConnector;
    use tokio_tungstenite::{client_async, connect_async, WebSocketStream};

    const FIXTURE_CERT: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/fixtures/cert.pem");
    const FIXTURE_KEY: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/fixtures/key.pem");
    const CONNECT: &str = r#"{"msg":"connect","version":2}"#;

    fn test_config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            cert: None,
            key: None,
            state_file: "state.json".into(),
            game_type: "measurement".to_string(),
            no_console: true,
        }
    }

    async fn start(config: ServerConfig) -> (SocketAddr, ServerHandle, JoinHandle<WorldState>) {
        let server = Server::bind(&config, WorldState::new("measurement"))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let handle = server.handle();
        (addr, handle, tokio::spawn(server.run()))
    }

    async fn next_message<S>(ws: &mut WebSocketStream<S>) -> ServerMessage
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        loop {
            let frame = timeout(Duration::from_secs(2), ws.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            if let Message::Text(text) = frame {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    #[test]
    fn test_load_tls_missing_file() {
        let result = load_tls(Path::new("/nonexistent/cert.pem"), Path::new("/nonexistent/key.pem"));
        assert!(matches!(result, Err(ServerError::Io(_))));
    }

    #[test]
    fn test_load_tls_without_certificates() {
        let mut cert = NamedTempFile::new().unwrap();
        writeln!(cert, "not a certificate").unwrap();
        let key = NamedTempFile::new().unwrap();

        let result = load_tls(cert.path(), key.path());
        assert!(matches!(result, Err(ServerError::Tls(_))));
    }

    #[test]
    fn test_load_tls_fixture_pair() {
        assert!(load_tls(Path::new(FIXTURE_CERT), Path::new(FIXTURE_KEY)).is_ok());
    }

    #[tokio::test]
    async fn test_handshake_over_tls() {
        let (addr, handle, task) = start(ServerConfig {
            cert: Some(FIXTURE_CERT.into()),
            key: Some(FIXTURE_KEY.into()),
            ..test_config()
        })
        .await;

        let mut roots = RootCertStore::empty();
        for cert in rustls_pemfile::certs(&mut BufReader::new(File::open(FIXTURE_CERT).unwrap())) {
            roots.add(cert.unwrap()).unwrap();
        }
        let client_config = ClientConfig::builder_with_provider(Arc::new(ring::default_provider()))
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(client_config));

        let tcp = TcpStream::connect(addr).await.unwrap();
        let tls = connector
            .connect(ServerName::try_from("localhost").unwrap(), tcp)
            .await
            .unwrap();
        let (mut ws, _) = client_async(format!("wss://localhost:{}", addr.port()), tls)
            .await
            .unwrap();

        ws.send(Message::Text(CONNECT.to_string())).await.unwrap();
        match next_message(&mut ws).await {
            ServerMessage::Connected { session } => assert_eq!(session.len(), 9),
            other => panic!("Unexpected message {:?}", other),
        }
        assert_eq!(handle.stats().await.unwrap().connected, 1);

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_binary_frames() {
        let (addr, handle, task) = start(test_config()).await;
        let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();

        ws.send(Message::Binary(CONNECT.as_bytes().to_vec()))
            .await
            .unwrap();
        assert!(matches!(
            next_message(&mut ws).await,
            ServerMessage::Connected { .. }
        ));

        // Valid JSON apart from one byte that is not UTF-8
        let frame = [
            &br#"{"msg":"poi","guid":"g"#[..],
            &[0xffu8][..],
            &br#"","data":{"latE6":1,"lngE6":2}}"#[..],
        ]
        .concat();
        ws.send(Message::Binary(frame)).await.unwrap();
        match next_message(&mut ws).await {
            ServerMessage::BadLlama { reason, .. } => assert_eq!(reason, "failed to decode message"),
            other => panic!("Unexpected message {:?}", other),
        }

        let stats = handle.stats().await.unwrap();
        assert_eq!(stats.pois, 0);
        assert_eq!(stats.sessions, 0);

        handle.shutdown();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_sends_close_frame() {
        let (addr, handle, task) = start(test_config()).await;
        let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
        ws.send(Message::Text(CONNECT.to_string())).await.unwrap();
        next_message(&mut ws).await;

        handle.shutdown();
        task.await.unwrap();

        let frame = timeout(Duration::from_secs(2), ws.next()).await.unwrap();
        assert!(matches!(frame, Some(Ok(Message::Close(_)))));
    }

    #[tokio::test]
    async fn test_handle_after_shutdown() {
        let (_, handle, task) = start(test_config()).await;

        assert_eq!(handle.start_measurement().await, Some(true));
        assert_eq!(handle.start_measurement().await, Some(false));
        let stats = handle.stats().await.unwrap();
        assert!(stats.measuring);
        assert_eq!(stats.sessions, 0);

        handle.shutdown();
        let world = task.await.unwrap();
        assert!(world.is_measuring());
        assert_eq!(handle.stats().await, None);
    }
}
