//! Peer transport: one newline-terminated message per TCP connection
//!
//! The server accepts connections sequentially: read a single line, hand it
//! to the owner through the event channel, write a newline acknowledgment,
//! close, accept the next. The client connects, sends one message, waits
//! for the acknowledgment and closes. One message per connection keeps the
//! framing trivial; newline is the only delimiter.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::TransportError;

/// Well-known listening port for peer exchange.
pub const DEFAULT_PORT: u16 = 10001;

/// Acknowledgment wait before a send is reported as timed out.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(15);

/// Capacity of the server's inbound event channel.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Network address of a peer on the local radio network.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PeerAddress(String);

impl PeerAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The connectable endpoint; a bare host gets the default port.
    pub fn endpoint(&self) -> String {
        if self.0.contains(':') {
            self.0.clone()
        } else {
            format!("{}:{}", self.0, DEFAULT_PORT)
        }
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerAddress({})", self.0)
    }
}

impl From<SocketAddr> for PeerAddress {
    fn from(addr: SocketAddr) -> Self {
        Self(addr.to_string())
    }
}

impl From<&str> for PeerAddress {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Events delivered by the server role to its owner.
#[derive(Debug)]
pub enum PeerEvent {
    /// A complete message was read from an accepted connection.
    MessageReceived(String),
    /// The accept loop has exited (stop requested or listener closed).
    Stopped,
}

/// The listening role. Owns the accept loop task.
pub struct PeerServer {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl PeerServer {
    /// Bind the listening socket and spawn the accept loop.
    ///
    /// A bind failure is fatal to the server role and surfaces here.
    pub async fn start(
        port: u16,
    ) -> Result<(Self, mpsc::Receiver<PeerEvent>), TransportError> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|e| TransportError::BindFailed { port, source: e })?;
        let local_addr = listener.local_addr().map_err(TransportError::AcceptFailed)?;

        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(accept_loop(listener, event_tx, shutdown_rx));

        tracing::info!("peer server listening on {}", local_addr);
        Ok((
            Self {
                local_addr,
                shutdown,
                task: Some(task),
            },
            event_rx,
        ))
    }

    /// The bound address (useful when started on an ephemeral port).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop the accept loop. Idempotent; interrupts a blocked accept.
    pub async fn stop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
            tracing::info!("peer server on {} stopped", self.local_addr);
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    events: mpsc::Sender<PeerEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                // A dropped sender means the owning PeerServer is gone;
                // exit so the listener is released.
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        // Connections are handled sequentially; the next
                        // accept waits until this one is acknowledged.
                        if let Err(e) = handle_connection(stream, &events).await {
                            tracing::warn!("connection from {} failed: {}", peer, e);
                        }
                    }
                    Err(e) => {
                        tracing::warn!("accept failed: {}", e);
                    }
                }
            }
        }
    }
    let _ = events.send(PeerEvent::Stopped).await;
}

async fn handle_connection(
    stream: TcpStream,
    events: &mpsc::Sender<PeerEvent>,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n > 0 {
        let message = line.trim_end_matches(['\r', '\n']).to_string();
        tracing::debug!("received {} byte message", message.len());
        let _ = events.send(PeerEvent::MessageReceived(message)).await;
    }

    write_half.write_all(b"\n").await?;
    write_half.shutdown().await?;
    Ok(())
}

/// The outbound role: one connection, one message, one acknowledgment.
pub struct PeerClient {
    stream: Option<TcpStream>,
    addr: PeerAddress,
    send_timeout: Duration,
}

impl PeerClient {
    /// Connect to a peer. Unreachable and refused hosts report
    /// [`TransportError::ConnectFailed`].
    pub async fn connect(addr: &PeerAddress) -> Result<Self, TransportError> {
        let endpoint = addr.endpoint();
        let stream = TcpStream::connect(&endpoint)
            .await
            .map_err(|e| TransportError::ConnectFailed {
                addr: endpoint.clone(),
                source: e,
            })?;
        tracing::debug!("connected to peer {}", endpoint);
        Ok(Self {
            stream: Some(stream),
            addr: addr.clone(),
            send_timeout: DEFAULT_SEND_TIMEOUT,
        })
    }

    pub fn set_send_timeout(&mut self, timeout: Duration) {
        self.send_timeout = timeout;
    }

    pub fn peer_addr(&self) -> &PeerAddress {
        &self.addr
    }

    /// Write the message plus newline, wait for the acknowledgment line,
    /// then close. The connection is consumed whether or not the send
    /// succeeds; there is no auto-retry.
    pub async fn send(&mut self, message: &str) -> Result<(), TransportError> {
        if message.contains('\n') {
            return Err(TransportError::SendFailed(
                "message must not contain a newline".to_string(),
            ));
        }

        let stream = self
            .stream
            .take()
            .ok_or_else(|| TransportError::SendFailed("not connected".to_string()))?;
        let (read_half, mut write_half) = stream.into_split();

        let mut framed = Vec::with_capacity(message.len() + 1);
        framed.extend_from_slice(message.as_bytes());
        framed.push(b'\n');
        write_half
            .write_all(&framed)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        write_half
            .flush()
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        let mut reader = BufReader::new(read_half);
        let mut ack = String::new();
        let read = tokio::time::timeout(self.send_timeout, reader.read_line(&mut ack))
            .await
            .map_err(|_| TransportError::Timeout(self.send_timeout))?
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        if read == 0 {
            return Err(TransportError::SendFailed(
                "connection closed before acknowledgment".to_string(),
            ));
        }

        tracing::debug!("message acknowledged by {}", self.addr);
        Ok(())
    }

    /// Drop the connection if still open. Idempotent.
    pub fn disconnect(&mut self) {
        self.stream = None;
    }
}

/// Owner of one optional server and one optional outbound connection,
/// the process-wide transport lifecycle.
pub struct PeerComms {
    port: u16,
    send_timeout: Duration,
    server: Option<PeerServer>,
    client: Option<PeerClient>,
}

impl PeerComms {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            server: None,
            client: None,
        }
    }

    /// Acknowledgment timeout applied to subsequently established
    /// connections.
    pub fn set_send_timeout(&mut self, timeout: Duration) {
        self.send_timeout = timeout;
    }

    /// Start (or restart) the server role, yielding its event stream.
    pub async fn start_server(
        &mut self,
    ) -> Result<mpsc::Receiver<PeerEvent>, TransportError> {
        self.stop_server().await;
        let (server, events) = PeerServer::start(self.port).await?;
        self.server = Some(server);
        Ok(events)
    }

    /// The bound listener address, when the server role is running.
    pub fn server_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().map(PeerServer::local_addr)
    }

    pub async fn stop_server(&mut self) {
        if let Some(mut server) = self.server.take() {
            server.stop().await;
        }
    }

    /// Establish the outbound connection used by the next [`send`].
    ///
    /// [`send`]: PeerComms::send
    pub async fn connect(&mut self, addr: &PeerAddress) -> Result<(), TransportError> {
        let mut client = PeerClient::connect(addr).await?;
        client.set_send_timeout(self.send_timeout);
        self.client = Some(client);
        Ok(())
    }

    /// Send one message over the established connection.
    pub async fn send(&mut self, message: &str) -> Result<(), TransportError> {
        let mut client = self
            .client
            .take()
            .ok_or_else(|| TransportError::SendFailed("not connected to any peer".to_string()))?;
        client.send(message).await
    }

    pub fn disconnect(&mut self) {
        if let Some(mut client) = self.client.take() {
            client.disconnect();
        }
    }

    /// Stop the server and drop any open client connection.
    pub async fn cleanup(&mut self) {
        self.stop_server().await;
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn start_test_server() -> (PeerServer, mpsc::Receiver<PeerEvent>, PeerAddress) {
        let (server, events) = PeerServer::start(0).await.unwrap();
        let addr = PeerAddress::new(format!("127.0.0.1:{}", server.local_addr().port()));
        (server, events, addr)
    }

    #[tokio::test]
    async fn test_send_and_receive_one_message() {
        let (mut server, mut events, addr) = start_test_server().await;

        let mut client = PeerClient::connect(&addr).await.unwrap();
        client.send("hello peer").await.unwrap();

        match events.recv().await.unwrap() {
            PeerEvent::MessageReceived(msg) => assert_eq!(msg, "hello peer"),
            other => panic!("unexpected event: {other:?}"),
        }

        server.stop().await;
    }

    #[tokio::test]
    async fn test_sequential_messages_new_connection_each() {
        let (mut server, mut events, addr) = start_test_server().await;

        for i in 0..3 {
            let mut client = PeerClient::connect(&addr).await.unwrap();
            client.send(&format!("message {i}")).await.unwrap();
        }

        for i in 0..3 {
            match events.recv().await.unwrap() {
                PeerEvent::MessageReceived(msg) => assert_eq!(msg, format!("message {i}")),
                other => panic!("unexpected event: {other:?}"),
            }
        }

        server.stop().await;
    }

    #[tokio::test]
    async fn test_connect_refused_reports_connect_failed() {
        // Bind then drop so the port is (momentarily) closed.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = PeerAddress::from(listener.local_addr().unwrap());
        drop(listener);

        match PeerClient::connect(&addr).await {
            Err(TransportError::ConnectFailed { .. }) => {}
            Err(other) => panic!("expected ConnectFailed, got {other:?}"),
            Ok(_) => panic!("expected ConnectFailed, got a connection"),
        }
    }

    #[tokio::test]
    async fn test_send_without_connection_fails() {
        let mut comms = PeerComms::new(0);
        match comms.send("orphan message").await {
            Err(TransportError::SendFailed(_)) => {}
            other => panic!("expected SendFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_message_with_newline_rejected() {
        let (mut server, _events, addr) = start_test_server().await;

        let mut client = PeerClient::connect(&addr).await.unwrap();
        match client.send("two\nlines").await {
            Err(TransportError::SendFailed(_)) => {}
            other => panic!("expected SendFailed, got {other:?}"),
        }

        server.stop().await;
    }

    #[tokio::test]
    async fn test_dropped_server_releases_listener() {
        let (server, mut events) = PeerServer::start(0).await.unwrap();
        let addr = PeerAddress::new(format!("127.0.0.1:{}", server.local_addr().port()));

        drop(server);

        // The accept loop notices the owner is gone and exits.
        match events.recv().await {
            Some(PeerEvent::Stopped) => {}
            other => panic!("expected Stopped, got {other:?}"),
        }
        // Stopped is sent just before the task returns; give the listener
        // a moment to actually close.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(PeerClient::connect(&addr).await.is_err());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_prompt() {
        let (mut server, mut events, _addr) = start_test_server().await;

        server.stop().await;
        server.stop().await;

        match events.recv().await {
            Some(PeerEvent::Stopped) => {}
            other => panic!("expected Stopped, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_comms_lifecycle() {
        let mut comms = PeerComms::new(0);
        let mut events = comms.start_server().await.unwrap();
        let port = comms.server_addr().unwrap().port();
        let addr = PeerAddress::new(format!("127.0.0.1:{port}"));

        comms.connect(&addr).await.unwrap();
        comms.send("via comms").await.unwrap();

        match events.recv().await.unwrap() {
            PeerEvent::MessageReceived(msg) => assert_eq!(msg, "via comms"),
            other => panic!("unexpected event: {other:?}"),
        }

        comms.cleanup().await;
        comms.cleanup().await;
    }
}
