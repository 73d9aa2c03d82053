use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::protocol::OutboundMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Transport and timer notifications, queued for the owning event loop.
///
/// Transport events carry the generation of the link that produced them so
/// that anything emitted by a superseded link is ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Opened { generation: u64 },
    Frame { generation: u64, text: String },
    Failed { generation: u64, error: String },
    Closed { generation: u64 },
    ReconnectDue { timer: u64 },
}

impl ConnectionEvent {
    fn generation(&self) -> Option<u64> {
        match self {
            ConnectionEvent::Opened { generation }
            | ConnectionEvent::Frame { generation, .. }
            | ConnectionEvent::Failed { generation, .. }
            | ConnectionEvent::Closed { generation } => Some(*generation),
            ConnectionEvent::ReconnectDue { .. } => None,
        }
    }
}

/// What the manager reports upward after handling an event.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionSignal {
    Opened,
    Message(Value),
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("origin has no host")]
    NoHost,

    #[error("identity {0:?} is a dot path segment and cannot be addressed")]
    DotSegment(String),

    #[error("invalid endpoint url: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("not connected")]
    NotConnected,

    #[error("transport task has exited")]
    LinkGone,

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Derives transport addresses from the origin the client is served from.
#[derive(Debug, Clone)]
pub struct Endpoint {
    origin: Url,
}

impl Endpoint {
    pub fn new(origin: Url) -> Self {
        Self { origin }
    }

    /// `.` and `..` are refused: URL normalization removes them from the
    /// path (encoded or not), which would address `/ws` without an identity.
    pub fn url_for(&self, identity: &str) -> Result<Url, EndpointError> {
        if matches!(identity, "." | "..") {
            return Err(EndpointError::DotSegment(identity.to_string()));
        }
        let scheme = if self.origin.scheme() == "https" { "wss" } else { "ws" };
        let host = self.origin.host_str().ok_or(EndpointError::NoHost)?;
        let base = match self.origin.port() {
            Some(port) => format!("{scheme}://{host}:{port}/"),
            None => format!("{scheme}://{host}/"),
        };
        let mut url = Url::parse(&base)?;
        url.path_segments_mut()
            .map_err(|_| EndpointError::NoHost)?
            .clear()
            .push("ws")
            .push(identity);
        Ok(url)
    }
}

#[derive(Debug)]
pub enum LinkCommand {
    Send(String),
    Close,
}

/// Send/close capability for one transport connection.
#[derive(Debug)]
pub struct Link {
    commands: mpsc::UnboundedSender<LinkCommand>,
}

impl Link {
    pub fn new(commands: mpsc::UnboundedSender<LinkCommand>) -> Self {
        Self { commands }
    }

    pub fn send(&self, text: String) -> Result<(), SendError> {
        self.commands
            .send(LinkCommand::Send(text))
            .map_err(|_| SendError::LinkGone)
    }

    pub fn close(&self) {
        let _ = self.commands.send(LinkCommand::Close);
    }
}

pub trait Connector {
    /// Starts connecting in the background and returns immediately.
    fn connect(
        &self,
        url: &Url,
        generation: u64,
        events: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Link;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect(
        &self,
        url: &Url,
        generation: u64,
        events: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Link {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_link(url.clone(), generation, rx, events));
        Link::new(tx)
    }
}

async fn run_link(
    url: Url,
    generation: u64,
    mut commands: mpsc::UnboundedReceiver<LinkCommand>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
) {
    let connecting = connect_async(url.as_str());
    tokio::pin!(connecting);
    let ws = loop {
        tokio::select! {
            res = &mut connecting => match res {
                Ok((ws, _)) => break ws,
                Err(e) => {
                    let _ = events.send(ConnectionEvent::Failed { generation, error: e.to_string() });
                    let _ = events.send(ConnectionEvent::Closed { generation });
                    return;
                }
            },
            cmd = commands.recv() => match cmd {
                Some(LinkCommand::Send(_)) => debug!(generation, "dropping frame queued before open"),
                Some(LinkCommand::Close) | None => return,
            },
        }
    };

    let _ = events.send(ConnectionEvent::Opened { generation });
    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(ConnectionEvent::Frame { generation, text });
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = events.send(ConnectionEvent::Failed { generation, error: e.to_string() });
                    break;
                }
            },
            cmd = commands.recv() => match cmd {
                Some(LinkCommand::Send(text)) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        let _ = events.send(ConnectionEvent::Failed { generation, error: e.to_string() });
                        break;
                    }
                }
                Some(LinkCommand::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    return;
                }
            },
        }
    }
    let _ = events.send(ConnectionEvent::Closed { generation });
}

struct PendingReconnect {
    timer: u64,
    task: JoinHandle<()>,
}

/// Lifecycle of the single live connection.
///
/// All mutation happens inside `open`, `close` and `handle`, which the
/// owning event loop calls one at a time. At most one link is live and at
/// most one reconnect timer is pending.
pub struct ConnectionManager<C: Connector> {
    connector: C,
    endpoint: Endpoint,
    reconnect_delay: Duration,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    state: ConnectionState,
    identity: Option<String>,
    generation: u64,
    link: Option<Link>,
    next_timer: u64,
    pending: Option<PendingReconnect>,
}

impl<C: Connector> ConnectionManager<C> {
    pub fn new(
        connector: C,
        endpoint: Endpoint,
        reconnect_delay: Duration,
        events: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Self {
        Self {
            connector,
            endpoint,
            reconnect_delay,
            events,
            state: ConnectionState::Disconnected,
            identity: None,
            generation: 0,
            link: None,
            next_timer: 0,
            pending: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[cfg(test)]
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    #[cfg(test)]
    pub fn has_pending_reconnect(&self) -> bool {
        self.pending.is_some()
    }

    /// Blank identities are ignored. A live link is dropped without a
    /// `Closed` signal; call `close` first to observe it.
    pub fn open(&mut self, identity: &str) -> Result<(), EndpointError> {
        if identity.trim().is_empty() {
            return Ok(());
        }
        let url = self.endpoint.url_for(identity)?;
        self.teardown();
        self.generation += 1;
        self.identity = Some(identity.to_string());
        self.state = ConnectionState::Connecting;
        info!(%url, generation = self.generation, "connecting");
        self.link = Some(self.connector.connect(&url, self.generation, self.events.clone()));
        Ok(())
    }

    /// Caller-initiated close. Never schedules a reconnect.
    pub fn close(&mut self) -> Option<ConnectionSignal> {
        self.teardown();
        self.generation += 1;
        if self.state != ConnectionState::Disconnected {
            info!(identity = ?self.identity, "connection closed by client");
        }
        self.mark_disconnected()
    }

    /// Closes and forgets the identity so nothing can resurrect the session.
    pub fn shutdown(&mut self) -> Option<ConnectionSignal> {
        let signal = self.close();
        self.identity = None;
        signal
    }

    pub fn send(&self, payload: &OutboundMessage) -> Result<(), SendError> {
        if self.state != ConnectionState::Connected {
            return Err(SendError::NotConnected);
        }
        let link = self.link.as_ref().ok_or(SendError::NotConnected)?;
        link.send(payload.to_wire()?)
    }

    pub fn handle(&mut self, event: ConnectionEvent) -> Option<ConnectionSignal> {
        if let Some(generation) = event.generation() {
            if generation != self.generation {
                debug!(generation, current = self.generation, "ignoring event from stale connection");
                return None;
            }
        }

        match event {
            ConnectionEvent::ReconnectDue { timer } => {
                self.on_reconnect_due(timer);
                None
            }
            ConnectionEvent::Opened { .. } => {
                self.state = ConnectionState::Connected;
                info!(identity = ?self.identity, "connected");
                Some(ConnectionSignal::Opened)
            }
            ConnectionEvent::Frame { text, .. } => match serde_json::from_str::<Value>(&text) {
                Ok(value) => {
                    debug!(bytes = text.len(), "frame received");
                    Some(ConnectionSignal::Message(value))
                }
                Err(e) => {
                    warn!(error = %e, "dropping unparseable frame");
                    None
                }
            },
            ConnectionEvent::Failed { error, .. } => {
                warn!(%error, "transport error");
                self.mark_disconnected()
            }
            ConnectionEvent::Closed { .. } => {
                self.link = None;
                let signal = self.mark_disconnected();
                self.schedule_reconnect();
                signal
            }
        }
    }

    fn on_reconnect_due(&mut self, timer: u64) {
        if !self.pending.as_ref().is_some_and(|p| p.timer == timer) {
            debug!(timer, "stale reconnect timer");
            return;
        }
        self.pending = None;
        if self.state == ConnectionState::Connected {
            return;
        }
        if let Some(identity) = self.identity.clone() {
            info!(%identity, "reconnecting");
            if let Err(e) = self.open(&identity) {
                warn!(error = %e, "reconnect failed");
            }
        }
    }

    fn mark_disconnected(&mut self) -> Option<ConnectionSignal> {
        if self.state == ConnectionState::Disconnected {
            return None;
        }
        self.state = ConnectionState::Disconnected;
        Some(ConnectionSignal::Closed)
    }

    fn schedule_reconnect(&mut self) {
        if self.identity.is_none() {
            return;
        }
        self.cancel_reconnect();
        self.next_timer += 1;
        let timer = self.next_timer;
        let delay = self.reconnect_delay;
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(ConnectionEvent::ReconnectDue { timer });
        });
        info!(delay_ms = delay.as_millis() as u64, "reconnect scheduled");
        self.pending = Some(PendingReconnect { timer, task });
    }

    fn cancel_reconnect(&mut self) {
        if let Some(p) = self.pending.take() {
            p.task.abort();
        }
    }

    fn teardown(&mut self) {
        self.cancel_reconnect();
        if let Some(link) = self.link.take() {
            link.close();
        }
    }
}

impl<C: Connector> Drop for ConnectionManager<C> {
    fn drop(&mut self) {
        self.teardown();
    }
}
