use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::backend::BackendClient;
use crate::connection::{
    ConnectionEvent, ConnectionManager, ConnectionSignal, ConnectionState, Connector, Endpoint,
    WsConnector,
};
use crate::protocol::{InboundMessage, OutboundMessage};
use crate::settings::EffectiveSettings;
use crate::transcript::{ConsoleView, HtmlFileView, TeeView, Transcript, TranscriptView};

/// Couples user input, the connection and the transcript.
pub struct SessionController<C: Connector, V: TranscriptView> {
    identity: String,
    input: String,
    send_enabled: bool,
    connection: ConnectionManager<C>,
    transcript: Transcript<V>,
}

impl<C: Connector, V: TranscriptView> SessionController<C, V> {
    pub fn new(connection: ConnectionManager<C>, transcript: Transcript<V>) -> Self {
        Self {
            identity: String::new(),
            input: String::new(),
            send_enabled: false,
            connection,
            transcript,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    #[cfg(test)]
    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn send_enabled(&self) -> bool {
        self.send_enabled
    }

    #[cfg(test)]
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    #[cfg(test)]
    pub fn transcript(&self) -> &Transcript<V> {
        &self.transcript
    }

    /// Tears down the current connection and, for a non-blank identity,
    /// opens a new one.
    pub fn set_identity(&mut self, identity: &str) {
        let identity = identity.trim();
        if identity == self.identity && self.connection.state() != ConnectionState::Disconnected {
            return;
        }
        self.identity = identity.to_string();
        if let Some(signal) = self.connection.close() {
            self.on_signal(signal);
        }
        if identity.is_empty() {
            info!("identity cleared; staying disconnected");
            return;
        }
        if let Err(e) = self.connection.open(identity) {
            warn!(error = %e, %identity, "cannot open connection");
        }
    }

    pub fn set_input(&mut self, text: &str) {
        self.input = text.to_string();
        self.refresh_send_enabled();
    }

    /// Returns whether a message went out.
    pub fn request_send(&mut self) -> bool {
        if self.connection.state() != ConnectionState::Connected {
            return false;
        }
        let Some(message) = OutboundMessage::new(&self.input) else {
            return false;
        };
        if let Err(e) = self.connection.send(&message) {
            warn!(error = %e, "send failed");
            return false;
        }
        self.transcript.append_user_message(&message.message);
        self.set_input("");
        self.transcript.show_typing();
        true
    }

    pub fn handle_connection_event(&mut self, event: ConnectionEvent) {
        if let Some(signal) = self.connection.handle(event) {
            self.on_signal(signal);
        }
    }

    pub fn dispatch(&mut self, value: &Value) {
        self.transcript.remove_typing();
        let message = match InboundMessage::from_value(value) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "dropping inbound message");
                return;
            }
        };
        if !message.tools_used().is_empty() {
            debug!(tools = ?message.tools_used(), "assistant used tools");
        }
        match message {
            InboundMessage::Response { text, .. } => {
                self.transcript.append_assistant_message(&text);
            }
            InboundMessage::InteractiveResponse { text, tool_executions, .. } => {
                self.transcript.append_tool_executions(&tool_executions);
                if let Some(text) = text.filter(|t| !t.is_empty()) {
                    self.transcript.append_assistant_message(&text);
                }
            }
        }
    }

    pub fn shutdown(&mut self) {
        if let Some(signal) = self.connection.shutdown() {
            self.on_signal(signal);
        }
    }

    fn on_signal(&mut self, signal: ConnectionSignal) {
        match signal {
            ConnectionSignal::Opened => self.refresh_send_enabled(),
            ConnectionSignal::Message(value) => self.dispatch(&value),
            ConnectionSignal::Closed => {
                self.send_enabled = false;
                self.transcript.remove_typing();
            }
        }
    }

    fn refresh_send_enabled(&mut self) {
        self.send_enabled = self.connection.state() == ConnectionState::Connected
            && !self.input.trim().is_empty();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Identity(String),
    Health,
    Tools,
    Clear,
    Quit,
    Message(String),
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        let (head, rest) = trimmed.split_once(char::is_whitespace).unwrap_or((trimmed, ""));
        match head {
            "/identity" => ConsoleCommand::Identity(rest.trim().to_string()),
            "/health" => ConsoleCommand::Health,
            "/tools" => ConsoleCommand::Tools,
            "/clear" => ConsoleCommand::Clear,
            "/quit" | "/exit" => ConsoleCommand::Quit,
            _ => ConsoleCommand::Message(line.to_string()),
        }
    }
}

type ConsoleSession = SessionController<WsConnector, TeeView<ConsoleView, Option<HtmlFileView>>>;

/// Interactive chat on stdin/stdout. Every event is handled on this task.
pub async fn run_console(settings: EffectiveSettings) -> anyhow::Result<()> {
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let connection = ConnectionManager::new(
        WsConnector,
        Endpoint::new(settings.origin.clone()),
        settings.reconnect_delay,
        events_tx,
    );
    let view = TeeView {
        first: ConsoleView::default(),
        second: settings.transcript.clone().map(HtmlFileView::new),
    };
    let mut session: ConsoleSession = SessionController::new(connection, Transcript::new(view));
    let backend = BackendClient::new(settings.origin.clone());

    match &settings.identity {
        Some(identity) => session.set_identity(identity),
        None => println!("set an identity with /identity <name> to connect"),
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            Some(event) = events_rx.recv() => session.handle_connection_event(event),
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match ConsoleCommand::parse(&line) {
                    ConsoleCommand::Quit => break,
                    ConsoleCommand::Identity(identity) => session.set_identity(&identity),
                    ConsoleCommand::Health => spawn_health(backend.clone()),
                    ConsoleCommand::Tools => spawn_tools(backend.clone()),
                    ConsoleCommand::Clear => spawn_clear(backend.clone(), session.identity().to_string()),
                    ConsoleCommand::Message(text) => {
                        session.set_input(&text);
                        if !session.send_enabled() && !text.trim().is_empty() {
                            println!("(not connected)");
                            continue;
                        }
                        session.request_send();
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.shutdown();
    info!("session ended");
    Ok(())
}

fn spawn_health(backend: BackendClient) {
    tokio::spawn(async move {
        match backend.health().await {
            Ok(h) => println!("health: {} {}", h.status, h.message.unwrap_or_default()),
            Err(e) => warn!(error = %e, "health check failed"),
        }
    });
}

fn spawn_tools(backend: BackendClient) {
    tokio::spawn(async move {
        match backend.tools().await {
            Ok(resp) => {
                for t in resp.tools {
                    println!("tool: {} - {}", t.name, t.description.unwrap_or_default());
                }
            }
            Err(e) => warn!(error = %e, "listing tools failed"),
        }
    });
}

fn spawn_clear(backend: BackendClient, identity: String) {
    tokio::spawn(async move {
        match backend.clear_history(&identity).await {
            Ok(resp) => println!("{}", resp.message),
            Err(e) => warn!(error = %e, "clearing history failed"),
        }
    });
}
