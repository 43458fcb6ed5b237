use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep};
use tracing::{debug, info, warn};
use url::Url;

use crate::client::{ChatEntry, SessionView};
use crate::protocol::{self, ClientMessage, ServerMessage};
use crate::terminal::StreamRenderer;
use crate::transport::{Connector, EventReceiver, Readiness, Transport, TransportEvent};

use super::{
    ConnEvent, ConnectionState, DisplayName, Effect, HEARTBEAT_INTERVAL, RECONNECT_DELAY, Session,
    transition,
};

#[derive(Clone, Debug)]
pub struct ManagerConfig {
    pub endpoint: Url,
    pub heartbeat_interval: Duration,
    pub reconnect_delay: Duration,
}

impl ManagerConfig {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            reconnect_delay: RECONNECT_DELAY,
        }
    }

    pub fn with_heartbeat_interval(mut self, heartbeat_interval: Duration) -> Self {
        self.heartbeat_interval = heartbeat_interval;
        self
    }

    pub fn with_reconnect_delay(mut self, reconnect_delay: Duration) -> Self {
        self.reconnect_delay = reconnect_delay;
        self
    }
}

/// Operations the rest of the program may ask of the manager.
enum Op {
    SendCommand(String),
    SendChat(String),
    VisibilityCheck,
    Shutdown,
}

/// Internal events feeding the state machine, all funnelled through one
/// channel so they are applied in arrival order.
enum Internal {
    Dialed {
        generation: u64,
        transport: Arc<dyn Transport>,
        events: EventReceiver,
    },
    Transport {
        generation: u64,
        event: TransportEvent,
    },
    HeartbeatLost {
        generation: u64,
    },
    ReconnectElapsed,
}

/// Cheap cloneable handle; all methods are fire-and-forget.
#[derive(Clone)]
pub struct ManagerHandle {
    ops: mpsc::UnboundedSender<Op>,
}

impl ManagerHandle {
    pub fn send_command(&self, text: impl Into<String>) {
        let _ = self.ops.send(Op::SendCommand(text.into()));
    }

    pub fn send_chat(&self, text: impl Into<String>) {
        let _ = self.ops.send(Op::SendChat(text.into()));
    }

    /// The host environment became visible again; the manager re-checks the
    /// transport instead of waiting for the next heartbeat tick.
    pub fn notify_visible(&self) {
        let _ = self.ops.send(Op::VisibilityCheck);
    }

    pub fn shutdown(&self) {
        let _ = self.ops.send(Op::Shutdown);
    }
}

/// Supervises the transport: dials, watches liveness, reconnects with a
/// bounded number of attempts, and dispatches inbound frames to the
/// renderer and the view. Every dial gets a generation number; events
/// tagged with an older generation are discarded so a lingering socket
/// cannot double-drive the state machine.
pub struct ConnectionManager {
    session: Session,
    config: ManagerConfig,
    connector: Arc<dyn Connector>,
    renderer: Arc<Mutex<StreamRenderer>>,
    view: Arc<dyn SessionView>,
    transport: Option<Arc<dyn Transport>>,
    generation: u64,
    heartbeat: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
    internal_tx: mpsc::UnboundedSender<Internal>,
}

impl ConnectionManager {
    pub fn spawn(
        name: DisplayName,
        config: ManagerConfig,
        connector: Arc<dyn Connector>,
        renderer: Arc<Mutex<StreamRenderer>>,
        view: Arc<dyn SessionView>,
    ) -> (ManagerHandle, JoinHandle<()>) {
        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let manager = Self {
            session: Session::new(name),
            config,
            connector,
            renderer,
            view,
            transport: None,
            generation: 0,
            heartbeat: None,
            reconnect: None,
            internal_tx,
        };
        let task = tokio::spawn(manager.run(ops_rx, internal_rx));
        (ManagerHandle { ops: ops_tx }, task)
    }

    async fn run(
        mut self,
        mut ops: mpsc::UnboundedReceiver<Op>,
        mut internal: mpsc::UnboundedReceiver<Internal>,
    ) {
        info!(name = %self.session.name(), endpoint = %self.config.endpoint, "joining session");
        let effects = transition(&mut self.session, ConnEvent::JoinRequested);
        self.apply(effects).await;

        loop {
            tokio::select! {
                op = ops.recv() => match op {
                    Some(Op::Shutdown) | None => {
                        self.teardown().await;
                        break;
                    }
                    Some(Op::SendCommand(text)) => self.send_command(text).await,
                    Some(Op::SendChat(text)) => self.send_chat(text).await,
                    Some(Op::VisibilityCheck) => self.visibility_check().await,
                },
                Some(event) = internal.recv() => self.handle_internal(event).await,
            }
        }
        debug!(target = "session::manager", "manager stopped");
    }

    async fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::Dialed {
                generation,
                transport,
                events,
            } => self.adopt(generation, transport, events),
            Internal::Transport { generation, event } => {
                if generation != self.generation {
                    debug!(target = "session::manager", generation, "ignoring stale transport event");
                    return;
                }
                match event {
                    TransportEvent::Opened => {
                        let effects = transition(&mut self.session, ConnEvent::TransportOpened);
                        self.apply(effects).await;
                    }
                    TransportEvent::Message(raw) => self.dispatch(&raw),
                    TransportEvent::Closed => {
                        self.transport = None;
                        let effects = transition(&mut self.session, ConnEvent::TransportClosed);
                        self.apply(effects).await;
                    }
                }
            }
            Internal::HeartbeatLost { generation } => {
                if generation != self.generation {
                    return;
                }
                warn!(target = "session::manager", "heartbeat lost");
                let effects = transition(&mut self.session, ConnEvent::HeartbeatLost);
                self.apply(effects).await;
            }
            Internal::ReconnectElapsed => {
                self.reconnect = None;
                let effects = transition(&mut self.session, ConnEvent::ReconnectDelayElapsed);
                self.apply(effects).await;
            }
        }
    }

    async fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Dial => self.dial(),
                Effect::StartHeartbeat => self.start_heartbeat(),
                Effect::StopHeartbeat => self.stop_heartbeat(),
                Effect::NotifyConnected => self.on_connected(),
                Effect::NotifyDisconnected => self.on_disconnected(),
                Effect::ScheduleReconnect { attempt, max } => self.schedule_reconnect(attempt, max),
                Effect::NotifyFailed => self.on_failed(),
            }
        }
    }

    fn dial(&mut self) {
        self.generation += 1;
        let generation = self.generation;
        let connector = self.connector.clone();
        let endpoint = self.config.endpoint.clone();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            match connector.connect(&endpoint).await {
                Ok((transport, events)) => {
                    let _ = tx.send(Internal::Dialed {
                        generation,
                        transport,
                        events,
                    });
                }
                Err(err) => {
                    warn!(target = "session::manager", error = %err, "dial failed");
                    let _ = tx.send(Internal::Transport {
                        generation,
                        event: TransportEvent::Closed,
                    });
                }
            }
        });
    }

    fn adopt(&mut self, generation: u64, transport: Arc<dyn Transport>, mut events: EventReceiver) {
        if generation != self.generation {
            // A newer dial superseded this one while it was in flight.
            tokio::spawn(async move { transport.close().await });
            return;
        }
        self.transport = Some(transport);
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if tx.send(Internal::Transport { generation, event }).is_err() {
                    break;
                }
            }
        });
    }

    fn start_heartbeat(&mut self) {
        self.stop_heartbeat();
        let Some(transport) = self.transport.clone() else {
            return;
        };
        let generation = self.generation;
        let period = self.config.heartbeat_interval;
        let tx = self.internal_tx.clone();
        self.heartbeat = Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match transport.readiness() {
                    Readiness::Open => {
                        let frame = match protocol::encode_client_message(&ClientMessage::ping()) {
                            Ok(frame) => frame,
                            Err(_) => continue,
                        };
                        if transport.send_text(&frame).await.is_err() {
                            let _ = tx.send(Internal::HeartbeatLost { generation });
                            break;
                        }
                    }
                    Readiness::Connecting => {}
                    Readiness::Closed => {
                        let _ = tx.send(Internal::HeartbeatLost { generation });
                        break;
                    }
                }
            }
        }));
    }

    fn stop_heartbeat(&mut self) {
        if let Some(task) = self.heartbeat.take() {
            task.abort();
        }
    }

    fn schedule_reconnect(&mut self, attempt: u32, max: u32) {
        self.cancel_reconnect();
        self.view
            .chat_entry(ChatEntry::system(format!("🔄 reconnecting… ({attempt}/{max})")));
        let delay = self.config.reconnect_delay;
        let tx = self.internal_tx.clone();
        self.reconnect = Some(tokio::spawn(async move {
            sleep(delay).await;
            let _ = tx.send(Internal::ReconnectElapsed);
        }));
    }

    fn cancel_reconnect(&mut self) {
        if let Some(task) = self.reconnect.take() {
            task.abort();
        }
    }

    fn on_connected(&mut self) {
        info!(target = "session::manager", "connected");
        self.view.connection_changed(ConnectionState::Connected);
        self.view.chat_entry(ChatEntry::system(format!(
            "🎉 welcome, {}!",
            self.session.name()
        )));
        {
            let mut renderer = self.renderer.lock().unwrap();
            renderer.feed("\n🎮 coshell: connected to the shared terminal\n");
            renderer.feed("💡 type a command and press Enter to run it\n");
        }
        self.view.scrollback_changed();
    }

    fn on_disconnected(&mut self) {
        self.view.connection_changed(self.session.state());
        self.view
            .chat_entry(ChatEntry::system("❌ connection lost"));
    }

    fn on_failed(&mut self) {
        self.view.connection_changed(ConnectionState::Failed);
        self.view.chat_entry(ChatEntry::system(
            "❌ could not reconnect; restart coshell to try again",
        ));
    }

    async fn send_command(&mut self, text: String) {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }
        if self.session.state() != ConnectionState::Connected {
            self.view
                .chat_entry(ChatEntry::system("❌ not connected to the server"));
            return;
        }
        {
            // Local echo, the way a terminal prompt would show it.
            let mut renderer = self.renderer.lock().unwrap();
            renderer.feed(&format!("$ {trimmed}\n"));
        }
        self.view.scrollback_changed();
        let message = ClientMessage::Input {
            data: format!("{trimmed}\n"),
        };
        self.send_frame(message, "command").await;
    }

    async fn send_chat(&mut self, text: String) {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }
        if self.session.state() != ConnectionState::Connected {
            self.view
                .chat_entry(ChatEntry::system("❌ not connected to the server"));
            return;
        }
        let message = ClientMessage::Chat {
            data: trimmed.to_owned(),
            user: self.session.name().as_str().to_owned(),
        };
        self.send_frame(message, "chat message").await;
    }

    async fn send_frame(&mut self, message: ClientMessage, label: &str) {
        let Some(transport) = self.transport.clone() else {
            self.view
                .chat_entry(ChatEntry::system("❌ not connected to the server"));
            return;
        };
        let frame = match protocol::encode_client_message(&message) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(target = "session::manager", error = %err, "encode failed");
                return;
            }
        };
        if let Err(err) = transport.send_text(&frame).await {
            warn!(target = "session::manager", error = %err, "send failed");
            self.view
                .chat_entry(ChatEntry::system(format!("❌ failed to send {label}")));
        }
    }

    async fn visibility_check(&mut self) {
        if self.session.state() != ConnectionState::Connected {
            return;
        }
        let open = self
            .transport
            .as_ref()
            .map(|transport| transport.readiness() == Readiness::Open)
            .unwrap_or(false);
        if !open {
            debug!(target = "session::manager", "transport dead after visibility change");
            self.transport = None;
            let effects = transition(&mut self.session, ConnEvent::TransportClosed);
            self.apply(effects).await;
        }
    }

    fn dispatch(&mut self, raw: &str) {
        match protocol::decode_server_message(raw) {
            Ok(ServerMessage::Output { data }) => {
                {
                    let mut renderer = self.renderer.lock().unwrap();
                    renderer.feed(&data);
                }
                self.view.scrollback_changed();
            }
            Ok(ServerMessage::InputInfo { data }) => self.view.chat_entry(ChatEntry::input(data)),
            Ok(ServerMessage::System { data }) => {
                if let Some(count) = crate::client::participant_count(&data) {
                    self.view.participant_count(count);
                }
                self.view.chat_entry(ChatEntry::system(data));
            }
            Ok(ServerMessage::Chat { data, user }) => {
                self.view.chat_entry(ChatEntry::chat(user, data));
            }
            Ok(ServerMessage::Unknown) => {
                debug!(target = "session::dispatch", "ignoring unknown message type");
            }
            Err(err) => {
                warn!(target = "session::dispatch", error = %err, "dropping malformed frame");
            }
        }
    }

    /// Heartbeat first, then the close handshake, so a final ping can never
    /// race the close; the pending reconnect goes last.
    async fn teardown(&mut self) {
        self.stop_heartbeat();
        if let Some(transport) = self.transport.take() {
            transport.close().await;
        }
        self.cancel_reconnect();
    }
}
