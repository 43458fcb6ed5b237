use std::fmt;
use std::time::Duration;
use thiserror::Error;

mod manager;

pub use manager::{ConnectionManager, ManagerConfig, ManagerHandle};

pub const MAX_NAME_CHARS: usize = 20;
pub const MAX_RECONNECT_ATTEMPTS: u32 = 5;
pub const RECONNECT_DELAY: Duration = Duration::from_millis(2000);
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NameError {
    #[error("display name cannot be empty")]
    Empty,
    #[error("display name cannot exceed {MAX_NAME_CHARS} characters")]
    TooLong,
}

/// Validated participant name: 1 to 20 characters after trimming. Invalid
/// names are rejected here, before any connection attempt happens.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisplayName(String);

impl DisplayName {
    pub fn parse(raw: &str) -> Result<Self, NameError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(NameError::Empty);
        }
        if trimmed.chars().count() > MAX_NAME_CHARS {
            return Err(NameError::TooLong);
        }
        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DisplayName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl ConnectionState {
    pub fn label(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One participant in one shared terminal. Only `transition` mutates the
/// state and the attempt counter.
#[derive(Clone, Debug)]
pub struct Session {
    name: DisplayName,
    state: ConnectionState,
    attempts: u32,
    max_attempts: u32,
}

impl Session {
    pub fn new(name: DisplayName) -> Self {
        Self {
            name,
            state: ConnectionState::Disconnected,
            attempts: 0,
            max_attempts: MAX_RECONNECT_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn name(&self) -> &DisplayName {
        &self.name
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Everything that can move the connection state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnEvent {
    JoinRequested,
    TransportOpened,
    TransportClosed,
    HeartbeatLost,
    ReconnectDelayElapsed,
}

/// Side effects requested by a transition, interpreted by the manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Effect {
    Dial,
    StartHeartbeat,
    StopHeartbeat,
    NotifyConnected,
    NotifyDisconnected,
    ScheduleReconnect { attempt: u32, max: u32 },
    NotifyFailed,
}

/// Pure transition function. Unexpected (state, event) pairs are ignored:
/// in particular `Failed` is terminal until the user explicitly retries.
pub fn transition(session: &mut Session, event: ConnEvent) -> Vec<Effect> {
    use ConnectionState::*;

    match (session.state, event) {
        (Disconnected, ConnEvent::JoinRequested) => {
            session.state = Connecting;
            vec![Effect::Dial]
        }
        (Connecting, ConnEvent::TransportOpened) => {
            session.state = Connected;
            session.attempts = 0;
            vec![Effect::StartHeartbeat, Effect::NotifyConnected]
        }
        (Connecting, ConnEvent::TransportClosed) => lose(session, false),
        (Connected, ConnEvent::TransportClosed) | (Connected, ConnEvent::HeartbeatLost) => {
            lose(session, true)
        }
        (Reconnecting, ConnEvent::ReconnectDelayElapsed) => {
            session.state = Connecting;
            vec![Effect::Dial]
        }
        _ => Vec::new(),
    }
}

fn lose(session: &mut Session, was_connected: bool) -> Vec<Effect> {
    let mut effects = Vec::new();
    if was_connected {
        effects.push(Effect::StopHeartbeat);
    }
    effects.push(Effect::NotifyDisconnected);
    if session.attempts < session.max_attempts {
        session.attempts += 1;
        session.state = ConnectionState::Reconnecting;
        effects.push(Effect::ScheduleReconnect {
            attempt: session.attempts,
            max: session.max_attempts,
        });
    } else {
        session.state = ConnectionState::Failed;
        effects.push(Effect::NotifyFailed);
    }
    effects
}
