use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use url::Url;

pub mod mock;
pub mod websocket;

/// Coarse readiness of the underlying duplex channel, mirroring what a
/// heartbeat probe needs to know: can we send now, might we soon, or is the
/// channel gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Connecting,
    Open,
    Closed,
}

/// Lifecycle and traffic notifications delivered on the event stream handed
/// out by [`Connector::connect`]. Events arrive in transport order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Message(String),
    Closed,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("transport is not open")]
    NotOpen,
    #[error("send failed: {0}")]
    Send(String),
}

pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// A connected duplex text-message channel.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Queue one text frame for delivery to the remote peer.
    async fn send_text(&self, text: &str) -> Result<(), TransportError>;

    /// Current readiness, observable without blocking.
    fn readiness(&self) -> Readiness;

    /// Close the channel with a normal-closure handshake.
    async fn close(&self);
}

/// Dials new transports. The session layer is written against this seam so
/// the concrete transport is swappable (and scriptable in tests).
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        url: &Url,
    ) -> Result<(Arc<dyn Transport>, EventReceiver), TransportError>;
}
