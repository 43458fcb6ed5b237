use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::debug;
use url::Url;

use super::{Connector, EventReceiver, Readiness, Transport, TransportError, TransportEvent};

/// Build the session endpoint from the server base URL: `http(s)` maps to
/// `ws(s)`, the upgrade path is `/ws`, and the display name rides along as a
/// percent-encoded query parameter.
pub fn session_url(server: &Url, username: &str) -> Result<Url, TransportError> {
    let scheme = match server.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(TransportError::Connect(format!(
                "unsupported server scheme '{other}'"
            )));
        }
    };
    let host = server
        .host_str()
        .ok_or_else(|| TransportError::Connect("server url is missing a host".into()))?;
    let base = match server.port() {
        Some(port) => format!("{scheme}://{host}:{port}/ws"),
        None => format!("{scheme}://{host}/ws"),
    };
    let mut endpoint =
        Url::parse(&base).map_err(|err| TransportError::Connect(err.to_string()))?;
    endpoint.query_pairs_mut().append_pair("username", username);
    Ok(endpoint)
}

enum Outbound {
    Text(String),
    Close,
}

pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(
        &self,
        url: &Url,
    ) -> Result<(Arc<dyn Transport>, EventReceiver), TransportError> {
        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|err| TransportError::Connect(err.to_string()))?;

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));

        let pump_open = open.clone();
        let pump = tokio::spawn(async move {
            run_socket(ws_stream, out_rx, events_tx, pump_open).await;
        });

        let transport = WebSocketTransport {
            out_tx,
            open,
            pump: std::sync::Mutex::new(Some(pump)),
        };
        Ok((Arc::new(transport), events_rx))
    }
}

pub struct WebSocketTransport {
    out_tx: mpsc::UnboundedSender<Outbound>,
    open: Arc<AtomicBool>,
    pump: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::NotOpen);
        }
        self.out_tx
            .send(Outbound::Text(text.to_owned()))
            .map_err(|_| TransportError::Send("socket task stopped".into()))
    }

    fn readiness(&self) -> Readiness {
        if self.open.load(Ordering::SeqCst) {
            Readiness::Open
        } else {
            Readiness::Closed
        }
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self.out_tx.send(Outbound::Close);
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.lock().unwrap().take() {
            pump.abort();
        }
    }
}

async fn run_socket(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut out_rx: mpsc::UnboundedReceiver<Outbound>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    open: Arc<AtomicBool>,
) {
    let (mut sink, mut stream) = ws_stream.split();

    let writer = tokio::spawn(async move {
        while let Some(outbound) = out_rx.recv().await {
            match outbound {
                Outbound::Text(text) => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: "client shutdown".into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    });

    let _ = events_tx.send(TransportEvent::Opened);

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                if events_tx.send(TransportEvent::Message(text)).is_err() {
                    break;
                }
            }
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => {
                    if events_tx.send(TransportEvent::Message(text)).is_err() {
                        break;
                    }
                }
                Err(_) => debug!(target = "transport::ws", "dropping non-utf8 binary frame"),
            },
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }

    open.store(false, Ordering::SeqCst);
    let _ = events_tx.send(TransportEvent::Closed);

    writer.abort();
    let _ = writer.await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_url_mirrors_plain_scheme() {
        let server = Url::parse("http://shell.example:8080").unwrap();
        let endpoint = session_url(&server, "alice").unwrap();
        assert_eq!(endpoint.as_str(), "ws://shell.example:8080/ws?username=alice");
    }

    #[test]
    fn session_url_mirrors_secure_scheme() {
        let server = Url::parse("https://shell.example").unwrap();
        let endpoint = session_url(&server, "alice").unwrap();
        assert_eq!(endpoint.as_str(), "wss://shell.example/ws?username=alice");
    }

    #[test]
    fn session_url_percent_encodes_the_name() {
        let server = Url::parse("http://127.0.0.1:8080").unwrap();
        let endpoint = session_url(&server, "철수 & co").unwrap();
        assert_eq!(
            endpoint.query(),
            Some("username=%EC%B2%A0%EC%88%98+%26+co")
        );
    }

    #[test]
    fn session_url_rejects_odd_schemes() {
        let server = Url::parse("ftp://shell.example").unwrap();
        assert!(matches!(
            session_url(&server, "alice"),
            Err(TransportError::Connect(_))
        ));
    }
}
