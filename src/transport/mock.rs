use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use url::Url;

use super::{Connector, EventReceiver, Readiness, Transport, TransportError, TransportEvent};

/// Scriptable connector for tests: each dial consumes the next planned
/// outcome. Dials beyond the script are refused.
pub struct MockConnector {
    plan: Mutex<VecDeque<DialPlan>>,
    dials: AtomicUsize,
}

enum DialPlan {
    Refuse(String),
    Accept(Arc<MockTransport>, EventReceiver),
}

impl MockConnector {
    pub fn new() -> Self {
        Self {
            plan: Mutex::new(VecDeque::new()),
            dials: AtomicUsize::new(0),
        }
    }

    /// Script the next dial to fail before the channel opens.
    pub fn refuse(&self, reason: &str) {
        self.plan
            .lock()
            .unwrap()
            .push_back(DialPlan::Refuse(reason.to_owned()));
    }

    /// Script the next dial to succeed; the returned remote drives the
    /// server side of the conversation.
    pub fn accept(&self) -> MockRemote {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(MockTransport {
            sent: Mutex::new(Vec::new()),
            readiness: Mutex::new(Readiness::Open),
            fail_sends: AtomicBool::new(false),
        });
        self.plan
            .lock()
            .unwrap()
            .push_back(DialPlan::Accept(transport.clone(), events_rx));
        MockRemote {
            transport,
            events: events_tx,
        }
    }

    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        _url: &Url,
    ) -> Result<(Arc<dyn Transport>, EventReceiver), TransportError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let plan = self.plan.lock().unwrap().pop_front();
        match plan {
            Some(DialPlan::Accept(transport, events_rx)) => {
                transport.set_readiness(Readiness::Open);
                Ok((transport, events_rx))
            }
            Some(DialPlan::Refuse(reason)) => Err(TransportError::Connect(reason)),
            None => Err(TransportError::Connect("no scripted dial".into())),
        }
    }
}

pub struct MockTransport {
    sent: Mutex<Vec<String>>,
    readiness: Mutex<Readiness>,
    fail_sends: AtomicBool,
}

impl MockTransport {
    fn set_readiness(&self, readiness: Readiness) {
        *self.readiness.lock().unwrap() = readiness;
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_text(&self, text: &str) -> Result<(), TransportError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::Send("scripted failure".into()));
        }
        if self.readiness() != Readiness::Open {
            return Err(TransportError::NotOpen);
        }
        self.sent.lock().unwrap().push(text.to_owned());
        Ok(())
    }

    fn readiness(&self) -> Readiness {
        *self.readiness.lock().unwrap()
    }

    async fn close(&self) {
        self.set_readiness(Readiness::Closed);
    }
}

/// Test-side handle to one accepted connection.
pub struct MockRemote {
    transport: Arc<MockTransport>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl MockRemote {
    /// Emit the opened notification, as a real transport does once the
    /// upgrade completes.
    pub fn open(&self) {
        let _ = self.events.send(TransportEvent::Opened);
    }

    /// Push one raw text frame to the client.
    pub fn push_text(&self, raw: &str) {
        let _ = self.events.send(TransportEvent::Message(raw.to_owned()));
    }

    /// Drop the connection from the server side.
    pub fn drop_connection(&self) {
        self.transport.set_readiness(Readiness::Closed);
        let _ = self.events.send(TransportEvent::Closed);
    }

    /// Flip the transport readiness without emitting any event, simulating a
    /// silently dead socket.
    pub fn set_readiness(&self, readiness: Readiness) {
        self.transport.set_readiness(readiness);
    }

    /// Make subsequent sends fail while the channel still looks open.
    pub fn fail_sends(&self, fail: bool) {
        self.transport.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Frames the client has sent so far.
    pub fn sent(&self) -> Vec<String> {
        self.transport.sent.lock().unwrap().clone()
    }
}
