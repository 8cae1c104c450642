//! In-memory transport.
//!
//! Every `open` is recorded. Hosts marked unreachable fail immediately; all
//! others get a [`MockLink`] that is handed to the [`super::TestServer`].

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use rtmux::rtmux_proto::{Action, ProtocolMessage};
use rtmux::{ConnectParams, Credential, Link, Transport, TransportError, TransportEvent};
use tokio::sync::mpsc;

/// One call to [`Transport::open`].
#[derive(Debug, Clone)]
pub struct Attempt {
    pub host: String,
    pub resume: Option<String>,
    pub credential: Credential,
}

/// A link the engine opened, seen from the server side.
pub struct Opened {
    pub host: String,
    pub link: Arc<MockLink>,
    pub events: mpsc::UnboundedSender<TransportEvent>,
}

/// Link that records every frame the engine sends.
#[derive(Default)]
pub struct MockLink {
    sent: Mutex<Vec<ProtocolMessage>>,
    closed: AtomicBool,
}

impl MockLink {
    pub fn sent(&self) -> Vec<ProtocolMessage> {
        self.sent.lock().clone()
    }

    /// Frames with `action`, in send order.
    pub fn sent_with(&self, action: Action) -> Vec<ProtocolMessage> {
        self.sent
            .lock()
            .iter()
            .filter(|frame| frame.action == action)
            .cloned()
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Link for MockLink {
    fn send(&self, msg: ProtocolMessage) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Send("link closed".to_string()));
        }
        self.sent.lock().push(msg);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

pub struct MockTransport {
    attempts: Mutex<Vec<Attempt>>,
    unreachable: Mutex<HashSet<String>>,
    opened: mpsc::UnboundedSender<Opened>,
}

impl MockTransport {
    pub fn new(opened: mpsc::UnboundedSender<Opened>) -> Self {
        Self {
            attempts: Mutex::new(Vec::new()),
            unreachable: Mutex::new(HashSet::new()),
            opened,
        }
    }

    pub fn attempts(&self) -> Vec<Attempt> {
        self.attempts.lock().clone()
    }

    pub fn set_unreachable(&self, hosts: &[&str]) {
        *self.unreachable.lock() = hosts.iter().map(|h| h.to_string()).collect();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(
        &self,
        params: ConnectParams,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Arc<dyn Link>, TransportError> {
        self.attempts.lock().push(Attempt {
            host: params.host.clone(),
            resume: params.resume.clone(),
            credential: params.credential.clone(),
        });
        if self.unreachable.lock().contains(&params.host) {
            return Err(TransportError::Unreachable {
                host: params.host,
                reason: "connection refused".to_string(),
            });
        }
        let link = Arc::new(MockLink::default());
        let _ = self.opened.send(Opened {
            host: params.host,
            link: link.clone(),
            events,
        });
        Ok(link)
    }
}
