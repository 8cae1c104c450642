//! Scripted service side of the in-memory transport.
//!
//! The test drives the protocol by hand: accept the link the engine opened,
//! inspect what it sent, and push server frames back.

use std::sync::Arc;
use std::time::Duration;

use rtmux::rtmux_proto::{
    Action, ConnectionDetails, ErrorInfo, Flags, Message, PresenceMessage, ProtocolMessage,
};
use rtmux::{AuthProvider, ClientOptions, Realtime, StaticKeyAuth, TransportError, TransportEvent};
use tokio::sync::mpsc;

use super::settle;
use super::transport::{MockLink, MockTransport, Opened};

/// A test server bound to one client's transport.
pub struct TestServer {
    transport: Arc<MockTransport>,
    opened: mpsc::UnboundedReceiver<Opened>,
    current: Option<Opened>,
}

impl TestServer {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            transport: Arc::new(MockTransport::new(tx)),
            opened: rx,
            current: None,
        }
    }

    pub fn transport(&self) -> Arc<MockTransport> {
        self.transport.clone()
    }

    /// Build a client over this server's transport with a static key.
    pub fn client(&self, options: ClientOptions) -> Realtime {
        self.client_with_auth(options, Arc::new(StaticKeyAuth::new("app.key:secret")))
    }

    pub fn client_with_auth(&self, options: ClientOptions, auth: Arc<dyn AuthProvider>) -> Realtime {
        Realtime::new(options, self.transport.clone(), auth).expect("client should build")
    }

    /// Wait for the engine to open its next link.
    pub async fn accept(&mut self) -> Arc<MockLink> {
        let opened = tokio::time::timeout(Duration::from_secs(120), self.opened.recv())
            .await
            .expect("engine did not open a link in time")
            .expect("transport dropped");
        let link = opened.link.clone();
        self.current = Some(opened);
        link
    }

    /// Accept the next link and complete the handshake.
    pub async fn accept_connected(&mut self, id: &str, key: &str) -> Arc<MockLink> {
        let link = self.accept().await;
        self.connected(id, key);
        settle().await;
        link
    }

    /// Host of the link most recently accepted.
    pub fn host(&self) -> String {
        self.opened().host.clone()
    }

    pub fn link(&self) -> Arc<MockLink> {
        self.opened().link.clone()
    }

    fn opened(&self) -> &Opened {
        self.current.as_ref().expect("no link accepted yet")
    }

    pub fn send(&self, frame: ProtocolMessage) {
        self.opened()
            .events
            .send(TransportEvent::Message(frame))
            .expect("engine stopped reading the link");
    }

    pub fn connected(&self, id: &str, key: &str) {
        self.connected_with(id, key, None);
    }

    pub fn connected_with(&self, id: &str, key: &str, state_ttl_ms: Option<u64>) {
        let mut frame = ProtocolMessage::new(Action::Connected);
        frame.connection_id = Some(id.to_string());
        frame.connection_details = Some(ConnectionDetails {
            connection_key: Some(key.to_string()),
            connection_state_ttl: state_ttl_ms,
            ..ConnectionDetails::default()
        });
        self.send(frame);
    }

    pub fn attached(&self, channel: &str, flags: Flags) {
        let mut frame = ProtocolMessage::for_channel(Action::Attached, channel);
        frame.flags = flags;
        self.send(frame);
    }

    pub fn detached(&self, channel: &str, error: Option<ErrorInfo>) {
        let mut frame = ProtocolMessage::for_channel(Action::Detached, channel);
        frame.error = error;
        self.send(frame);
    }

    pub fn channel_error(&self, channel: &str, error: ErrorInfo) {
        let mut frame = ProtocolMessage::for_channel(Action::Error, channel);
        frame.error = Some(error);
        self.send(frame);
    }

    pub fn connection_error(&self, error: ErrorInfo) {
        self.send(ProtocolMessage::error(error));
    }

    pub fn ack(&self, serial: i64, count: u32) {
        let mut frame = ProtocolMessage::new(Action::Ack);
        frame.msg_serial = Some(serial);
        frame.count = Some(count);
        self.send(frame);
    }

    pub fn nack(&self, serial: i64, count: u32, error: ErrorInfo) {
        let mut frame = ProtocolMessage::new(Action::Nack);
        frame.msg_serial = Some(serial);
        frame.count = Some(count);
        frame.error = Some(error);
        self.send(frame);
    }

    pub fn closed(&self) {
        self.send(ProtocolMessage::new(Action::Closed));
    }

    /// Deliver messages on `channel` in one frame with id `frame_id`.
    pub fn messages(&self, channel: &str, frame_id: &str, messages: Vec<Message>) {
        let mut frame = ProtocolMessage::messages(channel, messages);
        frame.id = Some(frame_id.to_string());
        frame.connection_id = Some("publisher".to_string());
        self.send(frame);
    }

    pub fn presence(&self, channel: &str, records: Vec<PresenceMessage>) {
        self.send(ProtocolMessage::presence(channel, records));
    }

    /// A SYNC frame. `cursor` of `None` or an empty cursor ends the sync.
    pub fn sync(&self, channel: &str, serial: Option<&str>, records: Vec<PresenceMessage>) {
        let mut frame = ProtocolMessage::for_channel(Action::Sync, channel);
        frame.channel_serial = serial.map(str::to_string);
        frame.presence = records;
        self.send(frame);
    }

    /// Drop the current link as a network failure would.
    pub fn drop_link(&self) {
        let _ = self
            .opened()
            .events
            .send(TransportEvent::Closed(Some(TransportError::Closed(
                "connection reset".to_string(),
            ))));
    }
}
