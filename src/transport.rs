//! Transport collaborator interface.
//!
//! The engine does not speak sockets. A [`Transport`] opens a [`Link`] to a host
//! and pushes decoded frames into the event channel it was given; the connection
//! driver reads that channel and sends frames back through the link.

use std::sync::Arc;

use async_trait::async_trait;
use rtmux_proto::{ErrorInfo, Format, ProtocolMessage};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::auth::Credential;

/// Errors a transport reports when opening or using a link.
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum TransportError {
    #[error("host {host} unreachable: {reason}")]
    Unreachable { host: String, reason: String },

    #[error("transport closed: {0}")]
    Closed(String),

    #[error("server refused connection: {0}")]
    Rejected(ErrorInfo),

    #[error("send failed: {0}")]
    Send(String),
}

/// Everything a transport needs to open a link.
#[derive(Debug, Clone)]
pub struct ConnectParams {
    /// Host to connect to.
    pub host: String,
    /// Credential to present.
    pub credential: Credential,
    /// Resume key from the previous connection, if continuity is being claimed.
    pub resume: Option<String>,
    /// Client id from the options, if configured.
    pub client_id: Option<String>,
    /// Whether the server should echo our own messages back.
    pub echo: bool,
    /// Wire format to negotiate.
    pub format: Format,
}

/// Inbound events delivered by a link.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A decoded frame from the server.
    Message(ProtocolMessage),
    /// The link went away. `None` means a clean close.
    Closed(Option<TransportError>),
}

/// An open link to the service.
pub trait Link: Send + Sync {
    /// Queue a frame for transmission.
    ///
    /// Must not block and must not call back into the engine: the connection
    /// calls it while holding its state lock so that serial order equals wire order.
    fn send(&self, msg: ProtocolMessage) -> Result<(), TransportError>;

    /// Tear the link down. No further events are read from it.
    fn close(&self);
}

/// Opens links to the service.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a link to `params.host`, delivering inbound events on `events`.
    async fn open(
        &self,
        params: ConnectParams,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Result<Arc<dyn Link>, TransportError>;
}
