//! Connection state machine.
//!
//! The connection is split in two:
//! - [`Connection`]: the cloneable handle applications use. It reads shared state
//!   and sends commands; it never performs a transition itself.
//! - [`driver`]: the task that owns the transport link, the timers and every
//!   state transition.
//!
//! Shared state lives behind one `parking_lot::Mutex`. Outbound frames are
//! serialized and written to the link under that lock, so serial order is wire
//! order. Events are emitted only after the lock is released.

pub(crate) mod driver;
mod retry;
mod state;

pub use state::{ConnectionEvent, ConnectionState, ConnectionStateChange};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rtmux_proto::{Action, ConnectionDetails, ErrorInfo, ProtocolMessage};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::ClientOptions;
use crate::emitter::{EventEmitter, ListenerFailure, Subscription};
use crate::error::{Error, Result};
use crate::queue::{MessageQueue, PendingMessage};
use crate::transport::{Link, TransportError};
use crate::wait::Wait;

/// Requests from handles to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
    Connect,
    Close,
}

/// Connection state shared between handles and the driver.
pub(crate) struct ConnectionShared {
    pub state: ConnectionState,
    pub id: Option<String>,
    pub key: Option<String>,
    pub error: Option<ErrorInfo>,
    pub host: Option<String>,
    pub details: Option<ConnectionDetails>,
    /// Resume window; the server may override the configured value.
    pub state_ttl: Duration,
    pub queue: MessageQueue,
    pub link: Option<Arc<dyn Link>>,
    pub pings: HashMap<String, oneshot::Sender<()>>,
}

impl ConnectionShared {
    /// Write a frame to the current link, if any.
    pub fn transmit(&self, frame: ProtocolMessage) -> bool {
        let Some(link) = self.link.as_ref() else {
            return false;
        };
        match link.send(frame) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "failed to write frame to link");
                false
            }
        }
    }
}

pub(crate) struct ConnectionInner {
    pub options: Arc<ClientOptions>,
    pub shared: Mutex<ConnectionShared>,
    pub emitter: EventEmitter<ConnectionEvent, ConnectionStateChange>,
    state_tx: watch::Sender<ConnectionState>,
    commands: mpsc::UnboundedSender<Command>,
}

impl ConnectionInner {
    pub fn new(options: Arc<ClientOptions>, commands: mpsc::UnboundedSender<Command>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Initialized);
        Self {
            shared: Mutex::new(ConnectionShared {
                state: ConnectionState::Initialized,
                id: None,
                key: None,
                error: None,
                host: None,
                details: None,
                state_ttl: options.connection_state_ttl(),
                queue: MessageQueue::new(),
                link: None,
                pings: HashMap::new(),
            }),
            options,
            emitter: EventEmitter::new(),
            state_tx,
            commands,
        }
    }

    /// Current state without taking the state lock.
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn request_connect(&self) {
        self.command(Command::Connect);
    }

    pub fn request_close(&self) {
        self.command(Command::Close);
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::warn!(?command, "connection driver has stopped; command ignored");
        }
    }

    /// Move to `next` under the caller's lock.
    ///
    /// Returns the change to announce once the lock is released, or `None` if
    /// the state did not change.
    pub fn transition_locked(
        &self,
        shared: &mut ConnectionShared,
        next: ConnectionState,
        reason: Option<ErrorInfo>,
        retry_in: Option<Duration>,
    ) -> Option<ConnectionStateChange> {
        let previous = shared.state;
        if previous == next {
            return None;
        }
        shared.state = next;
        if reason.is_some() || next == ConnectionState::Connected {
            shared.error = reason.clone();
        }
        self.state_tx.send_replace(next);
        Some(ConnectionStateChange::transition(
            previous, next, reason, retry_in,
        ))
    }

    /// Hand a message to the connection.
    ///
    /// Connected: serial assigned and written immediately. Otherwise queued if
    /// the options allow it, or failed.
    pub fn submit(&self, mut pending: PendingMessage) {
        let mut shared = self.shared.lock();
        let state = shared.state;
        if state == ConnectionState::Connected {
            let frame = shared.queue.assign(pending);
            shared.transmit(frame);
        } else if state.accepts_publish(self.options.queue_messages) {
            shared.queue.enqueue(pending);
        } else {
            drop(shared);
            pending.complete(Err(Error::invalid_state(
                "publish",
                format!("connection {state}"),
            )));
        }
    }

    /// Write a control frame (ATTACH, DETACH) if connected.
    pub fn send_frame(&self, frame: ProtocolMessage) -> bool {
        let shared = self.shared.lock();
        shared.state == ConnectionState::Connected && shared.transmit(frame)
    }

    /// Fail messages for `channel` that were never transmitted.
    pub fn fail_channel_queued(&self, channel: &str, error: &Error) -> usize {
        self.shared.lock().queue.fail_channel(channel, error)
    }

    async fn wait_for(&self, target: ConnectionState, wait: Wait) -> Result<()> {
        let mut rx = self.state_tx.subscribe();
        wait.run("connect", async move {
            let reached = *rx
                .wait_for(|state| {
                    *state == target
                        || matches!(state, ConnectionState::Closed | ConnectionState::Failed)
                })
                .await
                .map_err(|_| Error::Discarded("connection dropped".to_string()))?;
            match reached {
                state if state == target => Ok(()),
                ConnectionState::Failed => Err(self.failure()),
                _ => Err(Error::ConnectionClosed),
            }
        })
        .await
    }

    fn failure(&self) -> Error {
        match self.shared.lock().error.clone() {
            Some(info) => Error::from_info(info),
            None => Error::ConnectionFailed("connection failed".to_string()),
        }
    }
}

/// Handle to the client's connection.
#[derive(Clone)]
pub struct Connection {
    pub(crate) inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Start connecting. A no-op while connecting or connected.
    pub fn connect(&self) {
        self.inner.request_connect();
    }

    /// Close the connection. Waits for CLOSED from the server up to the close timeout.
    pub fn close(&self) {
        self.inner.request_close();
    }

    /// Send a heartbeat and wait for the reply. Returns the round-trip time.
    pub async fn ping(&self) -> Result<Duration> {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        {
            let mut shared = self.inner.shared.lock();
            if shared.state != ConnectionState::Connected {
                return Err(Error::invalid_state("ping", shared.state));
            }
            let mut frame = ProtocolMessage::new(Action::Heartbeat);
            frame.id = Some(id.clone());
            shared.pings.insert(id.clone(), tx);
            if !shared.transmit(frame) {
                shared.pings.remove(&id);
                return Err(Error::Transport(TransportError::Send(
                    "heartbeat could not be written".to_string(),
                )));
            }
        }

        let started = Instant::now();
        let timeout = self.inner.options.request_timeout();
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(())) => Ok(started.elapsed()),
            Ok(Err(_)) => Err(Error::Transport(TransportError::Closed(
                "link dropped before the heartbeat reply".to_string(),
            ))),
            Err(_) => {
                self.inner.shared.lock().pings.remove(&id);
                Err(Error::Timeout {
                    operation: "ping",
                    after: timeout,
                })
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Server-assigned connection id, once connected.
    pub fn id(&self) -> Option<String> {
        self.inner.shared.lock().id.clone()
    }

    /// Resume key for the current connection.
    pub fn key(&self) -> Option<String> {
        self.inner.shared.lock().key.clone()
    }

    /// Error behind the most recent failing transition.
    pub fn error_reason(&self) -> Option<ErrorInfo> {
        self.inner.shared.lock().error.clone()
    }

    /// Host of the current or most recent attempt.
    pub fn host(&self) -> Option<String> {
        self.inner.shared.lock().host.clone()
    }

    /// Connection details from the last CONNECTED frame.
    pub fn details(&self) -> Option<ConnectionDetails> {
        self.inner.shared.lock().details.clone()
    }

    /// Serial the next transmitted message will carry.
    pub fn msg_serial(&self) -> i64 {
        self.inner.shared.lock().queue.next_serial()
    }

    pub fn on(
        &self,
        event: ConnectionEvent,
        listener: impl Fn(&ConnectionStateChange) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.emitter.on(event, listener)
    }

    pub fn once(
        &self,
        event: ConnectionEvent,
        listener: impl Fn(&ConnectionStateChange) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.emitter.once(event, listener)
    }

    pub fn on_all(
        &self,
        listener: impl Fn(&ConnectionStateChange) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.emitter.on_all(listener)
    }

    /// Listener panics on connection events.
    pub fn listener_failures(&self) -> broadcast::Receiver<ListenerFailure> {
        self.inner.emitter.failures()
    }

    /// Wait until connected. Fails if the connection closes or fails first.
    pub async fn wait_for_connected(&self, wait: Wait) -> Result<()> {
        self.inner.wait_for(ConnectionState::Connected, wait).await
    }

    /// Wait until the connection reaches `state`.
    pub async fn wait_for_state(&self, state: ConnectionState, wait: Wait) -> Result<()> {
        self.inner.wait_for(state, wait).await
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
