//! Connection driver task.
//!
//! One task per client. It selects over application commands, the outcome of
//! the current connection attempt, events from the current link and a single
//! timer. Every connection state transition happens here; handles only read
//! shared state and send commands.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use rtmux_proto::{Action, ErrorInfo, Format, ProtocolMessage, codes};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use super::retry::{RetryDecision, RetryPolicy, RetryTracker};
use super::{Command, ConnectionInner, ConnectionState, ConnectionStateChange};
use crate::auth::AuthProvider;
use crate::channels::Channels;
use crate::error::Error;
use crate::fallback::{FallbackHosts, HostCycle};
use crate::transport::{ConnectParams, Link, Transport, TransportError, TransportEvent};

type AttemptOutcome = Result<(Arc<dyn Link>, mpsc::UnboundedReceiver<TransportEvent>), Error>;
type AttemptFuture = Pin<Box<dyn Future<Output = AttemptOutcome> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Timer {
    Retry,
    ConnectTimeout,
    CloseTimeout,
}

enum Input {
    Command(Command),
    Attempt(AttemptOutcome),
    Link(TransportEvent),
    Timer(Timer),
    Shutdown,
}

pub(crate) struct Driver {
    conn: Arc<ConnectionInner>,
    channels: Channels,
    transport: Arc<dyn Transport>,
    auth: Arc<dyn AuthProvider>,
    hosts: FallbackHosts,
    policy: RetryPolicy,
    retry: RetryTracker,
    commands: mpsc::UnboundedReceiver<Command>,
    shutdown: CancellationToken,
    cycle: Option<HostCycle>,
    attempt: Option<AttemptFuture>,
    attempt_host: Option<String>,
    presented_key: Option<String>,
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    timer: Option<(Instant, Timer)>,
    reuse_host: bool,
    auth_retried: bool,
}

impl Driver {
    pub fn new(
        conn: Arc<ConnectionInner>,
        channels: Channels,
        transport: Arc<dyn Transport>,
        auth: Arc<dyn AuthProvider>,
        commands: mpsc::UnboundedReceiver<Command>,
        shutdown: CancellationToken,
    ) -> Self {
        let options = conn.options.clone();
        Self {
            hosts: FallbackHosts::new(
                options.realtime_host.clone(),
                options.fallback_hosts.clone(),
                options.fallback_retry_timeout(),
            ),
            policy: RetryPolicy::from_options(&options),
            retry: RetryTracker::default(),
            conn,
            channels,
            transport,
            auth,
            commands,
            shutdown,
            cycle: None,
            attempt: None,
            attempt_host: None,
            presented_key: None,
            events: None,
            timer: None,
            reuse_host: false,
            auth_retried: false,
        }
    }

    pub async fn run(mut self) {
        tracing::debug!("connection driver started");
        loop {
            let input = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => Input::Shutdown,
                command = self.commands.recv() => match command {
                    Some(command) => Input::Command(command),
                    None => Input::Shutdown,
                },
                outcome = poll_attempt(&mut self.attempt) => Input::Attempt(outcome),
                event = next_event(&mut self.events) => Input::Link(event),
                timer = fire(&self.timer) => Input::Timer(timer),
            };

            match input {
                Input::Shutdown => break,
                Input::Command(Command::Connect) => self.on_connect_requested(),
                Input::Command(Command::Close) => self.on_close_requested(),
                Input::Attempt(outcome) => self.on_attempt_finished(outcome),
                Input::Link(event) => self.on_link_event(event),
                Input::Timer(timer) => self.on_timer(timer),
            }
        }
        self.abort_attempt();
        self.drop_link();
        tracing::debug!("connection driver stopped");
    }

    // ========================================================================
    // Commands
    // ========================================================================

    fn on_connect_requested(&mut self) {
        match self.conn.state() {
            ConnectionState::Connecting | ConnectionState::Connected => {}
            ConnectionState::Initialized | ConnectionState::Closed | ConnectionState::Failed => {
                self.retry.reset();
                self.cycle = None;
                self.auth_retried = false;
                self.start_attempt();
            }
            ConnectionState::Disconnected | ConnectionState::Suspended => self.start_attempt(),
            ConnectionState::Closing => {
                self.drop_link();
                self.start_attempt();
            }
        }
    }

    fn on_close_requested(&mut self) {
        match self.conn.state() {
            ConnectionState::Closing | ConnectionState::Closed => {}
            ConnectionState::Connected => {
                let change = {
                    let mut shared = self.conn.shared.lock();
                    shared.transmit(ProtocolMessage::new(Action::Close));
                    self.conn
                        .transition_locked(&mut shared, ConnectionState::Closing, None, None)
                };
                self.timer = Some((
                    Instant::now() + self.conn.options.close_timeout(),
                    Timer::CloseTimeout,
                ));
                self.announce(change, false);
            }
            _ => self.finish_close(None),
        }
    }

    // ========================================================================
    // Attempts
    // ========================================================================

    fn start_attempt(&mut self) {
        self.abort_attempt();
        self.drop_link();

        let host = match (self.reuse_host, self.attempt_host.clone()) {
            (true, Some(host)) => host,
            _ => self.next_host(),
        };
        self.reuse_host = false;
        self.attempt_host = Some(host.clone());

        let (resume, change) = {
            let mut shared = self.conn.shared.lock();
            shared.host = Some(host.clone());
            let change = self.conn.transition_locked(
                &mut shared,
                ConnectionState::Connecting,
                None,
                None,
            );
            (shared.key.clone(), change)
        };
        self.presented_key = resume.clone();
        tracing::info!(host = %host, resume = resume.is_some(), "opening connection");

        let options = &self.conn.options;
        let client_id = options.client_id.clone();
        let echo = options.echo_messages;
        let format = Format::from_binary_flag(options.use_binary_protocol);
        let transport = self.transport.clone();
        let auth = self.auth.clone();
        self.attempt = Some(Box::pin(async move {
            let credential = auth.current_credential().await?;
            let (tx, rx) = mpsc::unbounded_channel();
            let params = ConnectParams {
                host,
                credential,
                resume,
                client_id,
                echo,
                format,
            };
            let link = transport.open(params, tx).await?;
            Ok::<_, Error>((link, rx))
        }));
        self.timer = Some((
            Instant::now() + options.request_timeout(),
            Timer::ConnectTimeout,
        ));

        self.announce(change, false);
    }

    fn next_host(&mut self) -> String {
        if let Some(cycle) = self.cycle.as_mut()
            && let Some(host) = cycle.next()
        {
            return host;
        }
        let mut cycle = self.hosts.cycle();
        let host = cycle
            .next()
            .unwrap_or_else(|| self.hosts.primary().to_string());
        self.cycle = Some(cycle);
        host
    }

    fn on_attempt_finished(&mut self, outcome: AttemptOutcome) {
        self.attempt = None;
        match outcome {
            Ok((link, events)) => {
                tracing::debug!(host = ?self.attempt_host, "link open, awaiting CONNECTED");
                self.conn.shared.lock().link = Some(link);
                self.events = Some(events);
            }
            Err(e) => self.on_failure(e),
        }
    }

    fn abort_attempt(&mut self) {
        self.attempt = None;
    }

    fn drop_link(&mut self) {
        self.events = None;
        let link = {
            let mut shared = self.conn.shared.lock();
            shared.pings.clear();
            shared.link.take()
        };
        if let Some(link) = link {
            link.close();
        }
    }

    // ========================================================================
    // Link events
    // ========================================================================

    fn on_link_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Message(frame) => self.on_frame(frame),
            TransportEvent::Closed(error) => {
                self.events = None;
                match self.conn.state() {
                    ConnectionState::Closing => self.finish_close(None),
                    ConnectionState::Connecting | ConnectionState::Connected => {
                        let error = error.unwrap_or_else(|| {
                            TransportError::Closed("link closed by peer".to_string())
                        });
                        self.on_failure(error.into());
                    }
                    _ => {}
                }
            }
        }
    }

    fn on_frame(&mut self, frame: ProtocolMessage) {
        match frame.action {
            Action::Heartbeat => {
                if let Some(id) = frame.id.as_deref()
                    && let Some(waiter) = self.conn.shared.lock().pings.remove(id)
                {
                    let _ = waiter.send(());
                }
            }
            Action::Ack => {
                if let Some(range) = ack_range(&frame) {
                    let acked = self.conn.shared.lock().queue.ack(range.clone());
                    tracing::trace!(?range, acked, "ack");
                }
            }
            Action::Nack => {
                if let Some(range) = ack_range(&frame) {
                    let info = frame.error.clone().unwrap_or_else(|| {
                        ErrorInfo::new(codes::BAD_REQUEST, 400, "message rejected")
                    });
                    let nacked = self
                        .conn
                        .shared
                        .lock()
                        .queue
                        .nack(range.clone(), Error::from_info(info));
                    tracing::warn!(?range, nacked, "server rejected messages");
                }
            }
            Action::Connected => self.on_connected(frame),
            Action::Disconnected => {
                let error = frame.error.map(Error::from_info).unwrap_or_else(|| {
                    Error::Transport(TransportError::Closed("server disconnected".to_string()))
                });
                self.on_failure(error);
            }
            Action::Closed => {
                if self.conn.state() == ConnectionState::Closing {
                    self.finish_close(None);
                } else {
                    self.finish_close(frame.error);
                }
            }
            Action::Error if frame.channel.is_none() => {
                let info = frame.error.unwrap_or_else(|| {
                    ErrorInfo::new(codes::CONNECTION_FAILED, 500, "unspecified connection error")
                });
                self.on_failure(Error::from_info(info));
            }
            Action::Attached
            | Action::Detached
            | Action::Message
            | Action::Presence
            | Action::Sync
            | Action::Error => self.channels.route(frame),
            Action::Connect
            | Action::Disconnect
            | Action::Close
            | Action::Attach
            | Action::Detach => {
                tracing::debug!(action = %frame.action, "ignoring client-only action from server");
            }
        }
    }

    fn on_connected(&mut self, frame: ProtocolMessage) {
        let state = self.conn.state();
        if state == ConnectionState::Connected {
            {
                let mut shared = self.conn.shared.lock();
                if frame.connection_id.is_some() {
                    shared.id = frame.connection_id.clone();
                }
                if let Some(key) = frame.connection_key() {
                    shared.key = Some(key.to_string());
                }
                if frame.connection_details.is_some() {
                    shared.details = frame.connection_details.clone();
                }
            }
            let change = ConnectionStateChange::update(state, frame.error);
            self.conn.emitter.emit(&change.event, &change);
            return;
        }
        if state != ConnectionState::Connecting {
            tracing::debug!(%state, "ignoring CONNECTED outside a connection attempt");
            return;
        }

        self.timer = None;
        let (change, resumed, discarded) = {
            let mut shared = self.conn.shared.lock();
            let resumed = self.presented_key.is_some()
                && frame.connection_id.is_some()
                && shared.id == frame.connection_id;

            shared.id = frame.connection_id.clone();
            shared.key = frame.connection_key().map(str::to_string);
            shared.details = frame.connection_details.clone();
            if let Some(ttl) = frame
                .connection_details
                .as_ref()
                .and_then(|details| details.connection_state_ttl)
            {
                shared.state_ttl = Duration::from_millis(ttl);
            }

            let mut frames = Vec::new();
            let mut discarded = 0;
            if resumed {
                frames.extend(shared.queue.unacked());
            } else {
                discarded = shared.queue.reset_epoch();
            }
            frames.extend(shared.queue.assign_queued());
            for frame in frames {
                shared.transmit(frame);
            }

            let change = self.conn.transition_locked(
                &mut shared,
                ConnectionState::Connected,
                frame.error.clone(),
                None,
            );
            (change, resumed, discarded)
        };

        if let Some(host) = self.attempt_host.as_deref() {
            self.hosts.record_success(host);
        }
        self.retry.reset();
        self.cycle = None;
        self.auth_retried = false;

        if self.presented_key.is_some() && !resumed {
            tracing::warn!(discarded, "resume failed; continuity lost");
        }
        self.announce(change, resumed);
    }

    // ========================================================================
    // Failures
    // ========================================================================

    fn on_failure(&mut self, error: Error) {
        self.abort_attempt();
        self.drop_link();
        self.timer = None;

        let state = self.conn.state();
        if matches!(
            state,
            ConnectionState::Initialized
                | ConnectionState::Closed
                | ConnectionState::Failed
                | ConnectionState::Closing
        ) {
            return;
        }

        if matches!(error, Error::AuthInvalid(_)) && !self.auth_retried {
            tracing::warn!(error = %error, "credential rejected; renewing and retrying");
            self.auth_retried = true;
            self.auth.invalidate();
            if state == ConnectionState::Connected {
                self.transition(
                    ConnectionState::Disconnected,
                    Some(error.to_info()),
                    Some(Duration::ZERO),
                );
            }
            self.reuse_host = true;
            self.start_attempt();
            return;
        }
        if matches!(error, Error::AuthInvalid(_) | Error::AuthRenewal(_)) || !error.is_retryable() {
            self.fail(error);
            return;
        }

        let now = Instant::now();
        self.retry.mark_disconnected(now);
        let reason = Some(error.to_info());

        if state == ConnectionState::Connected {
            tracing::info!(error = %error, "connection lost; reconnecting");
            self.transition(ConnectionState::Disconnected, reason, Some(Duration::ZERO));
            self.timer = Some((now, Timer::Retry));
            return;
        }

        let ttl = self.conn.shared.lock().state_ttl;
        match self.retry.record_failure(&self.policy, now, ttl) {
            RetryDecision::Disconnected(delay) => {
                tracing::info!(
                    error = %error,
                    attempt = self.retry.failures(),
                    retry_in = ?delay,
                    "connection attempt failed"
                );
                self.transition(ConnectionState::Disconnected, reason, Some(delay));
                self.timer = Some((now + delay, Timer::Retry));
            }
            RetryDecision::Suspended(delay) => {
                tracing::warn!(error = %error, retry_in = ?delay, "connection suspended");
                self.conn.shared.lock().key = None;
                self.transition(ConnectionState::Suspended, reason, Some(delay));
                self.timer = Some((now + delay, Timer::Retry));
            }
            RetryDecision::Fail(budget) => self.fail(Error::RetryExhausted(budget)),
        }
    }

    fn fail(&mut self, error: Error) {
        self.abort_attempt();
        self.drop_link();
        self.timer = None;
        tracing::error!(error = %error, code = error.error_code(), "connection failed");

        let change = {
            let mut shared = self.conn.shared.lock();
            shared.queue.fail_all(&error);
            shared.key = None;
            shared.id = None;
            self.conn.transition_locked(
                &mut shared,
                ConnectionState::Failed,
                Some(error.to_info()),
                None,
            )
        };
        self.announce(change, false);
    }

    fn finish_close(&mut self, reason: Option<ErrorInfo>) {
        self.abort_attempt();
        self.drop_link();
        self.timer = None;

        let change = {
            let mut shared = self.conn.shared.lock();
            shared.queue.fail_all(&Error::ConnectionClosed);
            shared.key = None;
            shared.id = None;
            self.conn
                .transition_locked(&mut shared, ConnectionState::Closed, reason, None)
        };
        self.announce(change, false);
    }

    // ========================================================================
    // Timers
    // ========================================================================

    fn on_timer(&mut self, timer: Timer) {
        self.timer = None;
        let state = self.conn.state();
        match timer {
            Timer::Retry => {
                if matches!(
                    state,
                    ConnectionState::Disconnected | ConnectionState::Suspended
                ) {
                    self.start_attempt();
                }
            }
            Timer::ConnectTimeout => {
                if state == ConnectionState::Connecting {
                    let host = self.attempt_host.clone().unwrap_or_default();
                    self.on_failure(Error::Transport(TransportError::Unreachable {
                        host,
                        reason: "timed out waiting for CONNECTED".to_string(),
                    }));
                }
            }
            Timer::CloseTimeout => {
                if state == ConnectionState::Closing {
                    tracing::debug!("no CLOSED from server; forcing closed");
                    self.finish_close(None);
                }
            }
        }
    }

    // ========================================================================
    // Notification
    // ========================================================================

    fn transition(
        &mut self,
        next: ConnectionState,
        reason: Option<ErrorInfo>,
        retry_in: Option<Duration>,
    ) {
        let change = {
            let mut shared = self.conn.shared.lock();
            self.conn
                .transition_locked(&mut shared, next, reason, retry_in)
        };
        self.announce(change, false);
    }

    /// Emit a change to connection listeners, then to channels. No lock is held.
    fn announce(&self, change: Option<ConnectionStateChange>, resumed: bool) {
        let Some(change) = change else {
            return;
        };
        tracing::info!(
            from = %change.previous,
            to = %change.current,
            reason = ?change.reason.as_ref().map(|r| r.code),
            "connection state changed"
        );
        self.conn.emitter.emit(&change.event, &change);
        self.channels.on_connection_change(&change, resumed);
    }
}

/// Serial range of an ACK/NACK, logging frames whose range is unusable.
fn ack_range(frame: &ProtocolMessage) -> Option<std::ops::Range<i64>> {
    let range = frame.ack_range();
    if range.is_none() {
        tracing::warn!(
            action = %frame.action,
            msg_serial = ?frame.msg_serial,
            count = ?frame.count,
            "ignoring malformed acknowledgement"
        );
    }
    range
}

async fn poll_attempt(attempt: &mut Option<AttemptFuture>) -> AttemptOutcome {
    match attempt {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn next_event(events: &mut Option<mpsc::UnboundedReceiver<TransportEvent>>) -> TransportEvent {
    match events {
        Some(rx) => rx.recv().await.unwrap_or_else(|| {
            TransportEvent::Closed(Some(TransportError::Closed(
                "link event stream ended".to_string(),
            )))
        }),
        None => std::future::pending().await,
    }
}

async fn fire(timer: &Option<(Instant, Timer)>) -> Timer {
    match timer {
        Some((deadline, kind)) => {
            sleep_until(*deadline).await;
            *kind
        }
        None => std::future::pending().await,
    }
}
