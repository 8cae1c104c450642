//! Channel state machine.
//!
//! Each channel serializes its mutations through one lock. Work that crosses
//! into the connection (writing ATTACH, handing over messages) and every
//! emission is collected into [`Effects`] while the lock is held and performed
//! after it is released.

mod state;

pub use state::{ChannelEvent, ChannelState, ChannelStateChange, DetachPolicy};
pub(crate) use state::ChannelStatus;

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use rtmux_proto::{
    Action, ErrorInfo, Flags, Message, PresenceAction, PresenceMessage, ProtocolMessage, codes,
    sync::is_sync_end,
};
use tokio::sync::{broadcast, watch};
use tracing::Span;

use crate::connection::{ConnectionInner, ConnectionState};
use crate::emitter::{EventEmitter, ListenerFailure, Subscription};
use crate::error::{Error, Result};
use crate::presence::{Presence, PresenceMap};
use crate::queue::{PendingMessage, PublishHandle};
use crate::telemetry::spans;
use crate::wait::Wait;

// ============================================================================
// Effects
// ============================================================================

enum Notice {
    State(ChannelStateChange),
    Message(Message),
    Presence(PresenceMessage),
}

/// Work produced under the channel lock, performed after it is released.
#[derive(Default)]
struct Effects {
    notices: Vec<Notice>,
    frames: Vec<ProtocolMessage>,
    failed: Vec<(PendingMessage, Error)>,
    fail_queued: Option<Error>,
    connect: bool,
    flush: bool,
}

impl Effects {
    fn state(&mut self, change: Option<ChannelStateChange>) {
        if let Some(change) = change {
            self.notices.push(Notice::State(change));
        }
    }

    fn presence(&mut self, records: Vec<PresenceMessage>) {
        self.notices
            .extend(records.into_iter().map(Notice::Presence));
    }

    fn fail_pending(&mut self, pending: &mut VecDeque<PendingMessage>, error: &Error) {
        self.failed
            .extend(pending.drain(..).map(|p| (p, error.clone())));
    }
}

// ============================================================================
// Channel
// ============================================================================

struct ChannelShared {
    state: ChannelState,
    error: Option<ErrorInfo>,
    /// Messages published while not attached, in publish order.
    pending: VecDeque<PendingMessage>,
    flushing: bool,
    presence: PresenceMap,
    /// Attached when the connection dropped; a failed resume owes one update.
    attached_before_drop: bool,
}

pub(crate) struct ChannelInner {
    name: String,
    connection: Arc<ConnectionInner>,
    shared: Mutex<ChannelShared>,
    status_tx: watch::Sender<ChannelStatus>,
    state_events: EventEmitter<ChannelEvent, ChannelStateChange>,
    messages: EventEmitter<String, Message>,
    presence_events: EventEmitter<PresenceAction, PresenceMessage>,
    span: Span,
}

/// A named channel multiplexed over the connection.
#[derive(Clone)]
pub struct RealtimeChannel {
    inner: Arc<ChannelInner>,
}

impl RealtimeChannel {
    pub(crate) fn new(name: &str, connection: Arc<ConnectionInner>) -> Self {
        let (status_tx, _) = watch::channel(ChannelStatus::default());
        Self {
            inner: Arc::new(ChannelInner {
                name: name.to_string(),
                connection,
                shared: Mutex::new(ChannelShared {
                    state: ChannelState::Initialized,
                    error: None,
                    pending: VecDeque::new(),
                    flushing: false,
                    presence: PresenceMap::new(),
                    attached_before_drop: false,
                }),
                status_tx,
                state_events: EventEmitter::new(),
                messages: EventEmitter::new(),
                presence_events: EventEmitter::new(),
                span: spans::channel(name),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> ChannelState {
        self.inner.shared.lock().state
    }

    /// Error behind the most recent failing transition.
    pub fn error_reason(&self) -> Option<ErrorInfo> {
        self.inner.shared.lock().error.clone()
    }

    /// Messages queued on the channel waiting for attachment.
    pub fn pending_count(&self) -> usize {
        self.inner.shared.lock().pending.len()
    }

    pub fn presence(&self) -> Presence<'_> {
        Presence::new(self)
    }

    pub fn on(
        &self,
        event: ChannelEvent,
        listener: impl Fn(&ChannelStateChange) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.state_events.on(event, listener)
    }

    pub fn once(
        &self,
        event: ChannelEvent,
        listener: impl Fn(&ChannelStateChange) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.state_events.once(event, listener)
    }

    pub fn on_all(
        &self,
        listener: impl Fn(&ChannelStateChange) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.state_events.on_all(listener)
    }

    /// Listener panics on this channel's state, message and presence events.
    pub fn listener_failures(&self) -> Vec<broadcast::Receiver<ListenerFailure>> {
        vec![
            self.inner.state_events.failures(),
            self.inner.messages.failures(),
            self.inner.presence_events.failures(),
        ]
    }

    // ========================================================================
    // Attach / detach
    // ========================================================================

    /// Start attaching. Returns once the request is under way.
    pub fn attach(&self) -> Result<()> {
        let mut effects = Effects::default();
        {
            let mut shared = self.inner.shared.lock();
            if matches!(
                shared.state,
                ChannelState::Attaching | ChannelState::Attached
            ) {
                return Ok(());
            }
            let connection = self.inner.connection.state();
            if matches!(
                connection,
                ConnectionState::Closing
                    | ConnectionState::Closed
                    | ConnectionState::Failed
                    | ConnectionState::Suspended
            ) {
                return Err(Error::invalid_state(
                    "attach",
                    format!("connection {connection}"),
                ));
            }
            self.inner
                .begin_attach(&mut shared, &mut effects, connection, None);
        }
        self.inner.apply(effects);
        Ok(())
    }

    /// Attach and wait for the outcome.
    ///
    /// A timeout or cancellation ends the wait only; the attach continues.
    pub async fn attach_wait(&self, wait: Wait) -> Result<()> {
        self.attach()?;
        let mut rx = self.inner.status_tx.subscribe();
        wait.run("attach", async move {
            let state = rx
                .wait_for(|status| {
                    matches!(
                        status.state,
                        ChannelState::Attached
                            | ChannelState::Failed
                            | ChannelState::Detaching
                            | ChannelState::Detached
                    )
                })
                .await
                .map_err(|_| Error::ChannelDetached(self.inner.name.clone()))?
                .state;
            match state {
                ChannelState::Attached => Ok(()),
                ChannelState::Failed => Err(self.inner.failure()),
                _ => Err(Error::ChannelDetached(self.inner.name.clone())),
            }
        })
        .await
    }

    /// Detach, failing queued messages with [`Error::ChannelDetached`].
    pub fn detach(&self) -> Result<()> {
        self.detach_with(DetachPolicy::Fail)
    }

    /// Detach, resolving queued messages per `policy`.
    pub fn detach_with(&self, policy: DetachPolicy) -> Result<()> {
        let mut effects = Effects::default();
        {
            let mut shared = self.inner.shared.lock();
            let connected = self.inner.connection.state() == ConnectionState::Connected;
            match shared.state {
                ChannelState::Failed => {
                    return Err(Error::invalid_state("detach", ChannelState::Failed));
                }
                ChannelState::Initialized | ChannelState::Detaching | ChannelState::Detached => {}
                ChannelState::Attached | ChannelState::Attaching if connected => {
                    let change = self.inner.set_state(&mut shared, ChannelState::Detaching, None, false);
                    effects.state(change);
                    effects
                        .frames
                        .push(ProtocolMessage::for_channel(Action::Detach, &self.inner.name));
                }
                ChannelState::Attached | ChannelState::Attaching | ChannelState::Suspended => {
                    let change = self.inner.set_state(&mut shared, ChannelState::Detached, None, false);
                    effects.state(change);
                }
            }
            shared.presence.clear();
            let error = policy.error(&self.inner.name);
            effects.fail_pending(&mut shared.pending, &error);
            effects.fail_queued = Some(error);
        }
        self.inner.apply(effects);
        Ok(())
    }

    /// Detach and wait until detached.
    pub async fn detach_wait(&self, policy: DetachPolicy, wait: Wait) -> Result<()> {
        self.detach_with(policy)?;
        let mut rx = self.inner.status_tx.subscribe();
        wait.run("detach", async move {
            let state = rx
                .wait_for(|status| {
                    matches!(
                        status.state,
                        ChannelState::Initialized
                            | ChannelState::Detached
                            | ChannelState::Failed
                            | ChannelState::Attaching
                    )
                })
                .await
                .map_err(|_| Error::ChannelDetached(self.inner.name.clone()))?
                .state;
            match state {
                ChannelState::Failed => Err(self.inner.failure()),
                ChannelState::Attaching => Err(Error::invalid_state("detach", "attaching")),
                _ => Ok(()),
            }
        })
        .await
    }

    // ========================================================================
    // Messages
    // ========================================================================

    /// Publish one message. Queued until attached; resolves on ack.
    pub fn publish(&self, name: impl Into<String>, data: serde_json::Value) -> Result<PublishHandle> {
        self.publish_messages(vec![Message::new(name, data)])
    }

    /// Publish several messages in one frame.
    pub fn publish_messages(&self, messages: Vec<Message>) -> Result<PublishHandle> {
        let frame = ProtocolMessage::messages(self.inner.name.clone(), messages);
        self.inner.submit(frame, true)
    }

    /// Listen for messages named `name`, or every message with `None`.
    ///
    /// Attaches the channel if it was never attached.
    pub fn subscribe(
        &self,
        name: Option<&str>,
        listener: impl Fn(&Message) + Send + Sync + 'static,
    ) -> Result<Subscription> {
        self.implicit_attach()?;
        Ok(match name {
            Some(name) => self.inner.messages.on(name.to_string(), listener),
            None => self.inner.messages.on_all(listener),
        })
    }

    fn implicit_attach(&self) -> Result<()> {
        if self.state() == ChannelState::Initialized {
            self.attach()?;
        }
        Ok(())
    }

    // ========================================================================
    // Presence
    // ========================================================================

    pub(crate) fn presence_send(&self, action: PresenceAction, data: Option<serde_json::Value>) -> Result<PublishHandle> {
        let client_id = self
            .inner
            .connection
            .options
            .client_id
            .clone()
            .ok_or(Error::MissingClientId("publish presence"))?;
        if matches!(
            self.state(),
            ChannelState::Initialized | ChannelState::Detached
        ) {
            self.attach()?;
        }
        let record = PresenceMessage::new(action, data).with_client_id(client_id);
        let frame = ProtocolMessage::presence(self.inner.name.clone(), vec![record]);
        self.inner.submit(frame, false)
    }

    pub(crate) fn presence_members(&self) -> Vec<PresenceMessage> {
        self.inner.shared.lock().presence.members()
    }

    pub(crate) fn presence_syncing(&self) -> bool {
        self.inner.shared.lock().presence.is_syncing()
    }

    pub(crate) async fn presence_get(&self, wait: Wait) -> Result<Vec<PresenceMessage>> {
        if matches!(
            self.state(),
            ChannelState::Initialized | ChannelState::Detached
        ) {
            self.attach()?;
        }
        let mut rx = self.inner.status_tx.subscribe();
        wait.run("presence get", async move {
            let state = rx
                .wait_for(|status| {
                    (status.state == ChannelState::Attached && status.presence_synced)
                        || matches!(status.state, ChannelState::Failed | ChannelState::Detached)
                })
                .await
                .map_err(|_| Error::ChannelDetached(self.inner.name.clone()))?
                .state;
            match state {
                ChannelState::Attached => Ok(self.presence_members()),
                ChannelState::Failed => Err(self.inner.failure()),
                _ => Err(Error::ChannelDetached(self.inner.name.clone())),
            }
        })
        .await
    }

    pub(crate) fn presence_subscribe(
        &self,
        action: Option<PresenceAction>,
        listener: impl Fn(&PresenceMessage) + Send + Sync + 'static,
    ) -> Result<Subscription> {
        self.implicit_attach()?;
        Ok(match action {
            Some(action) => self.inner.presence_events.on(action, listener),
            None => self.inner.presence_events.on_all(listener),
        })
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    /// Handle a channel-scoped frame from the connection driver.
    pub(crate) fn handle_frame(&self, mut frame: ProtocolMessage) {
        if matches!(frame.action, Action::Message | Action::Presence | Action::Sync) {
            frame.stamp_now();
        }
        match frame.action {
            Action::Attached => self.inner.on_attached(&frame),
            Action::Detached => self.inner.on_detached(&frame),
            Action::Error => self.inner.on_error(&frame),
            Action::Message => self.inner.on_message(&frame),
            Action::Presence => self.inner.on_presence(&frame),
            Action::Sync => self.inner.on_sync(&frame),
            other => {
                tracing::debug!(parent: &self.inner.span, action = %other, "unexpected channel frame");
            }
        }
    }

    /// React to a connection state change. Called with no lock held.
    pub(crate) fn on_connection_change(
        &self,
        change: &crate::connection::ConnectionStateChange,
        resumed: bool,
    ) {
        self.inner.on_connection_change(change, resumed);
    }
}

impl std::fmt::Debug for RealtimeChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeChannel")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ChannelInner {
    fn set_state(
        &self,
        shared: &mut ChannelShared,
        next: ChannelState,
        reason: Option<ErrorInfo>,
        resumed: bool,
    ) -> Option<ChannelStateChange> {
        let previous = shared.state;
        if previous == next {
            return None;
        }
        shared.state = next;
        if previous == ChannelState::Attached {
            shared.presence.abandon_sync();
        }
        if reason.is_some() {
            shared.error = reason.clone();
        } else if next == ChannelState::Attached {
            shared.error = None;
        }
        let synced = next == ChannelState::Attached && !shared.presence.is_syncing();
        self.status_tx.send_modify(|status| {
            status.state = next;
            status.presence_synced = synced;
        });
        Some(ChannelStateChange {
            previous,
            current: next,
            event: next.into(),
            reason,
            resumed,
        })
    }

    fn set_synced(&self, synced: bool) {
        self.status_tx
            .send_modify(|status| status.presence_synced = synced);
    }

    fn failure(&self) -> Error {
        self.failure_locked(&self.shared.lock())
    }

    /// Move to attaching and arrange for ATTACH to be written.
    fn begin_attach(
        &self,
        shared: &mut ChannelShared,
        effects: &mut Effects,
        connection: ConnectionState,
        reason: Option<ErrorInfo>,
    ) {
        let threshold = self.connection.options.presence_stale_threshold();
        if shared.presence.stale_longer_than(threshold) {
            tracing::debug!(parent: &self.span, "presence stale past threshold; clearing");
            let leaves = shared.presence.clear();
            effects.presence(leaves);
        }
        let change = self.set_state(shared, ChannelState::Attaching, reason, false);
        effects.state(change);
        match connection {
            ConnectionState::Connected => effects
                .frames
                .push(ProtocolMessage::for_channel(Action::Attach, &self.name)),
            ConnectionState::Initialized => effects.connect = true,
            _ => {}
        }
    }

    fn submit(&self, frame: ProtocolMessage, retry_eligible: bool) -> Result<PublishHandle> {
        let mut effects = Effects::default();
        let (direct, handle) = {
            let mut shared = self.shared.lock();
            if shared.state == ChannelState::Failed {
                return Err(self.failure_locked(&shared));
            }
            let connection = self.connection.state();
            if !connection.accepts_publish(self.connection.options.queue_messages) {
                return Err(Error::invalid_state(
                    "publish",
                    format!("connection {connection}"),
                ));
            }

            if shared.state == ChannelState::Attached && !shared.flushing && shared.pending.is_empty()
            {
                let (pending, handle) = PendingMessage::new(frame, retry_eligible);
                (Some(pending), handle)
            } else {
                let limit = self.connection.options.max_channel_queue;
                if shared.pending.len() >= limit {
                    tracing::warn!(parent: &self.span, limit, "channel queue full");
                    return Err(Error::QueueFull {
                        channel: self.name.clone(),
                        limit,
                    });
                }
                let (pending, handle) = PendingMessage::new(frame, retry_eligible);
                shared.pending.push_back(pending);
                if shared.state == ChannelState::Initialized {
                    self.begin_attach(&mut shared, &mut effects, connection, None);
                }
                (None, handle)
            }
        };
        self.apply(effects);
        if let Some(pending) = direct {
            self.connection.submit(pending);
        }
        Ok(handle)
    }

    fn failure_locked(&self, shared: &ChannelShared) -> Error {
        Error::ChannelFailed {
            channel: self.name.clone(),
            reason: shared
                .error
                .as_ref()
                .map(|info| info.message.clone())
                .unwrap_or_else(|| "channel failed".to_string()),
        }
    }

    /// Hand queued messages to the connection in publish order.
    fn flush(&self) {
        {
            let mut shared = self.shared.lock();
            if shared.flushing {
                return;
            }
            shared.flushing = true;
        }
        loop {
            let batch: Vec<PendingMessage> = {
                let mut shared = self.shared.lock();
                if shared.state != ChannelState::Attached || shared.pending.is_empty() {
                    shared.flushing = false;
                    break;
                }
                shared.pending.drain(..).collect()
            };
            tracing::debug!(parent: &self.span, count = batch.len(), "flushing queued messages");
            for pending in batch {
                self.connection.submit(pending);
            }
        }
    }

    fn apply(&self, effects: Effects) {
        for (mut pending, error) in effects.failed {
            pending.complete(Err(error));
        }
        if let Some(error) = effects.fail_queued {
            self.connection.fail_channel_queued(&self.name, &error);
        }
        for notice in effects.notices {
            match notice {
                Notice::State(change) => {
                    tracing::debug!(
                        parent: &self.span,
                        from = %change.previous,
                        to = %change.current,
                        event = ?change.event,
                        resumed = change.resumed,
                        "channel state changed"
                    );
                    self.state_events.emit(&change.event, &change);
                }
                Notice::Message(message) => {
                    let name = message.name.clone().unwrap_or_default();
                    self.messages.emit(&name, &message);
                }
                Notice::Presence(record) => {
                    self.presence_events.emit(&record.action, &record);
                }
            }
        }
        for frame in effects.frames {
            self.connection.send_frame(frame);
        }
        if effects.connect {
            self.connection.request_connect();
        }
        if effects.flush {
            self.flush();
        }
    }

    // ========================================================================
    // Inbound handlers
    // ========================================================================

    fn on_attached(&self, frame: &ProtocolMessage) {
        let resumed = frame.has_flag(Flags::RESUMED);
        let has_presence = frame.has_flag(Flags::HAS_PRESENCE);
        let mut effects = Effects::default();
        {
            let mut shared = self.shared.lock();
            match shared.state {
                ChannelState::Attaching | ChannelState::Suspended => {
                    shared.attached_before_drop = false;
                    self.start_presence(&mut shared, &mut effects, has_presence);
                    let change =
                        self.set_state(&mut shared, ChannelState::Attached, frame.error.clone(), resumed);
                    effects.state(change);
                    effects.flush = true;
                }
                ChannelState::Attached if !resumed => {
                    tracing::warn!(parent: &self.span, "attachment replaced without resume; continuity lost");
                    self.start_presence(&mut shared, &mut effects, has_presence);
                    if !has_presence {
                        self.set_synced(true);
                    }
                    effects.notices.push(Notice::State(ChannelStateChange::update(
                        ChannelState::Attached,
                        frame.error.clone(),
                        false,
                    )));
                }
                state => {
                    tracing::debug!(parent: &self.span, %state, "ignoring ATTACHED");
                }
            }
        }
        self.apply(effects);
    }

    fn start_presence(&self, shared: &mut ChannelShared, effects: &mut Effects, has_presence: bool) {
        if has_presence {
            shared.presence.start_sync();
            self.set_synced(false);
        } else {
            let leaves = shared.presence.clear();
            effects.presence(leaves);
        }
    }

    fn on_detached(&self, frame: &ProtocolMessage) {
        let mut effects = Effects::default();
        {
            let mut shared = self.shared.lock();
            match shared.state {
                ChannelState::Detaching => {
                    let change =
                        self.set_state(&mut shared, ChannelState::Detached, frame.error.clone(), false);
                    effects.state(change);
                }
                ChannelState::Attached | ChannelState::Attaching => {
                    tracing::warn!(
                        parent: &self.span,
                        reason = ?frame.error.as_ref().map(|e| e.code),
                        "unsolicited DETACHED; re-attaching"
                    );
                    shared.presence.mark_stale();
                    if frame.error.is_some() {
                        shared.error = frame.error.clone();
                    }
                    let connection = self.connection.state();
                    self.begin_attach(&mut shared, &mut effects, connection, frame.error.clone());
                }
                state => {
                    tracing::debug!(parent: &self.span, %state, "ignoring DETACHED");
                }
            }
        }
        self.apply(effects);
    }

    fn on_error(&self, frame: &ProtocolMessage) {
        let info = frame.error.clone().unwrap_or_else(|| {
            ErrorInfo::new(codes::CHANNEL_OPERATION_FAILED, 500, "channel operation failed")
        });
        tracing::error!(parent: &self.span, code = info.code, reason = %info.message, "channel failed");
        let mut effects = Effects::default();
        {
            let mut shared = self.shared.lock();
            shared.presence.clear();
            let change = self.set_state(&mut shared, ChannelState::Failed, Some(info.clone()), false);
            effects.state(change);
            let error = Error::ChannelFailed {
                channel: self.name.clone(),
                reason: info.message.clone(),
            };
            effects.fail_pending(&mut shared.pending, &error);
            effects.fail_queued = Some(error);
        }
        self.apply(effects);
    }

    fn on_message(&self, frame: &ProtocolMessage) {
        if self.shared.lock().state != ChannelState::Attached {
            tracing::debug!(parent: &self.span, "dropping MESSAGE while not attached");
            return;
        }
        let effects = Effects {
            notices: populate_messages(frame)
                .into_iter()
                .map(Notice::Message)
                .collect(),
            ..Effects::default()
        };
        self.apply(effects);
    }

    fn on_presence(&self, frame: &ProtocolMessage) {
        let mut effects = Effects::default();
        {
            let mut shared = self.shared.lock();
            if shared.state != ChannelState::Attached {
                tracing::debug!(parent: &self.span, "dropping PRESENCE while not attached");
                return;
            }
            for record in populate_presence(frame) {
                shared.presence.apply_point(&record);
                effects.notices.push(Notice::Presence(record));
            }
        }
        self.apply(effects);
    }

    fn on_sync(&self, frame: &ProtocolMessage) {
        let mut effects = Effects::default();
        {
            let mut shared = self.shared.lock();
            if shared.state != ChannelState::Attached {
                tracing::debug!(parent: &self.span, "dropping SYNC while not attached");
                return;
            }
            shared.presence.apply_sync(populate_presence(frame));
            if is_sync_end(frame.channel_serial.as_deref()) {
                let leaves = shared.presence.end_sync();
                tracing::debug!(
                    parent: &self.span,
                    members = shared.presence.len(),
                    departed = leaves.len(),
                    "presence sync complete"
                );
                effects.presence(leaves);
                self.set_synced(true);
            } else {
                self.set_synced(false);
            }
        }
        self.apply(effects);
    }

    fn on_connection_change(
        &self,
        change: &crate::connection::ConnectionStateChange,
        resumed: bool,
    ) {
        use crate::connection::ConnectionEvent;

        if change.event == ConnectionEvent::Update {
            return;
        }
        let mut effects = Effects::default();
        {
            let mut shared = self.shared.lock();
            match change.current {
                ConnectionState::Connected if shared.state == ChannelState::Detaching => {
                    // A DETACH written to the old link may never have arrived.
                    if resumed {
                        effects
                            .frames
                            .push(ProtocolMessage::for_channel(Action::Detach, &self.name));
                    } else {
                        let change =
                            self.set_state(&mut shared, ChannelState::Detached, None, false);
                        effects.state(change);
                    }
                }
                ConnectionState::Connected => {
                    if matches!(
                        shared.state,
                        ChannelState::Attaching | ChannelState::Attached | ChannelState::Suspended
                    ) {
                        if !resumed && shared.attached_before_drop {
                            effects.notices.push(Notice::State(ChannelStateChange::update(
                                shared.state,
                                change.reason.clone(),
                                false,
                            )));
                        }
                        shared.attached_before_drop = false;
                        self.begin_attach(&mut shared, &mut effects, ConnectionState::Connected, None);
                    }
                }
                ConnectionState::Disconnected | ConnectionState::Suspended => {
                    let dropped = change.previous == ConnectionState::Connected
                        || change.current == ConnectionState::Suspended;
                    if dropped
                        && matches!(
                            shared.state,
                            ChannelState::Attached | ChannelState::Attaching
                        )
                    {
                        shared.attached_before_drop |= shared.state == ChannelState::Attached;
                        shared.presence.mark_stale();
                        let change = self.set_state(
                            &mut shared,
                            ChannelState::Suspended,
                            change.reason.clone(),
                            false,
                        );
                        effects.state(change);
                    }
                }
                ConnectionState::Closed => {
                    if matches!(
                        shared.state,
                        ChannelState::Attaching
                            | ChannelState::Attached
                            | ChannelState::Suspended
                            | ChannelState::Detaching
                    ) {
                        shared.presence.clear();
                        let change =
                            self.set_state(&mut shared, ChannelState::Detached, None, false);
                        effects.state(change);
                    }
                    effects.fail_pending(&mut shared.pending, &Error::ConnectionClosed);
                }
                ConnectionState::Failed => {
                    let reason = change.reason.clone();
                    if matches!(
                        shared.state,
                        ChannelState::Attaching
                            | ChannelState::Attached
                            | ChannelState::Suspended
                            | ChannelState::Detaching
                    ) {
                        shared.presence.clear();
                        let change =
                            self.set_state(&mut shared, ChannelState::Failed, reason.clone(), false);
                        effects.state(change);
                    }
                    let error = Error::ConnectionFailed(
                        reason
                            .map(|info| info.message)
                            .unwrap_or_else(|| "connection failed".to_string()),
                    );
                    effects.fail_pending(&mut shared.pending, &error);
                }
                ConnectionState::Initialized
                | ConnectionState::Connecting
                | ConnectionState::Closing => {}
            }
        }
        self.apply(effects);
    }
}

/// Fill message fields the server leaves to the enclosing frame.
fn populate_messages(frame: &ProtocolMessage) -> Vec<Message> {
    frame
        .messages
        .iter()
        .enumerate()
        .map(|(index, message)| {
            let mut message = message.clone();
            if message.id.is_none() {
                message.id = frame.id.as_ref().map(|id| format!("{id}:{index}"));
            }
            if message.connection_id.is_none() {
                message.connection_id = frame.connection_id.clone();
            }
            if message.timestamp.is_none() {
                message.timestamp = frame.timestamp;
            }
            message
        })
        .collect()
}

fn populate_presence(frame: &ProtocolMessage) -> Vec<PresenceMessage> {
    frame
        .presence
        .iter()
        .enumerate()
        .map(|(index, record)| {
            let mut record = record.clone();
            if record.id.is_none() {
                record.id = frame.id.as_ref().map(|id| format!("{id}:{index}"));
            }
            if record.connection_id.is_none() {
                record.connection_id = frame.connection_id.clone();
            }
            if record.timestamp.is_none() {
                record.timestamp = frame.timestamp;
            }
            record
        })
        .collect()
}
