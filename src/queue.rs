//! Outbound message queue with serial assignment.
//!
//! Frames wait in `queued` until the connection can transmit them. Transmission
//! assigns the next serial and moves the frame to `sent`, where it stays until an
//! ACK or NACK covering its serial arrives. Serials are assigned exactly once per
//! frame per epoch, in transmission order.

use std::collections::VecDeque;
use std::future::Future;
use std::ops::Range;
use std::pin::Pin;
use std::task::{Context, Poll};

use rtmux_proto::ProtocolMessage;
use tokio::sync::oneshot;

use crate::error::{Error, Result};

type Completion = oneshot::Sender<Result<()>>;

/// Resolves when the server acknowledges a publish, or when it definitively fails.
#[derive(Debug)]
#[must_use = "a publish handle does nothing unless awaited"]
pub struct PublishHandle {
    rx: oneshot::Receiver<Result<()>>,
}

impl PublishHandle {
    /// Create a handle and the sender that completes it.
    pub(crate) fn channel() -> (Completion, Self) {
        let (tx, rx) = oneshot::channel();
        (tx, Self { rx })
    }
}

impl Future for PublishHandle {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|res| match res {
            Ok(result) => result,
            Err(_) => Err(Error::Discarded(
                "client dropped before the message was acknowledged".to_string(),
            )),
        })
    }
}

/// An outbound frame and the handle waiting on it.
#[derive(Debug)]
pub struct PendingMessage {
    pub(crate) frame: ProtocolMessage,
    /// Whether the frame may be resent with a new serial after continuity is lost.
    pub(crate) retry_eligible: bool,
    completion: Option<Completion>,
}

impl PendingMessage {
    pub(crate) fn new(frame: ProtocolMessage, retry_eligible: bool) -> (Self, PublishHandle) {
        let (tx, handle) = PublishHandle::channel();
        (
            Self {
                frame,
                retry_eligible,
                completion: Some(tx),
            },
            handle,
        )
    }

    pub(crate) fn serial(&self) -> Option<i64> {
        self.frame.msg_serial
    }

    pub(crate) fn channel(&self) -> Option<&str> {
        self.frame.channel.as_deref()
    }

    /// Resolve the publish handle. Later calls are no-ops.
    pub(crate) fn complete(&mut self, result: Result<()>) {
        if let Some(tx) = self.completion.take() {
            let _ = tx.send(result);
        }
    }
}

impl Drop for PendingMessage {
    fn drop(&mut self) {
        self.complete(Err(Error::Discarded(
            "message dropped before it was acknowledged".to_string(),
        )));
    }
}

/// Connection-wide outbound queue.
#[derive(Debug, Default)]
pub struct MessageQueue {
    next_serial: i64,
    sent: VecDeque<PendingMessage>,
    queued: VecDeque<PendingMessage>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serial the next transmitted frame will get.
    pub fn next_serial(&self) -> i64 {
        self.next_serial
    }

    /// Frames transmitted but not yet acknowledged.
    pub fn in_flight(&self) -> usize {
        self.sent.len()
    }

    /// Frames waiting for transmission.
    pub fn queued(&self) -> usize {
        self.queued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.is_empty() && self.queued.is_empty()
    }

    /// Hold a frame until the connection can transmit it.
    pub fn enqueue(&mut self, pending: PendingMessage) {
        self.queued.push_back(pending);
    }

    /// Assign the next serial to `pending` and track it until acknowledged.
    ///
    /// Returns the frame to put on the wire.
    pub fn assign(&mut self, mut pending: PendingMessage) -> ProtocolMessage {
        pending.frame.msg_serial = Some(self.next_serial);
        self.next_serial += 1;
        let frame = pending.frame.clone();
        self.sent.push_back(pending);
        frame
    }

    /// Transmit every queued frame in enqueue order.
    pub fn assign_queued(&mut self) -> Vec<ProtocolMessage> {
        let mut frames = Vec::with_capacity(self.queued.len());
        while let Some(pending) = self.queued.pop_front() {
            frames.push(self.assign(pending));
        }
        frames
    }

    /// Frames awaiting ack, with their original serials, for retransmission
    /// after a confirmed resume.
    pub fn unacked(&self) -> Vec<ProtocolMessage> {
        self.sent.iter().map(|pending| pending.frame.clone()).collect()
    }

    /// Resolve every in-flight frame whose serial is in `range`.
    ///
    /// Unknown or already-acknowledged serials are ignored. Returns the number
    /// of frames resolved.
    pub fn ack(&mut self, range: Range<i64>) -> usize {
        self.resolve(range, || Ok(()))
    }

    /// Fail every in-flight frame whose serial is in `range`.
    pub fn nack(&mut self, range: Range<i64>, error: Error) -> usize {
        self.resolve(range, || Err(error.clone()))
    }

    fn resolve(&mut self, range: Range<i64>, result: impl Fn() -> Result<()>) -> usize {
        let mut resolved = 0;
        self.sent.retain_mut(|pending| match pending.serial() {
            Some(serial) if range.contains(&serial) => {
                pending.complete(result());
                resolved += 1;
                false
            }
            _ => true,
        });
        resolved
    }

    /// Start a new serial epoch after continuity was lost.
    ///
    /// Eligible in-flight frames go back to the front of the queue, ahead of
    /// frames that were never sent, and will be renumbered on transmission.
    /// Ineligible ones fail with `ContinuityLost`.
    pub fn reset_epoch(&mut self) -> usize {
        self.next_serial = 0;
        let mut failed = 0;
        let mut requeue = VecDeque::with_capacity(self.sent.len() + self.queued.len());
        for mut pending in self.sent.drain(..) {
            if pending.retry_eligible {
                pending.frame.msg_serial = None;
                requeue.push_back(pending);
            } else {
                pending.complete(Err(Error::ContinuityLost(
                    "connection was not resumed".to_string(),
                )));
                failed += 1;
            }
        }
        requeue.append(&mut self.queued);
        self.queued = requeue;
        failed
    }

    /// Fail every frame, sent or queued, with `error`.
    pub fn fail_all(&mut self, error: &Error) -> usize {
        let count = self.sent.len() + self.queued.len();
        for mut pending in self.sent.drain(..).chain(self.queued.drain(..)) {
            pending.complete(Err(error.clone()));
        }
        count
    }

    /// Fail queued (never transmitted) frames for `channel`.
    pub fn fail_channel(&mut self, channel: &str, error: &Error) -> usize {
        let mut failed = 0;
        self.queued.retain_mut(|pending| {
            if pending.channel() == Some(channel) {
                pending.complete(Err(error.clone()));
                failed += 1;
                false
            } else {
                true
            }
        });
        failed
    }
}
