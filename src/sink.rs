//! Multicast delivery of inbound activities to consumers.
//!
//! The sink is the single stable publisher owned by the connection
//! controller; each connection's inbound handler receives a clone at
//! construction. Consumers subscribe through [`ActivityStream`].

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::debug;

use crate::{error::ActivityStreamError, types::Activity};

#[derive(Clone, Debug)]
enum ActivityEvent {
    Activity(Activity),
    Failed(ActivityStreamError),
    Completed,
}

/// Publisher side of the activity stream.
#[derive(Clone)]
pub(crate) struct ActivitySink {
    tx: broadcast::Sender<ActivityEvent>,
    closed: Arc<watch::Sender<bool>>,
}

impl ActivitySink {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        let (closed, _) = watch::channel(false);
        Self {
            tx,
            closed: Arc::new(closed),
        }
    }

    /// Deliver an activity to all subscribers. No-op once terminated.
    pub(crate) fn publish(&self, activity: Activity) {
        if self.is_closed() {
            return;
        }
        if self.tx.send(ActivityEvent::Activity(activity)).is_err() {
            debug!("No activity subscribers; dropping inbound activity");
        }
    }

    /// Terminate the stream with an error. Idempotent; the first failure wins.
    pub(crate) fn fail(&self, error: ActivityStreamError) {
        if self.closed.send_replace(true) {
            return;
        }
        let _ = self.tx.send(ActivityEvent::Failed(error));
    }

    /// Terminate the stream gracefully (used by `end()`).
    pub(crate) fn complete(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        let _ = self.tx.send(ActivityEvent::Completed);
    }

    pub(crate) fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Watch receiver that flips to `true` when the stream terminates.
    pub(crate) fn closed_watch(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    pub(crate) fn subscribe(&self) -> ActivityStream {
        // A subscriber arriving after termination would never see the
        // terminal event (broadcast only delivers what is sent after the
        // subscription), so it starts out finished.
        ActivityStream {
            rx: self.tx.subscribe(),
            done: self.is_closed(),
        }
    }
}

/// Consumer side of the activity stream.
///
/// Yields activities in delivery order. A `Some(Err(_))` item is terminal;
/// `None` means the stream completed (after `end()`) or the client was
/// dropped.
pub struct ActivityStream {
    rx: broadcast::Receiver<ActivityEvent>,
    done: bool,
}

impl ActivityStream {
    /// Adapt into a [`futures_util::Stream`] of activity results.
    pub fn into_stream(
        self,
    ) -> impl futures_util::Stream<Item = Result<Activity, ActivityStreamError>> {
        futures_util::stream::unfold(self, |mut stream| async move {
            stream.recv().await.map(|item| (item, stream))
        })
    }

    /// Receive the next activity.
    pub async fn recv(&mut self) -> Option<Result<Activity, ActivityStreamError>> {
        if self.done {
            return None;
        }
        loop {
            match self.rx.recv().await {
                Ok(ActivityEvent::Activity(activity)) => return Some(Ok(activity)),
                Ok(ActivityEvent::Failed(error)) => {
                    self.done = true;
                    return Some(Err(error));
                }
                Ok(ActivityEvent::Completed) => {
                    self.done = true;
                    return None;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "Activity subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.done = true;
                    return None;
                }
            }
        }
    }
}
