//! Server-initiated request handling: activity set parsing, attachment
//! materialization and startup gating.

use std::{collections::VecDeque, sync::Arc};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use http::StatusCode;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{
    error::ActivityStreamError,
    sink::ActivitySink,
    transport::{InboundRequest, InboundRequestHandler, InboundResponse},
    types::{Activity, ActivitySet, Attachment},
};

/// Prefix applied to every materialized attachment, regardless of the real
/// content type. Receivers depend on the literal `text/plain` label, so it
/// is preserved for wire compatibility.
pub(crate) const DATA_URI_PREFIX: &str = "data:text/plain;base64,";

/// Startup gate shared between the controller and the per-connection
/// inbound handler.
///
/// While queueing, inbound activities accumulate in arrival order; the
/// controller flushes them after consumers have observed `Online`. The
/// mutex serializes a flush against concurrent arrivals, so an activity
/// arriving mid-flush is published directly, after everything it queued
/// behind.
pub(crate) struct DeliveryGate {
    state: Mutex<GateState>,
}

struct GateState {
    queueing: bool,
    queue: VecDeque<Activity>,
}

impl DeliveryGate {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(GateState {
                queueing: false,
                queue: VecDeque::new(),
            }),
        }
    }

    /// Start queueing inbound deliveries. Activities already queued by a
    /// previous failed handshake are kept; they flush exactly once.
    pub(crate) fn begin_queueing(&self) {
        self.state.lock().queueing = true;
    }

    /// Deliver an activity: queued while the gate is up, published directly
    /// otherwise.
    pub(crate) fn deliver(&self, sink: &ActivitySink, activity: Activity) {
        let mut state = self.state.lock();
        if state.queueing {
            state.queue.push_back(activity);
        } else {
            sink.publish(activity);
        }
    }

    /// Publish all queued activities in FIFO order and lower the gate.
    pub(crate) fn flush(&self, sink: &ActivitySink) {
        let mut state = self.state.lock();
        let flushed = state.queue.len();
        while let Some(activity) = state.queue.pop_front() {
            sink.publish(activity);
        }
        state.queueing = false;
        if flushed > 0 {
            debug!(flushed, "Flushed startup queue");
        }
    }

    #[cfg(test)]
    pub(crate) fn queued_len(&self) -> usize {
        self.state.lock().queue.len()
    }
}

/// Receiver of server-pushed activity sets for one connection.
///
/// Disposable: the controller builds a fresh handler per transport, passing
/// it the stable sink and the shared gate.
pub(crate) struct InboundHandler {
    sink: ActivitySink,
    gate: Arc<DeliveryGate>,
}

impl InboundHandler {
    pub(crate) fn new(sink: ActivitySink, gate: Arc<DeliveryGate>) -> Self {
        Self { sink, gate }
    }

    fn process(&self, request: InboundRequest) -> Result<(), ActivityStreamError> {
        let Some((first, attachments)) = request.streams.split_first() else {
            return Err(ActivityStreamError::InvalidActivitySet {
                reason: "request carried no streams".to_string(),
            });
        };

        let set: ActivitySet =
            first
                .json()
                .map_err(|e| ActivityStreamError::InvalidActivitySet {
                    reason: e.to_string(),
                })?;

        let count = set.activities.len();
        let Ok([mut activity]) = <[Activity; 1]>::try_from(set.activities) else {
            return Err(ActivityStreamError::InvalidActivitySet {
                reason: format!("expected 1 activity, got {count}"),
            });
        };

        for stream in attachments {
            let payload = BASE64.encode(stream.bytes());
            let attachment = Attachment {
                content_type: stream.content_type.clone().unwrap_or_default(),
                content_url: format!("{DATA_URI_PREFIX}{payload}"),
                properties: serde_json::Map::new(),
            };
            activity
                .attachments
                .get_or_insert_with(Vec::new)
                .push(attachment);
        }

        self.gate.deliver(&self.sink, activity);
        Ok(())
    }
}

#[async_trait]
impl InboundRequestHandler for InboundHandler {
    async fn handle(&self, request: InboundRequest) -> InboundResponse {
        match self.process(request) {
            Ok(()) => InboundResponse::status(StatusCode::OK),
            Err(error) => {
                warn!(error = %error, "Rejecting inbound activity set");
                self.sink.fail(error);
                InboundResponse::status(StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }
}
