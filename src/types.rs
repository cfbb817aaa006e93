//! Wire types for the Direct Line activity model and the connection state.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Activity type routed through the attachment upload path.
pub const MESSAGE_ACTIVITY_TYPE: &str = "message";

/// One chat-protocol message frame.
///
/// The core forwards activities between server and consumer without
/// interpreting their content beyond `type == "message"` (attachment upload
/// routing) and `from.id` (upload path construction). Every field the model
/// does not name is preserved verbatim in `properties`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    /// Activity type, e.g. `"message"` or `"typing"`.
    #[serde(rename = "type", default)]
    pub activity_type: String,

    /// Sender of an outbound activity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<ChannelAccount>,

    /// Attachments carried by the activity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Attachment>>,

    /// Everything else, passed through untouched.
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

impl Activity {
    /// Create an activity of the given type.
    pub fn new(activity_type: impl Into<String>) -> Self {
        Self {
            activity_type: activity_type.into(),
            ..Self::default()
        }
    }

    /// Create a `"message"` activity.
    pub fn message() -> Self {
        Self::new(MESSAGE_ACTIVITY_TYPE)
    }

    /// Set the sender id.
    #[must_use]
    pub fn from_id(mut self, id: impl Into<String>) -> Self {
        self.from = Some(ChannelAccount {
            id: id.into(),
            properties: Map::new(),
        });
        self
    }

    /// Append an attachment.
    #[must_use]
    pub fn attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.get_or_insert_with(Vec::new).push(attachment);
        self
    }

    /// Set an opaque property.
    #[must_use]
    pub fn property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// True when this activity must go through the attachment upload path.
    pub(crate) fn has_attachments(&self) -> bool {
        self.attachments.as_ref().is_some_and(|a| !a.is_empty())
    }
}

/// Sender or recipient of an activity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelAccount {
    pub id: String,

    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

/// Content reference carried by an activity.
///
/// Outbound attachments point at an HTTP `content_url`; inbound attachments
/// are materialized into inline base64 data URIs by the inbound handler.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub content_type: String,
    pub content_url: String,

    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

impl Attachment {
    /// Create an attachment pointing at a content URL.
    pub fn new(content_type: impl Into<String>, content_url: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            content_url: content_url.into(),
            properties: Map::new(),
        }
    }
}

/// The server's per-push envelope.
///
/// Invariant: carries exactly one activity. The inbound handler fails the
/// activity stream when the invariant is violated.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySet {
    pub activities: Vec<Activity>,

    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

/// A server-side session: its id and the bearer token granting access.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub conversation_id: String,
    pub token: String,
}

/// Connection state machine states, as observed by consumers.
///
/// Advances monotonically except through `Connecting` cycles during
/// reconnects; `Ended` is terminal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No subscription has started the connection yet.
    #[default]
    Uninitialized,
    /// Handshake (or reconnect) in progress.
    Connecting,
    /// Fully connected; inbound and outbound traffic flows.
    Online,
    /// Shut down by `end()`; will not reconnect.
    Ended,
}

impl ConnectionStatus {
    /// Check if the connection is ready for traffic.
    pub fn is_online(&self) -> bool {
        matches!(self, Self::Online)
    }

    /// Check if the connection reached its terminal state.
    pub fn is_ended(&self) -> bool {
        matches!(self, Self::Ended)
    }
}
