//! Contract for the framed multi-stream transport.
//!
//! The core never speaks WebSocket itself: it drives an implementation of
//! [`StreamingTransport`] created through a [`TransportFactory`]. A transport
//! carries multi-stream requests in both directions — the client sends
//! [`StreamingRequest`]s and receives [`StreamingResponse`]s, while
//! server-initiated requests are dispatched to the
//! [`InboundRequestHandler`] registered at construction.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, StatusCode};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

use crate::error::DirectLineResult;

/// Monotonic identity of one transport instance.
///
/// Disconnect signals carry the epoch of the transport that raised them so
/// the controller can ignore signals from superseded connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionEpoch(pub u64);

/// One content stream within a multi-stream request or response.
#[derive(Clone, Debug)]
pub struct ContentStream {
    /// MIME type of the stream payload, when known.
    pub content_type: Option<String>,
    /// Payload bytes.
    body: Bytes,
}

impl ContentStream {
    /// Create a stream with the given content type.
    pub fn new(content_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            content_type: Some(content_type.into()),
            body: body.into(),
        }
    }

    /// Create a stream without a content type.
    pub fn untyped(body: impl Into<Bytes>) -> Self {
        Self {
            content_type: None,
            body: body.into(),
        }
    }

    /// Payload length in bytes.
    pub fn content_length(&self) -> usize {
        self.body.len()
    }

    /// Read the payload as raw bytes.
    pub fn bytes(&self) -> &Bytes {
        &self.body
    }

    /// Read the payload as UTF-8 text.
    pub fn text(&self) -> DirectLineResult<String> {
        Ok(String::from_utf8(self.body.to_vec())?)
    }

    /// Read the payload as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> DirectLineResult<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// A client-initiated multi-stream request.
#[derive(Clone, Debug)]
pub struct StreamingRequest {
    /// Request verb.
    pub method: Method,
    /// Request path relative to the streaming endpoint.
    pub path: String,
    /// Ordered content streams.
    pub streams: Vec<ContentStream>,
}

impl StreamingRequest {
    /// Create a request with no streams.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            streams: Vec::new(),
        }
    }

    /// Create a POST request.
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Create a PUT request.
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    /// Append a content stream.
    #[must_use]
    pub fn stream(mut self, stream: ContentStream) -> Self {
        self.streams.push(stream);
        self
    }
}

/// Response to a client-initiated request.
#[derive(Clone, Debug)]
pub struct StreamingResponse {
    /// Status code reported by the server.
    pub status_code: StatusCode,
    /// Ordered content streams.
    pub streams: Vec<ContentStream>,
}

impl StreamingResponse {
    /// Create a response.
    pub fn new(status_code: StatusCode) -> Self {
        Self {
            status_code,
            streams: Vec::new(),
        }
    }

    /// Append a content stream.
    #[must_use]
    pub fn stream(mut self, stream: ContentStream) -> Self {
        self.streams.push(stream);
        self
    }
}

/// A server-initiated request.
#[derive(Clone, Debug)]
pub struct InboundRequest {
    /// Ordered content streams, as framed by the server.
    pub streams: Vec<ContentStream>,
}

/// Status answered to a server-initiated request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InboundResponse {
    pub status_code: StatusCode,
}

impl InboundResponse {
    /// Respond with the given status code.
    pub fn status(status_code: StatusCode) -> Self {
        Self { status_code }
    }
}

/// Receiver of server-initiated requests.
///
/// The transport must invoke `handle` once per inbound request, in the
/// order the server sent them, and report the returned status back.
#[async_trait]
pub trait InboundRequestHandler: Send + Sync + 'static {
    async fn handle(&self, request: InboundRequest) -> InboundResponse;
}

/// Why a transport went away, tagged with the transport's epoch.
#[derive(Clone, Debug)]
pub struct Disconnection {
    pub(crate) epoch: ConnectionEpoch,
    /// Human-readable reason, when the transport knows one.
    pub reason: Option<String>,
}

/// Handle a transport uses to announce its own demise.
///
/// Notification is asynchronous and must happen exactly once per transport,
/// whether the peer dropped the connection or `disconnect()` was called.
#[derive(Clone)]
pub struct DisconnectSignal {
    tx: mpsc::Sender<Disconnection>,
    epoch: ConnectionEpoch,
}

impl DisconnectSignal {
    pub(crate) fn new(tx: mpsc::Sender<Disconnection>, epoch: ConnectionEpoch) -> Self {
        Self { tx, epoch }
    }

    /// Announce the disconnection. Safe to call from any task.
    pub fn notify(&self, reason: Option<String>) {
        let tx = self.tx.clone();
        let disconnection = Disconnection {
            epoch: self.epoch,
            reason,
        };
        tokio::spawn(async move {
            let _ = tx.send(disconnection).await;
        });
    }
}

impl fmt::Debug for DisconnectSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisconnectSignal").field("epoch", &self.epoch).finish()
    }
}

/// Everything a transport needs at construction.
pub struct TransportSession {
    /// Streaming endpoint URL (`ws(s)://…/conversations/connect?…`).
    pub url: String,
    /// Receiver of server-initiated requests.
    pub handler: Arc<dyn InboundRequestHandler>,
    /// Disconnection announcement channel.
    pub disconnect: DisconnectSignal,
}

/// The framed multi-stream connection.
#[async_trait]
pub trait StreamingTransport: Send + Sync + 'static {
    /// Perform the framed handshake. Fails on network error.
    async fn connect(&self) -> DirectLineResult<()>;

    /// Send a request and await its response.
    async fn send(&self, request: StreamingRequest) -> DirectLineResult<StreamingResponse>;

    /// Tear the connection down. Idempotent; fires the session's
    /// [`DisconnectSignal`] asynchronously.
    async fn disconnect(&self);
}

/// Creates one transport per connection attempt.
pub trait TransportFactory: Send + Sync + 'static {
    type Transport: StreamingTransport;

    fn create(&self, session: TransportSession) -> Arc<Self::Transport>;
}
