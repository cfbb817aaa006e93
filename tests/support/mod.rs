//! Shared fakes for the integration suites: a scripted in-memory streaming
//! transport and a scripted HTTP transfer.

#![allow(dead_code)]

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, StatusCode};
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::Notify;

use directline_streaming::{
    DirectLineConfig,
    error::{DirectLineError, DirectLineResult},
    http::{HttpRequest, HttpResponse, HttpTransfer},
    transport::{
        ContentStream, DisconnectSignal, InboundRequest, InboundRequestHandler, StreamingRequest,
        StreamingResponse, StreamingTransport, TransportFactory, TransportSession,
    },
};

/// Config with delays compressed so suites run in (virtual) milliseconds.
pub fn fast_config() -> DirectLineConfig {
    DirectLineConfig::new("t0k", "https://example.com/v3/directline")
        .reconnect_delay_floor(Duration::from_millis(5))
        .reconnect_delay_spread(Duration::from_millis(5))
        .refresh_interval(Duration::from_secs(3_600))
}

/// Poll a condition until it holds. Meant for paused-clock tests, where the
/// sleeps auto-advance virtual time.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition not reached in time");
}

struct FactoryState {
    created: Mutex<Vec<Arc<FakeTransport>>>,
    connect_failures: AtomicUsize,
    post_failures: AtomicUsize,
    hold_handshake: Mutex<Option<Arc<Notify>>>,
    conversation_id: Mutex<String>,
    post_counter: AtomicUsize,
}

/// Factory producing scripted in-memory transports.
#[derive(Clone)]
pub struct FakeFactory {
    state: Arc<FactoryState>,
}

impl Default for FakeFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeFactory {
    pub fn new() -> Self {
        Self {
            state: Arc::new(FactoryState {
                created: Mutex::new(Vec::new()),
                connect_failures: AtomicUsize::new(0),
                post_failures: AtomicUsize::new(0),
                hold_handshake: Mutex::new(None),
                conversation_id: Mutex::new("conv-1".to_string()),
                post_counter: AtomicUsize::new(0),
            }),
        }
    }

    /// Fail the next `count` transport connects.
    pub fn fail_connects(&self, count: usize) {
        self.state.connect_failures.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` activity posts.
    pub fn fail_posts(&self, count: usize) {
        self.state.post_failures.store(count, Ordering::SeqCst);
    }

    /// Gate the start-conversation response until the returned notify fires.
    pub fn hold_handshake(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.state.hold_handshake.lock() = Some(Arc::clone(&notify));
        notify
    }

    pub fn created_count(&self) -> usize {
        self.state.created.lock().len()
    }

    pub fn latest(&self) -> Arc<FakeTransport> {
        self.state
            .created
            .lock()
            .last()
            .cloned()
            .expect("no transport created yet")
    }

    pub fn transport(&self, index: usize) -> Arc<FakeTransport> {
        self.state.created.lock()[index].clone()
    }
}

impl TransportFactory for FakeFactory {
    type Transport = FakeTransport;

    fn create(&self, session: TransportSession) -> Arc<FakeTransport> {
        let transport = Arc::new(FakeTransport {
            url: session.url,
            handler: session.handler,
            disconnect: session.disconnect,
            state: Arc::clone(&self.state),
            sent: Mutex::new(Vec::new()),
            notified: AtomicBool::new(false),
            disconnect_calls: AtomicUsize::new(0),
        });
        self.state.created.lock().push(Arc::clone(&transport));
        transport
    }
}

/// Scripted in-memory transport. The test drives the server side: it can
/// push inbound requests through the registered handler and close the
/// connection.
pub struct FakeTransport {
    pub url: String,
    handler: Arc<dyn InboundRequestHandler>,
    disconnect: DisconnectSignal,
    state: Arc<FactoryState>,
    sent: Mutex<Vec<StreamingRequest>>,
    notified: AtomicBool,
    disconnect_calls: AtomicUsize,
}

impl FakeTransport {
    /// Push one activity set (plus optional extra streams) as a
    /// server-initiated request, returning the answered status code.
    pub async fn push_streams(&self, streams: Vec<ContentStream>) -> StatusCode {
        self.handler.handle(InboundRequest { streams }).await.status_code
    }

    /// Push a single-activity set built from raw JSON.
    pub async fn push_activity_set(&self, set: serde_json::Value) -> StatusCode {
        self.push_streams(vec![ContentStream::new(
            "application/json",
            serde_json::to_vec(&set).expect("activity set json"),
        )])
        .await
    }

    /// Push one plain message activity with the given text.
    pub async fn push_message(&self, text: &str) -> StatusCode {
        self.push_activity_set(json!({
            "activities": [{ "type": "message", "text": text }]
        }))
        .await
    }

    /// Simulate the server dropping the connection.
    pub fn server_close(&self) {
        if !self.notified.swap(true, Ordering::SeqCst) {
            self.disconnect.notify(Some("server closed the connection".to_string()));
        }
    }

    pub fn sent_requests(&self) -> Vec<StreamingRequest> {
        self.sent.lock().clone()
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    fn next_activity_id(&self) -> String {
        let n = self.state.post_counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("id-{n}")
    }

    fn id_response(&self) -> StreamingResponse {
        StreamingResponse::new(StatusCode::OK).stream(ContentStream::new(
            "application/json",
            serde_json::to_vec(&json!({ "Id": self.next_activity_id() })).expect("id json"),
        ))
    }
}

#[async_trait]
impl StreamingTransport for FakeTransport {
    async fn connect(&self) -> DirectLineResult<()> {
        let failures = &self.state.connect_failures;
        if failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(DirectLineError::transport("connect refused"));
        }
        Ok(())
    }

    async fn send(&self, request: StreamingRequest) -> DirectLineResult<StreamingResponse> {
        self.sent.lock().push(request.clone());

        match (&request.method, request.path.as_str()) {
            (&Method::POST, "/v3/directline/conversations") => {
                let hold = self.state.hold_handshake.lock().clone();
                if let Some(hold) = hold {
                    hold.notified().await;
                }
                let conversation_id = self.state.conversation_id.lock().clone();
                Ok(StreamingResponse::new(StatusCode::OK).stream(ContentStream::new(
                    "application/json",
                    serde_json::to_vec(&json!({ "conversationId": conversation_id }))
                        .expect("conversation json"),
                )))
            }
            (&Method::POST, path) if path.ends_with("/activities") => {
                let failures = &self.state.post_failures;
                if failures
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok()
                {
                    return Err(DirectLineError::transport("post refused"));
                }
                Ok(self.id_response())
            }
            (&Method::PUT, path) if path.ends_with("/upload") => Ok(self.id_response()),
            _ => Ok(StreamingResponse::new(StatusCode::NOT_FOUND)),
        }
    }

    async fn disconnect(&self) {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        if !self.notified.swap(true, Ordering::SeqCst) {
            self.disconnect.notify(Some("disconnected".to_string()));
        }
    }
}

/// Scripted HTTP transfer: refresh responses pop from a queue, attachment
/// GETs serve registered bodies.
pub struct FakeHttp {
    refresh_responses: Mutex<VecDeque<HttpResponse>>,
    refresh_calls: AtomicUsize,
    bodies: Mutex<HashMap<String, Bytes>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl Default for FakeHttp {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeHttp {
    pub fn new() -> Self {
        Self {
            refresh_responses: Mutex::new(VecDeque::new()),
            refresh_calls: AtomicUsize::new(0),
            bodies: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn queue_refresh_token(&self, token: &str) {
        self.refresh_responses.lock().push_back(HttpResponse {
            status: StatusCode::OK,
            body: Bytes::from(serde_json::to_vec(&json!({ "token": token })).expect("token json")),
        });
    }

    pub fn queue_refresh_status(&self, status: StatusCode) {
        self.refresh_responses.lock().push_back(HttpResponse {
            status,
            body: Bytes::new(),
        });
    }

    pub fn serve_body(&self, url: &str, body: impl Into<Bytes>) {
        self.bodies.lock().insert(url.to_string(), body.into());
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl HttpTransfer for FakeHttp {
    async fn execute(&self, request: HttpRequest) -> DirectLineResult<HttpResponse> {
        self.requests.lock().push(request.clone());

        if request.method == Method::POST && request.url.ends_with("/tokens/refresh") {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            return Ok(self.refresh_responses.lock().pop_front().unwrap_or(HttpResponse {
                status: StatusCode::OK,
                body: Bytes::from(
                    serde_json::to_vec(&json!({ "token": "rotated" })).expect("token json"),
                ),
            }));
        }

        match self.bodies.lock().get(&request.url) {
            Some(body) => Ok(HttpResponse {
                status: StatusCode::OK,
                body: body.clone(),
            }),
            None => Ok(HttpResponse {
                status: StatusCode::NOT_FOUND,
                body: Bytes::new(),
            }),
        }
    }
}
