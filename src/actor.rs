//! Connection controller.
//!
//! The controller runs as a background task owning all connection state:
//! the transport, the handshake, status publication, startup-queue flushing,
//! reconnection with jittered delays, the token refresher and teardown. It
//! communicates with [`crate::client::DirectLineClient`] via channels.

use std::{sync::Arc, time::Duration};

use http::StatusCode;
use parking_lot::Mutex;
use rand::Rng;
use serde::Deserialize;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    config::{DirectLineConfig, connect_url},
    error::{ActivityStreamError, DirectLineError, DirectLineResult},
    http::HttpTransfer,
    inbound::{DeliveryGate, InboundHandler},
    outbound,
    refresh::TokenRefresher,
    sink::ActivitySink,
    transport::{
        ConnectionEpoch, DisconnectSignal, Disconnection, InboundRequestHandler, StreamingRequest,
        StreamingTransport, TransportFactory, TransportSession,
    },
    types::{Activity, ConnectionStatus, Conversation},
};

/// Commands sent from the client facade (and internal timers) to the
/// controller.
pub(crate) enum Command {
    /// First subscription arrived: perform the initial handshake.
    Start,
    /// Send an outbound activity.
    Post {
        activity: Activity,
        reply: oneshot::Sender<DirectLineResult<Option<String>>>,
    },
    /// Swap credentials and handshake again (explicit user action).
    Reconnect {
        conversation: Conversation,
        reply: oneshot::Sender<DirectLineResult<()>>,
    },
    /// Drop the transport (raised by the token refresher).
    ForceDisconnect { reason: String },
    /// A scheduled reconnect delay elapsed. Carries the epoch current at
    /// scheduling time; a handshake run in the meantime supersedes it.
    AttemptReconnect { expected: ConnectionEpoch },
    /// Terminal shutdown.
    End { ack: oneshot::Sender<()> },
}

/// Conversation credentials shared between the controller, the refresher
/// and outbound sends.
///
/// `auth_exhausted` replaces the source protocol's "null token" sentinel:
/// it is raised by the refresher when its retry budget runs out and tells
/// the disconnection path that reconnecting cannot succeed.
pub(crate) struct Credentials {
    state: Mutex<CredentialState>,
}

struct CredentialState {
    token: String,
    conversation_id: Option<String>,
    auth_exhausted: bool,
}

impl Credentials {
    pub(crate) fn new(token: String, conversation_id: Option<String>) -> Self {
        Self {
            state: Mutex::new(CredentialState {
                token,
                conversation_id,
                auth_exhausted: false,
            }),
        }
    }

    pub(crate) fn token(&self) -> String {
        self.state.lock().token.clone()
    }

    pub(crate) fn set_token(&self, token: String) {
        self.state.lock().token = token;
    }

    pub(crate) fn conversation_id(&self) -> Option<String> {
        self.state.lock().conversation_id.clone()
    }

    pub(crate) fn set_conversation_id(&self, id: String) {
        self.state.lock().conversation_id = Some(id);
    }

    /// Replace both fields and clear the auth-exhausted flag (fresh
    /// credentials supersede an exhausted refresh budget).
    pub(crate) fn replace(&self, conversation: Conversation) {
        let mut state = self.state.lock();
        state.token = conversation.token;
        state.conversation_id = Some(conversation.conversation_id);
        state.auth_exhausted = false;
    }

    pub(crate) fn mark_auth_exhausted(&self) {
        self.state.lock().auth_exhausted = true;
    }

    pub(crate) fn auth_exhausted(&self) -> bool {
        self.state.lock().auth_exhausted
    }
}

/// Randomized reconnect delay: a fixed floor plus uniform jitter in
/// `[0, spread)`.
pub(crate) fn reconnect_delay(floor: Duration, spread: Duration) -> Duration {
    let spread_ms = (spread.as_millis() as u64).max(1);
    let jitter = rand::rng().random_range(0..spread_ms);
    floor + Duration::from_millis(jitter)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConversationStarted {
    conversation_id: String,
}

/// The connection state machine, driven by one background task.
pub(crate) struct ConnectionActor<F: TransportFactory> {
    config: Arc<DirectLineConfig>,
    factory: F,
    http: Arc<dyn HttpTransfer>,
    credentials: Arc<Credentials>,
    sink: ActivitySink,
    gate: Arc<DeliveryGate>,
    status_tx: watch::Sender<ConnectionStatus>,
    status_rx: watch::Receiver<ConnectionStatus>,
    cmd_tx: mpsc::Sender<Command>,
    cmd_rx: mpsc::Receiver<Command>,
    closed_tx: mpsc::Sender<Disconnection>,
    closed_rx: mpsc::Receiver<Disconnection>,
    transport: Option<Arc<F::Transport>>,
    epoch: u64,
    retries_left: u32,
    refresher: Option<JoinHandle<()>>,
    started: bool,
}

impl<F: TransportFactory> ConnectionActor<F> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: Arc<DirectLineConfig>,
        factory: F,
        http: Arc<dyn HttpTransfer>,
        credentials: Arc<Credentials>,
        sink: ActivitySink,
        status_tx: watch::Sender<ConnectionStatus>,
        cmd_tx: mpsc::Sender<Command>,
        cmd_rx: mpsc::Receiver<Command>,
    ) -> Self {
        let (closed_tx, closed_rx) = mpsc::channel(8);
        let status_rx = status_tx.subscribe();
        let retries_left = config.max_reconnect_attempts;
        Self {
            config,
            factory,
            http,
            credentials,
            sink,
            gate: Arc::new(DeliveryGate::new()),
            status_tx,
            status_rx,
            cmd_tx,
            cmd_rx,
            closed_tx,
            closed_rx,
            transport: None,
            epoch: 0,
            retries_left,
            refresher: None,
            started: false,
        }
    }

    /// Main entry point - run the controller until ended.
    pub(crate) async fn run(mut self) {
        info!(domain = %self.config.domain, "Starting connection controller");

        loop {
            tokio::select! {
                command = self.cmd_rx.recv() => match command {
                    Some(Command::Start) => self.handle_start().await,
                    Some(Command::Post { activity, reply }) => {
                        self.handle_post(activity, reply).await;
                    }
                    Some(Command::Reconnect { conversation, reply }) => {
                        self.handle_reconnect(conversation, reply).await;
                    }
                    Some(Command::ForceDisconnect { reason }) => {
                        warn!(reason = %reason, "Disconnect forced");
                        self.disconnect_current(&reason).await;
                    }
                    Some(Command::AttemptReconnect { expected }) => {
                        self.handle_attempt_reconnect(expected).await;
                    }
                    Some(Command::End { ack }) => {
                        self.handle_end().await;
                        let _ = ack.send(());
                        break;
                    }
                    None => {
                        self.handle_end().await;
                        break;
                    }
                },
                Some(closed) = self.closed_rx.recv() => self.on_disconnected(closed).await,
            }
        }

        info!("Connection controller stopped");
    }

    async fn handle_start(&mut self) {
        if self.started {
            return;
        }
        self.started = true;
        self.ensure_refresher();
        self.connect().await;
    }

    /// Run a handshake; a failure tears the transport down, which re-enters
    /// through the disconnection path and exercises the retry budget.
    async fn connect(&mut self) {
        if let Err(e) = self.handshake().await {
            warn!(error = %e, "Handshake failed");
            self.disconnect_current("handshake failed").await;
        }
    }

    async fn handshake(&mut self) -> DirectLineResult<()> {
        self.publish_connecting();
        self.gate.begin_queueing();

        let url = connect_url(
            &self.config.domain,
            &self.credentials.token(),
            self.credentials.conversation_id().as_deref(),
        )?;

        self.epoch += 1;
        let epoch = ConnectionEpoch(self.epoch);
        let handler: Arc<dyn InboundRequestHandler> =
            Arc::new(InboundHandler::new(self.sink.clone(), Arc::clone(&self.gate)));
        let transport = self.factory.create(TransportSession {
            url,
            handler,
            disconnect: DisconnectSignal::new(self.closed_tx.clone(), epoch),
        });
        self.transport = Some(Arc::clone(&transport));

        transport.connect().await?;
        debug!(epoch = epoch.0, "Transport connected");

        let request = StreamingRequest::post("/v3/directline/conversations");
        let response = tokio::time::timeout(self.config.request_timeout, transport.send(request))
            .await
            .map_err(|_| DirectLineError::timeout(self.config.request_timeout))??;

        if response.status_code != StatusCode::OK {
            return Err(DirectLineError::api(
                response.status_code,
                "conversation start rejected",
            ));
        }
        let stream = match response.streams.as_slice() {
            [stream] => stream,
            streams => {
                return Err(DirectLineError::protocol(format!(
                    "expected 1 handshake stream, got {}",
                    streams.len()
                )));
            }
        };
        let conversation: ConversationStarted = stream.json()?;
        self.credentials.set_conversation_id(conversation.conversation_id);

        self.status_tx.send_replace(ConnectionStatus::Online);
        // Status subscribers must run their Online handlers before the first
        // queued activity is flushed: wait until our own observer has
        // replayed Online, then yield the task queue once.
        let _ = self.status_rx.wait_for(|status| status.is_online()).await;
        tokio::task::yield_now().await;

        self.gate.flush(&self.sink);
        self.retries_left = self.config.max_reconnect_attempts;

        info!(
            conversation_id = self.credentials.conversation_id().as_deref().unwrap_or(""),
            "Connection online"
        );
        Ok(())
    }

    async fn handle_post(
        &mut self,
        activity: Activity,
        reply: oneshot::Sender<DirectLineResult<Option<String>>>,
    ) {
        let result = self.post_activity(&activity).await;
        if let Err(e) = &result {
            warn!(error = %e, "Posting activity failed; disconnecting");
            self.disconnect_current("activity post failed").await;
        }
        let _ = reply.send(result);
    }

    async fn post_activity(&self, activity: &Activity) -> DirectLineResult<Option<String>> {
        let transport = self.transport.as_ref().ok_or_else(|| {
            DirectLineError::connection_closed(Some("not connected".to_string()))
        })?;
        let conversation_id = self.credentials.conversation_id().ok_or_else(|| {
            DirectLineError::internal("conversation id missing after handshake")
        })?;

        outbound::post_activity(
            transport.as_ref(),
            self.http.as_ref(),
            &conversation_id,
            activity,
            self.config.request_timeout,
        )
        .await
    }

    async fn handle_reconnect(
        &mut self,
        conversation: Conversation,
        reply: oneshot::Sender<DirectLineResult<()>>,
    ) {
        info!(conversation_id = %conversation.conversation_id, "Reconnect requested");
        self.started = true;
        self.ensure_refresher();
        self.credentials.replace(conversation);

        // The superseded transport's disconnection signal carries a stale
        // epoch and is ignored; an explicit reconnect does not consume the
        // retry budget.
        if let Some(old) = self.transport.take() {
            old.disconnect().await;
        }

        let result = self.handshake().await;
        if let Err(e) = &result {
            warn!(error = %e, "Reconnect handshake failed");
            self.disconnect_current("reconnect handshake failed").await;
        }
        let _ = reply.send(result);
    }

    async fn handle_attempt_reconnect(&mut self, expected: ConnectionEpoch) {
        if expected != ConnectionEpoch(self.epoch) {
            debug!(epoch = expected.0, "Ignoring superseded reconnect attempt");
            return;
        }
        if self.status_rx.borrow().is_ended() || self.sink.is_closed() {
            return;
        }
        self.connect().await;
    }

    async fn handle_end(&mut self) {
        if self.status_rx.borrow().is_ended() {
            return;
        }
        info!("Ending connection");
        self.status_tx.send_replace(ConnectionStatus::Ended);
        if let Some(refresher) = self.refresher.take() {
            refresher.abort();
        }
        if let Some(transport) = self.transport.take() {
            transport.disconnect().await;
        }
        self.sink.complete();
    }

    /// Disconnect the current transport, or synthesize the disconnection
    /// event when none exists, so every failure funnels into
    /// [`Self::on_disconnected`].
    async fn disconnect_current(&mut self, reason: &str) {
        match &self.transport {
            Some(transport) => transport.disconnect().await,
            None => {
                let disconnection = Disconnection {
                    epoch: ConnectionEpoch(self.epoch),
                    reason: Some(reason.to_string()),
                };
                self.on_disconnected(disconnection).await;
            }
        }
    }

    async fn on_disconnected(&mut self, closed: Disconnection) {
        if closed.epoch != ConnectionEpoch(self.epoch) {
            debug!(epoch = closed.epoch.0, "Ignoring stale disconnection");
            return;
        }
        if self.status_rx.borrow().is_ended() || self.sink.is_closed() {
            return;
        }

        let reason = closed
            .reason
            .unwrap_or_else(|| "transport disconnected".to_string());

        if self.credentials.auth_exhausted() {
            error!("No usable token; giving up on reconnect");
            self.sink.fail(ActivityStreamError::TokenUnavailable);
            self.transport = None;
            return;
        }

        self.retries_left = self.retries_left.saturating_sub(1);
        if self.retries_left > 0 {
            warn!(
                reason = %reason,
                remaining = self.retries_left,
                "Transport lost; scheduling reconnect"
            );
            self.publish_connecting();

            let delay = reconnect_delay(
                self.config.reconnect_delay_floor,
                self.config.reconnect_delay_spread,
            );
            debug!(delay_ms = delay.as_millis() as u64, "Reconnect scheduled");
            let cmd_tx = self.cmd_tx.clone();
            let expected = ConnectionEpoch(self.epoch);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = cmd_tx.send(Command::AttemptReconnect { expected }).await;
            });
        } else {
            error!(reason = %reason, "Reconnection attempts exhausted");
            self.sink.fail(ActivityStreamError::ConnectionLost { reason });
            self.transport = None;
        }
    }

    fn publish_connecting(&self) {
        self.status_tx.send_if_modified(|status| {
            if matches!(status, ConnectionStatus::Connecting) {
                false
            } else {
                *status = ConnectionStatus::Connecting;
                true
            }
        });
    }

    fn ensure_refresher(&mut self) {
        if self.refresher.is_some() {
            return;
        }
        let refresher = TokenRefresher::new(
            Arc::clone(&self.config),
            Arc::clone(&self.credentials),
            Arc::clone(&self.http),
            self.status_rx.clone(),
            self.cmd_tx.clone(),
        );
        self.refresher = Some(tokio::spawn(refresher.run()));
    }
}
