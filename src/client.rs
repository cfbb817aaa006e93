//! User-facing Direct Line streaming client.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio::sync::{mpsc, oneshot, watch};
use tracing::info;

use crate::{
    actor::{Command, ConnectionActor, Credentials},
    config::DirectLineConfig,
    error::{DirectLineError, DirectLineResult},
    http::{HttpTransfer, ReqwestTransfer},
    sink::{ActivitySink, ActivityStream},
    transport::TransportFactory,
    types::{Activity, ConnectionStatus, Conversation},
};

/// Streaming chat client owning the lifecycle of one conversation.
///
/// The client is cheap to clone and can be shared across tasks. Construction
/// spawns the connection controller but leaves it idle: the first call to
/// [`activities`](Self::activities) initiates the handshake.
///
/// # Example
///
/// ```rust,ignore
/// let config = DirectLineConfig::new(token, "https://directline.example.com/v3/directline");
/// let client = DirectLineClient::new(config, WebSocketFactory::default())?;
///
/// let mut activities = client.activities();
/// let id = client.post_activity(Activity::message().from_id("user-1")).await?;
///
/// while let Some(activity) = activities.recv().await {
///     println!("received: {:?}", activity?);
/// }
/// ```
#[derive(Clone)]
pub struct DirectLineClient {
    cmd_tx: mpsc::Sender<Command>,
    status_rx: watch::Receiver<ConnectionStatus>,
    sink: ActivitySink,
    started: Arc<AtomicBool>,
}

impl DirectLineClient {
    /// Create a client with the default HTTP transfer.
    pub fn new<F>(config: DirectLineConfig, factory: F) -> DirectLineResult<Self>
    where
        F: TransportFactory,
    {
        Self::with_http_transfer(config, factory, Arc::new(ReqwestTransfer::new()))
    }

    /// Create a client with a custom [`HttpTransfer`] implementation.
    pub fn with_http_transfer<F>(
        config: DirectLineConfig,
        factory: F,
        http: Arc<dyn HttpTransfer>,
    ) -> DirectLineResult<Self>
    where
        F: TransportFactory,
    {
        config.validate()?;
        let config = Arc::new(config);

        let credentials = Arc::new(Credentials::new(
            config.token.clone(),
            config.conversation_id.clone(),
        ));
        let sink = ActivitySink::new(config.activity_channel_capacity);
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Uninitialized);
        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_channel_capacity);

        let actor = ConnectionActor::new(
            Arc::clone(&config),
            factory,
            http,
            credentials,
            sink.clone(),
            status_tx,
            cmd_tx.clone(),
            cmd_rx,
        );
        tokio::spawn(actor.run());

        info!(domain = %config.domain, "Direct Line client created");

        Ok(Self {
            cmd_tx,
            status_rx,
            sink,
            started: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Subscribe to inbound activities.
    ///
    /// The stream is shared: every subscriber observes the same sequence.
    /// The first subscription starts the connection handshake.
    pub fn activities(&self) -> ActivityStream {
        let stream = self.sink.subscribe();
        self.ensure_started();
        stream
    }

    /// Current-value-replaying view of the connection status.
    pub fn connection_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    /// Send an activity and await its server-assigned id.
    ///
    /// Waits for the connection to be `Online` first, so sends issued during
    /// a reconnect cycle complete once the connection recovers. `Ok(None)`
    /// is returned only for an attachment upload whose response carried no
    /// body.
    pub async fn post_activity(&self, activity: Activity) -> DirectLineResult<Option<String>> {
        self.ensure_started();
        self.wait_for_online().await?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Post {
                activity,
                reply: reply_tx,
            })
            .await
            .map_err(|_| DirectLineError::Ended)?;

        reply_rx
            .await
            .map_err(|_| DirectLineError::internal("Post reply channel dropped"))?
    }

    /// Swap credentials and perform a fresh handshake.
    ///
    /// An explicit user action: it does not consume the automatic
    /// reconnection budget.
    pub async fn reconnect(&self, conversation: Conversation) -> DirectLineResult<()> {
        self.started.store(true, Ordering::SeqCst);

        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Reconnect {
                conversation,
                reply: reply_tx,
            })
            .await
            .map_err(|_| DirectLineError::Ended)?;

        reply_rx
            .await
            .map_err(|_| DirectLineError::internal("Reconnect reply channel dropped"))?
    }

    /// Terminal shutdown: publish `Ended`, drop the transport and stop the
    /// refresher. Idempotent.
    pub async fn end(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(Command::End { ack: ack_tx })
            .await
            .is_ok()
        {
            let _ = ack_rx.await;
        }
    }

    fn ensure_started(&self) {
        if !self.started.swap(true, Ordering::SeqCst) {
            let _ = self.cmd_tx.try_send(Command::Start);
        }
    }

    async fn wait_for_online(&self) -> DirectLineResult<()> {
        let mut status_rx = self.status_rx.clone();
        let mut closed_rx = self.sink.closed_watch();

        tokio::select! {
            status = status_rx.wait_for(|status| status.is_online() || status.is_ended()) => {
                match status {
                    Ok(status) if status.is_ended() => Err(DirectLineError::Ended),
                    Ok(_) => Ok(()),
                    Err(_) => Err(DirectLineError::connection_closed(Some(
                        "controller stopped".to_string(),
                    ))),
                }
            }
            _ = closed_rx.wait_for(|closed| *closed) => {
                if self.status_rx.borrow().is_ended() {
                    Err(DirectLineError::Ended)
                } else {
                    Err(DirectLineError::connection_closed(Some(
                        "activity stream terminated".to_string(),
                    )))
                }
            }
        }
    }
}
