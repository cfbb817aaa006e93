//! Background token refresh loop.

use std::sync::Arc;

use http::StatusCode;
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::{
    actor::{Command, Credentials},
    config::{DirectLineConfig, MAX_RETRY_COUNT},
    error::DirectLineError,
    http::{HttpRequest, HttpTransfer},
    types::ConnectionStatus,
};

#[derive(Deserialize)]
struct RefreshedToken {
    token: String,
}

enum RefreshOutcome {
    Applied,
    Fatal(StatusCode),
    Retryable(DirectLineError),
}

/// Periodic token rotation, owned by the connection controller.
///
/// One logical timer fires every `refresh_interval` (half the token
/// lifetime). Each tick waits until the connection is Online, then rotates
/// the token with immediate retries on non-fatal errors. A 403/404 is a
/// fatal auth failure: the transport is disconnected and the loop stops. An
/// exhausted retry budget additionally marks the credentials auth-exhausted,
/// which the controller's disconnect path turns into a terminal
/// "token unavailable" error.
pub(crate) struct TokenRefresher {
    config: Arc<DirectLineConfig>,
    credentials: Arc<Credentials>,
    http: Arc<dyn HttpTransfer>,
    status: watch::Receiver<ConnectionStatus>,
    commands: mpsc::Sender<Command>,
}

impl TokenRefresher {
    pub(crate) fn new(
        config: Arc<DirectLineConfig>,
        credentials: Arc<Credentials>,
        http: Arc<dyn HttpTransfer>,
        status: watch::Receiver<ConnectionStatus>,
        commands: mpsc::Sender<Command>,
    ) -> Self {
        Self {
            config,
            credentials,
            http,
            status,
            commands,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            tokio::time::sleep(self.config.refresh_interval).await;

            let ended = match self
                .status
                .wait_for(|status| status.is_online() || status.is_ended())
                .await
            {
                Ok(status) => status.is_ended(),
                Err(_) => return,
            };
            if ended {
                debug!("Connection ended; stopping token refresh");
                return;
            }

            if !self.refresh_with_retries().await {
                return;
            }
        }
    }

    /// Run one refresh tick. Returns `false` when the loop must stop.
    async fn refresh_with_retries(&self) -> bool {
        let mut budget = MAX_RETRY_COUNT;
        loop {
            match self.refresh_once().await {
                RefreshOutcome::Applied => {
                    info!("Bearer token rotated");
                    return true;
                }
                RefreshOutcome::Fatal(status) => {
                    error!(status = %status, "Fatal token refresh failure; disconnecting");
                    self.force_disconnect("token refresh rejected").await;
                    return false;
                }
                RefreshOutcome::Retryable(e) if budget > 0 => {
                    budget -= 1;
                    warn!(error = %e, remaining = budget, "Token refresh failed; retrying");
                }
                RefreshOutcome::Retryable(e) => {
                    error!(error = %e, "Token refresh retries exhausted");
                    self.credentials.mark_auth_exhausted();
                    self.force_disconnect("token refresh retries exhausted").await;
                    return false;
                }
            }
        }
    }

    async fn refresh_once(&self) -> RefreshOutcome {
        let token = self.credentials.token();
        let request = HttpRequest::post(self.config.refresh_url(), self.config.request_timeout)
            .bearer(&token)
            .header("x-ms-bot-agent", self.config.bot_agent_header());

        let response = match self.http.execute(request).await {
            Ok(response) => response,
            Err(e) => return RefreshOutcome::Retryable(e),
        };

        match response.status {
            StatusCode::OK => match serde_json::from_slice::<RefreshedToken>(&response.body) {
                Ok(RefreshedToken { token }) => {
                    self.credentials.set_token(token);
                    RefreshOutcome::Applied
                }
                Err(e) => RefreshOutcome::Retryable(e.into()),
            },
            StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => RefreshOutcome::Fatal(response.status),
            status => RefreshOutcome::Retryable(DirectLineError::api(
                status,
                "token refresh rejected",
            )),
        }
    }

    async fn force_disconnect(&self, reason: &str) {
        let _ = self
            .commands
            .send(Command::ForceDisconnect {
                reason: reason.to_string(),
            })
            .await;
    }
}
