//! Client configuration, protocol constants and URL construction.

use std::time::Duration;

use url::Url;

use crate::error::{DirectLineError, DirectLineResult};

/// Protocol version advertised in the bot-agent header.
pub const DIRECT_LINE_VERSION: &str = "DirectLine/3.0";

/// Reconnection / refresh retry budget between successes.
pub const MAX_RETRY_COUNT: u32 = 3;

/// Nominal lifetime of a bearer token.
pub const REFRESH_TOKEN_LIFETIME: Duration = Duration::from_millis(1_800_000);

/// Interval between token refreshes (half the token lifetime).
pub const REFRESH_TOKEN_INTERVAL: Duration = Duration::from_millis(900_000);

/// Default timeout applied to transport sends and HTTP requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(20_000);

/// Fixed floor of the randomized reconnect delay.
pub const RECONNECT_DELAY_FLOOR: Duration = Duration::from_millis(3_000);

/// Width of the uniform jitter added on top of the floor.
pub const RECONNECT_DELAY_SPREAD: Duration = Duration::from_millis(12_000);

/// Configuration for a Direct Line streaming client.
#[derive(Clone, Debug)]
pub struct DirectLineConfig {
    /// Initial bearer token.
    pub token: String,

    /// Service base URL; must use an `http` or `https` scheme. The path is
    /// kept as-is and endpoint paths are appended to it.
    pub domain: String,

    /// Resume an existing conversation instead of starting a new one.
    pub conversation_id: Option<String>,

    /// Extra identification appended to the bot-agent header.
    pub bot_agent: Option<String>,

    /// Timeout for transport sends and HTTP requests.
    pub request_timeout: Duration,

    /// Interval between token refresh ticks.
    pub refresh_interval: Duration,

    /// Fixed part of the reconnect delay.
    pub reconnect_delay_floor: Duration,

    /// Random part of the reconnect delay, uniform in `[0, spread)`.
    pub reconnect_delay_spread: Duration,

    /// Reconnection attempts allowed between successful handshakes.
    pub max_reconnect_attempts: u32,

    /// Capacity of the activity broadcast channel.
    pub activity_channel_capacity: usize,

    /// Capacity of the controller command channel.
    pub command_channel_capacity: usize,
}

impl DirectLineConfig {
    /// Create a configuration with the given token and domain.
    pub fn new(token: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            domain: domain.into(),
            conversation_id: None,
            bot_agent: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            refresh_interval: REFRESH_TOKEN_INTERVAL,
            reconnect_delay_floor: RECONNECT_DELAY_FLOOR,
            reconnect_delay_spread: RECONNECT_DELAY_SPREAD,
            max_reconnect_attempts: MAX_RETRY_COUNT,
            activity_channel_capacity: 256,
            command_channel_capacity: 64,
        }
    }

    /// Set the conversation to resume.
    #[must_use]
    pub fn conversation_id(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }

    /// Set the bot-agent suffix.
    #[must_use]
    pub fn bot_agent(mut self, agent: impl Into<String>) -> Self {
        self.bot_agent = Some(agent.into());
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the token refresh interval.
    #[must_use]
    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Set the fixed part of the reconnect delay.
    #[must_use]
    pub fn reconnect_delay_floor(mut self, floor: Duration) -> Self {
        self.reconnect_delay_floor = floor;
        self
    }

    /// Set the random part of the reconnect delay.
    #[must_use]
    pub fn reconnect_delay_spread(mut self, spread: Duration) -> Self {
        self.reconnect_delay_spread = spread;
        self
    }

    /// Set the reconnection attempt budget.
    #[must_use]
    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> DirectLineResult<()> {
        if self.token.is_empty() {
            return Err(DirectLineError::config("Token cannot be empty"));
        }
        let url = Url::parse(&self.domain)
            .map_err(|e| DirectLineError::config(format!("Invalid domain: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DirectLineError::config(format!(
                "Domain must use an http(s) scheme, got {}",
                url.scheme()
            )));
        }
        if self.request_timeout.is_zero() {
            return Err(DirectLineError::config("Request timeout must be > 0"));
        }
        if self.refresh_interval.is_zero() {
            return Err(DirectLineError::config("Refresh interval must be > 0"));
        }
        if self.reconnect_delay_spread.is_zero() {
            return Err(DirectLineError::config("Reconnect delay spread must be > 0"));
        }
        if self.max_reconnect_attempts == 0 {
            return Err(DirectLineError::config("Max reconnect attempts must be > 0"));
        }
        if self.activity_channel_capacity == 0 {
            return Err(DirectLineError::config("Activity channel capacity must be > 0"));
        }
        if self.command_channel_capacity == 0 {
            return Err(DirectLineError::config("Command channel capacity must be > 0"));
        }
        Ok(())
    }

    /// Assemble the `x-ms-bot-agent` header value.
    pub fn bot_agent_header(&self) -> String {
        match &self.bot_agent {
            Some(agent) => format!("{DIRECT_LINE_VERSION} (directlineStreaming; {agent})"),
            None => format!("{DIRECT_LINE_VERSION} (directlineStreaming)"),
        }
    }

    /// URL of the token refresh endpoint. The domain path is not rewritten.
    pub fn refresh_url(&self) -> String {
        format!("{}/tokens/refresh", self.domain.trim_end_matches('/'))
    }
}

/// Build the streaming connect URL from the configured domain and the
/// current credentials.
///
/// The domain's `http(s)` scheme is rewritten to `ws(s)`, the path
/// `/conversations/connect` is appended to the existing path, and `token`
/// and (when present) `conversationId` are URL-encoded query parameters.
pub fn connect_url(
    domain: &str,
    token: &str,
    conversation_id: Option<&str>,
) -> DirectLineResult<String> {
    let mut url =
        Url::parse(domain).map_err(|e| DirectLineError::config(format!("Invalid domain: {e}")))?;

    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => {
            return Err(DirectLineError::config(format!(
                "Domain must use an http(s) scheme, got {other}"
            )));
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| DirectLineError::config("Failed to rewrite URL scheme"))?;

    let path = format!("{}/conversations/connect", url.path().trim_end_matches('/'));
    url.set_path(&path);

    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("token", token);
        if let Some(id) = conversation_id {
            pairs.append_pair("conversationId", id);
        }
    }

    Ok(url.into())
}
