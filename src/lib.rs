//! # Direct Line Streaming
//!
//! Client core for the Direct Line 3.0 streaming protocol: one conversation
//! carried over a bidirectional framed transport (a WebSocket multiplexing
//! multi-stream requests and responses).
//!
//! The crate owns the conversation lifecycle:
//!
//! - **Session establishment**: transport handshake plus the
//!   start-conversation exchange that yields the conversation id.
//! - **Token rotation**: a background refresher rotates the bearer token on
//!   a timer, with bounded retries and fatal-failure handling.
//! - **Inbound delivery**: server-pushed activity sets are parsed, binary
//!   attachment streams are materialized into inline data URIs, and
//!   activities reach consumers in arrival order — activities arriving
//!   before consumers observe `Online` are queued and flushed in order,
//!   exactly once.
//! - **Outbound send**: plain activities and multipart attachment uploads,
//!   surfacing the server-assigned id per send.
//! - **Recovery**: transport loss is retried with a jittered delay under a
//!   bounded budget; exhaustion terminates the activity stream.
//!
//! The WebSocket transport itself is not implemented here: callers supply a
//! [`transport::TransportFactory`]. Token refresh and attachment fetching go
//! through [`http::HttpTransfer`], which defaults to a reqwest-backed
//! implementation.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use directline_streaming::{Activity, DirectLineClient, DirectLineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DirectLineConfig::new(token, "https://directline.example.com/v3/directline")
//!         .bot_agent("myapp/1.0");
//!     let client = DirectLineClient::new(config, my_transport_factory)?;
//!
//!     let mut activities = client.activities();
//!     while let Some(activity) = activities.recv().await {
//!         println!("{:?}", activity?);
//!     }
//!     Ok(())
//! }
//! ```

mod actor;
pub mod config;
pub mod error;
pub mod http;
mod inbound;
mod outbound;
mod refresh;
mod sink;
pub mod transport;
pub mod types;

mod client;

// Re-export commonly used types
pub use client::DirectLineClient;
pub use config::{
    DIRECT_LINE_VERSION, DirectLineConfig, MAX_RETRY_COUNT, REFRESH_TOKEN_INTERVAL,
    REFRESH_TOKEN_LIFETIME,
};
pub use error::{ActivityStreamError, DirectLineError, DirectLineResult};
pub use sink::ActivityStream;
pub use types::{Activity, ActivitySet, Attachment, ChannelAccount, ConnectionStatus, Conversation};
