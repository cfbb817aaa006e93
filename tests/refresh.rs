//! Token refresh at the client level: rotation, fatal failures and the
//! exhausted-budget terminal path.

mod support;

use std::{sync::Arc, time::Duration};

use http::StatusCode;

use directline_streaming::{ActivityStreamError, ConnectionStatus, DirectLineClient};
use support::{FakeFactory, FakeHttp, fast_config, wait_until};

fn refresh_client(factory: &FakeFactory, http: &Arc<FakeHttp>) -> DirectLineClient {
    let config = fast_config().refresh_interval(Duration::from_millis(50));
    DirectLineClient::with_http_transfer(
        config,
        factory.clone(),
        Arc::clone(http) as Arc<dyn directline_streaming::http::HttpTransfer>,
    )
    .expect("client")
}

#[tokio::test(start_paused = true)]
async fn refresh_rotates_the_token_used_for_reconnects() {
    let factory = FakeFactory::new();
    let http = Arc::new(FakeHttp::new());
    http.queue_refresh_token("t1");
    let client = refresh_client(&factory, &http);

    let _activities = client.activities();
    let mut status = client.connection_status();
    status.wait_for(|s| s.is_online()).await.expect("online");

    wait_until(|| http.refresh_calls() == 1).await;

    let refresh = http
        .requests()
        .into_iter()
        .find(|r| r.url.ends_with("/tokens/refresh"))
        .expect("refresh request");
    assert_eq!(refresh.url, "https://example.com/v3/directline/tokens/refresh");
    assert!(
        refresh
            .headers
            .iter()
            .any(|(name, value)| name == "Authorization" && value == "Bearer t0k")
    );
    assert!(
        refresh
            .headers
            .iter()
            .any(|(name, value)| name == "x-ms-bot-agent"
                && value == "DirectLine/3.0 (directlineStreaming)")
    );

    // The rotated token shows up in the next connect URL.
    factory.latest().server_close();
    status
        .wait_for(|s| *s == ConnectionStatus::Connecting)
        .await
        .expect("connecting");
    status.wait_for(|s| s.is_online()).await.expect("online again");
    assert!(factory.latest().url.contains("token=t1"));
}

#[tokio::test(start_paused = true)]
async fn refresh_403_disconnects_and_stops_refreshing() {
    let factory = FakeFactory::new();
    let http = Arc::new(FakeHttp::new());
    http.queue_refresh_status(StatusCode::FORBIDDEN);
    let client = refresh_client(&factory, &http);

    let _activities = client.activities();
    let mut status = client.connection_status();
    status.wait_for(|s| s.is_online()).await.expect("online");
    let first = factory.latest();

    wait_until(|| first.disconnect_calls() == 1).await;
    assert_eq!(http.refresh_calls(), 1);

    // The transport loss itself is recoverable: the controller reconnects,
    // but no further refresh is ever scheduled.
    status.wait_for(|s| s.is_online()).await.expect("online again");
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(http.refresh_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn exhausted_refresh_budget_is_terminal_token_unavailable() {
    let factory = FakeFactory::new();
    let http = Arc::new(FakeHttp::new());
    for _ in 0..4 {
        http.queue_refresh_status(StatusCode::INTERNAL_SERVER_ERROR);
    }
    let client = refresh_client(&factory, &http);

    let mut activities = client.activities();
    client
        .connection_status()
        .wait_for(|s| s.is_online())
        .await
        .expect("online");

    match activities.recv().await {
        Some(Err(ActivityStreamError::TokenUnavailable)) => {}
        other => panic!("expected token-unavailable error, got {other:?}"),
    }

    // Initial attempt plus three immediate retries, then nothing more.
    assert_eq!(http.refresh_calls(), 4);
    assert_eq!(factory.created_count(), 1);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(factory.created_count(), 1);
}
