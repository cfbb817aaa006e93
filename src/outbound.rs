//! Outbound activity delivery: the plain single-stream POST and the
//! multipart attachment upload.

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::{
    error::{DirectLineError, DirectLineResult},
    http::{HttpRequest, HttpTransfer},
    transport::{ContentStream, StreamingRequest, StreamingResponse, StreamingTransport},
    types::Activity,
};

/// Content type of the activity envelope within an upload request.
pub(crate) const ACTIVITY_CONTENT_TYPE: &str = "application/vnd.microsoft.activity";

#[derive(Deserialize)]
struct ResourceResponse {
    #[serde(rename = "Id")]
    id: String,
}

/// Send an activity over the streaming transport and return the
/// server-assigned id.
///
/// `"message"` activities carrying attachments go through the upload path;
/// everything else is a single-stream POST. Returns `Ok(None)` only for the
/// tolerated empty-stream upload response.
pub(crate) async fn post_activity<T>(
    transport: &T,
    http: &dyn HttpTransfer,
    conversation_id: &str,
    activity: &Activity,
    timeout: Duration,
) -> DirectLineResult<Option<String>>
where
    T: StreamingTransport + ?Sized,
{
    if activity.activity_type == crate::types::MESSAGE_ACTIVITY_TYPE && activity.has_attachments() {
        post_with_attachments(transport, http, conversation_id, activity, timeout).await
    } else {
        post_plain(transport, conversation_id, activity, timeout).await
    }
}

async fn post_plain<T>(
    transport: &T,
    conversation_id: &str,
    activity: &Activity,
    timeout: Duration,
) -> DirectLineResult<Option<String>>
where
    T: StreamingTransport + ?Sized,
{
    let request = StreamingRequest::post(format!(
        "/v3/directline/conversations/{conversation_id}/activities"
    ))
    .stream(ContentStream::new(
        "application/json",
        serde_json::to_vec(activity)?,
    ));

    let response = send_with_timeout(transport, request, timeout).await?;
    ensure_ok(&response)?;
    let stream = exactly_one(&response)?;
    let ResourceResponse { id } = stream.json()?;

    debug!(id = %id, "Posted activity");
    Ok(Some(id))
}

async fn post_with_attachments<T>(
    transport: &T,
    http: &dyn HttpTransfer,
    conversation_id: &str,
    activity: &Activity,
    timeout: Duration,
) -> DirectLineResult<Option<String>>
where
    T: StreamingTransport + ?Sized,
{
    let from_id = activity
        .from
        .as_ref()
        .map(|from| from.id.as_str())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            DirectLineError::protocol("message with attachments requires from.id")
        })?;

    let attachments = activity.attachments.as_deref().unwrap_or_default();

    // Fetch everything up front; the upload request is only framed once
    // all attachment bytes are in hand.
    let mut fetched = Vec::with_capacity(attachments.len());
    for attachment in attachments {
        let response = http
            .execute(HttpRequest::get(attachment.content_url.clone(), timeout))
            .await?;
        if !response.status.is_success() {
            return Err(DirectLineError::api(
                response.status,
                format!("fetching attachment {}", attachment.content_url),
            ));
        }
        fetched.push((attachment.content_type.clone(), response.body));
    }

    let mut bare = activity.clone();
    bare.attachments = None;

    let mut request = StreamingRequest::put(format!(
        "/v3/directline/conversations/{conversation_id}/users/{from_id}/upload"
    ))
    .stream(ContentStream::new(
        ACTIVITY_CONTENT_TYPE,
        serde_json::to_vec(&bare)?,
    ));
    for (content_type, body) in fetched {
        request = request.stream(ContentStream::new(content_type, body));
    }

    let response = send_with_timeout(transport, request, timeout).await?;
    ensure_ok(&response)?;

    if response.streams.is_empty() {
        // Tolerated: some service versions answer an upload with no body.
        warn!("Upload response carried no streams; no activity id to surface");
        return Ok(None);
    }
    let stream = exactly_one(&response)?;
    let ResourceResponse { id } = stream.json()?;

    debug!(id = %id, "Uploaded activity with attachments");
    Ok(Some(id))
}

async fn send_with_timeout<T>(
    transport: &T,
    request: StreamingRequest,
    timeout: Duration,
) -> DirectLineResult<StreamingResponse>
where
    T: StreamingTransport + ?Sized,
{
    tokio::time::timeout(timeout, transport.send(request))
        .await
        .map_err(|_| DirectLineError::timeout(timeout))?
}

fn ensure_ok(response: &StreamingResponse) -> DirectLineResult<()> {
    if response.status_code != http::StatusCode::OK {
        return Err(DirectLineError::api(response.status_code, "activity post rejected"));
    }
    Ok(())
}

fn exactly_one(response: &StreamingResponse) -> DirectLineResult<&ContentStream> {
    match response.streams.as_slice() {
        [stream] => Ok(stream),
        streams => Err(DirectLineError::protocol(format!(
            "expected 1 response stream, got {}",
            streams.len()
        ))),
    }
}
