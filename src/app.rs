use crate::fetch::FetchError;
use crate::notify::ClickOutcome;
use crate::pages::PageEvent;
use crate::ports::{HttpClient, Notifier, TimeProvider};
use crate::state::WorkerState;
use crate::store::BucketStore;
use crate::types::{HttpRequest, HttpResponse, NotificationDisplay};
use crate::worker::{PageMessage, PageReply};

use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::body::{Body, Bytes, to_bytes};
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::{Deserialize, Serialize};

/// How long a page's event poll is held open before it is answered
/// with `IDLE` and the page re-polls.
const EVENT_POLL_WINDOW: Duration = Duration::from_secs(25);

pub fn app<S, C, T, N>(state: WorkerState<S, C, T, N>) -> Router
where
    S: BucketStore + Clone + Send + Sync + 'static,
    C: HttpClient,
    T: TimeProvider,
    N: Notifier,
{
    Router::new()
        .route("/worker/message", post(page_message::<S, C, T, N>))
        .route("/worker/push", post(push_event::<S, C, T, N>))
        .route(
            "/worker/notification-click",
            post(notification_click::<S, C, T, N>),
        )
        .route("/worker/events", get(page_events::<S, C, T, N>))
        .route("/worker/token-reply", post(token_reply::<S, C, T, N>))
        .route("/health", get(health))
        .fallback(intercept::<S, C, T, N>)
        .with_state(state)
}

pub(crate) async fn health() -> &'static str {
    "ok"
}

async fn page_message<S, C, T, N>(
    State(state): State<WorkerState<S, C, T, N>>,
    Json(message): Json<PageMessage>,
) -> Json<PageReply>
where
    S: BucketStore + Clone + Send + Sync + 'static,
    C: HttpClient,
    T: TimeProvider,
    N: Notifier,
{
    Json(state.worker.handle_message(message).await)
}

async fn push_event<S, C, T, N>(
    State(state): State<WorkerState<S, C, T, N>>,
    body: Bytes,
) -> Json<PageReply>
where
    S: BucketStore + Clone + Send + Sync + 'static,
    C: HttpClient,
    T: TimeProvider,
    N: Notifier,
{
    match state.worker.on_push(&body).await {
        Ok(()) => Json(PageReply::ok()),
        Err(err) => Json(PageReply::err(err)),
    }
}

#[derive(Debug, Deserialize)]
struct ClickRequest {
    #[serde(default)]
    action: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct ClickReply {
    success: bool,
    outcome: &'static str,
}

async fn notification_click<S, C, T, N>(
    State(state): State<WorkerState<S, C, T, N>>,
    Json(click): Json<ClickRequest>,
) -> Response
where
    S: BucketStore + Clone + Send + Sync + 'static,
    C: HttpClient,
    T: TimeProvider,
    N: Notifier,
{
    match state
        .worker
        .on_notification_click(&click.action, click.data)
        .await
    {
        Ok(ClickOutcome::Toggled { success }) => Json(ClickReply {
            success,
            outcome: "toggled",
        })
        .into_response(),
        Ok(ClickOutcome::Focused) => Json(ClickReply {
            success: true,
            outcome: "focused",
        })
        .into_response(),
        Ok(ClickOutcome::Dismissed) => Json(ClickReply {
            success: true,
            outcome: "dismissed",
        })
        .into_response(),
        Err(err) => (StatusCode::UNPROCESSABLE_ENTITY, Json(PageReply::err(err))).into_response(),
    }
}

/// What the long poll hands back to the page.
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
enum PageEventWire {
    #[serde(rename = "REQUEST_TOKEN", rename_all = "camelCase")]
    RequestToken { request_id: u64 },
    #[serde(rename = "FOCUS")]
    Focus { path: String },
    #[serde(rename = "NOTIFICATION")]
    Notification { display: NotificationDisplay },
    #[serde(rename = "IDLE")]
    Idle,
}

/// Long poll for worker-to-page events. Each call registers as one
/// connected page for its duration; a token request is answered out of
/// band via `/worker/token-reply`.
async fn page_events<S, C, T, N>(State(state): State<WorkerState<S, C, T, N>>) -> Json<PageEventWire>
where
    S: BucketStore + Clone + Send + Sync + 'static,
    C: HttpClient,
    T: TimeProvider,
    N: Notifier,
{
    let mut events = state.worker.pages().register();
    let wire = match tokio::time::timeout(EVENT_POLL_WINDOW, events.recv()).await {
        Ok(Some(PageEvent::RequestToken { reply })) => PageEventWire::RequestToken {
            request_id: state.replies.stash(reply),
        },
        Ok(Some(PageEvent::Focus { path })) => PageEventWire::Focus { path },
        Ok(Some(PageEvent::Notification { display })) => PageEventWire::Notification { display },
        _ => PageEventWire::Idle,
    };
    Json(wire)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenReplyRequest {
    request_id: u64,
    token: Option<String>,
}

async fn token_reply<S, C, T, N>(
    State(state): State<WorkerState<S, C, T, N>>,
    Json(reply): Json<TokenReplyRequest>,
) -> Json<PageReply>
where
    S: BucketStore + Clone + Send + Sync + 'static,
    C: HttpClient,
    T: TimeProvider,
    N: Notifier,
{
    if state.replies.answer(reply.request_id, reply.token) {
        Json(PageReply::ok())
    } else {
        Json(PageReply::err("unknown or expired request id"))
    }
}

/// The request surface: manifest-matching GETs come from the static
/// cache, API-prefixed paths go through the authenticated read-through
/// proxy, everything else passes straight through to the upstream.
async fn intercept<S, C, T, N>(
    State(state): State<WorkerState<S, C, T, N>>,
    request: axum::extract::Request,
) -> Response
where
    S: BucketStore + Clone + Send + Sync + 'static,
    C: HttpClient,
    T: TimeProvider,
    N: Notifier,
{
    let (parts, body) = request.into_parts();
    let Ok(body) = to_bytes(body, usize::MAX).await else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let path = parts.uri.path().to_string();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| path.clone());

    let worker = &state.worker;
    if parts.method == Method::GET && worker.assets().matches(&path) {
        return match worker.assets().serve(&path).await {
            Ok(response) => upstream_response(response),
            Err(err) => (StatusCode::BAD_GATEWAY, err).into_response(),
        };
    }

    let upstream = HttpRequest {
        method: parts.method.clone(),
        url: worker.api().url(&path_and_query),
        headers: forwarded_headers(&parts.headers),
        body: if body.is_empty() {
            None
        } else {
            Some(body.to_vec())
        },
    };
    let result = if path.starts_with(&worker.config().api_prefix) {
        worker.proxy().fetch(upstream).await
    } else {
        worker.api().fetch_plain(upstream).await
    };
    match result {
        Ok(response) => upstream_response(response),
        Err(err) => fetch_failure(err),
    }
}

fn forwarded_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter(|(name, _)| *name != header::HOST && *name != header::CONTENT_LENGTH)
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect()
}

fn upstream_response(response: HttpResponse) -> Response {
    let mut builder = Response::builder().status(response.status);
    if let Some(content_type) = response.content_type {
        builder = builder.header(header::CONTENT_TYPE, content_type);
    }
    builder
        .body(Body::from(response.body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

fn fetch_failure(err: FetchError) -> Response {
    let status = match &err {
        FetchError::Unauthenticated | FetchError::AuthRejected => StatusCode::UNAUTHORIZED,
        FetchError::Upstream(code) => {
            StatusCode::from_u16(*code).unwrap_or(StatusCode::BAD_GATEWAY)
        }
        FetchError::Network(_) => StatusCode::BAD_GATEWAY,
        FetchError::Decode(_) | FetchError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string()).into_response()
}
