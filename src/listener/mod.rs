//! HTTP/WebSocket listener: binds the loopback port, parses each request's
//! target, and dispatches to the matching session.
//!
//! Built on `axum`, since none of the teacher's own crates embed an HTTP
//! *server* (enrichment sourced from the retrieval pack's `ArchDrop`/
//! `entanglement` manifests, which use `axum` for the same "serve an
//! uploaded bundle over loopback HTTP" role).

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use dashmap::DashMap;
use log::warn;
use tower_http::timeout::TimeoutLayer;

use crate::proto::limits::MAX_FORM_BODY;
use crate::session::SessionHandle;
use crate::url_target::parse_target;

/// The listener's session index: a map from session id to a handle on its
/// actor task. Entries are pruned by each session's own teardown, so a
/// stale id simply isn't present rather than pointing at a dead task —
/// the channel-based equivalent of the spec's "weak back-reference,
/// pruned on lookup miss" design.
pub type SessionIndex = Arc<DashMap<String, SessionHandle>>;

const FORMS_JS: &str = include_str!("assets/forms.js");
const LOADING_HTML: &str = include_str!("assets/loading.html");

/// HTTP idle timeout per spec §5 ("Cancellation and timeouts").
const HTTP_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
struct ListenerState {
    sessions: SessionIndex,
}

/// Build the router. `sessions` is shared with the [`crate::coordinator`].
pub fn router(sessions: SessionIndex) -> Router {
    let state = ListenerState { sessions };
    Router::new()
        .route(
            "/:sid/submit",
            post(submit_handler).layer(DefaultBodyLimit::max(MAX_FORM_BODY)),
        )
        .route("/:sid/ws", get(ws_handler))
        .fallback(catch_all)
        .layer(TimeoutLayer::new(HTTP_IDLE_TIMEOUT))
        .with_state(state)
}

async fn submit_handler(
    Path(sid): Path<String>,
    State(state): State<ListenerState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !content_type.starts_with("application/x-www-form-urlencoded") {
        return StatusCode::BAD_REQUEST.into_response();
    }
    if body.len() > MAX_FORM_BODY {
        return StatusCode::BAD_REQUEST.into_response();
    }

    let handle = match state.sessions.get(&sid) {
        Some(h) => h.clone(),
        None => return StatusCode::NOT_FOUND.into_response(),
    };

    if let Err(e) = handle.submit_form(body).await {
        warn!("session {sid}: form submission failed: {e:#}");
        return StatusCode::BAD_REQUEST.into_response();
    }

    Redirect::to("/html/loading.html").into_response()
}

async fn ws_handler(
    Path(sid): Path<String>,
    State(state): State<ListenerState>,
    ws: WebSocketUpgrade,
) -> Response {
    let handle = match state.sessions.get(&sid) {
        Some(h) => h.clone(),
        None => return StatusCode::NOT_FOUND.into_response(),
    };
    ws.on_upgrade(move |socket| async move {
        if let Err(e) = handle.attach_ws(socket).await {
            warn!("session {sid}: WebSocket attach refused: {e:#}");
        }
    })
}

async fn catch_all(method: Method, uri: Uri, State(state): State<ListenerState>) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return StatusCode::BAD_REQUEST.into_response();
    }

    let (sid, path) = match parse_target(uri.path()) {
        Ok(parts) => parts,
        Err(_) => return StatusCode::BAD_REQUEST.into_response(),
    };

    if sid == "html" {
        return serve_static(&path);
    }

    let handle = match state.sessions.get(&sid) {
        Some(h) => h.clone(),
        None => return StatusCode::NOT_FOUND.into_response(),
    };

    match handle.sandbox.lookup(&path).await {
        Ok((file_path, mime)) => match tokio::fs::read(&file_path).await {
            Ok(bytes) => ([(header::CONTENT_TYPE, mime)], bytes).into_response(),
            Err(_) => StatusCode::NOT_FOUND.into_response(),
        },
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}

fn serve_static(path: &str) -> Response {
    match path {
        "/forms.js" => (
            [(header::CONTENT_TYPE, "text/javascript")],
            FORMS_JS,
        )
            .into_response(),
        "/loading.html" => (
            [(header::CONTENT_TYPE, "text/html")],
            LOADING_HTML,
        )
            .into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}
