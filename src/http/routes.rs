//! axum routes for the streamable HTTP endpoint.
//!
//! | Method   | Path       | Behaviour                                         |
//! |----------|------------|---------------------------------------------------|
//! | `POST`   | endpoint   | one message or batch; `initialize` opens a session|
//! | `GET`    | endpoint   | attach the session's SSE stream                   |
//! | `DELETE` | endpoint   | tear the session down                             |
//! | `GET`    | `/health`  | liveness probe, `ok`                              |
//!
//! Any other method on the endpoint gets `405` from the method router.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::session::{PostReply, SessionManager, SessionStart, SseFrame};
use crate::config::HttpConfig;
use crate::protocol::methods;
use crate::transport::http_client::SESSION_ID_HEADER;
use crate::{AppError, Result};

/// Handler for `GET /health`.
async fn health() -> &'static str {
    "ok"
}

/// Build the router serving the endpoint at `path`.
pub fn router(manager: Arc<SessionManager>, path: &str) -> Router {
    Router::new()
        .route(
            path,
            post(handle_post).get(handle_get).delete(handle_delete),
        )
        .route("/health", get(health))
        .with_state(manager)
}

/// Bind `config.host:config.port` and serve until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Config` if the address is invalid or the bind fails.
pub async fn serve_http(
    manager: Arc<SessionManager>,
    config: &HttpConfig,
    ct: CancellationToken,
) -> Result<()> {
    let bind: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|err| AppError::Config(format!("invalid http bind address: {err}")))?;
    let listener = TcpListener::bind(bind)
        .await
        .map_err(|err| AppError::Config(format!("failed to bind HTTP on {bind}: {err}")))?;
    serve_listener(listener, manager, &config.path, ct).await
}

/// Serve on an already bound listener until `ct` is cancelled, then close
/// every session.
///
/// # Errors
///
/// Returns `AppError::Transport` if the server fails.
pub async fn serve_listener(
    listener: TcpListener,
    manager: Arc<SessionManager>,
    path: &str,
    ct: CancellationToken,
) -> Result<()> {
    let local = listener
        .local_addr()
        .map_err(|err| AppError::Transport(format!("listener has no address: {err}")))?;
    info!(%local, path, "starting streamable HTTP transport");

    let app = router(Arc::clone(&manager), path);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .map_err(|err| AppError::Transport(format!("HTTP server error: {err}")))?;

    manager.close().await;
    info!("streamable HTTP transport shut down");
    Ok(())
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn handle_post(
    State(manager): State<Arc<SessionManager>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let Ok(value) = serde_json::from_str::<Value>(&body) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid JSON");
    };

    if is_initialize(&value) {
        return match manager.initialize_session(&body).await {
            Ok(SessionStart::Created { session_id, reply }) => {
                let mut response = json_body(StatusCode::OK, reply);
                if let Ok(value) = HeaderValue::from_str(&session_id) {
                    response
                        .headers_mut()
                        .insert(HeaderName::from_static(SESSION_ID_HEADER), value);
                }
                response
            }
            Ok(SessionStart::Rejected { reply: Some(reply) }) => json_body(StatusCode::OK, reply),
            Ok(SessionStart::Rejected { reply: None }) => StatusCode::ACCEPTED.into_response(),
            Err(err) => {
                warn!(%err, "failed to create session");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to create session")
            }
        };
    }

    let Some(session_id) = session_header(&headers) else {
        return error_response(StatusCode::BAD_REQUEST, "Missing session ID");
    };

    match manager.handle_post(&session_id, &body).await {
        Ok(PostReply::NoContent) => StatusCode::ACCEPTED.into_response(),
        Ok(PostReply::Streamed) => (StatusCode::OK, Json(json!({"accepted": true}))).into_response(),
        Ok(PostReply::Direct(reply)) => json_body(StatusCode::OK, reply),
        Err(_) => error_response(StatusCode::BAD_REQUEST, "Invalid session ID"),
    }
}

async fn handle_get(State(manager): State<Arc<SessionManager>>, headers: HeaderMap) -> Response {
    let Some(session_id) = session_header(&headers) else {
        return error_response(StatusCode::BAD_REQUEST, "Missing session ID");
    };
    let Some(rx) = manager.attach_stream(&session_id) else {
        return error_response(StatusCode::NOT_FOUND, "Session not found");
    };

    let events = futures_util::stream::unfold(rx, |mut rx| async move {
        let frame = rx.recv().await?;
        let event = match frame {
            SseFrame::Data(data) => Event::default().data(data),
            SseFrame::Comment(text) => Event::default().comment(text),
        };
        Some((Ok::<Event, Infallible>(event), rx))
    });

    (
        [(header::CACHE_CONTROL, "no-cache")],
        Sse::new(events),
    )
        .into_response()
}

async fn handle_delete(
    State(manager): State<Arc<SessionManager>>,
    headers: HeaderMap,
) -> Response {
    let Some(session_id) = session_header(&headers) else {
        return error_response(StatusCode::BAD_REQUEST, "Missing session ID");
    };
    if !manager.remove_session(&session_id).await {
        info!(session_id = %session_id, "DELETE for an unknown session");
    }
    Json(json!({"success": true})).into_response()
}

// ── Private helpers ───────────────────────────────────────────────────────────

fn session_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

fn is_initialize(value: &Value) -> bool {
    value.get("method").and_then(Value::as_str) == Some(methods::INITIALIZE)
}

fn json_body(status: StatusCode, body: String) -> Response {
    (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({"error": message}))).into_response()
}
