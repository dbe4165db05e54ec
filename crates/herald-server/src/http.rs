//! Plain HTTP handlers: the manual notify endpoint and the test page.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, Json};
use herald_core::constants::{DEFAULT_NOTIFY_TEXT, SHUTTING_DOWN_REASON};
use herald_core::{Message, Source};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::server::AppState;

const INDEX_HTML: &str = include_str!("../static/index.html");

/// Query parameters for `POST /notify`.
#[derive(Debug, Default, Deserialize)]
pub struct NotifyParams {
    /// Notification text; defaults to `"Manual notification"`.
    pub message: Option<String>,
}

/// Body returned by `POST /notify`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyResponse {
    /// `"success"` or `"error"`.
    pub status: String,
    /// Human-readable result.
    pub message: String,
}

impl NotifyResponse {
    fn success(message: String) -> Self {
        Self {
            status: "success".into(),
            message,
        }
    }

    fn error(message: String) -> Self {
        Self {
            status: "error".into(),
            message,
        }
    }
}

/// POST /notify: broadcast a notification to every worker's clients.
///
/// During shutdown this answers with an error body and publishes nothing.
pub async fn notify(
    State(state): State<AppState>,
    Query(params): Query<NotifyParams>,
) -> (StatusCode, Json<NotifyResponse>) {
    let registry = &state.registry;
    if registry.is_shutdown_initiated() {
        return (
            StatusCode::OK,
            Json(NotifyResponse::error(SHUTTING_DOWN_REASON.into())),
        );
    }

    let text = params.message.unwrap_or_else(|| DEFAULT_NOTIFY_TEXT.to_owned());
    match registry.broadcast(&Message::notification(text, Source::Api)).await {
        Ok(_) => {
            let count = registry.connection_count();
            info!(connections = count, "manual notification sent");
            (
                StatusCode::OK,
                Json(NotifyResponse::success(format!(
                    "Notification sent to {count} clients"
                ))),
            )
        }
        Err(error) => {
            warn!(%error, "manual notification failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(NotifyResponse::error(format!(
                    "Failed to send notification: {error}"
                ))),
            )
        }
    }
}

/// GET /: a page for trying the `WebSocket` endpoint by hand.
pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}
