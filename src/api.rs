//! HTTP API endpoints for operators.
//!
//! Channel switching, status, and the announce hooks used by whatever
//! persists comments and reactions.

use axum::{
    extract::State,
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::auth::{operator_auth_middleware, AuthConfig};
use crate::hub::Hub;
use crate::protocol::ServerMessage;
use crate::types::{ChannelName, Comment, ConnectionState, Reaction};
use crate::ws;

/// Build the full application router
pub fn router(hub: Arc<Hub>, auth_config: Arc<AuthConfig>) -> Router {
    let api_routes = Router::new()
        .route("/api/switch-channel", post(switch_channel))
        .route("/api/comments/announce", post(announce_comment))
        .route("/api/reactions/announce", post(announce_reaction))
        .route("/api/status", get(status))
        .layer(middleware::from_fn_with_state(
            auth_config,
            operator_auth_middleware,
        ));

    Router::new()
        .route("/ws", get(ws::ws_handler))
        .merge(api_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(hub)
}

/// Error body shared by all endpoints
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: error.into(),
        }),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
pub struct SwitchChannelRequest {
    pub channel: String,
}

#[derive(Debug, Serialize)]
pub struct SwitchChannelResponse {
    pub success: bool,
    pub channel: ChannelName,
}

/// Switch the relay to another channel.
///
/// POST /api/switch-channel
pub async fn switch_channel(
    State(hub): State<Arc<Hub>>,
    Json(req): Json<SwitchChannelRequest>,
) -> Response {
    match hub.switch_channel(&req.channel).await {
        Ok(channel) => Json(SwitchChannelResponse {
            success: true,
            channel,
        })
        .into_response(),
        Err(e) => {
            tracing::warn!("Rejected channel switch: {}", e);
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnounceCommentRequest {
    pub username: String,
    pub message: String,
    pub tx_hash: String,
}

/// Announce a stored comment to every viewer.
///
/// POST /api/comments/announce
pub async fn announce_comment(
    State(hub): State<Arc<Hub>>,
    Json(req): Json<AnnounceCommentRequest>,
) -> Response {
    if [&req.username, &req.message, &req.tx_hash]
        .iter()
        .any(|field| field.trim().is_empty())
    {
        return error_response(StatusCode::BAD_REQUEST, "Invalid comment data");
    }

    let comment = Comment {
        username: req.username,
        message: req.message,
        tx_hash: req.tx_hash,
        timestamp: chrono::Utc::now(),
    };
    let delivered = hub.announce(ServerMessage::NewComment {
        comment: comment.clone(),
    });
    tracing::debug!("Announced comment {} to {} subscribers", comment.tx_hash, delivered);

    (StatusCode::CREATED, Json(comment)).into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnounceReactionRequest {
    pub emoji_type: String,
    pub tx_hash: String,
}

/// Announce a stored reaction to every viewer.
///
/// POST /api/reactions/announce
pub async fn announce_reaction(
    State(hub): State<Arc<Hub>>,
    Json(req): Json<AnnounceReactionRequest>,
) -> Response {
    if req.emoji_type.trim().is_empty() || req.tx_hash.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Invalid reaction data");
    }

    let reaction = Reaction {
        emoji_type: req.emoji_type,
        tx_hash: req.tx_hash,
        timestamp: chrono::Utc::now(),
    };
    let delivered = hub.announce(ServerMessage::NewReaction {
        reaction: reaction.clone(),
    });
    tracing::debug!(
        "Announced {} reaction to {} subscribers",
        reaction.emoji_type,
        delivered
    );

    (StatusCode::CREATED, Json(reaction)).into_response()
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub channel: Option<ChannelName>,
    pub upstream: ConnectionState,
    pub subscribers: usize,
}

/// GET /api/status
pub async fn status(State(hub): State<Arc<Hub>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        channel: hub.current_channel(),
        upstream: hub.upstream_state(),
        subscribers: hub.subscriber_count(),
    })
}
