//! Link endpoints and the WebSocket upgrade.
//!
//! Authentication happens upstream. The verified identity and the caller's
//! session arrive in the headers named by `[http]`; the session may also be
//! given as a `session_tag` query parameter, since browsers cannot set headers
//! on a WebSocket handshake.

use crate::connection::from_websocket;
use crate::error::RelayError;
use crate::relay::LinkRelay;
use axum::{
    extract::{ws::WebSocketUpgrade, Path, Query},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use link_types::{Identity, Link, LinkId, SessionTag};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Notice returned when the store cannot be read.
pub const STORE_ERROR_NOTICE: &str = "Error in receiving message from Database. Try again.";

/// JSON body of every link endpoint response.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    /// HTTP status code, repeated in the body.
    pub code: u16,
    /// Payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
    /// Message on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(status: StatusCode, result: T) -> (StatusCode, Json<Self>) {
        (
            status,
            Json(Self {
                code: status.as_u16(),
                result: Some(result),
                error: None,
            }),
        )
    }
}

/// Error mapped to a status code and message.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "missing verified identity")
    }
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::InvalidInput(e) => Self::new(StatusCode::BAD_REQUEST, e.to_string()),
            RelayError::NotFound { id } => {
                Self::new(StatusCode::NOT_FOUND, format!("link {} not found", id))
            }
            RelayError::RateLimited { reason } => Self::new(StatusCode::TOO_MANY_REQUESTS, reason),
            RelayError::Storage(e) => {
                tracing::error!("Store failure: {}", e);
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, STORE_ERROR_NOTICE)
            }
            other => {
                tracing::error!("Request failed: {}", other);
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<()> {
            code: self.status.as_u16(),
            result: None,
            error: Some(self.message),
        };
        (self.status, Json(body)).into_response()
    }
}

/// Optional `session_tag` query parameter.
#[derive(Debug, Default, Deserialize)]
pub struct SessionQuery {
    /// Caller's session tag.
    pub session_tag: Option<String>,
}

/// Body of `POST /links`.
#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    /// Message text. A missing field is treated as empty.
    #[serde(default)]
    pub message: String,
    /// Originating session; falls back to the session header.
    pub session_tag: Option<String>,
}

/// Response of `POST /links` and `DELETE /links/:id`.
#[derive(Debug, Serialize, Deserialize)]
pub struct LinkRef {
    /// Id of the stored link.
    pub id: LinkId,
}

/// Response of `DELETE /links`.
#[derive(Debug, Serialize, Deserialize)]
pub struct Deleted {
    /// Number of links removed.
    pub deleted: u64,
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

fn caller_identity(relay: &LinkRelay, headers: &HeaderMap) -> Result<Identity, ApiError> {
    header(headers, &relay.config().http.identity_header)
        .and_then(|value| Identity::new(value).ok())
        .ok_or_else(ApiError::unauthorized)
}

/// Session tag from an explicit value, else the session header.
fn caller_session(
    relay: &LinkRelay,
    headers: &HeaderMap,
    explicit: Option<&str>,
) -> Option<String> {
    explicit
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| header(headers, &relay.config().http.session_header))
        .map(str::to_string)
}

/// `GET /links`: the caller's inbox, minus links its own session sent.
pub async fn list_links(
    Extension(relay): Extension<Arc<LinkRelay>>,
    headers: HeaderMap,
    Query(query): Query<SessionQuery>,
) -> Result<(StatusCode, Json<ApiResponse<Vec<Link>>>), ApiError> {
    let identity = caller_identity(&relay, &headers)?;
    let exclude =
        caller_session(&relay, &headers, query.session_tag.as_deref()).unwrap_or_default();

    let links = relay.list_for(&identity, &exclude).await?;
    Ok(ApiResponse::ok(StatusCode::OK, links))
}

/// `POST /links`: relay a message as the caller.
pub async fn create_link(
    Extension(relay): Extension<Arc<LinkRelay>>,
    headers: HeaderMap,
    Json(body): Json<PublishRequest>,
) -> Result<(StatusCode, Json<ApiResponse<LinkRef>>), ApiError> {
    let identity = caller_identity(&relay, &headers)?;
    let session =
        caller_session(&relay, &headers, body.session_tag.as_deref()).unwrap_or_default();
    let session_tag = SessionTag::new(session).map_err(RelayError::from)?;

    let id = relay.publish(&identity, &body.message, &session_tag).await?;
    Ok(ApiResponse::ok(StatusCode::ACCEPTED, LinkRef { id }))
}

/// `DELETE /links/:id`: delete one of the caller's links.
pub async fn delete_link(
    Extension(relay): Extension<Arc<LinkRelay>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<(StatusCode, Json<ApiResponse<LinkRef>>), ApiError> {
    let identity = caller_identity(&relay, &headers)?;
    let id = LinkId::new(id);

    relay.delete_link(&identity, id).await?;
    Ok(ApiResponse::ok(StatusCode::OK, LinkRef { id }))
}

/// `DELETE /links`: empty the caller's inbox.
pub async fn delete_all_links(
    Extension(relay): Extension<Arc<LinkRelay>>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<ApiResponse<Deleted>>), ApiError> {
    let identity = caller_identity(&relay, &headers)?;

    let deleted = relay.delete_all_for(&identity).await?;
    Ok(ApiResponse::ok(StatusCode::OK, Deleted { deleted }))
}

/// `GET /ws`: upgrade and hand the socket to the relay.
pub async fn ws_handler(
    Extension(relay): Extension<Arc<LinkRelay>>,
    headers: HeaderMap,
    Query(query): Query<SessionQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let identity = caller_identity(&relay, &headers)?;
    let session =
        caller_session(&relay, &headers, query.session_tag.as_deref()).unwrap_or_default();
    let session_tag = SessionTag::new(session).map_err(RelayError::from)?;

    tracing::info!("WebSocket upgrade for {} ({})", identity, session_tag);

    Ok(ws.on_upgrade(move |socket| async move {
        let conn = from_websocket(socket);
        if let Err(e) = relay.connect(identity, session_tag, conn).await {
            tracing::warn!("Connection refused: {}", e);
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CryptoError, StorageError};
    use link_types::TypesError;
    use std::path::PathBuf;

    #[test]
    fn relay_errors_map_to_status_codes() {
        let cases = [
            (RelayError::InvalidInput(TypesError::EmptyMessage), StatusCode::BAD_REQUEST),
            (RelayError::NotFound { id: LinkId::new(3) }, StatusCode::NOT_FOUND),
            (
                RelayError::RateLimited {
                    reason: "slow down".into(),
                },
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (
                RelayError::Crypto(CryptoError::PaddingError),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }

    #[test]
    fn store_failure_hides_details() {
        let err = RelayError::Storage(StorageError::InvalidPath {
            path: PathBuf::from("/secret/links.db"),
        });

        let api = ApiError::from(err);
        assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api.message, STORE_ERROR_NOTICE);
    }
}
