//! HTTP routes: socket upgrades, queue size and the admin record API

use super::state::GatewayState;
use super::{session_socket, ticket_socket};
use crate::admin::{CreateSessionRequest, HeartbeatRequest, PlaylistResponse, SessionView};
use crate::error::MatchmakingError;
use crate::store::PlayerAssignment;
use axum::extract::rejection::JsonRejection;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::json;
use tracing::{debug, error, warn};

/// Error returned by a gateway handler
#[derive(Debug)]
pub struct ApiError(anyhow::Error);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self.0.downcast_ref::<MatchmakingError>() {
            Some(MatchmakingError::AuthFailure { .. }) => StatusCode::UNAUTHORIZED,
            Some(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            Some(MatchmakingError::InvalidRequest { .. })
            | Some(MatchmakingError::InvalidAttributes { .. }) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl<E: Into<anyhow::Error>> From<E> for ApiError {
    fn from(err: E) -> Self {
        ApiError(err.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {:#}", self.0);
            "internal error".to_string()
        } else {
            debug!("Request rejected - status: {}, error: {}", status, self.0);
            self.0.to_string()
        };
        (status, Json(json!({ "err": message }))).into_response()
    }
}

fn invalid_body(rejection: JsonRejection) -> ApiError {
    MatchmakingError::InvalidRequest {
        reason: rejection.body_text(),
    }
    .into()
}

/// Router serving every gateway endpoint
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/vesta/conn", get(ticket_upgrade))
        .route("/vesta/session", get(session_upgrade))
        .route("/vesta/queue", get(queue_total))
        .route("/api/server/session", post(create_session))
        .route("/api/server/session/{id}", delete(delete_session))
        .route("/api/server/session/{id}/playlist", get(select_playlist))
        .route("/api/server/session/{id}/{account_id}/player", get(player_in_session))
        .route("/api/server/session/{id}/start", post(start_session))
        .route("/api/server/session/{id}/close", post(close_session))
        .route("/api/server/session/{id}/heartbeat", post(heartbeat))
        .with_state(state)
}

fn authorization(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            MatchmakingError::AuthFailure {
                reason: "missing authorization header".to_string(),
            }
            .into()
        })
}

/// Reject, counting the failure, before anything is registered
fn reject_auth(state: &GatewayState, kind: &str, err: ApiError) -> Response {
    state.matchmaker.metrics().record_auth_failure(kind);
    warn!("Rejected {} socket: {}", kind, err.0);
    err.into_response()
}

async fn ticket_upgrade(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let verified = authorization(&headers)
        .and_then(|header| state.verifier.verify_ticket(header).map_err(ApiError::from));
    let attributes = match verified {
        Ok(attributes) => attributes,
        Err(e) => return reject_auth(&state, "ticket", e),
    };

    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };
    let max_message_size = state.matchmaker.settings().max_message_size;
    upgrade
        .max_message_size(max_message_size)
        .on_upgrade(move |socket| ticket_socket::serve(socket, state, attributes))
}

async fn session_upgrade(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let verified = authorization(&headers)
        .and_then(|header| state.verifier.verify_session(header).map_err(ApiError::from));
    let (session_id, server) = match verified {
        Ok(verified) => verified,
        Err(e) => return reject_auth(&state, "session", e),
    };

    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };
    let max_message_size = state.matchmaker.settings().max_message_size;
    upgrade
        .max_message_size(max_message_size)
        .on_upgrade(move |socket| session_socket::serve(socket, state, session_id, server))
}

async fn queue_total(State(state): State<GatewayState>) -> Result<Json<serde_json::Value>, ApiError> {
    let total = state.admin.queued_total()?;
    Ok(Json(json!({ "QueuedPlayers": total })))
}

async fn create_session(
    State(state): State<GatewayState>,
    body: Result<Json<CreateSessionRequest>, JsonRejection>,
) -> Result<Json<SessionView>, ApiError> {
    let Json(request) = body.map_err(invalid_body)?;
    let record = state.admin.create_session(request).await?;
    Ok(Json(SessionView::from(&record)))
}

async fn select_playlist(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Result<Json<PlaylistResponse>, ApiError> {
    Ok(Json(state.admin.playlist(&id).await?))
}

async fn player_in_session(
    State(state): State<GatewayState>,
    Path((id, account_id)): Path<(String, String)>,
) -> Result<Json<PlayerAssignment>, ApiError> {
    Ok(Json(state.admin.player_in_session(&id, &account_id).await?))
}

async fn start_session(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let notified = state.admin.start_session(&id).await?;
    Ok(Json(json!({ "SessionId": id, "Notified": notified })))
}

async fn close_session(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let notified = state.admin.close_session(&id).await?;
    Ok(Json(json!({ "SessionId": id, "Notified": notified })))
}

async fn heartbeat(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
    body: Result<Json<HeartbeatRequest>, JsonRejection>,
) -> Result<Json<SessionView>, ApiError> {
    let Json(request) = body.map_err(invalid_body)?;
    let record = state.admin.heartbeat(&id, request).await?;
    Ok(Json(SessionView::from(&record)))
}

async fn delete_session(
    State(state): State<GatewayState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.admin.delete_session(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthSettings, MatchmakingSettings};
    use crate::gateway::auth::JwtVerifier;
    use crate::matchmaker::Matchmaker;
    use crate::metrics::MetricsCollector;
    use crate::store::InMemorySessionStore;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> (Router, GatewayState) {
        let matchmaker = Arc::new(Matchmaker::new(
            Arc::new(InMemorySessionStore::new()),
            MatchmakingSettings::without_delays(),
            Arc::new(MetricsCollector::new().unwrap()),
        ));
        let verifier = JwtVerifier::new(&AuthSettings {
            jwt_secret: "secret".to_string(),
            ..AuthSettings::default()
        })
        .unwrap();
        let state = GatewayState::new(matchmaker, Arc::new(verifier), 16);
        (router(state.clone()), state)
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_socket_without_credentials_is_unauthorized() {
        let (app, state) = app();
        for uri in ["/vesta/conn", "/vesta/session"] {
            let response = app
                .clone()
                .oneshot(Request::get(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }

        let response = app
            .oneshot(
                Request::get("/vesta/conn")
                    .header("Authorization", "Epic-Signed Vesta bad token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(state.matchmaker.tickets().is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_create_then_delete_session() {
        let (app, _) = app();
        let body = json!({
            "Playlist": "playlist_defaultsolo",
            "ServerAddr": "10.0.0.1",
            "ServerPort": 7777,
            "Region": "NAE",
            "Version": "1.0",
            "Attributes": {"MaxPlayers": 100}
        });
        let response = app
            .clone()
            .oneshot(
                Request::post("/api/server/session")
                    .header("Content-Type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let created = json_body(response).await;
        assert_eq!(created["Accessible"], true);
        assert_eq!(created["Available"], false);
        let id = created["SessionId"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(
                Request::get(format!("/api/server/session/{}/playlist", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let playlist = json_body(response).await;
        assert_eq!(playlist["Status"], "WAITING");
        assert!(playlist["Playlist"].is_null());

        let response = app
            .clone()
            .oneshot(
                Request::delete(format!("/api/server/session/{}", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .oneshot(
                Request::post(format!("/api/server/session/{}/start", id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let (app, _) = app();
        let response = app
            .oneshot(
                Request::post("/api/server/session")
                    .header("Content-Type", "application/json")
                    .body(Body::from("{oops"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_queue_total() {
        let (app, _) = app();
        let response = app
            .oneshot(Request::get("/vesta/queue").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(json_body(response).await["QueuedPlayers"], 0);
    }

    #[test]
    fn test_status_mapping() {
        let not_found = ApiError::from(MatchmakingError::RecordNotFound {
            session_id: "s1".to_string(),
        });
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);

        let internal = ApiError::from(MatchmakingError::lock_failed("sessions"));
        assert_eq!(internal.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let plain = ApiError::from(anyhow::anyhow!("boom"));
        assert_eq!(plain.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
