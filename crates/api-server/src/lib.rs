//! HTTP surface of the tracker.
use application::TrackerApp;
use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use domain::entities::{AnnounceRequest, Credentials, TorrentMetadata, User};
use domain::{DomainError, ErrorBody};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub tracker_app: Arc<TrackerApp>,
}

impl AppState {
    pub fn new(tracker_app: TrackerApp) -> Self {
        Self {
            tracker_app: Arc::new(tracker_app),
        }
    }
}

/// `DomainError` as an HTTP response with an [`ErrorBody`] payload.
#[derive(Debug)]
pub struct ApiError(pub DomainError);

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(DomainError::ValidationError(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self(DomainError::ValidationError(rejection.body_text()))
    }
}

pub fn status_for(err: &DomainError) -> StatusCode {
    match err {
        DomainError::ValidationError(_)
        | DomainError::InvalidStatusTransition(_)
        | DomainError::InvalidLocator(_) => StatusCode::BAD_REQUEST,
        DomainError::UnknownTorrent(_) | DomainError::NotFound(_) => StatusCode::NOT_FOUND,
        DomainError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        DomainError::UsernameAlreadyExists(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        } else {
            tracing::debug!(error = %self.0, %status, "request rejected");
        }
        (status, Json(ErrorBody::from(&self.0))).into_response()
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/publish", post(publish))
        .route("/announce", get(announce))
        .route("/torrent/:info_hash", get(get_torrent))
        .route("/health", get(health_check))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Resolves the `Authorization: Bearer <token>` header to its user.
async fn authenticated(state: &AppState, headers: &HeaderMap) -> Result<User, ApiError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            value
                .strip_prefix("Bearer ")
                .or_else(|| value.strip_prefix("bearer "))
        })
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| DomainError::Unauthorized("Missing bearer token".to_string()))?;

    Ok(state.tracker_app.user_service.authenticate(token).await?)
}

async fn register(
    State(state): State<AppState>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(credentials) = payload?;
    let token = state.tracker_app.user_service.register(&credentials).await?;
    info!(username = %credentials.username, "user registered");
    Ok((StatusCode::CREATED, Json(token)))
}

async fn login(
    State(state): State<AppState>,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(credentials) = payload?;
    let token = state.tracker_app.user_service.login(&credentials).await?;
    Ok(Json(token))
}

async fn publish(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<TorrentMetadata>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let user = authenticated(&state, &headers).await?;
    let Json(metadata) = payload?;

    let outcome = state.tracker_app.torrent_service.publish(metadata).await?;
    let status = if outcome.created {
        info!(info_hash = %outcome.metadata.info_hash, user = %user.username, "torrent published");
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome.metadata)))
}

async fn announce(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<AnnounceRequest>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let user = authenticated(&state, &headers).await?;
    let Query(request) = query?;

    let response = state
        .tracker_app
        .announce_service
        .announce(Some(&user), &request)
        .await?;
    Ok(Json(response))
}

async fn get_torrent(
    State(state): State<AppState>,
    Path(info_hash): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let service = &state.tracker_app.torrent_service;
    let torrent = service.find(&info_hash).await?;
    Ok(Json(service.describe(&torrent).await?))
}

async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracker_errors_map_to_http_statuses() {
        assert_eq!(
            status_for(&DomainError::UnknownTorrent("x".to_string())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&DomainError::ValidationError("bad event".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&DomainError::InvalidStatusTransition("x".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&DomainError::Unauthorized("x".to_string())),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_for(&DomainError::RepositoryError("x".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
