// REST API for sign-in and sessions

use axum::{
    Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::auth::{
    AuthError, AuthErrorKind, AuthService, ProviderCredentials, ProviderId, SessionUpdate,
    SessionView, SurrealIdentityStore,
};

pub type AppState = Arc<AuthService<SurrealIdentityStore>>;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/auth/providers", get(list_providers))
        .route("/api/auth/signin/{provider}", post(sign_in))
        .route("/api/auth/session", get(get_session).post(update_session))
        .route("/api/auth/error", get(auth_error))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// An [`AuthError`] rendered for HTTP, pointing at the configured error page.
pub struct ApiError {
    error: AuthError,
    error_page: String,
}

impl ApiError {
    fn new(error: AuthError, state: &AppState) -> Self {
        Self {
            error,
            error_page: state.config().error_page.clone(),
        }
    }
}

fn status_for(kind: AuthErrorKind) -> StatusCode {
    match kind {
        AuthErrorKind::Configuration => StatusCode::INTERNAL_SERVER_ERROR,
        AuthErrorKind::AccessDenied => StatusCode::FORBIDDEN,
        AuthErrorKind::Verification => StatusCode::UNAUTHORIZED,
        AuthErrorKind::Default => StatusCode::BAD_REQUEST,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.error.kind();
        match kind {
            AuthErrorKind::Configuration => error!("Authentication failed: {}", self.error),
            _ => warn!(kind = kind.as_str(), "Authentication failed: {}", self.error),
        }

        let body = serde_json::json!({
            "error": kind,
            "message": kind.message(),
            "redirect": self.error.destination(&self.error_page),
        });
        (status_for(kind), Json(body)).into_response()
    }
}

/// Token from an `Authorization: Bearer` header.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

#[derive(Debug, Serialize)]
struct SessionResponse {
    token: String,
    session: SessionView,
}

async fn health_check() -> Result<Json<Value>, StatusCode> {
    Ok(Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

async fn list_providers(State(state): State<AppState>) -> Json<Value> {
    Json(serde_json::json!({
        "providers": state.enabled_providers(),
    }))
}

async fn sign_in(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<SessionResponse>, ApiError> {
    let provider: ProviderId = provider.parse().map_err(|e| ApiError::new(e, &state))?;

    // Guests may post nothing at all.
    let credentials = if body.is_empty() {
        ProviderCredentials::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| {
            ApiError::new(
                AuthError::InvalidCredentials(format!("Malformed credentials: {}", e)),
                &state,
            )
        })?
    };

    let report = state
        .sign_in(provider, credentials, bearer_token(&headers))
        .await
        .map_err(|e| ApiError::new(e, &state))?;

    Ok(Json(SessionResponse {
        token: report.token,
        session: report.session,
    }))
}

async fn get_session(State(state): State<AppState>, headers: HeaderMap) -> Json<Value> {
    // No session is an empty object, not an error.
    let session = state
        .session(bearer_token(&headers))
        .and_then(|view| serde_json::to_value(view).ok())
        .unwrap_or_else(|| serde_json::json!({}));
    Json(session)
}

async fn update_session(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = state
        .authenticate(bearer_token(&headers))
        .map_err(|e| ApiError::new(e, &state))?;

    let update: SessionUpdate = if body.is_empty() {
        SessionUpdate::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| {
            ApiError::new(
                AuthError::InvalidCredentials(format!("Malformed session update: {}", e)),
                &state,
            )
        })?
    };

    let updated = state
        .apply_update(session, update)
        .await
        .map_err(|e| ApiError::new(e, &state))?;

    Ok(Json(SessionResponse {
        token: updated.token,
        session: updated.session,
    }))
}

#[derive(Debug, Deserialize)]
struct ErrorQuery {
    error: Option<String>,
}

async fn auth_error(Query(query): Query<ErrorQuery>) -> Json<Value> {
    let kind = query
        .error
        .as_deref()
        .map(AuthErrorKind::parse)
        .unwrap_or(AuthErrorKind::Default);

    Json(serde_json::json!({
        "error": kind,
        "message": kind.message(),
    }))
}
