//! JSON-over-HTTP surface for tables and reservations.
//!
//! Every route except `/health` requires `Authorization: Bearer <token>`.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequestParts, MatchedPath, Path, Request, State};
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Serialize;
use thiserror::Error;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::auth::{TokenVerifier, bearer_token};
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability::{REQUEST_DURATION_SECONDS, REQUESTS_TOTAL};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub verifier: Arc<dyn TokenVerifier>,
}

// ── Errors ───────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            ApiError::Engine(e) => match e {
                EngineError::NotFoundOrForbidden(_) => StatusCode::NOT_FOUND,
                EngineError::Unauthenticated => StatusCode::UNAUTHORIZED,
                EngineError::InvalidToken(_) => StatusCode::FORBIDDEN,
                EngineError::StoreFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
                EngineError::MissingField(_)
                | EngineError::InvalidName
                | EngineError::InvalidPhone
                | EngineError::InvalidDate(_)
                | EngineError::InvalidTime(_)
                | EngineError::InvalidSeats(_)
                | EngineError::TableNotFound(_)
                | EngineError::CapacityExceeded { .. }
                | EngineError::DuplicateBooking { .. }
                | EngineError::DuplicateTable(_) => StatusCode::BAD_REQUEST,
            },
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::MalformedPayload(_) => "MalformedPayload",
            ApiError::Engine(e) => e.kind(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::MalformedPayload(rejection.body_text())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("request failed: {self}");
        }
        let body = ErrorBody {
            error: self.kind(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ── Auth extractor ───────────────────────────────────────

/// The verified caller. Missing token → 401, rejected token → 403.
pub struct AuthUser(pub UserId);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(bearer_token);
        let Some(token) = token else {
            warn!(uri = %parts.uri, "request without bearer token");
            return Err(EngineError::Unauthenticated.into());
        };

        match state.verifier.verify(token).await {
            Ok(user) => Ok(AuthUser(user)),
            Err(e) => {
                warn!(uri = %parts.uri, "token rejected: {e}");
                Err(EngineError::InvalidToken(e.to_string()).into())
            }
        }
    }
}

// ── Response bodies ──────────────────────────────────────

#[derive(Debug, Serialize)]
struct Created {
    id: String,
    message: &'static str,
}

#[derive(Debug, Serialize)]
struct Message {
    message: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Updated {
    message: &'static str,
    updated_data: Reservation,
}

// ── Handlers ─────────────────────────────────────────────

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn create_reservation(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    payload: Result<Json<ReservationRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Created>)> {
    let Json(req) = payload?;
    let reservation = state.engine.create_reservation(&user, &req).await?;
    Ok((
        StatusCode::CREATED,
        Json(Created {
            id: reservation.id.to_string(),
            message: "Reservation created",
        }),
    ))
}

async fn list_reservations(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> ApiResult<Json<Vec<Reservation>>> {
    Ok(Json(state.engine.list_reservations(&user).await?))
}

async fn update_reservation(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    payload: Result<Json<ReservationRequest>, JsonRejection>,
) -> ApiResult<Json<Updated>> {
    let Json(req) = payload?;
    let updated = state.engine.update_reservation(&user, &id, &req).await?;
    Ok(Json(Updated {
        message: "Reservation updated",
        updated_data: updated,
    }))
}

async fn delete_reservation(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Message>> {
    state.engine.delete_reservation(&user, &id).await?;
    Ok(Json(Message {
        message: "Reservation deleted",
    }))
}

async fn create_table(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    payload: Result<Json<TableRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Created>)> {
    let Json(req) = payload?;
    let table = state.engine.create_table(&user, &req).await?;
    Ok((
        StatusCode::CREATED,
        Json(Created {
            id: table.id.to_string(),
            message: "Table created",
        }),
    ))
}

async fn list_tables(
    State(state): State<AppState>,
    AuthUser(_user): AuthUser,
) -> ApiResult<Json<Vec<Table>>> {
    Ok(Json(state.engine.list_tables().await?))
}

async fn update_table(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    payload: Result<Json<TableRequest>, JsonRejection>,
) -> ApiResult<Json<Message>> {
    let Json(req) = payload?;
    state.engine.update_table(&user, &id, &req).await?;
    Ok(Json(Message {
        message: "Table updated",
    }))
}

async fn delete_table(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> ApiResult<Json<Message>> {
    state.engine.delete_table(&user, &id).await?;
    Ok(Json(Message {
        message: "Table deleted",
    }))
}

// ── Router ───────────────────────────────────────────────

async fn track_metrics(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());
    let method = req.method().to_string();

    let response = next.run(req).await;

    let status = response.status().as_u16().to_string();
    metrics::counter!(REQUESTS_TOTAL, "method" => method.clone(), "route" => route.clone(), "status" => status)
        .increment(1);
    metrics::histogram!(REQUEST_DURATION_SECONDS, "method" => method, "route" => route)
        .record(start.elapsed().as_secs_f64());
    response
}

/// Build the application router. At most `max_in_flight` requests are
/// processed at once; the rest wait.
pub fn router(state: AppState, max_in_flight: usize) -> Router {
    Router::new()
        .route("/reservations", get(list_reservations).post(create_reservation))
        .route("/reservations/{id}", put(update_reservation).delete(delete_reservation))
        .route("/tables", get(list_tables).post(create_table))
        .route("/tables/{id}", put(update_table).delete(delete_table))
        .route("/health", get(health))
        .route_layer(middleware::from_fn(track_metrics))
        .layer(TraceLayer::new_for_http())
        .layer(ConcurrencyLimitLayer::new(max_in_flight))
        .with_state(state)
}
