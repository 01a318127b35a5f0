use std::sync::Arc;

use axum::{
    extract::{FromRequestParts, Path, State},
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use super::clock::Clock;
use super::domain::{ApplicantId, Caller, Role};
use super::engine::{ErrorKind, ReviewEngine, ReviewError};
use super::ledger::{ReviewStore, StoreError};
use super::payload::{ReferralPayload, ReviewPayload};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// Router exposing the reviewer workflow and the consensus dashboard.
pub fn review_router<S, C>(engine: Arc<ReviewEngine<S, C>>) -> Router
where
    S: ReviewStore + 'static,
    C: Clock + 'static,
{
    Router::new()
        .route("/api/v1/assignments/next", post(next_handler::<S, C>))
        .route("/api/v1/reviews", get(list_handler::<S, C>))
        .route(
            "/api/v1/reviews/:applicant_id",
            get(review_handler::<S, C>).put(save_handler::<S, C>),
        )
        .route(
            "/api/v1/reviews/:applicant_id/referral",
            post(referral_handler::<S, C>),
        )
        .route(
            "/api/v1/dashboard/review-counts",
            get(counts_handler::<S, C>),
        )
        .route(
            "/api/v1/dashboard/application-stats",
            get(stats_handler::<S, C>),
        )
        .route(
            "/api/v1/dashboard/consensus",
            get(consensus_handler::<S, C>),
        )
        .with_state(engine)
}

#[axum::async_trait]
impl<T> FromRequestParts<T> for Caller
where
    T: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &T) -> Result<Self, Self::Rejection> {
        caller_from_headers(&parts.headers).ok_or_else(|| error_response(&ReviewError::Unauthorized))
    }
}

fn caller_from_headers(headers: &HeaderMap) -> Option<Caller> {
    let user_id = headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())?;
    let role = headers
        .get(USER_ROLE_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(Role::parse)
        .unwrap_or(Role::Hacker);

    Some(Caller {
        user_id: user_id.to_string(),
        role,
    })
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Invalid => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn error_response(err: &ReviewError) -> Response {
    let kind = err.kind();
    let payload = json!({
        "error": kind.label(),
        "message": err.to_string(),
    });
    (status_for(kind), Json(payload)).into_response()
}

/// Ledger calls block on the store, so they run off the async workers.
async fn blocking<T, F>(work: F) -> Result<T, ReviewError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ReviewError> + Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(|err| {
        ReviewError::Store(StoreError::Unavailable(format!(
            "review task aborted: {err}"
        )))
    })?
}

fn respond<T: serde::Serialize>(result: Result<T, ReviewError>) -> Response {
    match result {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(err) => error_response(&err),
    }
}

fn acknowledge(result: Result<(), ReviewError>) -> Response {
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(&err),
    }
}

pub(crate) async fn next_handler<S, C>(
    State(engine): State<Arc<ReviewEngine<S, C>>>,
    caller: Caller,
) -> Response
where
    S: ReviewStore + 'static,
    C: Clock + 'static,
{
    respond(blocking(move || engine.next_assignment(&caller)).await)
}

pub(crate) async fn save_handler<S, C>(
    State(engine): State<Arc<ReviewEngine<S, C>>>,
    caller: Caller,
    Path(applicant_id): Path<String>,
    Json(payload): Json<ReviewPayload>,
) -> Response
where
    S: ReviewStore + 'static,
    C: Clock + 'static,
{
    let applicant = ApplicantId(applicant_id);
    acknowledge(blocking(move || engine.save_review(&caller, &applicant, payload)).await)
}

pub(crate) async fn review_handler<S, C>(
    State(engine): State<Arc<ReviewEngine<S, C>>>,
    caller: Caller,
    Path(applicant_id): Path<String>,
) -> Response
where
    S: ReviewStore + 'static,
    C: Clock + 'static,
{
    let applicant = ApplicantId(applicant_id);
    respond(blocking(move || engine.review(&caller, &applicant)).await)
}

pub(crate) async fn referral_handler<S, C>(
    State(engine): State<Arc<ReviewEngine<S, C>>>,
    caller: Caller,
    Path(applicant_id): Path<String>,
    payload: Option<Json<ReferralPayload>>,
) -> Response
where
    S: ReviewStore + 'static,
    C: Clock + 'static,
{
    let applicant = ApplicantId(applicant_id);
    let payload = payload.map(|Json(body)| body).unwrap_or_default();
    acknowledge(blocking(move || engine.refer_applicant(&caller, &applicant, payload)).await)
}

pub(crate) async fn list_handler<S, C>(
    State(engine): State<Arc<ReviewEngine<S, C>>>,
    caller: Caller,
) -> Response
where
    S: ReviewStore + 'static,
    C: Clock + 'static,
{
    respond(blocking(move || engine.reviews_by_reviewer(&caller)).await)
}

pub(crate) async fn counts_handler<S, C>(
    State(engine): State<Arc<ReviewEngine<S, C>>>,
    caller: Caller,
) -> Response
where
    S: ReviewStore + 'static,
    C: Clock + 'static,
{
    respond(blocking(move || engine.review_counts(&caller)).await)
}

pub(crate) async fn stats_handler<S, C>(
    State(engine): State<Arc<ReviewEngine<S, C>>>,
    caller: Caller,
) -> Response
where
    S: ReviewStore + 'static,
    C: Clock + 'static,
{
    respond(blocking(move || engine.application_stats(&caller)).await)
}

pub(crate) async fn consensus_handler<S, C>(
    State(engine): State<Arc<ReviewEngine<S, C>>>,
    caller: Caller,
) -> Response
where
    S: ReviewStore + 'static,
    C: Clock + 'static,
{
    respond(blocking(move || engine.consensus(&caller)).await)
}
