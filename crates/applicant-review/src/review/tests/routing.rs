use super::common::*;
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, Request, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use crate::review::router::{self, review_router, USER_ID_HEADER, USER_ROLE_HEADER};

fn as_organizer(builder: axum::http::request::Builder, id: &str) -> axum::http::request::Builder {
    builder
        .header(USER_ID_HEADER, id)
        .header(USER_ROLE_HEADER, "organizer")
}

#[tokio::test]
async fn next_route_leases_the_oldest_application() {
    let harness = Harness::new(queue(&["a1", "a2"]));
    let router = review_router(harness.engine.clone());

    let response = router
        .oneshot(
            as_organizer(Request::post("/api/v1/assignments/next"), "x")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["application"]["id"], "a1");
    assert_eq!(payload["application"]["status"], "IN_REVIEW");
    assert_eq!(payload["review"]["reviewer_id"], "x");
    assert_eq!(payload["review"]["completed"], false);
}

#[tokio::test]
async fn missing_identity_is_unauthorized() {
    let harness = Harness::new(queue(&["a1"]));
    let router = review_router(harness.engine.clone());

    let response = router
        .oneshot(
            Request::post("/api/v1/assignments/next")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let payload = read_json_body(response).await;
    assert_eq!(payload["error"], "unauthorized");
}

#[tokio::test]
async fn hacker_role_is_forbidden() {
    let harness = Harness::new(queue(&["a1"]));
    let router = review_router(harness.engine.clone());

    let response = router
        .oneshot(
            Request::post("/api/v1/assignments/next")
                .header(USER_ID_HEADER, "h")
                .header(USER_ROLE_HEADER, "hacker")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn empty_queue_is_a_not_found_with_wait_message() {
    let harness = Harness::new(Vec::new());

    let response = router::next_handler(State(harness.engine.clone()), organizer("x")).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let payload = read_json_body(response).await;
    assert_eq!(
        payload,
        json!({
            "error": "not_found",
            "message": "no applications are waiting for review",
        })
    );
}

#[tokio::test]
async fn save_then_read_review_round_trips_through_routes() {
    let harness = Harness::new(queue(&["a1"]));
    harness.lease_for(&organizer("x"));

    let save = review_router(harness.engine.clone())
        .oneshot(
            as_organizer(Request::put("/api/v1/reviews/a1"), "x")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::to_vec(&complete_payload()).expect("payload json"),
                ))
                .expect("request"),
        )
        .await
        .expect("route executes");
    assert_eq!(save.status(), StatusCode::NO_CONTENT);

    let read = review_router(harness.engine.clone())
        .oneshot(
            as_organizer(Request::get("/api/v1/reviews/a1"), "x")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("route executes");
    assert_eq!(read.status(), StatusCode::OK);
    let payload = read_json_body(read).await;
    assert_eq!(payload["completed"], true);
    assert_eq!(payload["originality_rating"], 8);
}

#[tokio::test]
async fn invalid_rating_is_unprocessable() {
    let harness = Harness::new(queue(&["a1"]));

    let response = review_router(harness.engine.clone())
        .oneshot(
            as_organizer(Request::put("/api/v1/reviews/a1"), "x")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({ "originality_rating": 11 }).to_string(),
                ))
                .expect("request"),
        )
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let payload = read_json_body(response).await;
    assert_eq!(payload["error"], "invalid");
}

#[tokio::test]
async fn referral_route_accepts_an_empty_body() {
    let harness = Harness::new(queue(&["a1"]));

    let response = review_router(harness.engine.clone())
        .oneshot(
            as_organizer(Request::post("/api/v1/reviews/a1/referral"), "x")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(harness.rows("a1")[0].referral);
}

#[tokio::test]
async fn dashboard_routes_serve_the_read_model() {
    let harness = Harness::new(queue(&["a1", "a2"]));
    harness.lease_for(&organizer("x"));

    for uri in [
        "/api/v1/dashboard/review-counts",
        "/api/v1/dashboard/application-stats",
        "/api/v1/dashboard/consensus",
        "/api/v1/reviews",
    ] {
        let response = review_router(harness.engine.clone())
            .oneshot(
                as_organizer(Request::get(uri), "x")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("route executes");
        assert_eq!(response.status(), StatusCode::OK, "{uri}");
        assert!(read_json_body(response).await.is_array(), "{uri}");
    }
}

#[tokio::test]
async fn store_conflict_maps_to_409() {
    let response = router::next_handler(State(engine_over(ConflictStore)), organizer("x")).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn store_outage_maps_to_500() {
    let response = router::next_handler(State(engine_over(UnavailableStore)), organizer("x")).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let payload = read_json_body(response).await;
    assert_eq!(payload["error"], "internal");
}
