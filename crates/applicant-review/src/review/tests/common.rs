use std::sync::Arc;

use axum::response::Response;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value;

use crate::review::clock::{Clock, ManualClock};
use crate::review::domain::{
    ApplicantId, Application, ApplicationStatus, Caller, Review, ReviewPolicy, ReviewerId, Role,
};
use crate::review::engine::ReviewEngine;
use crate::review::ledger::{LedgerTx, ReviewStore, StoreError};
use crate::review::memory::MemoryStore;
use crate::review::payload::ReviewPayload;

pub(super) type TestEngine = ReviewEngine<MemoryStore, ManualClock>;

/// Submission time of the oldest seeded application.
pub(super) fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 11, 1, 9, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn applicant(id: &str) -> ApplicantId {
    ApplicantId(id.to_string())
}

pub(super) fn reviewer(id: &str) -> ReviewerId {
    ReviewerId(id.to_string())
}

pub(super) fn organizer(id: &str) -> Caller {
    Caller::organizer(id)
}

pub(super) fn hacker(id: &str) -> Caller {
    Caller {
        user_id: id.to_string(),
        role: Role::Hacker,
    }
}

/// Pending applications submitted one second apart, oldest first.
pub(super) fn queue(ids: &[&str]) -> Vec<Application> {
    ids.iter()
        .enumerate()
        .map(|(offset, id)| Application::pending(applicant(id), t0() + Duration::seconds(offset as i64)))
        .collect()
}

pub(super) struct Harness {
    pub(super) engine: Arc<TestEngine>,
    pub(super) store: Arc<MemoryStore>,
    pub(super) clock: Arc<ManualClock>,
}

impl Harness {
    pub(super) fn new(applications: Vec<Application>) -> Self {
        Self::with_policy(applications, ReviewPolicy::default())
    }

    pub(super) fn with_policy(applications: Vec<Application>, policy: ReviewPolicy) -> Self {
        let store = Arc::new(MemoryStore::with_applications(applications));
        let clock = Arc::new(ManualClock::new(t0() + Duration::minutes(10)));
        let engine = Arc::new(ReviewEngine::new(store.clone(), clock.clone(), policy));
        Self {
            engine,
            store,
            clock,
        }
    }

    pub(super) fn application(&self, id: &str) -> Application {
        self.store
            .transaction(|tx| tx.find_application(&applicant(id)))
            .expect("store readable")
            .expect("application seeded")
    }

    pub(super) fn status(&self, id: &str) -> ApplicationStatus {
        self.application(id).status
    }

    pub(super) fn rows(&self, id: &str) -> Vec<Review> {
        self.store
            .transaction(|tx| tx.reviews_for_applicant(&applicant(id)))
            .expect("store readable")
    }

    /// Rows on `id` that still hold a lease at the current clock.
    pub(super) fn active_leases(&self, id: &str) -> usize {
        let cutoff = self.engine.policy().lease_cutoff(self.clock.now());
        self.rows(id)
            .iter()
            .filter(|review| review.is_active_lease(cutoff))
            .count()
    }

    pub(super) fn lease_for(&self, caller: &Caller) -> String {
        self.engine
            .next_assignment(caller)
            .expect("assignment available")
            .application
            .id
            .0
    }
}

pub(super) fn complete_payload() -> ReviewPayload {
    ReviewPayload {
        originality_rating: Some(8),
        technicality_rating: Some(6),
        passion_rating: Some(9),
        comments: Some("strong project history".to_string()),
    }
}

pub(super) fn draft_payload() -> ReviewPayload {
    ReviewPayload {
        originality_rating: Some(7),
        technicality_rating: None,
        passion_rating: None,
        comments: None,
    }
}

/// Every transaction loses a race.
pub(super) struct ConflictStore;

impl ReviewStore for ConflictStore {
    fn transaction<T, F>(&self, _work: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut dyn LedgerTx) -> Result<T, StoreError>,
    {
        Err(StoreError::Conflict(
            "could not serialize access due to concurrent update".to_string(),
        ))
    }
}

pub(super) struct UnavailableStore;

impl ReviewStore for UnavailableStore {
    fn transaction<T, F>(&self, _work: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut dyn LedgerTx) -> Result<T, StoreError>,
    {
        Err(StoreError::Unavailable("database offline".to_string()))
    }
}

pub(super) fn engine_over<S: ReviewStore + 'static>(store: S) -> Arc<ReviewEngine<S, ManualClock>> {
    Arc::new(ReviewEngine::new(
        Arc::new(store),
        Arc::new(ManualClock::new(t0())),
        ReviewPolicy::default(),
    ))
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
