use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::clock::Clock;
use super::domain::{
    ApplicantId, Application, Assignment, Caller, Review, ReviewPolicy, ReviewerId, Role,
};
use super::ledger::{ReviewStore, StoreError};
use super::payload::{PayloadError, ReferralPayload, ReviewPayload, ReviewSubmission};
use super::read_model::{ConsensusReadModel, ConsensusRow, ReviewerCount, StatusCount};
use super::reclaimer::{self, SweepReport};
use super::selector::{self, Selection};

/// Message returned when the queue has nothing for the caller.
pub const EMPTY_QUEUE_MESSAGE: &str = "no applications are waiting for review";

/// Entry point for every review operation: authorization, the reclaim pass, lease selection,
/// submissions and referrals. Holds no state beyond its handles; all exclusivity comes from
/// the store's transactions.
pub struct ReviewEngine<S, C> {
    store: Arc<S>,
    clock: Arc<C>,
    policy: ReviewPolicy,
    read_model: ConsensusReadModel<S>,
}

impl<S, C> ReviewEngine<S, C>
where
    S: ReviewStore + 'static,
    C: Clock + 'static,
{
    pub fn new(store: Arc<S>, clock: Arc<C>, policy: ReviewPolicy) -> Self {
        let read_model = ConsensusReadModel::new(Arc::clone(&store), policy.required_reviews);
        Self {
            store,
            clock,
            policy,
            read_model,
        }
    }

    pub fn policy(&self) -> &ReviewPolicy {
        &self.policy
    }

    pub fn read_model(&self) -> &ConsensusReadModel<S> {
        &self.read_model
    }

    /// Return the caller's active lease, or lease the oldest eligible application.
    ///
    /// Stale leases are reclaimed first, so an application abandoned by another reviewer can
    /// be handed out by this very call.
    pub fn next_assignment(&self, caller: &Caller) -> Result<Assignment, ReviewError> {
        let reviewer = authorize(caller)?;
        let now = self.clock.now();

        reclaimer::sweep(self.store.as_ref(), &self.policy, now)
            .map_err(store_failure("reclaim leases"))?;

        let selection = self
            .store
            .transaction(|tx| selector::resume_or_lease(tx, &reviewer, &self.policy, now))
            .map_err(store_failure("select next application"))?;

        match selection {
            Some(Selection::Resumed(assignment)) => {
                debug!(
                    reviewer_id = %reviewer,
                    applicant_id = %assignment.application.id,
                    "resumed active lease"
                );
                Ok(assignment)
            }
            Some(Selection::Granted(assignment)) => {
                info!(
                    reviewer_id = %reviewer,
                    applicant_id = %assignment.application.id,
                    "granted review lease"
                );
                Ok(assignment)
            }
            None => {
                debug!(reviewer_id = %reviewer, "review queue empty");
                Err(ReviewError::NotFound(EMPTY_QUEUE_MESSAGE.to_string()))
            }
        }
    }

    /// Autosave or complete the caller's review of `applicant`.
    ///
    /// Leaves the application status alone; the next reclaim pass settles it. A draft only
    /// lands on the caller's own open lease (or referral); starting or reopening one without
    /// an assignment is a conflict.
    pub fn save_review(
        &self,
        caller: &Caller,
        applicant: &ApplicantId,
        payload: ReviewPayload,
    ) -> Result<(), ReviewError> {
        let reviewer = authorize(caller)?;
        let submission = ReviewSubmission::classify(payload)?;
        let complete = submission.is_complete();
        let now = self.clock.now();

        let outcome = self
            .store
            .transaction(|tx| {
                require_application(tx.lock_application(applicant)?, applicant)?;
                let existing = tx.find_review(applicant, &reviewer)?;

                let open = existing
                    .as_ref()
                    .is_some_and(|row| row.is_lease() || row.referral);
                if matches!(submission, ReviewSubmission::Draft(_)) && !open {
                    return Ok(SaveOutcome::NoLease);
                }

                match submission.into_review(existing.clone(), applicant, &reviewer, now) {
                    Some(review) => {
                        tx.upsert_review(&review)?;
                    }
                    // a referral stays on file even when its notes are cleared
                    None if existing.as_ref().is_some_and(|row| row.referral) => {}
                    None => {
                        tx.delete_review(applicant, &reviewer)?;
                    }
                }
                Ok(SaveOutcome::Saved)
            })
            .map_err(store_failure("save review"))?;

        if outcome == SaveOutcome::NoLease {
            debug!(reviewer_id = %reviewer, applicant_id = %applicant, "draft refused without a lease");
            return Err(ReviewError::Conflict(format!(
                "reviewer {reviewer} holds no open review of application {applicant}; \
                 request an assignment before saving a draft"
            )));
        }

        debug!(
            reviewer_id = %reviewer,
            applicant_id = %applicant,
            completed = complete,
            "review saved"
        );
        Ok(())
    }

    /// Refer `applicant` out of the blind-review queue for good.
    pub fn refer_applicant(
        &self,
        caller: &Caller,
        applicant: &ApplicantId,
        payload: ReferralPayload,
    ) -> Result<(), ReviewError> {
        let reviewer = authorize(caller)?;
        let comments = payload.into_comments();
        let now = self.clock.now();

        self.store
            .transaction(|tx| {
                require_application(tx.lock_application(applicant)?, applicant)?;

                match tx.find_review(applicant, &reviewer)? {
                    Some(mut row) => {
                        row.referral = true;
                        row.completed = true;
                        if comments.is_some() {
                            row.comments = comments;
                        }
                        row.updated_at = now;
                        tx.upsert_review(&row)?;
                    }
                    None => {
                        let mut row = Review::lease(applicant.clone(), reviewer.clone(), now);
                        row.referral = true;
                        row.completed = true;
                        row.comments = comments;
                        tx.insert_review(&row)?;
                    }
                }
                Ok(())
            })
            .map_err(store_failure("refer applicant"))?;

        info!(reviewer_id = %reviewer, applicant_id = %applicant, "applicant referred");
        Ok(())
    }

    /// The caller's stored review of `applicant`, or an unsaved blank one.
    pub fn review(&self, caller: &Caller, applicant: &ApplicantId) -> Result<Review, ReviewError> {
        let reviewer = authorize(caller)?;
        let now = self.clock.now();

        let review = self
            .store
            .transaction(|tx| {
                require_application(tx.find_application(applicant)?, applicant)?;
                tx.find_review(applicant, &reviewer)
            })
            .map_err(store_failure("load review"))?;

        Ok(review.unwrap_or_else(|| Review::lease(applicant.clone(), reviewer, now)))
    }

    pub fn reviews_by_reviewer(&self, caller: &Caller) -> Result<Vec<Review>, ReviewError> {
        let reviewer = authorize(caller)?;
        self.read_model
            .reviews_by_reviewer(&reviewer)
            .map_err(store_failure("list reviews"))
    }

    pub fn review_counts(&self, caller: &Caller) -> Result<Vec<ReviewerCount>, ReviewError> {
        authorize(caller)?;
        self.read_model
            .review_counts()
            .map_err(store_failure("count reviews"))
    }

    pub fn application_stats(&self, caller: &Caller) -> Result<Vec<StatusCount>, ReviewError> {
        authorize(caller)?;
        self.read_model
            .application_stats()
            .map_err(store_failure("application stats"))
    }

    pub fn consensus(&self, caller: &Caller) -> Result<Vec<ConsensusRow>, ReviewError> {
        authorize(caller)?;
        self.read_model
            .consensus()
            .map_err(store_failure("consensus summary"))
    }

    /// One reclaim pass outside of a selection request.
    pub fn sweep(&self) -> Result<SweepReport, ReviewError> {
        let report = reclaimer::sweep(self.store.as_ref(), &self.policy, self.clock.now())
            .map_err(store_failure("sweep"))?;
        if !report.is_empty() {
            info!(
                reclaimed = report.reclaimed.len(),
                settled = report.settled.len(),
                "sweep finished"
            );
        }
        Ok(report)
    }

    /// Record a submitted application. Used by seeding and the application store's owners.
    pub fn insert_application(&self, application: Application) -> Result<(), ReviewError> {
        self.store
            .transaction(|tx| tx.insert_application(&application))
            .map_err(store_failure("insert application"))
    }

    pub fn fetch_application(&self, applicant: &ApplicantId) -> Result<Application, ReviewError> {
        self.store
            .transaction(|tx| require_application(tx.find_application(applicant)?, applicant))
            .map_err(store_failure("fetch application"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SaveOutcome {
    Saved,
    NoLease,
}

fn authorize(caller: &Caller) -> Result<ReviewerId, ReviewError> {
    if caller.user_id.trim().is_empty() {
        return Err(ReviewError::Unauthorized);
    }
    if caller.role != Role::Organizer {
        return Err(ReviewError::Forbidden(format!(
            "user {} is not an organizer",
            caller.user_id
        )));
    }
    Ok(caller.reviewer_id())
}

fn require_application(
    found: Option<Application>,
    applicant: &ApplicantId,
) -> Result<Application, StoreError> {
    found.ok_or_else(|| StoreError::NotFound(format!("application {applicant}")))
}

fn store_failure(operation: &'static str) -> impl Fn(StoreError) -> ReviewError {
    move |err| {
        match &err {
            StoreError::NotFound(_) => {}
            StoreError::Conflict(detail) => warn!(operation, detail = %detail, "transaction lost a race"),
            StoreError::Unavailable(_) | StoreError::Corrupt(_) => {
                error!(operation, error = %err, "review store failure")
            }
        }
        ReviewError::from(err)
    }
}

/// Error kinds surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    Invalid,
    Internal,
}

impl ErrorKind {
    pub const fn label(self) -> &'static str {
        match self {
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Invalid => "invalid",
            ErrorKind::Internal => "internal",
        }
    }
}

/// Error raised by the review engine.
#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    #[error("caller identity missing")]
    Unauthorized,
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    InvalidPayload(#[from] PayloadError),
    #[error(transparent)]
    Store(StoreError),
}

impl ReviewError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReviewError::Unauthorized => ErrorKind::Unauthorized,
            ReviewError::Forbidden(_) => ErrorKind::Forbidden,
            ReviewError::NotFound(_) => ErrorKind::NotFound,
            ReviewError::Conflict(_) => ErrorKind::Conflict,
            ReviewError::InvalidPayload(_) => ErrorKind::Invalid,
            ReviewError::Store(_) => ErrorKind::Internal,
        }
    }
}

impl From<StoreError> for ReviewError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => ReviewError::NotFound(format!("{what} not found")),
            StoreError::Conflict(detail) => ReviewError::Conflict(detail),
            other => ReviewError::Store(other),
        }
    }
}
