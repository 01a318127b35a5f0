use chrono::{DateTime, Utc};

use super::domain::{ApplicantId, Application, ApplicationStatus, Review, ReviewerId};

/// Row-level operations available inside one store transaction.
///
/// Every cross-entity change (lease row plus application status) goes through a single
/// `LedgerTx`, so a failure anywhere rolls the whole unit back.
pub trait LedgerTx {
    fn insert_application(&mut self, application: &Application) -> Result<(), StoreError>;

    fn find_application(&mut self, id: &ApplicantId) -> Result<Option<Application>, StoreError>;

    /// Read an application and hold its row lock until the transaction ends.
    fn lock_application(&mut self, id: &ApplicantId) -> Result<Option<Application>, StoreError>;

    /// Update the status. `touched_at` also moves `updated_at`, which repositions the
    /// application in the FIFO queue.
    fn set_status(
        &mut self,
        id: &ApplicantId,
        status: ApplicationStatus,
        touched_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    /// Serialize selection for one reviewer until the transaction ends.
    fn lock_reviewer(&mut self, reviewer: &ReviewerId) -> Result<(), StoreError>;

    /// Lock and return the oldest application the reviewer may lease: pending review, never
    /// referred, not already touched by this reviewer, with no lease touched at or after
    /// `lease_cutoff`, and still under quorum. Rows locked by concurrent transactions are
    /// skipped.
    fn lock_next_eligible(
        &mut self,
        reviewer: &ReviewerId,
        required_reviews: u32,
        lease_cutoff: DateTime<Utc>,
    ) -> Result<Option<Application>, StoreError>;

    fn find_review(
        &mut self,
        applicant: &ApplicantId,
        reviewer: &ReviewerId,
    ) -> Result<Option<Review>, StoreError>;

    /// Lease rows held by `reviewer` that were touched at or after `cutoff`, oldest first.
    fn active_leases_held_by(
        &mut self,
        reviewer: &ReviewerId,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Review>, StoreError>;

    /// Insert a new row; an existing `(applicant, reviewer)` row is a conflict.
    fn insert_review(&mut self, review: &Review) -> Result<(), StoreError>;

    /// Insert or replace the row for `(applicant, reviewer)`.
    fn upsert_review(&mut self, review: &Review) -> Result<Review, StoreError>;

    fn delete_review(
        &mut self,
        applicant: &ApplicantId,
        reviewer: &ReviewerId,
    ) -> Result<bool, StoreError>;

    /// Delete the row only if it is still a lease last touched before `cutoff`.
    fn delete_stale_lease(
        &mut self,
        applicant: &ApplicantId,
        reviewer: &ReviewerId,
        cutoff: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Lease rows older than `cutoff` whose application is in review.
    fn stale_leases(&mut self, cutoff: DateTime<Utc>) -> Result<Vec<Review>, StoreError>;

    /// Applications in review with no lease row left, oldest first.
    fn unleased_in_review(&mut self) -> Result<Vec<ApplicantId>, StoreError>;

    fn reviews_for_applicant(&mut self, applicant: &ApplicantId)
        -> Result<Vec<Review>, StoreError>;

    fn reviews_by_reviewer(&mut self, reviewer: &ReviewerId) -> Result<Vec<Review>, StoreError>;

    fn all_applications(&mut self) -> Result<Vec<Application>, StoreError>;

    fn all_reviews(&mut self) -> Result<Vec<Review>, StoreError>;
}

/// Shared relational store holding both applications and the review ledger.
pub trait ReviewStore: Send + Sync {
    /// Run `work` atomically. Returning `Err` rolls back every write made through the
    /// transaction handle.
    fn transaction<T, F>(&self, work: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut dyn LedgerTx) -> Result<T, StoreError>;
}

/// Error enumeration for ledger failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("conflicting write: {0}")]
    Conflict(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}
