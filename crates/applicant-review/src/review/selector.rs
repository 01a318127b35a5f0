//! Chooses the next application for a reviewer and grants the lease.

use chrono::{DateTime, Utc};

use super::domain::{
    Application, ApplicationStatus, Assignment, Review, ReviewPolicy, ReviewerId,
};
use super::ledger::{LedgerTx, StoreError};

/// Outcome of one selection transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// The reviewer already held an active lease; nothing was written.
    Resumed(Assignment),
    /// A new lease row was inserted and the application moved to `IN_REVIEW`.
    Granted(Assignment),
}

impl Selection {
    pub fn into_assignment(self) -> Assignment {
        match self {
            Selection::Resumed(assignment) | Selection::Granted(assignment) => assignment,
        }
    }
}

/// Queue predicate: is `application` leasable by `reviewer` given every ledger row that
/// references it? Leases touched before `lease_cutoff` are stale and no longer hold the slot.
pub fn admits(
    application: &Application,
    reviews: &[Review],
    reviewer: &ReviewerId,
    required_reviews: u32,
    lease_cutoff: DateTime<Utc>,
) -> bool {
    if application.status != ApplicationStatus::PendingReview {
        return false;
    }
    if reviews.iter().any(|review| review.referral) {
        return false;
    }
    if reviews.iter().any(|review| &review.reviewer_id == reviewer) {
        return false;
    }
    if reviews.iter().any(|review| review.is_active_lease(lease_cutoff)) {
        return false;
    }
    completed_reviews(reviews) < required_reviews as usize
}

pub fn completed_reviews(reviews: &[Review]) -> usize {
    reviews
        .iter()
        .filter(|review| review.counts_toward_quorum())
        .count()
}

/// Resume the reviewer's active lease, or lease the oldest eligible application.
///
/// Must run inside one store transaction: the eligible row is locked, the lease row inserted
/// and the status flipped before commit. Returns `Ok(None)` when the queue is empty.
pub(crate) fn resume_or_lease(
    tx: &mut dyn LedgerTx,
    reviewer: &ReviewerId,
    policy: &ReviewPolicy,
    now: DateTime<Utc>,
) -> Result<Option<Selection>, StoreError> {
    tx.lock_reviewer(reviewer)?;

    let cutoff = policy.lease_cutoff(now);
    if let Some(assignment) = current_assignment(tx, reviewer, cutoff)? {
        return Ok(Some(Selection::Resumed(assignment)));
    }

    let Some(mut application) = tx.lock_next_eligible(reviewer, policy.required_reviews, cutoff)?
    else {
        return Ok(None);
    };

    let review = Review::lease(application.id.clone(), reviewer.clone(), now);
    tx.insert_review(&review)?;
    tx.set_status(&application.id, ApplicationStatus::InReview, None)?;
    application.status = ApplicationStatus::InReview;

    Ok(Some(Selection::Granted(Assignment {
        review,
        application,
    })))
}

fn current_assignment(
    tx: &mut dyn LedgerTx,
    reviewer: &ReviewerId,
    cutoff: DateTime<Utc>,
) -> Result<Option<Assignment>, StoreError> {
    for review in tx.active_leases_held_by(reviewer, cutoff)? {
        let Some(application) = tx.find_application(&review.applicant_id)? else {
            continue;
        };
        // only leases this selector granted are resumed
        if application.status == ApplicationStatus::InReview {
            return Ok(Some(Assignment {
                review,
                application,
            }));
        }
    }

    Ok(None)
}
