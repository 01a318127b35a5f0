//! Returns abandoned and finished leases to the queue.
//!
//! Each application is handled in its own transaction with its row locked. The scan that
//! finds candidates takes no locks, so every decision is re-checked under the row lock.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use super::domain::{ApplicantId, ApplicationStatus, ReviewPolicy, ReviewerId};
use super::ledger::{LedgerTx, ReviewStore, StoreError};

/// A stale lease removed by the sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReclaimedLease {
    pub applicant_id: ApplicantId,
    pub reviewer_id: ReviewerId,
    pub last_touched: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Stale leases deleted; their applications were requeued at "now".
    pub reclaimed: Vec<ReclaimedLease>,
    /// Applications whose lease finished and that went back to `PENDING_REVIEW` in place.
    pub settled: Vec<ApplicantId>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.reclaimed.is_empty() && self.settled.is_empty()
    }
}

/// Reclaim stale leases, then settle in-review applications that no longer have a lease.
pub fn sweep<S: ReviewStore>(
    store: &S,
    policy: &ReviewPolicy,
    now: DateTime<Utc>,
) -> Result<SweepReport, StoreError> {
    let cutoff = policy.lease_cutoff(now);
    let mut report = SweepReport::default();

    let candidates: BTreeSet<ApplicantId> = store
        .transaction(|tx| tx.stale_leases(cutoff))?
        .into_iter()
        .map(|lease| lease.applicant_id)
        .collect();

    for applicant in candidates {
        let reclaimed = store.transaction(|tx| reclaim_application(tx, &applicant, cutoff, now))?;
        for lease in &reclaimed {
            info!(
                applicant_id = %lease.applicant_id,
                reviewer_id = %lease.reviewer_id,
                last_touched = %lease.last_touched,
                "reclaimed stale review lease"
            );
        }
        report.reclaimed.extend(reclaimed);
    }

    for applicant in store.transaction(|tx| tx.unleased_in_review())? {
        if store.transaction(|tx| settle_application(tx, &applicant))? {
            debug!(applicant_id = %applicant, "lease finished, application back in queue");
            report.settled.push(applicant);
        }
    }

    Ok(report)
}

fn reclaim_application(
    tx: &mut dyn LedgerTx,
    applicant: &ApplicantId,
    cutoff: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<Vec<ReclaimedLease>, StoreError> {
    let Some(application) = tx.lock_application(applicant)? else {
        return Ok(Vec::new());
    };
    if application.status != ApplicationStatus::InReview {
        return Ok(Vec::new());
    }

    let rows = tx.reviews_for_applicant(applicant)?;
    let mut reclaimed = Vec::new();
    for review in rows.iter().filter(|review| review.is_stale_lease(cutoff)) {
        if tx.delete_stale_lease(&review.applicant_id, &review.reviewer_id, cutoff)? {
            reclaimed.push(ReclaimedLease {
                applicant_id: review.applicant_id.clone(),
                reviewer_id: review.reviewer_id.clone(),
                last_touched: review.updated_at,
            });
        }
    }

    // renewed between the candidate scan and the lock
    if reclaimed.is_empty() {
        return Ok(reclaimed);
    }

    let still_leased = rows.iter().any(|review| review.is_active_lease(cutoff));
    if !still_leased {
        tx.set_status(applicant, ApplicationStatus::PendingReview, Some(now))?;
    }

    Ok(reclaimed)
}

fn settle_application(tx: &mut dyn LedgerTx, applicant: &ApplicantId) -> Result<bool, StoreError> {
    let Some(application) = tx.lock_application(applicant)? else {
        return Ok(false);
    };
    if application.status != ApplicationStatus::InReview {
        return Ok(false);
    }

    let leased = tx
        .reviews_for_applicant(applicant)?
        .iter()
        .any(|review| review.is_lease());
    if leased {
        return Ok(false);
    }

    // keep updated_at so the application returns to its original queue position
    tx.set_status(applicant, ApplicationStatus::PendingReview, None)?;
    Ok(true)
}
