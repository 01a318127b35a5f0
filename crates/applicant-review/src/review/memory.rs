use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use super::domain::{ApplicantId, Application, ApplicationStatus, Review, ReviewerId};
use super::ledger::{LedgerTx, ReviewStore, StoreError};
use super::selector;

#[derive(Debug, Clone, Default)]
struct LedgerState {
    applications: BTreeMap<ApplicantId, Application>,
    reviews: BTreeMap<(ApplicantId, ReviewerId), Review>,
}

/// In-process ledger. Transactions are serialized by one mutex and applied to a working copy
/// that replaces the committed state only when the closure succeeds.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<LedgerState>>,
}

impl MemoryStore {
    pub fn with_applications(applications: impl IntoIterator<Item = Application>) -> Self {
        let store = Self::default();
        if let Ok(mut guard) = store.state.lock() {
            for application in applications {
                guard
                    .applications
                    .insert(application.id.clone(), application);
            }
        }
        store
    }
}

impl ReviewStore for MemoryStore {
    fn transaction<T, F>(&self, work: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut dyn LedgerTx) -> Result<T, StoreError>,
    {
        let mut committed = self
            .state
            .lock()
            .map_err(|_| StoreError::Unavailable("ledger mutex poisoned".to_string()))?;

        let mut working = committed.clone();
        let mut tx = MemoryTx {
            state: &mut working,
        };
        let output = work(&mut tx as &mut dyn LedgerTx)?;
        *committed = working;
        Ok(output)
    }
}

struct MemoryTx<'a> {
    state: &'a mut LedgerState,
}

impl MemoryTx<'_> {
    fn rows_for(&self, applicant: &ApplicantId) -> Vec<Review> {
        self.state
            .reviews
            .values()
            .filter(|review| &review.applicant_id == applicant)
            .cloned()
            .collect()
    }
}

impl LedgerTx for MemoryTx<'_> {
    fn insert_application(&mut self, application: &Application) -> Result<(), StoreError> {
        if self.state.applications.contains_key(&application.id) {
            return Err(StoreError::Conflict(format!(
                "application {} already exists",
                application.id
            )));
        }
        self.state
            .applications
            .insert(application.id.clone(), application.clone());
        Ok(())
    }

    fn find_application(&mut self, id: &ApplicantId) -> Result<Option<Application>, StoreError> {
        Ok(self.state.applications.get(id).cloned())
    }

    fn lock_application(&mut self, id: &ApplicantId) -> Result<Option<Application>, StoreError> {
        self.find_application(id)
    }

    fn set_status(
        &mut self,
        id: &ApplicantId,
        status: ApplicationStatus,
        touched_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let application = self
            .state
            .applications
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("application {id}")))?;
        application.status = status;
        if let Some(at) = touched_at {
            application.updated_at = at;
        }
        Ok(())
    }

    fn lock_reviewer(&mut self, _reviewer: &ReviewerId) -> Result<(), StoreError> {
        Ok(())
    }

    fn lock_next_eligible(
        &mut self,
        reviewer: &ReviewerId,
        required_reviews: u32,
        lease_cutoff: DateTime<Utc>,
    ) -> Result<Option<Application>, StoreError> {
        let mut candidates: Vec<&Application> = self
            .state
            .applications
            .values()
            .filter(|application| application.status == ApplicationStatus::PendingReview)
            .collect();
        candidates.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then_with(|| a.id.cmp(&b.id)));

        Ok(candidates
            .into_iter()
            .find(|application| {
                let rows = self.rows_for(&application.id);
                selector::admits(application, &rows, reviewer, required_reviews, lease_cutoff)
            })
            .cloned())
    }

    fn find_review(
        &mut self,
        applicant: &ApplicantId,
        reviewer: &ReviewerId,
    ) -> Result<Option<Review>, StoreError> {
        Ok(self
            .state
            .reviews
            .get(&(applicant.clone(), reviewer.clone()))
            .cloned())
    }

    fn active_leases_held_by(
        &mut self,
        reviewer: &ReviewerId,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Review>, StoreError> {
        let mut leases: Vec<Review> = self
            .state
            .reviews
            .values()
            .filter(|review| &review.reviewer_id == reviewer && review.is_active_lease(cutoff))
            .cloned()
            .collect();
        leases.sort_by_key(|review| review.created_at);
        Ok(leases)
    }

    fn insert_review(&mut self, review: &Review) -> Result<(), StoreError> {
        let key = (review.applicant_id.clone(), review.reviewer_id.clone());
        if self.state.reviews.contains_key(&key) {
            return Err(StoreError::Conflict(format!(
                "review for applicant {} by {} already exists",
                review.applicant_id, review.reviewer_id
            )));
        }
        self.state.reviews.insert(key, review.clone());
        Ok(())
    }

    fn upsert_review(&mut self, review: &Review) -> Result<Review, StoreError> {
        let key = (review.applicant_id.clone(), review.reviewer_id.clone());
        let mut stored = review.clone();
        if let Some(previous) = self.state.reviews.get(&key) {
            stored.created_at = previous.created_at;
        }
        self.state.reviews.insert(key, stored.clone());
        Ok(stored)
    }

    fn delete_review(
        &mut self,
        applicant: &ApplicantId,
        reviewer: &ReviewerId,
    ) -> Result<bool, StoreError> {
        Ok(self
            .state
            .reviews
            .remove(&(applicant.clone(), reviewer.clone()))
            .is_some())
    }

    fn delete_stale_lease(
        &mut self,
        applicant: &ApplicantId,
        reviewer: &ReviewerId,
        cutoff: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let key = (applicant.clone(), reviewer.clone());
        let stale = self
            .state
            .reviews
            .get(&key)
            .is_some_and(|review| review.is_stale_lease(cutoff));
        if stale {
            self.state.reviews.remove(&key);
        }
        Ok(stale)
    }

    fn stale_leases(&mut self, cutoff: DateTime<Utc>) -> Result<Vec<Review>, StoreError> {
        let applications = &self.state.applications;
        let mut stale: Vec<Review> = self
            .state
            .reviews
            .values()
            .filter(|review| review.is_stale_lease(cutoff))
            .filter(|review| {
                applications
                    .get(&review.applicant_id)
                    .is_some_and(|application| application.status == ApplicationStatus::InReview)
            })
            .cloned()
            .collect();
        stale.sort_by_key(|review| review.updated_at);
        Ok(stale)
    }

    fn reviews_for_applicant(
        &mut self,
        applicant: &ApplicantId,
    ) -> Result<Vec<Review>, StoreError> {
        Ok(self.rows_for(applicant))
    }

    fn reviews_by_reviewer(&mut self, reviewer: &ReviewerId) -> Result<Vec<Review>, StoreError> {
        let mut rows: Vec<Review> = self
            .state
            .reviews
            .values()
            .filter(|review| &review.reviewer_id == reviewer)
            .cloned()
            .collect();
        rows.sort_by_key(|review| review.created_at);
        Ok(rows)
    }

    fn unleased_in_review(&mut self) -> Result<Vec<ApplicantId>, StoreError> {
        let mut candidates: Vec<&Application> = self
            .state
            .applications
            .values()
            .filter(|application| application.status == ApplicationStatus::InReview)
            .filter(|application| {
                !self
                    .state
                    .reviews
                    .values()
                    .any(|review| review.applicant_id == application.id && review.is_lease())
            })
            .collect();
        candidates.sort_by(|a, b| a.updated_at.cmp(&b.updated_at).then_with(|| a.id.cmp(&b.id)));
        Ok(candidates
            .into_iter()
            .map(|application| application.id.clone())
            .collect())
    }

    fn all_applications(&mut self) -> Result<Vec<Application>, StoreError> {
        Ok(self.state.applications.values().cloned().collect())
    }

    fn all_reviews(&mut self) -> Result<Vec<Review>, StoreError> {
        Ok(self.state.reviews.values().cloned().collect())
    }
}
