//! Read-only aggregates over the ledger for dashboards and exports.
//!
//! Nothing here feeds back into selection; the queue predicate in the selector is the only
//! authority on whether an application still needs reviews.

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;

use serde::Serialize;

use super::domain::{ApplicantId, ApplicationStatus, Review, ReviewerId};
use super::ledger::{ReviewStore, StoreError};
use super::selector::completed_reviews;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewerCount {
    pub reviewer_id: ReviewerId,
    pub completed_reviews: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusCount {
    pub status: ApplicationStatus,
    pub count: usize,
}

/// Per-applicant view of the ledger. Means cover completed, non-referral reviews only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsensusRow {
    pub applicant_id: ApplicantId,
    pub status: ApplicationStatus,
    pub completed_reviews: usize,
    pub referred: bool,
    pub quorum_met: bool,
    pub mean_originality: Option<f32>,
    pub mean_technicality: Option<f32>,
    pub mean_passion: Option<f32>,
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("csv encoding failed: {0}")]
    Csv(#[from] csv::Error),
    #[error("export write failed: {0}")]
    Io(#[from] io::Error),
}

pub struct ConsensusReadModel<S> {
    store: Arc<S>,
    required_reviews: u32,
}

impl<S> Clone for ConsensusReadModel<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            required_reviews: self.required_reviews,
        }
    }
}

fn mean(values: impl Iterator<Item = Option<u8>>) -> Option<f32> {
    let (sum, count) = values
        .flatten()
        .fold((0u32, 0u32), |(sum, count), value| (sum + u32::from(value), count + 1));
    if count == 0 {
        None
    } else {
        Some(sum as f32 / count as f32)
    }
}

impl<S: ReviewStore> ConsensusReadModel<S> {
    pub fn new(store: Arc<S>, required_reviews: u32) -> Self {
        Self {
            store,
            required_reviews,
        }
    }

    pub fn reviews_by_reviewer(&self, reviewer: &ReviewerId) -> Result<Vec<Review>, StoreError> {
        self.store.transaction(|tx| tx.reviews_by_reviewer(reviewer))
    }

    /// Completed, non-referral reviews per reviewer, busiest first.
    pub fn review_counts(&self) -> Result<Vec<ReviewerCount>, StoreError> {
        let reviews = self.store.transaction(|tx| tx.all_reviews())?;

        let mut counts: BTreeMap<ReviewerId, usize> = BTreeMap::new();
        for review in reviews.iter().filter(|review| review.counts_toward_quorum()) {
            *counts.entry(review.reviewer_id.clone()).or_default() += 1;
        }

        let mut rows: Vec<ReviewerCount> = counts
            .into_iter()
            .map(|(reviewer_id, completed_reviews)| ReviewerCount {
                reviewer_id,
                completed_reviews,
            })
            .collect();
        rows.sort_by(|a, b| {
            b.completed_reviews
                .cmp(&a.completed_reviews)
                .then_with(|| a.reviewer_id.cmp(&b.reviewer_id))
        });
        Ok(rows)
    }

    pub fn application_stats(&self) -> Result<Vec<StatusCount>, StoreError> {
        let applications = self.store.transaction(|tx| tx.all_applications())?;

        let mut counts: BTreeMap<ApplicationStatus, usize> = BTreeMap::new();
        for application in &applications {
            *counts.entry(application.status).or_default() += 1;
        }

        Ok(counts
            .into_iter()
            .map(|(status, count)| StatusCount { status, count })
            .collect())
    }

    pub fn consensus(&self) -> Result<Vec<ConsensusRow>, StoreError> {
        let (applications, reviews) = self
            .store
            .transaction(|tx| Ok((tx.all_applications()?, tx.all_reviews()?)))?;

        let mut by_applicant: BTreeMap<&ApplicantId, Vec<&Review>> = BTreeMap::new();
        for review in &reviews {
            by_applicant
                .entry(&review.applicant_id)
                .or_default()
                .push(review);
        }

        let mut rows = Vec::with_capacity(applications.len());
        for application in &applications {
            let rows_for: Vec<Review> = by_applicant
                .get(&application.id)
                .map(|rows| rows.iter().map(|review| (*review).clone()).collect())
                .unwrap_or_default();
            let counted: Vec<&Review> = rows_for
                .iter()
                .filter(|review| review.counts_toward_quorum())
                .collect();
            let completed = completed_reviews(&rows_for);

            rows.push(ConsensusRow {
                applicant_id: application.id.clone(),
                status: application.status,
                completed_reviews: completed,
                referred: rows_for.iter().any(|review| review.referral),
                quorum_met: completed >= self.required_reviews as usize,
                mean_originality: mean(counted.iter().map(|r| r.ratings.originality)),
                mean_technicality: mean(counted.iter().map(|r| r.ratings.technicality)),
                mean_passion: mean(counted.iter().map(|r| r.ratings.passion)),
            });
        }
        Ok(rows)
    }

    /// Write the consensus summary as CSV with a header row. Returns the number of data rows.
    pub fn write_consensus_csv<W: io::Write>(&self, writer: W) -> Result<usize, ExportError> {
        let rows = self.consensus()?;
        let mut csv_writer = csv::Writer::from_writer(writer);
        for row in &rows {
            csv_writer.serialize(row)?;
        }
        csv_writer.flush()?;
        Ok(rows.len())
    }
}
