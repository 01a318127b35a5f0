//! Boundary validation for review payloads.
//!
//! Autosaves arrive as loosely filled forms. They are classified once, here, into an explicit
//! [`ReviewSubmission`] so the rest of the engine never re-checks optional fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{ApplicantId, Ratings, Review, ReviewerId};

pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 10;

/// Raw review form as sent by the client. A rating of `0` is the form's "unset" value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewPayload {
    #[serde(default)]
    pub originality_rating: Option<u8>,
    #[serde(default)]
    pub technicality_rating: Option<u8>,
    #[serde(default)]
    pub passion_rating: Option<u8>,
    #[serde(default)]
    pub comments: Option<String>,
}

/// Optional notes attached to a referral.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralPayload {
    #[serde(default)]
    pub comments: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    #[error("{field} must be between {MIN_RATING} and {MAX_RATING}, got {value}")]
    RatingOutOfRange { field: &'static str, value: u8 },
}

/// A rating known to be within `MIN_RATING..=MAX_RATING`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Rating(u8);

impl Rating {
    pub fn new(field: &'static str, value: u8) -> Result<Self, PayloadError> {
        if (MIN_RATING..=MAX_RATING).contains(&value) {
            Ok(Self(value))
        } else {
            Err(PayloadError::RatingOutOfRange { field, value })
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

/// A partially filled review. Saved with `completed = false`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftReview {
    pub ratings: Ratings,
    pub comments: Option<String>,
}

/// A review with every required rating present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedReview {
    pub originality: Rating,
    pub technicality: Rating,
    pub passion: Rating,
    pub comments: Option<String>,
}

impl CompletedReview {
    pub fn ratings(&self) -> Ratings {
        Ratings {
            originality: Some(self.originality.get()),
            technicality: Some(self.technicality.get()),
            passion: Some(self.passion.get()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewSubmission {
    /// Nothing rated and no comments; the stored row is removed instead of saved.
    Empty,
    Draft(DraftReview),
    Completed(CompletedReview),
}

fn checked(field: &'static str, raw: Option<u8>) -> Result<Option<Rating>, PayloadError> {
    match raw {
        None | Some(0) => Ok(None),
        Some(value) => Rating::new(field, value).map(Some),
    }
}

fn normalized_comments(raw: Option<String>) -> Option<String> {
    raw.and_then(|text| {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

impl ReferralPayload {
    pub fn into_comments(self) -> Option<String> {
        normalized_comments(self.comments)
    }
}

impl ReviewSubmission {
    pub fn classify(payload: ReviewPayload) -> Result<Self, PayloadError> {
        let originality = checked("originality_rating", payload.originality_rating)?;
        let technicality = checked("technicality_rating", payload.technicality_rating)?;
        let passion = checked("passion_rating", payload.passion_rating)?;
        let comments = normalized_comments(payload.comments);

        if let (Some(originality), Some(technicality), Some(passion)) =
            (originality, technicality, passion)
        {
            return Ok(Self::Completed(CompletedReview {
                originality,
                technicality,
                passion,
                comments,
            }));
        }

        let ratings = Ratings {
            originality: originality.map(Rating::get),
            technicality: technicality.map(Rating::get),
            passion: passion.map(Rating::get),
        };

        if ratings.is_blank() && comments.is_none() {
            Ok(Self::Empty)
        } else {
            Ok(Self::Draft(DraftReview { ratings, comments }))
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// Merge this submission into the reviewer's row, keeping its creation time and referral flag.
    pub(crate) fn into_review(
        self,
        existing: Option<Review>,
        applicant_id: &ApplicantId,
        reviewer_id: &ReviewerId,
        now: DateTime<Utc>,
    ) -> Option<Review> {
        let (ratings, comments, completed) = match self {
            Self::Empty => return None,
            Self::Draft(draft) => (draft.ratings, draft.comments, false),
            Self::Completed(done) => (done.ratings(), done.comments, true),
        };

        let mut review = existing
            .unwrap_or_else(|| Review::lease(applicant_id.clone(), reviewer_id.clone(), now));
        review.ratings = ratings;
        review.comments = comments;
        review.completed = completed;
        review.updated_at = now;
        Some(review)
    }
}

impl TryFrom<ReviewPayload> for ReviewSubmission {
    type Error = PayloadError;

    fn try_from(payload: ReviewPayload) -> Result<Self, Self::Error> {
        Self::classify(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(o: Option<u8>, t: Option<u8>, p: Option<u8>, comments: Option<&str>) -> ReviewPayload {
        ReviewPayload {
            originality_rating: o,
            technicality_rating: t,
            passion_rating: p,
            comments: comments.map(str::to_string),
        }
    }

    #[test]
    fn all_ratings_present_is_completed() {
        let submission = ReviewSubmission::classify(payload(Some(7), Some(4), Some(10), None))
            .expect("valid payload");
        assert!(submission.is_complete());
    }

    #[test]
    fn missing_rating_is_a_draft() {
        let submission =
            ReviewSubmission::classify(payload(Some(7), None, Some(3), Some("solid resume")))
                .expect("valid payload");
        match submission {
            ReviewSubmission::Draft(draft) => {
                assert_eq!(draft.ratings.technicality, None);
                assert_eq!(draft.comments.as_deref(), Some("solid resume"));
            }
            other => panic!("expected draft, got {other:?}"),
        }
    }

    #[test]
    fn zero_ratings_count_as_unset() {
        let submission = ReviewSubmission::classify(payload(Some(0), Some(0), Some(0), Some("  ")))
            .expect("valid payload");
        assert_eq!(submission, ReviewSubmission::Empty);
    }

    #[test]
    fn comments_alone_make_a_draft() {
        let submission = ReviewSubmission::classify(payload(None, None, None, Some("call back")))
            .expect("valid payload");
        assert!(matches!(submission, ReviewSubmission::Draft(_)));
    }

    #[test]
    fn out_of_range_rating_is_rejected() {
        let err = ReviewSubmission::classify(payload(Some(11), Some(2), Some(2), None))
            .expect_err("rating above ten");
        assert_eq!(
            err,
            PayloadError::RatingOutOfRange {
                field: "originality_rating",
                value: 11
            }
        );
    }

    #[test]
    fn merge_preserves_creation_time_and_referral() {
        let applicant = ApplicantId("applicant-1".to_string());
        let reviewer = ReviewerId("reviewer-1".to_string());
        let granted = chrono::Utc::now() - chrono::Duration::hours(2);
        let mut existing = Review::lease(applicant.clone(), reviewer.clone(), granted);
        existing.referral = true;

        let now = chrono::Utc::now();
        let merged = ReviewSubmission::classify(payload(Some(5), Some(5), Some(5), None))
            .expect("valid payload")
            .into_review(Some(existing), &applicant, &reviewer, now)
            .expect("non-empty submission");

        assert!(merged.completed);
        assert!(merged.referral);
        assert_eq!(merged.created_at, granted);
        assert_eq!(merged.updated_at, now);
    }
}
