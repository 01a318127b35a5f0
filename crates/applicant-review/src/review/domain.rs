use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Completed, non-referral reviews an application needs before it leaves the queue.
pub const REQUIRED_REVIEWS: u32 = 2;

/// Hours an incomplete lease may sit untouched before it is reclaimed.
pub const LEASE_TIMEOUT_HOURS: i64 = 24;

/// Identifier of an applicant. Applications are keyed by their owner's user id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApplicantId(pub String);

/// Identifier of an organizer acting as a reviewer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReviewerId(pub String);

impl fmt::Display for ApplicantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for ReviewerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of an application. Only `PendingReview` and `InReview` are driven by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicationStatus {
    InProgress,
    PendingReview,
    InReview,
    Accepted,
    Rejected,
    Waitlisted,
    Declined,
}

impl ApplicationStatus {
    pub const ALL: [ApplicationStatus; 7] = [
        ApplicationStatus::InProgress,
        ApplicationStatus::PendingReview,
        ApplicationStatus::InReview,
        ApplicationStatus::Accepted,
        ApplicationStatus::Rejected,
        ApplicationStatus::Waitlisted,
        ApplicationStatus::Declined,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            ApplicationStatus::InProgress => "IN_PROGRESS",
            ApplicationStatus::PendingReview => "PENDING_REVIEW",
            ApplicationStatus::InReview => "IN_REVIEW",
            ApplicationStatus::Accepted => "ACCEPTED",
            ApplicationStatus::Rejected => "REJECTED",
            ApplicationStatus::Waitlisted => "WAITLISTED",
            ApplicationStatus::Declined => "DECLINED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|status| status.label().eq_ignore_ascii_case(raw.trim()))
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// The slice of an application this crate reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub id: ApplicantId,
    pub status: ApplicationStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Application {
    /// A freshly submitted application waiting in the queue.
    pub fn pending(id: ApplicantId, submitted_at: DateTime<Utc>) -> Self {
        Self {
            id,
            status: ApplicationStatus::PendingReview,
            created_at: submitted_at,
            updated_at: submitted_at,
        }
    }
}

/// Rating fields collected by the review form. `None` means not rated yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ratings {
    #[serde(rename = "originality_rating")]
    pub originality: Option<u8>,
    #[serde(rename = "technicality_rating")]
    pub technicality: Option<u8>,
    #[serde(rename = "passion_rating")]
    pub passion: Option<u8>,
}

impl Ratings {
    pub fn is_blank(&self) -> bool {
        self.originality.is_none() && self.technicality.is_none() && self.passion.is_none()
    }
}

/// One ledger row keyed by `(applicant_id, reviewer_id)`.
///
/// An incomplete, non-referral row is a lease; once its `updated_at` falls behind the lease
/// window it is stale and the reclaimer removes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub applicant_id: ApplicantId,
    pub reviewer_id: ReviewerId,
    #[serde(flatten)]
    pub ratings: Ratings,
    pub comments: Option<String>,
    pub completed: bool,
    pub referral: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Review {
    /// A new lease row granted at `now`.
    pub fn lease(applicant_id: ApplicantId, reviewer_id: ReviewerId, now: DateTime<Utc>) -> Self {
        Self {
            applicant_id,
            reviewer_id,
            ratings: Ratings::default(),
            comments: None,
            completed: false,
            referral: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_lease(&self) -> bool {
        !self.completed && !self.referral
    }

    /// Lease rows touched at or after `cutoff` are active; older ones are stale.
    pub fn is_active_lease(&self, cutoff: DateTime<Utc>) -> bool {
        self.is_lease() && self.updated_at >= cutoff
    }

    pub fn is_stale_lease(&self, cutoff: DateTime<Utc>) -> bool {
        self.is_lease() && self.updated_at < cutoff
    }

    pub fn counts_toward_quorum(&self) -> bool {
        self.completed && !self.referral
    }
}

/// A reviewer's current unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub review: Review,
    pub application: Application,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Hacker,
    Organizer,
}

impl Role {
    pub fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("organizer") {
            Role::Organizer
        } else {
            Role::Hacker
        }
    }
}

/// Identity resolved by the upstream session provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
    pub role: Role,
}

impl Caller {
    pub fn organizer(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: Role::Organizer,
        }
    }

    pub fn reviewer_id(&self) -> ReviewerId {
        ReviewerId(self.user_id.clone())
    }
}

/// Quorum size and lease window applied by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReviewPolicy {
    pub required_reviews: u32,
    pub lease_timeout: Duration,
}

impl Default for ReviewPolicy {
    fn default() -> Self {
        Self {
            required_reviews: REQUIRED_REVIEWS,
            lease_timeout: Duration::hours(LEASE_TIMEOUT_HOURS),
        }
    }
}

impl ReviewPolicy {
    pub fn lease_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.lease_timeout
    }
}
