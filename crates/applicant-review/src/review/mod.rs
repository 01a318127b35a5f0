//! Blind review of hackathon applications.
//!
//! Organizers request work one application at a time. Each request takes a lease (an
//! incomplete review row) on the oldest application still short of its quorum, and leases
//! left untouched past the lease window are reclaimed. Completed reviews feed the read-only
//! consensus model used by dashboards and exports.

pub mod clock;
pub mod domain;
pub mod engine;
pub mod ledger;
pub mod memory;
pub mod payload;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod read_model;
pub mod reclaimer;
pub mod router;
pub(crate) mod selector;

#[cfg(test)]
mod tests;

pub use clock::{Clock, ManualClock, SystemClock};
pub use domain::{
    ApplicantId, Application, ApplicationStatus, Assignment, Caller, Ratings, Review,
    ReviewPolicy, ReviewerId, Role, LEASE_TIMEOUT_HOURS, REQUIRED_REVIEWS,
};
pub use engine::{ErrorKind, ReviewEngine, ReviewError, EMPTY_QUEUE_MESSAGE};
pub use ledger::{LedgerTx, ReviewStore, StoreError};
pub use memory::MemoryStore;
pub use payload::{
    CompletedReview, DraftReview, PayloadError, Rating, ReferralPayload, ReviewPayload,
    ReviewSubmission,
};
#[cfg(feature = "postgres")]
pub use postgres::PgStore;
pub use read_model::{ConsensusReadModel, ConsensusRow, ExportError, ReviewerCount, StatusCount};
pub use reclaimer::{ReclaimedLease, SweepReport};
pub use router::review_router;
pub use selector::{admits, completed_reviews, Selection};
