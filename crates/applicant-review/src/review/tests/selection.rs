use super::common::*;
use chrono::Duration;

use crate::review::domain::ApplicationStatus;
use crate::review::engine::{ErrorKind, ReviewError, EMPTY_QUEUE_MESSAGE};
use crate::review::ledger::ReviewStore;
use crate::review::payload::ReferralPayload;

#[test]
fn oldest_pending_application_is_leased_first() {
    let harness = Harness::new(queue(&["a1", "a2", "a3"]));
    let x = organizer("x");

    let assignment = harness.engine.next_assignment(&x).expect("work available");

    assert_eq!(assignment.application.id, applicant("a1"));
    assert_eq!(assignment.application.status, ApplicationStatus::InReview);
    assert_eq!(assignment.review.reviewer_id, reviewer("x"));
    assert!(!assignment.review.completed);
    assert_eq!(harness.status("a1"), ApplicationStatus::InReview);
    assert_eq!(harness.rows("a1").len(), 1);
}

#[test]
fn resuming_reviewer_gets_the_same_pair() {
    let harness = Harness::new(queue(&["a1", "a2"]));
    let x = organizer("x");

    let first = harness.engine.next_assignment(&x).expect("first call");
    harness.clock.advance(Duration::minutes(30));
    let second = harness.engine.next_assignment(&x).expect("second call");

    assert_eq!(first, second);
    assert_eq!(harness.rows("a1").len(), 1);
    assert_eq!(harness.status("a2"), ApplicationStatus::PendingReview);
}

#[test]
fn leased_application_is_skipped_for_other_reviewers() {
    let harness = Harness::new(queue(&["a1", "a2", "a3"]));

    assert_eq!(harness.lease_for(&organizer("x")), "a1");
    assert_eq!(harness.lease_for(&organizer("y")), "a2");
    assert_eq!(harness.lease_for(&organizer("z")), "a3");
}

#[test]
fn completed_review_under_quorum_is_offered_again_before_newer_work() {
    let harness = Harness::new(queue(&["a1", "a2", "a3"]));
    let (x, y, z) = (organizer("x"), organizer("y"), organizer("z"));

    assert_eq!(harness.lease_for(&x), "a1");
    assert_eq!(harness.lease_for(&y), "a2");

    harness
        .engine
        .save_review(&x, &applicant("a1"), complete_payload())
        .expect("save succeeds");
    // the submission itself leaves the status alone
    assert_eq!(harness.status("a1"), ApplicationStatus::InReview);

    harness.engine.sweep().expect("sweep succeeds");
    assert_eq!(harness.status("a1"), ApplicationStatus::PendingReview);
    assert_eq!(harness.application("a1").updated_at, t0());

    assert_eq!(harness.lease_for(&z), "a1");
}

#[test]
fn reviewer_is_not_offered_their_own_finished_review() {
    let harness = Harness::new(queue(&["a1", "a2"]));
    let x = organizer("x");

    assert_eq!(harness.lease_for(&x), "a1");
    harness
        .engine
        .save_review(&x, &applicant("a1"), complete_payload())
        .expect("save succeeds");

    assert_eq!(harness.lease_for(&x), "a2");
}

#[test]
fn quorum_removes_application_from_the_queue() {
    let harness = Harness::new(queue(&["a1"]));

    for id in ["x", "y"] {
        let caller = organizer(id);
        assert_eq!(harness.lease_for(&caller), "a1");
        harness
            .engine
            .save_review(&caller, &applicant("a1"), complete_payload())
            .expect("save succeeds");
    }

    let err = harness
        .engine
        .next_assignment(&organizer("z"))
        .expect_err("quorum met");
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(err.to_string(), EMPTY_QUEUE_MESSAGE);
}

#[test]
fn referral_excludes_applicant_for_everyone() {
    let harness = Harness::new(queue(&["a1", "a2"]));

    harness
        .engine
        .refer_applicant(&organizer("x"), &applicant("a1"), ReferralPayload::default())
        .expect("referral filed");

    assert_eq!(harness.lease_for(&organizer("y")), "a2");
    let err = harness
        .engine
        .next_assignment(&organizer("z"))
        .expect_err("nothing left");
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn referral_overrides_an_unfinished_quorum() {
    let harness = Harness::new(queue(&["a1"]));
    let x = organizer("x");

    assert_eq!(harness.lease_for(&x), "a1");
    harness
        .engine
        .save_review(&x, &applicant("a1"), complete_payload())
        .expect("save succeeds");
    harness
        .engine
        .refer_applicant(&organizer("w"), &applicant("a1"), ReferralPayload::default())
        .expect("referral filed");

    let err = harness
        .engine
        .next_assignment(&organizer("y"))
        .expect_err("referred applicant stays out");
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn empty_queue_is_not_found() {
    let harness = Harness::new(Vec::new());
    let err = harness
        .engine
        .next_assignment(&organizer("x"))
        .expect_err("no applications");
    assert!(matches!(err, ReviewError::NotFound(_)));
}

#[test]
fn non_pending_applications_are_never_leased() {
    let mut applications = queue(&["a1", "a2"]);
    applications[0].status = ApplicationStatus::InProgress;
    applications[1].status = ApplicationStatus::Accepted;
    let harness = Harness::new(applications);

    let err = harness
        .engine
        .next_assignment(&organizer("x"))
        .expect_err("nothing reviewable");
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn callers_must_be_identified_organizers() {
    let harness = Harness::new(queue(&["a1"]));

    let err = harness
        .engine
        .next_assignment(&hacker("h"))
        .expect_err("hackers cannot review");
    assert_eq!(err.kind(), ErrorKind::Forbidden);

    let err = harness
        .engine
        .next_assignment(&organizer("  "))
        .expect_err("blank identity");
    assert_eq!(err.kind(), ErrorKind::Unauthorized);

    assert_eq!(harness.status("a1"), ApplicationStatus::PendingReview);
}

#[test]
fn store_failures_surface_with_their_kind() {
    let err = engine_over(UnavailableStore)
        .next_assignment(&organizer("x"))
        .expect_err("store offline");
    assert_eq!(err.kind(), ErrorKind::Internal);

    let err = engine_over(ConflictStore)
        .next_assignment(&organizer("x"))
        .expect_err("lost race");
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[test]
fn lease_on_a_decided_application_is_not_resumed() {
    let harness = Harness::new(queue(&["a1", "a2"]));
    let x = organizer("x");
    assert_eq!(harness.lease_for(&x), "a1");

    // a downstream decision lands while the lease is still open
    harness
        .store
        .transaction(|tx| tx.set_status(&applicant("a1"), ApplicationStatus::Accepted, None))
        .expect("decision recorded");

    assert_eq!(harness.lease_for(&x), "a2");
    assert_eq!(harness.status("a1"), ApplicationStatus::Accepted);
}
