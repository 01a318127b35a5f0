use super::common::*;
use chrono::Duration;

use crate::review::clock::Clock;
use crate::review::domain::{ApplicationStatus, Review, ReviewPolicy};
use crate::review::ledger::ReviewStore;
use crate::review::reclaimer::sweep;

#[test]
fn abandoned_lease_is_reclaimed_by_the_next_request() {
    let harness = Harness::new(queue(&["a1"]));
    let (x, y) = (organizer("x"), organizer("y"));

    assert_eq!(harness.lease_for(&x), "a1");
    harness.clock.advance(Duration::hours(25));

    let assignment = harness.engine.next_assignment(&y).expect("a1 is free again");

    assert_eq!(assignment.application.id, applicant("a1"));
    let rows = harness.rows("a1");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].reviewer_id, reviewer("y"));
    assert_eq!(harness.status("a1"), ApplicationStatus::InReview);
}

#[test]
fn reclaimed_application_rejoins_the_queue_at_now() {
    let harness = Harness::new(queue(&["a1", "a2"]));
    assert_eq!(harness.lease_for(&organizer("x")), "a1");

    harness.clock.advance(Duration::hours(25));
    let report = harness.engine.sweep().expect("sweep");

    assert_eq!(report.reclaimed.len(), 1);
    assert_eq!(report.reclaimed[0].reviewer_id, reviewer("x"));
    assert!(harness.rows("a1").is_empty());
    assert_eq!(harness.status("a1"), ApplicationStatus::PendingReview);
    assert_eq!(harness.application("a1").updated_at, harness.clock.now());

    // a2 has been waiting longer than the freshly requeued a1
    assert_eq!(harness.lease_for(&organizer("y")), "a2");
}

#[test]
fn lease_exactly_at_the_window_edge_survives() {
    let harness = Harness::new(queue(&["a1"]));
    harness.lease_for(&organizer("x"));

    harness.clock.advance(Duration::hours(24));
    let report = harness.engine.sweep().expect("sweep");

    assert!(report.is_empty());
    assert_eq!(harness.status("a1"), ApplicationStatus::InReview);
}

#[test]
fn partial_reclaim_keeps_application_in_review() {
    let harness = Harness::new(queue(&["a1"]));
    let start = harness.clock.now();
    let stale = Review::lease(applicant("a1"), reviewer("x"), start - Duration::hours(30));
    let active = Review::lease(applicant("a1"), reviewer("y"), start - Duration::hours(1));
    harness
        .store
        .transaction(|tx| {
            tx.insert_review(&stale)?;
            tx.insert_review(&active)?;
            tx.set_status(&applicant("a1"), ApplicationStatus::InReview, None)
        })
        .expect("seeded");

    let report = harness.engine.sweep().expect("sweep");

    assert_eq!(report.reclaimed.len(), 1);
    assert!(report.settled.is_empty());
    let rows = harness.rows("a1");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].reviewer_id, reviewer("y"));
    assert_eq!(harness.status("a1"), ApplicationStatus::InReview);
    assert_eq!(harness.application("a1").updated_at, t0());
}

#[test]
fn stale_rows_on_pending_applications_are_left_alone() {
    let harness = Harness::new(queue(&["a1"]));
    let draft = Review::lease(
        applicant("a1"),
        reviewer("x"),
        harness.clock.now() - Duration::hours(48),
    );
    harness
        .store
        .transaction(|tx| tx.insert_review(&draft))
        .expect("seeded");

    let report = harness.engine.sweep().expect("sweep");

    assert!(report.is_empty());
    assert_eq!(harness.rows("a1").len(), 1);
}

#[test]
fn completed_and_referral_rows_are_never_reclaimed() {
    let harness = Harness::new(queue(&["a1"]));
    let x = organizer("x");
    harness.lease_for(&x);
    harness
        .engine
        .save_review(&x, &applicant("a1"), complete_payload())
        .expect("saved");
    harness
        .engine
        .refer_applicant(&organizer("w"), &applicant("a1"), Default::default())
        .expect("referred");

    harness.clock.advance(Duration::days(10));
    let report = harness.engine.sweep().expect("sweep");

    assert!(report.reclaimed.is_empty());
    assert_eq!(report.settled, vec![applicant("a1")]);
    assert_eq!(harness.rows("a1").len(), 2);
}

#[test]
fn shorter_lease_window_is_honoured() {
    let policy = ReviewPolicy {
        lease_timeout: Duration::hours(2),
        ..ReviewPolicy::default()
    };
    let harness = Harness::with_policy(queue(&["a1"]), policy);
    harness.lease_for(&organizer("x"));
    harness.clock.advance(Duration::hours(3));

    let report = sweep(harness.store.as_ref(), &policy, harness.clock.now()).expect("sweep");

    assert_eq!(report.reclaimed.len(), 1);
    assert_eq!(harness.status("a1"), ApplicationStatus::PendingReview);
}
