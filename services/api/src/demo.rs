use std::sync::Arc;

use applicant_review::error::AppError;
use applicant_review::review::{
    ApplicantId, Application, Assignment, Caller, ManualClock, MemoryStore, ReviewEngine,
    ReviewPayload, ReviewPolicy,
};
use chrono::{Duration, TimeZone, Utc};

type DemoEngine = ReviewEngine<MemoryStore, ManualClock>;

pub(crate) fn run_demo() -> Result<(), AppError> {
    let start = Utc
        .with_ymd_and_hms(2025, 11, 1, 9, 0, 0)
        .single()
        .ok_or_else(|| AppError::Input("demo start time is ambiguous".to_string()))?;
    let clock = Arc::new(ManualClock::new(start + Duration::minutes(10)));
    let engine = ReviewEngine::new(
        Arc::new(MemoryStore::default()),
        clock.clone(),
        ReviewPolicy::default(),
    );

    for (offset, id) in ["A1", "A2", "A3"].into_iter().enumerate() {
        engine.insert_application(Application::pending(
            ApplicantId(id.to_string()),
            start + Duration::seconds(offset as i64),
        ))?;
    }

    println!("Applicant review demo");
    println!(
        "  Quorum: {} completed review(s), lease window: {}h",
        engine.policy().required_reviews,
        engine.policy().lease_timeout.num_hours()
    );

    println!("\nQueue order and quorum");
    let x = Caller::organizer("reviewer-x");
    let y = Caller::organizer("reviewer-y");
    let z = Caller::organizer("reviewer-z");

    let first = engine.next_assignment(&x)?;
    print_assignment(&engine, &x, &first)?;
    let second = engine.next_assignment(&y)?;
    print_assignment(&engine, &y, &second)?;

    engine.save_review(
        &x,
        &first.application.id,
        ReviewPayload {
            originality_rating: Some(8),
            technicality_rating: Some(6),
            passion_rating: Some(9),
            comments: Some("clear project history".to_string()),
        },
    )?;
    println!(
        "  {} completed their review of {}",
        x.user_id, first.application.id
    );

    let third = engine.next_assignment(&z)?;
    print_assignment(&engine, &z, &third)?;

    println!("\nStale lease reclaim");
    let w = Caller::organizer("reviewer-w");
    let held = engine.next_assignment(&w)?;
    print_assignment(&engine, &w, &held)?;

    clock.advance(Duration::hours(25));
    println!("  25 hours pass without {} saving anything", w.user_id);

    let report = engine.sweep()?;
    for lease in &report.reclaimed {
        println!(
            "  Reclaimed {} from {} (last touched {})",
            lease.applicant_id,
            lease.reviewer_id,
            lease.last_touched.to_rfc3339()
        );
    }
    for applicant in &report.settled {
        println!("  Settled {applicant} back to the queue");
    }

    let v = Caller::organizer("reviewer-v");
    let next = engine.next_assignment(&v)?;
    print_assignment(&engine, &v, &next)?;

    println!("\nConsensus");
    for row in engine.consensus(&x)? {
        println!(
            "  {}: {} ({} completed, quorum met: {})",
            row.applicant_id,
            row.status,
            row.completed_reviews,
            if row.quorum_met { "yes" } else { "no" }
        );
    }

    Ok(())
}

fn print_assignment(
    engine: &DemoEngine,
    caller: &Caller,
    assignment: &Assignment,
) -> Result<(), AppError> {
    let current = engine.fetch_application(&assignment.application.id)?;
    println!(
        "  {} -> {} (now {})",
        caller.user_id, current.id, current.status
    );
    Ok(())
}
