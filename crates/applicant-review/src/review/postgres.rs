//! Postgres ledger on diesel with an r2d2 pool.
//!
//! Transactions run at `READ COMMITTED`. Exclusivity comes from row locks:
//! `FOR UPDATE OF a SKIP LOCKED` when choosing an application, `FOR UPDATE` when
//! re-checking one, and a transaction-scoped advisory lock per reviewer.

use chrono::{DateTime, Utc};
use diesel::connection::SimpleConnection;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::sql_query;
use diesel::sql_types::{BigInt, Text, Timestamptz};

use super::domain::{ApplicantId, Application, ApplicationStatus, Ratings, Review, ReviewerId};
use super::ledger::{LedgerTx, ReviewStore, StoreError};

table! {
    applications (id) {
        id -> Varchar,
        status -> Varchar,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

table! {
    reviews (applicant_id, reviewer_id) {
        applicant_id -> Varchar,
        reviewer_id -> Varchar,
        originality_rating -> Nullable<SmallInt>,
        technicality_rating -> Nullable<SmallInt>,
        passion_rating -> Nullable<SmallInt>,
        comments -> Nullable<Text>,
        completed -> Bool,
        referral -> Bool,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

allow_tables_to_appear_in_same_query!(applications, reviews);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS applications (
    id VARCHAR PRIMARY KEY,
    status VARCHAR NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS applications_queue_idx ON applications (status, updated_at, id);
CREATE TABLE IF NOT EXISTS reviews (
    applicant_id VARCHAR NOT NULL REFERENCES applications (id),
    reviewer_id VARCHAR NOT NULL,
    originality_rating SMALLINT,
    technicality_rating SMALLINT,
    passion_rating SMALLINT,
    comments TEXT,
    completed BOOLEAN NOT NULL DEFAULT FALSE,
    referral BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL,
    PRIMARY KEY (applicant_id, reviewer_id)
);
CREATE INDEX IF NOT EXISTS reviews_reviewer_idx ON reviews (reviewer_id);
";

const NEXT_ELIGIBLE: &str = "
SELECT a.id, a.status, a.created_at, a.updated_at
FROM applications a
WHERE a.status = $1
  AND NOT EXISTS (
      SELECT 1 FROM reviews r
      WHERE r.applicant_id = a.id AND (r.referral OR r.reviewer_id = $2)
  )
  AND NOT EXISTS (
      SELECT 1 FROM reviews r
      WHERE r.applicant_id = a.id AND NOT r.completed AND NOT r.referral
        AND r.updated_at >= $4
  )
  AND (
      SELECT COUNT(*) FROM reviews r
      WHERE r.applicant_id = a.id AND r.completed AND NOT r.referral
  ) < $3
ORDER BY a.updated_at ASC, a.id ASC
LIMIT 1
FOR UPDATE OF a SKIP LOCKED";

const UNLEASED_IN_REVIEW: &str = "
SELECT a.id, a.status, a.created_at, a.updated_at
FROM applications a
WHERE a.status = $1
  AND NOT EXISTS (
      SELECT 1 FROM reviews r
      WHERE r.applicant_id = a.id AND NOT r.completed AND NOT r.referral
  )
ORDER BY a.updated_at ASC, a.id ASC";

#[derive(Queryable, QueryableByName, Selectable, Insertable)]
#[diesel(table_name = applications)]
struct ApplicationRow {
    id: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Queryable, Selectable, Insertable)]
#[diesel(table_name = reviews)]
struct ReviewRow {
    applicant_id: String,
    reviewer_id: String,
    originality_rating: Option<i16>,
    technicality_rating: Option<i16>,
    passion_rating: Option<i16>,
    comments: Option<String>,
    completed: bool,
    referral: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(AsChangeset)]
#[diesel(table_name = reviews, treat_none_as_null = true)]
struct ReviewChanges {
    originality_rating: Option<i16>,
    technicality_rating: Option<i16>,
    passion_rating: Option<i16>,
    comments: Option<String>,
    completed: bool,
    referral: bool,
    updated_at: DateTime<Utc>,
}

fn application_from_row(row: ApplicationRow) -> Result<Application, StoreError> {
    let status = ApplicationStatus::parse(&row.status).ok_or_else(|| {
        StoreError::Corrupt(format!("application {} has status '{}'", row.id, row.status))
    })?;
    Ok(Application {
        id: ApplicantId(row.id),
        status,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

fn application_to_row(application: &Application) -> ApplicationRow {
    ApplicationRow {
        id: application.id.0.clone(),
        status: application.status.label().to_string(),
        created_at: application.created_at,
        updated_at: application.updated_at,
    }
}

fn rating_from_db(field: &str, raw: Option<i16>) -> Result<Option<u8>, StoreError> {
    raw.map(|value| {
        u8::try_from(value).map_err(|_| StoreError::Corrupt(format!("{field} = {value}")))
    })
    .transpose()
}

fn review_from_row(row: ReviewRow) -> Result<Review, StoreError> {
    Ok(Review {
        ratings: Ratings {
            originality: rating_from_db("originality_rating", row.originality_rating)?,
            technicality: rating_from_db("technicality_rating", row.technicality_rating)?,
            passion: rating_from_db("passion_rating", row.passion_rating)?,
        },
        applicant_id: ApplicantId(row.applicant_id),
        reviewer_id: ReviewerId(row.reviewer_id),
        comments: row.comments,
        completed: row.completed,
        referral: row.referral,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

fn review_to_row(review: &Review) -> ReviewRow {
    ReviewRow {
        applicant_id: review.applicant_id.0.clone(),
        reviewer_id: review.reviewer_id.0.clone(),
        originality_rating: review.ratings.originality.map(i16::from),
        technicality_rating: review.ratings.technicality.map(i16::from),
        passion_rating: review.ratings.passion.map(i16::from),
        comments: review.comments.clone(),
        completed: review.completed,
        referral: review.referral,
        created_at: review.created_at,
        updated_at: review.updated_at,
    }
}

fn review_changes(review: &Review) -> ReviewChanges {
    ReviewChanges {
        originality_rating: review.ratings.originality.map(i16::from),
        technicality_rating: review.ratings.technicality.map(i16::from),
        passion_rating: review.ratings.passion.map(i16::from),
        comments: review.comments.clone(),
        completed: review.completed,
        referral: review.referral,
        updated_at: review.updated_at,
    }
}

fn applications_from_rows(rows: Vec<ApplicationRow>) -> Result<Vec<Application>, StoreError> {
    rows.into_iter().map(application_from_row).collect()
}

fn reviews_from_rows(rows: Vec<ReviewRow>) -> Result<Vec<Review>, StoreError> {
    rows.into_iter().map(review_from_row).collect()
}

impl From<DieselError> for StoreError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::NotFound => StoreError::NotFound("row".to_string()),
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                StoreError::Conflict(info.message().to_string())
            }
            DieselError::DatabaseError(DatabaseErrorKind::SerializationFailure, info) => {
                StoreError::Conflict(info.message().to_string())
            }
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

pub type PgPool = Pool<ConnectionManager<PgConnection>>;

/// Ledger shared by every service instance through one Postgres database.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn connect(database_url: &str, pool_size: u32) -> Result<Self, StoreError> {
        let manager = ConnectionManager::<PgConnection>::new(database_url);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        Ok(Self { pool })
    }

    /// Create the tables and indexes if they are missing.
    pub fn ensure_schema(&self) -> Result<(), StoreError> {
        let mut conn = self.connection()?;
        conn.batch_execute(SCHEMA)?;
        Ok(())
    }

    fn connection(&self) -> Result<PooledConnection<ConnectionManager<PgConnection>>, StoreError> {
        self.pool
            .get()
            .map_err(|err| StoreError::Unavailable(err.to_string()))
    }
}

impl ReviewStore for PgStore {
    fn transaction<T, F>(&self, work: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut dyn LedgerTx) -> Result<T, StoreError>,
    {
        let mut conn = self.connection()?;
        conn.build_transaction().read_committed().run(|conn| {
            let mut tx = PgTx { conn };
            work(&mut tx as &mut dyn LedgerTx)
        })
    }
}

struct PgTx<'a> {
    conn: &'a mut PgConnection,
}

impl LedgerTx for PgTx<'_> {
    fn insert_application(&mut self, application: &Application) -> Result<(), StoreError> {
        diesel::insert_into(applications::table)
            .values(&application_to_row(application))
            .execute(self.conn)?;
        Ok(())
    }

    fn find_application(&mut self, id: &ApplicantId) -> Result<Option<Application>, StoreError> {
        applications::table
            .find(id.0.as_str())
            .select(ApplicationRow::as_select())
            .first(self.conn)
            .optional()?
            .map(application_from_row)
            .transpose()
    }

    fn lock_application(&mut self, id: &ApplicantId) -> Result<Option<Application>, StoreError> {
        applications::table
            .find(id.0.as_str())
            .select(ApplicationRow::as_select())
            .for_update()
            .first(self.conn)
            .optional()?
            .map(application_from_row)
            .transpose()
    }

    fn set_status(
        &mut self,
        id: &ApplicantId,
        status: ApplicationStatus,
        touched_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let target = applications::table.find(id.0.as_str());
        let updated = match touched_at {
            Some(at) => diesel::update(target)
                .set((
                    applications::status.eq(status.label()),
                    applications::updated_at.eq(at),
                ))
                .execute(self.conn)?,
            None => diesel::update(target)
                .set(applications::status.eq(status.label()))
                .execute(self.conn)?,
        };
        if updated == 0 {
            return Err(StoreError::NotFound(format!("application {id}")));
        }
        Ok(())
    }

    fn lock_reviewer(&mut self, reviewer: &ReviewerId) -> Result<(), StoreError> {
        sql_query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind::<Text, _>(reviewer.0.as_str())
            .execute(self.conn)?;
        Ok(())
    }

    fn lock_next_eligible(
        &mut self,
        reviewer: &ReviewerId,
        required_reviews: u32,
        lease_cutoff: DateTime<Utc>,
    ) -> Result<Option<Application>, StoreError> {
        sql_query(NEXT_ELIGIBLE)
            .bind::<Text, _>(ApplicationStatus::PendingReview.label())
            .bind::<Text, _>(reviewer.0.as_str())
            .bind::<BigInt, _>(i64::from(required_reviews))
            .bind::<Timestamptz, _>(lease_cutoff)
            .get_result::<ApplicationRow>(self.conn)
            .optional()?
            .map(application_from_row)
            .transpose()
    }

    fn find_review(
        &mut self,
        applicant: &ApplicantId,
        reviewer: &ReviewerId,
    ) -> Result<Option<Review>, StoreError> {
        reviews::table
            .find((applicant.0.as_str(), reviewer.0.as_str()))
            .select(ReviewRow::as_select())
            .first(self.conn)
            .optional()?
            .map(review_from_row)
            .transpose()
    }

    fn active_leases_held_by(
        &mut self,
        reviewer: &ReviewerId,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Review>, StoreError> {
        let rows = reviews::table
            .filter(reviews::reviewer_id.eq(reviewer.0.as_str()))
            .filter(reviews::completed.eq(false))
            .filter(reviews::referral.eq(false))
            .filter(reviews::updated_at.ge(cutoff))
            .order(reviews::created_at.asc())
            .select(ReviewRow::as_select())
            .load(self.conn)?;
        reviews_from_rows(rows)
    }

    fn insert_review(&mut self, review: &Review) -> Result<(), StoreError> {
        diesel::insert_into(reviews::table)
            .values(&review_to_row(review))
            .execute(self.conn)?;
        Ok(())
    }

    fn upsert_review(&mut self, review: &Review) -> Result<Review, StoreError> {
        let row = diesel::insert_into(reviews::table)
            .values(&review_to_row(review))
            .on_conflict((reviews::applicant_id, reviews::reviewer_id))
            .do_update()
            .set(&review_changes(review))
            .returning(ReviewRow::as_returning())
            .get_result(self.conn)?;
        review_from_row(row)
    }

    fn delete_review(
        &mut self,
        applicant: &ApplicantId,
        reviewer: &ReviewerId,
    ) -> Result<bool, StoreError> {
        let deleted = diesel::delete(
            reviews::table.find((applicant.0.as_str(), reviewer.0.as_str())),
        )
        .execute(self.conn)?;
        Ok(deleted > 0)
    }

    fn delete_stale_lease(
        &mut self,
        applicant: &ApplicantId,
        reviewer: &ReviewerId,
        cutoff: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let deleted = diesel::delete(
            reviews::table
                .filter(reviews::applicant_id.eq(applicant.0.as_str()))
                .filter(reviews::reviewer_id.eq(reviewer.0.as_str()))
                .filter(reviews::completed.eq(false))
                .filter(reviews::referral.eq(false))
                .filter(reviews::updated_at.lt(cutoff)),
        )
        .execute(self.conn)?;
        Ok(deleted > 0)
    }

    fn stale_leases(&mut self, cutoff: DateTime<Utc>) -> Result<Vec<Review>, StoreError> {
        let in_review = applications::table
            .filter(applications::status.eq(ApplicationStatus::InReview.label()))
            .select(applications::id);
        let rows = reviews::table
            .filter(reviews::completed.eq(false))
            .filter(reviews::referral.eq(false))
            .filter(reviews::updated_at.lt(cutoff))
            .filter(reviews::applicant_id.eq_any(in_review))
            .order(reviews::updated_at.asc())
            .select(ReviewRow::as_select())
            .load(self.conn)?;
        reviews_from_rows(rows)
    }

    fn reviews_for_applicant(
        &mut self,
        applicant: &ApplicantId,
    ) -> Result<Vec<Review>, StoreError> {
        let rows = reviews::table
            .filter(reviews::applicant_id.eq(applicant.0.as_str()))
            .order(reviews::reviewer_id.asc())
            .select(ReviewRow::as_select())
            .load(self.conn)?;
        reviews_from_rows(rows)
    }

    fn reviews_by_reviewer(&mut self, reviewer: &ReviewerId) -> Result<Vec<Review>, StoreError> {
        let rows = reviews::table
            .filter(reviews::reviewer_id.eq(reviewer.0.as_str()))
            .order(reviews::created_at.asc())
            .select(ReviewRow::as_select())
            .load(self.conn)?;
        reviews_from_rows(rows)
    }

    fn unleased_in_review(&mut self) -> Result<Vec<ApplicantId>, StoreError> {
        let rows = sql_query(UNLEASED_IN_REVIEW)
            .bind::<Text, _>(ApplicationStatus::InReview.label())
            .load::<ApplicationRow>(self.conn)?;
        Ok(rows.into_iter().map(|row| ApplicantId(row.id)).collect())
    }

    fn all_applications(&mut self) -> Result<Vec<Application>, StoreError> {
        let rows = applications::table
            .order(applications::id.asc())
            .select(ApplicationRow::as_select())
            .load(self.conn)?;
        applications_from_rows(rows)
    }

    fn all_reviews(&mut self) -> Result<Vec<Review>, StoreError> {
        let rows = reviews::table
            .order((reviews::applicant_id.asc(), reviews::reviewer_id.asc()))
            .select(ReviewRow::as_select())
            .load(self.conn)?;
        reviews_from_rows(rows)
    }
}
