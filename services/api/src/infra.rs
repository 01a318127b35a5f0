use std::io::Write;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use applicant_review::config::AppConfig;
use applicant_review::error::AppError;
use applicant_review::review::{
    review_router, ApplicantId, Application, ApplicationStatus, ExportError, MemoryStore,
    ReviewEngine, ReviewError, SweepReport, SystemClock,
};
#[cfg(feature = "postgres")]
use applicant_review::review::PgStore;
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// The review engine over whichever ledger the configuration selects.
#[derive(Clone)]
pub(crate) enum Ledger {
    Memory(Arc<ReviewEngine<MemoryStore, SystemClock>>),
    #[cfg(feature = "postgres")]
    Postgres {
        engine: Arc<ReviewEngine<PgStore, SystemClock>>,
        store: Arc<PgStore>,
    },
}

impl Ledger {
    pub(crate) fn open(config: &AppConfig) -> Result<Self, AppError> {
        let policy = config.review.policy();
        let clock = Arc::new(SystemClock);

        if let Some(url) = config.store.database_url.as_deref() {
            #[cfg(feature = "postgres")]
            {
                let store = Arc::new(PgStore::connect(url, config.store.pool_size)?);
                let engine = Arc::new(ReviewEngine::new(store.clone(), clock, policy));
                info!(pool_size = config.store.pool_size, "using postgres review ledger");
                return Ok(Ledger::Postgres { engine, store });
            }
            #[cfg(not(feature = "postgres"))]
            {
                let _ = url;
                warn!("DATABASE_URL is set but postgres support is not compiled in; using the in-memory ledger");
            }
        }

        let store = Arc::new(MemoryStore::default());
        info!("using in-memory review ledger");
        Ok(Ledger::Memory(Arc::new(ReviewEngine::new(store, clock, policy))))
    }

    pub(crate) fn label(&self) -> &'static str {
        match self {
            Ledger::Memory(_) => "memory",
            #[cfg(feature = "postgres")]
            Ledger::Postgres { .. } => "postgres",
        }
    }

    pub(crate) fn router(&self) -> axum::Router {
        match self {
            Ledger::Memory(engine) => review_router(engine.clone()),
            #[cfg(feature = "postgres")]
            Ledger::Postgres { engine, .. } => review_router(engine.clone()),
        }
    }

    pub(crate) fn sweep(&self) -> Result<SweepReport, ReviewError> {
        match self {
            Ledger::Memory(engine) => engine.sweep(),
            #[cfg(feature = "postgres")]
            Ledger::Postgres { engine, .. } => engine.sweep(),
        }
    }

    pub(crate) fn insert_application(&self, application: Application) -> Result<(), ReviewError> {
        match self {
            Ledger::Memory(engine) => engine.insert_application(application),
            #[cfg(feature = "postgres")]
            Ledger::Postgres { engine, .. } => engine.insert_application(application),
        }
    }

    pub(crate) fn write_consensus_csv<W: Write>(&self, writer: W) -> Result<usize, ExportError> {
        match self {
            Ledger::Memory(engine) => engine.read_model().write_consensus_csv(writer),
            #[cfg(feature = "postgres")]
            Ledger::Postgres { engine, .. } => engine.read_model().write_consensus_csv(writer),
        }
    }

    /// Create the ledger tables. Returns `false` for the in-memory ledger, which has none.
    pub(crate) fn migrate(&self) -> Result<bool, AppError> {
        match self {
            Ledger::Memory(_) => Ok(false),
            #[cfg(feature = "postgres")]
            Ledger::Postgres { store, .. } => {
                store.ensure_schema().map_err(AppError::from)?;
                Ok(true)
            }
        }
    }

    /// Insert seed applications, skipping ids that already exist.
    pub(crate) fn seed(&self, applications: Vec<Application>) -> Result<usize, AppError> {
        let mut inserted = 0;
        for application in applications {
            let id = application.id.clone();
            match self.insert_application(application) {
                Ok(()) => inserted += 1,
                Err(ReviewError::Conflict(_)) => debug!(applicant_id = %id, "seed row already present"),
                Err(err) => return Err(err.into()),
            }
        }
        Ok(inserted)
    }
}

#[derive(Debug, Deserialize)]
struct SeedRow {
    applicant_id: String,
    submitted_at: DateTime<Utc>,
    #[serde(default)]
    status: Option<String>,
}

/// Read applications from a CSV file with `applicant_id,submitted_at[,status]` columns.
pub(crate) fn load_seed(path: &Path) -> Result<Vec<Application>, AppError> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|err| AppError::Input(format!("{}: {err}", path.display())))?;

    let mut applications = Vec::new();
    for (line, row) in reader.deserialize::<SeedRow>().enumerate() {
        let row = row.map_err(|err| AppError::Input(format!("{} row {}: {err}", path.display(), line + 1)))?;
        let mut application = Application::pending(ApplicantId(row.applicant_id), row.submitted_at);
        if let Some(raw) = row.status.as_deref().filter(|raw| !raw.trim().is_empty()) {
            application.status = ApplicationStatus::parse(raw).ok_or_else(|| {
                AppError::Input(format!("{} row {}: unknown status '{raw}'", path.display(), line + 1))
            })?;
        }
        applications.push(application);
    }
    Ok(applications)
}
