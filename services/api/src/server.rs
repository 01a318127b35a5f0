use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use applicant_review::config::AppConfig;
use applicant_review::error::AppError;
use applicant_review::telemetry;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use tracing::{debug, info, warn};

use crate::cli::ServeArgs;
use crate::infra::{load_seed, AppState, Ledger};
use crate::routes::with_operational_routes;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let ledger = Ledger::open(&config)?;
    if let Some(path) = args.seed.as_deref() {
        let inserted = ledger.seed(load_seed(path)?)?;
        info!(inserted, path = %path.display(), "seeded applications");
    }

    if let Some(period) = config.review.sweep_interval {
        spawn_periodic_sweep(ledger.clone(), period);
    }

    let app = with_operational_routes(ledger.router())
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        ledger = ledger.label(),
        required_reviews = config.review.required_reviews,
        lease_timeout_hours = config.review.lease_timeout_hours,
        "applicant review service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}

/// Reclaim stale leases on a timer in addition to the pass before every assignment.
fn spawn_periodic_sweep(ledger: Ledger, period: Duration) {
    info!(period_secs = period.as_secs(), "periodic lease sweep enabled");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let ledger = ledger.clone();
            match tokio::task::spawn_blocking(move || ledger.sweep()).await {
                Ok(Ok(report)) => debug!(
                    reclaimed = report.reclaimed.len(),
                    settled = report.settled.len(),
                    "periodic sweep finished"
                ),
                Ok(Err(err)) => warn!(error = %err, "periodic sweep failed"),
                Err(err) => warn!(error = %err, "periodic sweep task aborted"),
            }
        }
    });
}
