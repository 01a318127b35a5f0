use std::path::PathBuf;

use crate::demo::run_demo;
use crate::infra::{load_seed, Ledger};
use crate::server;
use applicant_review::config::AppConfig;
use applicant_review::error::AppError;
use applicant_review::telemetry;
use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "Applicant Review",
    about = "Serve and operate the hackathon application review queue",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Reclaim stale leases once and print what changed
    Sweep,
    /// Create the Postgres ledger tables if they are missing
    Migrate,
    /// Write the consensus table as CSV
    Export(ExportArgs),
    /// Walk through the assignment and reclaim workflow against an in-memory ledger
    Demo,
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// CSV of applications (`applicant_id,submitted_at[,status]`) to load before serving
    #[arg(long)]
    pub(crate) seed: Option<PathBuf>,
}

#[derive(Args, Debug, Default)]
pub(crate) struct ExportArgs {
    /// Destination file; stdout when omitted
    #[arg(long, short)]
    pub(crate) output: Option<PathBuf>,
    /// Seed CSV to load first, for exports from the in-memory ledger
    #[arg(long)]
    pub(crate) seed: Option<PathBuf>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Sweep => run_sweep(),
        Command::Migrate => run_migrate(),
        Command::Export(args) => run_export(args),
        Command::Demo => run_demo(),
    }
}

fn open_ledger() -> Result<Ledger, AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;
    Ledger::open(&config)
}

fn run_sweep() -> Result<(), AppError> {
    let ledger = open_ledger()?;
    let report = ledger.sweep()?;

    println!(
        "Sweep finished on the {} ledger: {} stale lease(s) reclaimed, {} application(s) settled",
        ledger.label(),
        report.reclaimed.len(),
        report.settled.len()
    );
    for lease in &report.reclaimed {
        println!(
            "  reclaimed {} from {} (last touched {})",
            lease.applicant_id,
            lease.reviewer_id,
            lease.last_touched.to_rfc3339()
        );
    }
    for applicant in &report.settled {
        println!("  settled {applicant}");
    }
    Ok(())
}

fn run_migrate() -> Result<(), AppError> {
    let ledger = open_ledger()?;
    if ledger.migrate()? {
        println!("Review ledger schema is up to date");
    } else {
        println!("The {} ledger keeps no schema; nothing to migrate", ledger.label());
    }
    Ok(())
}

fn run_export(args: ExportArgs) -> Result<(), AppError> {
    let ledger = open_ledger()?;
    if let Some(path) = args.seed.as_deref() {
        ledger.seed(load_seed(path)?)?;
    }

    let rows = match args.output.as_deref() {
        Some(path) => {
            let file = std::fs::File::create(path)?;
            let rows = ledger.write_consensus_csv(file)?;
            eprintln!("Wrote {rows} consensus row(s) to {}", path.display());
            rows
        }
        None => ledger.write_consensus_csv(std::io::stdout().lock())?,
    };

    tracing::debug!(rows, "consensus export finished");
    Ok(())
}
