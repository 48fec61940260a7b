use anyhow::{Context, Result};
use clap::Parser;
use floorcast_audit::{AuditReport, Auditor, DEFAULT_BASE_URL};
use std::{fs::File, process::ExitCode, sync::Mutex};
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const REPORT_FILE: &str = "audit_report.txt";

#[derive(Parser, Debug)]
#[command(author, version, about = "Audit a deployed floorcast server")]
struct Args {
    /// Skip scenarios that require model inference
    #[arg(short = 's', long)]
    skip_slow: bool,

    /// Server to audit
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    base_url: String,
}

fn init_logging() -> Result<()> {
    let report = File::create(REPORT_FILE)
        .with_context(|| format!("failed to create {}", REPORT_FILE))?;
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(report)),
        )
        .init();
    Ok(())
}

async fn run(args: &Args) -> Result<AuditReport> {
    let auditor = Auditor::new(&args.base_url)?;
    auditor.run(args.skip_slow).await
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    if let Err(e) = init_logging() {
        eprintln!("{:#}", e);
        return ExitCode::FAILURE;
    }

    match run(&args).await {
        Ok(report) => {
            report.log_summary();
            if report.all_passed() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            error!("Audit aborted: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
