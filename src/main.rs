use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use autoapply::browser::{BrowserSession, ChromePage};
use autoapply::classifier::OpenAiClassifier;
use autoapply::machine::Engine;
use autoapply::profile::Profile;
use autoapply::report::RunReport;
use autoapply::types::RunOutcome;

/// Apply to a job posting automatically, filling forms from a saved profile.
#[derive(Debug, Parser)]
#[command(name = "autoapply", version, about)]
struct Cli {
    /// URL of the job posting or application form
    #[arg(long)]
    url: String,

    /// Applicant profile (flat JSON object of string values).
    /// Defaults to the config directory.
    #[arg(long)]
    profile: Option<PathBuf>,

    /// Run Chrome headless
    #[arg(long)]
    headless: bool,

    /// Write the JSON run report to this path instead of stdout
    #[arg(long)]
    report: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run(Cli::parse()).await {
        Ok(outcome) => match outcome {
            RunOutcome::Success => ExitCode::SUCCESS,
            RunOutcome::NeedsHuman { .. } => ExitCode::from(2),
            RunOutcome::Failed { .. } => ExitCode::FAILURE,
        },
        Err(e) => {
            error!(error = %format!("{e:#}"), "run aborted");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<RunOutcome> {
    let profile_path = cli.profile.unwrap_or_else(Profile::default_path);
    let profile = Profile::load(&profile_path)?;
    if profile.is_empty() {
        warn!(path = %profile_path.display(), "profile is empty, most fields will be skipped");
    }

    let classifier = OpenAiClassifier::from_env().context("classifier setup failed")?;

    let headless = cli.headless;
    let session = tokio::task::spawn_blocking(move || BrowserSession::launch(headless))
        .await
        .context("browser launch task panicked")??;
    let page = ChromePage::new(session.tab.clone());

    let mut engine = Engine::new(Arc::new(page), Arc::new(classifier), profile);

    info!(url = %cli.url, "starting application run");
    let started = Instant::now();
    let ctx = engine.run(&cli.url).await;
    let report = RunReport::from_context(&ctx, started.elapsed().as_millis() as u64);

    match &cli.report {
        Some(path) => {
            std::fs::write(path, report.to_json())
                .with_context(|| format!("cannot write report to {}", path.display()))?;
            info!(path = %path.display(), "report written");
        }
        None => println!("{}", report.to_json()),
    }

    // Session stays alive until after the report so a final screenshot or
    // manual inspection of the tab is still possible.
    drop(session);

    Ok(report.outcome)
}
