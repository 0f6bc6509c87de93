use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use tower::Service;
use tracing::{error, info, warn};

use fund_price_scraper::config::DEFAULT_CONFIG_FILE;
use fund_price_scraper::logging::{self, LogSettings};
use fund_price_scraper::{
    notify, Config, ExportError, ExportRequest, ExportResult, FailureMarker, Notifier,
    PriceExportService, Severity,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Download watchlist fund prices into a CSV history")]
struct Cli {
    /// Path to the YAML config file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Run the browser headless (overrides HeadlessMode)
    #[arg(long, conflicts_with = "no_headless")]
    headless: bool,

    /// Show the browser window (overrides HeadlessMode)
    #[arg(long)]
    no_headless: bool,

    /// Write a template config file and exit
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    if cli.init_config {
        Config::write_template(&cli.config)
            .with_context(|| format!("could not write {}", cli.config.display()))?;
        println!(
            "Template written to {}. Fill in your credentials and run again.",
            cli.config.display()
        );
        return Ok(ExitCode::SUCCESS);
    }

    let mut config = Config::load(&cli.config).context("configuration file error")?;
    if cli.headless {
        config.site.headless_mode = true;
    } else if cli.no_headless {
        config.site.headless_mode = false;
    }

    logging::init(&LogSettings::from_config(&config)).context("logger initialisation error")?;

    let notifier = notify::from_config(&config.email);
    let marker = FailureMarker::new(config.failure_marker_path());
    let config = Arc::new(config);

    let mut service = PriceExportService::new();
    match service.call(ExportRequest::new(config)).await {
        Ok(result) => {
            report_success(&result);
            notify_recovery(&marker, notifier.as_ref()).await;
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            error!("Run failed: {}", e);
            if let Err(marker_err) = marker.record(&e.to_string()) {
                warn!("Could not write failure marker: {}", marker_err);
            }
            notify_failure(&e, notifier.as_ref()).await;
            Ok(ExitCode::FAILURE)
        }
    }
}

fn report_success(result: &ExportResult) {
    match &result.outcome {
        Some(outcome) => {
            if outcome.skipped_new > 0 {
                warn!("{} scraped rows were malformed and skipped", outcome.skipped_new);
            }
            if outcome.skipped_existing > 0 {
                warn!(
                    "{} malformed rows dropped from the existing history",
                    outcome.skipped_existing
                );
            }
            info!(
                "Data extracted and saved to {} successfully ({} new, {} total, {} trimmed)",
                result.history_path.display(),
                outcome.accepted,
                outcome.total,
                outcome.trimmed
            );
        }
        None => info!("No prices found; {} left unchanged", result.history_path.display()),
    }
}

async fn notify_failure(e: &ExportError, notifier: &dyn Notifier) {
    let body = format!(
        "The fund price export failed.\n\n{}\n\nTime: {}",
        e,
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    if let Err(notify_err) = notifier.notify(e.subject(), &body, Severity::Error).await {
        // 通知失敗は終了コードに影響させない
        error!("Could not send failure email: {}", notify_err);
    }
}

async fn notify_recovery(marker: &FailureMarker, notifier: &dyn Notifier) {
    let previous = match marker.take() {
        Ok(Some(previous)) => previous,
        Ok(None) => return,
        Err(e) => {
            warn!("Could not read failure marker: {}", e);
            return;
        }
    };

    info!("Run was successful after a prior failure");
    let body = format!(
        "The fund price export was successful after a prior failure.\n\nPrevious failure: {}",
        previous
    );
    if let Err(e) = notifier.notify("Run recovery", &body, Severity::Info).await {
        error!("Could not send recovery email: {}", e);
    }
}
