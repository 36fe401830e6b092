//! Management Activity Collector - Azure AD audit log export
//!
//! This binary authenticates against Azure AD with client credentials, pulls
//! `Audit.AzureActiveDirectory` content for a time window from the Office 365
//! Management Activity API and writes the events as newline-delimited JSON,
//! rotating output files at a size limit.
//!
//! ## Configuration
//!
//! Credentials are loaded from environment variables:
//!
//! - `TENANT_ID`, `CLIENT_ID`, `CLIENT_SECRET`: Azure AD application (required)
//! - `MGMT_ACTIVITY_*`: optional overrides, see `Config`
//! - `RUST_LOG`: Logging level filter (default: info)
//!
//! The time window is given with `--start` and `--end`
//! (`YYYY-MM-DDTHH:MM:SSZ`), or defaults to the last `--last-minutes`
//! minutes (60).

use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use management_activity_collector::client::ActivityClient;
use management_activity_collector::collector::{
    LogCollector, TimeWindow, DEFAULT_QUERY_WINDOW_MINUTES,
};
use management_activity_collector::config::{log_file_from_env, Config};
use management_activity_collector::error::Result;
use management_activity_collector::token::TokenProvider;

#[derive(Debug, Parser)]
#[command(name = "management-activity-collector")]
#[command(version, about = "Export Azure AD audit events from the Office 365 Management Activity API", long_about = None)]
struct Cli {
    /// Window start (YYYY-MM-DDTHH:MM:SSZ), passed to the API as-is
    #[arg(long, value_name = "TIMESTAMP", requires = "end")]
    start: Option<String>,

    /// Window end (YYYY-MM-DDTHH:MM:SSZ), passed to the API as-is
    #[arg(long, value_name = "TIMESTAMP", requires = "start")]
    end: Option<String>,

    /// Collect the window of this many minutes ending now
    #[arg(
        long,
        value_name = "MINUTES",
        default_value_t = DEFAULT_QUERY_WINDOW_MINUTES,
        value_parser = clap::value_parser!(i64).range(1..),
        conflicts_with_all = ["start", "end"]
    )]
    last_minutes: i64,
}

impl Cli {
    fn window(&self) -> TimeWindow {
        match (&self.start, &self.end) {
            (Some(start), Some(end)) => TimeWindow::new(start.as_str(), end.as_str()),
            _ => TimeWindow::last_minutes(self.last_minutes),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    init_tracing(&log_file_from_env());

    let window = cli.window();
    info!(
        start = %window.start,
        end = %window.end,
        "Starting Azure AD audit log collection"
    );

    match run(&window).await {
        Ok(total) => {
            info!(total_events = total, "Total logs collected: {}", total);
        }
        Err(e) => {
            let exit_code = e.exit_code();
            error!(error = %e, exit_code, "Collection failed");
            error!("{:?}", anyhow::Error::new(e));
            std::process::exit(exit_code);
        }
    }
}

/// Load configuration, authenticate and collect the window.
async fn run(window: &TimeWindow) -> Result<u64> {
    let config = Config::from_env()?;
    info!(
        tenant_id = %config.credentials.tenant_id,
        api_url = %config.api_url,
        output_base = %config.output_base,
        max_file_size_bytes = config.max_file_size_bytes,
        max_attempts = config.max_attempts,
        follow_pagination = config.follow_pagination,
        "Configuration loaded"
    );

    let client = ActivityClient::new(&config)?;
    let mut tokens = TokenProvider::new(&client, config.login_url.clone(), config.credentials.clone());

    // Authenticate up front so bad credentials fail before any listing
    tokens.token().await?;
    info!("Access token acquired");

    let collector = LogCollector::from_config(&client, &config);
    let total = collector
        .collect(
            &mut tokens,
            &config.credentials.tenant_id,
            window,
            &config.output_base,
            &config.output_extension,
        )
        .await?;

    let stats = client.stats();
    info!(
        attempts = stats.attempts,
        retries = stats.retries,
        "HTTP requests completed"
    );

    Ok(total)
}

/// Initialize tracing to stderr and, when it can be opened, the log file.
fn init_tracing(log_file: &Path) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, file_error) = match open_log_file(log_file) {
        Ok(file) => {
            let layer = fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(false);
            (Some(layer), None)
        }
        Err(e) => (None, Some(e)),
    };

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact();

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();

    if let Some(e) = file_error {
        warn!(error = %e, path = %log_file.display(), "Could not open log file, logging to stderr only");
    }
}

fn open_log_file(path: &Path) -> std::io::Result<fs::File> {
    if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}
