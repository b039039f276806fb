use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use gavel_common::model::{SITE_DATE_FORMAT, SearchCriteria};
use gavel_common::observability::{LogConfig, init_logging};
use gavel_config::{GavelConfig, GavelConfigLoader, LoggingSettings};
use gavel_runtime::GavelRuntime;
use gavel_scrape::{RunOutcome, RunOutput, Scraper};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_CONFIG: &str = "gavel.yaml";

#[derive(Parser, Debug)]
#[command(name = "gavel", about = "Court-auction listing scraper")]
struct Cli {
    /// Configuration file; `gavel.yaml` is used when present
    #[arg(long, short, env = "GAVEL_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Search one court and date range and print the listings as JSON
    Run(RunArgs),
    /// Load and validate the configuration, then print the effective values
    CheckConfig,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Court name exactly as listed in the search form (e.g. 부산지방법원)
    #[arg(long)]
    court: String,

    /// First auction date, YYYY-MM-DD or YYYY.MM.DD
    #[arg(long, value_parser = parse_date)]
    from: NaiveDate,

    /// Last auction date, YYYY-MM-DD or YYYY.MM.DD
    #[arg(long, value_parser = parse_date)]
    to: NaiveDate,

    /// Maximum result pages to read (defaults to run.default_page_cap)
    #[arg(long)]
    page_cap: Option<u32>,

    /// Write the run output here instead of stdout
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// Pretty-print the JSON output
    #[arg(long, default_value_t = false)]
    pretty: bool,
}

fn parse_date(raw: &str) -> std::result::Result<NaiveDate, String> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, SITE_DATE_FORMAT))
        .map_err(|_| format!("{raw:?} is not a date (expected YYYY-MM-DD)"))
}

fn load_config(path: Option<&Path>) -> Result<GavelConfig> {
    let loader = match path {
        Some(path) => GavelConfigLoader::new().with_file(path),
        None => GavelConfigLoader::new().with_optional_file(DEFAULT_CONFIG),
    };
    loader.load().context("failed to load configuration")
}

fn log_config(logging: &LoggingSettings) -> LogConfig {
    LogConfig {
        app_name: "gavel",
        log_dir: logging.dir.clone(),
        emit_stderr: logging.stderr,
        format: logging.format,
        default_filter: logging.filter.clone(),
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let log_path = init_logging(log_config(&config.logging))?;
    info!(target: "gavel.run", log = %log_path.display(), "logging initialised");

    match cli.command {
        Command::CheckConfig => {
            println!("{config:#?}");
            Ok(ExitCode::SUCCESS)
        }
        Command::Run(args) => run(config, args),
    }
}

fn run(config: GavelConfig, args: RunArgs) -> Result<ExitCode> {
    let mut criteria = SearchCriteria::new(args.court, args.from, args.to)?;
    if let Some(cap) = args.page_cap {
        criteria = criteria.with_page_cap(cap);
    }
    let scraper = Scraper::new(config).context("invalid site or capture configuration")?;

    let runtime = GavelRuntime::build("gavel-worker", None)?;
    let handle = runtime.handle();
    let watcher = handle.cancel_on_ctrl_c();
    let result = runtime.block_on(scraper.run(criteria, handle.run_token()));
    watcher.abort();
    runtime.shutdown(Duration::from_secs(2));

    let output = result.context("scrape run failed")?;
    write_output(&output, args.output.as_deref(), args.pretty)?;

    match &output.outcome {
        RunOutcome::Structural { error } => {
            warn!(target: "gavel.run", run_id = %output.run_id, %error, "run ended on a structural error");
            Ok(ExitCode::from(2))
        }
        RunOutcome::Completed | RunOutcome::Empty => Ok(ExitCode::SUCCESS),
    }
}

fn write_output(output: &RunOutput, path: Option<&Path>, pretty: bool) -> Result<()> {
    let body = if pretty {
        serde_json::to_vec_pretty(output)?
    } else {
        serde_json::to_vec(output)?
    };
    match path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            std::fs::write(path, body)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(target: "gavel.run", path = %path.display(), records = output.records.len(), "output written");
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&body)?;
            stdout.write_all(b"\n")?;
        }
    }
    Ok(())
}
