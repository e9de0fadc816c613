//! Medallion Ingest - extract one execution date into its partition

use chrono::NaiveDate;
use clap::Parser;
use medallion_common::logging::{init_logging, LogConfig, LogFormat, LogLevel};
use medallion_ingest::config::DEFAULT_CONFIG_PATH;
use medallion_ingest::partition::parse_execution_date;
use medallion_ingest::{Pipeline, PipelineConfig};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "medallion-ingest")]
#[command(author, version, about = "Extract one day of source rows into a Hive-style partition")]
struct Cli {
    /// Pipeline configuration file (YAML)
    #[arg(short, long, env = "MEDALLION_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Date to extract, YYYY-MM-DD
    #[arg(short, long, value_parser = parse_date)]
    execution_date: NaiveDate,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Log line format
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormatArg,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum LogFormatArg {
    Text,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Text => LogFormat::Text,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

fn parse_date(text: &str) -> Result<NaiveDate, String> {
    parse_execution_date(text).map_err(|e| e.to_string())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    // A missing .env file is fine
    dotenvy::dotenv().ok();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .format(cli.log_format.into())
        .log_file_prefix("medallion-ingest")
        .filter_directives("sqlx=warn,aws_config=warn,aws_smithy_runtime=warn,hyper=warn")
        .build();

    // Environment variables take precedence
    let log_config = match log_config.merge_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(78);
        },
    };

    let guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: failed to initialize logging: {e}");
            process::exit(78);
        },
    };

    let code = match run(&cli).await {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, kind = e.kind(), "Ingestion failed");
            eprintln!("Error: {e}");
            e.exit_code()
        },
    };

    // Flush file logs before exiting
    drop(guard);
    process::exit(code);
}

async fn run(cli: &Cli) -> medallion_ingest::Result<()> {
    info!(config = %cli.config.display(), execution_date = %cli.execution_date, "Loading pipeline");

    let config = Arc::new(PipelineConfig::load(&cli.config)?);
    let mut pipeline = Pipeline::from_config(config).await?;
    let report = pipeline.run(cli.execution_date).await?;

    let summary = serde_json::to_string_pretty(&report)
        .map_err(|e| medallion_ingest::IngestError::write(format!("cannot render run report: {e}")))?;
    println!("{summary}");
    Ok(())
}
