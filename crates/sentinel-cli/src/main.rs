//! Sentinel Signal CLI
//!
//! Runs one proxied scoring API operation per invocation and prints the
//! result envelope as JSON on stdout. Logs go to stderr.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use sentinel_client::{ScoreRequest, SentinelClient};
use sentinel_core::{CredentialStatus, Settings, ToolFailure, ToolResponse};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Delete the cached trial credential before doing anything else
    #[arg(long)]
    reset_credentials: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Score a workflow payload
    Score {
        /// Workflow identifier, e.g. claims_triage
        #[arg(long)]
        workflow: String,

        /// Workflow input as a JSON object
        #[arg(long)]
        payload: String,

        /// Scoring options as a JSON object
        #[arg(long)]
        options: Option<String>,
    },
    /// Show plan limits for the current key
    Limits,
    /// Show usage for the current key
    Usage {
        /// Month to report, as YYYY-MM
        #[arg(long)]
        month: Option<String>,
    },
    /// Submit feedback for a prior scoring request
    Feedback {
        /// Feedback as a JSON object
        #[arg(long)]
        feedback: String,
    },
    /// Show which credential would be used, without minting one
    Status,
}

#[derive(Serialize)]
struct Report<T: Serialize> {
    ok: bool,
    data: T,
}

#[derive(Serialize)]
struct ResetReport {
    removed: bool,
    path: PathBuf,
}

/// Initializes structured logging with tracing.
///
/// `SENTINEL_LOG_FORMAT` selects `json` or `pretty` (default) output; the
/// level is controlled via `RUST_LOG`. Everything is written to stderr.
fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let format = std::env::var("SENTINEL_LOG_FORMAT")
        .unwrap_or_else(|_| "pretty".to_string())
        .to_lowercase();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("sentinel_cli=warn,sentinel_client=warn,sentinel_core=warn")
    });

    match format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .init();
        }
        _ => {
            fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_file(false)
                .with_line_number(false)
                .init();
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Failed to render output")?;
    println!("{rendered}");
    Ok(())
}

/// Parses a JSON argument, reporting bad input as an envelope failure.
fn parse_json_arg(name: &str, raw: &str) -> std::result::Result<Value, ToolFailure> {
    serde_json::from_str(raw)
        .map_err(|e| ToolFailure::invalid_arguments(format!("{name} is not valid JSON: {e}")))
}

async fn score(
    client: &SentinelClient,
    workflow: String,
    payload: &str,
    options: Option<&str>,
) -> ToolResponse {
    let payload = match parse_json_arg("payload", payload) {
        Ok(payload) => payload,
        Err(failure) => return failure.into(),
    };
    let mut request = ScoreRequest::new(workflow, payload);
    if let Some(options) = options {
        match parse_json_arg("options", options) {
            Ok(options) => request = request.with_options(options),
            Err(failure) => return failure.into(),
        }
    }
    client.score_workflow(request).await
}

async fn run(client: &SentinelClient, command: Command) -> Result<ExitCode> {
    let response = match command {
        Command::Score {
            workflow,
            payload,
            options,
        } => score(client, workflow, &payload, options.as_deref()).await,
        Command::Limits => client.get_limits().await,
        Command::Usage { month } => client.get_usage(month.as_deref()).await,
        Command::Feedback { feedback } => match parse_json_arg("feedback", &feedback) {
            Ok(feedback) => client.submit_feedback(feedback).await,
            Err(failure) => failure.into(),
        },
        Command::Status => {
            let status: CredentialStatus = client
                .resolver()
                .status()
                .await
                .context("Failed to read credential status")?;
            print_json(&Report {
                ok: true,
                data: status,
            })?;
            return Ok(ExitCode::SUCCESS);
        }
    };

    print_json(&response)?;
    Ok(if response.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    init_tracing();

    let settings = Arc::new(Settings::from_env().context("Invalid Sentinel configuration")?);
    debug!(
        api_base_url = %settings.api_base_url,
        token_base_url = %settings.token_base_url,
        credentials_path = %settings.credentials_path.display(),
        "Loaded settings"
    );

    let client = SentinelClient::from_settings(Arc::clone(&settings))
        .context("Failed to initialize Sentinel client")?;

    if args.reset_credentials {
        let removed = client
            .resolver()
            .reset()
            .await
            .with_context(|| {
                format!(
                    "Failed to remove cached credentials at {}",
                    settings.credentials_path.display()
                )
            })?;
        info!(removed, "Cached credentials reset");

        if args.command.is_none() {
            print_json(&Report {
                ok: true,
                data: ResetReport {
                    removed,
                    path: settings.credentials_path.clone(),
                },
            })?;
            return Ok(ExitCode::SUCCESS);
        }
    }

    let Some(command) = args.command else {
        anyhow::bail!("No command given; run with --help for usage");
    };

    run(&client, command).await
}
