//! Runs one operation JSON file against an engine built from a properties file.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use conductor_core::{Context, Operation, User, UNKNOWN_USER_ID};
use conductor_engine::error::ErrorReport;
use conductor_engine::middleware::ExecuteRequest;
use conductor_engine::properties::{keys, Properties};
use conductor_engine::Engine;
use tower::ServiceExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Execute an operation chain.
#[derive(Parser, Debug)]
#[command(name = "conductor", version, about, long_about = None)]
struct Cli {
    /// JSON properties file configuring the engine
    #[arg(short, long, env = "CONDUCTOR_PROPERTIES")]
    properties: Option<PathBuf>,

    /// JSON file holding the operation to run
    #[arg(short, long)]
    operation: PathBuf,

    /// User id to run as
    #[arg(short, long, env = "CONDUCTOR_USER", default_value = UNKNOWN_USER_ID)]
    user: String,

    /// Auths held by the user
    #[arg(short, long, value_delimiter = ',')]
    auths: Vec<String>,

    /// Request timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Wait this long for background jobs before exiting
    #[arg(long, default_value_t = 0)]
    linger_ms: u64,

    /// Include full diagnostics in error output
    #[arg(long)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut properties = match &cli.properties {
        Some(path) => Properties::from_file(path)?,
        None => Properties::new(),
    };
    if cli.debug {
        properties.set(keys::ERROR_DEBUG, true);
    }
    let debug = properties.error_debug();

    let text = std::fs::read_to_string(&cli.operation)
        .with_context(|| format!("reading operation file {}", cli.operation.display()))?;
    let operation = Operation::from_json(&text)
        .with_context(|| format!("parsing operation file {}", cli.operation.display()))?;

    let engine = Engine::build(properties)?;
    let user = User::new(cli.user).with_auths(cli.auths);
    info!(user = %user.user_id, op_type = %operation.op_type(), "executing");

    let mut request = ExecuteRequest::new(operation, Context::new(user));
    if let Some(timeout_ms) = cli.timeout_ms {
        request = request.with_timeout_ms(timeout_ms);
    }
    let outcome = engine.service().oneshot(request).await;

    if cli.linger_ms > 0 {
        tokio::time::sleep(Duration::from_millis(cli.linger_ms)).await;
    }
    engine.shutdown().await;

    match outcome {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            let report = ErrorReport::new(&err, debug);
            eprintln!("{}", serde_json::to_string_pretty(&report)?);
            Ok(ExitCode::FAILURE)
        }
    }
}
