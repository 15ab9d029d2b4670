//! bd-claim CLI: claim the next ready issue for one agent and print the
//! result document.

use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use bd_claim::clock::{Clock, SystemClock};
use bd_claim::config::Config;
use bd_claim::model::{AgentName, ClaimFilters, Priority};
use bd_claim::store::version::MIN_COMPATIBLE_VERSION;
use bd_claim::telemetry::{SERVICE_NAME, TelemetryConfig, init_telemetry};
use bd_claim::workspace::{BeadsWorkspace, WorkspaceResolver};
use bd_claim::{
    ClaimEngine, ClaimRequest, ClaimResult, Error, SqliteClaimStore, SqliteStoreOptions,
};
use clap::Parser;
use tracing::{debug, warn};

#[derive(Parser, Debug)]
#[command(
    name = "bd-claim",
    version,
    about = "Atomically claim the next ready issue from a beads workspace"
)]
struct Cli {
    /// Agent name (required)
    #[arg(long)]
    agent: Option<String>,

    /// Only issues carrying this label (repeatable)
    #[arg(long = "label", value_name = "LABEL")]
    labels: Vec<String>,

    /// Skip issues carrying this label (repeatable)
    #[arg(long = "exclude-label", value_name = "LABEL")]
    exclude_labels: Vec<String>,

    /// Minimum priority (0=low, 1=medium, 2=high)
    #[arg(long, allow_negative_numbers = true)]
    min_priority: Option<i32>,

    /// Only consider unassigned issues
    #[arg(long)]
    only_unassigned: bool,

    /// Start workspace discovery here instead of the current directory
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Use this database directly, skipping workspace discovery
    #[arg(long)]
    db: Option<PathBuf>,

    /// Show which issue would be claimed without claiming it
    #[arg(long)]
    dry_run: bool,

    /// Pretty-print JSON output
    #[arg(long)]
    pretty: bool,

    /// Human-friendly output instead of JSON
    #[arg(long)]
    human: bool,

    /// Database busy timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Log level or filter directive (logs go to stderr)
    #[arg(long)]
    log_level: Option<String>,

    /// Skip the store version compatibility check
    #[arg(long)]
    skip_version_check: bool,

    /// Give up on the store call after this many milliseconds
    #[arg(long)]
    deadline_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let result = match claim(&cli).await {
        Ok(result) => result,
        Err(err) => ClaimResult::failure(cli.agent.clone().unwrap_or_default(), &err),
    };

    match emit(&cli, &result) {
        Ok(()) if result.is_ok() => ExitCode::SUCCESS,
        Ok(()) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn claim(cli: &Cli) -> bd_claim::Result<ClaimResult> {
    let agent = match cli.agent.as_deref() {
        None => {
            return Err(Error::InvalidArgument(
                "--agent flag is required".to_string(),
            ));
        }
        Some(raw) => AgentName::new(raw)?,
    };

    let (workspace_root, db_path) = locate_store(cli)?;

    let mut config = Config::load(workspace_root.as_deref())?;
    apply_flags(&mut config, cli)?;

    let _telemetry = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: SERVICE_NAME.to_string(),
        log_level: config.log_level.clone(),
        log_format: config.log_format,
    })?;

    debug!(
        workspace_root = ?workspace_root,
        db_path = %db_path.display(),
        source = if cli.db.is_some() { "override" } else { "auto" },
        "workspace_discovery"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let options = SqliteStoreOptions::default()
        .busy_timeout_ms(config.busy_timeout_ms)
        .skip_version_check();
    let store = SqliteClaimStore::open(&db_path, options, clock.clone()).await?;

    if !config.skip_version_check {
        if let Err(err) = store.check_version_compatibility().await {
            warn!(
                error = %err,
                min_version = MIN_COMPATIBLE_VERSION,
                "version_check_failed"
            );
            store.close().await;
            return Err(err);
        }
    }

    let mut request = ClaimRequest::new(agent)
        .filters(build_filters(cli))
        .dry_run(cli.dry_run);
    if let Some(ms) = cli.deadline_ms {
        request = request.deadline(Duration::from_millis(ms));
    }

    let engine = ClaimEngine::new(store, clock);
    let outcome = engine.execute(&request).await;
    engine.store().close().await;

    Ok(ClaimResult::from_outcome(&request, &outcome))
}

/// `(workspace root, database path)`. No root when `--db` is given.
fn locate_store(cli: &Cli) -> bd_claim::Result<(Option<PathBuf>, PathBuf)> {
    if let Some(db) = &cli.db {
        return Ok((None, db.clone()));
    }

    let start = match &cli.workspace {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };
    let root = BeadsWorkspace.find_workspace_root(&start)?;
    let db = BeadsWorkspace.find_store_path(&root)?;
    Ok((Some(root), db))
}

fn apply_flags(config: &mut Config, cli: &Cli) -> bd_claim::Result<()> {
    if let Some(ms) = cli.timeout_ms {
        config.busy_timeout_ms = ms;
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.clone();
    }
    if cli.skip_version_check {
        config.skip_version_check = true;
    }
    config.validate()
}

fn build_filters(cli: &Cli) -> ClaimFilters {
    ClaimFilters {
        only_unassigned: cli.only_unassigned,
        include_labels: cli.labels.iter().cloned().collect(),
        exclude_labels: cli.exclude_labels.iter().cloned().collect(),
        min_priority: cli.min_priority.map(Priority::new),
    }
}

fn emit(cli: &Cli, result: &ClaimResult) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();

    if cli.human {
        stdout.write_all(result.render_human().as_bytes())?;
    } else {
        let doc = if cli.pretty {
            serde_json::to_string_pretty(result)
        } else {
            serde_json::to_string(result)
        }
        .context("failed to serialize result")?;
        writeln!(stdout, "{doc}")?;
    }

    stdout.flush().context("failed to write result")?;
    Ok(())
}
