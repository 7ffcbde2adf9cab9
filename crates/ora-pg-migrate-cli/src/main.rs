//! ora-pg-migrate CLI - Oracle to PostgreSQL schema and data migration.

use clap::{Parser, Subcommand};
use ora_pg_migrate::{
    Config, ErrorKind, MigrateError, MigrationPlan, MigrationReport, Orchestrator, RunMode, TableStatus,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "ora-pg-migrate")]
#[command(about = "Oracle to PostgreSQL schema and data migration")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Path to checkpoint file for resume capability
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    /// Timeout in seconds for graceful shutdown (default: 60)
    #[arg(long, default_value = "60")]
    shutdown_timeout: u64,

    /// Print progress updates as JSON lines to stderr
    #[arg(long)]
    progress: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the dependency-ordered migration plan without changing anything
    Plan {
        /// Override source schema
        #[arg(long)]
        source_schema: Option<String>,
    },

    /// Start a new migration
    Run {
        /// Phases to run: schema-only, data-only or full [default: from config]
        #[arg(long)]
        mode: Option<RunMode>,

        /// Override source schema
        #[arg(long)]
        source_schema: Option<String>,

        /// Override target schema
        #[arg(long)]
        target_schema: Option<String>,

        /// Override number of tables loaded in parallel
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Resume a previously interrupted migration
    Resume {
        /// Phases to run: schema-only, data-only or full [default: from config]
        #[arg(long)]
        mode: Option<RunMode>,

        /// Override source schema
        #[arg(long)]
        source_schema: Option<String>,

        /// Override target schema
        #[arg(long)]
        target_schema: Option<String>,

        /// Override number of tables loaded in parallel
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Validate row counts and sampled row hashes between source and target
    Validate,

    /// Test database connections
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

fn apply_overrides(
    config: &mut Config,
    source_schema: Option<String>,
    target_schema: Option<String>,
    workers: Option<usize>,
) {
    if let Some(schema) = source_schema {
        config.source.schema = schema;
    }
    if let Some(schema) = target_schema {
        config.target.schema = schema;
    }
    if let Some(w) = workers {
        config.migration.parallelism = Some(w);
    }
}

async fn run() -> Result<u8, MigrateError> {
    let cli = Cli::parse();

    // Setup logging
    setup_logging(&cli.verbosity, &cli.log_format).map_err(MigrateError::Config)?;

    let mut config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    // Setup signal handling for graceful shutdown (SIGINT and SIGTERM)
    let cancel_token = setup_signal_handler(cli.shutdown_timeout).await?;

    match cli.command {
        Commands::Plan { source_schema } => {
            apply_overrides(&mut config, source_schema, None, None);
            let schema = config.source.schema.clone();
            let orchestrator = Orchestrator::connect(config).await?;
            let plan = orchestrator.build_plan(&schema).await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&plan)?);
            } else {
                print_plan(&plan);
            }
            Ok(0)
        }

        Commands::Run {
            mode,
            source_schema,
            target_schema,
            workers,
        } => {
            apply_overrides(&mut config, source_schema, target_schema, workers);
            let config = config.with_auto_tuning();
            let mode = mode.unwrap_or(config.migration.mode);
            let schema = config.source.schema.clone();

            let mut orchestrator = Orchestrator::connect(config).await?.with_cancel(cancel_token.clone());
            if let Some(ref path) = cli.state_file {
                orchestrator = orchestrator.with_state_file(path.clone())?;
            }
            if cli.progress {
                spawn_progress_reporter(&orchestrator, cancel_token.clone());
            }

            let mut plan = orchestrator.build_plan(&schema).await?;
            let report = orchestrator.run(&mut plan, mode).await?;
            cancel_token.cancel();
            print_report(&report, cli.output_json, "Migration completed")?;
            Ok(report.exit_code())
        }

        Commands::Resume {
            mode,
            source_schema,
            target_schema,
            workers,
        } => {
            // State file is required for resume
            let state_file = cli.state_file.ok_or_else(|| {
                MigrateError::Config("--state-file is required for resume".to_string())
            })?;

            // Verify state file exists
            if !state_file.exists() {
                return Err(MigrateError::Config(format!(
                    "State file not found: {:?}",
                    state_file
                )));
            }

            apply_overrides(&mut config, source_schema, target_schema, workers);
            let config = config.with_auto_tuning();
            let mode = mode.unwrap_or(config.migration.mode);
            let schema = config.source.schema.clone();

            let orchestrator = Orchestrator::connect(config)
                .await?
                .with_cancel(cancel_token.clone())
                .with_state_file(state_file)?;
            if cli.progress {
                spawn_progress_reporter(&orchestrator, cancel_token.clone());
            }

            info!("Resuming from previous state");
            let mut plan = orchestrator.build_plan(&schema).await?;
            let report = orchestrator.resume(&mut plan, mode).await?;
            cancel_token.cancel();
            print_report(&report, cli.output_json, "Migration resumed and completed")?;
            Ok(report.exit_code())
        }

        Commands::Validate => {
            let schema = config.source.schema.clone();
            let orchestrator = Orchestrator::connect(config).await?;
            let mut plan = orchestrator.build_plan(&schema).await?;
            let report = orchestrator.validate(&mut plan).await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Validation Results:");
                for table in &report.tables {
                    let verdict = if table.passed() { "OK" } else { "MISMATCH" };
                    println!(
                        "  {}: {} (source: {}, target: {}, sampled: {})",
                        table.table, verdict, table.source_count, table.target_count, table.sampled
                    );
                    if let Some(e) = table.to_error() {
                        println!("    {}", e);
                    }
                }
                println!(
                    "\n  Passed: {}, Failed: {}",
                    report.tables_passed, report.tables_failed
                );
            }

            if report.is_success() {
                Ok(0)
            } else {
                Ok(ErrorKind::ValidationMismatch.exit_code())
            }
        }

        Commands::HealthCheck => {
            let orchestrator = Orchestrator::connect(config).await?;
            let result = orchestrator.health_check().await?;

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  Source (Oracle): {} ({}ms)",
                    if result.source_connected { "OK" } else { "FAILED" },
                    result.source_latency_ms
                );
                if let Some(ref err) = result.source_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "  Target (PostgreSQL): {} ({}ms)",
                    if result.target_connected { "OK" } else { "FAILED" },
                    result.target_latency_ms
                );
                if let Some(ref err) = result.target_error {
                    println!("    Error: {}", err);
                }
                println!(
                    "\n  Overall: {}",
                    if result.healthy { "HEALTHY" } else { "UNHEALTHY" }
                );
            }

            if !result.healthy {
                return Err(MigrateError::connectivity("health check", "Health check failed"));
            }
            Ok(0)
        }
    }
}

fn print_plan(plan: &MigrationPlan) {
    println!("Migration plan for schema {}:", plan.source_schema);
    for (level, names) in plan.levels.iter().enumerate() {
        println!("  Level {}:", level);
        for name in names {
            let rows = plan.table(name).map(|t| t.row_count).unwrap_or(0);
            let deps = plan.dependencies(name);
            if deps.is_empty() {
                println!("    {} (~{} rows)", name, rows);
            } else {
                println!("    {} (~{} rows, after {})", name, rows, deps.join(", "));
            }
        }
    }
    let deferred: Vec<_> = plan.deferred_edges().collect();
    if !deferred.is_empty() {
        println!("  Foreign keys added after the data load:");
        for edge in deferred {
            println!("    {}.{} -> {}", edge.from, edge.constraint, edge.to);
        }
    }
    for external in &plan.external {
        println!(
            "  Skipped foreign key {}.{} (references {}, not migrated)",
            external.table, external.constraint, external.referenced
        );
    }
}

fn print_report(report: &MigrationReport, json: bool, headline: &str) -> Result<(), MigrateError> {
    if json {
        println!("{}", report.to_json()?);
        return Ok(());
    }

    let headline = if report.cancelled { "Migration interrupted" } else { headline };
    println!("\n{} ({})", headline, report.outcome);
    println!("  Run ID: {}", report.run_id);
    println!("  Mode: {}", report.mode);
    println!("  Duration: {:.2}s", report.duration_seconds);
    println!("  Tables: {}/{}", report.tables_succeeded, report.tables_total);
    println!("  Rows: {}", report.rows_migrated);
    println!("  Throughput: {} rows/sec", report.rows_per_second);
    for table in report.tables.iter().filter(|t| t.status == TableStatus::Failed) {
        if let Some(ref err) = table.error {
            println!("  Failed: {} [{}] {}", table.table, err.kind, err.message);
        }
    }
    if let Some(ref fatal) = report.fatal_error {
        println!("  Aborted: [{}] {}", fatal.kind, fatal.message);
    }
    Ok(())
}

/// Print the shared row counter every few seconds until `done` fires.
fn spawn_progress_reporter(orchestrator: &Orchestrator, done: CancellationToken) {
    let counter = orchestrator.progress_counter();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        loop {
            tokio::select! {
                _ = done.cancelled() => break,
                _ = interval.tick() => {
                    eprintln!("{{\"rows_migrated\":{}}}", counter.load(Ordering::Relaxed));
                }
            }
        }
    });
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Logs go to stderr so --output-json stays parseable
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM (Kubernetes/Airflow shutdown).
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
async fn setup_signal_handler(shutdown_timeout: u64) -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token = cancel_token.clone();
    tokio::spawn(async move {
        let name = tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        };
        eprintln!(
            "\nReceived {}. Finishing in-flight batches (timeout: {}s)...",
            name, shutdown_timeout
        );
        token.cancel();
        tokio::time::sleep(Duration::from_secs(shutdown_timeout)).await;
        eprintln!("Shutdown timeout elapsed, exiting");
        std::process::exit(130);
    });

    Ok(cancel_token)
}

/// Setup signal handler for Windows (only SIGINT/Ctrl-C)
#[cfg(not(unix))]
async fn setup_signal_handler(shutdown_timeout: u64) -> Result<CancellationToken, MigrateError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Finishing in-flight batches...");
            token.cancel();
            tokio::time::sleep(Duration::from_secs(shutdown_timeout)).await;
            std::process::exit(130);
        }
    });

    Ok(cancel_token)
}
