//! Migration orchestrator - main workflow coordinator.
//!
//! A run walks the plan in phases: target schema and tables, data level by
//! level, deferred foreign keys, then validation. Per-table status lives in
//! the [`MigrationPlan`] and is only changed here, as worker results are
//! collected.

mod report;

pub use report::{MigrationReport, RunOutcome, TableReport};

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use crate::config::RunMode;
use crate::config::Config;
use crate::core::{SourceReader, TargetWriter};
use crate::ddl::SchemaConverter;
#[cfg(feature = "oracle")]
use crate::drivers::OracleSource;
use crate::drivers::PgTarget;
use crate::error::{MigrateError, Result};
use crate::introspect::{SchemaIntrospector, TableFilter};
use crate::planner::{DependencyEdge, DependencyPlanner, MigrationPlan, TableStatus};
use crate::state::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
use crate::transfer::{with_timeout, BatchSpec, DataMigrator, RetryPolicy};
use crate::typemap::TypeMapper;
use crate::verify::{ValidationEngine, ValidationOptions, ValidationReport};

/// Migration orchestrator.
pub struct Orchestrator {
    config: Config,
    source: Arc<dyn SourceReader>,
    target: Arc<dyn TargetWriter>,
    store: Arc<dyn CheckpointStore>,
    mapper: TypeMapper,
    cancel: CancellationToken,
    progress: Arc<AtomicU64>,
}

/// Result of a connectivity check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub source_connected: bool,
    pub source_latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_error: Option<String>,
    pub target_connected: bool,
    pub target_latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_error: Option<String>,
    pub healthy: bool,
}

fn is_loaded(status: TableStatus) -> bool {
    matches!(status, TableStatus::DataLoaded | TableStatus::Validated)
}

impl Orchestrator {
    /// Create an orchestrator over existing source and target handles.
    pub fn new(config: Config, source: Arc<dyn SourceReader>, target: Arc<dyn TargetWriter>) -> Self {
        let mapper = TypeMapper::from_config(&config.migration);
        Self {
            config,
            source,
            target,
            store: Arc::new(MemoryCheckpointStore::new()),
            mapper,
            cancel: CancellationToken::new(),
            progress: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Connect to the configured Oracle source and PostgreSQL target.
    pub async fn connect(config: Config) -> Result<Self> {
        let source = Self::connect_source(&config).await?;
        let max_conns = config.migration.get_max_target_connections();
        let target = PgTarget::new(&config.target, max_conns).await?;
        Ok(Self::new(config, source, Arc::new(target)))
    }

    #[cfg(feature = "oracle")]
    async fn connect_source(config: &Config) -> Result<Arc<dyn SourceReader>> {
        Ok(Arc::new(OracleSource::new(&config.source).await?))
    }

    #[cfg(not(feature = "oracle"))]
    async fn connect_source(_config: &Config) -> Result<Arc<dyn SourceReader>> {
        Err(MigrateError::Config(
            "this build has no Oracle driver; rebuild with `--features oracle`".to_string(),
        ))
    }

    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = store;
        self
    }

    /// Keep checkpoints in a signed JSON file so a later process can resume.
    pub fn with_state_file(self, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        info!("Checkpoints: {:?}", path);
        let store = FileCheckpointStore::open(path, self.config.hash())?;
        Ok(self.with_checkpoint_store(Arc::new(store)))
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Rows committed so far in the current run, updated by every worker.
    pub fn progress_counter(&self) -> Arc<AtomicU64> {
        self.progress.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.config.migration.operation_timeout_secs)
    }

    fn target_schema(&self) -> &str {
        &self.config.target.schema
    }

    fn converter(&self) -> SchemaConverter {
        SchemaConverter::new(self.mapper.clone(), self.target_schema())
            .with_indexes(self.config.migration.create_indexes)
    }

    fn validation_engine(&self) -> ValidationEngine {
        let m = &self.config.migration;
        ValidationEngine::new(
            self.source.clone(),
            self.target.clone(),
            self.mapper.clone(),
            self.target_schema(),
        )
        .with_options(ValidationOptions {
            sample_size: m.validation_sample_size,
            max_mismatches: m.validation_max_mismatches,
            seed: m.validation_seed,
            timeout: self.operation_timeout(),
        })
    }

    /// Check that both databases answer.
    pub async fn health_check(&self) -> Result<HealthCheckResult> {
        let timeout = self.operation_timeout();

        let start = Instant::now();
        let schema = &self.config.source.schema;
        let (source_connected, source_error) =
            match with_timeout(timeout, "source health check", self.source.schema_exists(schema)).await {
                Ok(true) => (true, None),
                Ok(false) => (false, Some(format!("schema {} does not exist", schema))),
                Err(e) => (false, Some(e.to_string())),
            };
        let source_latency_ms = start.elapsed().as_millis() as u64;

        let start = Instant::now();
        let (target_connected, target_error) =
            match with_timeout(timeout, "target health check", self.target.acquire()).await {
                Ok(_) => (true, None),
                Err(e) => (false, Some(e.to_string())),
            };
        let target_latency_ms = start.elapsed().as_millis() as u64;

        Ok(HealthCheckResult {
            source_connected,
            source_latency_ms,
            source_error,
            target_connected,
            target_latency_ms,
            target_error,
            healthy: source_connected && target_connected,
        })
    }

    /// Introspect `schema` and order its tables for loading.
    pub async fn build_plan(&self, schema: &str) -> Result<MigrationPlan> {
        info!("Extracting schema {} from {} source", schema, self.source.db_type());
        let introspector = SchemaIntrospector::new(
            self.source.clone(),
            TableFilter::from_config(&self.config.migration),
        )
        .with_timeout(self.operation_timeout());
        let tables = introspector.describe_schema(schema).await?;
        info!("Found {} tables to migrate", tables.len());

        let plan = DependencyPlanner::new().plan(schema, tables)?;
        info!(
            "Planned {} tables in {} levels ({} deferred foreign keys)",
            plan.tables.len(),
            plan.levels.len(),
            plan.deferred_edges().count()
        );
        Ok(plan)
    }

    /// Start a fresh run, discarding any stored checkpoints.
    pub async fn run(&self, plan: &mut MigrationPlan, mode: RunMode) -> Result<MigrationReport> {
        let run_id = uuid::Uuid::new_v4().to_string();
        info!("Starting migration run: {} (mode: {})", run_id, mode);
        self.store.reset(&run_id).await?;
        Ok(self.execute(plan, mode, run_id, false).await)
    }

    /// Continue the run recorded in the checkpoint store. Finished tables are
    /// skipped and in-progress tables continue after their last committed batch.
    pub async fn resume(&self, plan: &mut MigrationPlan, mode: RunMode) -> Result<MigrationReport> {
        self.store.ensure_resumable().await?;
        let Some(run_id) = self.store.run_id().await? else {
            warn!("No checkpoints found, starting a fresh run");
            return self.run(plan, mode).await;
        };
        info!(
            "Resuming migration run: {} (mode: {}, {} checkpoints)",
            run_id,
            mode,
            self.store.backend_type()
        );
        Ok(self.execute(plan, mode, run_id, true).await)
    }

    /// Compare source and target for every table that has not failed.
    /// Tables in DATA_LOADED move to VALIDATED or FAILED.
    pub async fn validate(&self, plan: &mut MigrationPlan) -> Result<ValidationReport> {
        let tables: Vec<_> = plan
            .tables
            .iter()
            .filter(|t| plan.status(&t.name) != TableStatus::Failed)
            .cloned()
            .collect();
        info!("Validating {} tables", tables.len());

        let report = self.validation_engine().validate_all(&tables).await;
        for result in &report.tables {
            if result.passed() {
                info!("{}: {} rows (match)", result.table, result.source_count);
            } else {
                warn!(
                    "{}: MISMATCH (source: {}, target: {}, {} sampled rows differ)",
                    result.table, result.source_count, result.target_count, result.mismatches
                );
            }

            if plan.status(&result.table) != TableStatus::DataLoaded {
                continue;
            }
            match result.to_error() {
                None => plan.transition(&result.table, TableStatus::Validated)?,
                Some(e) => plan.fail(&result.table, &e),
            }
        }
        Ok(report)
    }

    async fn execute(
        &self,
        plan: &mut MigrationPlan,
        mode: RunMode,
        run_id: String,
        resumed: bool,
    ) -> MigrationReport {
        plan.reset_progress();
        self.progress.store(0, Ordering::Relaxed);
        let mut report = MigrationReport::start(run_id, mode, resumed);

        if let Err(e) = self.execute_phases(plan, mode, resumed, &mut report).await {
            error!("Migration aborted: {}", e);
            for name in plan.table_names().map(String::from).collect::<Vec<_>>() {
                if !is_loaded(plan.status(&name)) {
                    plan.fail(&name, &e);
                }
            }
            report.set_fatal(&e);
        }

        let report = report.finish(plan, self.config.migration.validate_after_load);
        info!(
            "Migration {}: {}/{} tables, {} rows in {:.1}s ({} rows/sec)",
            report.outcome,
            report.tables_succeeded,
            report.tables_total,
            report.rows_migrated,
            report.duration_seconds,
            report.rows_per_second
        );
        if !report.failed_tables().is_empty() {
            warn!("Failed tables: {:?}", report.failed_tables());
        }
        report
    }

    /// Returns `Err` only for errors that end the whole run; table-level
    /// failures are recorded in the plan.
    async fn execute_phases(
        &self,
        plan: &mut MigrationPlan,
        mode: RunMode,
        resumed: bool,
        report: &mut MigrationReport,
    ) -> Result<()> {
        let converter = self.converter();

        if mode.creates_schema() {
            info!("Phase 1: Creating target schema {}", self.target_schema());
            self.create_tables(plan, &converter).await?;
        }
        if !mode.loads_data() {
            // empty tables take the deferred keys right away
            info!("Phase 2: Adding deferred foreign keys");
            return self
                .add_deferred_constraints(plan, &converter, |s| s == TableStatus::SchemaCreated)
                .await;
        }
        if self.cancel.is_cancelled() {
            report.cancelled = true;
            return Ok(());
        }

        info!("Phase 2: Transferring data");
        self.prepare_tables(plan, mode, resumed).await?;
        if self.load_levels(plan).await? {
            info!("Cancellation requested, interrupted tables keep their checkpoints");
            report.cancelled = true;
            return Ok(());
        }

        info!("Phase 3: Finalizing (deferred foreign keys)");
        self.add_deferred_constraints(plan, &converter, is_loaded).await?;

        if self.config.migration.validate_after_load {
            info!("Phase 4: Validating");
            report.validation = Some(self.validate(plan).await?);
        }
        Ok(())
    }

    async fn create_tables(&self, plan: &mut MigrationPlan, converter: &SchemaConverter) -> Result<()> {
        let script = converter.emit_create_statements(plan)?;
        for (table, e) in &script.rejected {
            plan.fail(table, e);
        }

        let timeout = self.operation_timeout();
        let mut session = with_timeout(timeout, "acquire target session", self.target.acquire()).await?;
        for statement in script.statements.iter().filter(|s| s.table.is_none()) {
            with_timeout(timeout, "create schema", session.execute_ddl(&statement.sql)).await?;
        }

        let names: Vec<String> = plan.table_names().map(String::from).collect();
        for name in names {
            if plan.status(&name) == TableStatus::Failed {
                continue;
            }
            let failed_dep = plan
                .dependencies(&name)
                .into_iter()
                .find(|d| plan.status(d) == TableStatus::Failed)
                .map(String::from);
            if let Some(dependency) = failed_dep {
                let e = MigrateError::DependencyFailed {
                    table: name.clone(),
                    dependency,
                };
                warn!("{}", e);
                plan.fail(&name, &e);
                continue;
            }

            let mut created = 0;
            let mut outcome = Ok(());
            for statement in script.for_table(&name) {
                debug!("{}: {}", name, statement.sql);
                outcome = with_timeout(timeout, "create table", session.execute_ddl(&statement.sql)).await;
                if outcome.is_err() {
                    break;
                }
                created += 1;
            }
            match outcome {
                Ok(()) => {
                    plan.transition(&name, TableStatus::SchemaCreated)?;
                    info!("{}: created ({} statements)", name, created);
                }
                Err(e) if e.is_fatal_for_run() => return Err(e),
                Err(e) => {
                    error!("{}: schema creation failed: {}", name, e);
                    plan.fail(&name, &e);
                }
            }
        }
        Ok(())
    }

    /// Data-only runs need existing tables; truncation empties them
    /// children first and forgets their checkpoints.
    async fn prepare_tables(&self, plan: &mut MigrationPlan, mode: RunMode, resumed: bool) -> Result<()> {
        let truncate = self.config.migration.truncate_before_load;
        if mode != RunMode::DataOnly && !truncate {
            return Ok(());
        }

        let timeout = self.operation_timeout();
        let schema = self.target_schema().to_string();
        let mut session = with_timeout(timeout, "acquire target session", self.target.acquire()).await?;

        if mode == RunMode::DataOnly {
            let names: Vec<String> = plan.table_names().map(String::from).collect();
            for name in names {
                if plan.status(&name) == TableStatus::Failed {
                    continue;
                }
                if !with_timeout(timeout, "check target table", session.table_exists(&schema, &name)).await? {
                    let e = MigrateError::State(format!(
                        "target table {}.{} does not exist; create the schema first",
                        schema, name
                    ));
                    warn!("{}: {}", name, e);
                    plan.fail(&name, &e);
                }
            }
        }

        if truncate && resumed {
            info!("Resuming: truncate_before_load ignored so checkpoints stay valid");
        } else if truncate {
            for level in plan.levels.iter().rev() {
                for name in level {
                    if plan.status(name) == TableStatus::Failed {
                        continue;
                    }
                    with_timeout(timeout, "truncate", session.truncate(&schema, name)).await?;
                    self.store.clear(name).await?;
                    info!("{}: truncated", name);
                }
            }
        }
        Ok(())
    }

    /// Load every level in order. Returns whether the run was cancelled.
    async fn load_levels(&self, plan: &mut MigrationPlan) -> Result<bool> {
        let m = &self.config.migration;
        let workers = m.get_parallelism().max(1);
        let semaphore = Arc::new(Semaphore::new(workers));
        let migrator = DataMigrator::new(
            self.source.clone(),
            self.target.clone(),
            self.mapper.clone(),
            self.store.clone(),
        )
        .with_retry(RetryPolicy::from_config(m))
        .with_timeout(self.operation_timeout())
        .with_cancel(self.cancel.clone())
        .with_progress_counter(self.progress.clone());
        let spec = BatchSpec {
            batch_size: m.batch_size,
            target_schema: self.target_schema().to_string(),
        };

        info!(
            "Loading {} tables in {} levels with {} workers",
            plan.tables.len(),
            plan.levels.len(),
            workers
        );

        let levels = plan.levels.clone();
        let mut cancelled = false;
        for (level_idx, level) in levels.iter().enumerate() {
            if self.cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            debug!("Level {}: {:?}", level_idx, level);

            let mut handles = Vec::new();
            for name in level {
                if self.cancel.is_cancelled() {
                    cancelled = true;
                    break;
                }
                if plan.status(name) == TableStatus::Failed {
                    continue;
                }
                let unmet = plan
                    .dependencies(name)
                    .into_iter()
                    .find(|d| !is_loaded(plan.status(d)))
                    .map(String::from);
                if let Some(dependency) = unmet {
                    let e = MigrateError::DependencyFailed {
                        table: name.clone(),
                        dependency,
                    };
                    warn!("{}", e);
                    plan.fail(name, &e);
                    continue;
                }

                if self.store.is_completed(name).await? {
                    let rows = self.target_row_count(name).await?;
                    plan.transition(name, TableStatus::DataLoading)?;
                    plan.transition(name, TableStatus::DataLoaded)?;
                    plan.set_rows(name, rows);
                    info!("{}: already loaded ({} rows), skipping", name, rows);
                    continue;
                }

                let Some(table) = plan.table(name).cloned() else {
                    continue;
                };
                plan.transition(name, TableStatus::DataLoading)?;

                let permit = semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| MigrateError::State("worker pool closed".to_string()))?;
                let migrator = migrator.clone();
                let spec = spec.clone();
                let handle = tokio::spawn(async move {
                    let _permit = permit;
                    migrator.migrate_table(&table, &spec).await
                });
                handles.push((name.clone(), handle));
            }

            let mut fatal = None;
            for (name, handle) in handles {
                match handle.await {
                    Ok(Ok(outcome)) => {
                        plan.set_rows(&name, outcome.rows_migrated);
                        plan.transition(&name, TableStatus::DataLoaded)?;
                        info!(
                            "{}: completed ({} rows, {} batches, {} retries)",
                            name, outcome.rows_migrated, outcome.batches, outcome.retries
                        );
                    }
                    Ok(Err(MigrateError::Cancelled)) => {
                        if let Some(cp) = self.store.load(&name).await? {
                            plan.set_rows(&name, cp.rows_migrated);
                        }
                        info!("{}: interrupted", name);
                        cancelled = true;
                    }
                    Ok(Err(e)) => {
                        error!("{}: failed: {}", name, e);
                        plan.fail(&name, &e);
                        if e.is_fatal_for_run() && fatal.is_none() {
                            fatal = Some(e);
                        }
                    }
                    Err(e) => {
                        let e = MigrateError::State(format!("worker for {} panicked: {}", name, e));
                        error!("{}", e);
                        plan.fail(&name, &e);
                    }
                }
            }

            if let Some(e) = fatal {
                return Err(e);
            }
            if cancelled {
                break;
            }
        }

        info!(
            "Transferred {} rows this run",
            self.progress.load(Ordering::Relaxed)
        );
        Ok(cancelled)
    }

    async fn target_row_count(&self, table: &str) -> Result<u64> {
        let timeout = self.operation_timeout();
        let mut session = with_timeout(timeout, "acquire target session", self.target.acquire()).await?;
        let count = with_timeout(
            timeout,
            "count target rows",
            session.row_count(self.target_schema(), table),
        )
        .await?;
        Ok(count.max(0) as u64)
    }

    /// Phase 2 DDL for every deferred edge whose two tables are `ready`.
    async fn add_deferred_constraints(
        &self,
        plan: &mut MigrationPlan,
        converter: &SchemaConverter,
        ready: fn(TableStatus) -> bool,
    ) -> Result<()> {
        let edges: Vec<DependencyEdge> = plan.deferred_edges().cloned().collect();
        if edges.is_empty() {
            return Ok(());
        }

        let timeout = self.operation_timeout();
        let mut session = with_timeout(timeout, "acquire target session", self.target.acquire()).await?;
        for edge in edges {
            if !ready(plan.status(&edge.from)) || !ready(plan.status(&edge.to)) {
                debug!(
                    "{}: skipping foreign key {} ({} -> {} not ready)",
                    edge.from, edge.constraint, edge.from, edge.to
                );
                continue;
            }
            let result = match converter.emit_deferred_constraint(plan, &edge) {
                Ok(statement) => {
                    with_timeout(timeout, "add foreign key", session.execute_ddl(&statement.sql)).await
                }
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => info!("{}: foreign key {} created", edge.from, edge.constraint),
                Err(e) if e.is_fatal_for_run() => return Err(e),
                Err(e) => {
                    error!("{}: foreign key {} failed: {}", edge.from, edge.constraint, e);
                    plan.fail(&edge.from, &e);
                }
            }
        }
        Ok(())
    }
}
