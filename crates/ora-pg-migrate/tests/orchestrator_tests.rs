//! End-to-end runs of the orchestrator against the in-memory drivers.

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use ora_pg_migrate::core::SqlValue;
use ora_pg_migrate::drivers::{MemorySource, MemoryTarget, TargetEvent};
use ora_pg_migrate::state::{BatchCheckpoint, Cursor};
use ora_pg_migrate::{
    CheckpointStore, ErrorKind, FileCheckpointStore, MemoryCheckpointStore, RunMode, RunOutcome,
    TableStatus,
};
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

fn commit_positions(events: &[TargetEvent], table: &str) -> Vec<usize> {
    events
        .iter()
        .enumerate()
        .filter(|(_, e)| matches!(e, TargetEvent::Commit { table: t, .. } if t == table))
        .map(|(i, _)| i)
        .collect()
}

#[tokio::test]
async fn test_end_to_end_sales_schema() {
    let source = sales_source();
    let target = Arc::new(MemoryTarget::new());
    let orch = orchestrator(config(""), source, target.clone());

    let mut plan = orch.build_plan(SCHEMA).await.unwrap();
    let report = orch.run(&mut plan, RunMode::Full).await.unwrap();

    assert_eq!(report.outcome, RunOutcome::Success, "{}", report.to_json().unwrap());
    assert_eq!(report.tables_total, 6);
    for (table, count) in SALES_COUNTS {
        assert_eq!(target.row_count_of(TARGET_SCHEMA, table), count, "{}", table);
        let t = report.table(table).unwrap();
        assert_eq!(t.status, TableStatus::Validated, "{}", table);
        assert_eq!(t.rows_migrated, count as u64);
    }
    assert_eq!(report.rows_migrated, 49);

    let validation = report.validation.as_ref().unwrap();
    assert_eq!(validation.tables_failed, 0);
    assert!(validation.tables.iter().all(|t| t.mismatches == 0));
    assert_eq!(report.exit_code(), 0);
}

#[tokio::test]
async fn test_parents_load_before_children() {
    let target = Arc::new(MemoryTarget::new());
    let orch = orchestrator(config(""), sales_source(), target.clone());
    let mut plan = orch.build_plan(SCHEMA).await.unwrap();

    assert_eq!(plan.levels[0], vec!["CUSTOMER", "DEPARTMENT", "PRODUCT"]);
    assert_eq!(plan.levels[1], vec!["EMPLOYEE", "ORDER"]);
    assert_eq!(plan.levels[2], vec!["ORDER_ITEM"]);

    orch.run(&mut plan, RunMode::Full).await.unwrap();
    let events = target.events();
    for (parent, child) in [
        ("DEPARTMENT", "EMPLOYEE"),
        ("CUSTOMER", "ORDER"),
        ("ORDER", "ORDER_ITEM"),
        ("PRODUCT", "ORDER_ITEM"),
    ] {
        let last_parent = *commit_positions(&events, parent).last().unwrap();
        let first_child = commit_positions(&events, child)[0];
        assert!(last_parent < first_child, "{} must finish before {}", parent, child);
    }
}

#[tokio::test]
async fn test_level_parallelism_is_bounded_and_overlaps() {
    for parallelism in [1, 2, 3] {
        let mut cfg = config("");
        cfg.migration.parallelism = Some(parallelism);
        let target = Arc::new(MemoryTarget::new());
        target.set_write_latency(Duration::from_millis(5));
        let orch = orchestrator(cfg, sales_source(), target.clone());

        let mut plan = orch.build_plan(SCHEMA).await.unwrap();
        let report = orch.run(&mut plan, RunMode::Full).await.unwrap();
        assert!(report.is_success());

        // the first level has three tables, so every worker gets one
        assert_eq!(target.max_concurrent_transactions(), parallelism, "parallelism {}", parallelism);
    }
}

#[tokio::test]
async fn test_self_reference_added_after_load() {
    let target = Arc::new(MemoryTarget::new());
    let orch = orchestrator(config(""), sales_source(), target.clone());
    let mut plan = orch.build_plan(SCHEMA).await.unwrap();
    assert_eq!(plan.deferred_edges().count(), 1);

    let report = orch.run(&mut plan, RunMode::Full).await.unwrap();
    assert!(report.is_success());

    let events = target.events();
    let create = events
        .iter()
        .find_map(|e| match e {
            TargetEvent::Ddl(sql) if sql.starts_with("CREATE TABLE IF NOT EXISTS \"public\".\"EMPLOYEE\"") => {
                Some(sql.clone())
            }
            _ => None,
        })
        .unwrap();
    assert!(create.contains("employee_emp_dept_fk"));
    assert!(!create.contains("employee_emp_mgr_fk"));

    let fk_position = events
        .iter()
        .position(|e| matches!(e, TargetEvent::Ddl(sql) if sql.contains("employee_emp_mgr_fk")))
        .unwrap();
    let last_load = *commit_positions(&events, "EMPLOYEE").last().unwrap();
    assert!(fk_position > last_load);
}

#[tokio::test]
async fn test_number_5_2_keeps_value() {
    let target = Arc::new(MemoryTarget::new());
    let orch = orchestrator(config(""), sales_source(), target.clone());
    let mut plan = orch.build_plan(SCHEMA).await.unwrap();
    orch.run(&mut plan, RunMode::Full).await.unwrap();

    let create = target
        .events()
        .into_iter()
        .find_map(|e| match e {
            TargetEvent::Ddl(sql) if sql.starts_with("CREATE TABLE IF NOT EXISTS \"public\".\"PRODUCT\"") => {
                Some(sql)
            }
            _ => None,
        })
        .unwrap();
    assert!(create.contains("\"PRICE\" numeric(5,2)"));
    assert!(create.contains("\"ACTIVE\" boolean"));

    let rows = target.rows_of(TARGET_SCHEMA, "PRODUCT");
    let first = rows.iter().find(|r| r[0] == SqlValue::I64(1)).unwrap();
    assert_eq!(first[2], SqlValue::Decimal(Decimal::new(12345, 2)));
    assert_eq!(first[3], SqlValue::Bool(true));
}

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let target = Arc::new(MemoryTarget::new());
    target.fail_next_inserts("PRODUCT", 2);
    let orch = orchestrator(config("  max_retries: 3"), sales_source(), target.clone());
    let mut plan = orch.build_plan(SCHEMA).await.unwrap();

    let report = orch.run(&mut plan, RunMode::Full).await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.table("PRODUCT").unwrap().status, TableStatus::Validated);

    let keys: BTreeSet<String> = target
        .rows_of(TARGET_SCHEMA, "PRODUCT")
        .iter()
        .map(|r| format!("{:?}", r[0]))
        .collect();
    assert_eq!(keys.len(), 8);
    assert_eq!(target.row_count_of(TARGET_SCHEMA, "PRODUCT"), 8);
}

#[tokio::test]
async fn test_exhausted_retries_fail_table_and_dependents() {
    let target = Arc::new(MemoryTarget::new());
    target.fail_next_inserts("CUSTOMER", 100);
    let orch = orchestrator(config("  max_retries: 2"), sales_source(), target.clone());
    let mut plan = orch.build_plan(SCHEMA).await.unwrap();

    let report = orch.run(&mut plan, RunMode::Full).await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Partial);

    let customer = report.table("CUSTOMER").unwrap();
    assert_eq!(customer.status, TableStatus::Failed);
    assert_eq!(customer.error.as_ref().unwrap().kind, ErrorKind::ConstraintViolation);
    for child in ["ORDER", "ORDER_ITEM"] {
        let t = report.table(child).unwrap();
        assert_eq!(t.status, TableStatus::Failed);
        assert_eq!(t.error.as_ref().unwrap().kind, ErrorKind::DependencyFailed);
        assert_eq!(target.row_count_of(TARGET_SCHEMA, child), 0);
    }
    for ok in ["DEPARTMENT", "EMPLOYEE", "PRODUCT"] {
        assert_eq!(report.table(ok).unwrap().status, TableStatus::Validated);
    }
    assert_eq!(report.exit_code(), 6);
}

#[tokio::test]
async fn test_unsupported_type_fails_only_its_table() {
    let source = sales_source();
    let (mut t, rows) = department();
    t.columns.push(ora_pg_migrate::core::ColumnDescriptor::new(
        "LOCATION",
        "SDO_GEOMETRY",
        3,
    ));
    let rows = rows
        .into_iter()
        .map(|mut r| {
            r.push(SqlValue::Null);
            r
        })
        .collect();
    source.add_table(t, rows);

    let target = Arc::new(MemoryTarget::new());
    let orch = orchestrator(config(""), source, target.clone());
    let mut plan = orch.build_plan(SCHEMA).await.unwrap();
    let report = orch.run(&mut plan, RunMode::Full).await.unwrap();

    let dept = report.table("DEPARTMENT").unwrap();
    assert_eq!(dept.status, TableStatus::Failed);
    assert_eq!(dept.error.as_ref().unwrap().kind, ErrorKind::UnsupportedType);
    assert!(!target.has_table(TARGET_SCHEMA, "DEPARTMENT"));

    let emp = report.table("EMPLOYEE").unwrap();
    assert_eq!(emp.error.as_ref().unwrap().kind, ErrorKind::DependencyFailed);
    assert_eq!(report.table("ORDER_ITEM").unwrap().status, TableStatus::Validated);
    assert_eq!(report.outcome, RunOutcome::Partial);
}

#[tokio::test]
async fn test_fallback_type_rescues_unknown_column() {
    let source = sales_source();
    let (mut t, rows) = customer();
    t.columns.push(ora_pg_migrate::core::ColumnDescriptor::new("PROFILE", "XMLTYPE", 4));
    let rows = rows
        .into_iter()
        .map(|mut r| {
            r.push(SqlValue::Text("<p/>".into()));
            r
        })
        .collect();
    source.add_table(t, rows);

    let target = Arc::new(MemoryTarget::new());
    let orch = orchestrator(config("  fallback_type: text"), source, target.clone());
    let mut plan = orch.build_plan(SCHEMA).await.unwrap();
    let report = orch.run(&mut plan, RunMode::Full).await.unwrap();
    assert!(report.is_success());
    assert_eq!(target.row_count_of(TARGET_SCHEMA, "CUSTOMER"), 5);
}

#[tokio::test]
async fn test_resume_from_midpoint_is_exact() {
    let (table, rows) = big_table(1000);
    let source = Arc::new(MemorySource::new(SCHEMA));
    source.add_table(table.clone(), rows.clone());

    let target = Arc::new(MemoryTarget::new());
    target.create_table(TARGET_SCHEMA, "BIG", &table.column_names());
    target.seed_rows(TARGET_SCHEMA, "BIG", rows[..500].to_vec());

    let dir = tempfile::tempdir().unwrap();
    let state_path = dir.path().join("state.json");
    let cfg = config("  batch_size: 100");
    let store = Arc::new(FileCheckpointStore::open(&state_path, cfg.hash()).unwrap());
    store.reset("interrupted-run").await.unwrap();
    store
        .save(BatchCheckpoint::new(
            "BIG",
            Cursor::Key {
                values: vec![SqlValue::I64(500)],
            },
            500,
        ))
        .await
        .unwrap();

    for attempt in 0..3 {
        let store = Arc::new(FileCheckpointStore::open(&state_path, cfg.hash()).unwrap());
        let orch = orchestrator(cfg.clone(), source.clone(), target.clone()).with_checkpoint_store(store);
        let mut plan = orch.build_plan(SCHEMA).await.unwrap();
        let report = orch.resume(&mut plan, RunMode::Full).await.unwrap();

        assert!(report.resumed);
        assert_eq!(report.run_id, "interrupted-run");
        assert_eq!(report.outcome, RunOutcome::Success, "attempt {}", attempt);
        assert_eq!(report.table("BIG").unwrap().rows_migrated, 1000);

        let stored = target.rows_of(TARGET_SCHEMA, "BIG");
        assert_eq!(stored.len(), 1000, "attempt {}", attempt);
        let ids: BTreeSet<i64> = stored.iter().filter_map(|r| r[0].as_i64()).collect();
        assert_eq!(ids, (1..=1000).collect::<BTreeSet<i64>>());
    }
    // only the second half was ever read
    assert_eq!(source.rows_read("BIG"), 500);
}

#[tokio::test]
async fn test_cancelled_run_resumes() {
    let target = Arc::new(MemoryTarget::new());
    let store: Arc<dyn CheckpointStore> = Arc::new(MemoryCheckpointStore::new());
    let source = sales_source();

    let cancel = CancellationToken::new();
    cancel.cancel();
    let orch = orchestrator(config(""), source.clone(), target.clone())
        .with_checkpoint_store(store.clone())
        .with_cancel(cancel);
    let mut plan = orch.build_plan(SCHEMA).await.unwrap();
    let report = orch.run(&mut plan, RunMode::Full).await.unwrap();
    assert!(report.cancelled);
    assert_eq!(report.outcome, RunOutcome::Partial);
    assert_eq!(report.exit_code(), 130);
    assert_eq!(target.row_count_of(TARGET_SCHEMA, "ORDER_ITEM"), 0);

    let orch = orchestrator(config(""), source, target.clone()).with_checkpoint_store(store);
    let mut plan = orch.build_plan(SCHEMA).await.unwrap();
    let report = orch.resume(&mut plan, RunMode::Full).await.unwrap();
    assert!(report.is_success());
    assert_eq!(target.row_count_of(TARGET_SCHEMA, "ORDER_ITEM"), 17);
}

#[tokio::test]
async fn test_unreachable_source_is_fatal() {
    let source = sales_source();
    let target = Arc::new(MemoryTarget::new());
    let orch = orchestrator(config(""), source.clone(), target);
    let mut plan = orch.build_plan(SCHEMA).await.unwrap();

    source.set_unreachable(true);
    let report = orch.run(&mut plan, RunMode::Full).await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Failure);
    assert_eq!(report.fatal_error.as_ref().unwrap().kind, ErrorKind::Connectivity);
    assert_eq!(report.exit_code(), 2);
    assert!(report.tables.iter().all(|t| t.status == TableStatus::Failed));
}

#[tokio::test]
async fn test_missing_schema_is_introspection_error() {
    let orch = orchestrator(config(""), Arc::new(MemorySource::new("OTHER")), Arc::new(MemoryTarget::new()));
    let err = orch.build_plan(SCHEMA).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Introspection);
}

#[tokio::test]
async fn test_schema_only_then_data_only() {
    let target = Arc::new(MemoryTarget::new());
    let orch = orchestrator(config(""), sales_source(), target.clone());

    let mut plan = orch.build_plan(SCHEMA).await.unwrap();
    let report = orch.run(&mut plan, RunMode::SchemaOnly).await.unwrap();
    assert!(report.is_success());
    assert!(report.tables.iter().all(|t| t.status == TableStatus::SchemaCreated));
    assert!(target.events().iter().all(|e| !matches!(e, TargetEvent::Commit { .. })));
    assert!(target
        .events()
        .iter()
        .any(|e| matches!(e, TargetEvent::Ddl(sql) if sql.starts_with("DO $$") && sql.contains("employee_emp_mgr_fk"))));

    let mut plan = orch.build_plan(SCHEMA).await.unwrap();
    let report = orch.run(&mut plan, RunMode::DataOnly).await.unwrap();
    assert!(report.is_success());
    for (table, count) in SALES_COUNTS {
        assert_eq!(target.row_count_of(TARGET_SCHEMA, table), count);
    }
}

#[tokio::test]
async fn test_data_only_needs_tables() {
    let orch = orchestrator(config(""), sales_source(), Arc::new(MemoryTarget::new()));
    let mut plan = orch.build_plan(SCHEMA).await.unwrap();
    let report = orch.run(&mut plan, RunMode::DataOnly).await.unwrap();
    assert_eq!(report.outcome, RunOutcome::Failure);
    assert_eq!(report.tables_failed, 6);
}

#[tokio::test]
async fn test_extra_target_rows_fail_validation() {
    let target = Arc::new(MemoryTarget::new());
    let (product, _) = product();
    target.create_table(TARGET_SCHEMA, "PRODUCT", &product.column_names());
    target.seed_rows(
        TARGET_SCHEMA,
        "PRODUCT",
        vec![vec![
            SqlValue::I64(999),
            SqlValue::Text("stale".into()),
            SqlValue::Decimal(Decimal::new(100, 2)),
            SqlValue::Bool(false),
        ]],
    );

    let orch = orchestrator(config(""), sales_source(), target.clone());
    let mut plan = orch.build_plan(SCHEMA).await.unwrap();
    let report = orch.run(&mut plan, RunMode::Full).await.unwrap();

    let t = report.table("PRODUCT").unwrap();
    assert_eq!(t.status, TableStatus::Failed);
    assert_eq!(t.error.as_ref().unwrap().kind, ErrorKind::ValidationMismatch);
    assert_eq!(report.outcome, RunOutcome::Partial);
    assert_eq!(report.exit_code(), 5);
}

#[tokio::test]
async fn test_truncate_before_load_clears_stale_rows() {
    let target = Arc::new(MemoryTarget::new());
    let (product, _) = product();
    target.create_table(TARGET_SCHEMA, "PRODUCT", &product.column_names());
    target.seed_rows(
        TARGET_SCHEMA,
        "PRODUCT",
        vec![vec![
            SqlValue::I64(999),
            SqlValue::Text("stale".into()),
            SqlValue::Decimal(Decimal::new(100, 2)),
            SqlValue::Bool(false),
        ]],
    );

    let orch = orchestrator(config("  truncate_before_load: true"), sales_source(), target.clone());
    let mut plan = orch.build_plan(SCHEMA).await.unwrap();
    let report = orch.run(&mut plan, RunMode::Full).await.unwrap();
    assert!(report.is_success());
    assert_eq!(target.row_count_of(TARGET_SCHEMA, "PRODUCT"), 8);

    // children are emptied before their parents
    let events = target.events();
    let truncated = |t: &str| {
        events
            .iter()
            .position(|e| matches!(e, TargetEvent::Truncate(n) if n == t))
            .unwrap()
    };
    assert!(truncated("ORDER_ITEM") < truncated("ORDER"));
    assert!(truncated("ORDER") < truncated("CUSTOMER"));
}

#[tokio::test]
async fn test_table_filter_excludes() {
    let cfg = config("  exclude_tables: [\"ORDER*\"]");
    let orch = orchestrator(cfg, sales_source(), Arc::new(MemoryTarget::new()));
    let plan = orch.build_plan(SCHEMA).await.unwrap();
    let names: Vec<&str> = plan.table_names().collect();
    assert_eq!(names.len(), 4);
    assert!(!names.contains(&"ORDER"));
    assert!(!names.contains(&"ORDER_ITEM"));
}

#[tokio::test]
async fn test_standalone_validate_after_run() {
    let target = Arc::new(MemoryTarget::new());
    let orch = orchestrator(config("  validate_after_load: false"), sales_source(), target.clone());
    let mut plan = orch.build_plan(SCHEMA).await.unwrap();
    let report = orch.run(&mut plan, RunMode::Full).await.unwrap();
    assert!(report.is_success());
    assert!(report.validation.is_none());
    assert!(report.tables.iter().all(|t| t.status == TableStatus::DataLoaded));

    let validation = orch.validate(&mut plan).await.unwrap();
    assert!(validation.is_success());
    assert_eq!(validation.tables.len(), 6);
    assert!(plan.table_names().all(|t| plan.status(t) == TableStatus::Validated));

    // corrupt one row and validate again from a fresh plan
    target.with_rows_mut(TARGET_SCHEMA, "CUSTOMER", |rows| {
        rows[0][1] = SqlValue::Text("tampered".into());
    });
    let mut fresh = orch.build_plan(SCHEMA).await.unwrap();
    let validation = orch.validate(&mut fresh).await.unwrap();
    let customer = validation.table("CUSTOMER").unwrap();
    assert!(!customer.passed());
    assert_eq!(customer.mismatches, 1);
}

#[tokio::test]
async fn test_report_json_lists_every_table() {
    let orch = orchestrator(config(""), sales_source(), Arc::new(MemoryTarget::new()));
    let mut plan = orch.build_plan(SCHEMA).await.unwrap();
    let report = orch.run(&mut plan, RunMode::Full).await.unwrap();
    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();

    assert_eq!(json["outcome"], "SUCCESS");
    assert_eq!(json["mode"], "full");
    let tables = json["tables"].as_array().unwrap();
    assert_eq!(tables.len(), 6);
    assert!(tables.iter().all(|t| t["status"] == "VALIDATED"));
}

#[tokio::test]
async fn test_health_check() {
    let source = sales_source();
    let target = Arc::new(MemoryTarget::new());
    let orch = orchestrator(config(""), source.clone(), target.clone());
    assert!(orch.health_check().await.unwrap().healthy);

    target.set_unreachable(true);
    let result = orch.health_check().await.unwrap();
    assert!(result.source_connected);
    assert!(!result.target_connected);
    assert!(!result.healthy);
}
