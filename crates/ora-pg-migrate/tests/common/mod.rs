//! Shared fixtures: a small sales schema in an in-memory Oracle stand-in.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::NaiveDate;
use ora_pg_migrate::core::{ColumnDescriptor, ConstraintDescriptor, Row, SqlValue, TableDescriptor};
use ora_pg_migrate::drivers::{MemorySource, MemoryTarget};
use ora_pg_migrate::{Config, Orchestrator};

pub const SCHEMA: &str = "SALES";
pub const TARGET_SCHEMA: &str = "public";

/// Expected row counts of the sales fixture.
pub const SALES_COUNTS: [(&str, usize); 6] = [
    ("DEPARTMENT", 5),
    ("EMPLOYEE", 8),
    ("CUSTOMER", 5),
    ("PRODUCT", 8),
    ("ORDER", 6),
    ("ORDER_ITEM", 17),
];

/// Configuration with fast retries; `extra` is appended to the migration section.
pub fn config(extra: &str) -> Config {
    let yaml = format!(
        "source:
  host: oracle.test
  service_name: ORCLPDB1
  user: sales
  password: secret
  schema: {}
target:
  host: pg.test
  database: sales
  user: postgres
  password: secret
migration:
  batch_size: 4
  parallelism: 3
  retry_backoff_base_ms: 1
  retry_backoff_max_ms: 5
  validation_sample_size: 50
{}",
        SCHEMA, extra
    );
    Config::from_yaml(&yaml).expect("test config is valid")
}

fn id(name: &str, ordinal: u32) -> ColumnDescriptor {
    ColumnDescriptor::new(name, "NUMBER", ordinal)
        .with_precision(10, 0)
        .not_null()
}

fn varchar(name: &str, ordinal: u32, len: u32) -> ColumnDescriptor {
    ColumnDescriptor::new(name, "VARCHAR2", ordinal).with_length(len)
}

fn date(day: u32) -> SqlValue {
    SqlValue::DateTime(
        NaiveDate::from_ymd_opt(2024, 3, day)
            .and_then(|d| d.and_hms_opt(9, 30, 0))
            .expect("valid date"),
    )
}

fn table(name: &str, columns: Vec<ColumnDescriptor>, pk: &[&str]) -> TableDescriptor {
    let mut t = TableDescriptor::new(SCHEMA, name);
    t.columns = columns;
    t.primary_key = pk.iter().map(|c| c.to_string()).collect();
    t
}

pub fn department() -> (TableDescriptor, Vec<Row>) {
    let t = table(
        "DEPARTMENT",
        vec![id("DEPT_ID", 1), varchar("NAME", 2, 50)],
        &["DEPT_ID"],
    );
    let rows = ["Sales", "Finance", "Engineering", "Support", "Legal"]
        .iter()
        .enumerate()
        .map(|(i, n)| vec![SqlValue::I64(i as i64 + 1), SqlValue::Text(n.to_string())])
        .collect();
    (t, rows)
}

pub fn employee() -> (TableDescriptor, Vec<Row>) {
    let mut t = table(
        "EMPLOYEE",
        vec![
            id("EMP_ID", 1),
            ColumnDescriptor::new("DEPT_ID", "NUMBER", 2).with_precision(10, 0),
            ColumnDescriptor::new("MANAGER_ID", "NUMBER", 3).with_precision(10, 0),
            varchar("NAME", 4, 100),
            ColumnDescriptor::new("SALARY", "NUMBER", 5).with_precision(8, 2),
            ColumnDescriptor::new("HIRE_DATE", "DATE", 6),
        ],
        &["EMP_ID"],
    );
    t.constraints = vec![
        ConstraintDescriptor::foreign("EMP_DEPT_FK", &["DEPT_ID"], SCHEMA, "DEPARTMENT", &["DEPT_ID"]),
        ConstraintDescriptor::foreign("EMP_MGR_FK", &["MANAGER_ID"], SCHEMA, "EMPLOYEE", &["EMP_ID"]),
    ];
    let rows = (1..=8)
        .map(|i: i64| {
            let manager = if i == 1 { SqlValue::Null } else { SqlValue::I64((i - 1) / 2 + 1) };
            vec![
                SqlValue::I64(i),
                SqlValue::I64(i % 5 + 1),
                manager,
                SqlValue::Text(format!("Employee {}", i)),
                SqlValue::Text(format!("{}.50", 40000 + i * 1000)),
                date(i as u32),
            ]
        })
        .collect();
    (t, rows)
}

pub fn customer() -> (TableDescriptor, Vec<Row>) {
    let t = table(
        "CUSTOMER",
        vec![id("CUST_ID", 1), varchar("NAME", 2, 100), varchar("EMAIL", 3, 200)],
        &["CUST_ID"],
    );
    let rows = (1..=5)
        .map(|i: i64| {
            let email = if i == 3 {
                SqlValue::Null
            } else {
                SqlValue::Text(format!("c{}@example.com", i))
            };
            vec![SqlValue::I64(i), SqlValue::Text(format!("O'Customer {}", i)), email]
        })
        .collect();
    (t, rows)
}

pub fn product() -> (TableDescriptor, Vec<Row>) {
    let t = table(
        "PRODUCT",
        vec![
            id("PROD_ID", 1),
            varchar("NAME", 2, 100),
            ColumnDescriptor::new("PRICE", "NUMBER", 3).with_precision(5, 2),
            ColumnDescriptor::new("ACTIVE", "NUMBER", 4).with_precision(1, 0),
        ],
        &["PROD_ID"],
    );
    let rows = (1..=8)
        .map(|i: i64| {
            let price = if i == 1 { "123.45".to_string() } else { format!("{}.99", i * 3) };
            vec![
                SqlValue::I64(i),
                SqlValue::Text(format!("Product {}", i)),
                SqlValue::Text(price),
                SqlValue::I64(i % 2),
            ]
        })
        .collect();
    (t, rows)
}

pub fn order() -> (TableDescriptor, Vec<Row>) {
    let mut t = table(
        "ORDER",
        vec![
            id("ORDER_ID", 1),
            ColumnDescriptor::new("CUST_ID", "NUMBER", 2).with_precision(10, 0).not_null(),
            ColumnDescriptor::new("ORDER_DATE", "TIMESTAMP(6)", 3).with_precision(0, 6),
        ],
        &["ORDER_ID"],
    );
    t.constraints = vec![ConstraintDescriptor::foreign(
        "ORDER_CUST_FK",
        &["CUST_ID"],
        SCHEMA,
        "CUSTOMER",
        &["CUST_ID"],
    )];
    let rows = (1..=6)
        .map(|i: i64| vec![SqlValue::I64(i), SqlValue::I64(i % 5 + 1), date(10 + i as u32)])
        .collect();
    (t, rows)
}

pub fn order_item() -> (TableDescriptor, Vec<Row>) {
    let mut t = table(
        "ORDER_ITEM",
        vec![
            id("ORDER_ID", 1),
            id("LINE_NO", 2),
            ColumnDescriptor::new("PROD_ID", "NUMBER", 3).with_precision(10, 0).not_null(),
            ColumnDescriptor::new("QTY", "NUMBER", 4).with_precision(5, 0),
        ],
        &["ORDER_ID", "LINE_NO"],
    );
    t.constraints = vec![
        ConstraintDescriptor::foreign("ITEM_ORDER_FK", &["ORDER_ID"], SCHEMA, "ORDER", &["ORDER_ID"]),
        ConstraintDescriptor::foreign("ITEM_PROD_FK", &["PROD_ID"], SCHEMA, "PRODUCT", &["PROD_ID"]),
    ];
    // 17 lines spread over 6 orders
    let mut rows = Vec::new();
    for order_id in 1..=6i64 {
        let lines = if order_id <= 5 { 3 } else { 2 };
        for line in 1..=lines {
            rows.push(vec![
                SqlValue::I64(order_id),
                SqlValue::I64(line),
                SqlValue::I64((order_id + line) % 8 + 1),
                SqlValue::I64(line * 2),
            ]);
        }
    }
    (t, rows)
}

/// The six-table sales schema.
pub fn sales_source() -> Arc<MemorySource> {
    let source = MemorySource::new(SCHEMA);
    for (t, rows) in [department(), employee(), customer(), product(), order(), order_item()] {
        source.add_table(t, rows);
    }
    Arc::new(source)
}

/// A single keyed table of `n` rows.
pub fn big_table(n: i64) -> (TableDescriptor, Vec<Row>) {
    let t = table(
        "BIG",
        vec![id("ID", 1), varchar("PAYLOAD", 2, 40)],
        &["ID"],
    );
    let rows = (1..=n)
        .map(|i| vec![SqlValue::I64(i), SqlValue::Text(format!("row-{:05}", i))])
        .collect();
    (t, rows)
}

pub fn orchestrator(config: Config, source: Arc<MemorySource>, target: Arc<MemoryTarget>) -> Orchestrator {
    Orchestrator::new(config, source, target)
}
