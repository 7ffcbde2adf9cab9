//! PostgreSQL DDL generation.
//!
//! Phase 1 ([`SchemaConverter::emit_create_statements`]) creates the schema,
//! every planned table with its columns, keys, checks and immediate foreign
//! keys, and the secondary indexes. Phase 2
//! ([`SchemaConverter::emit_deferred_constraints`]) adds the foreign keys the
//! planner deferred, once their data is loaded. Every statement is safe to
//! run twice.

use serde::Serialize;
use tracing::{debug, warn};

use crate::core::identifier::{derived_pg_name, escape_literal, pg_column_list, qualify_pg, quote_pg};
use crate::core::{ConstraintDescriptor, ConstraintDetail, ForeignKeyRef, TableDescriptor};
use crate::error::{MigrateError, Result};
use crate::planner::{DependencyEdge, EdgeMode, MigrationPlan};
use crate::typemap::{TargetType, TypeMapper};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DdlKind {
    CreateSchema,
    CreateTable,
    CreateIndex,
    AddForeignKey,
}

/// One executable DDL statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DdlStatement {
    /// Source table the statement belongs to; `None` for schema-level statements.
    pub table: Option<String>,
    pub kind: DdlKind,
    pub sql: String,
}

/// Phase 1 output: statements for every table that could be converted, plus
/// the tables that could not.
#[derive(Debug, Default)]
pub struct SchemaScript {
    pub statements: Vec<DdlStatement>,
    pub rejected: Vec<(String, MigrateError)>,
}

impl SchemaScript {
    /// Statements belonging to `table`, in execution order.
    pub fn for_table<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a DdlStatement> {
        self.statements
            .iter()
            .filter(move |s| s.table.as_deref() == Some(table))
    }
}

pub struct SchemaConverter {
    mapper: TypeMapper,
    target_schema: String,
    create_indexes: bool,
}

impl SchemaConverter {
    pub fn new(mapper: TypeMapper, target_schema: impl Into<String>) -> Self {
        Self {
            mapper,
            target_schema: target_schema.into(),
            create_indexes: true,
        }
    }

    pub fn with_indexes(mut self, create_indexes: bool) -> Self {
        self.create_indexes = create_indexes;
        self
    }

    pub fn target_schema(&self) -> &str {
        &self.target_schema
    }

    pub fn mapper(&self) -> &TypeMapper {
        &self.mapper
    }

    pub fn create_schema(&self) -> Result<DdlStatement> {
        Ok(DdlStatement {
            table: None,
            kind: DdlKind::CreateSchema,
            sql: format!("CREATE SCHEMA IF NOT EXISTS {}", quote_pg(&self.target_schema)?),
        })
    }

    /// Phase 1 statements in planner order. A table whose columns cannot be
    /// mapped lands in `rejected` and the others are unaffected.
    pub fn emit_create_statements(&self, plan: &MigrationPlan) -> Result<SchemaScript> {
        let mut script = SchemaScript {
            statements: vec![self.create_schema()?],
            rejected: Vec::new(),
        };
        for table in &plan.tables {
            match self.emit_table(plan, table) {
                Ok(statements) => script.statements.extend(statements),
                Err(e) => {
                    warn!("{}: cannot convert table: {}", table.name, e);
                    script.rejected.push((table.name.clone(), e));
                }
            }
        }
        Ok(script)
    }

    /// CREATE TABLE plus its indexes.
    pub fn emit_table(&self, plan: &MigrationPlan, table: &TableDescriptor) -> Result<Vec<DdlStatement>> {
        let targets = self.mapper.map_table(table)?;
        let mut items = Vec::with_capacity(table.columns.len() + table.constraints.len() + 1);

        for (column, target) in table.columns.iter().zip(&targets) {
            let mut def = format!("{} {}", quote_pg(&column.name)?, target);
            if let Some(default) = self.mapper.convert_default(column, target) {
                def.push_str(" DEFAULT ");
                def.push_str(&default);
            }
            if !column.nullable {
                def.push_str(" NOT NULL");
            }
            items.push(def);
        }

        if table.has_primary_key() {
            items.push(format!(
                "CONSTRAINT {} PRIMARY KEY ({})",
                quote_pg(&derived_pg_name(&table.name, "pkey"))?,
                pg_column_list(&table.primary_key)?
            ));
        }

        for constraint in &table.constraints {
            match &constraint.detail {
                ConstraintDetail::PrimaryKey => {}
                ConstraintDetail::Unique => {
                    items.push(format!(
                        "CONSTRAINT {} UNIQUE ({})",
                        quote_pg(&derived_pg_name(&table.name, &constraint.name))?,
                        pg_column_list(&constraint.columns)?
                    ));
                }
                ConstraintDetail::Check { condition } => {
                    if is_not_null_check(condition) {
                        continue;
                    }
                    items.push(format!(
                        "CONSTRAINT {} CHECK ({})",
                        quote_pg(&derived_pg_name(&table.name, &constraint.name))?,
                        convert_check_condition(condition)
                    ));
                }
                ConstraintDetail::ForeignKey(fk) => {
                    match plan.edge_mode(&table.name, &constraint.name) {
                        Some(EdgeMode::Immediate) => {
                            items.push(self.foreign_key_clause(table, constraint, fk)?);
                        }
                        Some(EdgeMode::Deferred) => {}
                        None => warn!(
                            "{}: skipping foreign key {} to {}.{} (table not migrated)",
                            table.name, constraint.name, fk.referenced_schema, fk.referenced_table
                        ),
                    }
                }
            }
        }

        let mut statements = vec![DdlStatement {
            table: Some(table.name.clone()),
            kind: DdlKind::CreateTable,
            sql: format!(
                "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
                qualify_pg(&self.target_schema, &table.name)?,
                items.join(",\n    ")
            ),
        }];

        if self.create_indexes {
            statements.extend(self.emit_indexes(table)?);
        }
        debug!("{}: {} DDL statements", table.name, statements.len());
        Ok(statements)
    }

    fn emit_indexes(&self, table: &TableDescriptor) -> Result<Vec<DdlStatement>> {
        let unique_sets: Vec<&Vec<String>> = table
            .constraints
            .iter()
            .filter(|c| matches!(c.detail, ConstraintDetail::Unique))
            .map(|c| &c.columns)
            .collect();

        let mut statements = Vec::new();
        for index in &table.indexes {
            // Key and unique constraints already bring their own index
            if index.name.to_uppercase().ends_with("_PK")
                || index.columns == table.primary_key
                || unique_sets.contains(&&index.columns)
                || index.columns.is_empty()
            {
                continue;
            }
            statements.push(DdlStatement {
                table: Some(table.name.clone()),
                kind: DdlKind::CreateIndex,
                sql: format!(
                    "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
                    if index.unique { "UNIQUE " } else { "" },
                    quote_pg(&derived_pg_name(&table.name, &index.name))?,
                    qualify_pg(&self.target_schema, &table.name)?,
                    pg_column_list(&index.columns)?
                ),
            });
        }
        Ok(statements)
    }

    fn foreign_key_clause(
        &self,
        table: &TableDescriptor,
        constraint: &ConstraintDescriptor,
        fk: &ForeignKeyRef,
    ) -> Result<String> {
        Ok(format!(
            "CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}) ON DELETE {}",
            quote_pg(&derived_pg_name(&table.name, &constraint.name))?,
            pg_column_list(&constraint.columns)?,
            qualify_pg(&self.target_schema, &fk.referenced_table)?,
            pg_column_list(&fk.referenced_columns)?,
            fk.on_delete.as_sql()
        ))
    }

    /// Phase 2 statements: one guarded ALTER TABLE per deferred edge.
    pub fn emit_deferred_constraints(&self, plan: &MigrationPlan) -> Result<Vec<DdlStatement>> {
        plan.deferred_edges()
            .map(|edge| self.emit_deferred_constraint(plan, edge))
            .collect()
    }

    pub fn emit_deferred_constraint(
        &self,
        plan: &MigrationPlan,
        edge: &DependencyEdge,
    ) -> Result<DdlStatement> {
        let table = plan
            .table(&edge.from)
            .ok_or_else(|| MigrateError::State(format!("table {} is not in the plan", edge.from)))?;
        let (constraint, fk) = table
            .foreign_keys()
            .find(|(c, _)| c.name == edge.constraint)
            .ok_or_else(|| {
                MigrateError::State(format!(
                    "foreign key {} not found on {}",
                    edge.constraint, edge.from
                ))
            })?;

        let name = derived_pg_name(&table.name, &constraint.name);
        let qualified = qualify_pg(&self.target_schema, &table.name)?;
        let alter = format!(
            "ALTER TABLE {} ADD {}",
            qualified,
            self.foreign_key_clause(table, constraint, fk)?
        );
        // ADD CONSTRAINT has no IF NOT EXISTS form
        let sql = format!(
            "DO $$\nBEGIN\n    IF NOT EXISTS (SELECT 1 FROM pg_constraint WHERE conname = '{}' AND conrelid = '{}'::regclass) THEN\n        {};\n    END IF;\nEND $$",
            escape_literal(&name),
            escape_literal(&qualified),
            alter
        );
        Ok(DdlStatement {
            table: Some(table.name.clone()),
            kind: DdlKind::AddForeignKey,
            sql,
        })
    }

    /// Map the table's columns, for callers that convert values.
    pub fn target_types(&self, table: &TableDescriptor) -> Result<Vec<TargetType>> {
        self.mapper.map_table(table)
    }
}

/// Oracle stores NOT NULL as a generated check constraint `"COL" IS NOT NULL`.
fn is_not_null_check(condition: &str) -> bool {
    let c = condition.trim();
    let upper = c.to_uppercase();
    let Some(column) = upper.strip_suffix(" IS NOT NULL") else {
        return false;
    };
    let column = column.trim();
    !column.contains(' ') || (column.starts_with('"') && column.ends_with('"') && column.matches('"').count() == 2)
}

fn convert_check_condition(condition: &str) -> String {
    let mut result = condition.trim().to_string();
    for (from, to) in [
        ("SYSDATE", "CURRENT_TIMESTAMP"),
        ("sysdate", "CURRENT_TIMESTAMP"),
        ("SYSTIMESTAMP", "CURRENT_TIMESTAMP"),
    ] {
        result = result.replace(from, to);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ColumnDescriptor, IndexDescriptor};
    use crate::planner::DependencyPlanner;

    fn employees() -> TableDescriptor {
        let mut t = TableDescriptor::new("HR", "EMPLOYEES");
        t.columns = vec![
            ColumnDescriptor::new("EMP_ID", "NUMBER", 1).with_precision(10, 0).not_null(),
            ColumnDescriptor::new("NAME", "VARCHAR2", 2).with_length(100).not_null(),
            ColumnDescriptor::new("SALARY", "NUMBER", 3).with_precision(8, 2),
            ColumnDescriptor::new("HIRED", "DATE", 4).with_default("SYSDATE"),
            ColumnDescriptor::new("MANAGER_ID", "NUMBER", 5).with_precision(10, 0),
            ColumnDescriptor::new("DEPT_ID", "NUMBER", 6).with_precision(10, 0),
        ];
        t.primary_key = vec!["EMP_ID".into()];
        t.constraints = vec![
            ConstraintDescriptor::foreign("FK_EMP_DEPT", &["DEPT_ID"], "HR", "DEPARTMENTS", &["DEPT_ID"]),
            ConstraintDescriptor::foreign("FK_EMP_MGR", &["MANAGER_ID"], "HR", "EMPLOYEES", &["EMP_ID"]),
            ConstraintDescriptor {
                name: "SYS_C0012".into(),
                columns: vec![],
                detail: ConstraintDetail::Check {
                    condition: "\"NAME\" IS NOT NULL".into(),
                },
            },
            ConstraintDescriptor {
                name: "CK_SALARY".into(),
                columns: vec![],
                detail: ConstraintDetail::Check {
                    condition: "SALARY > 0".into(),
                },
            },
        ];
        t.indexes = vec![
            IndexDescriptor {
                name: "EMPLOYEES_PK".into(),
                columns: vec!["EMP_ID".into()],
                unique: true,
            },
            IndexDescriptor {
                name: "IDX_EMP_NAME".into(),
                columns: vec!["NAME".into()],
                unique: false,
            },
        ];
        t
    }

    fn departments() -> TableDescriptor {
        let mut t = TableDescriptor::new("HR", "DEPARTMENTS");
        t.columns = vec![
            ColumnDescriptor::new("DEPT_ID", "NUMBER", 1).with_precision(10, 0).not_null(),
            ColumnDescriptor::new("ACTIVE", "NUMBER", 2).with_precision(1, 0).with_default("1"),
        ];
        t.primary_key = vec!["DEPT_ID".into()];
        t
    }

    fn plan() -> MigrationPlan {
        DependencyPlanner::new()
            .plan("HR", vec![employees(), departments()])
            .unwrap()
    }

    #[test]
    fn test_create_statements_in_plan_order() {
        let converter = SchemaConverter::new(TypeMapper::default(), "public");
        let script = converter.emit_create_statements(&plan()).unwrap();
        assert!(script.rejected.is_empty());

        let kinds: Vec<_> = script.statements.iter().map(|s| (s.kind, s.table.clone())).collect();
        assert_eq!(kinds[0], (DdlKind::CreateSchema, None));
        assert_eq!(kinds[1], (DdlKind::CreateTable, Some("DEPARTMENTS".into())));
        assert_eq!(kinds[2], (DdlKind::CreateTable, Some("EMPLOYEES".into())));
        assert_eq!(kinds[3], (DdlKind::CreateIndex, Some("EMPLOYEES".into())));
        assert_eq!(kinds.len(), 4);
    }

    #[test]
    fn test_create_table_columns_and_constraints() {
        let converter = SchemaConverter::new(TypeMapper::default(), "public");
        let plan = plan();
        let stmts = converter.emit_table(&plan, plan.table("EMPLOYEES").unwrap()).unwrap();
        let sql = &stmts[0].sql;

        assert!(sql.starts_with("CREATE TABLE IF NOT EXISTS \"public\".\"EMPLOYEES\""));
        assert!(sql.contains("\"EMP_ID\" bigint NOT NULL"));
        assert!(sql.contains("\"NAME\" varchar(100) NOT NULL"));
        assert!(sql.contains("\"SALARY\" numeric(8,2)"));
        assert!(sql.contains("\"HIRED\" timestamp DEFAULT CURRENT_TIMESTAMP"));
        assert!(sql.contains("CONSTRAINT \"employees_pkey\" PRIMARY KEY (\"EMP_ID\")"));
        assert!(sql.contains(
            "CONSTRAINT \"employees_fk_emp_dept\" FOREIGN KEY (\"DEPT_ID\") REFERENCES \"public\".\"DEPARTMENTS\" (\"DEPT_ID\") ON DELETE NO ACTION"
        ));
        assert!(sql.contains("CHECK (SALARY > 0)"));
        // Self-reference and generated NOT NULL check stay out of phase 1
        assert!(!sql.contains("FK_EMP_MGR") && !sql.contains("fk_emp_mgr"));
        assert!(!sql.contains("sys_c0012"));

        assert_eq!(
            stmts[1].sql,
            "CREATE INDEX IF NOT EXISTS \"employees_idx_emp_name\" ON \"public\".\"EMPLOYEES\" (\"NAME\")"
        );
    }

    #[test]
    fn test_boolean_default() {
        let converter = SchemaConverter::new(TypeMapper::default(), "public");
        let plan = plan();
        let stmts = converter.emit_table(&plan, plan.table("DEPARTMENTS").unwrap()).unwrap();
        assert!(stmts[0].sql.contains("\"ACTIVE\" boolean DEFAULT true"));
    }

    #[test]
    fn test_deferred_constraint_is_guarded() {
        let converter = SchemaConverter::new(TypeMapper::default(), "public");
        let stmts = converter.emit_deferred_constraints(&plan()).unwrap();
        assert_eq!(stmts.len(), 1);
        let sql = &stmts[0].sql;
        assert_eq!(stmts[0].kind, DdlKind::AddForeignKey);
        assert!(sql.contains("conname = 'employees_fk_emp_mgr'"));
        assert!(sql.contains("'\"public\".\"EMPLOYEES\"'::regclass"));
        assert!(sql.contains(
            "ALTER TABLE \"public\".\"EMPLOYEES\" ADD CONSTRAINT \"employees_fk_emp_mgr\" FOREIGN KEY (\"MANAGER_ID\") REFERENCES \"public\".\"EMPLOYEES\" (\"EMP_ID\")"
        ));
    }

    #[test]
    fn test_unmapped_table_rejected_alone() {
        let mut odd = TableDescriptor::new("HR", "GEO");
        odd.columns = vec![ColumnDescriptor::new("SHAPE", "SDO_GEOMETRY", 1)];
        let plan = DependencyPlanner::new()
            .plan("HR", vec![odd, departments()])
            .unwrap();
        let converter = SchemaConverter::new(TypeMapper::default(), "public");
        let script = converter.emit_create_statements(&plan).unwrap();
        assert_eq!(script.rejected.len(), 1);
        assert_eq!(script.rejected[0].0, "GEO");
        assert!(matches!(script.rejected[0].1, MigrateError::UnsupportedType { .. }));
        assert_eq!(script.for_table("DEPARTMENTS").count(), 1);
    }

    #[test]
    fn test_external_fk_skipped() {
        let mut t = departments();
        let mut fk = ConstraintDescriptor::foreign("FK_DEPT_LOC", &["DEPT_ID"], "GEO", "LOCATIONS", &["ID"]);
        if let ConstraintDetail::ForeignKey(r) = &mut fk.detail {
            r.external = true;
        }
        t.constraints.push(fk);
        let plan = DependencyPlanner::new().plan("HR", vec![t]).unwrap();
        let converter = SchemaConverter::new(TypeMapper::default(), "public");
        let stmts = converter.emit_table(&plan, &plan.tables[0]).unwrap();
        assert!(!stmts[0].sql.contains("LOCATIONS"));
    }

    #[test]
    fn test_not_null_check_detection() {
        assert!(is_not_null_check("\"NAME\" IS NOT NULL"));
        assert!(is_not_null_check("name is not null"));
        assert!(!is_not_null_check("SALARY > 0 OR BONUS IS NOT NULL"));
    }

    #[test]
    fn test_indexes_disabled() {
        let converter = SchemaConverter::new(TypeMapper::default(), "public").with_indexes(false);
        let plan = plan();
        let stmts = converter.emit_table(&plan, plan.table("EMPLOYEES").unwrap()).unwrap();
        assert_eq!(stmts.len(), 1);
    }
}
