//! Source schema introspection.

mod filter;

pub use filter::TableFilter;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::core::{SourceReader, TableDescriptor};
use crate::error::{MigrateError, Result};

/// Reads source catalog metadata into [`TableDescriptor`]s.
pub struct SchemaIntrospector {
    source: Arc<dyn SourceReader>,
    filter: TableFilter,
    timeout: Duration,
}

impl SchemaIntrospector {
    pub fn new(source: Arc<dyn SourceReader>, filter: TableFilter) -> Self {
        Self {
            source,
            filter,
            timeout: Duration::from_secs(300),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Describe the selected tables of `schema`, sorted by name.
    ///
    /// Foreign keys whose referenced table is not selected are flagged
    /// `external`. Connectivity failures are returned unchanged; a missing
    /// schema is an [`MigrateError::Introspection`] error.
    pub async fn describe_schema(&self, schema: &str) -> Result<Vec<TableDescriptor>> {
        let exists = self
            .bounded("check source schema", self.source.schema_exists(schema))
            .await?;
        if !exists {
            return Err(MigrateError::Introspection(format!(
                "schema {} does not exist on the {} source",
                schema,
                self.source.db_type()
            )));
        }

        let all = self
            .bounded("list source tables", self.source.list_tables(schema))
            .await?;
        let total = all.len();

        let mut tables: BTreeMap<String, TableDescriptor> = all
            .into_iter()
            .filter(|t| self.filter.matches(&t.name))
            .map(|t| (t.name.clone(), t))
            .collect();
        debug!("{} of {} tables selected by filter", tables.len(), total);

        let constraints = self
            .bounded("list source constraints", self.source.list_constraints(schema))
            .await?;

        let selected: Vec<String> = tables.keys().cloned().collect();
        for owned in constraints {
            let Some(table) = tables.get_mut(&owned.table) else {
                continue;
            };
            let mut constraint = owned.constraint;
            if let crate::core::ConstraintDetail::ForeignKey(fk) = &mut constraint.detail {
                let in_set = fk.referenced_schema == schema
                    && selected.binary_search(&fk.referenced_table).is_ok();
                if !in_set {
                    warn!(
                        "{}: foreign key {} references {}.{} which is not being migrated",
                        table.name, constraint.name, fk.referenced_schema, fk.referenced_table
                    );
                    fk.external = true;
                }
            }
            table.constraints.push(constraint);
        }

        let mut result: Vec<TableDescriptor> = tables.into_values().collect();
        for table in &mut result {
            table.constraints.sort_by(|a, b| a.name.cmp(&b.name));
        }

        info!(
            "Introspected {} tables from {} ({} excluded by filter)",
            result.len(),
            schema,
            total - result.len()
        );
        Ok(result)
    }

    async fn bounded<T>(
        &self,
        operation: &str,
        fut: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(MigrateError::timeout(operation, self.timeout.as_secs())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ColumnDescriptor, ConstraintDescriptor, OwnedConstraint};
    use crate::drivers::MemorySource;

    fn source() -> Arc<MemorySource> {
        let source = MemorySource::new("HR");
        for name in ["EMPLOYEES", "DEPARTMENTS", "AUDIT_LOG", "TMP_LOAD"] {
            let mut t = TableDescriptor::new("HR", name);
            t.columns = vec![ColumnDescriptor::new("ID", "NUMBER", 1).with_precision(10, 0)];
            t.primary_key = vec!["ID".into()];
            source.add_table(t, Vec::new());
        }
        source.add_constraint(OwnedConstraint {
            table: "EMPLOYEES".into(),
            constraint: ConstraintDescriptor::foreign(
                "FK_EMP_DEPT",
                &["ID"],
                "HR",
                "DEPARTMENTS",
                &["ID"],
            ),
        });
        source.add_constraint(OwnedConstraint {
            table: "EMPLOYEES".into(),
            constraint: ConstraintDescriptor::foreign("FK_EMP_AUDIT", &["ID"], "HR", "AUDIT_LOG", &["ID"]),
        });
        Arc::new(source)
    }

    #[tokio::test]
    async fn test_describe_sorted_with_constraints() {
        let introspector = SchemaIntrospector::new(source(), TableFilter::default());
        let tables = introspector.describe_schema("HR").await.unwrap();
        let names: Vec<_> = tables.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["AUDIT_LOG", "DEPARTMENTS", "EMPLOYEES", "TMP_LOAD"]);

        let emp = &tables[2];
        assert_eq!(emp.constraints.len(), 2);
        assert!(emp.foreign_keys().all(|(_, fk)| !fk.external));
    }

    #[tokio::test]
    async fn test_filtered_reference_flagged_external() {
        let filter = TableFilter::new(&[], &["audit_*".to_string(), "TMP_*".to_string()]);
        let introspector = SchemaIntrospector::new(source(), filter);
        let tables = introspector.describe_schema("HR").await.unwrap();
        assert_eq!(tables.len(), 2);

        let emp = tables.iter().find(|t| t.name == "EMPLOYEES").unwrap();
        let audit = emp
            .foreign_keys()
            .find(|(c, _)| c.name == "FK_EMP_AUDIT")
            .map(|(_, fk)| fk)
            .unwrap();
        assert!(audit.external);
        let dept = emp
            .foreign_keys()
            .find(|(c, _)| c.name == "FK_EMP_DEPT")
            .map(|(_, fk)| fk)
            .unwrap();
        assert!(!dept.external);
    }

    #[tokio::test]
    async fn test_missing_schema() {
        let introspector = SchemaIntrospector::new(source(), TableFilter::default());
        let err = introspector.describe_schema("NOPE").await.unwrap_err();
        assert!(matches!(err, MigrateError::Introspection(_)));
    }

    #[tokio::test]
    async fn test_unreachable_source() {
        let source = source();
        source.set_unreachable(true);
        let introspector = SchemaIntrospector::new(source, TableFilter::default());
        let err = introspector.describe_schema("HR").await.unwrap_err();
        assert!(err.is_fatal_for_run());
    }
}
