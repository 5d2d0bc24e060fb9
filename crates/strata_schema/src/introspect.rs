//! Interfaces to the collaborators that describe live external state.
//!
//! A [`SourceIntrospector`] lists the tables and functions of a backing data
//! source; a [`RemoteSchemaIntrospector`] fetches the root fields of a remote
//! service. Both are only called on memo misses, so implementations are free
//! to be slow or to perform network I/O.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strata_common::{
    ColumnName, ConstraintName, FunctionName, RemoteSchemaName, SourceName, TableName,
};
use strata_metadata::RemoteSchemaDefinition;

/// A column of a live table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    /// Column name.
    pub name: ColumnName,
    /// Database type name, e.g. `integer`.
    #[serde(rename = "type")]
    pub ty: String,
    /// Whether the column accepts nulls.
    #[serde(default)]
    pub nullable: bool,
    /// Ordinal position, starting at 1.
    pub position: u32,
}

/// A foreign-key constraint of a live table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyDescriptor {
    /// Constraint name.
    pub constraint: ConstraintName,
    /// Referenced table.
    pub foreign_table: TableName,
    /// Local column to referenced column.
    pub column_mapping: BTreeMap<ColumnName, ColumnName>,
}

/// A live table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescriptor {
    /// Table name.
    pub name: TableName,
    /// Columns, in any order.
    pub columns: Vec<ColumnDescriptor>,
    /// Primary-key columns; empty if the table has none.
    #[serde(default)]
    pub primary_key: Vec<ColumnName>,
    /// Outgoing foreign keys.
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKeyDescriptor>,
}

impl TableDescriptor {
    /// Looks up a column by name.
    pub fn column(&self, name: &ColumnName) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| &c.name == name)
    }
}

/// Volatility class of a stored function.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Volatility {
    /// Same result for the same arguments, forever.
    Immutable,
    /// Same result within a transaction.
    Stable,
    /// May have side effects.
    Volatile,
}

/// An argument of a stored function.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionArgument {
    /// Argument name; unnamed arguments are positional only.
    #[serde(default)]
    pub name: Option<String>,
    /// Database type name. A table's row type is named after the table.
    #[serde(rename = "type")]
    pub ty: String,
}

/// A live stored function. Overloads appear as separate descriptors with
/// the same name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDescriptor {
    /// Function name.
    pub name: FunctionName,
    /// Arguments, in order.
    #[serde(default)]
    pub arguments: Vec<FunctionArgument>,
    /// Table whose rows are returned, if the return type is a table row.
    #[serde(default)]
    pub returns_table: Option<TableName>,
    /// Whether a set of rows is returned.
    #[serde(default)]
    pub returns_set: bool,
    /// Volatility class.
    pub volatility: Volatility,
}

/// Everything introspected from one source, keyed for lookup.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceCatalog {
    /// Live tables by name.
    pub tables: BTreeMap<TableName, TableDescriptor>,
    /// Live functions by name; more than one entry means overloads.
    pub functions: BTreeMap<FunctionName, Vec<FunctionDescriptor>>,
}

impl SourceCatalog {
    /// Builds a catalog from introspection listings.
    pub fn new(tables: Vec<TableDescriptor>, functions: Vec<FunctionDescriptor>) -> Self {
        let mut catalog = Self::default();
        for table in tables {
            catalog.tables.insert(table.name.clone(), table);
        }
        for function in functions {
            catalog
                .functions
                .entry(function.name.clone())
                .or_default()
                .push(function);
        }
        catalog
    }
}

/// Root fields exposed by a remote service.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSchemaDescriptor {
    /// Query root field names.
    #[serde(default)]
    pub query_fields: Vec<String>,
    /// Mutation root field names.
    #[serde(default)]
    pub mutation_fields: Vec<String>,
    /// Named types of the remote schema.
    #[serde(default)]
    pub types: Vec<String>,
}

/// Failure to introspect an external dependency.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum IntrospectionError {
    /// The dependency could not be reached.
    #[error("unreachable: {message}")]
    Unreachable {
        /// Transport-level detail.
        message: String,
    },

    /// The dependency did not answer in time.
    #[error("timed out after {}s", after.as_secs())]
    Timeout {
        /// The timeout that elapsed.
        after: Duration,
    },

    /// The answer could not be understood.
    #[error("invalid introspection result: {message}")]
    Invalid {
        /// What was wrong.
        message: String,
    },
}

/// Lists the live schema of a backing data source.
pub trait SourceIntrospector: Send + Sync {
    /// Lists every table of the source.
    fn list_tables(
        &self,
        source: &SourceName,
        configuration: &Value,
    ) -> Result<Vec<TableDescriptor>, IntrospectionError>;

    /// Lists every stored function of the source.
    fn list_functions(
        &self,
        source: &SourceName,
        configuration: &Value,
    ) -> Result<Vec<FunctionDescriptor>, IntrospectionError>;

    /// Lists tables and functions into a keyed catalog.
    fn catalog(
        &self,
        source: &SourceName,
        configuration: &Value,
    ) -> Result<SourceCatalog, IntrospectionError> {
        let tables = self.list_tables(source, configuration)?;
        let functions = self.list_functions(source, configuration)?;
        Ok(SourceCatalog::new(tables, functions))
    }
}

/// Fetches the root fields of a remote service.
pub trait RemoteSchemaIntrospector: Send + Sync {
    /// Introspects a remote service, giving up after `timeout`.
    fn introspect(
        &self,
        name: &RemoteSchemaName,
        definition: &RemoteSchemaDefinition,
        timeout: Duration,
    ) -> Result<RemoteSchemaDescriptor, IntrospectionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn function(name: &str, arg: &str) -> FunctionDescriptor {
        FunctionDescriptor {
            name: name.into(),
            arguments: vec![FunctionArgument {
                name: None,
                ty: arg.to_string(),
            }],
            returns_table: None,
            returns_set: false,
            volatility: Volatility::Stable,
        }
    }

    #[test]
    fn catalog_groups_overloads() {
        let catalog = SourceCatalog::new(
            Vec::new(),
            vec![
                function("search", "text"),
                function("search", "integer"),
                function("other", "text"),
            ],
        );
        assert_eq!(catalog.functions["search"].len(), 2);
        assert_eq!(catalog.functions["other"].len(), 1);
    }

    #[test]
    fn descriptor_json_shape() {
        let table: TableDescriptor = serde_json::from_value(serde_json::json!({
            "name": "author",
            "columns": [ { "name": "id", "type": "integer", "position": 1 } ],
            "primary_key": ["id"]
        }))
        .unwrap();
        assert_eq!(table.column(&"id".into()).unwrap().ty, "integer");
        assert!(table.foreign_keys.is_empty());
    }

    #[test]
    fn timeout_message() {
        let err = IntrospectionError::Timeout {
            after: Duration::from_secs(5),
        };
        assert_eq!(err.to_string(), "timed out after 5s");
    }
}
