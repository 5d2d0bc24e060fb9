//! Boolean expressions of permission filters and checks.
//!
//! Expressions arrive as raw JSON and are validated against the live catalog
//! of the source. Compiling one records a dependency on every column it
//! compares and on every relationship it follows, so that dropping either
//! quarantines the permission.

use std::fmt;

use serde::Serialize;
use serde_json::Value;
use strata_common::{ColumnName, RelationshipName, TableName};
use strata_metadata::{DependencyReason, SchemaDependency, SchemaObjId};

use crate::errors;
use crate::source::SourceView;

/// A comparison operator on a column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum CompareOp {
    /// `_eq`
    #[serde(rename = "_eq")]
    Eq,
    /// `_neq`
    #[serde(rename = "_neq")]
    Neq,
    /// `_gt`
    #[serde(rename = "_gt")]
    Gt,
    /// `_lt`
    #[serde(rename = "_lt")]
    Lt,
    /// `_gte`
    #[serde(rename = "_gte")]
    Gte,
    /// `_lte`
    #[serde(rename = "_lte")]
    Lte,
    /// `_in`
    #[serde(rename = "_in")]
    In,
    /// `_nin`
    #[serde(rename = "_nin")]
    Nin,
    /// `_is_null`
    #[serde(rename = "_is_null")]
    IsNull,
    /// `_like`
    #[serde(rename = "_like")]
    Like,
    /// `_ilike`
    #[serde(rename = "_ilike")]
    Ilike,
}

impl CompareOp {
    /// Parses an operator key.
    pub fn parse(key: &str) -> Option<Self> {
        let op = match key {
            "_eq" => CompareOp::Eq,
            "_neq" => CompareOp::Neq,
            "_gt" => CompareOp::Gt,
            "_lt" => CompareOp::Lt,
            "_gte" => CompareOp::Gte,
            "_lte" => CompareOp::Lte,
            "_in" => CompareOp::In,
            "_nin" => CompareOp::Nin,
            "_is_null" => CompareOp::IsNull,
            "_like" => CompareOp::Like,
            "_ilike" => CompareOp::Ilike,
            _ => return None,
        };
        Some(op)
    }

    /// The operator key.
    pub fn as_str(self) -> &'static str {
        match self {
            CompareOp::Eq => "_eq",
            CompareOp::Neq => "_neq",
            CompareOp::Gt => "_gt",
            CompareOp::Lt => "_lt",
            CompareOp::Gte => "_gte",
            CompareOp::Lte => "_lte",
            CompareOp::In => "_in",
            CompareOp::Nin => "_nin",
            CompareOp::IsNull => "_is_null",
            CompareOp::Like => "_like",
            CompareOp::Ilike => "_ilike",
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One operator applied to a column.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Comparison {
    /// Operator.
    pub op: CompareOp,
    /// Operand, kept as written (it may be a session variable reference).
    pub value: Value,
}

/// A validated boolean expression.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BoolExp {
    /// All terms hold. An empty conjunction is always true.
    And(Vec<BoolExp>),
    /// Some term holds.
    Or(Vec<BoolExp>),
    /// The term does not hold.
    Not(Box<BoolExp>),
    /// Comparisons on a column of the current table.
    Column {
        /// Column compared.
        column: ColumnName,
        /// Operators, all of which must hold.
        comparisons: Vec<Comparison>,
    },
    /// An expression over the rows of a relationship's remote table.
    Relationship {
        /// Relationship followed.
        name: RelationshipName,
        /// Table the expression is evaluated on.
        remote_table: TableName,
        /// Expression on the remote table.
        exp: Box<BoolExp>,
    },
}

impl BoolExp {
    /// The expression that always holds.
    pub fn always() -> Self {
        BoolExp::And(Vec::new())
    }

    /// Returns `true` if this is the empty conjunction.
    pub fn is_always(&self) -> bool {
        matches!(self, BoolExp::And(terms) if terms.is_empty())
    }
}

/// Validates `exp` against `table` and appends the dependencies it creates.
///
/// `null` and `{}` both mean "always". Errors are inconsistency reasons.
pub fn compile_bool_exp(
    view: &SourceView<'_>,
    table: &TableName,
    exp: &Value,
    deps: &mut Vec<SchemaDependency>,
) -> Result<BoolExp, String> {
    match exp {
        Value::Null => Ok(BoolExp::always()),
        Value::Object(fields) => {
            let mut terms = Vec::with_capacity(fields.len());
            for (key, value) in fields {
                terms.push(compile_field(view, table, key, value, deps)?);
            }
            if terms.len() == 1 {
                Ok(terms.remove(0))
            } else {
                Ok(BoolExp::And(terms))
            }
        }
        other => Err(format!(
            "expected a boolean expression object, found {}",
            json_kind(other)
        )),
    }
}

fn compile_field(
    view: &SourceView<'_>,
    table: &TableName,
    key: &str,
    value: &Value,
    deps: &mut Vec<SchemaDependency>,
) -> Result<BoolExp, String> {
    match key {
        "_and" | "_or" => {
            let items = value
                .as_array()
                .ok_or_else(|| format!("\"{key}\" expects an array of expressions"))?;
            let terms = items
                .iter()
                .map(|item| compile_bool_exp(view, table, item, deps))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(if key == "_and" {
                BoolExp::And(terms)
            } else {
                BoolExp::Or(terms)
            })
        }
        "_not" => Ok(BoolExp::Not(Box::new(compile_bool_exp(view, table, value, deps)?))),
        _ if key.starts_with('_') => Err(format!("unknown boolean operator \"{key}\"")),
        _ => {
            let column = ColumnName::new(key);
            if view.has_column(table, &column) {
                deps.push(SchemaDependency::new(
                    SchemaObjId::column(view.name, table, &column),
                    DependencyReason::Column,
                ));
                let comparisons = compile_comparisons(&column, value)?;
                return Ok(BoolExp::Column {
                    column,
                    comparisons,
                });
            }
            let name = RelationshipName::new(key);
            match view.relationship_target(table, &name) {
                Some(remote_table) => {
                    deps.push(SchemaDependency::new(
                        SchemaObjId::Relationship {
                            source: view.name.clone(),
                            table: table.clone(),
                            name: name.clone(),
                        },
                        DependencyReason::Relationship,
                    ));
                    let exp = compile_bool_exp(view, &remote_table, value, deps)?;
                    Ok(BoolExp::Relationship {
                        name,
                        remote_table,
                        exp: Box::new(exp),
                    })
                }
                None => Err(errors::missing_column(key, table)),
            }
        }
    }
}

fn compile_comparisons(column: &ColumnName, value: &Value) -> Result<Vec<Comparison>, String> {
    let ops = value
        .as_object()
        .ok_or_else(|| format!("expected an operator object for column \"{column}\""))?;
    let mut comparisons = Vec::with_capacity(ops.len());
    for (key, operand) in ops {
        let op = CompareOp::parse(key)
            .ok_or_else(|| format!("unknown operator \"{key}\" on column \"{column}\""))?;
        match op {
            CompareOp::In | CompareOp::Nin
                if !operand.is_array() && !is_session_variable(operand) =>
            {
                return Err(format!("operator \"{op}\" on column \"{column}\" expects an array"));
            }
            CompareOp::IsNull if !operand.is_boolean() => {
                return Err(format!("operator \"{op}\" on column \"{column}\" expects a boolean"));
            }
            _ => {}
        }
        comparisons.push(Comparison {
            op,
            value: operand.clone(),
        });
    }
    Ok(comparisons)
}

fn is_session_variable(value: &Value) -> bool {
    value
        .as_str()
        .is_some_and(|s| s.to_ascii_lowercase().starts_with("x-strata-"))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
