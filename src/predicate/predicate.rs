//! Column predicates
//!
//! A [`Predicate`] binds one column to a [`Condition`]. Each condition variant
//! carries exactly the operands its operator needs, so `between` always has a
//! `[low, high]` pair and `in` always has a value list.
//!
//! Null semantics used by [`Predicate::eval`]:
//! - `eq NULL` / `neq NULL` test whether the column value is (not) null;
//!   this is what `is_null` / `is_not_null` build.
//! - every other comparison with a null on either side is false.
//! - `between` is inclusive on both ends.
//! - `in` is false for a null column value and skips null list entries.

use super::pattern::like_match;
use crate::catalog::Column;
use crate::error::{Error, Result};
use crate::storage::{Row, Value};
use std::cmp::Ordering;
use std::fmt;
use tracing::warn;

/// Operator tags accepted by [`Predicate::build`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    Match,
    Between,
    In,
    IsNull,
    IsNotNull,
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operator::Eq => "=",
            Operator::Neq => "<>",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Match => "LIKE",
            Operator::Between => "BETWEEN",
            Operator::In => "IN",
            Operator::IsNull => "IS NULL",
            Operator::IsNotNull => "IS NOT NULL",
        };
        write!(f, "{}", s)
    }
}

/// Binary comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl CompareOp {
    fn operator(self) -> Operator {
        match self {
            CompareOp::Eq => Operator::Eq,
            CompareOp::Neq => Operator::Neq,
            CompareOp::Lt => Operator::Lt,
            CompareOp::Lte => Operator::Lte,
            CompareOp::Gt => Operator::Gt,
            CompareOp::Gte => Operator::Gte,
        }
    }

    fn holds(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Neq => ordering != Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Lte => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Gte => ordering != Ordering::Less,
        }
    }
}

/// The operator and operands of a predicate
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Compare { op: CompareOp, value: Value },
    Match { pattern: String },
    Between { low: Value, high: Value },
    In { values: Vec<Value> },
}

/// An evaluable condition on a single column
#[derive(Debug, Clone)]
pub struct Predicate {
    column: Column,
    condition: Condition,
}

impl Predicate {
    pub fn new(column: Column, condition: Condition) -> Self {
        let predicate = Self { column, condition };
        if !predicate.is_orderable() {
            warn!(
                column = %predicate.column,
                data_type = %predicate.column.data_type(),
                "range predicate on a column that cannot be ordered never matches"
            );
        }
        predicate
    }

    /// False for range conditions (`<`, `<=`, `>`, `>=`, `between`) on a
    /// column whose values have no order, such as `Object`
    pub fn is_orderable(&self) -> bool {
        let ranged = match &self.condition {
            Condition::Compare { op, .. } => !matches!(op, CompareOp::Eq | CompareOp::Neq),
            Condition::Between { .. } => true,
            Condition::Match { .. } | Condition::In { .. } => false,
        };
        let data_type = self.column.data_type();
        !ranged || data_type.is_comparable_with(&data_type)
    }

    /// Build a predicate from an operator tag and a flat operand list.
    ///
    /// Operand types are not checked against the column type.
    pub fn build(column: &Column, operator: Operator, operands: Vec<Value>) -> Result<Self> {
        let arity = |expected: usize, operands: &[Value]| -> Result<()> {
            if operands.len() == expected {
                Ok(())
            } else {
                Err(Error::ConstructionMisuse(format!(
                    "{} {} takes {} operand(s), got {}",
                    column.normalized_name(),
                    operator,
                    expected,
                    operands.len()
                )))
            }
        };

        let mut operands = operands;
        let condition = match operator {
            Operator::Eq
            | Operator::Neq
            | Operator::Lt
            | Operator::Lte
            | Operator::Gt
            | Operator::Gte => {
                arity(1, &operands)?;
                let op = match operator {
                    Operator::Eq => CompareOp::Eq,
                    Operator::Neq => CompareOp::Neq,
                    Operator::Lt => CompareOp::Lt,
                    Operator::Lte => CompareOp::Lte,
                    Operator::Gt => CompareOp::Gt,
                    _ => CompareOp::Gte,
                };
                Condition::Compare {
                    op,
                    value: operands.remove(0),
                }
            }
            Operator::IsNull | Operator::IsNotNull => {
                arity(0, &operands)?;
                let op = if operator == Operator::IsNull {
                    CompareOp::Eq
                } else {
                    CompareOp::Neq
                };
                Condition::Compare {
                    op,
                    value: Value::Null,
                }
            }
            Operator::Match => {
                arity(1, &operands)?;
                match operands.remove(0) {
                    Value::String(pattern) => Condition::Match { pattern },
                    other => {
                        return Err(Error::ConstructionMisuse(format!(
                            "{} LIKE takes a string pattern, got {}",
                            column.normalized_name(),
                            other.type_name()
                        )))
                    }
                }
            }
            Operator::Between => {
                arity(2, &operands)?;
                let high = operands.remove(1);
                let low = operands.remove(0);
                Condition::Between { low, high }
            }
            Operator::In => Condition::In { values: operands },
        };
        Ok(Self::new(column.clone(), condition))
    }

    pub fn column(&self) -> &Column {
        &self.column
    }

    pub fn condition(&self) -> &Condition {
        &self.condition
    }

    /// Operator tag. `is_null` / `is_not_null` report `Eq` / `Neq`.
    pub fn operator(&self) -> Operator {
        match &self.condition {
            Condition::Compare { op, .. } => op.operator(),
            Condition::Match { .. } => Operator::Match,
            Condition::Between { .. } => Operator::Between,
            Condition::In { .. } => Operator::In,
        }
    }

    /// Operands in declaration order
    pub fn operands(&self) -> Vec<Value> {
        match &self.condition {
            Condition::Compare { value, .. } => vec![value.clone()],
            Condition::Match { pattern } => vec![Value::String(pattern.clone())],
            Condition::Between { low, high } => vec![low.clone(), high.clone()],
            Condition::In { values } => values.clone(),
        }
    }

    /// Declared name of the table this predicate filters
    pub fn table_name(&self) -> &str {
        self.column.table_name()
    }

    /// Evaluate against a row of the column's table
    pub fn eval(&self, row: &Row) -> bool {
        let Some(value) = row.get(self.column.position()) else {
            return false;
        };

        match &self.condition {
            Condition::Compare {
                op: CompareOp::Eq,
                value: Value::Null,
            } => value.is_null(),
            Condition::Compare {
                op: CompareOp::Neq,
                value: Value::Null,
            } => !value.is_null(),
            _ if value.is_null() => false,
            Condition::Compare { op, value: operand } => compare(value, operand, *op),
            Condition::Match { pattern } => value
                .as_str()
                .map_or(false, |text| like_match(text, pattern)),
            Condition::Between { low, high } => {
                compare(value, low, CompareOp::Gte) && compare(value, high, CompareOp::Lte)
            }
            Condition::In { values } => values
                .iter()
                .any(|candidate| compare(value, candidate, CompareOp::Eq)),
        }
    }
}

/// Compare two values; false whenever either is null or they are unordered.
fn compare(left: &Value, right: &Value, op: CompareOp) -> bool {
    if left.is_null() || right.is_null() {
        return false;
    }
    match left.compare(right) {
        Some(ordering) => op.holds(ordering),
        // Unordered values (e.g. objects) still support equality.
        None => match op {
            CompareOp::Eq => left == right,
            CompareOp::Neq => left != right,
            _ => false,
        },
    }
}

impl PartialEq for Predicate {
    fn eq(&self, other: &Self) -> bool {
        self.column.id() == other.column.id()
            && self.column.alias() == other.column.alias()
            && self.condition == other.condition
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let column = self.column.normalized_name();
        match &self.condition {
            Condition::Compare {
                op: CompareOp::Eq,
                value: Value::Null,
            } => write!(f, "{} IS NULL", column),
            Condition::Compare {
                op: CompareOp::Neq,
                value: Value::Null,
            } => write!(f, "{} IS NOT NULL", column),
            Condition::Compare { op, value } => write!(f, "{} {} {}", column, op.operator(), value),
            Condition::Match { pattern } => write!(f, "{} LIKE '{}'", column, pattern),
            Condition::Between { low, high } => {
                write!(f, "{} BETWEEN {} AND {}", column, low, high)
            }
            Condition::In { values } => {
                let list: Vec<String> = values.iter().map(Value::to_string).collect();
                write!(f, "{} IN ({})", column, list.join(", "))
            }
        }
    }
}

/// Predicate constructors on columns
impl Column {
    fn compare_with(&self, op: CompareOp, value: impl Into<Value>) -> Predicate {
        Predicate::new(
            self.clone(),
            Condition::Compare {
                op,
                value: value.into(),
            },
        )
    }

    pub fn eq(&self, value: impl Into<Value>) -> Predicate {
        self.compare_with(CompareOp::Eq, value)
    }

    pub fn neq(&self, value: impl Into<Value>) -> Predicate {
        self.compare_with(CompareOp::Neq, value)
    }

    pub fn lt(&self, value: impl Into<Value>) -> Predicate {
        self.compare_with(CompareOp::Lt, value)
    }

    pub fn lte(&self, value: impl Into<Value>) -> Predicate {
        self.compare_with(CompareOp::Lte, value)
    }

    pub fn gt(&self, value: impl Into<Value>) -> Predicate {
        self.compare_with(CompareOp::Gt, value)
    }

    pub fn gte(&self, value: impl Into<Value>) -> Predicate {
        self.compare_with(CompareOp::Gte, value)
    }

    /// SQL LIKE pattern match
    pub fn matches(&self, pattern: impl Into<String>) -> Predicate {
        Predicate::new(
            self.clone(),
            Condition::Match {
                pattern: pattern.into(),
            },
        )
    }

    /// Inclusive range. `low <= high` is not checked.
    pub fn between(&self, low: impl Into<Value>, high: impl Into<Value>) -> Predicate {
        Predicate::new(
            self.clone(),
            Condition::Between {
                low: low.into(),
                high: high.into(),
            },
        )
    }

    pub fn in_list<I, V>(&self, values: I) -> Predicate
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Predicate::new(
            self.clone(),
            Condition::In {
                values: values.into_iter().map(Into::into).collect(),
            },
        )
    }

    /// Same as `eq(Value::Null)`
    pub fn is_null(&self) -> Predicate {
        self.eq(Value::Null)
    }

    /// Same as `neq(Value::Null)`
    pub fn is_not_null(&self) -> Predicate {
        self.neq(Value::Null)
    }
}
