use std::fmt;

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

/// A stored item as returned by a [`crate::store::RecordStore`]: field name to value.
///
/// Absent fields and explicit JSON nulls are treated the same way by the decoders.
pub type RawRecord = serde_json::Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldProblem {
    Missing,
    WrongType { expected: &'static str },
    Invalid(String),
}

impl fmt::Display for FieldProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldProblem::Missing => f.write_str("missing"),
            FieldProblem::WrongType { expected } => write!(f, "expected {expected}"),
            FieldProblem::Invalid(detail) => write!(f, "invalid: {detail}"),
        }
    }
}

/// Every field problem found while decoding one record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {table} record: {}", describe(.problems))]
pub struct DecodeError {
    pub table: String,
    pub problems: Vec<(String, FieldProblem)>,
}

impl DecodeError {
    pub fn problem(&self, field: &str) -> Option<&FieldProblem> {
        self.problems
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, problem)| problem)
    }
}

fn describe(problems: &[(String, FieldProblem)]) -> String {
    problems
        .iter()
        .map(|(field, problem)| format!("{field} {problem}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Reads typed fields out of a [`RawRecord`], collecting problems instead of stopping at the first.
///
/// Getters return `None` when the field could not be read; call [`FieldReader::finish`] before
/// trusting any of the returned values.
pub struct FieldReader<'a> {
    table: &'a str,
    record: &'a RawRecord,
    problems: Vec<(String, FieldProblem)>,
}

impl<'a> FieldReader<'a> {
    pub fn new(table: &'a str, record: &'a RawRecord) -> Self {
        Self {
            table,
            record,
            problems: Vec::new(),
        }
    }

    fn value(&self, field: &str) -> Option<&'a Value> {
        match self.record.get(field) {
            None | Some(Value::Null) => None,
            Some(value) => Some(value),
        }
    }

    fn report(&mut self, field: &str, problem: FieldProblem) {
        self.problems.push((field.to_string(), problem));
    }

    /// Records a field that was read but failed a domain check.
    pub fn invalid(&mut self, field: &str, detail: impl Into<String>) {
        self.report(field, FieldProblem::Invalid(detail.into()));
    }

    fn require<T>(&mut self, field: &str, value: Option<T>) -> Option<T> {
        if value.is_none() && self.value(field).is_none() {
            self.report(field, FieldProblem::Missing);
        }
        value
    }

    pub fn string(&mut self, field: &str) -> Option<String> {
        let value = self.optional_string(field);
        self.require(field, value)
    }

    pub fn non_empty_string(&mut self, field: &str) -> Option<String> {
        let value = self.string(field)?;
        if value.is_empty() {
            self.report(field, FieldProblem::Invalid("empty string".to_string()));
            return None;
        }
        Some(value)
    }

    pub fn optional_string(&mut self, field: &str) -> Option<String> {
        match self.value(field)? {
            Value::String(value) => Some(value.clone()),
            _ => {
                self.report(field, FieldProblem::WrongType { expected: "string" });
                None
            }
        }
    }

    pub fn integer(&mut self, field: &str) -> Option<i64> {
        let value = self.optional_integer(field);
        self.require(field, value)
    }

    pub fn optional_integer(&mut self, field: &str) -> Option<i64> {
        match self.value(field)? {
            Value::Number(number) if number.is_i64() => number.as_i64(),
            Value::Number(number) if number.is_u64() => {
                self.report(
                    field,
                    FieldProblem::Invalid(format!("{number} is out of range")),
                );
                None
            }
            _ => {
                self.report(
                    field,
                    FieldProblem::WrongType {
                        expected: "integer",
                    },
                );
                None
            }
        }
    }

    pub fn float(&mut self, field: &str) -> Option<f64> {
        let value = match self.value(field) {
            Some(Value::Number(number)) => number.as_f64(),
            Some(_) => {
                self.report(field, FieldProblem::WrongType { expected: "number" });
                None
            }
            None => None,
        };
        self.require(field, value)
    }

    /// Booleans may be stored natively or as the integers 0 and 1.
    pub fn flag(&mut self, field: &str) -> Option<bool> {
        let value = match self.value(field) {
            Some(Value::Bool(value)) => Some(*value),
            Some(Value::Number(number)) => match number.as_i64() {
                Some(0) => Some(false),
                Some(1) => Some(true),
                _ => {
                    self.report(
                        field,
                        FieldProblem::Invalid(format!("{number} is not a boolean")),
                    );
                    None
                }
            },
            Some(_) => {
                self.report(field, FieldProblem::WrongType { expected: "boolean" });
                None
            }
            None => None,
        };
        self.require(field, value)
    }

    pub fn timestamp(&mut self, field: &str) -> Option<DateTime<Utc>> {
        let raw = self.string(field)?;
        match DateTime::parse_from_rfc3339(&raw) {
            Ok(parsed) => Some(parsed.with_timezone(&Utc)),
            Err(err) => {
                self.report(field, FieldProblem::Invalid(format!("{raw:?}: {err}")));
                None
            }
        }
    }

    /// A list of strings stored either as a JSON array or as a JSON-encoded string.
    pub fn optional_string_list(&mut self, field: &str) -> Option<Vec<String>> {
        let items = match self.value(field)? {
            Value::Array(items) => items.clone(),
            Value::String(encoded) => match serde_json::from_str::<Vec<Value>>(encoded) {
                Ok(items) => items,
                Err(err) => {
                    self.report(field, FieldProblem::Invalid(err.to_string()));
                    return None;
                }
            },
            _ => {
                self.report(field, FieldProblem::WrongType { expected: "list" });
                return None;
            }
        };
        let mut values = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Value::String(value) => values.push(value),
                _ => {
                    self.report(
                        field,
                        FieldProblem::WrongType {
                            expected: "list of strings",
                        },
                    );
                    return None;
                }
            }
        }
        Some(values)
    }

    pub fn finish(self) -> Result<(), DecodeError> {
        if self.problems.is_empty() {
            Ok(())
        } else {
            Err(DecodeError {
                table: self.table.to_string(),
                problems: self.problems,
            })
        }
    }
}
