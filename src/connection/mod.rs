//! Connection collaborator contract
//!
//! The engine never opens database sessions itself. The embedding
//! application hands it something that implements [`Connection`], and the
//! engine consumes exactly three capabilities from it: execute SQL and
//! fetch the result rows, report the driver-side last-inserted row id, and
//! commit. Error classification is the collaborator's job too — the engine
//! decides retry/swallow/abort from the [`ConnectionError`] variant alone.

use thiserror::Error;

pub mod script;

pub use script::{ScriptConnection, ScriptLog};

/// One result row, in the column order of the statement that produced it.
pub type Row = Vec<Value>;

/// A database value as surfaced by the connection collaborator.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
}

impl Value {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Boolean coercion. MySQL drivers report booleans as `0`/`1` integers,
    /// so integer values coerce here as well.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(n) => Some(*n != 0),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// Errors surfaced by the connection collaborator, pre-classified.
///
/// The engine's recovery policy branches on the variant: `Integrity` is
/// swallowed during best-effort constraint replay, `MissingObject` is
/// swallowed during idempotent teardown, `LockTimeout` drives the MySQL
/// rename retry loop, and `Execute` aborts the enclosing call.
#[derive(Debug, Clone, Error)]
pub enum ConnectionError {
    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error("lock wait timeout: {0}")]
    LockTimeout(String),

    #[error("no such object: {0}")]
    MissingObject(String),

    #[error("statement failed: {0}")]
    Execute(String),
}

/// The capabilities the engine consumes from an opened database session.
///
/// `execute` may receive a string containing more than one statement (the
/// PostgreSQL insert path appends `SELECT LASTVAL();`); the collaborator
/// runs them in order and returns the rows of the last result-producing
/// statement. A statement that produces no rows returns an empty vec.
pub trait Connection: Send {
    fn execute(&mut self, sql: &str) -> Result<Vec<Row>, ConnectionError>;

    /// Driver-reported id of the last inserted row, where the driver tracks
    /// one (MySQL). `None` where it does not.
    fn last_insert_id(&mut self) -> Option<i64>;

    fn commit(&mut self) -> Result<(), ConnectionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_as_bool_coerces_integers() {
        assert_eq!(Value::Int(1).as_bool(), Some(true));
        assert_eq!(Value::Int(0).as_bool(), Some(false));
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::Text("t".into()).as_bool(), None);
    }

    #[test]
    fn test_as_i64_rejects_text() {
        assert_eq!(Value::Int(42).as_i64(), Some(42));
        assert_eq!(Value::Text("42".into()).as_i64(), None);
    }

    #[test]
    fn test_null_is_null() {
        assert!(Value::Null.is_null());
        assert!(!Value::Int(0).is_null());
    }
}
