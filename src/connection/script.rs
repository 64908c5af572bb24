//! Scripted connection double
//!
//! An in-process [`Connection`] for tests: statements are matched against
//! registered substring rules and answered with canned rows or errors,
//! while every executed statement is appended to a shared log the test can
//! inspect after the engine has consumed the connection.
//!
//! Rules are matched in registration order; the first rule whose needle
//! occurs in the statement and which still has an outcome wins. A rule
//! registered with a finite outcome queue falls through once exhausted.
//! Statements no rule matches answer with an empty row set, which is what
//! a real driver reports for a non-returning statement.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Connection, ConnectionError, Row};

/// Shared view of the statements a [`ScriptConnection`] has executed.
///
/// Clone it out of the connection before handing the connection to the
/// engine; it stays readable afterwards.
#[derive(Debug, Clone, Default)]
pub struct ScriptLog(Arc<Mutex<Vec<String>>>);

impl ScriptLog {
    pub fn statements(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    /// Number of executed statements containing the given fragment.
    pub fn count_containing(&self, needle: &str) -> usize {
        self.0.lock().iter().filter(|s| s.contains(needle)).count()
    }

    /// All executed statements containing the given fragment.
    pub fn containing(&self, needle: &str) -> Vec<String> {
        self.0
            .lock()
            .iter()
            .filter(|s| s.contains(needle))
            .cloned()
            .collect()
    }

    fn push(&self, sql: &str) {
        self.0.lock().push(sql.to_string());
    }
}

type Outcome = Result<Vec<Row>, ConnectionError>;

struct Rule {
    needle: String,
    /// Outcomes consumed front-to-back; `None` queue means the rule
    /// repeats `sticky` forever.
    queued: Option<VecDeque<Outcome>>,
    sticky: Option<Outcome>,
}

impl Rule {
    fn take(&mut self) -> Option<Outcome> {
        match &mut self.queued {
            Some(q) => q.pop_front(),
            None => self.sticky.clone(),
        }
    }
}

#[derive(Default)]
pub struct ScriptConnection {
    rules: Vec<Rule>,
    log: ScriptLog,
    last_insert_id: Option<i64>,
}

impl ScriptConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle onto the statement log, valid after the connection is moved
    /// into a database handle.
    pub fn log(&self) -> ScriptLog {
        self.log.clone()
    }

    /// Statements containing `needle` always answer with these rows.
    pub fn respond(&mut self, needle: &str, rows: Vec<Row>) -> &mut Self {
        self.rules.push(Rule {
            needle: needle.to_string(),
            queued: None,
            sticky: Some(Ok(rows)),
        });
        self
    }

    /// Statements containing `needle` answer with each row set in turn,
    /// then the rule falls through to later rules (or the empty default).
    pub fn respond_seq(&mut self, needle: &str, sets: Vec<Vec<Row>>) -> &mut Self {
        self.rules.push(Rule {
            needle: needle.to_string(),
            queued: Some(sets.into_iter().map(Ok).collect()),
            sticky: None,
        });
        self
    }

    /// Statements containing `needle` always fail with this error.
    pub fn fail(&mut self, needle: &str, err: ConnectionError) -> &mut Self {
        self.rules.push(Rule {
            needle: needle.to_string(),
            queued: None,
            sticky: Some(Err(err)),
        });
        self
    }

    /// Statements containing `needle` fail `times` times, then the rule
    /// falls through.
    pub fn fail_times(&mut self, needle: &str, err: ConnectionError, times: usize) -> &mut Self {
        self.rules.push(Rule {
            needle: needle.to_string(),
            queued: Some((0..times).map(|_| Err(err.clone())).collect()),
            sticky: None,
        });
        self
    }

    /// Fix the driver-reported last insert id.
    pub fn set_last_insert_id(&mut self, id: i64) -> &mut Self {
        self.last_insert_id = Some(id);
        self
    }
}

impl Connection for ScriptConnection {
    fn execute(&mut self, sql: &str) -> Result<Vec<Row>, ConnectionError> {
        self.log.push(sql);
        for rule in &mut self.rules {
            if sql.contains(&rule.needle)
                && let Some(outcome) = rule.take()
            {
                return outcome;
            }
        }
        Ok(Vec::new())
    }

    fn last_insert_id(&mut self) -> Option<i64> {
        self.last_insert_id
    }

    fn commit(&mut self) -> Result<(), ConnectionError> {
        Ok(())
    }
}

/// Build a [`Row`] from literal values: `row![1, "name", Value::Null]`.
#[macro_export]
macro_rules! row {
    ($($val:expr),* $(,)?) => {
        vec![$($crate::connection::Value::from($val)),*]
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Value;

    #[test]
    fn test_unmatched_statement_answers_empty() {
        let mut conn = ScriptConnection::new();
        let rows = conn.execute("DROP TABLE users").unwrap();
        assert!(rows.is_empty(), "non-returning statements answer empty");
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let mut conn = ScriptConnection::new();
        conn.respond("COUNT(1) FROM migrate_users", vec![row![7]])
            .respond("COUNT(1)", vec![row![99]]);

        let rows = conn.execute("SELECT COUNT(1) FROM migrate_users").unwrap();
        assert_eq!(rows[0][0], Value::Int(7));

        let rows = conn.execute("SELECT COUNT(1) FROM users").unwrap();
        assert_eq!(rows[0][0], Value::Int(99));
    }

    #[test]
    fn test_seq_rule_falls_through_when_exhausted() {
        let mut conn = ScriptConnection::new();
        conn.respond_seq("MAX", vec![vec![row![2]]])
            .respond("MAX", vec![row![5]]);

        assert_eq!(conn.execute("SELECT MAX(id)").unwrap()[0][0], Value::Int(2));
        assert_eq!(conn.execute("SELECT MAX(id)").unwrap()[0][0], Value::Int(5));
    }

    #[test]
    fn test_fail_times_then_succeeds() {
        let mut conn = ScriptConnection::new();
        conn.fail_times(
            "RENAME TABLE",
            ConnectionError::LockTimeout("lock wait".into()),
            2,
        );

        assert!(conn.execute("RENAME TABLE a TO b").is_err());
        assert!(conn.execute("RENAME TABLE a TO b").is_err());
        assert!(conn.execute("RENAME TABLE a TO b").is_ok(), "third attempt passes");
    }

    #[test]
    fn test_log_survives_moving_the_connection() {
        let mut conn = ScriptConnection::new();
        let log = conn.log();
        conn.execute("SELECT 1").unwrap();
        drop(conn);
        assert_eq!(log.statements(), vec!["SELECT 1".to_string()]);
        assert_eq!(log.count_containing("SELECT"), 1);
    }
}
