//! Dialect SQL command set
//!
//! Every SQL string the engine executes is produced here. [`SqlCommands`]
//! is a pure capability set — no I/O, no state — so the higher layers stay
//! dialect-agnostic: the table handle and migration engine ask for a
//! statement by task and never look inside it.
//!
//! Statements whose semantics and syntax coincide across dialects are
//! default method bodies; each dialect overrides where syntax diverges
//! (identifier quoting, trigger bodies, the rename swap) and answers the
//! small set of capability hooks the engine branches on (last-insert-id
//! strategy, rename strategy, sequence support).

use strum_macros::{Display, EnumIter, IntoStaticStr};

use crate::connection::{Row, Value};
use crate::error::{Error, Result};
use crate::schema::{ConstraintKind, Index};

pub mod mysql;
pub mod postgres;

pub use mysql::MySqlCommands;
pub use postgres::PostgresCommands;

/// The three DML events mirrored from the source into the shadow table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum TriggerEvent {
    Insert,
    Update,
    Delete,
}

/// How a dialect swaps the source and shadow names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameStrategy {
    /// Two renames inside an explicit transaction (PostgreSQL). A failure
    /// after the triggers are dropped is the critical window and is fatal.
    Transactional,
    /// One atomic `RENAME TABLE`, retried on lock-wait timeouts (MySQL).
    AtomicRetry,
}

pub trait SqlCommands: Send + Sync {
    // Quoting --------------------------------------------------------

    /// Quote one identifier for this dialect.
    fn quote_ident(&self, ident: &str) -> String {
        ident.to_string()
    }

    // Introspection --------------------------------------------------

    /// List user tables visible in the given database/schema.
    fn get_tables(&self, database_name: &str) -> String;

    /// Query whose result carries the table's CREATE statement.
    fn create_statement_query(&self, table: &str) -> String;

    /// Extract the CREATE statement text from that query's rows.
    fn create_statement_from_rows(&self, rows: &[Row]) -> Option<String>;

    /// Rewrite a source CREATE statement into a `{}`-placeholder template
    /// so the shadow table can be created under its own name.
    fn shadow_create_template(&self, statement: &str, source_table: &str) -> String;

    fn table_columns(&self, table: &str) -> String;

    /// Column type/nullability/default lookup, enough to re-state the
    /// column in DDL.
    fn column_definition_query(&self, database_name: &str, table: &str, column: &str) -> String;

    /// Assemble a column definition string from that query's row.
    fn column_definition_from_row(&self, row: &Row) -> Option<String>;

    /// Non-foreign-key constraints, shaped
    /// `(name, table, kind, column, check_clause)`.
    fn get_constraints(&self, database_name: &str, table: &str) -> String;

    /// Foreign keys in both directions, shaped
    /// `(name, table, column, referenced table, referenced column,
    /// referenced flag)` where the flag marks keys defined elsewhere that
    /// point at this table.
    fn foreign_keys(&self, database_name: &str, table: &str) -> String;

    fn foreign_key_exists(
        &self,
        database_name: &str,
        table: &str,
        column: &str,
        referenced_table: &str,
        referenced_column: &str,
    ) -> String;

    fn get_indexes(&self, table: &str) -> String;

    /// Parse one row of [`get_indexes`] output. The default expects the
    /// canonical `(table, name, unique, column)` shape.
    fn index_from_row(&self, row: &Row) -> Result<Index> {
        Index::from_row(row)
    }

    fn get_triggers(&self, database_name: &str, table: &str) -> String {
        format!(
            "SELECT trigger_name FROM information_schema.triggers AS it \
             WHERE it.trigger_schema = '{database_name}' \
             AND it.event_object_table = '{table}'"
        )
    }

    // DDL ------------------------------------------------------------

    /// Initial empty table with an autoincrementing primary key.
    fn create_table(&self, table: &str, primary_key_col: &str) -> String;

    fn drop_table(&self, table: &str, cascade: bool) -> String {
        let mut sql = format!("DROP TABLE {table}");
        if cascade {
            sql.push_str(" CASCADE");
        }
        sql
    }

    fn add_column(&self, table: &str, column: &str, definition: &str) -> String {
        format!(
            "ALTER TABLE {table} ADD COLUMN {} {definition}",
            self.quote_ident(column)
        )
    }

    fn alter_column(&self, table: &str, column: &str, definition: &str) -> String;

    fn drop_column(&self, table: &str, column: &str) -> String {
        format!("ALTER TABLE {table} DROP {}", self.quote_ident(column))
    }

    /// Whether [`rename_column`] must be handed the column's current
    /// definition (MySQL `CHANGE COLUMN` re-states the type).
    fn rename_requires_definition(&self) -> bool {
        false
    }

    fn rename_column(
        &self,
        table: &str,
        old_name: &str,
        new_name: &str,
        definition: Option<&str>,
    ) -> String;

    fn add_constraint(
        &self,
        table: &str,
        constraint_name: &str,
        kind: ConstraintKind,
        column: &str,
    ) -> String {
        format!("ALTER TABLE {table} ADD CONSTRAINT {constraint_name} {kind} ({column})")
    }

    fn add_check(&self, table: &str, check_clause: &str) -> String {
        format!("ALTER TABLE {table} ADD CHECK ({check_clause})")
    }

    /// The `CHECK (col NOT NULL)` shorthand becomes a column constraint.
    fn add_check_not_null(&self, table: &str, column: &str) -> String {
        format!("ALTER TABLE {table} ALTER COLUMN {column} SET NOT NULL")
    }

    fn drop_constraint(&self, table: &str, constraint_name: &str) -> String {
        format!("ALTER TABLE {table} DROP CONSTRAINT {constraint_name}")
    }

    fn add_foreign_key(
        &self,
        table: &str,
        fk_name: &str,
        column: &str,
        fk_table: &str,
        fk_column: &str,
    ) -> String {
        format!(
            "ALTER TABLE {table} ADD CONSTRAINT {fk_name} \
             FOREIGN KEY ({column}) REFERENCES {fk_table} ({fk_column})"
        )
    }

    fn drop_foreign_key(&self, table: &str, fk_name: &str) -> String;

    fn add_index(&self, table: &str, index_name: &str, columns: &str, unique: bool) -> String;

    fn drop_index(&self, table: &str, index_name: &str) -> String;

    // DML ------------------------------------------------------------

    /// Insert a row. On PostgreSQL the statement also selects `LASTVAL()`
    /// so the new id comes back in the result rows.
    fn insert_row(&self, table: &str, columns: &str, values: &str) -> String;

    /// Whether [`insert_row`]'s result rows carry the inserted id. When
    /// false, the driver-reported last insert id is used instead.
    fn insert_returns_id(&self) -> bool;

    fn get_row(&self, columns: &str, table: &str, pk_col: &str, pk: i64) -> String {
        format!("SELECT {columns} FROM {table} WHERE {pk_col}={pk}")
    }

    fn update_row(&self, table: &str, assignments: &str, pk_col: &str, pk: i64) -> String {
        format!("UPDATE {table} SET {assignments} WHERE {pk_col}={pk}")
    }

    fn delete_row(&self, table: &str, pk_col: &str, pk: i64) -> String {
        format!("DELETE FROM {table} WHERE {pk_col}={pk}")
    }

    fn table_count(&self, table: &str) -> String {
        format!("SELECT COUNT(1) FROM {table}")
    }

    fn min_pk(&self, table: &str, pk_col: &str) -> String {
        format!("SELECT MIN({pk_col}) FROM {table}")
    }

    fn max_pk(&self, table: &str, pk_col: &str) -> String {
        format!("SELECT MAX({pk_col}) FROM {table}")
    }

    // Chunked backfill ----------------------------------------------

    /// MAX pk over the next page of ids strictly greater than `last_pk`.
    fn next_pk(&self, table: &str, pk_col: &str, last_pk: i64, limit: u64) -> String {
        format!(
            "SELECT MAX(T1.{pk_col}) FROM (\
             SELECT {pk_col} FROM {table} \
             WHERE {pk_col}>{last_pk} \
             ORDER BY {pk_col} LIMIT {limit}) AS T1"
        )
    }

    /// Insert prefix for the chunk copy; MySQL tolerates re-runs with
    /// `INSERT IGNORE`, PostgreSQL relies on the anti-join alone.
    fn chunk_insert_prefix(&self) -> &'static str {
        "INSERT"
    }

    /// Copy one chunk from source into shadow: LEFT JOIN anti-match on pk,
    /// `pk >= last_pk` so the final boundary row is never skipped.
    fn copy_chunk(
        &self,
        table: &str,
        dest_cols: &str,
        origin_cols: &str,
        source_table: &str,
        pk_col: &str,
        last_pk: i64,
        limit: u64,
    ) -> String {
        format!(
            "{prefix} INTO {table} ({dest_cols}) (\
             SELECT {origin_cols} FROM {source} \
             LEFT OUTER JOIN {table} ON {source}.{pk_col}={table}.{pk_col} \
             WHERE {table}.{pk_col} IS NULL \
             AND {source}.{pk_col} >= {last_pk} \
             ORDER BY {pk_col} LIMIT {limit})",
            prefix = self.chunk_insert_prefix(),
            source = source_table,
        )
    }

    // Triggers -------------------------------------------------------

    /// Statements installing the AFTER INSERT mirror trigger.
    fn insert_trigger_statements(
        &self,
        trigger_name: &str,
        source_table: &str,
        dest_table: &str,
        dest_cols: &str,
        new_values: &str,
    ) -> Vec<String>;

    /// Statements installing the AFTER UPDATE mirror trigger.
    fn update_trigger_statements(
        &self,
        trigger_name: &str,
        source_table: &str,
        dest_table: &str,
        assignments: &str,
        pk_col: &str,
    ) -> Vec<String>;

    /// Statements installing the AFTER DELETE mirror trigger.
    fn delete_trigger_statements(
        &self,
        trigger_name: &str,
        source_table: &str,
        dest_table: &str,
        pk_col: &str,
    ) -> Vec<String>;

    /// Statements tearing one trigger down again (PostgreSQL also drops
    /// the backing function).
    fn drop_trigger_statements(
        &self,
        trigger_name: &str,
        event: TriggerEvent,
        source_table: &str,
        dest_table: &str,
    ) -> Vec<String>;

    // Rename swap ----------------------------------------------------

    fn rename_strategy(&self) -> RenameStrategy;

    /// The statements performing source→archive, shadow→source.
    fn rename_tables_statements(
        &self,
        source_table: &str,
        archive_table: &str,
        shadow_table: &str,
    ) -> Vec<String>;

    // Sequences (PostgreSQL) ----------------------------------------

    /// Sequences owned by a table's columns, shaped `(sequence, column)`.
    /// `None` on dialects without sequence ownership.
    fn get_sequences(&self, table: &str) -> Option<String> {
        let _ = table;
        None
    }

    fn get_database_sequences(&self, database_name: &str) -> Option<String> {
        let _ = database_name;
        None
    }

    fn create_sequence(&self, sequence_name: &str) -> Option<String> {
        let _ = sequence_name;
        None
    }

    fn remove_sequence_from_col(&self, table: &str, column: &str) -> Option<String> {
        let _ = (table, column);
        None
    }

    fn set_sequence_owner(&self, sequence_name: &str, table: &str, column: &str) -> Option<String> {
        let _ = (sequence_name, table, column);
        None
    }

    // Session --------------------------------------------------------

    /// Statements run once when a database handle is constructed.
    fn session_setup_statements(&self) -> Vec<String> {
        Vec::new()
    }

    /// Statements run when the handle is torn down.
    fn session_teardown_statements(&self) -> Vec<String> {
        Vec::new()
    }

    /// MySQL session toggle for foreign-key enforcement.
    fn set_foreign_key_checks(&self, enabled: bool) -> Option<String> {
        let _ = enabled;
        None
    }
}

// Formatting helpers ------------------------------------------------

/// Join column names, quoting each for the dialect.
pub fn join_cols(commands: &dyn SqlCommands, cols: &[String]) -> String {
    cols.iter()
        .map(|c| commands.quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Qualify each column with a table (or `NEW`/`OLD`) prefix and join.
pub fn qualify(commands: &dyn SqlCommands, table: &str, cols: &[String]) -> String {
    cols.iter()
        .map(|c| format!("{}.{}", commands.quote_ident(table), commands.quote_ident(c)))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Positionally pair destination columns with qualified origin columns:
/// `dest=NEW.origin, ...`.
pub fn equals(
    commands: &dyn SqlCommands,
    dest_cols: &[String],
    table: &str,
    origin_cols: &[String],
) -> String {
    dest_cols
        .iter()
        .zip(origin_cols)
        .map(|(dest, origin)| {
            format!(
                "{}={}.{}",
                commands.quote_ident(dest),
                commands.quote_ident(table),
                commands.quote_ident(origin)
            )
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Format one value as a SQL literal. Integers and floats keep their
/// decimal form; strings are single-quoted with embedded quotes doubled.
/// Anything else aborts the enclosing call.
pub fn sql_literal(value: &Value) -> Result<String> {
    match value {
        Value::Int(n) => Ok(n.to_string()),
        Value::Float(f) => Ok(f.to_string()),
        Value::Text(s) => Ok(format!("'{}'", s.replace('\'', "''"))),
        Value::Null => Err(unsupported(value, "null")),
        Value::Bool(_) => Err(unsupported(value, "boolean")),
    }
}

fn unsupported(value: &Value, kind: &'static str) -> Error {
    Error::UnsupportedValue {
        value: format!("{value:?}"),
        kind,
    }
}

/// Join values as SQL literals for an INSERT list.
pub fn join_values(values: &[Value]) -> Result<String> {
    let escaped: Vec<String> = values.iter().map(sql_literal).collect::<Result<_>>()?;
    Ok(escaped.join(", "))
}

/// Join `(column, value)` pairs as SET assignments, quoting identifiers
/// for the dialect.
pub fn join_assignments(commands: &dyn SqlCommands, pairs: &[(String, Value)]) -> Result<String> {
    let parts: Vec<String> = pairs
        .iter()
        .map(|(col, val)| Ok(format!("{}={}", commands.quote_ident(col), sql_literal(val)?)))
        .collect::<Result<_>>()?;
    Ok(parts.join(", "))
}
