//! MySQL statement templates
//!
//! MySQL accepts inline trigger bodies, reports the last insert id through
//! the driver, and swaps both names in one atomic `RENAME TABLE`. The
//! price is backtick quoting everywhere and a `CHANGE COLUMN` rename that
//! must re-state the column's definition.
//!
//! `INSERT IGNORE` on the chunk copy and `DELETE IGNORE` in the delete
//! trigger absorb rows the backfill has not reached yet.

use crate::connection::Row;
use crate::error::{Error, Result};
use crate::schema::Index;

use super::{RenameStrategy, SqlCommands, TriggerEvent};

#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlCommands;

impl SqlCommands for MySqlCommands {
    fn quote_ident(&self, ident: &str) -> String {
        format!("`{ident}`")
    }

    fn get_tables(&self, database_name: &str) -> String {
        format!("SHOW TABLES IN {database_name}")
    }

    fn create_statement_query(&self, table: &str) -> String {
        format!("SHOW CREATE TABLE {table}")
    }

    /// `SHOW CREATE TABLE` answers `(table, statement)`.
    fn create_statement_from_rows(&self, rows: &[Row]) -> Option<String> {
        rows.first()?.get(1)?.as_str().map(str::to_string)
    }

    fn shadow_create_template(&self, statement: &str, source_table: &str) -> String {
        statement.replace(
            &format!("CREATE TABLE `{source_table}`"),
            "CREATE TABLE `{}`",
        )
    }

    fn table_columns(&self, table: &str) -> String {
        format!("SHOW COLUMNS IN {table}")
    }

    fn column_definition_query(&self, database_name: &str, table: &str, column: &str) -> String {
        format!(
            "SELECT COLUMN_TYPE, IS_NULLABLE \
             FROM INFORMATION_SCHEMA.COLUMNS \
             WHERE TABLE_SCHEMA = '{database_name}' \
             AND TABLE_NAME = '{table}' \
             AND COLUMN_NAME = '{column}'"
        )
    }

    fn column_definition_from_row(&self, row: &Row) -> Option<String> {
        let column_type = row.first()?.as_str()?;
        if row.get(1)?.as_str() == Some("NO") {
            Some(format!("{column_type} NOT NULL"))
        } else {
            Some(column_type.to_string())
        }
    }

    fn get_constraints(&self, database_name: &str, table: &str) -> String {
        format!(
            "SELECT tc.CONSTRAINT_NAME, tc.TABLE_NAME, tc.CONSTRAINT_TYPE, \
             kcu.COLUMN_NAME, cc.CHECK_CLAUSE \
             FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS AS tc \
             LEFT OUTER JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE AS kcu \
             ON kcu.CONSTRAINT_SCHEMA = tc.CONSTRAINT_SCHEMA \
             AND kcu.CONSTRAINT_NAME = tc.CONSTRAINT_NAME \
             AND kcu.TABLE_NAME = tc.TABLE_NAME \
             LEFT OUTER JOIN INFORMATION_SCHEMA.CHECK_CONSTRAINTS AS cc \
             ON cc.CONSTRAINT_SCHEMA = tc.CONSTRAINT_SCHEMA \
             AND cc.CONSTRAINT_NAME = tc.CONSTRAINT_NAME \
             WHERE tc.TABLE_SCHEMA = '{database_name}' \
             AND tc.TABLE_NAME = '{table}' \
             AND tc.CONSTRAINT_TYPE != 'FOREIGN KEY'"
        )
    }

    fn foreign_keys(&self, database_name: &str, table: &str) -> String {
        format!(
            "SELECT kcu.CONSTRAINT_NAME, kcu.TABLE_NAME, kcu.COLUMN_NAME, \
             kcu.REFERENCED_TABLE_NAME, kcu.REFERENCED_COLUMN_NAME, \
             CASE WHEN kcu.REFERENCED_TABLE_NAME = '{table}' THEN 1 ELSE 0 END \
             FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE AS kcu \
             WHERE kcu.TABLE_SCHEMA = '{database_name}' \
             AND kcu.REFERENCED_TABLE_NAME IS NOT NULL \
             AND (kcu.TABLE_NAME = '{table}' OR kcu.REFERENCED_TABLE_NAME = '{table}')"
        )
    }

    fn foreign_key_exists(
        &self,
        database_name: &str,
        table: &str,
        column: &str,
        referenced_table: &str,
        referenced_column: &str,
    ) -> String {
        format!(
            "SELECT * FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE \
             WHERE TABLE_SCHEMA = '{database_name}' \
             AND TABLE_NAME = '{table}' \
             AND COLUMN_NAME = '{column}' \
             AND REFERENCED_TABLE_NAME = '{referenced_table}' \
             AND REFERENCED_COLUMN_NAME = '{referenced_column}'"
        )
    }

    fn get_indexes(&self, table: &str) -> String {
        format!("SHOW INDEX FROM {table}")
    }

    /// `SHOW INDEX` answers `(Table, Non_unique, Key_name, Seq_in_index,
    /// Column_name, ...)`; note the *non*-uniqueness flag.
    fn index_from_row(&self, row: &Row) -> Result<Index> {
        let text = |idx: usize, what: &str| {
            row.get(idx)
                .and_then(crate::connection::Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| Error::UnexpectedResult(format!("missing {what} in column {idx}")))
        };
        let non_unique = row
            .get(1)
            .and_then(crate::connection::Value::as_bool)
            .ok_or_else(|| Error::UnexpectedResult("missing Non_unique in column 1".into()))?;
        Ok(Index {
            table: text(0, "index table")?,
            name: text(2, "index name")?,
            unique: !non_unique,
            column: text(4, "index column")?,
        })
    }

    fn create_table(&self, table: &str, primary_key_col: &str) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {table} \
             ({primary_key_col} integer AUTO_INCREMENT NOT NULL PRIMARY KEY)"
        )
    }

    fn alter_column(&self, table: &str, column: &str, definition: &str) -> String {
        format!("ALTER TABLE {table} MODIFY COLUMN `{column}` {definition}")
    }

    fn rename_requires_definition(&self) -> bool {
        true
    }

    fn rename_column(
        &self,
        table: &str,
        old_name: &str,
        new_name: &str,
        definition: Option<&str>,
    ) -> String {
        format!(
            "ALTER TABLE {table} CHANGE COLUMN {old_name} {new_name} {}",
            definition.unwrap_or_default()
        )
    }

    fn drop_foreign_key(&self, table: &str, fk_name: &str) -> String {
        format!("ALTER TABLE {table} DROP FOREIGN KEY IF EXISTS {fk_name}")
    }

    fn add_index(&self, table: &str, index_name: &str, columns: &str, unique: bool) -> String {
        let unique_str = if unique { "UNIQUE " } else { "" };
        format!("ALTER TABLE {table} ADD {unique_str}INDEX {index_name} ({columns})")
    }

    fn drop_index(&self, table: &str, index_name: &str) -> String {
        format!("ALTER TABLE {table} DROP INDEX IF EXISTS {index_name}")
    }

    fn insert_row(&self, table: &str, columns: &str, values: &str) -> String {
        format!("INSERT INTO {table} ({columns}) VALUES ({values})")
    }

    fn insert_returns_id(&self) -> bool {
        false
    }

    fn chunk_insert_prefix(&self) -> &'static str {
        "INSERT IGNORE"
    }

    fn insert_trigger_statements(
        &self,
        trigger_name: &str,
        source_table: &str,
        dest_table: &str,
        dest_cols: &str,
        new_values: &str,
    ) -> Vec<String> {
        vec![format!(
            "CREATE TRIGGER {trigger_name} AFTER INSERT ON {source_table} \
             FOR EACH ROW \
             INSERT INTO {dest_table} ({dest_cols}) VALUES ({new_values})"
        )]
    }

    fn update_trigger_statements(
        &self,
        trigger_name: &str,
        source_table: &str,
        dest_table: &str,
        assignments: &str,
        pk_col: &str,
    ) -> Vec<String> {
        vec![format!(
            "CREATE TRIGGER {trigger_name} AFTER UPDATE ON {source_table} \
             FOR EACH ROW \
             UPDATE {dest_table} SET {assignments} \
             WHERE `{pk_col}`=`NEW`.`{pk_col}`"
        )]
    }

    fn delete_trigger_statements(
        &self,
        trigger_name: &str,
        source_table: &str,
        dest_table: &str,
        pk_col: &str,
    ) -> Vec<String> {
        vec![format!(
            "CREATE TRIGGER {trigger_name} AFTER DELETE ON {source_table} \
             FOR EACH ROW \
             DELETE IGNORE FROM {dest_table} \
             WHERE {dest_table}.{pk_col} = OLD.{pk_col}"
        )]
    }

    fn drop_trigger_statements(
        &self,
        trigger_name: &str,
        _event: TriggerEvent,
        _source_table: &str,
        _dest_table: &str,
    ) -> Vec<String> {
        vec![format!("DROP TRIGGER IF EXISTS `{trigger_name}`")]
    }

    fn rename_strategy(&self) -> RenameStrategy {
        RenameStrategy::AtomicRetry
    }

    fn rename_tables_statements(
        &self,
        source_table: &str,
        archive_table: &str,
        shadow_table: &str,
    ) -> Vec<String> {
        vec![format!(
            "RENAME TABLE `{source_table}` TO `{archive_table}`, \
             `{shadow_table}` TO `{source_table}`"
        )]
    }

    fn set_foreign_key_checks(&self, enabled: bool) -> Option<String> {
        Some(format!(
            "SET FOREIGN_KEY_CHECKS = {}",
            if enabled { 1 } else { 0 }
        ))
    }
}
