//! Table handle
//!
//! A thin façade over one live table: introspection into the schema entity
//! types, DDL, row CRUD, and the best-effort replay of constraints,
//! foreign keys, and indexes onto another table. Handles are stateless
//! projections — all state lives in the database — so they are cheap to
//! clone and safe to recreate after a crash.
//!
//! Constraint and foreign-key replay is deliberately forgiving: a shadow
//! table being rebuilt next to a production table must not take the
//! migration down because one constraint already exists. Those failures
//! are logged and skipped; everything else propagates.

use std::collections::HashMap;

use rand::Rng;
use tracing::warn;

use crate::commands::{self, SqlCommands};
use crate::connection::Value;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::schema::{Constraint, ConstraintKind, ForeignKey, Index};

#[derive(Clone)]
pub struct Table<'a> {
    db: &'a Database,
    name: String,
    primary_key_column: String,
}

impl<'a> std::fmt::Debug for Table<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.name)
            .field("primary_key_column", &self.primary_key_column)
            .finish()
    }
}

impl<'a> Table<'a> {
    pub fn new(db: &'a Database, name: &str, primary_key_column: &str) -> Self {
        Self {
            db,
            name: name.to_string(),
            primary_key_column: primary_key_column.to_string(),
        }
    }

    pub fn db(&self) -> &'a Database {
        self.db
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn primary_key_column(&self) -> &str {
        &self.primary_key_column
    }

    fn commands(&self) -> &dyn SqlCommands {
        self.db.commands()
    }

    /// Name this table's shadow would carry.
    pub fn migrate_name(&self) -> String {
        format!("migrate_{}", self.name)
    }

    /// Name this table carries after the rename swap archives it.
    pub fn archive_name(&self) -> String {
        format!("archive_{}", self.name)
    }

    // Table DDL ------------------------------------------------------

    /// Create an initial empty table with an incrementing primary key.
    pub fn create(&self) -> Result<()> {
        self.db.execute(
            &self
                .commands()
                .create_table(&self.name, &self.primary_key_column),
        )?;
        self.db.commit()
    }

    /// The table's CREATE statement, whitespace-collapsed.
    pub fn create_statement(&self) -> Result<String> {
        if !self.db.table_exists(&self.name)? {
            return Err(Error::NoSuchTable(self.name.clone()));
        }
        let rows = self
            .db
            .execute(&self.commands().create_statement_query(&self.name))?;
        let statement = self
            .commands()
            .create_statement_from_rows(&rows)
            .ok_or_else(|| {
                Error::UnexpectedResult(format!("no create statement for {}", self.name))
            })?;
        Ok(statement.split_whitespace().collect::<Vec<_>>().join(" "))
    }

    /// Execute a verbatim CREATE template (table name as `{}`) when the
    /// table is absent, pre-creating any sequences it references.
    pub fn create_from_statement(&self, statement: &str) -> Result<()> {
        if !self.db.table_exists(&self.name)? {
            self.db.prepare_sequences(statement)?;
            self.db.execute(&statement.replace("{}", &self.name))?;
            self.db.commit()?;
        }
        Ok(())
    }

    /// Drop the table, removing its foreign keys first.
    pub fn drop(&self, cascade: bool) -> Result<()> {
        if self.db.table_exists(&self.name)? {
            self.drop_foreign_keys()?;
            self.db
                .execute(&self.commands().drop_table(&self.name, cascade))?;
            self.db.commit()?;
        }
        Ok(())
    }

    // Rows -----------------------------------------------------------

    /// Fetch one row by primary key as a column→value mapping.
    pub fn get_row(&self, pk: i64) -> Result<Option<HashMap<String, Value>>> {
        let columns = self.columns()?;
        let rows = self.db.execute(&self.commands().get_row(
            &commands::join_cols(self.commands(), &columns),
            &self.name,
            &self.primary_key_column,
            pk,
        ))?;
        match rows.into_iter().next() {
            Some(row) => Ok(Some(dictify(&columns, row)?)),
            None => Ok(None),
        }
    }

    /// Insert a row and return the new primary key.
    pub fn insert_row(&self, row: &[(&str, Value)]) -> Result<i64> {
        let columns: Vec<String> = row.iter().map(|(col, _)| col.to_string()).collect();
        let values: Vec<Value> = row.iter().map(|(_, val)| val.clone()).collect();
        let sql = self.commands().insert_row(
            &self.name,
            &commands::join_cols(self.commands(), &columns),
            &commands::join_values(&values)?,
        );
        let rows = self.db.execute(&sql)?;
        let id = if self.commands().insert_returns_id() {
            rows.first().and_then(|row| row.first()).and_then(Value::as_i64)
        } else {
            self.db.last_insert_id()
        };
        id.ok_or_else(|| Error::UnexpectedResult(format!("no inserted id for {}", self.name)))
    }

    pub fn update_row(&self, pk: i64, row: &[(&str, Value)]) -> Result<()> {
        let pairs: Vec<(String, Value)> = row
            .iter()
            .map(|(col, val)| (col.to_string(), val.clone()))
            .collect();
        let assignments = commands::join_assignments(self.commands(), &pairs)?;
        self.db.execute(&self.commands().update_row(
            &self.name,
            &assignments,
            &self.primary_key_column,
            pk,
        ))?;
        Ok(())
    }

    pub fn delete_row(&self, pk: i64) -> Result<()> {
        self.db
            .execute(
                &self
                    .commands()
                    .delete_row(&self.name, &self.primary_key_column, pk),
            )?;
        Ok(())
    }

    pub fn count(&self) -> Result<i64> {
        let rows = self.db.execute(&self.commands().table_count(&self.name))?;
        rows.first()
            .and_then(|row| row.first())
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::UnexpectedResult(format!("no count for {}", self.name)))
    }

    /// Minimum primary key, `None` when the table is empty.
    pub fn min_pk(&self) -> Result<Option<i64>> {
        let rows = self
            .db
            .execute(&self.commands().min_pk(&self.name, &self.primary_key_column))?;
        Ok(rows.first().and_then(|row| row.first()).and_then(Value::as_i64))
    }

    /// Maximum primary key, `None` when the table is empty.
    pub fn max_pk(&self) -> Result<Option<i64>> {
        let rows = self
            .db
            .execute(&self.commands().max_pk(&self.name, &self.primary_key_column))?;
        Ok(rows.first().and_then(|row| row.first()).and_then(Value::as_i64))
    }

    // Columns --------------------------------------------------------

    pub fn columns(&self) -> Result<Vec<String>> {
        let rows = self.db.execute(&self.commands().table_columns(&self.name))?;
        Ok(rows
            .iter()
            .filter_map(|row| row.first().and_then(Value::as_str).map(str::to_string))
            .collect())
    }

    pub fn column_exists(&self, column_name: &str) -> Result<bool> {
        Ok(self.columns()?.iter().any(|c| c == column_name))
    }

    /// The column's definition as re-stateable DDL (type, nullability,
    /// default where the dialect records one).
    pub fn get_column_definition(&self, column_name: &str) -> Result<String> {
        let rows = self.db.execute(&self.commands().column_definition_query(
            self.db.name(),
            &self.name,
            column_name,
        ))?;
        rows.first()
            .and_then(|row| self.commands().column_definition_from_row(row))
            .ok_or_else(|| {
                Error::UnexpectedResult(format!(
                    "no definition for column {column_name} on {}",
                    self.name
                ))
            })
    }

    /// Add a column. No-op when it is already present.
    pub fn add_column(&self, column_name: &str, definition: &str) -> Result<()> {
        if !self.column_exists(column_name)? {
            self.db
                .execute(&self.commands().add_column(&self.name, column_name, definition))?;
        }
        Ok(())
    }

    pub fn alter_column(&self, column_name: &str, definition: &str) -> Result<()> {
        self.db
            .execute(&self.commands().alter_column(&self.name, column_name, definition))?;
        Ok(())
    }

    pub fn drop_column(&self, column_name: &str) -> Result<()> {
        self.db
            .execute(&self.commands().drop_column(&self.name, column_name))?;
        Ok(())
    }

    /// Rename a column, looking its definition up first where the dialect
    /// must re-state it.
    pub fn rename_column(&self, old_name: &str, new_name: &str) -> Result<()> {
        let definition = if self.commands().rename_requires_definition() {
            Some(self.get_column_definition(old_name)?)
        } else {
            None
        };
        self.db.execute(&self.commands().rename_column(
            &self.name,
            old_name,
            new_name,
            definition.as_deref(),
        ))?;
        Ok(())
    }

    // Constraints ----------------------------------------------------

    /// The table's non-foreign-key constraints.
    pub fn constraints(&self) -> Result<Vec<Constraint>> {
        let rows = self
            .db
            .execute(&self.commands().get_constraints(self.db.name(), &self.name))?;
        rows.iter().map(Constraint::from_row).collect()
    }

    pub fn primary_key(&self) -> Result<Option<Constraint>> {
        Ok(self
            .constraints()?
            .into_iter()
            .find(|c| c.kind == ConstraintKind::PrimaryKey))
    }

    /// Replay constraint objects onto this table, best-effort.
    pub fn add_constraints(&self, constraints: &[Constraint]) -> Result<()> {
        for constraint in constraints {
            self.add_constraint(
                constraint.kind,
                constraint.column.as_deref(),
                constraint.check_clause.as_deref(),
            )?;
        }
        Ok(())
    }

    /// Add one non-foreign-key constraint. CHECK clauses naming `NOT NULL`
    /// become a column constraint; a literal `VALUE` in the clause is
    /// substituted with the column name. Execution failures are logged and
    /// skipped so the replay keeps going.
    pub fn add_constraint(
        &self,
        kind: ConstraintKind,
        column: Option<&str>,
        check_clause: Option<&str>,
    ) -> Result<()> {
        let sql = match kind {
            ConstraintKind::Check => {
                let clause = check_clause.ok_or_else(|| {
                    Error::InvalidConstraint("CHECK constraint without a clause".to_string())
                })?;
                if clause.contains("NOT NULL") {
                    let not_null_column = clause.split_whitespace().next().ok_or_else(|| {
                        Error::InvalidConstraint("empty CHECK clause".to_string())
                    })?;
                    self.commands().add_check_not_null(&self.name, not_null_column)
                } else {
                    let clause = match column {
                        Some(column) if clause.contains("VALUE") => {
                            clause.replace("VALUE", column)
                        }
                        _ => clause.to_string(),
                    };
                    self.commands().add_check(&self.name, &clause)
                }
            }
            ConstraintKind::Unique | ConstraintKind::PrimaryKey => {
                let column = column.ok_or_else(|| {
                    Error::InvalidConstraint(format!("{kind} constraint without a column"))
                })?;
                let constraint_name = self.new_constraint_name(column, kind)?;
                self.commands()
                    .add_constraint(&self.name, &constraint_name, kind, column)
            }
        };
        if let Err(e) = self.db.try_execute(&sql) {
            warn!("unable to add constraint on {}: {e}", self.name);
        }
        self.db.commit()
    }

    pub fn drop_constraint(&self, constraint_name: &str) -> Result<()> {
        self.db
            .execute(&self.commands().drop_constraint(&self.name, constraint_name))?;
        self.db.commit()
    }

    // Foreign keys ---------------------------------------------------

    /// Foreign keys touching this table, in both directions.
    pub fn foreign_keys(&self) -> Result<Vec<ForeignKey>> {
        let rows = self
            .db
            .execute(&self.commands().foreign_keys(self.db.name(), &self.name))?;
        rows.iter().map(ForeignKey::from_row).collect()
    }

    pub fn get_foreign_key(&self, name: &str) -> Result<Option<ForeignKey>> {
        Ok(self.foreign_keys()?.into_iter().find(|fk| fk.name == name))
    }

    pub fn foreign_key_exists(
        &self,
        table_name: &str,
        column_name: &str,
        referenced_table: &str,
        referenced_column: &str,
    ) -> Result<bool> {
        let rows = self.db.execute(&self.commands().foreign_key_exists(
            self.db.name(),
            table_name,
            column_name,
            referenced_table,
            referenced_column,
        ))?;
        Ok(!rows.is_empty())
    }

    /// Replay foreign-key objects, remapping each side against
    /// `override_table` according to the key's direction:
    /// self-referential keys point the override table at itself, incoming
    /// keys keep their owner and reference the override table, outgoing
    /// keys are owned by the override table and keep their target.
    pub fn add_foreign_keys(
        &self,
        foreign_keys: &[ForeignKey],
        override_table: Option<&str>,
    ) -> Result<()> {
        let override_table = override_table.unwrap_or(&self.name);
        for key in foreign_keys {
            let (table, foreign_table) = if key.self_referential() {
                (override_table, override_table)
            } else if key.referenced {
                (key.table_name.as_str(), override_table)
            } else {
                (override_table, key.fk_table_name.as_str())
            };
            self.add_foreign_key(Some(table), &key.column, foreign_table, &key.fk_column, None)?;
        }
        Ok(())
    }

    /// Create one foreign-key constraint, logging and skipping integrity
    /// failures (the key may already exist on a resumed migration).
    pub fn add_foreign_key(
        &self,
        table_name: Option<&str>,
        column: &str,
        fk_table: &str,
        fk_column: &str,
        name: Option<&str>,
    ) -> Result<()> {
        let table_name = table_name.unwrap_or(&self.name);
        let minted;
        let name = match name {
            Some(name) => name,
            None => {
                minted = self.new_fk_index_name(column, fk_column);
                &minted
            }
        };
        let sql = self
            .commands()
            .add_foreign_key(table_name, name, column, fk_table, fk_column);
        match self.db.try_execute(&sql) {
            Ok(_) => self.db.commit(),
            Err(e) => {
                warn!("cannot add foreign key {name} on {table_name}: {e}");
                Ok(())
            }
        }
    }

    /// Drop every foreign key owned by or pointing at this table.
    /// Missing keys are logged and skipped (idempotent teardown).
    pub fn drop_foreign_keys(&self) -> Result<()> {
        for key in self.foreign_keys()? {
            if let Err(e) = self.drop_foreign_key(&key.table_name, &key.name) {
                warn!("tried to drop key {}, did not exist: {e}", key.name);
            }
        }
        Ok(())
    }

    pub fn drop_foreign_key(&self, fk_table_name: &str, fk_name: &str) -> Result<()> {
        self.db
            .execute(&self.commands().drop_foreign_key(fk_table_name, fk_name))?;
        self.db.commit()
    }

    // Indexes --------------------------------------------------------

    pub fn indexes(&self) -> Result<Vec<Index>> {
        let rows = self.db.execute(&self.commands().get_indexes(&self.name))?;
        rows.iter()
            .map(|row| self.commands().index_from_row(row))
            .collect()
    }

    pub fn get_index(&self, name: &str) -> Result<Option<Index>> {
        Ok(self.indexes()?.into_iter().find(|idx| idx.name == name))
    }

    /// Replay index objects onto this table. Unique indexes are skipped:
    /// they are implied by the UNIQUE constraints replayed separately.
    pub fn add_indexes(&self, indexes: &[Index]) -> Result<()> {
        for index in indexes {
            if !index.unique {
                self.add_index(std::slice::from_ref(&index.column), None, false)?;
            }
        }
        Ok(())
    }

    pub fn add_index(
        &self,
        columns: &[String],
        name: Option<&str>,
        unique: bool,
    ) -> Result<()> {
        let minted;
        let name = match name {
            Some(name) => name,
            None => {
                minted = self.new_index_name(columns, unique);
                &minted
            }
        };
        self.db.execute(&self.commands().add_index(
            &self.name,
            name,
            &commands::join_cols(self.commands(), columns),
            unique,
        ))?;
        self.db.commit()
    }

    pub fn drop_index(&self, index_name: &str) -> Result<()> {
        self.db
            .execute(&self.commands().drop_index(&self.name, index_name))?;
        Ok(())
    }

    // Triggers -------------------------------------------------------

    /// Names of the triggers on this table (or another table in the same
    /// database).
    pub fn get_triggers(&self, table_name: Option<&str>) -> Result<Vec<String>> {
        let table_name = table_name.unwrap_or(&self.name);
        let rows = self
            .db
            .execute(&self.commands().get_triggers(self.db.name(), table_name))?;
        Ok(rows
            .iter()
            .filter_map(|row| row.first().and_then(Value::as_str).map(str::to_string))
            .collect())
    }

    // Sequences ------------------------------------------------------

    /// `(sequence, column)` pairs for sequences owned by this table.
    /// Empty on dialects without sequence ownership.
    pub fn sequence_cols(&self) -> Result<Vec<(String, String)>> {
        let Some(query) = self.commands().get_sequences(&self.name) else {
            return Ok(Vec::new());
        };
        let rows = self.db.execute(&query)?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                let seq = row.first().and_then(Value::as_str)?;
                let col = row.get(1).and_then(Value::as_str)?;
                Some((seq.to_string(), col.to_string()))
            })
            .collect())
    }

    pub fn remove_sequence_from_col(&self, column: &str) -> Result<()> {
        if let Some(sql) = self.commands().remove_sequence_from_col(&self.name, column) {
            self.db.execute(&sql)?;
            self.db.commit()?;
        }
        Ok(())
    }

    pub fn set_sequence_owner(&self, sequence_name: &str, table: &str, column: &str) -> Result<()> {
        if let Some(sql) = self.commands().set_sequence_owner(sequence_name, table, column) {
            self.db.execute(&sql)?;
            self.db.commit()?;
        }
        Ok(())
    }

    // Naming ---------------------------------------------------------

    /// `{column}_refs_{fk_column}_{8 random alphanumerics}`.
    pub fn new_fk_index_name(&self, column: &str, fk_column: &str) -> String {
        format!("{column}_refs_{fk_column}_{}", random_string(8))
    }

    /// Collision-resistant constraint name, clipped so it stays inside
    /// common identifier length limits.
    pub fn new_constraint_name(&self, column: &str, kind: ConstraintKind) -> Result<String> {
        let stripped = clip(self.stripped_name(), 30);
        match kind {
            ConstraintKind::Unique => Ok(format!(
                "{stripped}_{}_{}_uniq",
                clip(column, 15),
                random_string(8)
            )),
            ConstraintKind::PrimaryKey => Ok(format!("{stripped}_{}_pkey", random_string(4))),
            ConstraintKind::Check => Err(Error::InvalidConstraint(
                "no generated name for CHECK constraints".to_string(),
            )),
        }
    }

    /// `{table}_{joined columns}_{6 random alphanumerics}[_unique]`.
    pub fn new_index_name(&self, columns: &[String], unique: bool) -> String {
        format!(
            "{}_{}_{}{}",
            self.stripped_name(),
            columns.concat(),
            random_string(6),
            if unique { "_unique" } else { "" }
        )
    }

    /// Table name with a leading shadow prefix removed, so objects minted
    /// for the shadow keep sensible names after the swap.
    fn stripped_name(&self) -> &str {
        self.name.strip_prefix("migrate_").unwrap_or(&self.name)
    }
}

/// Map positionally aligned columns and values into a row mapping.
fn dictify(columns: &[String], values: Vec<Value>) -> Result<HashMap<String, Value>> {
    if columns.len() != values.len() {
        return Err(Error::ColumnValueMismatch);
    }
    Ok(columns.iter().cloned().zip(values).collect())
}

/// Truncate to at most `max_chars` characters, on a char boundary.
pub(crate) fn clip(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

const NAME_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Random uppercase-alphanumeric suffix for minted object names.
fn random_string(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| NAME_CHARSET[rng.gen_range(0..NAME_CHARSET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Dialect};
    use crate::connection::{ConnectionError, ScriptConnection};
    use crate::row;
    use proptest::prelude::*;

    fn postgres_db(conn: ScriptConnection) -> Database {
        Database::new("moviedb", Box::new(conn), Config::new(Dialect::Postgres)).unwrap()
    }

    fn mysql_db(conn: ScriptConnection) -> Database {
        Database::new("moviedb", Box::new(conn), Config::new(Dialect::Mysql)).unwrap()
    }

    fn users_columns() -> Vec<crate::connection::Row> {
        vec![row!["id"], row!["name"], row!["zip"]]
    }

    #[test]
    fn test_insert_row_postgres_reads_lastval_result() {
        let mut conn = ScriptConnection::new();
        conn.respond("INSERT INTO users", vec![row![3]]);
        let log = conn.log();
        let db = postgres_db(conn);
        let users = db.table("users");

        let pk = users
            .insert_row(&[("name", Value::from("Damien Chazelle")), ("zip", Value::from(90403_i64))])
            .unwrap();
        assert_eq!(pk, 3);
        let inserts = log.containing("INSERT INTO users");
        assert_eq!(
            inserts[0],
            "INSERT INTO users (name, zip) VALUES ('Damien Chazelle', 90403); SELECT LASTVAL();"
        );
    }

    #[test]
    fn test_insert_row_mysql_uses_driver_id() {
        let mut conn = ScriptConnection::new();
        conn.set_last_insert_id(7);
        let log = conn.log();
        let db = mysql_db(conn);
        let users = db.table("users");

        let pk = users.insert_row(&[("name", Value::from("Ryan Gosling"))]).unwrap();
        assert_eq!(pk, 7);
        assert_eq!(
            log.containing("INSERT INTO users"),
            vec!["INSERT INTO users (`name`) VALUES ('Ryan Gosling');"]
        );
    }

    #[test]
    fn test_insert_row_rejects_unsupported_value() {
        let conn = ScriptConnection::new();
        let db = postgres_db(conn);
        let users = db.table("users");
        let err = users.insert_row(&[("active", Value::Bool(true))]).unwrap_err();
        assert!(matches!(err, Error::UnsupportedValue { .. }));
    }

    #[test]
    fn test_insert_row_escapes_quotes() {
        let mut conn = ScriptConnection::new();
        conn.respond("INSERT INTO users", vec![row![4]]);
        let log = conn.log();
        let db = postgres_db(conn);
        db.table("users")
            .insert_row(&[("name", Value::from("O'Brien"))])
            .unwrap();
        assert!(log.containing("INSERT INTO users")[0].contains("'O''Brien'"));
    }

    #[test]
    fn test_get_row_returns_mapping() {
        let mut conn = ScriptConnection::new();
        conn.respond("SELECT column_name", users_columns());
        conn.respond(
            "WHERE id=3",
            vec![row![3, "Damien Chazelle", 90403]],
        );
        let db = postgres_db(conn);
        let users = db.table("users");

        let row = users.get_row(3).unwrap().expect("row 3 exists");
        assert_eq!(row["id"], Value::Int(3));
        assert_eq!(row["name"], Value::Text("Damien Chazelle".into()));
        assert_eq!(row["zip"], Value::Int(90403));

        assert!(users.get_row(4).unwrap().is_none(), "unmatched pk answers none");
    }

    #[test]
    fn test_update_row_joins_assignments() {
        let conn = ScriptConnection::new();
        let log = conn.log();
        let db = mysql_db(conn);
        db.table("users")
            .update_row(2, &[("city", Value::from("Los Angeles")), ("zip", Value::from(90049_i64))])
            .unwrap();
        assert_eq!(
            log.containing("UPDATE users"),
            vec!["UPDATE users SET `city`='Los Angeles', `zip`=90049 WHERE id=2;"]
        );
    }

    #[test]
    fn test_min_max_pk_of_empty_table_is_none() {
        let mut conn = ScriptConnection::new();
        conn.respond("SELECT MIN(id)", vec![row![Value::Null]]);
        conn.respond("SELECT MAX(id)", vec![row![Value::Null]]);
        let db = postgres_db(conn);
        let users = db.table("users");
        assert_eq!(users.min_pk().unwrap(), None);
        assert_eq!(users.max_pk().unwrap(), None);
    }

    #[test]
    fn test_add_column_is_noop_when_present() {
        let mut conn = ScriptConnection::new();
        conn.respond("SELECT column_name", users_columns());
        let log = conn.log();
        let db = postgres_db(conn);
        let users = db.table("users");

        users.add_column("zip", "integer").unwrap();
        assert_eq!(log.count_containing("ADD COLUMN"), 0);

        users.add_column("state", "varchar(2)").unwrap();
        assert_eq!(
            log.containing("ADD COLUMN"),
            vec!["ALTER TABLE users ADD COLUMN state varchar(2);"]
        );
    }

    #[test]
    fn test_rename_column_mysql_restates_definition() {
        let mut conn = ScriptConnection::new();
        conn.respond("INFORMATION_SCHEMA.COLUMNS", vec![row!["int(11)", "NO"]]);
        let log = conn.log();
        let db = mysql_db(conn);
        db.table("users").rename_column("zip", "zipcode").unwrap();
        assert_eq!(
            log.containing("CHANGE COLUMN"),
            vec!["ALTER TABLE users CHANGE COLUMN zip zipcode int(11) NOT NULL;"]
        );
    }

    #[test]
    fn test_rename_column_postgres_needs_no_lookup() {
        let conn = ScriptConnection::new();
        let log = conn.log();
        let db = postgres_db(conn);
        db.table("users").rename_column("zip", "zipcode").unwrap();
        assert_eq!(log.count_containing("information_schema.columns"), 0);
        assert_eq!(
            log.containing("RENAME COLUMN"),
            vec!["ALTER TABLE users RENAME COLUMN zip TO zipcode;"]
        );
    }

    #[test]
    fn test_check_not_null_becomes_column_constraint() {
        let conn = ScriptConnection::new();
        let log = conn.log();
        let db = postgres_db(conn);
        db.table("migrate_address")
            .add_constraint(ConstraintKind::Check, Some("zip"), Some("zip IS NOT NULL"))
            .unwrap();
        assert_eq!(
            log.containing("SET NOT NULL"),
            vec!["ALTER TABLE migrate_address ALTER COLUMN zip SET NOT NULL;"]
        );
    }

    #[test]
    fn test_check_value_substitutes_column_name() {
        let conn = ScriptConnection::new();
        let log = conn.log();
        let db = postgres_db(conn);
        db.table("users")
            .add_constraint(ConstraintKind::Check, Some("zip"), Some("VALUE > 0"))
            .unwrap();
        assert_eq!(
            log.containing("ADD CHECK"),
            vec!["ALTER TABLE users ADD CHECK (zip > 0);"]
        );
    }

    #[test]
    fn test_add_constraint_swallows_execution_failure() {
        let mut conn = ScriptConnection::new();
        conn.fail(
            "ADD CONSTRAINT",
            ConnectionError::Integrity("already exists".into()),
        );
        let db = postgres_db(conn);
        db.table("users")
            .add_constraint(ConstraintKind::Unique, Some("name"), None)
            .expect("constraint replay keeps going on integrity failures");
    }

    #[test]
    fn test_add_constraint_requires_column_for_unique() {
        let conn = ScriptConnection::new();
        let db = postgres_db(conn);
        let err = db
            .table("users")
            .add_constraint(ConstraintKind::Unique, None, None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConstraint(_)));
    }

    fn fk(table: &str, column: &str, fk_table: &str, fk_column: &str, referenced: bool) -> ForeignKey {
        ForeignKey {
            name: "fk_under_test".to_string(),
            table_name: table.to_string(),
            column: column.to_string(),
            fk_table_name: fk_table.to_string(),
            fk_column: fk_column.to_string(),
            referenced,
        }
    }

    #[test]
    fn test_add_foreign_keys_outgoing_remaps_owner() {
        let conn = ScriptConnection::new();
        let log = conn.log();
        let db = postgres_db(conn);
        db.table("migrate_users")
            .add_foreign_keys(&[fk("users", "org_id", "org", "id", false)], Some("migrate_users"))
            .unwrap();
        let stmt = &log.containing("FOREIGN KEY")[0];
        assert!(stmt.starts_with("ALTER TABLE migrate_users"), "owner remapped: {stmt}");
        assert!(stmt.contains("REFERENCES org (id)"), "target kept: {stmt}");
    }

    #[test]
    fn test_add_foreign_keys_incoming_remaps_target() {
        let conn = ScriptConnection::new();
        let log = conn.log();
        let db = postgres_db(conn);
        db.table("migrate_users")
            .add_foreign_keys(&[fk("address", "user_id", "users", "id", true)], Some("migrate_users"))
            .unwrap();
        let stmt = &log.containing("FOREIGN KEY")[0];
        assert!(stmt.starts_with("ALTER TABLE address"), "owner kept: {stmt}");
        assert!(stmt.contains("REFERENCES migrate_users (id)"), "target remapped: {stmt}");
    }

    #[test]
    fn test_add_foreign_keys_self_referential_remaps_both() {
        let conn = ScriptConnection::new();
        let log = conn.log();
        let db = postgres_db(conn);
        db.table("migrate_users")
            .add_foreign_keys(&[fk("users", "friend_id", "users", "id", false)], Some("migrate_users"))
            .unwrap();
        let stmt = &log.containing("FOREIGN KEY")[0];
        assert!(stmt.starts_with("ALTER TABLE migrate_users"), "{stmt}");
        assert!(stmt.contains("REFERENCES migrate_users (id)"), "{stmt}");
    }

    #[test]
    fn test_add_indexes_skips_unique() {
        let conn = ScriptConnection::new();
        let log = conn.log();
        let db = postgres_db(conn);
        let indexes = vec![
            Index {
                table: "users".into(),
                name: "users_name_key".into(),
                unique: true,
                column: "name".into(),
            },
            Index {
                table: "users".into(),
                name: "users_created_at_idx".into(),
                unique: false,
                column: "created_at".into(),
            },
        ];
        db.table("migrate_users").add_indexes(&indexes).unwrap();
        let created = log.containing("CREATE INDEX");
        assert_eq!(created.len(), 1, "unique index implied by constraint: {created:?}");
        assert!(created[0].contains("(created_at)"));
    }

    #[test]
    fn test_drop_removes_foreign_keys_first() {
        let mut conn = ScriptConnection::new();
        conn.respond("SHOW TABLES IN moviedb", vec![row!["users"]]);
        conn.respond(
            "KEY_COLUMN_USAGE",
            vec![row!["org_id_refs_id_AAAA1111", "users", "org_id", "org", "id", 0]],
        );
        let log = conn.log();
        let db = mysql_db(conn);
        db.table("users").drop(false).unwrap();

        let statements = log.statements();
        let drop_fk = statements
            .iter()
            .position(|s| s.contains("DROP FOREIGN KEY"))
            .expect("fk dropped");
        let drop_table = statements
            .iter()
            .position(|s| s.contains("DROP TABLE"))
            .expect("table dropped");
        assert!(drop_fk < drop_table, "fks drop before the table");
    }

    #[test]
    fn test_create_statement_requires_table() {
        let conn = ScriptConnection::new();
        let db = postgres_db(conn);
        let err = db.table("missing").create_statement().unwrap_err();
        assert!(matches!(err, Error::NoSuchTable(_)));
    }

    #[test]
    fn test_create_statement_collapses_whitespace() {
        let mut conn = ScriptConnection::new();
        conn.respond("SHOW TABLES IN moviedb", vec![row!["users"]]);
        conn.respond(
            "SHOW CREATE TABLE users",
            vec![row![
                "users",
                "CREATE TABLE `users` (\n  `id` int   NOT NULL\n)"
            ]],
        );
        let db = mysql_db(conn);
        assert_eq!(
            db.table("users").create_statement().unwrap(),
            "CREATE TABLE `users` ( `id` int NOT NULL )"
        );
    }

    #[test]
    fn test_migrate_and_archive_names() {
        let conn = ScriptConnection::new();
        let db = postgres_db(conn);
        let users = db.table("users");
        assert_eq!(users.migrate_name(), "migrate_users");
        assert_eq!(users.archive_name(), "archive_users");
    }

    #[test]
    fn test_constraint_name_strips_shadow_prefix_only() {
        let conn = ScriptConnection::new();
        let db = postgres_db(conn);

        let shadow = db.table("migrate_users");
        let name = shadow
            .new_constraint_name("name", ConstraintKind::Unique)
            .unwrap();
        assert!(name.starts_with("users_name_"), "prefix stripped once: {name}");
        assert!(name.ends_with("_uniq"));

        // A table merely starting with those letters keeps its name.
        let migrations = db.table("migrations");
        let name = migrations
            .new_constraint_name("name", ConstraintKind::Unique)
            .unwrap();
        assert!(name.starts_with("migrations_name_"), "got: {name}");
    }

    #[test]
    fn test_fk_index_name_shape() {
        let conn = ScriptConnection::new();
        let db = postgres_db(conn);
        let name = db.table("users").new_fk_index_name("org_id", "id");
        assert!(name.starts_with("org_id_refs_id_"));
        assert_eq!(name.len(), "org_id_refs_id_".len() + 8);
    }

    #[test]
    fn test_index_name_marks_unique() {
        let conn = ScriptConnection::new();
        let db = postgres_db(conn);
        let users = db.table("users");
        let name = users.new_index_name(&["name".to_string(), "zip".to_string()], true);
        assert!(name.starts_with("users_namezip_"));
        assert!(name.ends_with("_unique"));
    }

    proptest! {
        /// Constraint names stay within 60 bytes whatever the table and
        /// column names are.
        #[test]
        fn prop_constraint_names_bounded(
            table in "[a-z_]{1,80}",
            column in "[a-z_]{1,80}",
        ) {
            let conn = ScriptConnection::new();
            let db = postgres_db(conn);
            let handle = db.table(&table);
            let unique = handle.new_constraint_name(&column, ConstraintKind::Unique).unwrap();
            prop_assert!(unique.len() <= 60, "unique name too long: {}", unique);
            let pkey = handle.new_constraint_name(&column, ConstraintKind::PrimaryKey).unwrap();
            prop_assert!(pkey.len() <= 60, "pkey name too long: {}", pkey);
        }
    }
}
