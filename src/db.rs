//! Database handle and factory
//!
//! A [`Database`] binds one opened connection to one dialect's command set
//! and is the single execution path for every statement the engine issues.
//! Handles for individual tables borrow the database; the connection sits
//! behind a mutex so a shared handle can execute.

use parking_lot::Mutex;
use tracing::warn;

use crate::commands::{MySqlCommands, PostgresCommands, SqlCommands};
use crate::config::{Config, Dialect};
use crate::connection::{Connection, ConnectionError, Row, Value};
use crate::error::Result;
use crate::migrate::MigrationTable;
use crate::table::Table;

/// Builds a dialect-bound [`Database`] from a connection and configuration.
pub struct DatabaseFactory {
    name: String,
    connection: Box<dyn Connection>,
    config: Config,
}

impl DatabaseFactory {
    pub fn new(name: &str, connection: Box<dyn Connection>, config: Config) -> Self {
        Self {
            name: name.to_string(),
            connection,
            config,
        }
    }

    /// Consume the factory and hand out the database handle. Runs the
    /// dialect's session setup (PostgreSQL installs `show_create_table`).
    pub fn fetch(self) -> Result<Database> {
        Database::new(&self.name, self.connection, self.config)
    }
}

pub struct Database {
    name: String,
    config: Config,
    commands: Box<dyn SqlCommands>,
    connection: Mutex<Box<dyn Connection>>,
}

impl Database {
    pub fn new(name: &str, connection: Box<dyn Connection>, config: Config) -> Result<Self> {
        config.validate()?;
        let commands: Box<dyn SqlCommands> = match config.dialect {
            Dialect::Postgres => Box::new(PostgresCommands),
            Dialect::Mysql => Box::new(MySqlCommands),
        };
        let db = Self {
            name: name.to_string(),
            config,
            commands,
            connection: Mutex::new(connection),
        };
        for statement in db.commands.session_setup_statements() {
            db.execute(&statement)?;
        }
        db.commit()?;
        Ok(db)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn dialect(&self) -> Dialect {
        self.config.dialect
    }

    pub fn commands(&self) -> &dyn SqlCommands {
        self.commands.as_ref()
    }

    /// Execute a statement, terminating it if the caller left the `;` off.
    /// Returns an empty row set for non-returning statements.
    pub fn execute(&self, sql: &str) -> Result<Vec<Row>> {
        Ok(self.try_execute(sql)?)
    }

    /// [`execute`](Self::execute) keeping the collaborator's error class,
    /// for callers whose recovery policy branches on it.
    pub fn try_execute(&self, sql: &str) -> std::result::Result<Vec<Row>, ConnectionError> {
        let mut statement = sql.to_string();
        if !statement.ends_with(';') {
            statement.push(';');
        }
        self.connection.lock().execute(&statement)
    }

    /// Execute a list of statements, returning each result.
    pub fn batch_execute(&self, statements: &[String]) -> Result<Vec<Vec<Row>>> {
        statements.iter().map(|sql| self.execute(sql)).collect()
    }

    pub fn commit(&self) -> Result<()> {
        self.connection.lock().commit()?;
        Ok(())
    }

    pub fn last_insert_id(&self) -> Option<i64> {
        self.connection.lock().last_insert_id()
    }

    /// Names of the non-system tables in this database.
    pub fn tables(&self) -> Result<Vec<String>> {
        let rows = self.execute(&self.commands.get_tables(&self.name))?;
        Ok(rows
            .iter()
            .filter_map(|row| row.first().and_then(Value::as_str).map(str::to_string))
            .collect())
    }

    pub fn table_exists(&self, table_name: &str) -> Result<bool> {
        Ok(self.tables()?.iter().any(|t| t == table_name))
    }

    /// Handle onto a table whose primary key column is `id`.
    pub fn table(&self, table_name: &str) -> Table<'_> {
        self.table_with_pk(table_name, "id")
    }

    pub fn table_with_pk(&self, table_name: &str, primary_key_column: &str) -> Table<'_> {
        Table::new(self, table_name, primary_key_column)
    }

    /// Shadow-table handle for a migration of `source_table`.
    pub fn migration_table<'a>(&'a self, source_table: &Table<'a>) -> MigrationTable<'a> {
        MigrationTable::new(self, source_table)
    }

    /// Sequences present in this database. Empty on dialects without them.
    pub fn sequences(&self) -> Result<Vec<String>> {
        let Some(query) = self.commands.get_database_sequences(&self.name) else {
            return Ok(Vec::new());
        };
        let rows = self.execute(&query)?;
        Ok(rows
            .iter()
            .filter_map(|row| row.first().and_then(Value::as_str).map(str::to_string))
            .collect())
    }

    /// Create a sequence unless it already exists.
    pub fn add_sequence(&self, sequence_name: &str) -> Result<()> {
        let Some(create) = self.commands.create_sequence(sequence_name) else {
            return Ok(());
        };
        if !self.sequences()?.iter().any(|s| s == sequence_name) {
            self.execute(&create)?;
        }
        Ok(())
    }

    /// Pre-create the sequences a CREATE statement references, so the
    /// statement can be replayed for the shadow table (PostgreSQL names
    /// them in column defaults). No-op on dialects without sequences.
    pub(crate) fn prepare_sequences(&self, statement: &str) -> Result<()> {
        if self.commands.get_database_sequences(&self.name).is_none() {
            return Ok(());
        }
        for candidate in statement.split('\'').filter(|part| part.ends_with("_seq")) {
            self.add_sequence(candidate)?;
        }
        Ok(())
    }

    /// MySQL session toggle for foreign-key enforcement. No-op elsewhere.
    pub fn set_foreign_key_checks(&self, enabled: bool) -> Result<()> {
        if let Some(sql) = self.commands.set_foreign_key_checks(enabled) {
            self.execute(&sql)?;
        }
        Ok(())
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        for statement in self.commands.session_teardown_statements() {
            if let Err(e) = self.try_execute(&statement) {
                warn!("session teardown failed: {e}");
            }
        }
    }
}
