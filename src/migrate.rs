//! Shadow-table migration engine
//!
//! [`MigrationTable`] owns one migration's lifecycle: build the shadow
//! table from the source's CREATE statement, mirror live writes into it
//! with AFTER triggers, backfill history in throttled chunks, and finally
//! swap the names so the shadow becomes the source and the source becomes
//! the archive.
//!
//! Ordering is the whole safety story. Triggers are live before the first
//! chunk is copied, so every write visible after install is mirrored; the
//! chunk copy is an anti-join on the primary key, so rows the triggers
//! already delivered are skipped; and triggers are dropped only once the
//! backfill is done, immediately before the swap. Everything up to the
//! swap is idempotently resumable — rerunning the pipeline reinstalls
//! missing triggers and copies only what is absent.
//!
//! Incoming foreign keys (defined on other tables, pointing at the
//! source) are deferred until after the backfill: applying them earlier
//! would force lookups against a partially filled table.

use std::thread;
use std::time::Instant;

use strum::IntoEnumIterator;
use tracing::{error, info, warn};

use crate::commands::{self, RenameStrategy, TriggerEvent};
use crate::connection::ConnectionError;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::intersection::Intersection;
use crate::table::{Table, clip};

/// Overrides for one [`copy_in_chunks`](MigrationTable::copy_in_chunks)
/// run; anything left `None` falls back to the configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyOptions {
    pub chunk_size: Option<u64>,
    pub throttle: Option<f64>,
    pub start: Option<i64>,
    pub limit: Option<i64>,
}

/// The shadow table and the migration state machine driving it.
pub struct MigrationTable<'a> {
    shadow: Table<'a>,
    source: Table<'a>,
    renames: Vec<(String, String)>,
    triggers: Vec<(TriggerEvent, String)>,
    chunk_size: u64,
    start_time: Option<Instant>,
}

impl<'a> MigrationTable<'a> {
    pub fn new(db: &'a Database, source_table: &Table<'a>) -> Self {
        let shadow = Table::new(
            db,
            &source_table.migrate_name(),
            source_table.primary_key_column(),
        );
        let max_length_name = db.config().max_length_name;
        let triggers = TriggerEvent::iter()
            .map(|event| {
                let name = format!("migration_trigger_{event}_{}", source_table.name());
                (event, clip(&name, max_length_name).to_string())
            })
            .collect();
        Self {
            shadow,
            source: source_table.clone(),
            renames: Vec::new(),
            triggers,
            chunk_size: db.config().chunk_size,
            start_time: None,
        }
    }

    /// The shadow table handle. Row access, introspection and user DDL
    /// (add/alter/drop column) go through here.
    pub fn shadow(&self) -> &Table<'a> {
        &self.shadow
    }

    pub fn source(&self) -> &Table<'a> {
        &self.source
    }

    pub fn name(&self) -> &str {
        self.shadow.name()
    }

    pub fn renames(&self) -> &[(String, String)] {
        &self.renames
    }

    /// Trigger names per event, pre-minted and bounded by the configured
    /// name length.
    pub fn triggers(&self) -> &[(TriggerEvent, String)] {
        &self.triggers
    }

    fn db(&self) -> &'a Database {
        self.shadow.db()
    }

    /// Create the shadow table like the source, then replay its
    /// constraints, non-unique indexes, and outgoing foreign keys.
    /// Incoming keys are deferred until after the backfill.
    pub fn create_from_source(&self) -> Result<()> {
        let statement = self.source.create_statement()?;
        let template = self
            .db()
            .commands()
            .shadow_create_template(&statement, self.source.name());
        self.shadow.create_from_statement(&template)?;

        self.shadow.add_constraints(&self.source.constraints()?)?;
        self.shadow.add_indexes(&self.source.indexes()?)?;

        let outgoing: Vec<_> = self
            .source
            .foreign_keys()?
            .into_iter()
            .filter(|key| !key.referenced)
            .collect();
        self.shadow
            .add_foreign_keys(&outgoing, Some(self.shadow.name()))
    }

    /// Declare a column rename. The mapping routes data from the next
    /// chunk (and trigger install) on; the physical rename happens here
    /// unless the target column already exists.
    pub fn rename_column(&mut self, original_column: &str, new_column: &str) -> Result<()> {
        self.renames
            .push((original_column.to_string(), new_column.to_string()));
        if !self.shadow.column_exists(new_column)? {
            self.shadow.rename_column(original_column, new_column)?;
        }
        Ok(())
    }

    /// The current origin↔destination projection.
    pub fn intersection(&self) -> Result<Intersection> {
        Ok(Intersection::new(
            &self.source.columns()?,
            &self.shadow.columns()?,
            &self.renames,
        ))
    }

    /// Names of the triggers currently on the source table.
    pub fn get_source_triggers(&self) -> Result<Vec<String>> {
        self.shadow.get_triggers(Some(self.source.name()))
    }

    /// Install the three mirror triggers on the source. No-op when the
    /// source already bears triggers, so a resumed migration does not
    /// stack a second set. The projection is snapshotted at install time.
    pub fn create_triggers(&self) -> Result<()> {
        if !self.get_source_triggers()?.is_empty() {
            return Ok(());
        }
        let intersection = self.intersection()?;
        self.create_insert_trigger(&intersection)?;
        self.create_update_trigger(&intersection)?;
        self.create_delete_trigger(&intersection)?;
        self.db().commit()
    }

    /// Deterministic per-event trigger name, bounded by the configured
    /// name length. Matches the pre-minted [`triggers`](Self::triggers).
    fn trigger_name(&self, event: TriggerEvent) -> String {
        let name = format!("migration_trigger_{event}_{}", self.source.name());
        clip(&name, self.db().config().max_length_name).to_string()
    }

    fn create_insert_trigger(&self, intersection: &Intersection) -> Result<()> {
        let cmds = self.db().commands();
        let statements = cmds.insert_trigger_statements(
            &self.trigger_name(TriggerEvent::Insert),
            self.source.name(),
            self.shadow.name(),
            &commands::join_cols(cmds, &intersection.dest_columns()),
            &commands::qualify(cmds, "NEW", &intersection.origin_columns()),
        );
        self.db().batch_execute(&statements).map(|_| ())
    }

    fn create_update_trigger(&self, intersection: &Intersection) -> Result<()> {
        let cmds = self.db().commands();
        let statements = cmds.update_trigger_statements(
            &self.trigger_name(TriggerEvent::Update),
            self.source.name(),
            self.shadow.name(),
            &commands::equals(cmds, &intersection.dest_columns(), "NEW", &intersection.origin_columns()),
            self.shadow.primary_key_column(),
        );
        self.db().batch_execute(&statements).map(|_| ())
    }

    fn create_delete_trigger(&self, _intersection: &Intersection) -> Result<()> {
        let cmds = self.db().commands();
        let statements = cmds.delete_trigger_statements(
            &self.trigger_name(TriggerEvent::Delete),
            self.source.name(),
            self.shadow.name(),
            self.shadow.primary_key_column(),
        );
        self.db().batch_execute(&statements).map(|_| ())
    }

    /// Drop the mirror triggers (and their backing functions). Missing
    /// objects are logged and skipped so teardown is idempotent.
    pub fn delete_triggers(&self) -> Result<()> {
        for (event, trigger_name) in &self.triggers {
            let statements = self.db().commands().drop_trigger_statements(
                trigger_name,
                *event,
                self.source.name(),
                self.shadow.name(),
            );
            for statement in statements {
                if let Err(e) = self.db().try_execute(&statement) {
                    warn!("tried to drop trigger {trigger_name}, did not exist: {e}");
                }
            }
        }
        Ok(())
    }

    /// Backfill the shadow from the source in bounded chunks.
    ///
    /// Ensures triggers are installed first, skips the loop entirely when
    /// the shadow already holds every source row (idempotent restart),
    /// sleeps the throttle between chunks, and finishes by applying the
    /// deferred incoming foreign keys against the shadow.
    pub fn copy_in_chunks(&mut self, options: CopyOptions) -> Result<()> {
        // On restart the triggers exist and this is a no-op.
        self.create_triggers()?;

        let config = self.db().config();
        self.chunk_size = options.chunk_size.unwrap_or(config.chunk_size);
        let throttle =
            std::time::Duration::from_secs_f64(options.throttle.unwrap_or(config.throttle));

        if self.shadow.count()? != self.source.count()? {
            let start = match options.start {
                Some(start) => Some(start),
                None => self.source.min_pk()?,
            };
            let limit = match options.limit {
                Some(limit) => Some(limit),
                None => self.source.max_pk()?,
            };

            // An empty source has no pks to walk; the copy is complete.
            if let (Some(start), Some(limit)) = (start, limit) {
                self.start_time = Some(Instant::now());
                let mut pointer = start;
                while pointer < limit {
                    self.copy_chunk(pointer)?;
                    match self.next_pk(pointer)? {
                        Some(next) => pointer = next,
                        None => break,
                    }
                    self.log_progress(start, pointer, limit);
                    thread::sleep(throttle);
                }
                // The loop condition is strict, so the boundary row is
                // carried by one final chunk (copy_chunk is >= last_pk).
                self.copy_chunk(pointer)?;
                self.log_progress(start, pointer, limit);
            }
        }

        info!("Copy complete! Adding referenced foreign keys");
        let incoming: Vec<_> = self
            .source
            .foreign_keys()?
            .into_iter()
            .filter(|key| key.referenced)
            .collect();
        self.shadow
            .add_foreign_keys(&incoming, Some(self.shadow.name()))
    }

    /// Copy one chunk of rows with pk >= `last_pk` that are not yet in
    /// the shadow. Safe to re-run for the same pointer.
    fn copy_chunk(&self, last_pk: i64) -> Result<()> {
        let cmds = self.db().commands();
        let intersection = self.intersection()?;
        self.db().execute(&cmds.copy_chunk(
            self.shadow.name(),
            &commands::join_cols(cmds, &intersection.dest_columns()),
            &commands::qualify(cmds, self.source.name(), &intersection.origin_columns()),
            self.source.name(),
            self.shadow.primary_key_column(),
            last_pk,
            self.chunk_size,
        ))?;
        self.db().commit()
    }

    /// MAX pk of the next page of ids strictly greater than `last_pk`.
    /// `None` once the page is empty.
    fn next_pk(&self, last_pk: i64) -> Result<Option<i64>> {
        let rows = self.db().execute(&self.db().commands().next_pk(
            self.shadow.name(),
            self.shadow.primary_key_column(),
            last_pk,
            self.chunk_size,
        ))?;
        Ok(rows
            .first()
            .and_then(|row| row.first())
            .and_then(crate::connection::Value::as_i64))
    }

    fn log_progress(&self, start: i64, current: i64, limit: i64) {
        if limit <= start {
            return;
        }
        let percent = (current - start) as f64 / (limit - start) as f64;
        if percent == 0.0 {
            return;
        }
        let Some(start_time) = self.start_time else {
            return;
        };
        let run_time = start_time.elapsed().as_secs_f64();
        let remaining = run_time / percent - run_time;
        info!(
            "Processed {current}/{limit} {:.2}% - time left: {}",
            percent * 100.0,
            format_hms(remaining)
        );
    }

    /// Swap the names: source becomes the archive, the shadow becomes the
    /// source. Triggers are dropped first; the swap itself is atomic at
    /// the database level. Returns handles onto the new source and the
    /// archive, with sequences reparented onto the new source.
    pub fn rename_tables(&mut self) -> Result<(Table<'a>, Table<'a>)> {
        self.delete_triggers()?;

        let source_name = self.source.name().to_string();
        let archive_name = self.source.archive_name();
        let statements = self.db().commands().rename_tables_statements(
            &source_name,
            &archive_name,
            self.shadow.name(),
        );

        match self.db().commands().rename_strategy() {
            RenameStrategy::Transactional => self.rename_once(&statements)?,
            RenameStrategy::AtomicRetry => self.rename_with_retries(&statements)?,
        }
        info!("Rename complete!");

        let new_source = self
            .db()
            .table_with_pk(&source_name, self.source.primary_key_column());
        let archive = self
            .db()
            .table_with_pk(&archive_name, self.source.primary_key_column());
        self.move_sequences(&archive, &new_source)?;
        Ok((new_source, archive))
    }

    /// One transactional attempt. Failing here is the critical window:
    /// the triggers are already gone, so the caller must reinstall them
    /// and retry before source writes go unmirrored.
    fn rename_once(&self, statements: &[String]) -> Result<()> {
        for statement in statements {
            if let Err(e) = self.db().try_execute(statement) {
                let _ = self.db().try_execute("ROLLBACK");
                error!(
                    "rename swap failed with triggers dropped, reinstall and retry: {e}"
                );
                return Err(Error::RenameFailed(e));
            }
        }
        Ok(())
    }

    /// Bounded retry loop for the atomic rename, absorbing lock-wait
    /// timeouts from concurrent metadata locks. On exhaustion the
    /// triggers are reinstalled so the migration stays resumable.
    fn rename_with_retries(&self, statements: &[String]) -> Result<()> {
        let config = self.db().config();
        let mut retries: u32 = 0;
        loop {
            match self.execute_all(statements) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    retries += 1;
                    if retries > config.max_rename_retries {
                        self.create_triggers()?;
                        return Err(Error::RenameRetriesExhausted {
                            attempts: retries,
                            source: e,
                        });
                    }
                    warn!("Rename retry {retries}, error: {e}");
                    thread::sleep(config.retry_sleep_duration());
                }
            }
        }
    }

    fn execute_all(&self, statements: &[String]) -> std::result::Result<(), ConnectionError> {
        for statement in statements {
            self.db().try_execute(statement)?;
        }
        Ok(())
    }

    /// Reparent sequences owned by the archive onto the new source, so
    /// dropping the archive later cannot take the live sequences with it.
    /// No-op on dialects without sequence ownership.
    fn move_sequences(&self, archive: &Table<'a>, new_source: &Table<'a>) -> Result<()> {
        for (sequence, column) in archive.sequence_cols()? {
            archive.remove_sequence_from_col(&column)?;
            archive.set_sequence_owner(&sequence, new_source.name(), &column)?;
        }
        Ok(())
    }
}

fn format_hms(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!("{}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}
