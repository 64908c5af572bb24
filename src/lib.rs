//! shadow-migrate: Online schema migrations for PostgreSQL and MySQL
//!
//! This library migrates a live table to a new schema without long write
//! locks. It builds a shadow table with the desired shape, keeps it in
//! sync with concurrent writes through database-level AFTER triggers,
//! backfills historical rows in bounded, throttled chunks, and atomically
//! renames the shadow into the source's place — leaving the original
//! behind as an archive.
//!
//! The embedding application supplies the opened database session (the
//! [`Connection`] trait) and any DDL it wants to run against the shadow;
//! the engine supplies everything else: dialect-specific SQL generation,
//! trigger-based tail capture, resumable chunked backfill, and the rename
//! swap with its dialect-appropriate failure handling.

pub mod commands;
pub mod config;
pub mod connection;
pub mod db;
pub mod error;
pub mod intersection;
pub mod migrate;
pub mod schema;
pub mod table;

// Re-export commonly used types
pub use config::{Config, ConfigError, Dialect};
pub use connection::{Connection, ConnectionError, Row, Value};
pub use db::{Database, DatabaseFactory};
pub use error::{Error, Result};
pub use intersection::Intersection;
pub use migrate::{CopyOptions, MigrationTable};
pub use schema::{Constraint, ConstraintKind, ForeignKey, Index};
pub use table::Table;
