//! Schema entity types
//!
//! Value objects for the schema surface the engine copies between tables:
//! constraints, foreign keys, and indexes. Each is built from an
//! introspection result row and carries the equality semantics the engine
//! relies on — a foreign key is the *meaning* of the reference, not the
//! database-assigned name it happens to have today.

use strum_macros::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::connection::{Row, Value};
use crate::error::{Error, Result};

/// Constraint kinds the engine replays. Foreign keys are a separate
/// entity; anything outside this set is rejected when parsing
/// introspection rows.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumString, IntoStaticStr,
)]
pub enum ConstraintKind {
    #[strum(serialize = "UNIQUE")]
    Unique,
    #[strum(serialize = "PRIMARY KEY")]
    PrimaryKey,
    #[strum(serialize = "CHECK")]
    Check,
}

/// A non-foreign-key table constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub name: String,
    pub table_name: String,
    pub kind: ConstraintKind,
    /// Column the constraint applies to. CHECK constraints over an
    /// expression may not resolve to a single column.
    pub column: Option<String>,
    pub check_clause: Option<String>,
}

impl Constraint {
    /// Build from an introspection row shaped
    /// `(name, table, kind, column, check_clause)`.
    pub(crate) fn from_row(row: &Row) -> Result<Self> {
        let kind_text = text_at(row, 2, "constraint kind")?;
        let kind: ConstraintKind = kind_text.parse().map_err(|_| {
            Error::InvalidConstraint(format!("constraint kind {kind_text} not recognised"))
        })?;
        Ok(Self {
            name: text_at(row, 0, "constraint name")?,
            table_name: text_at(row, 1, "constraint table")?,
            kind,
            column: opt_text_at(row, 3),
            check_clause: opt_text_at(row, 4),
        })
    }
}

/// A foreign key as seen from one table's point of view.
///
/// `referenced = false`: the key is defined on this table and points
/// elsewhere (outgoing). `referenced = true`: the key is defined on some
/// other table and points at this one (incoming).
#[derive(Debug, Clone)]
pub struct ForeignKey {
    pub name: String,
    pub table_name: String,
    pub column: String,
    pub fk_table_name: String,
    pub fk_column: String,
    pub referenced: bool,
}

impl ForeignKey {
    /// Build from an introspection row shaped
    /// `(name, table, column, referenced table, referenced column, referenced flag)`.
    pub(crate) fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            name: text_at(row, 0, "foreign key name")?,
            table_name: text_at(row, 1, "foreign key table")?,
            column: text_at(row, 2, "foreign key column")?,
            fk_table_name: text_at(row, 3, "referenced table")?,
            fk_column: text_at(row, 4, "referenced column")?,
            referenced: bool_at(row, 5, "referenced flag")?,
        })
    }

    /// A key whose owning and referenced tables are the same table.
    pub fn self_referential(&self) -> bool {
        self.table_name == self.fk_table_name
    }
}

/// Identity of a foreign key is the reference it expresses. `name` and
/// `referenced` are database-assigned bookkeeping and excluded.
impl PartialEq for ForeignKey {
    fn eq(&self, other: &Self) -> bool {
        self.table_name == other.table_name
            && self.column == other.column
            && self.fk_column == other.fk_column
    }
}

impl Eq for ForeignKey {}

/// A single-column table index.
#[derive(Debug, Clone)]
pub struct Index {
    pub table: String,
    pub name: String,
    pub unique: bool,
    pub column: String,
}

impl Index {
    /// Build from an introspection row shaped `(table, name, unique, column)`.
    pub(crate) fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            table: text_at(row, 0, "index table")?,
            name: text_at(row, 1, "index name")?,
            unique: bool_at(row, 2, "index uniqueness")?,
            column: text_at(row, 3, "index column")?,
        })
    }
}

/// `unique` is excluded: a unique and a plain index over the same column
/// under the same name are the same index for copying purposes.
impl PartialEq for Index {
    fn eq(&self, other: &Self) -> bool {
        self.table == other.table && self.name == other.name && self.column == other.column
    }
}

impl Eq for Index {}

fn text_at(row: &Row, idx: usize, what: &str) -> Result<String> {
    row.get(idx)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::UnexpectedResult(format!("missing {what} in column {idx}")))
}

fn opt_text_at(row: &Row, idx: usize) -> Option<String> {
    row.get(idx).and_then(Value::as_str).map(str::to_string)
}

fn bool_at(row: &Row, idx: usize, what: &str) -> Result<bool> {
    row.get(idx)
        .and_then(Value::as_bool)
        .ok_or_else(|| Error::UnexpectedResult(format!("missing {what} in column {idx}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;

    fn fk(table: &str, column: &str, fk_table: &str, fk_column: &str) -> ForeignKey {
        ForeignKey {
            name: format!("{column}_refs_{fk_column}_TESTTEST"),
            table_name: table.to_string(),
            column: column.to_string(),
            fk_table_name: fk_table.to_string(),
            fk_column: fk_column.to_string(),
            referenced: false,
        }
    }

    #[test]
    fn test_foreign_key_equality_ignores_name_and_referenced() {
        let mut a = fk("users", "org_id", "org", "id");
        let mut b = fk("users", "org_id", "org", "id");
        a.name = "first_name".to_string();
        b.name = "second_name".to_string();
        b.referenced = true;
        assert_eq!(a, b, "name and referenced are bookkeeping, not identity");
    }

    #[test]
    fn test_foreign_key_inequality_on_columns() {
        let a = fk("users", "org_id", "org", "id");
        let b = fk("users", "friend_id", "users", "id");
        assert_ne!(a, b);
    }

    #[test]
    fn test_self_referential_is_name_comparison() {
        assert!(fk("users", "friend_id", "users", "id").self_referential());
        assert!(!fk("users", "org_id", "org", "id").self_referential());
    }

    #[test]
    fn test_index_equality_ignores_unique() {
        let a = Index {
            table: "users".to_string(),
            name: "users_name_AB12CD".to_string(),
            unique: true,
            column: "name".to_string(),
        };
        let mut b = a.clone();
        b.unique = false;
        assert_eq!(a, b);
    }

    #[test]
    fn test_constraint_kind_parses_allowed_set_only() {
        assert_eq!("UNIQUE".parse::<ConstraintKind>().unwrap(), ConstraintKind::Unique);
        assert_eq!(
            "PRIMARY KEY".parse::<ConstraintKind>().unwrap(),
            ConstraintKind::PrimaryKey
        );
        assert_eq!("CHECK".parse::<ConstraintKind>().unwrap(), ConstraintKind::Check);
        assert!("FOREIGN KEY".parse::<ConstraintKind>().is_err());
        assert!("EXCLUDE".parse::<ConstraintKind>().is_err());
    }

    #[test]
    fn test_constraint_from_row_rejects_unknown_kind() {
        let row = row!["c1", "users", "EXCLUDE", "name", Value::Null];
        let err = Constraint::from_row(&row).unwrap_err();
        assert!(matches!(err, Error::InvalidConstraint(_)));
    }

    #[test]
    fn test_constraint_from_row_tolerates_null_column_and_clause() {
        let row = row!["users_pkey", "users", "PRIMARY KEY", "id", Value::Null];
        let c = Constraint::from_row(&row).unwrap();
        assert_eq!(c.kind, ConstraintKind::PrimaryKey);
        assert_eq!(c.column.as_deref(), Some("id"));
        assert_eq!(c.check_clause, None);

        let row = row!["chk", "users", "CHECK", Value::Null, "zip IS NOT NULL"];
        let c = Constraint::from_row(&row).unwrap();
        assert_eq!(c.column, None);
        assert_eq!(c.check_clause.as_deref(), Some("zip IS NOT NULL"));
    }

    #[test]
    fn test_foreign_key_from_row_reads_referenced_flag() {
        let row = row!["fk1", "address", "user_id", "users", "id", true];
        let k = ForeignKey::from_row(&row).unwrap();
        assert!(k.referenced);
        assert_eq!(k.table_name, "address");
        assert_eq!(k.fk_table_name, "users");
    }

    #[test]
    fn test_index_from_row_coerces_integer_uniqueness() {
        // MySQL drivers report booleans as 0/1.
        let row = row!["users", "users_name_idx", 1, "name"];
        let idx = Index::from_row(&row).unwrap();
        assert!(idx.unique);
    }
}
