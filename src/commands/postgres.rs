//! PostgreSQL statement templates
//!
//! PostgreSQL has no native `SHOW CREATE TABLE`, so a handle installs the
//! [`SHOW_CREATE_TABLE_FUNCTION`] helper for the session and drops it on
//! teardown. The helper synthesises the statement from `pg_catalog` /
//! `pg_attribute` and emits the table name as a `{}` placeholder, which is
//! exactly the template shape the shadow-table creation wants.
//!
//! Triggers need a PL/pgSQL function per event; each install is therefore
//! two statements (function, then trigger), and teardown drops both.

use crate::connection::{Row, Value};

use super::{RenameStrategy, SqlCommands, TriggerEvent};

/// Synthesises a CREATE statement for a table, with the table name left as
/// a `{}` placeholder.
const SHOW_CREATE_TABLE_FUNCTION: &str = r#"CREATE OR REPLACE FUNCTION show_create_table(p_table_name varchar)
  RETURNS text AS
$BODY$
DECLARE
    v_table_ddl   text;
    column_record record;
BEGIN
    FOR column_record IN
        SELECT
            b.nspname as schema_name,
            b.relname as table_name,
            a.attname as column_name,
            pg_catalog.format_type(a.atttypid, a.atttypmod) as column_type,
            CASE WHEN
                (SELECT substring(pg_catalog.pg_get_expr(d.adbin, d.adrelid) for 128)
                 FROM pg_catalog.pg_attrdef d
                 WHERE d.adrelid = a.attrelid AND d.adnum = a.attnum AND a.atthasdef) IS NOT NULL THEN
                'DEFAULT '|| (SELECT substring(pg_catalog.pg_get_expr(d.adbin, d.adrelid) for 128)
                              FROM pg_catalog.pg_attrdef d
                              WHERE d.adrelid = a.attrelid AND d.adnum = a.attnum AND a.atthasdef)
            ELSE
                ''
            END as column_default_value,
            CASE WHEN a.attnotnull = true THEN
                'NOT NULL'
            ELSE
                'NULL'
            END as column_not_null,
            a.attnum as attnum,
            e.max_attnum as max_attnum
        FROM
            pg_catalog.pg_attribute a
            INNER JOIN
             (SELECT c.oid,
                n.nspname,
                c.relname
              FROM pg_catalog.pg_class c
                   LEFT JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
              WHERE c.relname ~ ('^('||p_table_name||')$')
                AND pg_catalog.pg_table_is_visible(c.oid)
              ORDER BY 2, 3) b
            ON a.attrelid = b.oid
            INNER JOIN
             (SELECT
                  a.attrelid,
                  max(a.attnum) as max_attnum
              FROM pg_catalog.pg_attribute a
              WHERE a.attnum > 0
                AND NOT a.attisdropped
              GROUP BY a.attrelid) e
            ON a.attrelid=e.attrelid
        WHERE a.attnum > 0
          AND NOT a.attisdropped
        ORDER BY a.attnum
    LOOP
        IF column_record.attnum = 1 THEN
            v_table_ddl:='CREATE TABLE {} (';
        ELSE
            v_table_ddl:=v_table_ddl||',';
        END IF;

        IF column_record.attnum <= column_record.max_attnum THEN
            v_table_ddl:=v_table_ddl||chr(10)||
                     '    '||column_record.column_name||' '||column_record.column_type||' '||column_record.column_default_value||' '||column_record.column_not_null;
        END IF;
    END LOOP;

    v_table_ddl:=v_table_ddl||');';
    RETURN v_table_ddl;
END;
$BODY$
  LANGUAGE 'plpgsql' COST 100.0 SECURITY INVOKER;"#;

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresCommands;

impl SqlCommands for PostgresCommands {
    fn get_tables(&self, _database_name: &str) -> String {
        "SELECT DISTINCT(tablename) FROM pg_catalog.pg_tables \
         WHERE schemaname != 'pg_catalog' AND schemaname != 'information_schema'"
            .to_string()
    }

    fn create_statement_query(&self, table: &str) -> String {
        format!("SELECT show_create_table('{table}')")
    }

    fn create_statement_from_rows(&self, rows: &[Row]) -> Option<String> {
        rows.first()?.first()?.as_str().map(str::to_string)
    }

    fn shadow_create_template(&self, statement: &str, _source_table: &str) -> String {
        // show_create_table already emits the name as a `{}` placeholder.
        statement.to_string()
    }

    fn table_columns(&self, table: &str) -> String {
        format!(
            "SELECT column_name FROM information_schema.columns \
             WHERE table_name = '{table}'"
        )
    }

    fn column_definition_query(&self, _database_name: &str, table: &str, column: &str) -> String {
        format!(
            "SELECT udt_name, character_maximum_length, is_nullable, column_default \
             FROM information_schema.columns \
             WHERE TABLE_NAME = '{table}' AND COLUMN_NAME = '{column}'"
        )
    }

    fn column_definition_from_row(&self, row: &Row) -> Option<String> {
        let mut definition = row.first()?.as_str()?.to_string();
        if let Some(max_length) = row.get(1).and_then(Value::as_i64) {
            definition = format!("{definition}({max_length})");
        }
        if row.get(2).and_then(Value::as_str) == Some("NO") {
            definition.push_str(" NOT NULL");
        }
        if let Some(default) = row.get(3).and_then(Value::as_str) {
            definition = format!("{definition} default {default}");
        }
        Some(definition)
    }

    fn get_constraints(&self, _database_name: &str, table: &str) -> String {
        format!(
            "SELECT tc.constraint_name, tc.table_name, tc.constraint_type, \
             ccu.column_name, cc.check_clause \
             FROM information_schema.table_constraints AS tc \
             LEFT OUTER JOIN information_schema.constraint_column_usage AS ccu \
             ON ccu.constraint_name = tc.constraint_name \
             LEFT OUTER JOIN information_schema.check_constraints AS cc \
             ON cc.constraint_name = tc.constraint_name \
             WHERE tc.table_name='{table}' \
             AND tc.constraint_type != 'FOREIGN KEY'"
        )
    }

    fn foreign_keys(&self, _database_name: &str, table: &str) -> String {
        format!(
            "SELECT tc.constraint_name, tc.table_name, kcu.column_name, \
             ccu.table_name AS ref_table, ccu.column_name AS ref_column, \
             CASE WHEN ccu.table_name='{table}' THEN TRUE ELSE FALSE END \
             FROM information_schema.table_constraints AS tc \
             LEFT OUTER JOIN information_schema.key_column_usage AS kcu \
             ON tc.constraint_name = kcu.constraint_name \
             LEFT OUTER JOIN information_schema.constraint_column_usage AS ccu \
             ON ccu.constraint_name = tc.constraint_name \
             WHERE (tc.table_name='{table}' OR ccu.table_name='{table}') \
             AND tc.constraint_type = 'FOREIGN KEY'"
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
            "SELECT * FROM information_schema.key_column_usage AS kcu \
             JOIN information_schema.constraint_column_usage AS ccu \
             ON ccu.constraint_name = kcu.constraint_name \
             WHERE kcu.table_catalog = '{database_name}' \
             AND kcu.table_name = '{table}' \
             AND kcu.column_name = '{column}' \
             AND ccu.table_name = '{referenced_table}' \
             AND ccu.column_name = '{referenced_column}'"
        )
    }

    fn get_indexes(&self, table: &str) -> String {
        format!(
            "SELECT t.relname AS table_name, i.relname AS index_name, \
             ix.indisunique AS index_unique, a.attname AS column_name \
             FROM pg_class t, pg_class i, pg_index ix, pg_attribute a \
             WHERE t.oid = ix.indrelid \
             AND i.oid = ix.indexrelid \
             AND a.attrelid = t.oid \
             AND a.attnum = ANY(ix.indkey) \
             AND t.relkind = 'r' \
             AND t.relname = '{table}' \
             ORDER BY t.relname, i.relname"
        )
    }

    fn create_table(&self, table: &str, primary_key_col: &str) -> String {
        format!("CREATE TABLE IF NOT EXISTS {table} ({primary_key_col} SERIAL PRIMARY KEY)")
    }

    fn alter_column(&self, table: &str, column: &str, definition: &str) -> String {
        format!("ALTER TABLE {table} ALTER COLUMN {column} {definition}")
    }

    fn rename_column(
        &self,
        table: &str,
        old_name: &str,
        new_name: &str,
        _definition: Option<&str>,
    ) -> String {
        format!("ALTER TABLE {table} RENAME COLUMN {old_name} TO {new_name}")
    }

    fn drop_foreign_key(&self, table: &str, fk_name: &str) -> String {
        format!("ALTER TABLE {table} DROP CONSTRAINT IF EXISTS {fk_name}")
    }

    fn add_index(&self, table: &str, index_name: &str, columns: &str, unique: bool) -> String {
        let unique_str = if unique { "UNIQUE " } else { "" };
        format!("CREATE {unique_str}INDEX {index_name} ON {table} ({columns})")
    }

    fn drop_index(&self, _table: &str, index_name: &str) -> String {
        format!("DROP INDEX IF EXISTS {index_name}")
    }

    fn insert_row(&self, table: &str, columns: &str, values: &str) -> String {
        format!("INSERT INTO {table} ({columns}) VALUES ({values}); SELECT LASTVAL();")
    }

    fn insert_returns_id(&self) -> bool {
        true
    }

    fn insert_trigger_statements(
        &self,
        trigger_name: &str,
        source_table: &str,
        dest_table: &str,
        dest_cols: &str,
        new_values: &str,
    ) -> Vec<String> {
        let function = format!(
            "CREATE OR REPLACE FUNCTION insert_{dest_table}() RETURNS TRIGGER AS\n\
             $BODY$\n\
             BEGIN\n\
                 INSERT INTO {dest_table}({dest_cols}) VALUES({new_values});\n\
                 RETURN NEW;\n\
             END;\n\
             $BODY$\n\
             language plpgsql"
        );
        let trigger = format!(
            "CREATE TRIGGER {trigger_name} AFTER INSERT ON {source_table} \
             FOR EACH ROW EXECUTE PROCEDURE insert_{dest_table}()"
        );
        vec![function, trigger]
    }

    fn update_trigger_statements(
        &self,
        trigger_name: &str,
        source_table: &str,
        dest_table: &str,
        assignments: &str,
        pk_col: &str,
    ) -> Vec<String> {
        let function = format!(
            "CREATE OR REPLACE FUNCTION update_{dest_table}() RETURNS TRIGGER AS\n\
             $BODY$\n\
             BEGIN\n\
                 UPDATE {dest_table} SET {assignments}\n\
                 WHERE {pk_col}=NEW.{pk_col};\n\
                 RETURN NEW;\n\
             END;\n\
             $BODY$\n\
             language plpgsql"
        );
        let trigger = format!(
            "CREATE TRIGGER {trigger_name} AFTER UPDATE ON {source_table} \
             FOR EACH ROW EXECUTE PROCEDURE update_{dest_table}()"
        );
        vec![function, trigger]
    }

    fn delete_trigger_statements(
        &self,
        trigger_name: &str,
        source_table: &str,
        dest_table: &str,
        pk_col: &str,
    ) -> Vec<String> {
        let function = format!(
            "CREATE OR REPLACE FUNCTION delete_{dest_table}() RETURNS TRIGGER AS\n\
             $BODY$\n\
             BEGIN\n\
                 DELETE FROM {dest_table}\n\
                 WHERE {dest_table}.{pk_col}=OLD.{pk_col};\n\
                 RETURN NEW;\n\
             END;\n\
             $BODY$\n\
             language plpgsql"
        );
        let trigger = format!(
            "CREATE TRIGGER {trigger_name} AFTER DELETE ON {source_table} \
             FOR EACH ROW EXECUTE PROCEDURE delete_{dest_table}()"
        );
        vec![function, trigger]
    }

    fn drop_trigger_statements(
        &self,
        trigger_name: &str,
        event: TriggerEvent,
        source_table: &str,
        dest_table: &str,
    ) -> Vec<String> {
        vec![
            format!("DROP TRIGGER IF EXISTS {trigger_name} ON {source_table}"),
            format!("DROP FUNCTION IF EXISTS {event}_{dest_table}()"),
        ]
    }

    fn rename_strategy(&self) -> RenameStrategy {
        RenameStrategy::Transactional
    }

    fn rename_tables_statements(
        &self,
        source_table: &str,
        archive_table: &str,
        shadow_table: &str,
    ) -> Vec<String> {
        vec![
            "BEGIN".to_string(),
            format!("ALTER TABLE {source_table} RENAME TO {archive_table}"),
            format!("ALTER TABLE {shadow_table} RENAME TO {source_table}"),
            "COMMIT".to_string(),
        ]
    }

    fn get_sequences(&self, table: &str) -> Option<String> {
        Some(format!(
            "SELECT s.relname, a.attname \
             FROM pg_class s \
             JOIN pg_depend d ON d.objid=s.oid \
               AND d.classid='pg_class'::regclass \
               AND d.refclassid='pg_class'::regclass \
             JOIN pg_class t ON t.oid=d.refobjid \
             JOIN pg_attribute a ON a.attrelid=t.oid \
               AND a.attnum=d.refobjsubid \
             WHERE s.relkind='S' AND d.deptype='a' \
             AND t.relname='{table}'"
        ))
    }

    fn get_database_sequences(&self, database_name: &str) -> Option<String> {
        Some(format!(
            "SELECT sequence_name FROM information_schema.sequences \
             WHERE sequence_catalog = '{database_name}'"
        ))
    }

    fn create_sequence(&self, sequence_name: &str) -> Option<String> {
        Some(format!("CREATE SEQUENCE {sequence_name}"))
    }

    fn remove_sequence_from_col(&self, table: &str, column: &str) -> Option<String> {
        Some(format!("ALTER TABLE {table} ALTER COLUMN {column} DROP DEFAULT"))
    }

    fn set_sequence_owner(&self, sequence_name: &str, table: &str, column: &str) -> Option<String> {
        Some(format!("ALTER SEQUENCE {sequence_name} OWNED BY {table}.{column}"))
    }

    fn session_setup_statements(&self) -> Vec<String> {
        vec![SHOW_CREATE_TABLE_FUNCTION.to_string()]
    }

    fn session_teardown_statements(&self) -> Vec<String> {
        vec!["DROP FUNCTION show_create_table(p_table_name varchar)".to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row;

    const COMMANDS: PostgresCommands = PostgresCommands;

    #[test]
    fn test_identifiers_are_not_quoted() {
        assert_eq!(COMMANDS.quote_ident("zipcode"), "zipcode");
    }

    #[test]
    fn test_create_table_uses_serial_pk() {
        assert_eq!(
            COMMANDS.create_table("users", "id"),
            "CREATE TABLE IF NOT EXISTS users (id SERIAL PRIMARY KEY)"
        );
    }

    #[test]
    fn test_insert_row_appends_lastval() {
        let sql = COMMANDS.insert_row("users", "name", "'Damien Chazelle'");
        assert!(sql.ends_with("SELECT LASTVAL();"), "got: {sql}");
        assert!(COMMANDS.insert_returns_id());
    }

    #[test]
    fn test_create_statement_comes_from_first_column() {
        let rows = vec![row!["CREATE TABLE {} (\n    id integer NOT NULL);"]];
        assert_eq!(
            COMMANDS.create_statement_from_rows(&rows).unwrap(),
            "CREATE TABLE {} (\n    id integer NOT NULL);"
        );
        assert!(COMMANDS.create_statement_from_rows(&[]).is_none());
    }

    #[test]
    fn test_shadow_template_is_passthrough() {
        // The show_create_table helper already emits the placeholder.
        let stmt = "CREATE TABLE {} ( id integer NOT NULL);";
        assert_eq!(COMMANDS.shadow_create_template(stmt, "users"), stmt);
    }

    #[test]
    fn test_copy_chunk_anti_join_and_inclusive_bound() {
        let sql = COMMANDS.copy_chunk(
            "migrate_users",
            "id, name",
            "users.id, users.name",
            "users",
            "id",
            100,
            50,
        );
        assert!(sql.starts_with("INSERT INTO migrate_users"), "plain INSERT: {sql}");
        assert!(sql.contains("LEFT OUTER JOIN migrate_users ON users.id=migrate_users.id"));
        assert!(sql.contains("migrate_users.id IS NULL"));
        assert!(
            sql.contains("users.id >= 100"),
            "inclusive bound keeps the boundary row: {sql}"
        );
        assert!(sql.contains("LIMIT 50"));
    }

    #[test]
    fn test_next_pk_is_strictly_greater() {
        let sql = COMMANDS.next_pk("users", "id", 100, 50);
        assert!(sql.contains("WHERE id>100"));
        assert!(sql.contains("LIMIT 50"));
    }

    #[test]
    fn test_insert_trigger_is_function_then_trigger() {
        let stmts = COMMANDS.insert_trigger_statements(
            "migration_trigger_insert_users",
            "users",
            "migrate_users",
            "id, name",
            "NEW.id, NEW.name",
        );
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].starts_with("CREATE OR REPLACE FUNCTION insert_migrate_users()"));
        assert!(stmts[0].contains("INSERT INTO migrate_users(id, name) VALUES(NEW.id, NEW.name);"));
        assert!(stmts[1].contains("AFTER INSERT ON users"));
        assert!(stmts[1].contains("EXECUTE PROCEDURE insert_migrate_users()"));
    }

    #[test]
    fn test_update_trigger_matches_on_new_pk() {
        let stmts = COMMANDS.update_trigger_statements(
            "migration_trigger_update_users",
            "users",
            "migrate_users",
            "name=NEW.name",
            "id",
        );
        assert!(stmts[0].contains("WHERE id=NEW.id;"));
    }

    #[test]
    fn test_delete_trigger_matches_on_old_pk() {
        let stmts = COMMANDS.delete_trigger_statements(
            "migration_trigger_delete_users",
            "users",
            "migrate_users",
            "id",
        );
        assert!(stmts[0].contains("WHERE migrate_users.id=OLD.id;"));
    }

    #[test]
    fn test_drop_trigger_also_drops_function() {
        let stmts = COMMANDS.drop_trigger_statements(
            "migration_trigger_insert_users",
            TriggerEvent::Insert,
            "users",
            "migrate_users",
        );
        assert_eq!(
            stmts,
            vec![
                "DROP TRIGGER IF EXISTS migration_trigger_insert_users ON users".to_string(),
                "DROP FUNCTION IF EXISTS insert_migrate_users()".to_string(),
            ]
        );
    }

    #[test]
    fn test_rename_swap_is_wrapped_in_transaction() {
        assert_eq!(COMMANDS.rename_strategy(), RenameStrategy::Transactional);
        let stmts = COMMANDS.rename_tables_statements("users", "archive_users", "migrate_users");
        assert_eq!(
            stmts,
            vec![
                "BEGIN".to_string(),
                "ALTER TABLE users RENAME TO archive_users".to_string(),
                "ALTER TABLE migrate_users RENAME TO users".to_string(),
                "COMMIT".to_string(),
            ]
        );
    }

    #[test]
    fn test_column_definition_assembly() {
        let row = row!["varchar", 20, "NO", Value::Null];
        assert_eq!(
            COMMANDS.column_definition_from_row(&row).unwrap(),
            "varchar(20) NOT NULL"
        );

        let row = row!["int4", Value::Null, "YES", "nextval('users_id_seq'::regclass)"];
        assert_eq!(
            COMMANDS.column_definition_from_row(&row).unwrap(),
            "int4 default nextval('users_id_seq'::regclass)"
        );
    }

    #[test]
    fn test_sequence_ownership_statements() {
        assert_eq!(
            COMMANDS
                .remove_sequence_from_col("archive_users", "id")
                .unwrap(),
            "ALTER TABLE archive_users ALTER COLUMN id DROP DEFAULT"
        );
        assert_eq!(
            COMMANDS
                .set_sequence_owner("users_id_seq", "users", "id")
                .unwrap(),
            "ALTER SEQUENCE users_id_seq OWNED BY users.id"
        );
    }

    #[test]
    fn test_session_setup_installs_show_create_table() {
        let setup = COMMANDS.session_setup_statements();
        assert_eq!(setup.len(), 1);
        assert!(setup[0].contains("CREATE OR REPLACE FUNCTION show_create_table"));
        assert!(
            setup[0].contains("v_table_ddl:='CREATE TABLE {} ('"),
            "the helper emits the shadow placeholder"
        );
        let teardown = COMMANDS.session_teardown_statements();
        assert!(teardown[0].starts_with("DROP FUNCTION show_create_table"));
    }

    #[test]
    fn test_foreign_keys_query_tags_both_directions() {
        let sql = COMMANDS.foreign_keys("moviedb", "users");
        assert!(sql.contains("CASE WHEN ccu.table_name='users' THEN TRUE ELSE FALSE END"));
        assert!(sql.contains("(tc.table_name='users' OR ccu.table_name='users')"));
    }
}
