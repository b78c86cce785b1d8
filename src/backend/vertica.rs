//! Columnar-warehouse backend (Vertica dialect).
//!
//! Statements are fully textual: values and catalog keys are inlined through
//! [`crate::sql::quote_literal`]. Identifiers match case-insensitively, so
//! catalog lookups compare lower-cased names.

use std::path::Path;

use encoding_rs::{Encoding, UTF_8};

use super::{Dialect, Query};
use crate::{
    catalog::TableRef,
    infer::TypeTag,
    sql::{column_list, literal_or_null, quote_identifier, quote_literal},
};

pub struct Vertica;

impl Dialect for Vertica {
    fn name(&self) -> &'static str {
        "vertica"
    }

    fn default_text_type(&self) -> &'static str {
        "varchar"
    }

    fn type_name(&self, tag: TypeTag) -> &'static str {
        match tag {
            TypeTag::Text => self.default_text_type(),
            other => other.as_str(),
        }
    }

    fn supports_parameters(&self) -> bool {
        false
    }

    fn transactional_ddl(&self) -> bool {
        false
    }

    fn create_table(&self, table: &TableRef, columns: &[String]) -> String {
        let definitions = columns
            .iter()
            .map(|column| format!("{} {}", quote_identifier(column), self.default_text_type()))
            .collect::<Vec<_>>()
            .join(", ");
        format!("CREATE TABLE {} ({definitions})", table.qualified())
    }

    fn drop_table(&self, table: &TableRef) -> String {
        format!("DROP TABLE IF EXISTS {} CASCADE", table.qualified())
    }

    fn alter_column_type(&self, table: &TableRef, column: &str, tag: TypeTag) -> String {
        format!(
            "ALTER TABLE {} ALTER COLUMN {} SET DATA TYPE {} ALL PROJECTIONS",
            table.qualified(),
            quote_identifier(column),
            self.type_name(tag)
        )
    }

    fn rename_table(&self, from: &TableRef, to: &str) -> String {
        format!(
            "ALTER TABLE {} RENAME TO {}",
            from.qualified(),
            quote_identifier(to)
        )
    }

    fn list_columns(&self, table: &TableRef) -> Query {
        Query::text(format!(
            "SELECT column_name FROM v_catalog.columns WHERE lower(table_schema) = {} AND lower(table_name) = {} ORDER BY ordinal_position",
            quote_literal(&table.schema.to_lowercase()),
            quote_literal(&table.name.to_lowercase())
        ))
    }

    fn table_exists(&self, table: &TableRef) -> Query {
        Query::text(format!(
            "SELECT COUNT(*) FROM v_catalog.tables WHERE lower(table_schema) = {} AND lower(table_name) = {}",
            quote_literal(&table.schema.to_lowercase()),
            quote_literal(&table.name.to_lowercase())
        ))
    }

    fn count_rows(&self, table: &TableRef) -> String {
        format!("SELECT COUNT(*) FROM {}", table.qualified())
    }

    fn sample_column(&self, table: &TableRef, column: &str, limit: u64) -> String {
        let column = quote_identifier(column);
        format!(
            "SELECT {column} FROM {} WHERE {column} IS NOT NULL LIMIT {limit}",
            table.qualified()
        )
    }

    fn insert_row(
        &self,
        table: &TableRef,
        columns: &[String],
        values: &[Option<&str>],
    ) -> String {
        let literals = values
            .iter()
            .map(|value| literal_or_null(*value))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "INSERT INTO {} ({}) VALUES ({literals})",
            table.qualified(),
            column_list(columns)
        )
    }

    fn copy_directive(
        &self,
        table: &TableRef,
        columns: &[String],
        path: &Path,
        delimiter: u8,
        _encoding: &str,
    ) -> String {
        format!(
            "COPY {} ({}) FROM LOCAL {} DELIMITER {} ENCLOSED BY '\"' SKIP 1 ABORT ON ERROR;",
            table.qualified(),
            column_list(columns),
            quote_literal(&path.to_string_lossy()),
            quote_literal(&(delimiter as char).to_string())
        )
    }

    /// `COPY` reads UTF-8 only.
    fn copy_encoding(&self, encoding: &'static Encoding) -> Option<&'static str> {
        (encoding == UTF_8).then_some("UTF8")
    }

    fn default_loader(&self) -> (&'static str, &'static [&'static str]) {
        ("vsql", &["-v", "ON_ERROR_STOP=on", "-f", "{script}"])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> TableRef {
        TableRef::new("schema_hi", "med_admin_build")
    }

    #[test]
    fn build_columns_widen_to_varchar() {
        let sql = Vertica.create_table(&table(), &["id".to_string(), "dose".to_string()]);
        assert_eq!(
            sql,
            "CREATE TABLE schema_hi.med_admin_build (id varchar, dose varchar)"
        );
        assert_eq!(Vertica.type_name(TypeTag::Text), "varchar");
    }

    #[test]
    fn alter_column_applies_to_all_projections() {
        assert_eq!(
            Vertica.alter_column_type(&table(), "dose", TypeTag::Integer),
            "ALTER TABLE schema_hi.med_admin_build ALTER COLUMN dose SET DATA TYPE integer ALL PROJECTIONS"
        );
    }

    #[test]
    fn insert_inlines_escaped_literals() {
        let columns = vec!["id".to_string(), "note".to_string(), "dose".to_string()];
        let sql = Vertica.insert_row(&table(), &columns, &[Some("7"), Some("O'Neil"), None]);
        assert_eq!(
            sql,
            "INSERT INTO schema_hi.med_admin_build (id, note, dose) VALUES ('7', 'O''Neil', NULL)"
        );
    }

    #[test]
    fn catalog_queries_are_textual() {
        let query = Vertica.table_exists(&TableRef::new("schema_hi", "o'dd"));
        assert!(query.params.is_empty());
        assert!(query.sql.contains("v_catalog.tables"));
        assert!(query.sql.contains("lower(table_name) = 'o''dd'"));
    }

    #[test]
    fn catalog_lookups_ignore_identifier_case() {
        let table = TableRef::new("Schema_HI", "People_build");
        let exists = Vertica.table_exists(&table);
        assert!(exists.sql.contains("lower(table_schema) = 'schema_hi'"));
        assert!(exists.sql.contains("lower(table_name) = 'people_build'"));
        let columns = Vertica.list_columns(&table);
        assert!(columns.sql.contains("lower(table_schema) = 'schema_hi'"));
    }

    #[test]
    fn reserved_word_columns_are_quoted() {
        let columns = vec!["id".to_string(), "order".to_string()];
        assert_eq!(
            Vertica.create_table(&table(), &columns),
            "CREATE TABLE schema_hi.med_admin_build (id varchar, \"order\" varchar)"
        );
        assert_eq!(
            Vertica.alter_column_type(&table(), "user", TypeTag::Integer),
            "ALTER TABLE schema_hi.med_admin_build ALTER COLUMN \"user\" SET DATA TYPE integer ALL PROJECTIONS"
        );
    }

    #[test]
    fn copy_accepts_only_utf8_sources() {
        assert_eq!(Vertica.copy_encoding(UTF_8), Some("UTF8"));
        assert_eq!(Vertica.copy_encoding(encoding_rs::WINDOWS_1252), None);
    }

    #[test]
    fn copy_directive_skips_header_row() {
        let columns = vec!["id".to_string()];
        let directive =
            Vertica.copy_directive(&table(), &columns, Path::new("./input/med_admin.csv"), b'|', "UTF8");
        assert_eq!(
            directive,
            "COPY schema_hi.med_admin_build (id) FROM LOCAL './input/med_admin.csv' DELIMITER '|' ENCLOSED BY '\"' SKIP 1 ABORT ON ERROR;"
        );
    }
}
