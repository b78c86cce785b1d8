//! Row-oriented backend: PostgreSQL dialect and the live session.

use std::{collections::HashMap, path::Path};

use encoding_rs::Encoding;
use log::info;
use postgres::{Client, NoTls, SimpleQueryMessage, Statement, types::ToSql};

use super::{Dialect, Query, Row, Session};
use crate::{
    catalog::TableRef,
    error::BackendError,
    infer::TypeTag,
    sql::{catalog_name, column_list, quote_identifier, quote_literal},
};

pub struct Postgres;

impl Dialect for Postgres {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn default_text_type(&self) -> &'static str {
        "text"
    }

    fn type_name(&self, tag: TypeTag) -> &'static str {
        match tag {
            TypeTag::Text => self.default_text_type(),
            other => other.as_str(),
        }
    }

    fn supports_parameters(&self) -> bool {
        true
    }

    fn transactional_ddl(&self) -> bool {
        true
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
        let column = quote_identifier(column);
        let type_name = self.type_name(tag);
        format!(
            "ALTER TABLE {} ALTER COLUMN {column} TYPE {type_name} USING {column}::{type_name}",
            table.qualified()
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
        Query::with_params(
            "SELECT column_name::text FROM information_schema.columns \
             WHERE table_schema::text = $1 AND table_name::text = $2 \
             ORDER BY ordinal_position",
            catalog_params(table),
        )
    }

    fn table_exists(&self, table: &TableRef) -> Query {
        Query::with_params(
            "SELECT count(*)::text FROM information_schema.tables \
             WHERE table_schema::text = $1 AND table_name::text = $2",
            catalog_params(table),
        )
    }

    fn count_rows(&self, table: &TableRef) -> String {
        format!("SELECT count(*) FROM {}", table.qualified())
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
        _values: &[Option<&str>],
    ) -> String {
        let placeholders = (1..=columns.len())
            .map(|idx| format!("${idx}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
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
        encoding: &str,
    ) -> String {
        format!(
            "\\copy {} ({}) FROM {} WITH (FORMAT csv, HEADER true, DELIMITER {}, ENCODING {})",
            table.qualified(),
            column_list(columns),
            quote_literal(&path.to_string_lossy()),
            quote_literal(&(delimiter as char).to_string()),
            quote_literal(encoding)
        )
    }

    /// Server-side character set names for the encodings `COPY` can convert.
    fn copy_encoding(&self, encoding: &'static Encoding) -> Option<&'static str> {
        let name = match encoding.name() {
            "UTF-8" => "UTF8",
            "IBM866" => "WIN866",
            "ISO-8859-2" => "LATIN2",
            "ISO-8859-3" => "LATIN3",
            "ISO-8859-4" => "LATIN4",
            "ISO-8859-5" => "ISO_8859_5",
            "ISO-8859-6" => "ISO_8859_6",
            "ISO-8859-7" => "ISO_8859_7",
            "ISO-8859-8" => "ISO_8859_8",
            "ISO-8859-10" => "LATIN6",
            "ISO-8859-13" => "LATIN7",
            "ISO-8859-14" => "LATIN8",
            "ISO-8859-15" => "LATIN9",
            "ISO-8859-16" => "LATIN10",
            "KOI8-R" => "KOI8R",
            "KOI8-U" => "KOI8U",
            "windows-874" => "WIN874",
            "windows-1250" => "WIN1250",
            "windows-1251" => "WIN1251",
            "windows-1252" => "WIN1252",
            "windows-1253" => "WIN1253",
            "windows-1254" => "WIN1254",
            "windows-1255" => "WIN1255",
            "windows-1256" => "WIN1256",
            "windows-1257" => "WIN1257",
            "windows-1258" => "WIN1258",
            "Shift_JIS" => "SJIS",
            "EUC-JP" => "EUC_JP",
            "EUC-KR" => "EUC_KR",
            "GBK" => "GBK",
            "gb18030" => "GB18030",
            "Big5" => "BIG5",
            _ => return None,
        };
        Some(name)
    }

    fn default_loader(&self) -> (&'static str, &'static [&'static str]) {
        (
            "psql",
            &[
                "-X",
                "-q",
                "-v",
                "ON_ERROR_STOP=1",
                "-d",
                "{connection_uri}",
                "-f",
                "{script}",
            ],
        )
    }
}

/// Schema and table name as `information_schema` stores them after folding.
fn catalog_params(table: &TableRef) -> Vec<String> {
    vec![catalog_name(&table.schema), catalog_name(&table.name)]
}

/// Session over the PostgreSQL wire protocol.
pub struct PgSession {
    client: Client,
    statements: HashMap<String, Statement>,
}

impl PgSession {
    pub fn connect(connection_uri: &str) -> Result<Self, BackendError> {
        let client = Client::connect(connection_uri, NoTls)
            .map_err(|err| BackendError::Connection(err.to_string()))?;
        Ok(Self {
            client,
            statements: HashMap::new(),
        })
    }

    fn prepared(&mut self, sql: &str) -> Result<Statement, BackendError> {
        if let Some(statement) = self.statements.get(sql) {
            return Ok(statement.clone());
        }
        let statement = self
            .client
            .prepare(sql)
            .map_err(|err| BackendError::statement(sql, err))?;
        self.statements.insert(sql.to_string(), statement.clone());
        Ok(statement)
    }
}

fn bind<'a>(params: &'a [Option<&'a str>]) -> Vec<&'a (dyn ToSql + Sync)> {
    params
        .iter()
        .map(|param| param as &(dyn ToSql + Sync))
        .collect()
}

impl Session for PgSession {
    fn execute(&mut self, sql: &str, params: &[Option<&str>]) -> Result<u64, BackendError> {
        if params.is_empty() {
            return self
                .client
                .execute(sql, &[])
                .map_err(|err| BackendError::statement(sql, err));
        }
        let statement = self.prepared(sql)?;
        self.client
            .execute(&statement, &bind(params))
            .map_err(|err| BackendError::statement(sql, err))
    }

    fn query(&mut self, sql: &str, params: &[Option<&str>]) -> Result<Vec<Row>, BackendError> {
        if params.is_empty() {
            // Text protocol: every cell arrives as a string whatever its type.
            let messages = self
                .client
                .simple_query(sql)
                .map_err(|err| BackendError::statement(sql, err))?;
            return Ok(messages
                .into_iter()
                .filter_map(|message| match message {
                    SimpleQueryMessage::Row(row) => Some(
                        (0..row.len())
                            .map(|idx| row.get(idx).map(str::to_string))
                            .collect(),
                    ),
                    _ => None,
                })
                .collect());
        }
        let statement = self.prepared(sql)?;
        let rows = self
            .client
            .query(&statement, &bind(params))
            .map_err(|err| BackendError::statement(sql, err))?;
        rows.iter()
            .map(|row| {
                (0..row.len())
                    .map(|idx| {
                        row.try_get::<_, Option<String>>(idx)
                            .map_err(|err| BackendError::unexpected(sql, err))
                    })
                    .collect()
            })
            .collect()
    }

    fn close(self: Box<Self>) -> Result<(), BackendError> {
        info!("Closing database session");
        self.client
            .close()
            .map_err(|err| BackendError::Connection(err.to_string()))
    }
}
