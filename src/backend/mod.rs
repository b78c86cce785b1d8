//! Database backend seam.
//!
//! A backend is split in two:
//!
//! - [`Dialect`]: pure statement builders and type names for one target
//!   database. Implemented once per database ([`postgres::Postgres`],
//!   [`vertica::Vertica`]).
//! - [`Session`]: a live connection that executes statements and fetches rows.
//!
//! [`Database`] pairs the two and is the single handle every refresh step
//! receives. It owns the session for the lifetime of a run; dropping it
//! releases the connection on every exit path.

pub mod postgres;
pub mod vertica;

use std::path::Path;

use clap::ValueEnum;
use encoding_rs::Encoding;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{catalog::TableRef, error::BackendError, infer::TypeTag};

/// One fetched row, every cell rendered as text.
pub type Row = Vec<Option<String>>;

/// A statement plus its positional parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub sql: String,
    pub params: Vec<String>,
}

impl Query {
    pub fn text(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(sql: impl Into<String>, params: Vec<String>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

pub trait Dialect: Sync {
    fn name(&self) -> &'static str;

    /// Type every build-table column starts with.
    fn default_text_type(&self) -> &'static str;

    /// Backend type name for a resolved tag.
    fn type_name(&self, tag: TypeTag) -> &'static str;

    /// Whether row values and catalog lookups can be bound as parameters.
    fn supports_parameters(&self) -> bool;

    /// Whether DROP/ALTER can run inside a transaction.
    fn transactional_ddl(&self) -> bool;

    fn create_table(&self, table: &TableRef, columns: &[String]) -> String;

    fn drop_table(&self, table: &TableRef) -> String;

    fn alter_column_type(&self, table: &TableRef, column: &str, tag: TypeTag) -> String;

    fn rename_table(&self, from: &TableRef, to: &str) -> String;

    /// Column names of `table`, in ordinal order.
    fn list_columns(&self, table: &TableRef) -> Query;

    /// A single count: 0 when `table` does not exist.
    fn table_exists(&self, table: &TableRef) -> Query;

    fn count_rows(&self, table: &TableRef) -> String;

    fn sample_column(&self, table: &TableRef, column: &str, limit: u64) -> String;

    /// INSERT for one row. Parameter-capable dialects emit placeholders and
    /// leave values to binding; others inline escaped literals.
    fn insert_row(
        &self,
        table: &TableRef,
        columns: &[String],
        values: &[Option<&str>],
    ) -> String;

    /// One bulk-copy directive for the external loader script. `encoding` is
    /// the name returned by [`Dialect::copy_encoding`].
    fn copy_directive(
        &self,
        table: &TableRef,
        columns: &[String],
        path: &Path,
        delimiter: u8,
        encoding: &str,
    ) -> String;

    /// The loader's name for a source encoding, or `None` when bulk copy
    /// cannot read it.
    fn copy_encoding(&self, encoding: &'static Encoding) -> Option<&'static str>;

    /// Default external loader program and arguments.
    fn default_loader(&self) -> (&'static str, &'static [&'static str]);
}

pub trait Session {
    /// Executes one statement, returning the affected row count when known.
    fn execute(&mut self, sql: &str, params: &[Option<&str>]) -> Result<u64, BackendError>;

    fn query(&mut self, sql: &str, params: &[Option<&str>]) -> Result<Vec<Row>, BackendError>;

    fn close(self: Box<Self>) -> Result<(), BackendError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
#[value(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Postgres,
    Vertica,
}

impl BackendKind {
    pub fn dialect(self) -> &'static dyn Dialect {
        match self {
            BackendKind::Postgres => &postgres::Postgres,
            BackendKind::Vertica => &vertica::Vertica,
        }
    }
}

pub struct Database {
    dialect: &'static dyn Dialect,
    session: Option<Box<dyn Session>>,
}

impl Database {
    pub fn new(dialect: &'static dyn Dialect, session: Box<dyn Session>) -> Self {
        Self {
            dialect,
            session: Some(session),
        }
    }

    pub fn dialect(&self) -> &'static dyn Dialect {
        self.dialect
    }

    fn session(&mut self) -> Result<&mut Box<dyn Session>, BackendError> {
        self.session
            .as_mut()
            .ok_or_else(|| BackendError::Connection("session already closed".to_string()))
    }

    pub fn execute(&mut self, sql: &str) -> Result<u64, BackendError> {
        debug!("{sql}");
        self.session()?.execute(sql, &[])
    }

    pub fn execute_with(
        &mut self,
        sql: &str,
        params: &[Option<&str>],
    ) -> Result<u64, BackendError> {
        debug!("{sql} {params:?}");
        self.session()?.execute(sql, params)
    }

    pub fn fetch_rows(&mut self, query: &Query) -> Result<Vec<Row>, BackendError> {
        debug!("{} {:?}", query.sql, query.params);
        let params = query
            .params
            .iter()
            .map(|p| Some(p.as_str()))
            .collect::<Vec<_>>();
        self.session()?.query(&query.sql, &params)
    }

    fn fetch_count(&mut self, query: &Query) -> Result<u64, BackendError> {
        let rows = self.fetch_rows(query)?;
        let cell = rows
            .first()
            .and_then(|row| row.first())
            .cloned()
            .flatten()
            .ok_or_else(|| BackendError::unexpected(&query.sql, "expected a single count"))?;
        cell.trim()
            .parse::<u64>()
            .map_err(|err| BackendError::unexpected(&query.sql, format!("count '{cell}': {err}")))
    }

    pub fn table_exists(&mut self, table: &TableRef) -> Result<bool, BackendError> {
        let query = self.dialect.table_exists(table);
        Ok(self.fetch_count(&query)? > 0)
    }

    pub fn column_names(&mut self, table: &TableRef) -> Result<Vec<String>, BackendError> {
        let query = self.dialect.list_columns(table);
        let rows = self.fetch_rows(&query)?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.into_iter().next().flatten())
            .collect())
    }

    pub fn record_count(&mut self, table: &TableRef) -> Result<u64, BackendError> {
        let query = Query::text(self.dialect.count_rows(table));
        self.fetch_count(&query)
    }

    /// Releases the session. Further calls fail with a connection error.
    pub fn close(&mut self) -> Result<(), BackendError> {
        match self.session.take() {
            Some(session) => session.close(),
            None => Ok(()),
        }
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!("Closing database session: {err}");
        }
    }
}
