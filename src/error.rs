//! Error taxonomy for a refresh run.
//!
//! Run-level failures (configuration, connection, discovery) travel as
//! `anyhow::Error` and abort before any table is touched. Everything that
//! happens inside one table's processing ends up as a [`TableError`], which the
//! batch loop records and moves past.

use std::{fmt, io, path::PathBuf, process::ExitStatus};

use thiserror::Error;

use crate::catalog::TableRef;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("statement failed: {message} [sql: {sql}]")]
    Statement { sql: String, message: String },
    #[error("unexpected result from [{sql}]: {message}")]
    UnexpectedResult { sql: String, message: String },
}

impl BackendError {
    pub fn statement(sql: &str, message: impl fmt::Display) -> Self {
        BackendError::Statement {
            sql: sql.to_string(),
            message: message.to_string(),
        }
    }

    pub fn unexpected(sql: &str, message: impl fmt::Display) -> Self {
        BackendError::UnexpectedResult {
            sql: sql.to_string(),
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("source {path:?} has no header columns")]
    EmptyHeader { path: PathBuf },
    #[error("reading header of {path:?}: {source}")]
    Header {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("creating build table {table}: {source}")]
    Create {
        table: TableRef,
        #[source]
        source: BackendError,
    },
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("opening source {path:?}: {source}")]
    Source {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("writing load script {path:?}: {source}")]
    Script {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{backend} bulk copy cannot read {encoding} sources")]
    UnsupportedEncoding {
        encoding: &'static str,
        backend: &'static str,
    },
    #[error("failed to start bulk loader `{program}`: {source}")]
    LoaderSpawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("bulk loader `{program}` exited with {status} for script {script:?}")]
    LoaderFailed {
        program: String,
        status: ExitStatus,
        script: PathBuf,
    },
    #[error("auditing loaded rows: {0}")]
    Audit(#[source] BackendError),
}

#[derive(Debug, Error)]
pub enum SwapError {
    #[error("build table {0} does not exist; nothing to promote")]
    MissingBuild(TableRef),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Per-table processing step, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Build,
    Load,
    Narrow,
    Swap,
    Audit,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Build => "build",
            Step::Load => "load",
            Step::Narrow => "narrow",
            Step::Swap => "swap",
            Step::Audit => "audit",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("table {table}: {step} step failed: {source}")]
pub struct TableError {
    pub table: TableRef,
    pub step: Step,
    #[source]
    pub source: anyhow::Error,
}

impl TableError {
    pub fn new(table: &TableRef, step: Step, source: impl Into<anyhow::Error>) -> Self {
        Self {
            table: table.clone(),
            step,
            source: source.into(),
        }
    }
}
