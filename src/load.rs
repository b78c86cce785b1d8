//! Bulk loading of a source into its build table.
//!
//! Two strategies:
//!
//! - **bulk copy**: a load script with the dialect's copy directive is written
//!   to disk and handed to an external executable (`psql`, `vsql`). Its exit
//!   status is the only success signal; non-zero fails the table.
//! - **row insert**: one INSERT per CSV row over the open session. A bad row is
//!   logged and skipped; the load itself never fails on a single row.

use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    process::Command,
};

use anyhow::Result;
use clap::ValueEnum;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    backend::Database, catalog::TableSpec, error::LoadError, source::CsvSource,
};

const SCRIPT_PLACEHOLDER: &str = "{script}";
const URI_PLACEHOLDER: &str = "{connection_uri}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
#[value(rename_all = "kebab-case")]
pub enum LoadStrategy {
    #[default]
    BulkCopy,
    RowInsert,
}

/// External bulk-load executable and how to call it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderCommand {
    pub program: String,
    pub args: Vec<String>,
    pub script_dir: PathBuf,
    pub connection_uri: String,
}

impl LoaderCommand {
    /// Arguments with placeholders substituted. The script path is appended
    /// when no argument mentions it.
    pub fn arguments(&self, script: &Path) -> Vec<String> {
        let script = script.to_string_lossy();
        let mut args = self
            .args
            .iter()
            .map(|arg| {
                arg.replace(SCRIPT_PLACEHOLDER, &script)
                    .replace(URI_PLACEHOLDER, &self.connection_uri)
            })
            .collect::<Vec<_>>();
        if !self.args.iter().any(|arg| arg.contains(SCRIPT_PLACEHOLDER)) {
            args.push(script.into_owned());
        }
        args
    }
}

#[derive(Debug, Clone)]
pub enum Loader {
    BulkCopy(LoaderCommand),
    RowInsert,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub attempted: u64,
    pub loaded: u64,
    pub failed: u64,
}

pub fn load(
    db: &mut Database,
    spec: &TableSpec,
    source: &CsvSource,
    loader: &Loader,
) -> Result<LoadReport, LoadError> {
    match loader {
        Loader::BulkCopy(command) => bulk_copy(db, spec, source, command),
        Loader::RowInsert => {
            let rows = source.records().map_err(|err| LoadError::Source {
                path: source.path.clone(),
                source: err,
            })?;
            Ok(insert_rows(db, spec, rows))
        }
    }
}

/// Inserts rows one at a time. Empty fields are stored as NULL.
pub fn insert_rows<I>(db: &mut Database, spec: &TableSpec, rows: I) -> LoadReport
where
    I: IntoIterator<Item = Result<Vec<String>>>,
{
    let build = spec.build_table();
    let columns = spec
        .columns
        .iter()
        .map(|c| c.name.clone())
        .collect::<Vec<_>>();
    let dialect = db.dialect();
    let mut report = LoadReport::default();

    for (row_idx, row) in rows.into_iter().enumerate() {
        // Line 1 is the header.
        let line = row_idx + 2;
        report.attempted += 1;
        let values = match row {
            Ok(values) => values,
            Err(err) => {
                warn!("{build}: skipping unreadable row at line {line}: {err:#}");
                report.failed += 1;
                continue;
            }
        };
        if values.len() != columns.len() {
            warn!(
                "{build}: skipping row at line {line}: expected {} field(s), found {}",
                columns.len(),
                values.len()
            );
            report.failed += 1;
            continue;
        }
        let bound = values
            .iter()
            .map(|v| (!v.is_empty()).then_some(v.as_str()))
            .collect::<Vec<_>>();
        let sql = dialect.insert_row(&build, &columns, &bound);
        let result = if dialect.supports_parameters() {
            db.execute_with(&sql, &bound)
        } else {
            db.execute(&sql)
        };
        match result {
            Ok(_) => report.loaded += 1,
            Err(err) => {
                warn!("{build}: insert failed at line {line}: {err}");
                report.failed += 1;
            }
        }
    }

    info!(
        "Loaded {} of {} row(s) into {build} ({} failed)",
        report.loaded, report.attempted, report.failed
    );
    report
}

pub fn write_load_script(path: &Path, directives: &[String]) -> io::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::File::create(path)?;
    for directive in directives {
        writeln!(file, "{directive}")?;
    }
    file.flush()
}

/// Runs the external loader on `script`; any non-zero exit is an error.
pub fn run_loader(command: &LoaderCommand, script: &Path) -> Result<(), LoadError> {
    info!("Running `{}` on {:?}", command.program, script);
    let status = Command::new(&command.program)
        .args(command.arguments(script))
        .status()
        .map_err(|source| LoadError::LoaderSpawn {
            program: command.program.clone(),
            source,
        })?;
    if !status.success() {
        return Err(LoadError::LoaderFailed {
            program: command.program.clone(),
            status,
            script: script.to_path_buf(),
        });
    }
    Ok(())
}

pub fn bulk_copy(
    db: &mut Database,
    spec: &TableSpec,
    source: &CsvSource,
    command: &LoaderCommand,
) -> Result<LoadReport, LoadError> {
    let build = spec.build_table();
    let columns = spec
        .columns
        .iter()
        .map(|c| c.name.clone())
        .collect::<Vec<_>>();
    let dialect = db.dialect();
    let encoding =
        dialect
            .copy_encoding(source.encoding)
            .ok_or_else(|| LoadError::UnsupportedEncoding {
                encoding: source.encoding.name(),
                backend: dialect.name(),
            })?;
    let directive =
        dialect.copy_directive(&build, &columns, &source.path, source.delimiter, encoding);
    let script = command.script_dir.join(format!("{build}.sql"));
    write_load_script(&script, &[directive]).map_err(|source| LoadError::Script {
        path: script.clone(),
        source,
    })?;

    run_loader(command, &script)?;

    let loaded = db.record_count(&build).map_err(LoadError::Audit)?;
    info!("Bulk copy loaded {loaded} row(s) into {build}");
    Ok(LoadReport {
        attempted: loaded,
        loaded,
        failed: 0,
    })
}
