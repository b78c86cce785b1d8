//! Batch orchestration across tables.
//!
//! Each table runs build → load → narrow → swap → audit in order. A failing
//! step ends that table's run, is recorded in its [`TableOutcome`], and the
//! loop moves on: one table can never halt the batch, and a table that fails
//! before the swap leaves its previous production version untouched.

use std::fmt::Write as _;

use itertools::Itertools;
use log::{error, info, warn};

use crate::{
    backend::{Database, Dialect},
    build,
    catalog::{TableRef, TableSpec},
    error::{Step, TableError},
    load::{self, LoadReport, Loader},
    narrow::{self, NarrowReport},
    source::CsvSource,
    swap,
};

#[derive(Debug, Clone)]
pub struct RefreshOptions {
    pub schema: String,
    pub loader: Loader,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableStatus {
    Refreshed { replaced: bool },
    Failed { step: Step, error: String },
}

#[derive(Debug, Clone)]
pub struct TableOutcome {
    pub table: TableRef,
    pub status: TableStatus,
    pub load: Option<LoadReport>,
    pub narrow: Option<NarrowReport>,
    pub spec: Option<TableSpec>,
    pub record_count: Option<u64>,
}

impl TableOutcome {
    fn new(table: TableRef) -> Self {
        Self {
            table,
            status: TableStatus::Refreshed { replaced: false },
            load: None,
            narrow: None,
            spec: None,
            record_count: None,
        }
    }

    pub fn is_refreshed(&self) -> bool {
        matches!(self.status, TableStatus::Refreshed { .. })
    }

    pub fn failed_step(&self) -> Option<Step> {
        match &self.status {
            TableStatus::Failed { step, .. } => Some(*step),
            TableStatus::Refreshed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub outcomes: Vec<TableOutcome>,
}

impl BatchReport {
    pub fn refreshed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_refreshed()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.refreshed()
    }

    pub fn outcome(&self, table_name: &str) -> Option<&TableOutcome> {
        self.outcomes.iter().find(|o| o.table.name == table_name)
    }

    /// Aligned text table with one line per table.
    pub fn render(&self, dialect: &dyn Dialect) -> String {
        let headers = ["table", "status", "rows", "failed", "count", "columns"];
        let rows = self
            .outcomes
            .iter()
            .map(|outcome| {
                let status = match &outcome.status {
                    TableStatus::Refreshed { replaced: true } => "replaced".to_string(),
                    TableStatus::Refreshed { replaced: false } => "created".to_string(),
                    TableStatus::Failed { step, .. } => format!("failed ({step})"),
                };
                let (loaded, failed) = outcome
                    .load
                    .map(|l| (l.loaded.to_string(), l.failed.to_string()))
                    .unwrap_or_default();
                let count = outcome
                    .record_count
                    .map(|c| c.to_string())
                    .unwrap_or_default();
                let columns = outcome
                    .spec
                    .as_ref()
                    .map(|spec| {
                        spec.columns
                            .iter()
                            .map(|c| format!("{}={}", c.name, dialect.type_name(c.column_type)))
                            .join(", ")
                    })
                    .unwrap_or_default();
                vec![
                    outcome.table.to_string(),
                    status,
                    loaded,
                    failed,
                    count,
                    columns,
                ]
            })
            .collect::<Vec<_>>();
        render_rows(&headers, &rows)
    }
}

fn format_line<'s>(cells: impl Iterator<Item = &'s str>, widths: &[usize]) -> String {
    let line = cells
        .zip(widths)
        .map(|(cell, width)| format!("{cell:<width$}"))
        .join("  ");
    line.trim_end().to_string()
}

fn render_rows(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths = headers.iter().map(|h| h.chars().count()).collect::<Vec<_>>();
    for row in rows {
        for (idx, cell) in row.iter().enumerate().take(widths.len()) {
            widths[idx] = widths[idx].max(cell.chars().count());
        }
    }

    let mut output = String::new();
    let _ = writeln!(output, "{}", format_line(headers.iter().copied(), &widths));
    let separator = widths.iter().map(|w| "-".repeat((*w).max(3))).join("  ");
    let _ = writeln!(output, "{separator}");
    for row in rows {
        let _ = writeln!(output, "{}", format_line(row.iter().map(String::as_str), &widths));
    }
    output
}

pub struct BatchOrchestrator<'a> {
    db: &'a mut Database,
    options: &'a RefreshOptions,
}

impl<'a> BatchOrchestrator<'a> {
    pub fn new(db: &'a mut Database, options: &'a RefreshOptions) -> Self {
        Self { db, options }
    }

    /// Refreshes every source in order. Never fails: per-table errors are
    /// logged and recorded in the report.
    pub fn run(&mut self, sources: &[CsvSource]) -> BatchReport {
        let mut report = BatchReport::default();
        for source in sources {
            let table = TableRef::new(&self.options.schema, &source.table_name);
            info!("Refreshing {table} from {:?}", source.path);
            let mut outcome = TableOutcome::new(table.clone());
            if let Err(err) = self.refresh_table(source, &mut outcome) {
                error!("{err:#}");
                outcome.status = TableStatus::Failed {
                    step: err.step,
                    error: format!("{:#}", err.source),
                };
            }
            report.outcomes.push(outcome);
        }
        info!(
            "Batch finished: {} table(s) refreshed, {} failed",
            report.refreshed(),
            report.failed()
        );
        report
    }

    fn refresh_table(
        &mut self,
        source: &CsvSource,
        outcome: &mut TableOutcome,
    ) -> Result<(), TableError> {
        let table = outcome.table.clone();

        let mut spec = build::build_from_source(self.db, &self.options.schema, source)
            .map_err(|err| TableError::new(&table, Step::Build, err))?;
        outcome.spec = Some(spec.clone());

        let loaded = load::load(self.db, &spec, source, &self.options.loader)
            .map_err(|err| TableError::new(&table, Step::Load, err))?;
        outcome.load = Some(loaded);
        if loaded.attempted > 0 && loaded.loaded == 0 {
            return Err(TableError::new(
                &table,
                Step::Load,
                anyhow::anyhow!("none of {} row(s) could be loaded", loaded.attempted),
            ));
        }

        let narrowed = narrow::narrow(self.db, &mut spec)
            .map_err(|err| TableError::new(&table, Step::Narrow, err))?;
        if narrowed.failed_columns() > 0 {
            warn!(
                "{table}: {} column(s) left as text after failed narrowing",
                narrowed.failed_columns()
            );
        }
        outcome.narrow = Some(narrowed);
        outcome.spec = Some(spec);

        let replaced = swap::swap(self.db, &table)
            .map_err(|err| TableError::new(&table, Step::Swap, err))?;
        outcome.status = TableStatus::Refreshed { replaced };

        match swap::audit_record_count(self.db, &table) {
            Ok(count) => outcome.record_count = Some(count),
            Err(err) => warn!("{}", TableError::new(&table, Step::Audit, err)),
        }
        Ok(())
    }
}
