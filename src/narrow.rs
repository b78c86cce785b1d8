//! Narrowing of build-table columns from sampled content.
//!
//! Every column is sampled (`IS NOT NULL`, bounded by [`sample_size`]),
//! resolved, and altered in place when the result is narrower than text. A
//! failing sample or ALTER leaves that column as text; only failures to read
//! the table's row count or column list fail the step.

use log::{info, warn};
use serde::Serialize;

use crate::{
    backend::{Database, Query},
    catalog::TableSpec,
    error::BackendError,
    infer::{ColumnSample, TypeTag, resolve, sample_size},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnOutcome {
    pub column: String,
    /// Type the sample resolved to.
    pub resolved: TypeTag,
    /// Type the column actually has after narrowing.
    pub applied: TypeTag,
    pub sampled: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NarrowReport {
    pub record_count: u64,
    pub sample_limit: u64,
    pub columns: Vec<ColumnOutcome>,
}

impl NarrowReport {
    pub fn failed_columns(&self) -> usize {
        self.columns.iter().filter(|c| c.error.is_some()).count()
    }
}

fn sample_column(
    db: &mut Database,
    spec: &TableSpec,
    column: &str,
    limit: u64,
) -> Result<ColumnSample, BackendError> {
    let sql = db.dialect().sample_column(&spec.build_table(), column, limit);
    let rows = db.fetch_rows(&Query::text(sql))?;
    let mut sample =
        ColumnSample::from_rows(rows.into_iter().map(|row| row.into_iter().next().flatten()));
    sample.truncate(limit as usize);
    Ok(sample)
}

/// Narrows every column of the build table, updating `spec` with the types
/// that were applied.
pub fn narrow(db: &mut Database, spec: &mut TableSpec) -> Result<NarrowReport, BackendError> {
    let build = spec.build_table();
    let record_count = db.record_count(&build)?;
    let sample_limit = sample_size(record_count);
    info!(
        "Narrowing {build}: {record_count} row(s), sampling up to {sample_limit} value(s) per column"
    );

    let mut columns = db.column_names(&build)?;
    if columns.is_empty() {
        columns = spec.columns.iter().map(|c| c.name.clone()).collect();
    }

    let mut report = NarrowReport {
        record_count,
        sample_limit,
        columns: Vec::with_capacity(columns.len()),
    };

    for column in columns {
        let sample = match sample_column(db, spec, &column, sample_limit) {
            Ok(sample) => sample,
            Err(err) => {
                warn!("{build}.{column}: sampling failed, keeping text: {err}");
                report.columns.push(ColumnOutcome {
                    column,
                    resolved: TypeTag::Text,
                    applied: TypeTag::Text,
                    sampled: 0,
                    error: Some(err.to_string()),
                });
                continue;
            }
        };
        let resolved = resolve(&sample);
        let mut outcome = ColumnOutcome {
            column: column.clone(),
            resolved,
            applied: TypeTag::Text,
            sampled: sample.len(),
            error: None,
        };

        if !resolved.is_text() {
            let sql = db.dialect().alter_column_type(&build, &column, resolved);
            match db.execute(&sql) {
                Ok(_) => {
                    outcome.applied = resolved;
                    spec.set_column_type(&column, resolved);
                }
                Err(err) => {
                    warn!("{build}.{column}: narrowing to {resolved} failed, keeping text: {err}");
                    outcome.error = Some(err.to_string());
                }
            }
        }
        info!(
            "{build}.{column}: {} sampled -> {}",
            outcome.sampled,
            db.dialect().type_name(outcome.applied)
        );
        report.columns.push(outcome);
    }

    Ok(report)
}
