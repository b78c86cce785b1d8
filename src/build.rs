use log::{info, warn};

use crate::{
    backend::Database,
    catalog::{TableRef, TableSpec},
    error::BuildError,
    source::CsvSource,
};

/// Recreates `<table>_build` from the source header, every column text.
///
/// A failed drop is only logged; the create that follows decides. A failed
/// create is fatal for this table.
pub fn create_build_table(
    db: &mut Database,
    table: &TableRef,
    columns: &[String],
) -> Result<TableSpec, BuildError> {
    let build = table.build();
    let drop_sql = db.dialect().drop_table(&build);
    if let Err(err) = db.execute(&drop_sql) {
        warn!("Dropping {build} before rebuild failed: {err}");
    }

    let create_sql = db.dialect().create_table(&build, columns);
    db.execute(&create_sql)
        .map_err(|source| BuildError::Create {
            table: build.clone(),
            source,
        })?;
    info!("Created build table {build} with {} column(s)", columns.len());
    Ok(TableSpec::all_text(table.clone(), columns))
}

/// Reads the header of `source` and creates its build table.
pub fn build_from_source(
    db: &mut Database,
    schema: &str,
    source: &CsvSource,
) -> Result<TableSpec, BuildError> {
    let columns = source.headers().map_err(|err| BuildError::Header {
        path: source.path.clone(),
        source: err,
    })?;
    if columns.iter().all(|c| c.is_empty()) {
        return Err(BuildError::EmptyHeader {
            path: source.path.clone(),
        });
    }
    let table = TableRef::new(schema, &source.table_name);
    create_build_table(db, &table, &columns)
}
