use log::{info, warn};

use crate::{backend::Database, catalog::TableRef, error::SwapError};

/// Promotes `<table>_build` to `<table>`, dropping any prior production table.
///
/// Returns whether a production table was replaced. On backends with
/// transactional DDL both statements commit together; elsewhere the table is
/// briefly absent between the drop and the rename.
pub fn swap(db: &mut Database, table: &TableRef) -> Result<bool, SwapError> {
    let build = table.build();
    if !db.table_exists(&build)? {
        return Err(SwapError::MissingBuild(build));
    }
    let replaced = db.table_exists(table)?;

    let mut statements = Vec::with_capacity(2);
    if replaced {
        statements.push(db.dialect().drop_table(table));
    }
    statements.push(db.dialect().rename_table(&build, &table.name));

    if db.dialect().transactional_ddl() {
        db.execute("BEGIN")?;
        for sql in &statements {
            if let Err(err) = db.execute(sql) {
                if let Err(rollback) = db.execute("ROLLBACK") {
                    warn!("Rolling back swap of {table} failed: {rollback}");
                }
                return Err(err.into());
            }
        }
        db.execute("COMMIT")?;
    } else {
        for sql in &statements {
            db.execute(sql)?;
        }
    }

    if replaced {
        info!("Replaced {table} with {build}");
    } else {
        info!("Promoted {build} to new table {table}");
    }
    Ok(replaced)
}

/// Row count of a table, logged as the run's audit record.
pub fn audit_record_count(db: &mut Database, table: &TableRef) -> Result<u64, SwapError> {
    let count = db.record_count(table)?;
    info!("Record count of table {table} is {count}");
    Ok(count)
}
