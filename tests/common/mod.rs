#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::OnceLock;

use csv_refresh::backend::{BackendKind, Database, Row, Session};
use csv_refresh::error::BackendError;
use csv_refresh::infer::parse_datetime_literal;
use regex::Regex;
use tempfile::{TempDir, tempdir};

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace, creating parent
    /// folders, and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dirs");
        }
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }

    pub fn dir(&self, name: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        fs::create_dir_all(&path).expect("create dir");
        path
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryTable {
    pub columns: Vec<(String, String)>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl MemoryTable {
    fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|(column, _)| column == name)
    }
}

type TableKey = (String, String);

#[derive(Default)]
struct WarehouseState {
    tables: BTreeMap<TableKey, MemoryTable>,
    snapshot: Option<BTreeMap<TableKey, MemoryTable>>,
    failures: Vec<String>,
    statements: Vec<String>,
    closed: bool,
}

/// In-memory stand-in for a PostgreSQL warehouse.
///
/// Interprets the statements the postgres dialect emits. Cloned handles share
/// state, so a test can hand a session to the code under test and inspect the
/// tables afterwards.
#[derive(Clone, Default)]
pub struct MemoryWarehouse {
    state: Rc<RefCell<WarehouseState>>,
}

impl MemoryWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self) -> Box<dyn Session> {
        Box::new(MemorySession {
            state: Rc::clone(&self.state),
        })
    }

    pub fn database(&self) -> Database {
        Database::new(BackendKind::Postgres.dialect(), self.session())
    }

    /// Every later statement containing `needle`, or bound with a parameter
    /// equal to it, fails.
    pub fn fail_on(&self, needle: &str) {
        self.state.borrow_mut().failures.push(needle.to_string());
    }

    pub fn clear_failures(&self) {
        self.state.borrow_mut().failures.clear();
    }

    pub fn seed_table(&self, schema: &str, name: &str, columns: &[(&str, &str)], rows: &[&[&str]]) {
        let table = MemoryTable {
            columns: columns
                .iter()
                .map(|(column, ty)| (column.to_string(), ty.to_string()))
                .collect(),
            rows: rows
                .iter()
                .map(|row| row.iter().map(|v| Some(v.to_string())).collect())
                .collect(),
        };
        self.state
            .borrow_mut()
            .tables
            .insert((schema.to_string(), name.to_string()), table);
    }

    pub fn table(&self, schema: &str, name: &str) -> Option<MemoryTable> {
        self.state
            .borrow()
            .tables
            .get(&(schema.to_string(), name.to_string()))
            .cloned()
    }

    pub fn has_table(&self, schema: &str, name: &str) -> bool {
        self.table(schema, name).is_some()
    }

    pub fn table_names(&self, schema: &str) -> Vec<String> {
        self.state
            .borrow()
            .tables
            .keys()
            .filter(|(s, _)| s == schema)
            .map(|(_, name)| name.clone())
            .collect()
    }

    pub fn column_types(&self, schema: &str, name: &str) -> Vec<(String, String)> {
        self.table(schema, name)
            .map(|table| table.columns)
            .unwrap_or_default()
    }

    pub fn statements(&self) -> Vec<String> {
        self.state.borrow().statements.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }
}

struct MemorySession {
    state: Rc<RefCell<WarehouseState>>,
}

impl Session for MemorySession {
    fn execute(&mut self, sql: &str, params: &[Option<&str>]) -> Result<u64, BackendError> {
        let (affected, _) = self.state.borrow_mut().run(sql, params)?;
        Ok(affected)
    }

    fn query(&mut self, sql: &str, params: &[Option<&str>]) -> Result<Vec<Row>, BackendError> {
        let (_, rows) = self.state.borrow_mut().run(sql, params)?;
        Ok(rows)
    }

    fn close(self: Box<Self>) -> Result<(), BackendError> {
        self.state.borrow_mut().closed = true;
        Ok(())
    }
}

struct Patterns {
    drop: Regex,
    create: Regex,
    insert: Regex,
    count: Regex,
    sample: Regex,
    alter_type: Regex,
    rename: Regex,
}

/// A plain or double-quoted identifier.
const IDENT: &str = r#"("(?:[^"]|"")+"|[A-Za-z_][A-Za-z0-9_$]*)"#;

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let table = format!(r"{IDENT}\.{IDENT}");
        let compile = |pattern: String| Regex::new(&pattern).unwrap();
        Patterns {
            drop: compile(format!(r"^DROP TABLE IF EXISTS {table}(?: CASCADE)?$")),
            create: compile(format!(r"^CREATE TABLE {table} \((.*)\)$")),
            insert: compile(format!(r"^INSERT INTO {table} \((.*)\) VALUES \((.*)\)$")),
            count: compile(format!(r"^SELECT count\(\*\) FROM {table}$")),
            sample: compile(format!(
                r"^SELECT {IDENT} FROM {table} WHERE {IDENT} IS NOT NULL LIMIT (\d+)$"
            )),
            alter_type: compile(format!(
                r"^ALTER TABLE {table} ALTER COLUMN {IDENT} TYPE (\w+) USING "
            )),
            rename: compile(format!(r"^ALTER TABLE {table} RENAME TO {IDENT}$")),
        }
    })
}

/// Catalog form of an identifier: quoted names keep their case, plain names
/// fold to lower case.
fn ident(raw: &str) -> String {
    match raw.strip_prefix('"').and_then(|rest| rest.strip_suffix('"')) {
        Some(quoted) => quoted.replace("\"\"", "\""),
        None => raw.to_lowercase(),
    }
}

fn key(schema: &str, name: &str) -> TableKey {
    (ident(schema), ident(name))
}

/// Catalog lookups receive names already in catalog form.
fn catalog_key(schema: &str, name: &str) -> TableKey {
    (schema.to_string(), name.to_string())
}

fn casts_to(value: &str, ty: &str) -> bool {
    let value = value.trim();
    match ty {
        "text" | "varchar" => true,
        "smallint" => value.parse::<i16>().is_ok(),
        "integer" => value.parse::<i32>().is_ok(),
        "bigint" => value.parse::<i64>().is_ok(),
        "numeric" => value.parse::<f64>().is_ok(),
        "boolean" => ["t", "f", "true", "false", "yes", "no", "on", "off", "0", "1"]
            .iter()
            .any(|token| value.eq_ignore_ascii_case(token)),
        "date" | "timestamp" => parse_datetime_literal(value).is_some(),
        _ => false,
    }
}

impl WarehouseState {
    fn run(
        &mut self,
        sql: &str,
        params: &[Option<&str>],
    ) -> Result<(u64, Vec<Row>), BackendError> {
        if self.closed {
            return Err(BackendError::Connection("connection closed".to_string()));
        }
        self.statements.push(sql.to_string());
        let injected = self.failures.iter().any(|needle| {
            sql.contains(needle.as_str()) || params.iter().any(|p| *p == Some(needle.as_str()))
        });
        if injected {
            return Err(BackendError::statement(sql, "injected failure"));
        }

        let fail = |message: &str| Err(BackendError::statement(sql, message));
        let p = patterns();

        match sql {
            "BEGIN" => {
                self.snapshot = Some(self.tables.clone());
                return Ok((0, Vec::new()));
            }
            "COMMIT" => {
                self.snapshot = None;
                return Ok((0, Vec::new()));
            }
            "ROLLBACK" => {
                if let Some(snapshot) = self.snapshot.take() {
                    self.tables = snapshot;
                }
                return Ok((0, Vec::new()));
            }
            _ => {}
        }

        if sql.contains("information_schema.tables") {
            let schema = params.first().copied().flatten().unwrap_or_default();
            let name = params.get(1).copied().flatten().unwrap_or_default();
            let count = u64::from(self.tables.contains_key(&catalog_key(schema, name)));
            return Ok((1, vec![vec![Some(count.to_string())]]));
        }
        if sql.contains("information_schema.columns") {
            let schema = params.first().copied().flatten().unwrap_or_default();
            let name = params.get(1).copied().flatten().unwrap_or_default();
            let rows = self
                .tables
                .get(&catalog_key(schema, name))
                .map(|table| {
                    table
                        .columns
                        .iter()
                        .map(|(column, _)| vec![Some(column.clone())])
                        .collect()
                })
                .unwrap_or_default();
            return Ok((0, rows));
        }

        if let Some(caps) = p.drop.captures(sql) {
            let removed = self.tables.remove(&key(&caps[1], &caps[2]));
            return Ok((u64::from(removed.is_some()), Vec::new()));
        }
        if let Some(caps) = p.create.captures(sql) {
            let table_key = key(&caps[1], &caps[2]);
            if self.tables.contains_key(&table_key) {
                return fail("relation already exists");
            }
            let columns = caps[3]
                .split(", ")
                .map(|definition| {
                    let (name, ty) = definition.rsplit_once(' ').unwrap_or((definition, "text"));
                    (ident(name), ty.to_string())
                })
                .collect();
            self.tables.insert(
                table_key,
                MemoryTable {
                    columns,
                    rows: Vec::new(),
                },
            );
            return Ok((0, Vec::new()));
        }
        if let Some(caps) = p.insert.captures(sql) {
            let Some(table) = self.tables.get_mut(&key(&caps[1], &caps[2])) else {
                return fail("relation does not exist");
            };
            let columns = caps[3].split(", ").collect::<Vec<_>>();
            let placeholders = caps[4].split(", ").collect::<Vec<_>>();
            if columns.len() != placeholders.len() {
                return fail("INSERT has more target columns than expressions");
            }
            let mut row = vec![None; table.columns.len()];
            for (column, placeholder) in columns.iter().zip(&placeholders) {
                let Some(idx) = table.column_index(&ident(column)) else {
                    return fail("column does not exist");
                };
                let value = match placeholder.strip_prefix('$') {
                    Some(n) => {
                        let n = n.parse::<usize>().unwrap_or(0);
                        if n == 0 || n > params.len() {
                            return fail("bind message supplies too few parameters");
                        }
                        params[n - 1].map(str::to_string)
                    }
                    None if *placeholder == "NULL" => None,
                    None => Some(placeholder.trim_matches('\'').replace("''", "'")),
                };
                if let Some(value) = &value
                    && !casts_to(value, &table.columns[idx].1)
                {
                    return fail("invalid input syntax");
                }
                row[idx] = value;
            }
            table.rows.push(row);
            return Ok((1, Vec::new()));
        }
        if let Some(caps) = p.count.captures(sql) {
            let Some(table) = self.tables.get(&key(&caps[1], &caps[2])) else {
                return fail("relation does not exist");
            };
            return Ok((1, vec![vec![Some(table.rows.len().to_string())]]));
        }
        if let Some(caps) = p.sample.captures(sql) {
            let Some(table) = self.tables.get(&key(&caps[2], &caps[3])) else {
                return fail("relation does not exist");
            };
            let Some(idx) = table.column_index(&ident(&caps[1])) else {
                return fail("column does not exist");
            };
            let limit = caps[5].parse::<usize>().unwrap_or(0);
            let rows = table
                .rows
                .iter()
                .filter_map(|row| row[idx].clone())
                .take(limit)
                .map(|value| vec![Some(value)])
                .collect::<Vec<_>>();
            return Ok((rows.len() as u64, rows));
        }
        if let Some(caps) = p.alter_type.captures(sql) {
            let Some(table) = self.tables.get_mut(&key(&caps[1], &caps[2])) else {
                return fail("relation does not exist");
            };
            let Some(idx) = table.column_index(&ident(&caps[3])) else {
                return fail("column does not exist");
            };
            let ty = caps[4].to_string();
            let castable = table
                .rows
                .iter()
                .filter_map(|row| row[idx].as_deref())
                .all(|value| casts_to(value, &ty));
            if !castable {
                return fail("invalid input syntax for type");
            }
            table.columns[idx].1 = ty;
            return Ok((0, Vec::new()));
        }
        if let Some(caps) = p.rename.captures(sql) {
            let from = key(&caps[1], &caps[2]);
            let to = key(&caps[1], &caps[3]);
            if self.tables.contains_key(&to) {
                return fail("relation already exists");
            }
            let Some(table) = self.tables.remove(&from) else {
                return fail("relation does not exist");
            };
            self.tables.insert(to, table);
            return Ok((0, Vec::new()));
        }

        fail("statement not understood by the in-memory warehouse")
    }
}
