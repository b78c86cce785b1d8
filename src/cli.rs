use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

use crate::{backend::BackendKind, load::LoadStrategy};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Refresh warehouse tables from CSV extracts with inferred column types",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Load each CSV into a build table, narrow its column types and swap it into production
    Refresh(RefreshArgs),
    /// Infer column types from CSV files without touching a database
    Probe(ProbeArgs),
}

#[derive(Debug, Args)]
pub struct RefreshArgs {
    /// Configuration file (.json, .yml or .yaml)
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,
    /// Target schema (overrides the configuration)
    #[arg(long)]
    pub schema: Option<String>,
    /// Directory holding the CSV extracts
    #[arg(long = "input-dir")]
    pub input_dir: Option<PathBuf>,
    /// Database backend dialect
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,
    /// How rows reach the build table
    #[arg(long, value_enum)]
    pub strategy: Option<LoadStrategy>,
    /// CSV file name under the input directory (repeatable)
    #[arg(long = "file", action = ArgAction::Append)]
    pub files: Vec<String>,
    /// Newline-separated list of CSV file names to process
    #[arg(long = "files-list")]
    pub files_list: Option<PathBuf>,
    /// Root folder for dated backups of the input files
    #[arg(long = "history-dir")]
    pub history_dir: Option<PathBuf>,
    /// Skip the input backup even when a history directory is configured
    #[arg(long = "no-backup")]
    pub no_backup: bool,
    /// Append log output to this file instead of stderr
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct ProbeArgs {
    /// Directory holding the CSV extracts
    #[arg(short = 'i', long = "input-dir", default_value = "./input")]
    pub input_dir: PathBuf,
    /// CSV file name under the input directory (repeatable)
    #[arg(long = "file", action = ArgAction::Append)]
    pub files: Vec<String>,
    /// Newline-separated list of CSV file names to process
    #[arg(long = "files-list")]
    pub files_list: Option<PathBuf>,
    /// Dialect whose type names are reported
    #[arg(long, value_enum, default_value_t = BackendKind::Postgres)]
    pub backend: BackendKind,
    /// CSV delimiter character (supports ',', 'tab', ';', '|')
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input files (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// Values sampled per column (defaults to the row-count based policy)
    #[arg(long = "sample-rows")]
    pub sample_rows: Option<u64>,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" | "\\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() || first == '"' || first == '\n' {
                return Err(format!("Delimiter '{}' is not allowed", first.escape_default()));
            }
            Ok(first as u8)
        }
    }
}
