pub mod backend;
pub mod batch;
pub mod build;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod infer;
pub mod load;
pub mod narrow;
pub mod source;
pub mod sql;
pub mod swap;

use std::{
    env,
    fs::OpenOptions,
    io::{self, Write},
    path::Path,
    sync::OnceLock,
};

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use log::{LevelFilter, debug, info, warn};

use crate::{
    backend::{Database, postgres::PgSession},
    batch::{BatchOrchestrator, BatchReport, RefreshOptions},
    cli::{Cli, Commands, ProbeArgs, RefreshArgs},
    config::Config,
    infer::{resolve, sample_size},
};

/// Probe never keeps more values per column than the largest sampling band.
const PROBE_SAMPLE_CAP: u64 = 1000;

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging(log_file: Option<&Path>) -> Result<()> {
    let target = match log_file {
        Some(path) => Some(
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Opening log file {path:?}"))?,
        ),
        None => None,
    };
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("csv_refresh", LevelFilter::Info);
        }
        if let Some(file) = target {
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
    Ok(())
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Refresh(args) => handle_refresh(&args),
        Commands::Probe(args) => {
            init_logging(None)?;
            handle_probe(&args)
        }
    }
}

fn handle_refresh(args: &RefreshArgs) -> Result<()> {
    let mut config = Config::load(&args.config)
        .with_context(|| format!("Loading configuration from {:?}", args.config))?;
    config.apply_args(args);
    config
        .validate()
        .with_context(|| format!("Validating configuration from {:?}", args.config))?;
    init_logging(config.log_file.as_deref())?;

    let delimiter = config.delimiter_byte()?;
    let encoding = config.encoding()?;
    let file_names = config.file_names()?;
    let sources = source::discover(&config.input_dir, &file_names, delimiter, encoding)
        .with_context(|| format!("Discovering input files in {:?}", config.input_dir))?;
    if sources.is_empty() {
        warn!("No CSV files to process in {:?}", config.input_dir);
    }
    info!(
        "Refreshing {} table(s) into schema '{}' on {} using {:?}",
        sources.len(),
        config.schema,
        config.backend.dialect().name(),
        config.load.strategy
    );

    if let Some(history_dir) = &config.history_dir {
        let stamp = Local::now().format("%Y_%m_%d").to_string();
        source::backup_sources(&sources, history_dir, &stamp)
            .with_context(|| format!("Backing up input files to {history_dir:?}"))?;
    }

    let dialect = config.backend.dialect();
    let session =
        PgSession::connect(&config.connection_uri).context("Connecting to the warehouse")?;
    let mut db = Database::new(dialect, Box::new(session));
    let options = RefreshOptions {
        schema: config.schema.clone(),
        loader: config.loader(),
    };
    let report = BatchOrchestrator::new(&mut db, &options).run(&sources);
    finish_refresh(&mut db, &report, &mut io::stdout().lock())
}

/// Writes the batch report, then releases the session. A failed close is
/// only logged: the report is already out.
fn finish_refresh(db: &mut Database, report: &BatchReport, out: &mut impl Write) -> Result<()> {
    write!(out, "{}", report.render(db.dialect())).context("Writing the batch report")?;
    out.flush().context("Writing the batch report")?;
    if let Err(err) = db.close() {
        warn!("Closing the warehouse session: {err}");
    }
    Ok(())
}

fn handle_probe(args: &ProbeArgs) -> Result<()> {
    let delimiter = args.delimiter.unwrap_or(source::DEFAULT_DELIMITER);
    let encoding = source::resolve_encoding(args.input_encoding.as_deref())?;
    let file_names = if !args.files.is_empty() {
        args.files.clone()
    } else if let Some(list) = &args.files_list {
        source::read_file_list(list)?
    } else {
        Vec::new()
    };
    let sources = source::discover(&args.input_dir, &file_names, delimiter, encoding)
        .with_context(|| format!("Discovering input files in {:?}", args.input_dir))?;
    info!(
        "Probing {} file(s) in {:?} with delimiter '{}'",
        sources.len(),
        args.input_dir,
        printable_delimiter(delimiter)
    );

    let dialect = args.backend.dialect();
    let cap = args.sample_rows.unwrap_or(PROBE_SAMPLE_CAP).max(PROBE_SAMPLE_CAP);
    let mut writer = csv::Writer::from_writer(io::stdout().lock());
    writer.write_record(["TABLE", "COLUMN", "TYPE"])?;
    for source in &sources {
        let headers = source
            .headers()
            .with_context(|| format!("Reading header of {:?}", source.path))?;
        let (rows, mut samples) = source
            .sample_columns(cap as usize)
            .with_context(|| format!("Sampling {:?}", source.path))?;
        let limit = args.sample_rows.unwrap_or_else(|| sample_size(rows));
        debug!("{}: {rows} row(s), sampling {limit} value(s) per column", source.table_name);
        for (column, sample) in headers.iter().zip(samples.iter_mut()) {
            sample.truncate(limit as usize);
            let tag = resolve(sample);
            writer.write_record([
                source.table_name.as_str(),
                column.as_str(),
                dialect.type_name(tag),
            ])?;
        }
    }
    writer.flush()?;
    Ok(())
}

fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b'\t' => "\\t".to_string(),
        other => (other as char).to_string(),
    }
}
