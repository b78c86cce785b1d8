//! CSV data sources: discovery, header and row reading, and backup.
//!
//! A source is one delimited file with a header row under the input
//! directory. Its logical table name is the file name without `.csv`,
//! lower-cased.

use std::{
    fs::{self, File},
    io::{BufRead, BufReader, Read},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow, bail};
use encoding_rs::{Encoding, UTF_8};
use log::{debug, info, warn};

use crate::infer::ColumnSample;

pub const DEFAULT_DELIMITER: u8 = b',';

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

pub fn open_csv_reader<R>(reader: R, delimiter: u8) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(true)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(true);
    builder.from_reader(reader)
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        Err(anyhow!(
            "Failed to decode text with encoding {}",
            encoding.name()
        ))
    } else {
        Ok(text.into_owned())
    }
}

pub fn decode_record(record: &csv::ByteRecord, encoding: &'static Encoding) -> Result<Vec<String>> {
    record
        .iter()
        .map(|field| decode_bytes(field, encoding))
        .collect()
}

/// Logical table name for a CSV file name.
pub fn table_name_for(file_name: &str) -> String {
    let stem = file_name
        .strip_suffix(".csv")
        .or_else(|| file_name.strip_suffix(".CSV"))
        .unwrap_or(file_name);
    stem.to_lowercase()
}

#[derive(Debug, Clone)]
pub struct CsvSource {
    pub table_name: String,
    pub path: PathBuf,
    pub delimiter: u8,
    pub encoding: &'static Encoding,
}

impl CsvSource {
    pub fn new(path: impl Into<PathBuf>, delimiter: u8, encoding: &'static Encoding) -> Self {
        let path = path.into();
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            table_name: table_name_for(&file_name),
            path,
            delimiter,
            encoding,
        }
    }

    fn reader(&self) -> Result<csv::Reader<BufReader<File>>> {
        let file = File::open(&self.path)
            .with_context(|| format!("Opening input file {:?}", self.path))?;
        Ok(open_csv_reader(BufReader::new(file), self.delimiter))
    }

    /// Column names from the header row, trimmed.
    pub fn headers(&self) -> Result<Vec<String>> {
        let mut reader = self.reader()?;
        let headers = reader
            .byte_headers()
            .with_context(|| format!("Reading header of {:?}", self.path))?
            .clone();
        Ok(decode_record(&headers, self.encoding)?
            .into_iter()
            .map(|name| name.trim().to_string())
            .collect())
    }

    /// Lazily decoded data rows. Each item is either a row or the reason that
    /// row could not be read; iteration continues past bad rows.
    pub fn records(&self) -> Result<impl Iterator<Item = Result<Vec<String>>> + use<>> {
        let reader = self.reader()?;
        let encoding = self.encoding;
        Ok(reader.into_byte_records().map(move |record| {
            let record = record?;
            decode_record(&record, encoding)
        }))
    }

    /// Reads the whole file, keeping up to `cap` non-empty values per column.
    /// Returns the number of readable rows alongside the samples. Unreadable
    /// rows are logged and skipped.
    pub fn sample_columns(&self, cap: usize) -> Result<(u64, Vec<ColumnSample>)> {
        let width = self.headers()?.len();
        let mut samples = vec![ColumnSample::default(); width];
        let mut rows = 0u64;
        for (idx, record) in self.records()?.enumerate() {
            let values = match record {
                Ok(values) => values,
                Err(err) => {
                    warn!("{:?}: skipping unreadable row at line {}: {err:#}", self.path, idx + 2);
                    continue;
                }
            };
            rows += 1;
            for (sample, value) in samples.iter_mut().zip(&values) {
                let value = value.trim();
                if !value.is_empty() && sample.len() < cap {
                    sample.push(value);
                }
            }
        }
        Ok((rows, samples))
    }
}

/// Reads a newline-separated list of file names, skipping blanks and `#`
/// comments.
pub fn read_file_list(path: &Path) -> Result<Vec<String>> {
    let file = File::open(path).with_context(|| format!("Opening file list {path:?}"))?;
    let mut names = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.with_context(|| format!("Reading file list {path:?}"))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        names.push(trimmed.to_string());
    }
    Ok(names)
}

/// Every `*.csv` file directly under `dir`, sorted by name.
pub fn scan_directory(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Listing input directory {dir:?}"))? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.to_ascii_lowercase().ends_with(".csv") {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

/// Resolves file names against `input_dir`, checking each exists.
pub fn discover(
    input_dir: &Path,
    file_names: &[String],
    delimiter: u8,
    encoding: &'static Encoding,
) -> Result<Vec<CsvSource>> {
    if !input_dir.is_dir() {
        bail!("No such input directory: {input_dir:?}");
    }
    let names = if file_names.is_empty() {
        scan_directory(input_dir)?
    } else {
        file_names.to_vec()
    };
    let mut sources = Vec::with_capacity(names.len());
    for name in names {
        let path = input_dir.join(&name);
        if !path.is_file() {
            bail!("Input file {path:?} does not exist");
        }
        let source = CsvSource::new(path, delimiter, encoding);
        debug!("Discovered {:?} as table '{}'", source.path, source.table_name);
        sources.push(source);
    }
    Ok(sources)
}

/// Copies every source into `<history_dir>/upload_<stamp>/`.
pub fn backup_sources(sources: &[CsvSource], history_dir: &Path, stamp: &str) -> Result<PathBuf> {
    let target = history_dir.join(format!("upload_{stamp}"));
    fs::create_dir_all(&target).with_context(|| format!("Creating backup folder {target:?}"))?;
    for source in sources {
        let file_name = source
            .path
            .file_name()
            .ok_or_else(|| anyhow!("Source {:?} has no file name", source.path))?;
        let destination = target.join(file_name);
        fs::copy(&source.path, &destination)
            .with_context(|| format!("Backing up {:?} to {destination:?}", source.path))?;
    }
    info!("Backed up {} file(s) to {:?}", sources.len(), target);
    Ok(target)
}
