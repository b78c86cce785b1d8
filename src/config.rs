//! Run configuration.
//!
//! Loaded from a JSON (`.json`) or YAML (`.yml`/`.yaml`) file, then adjusted by
//! the `CSV_REFRESH_CONNECTION_URI` environment variable and command-line
//! flags, in that order.

use std::{
    env,
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow, bail, ensure};
use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};

use crate::{
    backend::BackendKind,
    cli::{RefreshArgs, parse_delimiter},
    load::{LoadStrategy, Loader, LoaderCommand},
    source,
};

pub const CONNECTION_URI_ENV: &str = "CSV_REFRESH_CONNECTION_URI";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigFormat {
    Json,
    Yaml,
}

impl ConfigFormat {
    fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());
        match extension.as_deref() {
            Some("json") => Ok(ConfigFormat::Json),
            Some("yml" | "yaml") => Ok(ConfigFormat::Yaml),
            _ => bail!("Unsupported configuration format for {path:?} (expected .json, .yml or .yaml)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoadConfig {
    #[serde(default)]
    pub strategy: LoadStrategy,
    /// External bulk-load executable; the backend's client when unset.
    #[serde(default)]
    pub program: Option<String>,
    #[serde(default)]
    pub args: Option<Vec<String>>,
    #[serde(default = "default_script_dir")]
    pub script_dir: PathBuf,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            strategy: LoadStrategy::default(),
            program: None,
            args: None,
            script_dir: default_script_dir(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub connection_uri: String,
    #[serde(default)]
    pub backend: BackendKind,
    #[serde(default = "default_schema")]
    pub schema: String,
    #[serde(default = "default_input_dir")]
    pub input_dir: PathBuf,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub files_list: Option<PathBuf>,
    #[serde(default)]
    pub history_dir: Option<PathBuf>,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
    #[serde(default)]
    pub input_encoding: Option<String>,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default)]
    pub load: LoadConfig,
}

fn default_schema() -> String {
    "public".to_string()
}

fn default_input_dir() -> PathBuf {
    PathBuf::from("./input")
}

fn default_delimiter() -> String {
    ",".to_string()
}

fn default_script_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Config {
    /// Reads and parses `path`, then applies the environment override.
    pub fn load(path: &Path) -> Result<Self> {
        let format = ConfigFormat::from_path(path)?;
        let file =
            File::open(path).with_context(|| format!("Opening configuration file {path:?}"))?;
        let reader = BufReader::new(file);
        let mut config: Config = match format {
            ConfigFormat::Json => {
                serde_json::from_reader(reader).context("Parsing configuration JSON")?
            }
            ConfigFormat::Yaml => {
                serde_yaml::from_reader(reader).context("Parsing configuration YAML")?
            }
        };
        config.apply_env_with(|key| env::var(key).ok());
        Ok(config)
    }

    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(uri) = lookup(CONNECTION_URI_ENV)
            && !uri.trim().is_empty()
        {
            self.connection_uri = uri;
        }
    }

    pub fn apply_args(&mut self, args: &RefreshArgs) {
        if let Some(schema) = &args.schema {
            self.schema = schema.clone();
        }
        if let Some(dir) = &args.input_dir {
            self.input_dir = dir.clone();
        }
        if let Some(backend) = args.backend {
            self.backend = backend;
        }
        if let Some(strategy) = args.strategy {
            self.load.strategy = strategy;
        }
        if !args.files.is_empty() {
            self.files = args.files.clone();
        }
        if let Some(list) = &args.files_list {
            self.files_list = Some(list.clone());
        }
        if let Some(dir) = &args.history_dir {
            self.history_dir = Some(dir.clone());
        }
        if args.no_backup {
            self.history_dir = None;
        }
        if let Some(path) = &args.log_file {
            self.log_file = Some(path.clone());
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.connection_uri.trim().is_empty(),
            "Configuration is missing 'connection_uri' (or set {CONNECTION_URI_ENV})"
        );
        ensure!(
            !self.schema.trim().is_empty(),
            "Configuration 'schema' cannot be empty"
        );
        self.delimiter_byte()?;
        let encoding = self.encoding()?;
        if self.load.strategy == LoadStrategy::BulkCopy {
            let dialect = self.backend.dialect();
            ensure!(
                dialect.copy_encoding(encoding).is_some(),
                "{} bulk copy cannot read {} input; convert the files or use the row-insert strategy",
                dialect.name(),
                encoding.name()
            );
        }
        if let Some(program) = &self.load.program {
            ensure!(
                !program.trim().is_empty(),
                "Configuration 'load.program' cannot be empty"
            );
        }
        Ok(())
    }

    pub fn delimiter_byte(&self) -> Result<u8> {
        parse_delimiter(&self.delimiter)
            .map_err(|err| anyhow!("Invalid delimiter '{}': {err}", self.delimiter))
    }

    pub fn encoding(&self) -> Result<&'static Encoding> {
        source::resolve_encoding(self.input_encoding.as_deref())
    }

    /// Explicit files first, then the file list; empty means scan the input
    /// directory.
    pub fn file_names(&self) -> Result<Vec<String>> {
        if !self.files.is_empty() {
            return Ok(self.files.clone());
        }
        match &self.files_list {
            Some(list) => source::read_file_list(list),
            None => Ok(Vec::new()),
        }
    }

    pub fn loader(&self) -> Loader {
        match self.load.strategy {
            LoadStrategy::RowInsert => Loader::RowInsert,
            LoadStrategy::BulkCopy => {
                let (default_program, default_args) = self.backend.dialect().default_loader();
                let (program, args) = match &self.load.program {
                    Some(program) => (program.clone(), self.load.args.clone().unwrap_or_default()),
                    None => (
                        default_program.to_string(),
                        self.load.args.clone().unwrap_or_else(|| {
                            default_args.iter().map(|arg| arg.to_string()).collect()
                        }),
                    ),
                };
                Loader::BulkCopy(LoaderCommand {
                    program,
                    args,
                    script_dir: self.load.script_dir.clone(),
                    connection_uri: self.connection_uri.clone(),
                })
            }
        }
    }
}
