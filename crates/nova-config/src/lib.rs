use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::io;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Once};

use thiserror::Error;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;

mod diagnostics;
mod schema;
mod validation;

pub use diagnostics::{
    ConfigDiagnostics, ConfigValidationError, ConfigWarning, ValidationDiagnostics,
};
pub use schema::json_schema;

/// Default number of shards for persistent index storage.
pub const DEFAULT_SHARD_COUNT: u32 = 16;

/// Upper bound on `index.shard_count`; larger values are rejected by validation.
pub const MAX_SHARD_COUNT: u32 = 4096;

/// A byte size which supports both raw byte counts and human-friendly suffixes.
///
/// This is used for config values where TOML integer literals would be unwieldy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
#[schemars(transparent)]
pub struct ByteSize(pub u64);

impl Serialize for ByteSize {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u64(self.0)
    }
}

impl<'de> Deserialize<'de> for ByteSize {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Bytes(u64),
            Human(String),
        }

        let repr = Repr::deserialize(deserializer)?;
        match repr {
            Repr::Bytes(value) => Ok(ByteSize(value)),
            Repr::Human(value) => nova_memory::parse_byte_size(&value)
                .map(ByteSize)
                .map_err(serde::de::Error::custom),
        }
    }
}

/// On-disk compression applied to persisted index shards.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CompressionSetting {
    #[default]
    None,
    Zstd,
}

/// How strictly index values are checked for serialization round-trip consistency.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ValueValidationSetting {
    Off,
    Log,
    Strict,
}

/// Settings for persistent map-reduce indexes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[schemars(deny_unknown_fields)]
pub struct IndexConfig {
    /// Directory under which every index gets its own subdirectory.
    ///
    /// When unset, callers pick a location (typically a cache directory).
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub root: Option<PathBuf>,

    /// Number of shards used for inverted-index and forward-index files.
    #[serde(default = "IndexConfig::default_shard_count")]
    #[schemars(range(min = 1, max = 4096))]
    pub shard_count: u32,

    /// Compression applied to shard payloads.
    #[serde(default)]
    pub compression: CompressionSetting,

    /// Value round-trip checking. Defaults to `strict` in debug builds and `log`
    /// otherwise.
    #[serde(default)]
    pub value_validation: Option<ValueValidationSetting>,
}

impl IndexConfig {
    fn default_shard_count() -> u32 {
        DEFAULT_SHARD_COUNT
    }

    /// The configured validation level, or the build-dependent default.
    pub fn effective_value_validation(&self) -> ValueValidationSetting {
        self.value_validation.unwrap_or(if cfg!(debug_assertions) {
            ValueValidationSetting::Strict
        } else {
            ValueValidationSetting::Log
        })
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            root: None,
            shard_count: Self::default_shard_count(),
            compression: CompressionSetting::default(),
            value_validation: None,
        }
    }
}

/// Optional configuration for in-process memory budgets (`nova-memory`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default, JsonSchema)]
#[schemars(deny_unknown_fields)]
pub struct MemoryConfig {
    /// Override the total memory budget (in bytes).
    #[serde(default)]
    pub total_bytes: Option<ByteSize>,

    /// Override the inverted-index category budget (in bytes).
    #[serde(default)]
    pub inverted_index_bytes: Option<ByteSize>,

    /// Override the forward-index category budget (in bytes).
    #[serde(default)]
    pub forward_index_bytes: Option<ByteSize>,

    /// Override the "other" category budget (in bytes).
    #[serde(default)]
    pub other_bytes: Option<ByteSize>,

    /// Usage/budget ratio at which pressure becomes `medium` (default 0.70).
    #[serde(default)]
    pub pressure_medium: Option<f64>,

    /// Usage/budget ratio at which pressure becomes `high` (default 0.85).
    /// Index shards are flushed before eviction from this level on.
    #[serde(default)]
    pub pressure_high: Option<f64>,

    /// Usage/budget ratio at which pressure becomes `critical` (default 0.95).
    #[serde(default)]
    pub pressure_critical: Option<f64>,
}

impl MemoryConfig {
    pub fn memory_budget_overrides(&self) -> nova_memory::MemoryBudgetOverrides {
        nova_memory::MemoryBudgetOverrides {
            total: self.total_bytes.map(|value| value.0),
            categories: nova_memory::MemoryBreakdownOverrides {
                inverted_index: self.inverted_index_bytes.map(|value| value.0),
                forward_index: self.forward_index_bytes.map(|value| value.0),
                other: self.other_bytes.map(|value| value.0),
            },
        }
    }

    /// The effective budget: defaults with the configured overrides applied.
    pub fn budget(&self) -> nova_memory::MemoryBudget {
        nova_memory::MemoryBudget::default().apply_overrides(self.memory_budget_overrides())
    }

    pub fn pressure_thresholds(&self) -> nova_memory::MemoryPressureThresholds {
        nova_memory::MemoryPressureThresholds::default().apply_overrides(
            nova_memory::MemoryPressureOverrides {
                medium: self.pressure_medium,
                high: self.pressure_high,
                critical: self.pressure_critical,
            },
        )
    }

    /// A manager using the configured budget and thresholds.
    pub fn memory_manager(&self) -> nova_memory::MemoryManager {
        nova_memory::MemoryManager::with_thresholds(self.budget(), self.pressure_thresholds())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[schemars(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Logging level for all Nova crates.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Emit logs in JSON format.
    #[serde(default)]
    pub json: bool,

    /// Mirror logs to stderr.
    #[serde(default = "LoggingConfig::default_stderr")]
    pub stderr: bool,

    /// Append logs to the given file path.
    ///
    /// If the file cannot be opened, file logging is disabled while other sinks
    /// remain active.
    #[serde(default)]
    #[schemars(with = "Option<String>")]
    pub file: Option<PathBuf>,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_owned()
    }

    fn default_stderr() -> bool {
        true
    }

    pub(crate) fn normalize_level_directives(input: &str) -> String {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Self::default_level();
        }

        match trimmed.to_ascii_lowercase().as_str() {
            // Simple levels should be forgiving about casing and synonyms.
            "trace" => "trace".to_owned(),
            "debug" => "debug".to_owned(),
            "info" => "info".to_owned(),
            "warn" | "warning" => "warn".to_owned(),
            "error" => "error".to_owned(),
            // Anything else is treated as an `EnvFilter` directive string.
            _ => trimmed.to_owned(),
        }
    }

    fn config_env_filter(&self) -> tracing_subscriber::EnvFilter {
        let directives = Self::normalize_level_directives(&self.level);
        tracing_subscriber::EnvFilter::try_new(directives).unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::default()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
        })
    }

    /// Create the effective `EnvFilter` for Nova tracing.
    ///
    /// `LoggingConfig.level` may be either a simple level (`info`, `debug`, ...)
    /// or a full `tracing_subscriber::EnvFilter` directive string.
    ///
    /// If `RUST_LOG` is set, it is merged into the resulting filter.
    pub fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        let env_directives = std::env::var("RUST_LOG")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty());

        let config_directives = Self::normalize_level_directives(&self.level);

        match env_directives {
            Some(env_directives) => {
                let combined = format!("{config_directives},{env_directives}");
                tracing_subscriber::EnvFilter::try_new(combined)
                    .or_else(|_| tracing_subscriber::EnvFilter::try_new(env_directives))
                    .unwrap_or_else(|_| self.config_env_filter())
            }
            None => self.config_env_filter(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
            stderr: Self::default_stderr(),
            file: None,
        }
    }
}

/// Top-level configuration for the index engine, loaded from TOML.
///
/// ```toml
/// [index]
/// root = "/var/cache/nova/indexes"
/// shard_count = 16
/// compression = "zstd"     # "none" | "zstd"
/// value_validation = "log" # "off" | "log" | "strict"
///
/// [memory]
/// total_bytes = "512MB"
///
/// [logging]
/// level = "info"
/// json = false
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[schemars(deny_unknown_fields)]
pub struct NovaIndexConfig {
    /// Persistent index settings.
    #[serde(default)]
    pub index: IndexConfig,

    /// Optional memory budgeting configuration (`nova-memory`).
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Global logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // Keep the message and location only; the default `Display` embeds a
        // source snippet.
        let message = err.message().trim().to_owned();
        match err.span() {
            Some(span) => ConfigError::Toml(format!("{message} (at byte {})", span.start)),
            None => ConfigError::Toml(message),
        }
    }
}

impl NovaIndexConfig {
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = read_config(path.as_ref())?;
        Ok(toml::from_str(&text)?)
    }

    /// Load a config file from TOML and return diagnostics (unknown keys and
    /// semantic validation failures).
    pub fn load_from_path_with_diagnostics(
        path: impl AsRef<Path>,
    ) -> Result<(Self, ConfigDiagnostics), ConfigError> {
        let text = read_config(path.as_ref())?;
        Self::load_from_str_with_diagnostics(&text)
    }

    /// Load a config from a TOML string and return diagnostics.
    pub fn load_from_str_with_diagnostics(
        text: &str,
    ) -> Result<(Self, ConfigDiagnostics), ConfigError> {
        let (config, unknown_keys) =
            diagnostics::deserialize_toml_with_unknown_keys::<NovaIndexConfig>(text)?;

        let mut diagnostics = ConfigDiagnostics {
            unknown_keys,
            ..ConfigDiagnostics::default()
        };
        diagnostics.extend_validation(config.validate());

        Ok((config, diagnostics))
    }
}

fn read_config(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })
}

struct MutexFileMakeWriter {
    file: Arc<Mutex<std::fs::File>>,
}

impl<'a> MakeWriter<'a> for MutexFileMakeWriter {
    type Writer = MutexFileWriter<'a>;

    fn make_writer(&'a self) -> Self::Writer {
        let guard = match self.file.lock() {
            Ok(guard) => guard,
            Err(err) => err.into_inner(),
        };
        MutexFileWriter { guard }
    }
}

struct MutexFileWriter<'a> {
    guard: std::sync::MutexGuard<'a, std::fs::File>,
}

impl Write for MutexFileWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.guard.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.guard.flush()
    }
}

static TRACING_INIT: Once = Once::new();

/// Initializes structured `tracing` logging.
///
/// This function is safe to call multiple times; only the first call installs a
/// global subscriber.
pub fn init_tracing(logging: &LoggingConfig) {
    TRACING_INIT.call_once(|| {
        let filter = logging.env_filter();

        let file = logging.file.as_ref().and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });
        let file_open_failed = logging.file.is_some() && file.is_none();

        let mut make_writer = BoxMakeWriter::new(io::sink);
        if logging.stderr {
            // `cargo test` output capture only works for the stdlib's `print!/eprint!`
            // macros. Using `TestWriter` in debug builds keeps unit tests quiet.
            if cfg!(debug_assertions) {
                make_writer = BoxMakeWriter::new(
                    make_writer.and(tracing_subscriber::fmt::writer::TestWriter::with_stderr),
                );
            } else {
                make_writer = BoxMakeWriter::new(make_writer.and(io::stderr));
            }
        }
        if let Some(file) = file {
            let file = Arc::new(Mutex::new(file));
            make_writer = BoxMakeWriter::new(make_writer.and(MutexFileMakeWriter { file }));
        }

        let layer: Box<dyn tracing_subscriber::Layer<_> + Send + Sync> = if logging.json {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(make_writer)
                .with_ansi(false)
                .boxed()
        } else {
            tracing_subscriber::fmt::layer()
                .with_writer(make_writer)
                .with_ansi(false)
                .boxed()
        };

        let subscriber = tracing_subscriber::registry().with(filter).with(layer);
        if tracing::subscriber::set_global_default(subscriber).is_ok() && file_open_failed {
            if let Some(path) = logging.file.as_ref() {
                tracing::warn!(
                    target = "nova.config",
                    path = %path.display(),
                    "failed to open log file; file logging disabled"
                );
            }
        }
    });
}
