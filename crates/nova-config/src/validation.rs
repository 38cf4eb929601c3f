use crate::diagnostics::{ConfigValidationError, ConfigWarning, ValidationDiagnostics};
use crate::{LoggingConfig, NovaIndexConfig, MAX_SHARD_COUNT};

impl NovaIndexConfig {
    /// Validate semantic invariants for a configuration.
    ///
    /// Validation is best-effort: it attempts to report as many problems as possible in one pass.
    #[must_use]
    pub fn validate(&self) -> ValidationDiagnostics {
        let mut out = ValidationDiagnostics::default();

        validate_index(self, &mut out);
        validate_memory(self, &mut out);
        validate_logging(self, &mut out);

        out
    }
}

fn validate_index(config: &NovaIndexConfig, out: &mut ValidationDiagnostics) {
    let shard_count = config.index.shard_count;
    if shard_count == 0 || shard_count > MAX_SHARD_COUNT {
        out.errors.push(ConfigValidationError::InvalidValue {
            toml_path: "index.shard_count".to_string(),
            message: format!("must be between 1 and {MAX_SHARD_COUNT}"),
        });
    }

    if let Some(root) = config.index.root.as_ref() {
        if root.exists() && !root.is_dir() {
            out.warnings.push(ConfigWarning::IndexRootNotDirectory {
                toml_path: "index.root".to_string(),
                resolved: root.clone(),
            });
        }
    }
}

fn validate_memory(config: &NovaIndexConfig, out: &mut ValidationDiagnostics) {
    if matches!(config.memory.total_bytes, Some(total) if total.0 == 0) {
        out.warnings.push(ConfigWarning::InvalidValue {
            toml_path: "memory.total_bytes".to_string(),
            message: "a zero budget keeps every index under critical pressure".to_string(),
        });
    }

    if !config.memory.pressure_thresholds().is_ordered() {
        out.errors.push(ConfigValidationError::InvalidValue {
            toml_path: "memory.pressure_medium".to_string(),
            message: "pressure thresholds must satisfy 0 < medium <= high <= critical".to_string(),
        });
    }
}

fn validate_logging(config: &NovaIndexConfig, out: &mut ValidationDiagnostics) {
    let normalized = LoggingConfig::normalize_level_directives(&config.logging.level);
    if !config.logging.level.trim().is_empty()
        && tracing_subscriber::EnvFilter::try_new(normalized.clone()).is_err()
    {
        out.warnings.push(ConfigWarning::LoggingLevelInvalid {
            value: config.logging.level.clone(),
            normalized,
        });
    }
}
