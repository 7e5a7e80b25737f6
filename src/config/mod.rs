pub mod edit;
pub mod lab;
pub mod lint;

pub use edit::{add_cache, add_output, add_processor, normalise};
pub use lab::{
    parse_config, parse_value, strip_jsonc_comments, validate_config, CacheConfig,
    CacheOperator, ConfigError, InputConfig, LabConfig, OutputConfig, PipelineConfig,
    ProcessorConfig, ResourcesConfig, OUTPUT_KINDS, PROCESSOR_KINDS,
};
pub use lint::lint_config;

use std::path::Path;
use thiserror::Error;

/// Errors for file I/O operations (separate from pure parsing errors)
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Config error: {0}")]
    ConfigError(#[from] ConfigError),
}

// ============================================================================
// SBIO: I/O wrapper - thin layer over pure functions
// ============================================================================

/// Read config text from disk, checking that it parses.
pub fn load_config_file(path: &Path) -> Result<(String, LabConfig), LoadError> {
    let content = std::fs::read_to_string(path)?;
    let config = parse_config(&content)?;
    Ok((content, config))
}
