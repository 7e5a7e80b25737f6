use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Processor types a config may name
pub const PROCESSOR_KINDS: &[&str] = &[
    "noop",
    "uppercase",
    "lowercase",
    "prefix",
    "split",
    "filter",
    "sleep",
    "cache",
];

/// Output types a config may name
pub const OUTPUT_KINDS: &[&str] = &["lab", "drop", "broker"];

/// Errors from parsing and validating a lab config
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Config parse error: {0}")]
    ParseError(String),

    #[error("Processor type '{0}' not recognised")]
    UnknownProcessor(String),

    #[error("Output type '{0}' not recognised")]
    UnknownOutput(String),

    #[error("Cache resource '{0}' referenced by processor {1} is not defined")]
    UndefinedCache(String, usize),

    #[error("Invalid filter pattern '{0}': {1}")]
    InvalidPattern(String, String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("Failed to serialize config: {0}")]
    SerializeError(String),
}

/// The complete lab config
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LabConfig {
    pub input: InputConfig,
    pub pipeline: PipelineConfig,
    pub output: OutputConfig,
    pub resources: ResourcesConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct InputConfig {
    /// Number of inlets, each fed a copy of every submitted batch
    pub feeds: usize,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self { feeds: 1 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub processors: Vec<ProcessorConfig>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheOperator {
    #[default]
    Set,
    Get,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProcessorConfig {
    Noop,
    Uppercase,
    Lowercase,
    Prefix {
        #[serde(default)]
        value: String,
    },
    Split {
        #[serde(default = "default_split_size")]
        size: usize,
    },
    Filter {
        #[serde(default)]
        pattern: String,
    },
    Sleep {
        #[serde(default)]
        duration_ms: u64,
    },
    Cache {
        resource: String,
        #[serde(default)]
        operator: CacheOperator,
        #[serde(default = "default_cache_key")]
        key: String,
    },
}

fn default_split_size() -> usize {
    1
}

fn default_cache_key() -> String {
    "${content}".to_string()
}

impl ProcessorConfig {
    /// Default config for a processor type, `None` if the type is unknown
    pub fn default_for(kind: &str) -> Option<Self> {
        let config = match kind {
            "noop" => Self::Noop,
            "uppercase" => Self::Uppercase,
            "lowercase" => Self::Lowercase,
            "prefix" => Self::Prefix {
                value: String::new(),
            },
            "split" => Self::Split {
                size: default_split_size(),
            },
            "filter" => Self::Filter {
                pattern: String::new(),
            },
            "sleep" => Self::Sleep { duration_ms: 0 },
            "cache" => Self::Cache {
                resource: String::new(),
                operator: CacheOperator::default(),
                key: default_cache_key(),
            },
            _ => return None,
        };
        Some(config)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Noop => "noop",
            Self::Uppercase => "uppercase",
            Self::Lowercase => "lowercase",
            Self::Prefix { .. } => "prefix",
            Self::Split { .. } => "split",
            Self::Filter { .. } => "filter",
            Self::Sleep { .. } => "sleep",
            Self::Cache { .. } => "cache",
        }
    }

    /// Field names accepted for a processor type, excluding `type`
    pub fn fields_of(kind: &str) -> &'static [&'static str] {
        match kind {
            "prefix" => &["value"],
            "split" => &["size"],
            "filter" => &["pattern"],
            "sleep" => &["duration_ms"],
            "cache" => &["resource", "operator", "key"],
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutputConfig {
    /// Stores results in the sink of the batch that produced them
    #[default]
    Lab,
    Drop,
    Broker {
        #[serde(default)]
        outputs: Vec<OutputConfig>,
    },
}

impl OutputConfig {
    pub fn default_for(kind: &str) -> Option<Self> {
        match kind {
            "lab" => Some(Self::Lab),
            "drop" => Some(Self::Drop),
            "broker" => Some(Self::Broker {
                outputs: Vec::new(),
            }),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Lab => "lab",
            Self::Drop => "drop",
            Self::Broker { .. } => "broker",
        }
    }

    /// Number of lab outputs reachable through this output
    pub fn lab_outputs(&self) -> usize {
        match self {
            Self::Lab => 1,
            Self::Drop => 0,
            Self::Broker { outputs } => outputs.iter().map(Self::lab_outputs).sum(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ResourcesConfig {
    pub caches: BTreeMap<String, CacheConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of keys held
    pub capacity: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            ttl_ms: None,
        }
    }
}

// ============================================================================
// SBIO: Pure parsing functions (no I/O)
// ============================================================================

/// Remove `//` and `/* */` comments outside of string literals.
pub fn strip_jsonc_comments(input: &str) -> String {
    enum State {
        Code,
        Str { escaped: bool },
        Line,
        Block { star: bool },
    }

    let mut out = String::with_capacity(input.len());
    let mut state = State::Code;
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        state = match state {
            State::Code => match c {
                '"' => {
                    out.push(c);
                    State::Str { escaped: false }
                }
                '/' if chars.peek() == Some(&'/') => {
                    chars.next();
                    State::Line
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    State::Block { star: false }
                }
                _ => {
                    out.push(c);
                    State::Code
                }
            },
            State::Str { escaped } => {
                out.push(c);
                match c {
                    '"' if !escaped => State::Code,
                    '\\' if !escaped => State::Str { escaped: true },
                    _ => State::Str { escaped: false },
                }
            }
            State::Line => {
                if c == '\n' {
                    out.push(c);
                    State::Code
                } else {
                    State::Line
                }
            }
            State::Block { star } => match c {
                '/' if star => State::Code,
                '*' => State::Block { star: true },
                _ => State::Block { star: false },
            },
        };
    }

    out
}

/// Parse config text into a generic value. Text starting with `{` is read as
/// JSONC, anything else as YAML. Empty text is an empty object.
pub fn parse_value(content: &str) -> Result<Value, ConfigError> {
    let trimmed = content.trim_start();
    let value = if trimmed.starts_with('{') {
        serde_json::from_str(&strip_jsonc_comments(trimmed))
            .map_err(|e| ConfigError::ParseError(e.to_string()))?
    } else {
        serde_yaml::from_str::<Value>(content)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?
    };
    Ok(match value {
        Value::Null => Value::Object(Default::default()),
        other => other,
    })
}

/// Parse and validate lab config text.
pub fn parse_config(content: &str) -> Result<LabConfig, ConfigError> {
    let value = parse_value(content)?;
    check_types(&value)?;
    let config: LabConfig =
        serde_json::from_value(value).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Reject unknown `type` names before deserializing so the error names them.
fn check_types(value: &Value) -> Result<(), ConfigError> {
    if let Some(processors) = value
        .pointer("/pipeline/processors")
        .and_then(Value::as_array)
    {
        for proc in processors {
            if let Some(kind) = proc.get("type").and_then(Value::as_str) {
                if !PROCESSOR_KINDS.contains(&kind) {
                    return Err(ConfigError::UnknownProcessor(kind.to_string()));
                }
            }
        }
    }
    if let Some(output) = value.get("output") {
        check_output_types(output)?;
    }
    Ok(())
}

fn check_output_types(output: &Value) -> Result<(), ConfigError> {
    if let Some(kind) = output.get("type").and_then(Value::as_str) {
        if !OUTPUT_KINDS.contains(&kind) {
            return Err(ConfigError::UnknownOutput(kind.to_string()));
        }
    }
    if let Some(children) = output.get("outputs").and_then(Value::as_array) {
        for child in children {
            check_output_types(child)?;
        }
    }
    Ok(())
}

/// Validate a config for consistency.
/// This is a pure function - no I/O.
pub fn validate_config(config: &LabConfig) -> Result<(), ConfigError> {
    if config.input.feeds == 0 {
        return Err(ConfigError::InvalidValue(
            "input.feeds".to_string(),
            "must be at least 1".to_string(),
        ));
    }

    for (index, proc) in config.pipeline.processors.iter().enumerate() {
        match proc {
            ProcessorConfig::Split { size: 0 } => {
                return Err(ConfigError::InvalidValue(
                    format!("pipeline.processors[{}].size", index),
                    "must be at least 1".to_string(),
                ));
            }
            ProcessorConfig::Filter { pattern } => {
                regex::Regex::new(pattern)
                    .map_err(|e| ConfigError::InvalidPattern(pattern.clone(), e.to_string()))?;
            }
            ProcessorConfig::Cache { resource, .. } => {
                if !config.resources.caches.contains_key(resource) {
                    return Err(ConfigError::UndefinedCache(resource.clone(), index));
                }
            }
            _ => {}
        }
    }

    Ok(())
}
