use clap::{ArgAction, Parser};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "pipelab")]
#[command(about = "Compile a stream pipeline and see what it produces for each input batch")]
#[command(version)]
pub struct Args {
    /// Path to the lab config (YAML, JSON or JSONC)
    #[arg(required = true)]
    pub config_file: PathBuf,

    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Read input from a file instead of stdin. Batches are separated by blank lines.
    #[arg(short, long, value_name = "FILE")]
    pub input: Option<PathBuf>,

    /// Deadline in seconds for every hand-off and shutdown wait
    #[arg(long, default_value = "30", env = "PIPELAB_TIMEOUT")]
    pub timeout: u64,

    /// Dry-run mode: validate config and show the pipeline without running
    #[arg(long)]
    pub dry_run: bool,

    /// Print the config in canonical YAML with defaults filled in, then exit
    #[arg(long)]
    pub normalise: bool,

    /// Append a default processor of this type (repeatable)
    #[arg(long, value_name = "TYPE", action = ArgAction::Append)]
    pub add_processor: Vec<String>,

    /// Add a default output of this type (repeatable)
    #[arg(long, value_name = "TYPE", action = ArgAction::Append)]
    pub add_output: Vec<String>,

    /// Add a default cache resource (-c, -cc, ...)
    #[arg(short = 'c', long, action = ArgAction::Count)]
    pub add_cache: u8,
}

impl Args {
    pub fn has_edits(&self) -> bool {
        !self.add_processor.is_empty() || !self.add_output.is_empty() || self.add_cache > 0
    }
}

// ============================================================================
// SBIO: Pure display logic (no I/O - returns formatted strings)
// ============================================================================

use crate::config::{LabConfig, OutputConfig, ProcessorConfig};
use crate::message::OutputUnit;
use crate::runtime::StreamError;

/// Format a dry-run output showing the pipeline structure.
/// Pure function - returns a formatted string.
pub fn format_dry_run(config: &LabConfig, args: &Args, lints: &[String]) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "pipelab v{} - Dry Run Mode\n\n",
        env!("CARGO_PKG_VERSION")
    ));
    output.push_str(&format!("Config: {}\n\n", args.config_file.display()));

    output.push_str(&format!("Input: {} feed(s)\n\n", config.input.feeds));

    output.push_str(&format!(
        "Processors ({}):\n",
        config.pipeline.processors.len()
    ));
    for (i, proc) in config.pipeline.processors.iter().enumerate() {
        output.push_str(&format!("  {}. {}\n", i, describe_processor(proc)));
    }
    output.push('\n');

    output.push_str("Output:\n");
    describe_output(&config.output, 1, &mut output);

    if !config.resources.caches.is_empty() {
        output.push_str(&format!(
            "\nResources ({} caches):\n",
            config.resources.caches.len()
        ));
        for (name, cache) in &config.resources.caches {
            output.push_str(&format!("  - {} (capacity {}", name, cache.capacity));
            if let Some(ttl) = cache.ttl_ms {
                output.push_str(&format!(", ttl {}ms", ttl));
            }
            output.push_str(")\n");
        }
    }

    if !lints.is_empty() {
        output.push_str(&format!("\nWarnings ({}):\n", lints.len()));
        for lint in lints {
            output.push_str(&format!("  - {}\n", lint));
        }
    }

    output.push_str("\nValidation: PASSED\n");
    output.push_str("Ready to run. Remove --dry-run to execute.\n");

    output
}

fn describe_processor(proc: &ProcessorConfig) -> String {
    match proc {
        ProcessorConfig::Prefix { value } => format!("prefix {:?}", value),
        ProcessorConfig::Split { size } => format!("split (size {})", size),
        ProcessorConfig::Filter { pattern } => format!("filter /{}/", pattern),
        ProcessorConfig::Sleep { duration_ms } => format!("sleep {}ms", duration_ms),
        ProcessorConfig::Cache {
            resource,
            operator,
            key,
        } => format!("cache {:?} on '{}' (key {})", operator, resource, key),
        other => other.kind().to_string(),
    }
}

fn describe_output(config: &OutputConfig, depth: usize, output: &mut String) {
    let indent = "  ".repeat(depth);
    match config {
        OutputConfig::Broker { outputs } => {
            output.push_str(&format!("{}broker ({} outputs)\n", indent, outputs.len()));
            for child in outputs {
                describe_output(child, depth + 1, output);
            }
        }
        other => output.push_str(&format!("{}{}\n", indent, other.kind())),
    }
}

/// Format the outputs collected for one input batch: one part per line and a
/// blank line after each output unit.
pub fn format_results(index: usize, outputs: &[OutputUnit], err: Option<&StreamError>) -> String {
    let mut output = format!("# batch {}: {} output(s)\n", index, outputs.len());
    if let Some(err) = err {
        output.push_str(&format!("# error: {}\n", err));
    }
    for unit in outputs {
        for part in unit.to_strings() {
            output.push_str(&part);
            output.push('\n');
        }
        output.push('\n');
    }
    output
}
