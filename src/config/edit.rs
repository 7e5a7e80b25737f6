use super::lab::{CacheConfig, ConfigError, LabConfig, OutputConfig, ProcessorConfig};

/// Render a config as canonical YAML with every default filled in.
pub fn normalise(config: &LabConfig) -> Result<String, ConfigError> {
    serde_yaml::to_string(config).map_err(|e| ConfigError::SerializeError(e.to_string()))
}

/// Append a default processor of `kind` to the pipeline.
pub fn add_processor(config: &mut LabConfig, kind: &str) -> Result<(), ConfigError> {
    let proc = ProcessorConfig::default_for(kind)
        .ok_or_else(|| ConfigError::UnknownProcessor(kind.to_string()))?;
    config.pipeline.processors.push(proc);
    Ok(())
}

/// Add a default output of `kind`. A non-broker output is first wrapped in a
/// broker so both outputs receive every batch.
pub fn add_output(config: &mut LabConfig, kind: &str) -> Result<(), ConfigError> {
    let output = OutputConfig::default_for(kind)
        .ok_or_else(|| ConfigError::UnknownOutput(kind.to_string()))?;

    if !matches!(config.output, OutputConfig::Broker { .. }) {
        let current = std::mem::take(&mut config.output);
        config.output = OutputConfig::Broker {
            outputs: vec![current],
        };
        if kind == "broker" {
            return Ok(());
        }
    }

    if let OutputConfig::Broker { outputs } = &mut config.output {
        outputs.push(output);
    }
    Ok(())
}

/// Add a default cache resource and return its generated label.
pub fn add_cache(config: &mut LabConfig) -> String {
    let mut n = config.resources.caches.len();
    let mut label = format!("example{}", n);
    while config.resources.caches.contains_key(&label) {
        n += 1;
        label = format!("example{}", n);
    }
    config
        .resources
        .caches
        .insert(label.clone(), CacheConfig::default());
    label
}
