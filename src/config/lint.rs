//! Config linting
//!
//! Parsing ignores fields it does not know, so a typo silently falls back to a
//! default. The linter walks the raw document and reports those fields along
//! with topologies that can never return results.

use serde_json::{Map, Value};

use super::lab::{parse_value, ConfigError, ProcessorConfig};

const ROOT_FIELDS: &[&str] = &["input", "pipeline", "output", "resources"];
const INPUT_FIELDS: &[&str] = &["feeds"];
const PIPELINE_FIELDS: &[&str] = &["processors"];
const RESOURCES_FIELDS: &[&str] = &["caches"];
const CACHE_FIELDS: &[&str] = &["capacity", "ttl_ms"];

/// Lint raw config text, returning one message per problem found.
pub fn lint_config(content: &str) -> Result<Vec<String>, ConfigError> {
    let value = parse_value(content)?;
    let mut lints = Vec::new();

    let Some(root) = value.as_object() else {
        lints.push("config root is not an object".to_string());
        return Ok(lints);
    };
    unknown_fields("config", root, ROOT_FIELDS, &mut lints);

    if let Some(input) = root.get("input").and_then(Value::as_object) {
        unknown_fields("input", input, INPUT_FIELDS, &mut lints);
    }

    if let Some(pipeline) = root.get("pipeline").and_then(Value::as_object) {
        unknown_fields("pipeline", pipeline, PIPELINE_FIELDS, &mut lints);
        if let Some(processors) = pipeline.get("processors").and_then(Value::as_array) {
            for (i, proc) in processors.iter().enumerate() {
                lint_processor(&format!("pipeline.processors[{}]", i), proc, &mut lints);
            }
        }
    }

    if let Some(output) = root.get("output") {
        lint_output("output", output, &mut lints);
        if reachable_lab_outputs(output) == 0 {
            lints.push(
                "output: no lab output is reachable, results will always be empty".to_string(),
            );
        }
    }

    if let Some(resources) = root.get("resources").and_then(Value::as_object) {
        unknown_fields("resources", resources, RESOURCES_FIELDS, &mut lints);
        if let Some(caches) = resources.get("caches").and_then(Value::as_object) {
            for (name, cache) in caches {
                if let Some(cache) = cache.as_object() {
                    let path = format!("resources.caches.{}", name);
                    unknown_fields(&path, cache, CACHE_FIELDS, &mut lints);
                }
            }
        }
    }

    Ok(lints)
}

fn unknown_fields(
    path: &str,
    object: &Map<String, Value>,
    known: &[&str],
    lints: &mut Vec<String>,
) {
    for key in object.keys() {
        if !known.contains(&key.as_str()) {
            lints.push(format!("{}: unknown field '{}'", path, key));
        }
    }
}

fn lint_processor(path: &str, proc: &Value, lints: &mut Vec<String>) {
    let Some(object) = proc.as_object() else {
        lints.push(format!("{}: expected an object", path));
        return;
    };
    let Some(kind) = object.get("type").and_then(Value::as_str) else {
        lints.push(format!("{}: missing 'type'", path));
        return;
    };

    let fields = ProcessorConfig::fields_of(kind);
    for key in object.keys() {
        if key != "type" && !fields.contains(&key.as_str()) {
            lints.push(format!("{}: unknown field '{}' for {}", path, key, kind));
        }
    }
}

fn lint_output(path: &str, output: &Value, lints: &mut Vec<String>) {
    let Some(object) = output.as_object() else {
        lints.push(format!("{}: expected an object", path));
        return;
    };
    let kind = object.get("type").and_then(Value::as_str).unwrap_or("lab");
    let fields: &[&str] = if kind == "broker" { &["type", "outputs"] } else { &["type"] };
    for key in object.keys() {
        if !fields.contains(&key.as_str()) {
            lints.push(format!("{}: unknown field '{}' for {}", path, key, kind));
        }
    }

    if let Some(children) = object.get("outputs").and_then(Value::as_array) {
        if kind == "broker" && children.is_empty() {
            lints.push(format!("{}: broker has no outputs", path));
        }
        for (i, child) in children.iter().enumerate() {
            lint_output(&format!("{}.outputs[{}]", path, i), child, lints);
        }
    }
}

fn reachable_lab_outputs(output: &Value) -> usize {
    match output.get("type").and_then(Value::as_str).unwrap_or("lab") {
        "lab" => 1,
        "broker" => output
            .get("outputs")
            .and_then(Value::as_array)
            .map(|children| children.iter().map(reachable_lab_outputs).sum())
            .unwrap_or(0),
        _ => 0,
    }
}
