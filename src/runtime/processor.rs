use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use thiserror::Error;

use crate::config::{CacheOperator, ConfigError, ProcessorConfig};
use crate::message::Batch;
use crate::runtime::resources::{MemoryCache, ResourceError, ResourceManager};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProcessorError {
    #[error("Processor failed: {0}")]
    Failed(String),

    #[error("Cache key '{0}' not found")]
    KeyNotFound(String),

    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),
}

/// A pipeline stage. Returning no batches drops the input, returning several
/// fans it out.
///
/// Stages must derive output parts from input parts (`Part::with_payload`,
/// `Part::set_payload`, cloning) so envelope correlation survives.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, batch: Batch) -> Result<Vec<Batch>, ProcessorError>;
}

pub struct Noop;

#[async_trait]
impl Processor for Noop {
    async fn process(&self, batch: Batch) -> Result<Vec<Batch>, ProcessorError> {
        Ok(vec![batch])
    }
}

pub struct ChangeCase {
    upper: bool,
}

#[async_trait]
impl Processor for ChangeCase {
    async fn process(&self, mut batch: Batch) -> Result<Vec<Batch>, ProcessorError> {
        for part in batch.parts_mut() {
            let text = if self.upper {
                part.as_str().to_uppercase()
            } else {
                part.as_str().to_lowercase()
            };
            part.set_payload(text);
        }
        Ok(vec![batch])
    }
}

pub struct Prefix {
    value: Vec<u8>,
}

#[async_trait]
impl Processor for Prefix {
    async fn process(&self, mut batch: Batch) -> Result<Vec<Batch>, ProcessorError> {
        for part in batch.parts_mut() {
            let mut payload = self.value.clone();
            payload.extend_from_slice(part.payload());
            part.set_payload(payload);
        }
        Ok(vec![batch])
    }
}

/// Break a batch into batches of at most `size` parts
pub struct Split {
    size: usize,
}

#[async_trait]
impl Processor for Split {
    async fn process(&self, batch: Batch) -> Result<Vec<Batch>, ProcessorError> {
        Ok(batch
            .parts()
            .chunks(self.size)
            .map(|chunk| chunk.iter().cloned().collect::<Batch>())
            .collect())
    }
}

/// Keep parts matching a pattern, dropping the batch if none match
pub struct Filter {
    pattern: Regex,
}

#[async_trait]
impl Processor for Filter {
    async fn process(&self, batch: Batch) -> Result<Vec<Batch>, ProcessorError> {
        let kept: Batch = batch
            .into_parts()
            .into_iter()
            .filter(|p| self.pattern.is_match(&p.as_str()))
            .collect();
        if kept.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![kept])
    }
}

pub struct Sleep {
    duration: Duration,
}

#[async_trait]
impl Processor for Sleep {
    async fn process(&self, batch: Batch) -> Result<Vec<Batch>, ProcessorError> {
        tokio::time::sleep(self.duration).await;
        Ok(vec![batch])
    }
}

pub struct Cache {
    cache: Arc<MemoryCache>,
    operator: CacheOperator,
    key: String,
}

#[async_trait]
impl Processor for Cache {
    async fn process(&self, mut batch: Batch) -> Result<Vec<Batch>, ProcessorError> {
        for part in batch.parts_mut() {
            let key = self.key.replace("${content}", &part.as_str());
            match self.operator {
                CacheOperator::Set => self.cache.set(&key, part.payload().to_vec())?,
                CacheOperator::Get => {
                    let value = self
                        .cache
                        .get(&key)
                        .ok_or(ProcessorError::KeyNotFound(key))?;
                    part.set_payload(value);
                }
            }
        }
        Ok(vec![batch])
    }
}

// ============================================================================
// Construction from config
// ============================================================================

/// Build one processor. Resource references are resolved here so an unknown
/// cache fails the compile rather than the first batch.
pub fn build_processor(
    index: usize,
    config: &ProcessorConfig,
    resources: &ResourceManager,
) -> Result<Arc<dyn Processor>, ConfigError> {
    let proc: Arc<dyn Processor> = match config {
        ProcessorConfig::Noop => Arc::new(Noop),
        ProcessorConfig::Uppercase => Arc::new(ChangeCase { upper: true }),
        ProcessorConfig::Lowercase => Arc::new(ChangeCase { upper: false }),
        ProcessorConfig::Prefix { value } => Arc::new(Prefix {
            value: value.as_bytes().to_vec(),
        }),
        ProcessorConfig::Split { size } => Arc::new(Split { size: (*size).max(1) }),
        ProcessorConfig::Filter { pattern } => Arc::new(Filter {
            pattern: Regex::new(pattern)
                .map_err(|e| ConfigError::InvalidPattern(pattern.clone(), e.to_string()))?,
        }),
        ProcessorConfig::Sleep { duration_ms } => Arc::new(Sleep {
            duration: Duration::from_millis(*duration_ms),
        }),
        ProcessorConfig::Cache {
            resource,
            operator,
            key,
        } => Arc::new(Cache {
            cache: resources
                .cache(resource)
                .map_err(|_| ConfigError::UndefinedCache(resource.clone(), index))?,
            operator: *operator,
            key: key.clone(),
        }),
    };
    Ok(proc)
}

pub fn build_processors(
    configs: &[ProcessorConfig],
    resources: &ResourceManager,
) -> Result<Vec<Arc<dyn Processor>>, ConfigError> {
    configs
        .iter()
        .enumerate()
        .map(|(i, c)| build_processor(i, c, resources))
        .collect()
}

/// Run a batch through every processor in order, flattening fan-out.
pub async fn run_processors(
    processors: &[Arc<dyn Processor>],
    batch: Batch,
) -> Result<Vec<Batch>, ProcessorError> {
    let mut batches = vec![batch];
    for proc in processors {
        let mut next = Vec::with_capacity(batches.len());
        for batch in batches {
            next.extend(proc.process(batch).await?);
        }
        batches = next;
        if batches.is_empty() {
            break;
        }
    }
    Ok(batches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, ResourcesConfig};
    use crate::message::CorrelationId;

    fn build(config: ProcessorConfig) -> Arc<dyn Processor> {
        build_processor(0, &config, &ResourceManager::empty()).unwrap()
    }

    fn tagged(payloads: &[&str]) -> (Batch, CorrelationId) {
        let mut batch = Batch::from_payloads(payloads.iter().copied());
        let id = CorrelationId::new();
        batch.tag(id);
        (batch, id)
    }

    #[tokio::test]
    async fn test_noop() {
        let (batch, _) = tagged(&["a", "b"]);
        let out = build(ProcessorConfig::Noop).process(batch.clone()).await.unwrap();
        assert_eq!(out, vec![batch]);
    }

    #[tokio::test]
    async fn test_case_keeps_correlation() {
        let (batch, id) = tagged(&["Hello"]);
        let upper = build(ProcessorConfig::Uppercase).process(batch.clone()).await.unwrap();
        assert_eq!(upper[0].to_strings(), vec!["HELLO"]);
        assert_eq!(upper[0].correlation(), Some(id));

        let lower = build(ProcessorConfig::Lowercase).process(batch).await.unwrap();
        assert_eq!(lower[0].to_strings(), vec!["hello"]);
    }

    #[tokio::test]
    async fn test_prefix() {
        let (batch, _) = tagged(&["a", "b"]);
        let proc = build(ProcessorConfig::Prefix {
            value: "> ".to_string(),
        });
        let out = proc.process(batch).await.unwrap();
        assert_eq!(out[0].to_strings(), vec!["> a", "> b"]);
    }

    #[tokio::test]
    async fn test_split_fans_out() {
        let (batch, id) = tagged(&["a", "b", "c"]);
        let out = build(ProcessorConfig::Split { size: 2 }).process(batch).await.unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].to_strings(), vec!["a", "b"]);
        assert_eq!(out[1].to_strings(), vec!["c"]);
        assert!(out.iter().all(|b| b.correlation() == Some(id)));
    }

    #[tokio::test]
    async fn test_filter() {
        let (batch, _) = tagged(&["keep me", "drop", "keep too"]);
        let proc = build(ProcessorConfig::Filter {
            pattern: "^keep".to_string(),
        });
        let out = proc.process(batch).await.unwrap();
        assert_eq!(out[0].to_strings(), vec!["keep me", "keep too"]);

        let (batch, _) = tagged(&["nothing"]);
        let proc = build(ProcessorConfig::Filter {
            pattern: "^keep".to_string(),
        });
        assert!(proc.process(batch).await.unwrap().is_empty());
    }

    #[test]
    fn test_invalid_filter_pattern() {
        let result = build_processor(
            3,
            &ProcessorConfig::Filter {
                pattern: "(".to_string(),
            },
            &ResourceManager::empty(),
        );
        assert!(matches!(result, Err(ConfigError::InvalidPattern(_, _))));
    }

    #[tokio::test]
    async fn test_cache_set_then_get() {
        let mut resources = ResourcesConfig::default();
        resources
            .caches
            .insert("store".to_string(), CacheConfig::default());
        let manager = ResourceManager::new(&resources).unwrap();

        let set = build_processor(
            0,
            &ProcessorConfig::Cache {
                resource: "store".to_string(),
                operator: CacheOperator::Set,
                key: "last".to_string(),
            },
            &manager,
        )
        .unwrap();
        let get = build_processor(
            1,
            &ProcessorConfig::Cache {
                resource: "store".to_string(),
                operator: CacheOperator::Get,
                key: "last".to_string(),
            },
            &manager,
        )
        .unwrap();

        let (batch, _) = tagged(&["remembered"]);
        set.process(batch).await.unwrap();

        let (batch, id) = tagged(&["anything"]);
        let out = get.process(batch).await.unwrap();
        assert_eq!(out[0].to_strings(), vec!["remembered"]);
        assert_eq!(out[0].correlation(), Some(id));
    }

    #[tokio::test]
    async fn test_cache_get_missing_key() {
        let mut resources = ResourcesConfig::default();
        resources
            .caches
            .insert("store".to_string(), CacheConfig::default());
        let manager = ResourceManager::new(&resources).unwrap();
        let get = build_processor(
            0,
            &ProcessorConfig::Cache {
                resource: "store".to_string(),
                operator: CacheOperator::Get,
                key: "${content}".to_string(),
            },
            &manager,
        )
        .unwrap();

        let (batch, _) = tagged(&["nope"]);
        assert_eq!(
            get.process(batch).await.unwrap_err(),
            ProcessorError::KeyNotFound("nope".to_string())
        );
    }

    #[test]
    fn test_cache_unknown_resource() {
        let result = build_processor(
            2,
            &ProcessorConfig::Cache {
                resource: "ghost".to_string(),
                operator: CacheOperator::Get,
                key: "k".to_string(),
            },
            &ResourceManager::empty(),
        );
        assert!(matches!(
            result,
            Err(ConfigError::UndefinedCache(name, 2)) if name == "ghost"
        ));
    }

    #[tokio::test]
    async fn test_run_processors_chain() {
        let processors = build_processors(
            &[
                ProcessorConfig::Split { size: 1 },
                ProcessorConfig::Filter {
                    pattern: "b|c".to_string(),
                },
                ProcessorConfig::Uppercase,
            ],
            &ResourceManager::empty(),
        )
        .unwrap();

        let (batch, id) = tagged(&["a", "b", "c"]);
        let out = run_processors(&processors, batch).await.unwrap();

        let strings: Vec<Vec<String>> = out.iter().map(Batch::to_strings).collect();
        assert_eq!(strings, vec![vec!["B"], vec!["C"]]);
        assert!(out.iter().all(|b| b.correlation() == Some(id)));
    }

    #[tokio::test]
    async fn test_run_processors_empty_chain() {
        let (batch, _) = tagged(&["x"]);
        let out = run_processors(&[], batch.clone()).await.unwrap();
        assert_eq!(out, vec![batch]);
    }
}
