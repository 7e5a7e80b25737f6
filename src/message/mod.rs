//! Batches and parts flowing through a lab pipeline
//!
//! A [`Batch`] is the unit a caller submits and the pipeline acknowledges. Each
//! [`Part`] carries its payload, free-form metadata and an envelope
//! [`CorrelationId`] that stages can read but never overwrite.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies the result sink a batch's outputs belong to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A single payload fragment
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Part {
    payload: Vec<u8>,
    metadata: HashMap<String, String>,
    correlation: Option<CorrelationId>,
}

impl Part {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            metadata: HashMap::new(),
            correlation: None,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload as text, replacing invalid UTF-8 sequences
    pub fn as_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    pub fn set_payload(&mut self, payload: impl Into<Vec<u8>>) {
        self.payload = payload.into();
    }

    /// Derive a new part with a different payload, keeping metadata and
    /// correlation.
    pub fn with_payload(&self, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            metadata: self.metadata.clone(),
            correlation: self.correlation,
        }
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    pub fn get_metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    pub fn correlation(&self) -> Option<CorrelationId> {
        self.correlation
    }

    pub(crate) fn set_correlation(&mut self, id: Option<CorrelationId>) {
        self.correlation = id;
    }
}

/// An ordered group of parts submitted and acknowledged together
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Batch {
    parts: Vec<Part>,
}

impl Batch {
    pub fn new(parts: Vec<Part>) -> Self {
        Self { parts }
    }

    pub fn from_payloads<I, P>(payloads: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Vec<u8>>,
    {
        Self {
            parts: payloads.into_iter().map(Part::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn push(&mut self, part: Part) {
        self.parts.push(part);
    }

    pub fn get(&self, index: usize) -> Option<&Part> {
        self.parts.get(index)
    }

    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub fn parts_mut(&mut self) -> &mut [Part] {
        &mut self.parts
    }

    pub fn into_parts(self) -> Vec<Part> {
        self.parts
    }

    /// Correlation of the first part, which is the one outlets resolve against
    pub fn correlation(&self) -> Option<CorrelationId> {
        self.parts.first().and_then(Part::correlation)
    }

    pub fn payloads(&self) -> Vec<&[u8]> {
        self.parts.iter().map(Part::payload).collect()
    }

    pub fn to_strings(&self) -> Vec<String> {
        self.parts.iter().map(|p| p.as_str().into_owned()).collect()
    }

    pub(crate) fn tag(&mut self, id: CorrelationId) {
        for part in &mut self.parts {
            part.set_correlation(Some(id));
        }
    }

    /// Deep copy with every correlation removed
    pub(crate) fn detached(&self) -> Self {
        Self {
            parts: self
                .parts
                .iter()
                .map(|p| Part {
                    payload: p.payload.clone(),
                    metadata: p.metadata.clone(),
                    correlation: None,
                })
                .collect(),
        }
    }
}

impl FromIterator<Part> for Batch {
    fn from_iter<T: IntoIterator<Item = Part>>(iter: T) -> Self {
        Self {
            parts: iter.into_iter().collect(),
        }
    }
}

/// A batch as an outlet observed it, detached from the live pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct OutputUnit {
    pub batch: Batch,
    pub captured_at: DateTime<Utc>,
}

impl OutputUnit {
    pub(crate) fn capture(batch: &Batch) -> Self {
        Self {
            batch: batch.detached(),
            captured_at: Utc::now(),
        }
    }

    pub fn to_strings(&self) -> Vec<String> {
        self.batch.to_strings()
    }
}

// ============================================================================
// SBIO: Pure tokenizing of editor-style input
// ============================================================================

/// Split text into batches, one part per line, with blank lines separating
/// batches. Runs of blank lines never produce empty batches.
pub fn split_batches(text: &str) -> Vec<Batch> {
    let mut batches = vec![Batch::default()];
    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            if batches.last().is_some_and(|b| !b.is_empty()) {
                batches.push(Batch::default());
            }
            continue;
        }
        if let Some(current) = batches.last_mut() {
            current.push(Part::new(line));
        }
    }
    batches.retain(|b| !b.is_empty());
    batches
}
