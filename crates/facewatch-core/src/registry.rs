//! In-memory set of registered samples and the matcher derived from it.

use crate::matcher::FaceMatcher;
use crate::types::{Descriptor, LabeledSample};
use chrono::Utc;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum RegistryError {
    #[error("label must not be empty")]
    EmptyLabel,
    #[error("descriptor must not be empty")]
    EmptyDescriptor,
    #[error("descriptor has {actual} values, registered samples have {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Whether a registration added a new label or replaced an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Created,
    Updated,
}

/// Registered samples, at most one per label, plus the current matcher.
///
/// The matcher is rebuilt synchronously after every mutation and handed out
/// as an `Arc` snapshot, so a reader keeps the matcher it took even if the
/// set changes underneath it.
#[derive(Debug)]
pub struct SampleRegistry {
    samples: Vec<LabeledSample>,
    threshold: f32,
    matcher: Option<Arc<FaceMatcher>>,
}

/// Registry shared between the recognition loop and registration calls.
pub type SharedRegistry = Arc<RwLock<SampleRegistry>>;

impl SampleRegistry {
    pub fn new(threshold: f32) -> Self {
        Self {
            samples: Vec::new(),
            threshold,
            matcher: None,
        }
    }

    pub fn shared(threshold: f32) -> SharedRegistry {
        Arc::new(RwLock::new(Self::new(threshold)))
    }

    /// Register `descriptor` under `label`, replacing any previous sample
    /// with the same label.
    pub fn register(
        &mut self,
        label: &str,
        descriptor: Descriptor,
    ) -> Result<RegisterOutcome, RegistryError> {
        if label.is_empty() {
            return Err(RegistryError::EmptyLabel);
        }
        if descriptor.is_empty() {
            return Err(RegistryError::EmptyDescriptor);
        }
        if let Some(other) = self.samples.iter().find(|s| s.label != label) {
            if other.descriptor.len() != descriptor.len() {
                return Err(RegistryError::DimensionMismatch {
                    expected: other.descriptor.len(),
                    actual: descriptor.len(),
                });
            }
        }

        let sample = LabeledSample {
            label: label.to_string(),
            descriptor,
            registered_at: Utc::now(),
        };

        let outcome = match self.samples.iter_mut().find(|s| s.label == label) {
            Some(existing) => {
                *existing = sample;
                RegisterOutcome::Updated
            }
            None => {
                self.samples.push(sample);
                RegisterOutcome::Created
            }
        };

        self.rebuild();
        tracing::debug!(label, ?outcome, samples = self.samples.len(), "sample registered");
        Ok(outcome)
    }

    /// Remove the sample registered under `label`. Returns whether one existed.
    pub fn remove(&mut self, label: &str) -> bool {
        let before = self.samples.len();
        self.samples.retain(|s| s.label != label);
        let removed = self.samples.len() != before;
        self.rebuild();
        if removed {
            tracing::debug!(label, samples = self.samples.len(), "sample removed");
        }
        removed
    }

    /// Current matcher, `None` while nothing is registered.
    pub fn matcher(&self) -> Option<Arc<FaceMatcher>> {
        self.matcher.clone()
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn samples(&self) -> &[LabeledSample] {
        &self.samples
    }

    pub fn get(&self, label: &str) -> Option<&LabeledSample> {
        self.samples.iter().find(|s| s.label == label)
    }

    /// Labels in registration order.
    pub fn labels(&self) -> Vec<String> {
        self.samples.iter().map(|s| s.label.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    fn rebuild(&mut self) {
        self.matcher = FaceMatcher::new(&self.samples, self.threshold).map(Arc::new);
        if let Some(matcher) = &self.matcher {
            tracing::trace!(labels = ?matcher.labels().collect::<Vec<_>>(), "matcher rebuilt");
        }
    }
}

/// Read access that survives a panicked writer; the registry has no
/// invariant a half-finished write could break.
pub fn read(registry: &SharedRegistry) -> RwLockReadGuard<'_, SampleRegistry> {
    registry.read().unwrap_or_else(PoisonError::into_inner)
}

pub fn write(registry: &SharedRegistry) -> RwLockWriteGuard<'_, SampleRegistry> {
    registry.write().unwrap_or_else(PoisonError::into_inner)
}
