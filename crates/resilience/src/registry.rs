//! One breaker per destination, created on first use.

use std::sync::Arc;

use dashmap::DashMap;

use crate::breaker::{BreakerConfig, BreakerSnapshot, CircuitBreaker};

/// Owns the circuit breakers for every outbound destination.
///
/// Built once at process start and shared by reference; a destination gets
/// the same breaker instance for the lifetime of the registry.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    defaults: BreakerConfig,
    overrides: DashMap<String, BreakerConfig>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    /// Creates a registry applying `defaults` to every destination.
    pub fn new(defaults: BreakerConfig) -> Self {
        Self {
            defaults,
            overrides: DashMap::new(),
            breakers: DashMap::new(),
        }
    }

    /// Uses a specific config for one destination.
    ///
    /// Has no effect on a breaker that has already been created.
    pub fn with_override(self, destination: impl Into<String>, config: BreakerConfig) -> Self {
        self.overrides.insert(destination.into(), config);
        self
    }

    /// Returns the breaker for `destination`, creating it if needed.
    pub fn breaker(&self, destination: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(destination) {
            return existing.clone();
        }
        let config = self
            .overrides
            .get(destination)
            .map(|c| *c)
            .unwrap_or(self.defaults);
        self.breakers
            .entry(destination.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(destination, config)))
            .clone()
    }

    /// Snapshots of every breaker created so far, sorted by name.
    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<_> = self
            .breakers
            .iter()
            .map(|entry| entry.value().snapshot())
            .collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }
}
