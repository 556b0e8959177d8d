//! Strategy registry: priority-ordered model dispatch with memoization.

use super::CompletionStrategy;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Resolves a device model string to its completeness strategy.
///
/// Strategies are sorted ascending by priority at construction; `resolve`
/// scans for the first `supports` hit and memoizes the result per model.
/// Construction requires at least one strategy whose `supports` is total
/// (the fallback), so resolution never fails.
pub struct StrategyRegistry {
    strategies: Vec<Arc<dyn CompletionStrategy>>,
    by_model: DashMap<String, Arc<dyn CompletionStrategy>>,
}

impl StrategyRegistry {
    pub fn new(mut strategies: Vec<Arc<dyn CompletionStrategy>>) -> Self {
        strategies.sort_by_key(|s| s.priority());
        for s in &strategies {
            info!(priority = s.priority(), strategy = s.description(), "registered framing strategy");
        }
        Self {
            strategies,
            by_model: DashMap::new(),
        }
    }

    /// Registry preloaded with the built-in strategies.
    pub fn with_defaults() -> Self {
        Self::new(vec![
            Arc::new(super::AstmStrategy::new()),
            Arc::new(super::DefaultStrategy),
        ])
    }

    /// Resolve the strategy for a device model. Memoized.
    pub fn resolve(&self, model: &str) -> Arc<dyn CompletionStrategy> {
        if let Some(hit) = self.by_model.get(model) {
            return Arc::clone(hit.value());
        }
        let chosen = self
            .strategies
            .iter()
            .find(|s| s.supports(model))
            .map(Arc::clone)
            .unwrap_or_else(|| {
                // Only reachable if constructed without a total fallback.
                Arc::clone(
                    self.strategies
                        .last()
                        .expect("registry constructed with no strategies"),
                )
            });
        debug!(model, strategy = chosen.description(), "resolved framing strategy");
        self.by_model.insert(model.to_string(), Arc::clone(&chosen));
        chosen
    }

    /// Drop all memoized resolutions, forcing a rescan on next use.
    pub fn clear_cache(&self) {
        self.by_model.clear();
    }
}
