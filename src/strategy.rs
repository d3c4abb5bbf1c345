//! Strategy definitions and the registry that holds them
//!
//! Strategies are data. The built-in set is compiled in from
//! `strategies.json`; operators can register more from their own JSON files.
//! Registration order is significant: it is the tie-break within a site and
//! among generic strategies.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::error::RegistryError;
use crate::record::Field;
use crate::selector::{PostProcess, SelectorSpec};

/// Built-in strategy definitions, embedded at compile time.
const BUILTIN_STRATEGIES: &str = include_str!("strategies.json");

/// Which sites a strategy is allowed to run on.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Generic,
    Sites(Vec<String>),
}

/// One self-contained extraction approach.
#[derive(Debug, Clone)]
pub struct Strategy {
    pub name: String,
    pub scope: Scope,
    pub fields: BTreeMap<Field, Vec<SelectorSpec>>,
    pub timeout_budget: Duration,
}

impl Strategy {
    pub fn site(name: impl Into<String>, sites: &[&str], timeout_budget: Duration) -> Self {
        Self {
            name: name.into(),
            scope: Scope::Sites(sites.iter().map(|s| s.to_string()).collect()),
            fields: BTreeMap::new(),
            timeout_budget,
        }
    }

    pub fn generic(name: impl Into<String>, timeout_budget: Duration) -> Self {
        Self {
            name: name.into(),
            scope: Scope::Generic,
            fields: BTreeMap::new(),
            timeout_budget,
        }
    }

    /// Append selectors for `field`, after any already present.
    pub fn field(mut self, field: Field, specs: impl IntoIterator<Item = SelectorSpec>) -> Self {
        self.fields.entry(field).or_default().extend(specs);
        self
    }

    pub fn selectors(&self, field: Field) -> &[SelectorSpec] {
        self.fields.get(&field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_generic(&self) -> bool {
        matches!(self.scope, Scope::Generic)
    }

    pub fn applies_to(&self, domain: &str) -> bool {
        match &self.scope {
            Scope::Generic => false,
            Scope::Sites(sites) => sites.iter().any(|s| s == domain),
        }
    }

    fn validate(&self) -> Result<(), RegistryError> {
        let invalid = |reason: &str| RegistryError::Invalid {
            strategy: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name is empty"));
        }
        if let Scope::Sites(sites) = &self.scope {
            if sites.is_empty() || sites.iter().any(|s| s.trim().is_empty()) {
                return Err(invalid("site list is empty or has a blank domain"));
            }
        }
        if self.fields.values().all(Vec::is_empty) {
            return Err(invalid("no selectors"));
        }
        for spec in self.fields.values().flatten() {
            if spec.pattern.trim().is_empty() {
                return Err(invalid("selector with an empty pattern"));
            }
            if let PostProcess::JoinFraction { fraction, .. } = &spec.post {
                if fraction.pattern.trim().is_empty() {
                    return Err(invalid("join_fraction with an empty fraction pattern"));
                }
            }
        }
        if self.timeout_budget.is_zero() {
            return Err(invalid("timeout budget is zero"));
        }
        Ok(())
    }
}

/// On-disk shape of a strategy; `timeout_ms` falls back to the configured
/// default budget.
#[derive(Debug, Deserialize)]
struct StrategyDef {
    name: String,
    scope: Scope,
    #[serde(default)]
    timeout_ms: Option<u64>,
    fields: BTreeMap<Field, Vec<SelectorSpec>>,
}

impl StrategyDef {
    fn into_strategy(self, default_budget: Duration) -> Strategy {
        Strategy {
            name: self.name,
            scope: self.scope,
            fields: self.fields,
            timeout_budget: self
                .timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(default_budget),
        }
    }
}

/// Immutable-after-startup list of strategies in registration order.
#[derive(Debug, Clone, Default)]
pub struct StrategyRegistry {
    strategies: Vec<Arc<Strategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the compiled-in retailer and generic strategies.
    pub fn builtin(default_budget: Duration) -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        registry.load_json(BUILTIN_STRATEGIES, default_budget)?;
        Ok(registry)
    }

    /// Register one strategy after the ones already present.
    pub fn register(&mut self, mut strategy: Strategy) -> Result<(), RegistryError> {
        if let Scope::Sites(sites) = &mut strategy.scope {
            for site in sites.iter_mut() {
                *site = site.trim().trim_end_matches('.').to_lowercase();
            }
        }
        strategy.validate()?;
        if self.strategies.iter().any(|s| s.name == strategy.name) {
            return Err(RegistryError::Invalid {
                strategy: strategy.name,
                reason: "a strategy with this name is already registered".to_string(),
            });
        }
        self.strategies.push(Arc::new(strategy));
        Ok(())
    }

    /// Register every strategy of a JSON array, in array order.
    pub fn load_json(&mut self, json: &str, default_budget: Duration) -> Result<usize, RegistryError> {
        let defs: Vec<StrategyDef> = serde_json::from_str(json)?;
        let count = defs.len();
        for def in defs {
            self.register(def.into_strategy(default_budget))?;
        }
        Ok(count)
    }

    pub fn load_file(&mut self, path: &Path, default_budget: Duration) -> Result<usize, RegistryError> {
        let json = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let count = self.load_json(&json, default_budget)?;
        tracing::info!(path = %path.display(), count, "registered strategies from file");
        Ok(count)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Strategy>> {
        self.strategies.iter()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Every domain named by a site-scoped strategy, deduplicated.
    pub fn known_domains(&self) -> Vec<String> {
        let mut domains: Vec<String> = Vec::new();
        for strategy in &self.strategies {
            if let Scope::Sites(sites) = &strategy.scope {
                for site in sites {
                    if !domains.contains(site) {
                        domains.push(site.clone());
                    }
                }
            }
        }
        domains
    }
}
