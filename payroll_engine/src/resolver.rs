//! Statutory rule resolution.
//!
//! Rule sets are versioned, time-bounded bundles of [`RuleEntry`]
//! overrides, either scoped to one tenant or global.  Given a date, the
//! [`StatutoryRuleResolver`] picks the most recent tenant rule set in
//! force, then the most recent global one, and finally falls back to the
//! hard-coded [`RuleConfig::default`].  The selected entries are merged
//! onto the defaults field by field.
//!
//! Rule sets can be stored anywhere that implements [`RuleStore`].  The
//! bundled [`InMemoryRuleStore`] can be seeded from a directory of JSON
//! files, one rule set per file.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::rules::{RuleConfig, RuleEntry};

/// Version reported when no rule set matched.
pub const FALLBACK_VERSION: &str = "fallback-default";

/// Jurisdiction used when the caller does not name one.
pub const DEFAULT_JURISDICTION: &str = "mainland";

/// A named, time-bounded version of the payroll rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    pub id: String,
    pub version: String,
    /// `None` for a global rule set.
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default = "default_jurisdiction")]
    pub jurisdiction: String,
    pub effective_from: NaiveDate,
    /// Inclusive; `None` means open-ended.
    #[serde(default)]
    pub effective_to: Option<NaiveDate>,
    #[serde(default)]
    pub entries: Vec<RuleEntry>,
}

fn default_jurisdiction() -> String {
    DEFAULT_JURISDICTION.to_string()
}

impl RuleSet {
    /// Whether the rule set is in force on `as_of`.
    pub fn is_effective_on(&self, as_of: NaiveDate) -> bool {
        self.effective_from <= as_of && self.effective_to.map_or(true, |to| to >= as_of)
    }
}

/// The rules to compute with, and where they came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadedRules {
    /// `None` when the hard-coded defaults were used.
    pub rule_set_id: Option<String>,
    pub version: String,
    pub config: RuleConfig,
}

impl LoadedRules {
    pub fn fallback() -> Self {
        Self {
            rule_set_id: None,
            version: FALLBACK_VERSION.to_string(),
            config: RuleConfig::default(),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.rule_set_id.is_none()
    }
}

/// Read access to persisted rule sets.
#[async_trait]
pub trait RuleStore: Send + Sync + 'static {
    /// The rule set with the latest `effective_from` that is in force on
    /// `as_of`, for exactly this tenant scope (`None` = global only).
    async fn find_rule_set(
        &self,
        tenant_id: Option<&str>,
        jurisdiction: &str,
        as_of: NaiveDate,
    ) -> Result<Option<RuleSet>, StoreError>;
}

#[derive(Error, Debug)]
pub enum RuleLoadError {
    #[error("failed to read rule directory {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Default)]
pub struct InMemoryRuleStore {
    rule_sets: RwLock<Vec<RuleSet>>,
}

impl InMemoryRuleStore {
    pub fn new(rule_sets: Vec<RuleSet>) -> Self {
        Self {
            rule_sets: RwLock::new(rule_sets),
        }
    }

    /// Load every `.json` file in `path` as a [`RuleSet`].  Files that do
    /// not parse are logged and skipped.  A missing directory yields an
    /// empty store.
    pub fn load_from_dir(path: &Path) -> Result<Self, RuleLoadError> {
        let io_err = |source| RuleLoadError::Io {
            path: path.display().to_string(),
            source,
        };
        let mut rule_sets = Vec::new();
        if path.is_dir() {
            for entry in std::fs::read_dir(path).map_err(io_err)? {
                let entry_path = entry.map_err(io_err)?.path();
                if !entry_path.is_file() || entry_path.extension().map_or(true, |ext| ext != "json") {
                    continue;
                }
                let data = std::fs::read_to_string(&entry_path).map_err(io_err)?;
                match serde_json::from_str::<RuleSet>(&data) {
                    Ok(rule_set) => rule_sets.push(rule_set),
                    Err(err) => {
                        tracing::warn!(path = %entry_path.display(), %err, "skipping unparseable rule set");
                    }
                }
            }
        } else {
            tracing::warn!(path = %path.display(), "rule directory not found; using built-in defaults");
        }
        tracing::info!(count = rule_sets.len(), "loaded statutory rule sets");
        Ok(Self::new(rule_sets))
    }
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    async fn find_rule_set(
        &self,
        tenant_id: Option<&str>,
        jurisdiction: &str,
        as_of: NaiveDate,
    ) -> Result<Option<RuleSet>, StoreError> {
        let rule_sets = self.rule_sets.read().await;
        Ok(rule_sets
            .iter()
            .filter(|set| set.tenant_id.as_deref() == tenant_id)
            .filter(|set| set.jurisdiction == jurisdiction)
            .filter(|set| set.is_effective_on(as_of))
            .max_by_key(|set| set.effective_from)
            .cloned())
    }
}

/// Selects the applicable rules for a tenant and date.
#[derive(Clone)]
pub struct StatutoryRuleResolver {
    store: Arc<dyn RuleStore>,
    jurisdiction: String,
}

impl StatutoryRuleResolver {
    pub fn new(store: Arc<dyn RuleStore>) -> Self {
        Self {
            store,
            jurisdiction: DEFAULT_JURISDICTION.to_string(),
        }
    }

    pub fn with_jurisdiction(mut self, jurisdiction: impl Into<String>) -> Self {
        self.jurisdiction = jurisdiction.into();
        self
    }

    /// Resolve the rules in force on `as_of` for `tenant_id`.
    pub async fn resolve(&self, as_of: NaiveDate, tenant_id: Option<&str>) -> Result<LoadedRules, StoreError> {
        let mut selected = None;
        if let Some(tenant) = tenant_id {
            selected = self.store.find_rule_set(Some(tenant), &self.jurisdiction, as_of).await?;
        }
        if selected.is_none() {
            selected = self.store.find_rule_set(None, &self.jurisdiction, as_of).await?;
        }

        let Some(rule_set) = selected else {
            tracing::warn!(%as_of, ?tenant_id, "no statutory rule set in force; using fallback defaults");
            return Ok(LoadedRules::fallback());
        };

        tracing::info!(
            %as_of,
            ?tenant_id,
            rule_set_id = %rule_set.id,
            version = %rule_set.version,
            "resolved statutory rule set"
        );
        Ok(LoadedRules {
            config: RuleConfig::default().with_overrides(&rule_set.entries),
            rule_set_id: Some(rule_set.id),
            version: rule_set.version,
        })
    }
}
