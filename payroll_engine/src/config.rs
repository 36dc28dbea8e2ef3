//! Server configuration.

use std::path::PathBuf;

use crate::idempotency::DEFAULT_STALE_WINDOW_SECS;
use crate::resolver::DEFAULT_JURISDICTION;

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
pub const DEFAULT_RULES_DIR: &str = "rules";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind_addr: String,
    /// Directory of `*.json` rule-set files seeded at startup.
    pub rules_dir: PathBuf,
    pub idempotency_stale_secs: i64,
    pub jurisdiction: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            rules_dir: PathBuf::from(DEFAULT_RULES_DIR),
            idempotency_stale_secs: DEFAULT_STALE_WINDOW_SECS,
            jurisdiction: DEFAULT_JURISDICTION.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Variables:
    /// - `PAYROLL_BIND_ADDR` (default: `127.0.0.1:3000`)
    /// - `PAYROLL_RULES_DIR` (default: `rules`)
    /// - `PAYROLL_IDEMPOTENCY_STALE_SECS` (default: 300)
    /// - `PAYROLL_JURISDICTION` (default: `mainland`)
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source.  Unset or blank variables take
    /// their default; malformed numbers are logged and defaulted.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let idempotency_stale_secs = match var("PAYROLL_IDEMPOTENCY_STALE_SECS") {
            None => defaults.idempotency_stale_secs,
            Some(raw) => match raw.parse::<i64>() {
                Ok(secs) if secs > 0 => secs,
                _ => {
                    tracing::warn!(value = %raw, "invalid PAYROLL_IDEMPOTENCY_STALE_SECS; using default");
                    defaults.idempotency_stale_secs
                }
            },
        };

        Self {
            bind_addr: var("PAYROLL_BIND_ADDR").unwrap_or(defaults.bind_addr),
            rules_dir: var("PAYROLL_RULES_DIR").map(PathBuf::from).unwrap_or(defaults.rules_dir),
            idempotency_stale_secs,
            jurisdiction: var("PAYROLL_JURISDICTION").unwrap_or(defaults.jurisdiction),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_pairs(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults_when_unset() {
        assert_eq!(from_pairs(&[]), Config::default());
        assert_eq!(Config::default().idempotency_stale_secs, 300);
    }

    #[test]
    fn test_overrides() {
        let config = from_pairs(&[
            ("PAYROLL_BIND_ADDR", "0.0.0.0:8080"),
            ("PAYROLL_RULES_DIR", "/etc/payroll/rules"),
            ("PAYROLL_IDEMPOTENCY_STALE_SECS", "60"),
            ("PAYROLL_JURISDICTION", "zanzibar"),
        ]);
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.rules_dir, PathBuf::from("/etc/payroll/rules"));
        assert_eq!(config.idempotency_stale_secs, 60);
        assert_eq!(config.jurisdiction, "zanzibar");
    }

    #[test]
    fn test_malformed_values_fall_back() {
        let config = from_pairs(&[("PAYROLL_IDEMPOTENCY_STALE_SECS", "five minutes"), ("PAYROLL_BIND_ADDR", "  ")]);
        assert_eq!(config.idempotency_stale_secs, 300);
        assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR);

        let negative = from_pairs(&[("PAYROLL_IDEMPOTENCY_STALE_SECS", "-5")]);
        assert_eq!(negative.idempotency_stale_secs, 300);
    }
}
