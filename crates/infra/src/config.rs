//! Runtime configuration for the stock service.

use std::env;

/// Stock service settings.
///
/// Read from the environment with [`StockConfig::from_env`]:
///
/// | variable | default |
/// |---|---|
/// | `RXSTOCK_MAX_CONFLICT_RETRIES` | 3 |
/// | `RXSTOCK_EXPIRY_WARNING_DAYS` | 30 |
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockConfig {
    /// How many times a deduction is re-planned after losing an optimistic race.
    pub max_conflict_retries: u32,
    /// Horizon for "expiring soon" queries.
    pub expiry_warning_days: u32,
}

impl Default for StockConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: 3,
            expiry_warning_days: 30,
        }
    }
}

impl StockConfig {
    pub const MAX_CONFLICT_RETRIES_VAR: &'static str = "RXSTOCK_MAX_CONFLICT_RETRIES";
    pub const EXPIRY_WARNING_DAYS_VAR: &'static str = "RXSTOCK_EXPIRY_WARNING_DAYS";

    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset or unparsable values keep
    /// their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            max_conflict_retries: parse_or(
                &lookup,
                Self::MAX_CONFLICT_RETRIES_VAR,
                defaults.max_conflict_retries,
            ),
            expiry_warning_days: parse_or(
                &lookup,
                Self::EXPIRY_WARNING_DAYS_VAR,
                defaults.expiry_warning_days,
            ),
        }
    }
}

fn parse_or(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u32) -> u32 {
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse::<u32>() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(key, value = %raw, default, "ignoring unparsable setting");
                default
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_when_unset() {
        assert_eq!(StockConfig::from_lookup(|_| None), StockConfig::default());
    }

    #[test]
    fn reads_overrides_and_ignores_garbage() {
        let vars: HashMap<&str, &str> = HashMap::from([
            (StockConfig::MAX_CONFLICT_RETRIES_VAR, " 7 "),
            (StockConfig::EXPIRY_WARNING_DAYS_VAR, "soon"),
        ]);
        let config = StockConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.max_conflict_retries, 7);
        assert_eq!(config.expiry_warning_days, 30);
    }
}
