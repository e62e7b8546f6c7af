use crate::parser::types::DEFAULT_ENTRY_TIMEOUT_MS;
use crate::runner::wait::{DEFAULT_POLL_INTERVAL_MS, DEFAULT_WAIT_TIMEOUT_MS};

/// Engine timing configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Poll cadence for waits (ms)
    pub poll_interval_ms: u64,

    /// Timeout for a waitFor step that does not set one (ms)
    pub wait_timeout_ms: u64,

    /// Entry budget for states that do not set one (ms)
    pub entry_timeout_ms: u64,

    /// Budget for a single click/hover/keyPress/evaluate/screenshot call (ms)
    pub action_timeout_ms: u64,

    /// Budget for a navigation (ms)
    pub navigation_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            wait_timeout_ms: DEFAULT_WAIT_TIMEOUT_MS,
            entry_timeout_ms: DEFAULT_ENTRY_TIMEOUT_MS,
            action_timeout_ms: 5_000,
            navigation_timeout_ms: 30_000,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `LUMI_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let read = |key: &str, target: &mut u64| {
            if let Some(value) = lookup(key) {
                match value.trim().parse::<u64>() {
                    Ok(ms) if ms > 0 => *target = ms,
                    _ => log::warn!("Ignoring invalid {}={}", key, value),
                }
            }
        };

        read("LUMI_POLL_INTERVAL_MS", &mut config.poll_interval_ms);
        read("LUMI_WAIT_TIMEOUT_MS", &mut config.wait_timeout_ms);
        read("LUMI_ENTRY_TIMEOUT_MS", &mut config.entry_timeout_ms);
        read("LUMI_ACTION_TIMEOUT_MS", &mut config.action_timeout_ms);
        read("LUMI_NAV_TIMEOUT_MS", &mut config.navigation_timeout_ms);
        config
    }
}

/// Parse boolean-ish environment values ("1", "true", "yes", "on")
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.wait_timeout_ms, 10_000);
        assert_eq!(config.entry_timeout_ms, 60_000);
    }

    #[test]
    fn test_env_overrides_and_invalid_values() {
        let env: HashMap<&str, &str> = [
            ("LUMI_POLL_INTERVAL_MS", "100"),
            ("LUMI_WAIT_TIMEOUT_MS", "soon"),
            ("LUMI_NAV_TIMEOUT_MS", "0"),
        ]
        .into_iter()
        .collect();
        let config = EngineConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.poll_interval_ms, 100);
        assert_eq!(config.wait_timeout_ms, 10_000);
        assert_eq!(config.navigation_timeout_ms, 30_000);
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag("off"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}
