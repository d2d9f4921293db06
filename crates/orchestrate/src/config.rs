//! Engine configuration: defaults plus `KEEL_*` environment overrides.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Delay before re-running a pass deferred by a closed gate
    pub gate_retry: Duration,
    /// When false, every autoscaler policy is forced to update mode `Off`
    pub autoscaling_enabled: bool,
    /// Requeue interval after a converged pass
    pub resync: Duration,
    /// Requeue interval after a failed pass
    pub error_requeue: Duration,
    /// Pending-delta bound of the read cache ingest loop
    pub cache_cap: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gate_retry: Duration::from_secs(1),
            autoscaling_enabled: false,
            resync: Duration::from_secs(300),
            error_requeue: Duration::from_secs(10),
            cache_cap: 4096,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unset or unparsable values keep the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        let num = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());
        Self {
            gate_retry: num("KEEL_GATE_RETRY_MS").map(Duration::from_millis).unwrap_or(d.gate_retry),
            autoscaling_enabled: lookup("KEEL_ENABLE_AUTOSCALING")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(d.autoscaling_enabled),
            resync: num("KEEL_RESYNC_SECS").map(Duration::from_secs).unwrap_or(d.resync),
            error_requeue: num("KEEL_ERROR_REQUEUE_SECS").map(Duration::from_secs).unwrap_or(d.error_requeue),
            cache_cap: num("KEEL_CACHE_CAP").map(|n| n as usize).filter(|n| *n > 0).unwrap_or(d.cache_cap),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn lookup_overrides_and_falls_back() {
        let env: HashMap<&str, &str> =
            [("KEEL_GATE_RETRY_MS", "250"), ("KEEL_ENABLE_AUTOSCALING", "TRUE"), ("KEEL_RESYNC_SECS", "soon")].into();
        let cfg = EngineConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.gate_retry, Duration::from_millis(250));
        assert!(cfg.autoscaling_enabled);
        assert_eq!(cfg.resync, EngineConfig::default().resync);
    }

    #[test]
    fn autoscaling_is_off_by_default() {
        let cfg = EngineConfig::from_lookup(|_| None);
        assert_eq!(cfg, EngineConfig::default());
        assert!(!cfg.autoscaling_enabled);
        assert_eq!(cfg.gate_retry, Duration::from_secs(1));
    }
}
