use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{QuarryError, Result};

/// Engine-wide knobs shared by metadata derivation and pipeline execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Capacity of every bounded row channel between two execution units.
    pub channel_capacity: usize,
    /// Row estimate for scans whose table carries no statistics.
    pub default_scan_row_count: f64,
    /// Fan-out assumed for hash/range exchanges that do not declare one.
    pub default_split_count: usize,
    /// Whether metadata queries memoize results per (node, kind, arguments).
    pub metadata_cache_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
            default_scan_row_count: 100.0,
            default_split_count: 4,
            metadata_cache_enabled: true,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `QUARRY_*` environment variables.
    ///
    /// Unparseable values are ignored and the default is kept.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env();
        cfg
    }

    /// Loads a JSON config file, then applies environment overrides.
    pub fn load_from_json(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let mut cfg: Self = serde_json::from_str(&text).map_err(|e| {
            QuarryError::InvalidConfig(format!("config '{}': {e}", path.display()))
        })?;
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Rejects values no execution could run with.
    pub fn validate(&self) -> Result<()> {
        if self.channel_capacity == 0 {
            return Err(QuarryError::InvalidConfig(
                "channel_capacity must be at least 1".to_string(),
            ));
        }
        if !self.default_scan_row_count.is_finite() || self.default_scan_row_count < 0.0 {
            return Err(QuarryError::InvalidConfig(format!(
                "default_scan_row_count must be a finite non-negative number, got {}",
                self.default_scan_row_count
            )));
        }
        if self.default_split_count == 0 {
            return Err(QuarryError::InvalidConfig(
                "default_split_count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    fn apply_env(&mut self) {
        if let Some(v) = std::env::var("QUARRY_CHANNEL_CAPACITY")
            .ok()
            .and_then(|x| x.parse::<usize>().ok())
        {
            self.channel_capacity = v.max(1);
        }
        if let Some(v) = std::env::var("QUARRY_DEFAULT_SCAN_ROWS")
            .ok()
            .and_then(|x| x.parse::<f64>().ok())
            .filter(|v| v.is_finite())
        {
            self.default_scan_row_count = v.max(0.0);
        }
        if let Some(v) = std::env::var("QUARRY_DEFAULT_SPLIT_COUNT")
            .ok()
            .and_then(|x| x.parse::<usize>().ok())
        {
            self.default_split_count = v.max(1);
        }
        if let Some(v) = std::env::var("QUARRY_METADATA_CACHE")
            .ok()
            .and_then(|x| parse_bool(&x))
        {
            self.metadata_cache_enabled = v;
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: EngineConfig = serde_json::from_str(r#"{"channel_capacity": 8}"#).unwrap();
        assert_eq!(cfg.channel_capacity, 8);
        assert_eq!(cfg.default_scan_row_count, 100.0);
        assert!(cfg.metadata_cache_enabled);
    }

    #[test]
    fn validate_rejects_zero_capacity() {
        let cfg = EngineConfig {
            channel_capacity: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(QuarryError::InvalidConfig(_))
        ));
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert_eq!(parse_bool("ON"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
