use serde::Deserialize;

use crate::core::{Result, TrackError};

/// Change tracking configuration
///
/// Built with the setter methods, or loaded from JSON / environment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Wrap records materialized from a data source. When off, records flow
    /// through untouched and every persist is a full write.
    pub enable_tracking: bool,

    /// Chunk size used by `ChangeTracker::process_in_batches`
    pub batch_size: usize,

    /// Prefix the bundled SQL generator puts in front of table names
    pub table_prefix: Option<String>,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            enable_tracking: true,
            batch_size: 100,
            table_prefix: None,
        }
    }
}

impl TrackingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable tracking
    pub fn enable_tracking(mut self, enabled: bool) -> Self {
        self.enable_tracking = enabled;
        self
    }

    /// Set the default batch size
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Set the table prefix
    pub fn table_prefix(mut self, prefix: &str) -> Self {
        self.table_prefix = Some(prefix.to_string());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(TrackError::InvalidArgument(
                "batch_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Parse from a JSON document
    ///
    /// Missing keys keep their defaults.
    ///
    /// # Examples
    ///
    /// ```
    /// # use changetrack::TrackingConfig;
    /// let config = TrackingConfig::from_json(r#"{ "enable_tracking": false }"#).unwrap();
    /// assert!(!config.enable_tracking);
    /// assert_eq!(config.batch_size, 100);
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|err| TrackError::InvalidArgument(format!("tracking config: {}", err)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read `CHANGETRACK_ENABLE_TRACKING`, `CHANGETRACK_BATCH_SIZE` and
    /// `CHANGETRACK_TABLE_PREFIX`, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(raw) = lookup("CHANGETRACK_ENABLE_TRACKING") {
            config.enable_tracking = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                other => {
                    return Err(TrackError::InvalidArgument(format!(
                        "CHANGETRACK_ENABLE_TRACKING: expected a boolean, got '{}'",
                        other
                    )));
                }
            };
        }

        if let Some(raw) = lookup("CHANGETRACK_BATCH_SIZE") {
            config.batch_size = raw.trim().parse().map_err(|err| {
                TrackError::InvalidArgument(format!("CHANGETRACK_BATCH_SIZE: {}", err))
            })?;
        }

        if let Some(prefix) = lookup("CHANGETRACK_TABLE_PREFIX") {
            if !prefix.is_empty() {
                config.table_prefix = Some(prefix);
            }
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_builder() {
        let config = TrackingConfig::new()
            .enable_tracking(false)
            .batch_size(25)
            .table_prefix("app_");

        assert!(!config.enable_tracking);
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.table_prefix.as_deref(), Some("app_"));
    }

    #[test]
    fn test_from_json_rejects_zero_batch() {
        assert!(TrackingConfig::from_json(r#"{ "batch_size": 0 }"#).is_err());
        assert!(TrackingConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("CHANGETRACK_ENABLE_TRACKING", "off"),
            ("CHANGETRACK_BATCH_SIZE", "500"),
        ]
        .into_iter()
        .collect();

        let config =
            TrackingConfig::from_lookup(|key| vars.get(key).map(|value| value.to_string()))
                .unwrap();
        assert!(!config.enable_tracking);
        assert_eq!(config.batch_size, 500);
        assert_eq!(config.table_prefix, None);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = TrackingConfig::from_lookup(|key| {
            (key == "CHANGETRACK_ENABLE_TRACKING").then(|| "maybe".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, TrackError::InvalidArgument(_)));
    }
}
