//! Access log configuration — per-host logger routing

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Server access-log configuration
///
/// # Example
///
/// ```toml
/// default_logger_name = "default"
/// skip_hosts = ["health.internal"]
///
/// [logger_mapping]
/// "*.example.com" = ["edge", "audit"]
///
/// [logger_names]
/// "legacy.example.org" = "legacy"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerLogConfig {
    /// Logger for hosts without a mapping (empty = don't log them)
    #[serde(default)]
    pub default_logger_name: String,

    /// Host → single logger name.
    /// Deprecated: use `logger_mapping`; only consulted after it misses.
    #[serde(default)]
    pub logger_names: HashMap<String, String>,

    /// Host → one or more logger names
    #[serde(default)]
    pub logger_mapping: HashMap<String, Vec<String>>,

    /// Hosts whose requests are never logged
    #[serde(default)]
    pub skip_hosts: Vec<String>,

    /// Only log hosts that resolve through a mapping
    #[serde(default)]
    pub skip_unmapped_hosts: bool,

    /// Log `Cookie`, `Authorization` and friends unredacted
    #[serde(default)]
    pub should_log_credentials: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_config() {
        let toml = r#"
            default_logger_name = "main"
            skip_hosts = ["health.local"]
            skip_unmapped_hosts = true

            [logger_mapping]
            "*.example.com" = ["edge", "audit"]

            [logger_names]
            "old.example.org" = "legacy"
        "#;
        let config: ServerLogConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.default_logger_name, "main");
        assert_eq!(config.logger_mapping["*.example.com"], vec!["edge", "audit"]);
        assert_eq!(config.logger_names["old.example.org"], "legacy");
        assert_eq!(config.skip_hosts, vec!["health.local"]);
        assert!(config.skip_unmapped_hosts);
        assert!(!config.should_log_credentials);
    }

    #[test]
    fn test_log_config_defaults() {
        let config: ServerLogConfig = toml::from_str("").unwrap();
        assert!(config.default_logger_name.is_empty());
        assert!(config.logger_mapping.is_empty());
        assert!(config.logger_names.is_empty());
        assert!(!config.skip_unmapped_hosts);
    }
}
