//! Logger routing — which named access loggers a request host writes to

use crate::config::ServerLogConfig;
use crate::matcher::host;
use std::collections::HashMap;

/// Compiled access-log routing table. Immutable after construction.
#[derive(Debug, Clone, Default)]
pub struct LoggerRouting {
    default_logger_name: String,
    logger_names: HashMap<String, String>,
    logger_mapping: HashMap<String, Vec<String>>,
    skip_hosts: Vec<String>,
    skip_unmapped_hosts: bool,
    should_log_credentials: bool,
}

impl LoggerRouting {
    pub fn new(config: &ServerLogConfig) -> Self {
        Self {
            default_logger_name: config.default_logger_name.clone(),
            logger_names: lowercase_keys(&config.logger_names),
            logger_mapping: lowercase_keys(&config.logger_mapping),
            skip_hosts: config.skip_hosts.iter().map(|h| h.to_lowercase()).collect(),
            skip_unmapped_hosts: config.skip_unmapped_hosts,
            should_log_credentials: config.should_log_credentials,
        }
    }

    /// Loggers mapped for `host`, without the default fallback
    fn mapped(&self, host: &str) -> Option<Vec<String>> {
        let host = host.to_lowercase();
        host::resolve(&host, |key| {
            let bare = host::strip_port(key);
            let multi = self
                .logger_mapping
                .get(key)
                .or_else(|| self.logger_mapping.get(bare));
            if let Some(names) = multi {
                return Some(names.clone());
            }
            self.logger_names
                .get(key)
                .or_else(|| self.logger_names.get(bare))
                .map(|name| vec![name.clone()])
        })
    }

    /// Logger names for `host`, falling back to the default logger.
    /// Empty means the request is not logged.
    pub fn logger_names_for(&self, host: &str) -> Vec<String> {
        let names = self
            .mapped(host)
            .unwrap_or_else(|| vec![self.default_logger_name.clone()]);
        names.into_iter().filter(|name| !name.is_empty()).collect()
    }

    /// Whether requests for `host` are excluded from access logging
    pub fn should_skip(&self, host: &str) -> bool {
        let lowered = host.to_lowercase();
        let bare = host::strip_port(&lowered);
        if self.skip_hosts.iter().any(|h| h == &lowered || h == bare) {
            return true;
        }
        self.skip_unmapped_hosts && self.mapped(&lowered).is_none()
    }

    pub fn should_log_credentials(&self) -> bool {
        self.should_log_credentials
    }
}

fn lowercase_keys<V: Clone>(map: &HashMap<String, V>) -> HashMap<String, V> {
    map.iter()
        .map(|(k, v)| (k.to_lowercase(), v.clone()))
        .collect()
}
