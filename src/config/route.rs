//! Route configuration — matcher sets, handlers, and response matchers

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A route: matcher sets gating an ordered list of handlers
///
/// # Example
///
/// ```toml
/// [[routes]]
/// terminal = true
///
/// [[routes.match]]
/// host = ["api.example.com"]
/// path = ["/v1*"]
///
/// [[routes.handle]]
/// handler = "static_response"
/// status_code = 200
/// body = "ok"
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Matcher sets (OR'd); empty = always matches
    #[serde(default, rename = "match", skip_serializing_if = "Vec::is_empty")]
    pub matchers: Vec<MatcherSetConfig>,

    /// Rule expression, e.g. ``Host(`a.com`) && PathPrefix(`/api`)``.
    /// `||` separates matcher sets. Mutually exclusive with `match`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,

    /// Handlers, in execution order
    #[serde(default)]
    pub handle: Vec<HandlerConfig>,

    /// Stop evaluating later routes once this one matches
    #[serde(default)]
    pub terminal: bool,
}

/// Request matchers that must all hold (AND)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatcherSetConfig {
    /// Host patterns; `*` may replace one label (`*.example.com`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub host: Vec<String>,

    /// Path globs (`/api*`, `*.php`, `/exact`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub path: Vec<String>,

    /// HTTP methods
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub method: Vec<String>,

    /// Header field → value globs; an empty list only checks presence
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub header: BTreeMap<String, Vec<String>>,

    /// Per-request variable → expected value
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vars: BTreeMap<String, String>,
}

/// A handler: its registered name plus handler-specific parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerConfig {
    /// Registered handler name (`headers`, `reverse_proxy`, ...)
    pub handler: String,

    /// Remaining fields, decoded by the handler's factory
    #[serde(flatten)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl HandlerConfig {
    /// Build a handler config from a name and a JSON object of params
    pub fn new(handler: impl Into<String>, params: serde_json::Value) -> Self {
        let params = match params {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        Self {
            handler: handler.into(),
            params,
        }
    }
}

/// Predicates over an upstream response (AND)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResponseMatcherConfig {
    /// Status classes: `2` = 2xx, `20` = 200–209, `404` = exactly 404
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub status_code: Vec<u16>,

    /// Header field → value globs; an empty list only checks presence
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, Vec<String>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_parse_minimal() {
        let toml = r#"
            [[handle]]
            handler = "static_response"
            body = "hello"
        "#;
        let route: RouteConfig = toml::from_str(toml).unwrap();
        assert!(route.matchers.is_empty());
        assert!(route.rule.is_none());
        assert!(!route.terminal);
        assert_eq!(route.handle.len(), 1);
        assert_eq!(route.handle[0].handler, "static_response");
        assert_eq!(route.handle[0].params["body"], "hello");
    }

    #[test]
    fn test_route_parse_matchers() {
        let toml = r#"
            terminal = true

            [[match]]
            host = ["api.example.com"]
            path = ["/v1*"]
            method = ["GET", "POST"]

            [match.header]
            "X-Token" = []

            [[match]]
            vars = { root = "/srv" }
        "#;
        let route: RouteConfig = toml::from_str(toml).unwrap();
        assert!(route.terminal);
        assert_eq!(route.matchers.len(), 2);
        assert_eq!(route.matchers[0].host, vec!["api.example.com"]);
        assert_eq!(route.matchers[0].method.len(), 2);
        assert!(route.matchers[0].header["X-Token"].is_empty());
        assert_eq!(route.matchers[1].vars["root"], "/srv");
    }

    #[test]
    fn test_handler_params_flattened() {
        let json = r#"{"handler":"headers","request":{"set":{"X-A":["1"]}}}"#;
        let handler: HandlerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(handler.handler, "headers");
        assert!(handler.params.contains_key("request"));
        assert!(!handler.params.contains_key("handler"));
    }

    #[test]
    fn test_handler_config_new() {
        let handler = HandlerConfig::new("vars", serde_json::json!({"root": "/srv"}));
        assert_eq!(handler.handler, "vars");
        assert_eq!(handler.params["root"], "/srv");

        let empty = HandlerConfig::new("copy_response", serde_json::Value::Null);
        assert!(empty.params.is_empty());
    }

    #[test]
    fn test_response_matcher_parse() {
        let toml = r#"
            status_code = [2, 404]
            [headers]
            "Content-Type" = ["application/json*"]
        "#;
        let matcher: ResponseMatcherConfig = toml::from_str(toml).unwrap();
        assert_eq!(matcher.status_code, vec![2, 404]);
        assert_eq!(matcher.headers["Content-Type"], vec!["application/json*"]);
    }
}
