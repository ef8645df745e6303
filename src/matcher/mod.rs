//! Request matchers — pure predicates over a request
//!
//! A route's matcher sets form a disjunction of conjunctions:
//!
//! ```text
//! MatcherSets = MatcherSet || MatcherSet || ...   (empty = always)
//! MatcherSet  = Matcher && Matcher && ...
//! ```

pub mod host;
pub mod response;

pub use response::{ResponseMatcher, StatusClass};

use crate::config::MatcherSetConfig;
use crate::context::RequestContext;
use crate::error::{PipelineError, Result};
use http::header::HeaderName;
use http::{HeaderMap, Method};

/// A single request predicate
#[derive(Debug, Clone)]
pub enum RequestMatcher {
    /// Host patterns, lowercase; one label may be `*`
    Host(Vec<String>),
    /// Path globs, lowercase
    Path(Vec<String>),
    /// HTTP methods
    Method(Vec<Method>),
    /// Header predicates
    Header(Vec<HeaderPredicate>),
    /// Per-request variables, expanded before comparison
    Vars(Vec<(String, String)>),
}

impl RequestMatcher {
    /// Check if this matcher matches the request
    pub fn matches(&self, ctx: &RequestContext) -> bool {
        match self {
            RequestMatcher::Host(patterns) => {
                let Some(host) = ctx.host() else {
                    return false;
                };
                let host = host.to_ascii_lowercase();
                host::resolve(&host, |key| {
                    host::with_port_fallback(key, &mut |candidate: &str| {
                        patterns.iter().any(|p| p == candidate).then_some(())
                    })
                })
                .is_some()
            }
            RequestMatcher::Path(patterns) => {
                let path = ctx.request.uri.path().to_lowercase();
                patterns.iter().any(|p| glob_match(p, &path))
            }
            RequestMatcher::Method(methods) => methods.contains(&ctx.request.method),
            RequestMatcher::Header(predicates) => match_headers(predicates, &ctx.request.headers),
            RequestMatcher::Vars(expected) => expected.iter().all(|(key, value)| {
                ctx.vars.get_str(&ctx.expand(key)) == ctx.expand(value)
            }),
        }
    }
}

/// A header field that must be present, optionally with a matching value
#[derive(Debug, Clone)]
pub struct HeaderPredicate {
    pub name: HeaderName,
    /// Value globs; empty means presence only
    pub patterns: Vec<String>,
}

impl HeaderPredicate {
    pub fn new(name: &str, patterns: Vec<String>) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
            PipelineError::config("header", format!("invalid header name '{}': {}", name, e))
        })?;
        Ok(Self { name, patterns })
    }

    fn matches(&self, headers: &HeaderMap) -> bool {
        let mut values = headers.get_all(&self.name).iter().peekable();
        if values.peek().is_none() {
            return false;
        }
        if self.patterns.is_empty() {
            return true;
        }
        values.any(|value| {
            value
                .to_str()
                .map(|v| self.patterns.iter().any(|p| glob_match(p, v)))
                .unwrap_or(false)
        })
    }
}

/// All predicates must hold
pub fn match_headers(predicates: &[HeaderPredicate], headers: &HeaderMap) -> bool {
    predicates.iter().all(|p| p.matches(headers))
}

/// Glob match where `*` matches any run of characters (including none)
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p = pattern.as_bytes();
    let t = text.as_bytes();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<usize> = None;
    let mut mark = 0;

    while ti < t.len() {
        if pi < p.len() && p[pi] == b'*' {
            star = Some(pi);
            mark = ti;
            pi += 1;
        } else if pi < p.len() && p[pi] == t[ti] {
            pi += 1;
            ti += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            mark += 1;
            ti = mark;
        } else {
            return false;
        }
    }

    while pi < p.len() && p[pi] == b'*' {
        pi += 1;
    }
    pi == p.len()
}

/// Matchers combined with AND
#[derive(Debug, Clone, Default)]
pub struct MatcherSet {
    matchers: Vec<RequestMatcher>,
}

impl MatcherSet {
    pub fn new(matchers: Vec<RequestMatcher>) -> Self {
        Self { matchers }
    }

    /// Compile a matcher set from configuration
    pub fn compile(config: &MatcherSetConfig) -> Result<Self> {
        let mut matchers = Vec::new();

        if !config.host.is_empty() {
            matchers.push(RequestMatcher::Host(
                config.host.iter().map(|h| h.to_ascii_lowercase()).collect(),
            ));
        }
        if !config.path.is_empty() {
            matchers.push(RequestMatcher::Path(
                config.path.iter().map(|p| p.to_lowercase()).collect(),
            ));
        }
        if !config.method.is_empty() {
            let methods = config
                .method
                .iter()
                .map(|m| {
                    Method::from_bytes(m.to_ascii_uppercase().as_bytes()).map_err(|e| {
                        PipelineError::config("method", format!("invalid method '{}': {}", m, e))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            matchers.push(RequestMatcher::Method(methods));
        }
        if !config.header.is_empty() {
            let predicates = config
                .header
                .iter()
                .map(|(name, patterns)| HeaderPredicate::new(name, patterns.clone()))
                .collect::<Result<Vec<_>>>()?;
            matchers.push(RequestMatcher::Header(predicates));
        }
        if !config.vars.is_empty() {
            matchers.push(RequestMatcher::Vars(
                config
                    .vars
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ));
        }

        Ok(Self { matchers })
    }

    /// All matchers hold (an empty set always matches)
    pub fn matches(&self, ctx: &RequestContext) -> bool {
        self.matchers.iter().all(|m| m.matches(ctx))
    }

    pub fn len(&self) -> usize {
        self.matchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }
}

/// Matcher sets combined with OR
#[derive(Debug, Clone, Default)]
pub struct MatcherSets {
    sets: Vec<MatcherSet>,
}

impl MatcherSets {
    pub fn new(sets: Vec<MatcherSet>) -> Self {
        Self { sets }
    }

    /// Compile matcher sets from configuration
    pub fn compile(configs: &[MatcherSetConfig]) -> Result<Self> {
        let sets = configs
            .iter()
            .enumerate()
            .map(|(i, c)| MatcherSet::compile(c).map_err(|e| e.at(&format!("match[{}]", i))))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { sets })
    }

    /// Any set holds; no sets means the route is unconditional
    pub fn matches(&self, ctx: &RequestContext) -> bool {
        self.sets.is_empty() || self.sets.iter().any(|s| s.matches(ctx))
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }
}
