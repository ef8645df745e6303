//! Response matchers — predicates over a status code and response headers

use super::{match_headers, HeaderPredicate};
use crate::config::ResponseMatcherConfig;
use crate::error::{PipelineError, Result};
use http::{HeaderMap, StatusCode};

/// A status code class.
///
/// The number of digits selects the granularity: `2` matches 2xx, `20`
/// matches 200–209, `404` matches exactly 404.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusClass {
    code: u16,
}

impl StatusClass {
    pub fn new(code: u16) -> Result<Self> {
        if code == 0 || code > 999 {
            return Err(PipelineError::config(
                "status_code",
                format!("invalid status class {}", code),
            ));
        }
        Ok(Self { code })
    }

    pub fn matches(&self, status: StatusCode) -> bool {
        let status = status.as_u16();
        match self.code {
            1..=9 => status / 100 == self.code,
            10..=99 => status / 10 == self.code,
            _ => status == self.code,
        }
    }
}

/// Status classes (OR) and header predicates (AND), combined with AND
#[derive(Debug, Clone, Default)]
pub struct ResponseMatcher {
    status: Vec<StatusClass>,
    headers: Vec<HeaderPredicate>,
}

impl ResponseMatcher {
    pub fn new(status: Vec<StatusClass>, headers: Vec<HeaderPredicate>) -> Self {
        Self { status, headers }
    }

    pub fn compile(config: &ResponseMatcherConfig) -> Result<Self> {
        let status = config
            .status_code
            .iter()
            .map(|c| StatusClass::new(*c))
            .collect::<Result<Vec<_>>>()?;
        let headers = config
            .headers
            .iter()
            .map(|(name, patterns)| HeaderPredicate::new(name, patterns.clone()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { status, headers })
    }

    /// An empty status list accepts any status
    pub fn matches(&self, status: StatusCode, headers: &HeaderMap) -> bool {
        let status_ok = self.status.is_empty() || self.status.iter().any(|c| c.matches(status));
        status_ok && match_headers(&self.headers, headers)
    }
}
