//! log_append handler — attach a field to the request's access log

use super::{Handler, Next};
use crate::context::RequestContext;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogAppendConfig {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

/// Adds an expanded field once the rest of the chain has run, so the value
/// can refer to anything the chain produced.
#[derive(Debug, Clone)]
pub struct LogAppend {
    key: String,
    value: String,
}

impl LogAppend {
    pub fn from_config(config: LogAppendConfig) -> Self {
        Self {
            key: config.key,
            value: config.value,
        }
    }
}

#[async_trait]
impl Handler for LogAppend {
    async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> Result<()> {
        let result = next.run(ctx).await;
        let value = ctx.expand(&self.value);
        ctx.log_fields.add(self.key.clone(), value);
        result
    }

    fn name(&self) -> &str {
        "log_append"
    }
}
