//! Vars handler — set per-request variables

use super::{Handler, Next};
use crate::context::RequestContext;
use crate::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

/// Sets each configured var. String values are expanded first.
#[derive(Debug, Clone, Default)]
pub struct VarsHandler {
    vars: BTreeMap<String, Value>,
}

impl VarsHandler {
    pub fn new(vars: BTreeMap<String, Value>) -> Self {
        Self { vars }
    }
}

#[async_trait]
impl Handler for VarsHandler {
    async fn handle(&self, ctx: &mut RequestContext, next: Next<'_>) -> Result<()> {
        for (key, value) in &self.vars {
            let key = ctx.expand(key);
            let value = match value {
                Value::String(s) => Value::String(ctx.expand(s)),
                other => other.clone(),
            };
            ctx.vars.insert(key, value);
        }
        next.run(ctx).await
    }

    fn name(&self) -> &str {
        "vars"
    }
}
