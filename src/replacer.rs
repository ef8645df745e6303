//! Placeholder expansion for header values, bodies, vars and matchers
//!
//! Templates contain `{placeholder}` tokens, e.g. `X-Forwarded-Uri:
//! {http.request.uri}`. Unknown placeholders expand to the empty string; an
//! unterminated `{` is kept literally.

use crate::context::RequestContext;
use crate::matcher::host::strip_port;
use http::HeaderMap;

/// Expands placeholders in a template against a request
pub trait Replacer: Send + Sync {
    fn replace_all(&self, template: &str, ctx: &RequestContext) -> String;
}

/// The built-in `http.*` placeholder namespace
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderReplacer;

impl Replacer for PlaceholderReplacer {
    fn replace_all(&self, template: &str, ctx: &RequestContext) -> String {
        if !template.contains('{') {
            return template.to_string();
        }

        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            match after.find('}') {
                Some(end) => {
                    if let Some(value) = lookup(&after[..end], ctx) {
                        out.push_str(&value);
                    }
                    rest = &after[end + 1..];
                }
                None => {
                    out.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        out.push_str(rest);
        out
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> String {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect::<Vec<_>>()
        .join(",")
}

fn lookup(key: &str, ctx: &RequestContext) -> Option<String> {
    if let Some(name) = key.strip_prefix("http.request.header.") {
        return Some(header_value(&ctx.request.headers, name));
    }
    if let Some(name) = key.strip_prefix("http.vars.") {
        return Some(ctx.vars.get_str(name));
    }
    if let Some(name) = key.strip_prefix("http.reverse_proxy.header.") {
        return ctx
            .upstream
            .as_ref()
            .map(|resp| header_value(&resp.headers, name));
    }

    let request = &ctx.request;
    let value = match key {
        "http.request.method" => request.method.to_string(),
        "http.request.uri" => request
            .uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| "/".to_string()),
        "http.request.uri.path" => request.uri.path().to_string(),
        "http.request.uri.query" => request.uri.query().unwrap_or("").to_string(),
        "http.request.host" => strip_port(ctx.host().unwrap_or("")).to_string(),
        "http.request.hostport" => ctx.host().unwrap_or("").to_string(),
        "http.request.proto" => format!("{:?}", request.version),
        "http.request.remote" => ctx.remote_addr?.to_string(),
        "http.request.remote.host" => ctx.remote_addr?.ip().to_string(),
        "http.reverse_proxy.status_code" => ctx.upstream.as_ref()?.status.as_u16().to_string(),
        "http.reverse_proxy.status_text" => ctx
            .upstream
            .as_ref()?
            .status
            .canonical_reason()
            .unwrap_or("")
            .to_string(),
        "http.error.status_code" => ctx.error.as_ref()?.status.as_u16().to_string(),
        "http.error.status_text" => ctx
            .error
            .as_ref()?
            .status
            .canonical_reason()
            .unwrap_or("")
            .to_string(),
        "http.error.id" => ctx.error.as_ref()?.id.clone(),
        "http.error.message" => ctx.error.as_ref()?.message.clone(),
        "http.error.trace" => ctx.error.as_ref()?.trace.clone(),
        _ => return None,
    };
    Some(value)
}
