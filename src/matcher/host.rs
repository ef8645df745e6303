//! Hierarchical host resolution
//!
//! Resolves a request host (optionally `host:port`) against a host-keyed
//! table. The lookup order is:
//!
//! ```text
//! a.example.com:443   exact
//! a.example.com       port stripped
//! *.example.com:443   wildcard, first label
//! *.example.com       wildcard, port stripped
//! a.*.com:443 ...     one label at a time, left to right
//! ```
//!
//! Only one label is ever replaced with `*` per candidate, so the number of
//! lookups is linear in the number of labels.

/// Split `host:port` into its parts.
///
/// Bracketed IPv6 literals (`[::1]:8080`) are supported. Returns `None` when
/// there is no port; such input is treated as an already-bare hostname.
pub fn split_host_port(input: &str) -> Option<(&str, &str)> {
    if let Some(rest) = input.strip_prefix('[') {
        let end = rest.find(']')?;
        let host = &rest[..end];
        let port = rest[end + 1..].strip_prefix(':')?;
        return valid_port(port).then_some((host, port));
    }
    let (host, port) = input.rsplit_once(':')?;
    // more than one colon without brackets is a bare IPv6 address
    if host.contains(':') {
        return None;
    }
    valid_port(port).then_some((host, port))
}

fn valid_port(port: &str) -> bool {
    !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit())
}

/// Strip the port from `host`, if any
pub fn strip_port(host: &str) -> &str {
    split_host_port(host).map(|(h, _)| h).unwrap_or(host)
}

/// Try `key` with `lookup`, then again with its port stripped
pub fn with_port_fallback<T>(key: &str, lookup: &mut impl FnMut(&str) -> Option<T>) -> Option<T> {
    if let Some(found) = lookup(key) {
        return Some(found);
    }
    match split_host_port(key) {
        Some((bare, _)) => lookup(bare),
        None => None,
    }
}

/// Resolve `host` with `try_key`, falling back through single-label
/// wildcard substitutions.
///
/// `try_key` is called with each candidate key in order and decides what a
/// hit means (including its own port-stripping and legacy-table fallbacks).
/// Returns `None` when no candidate hits; callers supply their own default.
pub fn resolve<T>(host: &str, mut try_key: impl FnMut(&str) -> Option<T>) -> Option<T> {
    if let Some(found) = try_key(host) {
        return Some(found);
    }

    let labels: Vec<&str> = host.split('.').collect();
    for i in 0..labels.len() {
        if labels[i].is_empty() {
            continue;
        }
        let candidate = labels
            .iter()
            .enumerate()
            .map(|(j, label)| if j == i { "*" } else { label })
            .collect::<Vec<_>>()
            .join(".");
        if let Some(found) = try_key(&candidate) {
            return Some(found);
        }
    }

    None
}
