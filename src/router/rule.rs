//! Rule expressions compiled into matcher sets
//!
//! Parses expressions like:
//! ```text
//! Host(`api.example.com`) && PathPrefix(`/v1`) || Method(`OPTIONS`)
//! ```
//!
//! `&&` binds tighter than `||`: each `||`-separated part becomes one
//! matcher set.

use crate::error::{PipelineError, Result};
use crate::matcher::{HeaderPredicate, MatcherSet, MatcherSets, RequestMatcher};
use http::Method;

/// Compile a rule expression into matcher sets
///
/// # Examples
///
/// ```
/// use a3s_pipeline::router::rule;
///
/// let sets = rule::parse("Host(`example.com`) && PathPrefix(`/api`)").unwrap();
/// assert_eq!(sets.len(), 1);
/// ```
pub fn parse(input: &str) -> Result<MatcherSets> {
    let sets = split_outside_backticks(input, "||")
        .into_iter()
        .map(parse_set)
        .collect::<std::result::Result<Vec<_>, String>>()
        .map_err(|e| PipelineError::config("rule", format!("invalid rule '{}': {}", input, e)))?;
    Ok(MatcherSets::new(sets))
}

fn parse_set(input: &str) -> std::result::Result<MatcherSet, String> {
    let matchers = split_outside_backticks(input, "&&")
        .into_iter()
        .map(parse_matcher)
        .collect::<std::result::Result<Vec<_>, String>>()?;
    Ok(MatcherSet::new(matchers))
}

/// Split on `op`, ignoring occurrences inside backtick arguments
fn split_outside_backticks<'a>(input: &'a str, op: &str) -> Vec<&'a str> {
    let mut parts = Vec::new();
    let mut quoted = false;
    let mut start = 0;
    let mut i = 0;
    while i < input.len() {
        let rest = &input[i..];
        if rest.starts_with('`') {
            quoted = !quoted;
        } else if !quoted && rest.starts_with(op) {
            parts.push(&input[start..i]);
            i += op.len();
            start = i;
            continue;
        }
        i += rest.chars().next().map(char::len_utf8).unwrap_or(1);
    }
    parts.push(&input[start..]);
    parts
}

/// Parse a single matcher expression
fn parse_matcher(input: &str) -> std::result::Result<RequestMatcher, String> {
    let input = input.trim();

    // Name(`arg1`, `arg2`)
    let paren_start = input
        .find('(')
        .ok_or_else(|| format!("Invalid matcher syntax, expected '(': {}", input))?;
    let paren_end = input
        .rfind(')')
        .ok_or_else(|| format!("Invalid matcher syntax, expected ')': {}", input))?;
    if paren_end < paren_start {
        return Err(format!("Invalid matcher syntax: {}", input));
    }

    let name = input[..paren_start].trim();
    let args = parse_args(&input[paren_start + 1..paren_end])?;

    match name {
        "Host" => {
            if args.is_empty() {
                return Err("Host() expects at least 1 argument".to_string());
            }
            Ok(RequestMatcher::Host(
                args.iter().map(|h| h.to_ascii_lowercase()).collect(),
            ))
        }
        "Path" => {
            expect_args("Path", &args, 1)?;
            Ok(RequestMatcher::Path(vec![args[0].to_lowercase()]))
        }
        "PathPrefix" => {
            expect_args("PathPrefix", &args, 1)?;
            Ok(RequestMatcher::Path(vec![format!(
                "{}*",
                args[0].to_lowercase()
            )]))
        }
        "Method" => {
            if args.is_empty() {
                return Err("Method() expects at least 1 argument".to_string());
            }
            let methods = args
                .iter()
                .map(|m| {
                    Method::from_bytes(m.to_ascii_uppercase().as_bytes())
                        .map_err(|e| format!("invalid method '{}': {}", m, e))
                })
                .collect::<std::result::Result<Vec<_>, String>>()?;
            Ok(RequestMatcher::Method(methods))
        }
        "Header" | "Headers" => {
            expect_args(name, &args, 2)?;
            let predicate = HeaderPredicate::new(&args[0], vec![args[1].clone()])
                .map_err(|e| e.to_string())?;
            Ok(RequestMatcher::Header(vec![predicate]))
        }
        "Vars" => {
            expect_args("Vars", &args, 2)?;
            Ok(RequestMatcher::Vars(vec![(args[0].clone(), args[1].clone())]))
        }
        _ => Err(format!("Unknown matcher: {}", name)),
    }
}

fn expect_args(name: &str, args: &[String], n: usize) -> std::result::Result<(), String> {
    if args.len() != n {
        let plural = if n == 1 { "argument" } else { "arguments" };
        return Err(format!(
            "{}() expects {} {}, got {}",
            name,
            n,
            plural,
            args.len()
        ));
    }
    Ok(())
}

/// Parse backtick-delimited arguments: `arg1`, `arg2`
fn parse_args(input: &str) -> std::result::Result<Vec<String>, String> {
    let mut args = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while chars
            .peek()
            .map(|c| c.is_whitespace() || *c == ',')
            .unwrap_or(false)
        {
            chars.next();
        }

        if chars.peek().is_none() {
            break;
        }

        match chars.next() {
            Some('`') => {}
            Some(c) => return Err(format!("Expected backtick, got '{}'", c)),
            None => break,
        }

        let mut arg = String::new();
        loop {
            match chars.next() {
                Some('`') => break,
                Some(c) => arg.push(c),
                None => return Err("Unterminated backtick argument".to_string()),
            }
        }

        args.push(arg);
    }

    Ok(args)
}
