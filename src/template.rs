//! `${VAR}` substitution for the config and routes files.
//!
//! Lets a deployment ship static YAML that references values injected through the environment,
//! such as the function name or a local Lambda endpoint.

use std::iter::Peekable;
use std::str::Chars;

/// Render `input`, replacing placeholders with values from `lookup`.
///
/// Supported syntax:
/// - `${NAME}`: the variable's value; an unset variable is an error.
/// - `${NAME:-default}`: the variable's value, or `default` when it is unset or empty.
///
/// `NAME` must match `[A-Za-z_][A-Za-z0-9_]*`. A `$` not followed by `{` is copied as-is.
pub fn render_env_template_with(
    input: &str,
    mut lookup: impl FnMut(&str) -> Option<String>,
) -> anyhow::Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' || chars.peek() != Some(&'{') {
            out.push(ch);
            continue;
        }
        chars.next();

        let body = take_placeholder(&mut chars)?;
        let (name, default) = match body.split_once(":-") {
            Some((name, default)) => (name, Some(default)),
            None => (body.as_str(), None),
        };
        validate_env_name(name)?;

        let value = match (lookup(name), default) {
            (Some(value), Some(default)) if value.is_empty() => default.to_string(),
            (Some(value), _) => value,
            (None, Some(default)) => default.to_string(),
            (None, None) => anyhow::bail!("missing environment variable: {name}"),
        };
        out.push_str(&value);
    }

    Ok(out)
}

/// Renders using the process environment.
pub fn render_env_template(input: &str) -> anyhow::Result<String> {
    render_env_template_with(input, |name| std::env::var(name).ok())
}

fn take_placeholder(chars: &mut Peekable<Chars<'_>>) -> anyhow::Result<String> {
    let mut body = String::new();
    for ch in chars.by_ref() {
        if ch == '}' {
            return Ok(body);
        }
        body.push(ch);
    }
    anyhow::bail!("unterminated placeholder: ${{{body}")
}

fn validate_env_name(name: &str) -> anyhow::Result<()> {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        anyhow::bail!("empty placeholder name");
    };
    if !(first.is_ascii_alphabetic() || first == '_')
        || !chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
    {
        anyhow::bail!("invalid placeholder name: {name}");
    }
    Ok(())
}
