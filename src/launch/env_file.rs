//! Runtime environment passed to the server container

use anyhow::{bail, Context, Result};
use std::path::Path;

/// Parses a single `KEY=VALUE` assignment
pub fn parse_assignment(input: &str) -> Result<(String, String)> {
    let (key, value) = input
        .split_once('=')
        .with_context(|| format!("Expected KEY=VALUE, got '{}'", input))?;
    let key = key.trim();
    validate_key(key)?;
    Ok((key.to_string(), value.to_string()))
}

/// Parses `.env` content: `KEY=VALUE` lines, optional `export`, single or
/// double quotes, and `#` comments
pub fn parse(content: &str) -> Result<Vec<(String, String)>> {
    let mut vars = Vec::new();

    for (index, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line
            .strip_prefix("export ")
            .map(str::trim_start)
            .unwrap_or(line);

        let (key, value) = line
            .split_once('=')
            .with_context(|| format!("Line {}: expected KEY=VALUE", index + 1))?;
        let key = key.trim();
        validate_key(key).with_context(|| format!("Line {}", index + 1))?;

        let value = unquote(value.trim())
            .with_context(|| format!("Line {}: unterminated quote", index + 1))?;
        vars.push((key.to_string(), value));
    }

    Ok(vars)
}

pub fn load(path: &Path) -> Result<Vec<(String, String)>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read env file {}", path.display()))?;
    parse(&content).with_context(|| format!("Invalid env file {}", path.display()))
}

/// Merges env-file variables with explicit ones (explicit wins) into the
/// `KEY=VALUE` form the engine expects, keeping first-seen order
pub fn merge(file_vars: Vec<(String, String)>, explicit: Vec<(String, String)>) -> Vec<String> {
    let mut merged: Vec<(String, String)> = Vec::new();
    for (key, value) in file_vars.into_iter().chain(explicit) {
        match merged.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => merged.push((key, value)),
        }
    }
    merged
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect()
}

fn validate_key(key: &str) -> Result<()> {
    let mut chars = key.chars();
    let valid = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        bail!("Invalid variable name '{}'", key);
    }
    Ok(())
}

fn unquote(value: &str) -> Option<String> {
    match value.chars().next() {
        Some(quote @ ('"' | '\'')) => {
            let rest = &value[1..];
            let end = rest.find(quote)?;
            let inner = &rest[..end];
            if quote == '"' {
                Some(
                    inner
                        .replace("\\n", "\n")
                        .replace("\\\"", "\"")
                        .replace("\\\\", "\\"),
                )
            } else {
                Some(inner.to_string())
            }
        }
        _ => {
            let value = match value.find(" #") {
                Some(pos) => &value[..pos],
                None => value,
            };
            Some(value.trim_end().to_string())
        }
    }
}
