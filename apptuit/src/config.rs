//! Configuration sourced from the process environment.
//!
//! The environment is only read while building a client or reporter; the resolved values are then held as plain
//! configuration for the lifetime of that instance.
use tracing::warn;

use crate::{sanitize::validate_tags, Error, Tags};

/// Environment variable holding the API token.
pub const TOKEN_ENV: &str = "APPTUIT_API_TOKEN";
/// Environment variable holding global tags, as `key1:value1,key2:value2`.
pub const TAGS_ENV: &str = "APPTUIT_TAGS";
/// Deprecated name of [`TOKEN_ENV`], still honored.
pub const DEPRECATED_TOKEN_ENV: &str = "APPTUIT_PY_TOKEN";
/// Deprecated name of [`TAGS_ENV`], still honored.
pub const DEPRECATED_TAGS_ENV: &str = "APPTUIT_PY_TAGS";
/// Environment variable that, when truthy, disables the reporter's automatic `host` tag.
pub const DISABLE_HOST_TAG_ENV: &str = "APPTUIT_DISABLE_HOST_TAG";

/// Source of environment variables.
///
/// Abstracted so configuration resolution can be exercised without touching the real process environment.
pub trait Environment {
    /// Returns the value of the variable `key`, if set.
    fn var(&self, key: &str) -> Option<String>;
}

/// The real process environment.
#[derive(Clone, Copy, Debug, Default)]
pub struct ProcessEnvironment;

impl Environment for ProcessEnvironment {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl<F> Environment for F
where
    F: Fn(&str) -> Option<String>,
{
    fn var(&self, key: &str) -> Option<String> {
        self(key)
    }
}

fn var_with_fallback(env: &dyn Environment, key: &str, deprecated: &str) -> Option<String> {
    if let Some(value) = env.var(key).filter(|v| !v.is_empty()) {
        return Some(value);
    }

    let value = env.var(deprecated).filter(|v| !v.is_empty())?;
    warn!(deprecated, replacement = key, "Deprecated environment variable in use.");
    Some(value)
}

/// Resolves the API token: the explicit value if given, otherwise the environment.
///
/// # Errors
///
/// If no non-empty token can be found, an error variant will be returned.
pub fn resolve_token(explicit: Option<String>, env: &dyn Environment) -> Result<String, Error> {
    explicit
        .filter(|t| !t.is_empty())
        .or_else(|| var_with_fallback(env, TOKEN_ENV, DEPRECATED_TOKEN_ENV))
        .ok_or_else(|| Error::invalid_config("invalid token: no token given and none set in the environment"))
}

/// Resolves global tags: the explicit value if given, otherwise the environment, otherwise no tags.
///
/// # Errors
///
/// If the environment value cannot be parsed, an error variant will be returned.
pub fn resolve_global_tags(explicit: Option<Tags>, env: &dyn Environment) -> Result<Tags, Error> {
    if let Some(tags) = explicit {
        return Ok(tags);
    }

    match var_with_fallback(env, TAGS_ENV, DEPRECATED_TAGS_ENV) {
        Some(raw) => parse_tags(&raw),
        None => Ok(Tags::new()),
    }
}

/// Returns `true` if the environment asks for the automatic `host` tag to be left out.
pub fn host_tag_disabled(env: &dyn Environment) -> bool {
    env.var(DISABLE_HOST_TAG_ENV)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

/// Parses a `key1:value1,key2:value2` tag list.
///
/// Whitespace around pairs, keys and values is ignored, as are empty segments. The resulting tags must only use the
/// allowed character set.
///
/// # Errors
///
/// If a segment does not split into exactly one key and one value, or a tag contains a disallowed character, an error
/// variant will be returned.
pub fn parse_tags(raw: &str) -> Result<Tags, Error> {
    let mut tags = Tags::new();

    for pair in raw.split(',').map(str::trim).filter(|pair| !pair.is_empty()) {
        let mut parts = pair.split(':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(key), Some(value), None) => {
                tags.insert(key.trim().to_owned(), value.trim().to_owned());
            }
            _ => {
                return Err(Error::invalid_config(format!(
                    "invalid format for {TAGS_ENV}, failed to parse tag key-value pair '{pair}', {TAGS_ENV} \
                     should be in the format 'tag_key1:tag_val1,tag_key2:tag_val2,...,tag_keyN:tag_valN'"
                )))
            }
        }
    }

    validate_tags(&tags)?;
    Ok(tags)
}
