//! Validation and sanitization of metric names and tags.
use std::{borrow::Cow, collections::BTreeMap, fmt, num::NonZeroUsize, str::FromStr};

use lru::LruCache;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use tracing::warn;

use crate::{Error, Tags};

const SANITIZE_CACHE_SIZE: usize = 4096;

static VALID_IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\p{L}0-9\-_./]+$").expect("valid identifier regex"));
static APPTUIT_INVALID_RUNS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\p{L}0-9\-_./]+").expect("apptuit sanitizer regex"));
static PROMETHEUS_INVALID_CHAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-zA-Z0-9_]").expect("prometheus sanitizer regex"));
static UNDERSCORE_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"_+").expect("underscore regex"));

/// How metric names and tag keys with disallowed characters are handled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum SanitizeMode {
    /// No rewriting: any disallowed character fails the operation.
    Strict,

    /// Every run of characters outside unicode letters, digits and `-_./` becomes a single `_`.
    #[default]
    Apptuit,

    /// Every character outside ASCII letters, digits and `_` becomes `_`, runs of `_` are collapsed, and names
    /// starting with a digit are prefixed with `_`.
    Prometheus,
}

impl SanitizeMode {
    /// Returns the configuration name of this mode.
    pub const fn as_str(self) -> &'static str {
        match self {
            SanitizeMode::Strict => "none",
            SanitizeMode::Apptuit => "apptuit",
            SanitizeMode::Prometheus => "prometheus",
        }
    }
}

impl fmt::Display for SanitizeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SanitizeMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(SanitizeMode::Strict),
            "apptuit" => Ok(SanitizeMode::Apptuit),
            "prometheus" => Ok(SanitizeMode::Prometheus),
            other => Err(Error::invalid_config(format!(
                "unknown sanitize mode {other:?} (expected 'none', 'apptuit' or 'prometheus')"
            ))),
        }
    }
}

/// Returns `true` if `s` only contains unicode letters, digits and `-_./`.
pub fn is_valid_identifier(s: &str) -> bool {
    VALID_IDENTIFIER.is_match(s)
}

/// Replaces every run of disallowed characters with a single `_`.
pub fn sanitize_apptuit(s: &str) -> Cow<'_, str> {
    APPTUIT_INVALID_RUNS.replace_all(s, "_")
}

/// Rewrites `s` into a name containing only ASCII letters, digits and `_`, never starting with a digit.
pub fn sanitize_prometheus(s: &str) -> Cow<'_, str> {
    let mut sanitized = PROMETHEUS_INVALID_CHAR.replace_all(s, "_").into_owned();
    if sanitized.contains("__") {
        sanitized = UNDERSCORE_RUNS.replace_all(&sanitized, "_").into_owned();
    }
    if sanitized.starts_with(|c: char| c.is_ascii_digit()) {
        sanitized.insert(0, '_');
    }

    if sanitized == s {
        Cow::Borrowed(s)
    } else {
        Cow::Owned(sanitized)
    }
}

/// Validates tags against the allowed character set.
///
/// # Errors
///
/// If any tag key or value contains a disallowed character, an error variant naming it will be returned.
pub fn validate_tags(tags: &Tags) -> Result<(), Error> {
    for (key, value) in tags {
        if !is_valid_identifier(key) {
            return Err(Error::InvalidIdentifier { kind: "tag key", value: key.clone() });
        }
        if !is_valid_identifier(value) {
            return Err(Error::InvalidIdentifier { kind: "tag value", value: value.clone() });
        }
    }
    Ok(())
}

/// Applies a [`SanitizeMode`] to names and tags.
///
/// Sanitized results are memoized, since the same metric names show up on every send.
pub struct Sanitizer {
    mode: SanitizeMode,
    cache: Mutex<LruCache<String, String>>,
}

impl Sanitizer {
    /// Creates a new `Sanitizer` for the given mode.
    pub fn new(mode: SanitizeMode) -> Self {
        let capacity = NonZeroUsize::new(SANITIZE_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN);
        Self { mode, cache: Mutex::new(LruCache::new(capacity)) }
    }

    /// Returns the configured mode.
    pub fn mode(&self) -> SanitizeMode {
        self.mode
    }

    /// Resolves the effective form of a metric name or tag key.
    ///
    /// In strict mode the input is validated and returned unchanged; otherwise it is rewritten.
    ///
    /// # Errors
    ///
    /// In strict mode, if `s` contains a disallowed character, an error variant will be returned.
    pub fn apply(&self, kind: &'static str, s: &str) -> Result<String, Error> {
        let rewrite: fn(&str) -> Cow<'_, str> = match self.mode {
            SanitizeMode::Strict => {
                return if is_valid_identifier(s) {
                    Ok(s.to_owned())
                } else {
                    Err(Error::InvalidIdentifier { kind, value: s.to_owned() })
                };
            }
            SanitizeMode::Apptuit => sanitize_apptuit,
            SanitizeMode::Prometheus => sanitize_prometheus,
        };

        if let Some(sanitized) = self.cache.lock().get(s) {
            return Ok(sanitized.clone());
        }

        let sanitized = rewrite(s).into_owned();
        self.cache.lock().put(s.to_owned(), sanitized.clone());
        Ok(sanitized)
    }

    /// Resolves the effective tag set.
    ///
    /// Tag keys go through [`Sanitizer::apply`]. Tag values are only checked in strict mode and are otherwise passed
    /// through untouched. When distinct keys sanitize to the same key, the value of the last key in sort order is kept.
    ///
    /// # Errors
    ///
    /// In strict mode, if any key or value contains a disallowed character, an error variant will be returned.
    pub fn apply_tags(&self, tags: Tags) -> Result<Tags, Error> {
        if self.mode == SanitizeMode::Strict {
            validate_tags(&tags)?;
            return Ok(tags);
        }

        let mut sanitized = Tags::new();
        let mut origins = BTreeMap::new();
        for (key, value) in tags {
            let clean = self.apply("tag key", &key)?;
            if let Some(previous) = origins.insert(clean.clone(), key.clone()) {
                warn!(%previous, %key, sanitized = %clean, "Tag keys collide once sanitized, keeping the last one.");
            }
            sanitized.insert(clean, value);
        }

        Ok(sanitized)
    }
}
