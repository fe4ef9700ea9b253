//! Metric identity and the encoded-key codec.
//!
//! Some registries only understand flat string keys. For those, a metric name and its tags are packed into a single
//! key of the form `name{"k1": "v1", "k2": "v2"}`: the name followed by the tags serialized as JSON with sorted keys.
//! Sorting keeps the encoding stable regardless of tag insertion order, so registries relying on string equality
//! deduplicate the same series correctly.
use std::{
    collections::BTreeMap,
    fmt,
    io::{self, Write},
    num::NonZeroUsize,
    sync::Arc,
};

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::Error;

/// Tags attached to a metric.
///
/// A `BTreeMap` keeps iteration in key order, which the encoding and display forms rely on.
pub type Tags = BTreeMap<String, String>;

/// Default number of decoded keys retained by a [`DecodeCache`].
pub const DEFAULT_DECODE_CACHE_SIZE: usize = 4096;

/// Identity of a time series: a metric name plus its tags.
///
/// Equality and hashing are structural, so a `MetricId` can be used directly as a registry key without going through
/// the string encoding.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MetricId {
    name: String,
    tags: Tags,
}

impl MetricId {
    /// Creates a new `MetricId`.
    ///
    /// # Errors
    ///
    /// If the name or any tag key is empty, an error variant will be returned.
    pub fn new<N>(name: N, tags: Tags) -> Result<Self, Error>
    where
        N: Into<String>,
    {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::InvalidArgument("metric name cannot be empty".to_owned()));
        }
        if tags.keys().any(String::is_empty) {
            return Err(Error::InvalidArgument(format!("metric {name:?} has an empty tag key")));
        }

        Ok(Self { name, tags })
    }

    /// Creates a `MetricId` without checking the name or tags.
    pub(crate) fn new_unchecked(name: String, tags: Tags) -> Self {
        Self { name, tags }
    }

    /// Returns the metric name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the tags.
    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    /// Consumes the identity, returning the name and tags.
    pub fn into_parts(self) -> (String, Tags) {
        (self.name, self.tags)
    }

    /// Encodes this identity as a flat string key.
    ///
    /// # Errors
    ///
    /// If the tags cannot be serialized, an error variant will be returned.
    pub fn encode(&self) -> Result<String, Error> {
        encode_tags(&self.name, &self.tags)
    }
}

impl fmt::Display for MetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{", self.name)?;
        for (i, (k, v)) in self.tags.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{k}:{v}")?;
        }
        f.write_str("}")
    }
}

/// Encodes a metric name and its tags into a single string key.
///
/// # Errors
///
/// If `name` is empty, an error variant will be returned.
pub fn encode_metric(name: &str, tags: &Tags) -> Result<String, Error> {
    if name.is_empty() {
        return Err(Error::InvalidArgument("metric_name cannot be empty".to_owned()));
    }

    encode_tags(name, tags)
}

fn encode_tags(name: &str, tags: &Tags) -> Result<String, Error> {
    let mut buf = name.as_bytes().to_vec();
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, SpacedFormatter);
    tags.serialize(&mut serializer)
        .map_err(|e| Error::InvalidArgument(format!("failed to encode tags of {name:?}: {e}")))?;

    String::from_utf8(buf).map_err(|e| Error::InvalidArgument(format!("encoded metric key is not UTF-8: {e}")))
}

/// Decodes a key produced by [`encode_metric`] back into a name and tags.
///
/// Everything in front of the first `{` (trimmed) is the name, and everything from the `{` onwards is parsed as a JSON
/// object holding the tags. A key without any `{` decodes to the whole trimmed string and no tags. Numeric and boolean
/// tag values are accepted and converted to their string form.
///
/// # Errors
///
/// If the key is empty, has no name, or the tag object is not valid JSON, an error variant will be returned.
pub fn decode_metric(key: &str) -> Result<(String, Tags), Error> {
    if key.trim().is_empty() {
        return Err(Error::InvalidArgument("invalid value for encoded metric name".to_owned()));
    }

    let (name, tags) = match key.find('{') {
        None => (key.trim(), Tags::new()),
        Some(idx) => {
            let raw: BTreeMap<String, TagValue> = serde_json::from_str(&key[idx..])
                .map_err(|source| Error::Decode { key: key.to_owned(), source })?;
            let tags = raw.into_iter().map(|(k, v)| (k, v.into_string())).collect();
            (key[..idx].trim(), tags)
        }
    };

    if name.is_empty() {
        return Err(Error::InvalidArgument(format!("encoded metric name {key:?} has no name")));
    }

    Ok((name.to_owned(), tags))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TagValue {
    String(String),
    Number(serde_json::Number),
    Bool(bool),
}

impl TagValue {
    fn into_string(self) -> String {
        match self {
            TagValue::String(s) => s,
            TagValue::Number(n) => n.to_string(),
            TagValue::Bool(b) => b.to_string(),
        }
    }
}

/// JSON formatter emitting `", "` between entries and `": "` after keys, matching the key encoding used by existing
/// registries.
struct SpacedFormatter;

impl serde_json::ser::Formatter for SpacedFormatter {
    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + Write,
    {
        writer.write_all(b": ")
    }
}

/// A bounded, thread-safe memo of decoded keys.
///
/// Registries hand back the same keys on every reporting cycle, so decoding results are kept around to avoid parsing
/// the same JSON over and over. Least recently used entries are evicted once the cache is full; a hit always returns
/// exactly what a fresh decode would.
pub struct DecodeCache {
    inner: Mutex<LruCache<String, Arc<(String, Tags)>>>,
}

impl DecodeCache {
    /// Creates a new `DecodeCache` holding up to `capacity` keys.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self { inner: Mutex::new(LruCache::new(capacity)) }
    }

    /// Decodes the given key, consulting the cache first.
    ///
    /// # Errors
    ///
    /// If the key cannot be decoded, an error variant will be returned. Failures are not cached.
    pub fn decode(&self, key: &str) -> Result<Arc<(String, Tags)>, Error> {
        if let Some(decoded) = self.inner.lock().get(key) {
            return Ok(Arc::clone(decoded));
        }

        let decoded = Arc::new(decode_metric(key)?);
        self.inner.lock().put(key.to_owned(), Arc::clone(&decoded));
        Ok(decoded)
    }

    /// Returns the number of cached keys.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Returns `true` if nothing has been cached yet.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl Default for DecodeCache {
    fn default() -> Self {
        Self::new(NonZeroUsize::new(DEFAULT_DECODE_CACHE_SIZE).unwrap_or(NonZeroUsize::MIN))
    }
}
