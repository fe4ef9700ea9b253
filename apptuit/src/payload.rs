use serde::Serialize;

use crate::{sanitize::Sanitizer, DataPoint, Error, Tags, TimeSeries};

/// Maximum number of tags, global tags included, a single point may carry.
pub const MAX_TAGS_LIMIT: usize = 25;

/// A single row of a `/api/put` request body.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PayloadRow {
    /// Effective metric name.
    pub metric: String,
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
    /// Value.
    pub value: f64,
    /// Effective tags: the global tags overlaid with the point's own tags.
    pub tags: Tags,
}

/// Turns datapoints and series into payload rows.
///
/// Building is pure: names and tags are resolved through the sanitizer, global tags are merged in underneath the
/// point's own tags, and the tag count is checked. Nothing here touches the network.
pub(crate) struct PayloadBuilder<'a> {
    global_tags: &'a Tags,
    sanitizer: &'a Sanitizer,
    max_tags: usize,
}

impl<'a> PayloadBuilder<'a> {
    pub fn new(global_tags: &'a Tags, sanitizer: &'a Sanitizer) -> Self {
        Self { global_tags, sanitizer, max_tags: MAX_TAGS_LIMIT }
    }

    #[cfg(test)]
    fn with_max_tags(mut self, max_tags: usize) -> Self {
        self.max_tags = max_tags;
        self
    }

    /// Builds one row per datapoint.
    pub fn build_points(&self, points: &[DataPoint]) -> Result<Vec<PayloadRow>, Error> {
        points
            .iter()
            .map(|dp| {
                let (metric, tags) = self.resolve(dp.metric(), dp.tags())?;
                Ok(PayloadRow { metric, timestamp: dp.timestamp(), value: dp.value(), tags })
            })
            .collect()
    }

    /// Builds one row per point of every series.
    ///
    /// The identity of each series is resolved once and shared by all of its rows.
    pub fn build_series(&self, series: &[TimeSeries]) -> Result<Vec<PayloadRow>, Error> {
        let total = series.iter().map(TimeSeries::len).sum();
        let mut rows = Vec::with_capacity(total);

        for s in series {
            let (metric, tags) = self.resolve(s.metric(), s.tags())?;
            rows.extend(s.points().map(|(timestamp, value)| PayloadRow {
                metric: metric.clone(),
                timestamp,
                value,
                tags: tags.clone(),
            }));
        }

        Ok(rows)
    }

    fn resolve(&self, metric: &str, tags: &Tags) -> Result<(String, Tags), Error> {
        let metric = self.sanitizer.apply("metric name", metric)?;
        let tags = self.sanitizer.apply_tags(merge_tags(self.global_tags, tags))?;

        if tags.is_empty() {
            return Err(Error::MissingTags { metric });
        }
        if tags.len() > self.max_tags {
            return Err(Error::TooManyTags { metric, count: tags.len(), limit: self.max_tags });
        }

        Ok((metric, tags))
    }
}

/// Overlays `local` on top of `global`: on a key collision the local value wins.
pub fn merge_tags(global: &Tags, local: &Tags) -> Tags {
    let mut merged = global.clone();
    merged.extend(local.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}
