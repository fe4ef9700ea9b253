//! Datapoints and time series.
use std::fmt;

use crate::{Error, MetricId, Tags};

/// A value that can be turned into a datapoint value.
///
/// Implemented for the primitive numeric types and for strings holding a number, so readings taken from text sources
/// can be passed through as-is.
pub trait ToValue {
    /// Converts `self` into a finite `f64`.
    ///
    /// # Errors
    ///
    /// If the value is not numeric, or is not finite, an error variant will be returned.
    fn to_value(&self) -> Result<f64, Error>;
}

fn finite(value: f64) -> Result<f64, Error> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(Error::InvalidValue(value.to_string()))
    }
}

macro_rules! impl_to_value_lossless {
    ($($t:ty),*) => {
        $(
            impl ToValue for $t {
                fn to_value(&self) -> Result<f64, Error> {
                    finite(f64::from(*self))
                }
            }
        )*
    };
}

impl_to_value_lossless!(f64, f32, i32, u32, i16, u16, i8, u8);

macro_rules! impl_to_value_wide {
    ($($t:ty),*) => {
        $(
            impl ToValue for $t {
                #[allow(clippy::cast_precision_loss)]
                fn to_value(&self) -> Result<f64, Error> {
                    Ok(*self as f64)
                }
            }
        )*
    };
}

impl_to_value_wide!(i64, u64, isize, usize);

impl ToValue for str {
    fn to_value(&self) -> Result<f64, Error> {
        self.trim()
            .parse::<f64>()
            .map_err(|_| Error::InvalidValue(self.to_owned()))
            .and_then(finite)
    }
}

impl ToValue for &str {
    fn to_value(&self) -> Result<f64, Error> {
        (**self).to_value()
    }
}

impl ToValue for String {
    fn to_value(&self) -> Result<f64, Error> {
        self.as_str().to_value()
    }
}

/// A single measurement: the value of a metric at a point in time.
#[derive(Clone, Debug, PartialEq)]
pub struct DataPoint {
    metric: String,
    tags: Tags,
    timestamp: i64,
    value: f64,
}

impl DataPoint {
    /// Creates a new `DataPoint`.
    ///
    /// `timestamp` is in seconds since the Unix epoch. Tags may be empty here as long as the client sending the point
    /// has global tags configured; the name and tags are checked against the client's sanitize mode when sent.
    ///
    /// # Errors
    ///
    /// If the metric name or a tag key is empty, or the value is not a finite number, an error variant will be
    /// returned.
    pub fn new<N, V>(metric: N, tags: Tags, timestamp: i64, value: V) -> Result<Self, Error>
    where
        N: Into<String>,
        V: ToValue,
    {
        let value = value.to_value()?;
        let (metric, tags) = MetricId::new(metric, tags)?.into_parts();
        Ok(Self { metric, tags, timestamp, value })
    }

    /// Returns the metric name.
    pub fn metric(&self) -> &str {
        &self.metric
    }

    /// Returns the tags specific to this point.
    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    /// Returns the timestamp, in seconds since the Unix epoch.
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Returns the value.
    pub fn value(&self) -> f64 {
        self.value
    }
}

impl fmt::Display for DataPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{", self.metric)?;
        for (k, v) in &self.tags {
            write!(f, "{k}:{v}, ")?;
        }
        write!(f, "timestamp: {}, value: {}}}", self.timestamp, self.value)
    }
}

/// A time series: an identity and an ordered run of `(timestamp, value)` points.
///
/// Timestamps and values are kept in two parallel vectors, which always have the same length.
#[derive(Clone, Debug, PartialEq)]
pub struct TimeSeries {
    id: MetricId,
    timestamps: Vec<i64>,
    values: Vec<f64>,
}

impl TimeSeries {
    /// Creates an empty `TimeSeries`.
    ///
    /// # Errors
    ///
    /// If the metric name or a tag key is empty, an error variant will be returned.
    pub fn new<N>(metric: N, tags: Tags) -> Result<Self, Error>
    where
        N: Into<String>,
    {
        Ok(Self { id: MetricId::new(metric, tags)?, timestamps: Vec::new(), values: Vec::new() })
    }

    /// Creates a `TimeSeries` from existing timestamps and values.
    ///
    /// # Errors
    ///
    /// If the two sequences have different lengths, or the identity is invalid, an error variant will be returned.
    pub fn from_points<N>(
        metric: N,
        tags: Tags,
        timestamps: Vec<i64>,
        values: Vec<f64>,
    ) -> Result<Self, Error>
    where
        N: Into<String>,
    {
        if timestamps.len() != values.len() {
            return Err(Error::InvalidArgument(format!(
                "length of timestamps ({}) and values ({}) must be equal",
                timestamps.len(),
                values.len()
            )));
        }

        Ok(Self { id: MetricId::new(metric, tags)?, timestamps, values })
    }

    pub(crate) fn from_response(id: MetricId, points: Vec<(i64, f64)>) -> Self {
        let (timestamps, values) = points.into_iter().unzip();
        Self { id, timestamps, values }
    }

    /// Appends a point to the series.
    ///
    /// # Errors
    ///
    /// If the value is not a finite number, an error variant will be returned and the series is left untouched.
    pub fn add_point<V: ToValue>(&mut self, timestamp: i64, value: V) -> Result<(), Error> {
        let value = value.to_value()?;
        self.timestamps.push(timestamp);
        self.values.push(value);
        Ok(())
    }

    /// Returns the identity of the series.
    pub fn id(&self) -> &MetricId {
        &self.id
    }

    /// Returns the metric name.
    pub fn metric(&self) -> &str {
        self.id.name()
    }

    /// Returns the tags.
    pub fn tags(&self) -> &Tags {
        self.id.tags()
    }

    /// Returns the timestamps.
    pub fn timestamps(&self) -> &[i64] {
        &self.timestamps
    }

    /// Returns the values.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Returns an iterator over the `(timestamp, value)` points.
    pub fn points(&self) -> impl ExactSizeIterator<Item = (i64, f64)> + '_ {
        self.timestamps.iter().copied().zip(self.values.iter().copied())
    }

    /// Returns the number of points.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Returns `true` if the series has no points.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

impl fmt::Display for TimeSeries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.id.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags() -> Tags {
        [("a".to_owned(), "b".to_owned())].into_iter().collect()
    }

    #[test]
    fn string_values_are_coerced() {
        let dp = DataPoint::new("m", tags(), 1000, "3.14").unwrap();
        assert_eq!(dp.value(), 3.14);

        let dp = DataPoint::new("m", tags(), 1000, String::from(" 42 ")).unwrap();
        assert_eq!(dp.value(), 42.0);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(DataPoint::new("m", tags(), 1000, "abc"), Err(Error::InvalidValue(_))));
        assert!(matches!(DataPoint::new("m", tags(), 1000, f64::NAN), Err(Error::InvalidValue(_))));
        assert!(matches!(DataPoint::new("m", tags(), 1000, "inf"), Err(Error::InvalidValue(_))));
    }

    #[test]
    fn numeric_values() {
        assert_eq!(DataPoint::new("m", tags(), 1, 7u64).unwrap().value(), 7.0);
        assert_eq!(DataPoint::new("m", tags(), 1, -7i32).unwrap().value(), -7.0);
        assert_eq!(DataPoint::new("m", tags(), 1, 0.5f32).unwrap().value(), 0.5);
    }

    #[test]
    fn datapoint_display() {
        let dp = DataPoint::new("m", tags(), 1000, 1.5).unwrap();
        assert_eq!(dp.to_string(), "m{a:b, timestamp: 1000, value: 1.5}");
    }

    #[test]
    fn series_lengths_must_match() {
        assert!(TimeSeries::from_points("m", tags(), vec![1, 2], vec![1.0]).is_err());

        let series = TimeSeries::from_points("m", tags(), vec![1, 2], vec![1.0, 2.0]).unwrap();
        assert_eq!(series.len(), 2);
    }

    #[test]
    fn add_point_keeps_sequences_aligned() {
        let mut series = TimeSeries::new("m", tags()).unwrap();
        series.add_point(1, 1.0).unwrap();
        series.add_point(2, "2.5").unwrap();
        assert!(series.add_point(3, "nope").is_err());

        assert_eq!(series.timestamps(), &[1, 2]);
        assert_eq!(series.values(), &[1.0, 2.5]);
        assert_eq!(series.points().collect::<Vec<_>>(), vec![(1, 1.0), (2, 2.5)]);
    }

    #[test]
    fn series_display_sorts_tags() {
        let mut t = tags();
        t.insert("0".to_owned(), "z".to_owned());
        let series = TimeSeries::new("cpu", t).unwrap();
        assert_eq!(series.to_string(), "cpu{0:z, a:b}");
    }
}
