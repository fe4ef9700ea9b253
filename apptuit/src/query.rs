//! Query results.
use std::fmt;

use indexmap::IndexMap;
use serde::Deserialize;

use crate::{identity::MetricId, Error, Tags, TimeSeries};

/// The series produced by one `output(...)` statement of a query.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Output {
    series: Vec<TimeSeries>,
}

impl Output {
    /// Returns the series of this output.
    pub fn series(&self) -> &[TimeSeries] {
        &self.series
    }
}

/// Result of a query, holding one [`Output`] per named output of the query.
///
/// Outputs are kept in the order the backend returned them and can be addressed either by id or by position.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryResult {
    start: i64,
    end: Option<i64>,
    outputs: IndexMap<String, Output>,
}

impl QueryResult {
    /// Returns the start of the queried range, in seconds since the Unix epoch.
    pub fn start(&self) -> i64 {
        self.start
    }

    /// Returns the end of the queried range, if one was given.
    pub fn end(&self) -> Option<i64> {
        self.end
    }

    /// Returns the output with the given id.
    ///
    /// # Errors
    ///
    /// If no output has that id, an error variant will be returned. Outputs for which the backend returned no series
    /// are never registered, and so cannot be looked up either.
    pub fn output(&self, id: &str) -> Result<&Output, Error> {
        self.outputs.get(id).ok_or_else(|| Error::OutputNotFound(format!("{id:?}")))
    }

    /// Returns the output at the given position.
    ///
    /// # Errors
    ///
    /// If `index` is out of bounds, an error variant will be returned.
    pub fn output_at(&self, index: usize) -> Result<&Output, Error> {
        self.outputs
            .get_index(index)
            .map(|(_, output)| output)
            .ok_or_else(|| Error::OutputNotFound(format!("at index {index}")))
    }

    /// Returns an iterator over `(id, output)` pairs, in order.
    pub fn outputs(&self) -> impl ExactSizeIterator<Item = (&str, &Output)> {
        self.outputs.iter().map(|(id, output)| (id.as_str(), output))
    }

    /// Returns the number of outputs.
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    /// Returns `true` if there are no outputs.
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

impl fmt::Display for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{start: {}, end: ", self.start)?;
        if let Some(end) = self.end {
            write!(f, "{end}")?;
        }
        write!(f, ", outputs: ")?;
        for (i, id) in self.outputs.keys().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(id)?;
        }
        f.write_str("}")
    }
}

#[derive(Deserialize)]
struct RawResponse {
    #[serde(default)]
    outputs: Option<Vec<RawOutput>>,
}

#[derive(Deserialize)]
struct RawOutput {
    id: String,
    #[serde(default)]
    result: Vec<RawSeries>,
}

#[derive(Deserialize)]
struct RawSeries {
    metric: String,
    #[serde(default)]
    tags: Tags,
    #[serde(default)]
    dps: Vec<(i64, f64)>,
}

/// Parses a `/api/query` response body.
///
/// Returns `None` when the response has no outputs. Points outside of `[start, end)` are dropped; the end of the range
/// is exclusive.
pub(crate) fn parse_response(body: &[u8], start: i64, end: Option<i64>) -> Result<Option<QueryResult>, Error> {
    let raw: RawResponse = serde_json::from_slice(body)
        .map_err(|e| Error::InvalidResponse(format!("failed to parse query response: {e}")))?;

    let outputs = match raw.outputs {
        Some(outputs) if !outputs.is_empty() => outputs,
        _ => return Ok(None),
    };

    let in_range = |ts: i64| ts >= start && end.map_or(true, |end| ts < end);

    let mut result = QueryResult { start, end, outputs: IndexMap::with_capacity(outputs.len()) };
    for output in outputs {
        if output.result.is_empty() {
            continue;
        }

        let series = output
            .result
            .into_iter()
            .map(|raw| {
                let points = raw.dps.into_iter().filter(|(ts, _)| in_range(*ts)).collect();
                TimeSeries::from_response(MetricId::new_unchecked(raw.metric, raw.tags), points)
            })
            .collect();
        result.outputs.insert(output.id, Output { series });
    }

    Ok(Some(result))
}

/// Builds the `/api/query` URL for the given query and range.
pub(crate) fn query_url(endpoint: &str, query: &str, start: i64, end: Option<i64>) -> Result<url::Url, Error> {
    let mut url = url::Url::parse(&format!("{endpoint}/api/query"))
        .map_err(|e| Error::invalid_config(format!("invalid endpoint {endpoint:?}: {e}")))?;

    let q = percent_encode(query);
    let params = match end {
        Some(end) => format!("start={start}&end={end}&q={q}"),
        None => format!("start={start}&q={q}"),
    };
    url.set_query(Some(&params));

    Ok(url)
}

/// Percent-encodes every byte outside of the unreserved set, spaces included.
fn percent_encode(value: &str) -> String {
    // Form encoding already escapes a literal `+` as `%2B`, so any `+` left stands for a space.
    url::form_urlencoded::byte_serialize(value.as_bytes())
        .map(|chunk| if chunk == "+" { "%20" } else { chunk })
        .collect()
}
