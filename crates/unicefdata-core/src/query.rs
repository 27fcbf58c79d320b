//! Resolved query types.
//!
//! - [`DataflowRef`] - Fully qualified dataflow (agency, id, version)
//! - [`FilterSet`] - Per-dimension code selections, already resolved to SDMX codes
//! - [`QueryKey`] - An immutable SDMX data query; its signature is the cache key

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// A fully qualified dataflow reference.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DataflowRef {
    /// Maintenance agency.
    pub agency: String,
    /// Dataflow id, e.g. `CME`.
    pub id: String,
    /// Dataflow version, e.g. `1.0`.
    pub version: String,
}

impl DataflowRef {
    /// Creates a dataflow reference.
    #[must_use]
    pub fn new(
        agency: impl Into<String>,
        id: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        Self {
            agency: agency.into(),
            id: id.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for DataflowRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.agency, self.id, self.version)
    }
}

/// Per-dimension selections resolved to SDMX codes.
///
/// A dimension absent from the map, or mapped to an empty set, is
/// unconstrained.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSet {
    selections: BTreeMap<String, BTreeSet<String>>,
}

impl FilterSet {
    /// Creates an empty (unconstrained) filter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Constrains a dimension to the given codes, replacing any earlier
    /// selection for it.
    pub fn set<I, S>(&mut self, dimension: impl Into<String>, codes: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selections
            .insert(dimension.into(), codes.into_iter().map(Into::into).collect());
    }

    /// Builder form of [`FilterSet::set`].
    #[must_use]
    pub fn with<I, S>(mut self, dimension: impl Into<String>, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set(dimension, codes);
        self
    }

    /// Codes selected for a dimension, if constrained.
    #[must_use]
    pub fn get(&self, dimension: &str) -> Option<&BTreeSet<String>> {
        self.selections.get(dimension).filter(|s| !s.is_empty())
    }

    /// Iterates constrained dimensions in id order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &BTreeSet<String>)> {
        self.selections.iter().filter(|(_, s)| !s.is_empty())
    }

    /// Returns true if no dimension is constrained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

/// A fully resolved SDMX data query.
///
/// Built once by the query builder and never mutated. Two keys built from
/// the same logical inputs have byte-identical [`QueryKey::signature`]s.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryKey {
    dataflow: DataflowRef,
    key: String,
    start_period: Option<i32>,
    end_period: Option<i32>,
}

impl QueryKey {
    /// Creates a query key.
    #[must_use]
    pub fn new(
        dataflow: DataflowRef,
        key: impl Into<String>,
        bounds: Option<(i32, i32)>,
    ) -> Self {
        Self {
            dataflow,
            key: key.into(),
            start_period: bounds.map(|(s, _)| s),
            end_period: bounds.map(|(_, e)| e),
        }
    }

    /// The dataflow queried.
    #[must_use]
    pub const fn dataflow(&self) -> &DataflowRef {
        &self.dataflow
    }

    /// The dot-separated dimension key, e.g. `BRA+IND.CME_MRY0T4._T`.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// First period requested, if bounded.
    #[must_use]
    pub const fn start_period(&self) -> Option<i32> {
        self.start_period
    }

    /// Last period requested, if bounded.
    #[must_use]
    pub const fn end_period(&self) -> Option<i32> {
        self.end_period
    }

    /// Path and query string relative to the REST root, without any
    /// format parameters. Used as the response cache key.
    #[must_use]
    pub fn signature(&self) -> String {
        let mut sig = format!("data/{}/{}", self.dataflow, self.key);
        let mut params = Vec::new();
        if let Some(start) = self.start_period {
            params.push(format!("startPeriod={start}"));
        }
        if let Some(end) = self.end_period {
            params.push(format!("endPeriod={end}"));
        }
        if !params.is_empty() {
            sig.push('?');
            sig.push_str(&params.join("&"));
        }
        sig
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.signature())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_with_and_without_bounds() {
        let flow = DataflowRef::new("UNICEF", "CME", "1.0");
        let bounded = QueryKey::new(flow.clone(), "BRA.CME_MRY0T4._T", Some((2015, 2023)));
        assert_eq!(
            bounded.signature(),
            "data/UNICEF,CME,1.0/BRA.CME_MRY0T4._T?startPeriod=2015&endPeriod=2023"
        );

        let open = QueryKey::new(flow, ".CME_MRY0T4._T", None);
        assert_eq!(open.signature(), "data/UNICEF,CME,1.0/.CME_MRY0T4._T");
        assert_eq!(open.start_period(), None);
    }

    #[test]
    fn test_filter_set_ignores_empty_selections() {
        let filters = FilterSet::new()
            .with("SEX", ["F", "M"])
            .with("RESIDENCE", Vec::<String>::new());
        assert!(filters.get("RESIDENCE").is_none());
        assert_eq!(filters.get("SEX").map(BTreeSet::len), Some(2));
        assert_eq!(filters.iter().count(), 1);
        assert!(FilterSet::new().is_empty());
    }
}
