//! Retrieval requests.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use unicefdata_core::{Result, Shape, UnicefError, YearSelection};

/// Everything a caller can ask of [`UnicefClient::retrieve`](crate::UnicefClient::retrieve).
///
/// Filters are keyed by dimension, either by SDMX id (`WEALTH_QUINTILE`) or
/// friendly name (`wealth`), and hold friendly values or codes.
///
/// # Example
///
/// ```
/// use unicefdata::{RetrievalRequest, Shape};
///
/// let request = RetrievalRequest::indicator("NT_ANT_HAZ_NE2")
///     .countries(["BGD", "PAK"])
///     .year(2018)
///     .circa(true)
///     .sex(["female", "male"])
///     .shape(Shape::WideIndicators);
/// assert!(request.validate().is_ok());
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievalRequest {
    /// Indicator codes.
    pub indicators: Vec<String>,
    /// Dataflow to query instead of the routed one.
    pub dataflow: Option<String>,
    /// Countries, as ISO3 codes or names. Empty means every country.
    pub countries: Vec<String>,
    /// Year argument: `2015`, `2015:2020`, `2010,2015`.
    pub year: Option<String>,
    /// Pick the available year closest to `year`.
    pub circa: bool,
    /// Pick the latest available year.
    pub latest: bool,
    /// Pick the N most recent years.
    pub mrv: Option<u32>,
    /// Dimension filters.
    pub filters: BTreeMap<String, Vec<String>>,
    /// Output shape.
    pub shape: Shape,
    /// Metadata columns to join.
    pub metadata: Vec<String>,
    /// Drop no-data observations.
    pub dropna: bool,
    /// Keep only identifying columns, year, value and joined metadata.
    pub simplify: bool,
    /// Skip the response cache for this request.
    pub bypass_cache: bool,
}

impl RetrievalRequest {
    /// Creates an empty request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a request for one indicator.
    #[must_use]
    pub fn indicator(code: impl Into<String>) -> Self {
        Self::new().indicators([code])
    }

    /// Adds indicators.
    #[must_use]
    pub fn indicators<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.indicators.extend(codes.into_iter().map(Into::into));
        self
    }

    /// Pins the dataflow.
    #[must_use]
    pub fn dataflow(mut self, dataflow: impl Into<String>) -> Self {
        self.dataflow = Some(dataflow.into());
        self
    }

    /// Adds countries.
    #[must_use]
    pub fn countries<I, S>(mut self, countries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.countries.extend(countries.into_iter().map(Into::into));
        self
    }

    /// Sets the year argument.
    #[must_use]
    pub fn year(mut self, year: impl ToString) -> Self {
        self.year = Some(year.to_string());
        self
    }

    /// Sets circa matching.
    #[must_use]
    pub const fn circa(mut self, circa: bool) -> Self {
        self.circa = circa;
        self
    }

    /// Sets latest-year selection.
    #[must_use]
    pub const fn latest(mut self, latest: bool) -> Self {
        self.latest = latest;
        self
    }

    /// Selects the `n` most recent years.
    #[must_use]
    pub const fn mrv(mut self, n: u32) -> Self {
        self.mrv = Some(n);
        self
    }

    /// Filters a dimension. Repeated calls for one dimension replace the
    /// earlier values; an empty list lifts the dimension's default.
    #[must_use]
    pub fn filter<I, S>(mut self, dimension: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filters.insert(
            dimension.into(),
            values.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// Filters on sex.
    #[must_use]
    pub fn sex<I, S>(self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filter("sex", values)
    }

    /// Filters on residence.
    #[must_use]
    pub fn residence<I, S>(self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filter("residence", values)
    }

    /// Filters on wealth quintile.
    #[must_use]
    pub fn wealth<I, S>(self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filter("wealth", values)
    }

    /// Filters on age group.
    #[must_use]
    pub fn age<I, S>(self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filter("age", values)
    }

    /// Sets the output shape.
    #[must_use]
    pub const fn shape(mut self, shape: Shape) -> Self {
        self.shape = shape;
        self
    }

    /// Joins a metadata column.
    #[must_use]
    pub fn add_metadata(mut self, field: impl Into<String>) -> Self {
        self.metadata.push(field.into());
        self
    }

    /// Sets no-data dropping.
    #[must_use]
    pub const fn dropna(mut self, dropna: bool) -> Self {
        self.dropna = dropna;
        self
    }

    /// Sets column simplification.
    #[must_use]
    pub const fn simplify(mut self, simplify: bool) -> Self {
        self.simplify = simplify;
        self
    }

    /// Sets cache bypass.
    #[must_use]
    pub const fn bypass_cache(mut self, bypass: bool) -> Self {
        self.bypass_cache = bypass;
        self
    }

    /// Checks the request without touching the network and returns its
    /// year selection.
    ///
    /// # Errors
    /// Returns [`UnicefError::Validation`] naming the offending field.
    pub fn validate(&self) -> Result<YearSelection> {
        if self.indicators.is_empty() {
            return Err(UnicefError::validation(
                "indicator",
                "at least one indicator is required",
            ));
        }
        if self.indicators.iter().any(|c| c.trim().is_empty()) {
            return Err(UnicefError::validation("indicator", "empty indicator code"));
        }
        if self.dataflow.as_deref().is_some_and(|d| d.trim().is_empty()) {
            return Err(UnicefError::validation("dataflow", "empty dataflow id"));
        }
        YearSelection::parse(self.year.as_deref(), self.circa, self.latest, self.mrv)
    }
}
