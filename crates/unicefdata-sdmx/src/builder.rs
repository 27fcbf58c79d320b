//! SDMX query key construction.

use std::collections::BTreeSet;

use tracing::debug;
use unicefdata_core::{FilterSet, INDICATOR, QueryKey, REF_AREA, YearSelection};

use crate::structure::DataflowSchema;

/// Builds [`QueryKey`]s.
///
/// Construction is pure: the key depends only on the schema's dimension
/// order and the sets passed in, and sets are always rendered sorted, so
/// equal inputs give byte-identical keys.
#[derive(Debug, Clone, Copy, Default)]
pub struct SdmxQueryBuilder;

impl SdmxQueryBuilder {
    /// Creates a builder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// The dot-separated key: one segment per dimension in schema order,
    /// codes joined with `+`, an empty segment for an unconstrained
    /// dimension.
    #[must_use]
    pub fn key(
        &self,
        schema: &DataflowSchema,
        indicators: &BTreeSet<String>,
        countries: &BTreeSet<String>,
        filters: &FilterSet,
    ) -> String {
        schema
            .dimensions
            .iter()
            .map(|dim| {
                let codes = match dim.id.as_str() {
                    REF_AREA => Some(countries),
                    INDICATOR => Some(indicators),
                    other => filters.get(other),
                };
                codes.map_or_else(String::new, |set| {
                    set.iter().map(String::as_str).collect::<Vec<_>>().join("+")
                })
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Builds the query for one dataflow.
    ///
    /// Explicit years and ranges bound the query by period; circa, latest
    /// and most-recent selections fetch the full series.
    #[must_use]
    pub fn build(
        &self,
        schema: &DataflowSchema,
        indicators: &BTreeSet<String>,
        countries: &BTreeSet<String>,
        filters: &FilterSet,
        years: &YearSelection,
    ) -> QueryKey {
        let key = QueryKey::new(
            schema.dataflow.clone(),
            self.key(schema, indicators, countries, filters),
            years.period_bounds(),
        );
        debug!(query = %key, "built query key");
        key
    }
}
