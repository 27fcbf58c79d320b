//! Post-hoc filtering of result tables.

use std::collections::{BTreeMap, BTreeSet};

use unicefdata_core::{Cell, Result, ResultTable, UnicefError, YearSelection};

use crate::shaper::{COUNTRY_COLUMN, INDICATOR_COLUMN, YEAR_COLUMN};

/// Row filter over a cleaned table. Conditions combine with AND; values
/// within one condition combine with OR.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TableFilter {
    columns: BTreeMap<String, BTreeSet<String>>,
    years: Option<YearSelection>,
}

impl TableFilter {
    /// Creates a filter keeping every row.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps rows whose `column` reads as one of `values`.
    #[must_use]
    pub fn column<I, S>(mut self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns
            .entry(column.into())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    /// Keeps the given countries.
    #[must_use]
    pub fn countries<I, S>(self, countries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.column(COUNTRY_COLUMN, countries)
    }

    /// Keeps the given indicators.
    #[must_use]
    pub fn indicators<I, S>(self, indicators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.column(INDICATOR_COLUMN, indicators)
    }

    /// Keeps years admitted by an explicit year list or range.
    #[must_use]
    pub fn years(mut self, years: YearSelection) -> Self {
        self.years = Some(years);
        self
    }

    /// Applies the filter.
    ///
    /// # Errors
    /// Returns [`UnicefError::Validation`] for a column the table lacks, or
    /// for a circa, latest or most-recent selection, which need the
    /// observations rather than a table.
    pub fn apply(&self, table: &ResultTable) -> Result<ResultTable> {
        let mut conditions: Vec<(usize, &BTreeSet<String>)> = Vec::new();
        for (column, values) in &self.columns {
            let idx = table.column_index(column).ok_or_else(|| {
                UnicefError::validation("filter", format!("table has no column '{column}'"))
            })?;
            conditions.push((idx, values));
        }

        let year_idx = match &self.years {
            None | Some(YearSelection::All) => None,
            Some(years) if years.is_post_retrieval() => {
                return Err(UnicefError::validation(
                    "year",
                    format!("'{years}' cannot be applied to a table; request it at retrieval"),
                ));
            }
            Some(_) => Some(table.column_index(YEAR_COLUMN).ok_or_else(|| {
                UnicefError::validation("filter", "table has no year column")
            })?),
        };

        let mut filtered = table.clone();
        filtered.retain_rows(|row| {
            let columns_match = conditions
                .iter()
                .all(|(idx, values)| values.contains(&row[*idx].to_string()));
            let year_matches = year_idx.is_none_or(|idx| {
                year_of(&row[idx]).is_some_and(|y| self.years.as_ref().is_none_or(|s| s.admits(y)))
            });
            columns_match && year_matches
        });
        Ok(filtered)
    }
}

fn year_of(cell: &Cell) -> Option<i32> {
    match cell {
        Cell::Integer(y) => i32::try_from(*y).ok(),
        Cell::Text(period) => period.get(..4)?.parse().ok(),
        _ => None,
    }
}
