//! Core data types for UNICEF SDMX data.
//!
//! This module defines the fundamental data structures:
//!
//! - [`ObservationRow`] - One decoded observation in long format
//! - [`ObsValue`] - A numeric observation value or the no-data sentinel
//! - [`Cell`] - A single cell of a [`ResultTable`]
//! - [`ResultTable`] - Cleaned, optionally pivoted table returned to callers
//! - [`Shape`] - Output shape of a [`ResultTable`]

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use polars::prelude::{Column, DataFrame};
use serde::{Deserialize, Serialize};

use crate::error::{Result, UnicefError};

/// SDMX id of the dataflow column in tabular payloads.
pub const DATAFLOW: &str = "DATAFLOW";
/// SDMX id of the country dimension.
pub const REF_AREA: &str = "REF_AREA";
/// SDMX id of the indicator dimension.
pub const INDICATOR: &str = "INDICATOR";
/// SDMX id of the time dimension.
pub const TIME_PERIOD: &str = "TIME_PERIOD";
/// SDMX id of the observation value.
pub const OBS_VALUE: &str = "OBS_VALUE";
/// SDMX id of the sex dimension.
pub const SEX: &str = "SEX";
/// SDMX id of the age dimension.
pub const AGE: &str = "AGE";
/// SDMX id of the wealth quintile dimension.
pub const WEALTH_QUINTILE: &str = "WEALTH_QUINTILE";
/// SDMX id of the residence dimension.
pub const RESIDENCE: &str = "RESIDENCE";
/// SDMX code for "total" in disaggregation codelists.
pub const TOTAL_CODE: &str = "_T";

/// A numeric observation value.
///
/// Every non-numeric or missing marker in a payload decodes to
/// [`ObsValue::NoData`]; rows are never dropped for carrying one.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum ObsValue {
    /// A numeric value.
    Value(f64),
    /// The no-data sentinel.
    #[default]
    NoData,
}

impl ObsValue {
    /// Normalizes a raw payload token.
    #[must_use]
    pub fn from_raw(raw: &str) -> Self {
        match raw.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => Self::Value(v),
            _ => Self::NoData,
        }
    }

    /// Returns the numeric value, if any.
    #[must_use]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Value(v) => Some(*v),
            Self::NoData => None,
        }
    }

    /// Returns true for the no-data sentinel.
    #[must_use]
    pub const fn is_no_data(&self) -> bool {
        matches!(self, Self::NoData)
    }
}

/// One observation in long format, with codes exactly as the API sent them.
///
/// The well-known columns are fields; every other dimension and attribute
/// lives in an open map keyed by its SDMX id, since the column set depends
/// on the dataflow.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ObservationRow {
    /// Dataflow id the observation came from.
    pub dataflow: String,
    /// Indicator code.
    pub indicator: String,
    /// ISO3 country (or region) code.
    pub country: String,
    /// Raw `TIME_PERIOD` value.
    pub period: String,
    /// Observation value.
    pub value: ObsValue,
    /// Remaining dimensions, keyed by SDMX id.
    pub dimensions: BTreeMap<String, String>,
    /// Attributes, keyed by SDMX id.
    pub attributes: BTreeMap<String, String>,
}

impl ObservationRow {
    /// Creates a row with the well-known columns set.
    #[must_use]
    pub fn new(
        dataflow: impl Into<String>,
        indicator: impl Into<String>,
        country: impl Into<String>,
        period: impl Into<String>,
        value: ObsValue,
    ) -> Self {
        Self {
            dataflow: dataflow.into(),
            indicator: indicator.into(),
            country: country.into(),
            period: period.into(),
            value,
            dimensions: BTreeMap::new(),
            attributes: BTreeMap::new(),
        }
    }

    /// Sets a dimension value.
    #[must_use]
    pub fn with_dimension(mut self, id: impl Into<String>, code: impl Into<String>) -> Self {
        self.dimensions.insert(id.into(), code.into());
        self
    }

    /// Sets an attribute value.
    #[must_use]
    pub fn with_attribute(mut self, id: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(id.into(), value.into());
        self
    }

    /// Year of the observation, taken from the leading digits of the period
    /// (`2015`, `2015-06`, `2015-Q1`).
    #[must_use]
    pub fn year(&self) -> Option<i32> {
        let head = self.period.trim().get(..4)?;
        if head.bytes().all(|b| b.is_ascii_digit()) {
            head.parse().ok()
        } else {
            None
        }
    }

    /// Code of a non-well-known dimension.
    #[must_use]
    pub fn dimension(&self, id: &str) -> Option<&str> {
        self.dimensions.get(id).map(String::as_str)
    }

    /// Sex code, if the dataflow has the dimension.
    #[must_use]
    pub fn sex(&self) -> Option<&str> {
        self.dimension(SEX)
    }

    /// Age code, if the dataflow has the dimension.
    #[must_use]
    pub fn age(&self) -> Option<&str> {
        self.dimension(AGE)
    }

    /// Wealth quintile code, if the dataflow has the dimension.
    #[must_use]
    pub fn wealth(&self) -> Option<&str> {
        self.dimension(WEALTH_QUINTILE)
    }

    /// Residence code, if the dataflow has the dimension.
    #[must_use]
    pub fn residence(&self) -> Option<&str> {
        self.dimension(RESIDENCE)
    }

    /// Identity of the series this observation belongs to: every
    /// dimension except time.
    #[must_use]
    pub fn series_key(&self) -> (String, String, Vec<(String, String)>) {
        (
            self.indicator.clone(),
            self.country.clone(),
            self.dimensions
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }
}

/// A single cell of a [`ResultTable`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Cell {
    /// A text value.
    Text(String),
    /// A floating point value.
    Number(f64),
    /// An integral value (years).
    Integer(i64),
    /// The no-data sentinel carried over from the source.
    NoData,
    /// A combination absent from the source, created by a pivot.
    Empty,
}

impl Cell {
    /// Creates a text cell.
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    /// Returns true for both null-like variants.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::NoData | Self::Empty)
    }

    /// Returns the text value, if this is a text cell.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns a numeric view of the cell.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            Self::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Returns the integer value, if this is an integral cell.
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<ObsValue> for Cell {
    fn from(value: ObsValue) -> Self {
        match value {
            ObsValue::Value(v) => Self::Number(v),
            ObsValue::NoData => Self::NoData,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "{s}"),
            Self::Number(v) => write!(f, "{v}"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::NoData | Self::Empty => Ok(()),
        }
    }
}

/// Output shape of a [`ResultTable`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Shape {
    /// One row per observation.
    #[default]
    Long,
    /// One column per year.
    Wide,
    /// One column per indicator.
    WideIndicators,
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Long => "long",
            Self::Wide => "wide",
            Self::WideIndicators => "wide_indicators",
        })
    }
}

impl FromStr for Shape {
    type Err = UnicefError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "long" => Ok(Self::Long),
            "wide" => Ok(Self::Wide),
            "wide_indicators" => Ok(Self::WideIndicators),
            other => Err(UnicefError::validation(
                "shape",
                format!("unknown shape '{other}' (expected long, wide or wide_indicators)"),
            )),
        }
    }
}

/// A cleaned table of results.
///
/// Carries the raw-SDMX-name to friendly-name mapping applied while
/// cleaning, so callers can trace a column back to its SDMX id, and the
/// names of columns holding SDMX attributes rather than dimensions.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResultTable {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
    column_map: BTreeMap<String, String>,
    attribute_columns: BTreeSet<String>,
    shape: Shape,
}

impl ResultTable {
    /// Creates an empty table with the given columns.
    #[must_use]
    pub fn new(columns: Vec<String>, shape: Shape) -> Self {
        Self {
            columns,
            rows: Vec::new(),
            column_map: BTreeMap::new(),
            attribute_columns: BTreeSet::new(),
            shape,
        }
    }

    /// Sets the raw-to-friendly column name mapping.
    #[must_use]
    pub fn with_column_map(mut self, column_map: BTreeMap<String, String>) -> Self {
        self.column_map = column_map;
        self
    }

    /// Marks columns as holding attributes.
    #[must_use]
    pub fn with_attribute_columns<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attribute_columns = names.into_iter().map(Into::into).collect();
        self
    }

    /// Appends a row.
    ///
    /// # Errors
    /// Returns an error if the row width does not match the column count.
    pub fn push_row(&mut self, row: Vec<Cell>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(UnicefError::Other(format!(
                "row has {} cells, table has {} columns",
                row.len(),
                self.columns.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    /// Column names in order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows in order.
    #[must_use]
    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    /// Raw SDMX id to friendly column name mapping.
    #[must_use]
    pub const fn column_map(&self) -> &BTreeMap<String, String> {
        &self.column_map
    }

    /// Returns true if the column holds an attribute.
    #[must_use]
    pub fn is_attribute(&self, name: &str) -> bool {
        self.attribute_columns.contains(name)
    }

    /// Shape of this table.
    #[must_use]
    pub const fn shape(&self) -> Shape {
        self.shape
    }

    /// Number of rows.
    #[must_use]
    pub fn height(&self) -> usize {
        self.rows.len()
    }

    /// Number of columns.
    #[must_use]
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Returns true if the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Cell at `row` in column `name`.
    #[must_use]
    pub fn get(&self, row: usize, name: &str) -> Option<&Cell> {
        let idx = self.column_index(name)?;
        self.rows.get(row)?.get(idx)
    }

    /// All cells of a column, top to bottom.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<Vec<&Cell>> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(|r| &r[idx]).collect())
    }

    /// Appends a column. `cells` must have one entry per row.
    ///
    /// # Errors
    /// Returns an error on a length mismatch or duplicate column name.
    pub fn add_column(&mut self, name: impl Into<String>, cells: Vec<Cell>) -> Result<()> {
        let name = name.into();
        if self.column_index(&name).is_some() {
            return Err(UnicefError::Other(format!("duplicate column '{name}'")));
        }
        if cells.len() != self.rows.len() {
            return Err(UnicefError::Other(format!(
                "column '{name}' has {} cells, table has {} rows",
                cells.len(),
                self.rows.len()
            )));
        }
        for (row, cell) in self.rows.iter_mut().zip(cells) {
            row.push(cell);
        }
        self.columns.push(name);
        Ok(())
    }

    /// Keeps only the named columns, in the given order. Unknown names are
    /// skipped.
    #[must_use]
    pub fn select(&self, names: &[&str]) -> Self {
        let indices: Vec<usize> = names
            .iter()
            .filter_map(|n| self.column_index(n))
            .collect();
        Self {
            columns: indices.iter().map(|&i| self.columns[i].clone()).collect(),
            rows: self
                .rows
                .iter()
                .map(|r| indices.iter().map(|&i| r[i].clone()).collect())
                .collect(),
            column_map: self.column_map.clone(),
            attribute_columns: self
                .attribute_columns
                .iter()
                .filter(|a| names.contains(&a.as_str()))
                .cloned()
                .collect(),
            shape: self.shape,
        }
    }

    /// Keeps only rows for which `keep` returns true.
    pub fn retain_rows(&mut self, mut keep: impl FnMut(&[Cell]) -> bool) {
        self.rows.retain(|r| keep(r));
    }

    /// Converts the table to a polars [`DataFrame`].
    ///
    /// Columns holding only integers become `i32`, columns holding only
    /// numbers become `f64`, everything else becomes strings. Both null-like
    /// cells become polars nulls.
    ///
    /// # Errors
    /// Returns an error if polars rejects the columns.
    pub fn to_dataframe(&self) -> Result<DataFrame> {
        let mut frame_columns = Vec::with_capacity(self.columns.len());

        for (idx, name) in self.columns.iter().enumerate() {
            let cells: Vec<&Cell> = self.rows.iter().map(|r| &r[idx]).collect();
            let non_null: Vec<&&Cell> = cells.iter().filter(|c| !c.is_null()).collect();

            let column = if !non_null.is_empty()
                && non_null.iter().all(|c| matches!(c, Cell::Integer(_)))
            {
                let values: Vec<Option<i32>> = cells
                    .iter()
                    .map(|c| c.as_i64().and_then(|v| i32::try_from(v).ok()))
                    .collect();
                Column::new(name.as_str().into(), values)
            } else if !non_null.is_empty()
                && non_null
                    .iter()
                    .all(|c| matches!(c, Cell::Number(_) | Cell::Integer(_)))
            {
                let values: Vec<Option<f64>> = cells.iter().map(|c| c.as_f64()).collect();
                Column::new(name.as_str().into(), values)
            } else {
                let values: Vec<Option<String>> = cells
                    .iter()
                    .map(|c| (!c.is_null()).then(|| c.to_string()))
                    .collect();
                Column::new(name.as_str().into(), values)
            };
            frame_columns.push(column);
        }

        DataFrame::new(frame_columns).map_err(|e| UnicefError::Other(e.to_string()))
    }
}
