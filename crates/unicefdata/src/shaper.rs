//! Result shaping.
//!
//! [`ResultShaper`] turns decoded observations into the table handed back to
//! callers. Stages run in a fixed order and each is exposed on its own:
//!
//! 1. [`drop_missing`] - optional removal of no-data observations
//! 2. [`select_years`] - circa, latest and most-recent selection
//! 3. [`ResultShaper::clean`] - friendly column names
//! 4. [`MetadataJoin::apply`] - country and indicator metadata
//! 5. [`simplify`] - optional column reduction
//! 6. [`ResultShaper::reshape`] - long, wide or wide-indicators layout

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use tracing::debug;
use unicefdata_core::{
    Cell, INDICATOR, OBS_VALUE, ObservationRow, REF_AREA, Result, ResultTable, Shape,
    TIME_PERIOD, UnicefError, YearSelection,
};

use crate::reference::ReferenceTable;

/// Friendly name of the indicator column.
pub const INDICATOR_COLUMN: &str = "indicator";
/// Friendly name of the country column.
pub const COUNTRY_COLUMN: &str = "country";
/// Friendly name of the year column.
pub const YEAR_COLUMN: &str = "year";
/// Friendly name of the value column.
pub const VALUE_COLUMN: &str = "value";

/// Metadata field holding the country label.
pub const COUNTRY_NAME: &str = "country_name";
/// Metadata field holding the indicator label.
pub const INDICATOR_NAME: &str = "indicator_name";

/// Disaggregation columns kept by [`simplify`] and used to group
/// wide-indicators rows.
pub const DISAGGREGATIONS: &[&str] = &["sex", "age", "wealth_quintile", "residence"];

/// Raw SDMX ids with a friendly name other than their lower-cased id.
const FRIENDLY_NAMES: &[(&str, &str)] = &[
    (REF_AREA, COUNTRY_COLUMN),
    (INDICATOR, INDICATOR_COLUMN),
    (TIME_PERIOD, YEAR_COLUMN),
    (OBS_VALUE, VALUE_COLUMN),
    ("UNIT_MEASURE", "unit"),
    ("UNIT_MULTIPLIER", "unit_multiplier"),
    ("MATERNAL_EDU_LVL", "maternal_education"),
    ("OBS_STATUS", "obs_status"),
    ("DATA_SOURCE", "data_source"),
];

/// Friendly column name for a raw SDMX id.
#[must_use]
pub fn friendly_name(raw: &str) -> String {
    FRIENDLY_NAMES
        .iter()
        .find(|(id, _)| *id == raw)
        .map_or_else(|| raw.to_lowercase(), |(_, name)| (*name).to_string())
}

/// Cell for a raw period: an integer for a plain year, text otherwise.
fn period_cell(period: &str) -> Cell {
    let period = period.trim();
    if period.len() == 4 && period.bytes().all(|b| b.is_ascii_digit()) {
        period
            .parse()
            .map_or_else(|_| Cell::text(period), Cell::Integer)
    } else if period.is_empty() {
        Cell::NoData
    } else {
        Cell::text(period)
    }
}

/// Returns true for a column name that reads as a period (`2015`, `2015-Q1`).
fn is_period_label(name: &str) -> bool {
    name.get(..4)
        .is_some_and(|head| head.bytes().all(|b| b.is_ascii_digit()))
}

/// Drops observations carrying the no-data sentinel.
#[must_use]
pub fn drop_missing(mut rows: Vec<ObservationRow>) -> Vec<ObservationRow> {
    rows.retain(|r| !r.value.is_no_data());
    rows
}

/// Applies a year selection to decoded observations.
///
/// Circa, latest and most-recent selections work per series, that is per
/// indicator, country and every other dimension. Circa keeps the year
/// closest to the target, the earlier one on a tie. Most-recent keeps the
/// N largest distinct years in descending order. Explicit years and ranges
/// drop anything outside them. Rows without a readable year survive only an
/// unconstrained selection.
#[must_use]
pub fn select_years(rows: Vec<ObservationRow>, years: &YearSelection) -> Vec<ObservationRow> {
    match years {
        YearSelection::All => rows,
        YearSelection::ExplicitSet(_) | YearSelection::Range { .. } => rows
            .into_iter()
            .filter(|r| r.year().is_some_and(|y| years.admits(y)))
            .collect(),
        YearSelection::Circa(_) | YearSelection::Latest | YearSelection::MostRecentN(_) => {
            select_per_series(rows, years)
        }
    }
}

fn select_per_series(rows: Vec<ObservationRow>, years: &YearSelection) -> Vec<ObservationRow> {
    let mut order = Vec::new();
    let mut series: HashMap<_, Vec<ObservationRow>> = HashMap::new();
    for row in rows {
        if row.year().is_none() {
            continue;
        }
        let key = row.series_key();
        if !series.contains_key(&key) {
            order.push(key.clone());
        }
        series.entry(key).or_default().push(row);
    }

    let mut selected = Vec::new();
    for key in order {
        let Some(mut group) = series.remove(&key) else {
            continue;
        };
        let available: BTreeSet<i32> = group.iter().filter_map(ObservationRow::year).collect();
        let keep: BTreeSet<i32> = match years {
            YearSelection::Circa(target) => available
                .iter()
                .min_by_key(|y| ((**y - target).abs(), **y))
                .copied()
                .into_iter()
                .collect(),
            YearSelection::Latest => available.last().copied().into_iter().collect(),
            YearSelection::MostRecentN(n) => available
                .iter()
                .rev()
                .take(usize::try_from(*n).unwrap_or(usize::MAX))
                .copied()
                .collect(),
            _ => available,
        };
        group.retain(|r| r.year().is_some_and(|y| keep.contains(&y)));
        if matches!(years, YearSelection::MostRecentN(_)) {
            group.sort_by_key(|r| std::cmp::Reverse(r.year()));
        }
        selected.extend(group);
    }
    selected
}

/// Keeps identifying columns, year, value and the named extra columns.
#[must_use]
pub fn simplify(table: &ResultTable, extra: &[String]) -> ResultTable {
    let mut keep: Vec<&str> = vec![INDICATOR_COLUMN, COUNTRY_COLUMN];
    keep.extend(DISAGGREGATIONS);
    keep.extend([YEAR_COLUMN, VALUE_COLUMN]);
    keep.extend(extra.iter().map(String::as_str));
    table.select(&keep)
}

/// Metadata columns joined onto a long table.
///
/// Known fields are [`COUNTRY_NAME`], [`INDICATOR_NAME`] and any field of
/// the attached [`ReferenceTable`]. Rows without a match get
/// [`Cell::NoData`] and are never dropped.
#[derive(Clone, Debug, Default)]
pub struct MetadataJoin {
    fields: Vec<String>,
    country_names: BTreeMap<String, String>,
    indicator_names: BTreeMap<String, String>,
    reference: Option<Arc<ReferenceTable>>,
}

impl MetadataJoin {
    /// Creates a join of the given fields, in order.
    #[must_use]
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Sets the country labels, keyed by ISO3 code.
    #[must_use]
    pub fn with_country_names(mut self, names: BTreeMap<String, String>) -> Self {
        self.country_names = names;
        self
    }

    /// Sets the indicator labels, keyed by code.
    #[must_use]
    pub fn with_indicator_names(mut self, names: BTreeMap<String, String>) -> Self {
        self.indicator_names = names;
        self
    }

    /// Attaches a reference table.
    #[must_use]
    pub fn with_reference(mut self, reference: Option<Arc<ReferenceTable>>) -> Self {
        self.reference = reference;
        self
    }

    /// Joined field names.
    #[must_use]
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Fields that depend on the country alone.
    pub fn country_fields(&self) -> impl Iterator<Item = &String> {
        self.fields.iter().filter(|f| *f != INDICATOR_NAME)
    }

    /// Checks every field is known.
    ///
    /// # Errors
    /// Returns [`UnicefError::Validation`] naming the unknown field and the
    /// available ones.
    pub fn validate(&self) -> Result<()> {
        for field in &self.fields {
            let known = field == COUNTRY_NAME
                || field == INDICATOR_NAME
                || self.reference.as_ref().is_some_and(|r| r.has_field(field));
            if !known {
                let mut available = vec![COUNTRY_NAME.to_string(), INDICATOR_NAME.to_string()];
                if let Some(reference) = &self.reference {
                    available.extend(reference.fields().iter().cloned());
                }
                return Err(UnicefError::validation(
                    "metadata",
                    format!(
                        "unknown metadata field '{field}'; available: {}",
                        available.join(", ")
                    ),
                ));
            }
        }
        Ok(())
    }

    fn lookup(&self, field: &str, country: Option<&str>, indicator: Option<&str>) -> Cell {
        let found = match field {
            COUNTRY_NAME => country.and_then(|c| self.country_names.get(c)).map(String::as_str),
            INDICATOR_NAME => indicator
                .and_then(|i| self.indicator_names.get(i))
                .map(String::as_str),
            other => self
                .reference
                .as_ref()
                .zip(country)
                .and_then(|(r, c)| r.get(c, other)),
        };
        found.map_or(Cell::NoData, Cell::text)
    }

    /// Appends the joined columns to a long table.
    ///
    /// # Errors
    /// Returns a validation error for an unknown field, or if the table
    /// already has a column of that name.
    pub fn apply(&self, mut table: ResultTable) -> Result<ResultTable> {
        self.validate()?;
        for field in &self.fields {
            let cells = (0..table.height())
                .map(|row| {
                    let country = table.get(row, COUNTRY_COLUMN).and_then(Cell::as_str);
                    let indicator = table.get(row, INDICATOR_COLUMN).and_then(Cell::as_str);
                    self.lookup(field, country, indicator)
                })
                .collect();
            table
                .add_column(field.as_str(), cells)
                .map_err(|e| UnicefError::validation("metadata", e.to_string()))?;
        }
        Ok(table)
    }
}

/// The shaping pipeline for one request.
#[derive(Clone, Debug, Default)]
pub struct ResultShaper {
    years: YearSelection,
    shape: Shape,
    dropna: bool,
    simplify: bool,
    join: MetadataJoin,
}

impl ResultShaper {
    /// Creates a shaper producing a long table with every year.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the year selection.
    #[must_use]
    pub fn with_years(mut self, years: YearSelection) -> Self {
        self.years = years;
        self
    }

    /// Sets the output shape.
    #[must_use]
    pub const fn with_shape(mut self, shape: Shape) -> Self {
        self.shape = shape;
        self
    }

    /// Sets no-data dropping.
    #[must_use]
    pub const fn with_dropna(mut self, dropna: bool) -> Self {
        self.dropna = dropna;
        self
    }

    /// Sets column simplification.
    #[must_use]
    pub const fn with_simplify(mut self, simplify: bool) -> Self {
        self.simplify = simplify;
        self
    }

    /// Sets the metadata join.
    #[must_use]
    pub fn with_metadata(mut self, join: MetadataJoin) -> Self {
        self.join = join;
        self
    }

    /// Runs every stage.
    ///
    /// No-data rows are dropped before year selection, so `latest` picks the
    /// latest year that has a value.
    ///
    /// # Errors
    /// Returns a validation error for an unknown metadata field or an
    /// ambiguous pivot.
    pub fn apply(&self, rows: Vec<ObservationRow>) -> Result<ResultTable> {
        let rows = if self.dropna { drop_missing(rows) } else { rows };
        let rows = select_years(rows, &self.years);
        let table = self.join.apply(Self::clean(&rows)?)?;
        let table = if self.simplify {
            simplify(&table, self.join.fields())
        } else {
            table
        };
        let table = self.reshape(&table)?;
        debug!(rows = table.height(), columns = table.width(), shape = %table.shape(), "shaped result");
        Ok(table)
    }

    /// Converts observations to a long table with friendly column names.
    ///
    /// Columns are indicator, country, the remaining dimensions, year, value
    /// and the attributes. A dimension or attribute a row lacks reads as
    /// [`Cell::NoData`].
    ///
    /// # Errors
    /// Returns an error only if a row cannot be added to the table.
    pub fn clean(rows: &[ObservationRow]) -> Result<ResultTable> {
        let mut dimensions: Vec<&str> = Vec::new();
        let mut attributes: Vec<&str> = Vec::new();
        for row in rows {
            for id in row.dimensions.keys() {
                if !dimensions.contains(&id.as_str()) {
                    dimensions.push(id.as_str());
                }
            }
            for id in row.attributes.keys() {
                if !attributes.contains(&id.as_str()) && !dimensions.contains(&id.as_str()) {
                    attributes.push(id.as_str());
                }
            }
        }

        let mut column_map = BTreeMap::new();
        let mut columns = Vec::new();
        let mut push = |raw: &str| {
            let name = friendly_name(raw);
            if columns.contains(&name) {
                return false;
            }
            column_map.insert(raw.to_string(), name.clone());
            columns.push(name);
            true
        };
        push(INDICATOR);
        push(REF_AREA);
        let dimensions: Vec<&str> = dimensions.into_iter().filter(|d| push(d)).collect();
        push(TIME_PERIOD);
        push(OBS_VALUE);
        let attributes: Vec<&str> = attributes.into_iter().filter(|a| push(a)).collect();

        let attribute_names: Vec<String> = attributes.iter().map(|a| friendly_name(a)).collect();
        let mut table = ResultTable::new(columns, Shape::Long)
            .with_column_map(column_map)
            .with_attribute_columns(attribute_names);

        for row in rows {
            let mut cells = Vec::with_capacity(table.width());
            cells.push(Cell::text(&row.indicator));
            cells.push(Cell::text(&row.country));
            cells.extend(
                dimensions
                    .iter()
                    .map(|d| row.dimension(d).map_or(Cell::NoData, Cell::text)),
            );
            cells.push(period_cell(&row.period));
            cells.push(Cell::from(row.value));
            cells.extend(
                attributes
                    .iter()
                    .map(|a| row.attributes.get(*a).map_or(Cell::NoData, Cell::text)),
            );
            table.push_row(cells)?;
        }
        Ok(table)
    }

    /// Lays a long table out in the configured shape.
    ///
    /// # Errors
    /// Returns [`UnicefError::Validation`] when a pivot cell would receive
    /// more than one value.
    pub fn reshape(&self, table: &ResultTable) -> Result<ResultTable> {
        match self.shape {
            Shape::Long => Ok(table.clone()),
            Shape::Wide => pivot_years(table, self.years.requested_years()),
            Shape::WideIndicators => {
                let carry: Vec<&str> = self.join.country_fields().map(String::as_str).collect();
                pivot_indicators(table, &carry)
            }
        }
    }

    /// Turns a `wide` table back into a `long` one. Only pivot filler cells
    /// are dropped; no-data observations survive.
    ///
    /// # Errors
    /// Returns [`UnicefError::Validation`] if the table is not wide.
    pub fn unpivot_years(table: &ResultTable) -> Result<ResultTable> {
        if table.shape() != Shape::Wide {
            return Err(UnicefError::validation(
                "shape",
                format!("cannot unpivot a {} table", table.shape()),
            ));
        }
        let (periods, ids): (Vec<usize>, Vec<usize>) =
            (0..table.width()).partition(|&i| is_period_label(&table.columns()[i]));

        let mut columns: Vec<String> = ids.iter().map(|&i| table.columns()[i].clone()).collect();
        columns.extend([YEAR_COLUMN.to_string(), VALUE_COLUMN.to_string()]);
        let mut long =
            ResultTable::new(columns, Shape::Long).with_column_map(table.column_map().clone());

        for row in table.rows() {
            for &p in &periods {
                if matches!(row[p], Cell::Empty) {
                    continue;
                }
                let mut cells: Vec<Cell> = ids.iter().map(|&i| row[i].clone()).collect();
                cells.push(period_cell(&table.columns()[p]));
                cells.push(row[p].clone());
                long.push_row(cells)?;
            }
        }
        Ok(long)
    }
}

/// Stable string identity of a set of cells.
fn identity(cells: &[&Cell]) -> Vec<String> {
    cells.iter().map(|c| format!("{c:?}")).collect()
}

fn ambiguous(what: &str, detail: String) -> UnicefError {
    UnicefError::validation(
        "shape",
        format!("ambiguous wide pivot, add disaggregation filter ({what} {detail})"),
    )
}

fn value_indices(table: &ResultTable) -> Result<(usize, usize)> {
    let year = table.column_index(YEAR_COLUMN);
    let value = table.column_index(VALUE_COLUMN);
    year.zip(value).ok_or_else(|| {
        UnicefError::validation("shape", "a pivot needs year and value columns")
    })
}

/// One column per year; attribute columns are dropped.
fn pivot_years(table: &ResultTable, requested: Option<Vec<i32>>) -> Result<ResultTable> {
    let (year_idx, value_idx) = value_indices(table)?;
    let ids: Vec<usize> = (0..table.width())
        .filter(|&i| i != year_idx && i != value_idx && !table.is_attribute(&table.columns()[i]))
        .collect();

    let mut labels: BTreeSet<String> = requested
        .unwrap_or_default()
        .iter()
        .map(ToString::to_string)
        .collect();

    let mut order: Vec<Vec<String>> = Vec::new();
    let mut groups: HashMap<Vec<String>, (Vec<Cell>, BTreeMap<String, Cell>)> = HashMap::new();
    let mut skipped = 0_usize;
    for row in table.rows() {
        let label = row[year_idx].to_string();
        if label.is_empty() {
            skipped += 1;
            continue;
        }
        let id_cells: Vec<&Cell> = ids.iter().map(|&i| &row[i]).collect();
        let key = identity(&id_cells);
        let (_, values) = groups.entry(key.clone()).or_insert_with(|| {
            order.push(key.clone());
            (id_cells.into_iter().cloned().collect(), BTreeMap::new())
        });
        if values.insert(label.clone(), row[value_idx].clone()).is_some() {
            return Err(ambiguous("row", format!("{} in {label}", key.join("/"))));
        }
        labels.insert(label);
    }
    if skipped > 0 {
        debug!(skipped, "rows without a year left out of the wide pivot");
    }

    let mut columns: Vec<String> = ids.iter().map(|&i| table.columns()[i].clone()).collect();
    columns.extend(labels.iter().cloned());
    let mut wide = ResultTable::new(columns, Shape::Wide).with_column_map(table.column_map().clone());
    for key in order {
        let Some((mut cells, values)) = groups.remove(&key) else {
            continue;
        };
        cells.extend(
            labels
                .iter()
                .map(|l| values.get(l).cloned().unwrap_or(Cell::Empty)),
        );
        wide.push_row(cells)?;
    }
    Ok(wide)
}

/// Latest value of one indicator in one wide row, with the series it came
/// from.
struct Slot {
    year: Cell,
    value: Cell,
    series: Vec<String>,
}

/// One column per indicator, holding the latest selected value per
/// country and disaggregation.
fn pivot_indicators(table: &ResultTable, carry: &[&str]) -> Result<ResultTable> {
    let (year_idx, value_idx) = value_indices(table)?;
    let indicator_idx = table.column_index(INDICATOR_COLUMN).ok_or_else(|| {
        UnicefError::validation("shape", "wide_indicators needs an indicator column")
    })?;

    let mut group_names = vec![COUNTRY_COLUMN];
    group_names.extend(DISAGGREGATIONS);
    group_names.extend(carry);
    let group: Vec<usize> = group_names
        .iter()
        .filter_map(|n| table.column_index(n))
        .collect();

    // Columns identifying the series behind each cell.
    let series: Vec<usize> = (0..table.width())
        .filter(|&i| i != year_idx && i != value_idx && !table.is_attribute(&table.columns()[i]))
        .collect();

    let mut indicators: BTreeSet<String> = BTreeSet::new();
    let mut order: Vec<Vec<String>> = Vec::new();
    let mut groups: HashMap<Vec<String>, (Vec<Cell>, BTreeMap<String, Slot>)> = HashMap::new();

    for row in table.rows() {
        let indicator = row[indicator_idx].to_string();
        let group_cells: Vec<&Cell> = group.iter().map(|&i| &row[i]).collect();
        let key = identity(&group_cells);
        let (_, values) = groups.entry(key.clone()).or_insert_with(|| {
            order.push(key.clone());
            (group_cells.into_iter().cloned().collect(), BTreeMap::new())
        });

        let year = row[year_idx].clone();
        let id = identity(&series.iter().map(|&i| &row[i]).collect::<Vec<_>>());
        match values.get(&indicator) {
            Some(slot) if slot.series != id => {
                return Err(ambiguous(
                    "indicator",
                    format!(
                        "{indicator} for {}: {} in {} and {} in {year}",
                        key.join("/"),
                        slot.series.join("/"),
                        slot.year,
                        id.join("/")
                    ),
                ));
            }
            Some(slot) if slot.year == year => {
                return Err(ambiguous(
                    "indicator",
                    format!("{indicator} for {} in {year}", key.join("/")),
                ));
            }
            Some(slot) if slot.year.to_string() > year.to_string() => {}
            _ => {
                let value = row[value_idx].clone();
                values.insert(indicator.clone(), Slot { year, value, series: id });
            }
        }
        indicators.insert(indicator);
    }

    let mut columns: Vec<String> = group.iter().map(|&i| table.columns()[i].clone()).collect();
    columns.extend(indicators.iter().cloned());
    let mut wide = ResultTable::new(columns, Shape::WideIndicators)
        .with_column_map(table.column_map().clone());
    for key in order {
        let Some((mut cells, values)) = groups.remove(&key) else {
            continue;
        };
        cells.extend(
            indicators
                .iter()
                .map(|i| values.get(i).map_or(Cell::Empty, |slot| slot.value.clone())),
        );
        wide.push_row(cells)?;
    }
    Ok(wide)
}
