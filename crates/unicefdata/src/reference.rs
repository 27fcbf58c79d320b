//! Per-country reference attributes.
//!
//! A [`ReferenceTable`] is a CSV keyed by ISO3 code whose other columns
//! (`region`, `income_group`, `continent`, ...) can be joined onto results
//! by naming them in [`RetrievalRequest::metadata`](crate::RetrievalRequest::metadata).

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use tracing::debug;
use unicefdata_core::{Result, UnicefError};

/// Header names accepted for the key column, compared case-insensitively.
const KEY_COLUMNS: &[&str] = &["iso3", "iso3_code", "ref_area", "country"];

/// Country attributes keyed by ISO3 code.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReferenceTable {
    fields: Vec<String>,
    rows: HashMap<String, Vec<String>>,
}

impl ReferenceTable {
    /// Reads a table from CSV. The first column whose header is one of
    /// `iso3`, `iso3_code`, `ref_area` or `country` is the key; every other
    /// column becomes a field.
    ///
    /// # Errors
    /// Returns [`UnicefError::Validation`] if no key column exists and
    /// [`UnicefError::MalformedPayload`] if the CSV does not parse.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers = reader
            .headers()
            .map_err(|e| UnicefError::MalformedPayload(format!("reference table: {e}")))?
            .clone();
        let key_idx = headers
            .iter()
            .position(|h| KEY_COLUMNS.iter().any(|k| k.eq_ignore_ascii_case(h)))
            .ok_or_else(|| {
                UnicefError::validation(
                    "reference",
                    format!("no key column; expected one of {}", KEY_COLUMNS.join(", ")),
                )
            })?;

        let fields: Vec<String> = headers
            .iter()
            .enumerate()
            .filter(|(idx, _)| *idx != key_idx)
            .map(|(_, h)| h.to_string())
            .collect();

        let mut rows = HashMap::new();
        for record in reader.records() {
            let record =
                record.map_err(|e| UnicefError::MalformedPayload(format!("reference table: {e}")))?;
            let Some(key) = record.get(key_idx).filter(|k| !k.is_empty()) else {
                continue;
            };
            let values = record
                .iter()
                .enumerate()
                .filter(|(idx, _)| *idx != key_idx)
                .map(|(_, v)| v.to_string())
                .collect();
            rows.insert(key.to_ascii_uppercase(), values);
        }

        debug!(countries = rows.len(), fields = fields.len(), "loaded reference table");
        Ok(Self { fields, rows })
    }

    /// Reads a table from a CSV file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened, or any error from
    /// [`ReferenceTable::from_reader`].
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            UnicefError::Other(format!("cannot open reference table {}: {e}", path.display()))
        })?;
        Self::from_reader(file)
    }

    /// Field names, in file order.
    #[must_use]
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Returns true if the table has a field named `field`.
    #[must_use]
    pub fn has_field(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f == field)
    }

    /// Value of `field` for a country. Empty values read as absent.
    #[must_use]
    pub fn get(&self, iso3: &str, field: &str) -> Option<&str> {
        let idx = self.fields.iter().position(|f| f == field)?;
        self.rows
            .get(&iso3.to_ascii_uppercase())?
            .get(idx)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Number of countries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns true if the table has no countries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
