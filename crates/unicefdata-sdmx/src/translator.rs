//! Friendly filter values to SDMX codes.
//!
//! A [`CodeTranslator`] wraps one dataflow's schema. Dimensions may be named
//! by their SDMX id (`WEALTH_QUINTILE`) or a friendly alias (`wealth`);
//! values may be codes (`F`), friendly aliases (`female`) or code labels
//! (`Female`), matched case-insensitively against the dimension's codelist.

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;
use unicefdata_core::{
    AGE, FilterSet, RESIDENCE, Result, SEX, TOTAL_CODE, UnicefError, WEALTH_QUINTILE,
};

use crate::structure::{Codelist, DataflowSchema};

/// Sentinel value selecting every code of a dimension.
pub const ALL: &str = "ALL";

/// Most valid options listed in an unknown-code error.
const MAX_LISTED_OPTIONS: usize = 10;

/// Friendly dimension names.
const DIMENSION_ALIASES: &[(&str, &str)] = &[
    ("sex", SEX),
    ("residence", RESIDENCE),
    ("wealth", WEALTH_QUINTILE),
    ("wealth_quintile", WEALTH_QUINTILE),
    ("age", AGE),
    ("country", "REF_AREA"),
    ("indicator", "INDICATOR"),
];

/// Friendly values per dimension.
const VALUE_ALIASES: &[(&str, &str, &str)] = &[
    (SEX, "female", "F"),
    (SEX, "male", "M"),
    (SEX, "total", TOTAL_CODE),
    (SEX, "T", TOTAL_CODE),
    (RESIDENCE, "urban", "U"),
    (RESIDENCE, "rural", "R"),
    (RESIDENCE, "total", TOTAL_CODE),
    (RESIDENCE, "T", TOTAL_CODE),
    (WEALTH_QUINTILE, "poorest", "Q1"),
    (WEALTH_QUINTILE, "richest", "Q5"),
    (WEALTH_QUINTILE, "total", TOTAL_CODE),
    (WEALTH_QUINTILE, "T", TOTAL_CODE),
    (AGE, "total", TOTAL_CODE),
];

/// Maps the friendly name of a dimension to its SDMX id. Unrecognised names
/// are upper-cased and returned as-is.
#[must_use]
pub fn dimension_id(name: &str) -> String {
    let trimmed = name.trim();
    DIMENSION_ALIASES
        .iter()
        .find(|(alias, _)| alias.eq_ignore_ascii_case(trimmed))
        .map_or_else(|| trimmed.to_ascii_uppercase(), |(_, id)| (*id).to_string())
}

/// Returns true for a dimension with a friendly alias, one that only some
/// dataflows have.
fn is_aliased(id: &str) -> bool {
    DIMENSION_ALIASES.iter().any(|(_, aliased)| *aliased == id)
}

/// Translates filter values for one dataflow.
#[derive(Debug, Clone, Copy)]
pub struct CodeTranslator<'a> {
    schema: &'a DataflowSchema,
}

impl<'a> CodeTranslator<'a> {
    /// Creates a translator over a dataflow schema.
    #[must_use]
    pub const fn new(schema: &'a DataflowSchema) -> Self {
        Self { schema }
    }

    /// The SDMX id of a dimension of this dataflow.
    ///
    /// # Errors
    /// Returns a validation error if the dataflow has no such dimension.
    pub fn dimension(&self, name: &str) -> Result<String> {
        let id = dimension_id(name);
        if self.schema.has_dimension(&id) {
            Ok(id)
        } else {
            Err(self.unknown_dimension(name))
        }
    }

    fn unknown_dimension(&self, name: &str) -> UnicefError {
        UnicefError::validation(
            name,
            format!(
                "unknown dimension '{name}' for dataflow {} (dimensions: {})",
                self.schema.dataflow.id,
                self.schema.dimension_ids().join(", ")
            ),
        )
    }

    fn codelist(&self, dimension: &str) -> Option<&'a Codelist> {
        self.schema.codelist(dimension)
    }

    /// Resolves one user value to a code of `dimension`.
    ///
    /// Dimensions without a codelist accept any value verbatim.
    ///
    /// # Errors
    /// Returns a validation error for an unknown dimension, or for a value
    /// matching no code, naming the valid options.
    pub fn resolve(&self, dimension: &str, value: &str) -> Result<String> {
        let id = self.dimension(dimension)?;
        let value = value.trim();
        let Some(codelist) = self.codelist(&id) else {
            return Ok(value.to_string());
        };

        let alias = VALUE_ALIASES
            .iter()
            .find(|(dim, alias, _)| *dim == id && alias.eq_ignore_ascii_case(value))
            .map(|(_, _, code)| *code);

        let found = codelist
            .codes
            .iter()
            .find(|c| c.id == value)
            .or_else(|| {
                alias.and_then(|code| codelist.codes.iter().find(|c| c.id == code))
            })
            .or_else(|| codelist.codes.iter().find(|c| c.id.eq_ignore_ascii_case(value)))
            .or_else(|| codelist.codes.iter().find(|c| c.name.eq_ignore_ascii_case(value)));

        found.map(|c| c.id.clone()).ok_or_else(|| {
            let mut options: Vec<&str> = codelist.ids().take(MAX_LISTED_OPTIONS).collect();
            if codelist.codes.len() > MAX_LISTED_OPTIONS {
                options.push("...");
            }
            UnicefError::validation(
                dimension,
                format!(
                    "unknown code '{value}' for {id}; valid options: {}",
                    options.join(", ")
                ),
            )
        })
    }

    /// Every code of `dimension`.
    ///
    /// # Errors
    /// Returns a validation error for an unknown dimension or one without a
    /// codelist.
    pub fn resolve_all(&self, dimension: &str) -> Result<BTreeSet<String>> {
        let id = self.dimension(dimension)?;
        self.codelist(&id)
            .map(|cl| cl.ids().map(ToString::to_string).collect())
            .ok_or_else(|| {
                UnicefError::validation(dimension, format!("dimension {id} has no codelist"))
            })
    }

    /// Resolves several user values, expanding [`ALL`].
    ///
    /// # Errors
    /// Returns the first resolution error.
    pub fn resolve_values(&self, dimension: &str, values: &[String]) -> Result<BTreeSet<String>> {
        if values.iter().any(|v| v.trim().eq_ignore_ascii_case(ALL)) {
            return self.resolve_all(dimension);
        }
        values.iter().map(|v| self.resolve(dimension, v)).collect()
    }

    /// Label of a code, the reverse of [`CodeTranslator::resolve`].
    #[must_use]
    pub fn label(&self, dimension: &str, code: &str) -> Option<&'a str> {
        self.codelist(&dimension_id(dimension))?.name_of(code)
    }

    /// Resolves user filters into a [`FilterSet`] for this dataflow.
    ///
    /// Filters on well-known dimensions (`sex`, `residence`, `wealth`, `age`)
    /// that this dataflow lacks are skipped with a warning. Sex defaults to
    /// the total code when the dataflow has it; every other dimension
    /// defaults to unconstrained.
    ///
    /// # Errors
    /// Returns a validation error for a dimension no dataflow is known to
    /// have, or the first value resolution error.
    pub fn resolve_filters(&self, filters: &BTreeMap<String, Vec<String>>) -> Result<FilterSet> {
        self.resolve_filters_among(filters, &[])
    }

    /// Like [`CodeTranslator::resolve_filters`], for a request spanning
    /// several dataflows: a filter on a dimension of any of `siblings` is
    /// skipped here rather than rejected.
    ///
    /// # Errors
    /// Returns a validation error for a dimension neither this dataflow nor
    /// any sibling has, or the first value resolution error.
    pub fn resolve_filters_among(
        &self,
        filters: &BTreeMap<String, Vec<String>>,
        siblings: &[&DataflowSchema],
    ) -> Result<FilterSet> {
        let mut resolved = FilterSet::new();
        for (name, values) in filters {
            if values.is_empty() {
                continue;
            }
            let id = dimension_id(name);
            if !self.schema.has_dimension(&id) {
                if !is_aliased(&id) && !siblings.iter().any(|s| s.has_dimension(&id)) {
                    return Err(self.unknown_dimension(name));
                }
                warn!(
                    dimension = %name,
                    dataflow = %self.schema.dataflow.id,
                    "dataflow has no such dimension, filter ignored"
                );
                continue;
            }
            resolved.set(id.as_str(), self.resolve_values(&id, values)?);
        }

        if resolved.get(SEX).is_none() && !filters.keys().any(|k| dimension_id(k) == SEX) {
            let total = self
                .codelist(SEX)
                .is_none_or(|cl| cl.contains(TOTAL_CODE));
            if self.schema.has_dimension(SEX) && total {
                resolved.set(SEX, [TOTAL_CODE]);
            }
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::fixtures::{CME_STRUCTURE, NUTRITION_STRUCTURE};
    use crate::structure::{Dimension, parse_dataflow_schema};

    fn cme() -> DataflowSchema {
        parse_dataflow_schema(CME_STRUCTURE.as_bytes(), "CME").unwrap()
    }

    fn nutrition() -> DataflowSchema {
        parse_dataflow_schema(NUTRITION_STRUCTURE.as_bytes(), "NUTRITION").unwrap()
    }

    fn values(v: &[&str]) -> Vec<String> {
        v.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_dimension_aliases() {
        assert_eq!(dimension_id("wealth"), WEALTH_QUINTILE);
        assert_eq!(dimension_id("Sex"), SEX);
        assert_eq!(dimension_id("maternal_edu_lvl"), "MATERNAL_EDU_LVL");
    }

    #[test]
    fn test_resolve_codes_aliases_and_labels() {
        let schema = cme();
        let tr = CodeTranslator::new(&schema);
        assert_eq!(tr.resolve("sex", "F").unwrap(), "F");
        assert_eq!(tr.resolve("sex", "female").unwrap(), "F");
        assert_eq!(tr.resolve("SEX", "Male").unwrap(), "M");
        assert_eq!(tr.resolve("sex", "T").unwrap(), "_T");
        assert_eq!(tr.resolve("wealth", "q1").unwrap(), "Q1");
        assert_eq!(tr.resolve("wealth", "richest").unwrap(), "Q5");
        assert_eq!(tr.label("sex", "F"), Some("Female"));
    }

    #[test]
    fn test_unknown_code_names_valid_options() {
        let schema = cme();
        let err = CodeTranslator::new(&schema).resolve("sex", "X").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("unknown code 'X'"), "{msg}");
        assert!(msg.contains("_T, F, M"), "{msg}");
    }

    #[test]
    fn test_unknown_dimension() {
        let schema = cme();
        let err = CodeTranslator::new(&schema)
            .resolve("residence", "U")
            .unwrap_err();
        assert!(err.to_string().contains("unknown dimension 'residence'"));
    }

    #[test]
    fn test_all_sentinel_expands_codelist() {
        let schema = cme();
        let tr = CodeTranslator::new(&schema);
        let all = tr.resolve_values("sex", &values(&["ALL"])).unwrap();
        assert_eq!(all, ["F", "M", "_T"].into_iter().map(String::from).collect::<BTreeSet<_>>());
        assert_eq!(tr.resolve_all("wealth").unwrap().len(), 6);
    }

    #[test]
    fn test_filter_defaults() {
        let schema = nutrition();
        let tr = CodeTranslator::new(&schema);
        let filters = tr.resolve_filters(&BTreeMap::new()).unwrap();
        assert_eq!(filters.get(SEX).map(|s| s.len()), Some(1));
        assert!(filters.get(RESIDENCE).is_none());
        assert!(filters.get(AGE).is_none());
    }

    #[test]
    fn test_filters_resolve_and_skip_missing_dimensions() {
        let schema = cme();
        let tr = CodeTranslator::new(&schema);
        let mut user = BTreeMap::new();
        user.insert("sex".to_string(), values(&["female", "male"]));
        user.insert("residence".to_string(), values(&["urban"]));
        user.insert("wealth".to_string(), values(&["Q1", "Q5"]));

        let filters = tr.resolve_filters(&user).unwrap();
        assert_eq!(filters.get(SEX).unwrap().len(), 2);
        assert_eq!(filters.get(WEALTH_QUINTILE).unwrap().len(), 2);
        assert!(filters.get(RESIDENCE).is_none());
    }

    #[test]
    fn test_filter_on_unknown_dimension_is_rejected() {
        let schema = cme();
        let mut user = BTreeMap::new();
        user.insert("sexx".to_string(), values(&["F"]));
        let err = CodeTranslator::new(&schema).resolve_filters(&user).unwrap_err();
        assert!(matches!(err, UnicefError::Validation { ref field, .. } if field == "sexx"));
        assert!(err.to_string().contains("unknown dimension 'sexx'"));
    }

    #[test]
    fn test_filter_on_sibling_dimension_is_skipped() {
        let cme = cme();
        let mut education = nutrition();
        education.dimensions.push(Dimension {
            id: "MATERNAL_EDU_LVL".to_string(),
            position: 5,
            codelist: None,
        });
        let mut user = BTreeMap::new();
        user.insert("sex".to_string(), values(&["F"]));
        user.insert("maternal_edu_lvl".to_string(), values(&["ISCED11_1"]));
        user.insert("residence".to_string(), values(&["U"]));

        let tr = CodeTranslator::new(&cme);
        let err = tr.resolve_filters(&user).unwrap_err();
        assert!(err.to_string().contains("maternal_edu_lvl"));

        let filters = tr.resolve_filters_among(&user, &[&education]).unwrap();
        assert_eq!(filters.get(SEX).unwrap().len(), 1);
        assert!(filters.get("MATERNAL_EDU_LVL").is_none());
        assert!(filters.get(RESIDENCE).is_none());
    }

    #[test]
    fn test_explicit_empty_sex_filter_disables_default() {
        let schema = cme();
        let mut user = BTreeMap::new();
        user.insert("sex".to_string(), Vec::new());
        let filters = CodeTranslator::new(&schema).resolve_filters(&user).unwrap();
        assert!(filters.get(SEX).is_none());
    }
}
