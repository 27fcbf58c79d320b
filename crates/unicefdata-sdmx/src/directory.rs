//! Indicator directory and indicator-to-dataflow routing.
//!
//! The directory is the `CL_UNICEF_INDICATOR` codelist. The codelist does not
//! say which dataflow publishes an indicator, so each code is routed by the
//! longest matching prefix in [`DATAFLOW_PREFIXES`], falling back to
//! [`FALLBACK_DATAFLOW`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use unicefdata_core::{Result, UnicefError};

use crate::structure::Codelist;

/// Codelist holding every UNICEF indicator.
pub const INDICATOR_CODELIST: &str = "CL_UNICEF_INDICATOR";

/// Most codes offered when an indicator is not found.
pub const MAX_SUGGESTIONS: usize = 5;

/// Dataflow for indicators no prefix claims.
pub const FALLBACK_DATAFLOW: &str = "GLOBAL_DATAFLOW";

/// Indicator code prefixes and the dataflows publishing them.
pub const DATAFLOW_PREFIXES: &[(&str, &[&str])] = &[
    ("CME_", &["CME"]),
    ("COD_", &["CAUSE_OF_DEATH"]),
    ("DM_", &["DM", "DM_PROJECTIONS"]),
    ("ECD_", &["ECD"]),
    ("ECON_", &["ECONOMIC"]),
    ("ED_", &["EDUCATION"]),
    ("FD_", &["FUNCTIONAL_DIFF"]),
    ("GN_", &["GENDER"]),
    ("HVA_", &["HIV_AIDS"]),
    ("IM_", &["IMMUNISATION"]),
    ("MG_", &["MG"]),
    ("MNCH_", &["MNCH"]),
    ("NT_", &["NUTRITION"]),
    ("PT_", &["PT"]),
    ("PT_CM_", &["PT_CM"]),
    ("PT_F_", &["PT_FGM"]),
    ("PV_", &["CHLD_PVTY"]),
    ("SPP_", &["SOC_PROTECTION"]),
    ("WS_", &["WASH_HOUSEHOLDS"]),
    ("WS_HCF_", &["WASH_HEALTHCARE_FACILITY"]),
    ("WS_SCH_", &["WASH_SCHOOLS"]),
];

/// Dataflows an indicator code is published in, by longest prefix.
#[must_use]
pub fn route(code: &str) -> Vec<String> {
    DATAFLOW_PREFIXES
        .iter()
        .filter(|(prefix, _)| code.starts_with(prefix))
        .max_by_key(|(prefix, _)| prefix.len())
        .map_or_else(
            || vec![FALLBACK_DATAFLOW.to_string()],
            |(_, flows)| flows.iter().map(ToString::to_string).collect(),
        )
}

/// Directory entry for one indicator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicatorInfo {
    /// Indicator code, e.g. `CME_MRY0T4`.
    pub code: String,
    /// English label.
    pub name: String,
    /// Longer description, if published.
    pub description: Option<String>,
    /// Dataflows publishing the indicator; more than one means the
    /// indicator is ambiguous without an explicit dataflow.
    pub dataflows: Vec<String>,
}

impl IndicatorInfo {
    /// The first dataflow the indicator routes to.
    #[must_use]
    pub fn primary_dataflow(&self) -> &str {
        self.dataflows.first().map_or(FALLBACK_DATAFLOW, String::as_str)
    }
}

/// A dataflow with the number of directory indicators routed to it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    /// Dataflow id.
    pub dataflow: String,
    /// Number of indicators routed to the dataflow.
    pub indicator_count: usize,
}

/// Every known indicator, keyed by code.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicatorDirectory {
    indicators: BTreeMap<String, IndicatorInfo>,
}

impl IndicatorDirectory {
    /// Builds the directory from the indicator codelist.
    #[must_use]
    pub fn from_codelist(codelist: &Codelist) -> Self {
        let indicators = codelist
            .codes
            .iter()
            .map(|code| {
                let info = IndicatorInfo {
                    code: code.id.clone(),
                    name: code.name.clone(),
                    description: code.description.clone(),
                    dataflows: route(&code.id),
                };
                (code.id.clone(), info)
            })
            .collect();
        Self { indicators }
    }

    /// Number of indicators.
    #[must_use]
    pub fn len(&self) -> usize {
        self.indicators.len()
    }

    /// Returns true if the directory is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indicators.is_empty()
    }

    /// Looks up an indicator.
    #[must_use]
    pub fn get(&self, code: &str) -> Option<&IndicatorInfo> {
        self.indicators.get(code)
    }

    /// Indicators in code order.
    pub fn iter(&self) -> impl Iterator<Item = &IndicatorInfo> {
        self.indicators.values()
    }

    /// Indicators routed to `dataflow`, in code order.
    #[must_use]
    pub fn in_dataflow(&self, dataflow: &str) -> Vec<&IndicatorInfo> {
        self.iter()
            .filter(|i| i.dataflows.iter().any(|d| d == dataflow))
            .collect()
    }

    /// Case-insensitive keyword search over codes, names and descriptions.
    #[must_use]
    pub fn search(&self, keyword: &str) -> Vec<&IndicatorInfo> {
        let needle = keyword.trim().to_lowercase();
        if needle.is_empty() {
            return Vec::new();
        }
        self.iter()
            .filter(|i| {
                i.code.to_lowercase().contains(&needle)
                    || i.name.to_lowercase().contains(&needle)
                    || i
                        .description
                        .as_deref()
                        .is_some_and(|d| d.to_lowercase().contains(&needle))
            })
            .collect()
    }

    /// Dataflows with their indicator counts, in dataflow order.
    #[must_use]
    pub fn categories(&self) -> Vec<Category> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for info in self.iter() {
            for flow in &info.dataflows {
                *counts.entry(flow.as_str()).or_default() += 1;
            }
        }
        counts
            .into_iter()
            .map(|(dataflow, indicator_count)| Category {
                dataflow: dataflow.to_string(),
                indicator_count,
            })
            .collect()
    }

    /// Up to [`MAX_SUGGESTIONS`] indicators resembling `code`: first those
    /// matching its leading segment (`CME` for `CME_BOGUS`), then those
    /// matching the whole code.
    #[must_use]
    pub fn suggest(&self, code: &str) -> Vec<&IndicatorInfo> {
        let code = code.trim();
        let stem = code.split('_').next().unwrap_or(code);
        let mut hits = self.search(stem);
        if hits.is_empty() {
            hits = self.search(code);
        }
        hits.truncate(MAX_SUGGESTIONS);
        hits
    }

    /// Error for a code the directory does not list.
    #[must_use]
    pub fn unknown(&self, code: &str) -> UnicefError {
        let suggestions: Vec<&str> = self.suggest(code).iter().map(|i| i.code.as_str()).collect();
        let hint = if suggestions.is_empty() {
            "search the directory for valid codes".to_string()
        } else {
            format!("similar codes: {}", suggestions.join(", "))
        };
        UnicefError::validation("indicator", format!("unknown indicator '{code}'; {hint}"))
    }

    /// Resolves the single dataflow an indicator must be fetched from.
    ///
    /// An `override_flow` wins over routing, and the caller is then
    /// responsible for checking the code against that dataflow.
    ///
    /// # Errors
    /// Returns [`UnicefError::Validation`] if the code is not in the
    /// directory, or if it routes to more than one dataflow and no override
    /// is given.
    pub fn resolve_dataflow(&self, code: &str, override_flow: Option<&str>) -> Result<String> {
        if let Some(flow) = override_flow {
            return Ok(flow.to_string());
        }
        let info = self.get(code).ok_or_else(|| self.unknown(code))?;
        match info.dataflows.as_slice() {
            [single] => Ok(single.clone()),
            flows => Err(UnicefError::validation(
                "indicator",
                format!(
                    "indicator '{code}' is ambiguous: published in {}; specify a dataflow",
                    flows.join(", ")
                ),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::{fixtures::INDICATOR_CODELIST as BODY, parse_codelist};

    fn directory() -> IndicatorDirectory {
        let codelist = parse_codelist(BODY.as_bytes(), INDICATOR_CODELIST).unwrap();
        IndicatorDirectory::from_codelist(&codelist)
    }

    #[test]
    fn test_route_longest_prefix() {
        assert_eq!(route("CME_MRY0T4"), vec!["CME"]);
        assert_eq!(route("WS_PPL_W-B"), vec!["WASH_HOUSEHOLDS"]);
        assert_eq!(route("WS_HCF_W-B"), vec!["WASH_HEALTHCARE_FACILITY"]);
        assert_eq!(route("PT_F_GE15_FGM"), vec!["PT_FGM"]);
        assert_eq!(route("PT_CHLD_Y0T4_REG"), vec!["PT"]);
        assert_eq!(route("XYZ_OTHER"), vec![FALLBACK_DATAFLOW]);
        assert_eq!(route("DM_POP_TOT").len(), 2);
    }

    #[test]
    fn test_directory_lookup_and_search() {
        let dir = directory();
        assert_eq!(dir.len(), 6);
        assert_eq!(dir.get("CME_MRY0T4").unwrap().primary_dataflow(), "CME");
        assert_eq!(dir.in_dataflow("CME").len(), 2);

        let hits: Vec<&str> = dir.search("MORTALITY").iter().map(|i| i.code.as_str()).collect();
        assert_eq!(hits, vec!["CME_MRM0", "CME_MRY0T4"]);
        assert_eq!(dir.search("exactly 5 years").len(), 1);
        assert!(dir.search("  ").is_empty());
    }

    #[test]
    fn test_categories_count_routes() {
        let dir = directory();
        let cats = dir.categories();
        let cme = cats.iter().find(|c| c.dataflow == "CME").unwrap();
        assert_eq!(cme.indicator_count, 2);
        assert!(cats.iter().any(|c| c.dataflow == "DM_PROJECTIONS"));
        assert!(cats.iter().any(|c| c.dataflow == FALLBACK_DATAFLOW));
    }

    #[test]
    fn test_resolve_dataflow_ambiguity() {
        let dir = directory();
        assert_eq!(dir.resolve_dataflow("CME_MRY0T4", None).unwrap(), "CME");

        let err = dir.resolve_dataflow("DM_POP_TOT", None).unwrap_err();
        assert!(matches!(err, UnicefError::Validation { .. }));
        assert!(err.to_string().contains("DM, DM_PROJECTIONS"));

        assert_eq!(
            dir.resolve_dataflow("DM_POP_TOT", Some("DM_PROJECTIONS")).unwrap(),
            "DM_PROJECTIONS"
        );
    }

    #[test]
    fn test_unknown_code_is_rejected_with_suggestions() {
        let dir = directory();
        let err = dir.resolve_dataflow("CME_BOGUS", None).unwrap_err();
        assert!(matches!(err, UnicefError::Validation { ref field, .. } if field == "indicator"));
        let message = err.to_string();
        assert!(message.contains("CME_BOGUS"));
        assert!(message.contains("CME_MRM0, CME_MRY0T4"));

        let err = dir.resolve_dataflow("XYZ_NOPE", None).unwrap_err();
        assert!(err.to_string().contains("XYZ_OTHER"));

        let err = dir.resolve_dataflow("QQQ", None).unwrap_err();
        assert!(err.to_string().contains("search the directory"));

        // A pinned dataflow is checked by the caller against its schema.
        assert_eq!(dir.resolve_dataflow("NT_NEW_CODE", Some("NUTRITION")).unwrap(), "NUTRITION");
    }
}
