//! SDMX structure metadata: dataflows, data structure definitions, codelists.
//!
//! Structure messages are requested as SDMX-JSON and decoded here into
//! [`DataflowSchema`], [`DataflowInfo`] and [`Codelist`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use unicefdata_core::{DataflowRef, Result, TIME_PERIOD, UnicefError};

/// `Accept` header for SDMX-JSON structure messages.
pub const STRUCTURE_ACCEPT: &str = "application/vnd.sdmx.structure+json;version=1.0";

/// A single code of a codelist.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Code {
    /// Code id, e.g. `F`.
    pub id: String,
    /// English label.
    pub name: String,
    /// Longer description, if published.
    pub description: Option<String>,
    /// Parent code in hierarchical codelists.
    pub parent: Option<String>,
}

/// The enumerated valid codes for a dimension.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Codelist {
    /// Codelist id, e.g. `CL_SEX`.
    pub id: String,
    /// Codes in published order.
    pub codes: Vec<Code>,
}

impl Codelist {
    /// Returns true if the codelist contains `id`.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.codes.iter().any(|c| c.id == id)
    }

    /// Label of a code.
    #[must_use]
    pub fn name_of(&self, id: &str) -> Option<&str> {
        self.codes
            .iter()
            .find(|c| c.id == id)
            .map(|c| c.name.as_str())
    }

    /// Code ids in published order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.codes.iter().map(|c| c.id.as_str())
    }
}

/// A non-time dimension of a dataflow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    /// Dimension id, e.g. `REF_AREA`.
    pub id: String,
    /// Zero-based position in the series key.
    pub position: usize,
    /// Id of the codelist enumerating the dimension, if any.
    pub codelist: Option<String>,
}

/// Dimensional schema of one dataflow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataflowSchema {
    /// Fully qualified dataflow.
    pub dataflow: DataflowRef,
    /// Dataflow label.
    pub name: String,
    /// Key dimensions ordered by position (time excluded).
    pub dimensions: Vec<Dimension>,
    /// Id of the time dimension.
    pub time_dimension: String,
    /// Attribute ids.
    pub attributes: Vec<String>,
    /// Codelists keyed by dimension id.
    pub codelists: HashMap<String, Codelist>,
}

impl DataflowSchema {
    /// Returns true if the dataflow has a dimension with this id.
    #[must_use]
    pub fn has_dimension(&self, id: &str) -> bool {
        self.dimensions.iter().any(|d| d.id == id)
    }

    /// Codelist for a dimension.
    #[must_use]
    pub fn codelist(&self, dimension: &str) -> Option<&Codelist> {
        self.codelists.get(dimension)
    }

    /// Dimension ids in key order.
    #[must_use]
    pub fn dimension_ids(&self) -> Vec<String> {
        self.dimensions.iter().map(|d| d.id.clone()).collect()
    }
}

/// Summary of a dataflow, as listed by the API.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataflowInfo {
    /// Dataflow id.
    pub id: String,
    /// Maintenance agency.
    pub agency: String,
    /// Version.
    pub version: String,
    /// Label.
    pub name: String,
}

// ============================================================================
// SDMX-JSON structure message types
// ============================================================================

#[derive(Debug, Deserialize)]
struct StructureMessage {
    data: StructureData,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StructureData {
    dataflows: Vec<JsonDataflow>,
    data_structures: Vec<JsonDataStructure>,
    codelists: Vec<JsonCodelist>,
}

/// Label fields as the API publishes them: either a plain `name` or a
/// language map in `names`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Labels {
    name: Option<String>,
    names: HashMap<String, String>,
    description: Option<String>,
    descriptions: HashMap<String, String>,
}

impl Labels {
    fn name(&self) -> Option<String> {
        self.name
            .clone()
            .or_else(|| self.names.get("en").cloned())
            .or_else(|| self.names.values().next().cloned())
    }

    fn description(&self) -> Option<String> {
        self.description
            .clone()
            .or_else(|| self.descriptions.get("en").cloned())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonDataflow {
    id: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(rename = "agencyID", default)]
    agency_id: Option<String>,
    #[serde(default)]
    structure: Option<String>,
    #[serde(flatten)]
    labels: Labels,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonDataStructure {
    id: String,
    data_structure_components: JsonComponents,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonComponents {
    dimension_list: JsonDimensionList,
    #[serde(default)]
    attribute_list: Option<JsonAttributeList>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonDimensionList {
    #[serde(default)]
    dimensions: Vec<JsonComponent>,
    #[serde(default)]
    time_dimensions: Vec<JsonComponent>,
}

#[derive(Debug, Deserialize)]
struct JsonAttributeList {
    #[serde(default)]
    attributes: Vec<JsonComponent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonComponent {
    id: String,
    #[serde(default)]
    position: Option<usize>,
    #[serde(default)]
    local_representation: Option<JsonRepresentation>,
}

#[derive(Debug, Deserialize)]
struct JsonRepresentation {
    #[serde(default)]
    enumeration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JsonCodelist {
    id: String,
    #[serde(default)]
    codes: Vec<JsonCode>,
}

#[derive(Debug, Deserialize)]
struct JsonCode {
    id: String,
    #[serde(default)]
    parent: Option<String>,
    #[serde(flatten)]
    labels: Labels,
}

impl From<JsonCodelist> for Codelist {
    fn from(cl: JsonCodelist) -> Self {
        Self {
            id: cl.id,
            codes: cl
                .codes
                .into_iter()
                .map(|c| Code {
                    name: c.labels.name().unwrap_or_else(|| c.id.clone()),
                    description: c.labels.description(),
                    id: c.id,
                    parent: c.parent,
                })
                .collect(),
        }
    }
}

fn parse_message(body: &[u8]) -> Result<StructureData> {
    let message: StructureMessage = serde_json::from_slice(body)
        .map_err(|e| UnicefError::MalformedPayload(format!("structure message: {e}")))?;
    Ok(message.data)
}

/// Extracts the artefact id from an SDMX URN such as
/// `urn:sdmx:org.sdmx.infomodel.codelist.Codelist=UNICEF:CL_SEX(1.0)`.
fn urn_id(urn: &str) -> &str {
    let tail = urn.rsplit_once('=').map_or(urn, |(_, t)| t);
    let tail = tail.split_once(':').map_or(tail, |(_, t)| t);
    tail.split_once('(').map_or(tail, |(id, _)| id)
}

/// Decodes a `dataflow/{agency}/{id}/latest?references=all` response.
///
/// # Errors
/// Returns [`UnicefError::MalformedPayload`] if the message is not a
/// structure message or lacks the dataflow or its data structure.
pub fn parse_dataflow_schema(body: &[u8], flow_id: &str) -> Result<DataflowSchema> {
    let data = parse_message(body)?;

    let flow = data
        .dataflows
        .iter()
        .find(|f| f.id == flow_id)
        .ok_or_else(|| {
            UnicefError::MalformedPayload(format!("dataflow {flow_id} missing from structure"))
        })?;

    let dsd = match flow.structure.as_deref().map(urn_id) {
        Some(dsd_id) => data.data_structures.iter().find(|d| d.id == dsd_id),
        None => data.data_structures.first(),
    }
    .ok_or_else(|| {
        UnicefError::MalformedPayload(format!("data structure for {flow_id} missing"))
    })?;

    let codelists: HashMap<String, JsonCodelist> = data
        .codelists
        .into_iter()
        .map(|cl| (cl.id.clone(), cl))
        .collect();

    let components = &dsd.data_structure_components;
    let mut dimensions: Vec<Dimension> = components
        .dimension_list
        .dimensions
        .iter()
        .enumerate()
        .map(|(idx, d)| Dimension {
            id: d.id.clone(),
            position: d.position.unwrap_or(idx),
            codelist: d
                .local_representation
                .as_ref()
                .and_then(|r| r.enumeration.as_deref())
                .map(|urn| urn_id(urn).to_string()),
        })
        .filter(|d| d.id != TIME_PERIOD)
        .collect();
    dimensions.sort_by_key(|d| d.position);

    let mut dim_codelists = HashMap::new();
    let mut codelists = codelists;
    for dim in &dimensions {
        if let Some(cl) = dim.codelist.as_ref().and_then(|id| codelists.remove(id)) {
            dim_codelists.insert(dim.id.clone(), Codelist::from(cl));
        }
    }

    let time_dimension = components
        .dimension_list
        .time_dimensions
        .first()
        .map_or_else(|| TIME_PERIOD.to_string(), |t| t.id.clone());

    let attributes = components
        .attribute_list
        .as_ref()
        .map(|l| l.attributes.iter().map(|a| a.id.clone()).collect())
        .unwrap_or_default();

    Ok(DataflowSchema {
        dataflow: DataflowRef::new(
            flow.agency_id.clone().unwrap_or_default(),
            flow.id.clone(),
            flow.version.clone().unwrap_or_else(|| "1.0".to_string()),
        ),
        name: flow.labels.name().unwrap_or_else(|| flow.id.clone()),
        dimensions,
        time_dimension,
        attributes,
        codelists: dim_codelists,
    })
}

/// Decodes a `dataflow/{agency}` listing.
///
/// # Errors
/// Returns [`UnicefError::MalformedPayload`] if the message is not a
/// structure message.
pub fn parse_dataflow_list(body: &[u8]) -> Result<Vec<DataflowInfo>> {
    let data = parse_message(body)?;
    let mut flows: Vec<DataflowInfo> = data
        .dataflows
        .into_iter()
        .map(|f| DataflowInfo {
            name: f.labels.name().unwrap_or_else(|| f.id.clone()),
            agency: f.agency_id.unwrap_or_default(),
            version: f.version.unwrap_or_else(|| "1.0".to_string()),
            id: f.id,
        })
        .collect();
    flows.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(flows)
}

/// Decodes a `codelist/{agency}/{id}/latest` response.
///
/// # Errors
/// Returns [`UnicefError::MalformedPayload`] if the codelist is missing.
pub fn parse_codelist(body: &[u8], codelist_id: &str) -> Result<Codelist> {
    let data = parse_message(body)?;
    data.codelists
        .into_iter()
        .find(|cl| cl.id == codelist_id)
        .map(Codelist::from)
        .ok_or_else(|| {
            UnicefError::MalformedPayload(format!("codelist {codelist_id} missing from structure"))
        })
}
