//! Observation decoding.
//!
//! [`ObservationDecoder`] turns a data payload into [`ObservationRow`]s. It is
//! a pure format conversion: one row per observation in the source, codes
//! kept verbatim, no filtering.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;
use unicefdata_core::{
    DATAFLOW, INDICATOR, OBS_VALUE, ObsValue, ObservationRow, PayloadFormat, REF_AREA, Result,
    TIME_PERIOD, UnicefError,
};

use crate::structure::DataflowSchema;

/// Attribute columns commonly published by UNICEF dataflows. Used to tell
/// attributes from dimensions when no schema is at hand.
pub const KNOWN_ATTRIBUTES: &[&str] = &[
    "UNIT_MEASURE",
    "UNIT_MULTIPLIER",
    "OBS_STATUS",
    "OBS_CONF",
    "LOWER_BOUND",
    "UPPER_BOUND",
    "WGTD_SAMPL_SIZE",
    "OBS_FOOTNOTE",
    "SERIES_FOOTNOTE",
    "DATA_SOURCE",
    "SOURCE_LINK",
    "CUSTODIAN",
    "TIME_PERIOD_METHOD",
    "REF_PERIOD",
    "COVERAGE_TIME",
];

const REQUIRED_COLUMNS: [&str; 4] = [REF_AREA, INDICATOR, TIME_PERIOD, OBS_VALUE];

/// Decodes data payloads for one dataflow.
#[derive(Debug, Clone)]
pub struct ObservationDecoder {
    dataflow: String,
    dimensions: Option<Vec<String>>,
}

impl ObservationDecoder {
    /// Creates a decoder that classifies columns with [`KNOWN_ATTRIBUTES`].
    #[must_use]
    pub fn new(dataflow: impl Into<String>) -> Self {
        Self {
            dataflow: dataflow.into(),
            dimensions: None,
        }
    }

    /// Creates a decoder that classifies columns with the schema's dimensions.
    #[must_use]
    pub fn for_schema(schema: &DataflowSchema) -> Self {
        Self {
            dataflow: schema.dataflow.id.clone(),
            dimensions: Some(schema.dimension_ids()),
        }
    }

    /// Dataflow id stamped on decoded rows.
    #[must_use]
    pub fn dataflow(&self) -> &str {
        &self.dataflow
    }

    fn is_attribute(&self, column: &str) -> bool {
        match &self.dimensions {
            Some(dims) => !dims.iter().any(|d| d == column),
            None => KNOWN_ATTRIBUTES.contains(&column),
        }
    }

    /// Decodes a payload in the given format.
    ///
    /// # Errors
    /// Returns [`UnicefError::MalformedPayload`] if the payload does not
    /// parse or lacks a required column.
    pub fn decode(&self, body: &[u8], format: PayloadFormat) -> Result<Vec<ObservationRow>> {
        let body = body.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(body);
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        match format {
            PayloadFormat::Csv => self.decode_csv(body),
            PayloadFormat::Json => self.decode_json(body),
        }
    }

    /// Places one column value on a row.
    fn assign(&self, row: &mut ObservationRow, column: &str, value: String) {
        match column {
            REF_AREA => row.country = value,
            INDICATOR => row.indicator = value,
            TIME_PERIOD => row.period = value,
            OBS_VALUE => row.value = ObsValue::from_raw(&value),
            DATAFLOW => {}
            _ if self.is_attribute(column) => {
                if !value.is_empty() {
                    row.attributes.insert(column.to_string(), value);
                }
            }
            _ => {
                row.dimensions.insert(column.to_string(), value);
            }
        }
    }

    fn empty_row(&self) -> ObservationRow {
        ObservationRow {
            dataflow: self.dataflow.clone(),
            ..ObservationRow::default()
        }
    }

    fn decode_csv(&self, body: &[u8]) -> Result<Vec<ObservationRow>> {
        let mut reader = csv::ReaderBuilder::new().from_reader(body);

        // `labels=both` headers read `REF_AREA:Geographic area`.
        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| UnicefError::MalformedPayload(format!("csv header: {e}")))?
            .iter()
            .map(|h| h.split_once(':').map_or(h, |(id, _)| id).trim().to_string())
            .collect();

        if let Some(missing) = REQUIRED_COLUMNS
            .iter()
            .find(|c| !headers.iter().any(|h| h == *c))
        {
            return Err(UnicefError::MalformedPayload(format!(
                "csv payload lacks required column {missing}"
            )));
        }

        let mut rows = Vec::new();
        for (line, record) in reader.records().enumerate() {
            let record = record.map_err(|e| {
                UnicefError::MalformedPayload(format!("csv record {}: {e}", line + 1))
            })?;
            let mut row = self.empty_row();
            for (column, value) in headers.iter().zip(record.iter()) {
                self.assign(&mut row, column, value.trim().to_string());
            }
            rows.push(row);
        }
        Ok(rows)
    }

    fn decode_json(&self, body: &[u8]) -> Result<Vec<ObservationRow>> {
        let message: JsonDataMessage = serde_json::from_slice(body)
            .map_err(|e| UnicefError::MalformedPayload(format!("sdmx-json: {e}")))?;
        let JsonDataBody {
            structure,
            data_sets,
        } = match message {
            JsonDataMessage::Wrapped { data } => data,
            JsonDataMessage::Bare(data) => data,
        };

        let mut rows = Vec::new();
        for data_set in &data_sets {
            for (series_key, series) in &data_set.series {
                let series_idx = parse_key(series_key)?;
                for (obs_key, obs) in &series.observations {
                    let obs_idx = parse_key(obs_key)?;
                    let mut row = self.empty_row();
                    self.apply_dimensions(&mut row, &structure.dimensions.series, &series_idx)?;
                    self.apply_dimensions(&mut row, &structure.dimensions.observation, &obs_idx)?;
                    self.apply_attributes(&mut row, &structure.attributes.series, &series.attributes);
                    self.apply_observation(&mut row, &structure.attributes.observation, obs);
                    rows.push(row);
                }
            }
            for (obs_key, obs) in &data_set.observations {
                let obs_idx = parse_key(obs_key)?;
                let mut row = self.empty_row();
                self.apply_dimensions(&mut row, &structure.dimensions.observation, &obs_idx)?;
                self.apply_observation(&mut row, &structure.attributes.observation, obs);
                rows.push(row);
            }
        }
        Ok(rows)
    }

    fn apply_dimensions(
        &self,
        row: &mut ObservationRow,
        components: &[JsonComponent],
        indices: &[usize],
    ) -> Result<()> {
        if components.len() != indices.len() {
            return Err(UnicefError::MalformedPayload(format!(
                "key has {} positions, structure has {} dimensions",
                indices.len(),
                components.len()
            )));
        }
        for (component, &idx) in components.iter().zip(indices) {
            let value = component.values.get(idx).ok_or_else(|| {
                UnicefError::MalformedPayload(format!(
                    "value index {idx} out of range for {}",
                    component.id
                ))
            })?;
            self.assign(row, &component.id, value.text());
        }
        Ok(())
    }

    fn apply_attributes(
        &self,
        row: &mut ObservationRow,
        components: &[JsonComponent],
        indices: &[Option<usize>],
    ) {
        for (component, idx) in components.iter().zip(indices) {
            if let Some(value) = idx.and_then(|i| component.values.get(i)) {
                let text = value.text();
                if !text.is_empty() {
                    row.attributes.insert(component.id.clone(), text);
                }
            }
        }
    }

    /// An observation array is `[value, attribute index...]`.
    fn apply_observation(&self, row: &mut ObservationRow, attributes: &[JsonComponent], obs: &[Value]) {
        row.value = match obs.first() {
            Some(Value::Number(n)) => n.as_f64().map_or(ObsValue::NoData, |v| {
                if v.is_finite() { ObsValue::Value(v) } else { ObsValue::NoData }
            }),
            Some(Value::String(s)) => ObsValue::from_raw(s),
            _ => ObsValue::NoData,
        };
        let indices: Vec<Option<usize>> = obs
            .iter()
            .skip(1)
            .map(|v| v.as_u64().and_then(|i| usize::try_from(i).ok()))
            .collect();
        self.apply_attributes(row, attributes, &indices);
    }
}

fn parse_key(key: &str) -> Result<Vec<usize>> {
    if key.is_empty() {
        return Ok(Vec::new());
    }
    key.split(':')
        .map(|part| {
            part.parse::<usize>()
                .map_err(|_| UnicefError::MalformedPayload(format!("bad observation key '{key}'")))
        })
        .collect()
}

// ============================================================================
// SDMX-JSON data message types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JsonDataMessage {
    Wrapped { data: JsonDataBody },
    Bare(JsonDataBody),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonDataBody {
    structure: JsonStructure,
    #[serde(default)]
    data_sets: Vec<JsonDataSet>,
}

#[derive(Debug, Deserialize)]
struct JsonStructure {
    dimensions: JsonComponentGroups,
    #[serde(default)]
    attributes: JsonComponentGroups,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct JsonComponentGroups {
    series: Vec<JsonComponent>,
    observation: Vec<JsonComponent>,
}

#[derive(Debug, Deserialize)]
struct JsonComponent {
    id: String,
    #[serde(default)]
    values: Vec<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct JsonValue {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<Value>,
    #[serde(default)]
    value: Option<Value>,
}

impl JsonValue {
    fn text(&self) -> String {
        if let Some(id) = &self.id {
            return id.clone();
        }
        match self.name.as_ref().or(self.value.as_ref()) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Object(map)) => map
                .get("en")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct JsonDataSet {
    series: BTreeMap<String, JsonSeries>,
    observations: BTreeMap<String, Vec<Value>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct JsonSeries {
    attributes: Vec<Option<usize>>,
    observations: BTreeMap<String, Vec<Value>>,
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// SDMX-CSV for CME_MRY0T4 in BRA and IND, 2015 to 2017.
    pub(crate) const CME_CSV: &str = "\
DATAFLOW,REF_AREA,INDICATOR,SEX,WEALTH_QUINTILE,TIME_PERIOD,OBS_VALUE,UNIT_MEASURE,OBS_STATUS,LOWER_BOUND
UNICEF:CME(1.0),BRA,CME_MRY0T4,_T,_T,2015,16.2,D_PER_1000_B,A,15.1
UNICEF:CME(1.0),BRA,CME_MRY0T4,_T,_T,2016,15.7,D_PER_1000_B,A,14.6
UNICEF:CME(1.0),BRA,CME_MRY0T4,_T,_T,2017,NaN,D_PER_1000_B,,
UNICEF:CME(1.0),IND,CME_MRY0T4,_T,_T,2015,43.6,D_PER_1000_B,A,40.0
UNICEF:CME(1.0),IND,CME_MRY0T4,_T,_T,2016,41.0,D_PER_1000_B,E,
";

    /// The same kind of data as an SDMX-JSON 1.0 message.
    pub(crate) const CME_JSON: &str = r#"{
      "data": {
        "structure": {
          "dimensions": {
            "series": [
              {"id": "REF_AREA", "values": [{"id": "BRA", "name": "Brazil"}, {"id": "IND", "name": "India"}]},
              {"id": "INDICATOR", "values": [{"id": "CME_MRY0T4"}]},
              {"id": "SEX", "values": [{"id": "_T"}, {"id": "F"}]}
            ],
            "observation": [
              {"id": "TIME_PERIOD", "values": [{"id": "2015"}, {"id": "2016"}]}
            ]
          },
          "attributes": {
            "series": [{"id": "UNIT_MEASURE", "values": [{"id": "D_PER_1000_B"}]}],
            "observation": [{"id": "OBS_STATUS", "values": [{"id": "A"}, {"id": "E"}]}]
          }
        },
        "dataSets": [{
          "series": {
            "0:0:0": {"attributes": [0], "observations": {"0": [16.2, 0], "1": [15.7, 1]}},
            "1:0:1": {"attributes": [null], "observations": {"1": [null, null]}}
          }
        }]
      }
    }"#;
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use unicefdata_core::SEX;

    #[test]
    fn test_decode_csv_preserves_every_row() {
        let decoder = ObservationDecoder::new("CME");
        let rows = decoder.decode(CME_CSV.as_bytes(), PayloadFormat::Csv).unwrap();
        assert_eq!(rows.len(), 5);

        let first = &rows[0];
        assert_eq!(first.dataflow, "CME");
        assert_eq!(first.country, "BRA");
        assert_eq!(first.indicator, "CME_MRY0T4");
        assert_eq!(first.period, "2015");
        assert_eq!(first.value, ObsValue::Value(16.2));
        assert_eq!(first.sex(), Some("_T"));
        assert_eq!(first.wealth(), Some("_T"));
        assert_eq!(first.attributes.get("OBS_STATUS").map(String::as_str), Some("A"));
        assert!(!first.dimensions.contains_key("UNIT_MEASURE"));

        // NaN is kept as no-data, not dropped
        assert!(rows[2].value.is_no_data());
        assert!(!rows[2].attributes.contains_key("OBS_STATUS"));
    }

    #[test]
    fn test_decode_csv_with_labelled_headers() {
        let body = "REF_AREA:Geographic area,INDICATOR:Indicator,SEX:Sex,TIME_PERIOD:Time period,OBS_VALUE:Observation Value\n\
                    BRA,CME_MRY0T4,_T,2015,16.2\n";
        let rows = ObservationDecoder::new("CME")
            .decode(body.as_bytes(), PayloadFormat::Csv)
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].sex(), Some("_T"));
    }

    #[test]
    fn test_decode_csv_uses_schema_dimensions() {
        let schema = crate::structure::parse_dataflow_schema(
            crate::structure::fixtures::CME_STRUCTURE.as_bytes(),
            "CME",
        )
        .unwrap();
        let body = "REF_AREA,INDICATOR,SEX,WEALTH_QUINTILE,TIME_PERIOD,OBS_VALUE,CUSTOM_NOTE\n\
                    BRA,CME_MRY0T4,F,Q1,2015,20.1,note\n";
        let rows = ObservationDecoder::for_schema(&schema)
            .decode(body.as_bytes(), PayloadFormat::Csv)
            .unwrap();
        assert_eq!(rows[0].dimension(SEX), Some("F"));
        assert_eq!(rows[0].attributes.get("CUSTOM_NOTE").map(String::as_str), Some("note"));
    }

    #[test]
    fn test_decode_csv_missing_column_is_malformed() {
        let body = "REF_AREA,INDICATOR,TIME_PERIOD\nBRA,CME_MRY0T4,2015\n";
        let err = ObservationDecoder::new("CME")
            .decode(body.as_bytes(), PayloadFormat::Csv)
            .unwrap_err();
        assert!(matches!(err, UnicefError::MalformedPayload(ref m) if m.contains("OBS_VALUE")));
    }

    #[test]
    fn test_decode_empty_payload() {
        let decoder = ObservationDecoder::new("CME");
        assert!(decoder.decode(b"", PayloadFormat::Csv).unwrap().is_empty());
        let header_only = "REF_AREA,INDICATOR,TIME_PERIOD,OBS_VALUE\n";
        assert!(decoder.decode(header_only.as_bytes(), PayloadFormat::Csv).unwrap().is_empty());
    }

    #[test]
    fn test_decode_json_series_layout() {
        let rows = ObservationDecoder::new("CME")
            .decode(CME_JSON.as_bytes(), PayloadFormat::Json)
            .unwrap();
        assert_eq!(rows.len(), 3);

        let bra_2016 = rows
            .iter()
            .find(|r| r.country == "BRA" && r.period == "2016")
            .unwrap();
        assert_eq!(bra_2016.value, ObsValue::Value(15.7));
        assert_eq!(bra_2016.attributes.get("OBS_STATUS").map(String::as_str), Some("E"));
        assert_eq!(bra_2016.attributes.get("UNIT_MEASURE").map(String::as_str), Some("D_PER_1000_B"));

        let ind = rows.iter().find(|r| r.country == "IND").unwrap();
        assert_eq!(ind.sex(), Some("F"));
        assert!(ind.value.is_no_data());
        assert!(ind.attributes.is_empty());
    }

    #[test]
    fn test_decode_json_flat_layout_without_wrapper() {
        let body = r#"{
          "structure": {"dimensions": {"observation": [
            {"id": "REF_AREA", "values": [{"id": "PAK"}]},
            {"id": "INDICATOR", "values": [{"id": "CME_MRY0T4"}]},
            {"id": "TIME_PERIOD", "values": [{"id": "2020"}, {"id": "2021"}]}
          ]}},
          "dataSets": [{"observations": {"0:0:0": ["63.3"], "0:0:1": [61.2]}}]
        }"#;
        let rows = ObservationDecoder::new("CME")
            .decode(body.as_bytes(), PayloadFormat::Json)
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].value, ObsValue::Value(63.3));
        assert_eq!(rows[1].period, "2021");
    }

    #[test]
    fn test_decode_json_rejects_garbage() {
        let decoder = ObservationDecoder::new("CME");
        assert!(decoder.decode(b"<html>", PayloadFormat::Json).is_err());
        let bad_key = r#"{"structure": {"dimensions": {"observation": [{"id": "REF_AREA", "values": [{"id": "BRA"}]}]}},
                          "dataSets": [{"observations": {"3": [1.0]}}]}"#;
        assert!(decoder.decode(bad_key.as_bytes(), PayloadFormat::Json).is_err());
    }
}
