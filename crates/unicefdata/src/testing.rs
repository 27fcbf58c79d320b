//! A scripted SDMX server for client tests.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use unicefdata_core::{HttpResponse, HttpTransport, TransportError};

pub(crate) const INDICATOR_CODELIST: &str = r#"{
  "data": {
    "codelists": [{
      "id": "CL_UNICEF_INDICATOR",
      "codes": [
        {"id": "CME_MRY0T4", "name": "Under-five mortality rate"},
        {"id": "CME_MRM0", "name": "Neonatal mortality rate"},
        {"id": "NT_ANT_HAZ_NE2", "name": "Height-for-age <-2 SD (stunting)"},
        {"id": "DM_POP_TOT", "name": "Total population"}
      ]
    }]
  }
}"#;

pub(crate) const DATAFLOW_LIST: &str = r#"{
  "data": {
    "dataflows": [
      {"id": "CME", "version": "1.0", "agencyID": "UNICEF", "name": "Child Mortality"},
      {"id": "NUTRITION", "version": "1.0", "agencyID": "UNICEF", "name": "Nutrition"}
    ]
  }
}"#;

pub(crate) const CME_STRUCTURE: &str = r#"{
  "data": {
    "dataflows": [{
      "id": "CME", "version": "1.0", "agencyID": "UNICEF", "name": "Child Mortality",
      "structure": "urn:sdmx:org.sdmx.infomodel.datastructure.DataStructure=UNICEF:DSD_CME(1.0)"
    }],
    "dataStructures": [{
      "id": "DSD_CME",
      "dataStructureComponents": {
        "dimensionList": {
          "dimensions": [
            {"id": "REF_AREA", "position": 0, "localRepresentation": {"enumeration": "urn:sdmx:org.sdmx.infomodel.codelist.Codelist=UNICEF:CL_COUNTRY(1.0)"}},
            {"id": "INDICATOR", "position": 1, "localRepresentation": {"enumeration": "urn:sdmx:org.sdmx.infomodel.codelist.Codelist=UNICEF:CL_UNICEF_INDICATOR(1.0)"}},
            {"id": "SEX", "position": 2, "localRepresentation": {"enumeration": "urn:sdmx:org.sdmx.infomodel.codelist.Codelist=UNICEF:CL_SEX(1.0)"}},
            {"id": "WEALTH_QUINTILE", "position": 3, "localRepresentation": {"enumeration": "urn:sdmx:org.sdmx.infomodel.codelist.Codelist=UNICEF:CL_WEALTH_QUINTILE(1.0)"}}
          ],
          "timeDimensions": [{"id": "TIME_PERIOD", "position": 4}]
        },
        "attributeList": {"attributes": [{"id": "UNIT_MEASURE"}, {"id": "OBS_STATUS"}]}
      }
    }],
    "codelists": [
      {"id": "CL_COUNTRY", "codes": [
        {"id": "BGD", "name": "Bangladesh"}, {"id": "BRA", "name": "Brazil"},
        {"id": "CHN", "name": "China"}, {"id": "IND", "name": "India"},
        {"id": "PAK", "name": "Pakistan"}]},
      {"id": "CL_UNICEF_INDICATOR", "codes": [
        {"id": "CME_MRY0T4", "name": "Under-five mortality rate"},
        {"id": "CME_MRM0", "name": "Neonatal mortality rate"}]},
      {"id": "CL_SEX", "codes": [
        {"id": "_T", "name": "Total"}, {"id": "F", "name": "Female"}, {"id": "M", "name": "Male"}]},
      {"id": "CL_WEALTH_QUINTILE", "codes": [
        {"id": "_T", "name": "Total"}, {"id": "Q1", "name": "Lowest"}, {"id": "Q5", "name": "Highest"}]}
    ]
  }
}"#;

pub(crate) const NUTRITION_STRUCTURE: &str = r#"{
  "data": {
    "dataflows": [{
      "id": "NUTRITION", "version": "1.0", "agencyID": "UNICEF", "name": "Nutrition",
      "structure": "urn:sdmx:org.sdmx.infomodel.datastructure.DataStructure=UNICEF:DSD_NUTRITION(1.0)"
    }],
    "dataStructures": [{
      "id": "DSD_NUTRITION",
      "dataStructureComponents": {
        "dimensionList": {
          "dimensions": [
            {"id": "REF_AREA", "position": 0, "localRepresentation": {"enumeration": "urn:sdmx:org.sdmx.infomodel.codelist.Codelist=UNICEF:CL_COUNTRY(1.0)"}},
            {"id": "INDICATOR", "position": 1, "localRepresentation": {"enumeration": "urn:sdmx:org.sdmx.infomodel.codelist.Codelist=UNICEF:CL_UNICEF_INDICATOR(1.0)"}},
            {"id": "SEX", "position": 2, "localRepresentation": {"enumeration": "urn:sdmx:org.sdmx.infomodel.codelist.Codelist=UNICEF:CL_SEX(1.0)"}},
            {"id": "RESIDENCE", "position": 3, "localRepresentation": {"enumeration": "urn:sdmx:org.sdmx.infomodel.codelist.Codelist=UNICEF:CL_RESIDENCE(1.0)"}}
          ],
          "timeDimensions": [{"id": "TIME_PERIOD", "position": 4}]
        },
        "attributeList": {"attributes": [{"id": "DATA_SOURCE"}]}
      }
    }],
    "codelists": [
      {"id": "CL_COUNTRY", "codes": [
        {"id": "BGD", "name": "Bangladesh"}, {"id": "IND", "name": "India"}, {"id": "PAK", "name": "Pakistan"}]},
      {"id": "CL_UNICEF_INDICATOR", "codes": [{"id": "NT_ANT_HAZ_NE2", "name": "Stunting"}]},
      {"id": "CL_SEX", "codes": [{"id": "_T", "name": "Total"}, {"id": "F", "name": "Female"}, {"id": "M", "name": "Male"}]},
      {"id": "CL_RESIDENCE", "codes": [{"id": "_T", "name": "Total"}, {"id": "U", "name": "Urban"}, {"id": "R", "name": "Rural"}]}
    ]
  }
}"#;

/// Under-five and neonatal mortality. BGD, IND and PAK have different
/// latest years; IND also has a female series.
pub(crate) const CME_CSV: &str = "\
DATAFLOW,REF_AREA,INDICATOR,SEX,WEALTH_QUINTILE,TIME_PERIOD,OBS_VALUE,UNIT_MEASURE,OBS_STATUS
UNICEF:CME(1.0),BRA,CME_MRY0T4,_T,_T,2014,16.9,D_PER_1000_B,A
UNICEF:CME(1.0),BRA,CME_MRY0T4,_T,_T,2015,16.2,D_PER_1000_B,A
UNICEF:CME(1.0),BRA,CME_MRY0T4,_T,_T,2019,14.1,D_PER_1000_B,A
UNICEF:CME(1.0),BRA,CME_MRY0T4,_T,_T,2023,13.8,D_PER_1000_B,E
UNICEF:CME(1.0),BRA,CME_MRY0T4,_T,_T,2024,13.5,D_PER_1000_B,E
UNICEF:CME(1.0),BRA,CME_MRM0,_T,_T,2015,8.1,D_PER_1000_B,A
UNICEF:CME(1.0),CHN,CME_MRY0T4,_T,_T,2015,10.7,D_PER_1000_B,A
UNICEF:CME(1.0),CHN,CME_MRY0T4,_T,_T,2021,6.9,D_PER_1000_B,A
UNICEF:CME(1.0),CHN,CME_MRY0T4,_T,_T,2024,5.8,D_PER_1000_B,E
UNICEF:CME(1.0),IND,CME_MRY0T4,_T,_T,2014,45.9,D_PER_1000_B,A
UNICEF:CME(1.0),IND,CME_MRY0T4,_T,_T,2015,43.6,D_PER_1000_B,A
UNICEF:CME(1.0),IND,CME_MRY0T4,_T,_T,2020,32.6,D_PER_1000_B,A
UNICEF:CME(1.0),IND,CME_MRY0T4,_T,_T,2023,28.7,D_PER_1000_B,E
UNICEF:CME(1.0),IND,CME_MRY0T4,F,_T,2024,27.9,D_PER_1000_B,E
UNICEF:CME(1.0),IND,CME_MRM0,_T,_T,2015,25.4,D_PER_1000_B,A
UNICEF:CME(1.0),BGD,CME_MRY0T4,_T,_T,2018,30.8,D_PER_1000_B,A
UNICEF:CME(1.0),BGD,CME_MRY0T4,_T,_T,2021,27.3,D_PER_1000_B,A
UNICEF:CME(1.0),PAK,CME_MRY0T4,_T,_T,2019,65.2,D_PER_1000_B,A
UNICEF:CME(1.0),PAK,CME_MRY0T4,_T,_T,2022,61.2,D_PER_1000_B,A
";

/// How a route answers.
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    /// A fixed status and body.
    Fixed(u16, String),
    /// SDMX-CSV rows filtered by the query key, answering 404 when none
    /// match. Period parameters are ignored.
    Data {
        dimensions: Vec<String>,
        csv: String,
    },
}

#[derive(Debug)]
struct Route {
    pattern: String,
    reply: Reply,
}

/// Answers each URL with the first route whose pattern it contains;
/// unmatched URLs get a 404.
#[derive(Debug, Default)]
pub(crate) struct ScriptedTransport {
    routes: Mutex<Vec<Route>>,
    calls: Mutex<Vec<String>>,
    latency: Option<Duration>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Structure routes and CME data.
    pub(crate) fn unicef() -> Self {
        Self::new()
            .fixed("codelist/UNICEF/CL_UNICEF_INDICATOR", 200, INDICATOR_CODELIST)
            .fixed("dataflow/UNICEF?", 200, DATAFLOW_LIST)
            .fixed("dataflow/UNICEF/CME/", 200, CME_STRUCTURE)
            .fixed("dataflow/UNICEF/NUTRITION/", 200, NUTRITION_STRUCTURE)
            .data(
                "data/UNICEF,CME,1.0/",
                &["REF_AREA", "INDICATOR", "SEX", "WEALTH_QUINTILE"],
                CME_CSV,
            )
    }

    pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub(crate) fn fixed(self, pattern: &str, status: u16, body: &str) -> Self {
        self.push(pattern, Reply::Fixed(status, body.to_string()))
    }

    pub(crate) fn data(self, pattern: &str, dimensions: &[&str], csv: &str) -> Self {
        let dimensions = dimensions.iter().map(ToString::to_string).collect();
        self.push(
            pattern,
            Reply::Data {
                dimensions,
                csv: csv.to_string(),
            },
        )
    }

    fn push(self, pattern: &str, reply: Reply) -> Self {
        self.routes.lock().unwrap().push(Route {
            pattern: pattern.to_string(),
            reply,
        });
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn calls_matching(&self, pattern: &str) -> usize {
        self.calls().iter().filter(|u| u.contains(pattern)).count()
    }

    fn answer(&self, url: &str) -> HttpResponse {
        let routes = self.routes.lock().unwrap();
        let Some(route) = routes.iter().find(|r| url.contains(&r.pattern)) else {
            return HttpResponse::new(404, "NoResultsFound");
        };
        match &route.reply {
            Reply::Fixed(status, body) => HttpResponse::new(*status, body.clone()),
            Reply::Data { dimensions, csv } => {
                let key = url
                    .split_once(&route.pattern)
                    .map(|(_, rest)| rest.split('?').next().unwrap_or_default())
                    .unwrap_or_default();
                match filter_csv(csv, dimensions, key) {
                    Some(body) => HttpResponse::new(200, body),
                    None => HttpResponse::new(404, "NoResultsFound"),
                }
            }
        }
    }
}

/// Keeps the CSV rows matching every constrained key segment.
fn filter_csv(csv: &str, dimensions: &[String], key: &str) -> Option<String> {
    let mut lines = csv.lines();
    let header = lines.next()?;
    let columns: Vec<&str> = header.split(',').collect();
    let constraints: Vec<(usize, Vec<&str>)> = dimensions
        .iter()
        .zip(key.split('.'))
        .filter(|(_, segment)| !segment.is_empty())
        .filter_map(|(dim, segment)| {
            let idx = columns.iter().position(|c| c == dim)?;
            Some((idx, segment.split('+').collect()))
        })
        .collect();

    let rows: Vec<&str> = lines
        .filter(|line| {
            let fields: Vec<&str> = line.split(',').collect();
            constraints
                .iter()
                .all(|(idx, codes)| codes.contains(&fields[*idx]))
        })
        .collect();
    if rows.is_empty() {
        return None;
    }
    Some(format!("{header}\n{}\n", rows.join("\n")))
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn get(
        &self,
        url: &str,
        _headers: &[(&str, &str)],
        _timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        self.calls.lock().unwrap().push(url.to_string());
        let response = self.answer(url);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        Ok(response)
    }
}
