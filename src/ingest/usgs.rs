/// USGS NWIS Instantaneous Values (IV) API client
///
/// Builds per-site IV requests and pivots the WaterML-JSON response into a
/// wide raw table: one row per upstream `dateTime`, with a `site_no` column,
/// one column per parameter code and a matching `<code>_cd` qualifier
/// column. When a site reports the same parameter from more than one sensor,
/// the extra series get a revision suffix (`00010_2`, `00010_3`, ...).
///
/// API Documentation: https://waterservices.usgs.gov/docs/instantaneous-values/

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::Deserialize;

use crate::ingest::SiteSource;
use crate::model::{
    DateRange, QUALIFIER_SUFFIX, RawRow, SITE_COLUMN, SiteFetchError, SiteFetchOutcome,
};

pub const NWIS_IV_URL: &str = "https://waterservices.usgs.gov/nwis/iv/";

/// NWIS sentinel for "no value" when a series does not declare its own.
const NO_DATA_SENTINEL: f64 = -999999.0;

// ============================================================================
// IV API Response Structures
// ============================================================================

#[derive(Debug, Deserialize)]
struct IvResponse {
    value: IvValue,
}

#[derive(Debug, Deserialize)]
struct IvValue {
    #[serde(rename = "timeSeries", default)]
    time_series: Vec<IvTimeSeries>,
}

#[derive(Debug, Deserialize)]
struct IvTimeSeries {
    #[serde(rename = "sourceInfo")]
    source_info: Option<IvSourceInfo>,
    variable: IvVariable,
    #[serde(default)]
    values: Vec<IvValueBlock>,
}

#[derive(Debug, Deserialize)]
struct IvSourceInfo {
    #[serde(rename = "siteCode", default)]
    site_code: Vec<IvCode>,
}

#[derive(Debug, Deserialize)]
struct IvVariable {
    #[serde(rename = "variableCode", default)]
    variable_code: Vec<IvCode>,
    #[serde(rename = "noDataValue")]
    no_data_value: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct IvCode {
    value: String,
}

/// One sensor's run of points within a time series.
#[derive(Debug, Deserialize)]
struct IvValueBlock {
    #[serde(default)]
    value: Vec<IvPoint>,
}

#[derive(Debug, Deserialize)]
struct IvPoint {
    value: String,
    #[serde(default)]
    qualifiers: Vec<String>,
    #[serde(rename = "dateTime")]
    date_time: String,
}

// ============================================================================
// URL construction
// ============================================================================

/// Builds an IV request URL for the given sites, parameters and date range.
pub fn build_iv_url(
    base_url: &str,
    site_codes: &[&str],
    parameter_codes: &[&str],
    range: &DateRange,
) -> String {
    format!(
        "{}?format=json&sites={}&parameterCd={}&startDT={}&endDT={}&siteStatus=all",
        base_url,
        site_codes.join(","),
        parameter_codes.join(","),
        range.start_date(),
        range.end_date(),
    )
}

// ============================================================================
// Parsing
// ============================================================================

/// Parses an IV JSON body into `site_code`'s raw rows.
///
/// Series belonging to other sites are ignored. Missing values (blank, the
/// series' `noDataValue`, or the -999999 sentinel) are omitted along with
/// their qualifiers. An empty `Vec` means the site had nothing in range.
pub fn parse_iv_response(site_code: &str, body: &str) -> Result<Vec<RawRow>, SiteFetchError> {
    let response: IvResponse =
        serde_json::from_str(body).map_err(|e| SiteFetchError::ParseError(e.to_string()))?;

    let mut rows: BTreeMap<String, RawRow> = BTreeMap::new();
    let mut blocks_per_code: HashMap<String, usize> = HashMap::new();

    for series in response.value.time_series {
        let belongs_here = series
            .source_info
            .as_ref()
            .and_then(|info| info.site_code.first())
            .map(|code| code.value == site_code)
            .unwrap_or(true);
        if !belongs_here {
            continue;
        }

        let Some(code) = series.variable.variable_code.first().map(|c| c.value.clone()) else {
            continue;
        };
        let no_data = series.variable.no_data_value.unwrap_or(NO_DATA_SENTINEL);

        for block in series.values {
            let seen = blocks_per_code.entry(code.clone()).or_insert(0);
            *seen += 1;
            let column = if *seen == 1 { code.clone() } else { format!("{}_{}", code, seen) };

            for point in block.value {
                if is_missing(&point.value, no_data) {
                    continue;
                }
                let row = rows.entry(point.date_time.clone()).or_insert_with(|| RawRow {
                    datetime: point.date_time.clone(),
                    columns: BTreeMap::from([(SITE_COLUMN.to_string(), site_code.to_string())]),
                });
                row.columns.insert(column.clone(), point.value.trim().to_string());
                if !point.qualifiers.is_empty() {
                    row.columns.insert(
                        format!("{}{}", column, QUALIFIER_SUFFIX),
                        point.qualifiers.join(","),
                    );
                }
            }
        }
    }

    Ok(rows.into_values().collect())
}

fn is_missing(raw: &str, no_data: f64) -> bool {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return true;
    }
    match trimmed.parse::<f64>() {
        Ok(v) => v == no_data || v == NO_DATA_SENTINEL,
        Err(_) => false,
    }
}

// ============================================================================
// API Client
// ============================================================================

/// Blocking NWIS client. Construct it outside any async runtime.
#[derive(Debug, Clone)]
pub struct UsgsClient {
    http: reqwest::blocking::Client,
    base_url: String,
}

impl UsgsClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("watergrid_service/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.to_string(),
        })
    }

    /// Fetch one site's raw table.
    pub fn fetch_iv(
        &self,
        site_code: &str,
        parameter_codes: &[String],
        range: &DateRange,
    ) -> Result<Vec<RawRow>, SiteFetchError> {
        let params: Vec<&str> = parameter_codes.iter().map(String::as_str).collect();
        let url = build_iv_url(&self.base_url, &[site_code], &params, range);

        let response = self
            .http
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .map_err(|e| SiteFetchError::RequestError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SiteFetchError::HttpError(status.as_u16()));
        }

        let body = response
            .text()
            .map_err(|e| SiteFetchError::RequestError(e.to_string()))?;

        parse_iv_response(site_code, &body)
    }
}

impl SiteSource for UsgsClient {
    fn fetch_site(
        &self,
        site_code: &str,
        parameter_codes: &[String],
        range: &DateRange,
    ) -> SiteFetchOutcome {
        match self.fetch_iv(site_code, parameter_codes, range) {
            Ok(rows) if rows.is_empty() => SiteFetchOutcome::Empty,
            Ok(rows) => SiteFetchOutcome::Data(rows),
            Err(e) => SiteFetchOutcome::Failed(e),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    const TWO_PARAM_RESPONSE: &str = r#"{
      "value": {
        "timeSeries": [
          {
            "sourceInfo": { "siteCode": [ { "value": "01358000" } ] },
            "variable": {
              "variableCode": [ { "value": "00065" } ],
              "noDataValue": -999999.0
            },
            "values": [
              { "value": [
                { "value": "3.21", "qualifiers": ["P"], "dateTime": "2023-09-01T00:00:00.000-04:00" },
                { "value": "-999999", "qualifiers": ["P", "Eqp"], "dateTime": "2023-09-01T00:15:00.000-04:00" }
              ] }
            ]
          },
          {
            "sourceInfo": { "siteCode": [ { "value": "01358000" } ] },
            "variable": {
              "variableCode": [ { "value": "00010" } ],
              "noDataValue": -999999.0
            },
            "values": [
              { "value": [
                { "value": "22.4", "qualifiers": ["P"], "dateTime": "2023-09-01T00:00:00.000-04:00" },
                { "value": "22.3", "qualifiers": ["P"], "dateTime": "2023-09-01T00:15:00.000-04:00" }
              ] },
              { "value": [
                { "value": "22.9", "qualifiers": ["A", "e"], "dateTime": "2023-09-01T00:00:00.000-04:00" }
              ] }
            ]
          }
        ]
      }
    }"#;

    #[test]
    fn test_build_iv_url_contains_all_query_parts() {
        let now = Utc.with_ymd_and_hms(2023, 9, 2, 4, 0, 0).unwrap();
        let lookback = chrono::Duration::days(DateRange::DEFAULT_LOOKBACK_DAYS);
        let range = DateRange::lookback(now, lookback);
        let url = build_iv_url(NWIS_IV_URL, &["01376500"], &["00065", "00095"], &range);

        assert!(url.starts_with("https://waterservices.usgs.gov/nwis/iv/?format=json"));
        assert!(url.contains("sites=01376500"));
        assert!(url.contains("parameterCd=00065,00095"));
        assert!(url.contains("startDT=2023-08-26"));
        assert!(url.contains("endDT=2023-09-02"));
    }

    #[test]
    fn test_parse_pivots_series_into_rows_by_datetime() {
        let rows = parse_iv_response("01358000", TWO_PARAM_RESPONSE).expect("valid payload");
        assert_eq!(rows.len(), 2);

        let first = &rows[0];
        assert_eq!(first.datetime, "2023-09-01T00:00:00.000-04:00");
        assert_eq!(first.columns["site_no"], "01358000");
        assert_eq!(first.columns["00065"], "3.21");
        assert_eq!(first.columns["00065_cd"], "P");
        assert_eq!(first.columns["00010"], "22.4");
        assert_eq!(first.columns["00010_2"], "22.9");
        assert_eq!(first.columns["00010_2_cd"], "A,e");
    }

    #[test]
    fn test_parse_omits_sentinel_values_and_their_qualifiers() {
        let rows = parse_iv_response("01358000", TWO_PARAM_RESPONSE).expect("valid payload");
        let second = &rows[1];
        assert!(!second.columns.contains_key("00065"));
        assert!(!second.columns.contains_key("00065_cd"));
        assert_eq!(second.columns["00010"], "22.3");
    }

    #[test]
    fn test_parse_ignores_series_for_other_sites() {
        let rows = parse_iv_response("01376500", TWO_PARAM_RESPONSE).expect("valid payload");
        assert!(rows.is_empty());
    }

    #[test]
    fn test_parse_empty_time_series_is_empty_not_error() {
        let rows = parse_iv_response("01358000", r#"{"value":{"timeSeries":[]}}"#)
            .expect("empty series is valid");
        assert!(rows.is_empty());
    }

    #[test]
    fn test_parse_malformed_body_is_parse_error() {
        let err = parse_iv_response("01358000", "<html>maintenance</html>").unwrap_err();
        assert!(matches!(err, SiteFetchError::ParseError(_)), "got {:?}", err);
    }
}
