/// Core data types for the water grid snapshot service.
///
/// This module defines the shared domain model imported by all other modules:
/// per-site raw tables as they come off the wire, the normalized
/// `StationReading` / `MergedSnapshot` pair that gets persisted, the
/// `RefreshStatus` record served next to it, and the error taxonomy.
/// It contains no I/O.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Parameter codes
// ---------------------------------------------------------------------------

/// USGS parameter code for water temperature, in degrees Celsius.
pub const PARAM_WATER_TEMP: &str = "00010";

/// USGS parameter code for discharge (streamflow), in cubic feet per second.
pub const PARAM_DISCHARGE: &str = "00060";

/// USGS parameter code for gage height (stage), in feet.
pub const PARAM_STAGE: &str = "00065";

/// USGS parameter code for specific conductance, in microsiemens per cm.
/// Used as the salinity proxy on the estuary gauges.
pub const PARAM_SPECIFIC_CONDUCTANCE: &str = "00095";

/// USGS parameter code for dissolved oxygen, in mg/L.
pub const PARAM_DISSOLVED_OXYGEN: &str = "00300";

/// USGS parameter code for dissolved oxygen, percent of saturation.
pub const PARAM_DO_SATURATION: &str = "00301";

/// USGS parameter code for pH, standard units.
pub const PARAM_PH: &str = "00400";

/// USGS parameter code for salinity, parts per thousand.
pub const PARAM_SALINITY: &str = "00480";

/// USGS parameter code for turbidity, FNU/NTU.
pub const PARAM_TURBIDITY: &str = "63680";

// ---------------------------------------------------------------------------
// Column conventions
// ---------------------------------------------------------------------------

/// Name of the site-identifier column in upstream tables.
pub const SITE_COLUMN: &str = "site_no";

/// Suffix marking a qualifier (data-quality flag) column.
pub const QUALIFIER_SUFFIX: &str = "_cd";

/// Marker appended to normalized qualifier column names.
pub const QUALIFIER_MARKER: char = ':';

/// Key under which the site identifier is written in the persisted snapshot.
pub const SNAPSHOT_SITE_KEY: &str = "Site";

/// Key under which the reading timestamp is written in the persisted snapshot.
pub const SNAPSHOT_TIME_KEY: &str = "Datetime";

/// Canonical timestamp layout: ISO 8601, UTC, second precision, trailing `Z`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Formats a timestamp in the canonical snapshot layout.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

// ---------------------------------------------------------------------------
// Date range
// ---------------------------------------------------------------------------

/// Inclusive UTC window a fetch cycle asks upstream for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    /// Default lookback when none is configured.
    pub const DEFAULT_LOOKBACK_DAYS: i64 = 7;

    /// The window `[now - lookback, now]`.
    pub fn lookback(now: DateTime<Utc>, lookback: Duration) -> Self {
        Self {
            start: now - lookback,
            end: now,
        }
    }

    pub fn contains(&self, ts: &DateTime<Utc>) -> bool {
        *ts >= self.start && *ts <= self.end
    }

    /// Start date as the `YYYY-MM-DD` string NWIS expects.
    pub fn start_date(&self) -> String {
        self.start.format("%Y-%m-%d").to_string()
    }

    /// End date as the `YYYY-MM-DD` string NWIS expects.
    pub fn end_date(&self) -> String {
        self.end.format("%Y-%m-%d").to_string()
    }
}

// ---------------------------------------------------------------------------
// Raw (pre-merge) types
// ---------------------------------------------------------------------------

/// One row of a site's raw upstream table: the upstream timestamp string
/// plus raw column identifier → raw cell text.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawRow {
    pub datetime: String, // as sent upstream, e.g. "2023-09-01T00:15:00.000-04:00"
    pub columns: BTreeMap<String, String>,
}

/// What fetching one site produced.
#[derive(Debug, Clone, PartialEq)]
pub enum SiteFetchOutcome {
    Data(Vec<RawRow>),
    /// The site answered but had no records in the requested range.
    Empty,
    Failed(SiteFetchError),
}

/// Per-site entry in the result list collected before merge.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteResult {
    pub site_code: String,
    pub outcome: SiteFetchOutcome,
}

// ---------------------------------------------------------------------------
// Normalized types
// ---------------------------------------------------------------------------

/// A single normalized cell value. Numeric text becomes `Number`;
/// everything else (qualifier flags, ice/equipment codes) stays `Text`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    /// Interprets raw cell text. Blank cells are missing and yield `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        match trimmed.parse::<f64>() {
            Ok(n) if n.is_finite() => Some(FieldValue::Number(n)),
            _ => Some(FieldValue::Text(trimmed.to_string())),
        }
    }
}

/// One station's readings at one instant, keyed by canonical field name.
///
/// Serializes as a flat object: `{"Site": "...", "Datetime": "...Z", <fields>}`.
#[derive(Debug, Clone, PartialEq)]
pub struct StationReading {
    pub site_code: String,
    pub timestamp: DateTime<Utc>,
    pub fields: BTreeMap<String, FieldValue>,
}

impl Serialize for StationReading {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + 2))?;
        map.serialize_entry(SNAPSHOT_SITE_KEY, &self.site_code)?;
        map.serialize_entry(SNAPSHOT_TIME_KEY, &format_timestamp(&self.timestamp))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// The merged dataset, ordered by (timestamp, site). Replaced wholesale by
/// every successful refresh; never patched.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct MergedSnapshot {
    pub readings: Vec<StationReading>,
}

impl MergedSnapshot {
    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Serialized form written to disk and served verbatim.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }
}

// ---------------------------------------------------------------------------
// Refresh status
// ---------------------------------------------------------------------------

/// Phase of the refresh state machine.
///
///   Idle → Fetching → Merging → Writing → Idle   (success)
///   Idle → Fetching → Failed → Idle              (failure)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CyclePhase {
    Idle,
    Fetching,
    Merging,
    Writing,
    Failed,
}

/// Site tallies for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CycleSummary {
    pub sites_total: usize,
    pub sites_ok: usize,
    pub sites_empty: usize,
    pub sites_failed: usize,
    pub rows: usize,
}

/// The last cycle failure, kept until overwritten by a newer one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefreshErrorRecord {
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Refresh health record served alongside the snapshot.
///
/// A success does not erase `last_error`; it only makes it older than
/// `last_success`, which is what `is_stale` looks at.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct RefreshStatus {
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<RefreshErrorRecord>,
    pub last_cycle: Option<CycleSummary>,
}

impl RefreshStatus {
    /// `true` when nothing has ever been written, or the most recent cycle
    /// outcome on record is a failure.
    pub fn is_stale(&self) -> bool {
        match (&self.last_success, &self.last_error) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(ok), Some(err)) => err.at > *ok,
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can arise when fetching one site from USGS NWIS.
/// Never fatal to a cycle: the site is logged and skipped.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SiteFetchError {
    /// Non-2xx HTTP response from the USGS API.
    #[error("HTTP error: {0}")]
    HttpError(u16),
    /// The request never produced a response (DNS, connect, timeout, ...).
    #[error("Request failed: {0}")]
    RequestError(String),
    /// The response body could not be deserialized.
    #[error("Parse error: {0}")]
    ParseError(String),
}

/// Errors that fail a whole refresh cycle. The previous snapshot is kept.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CycleError {
    /// Every site failed or came back empty.
    #[error("no data returned for requested range")]
    NoData,
    /// The merged snapshot could not be serialized or persisted.
    #[error("failed to write snapshot: {0}")]
    Serialization(String),
}

/// Errors surfaced to the query façade.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ServiceError {
    /// No snapshot has ever been produced and a synchronous refresh also
    /// failed. Retryable.
    #[error("snapshot not available: {0}")]
    NotAvailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, h, m, 0).unwrap()
    }

    #[test]
    fn test_field_value_parse_numeric_and_text() {
        assert_eq!(FieldValue::parse(" 12.5 "), Some(FieldValue::Number(12.5)));
        assert_eq!(FieldValue::parse("P"), Some(FieldValue::Text("P".into())));
        assert_eq!(FieldValue::parse("Ice"), Some(FieldValue::Text("Ice".into())));
        assert_eq!(FieldValue::parse("   "), None);
        assert_eq!(FieldValue::parse("NaN"), Some(FieldValue::Text("NaN".into())));
    }

    #[test]
    fn test_date_range_defaults_to_seven_day_lookback() {
        let now = at(13, 0);
        let range = DateRange::lookback(now, Duration::days(DateRange::DEFAULT_LOOKBACK_DAYS));
        assert_eq!(range.end, now);
        assert_eq!(range.start, now - Duration::days(7));
        assert_eq!(range.start_date(), "2024-04-24");
        assert_eq!(range.end_date(), "2024-05-01");
    }

    #[test]
    fn test_date_range_contains_is_inclusive() {
        let range = DateRange { start: at(10, 0), end: at(12, 0) };
        assert!(range.contains(&at(10, 0)));
        assert!(range.contains(&at(12, 0)));
        assert!(!range.contains(&at(12, 1)));
        assert!(!range.contains(&at(9, 59)));
    }

    #[test]
    fn test_station_reading_serializes_flat_with_canonical_timestamp() {
        let mut fields = BTreeMap::new();
        fields.insert("Gage Height (ft)".to_string(), FieldValue::Number(3.2));
        fields.insert("00065_cd:".to_string(), FieldValue::Text("P".into()));
        let reading = StationReading {
            site_code: "01358000".into(),
            timestamp: at(4, 15),
            fields,
        };

        let json = serde_json::to_value(&reading).unwrap();
        assert_eq!(json["Site"], "01358000");
        assert_eq!(json["Datetime"], "2024-05-01T04:15:00Z");
        assert_eq!(json["Gage Height (ft)"], 3.2);
        assert_eq!(json["00065_cd:"], "P");
    }

    #[test]
    fn test_status_staleness_follows_most_recent_outcome() {
        let mut status = RefreshStatus::default();
        assert!(status.is_stale(), "never refreshed should be stale");

        status.last_success = Some(at(10, 0));
        assert!(!status.is_stale());

        status.last_error = Some(RefreshErrorRecord { message: "boom".into(), at: at(10, 15) });
        assert!(status.is_stale(), "error newer than success should be stale");

        status.last_success = Some(at(10, 30));
        assert!(!status.is_stale(), "success after the error clears staleness");
        assert!(status.last_error.is_some(), "error history is retained");
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(SiteFetchError::HttpError(503).to_string(), "HTTP error: 503");
        assert_eq!(CycleError::NoData.to_string(), "no data returned for requested range");
    }
}
