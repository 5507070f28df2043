//! Merge engine.
//!
//! Turns the per-site results of one cycle into a single `MergedSnapshot`:
//! normalizes every column name, reformats every timestamp to canonical
//! UTC, drops rows whose timestamp cannot be parsed or falls outside the
//! cycle's window, collapses duplicate (site, timestamp) pairs, and orders
//! the result by (timestamp, site).

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Timelike, Utc};

use crate::model::{
    CycleError, CycleSummary, DateRange, FieldValue, MergedSnapshot, QUALIFIER_SUFFIX, RawRow,
    SITE_COLUMN, SiteFetchOutcome, SiteResult, StationReading,
};
use crate::normalize::{normalize_field_name, qualifier_owner, strip_revision_suffix};

/// Merge result plus the bookkeeping the refresh cycle reports.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeReport {
    pub snapshot: MergedSnapshot,
    pub summary: CycleSummary,
    /// Rows discarded because their timestamp did not parse.
    pub unparsable_rows: usize,
    /// Rows discarded because they fell outside the window.
    pub out_of_window_rows: usize,
}

impl MergeReport {
    /// The snapshot, or `NoData` when nothing survived the merge.
    pub fn into_snapshot(self) -> Result<MergedSnapshot, CycleError> {
        if self.snapshot.is_empty() {
            Err(CycleError::NoData)
        } else {
            Ok(self.snapshot)
        }
    }
}

/// Parses an upstream timestamp to UTC at second precision.
///
/// Offset-bearing forms (`2023-09-01T00:15:00.000-04:00`, `...Z`) are
/// converted; naive forms are taken as already UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    let parsed = DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M%:z").map(|dt| dt.with_timezone(&Utc))
        })
        .ok()
        .or_else(|| {
            ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M"]
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
                .map(|naive| naive.and_utc())
        })?;
    parsed.with_nanosecond(0)
}

/// Merge all per-site results of one cycle.
pub fn merge_site_results(results: &[SiteResult], window: &DateRange) -> MergeReport {
    let mut summary = CycleSummary {
        sites_total: results.len(),
        ..Default::default()
    };
    let mut merged: BTreeMap<(DateTime<Utc>, String), BTreeMap<String, FieldValue>> =
        BTreeMap::new();
    let mut unparsable_rows = 0;
    let mut out_of_window_rows = 0;

    for result in results {
        let rows = match &result.outcome {
            SiteFetchOutcome::Data(rows) => {
                summary.sites_ok += 1;
                rows
            }
            SiteFetchOutcome::Empty => {
                summary.sites_empty += 1;
                continue;
            }
            SiteFetchOutcome::Failed(_) => {
                summary.sites_failed += 1;
                continue;
            }
        };

        for row in rows {
            let Some(timestamp) = parse_timestamp(&row.datetime) else {
                unparsable_rows += 1;
                continue;
            };
            if !window.contains(&timestamp) {
                out_of_window_rows += 1;
                continue;
            }

            let fields = normalize_row(row);
            if fields.is_empty() {
                continue;
            }
            merged
                .entry((timestamp, result.site_code.clone()))
                .or_default()
                .extend(fields);
        }
    }

    let readings: Vec<StationReading> = merged
        .into_iter()
        .map(|((timestamp, site_code), fields)| StationReading {
            site_code,
            timestamp,
            fields,
        })
        .collect();
    summary.rows = readings.len();

    MergeReport {
        snapshot: MergedSnapshot { readings },
        summary,
        unparsable_rows,
        out_of_window_rows,
    }
}

/// A raw measurement column and its own qualifier, before naming.
#[derive(Debug, Default)]
struct SensorColumns<'a> {
    value: Option<FieldValue>,
    qualifier: Option<&'a str>,
}

/// Normalizes one row's columns.
///
/// When several sensors report the same parameter (`00010`, `00010_2`), one
/// of them is kept per parameter, with its value and qualifier taken
/// together. The unsuffixed primary wins when it has a value.
fn normalize_row(row: &RawRow) -> BTreeMap<String, FieldValue> {
    // base code -> raw sensor column -> that sensor's columns
    let mut groups: BTreeMap<&str, BTreeMap<&str, SensorColumns>> = BTreeMap::new();
    for (column, raw) in &row.columns {
        if column == SITE_COLUMN {
            continue;
        }
        let owner = qualifier_owner(column);
        let sensor = owner.unwrap_or(column.as_str());
        let columns = groups
            .entry(strip_revision_suffix(sensor))
            .or_default()
            .entry(sensor)
            .or_default();
        if owner.is_some() {
            let trimmed = raw.trim();
            if !trimmed.is_empty() {
                columns.qualifier = Some(trimmed);
            }
        } else {
            columns.value = FieldValue::parse(raw);
        }
    }

    let mut fields = BTreeMap::new();
    for (base, sensors) in &groups {
        let Some((sensor, columns)) = pick_sensor(base, sensors) else {
            continue;
        };
        if let Some(value) = &columns.value {
            fields.insert(normalize_field_name(sensor), value.clone());
        }
        if let Some(qualifier) = columns.qualifier {
            fields.insert(
                normalize_field_name(&format!("{sensor}{QUALIFIER_SUFFIX}")),
                FieldValue::Text(qualifier.to_string()),
            );
        }
    }
    fields
}

/// First sensor with a value, primary before suffixed ones. A sensor with
/// only a qualifier is used when no sensor has a value.
fn pick_sensor<'s, 'a>(
    base: &str,
    sensors: &'s BTreeMap<&'a str, SensorColumns<'a>>,
) -> Option<(&'a str, &'s SensorColumns<'a>)> {
    let primary_first = sensors
        .iter()
        .filter(|(name, _)| **name == base)
        .chain(sensors.iter().filter(|(name, _)| **name != base));

    let mut qualifier_only = None;
    for (name, columns) in primary_first {
        if columns.value.is_some() {
            return Some((*name, columns));
        }
        if qualifier_only.is_none() && columns.qualifier.is_some() {
            qualifier_only = Some((*name, columns));
        }
    }
    qualifier_only
}
