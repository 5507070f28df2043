/// Integration tests for the fetch → merge → write refresh cycle
///
/// These tests drive `RefreshCoordinator` end to end against a scripted
/// in-memory `SiteSource` and a temporary snapshot directory:
/// 1. Partial failure still produces a snapshot from the surviving sites
/// 2. Total failure / empty upstream keeps the previous snapshot byte-for-byte
/// 3. A successful cycle replaces the previous snapshot wholesale
/// 4. Snapshot ordering and normalized field names as persisted on disk
///
/// No network access is needed.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use tempfile::tempdir;

use watergrid_service::ingest::SiteSource;
use watergrid_service::model::{
    CycleError, DateRange, RawRow, ServiceError, SiteFetchError, SiteFetchOutcome,
};
use watergrid_service::refresh::{RefreshCoordinator, RefreshSettings};
use watergrid_service::store::SnapshotStore;

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

const ALBANY: &str = "01358000";
const POUGHKEEPSIE: &str = "01376500";

/// Per-site canned outcomes, swappable between cycles.
#[derive(Default)]
struct ScriptedSource {
    outcomes: Mutex<HashMap<String, SiteFetchOutcome>>,
}

impl ScriptedSource {
    fn set(&self, site: &str, outcome: SiteFetchOutcome) {
        self.outcomes.lock().insert(site.to_string(), outcome);
    }
}

/// Handle the coordinator owns while the test keeps scripting the source.
struct Shared(Arc<ScriptedSource>);

impl SiteSource for Shared {
    fn fetch_site(&self, site_code: &str, _: &[String], _: &DateRange) -> SiteFetchOutcome {
        self.0
            .outcomes
            .lock()
            .get(site_code)
            .cloned()
            .unwrap_or(SiteFetchOutcome::Empty)
    }
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 9, 2, 4, 0, 0).unwrap()
}

fn rows(site: &str, stamps: &[&str], gage: f64) -> SiteFetchOutcome {
    SiteFetchOutcome::Data(
        stamps
            .iter()
            .map(|ts| RawRow {
                datetime: ts.to_string(),
                columns: BTreeMap::from([
                    ("site_no".to_string(), site.to_string()),
                    ("00065".to_string(), gage.to_string()),
                    ("00065_cd".to_string(), "P".to_string()),
                ]),
            })
            .collect(),
    )
}

fn coordinator(dir: &std::path::Path) -> (RefreshCoordinator, Arc<ScriptedSource>) {
    let source = Arc::new(ScriptedSource::default());
    let coordinator = RefreshCoordinator::new(
        SnapshotStore::new(dir.join("water_data.json")),
        Box::new(Shared(source.clone())),
        RefreshSettings {
            site_codes: vec![ALBANY.to_string(), POUGHKEEPSIE.to_string()],
            parameter_codes: vec!["00065".to_string()],
            lookback: Duration::days(7),
            max_concurrent_fetches: 2,
        },
    );
    (coordinator, source)
}

fn snapshot_json(coordinator: &RefreshCoordinator) -> Vec<serde_json::Value> {
    let (bytes, _) = coordinator.store().read().expect("snapshot should exist");
    serde_json::from_slice::<serde_json::Value>(&bytes)
        .expect("snapshot is valid JSON")
        .as_array()
        .expect("snapshot is an array")
        .clone()
}

// ---------------------------------------------------------------------------
// Partial and total failure
// ---------------------------------------------------------------------------

#[test]
fn test_one_site_network_error_cycle_still_succeeds() {
    let dir = tempdir().unwrap();
    let (coordinator, source) = coordinator(dir.path());
    source.set(
        ALBANY,
        rows(
            ALBANY,
            &[
                "2023-09-01T00:00:00.000-04:00",
                "2023-09-01T00:15:00.000-04:00",
                "2023-09-01T00:30:00.000-04:00",
            ],
            3.2,
        ),
    );
    source.set(
        POUGHKEEPSIE,
        SiteFetchOutcome::Failed(SiteFetchError::RequestError("connection reset".into())),
    );

    let summary = coordinator.run_cycle_at(now()).expect("partial failure is a success");
    assert_eq!(summary.rows, 3);
    assert_eq!(summary.sites_failed, 1);

    let status = coordinator.status();
    assert_eq!(status.last_success, Some(now()));
    assert!(status.last_error.is_none(), "no error recorded for this cycle");
    assert_eq!(snapshot_json(&coordinator).len(), 3);
}

#[test]
fn test_all_sites_empty_fails_cycle_and_keeps_previous_snapshot() {
    let dir = tempdir().unwrap();
    let (coordinator, source) = coordinator(dir.path());

    source.set(ALBANY, rows(ALBANY, &["2023-09-01T12:00:00Z"], 1.0));
    coordinator.run_cycle_at(now()).expect("first cycle succeeds");
    let before = fs::read(coordinator.store().path()).unwrap();

    source.set(ALBANY, SiteFetchOutcome::Empty);
    source.set(POUGHKEEPSIE, SiteFetchOutcome::Empty);
    let later = now() + Duration::minutes(15);
    let err = coordinator.run_cycle_at(later).unwrap_err();
    assert_eq!(err, CycleError::NoData);

    assert_eq!(fs::read(coordinator.store().path()).unwrap(), before, "snapshot bytes unchanged");
    let status = coordinator.status();
    assert_eq!(status.last_success, Some(now()), "last success is retained");
    let recorded = status.last_error.as_ref().expect("error recorded");
    assert_eq!(recorded.at, later);
    assert!(recorded.message.contains("no data returned"));
    assert!(status.is_stale());
}

#[test]
fn test_all_sites_failing_on_cold_start_is_not_available() {
    let dir = tempdir().unwrap();
    let (coordinator, source) = coordinator(dir.path());
    source.set(ALBANY, SiteFetchOutcome::Failed(SiteFetchError::HttpError(503)));
    source.set(POUGHKEEPSIE, SiteFetchOutcome::Failed(SiteFetchError::HttpError(503)));

    let err = coordinator.get_snapshot().unwrap_err();
    assert!(matches!(err, ServiceError::NotAvailable(_)));
    assert!(!coordinator.store().exists());
    assert!(coordinator.status().last_error.is_some());
}

// ---------------------------------------------------------------------------
// Replacement and ordering
// ---------------------------------------------------------------------------

#[test]
fn test_success_replaces_snapshot_without_mixing_rows() {
    let dir = tempdir().unwrap();
    let (coordinator, source) = coordinator(dir.path());

    source.set(ALBANY, rows(ALBANY, &["2023-09-01T10:00:00Z", "2023-09-01T11:00:00Z"], 1.0));
    coordinator.run_cycle_at(now()).unwrap();

    source.set(ALBANY, SiteFetchOutcome::Empty);
    source.set(POUGHKEEPSIE, rows(POUGHKEEPSIE, &["2023-09-01T12:00:00Z"], 9.0));
    coordinator.run_cycle_at(now() + Duration::minutes(15)).unwrap();

    let rows = snapshot_json(&coordinator);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["Site"], POUGHKEEPSIE);
    assert_eq!(rows[0]["Gage Height (ft)"], 9.0);
}

#[test]
fn test_persisted_snapshot_is_ordered_and_normalized() {
    let dir = tempdir().unwrap();
    let (coordinator, source) = coordinator(dir.path());
    source.set(
        POUGHKEEPSIE,
        rows(POUGHKEEPSIE, &["2023-09-01T08:00:00Z", "2023-09-01T07:00:00.000-04:00"], 2.0),
    );
    source.set(ALBANY, rows(ALBANY, &["2023-09-01T11:00:00Z", "not a time"], 5.0));

    coordinator.run_cycle_at(now()).unwrap();
    let rows = snapshot_json(&coordinator);

    let keys: Vec<(String, String)> = rows
        .iter()
        .map(|r| {
            (
                r["Datetime"].as_str().unwrap().to_string(),
                r["Site"].as_str().unwrap().to_string(),
            )
        })
        .collect();
    assert_eq!(
        keys,
        [
            ("2023-09-01T08:00:00Z".to_string(), POUGHKEEPSIE.to_string()),
            ("2023-09-01T11:00:00Z".to_string(), ALBANY.to_string()),
            ("2023-09-01T11:00:00Z".to_string(), POUGHKEEPSIE.to_string()),
        ]
    );
    assert_eq!(rows[0]["00065_cd:"], "P");
    assert!(rows[0].get("00065").is_none(), "raw code should be renamed");
}

#[test]
fn test_rows_outside_lookback_window_are_not_persisted() {
    let dir = tempdir().unwrap();
    let (coordinator, source) = coordinator(dir.path());
    let too_old = (now() - Duration::days(8)).to_rfc3339();
    source.set(ALBANY, rows(ALBANY, &[too_old.as_str(), "2023-09-01T11:00:00Z"], 5.0));

    coordinator.run_cycle_at(now()).unwrap();
    assert_eq!(snapshot_json(&coordinator).len(), 1);
}
