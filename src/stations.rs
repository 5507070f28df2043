/// Station registry for the Hudson estuary water grid.
///
/// Defines the default list of USGS monitoring stations the service polls
/// when the config file does not supply its own `[[stations]]` table, plus
/// the default parameter-code set requested from each. All other modules
/// take station lists from here (or from config) rather than hardcoding
/// site codes.

use serde::{Deserialize, Serialize};

pub use crate::model::{
    PARAM_DISCHARGE, PARAM_DISSOLVED_OXYGEN, PARAM_DO_SATURATION, PARAM_PH, PARAM_SALINITY,
    PARAM_SPECIFIC_CONDUCTANCE, PARAM_STAGE, PARAM_TURBIDITY, PARAM_WATER_TEMP,
};

// ---------------------------------------------------------------------------
// Station metadata
// ---------------------------------------------------------------------------

/// Metadata for a single USGS monitoring station.
///
/// Field names follow NWIS site-service naming so the same struct can be
/// read from the config file and served from `/site-info` unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    /// USGS site number (8-15 digits).
    pub site_no: String,
    /// Station name.
    pub station_nm: String,
    /// WGS84 latitude.
    pub latitude: f64,
    /// WGS84 longitude.
    pub longitude: f64,
}

struct StationDef {
    site_no: &'static str,
    station_nm: &'static str,
    latitude: f64,
    longitude: f64,
}

/// Default stations. Coordinates are approximate (city-level) and only
/// used for display.
static DEFAULT_STATIONS: &[StationDef] = &[
    StationDef {
        site_no: "01376500",
        station_nm: "Poughkeepsie",
        latitude: 41.7004,
        longitude: -73.9210,
    },
    StationDef {
        site_no: "01358000",
        station_nm: "Albany",
        latitude: 42.6526,
        longitude: -73.7562,
    },
    StationDef {
        site_no: "01392010",
        station_nm: "Pier 25",
        latitude: 40.7203,
        longitude: -74.0143,
    },
];

/// Parameter codes requested from every station unless configured otherwise.
pub static DEFAULT_PARAMETER_CODES: &[&str] = &[
    PARAM_WATER_TEMP,
    PARAM_DISCHARGE,
    PARAM_STAGE,
    PARAM_SPECIFIC_CONDUCTANCE,
    PARAM_DISSOLVED_OXYGEN,
    PARAM_DO_SATURATION,
    PARAM_PH,
    PARAM_SALINITY,
    PARAM_TURBIDITY,
];

/// The built-in registry as owned entries.
pub fn default_stations() -> Vec<Station> {
    DEFAULT_STATIONS
        .iter()
        .map(|d| Station {
            site_no: d.site_no.to_string(),
            station_nm: d.station_nm.to_string(),
            latitude: d.latitude,
            longitude: d.longitude,
        })
        .collect()
}

pub fn default_parameter_codes() -> Vec<String> {
    DEFAULT_PARAMETER_CODES.iter().map(|c| c.to_string()).collect()
}

/// Returns the site codes for a station list, in list order.
pub fn all_site_codes(stations: &[Station]) -> Vec<String> {
    stations.iter().map(|s| s.site_no.clone()).collect()
}

/// Looks up a station by site code. Returns `None` if not found.
pub fn find_station<'a>(stations: &'a [Station], site_no: &str) -> Option<&'a Station> {
    stations.iter().find(|s| s.site_no == site_no)
}

/// USGS site numbers are 8 to 15 ASCII digits. The IV service silently drops
/// anything else from its response.
pub fn is_valid_site_code(code: &str) -> bool {
    (8..=15).contains(&code.len()) && code.chars().all(|c| c.is_ascii_digit())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
