//! Column-name normalization.
//!
//! Upstream tables name columns by raw parameter code (`00010`), sometimes
//! with a sensor-revision suffix when a site runs more than one probe for
//! the same quantity (`00010_2`, `00095_ysi`), and pair every measurement
//! column with a `_cd` qualifier column. `normalize_field_name` maps all of
//! that onto stable display names. It is total: unknown codes pass through.

use crate::model::{QUALIFIER_MARKER, QUALIFIER_SUFFIX, SITE_COLUMN};

/// Raw parameter code → canonical display name.
pub static FIELD_NAME_TABLE: &[(&str, &str)] = &[
    ("00010", "Water Temperature (°C)"),
    ("00045", "Precipitation (in)"),
    ("00060", "Discharge (ft³/s)"),
    ("00065", "Gage Height (ft)"),
    ("00095", "Specific Conductance (µS/cm)"),
    ("00300", "Dissolved Oxygen (mg/L)"),
    ("00301", "Dissolved Oxygen Saturation (%)"),
    ("00400", "pH"),
    ("00480", "Salinity (ppt)"),
    ("32315", "Chlorophyll (RFU)"),
    ("62620", "Estuary Elevation (ft NAVD88)"),
    ("63680", "Turbidity (NTU)"),
    ("72137", "Tidally Filtered Discharge (ft³/s)"),
];

/// Named sensor suffixes NWIS-derived tables attach to duplicate probes.
/// Bare numeric suffixes (`_2`, `_3`) are recognized separately.
static NAMED_REVISION_SUFFIXES: &[&str] = &["_ysi", "_exo", "_top", "_bottom", "_surface"];

/// Display name for a raw code, if the table knows it.
pub fn lookup_display_name(code: &str) -> Option<&'static str> {
    FIELD_NAME_TABLE
        .iter()
        .find(|(raw, _)| *raw == code)
        .map(|(_, display)| *display)
}

/// Maps a raw column identifier to its canonical name.
///
/// - the site-identifier column is returned unchanged
/// - sensor-revision suffixes are stripped
/// - `<base>_cd` qualifier columns become `<base>_cd:` and skip the table
/// - anything else is looked up, falling back to the stripped identifier
pub fn normalize_field_name(raw: &str) -> String {
    if raw == SITE_COLUMN {
        return raw.to_string();
    }

    let stripped = strip_revision_suffix(raw);
    if let Some(base) = stripped.strip_suffix(QUALIFIER_SUFFIX) {
        let base = strip_revision_suffix(base);
        return format!("{base}{QUALIFIER_SUFFIX}{QUALIFIER_MARKER}");
    }

    lookup_display_name(stripped)
        .unwrap_or(stripped)
        .to_string()
}

/// The raw measurement column a `_cd` qualifier column belongs to, or
/// `None` if `column` is not a qualifier.
pub fn qualifier_owner(column: &str) -> Option<&str> {
    column
        .strip_suffix(QUALIFIER_SUFFIX)
        .or_else(|| strip_revision_suffix(column).strip_suffix(QUALIFIER_SUFFIX))
}

/// Removes trailing revision suffixes until none is left, so that stacked
/// suffixes (`00010_2_ysi`) collapse in one call.
pub fn strip_revision_suffix(name: &str) -> &str {
    let mut current = name;
    loop {
        let next = strip_one_suffix(current);
        if next.len() == current.len() {
            return current;
        }
        current = next;
    }
}

fn strip_one_suffix(name: &str) -> &str {
    for suffix in NAMED_REVISION_SUFFIXES {
        if let Some(stem) = name.strip_suffix(suffix) {
            if !stem.is_empty() {
                return stem;
            }
        }
    }

    match name.rsplit_once('_') {
        Some((stem, tail))
            if !stem.is_empty() && !tail.is_empty() && tail.chars().all(|c| c.is_ascii_digit()) =>
        {
            stem
        }
        _ => name,
    }
}
