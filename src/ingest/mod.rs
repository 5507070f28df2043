/// Upstream data retrieval.
///
/// `SiteSource` is the seam between the refresh cycle and whatever answers
/// per-site requests (the live NWIS client in `usgs`, or an in-memory fake
/// in tests). `fetch_all` fans a cycle's sites out over a bounded set of
/// worker threads and collects one `SiteResult` per site, in input order.

pub mod usgs;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use crate::logging::{self, DataSource};
use crate::model::{DateRange, SiteFetchError, SiteFetchOutcome, SiteResult};

/// Anything that can fetch one site's raw time series for a date range.
pub trait SiteSource: Send + Sync {
    fn fetch_site(&self, site_code: &str, parameter_codes: &[String], range: &DateRange)
    -> SiteFetchOutcome;
}

/// Fetch every site with at most `max_concurrent` requests in flight.
///
/// Workers pull the next site index from a shared counter and keep their
/// results in a private list; lists are only combined after the workers are
/// joined, so a slow site holds up one worker and nothing else.
pub fn fetch_all(
    source: &dyn SiteSource,
    site_codes: &[String],
    parameter_codes: &[String],
    range: &DateRange,
    max_concurrent: usize,
) -> Vec<SiteResult> {
    let workers = max_concurrent.max(1).min(site_codes.len());
    if workers == 0 {
        return Vec::new();
    }

    let next = AtomicUsize::new(0);
    let mut slots: Vec<Option<SiteFetchOutcome>> = vec![None; site_codes.len()];

    thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                scope.spawn(|| {
                    let mut local = Vec::new();
                    loop {
                        let idx = next.fetch_add(1, Ordering::Relaxed);
                        let Some(site) = site_codes.get(idx) else {
                            break;
                        };
                        let outcome = source.fetch_site(site, parameter_codes, range);
                        log_outcome(site, &outcome);
                        local.push((idx, outcome));
                    }
                    local
                })
            })
            .collect();

        for handle in handles {
            match handle.join() {
                Ok(local) => {
                    for (idx, outcome) in local {
                        slots[idx] = Some(outcome);
                    }
                }
                Err(_) => logging::error(DataSource::Usgs, None, "fetch worker panicked"),
            }
        }
    });

    site_codes
        .iter()
        .zip(slots)
        .map(|(site, slot)| SiteResult {
            site_code: site.clone(),
            outcome: slot.unwrap_or_else(|| {
                SiteFetchOutcome::Failed(SiteFetchError::RequestError(
                    "fetch worker exited before completing this site".to_string(),
                ))
            }),
        })
        .collect()
}

fn log_outcome(site: &str, outcome: &SiteFetchOutcome) {
    match outcome {
        SiteFetchOutcome::Data(rows) => logging::debug(
            DataSource::Usgs,
            Some(site),
            &format!("fetched {} rows", rows.len()),
        ),
        SiteFetchOutcome::Empty => {
            logging::warn(DataSource::Usgs, Some(site), "no records in requested range")
        }
        SiteFetchOutcome::Failed(err) => logging::log_usgs_failure(site, "IV fetch", err),
    }
}
