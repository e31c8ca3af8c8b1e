use std::collections::BTreeMap;

use chrono::NaiveDate;
use rayon::prelude::*;
use tracing::{debug, info};

use crate::config::ValidatedConfig;
use crate::detectors::{registry, run_ensemble};
use crate::error::Result;
use crate::flags::combine_flags;
use crate::models::{FactRecord, ProviderSnapshot};
use crate::panel::build_panel;
use crate::risk::score_snapshot;

/// Anomaly ensemble, flag combination and composite risk over the rows of a
/// single snapshot date. Rows from other dates must not be mixed in.
pub fn score_cross_section(
    mut rows: Vec<ProviderSnapshot>,
    as_of: NaiveDate,
    config: &ValidatedConfig,
) -> Result<Vec<ProviderSnapshot>> {
    if rows.is_empty() {
        return Ok(rows);
    }

    run_ensemble(&mut rows, as_of, &config.detectors)?;
    combine_flags(&mut rows, &registry(&config.detectors));
    score_snapshot(&mut rows, &config.weights, config.trend_window, as_of)?;

    debug!(%as_of, rows = rows.len(), "snapshot scored");
    Ok(rows)
}

/// Builds the panel over every snapshot date and scores each date's
/// cross-section. Rows come back ordered by date, then provider.
///
/// Snapshots share nothing but the read-only fact slice, so they are scored
/// in parallel. Any error fails the whole run; no partial panel is returned.
pub fn score_panel(
    facts: &[FactRecord],
    snapshot_dates: &[NaiveDate],
    config: &ValidatedConfig,
) -> Result<Vec<ProviderSnapshot>> {
    let mut dates = snapshot_dates.to_vec();
    dates.sort();
    dates.dedup();

    info!(
        facts = facts.len(),
        snapshots = dates.len(),
        windows = ?config.windows,
        "scoring provider panel"
    );

    let mut by_date: BTreeMap<NaiveDate, Vec<ProviderSnapshot>> = BTreeMap::new();
    for row in build_panel(facts, &dates, &config.windows) {
        by_date.entry(row.as_of_date).or_default().push(row);
    }

    let cross_sections: Vec<(NaiveDate, Vec<ProviderSnapshot>)> = by_date.into_iter().collect();
    let scored = cross_sections
        .into_par_iter()
        .map(|(as_of, rows)| score_cross_section(rows, as_of, config))
        .collect::<Result<Vec<_>>>()?;

    let panel: Vec<ProviderSnapshot> = scored.into_iter().flatten().collect();
    info!(rows = panel.len(), "provider panel scored");
    Ok(panel)
}
