use std::fmt::Write;

use chrono::NaiveDate;

use crate::detectors::DetectorId;
use crate::models::{FlagSummary, ProviderSnapshot, WindowSummary};

/// Rows of the most recent snapshot in the panel, riskiest first.
pub fn latest_snapshot(panel: &[ProviderSnapshot]) -> Option<(NaiveDate, Vec<&ProviderSnapshot>)> {
    let as_of = panel.iter().map(|r| r.as_of_date).max()?;
    let mut rows: Vec<&ProviderSnapshot> = panel.iter().filter(|r| r.as_of_date == as_of).collect();
    rows.sort_by(|a, b| {
        b.provider_risk_score
            .total_cmp(&a.provider_risk_score)
            .then_with(|| a.provider_id.cmp(&b.provider_id))
    });
    Some((as_of, rows))
}

pub fn summarize_flags(rows: &[&ProviderSnapshot], registry: &[DetectorId]) -> Vec<FlagSummary> {
    let mut summaries: Vec<FlagSummary> = registry
        .iter()
        .map(|detector| {
            let flagged = rows
                .iter()
                .filter(|r| r.signal(detector).is_some_and(|s| s.flag))
                .count();
            FlagSummary {
                detector: detector.label().to_string(),
                flagged,
                share: if rows.is_empty() {
                    0.0
                } else {
                    flagged as f64 / rows.len() as f64
                },
            }
        })
        .collect();

    summaries.sort_by(|a, b| b.flagged.cmp(&a.flagged));
    summaries
}

pub fn build_report(
    panel: &[ProviderSnapshot],
    registry: &[DetectorId],
    trend_window: u32,
    limit: usize,
) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "# Provider Risk Report");

    let Some((as_of, rows)) = latest_snapshot(panel) else {
        let _ = writeln!(output, "No providers with activity in the scored range.");
        return output;
    };

    let snapshot_count = {
        let mut dates: Vec<NaiveDate> = panel.iter().map(|r| r.as_of_date).collect();
        dates.sort();
        dates.dedup();
        dates.len()
    };
    let _ = writeln!(
        output,
        "Snapshot {} ({} providers, {} snapshots in panel)",
        as_of,
        rows.len(),
        snapshot_count
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Flag Mix");

    let summaries = summarize_flags(&rows, registry);
    if summaries.iter().all(|s| s.flagged == 0) {
        let _ = writeln!(output, "No detector flagged a provider at this snapshot.");
    } else {
        for summary in summaries.iter().filter(|s| s.flagged > 0) {
            let _ = writeln!(
                output,
                "- {}: {} providers ({:.1}%)",
                summary.detector,
                summary.flagged,
                summary.share * 100.0
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Highest Risk Providers");
    for row in rows.iter().take(limit) {
        let _ = writeln!(
            output,
            "- {} score {:.3} (rank {}, raw {:.3}) with {} flags, last active {}",
            row.provider_id,
            row.provider_risk_score,
            row.risk_rank,
            row.provider_risk_raw,
            row.anomaly_total_flags,
            row.lifetime.last_activity
        );
    }

    let mut by_momentum: Vec<(&ProviderSnapshot, f64)> = rows
        .iter()
        .filter_map(|r| Some((*r, r.trend(trend_window)?.claims_delta)))
        .filter(|(_, momentum)| *momentum > 0.0)
        .collect();
    by_momentum.sort_by(|a, b| b.1.total_cmp(&a.1));

    let _ = writeln!(output);
    let _ = writeln!(output, "## Biggest Claim Momentum ({trend_window}d vs previous {trend_window}d)");
    if by_momentum.is_empty() {
        let _ = writeln!(output, "No provider grew its claim volume.");
    } else {
        for (row, momentum) in by_momentum.iter().take(limit) {
            let _ = writeln!(
                output,
                "- {}: +{:.0} claims (score {:.3})",
                row.provider_id, momentum, row.provider_risk_score
            );
        }
    }

    output
}

/// One provider's trajectory across every snapshot in the panel.
pub fn provider_history(panel: &[ProviderSnapshot], provider_id: &str, trend_window: u32) -> String {
    let mut rows: Vec<&ProviderSnapshot> = panel
        .iter()
        .filter(|r| r.provider_id == provider_id)
        .collect();
    rows.sort_by_key(|r| r.as_of_date);

    let mut output = String::new();
    if rows.is_empty() {
        let _ = writeln!(output, "No snapshots for provider {provider_id}.");
        return output;
    }

    let claims_column = WindowSummary::column_name("mean_daily_claims", trend_window);
    let _ = writeln!(output, "Provider {provider_id}");
    for row in rows {
        let _ = writeln!(
            output,
            "- {}: score {:.3} (rank {}), {} flags, {} {:.1}, momentum {:+.0}, {} days since last claim",
            row.as_of_date,
            row.provider_risk_score,
            row.risk_rank,
            row.anomaly_total_flags,
            claims_column,
            row.window(trend_window).map_or(0.0, |w| w.mean_daily_claims),
            row.trend(trend_window).map_or(0.0, |t| t.claims_delta),
            row.lifetime.days_since_last
        );
    }
    output
}
