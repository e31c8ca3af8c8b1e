use std::io::Write;
use std::path::Path;

use crate::detectors::DetectorId;
use crate::error::{PipelineError, Result};
use crate::models::ProviderSnapshot;
use crate::window::feature_column_names;

/// Column order of an exported panel for this window set and detector registry.
pub fn panel_header(windows: &[u32], registry: &[DetectorId]) -> Vec<String> {
    let mut header: Vec<String> = ["provider_id", "as_of_date", "first_activity_dt", "last_activity_dt"]
        .iter()
        .map(|c| c.to_string())
        .collect();
    header.extend(feature_column_names(windows));
    for detector in registry {
        header.push(detector.score_field());
        header.push(detector.flag_field());
    }
    header.extend(
        [
            "anomaly_total_flags",
            "anomaly_rank",
            "provider_risk_raw",
            "provider_risk_score",
            "risk_rank",
        ]
        .iter()
        .map(|c| c.to_string()),
    );
    header
}

pub fn write_panel_path(
    path: &Path,
    rows: &[ProviderSnapshot],
    windows: &[u32],
    registry: &[DetectorId],
) -> Result<()> {
    let file = std::fs::File::create(path)?;
    write_panel(file, rows, windows, registry)
}

/// Writes one CSV line per snapshot row. Every row must carry every feature
/// column and every registered signal.
pub fn write_panel<W: Write>(
    output: W,
    rows: &[ProviderSnapshot],
    windows: &[u32],
    registry: &[DetectorId],
) -> Result<()> {
    let mut writer = csv::Writer::from_writer(output);
    let features = feature_column_names(windows);
    writer.write_record(panel_header(windows, registry))?;

    for row in rows {
        let missing = |column: String| PipelineError::MissingColumn {
            column,
            as_of: row.as_of_date,
        };

        let mut record = vec![
            row.provider_id.clone(),
            row.as_of_date.to_string(),
            row.lifetime.first_activity.to_string(),
            row.lifetime.last_activity.to_string(),
        ];
        for column in &features {
            let value = row.feature(column).ok_or_else(|| missing(column.clone()))?;
            record.push(value.to_string());
        }
        for detector in registry {
            let signal = row
                .signal(detector)
                .ok_or_else(|| missing(detector.score_field()))?;
            record.push(signal.score.to_string());
            record.push(u8::from(signal.flag).to_string());
        }
        record.push(row.anomaly_total_flags.to_string());
        record.push(row.anomaly_rank.to_string());
        record.push(row.provider_risk_raw.to_string());
        record.push(row.provider_risk_score.to_string());
        record.push(row.risk_rank.to_string());

        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}
