use std::io::Read;
use std::path::Path;

use chrono::NaiveDate;
use serde::Deserialize;

use crate::error::{PipelineError, Result};
use crate::models::FactRecord;

/// Raw CSV row. Numbers are kept as text so a bad value can be reported
/// together with the provider it belongs to. Extra columns are ignored.
#[derive(Debug, Deserialize)]
struct FactRow {
    date: String,
    provider_id: String,
    claims_cnt: String,
    avg_allowed_amt: String,
    zscore_allowed_amt: String,
}

pub fn read_facts_path(path: &Path) -> Result<Vec<FactRecord>> {
    let file = std::fs::File::open(path)?;
    read_facts(file)
}

/// Reads daily facts with the header
/// `date,provider_id,claims_cnt,avg_allowed_amt,zscore_allowed_amt`.
/// Fails on the first unparseable row; rows are numbered from 1, header excluded.
pub fn read_facts<R: Read>(input: R) -> Result<Vec<FactRecord>> {
    let mut reader = csv::Reader::from_reader(input);
    let mut facts = Vec::new();

    for (index, result) in reader.deserialize::<FactRow>().enumerate() {
        let row = result?;
        let row_number = index as u64 + 1;
        let invalid = |reason: String| PipelineError::InvalidFact {
            row: row_number,
            provider_id: row.provider_id.clone(),
            reason,
        };

        let provider_id = row.provider_id.trim();
        if provider_id.is_empty() {
            return Err(invalid("empty provider_id".to_string()));
        }

        facts.push(FactRecord {
            date: parse_date(&row.date).map_err(&invalid)?,
            provider_id: provider_id.to_string(),
            claims_cnt: parse_claims(&row.claims_cnt).map_err(&invalid)?,
            avg_allowed_amt: parse_amount("avg_allowed_amt", &row.avg_allowed_amt)
                .map_err(&invalid)?,
            zscore_allowed_amt: parse_amount("zscore_allowed_amt", &row.zscore_allowed_amt)
                .map_err(&invalid)?,
        });
    }

    Ok(facts)
}

/// Accepts `YYYY-MM-DD`, or a timestamp whose first ten characters are one.
pub fn parse_date(raw: &str) -> std::result::Result<NaiveDate, String> {
    let raw = raw.trim();
    let day = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").map_err(|e| format!("bad date `{raw}`: {e}"))
}

fn parse_claims(raw: &str) -> std::result::Result<i64, String> {
    let raw = raw.trim();
    let value = match raw.parse::<i64>() {
        Ok(value) => value,
        Err(_) => {
            let float = raw
                .parse::<f64>()
                .map_err(|_| format!("bad claims_cnt `{raw}`"))?;
            if float.fract() != 0.0 || !float.is_finite() {
                return Err(format!("claims_cnt `{raw}` is not a whole number"));
            }
            // i64::MAX as f64 rounds up to 2^63, itself out of range.
            if float < i64::MIN as f64 || float >= i64::MAX as f64 {
                return Err(format!("claims_cnt `{raw}` is out of range"));
            }
            float as i64
        }
    };
    if value < 0 {
        return Err(format!("claims_cnt {value} is negative"));
    }
    Ok(value)
}

fn parse_amount(column: &str, raw: &str) -> std::result::Result<f64, String> {
    let raw = raw.trim();
    let value = raw
        .parse::<f64>()
        .map_err(|_| format!("bad {column} `{raw}`"))?;
    if !value.is_finite() {
        return Err(format!("{column} `{raw}` is not finite"));
    }
    Ok(value)
}
