use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use linkfetch_core::{FetchOutcome, ItemRecord, ItemStatus, Payload, StatusCounts};
use serde_json::{json, Value};

use crate::persist::{AtomicFileWriter, PersistError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub row_count: usize,
    pub output_path: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("persist error: {0}")]
    Persist(#[from] PersistError),
    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// `{stem}_partial_{YYYYmmdd_HHMMSS}.json`
pub fn partial_export_filename(stem: &str, at: DateTime<Utc>) -> String {
    format!("{stem}_partial_{}.json", at.format("%Y%m%d_%H%M%S"))
}

/// Writes terminal records, in the given order, with a manifest of counts per status.
pub fn write_partial_export(
    dir: &Path,
    stem: &str,
    session_id: &str,
    counts: StatusCounts,
    records: &[ItemRecord],
    at: DateTime<Utc>,
) -> Result<ExportSummary, ExportError> {
    let document = json!({
        "manifest": {
            "session_id": session_id,
            "exported_utc": at.to_rfc3339(),
            "item_count": counts.pending + counts.in_flight + counts.terminal(),
            "pending": counts.pending + counts.in_flight,
            "cached": counts.cached,
            "succeeded": counts.succeeded,
            "failed": counts.failed,
        },
        "rows": records.iter().map(export_row).collect::<Vec<_>>(),
    });

    let content = serde_json::to_vec_pretty(&document)?;
    let writer = AtomicFileWriter::new(dir.to_path_buf());
    let output_path = writer.write(&partial_export_filename(stem, at), &content)?;
    Ok(ExportSummary {
        row_count: records.len(),
        output_path,
    })
}

fn export_row(record: &ItemRecord) -> Value {
    let mut row = json!({
        "index": record.id,
        "key": record.item.key,
        "target": record.item.target,
        "status": status_label(record.status),
    });
    let Some(result) = &record.result else {
        return row;
    };
    row["attempts"] = json!(result.attempts);
    row["bytes"] = json!(result.bytes);
    row["elapsed_ms"] = json!(result.elapsed.as_millis() as u64);
    match &result.outcome {
        FetchOutcome::Ok(Payload::Data(data)) => {
            row["data"] = json!(String::from_utf8_lossy(data));
        }
        FetchOutcome::Ok(Payload::Empty) => {
            row["data"] = Value::Null;
        }
        FetchOutcome::Failed(reason) => {
            row["error"] = json!(reason.to_string());
        }
    }
    row
}

fn status_label(status: ItemStatus) -> &'static str {
    match status {
        ItemStatus::Pending => "pending",
        ItemStatus::InFlight => "in_flight",
        ItemStatus::Cached => "cached",
        ItemStatus::Succeeded => "succeeded",
        ItemStatus::Failed => "failed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn partial_filename_carries_timestamp() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(
            partial_export_filename("products", at),
            "products_partial_20240309_140507.json"
        );
    }
}
