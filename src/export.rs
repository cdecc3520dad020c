//! CSV export of bulk detection results.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::DetectionResult;

pub const EXPORT_HEADER: [&str; 8] = [
    "imageUrl",
    "plantName",
    "species",
    "health",
    "confidence",
    "disease",
    "treatment",
    "error",
];

/// Starter file for `bulk`, printed by the `template` command.
pub const TEMPLATE_CSV: &str = "imageUrl,treeId,location,plantedDate\n\
https://example.com/leaf1.jpg,T-001,Central Park,2024-01-15\n\
https://example.com/leaf2.jpg,T-002,Riverside Park,2024-01-20\n";

pub const TEMPLATE_FILE_NAME: &str = "bulk_plant_detection_template.csv";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("CSV write failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Export output is not UTF-8")]
    Encoding(#[from] std::string::FromUtf8Error),
}

/// Writes the header line, then one fully quoted record per result.
pub fn write_results<W: Write>(mut out: W, results: &[DetectionResult]) -> Result<(), ExportError> {
    writeln!(out, "{}", EXPORT_HEADER.join(","))?;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .quote_style(csv::QuoteStyle::Always)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(out);

    for result in results {
        let health = result.health.map(|h| h.as_str()).unwrap_or("");
        let confidence = result.confidence.map(format_confidence).unwrap_or_default();

        writer.write_record([
            result.image_url.as_str(),
            result.plant_name.as_deref().unwrap_or(""),
            result.species.as_deref().unwrap_or(""),
            health,
            confidence.as_str(),
            result.disease.as_deref().unwrap_or(""),
            result.treatment.as_deref().unwrap_or(""),
            result.error.as_deref().unwrap_or(""),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

pub fn to_csv_string(results: &[DetectionResult]) -> Result<String, ExportError> {
    let mut buffer = Vec::new();
    write_results(&mut buffer, results)?;
    Ok(String::from_utf8(buffer)?)
}

/// `plant_detection_results_<unix-ms>.csv`
pub fn export_file_name(at: DateTime<Utc>) -> String {
    format!("plant_detection_results_{}.csv", at.timestamp_millis())
}

/// Writes the results into `dir` under a timestamped name and returns the path.
pub async fn export_to_dir(dir: &Path, results: &[DetectionResult]) -> Result<PathBuf, ExportError> {
    let content = to_csv_string(results)?;
    let path = dir.join(export_file_name(Utc::now()));

    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(&path, content).await?;

    tracing::info!(path = %path.display(), rows = results.len(), "Exported detection results");
    Ok(path)
}

// 90.0 -> "90", 87.5 -> "87.5"
fn format_confidence(confidence: f64) -> String {
    if confidence.fract() == 0.0 {
        format!("{confidence:.0}")
    } else {
        format!("{confidence}")
    }
}
