//! CSV and JSON tables of loosely named columns.
//!
//! Every row becomes a [`Record`]: a map from column name to trimmed text.
//! Callers resolve logical fields through alias lists with
//! [`Record::first_of`], so `image_url` and `imageUrl` land in the same place.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::NaiveDate;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TabularError {
    #[error("Unsupported file format '{0}'. Use CSV or JSON.")]
    UnsupportedFormat(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("JSON element {0} is not an object")]
    NotAnObject(usize),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabularFormat {
    Csv,
    Json,
}

impl TabularFormat {
    /// Format from the file extension, case-insensitive.
    pub fn from_path(path: &Path) -> Result<Self, TabularError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        match extension.as_str() {
            "csv" => Ok(TabularFormat::Csv),
            "json" => Ok(TabularFormat::Json),
            _ => Err(TabularError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record(BTreeMap<String, String>);

impl Record {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Value of the first alias that is present and not blank.
    pub fn first_of(&self, aliases: &[&str]) -> Option<&str> {
        aliases
            .iter()
            .filter_map(|key| self.0.get(*key))
            .map(|value| value.trim())
            .find(|value| !value.is_empty())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Record(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// First line is the header. Quoted fields may hold commas, quotes and
/// newlines. Short rows leave the missing columns empty.
pub fn parse_csv(text: &str) -> Result<Vec<Record>, TabularError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers = reader.headers()?.clone();
    let mut records = Vec::new();

    for row in reader.records() {
        let row = row?;
        let record: Record = headers
            .iter()
            .enumerate()
            .filter(|(_, header)| !header.is_empty())
            .map(|(index, header)| (header, row.get(index).unwrap_or("")))
            .collect();
        records.push(record);
    }

    Ok(records)
}

/// A single object is a one-row table, an array of objects is the table.
pub fn parse_json(text: &str) -> Result<Vec<Record>, TabularError> {
    match serde_json::from_str::<Value>(text)? {
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(index, item)| match item {
                Value::Object(map) => Ok(record_from_object(map)),
                _ => Err(TabularError::NotAnObject(index)),
            })
            .collect(),
        Value::Object(map) => Ok(vec![record_from_object(map)]),
        _ => Err(TabularError::NotAnObject(0)),
    }
}

fn record_from_object(map: serde_json::Map<String, Value>) -> Record {
    map.into_iter()
        .filter_map(|(key, value)| {
            let text = match value {
                Value::Null => return None,
                Value::String(s) => s.trim().to_string(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other => other.to_string(),
            };
            Some((key, text))
        })
        .collect()
}

pub fn parse(text: &str, format: TabularFormat) -> Result<Vec<Record>, TabularError> {
    match format {
        TabularFormat::Csv => parse_csv(text),
        TabularFormat::Json => parse_json(text),
    }
}

/// Rejects unsupported extensions before touching the file.
pub async fn read_file(path: &Path) -> Result<Vec<Record>, TabularError> {
    let format = TabularFormat::from_path(path)?;
    let text = tokio::fs::read_to_string(path).await?;
    parse(&text, format)
}

/// `YYYY-MM-DD`, or the date part of an RFC 3339 timestamp.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    let date_part = value.split('T').next().unwrap_or(value);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}
