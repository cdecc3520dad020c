//! Plain import of trees and care logs from CSV/JSON tables.
//!
//! Each record is mapped through the field aliases below, validated, given
//! defaults and written one at a time. A bad record is counted and described
//! in the summary; it never stops the import.

use chrono::{NaiveDate, Utc};

use crate::db::{CareLogRepository, TreeRepository};
use crate::models::{
    Activity, CareLogEntry, Coordinates, Health, Tree, DEFAULT_SURVIVAL_PROBABILITY,
};
use crate::tabular::{parse_date, Record};

const TREE_ID: &[&str] = &["treeId", "tree_id", "id"];
const SPECIES: &[&str] = &["species", "tree_species"];
const PLANTED_DATE: &[&str] = &["plantedDate", "planted_date", "date"];
const LOCATION: &[&str] = &["location", "coordinates"];
const LATITUDE: &[&str] = &["latitude", "lat"];
const LONGITUDE: &[&str] = &["longitude", "lng", "lon"];
const CARETAKER: &[&str] = &["caretaker", "owner", "responsible"];
const HEALTH: &[&str] = &["health", "status"];
const LAST_WATERED: &[&str] = &["lastWatered", "last_watered"];
const SURVIVAL: &[&str] = &["survivalProb", "survival"];
const IMAGE_URL: &[&str] = &["imageUrl", "image"];

const LOG_TREE_ID: &[&str] = &["treeId", "tree_id"];
const LOG_SPECIES: &[&str] = &["species"];
const ACTIVITY: &[&str] = &["activity", "type"];
const LOG_CARETAKER: &[&str] = &["caretaker", "by"];
const LOG_DATE: &[&str] = &["date"];
const TIME: &[&str] = &["time"];
const NOTES: &[&str] = &["notes", "description"];
const STATUS: &[&str] = &["status"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub success: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

impl ImportSummary {
    fn fail(&mut self, error: String) {
        tracing::warn!(error = %error, "Skipping import record");
        self.failed += 1;
        self.errors.push(error);
    }
}

/// Maps one record to a tree. The error text names the tree id, or
/// "Unknown" when the record has none.
pub fn tree_from_record(record: &Record, today: NaiveDate) -> Result<Tree, String> {
    let tree_id = record.first_of(TREE_ID);
    let label = tree_id.unwrap_or("Unknown");

    let (Some(tree_id), Some(species), Some(planted), Some(location), Some(caretaker)) = (
        tree_id,
        record.first_of(SPECIES),
        record.first_of(PLANTED_DATE),
        record.first_of(LOCATION),
        record.first_of(CARETAKER),
    ) else {
        return Err(format!("Missing required fields for tree: {label}"));
    };

    let planted_date = parse_date(planted)
        .ok_or_else(|| format!("Invalid planted date '{planted}' for tree: {label}"))?;

    let health = match record.first_of(HEALTH) {
        Some(value) => value
            .parse::<Health>()
            .map_err(|e| format!("Invalid health for tree {label}: {e}"))?,
        None => Health::Healthy,
    };

    let last_watered = match record.first_of(LAST_WATERED) {
        Some(value) => parse_date(value)
            .ok_or_else(|| format!("Invalid last watered date '{value}' for tree: {label}"))?,
        None => today,
    };

    let survival_probability = record
        .first_of(SURVIVAL)
        .and_then(|value| value.parse::<f64>().ok())
        .filter(|value| *value > 0.0)
        .map(|value| value.round().min(100.0) as u8)
        .unwrap_or(DEFAULT_SURVIVAL_PROBABILITY);

    let coordinates = match (coordinate(record, LATITUDE), coordinate(record, LONGITUDE)) {
        (Some(latitude), Some(longitude)) if (latitude, longitude) != (0.0, 0.0) => {
            Some(Coordinates { latitude, longitude })
        }
        _ => None,
    };

    let mut tree = Tree::new(
        tree_id.to_string(),
        species.to_string(),
        planted_date,
        location.to_string(),
        caretaker.to_string(),
    );
    tree.coordinates = coordinates;
    tree.health = health;
    tree.last_watered = last_watered;
    tree.survival_probability = survival_probability;
    tree.image_url = record.first_of(IMAGE_URL).map(str::to_string);

    Ok(tree)
}

fn coordinate(record: &Record, aliases: &[&str]) -> Option<f64> {
    record
        .first_of(aliases)?
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

pub fn care_log_from_record(record: &Record) -> Result<CareLogEntry, String> {
    let tree_id = record.first_of(LOG_TREE_ID);
    let label = tree_id.unwrap_or("Unknown");

    let (Some(tree_id), Some(activity), Some(caretaker), Some(date)) = (
        tree_id,
        record.first_of(ACTIVITY),
        record.first_of(LOG_CARETAKER),
        record.first_of(LOG_DATE),
    ) else {
        return Err(format!("Missing required fields for log: {label}"));
    };

    let activity = activity
        .parse::<Activity>()
        .map_err(|e| format!("Invalid activity for log {label}: {e}"))?;
    let date = parse_date(date).ok_or_else(|| format!("Invalid date '{date}' for log: {label}"))?;

    let mut entry = CareLogEntry::new(tree_id.to_string(), activity, caretaker.to_string(), date);
    if let Some(species) = record.first_of(LOG_SPECIES) {
        entry.species = species.to_string();
    }
    if let Some(time) = record.first_of(TIME) {
        entry.time = time.to_string();
    }
    if let Some(notes) = record.first_of(NOTES) {
        entry.notes = notes.to_string();
    }
    if let Some(status) = record.first_of(STATUS) {
        entry.status = status.to_string();
    }

    Ok(entry)
}

pub async fn import_trees(store: &dyn TreeRepository, records: &[Record]) -> ImportSummary {
    let today = Utc::now().date_naive();
    let mut summary = ImportSummary::default();

    for record in records {
        let tree = match tree_from_record(record, today) {
            Ok(tree) => tree,
            Err(e) => {
                summary.fail(e);
                continue;
            }
        };

        let tree_id = tree.tree_id.clone();
        match store.create_tree(tree).await {
            Ok(_) => summary.success += 1,
            Err(e) => summary.fail(format!("Error importing tree {tree_id}: {e}")),
        }
    }

    tracing::info!(
        success = summary.success,
        failed = summary.failed,
        "Tree import finished"
    );
    summary
}

pub async fn import_care_logs(store: &dyn CareLogRepository, records: &[Record]) -> ImportSummary {
    let mut summary = ImportSummary::default();

    for record in records {
        let entry = match care_log_from_record(record) {
            Ok(entry) => entry,
            Err(e) => {
                summary.fail(e);
                continue;
            }
        };

        let tree_id = entry.tree_id.clone();
        match store.create_care_log(entry).await {
            Ok(_) => summary.success += 1,
            Err(e) => summary.fail(format!("Error importing log for {tree_id}: {e}")),
        }
    }

    tracing::info!(
        success = summary.success,
        failed = summary.failed,
        "Care log import finished"
    );
    summary
}
