use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

/// Survival probability given to imported trees that carry none.
pub const DEFAULT_SURVIVAL_PROBABILITY: u8 = 95;

/// Survival probability for auto-saved detections without a usable confidence.
pub const FALLBACK_DETECTION_SURVIVAL: u8 = 85;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Health {
    #[default]
    Healthy,
    #[serde(rename = "Needs Care")]
    NeedsCare,
    Critical,
}

impl Health {
    pub fn as_str(&self) -> &'static str {
        match self {
            Health::Healthy => "Healthy",
            Health::NeedsCare => "Needs Care",
            Health::Critical => "Critical",
        }
    }

    pub fn needs_attention(&self) -> bool {
        !matches!(self, Health::Healthy)
    }
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Health {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_label(s).as_str() {
            "healthy" => Ok(Health::Healthy),
            "needscare" => Ok(Health::NeedsCare),
            "critical" => Ok(Health::Critical),
            _ => Err(format!("estado de salud desconocido: '{s}'")),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Activity {
    Watering,
    Fertilizer,
    Pruning,
    #[serde(rename = "Disease Treatment")]
    DiseaseTreatment,
    Inspection,
}

impl Activity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Activity::Watering => "Watering",
            Activity::Fertilizer => "Fertilizer",
            Activity::Pruning => "Pruning",
            Activity::DiseaseTreatment => "Disease Treatment",
            Activity::Inspection => "Inspection",
        }
    }
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Activity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize_label(s).as_str() {
            "watering" => Ok(Activity::Watering),
            "fertilizer" => Ok(Activity::Fertilizer),
            "pruning" => Ok(Activity::Pruning),
            "diseasetreatment" => Ok(Activity::DiseaseTreatment),
            "inspection" => Ok(Activity::Inspection),
            _ => Err(format!("actividad desconocida: '{s}'")),
        }
    }
}

// "Needs Care", "needs_care" and "needs-care" all map to "needscare".
fn normalize_label(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tree {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub tree_id: String,
    pub species: String,
    pub planted_date: NaiveDate,
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
    pub caretaker: String,
    pub health: Health,
    pub last_watered: NaiveDate,
    #[serde(rename = "survivalProb")]
    pub survival_probability: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_plant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_disease: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tree {
    /// A healthy tree watered on the day it was planted.
    pub fn new(
        tree_id: String,
        species: String,
        planted_date: NaiveDate,
        location: String,
        caretaker: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            tree_id,
            species,
            planted_date,
            location,
            coordinates: None,
            caretaker,
            health: Health::Healthy,
            last_watered: planted_date,
            survival_probability: DEFAULT_SURVIVAL_PROBABILITY,
            image_url: None,
            detected_plant: None,
            detected_disease: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TreeUpdate {
    pub species: Option<String>,
    pub location: Option<String>,
    pub caretaker: Option<String>,
    pub health: Option<Health>,
    pub last_watered: Option<NaiveDate>,
    pub survival_probability: Option<u8>,
    pub image_url: Option<String>,
}

impl TreeUpdate {
    pub fn is_empty(&self) -> bool {
        *self == TreeUpdate::default()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CareLogEntry {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub tree_id: String,
    #[serde(default)]
    pub species: String,
    pub activity: Activity,
    pub caretaker: String,
    pub date: NaiveDate,
    pub time: String,
    #[serde(default)]
    pub notes: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl CareLogEntry {
    pub fn new(tree_id: String, activity: Activity, caretaker: String, date: NaiveDate) -> Self {
        Self {
            id: None,
            tree_id,
            species: "Unknown".to_string(),
            activity,
            caretaker,
            date,
            time: "00:00".to_string(),
            notes: String::new(),
            status: "completed".to_string(),
            image_url: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CareLogUpdate {
    pub caretaker: Option<String>,
    pub notes: Option<String>,
    pub status: Option<String>,
    pub image_url: Option<String>,
}

impl CareLogUpdate {
    pub fn is_empty(&self) -> bool {
        *self == CareLogUpdate::default()
    }
}

/// Structured output of one classifier invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub plant_name: String,
    pub species: Option<String>,
    pub health: Health,
    /// Percentage in `0.0..=100.0`.
    pub confidence: Option<f64>,
    pub disease: Option<String>,
    pub treatment: Option<String>,
    pub characteristics: Vec<String>,
    pub survival_estimate: Option<u8>,
}

impl Detection {
    pub fn new(plant_name: impl Into<String>, health: Health) -> Self {
        Self {
            plant_name: plant_name.into(),
            species: None,
            health,
            confidence: None,
            disease: None,
            treatment: None,
            characteristics: Vec::new(),
            survival_estimate: None,
        }
    }

    /// Classifier estimate first, then confidence, then the fixed fallback.
    pub fn survival_probability(&self) -> u8 {
        if let Some(estimate) = self.survival_estimate {
            return estimate.min(100);
        }
        match self.confidence {
            Some(c) if c > 0.0 => c.round().clamp(0.0, 100.0) as u8,
            _ => FALLBACK_DETECTION_SURVIVAL,
        }
    }

    /// Species when the classifier gave one, otherwise the common name.
    pub fn species_or_name(&self) -> &str {
        self.species.as_deref().unwrap_or(&self.plant_name)
    }
}

/// What happened when a successful detection was written to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved { id: String },
    Failed { error: String },
}

#[derive(Serialize, Debug, Clone, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    pub image_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plant_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub species: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<Health>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disease: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub treatment: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub saved: Option<SaveOutcome>,
}

impl DetectionResult {
    pub fn from_detection(image_url: impl Into<String>, detection: &Detection) -> Self {
        Self {
            image_url: image_url.into(),
            plant_name: Some(detection.plant_name.clone()),
            species: detection.species.clone(),
            health: Some(detection.health),
            confidence: detection.confidence,
            disease: detection.disease.clone(),
            treatment: detection.treatment.clone(),
            ..Default::default()
        }
    }

    pub fn failed(image_url: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            image_url: image_url.into(),
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_parses_label_variants() {
        assert_eq!("Needs Care".parse::<Health>(), Ok(Health::NeedsCare));
        assert_eq!("needs_care".parse::<Health>(), Ok(Health::NeedsCare));
        assert_eq!("CRITICAL".parse::<Health>(), Ok(Health::Critical));
        assert!("dying".parse::<Health>().is_err());
    }

    #[test]
    fn health_serializes_with_display_label() {
        let json = serde_json::to_string(&Health::NeedsCare).unwrap();
        assert_eq!(json, "\"Needs Care\"");
        assert_eq!(Health::NeedsCare.to_string(), "Needs Care");
    }

    #[test]
    fn activity_round_trips_disease_treatment_label() {
        let activity: Activity = "disease-treatment".parse().unwrap();
        assert_eq!(activity, Activity::DiseaseTreatment);
        assert_eq!(
            serde_json::to_value(activity).unwrap(),
            serde_json::json!("Disease Treatment")
        );
    }

    #[test]
    fn tree_document_uses_camel_case_fields() {
        let planted = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let tree = Tree::new(
            "T-001".into(),
            "Quercus".into(),
            planted,
            "Central Park".into(),
            "Ana".into(),
        );
        let value = serde_json::to_value(&tree).unwrap();
        assert_eq!(value["treeId"], "T-001");
        assert_eq!(value["survivalProb"], 95);
        assert_eq!(value["health"], "Healthy");
        assert_eq!(value["plantedDate"], "2024-01-15");
        assert!(value.get("_id").is_none());
        assert!(value.get("imageUrl").is_none());
    }

    #[test]
    fn survival_prefers_estimate_then_confidence_then_fallback() {
        let mut detection = Detection::new("Oak Tree", Health::Healthy);
        assert_eq!(detection.survival_probability(), 85);

        detection.confidence = Some(90.4);
        assert_eq!(detection.survival_probability(), 90);

        detection.survival_estimate = Some(70);
        assert_eq!(detection.survival_probability(), 70);
    }

    #[test]
    fn failed_result_carries_only_error() {
        let result = DetectionResult::failed("http://x/b.jpg", "Detection failed");
        assert!(!result.is_success());
        assert_eq!(result.plant_name, None);
        assert_eq!(result.error.as_deref(), Some("Detection failed"));
    }
}
