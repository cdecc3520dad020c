//! Plant health assessment.
//!
//! A diagnosis names a disease (or `Healthy`); the knowledge base below adds
//! severity, symptoms, treatment steps and preventive measures for the
//! diseases it knows. Labels it does not know still produce an assessment
//! with the generic arborist recommendation.

use std::fmt;

use async_trait::async_trait;

use crate::classifier::{treatment_for, ClassificationError, ImageSource};
use crate::identify::{Identifier, ProgressObserver};
use crate::models::{Detection, Health};

pub const HEALTHY: &str = "Healthy";
pub const UNKNOWN_DISEASE: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let label = match self {
            Severity::Low => "Low",
            Severity::Medium => "Medium",
            Severity::High => "High",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct DiseaseInfo {
    pub severity: Severity,
    pub symptoms: &'static [&'static str],
    pub treatment: &'static [&'static str],
    pub preventive_measures: &'static [&'static str],
}

const KNOWLEDGE_BASE: &[(&str, DiseaseInfo)] = &[
    (
        "Leaf Spot",
        DiseaseInfo {
            severity: Severity::Medium,
            symptoms: &[
                "Circular or irregular brown spots on leaves",
                "Yellow halo around spots",
                "Spots may merge and cause leaf drop",
                "Affects older leaves first",
            ],
            treatment: &[
                "Remove and destroy infected leaves",
                "Apply copper-based fungicide",
                "Improve air circulation around plant",
                "Water at base, avoid wetting foliage",
                "Apply fungicide every 7-10 days",
            ],
            preventive_measures: &[
                "Space plants properly for air circulation",
                "Water in morning to allow leaves to dry",
                "Remove fallen leaves promptly",
                "Use disease-resistant varieties",
                "Avoid overhead watering",
            ],
        },
    ),
    (
        "Powdery Mildew",
        DiseaseInfo {
            severity: Severity::Medium,
            symptoms: &[
                "White powdery coating on leaves",
                "Distorted or stunted new growth",
                "Yellowing and dropping of leaves",
                "Affects both sides of leaves",
            ],
            treatment: &[
                "Spray with neem oil or sulfur-based fungicide",
                "Remove severely infected parts",
                "Increase air circulation",
                "Apply baking soda solution (1 tbsp per gallon)",
                "Treat weekly until symptoms disappear",
            ],
            preventive_measures: &[
                "Plant in full sun locations",
                "Ensure good air circulation",
                "Avoid excess nitrogen fertilizer",
                "Water at soil level",
                "Choose resistant varieties",
            ],
        },
    ),
    (
        "Root Rot",
        DiseaseInfo {
            severity: Severity::High,
            symptoms: &[
                "Wilting despite adequate water",
                "Yellowing leaves starting from bottom",
                "Soft, mushy, dark roots",
                "Foul odor from soil",
                "Stunted growth",
            ],
            treatment: &[
                "Remove plant from soil immediately",
                "Cut away all affected roots",
                "Repot in fresh, well-draining soil",
                "Reduce watering frequency",
                "Apply fungicide to remaining healthy roots",
            ],
            preventive_measures: &[
                "Use well-draining soil mix",
                "Ensure pots have drainage holes",
                "Water only when top soil is dry",
                "Avoid overwatering",
                "Sterilize pots before reuse",
            ],
        },
    ),
    (
        "Bacterial Blight",
        DiseaseInfo {
            severity: Severity::High,
            symptoms: &[
                "Water-soaked spots on leaves",
                "Brown or black lesions",
                "Yellowing around affected areas",
                "Rapid spread in wet conditions",
                "Wilting of shoots",
            ],
            treatment: &[
                "Remove and destroy infected plant parts",
                "Apply copper-based bactericide",
                "Disinfect pruning tools between cuts",
                "Reduce humidity around plants",
                "Avoid working with wet plants",
            ],
            preventive_measures: &[
                "Use disease-free planting material",
                "Avoid overhead irrigation",
                "Maintain proper plant spacing",
                "Remove plant debris regularly",
                "Disinfect tools after each use",
            ],
        },
    ),
    (
        "Nutrient Deficiency",
        DiseaseInfo {
            severity: Severity::Low,
            symptoms: &[
                "Yellowing of leaves (chlorosis)",
                "Stunted growth",
                "Purple or red discoloration",
                "Leaf curling or distortion",
                "Poor flowering or fruiting",
            ],
            treatment: &[
                "Apply balanced fertilizer (10-10-10)",
                "Add compost to improve soil",
                "Test soil pH and adjust if needed",
                "Apply specific nutrient supplements",
                "Foliar feed for quick results",
            ],
            preventive_measures: &[
                "Regular soil testing",
                "Use quality potting mix",
                "Follow fertilization schedule",
                "Maintain proper soil pH",
                "Add organic matter annually",
            ],
        },
    ),
    (
        HEALTHY,
        DiseaseInfo {
            severity: Severity::Low,
            symptoms: &[],
            treatment: &[
                "Continue current care routine",
                "Monitor regularly for any changes",
                "Maintain consistent watering schedule",
            ],
            preventive_measures: &[
                "Keep up regular watering schedule",
                "Fertilize according to plant needs",
                "Prune dead or damaged parts",
                "Monitor for pests regularly",
                "Ensure adequate sunlight",
            ],
        },
    ),
];

/// Knowledge-base entry for a disease label (case-insensitive).
pub fn disease_info(disease: &str) -> Option<&'static DiseaseInfo> {
    let disease = disease.trim();
    KNOWLEDGE_BASE
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(disease))
        .map(|(_, info)| info)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub disease: String,
    /// Percentage, as reported by the classifier.
    pub confidence: Option<f64>,
    pub severity: Severity,
    pub symptoms: Vec<String>,
    pub treatment: Vec<String>,
    pub preventive_measures: Vec<String>,
}

impl Assessment {
    /// Builds the assessment for a classifier answer.
    ///
    /// A disease label wins over the health category; a healthy plant without
    /// one is `Healthy` and an unhealthy one is `Unknown`. Labels missing from
    /// the knowledge base keep the classifier's treatment, with a severity
    /// taken from the health category.
    pub fn from_detection(detection: &Detection) -> Self {
        let disease = match detection.disease.as_deref().map(str::trim) {
            Some(label) if !label.is_empty() => label.to_string(),
            _ if detection.health == Health::Healthy => HEALTHY.to_string(),
            _ => UNKNOWN_DISEASE.to_string(),
        };

        if let Some(info) = disease_info(&disease) {
            return Self {
                disease,
                confidence: detection.confidence,
                severity: info.severity,
                symptoms: owned_lines(info.symptoms),
                treatment: owned_lines(info.treatment),
                preventive_measures: owned_lines(info.preventive_measures),
            };
        }

        let treatment = detection
            .treatment
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| treatment_for(&disease))
            .to_string();
        let severity = match detection.health {
            Health::Critical => Severity::High,
            _ => Severity::Medium,
        };

        Self {
            disease,
            confidence: detection.confidence,
            severity,
            symptoms: Vec::new(),
            treatment: vec![treatment],
            preventive_measures: Vec::new(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.disease == HEALTHY
    }
}

fn owned_lines(lines: &[&str]) -> Vec<String> {
    lines.iter().map(|line| line.to_string()).collect()
}

#[async_trait]
pub trait HealthAssessor: Send + Sync {
    async fn assess(
        &self,
        image: &ImageSource,
        observer: &dyn ProgressObserver,
    ) -> Result<Assessment, ClassificationError>;
}

/// Assesses health from the plant classifier's disease and health answer.
pub struct ClassifierAssessor {
    identifier: Identifier,
}

impl ClassifierAssessor {
    pub fn new(identifier: Identifier) -> Self {
        Self { identifier }
    }
}

#[async_trait]
impl HealthAssessor for ClassifierAssessor {
    async fn assess(
        &self,
        image: &ImageSource,
        observer: &dyn ProgressObserver,
    ) -> Result<Assessment, ClassificationError> {
        let detection = self.identifier.identify(image, observer).await?;
        let assessment = Assessment::from_detection(&detection);
        tracing::info!(
            image = %image.reference(),
            disease = %assessment.disease,
            severity = %assessment.severity,
            "Plant health assessed"
        );
        Ok(assessment)
    }
}
