//! Plant classifier capability
//!
//! The classifier is an external inference service: it receives image bytes
//! and answers with a species guess, a confidence, a coarse health category
//! and, for unhealthy plants, a disease label. [`HttpClassifier`] talks to
//! such a service over HTTP; tests use a scripted fake.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::config::ClassifierConfig;
use crate::models::{Detection, Health};

const USER_AGENT: &str = concat!("arbolado/", env!("CARGO_PKG_VERSION"));

const DEFAULT_TREATMENT: &str = "Consult with a certified arborist for proper treatment";

const TREATMENTS: &[(&str, &str)] = &[
    ("Oak Wilt", "Remove infected trees, prevent root grafts, apply fungicide"),
    ("Powdery Mildew", "Apply sulfur or neem oil spray, improve air circulation"),
    ("Anthracnose", "Prune infected branches, apply copper fungicide"),
    ("Tar Spot", "Rake and destroy fallen leaves, apply fungicide in spring"),
    ("Verticillium Wilt", "Remove infected branches, improve soil drainage"),
    ("Pine Wilt", "Remove and destroy infected trees immediately"),
    ("Needle Cast", "Apply fungicide, improve air circulation"),
    ("Rust", "Remove infected leaves, apply fungicide"),
    ("Bronze Birch Borer", "Keep tree healthy, apply insecticide to trunk"),
    ("Leaf Spot", "Remove infected leaves, apply fungicide"),
    ("Canker", "Prune infected branches, apply wound dressing"),
    ("Willow Scab", "Prune infected branches, apply fungicide"),
    ("Crown Gall", "Remove infected tissue, avoid wounding"),
    ("Cherry Leaf Spot", "Remove fallen leaves, apply fungicide"),
    ("Brown Rot", "Remove infected fruit, apply fungicide"),
    ("Scale Insects", "Apply horticultural oil, introduce beneficial insects"),
    ("Scale", "Apply neem oil or horticultural oil spray"),
    ("Mango Malformation", "Prune affected parts, apply fungicide"),
    ("Fruit Rot", "Remove infected fruits, improve air circulation"),
    ("Fruit Fly", "Use fruit fly traps, apply organic pesticides"),
    ("Wilt", "Improve drainage, apply fungicide to soil"),
    ("Bud Rot", "Remove infected tissue, apply copper fungicide"),
    ("Leaf Blight", "Remove infected leaves, apply fungicide"),
    ("Root Wilt", "Improve drainage, no cure - prevent spread"),
    ("Stem Rot", "Remove infected stems, improve drainage"),
    ("Papaya Ring Spot", "Remove infected plants, control aphids"),
    ("Panama Disease", "Remove infected plants, use resistant varieties"),
    ("Sigatoka", "Remove infected leaves, apply fungicide"),
    ("Bunchy Top", "Remove infected plants, control aphids"),
    ("Root Rot", "Reduce watering, improve drainage, repot if needed"),
    ("Mealybugs", "Remove with cotton swab dipped in alcohol"),
    ("Aphids", "Spray with soapy water or neem oil"),
    ("Whitefly", "Use yellow sticky traps, spray neem oil"),
    ("Leaf Tip Burn", "Use filtered water, reduce fertilizer"),
    ("Black Spot", "Remove infected leaves, apply fungicide"),
    ("Downy Mildew", "Improve air circulation, apply fungicide"),
    ("Blight", "Remove infected parts, apply copper fungicide"),
    ("Leaf Curl", "Remove infected leaves, control whiteflies"),
    ("Bacterial Wilt", "Remove infected plants, improve drainage"),
    ("Stem Borer", "Remove and destroy infected stems, apply pesticide"),
];

/// Recommended treatment for a disease label (case-insensitive).
pub fn treatment_for(disease: &str) -> &'static str {
    let disease = disease.trim();
    TREATMENTS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(disease))
        .map(|(_, treatment)| *treatment)
        .unwrap_or(DEFAULT_TREATMENT)
}

/// Confidence as a percentage. Values up to 1.0 are read as fractions.
pub fn normalize_confidence(raw: f64) -> Option<f64> {
    if !raw.is_finite() || raw < 0.0 {
        return None;
    }
    let percent = if raw <= 1.0 { raw * 100.0 } else { raw };
    Some(percent.min(100.0))
}

#[derive(Debug, Error)]
pub enum ClassificationError {
    /// `transient` is set when the image host was overloaded or the body was cut off.
    #[error("Failed to fetch image {reference}: {reason}")]
    Fetch {
        reference: String,
        reason: String,
        transient: bool,
    },

    #[error("Image {0} is not a supported image format")]
    Decode(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Classifier rate limit exceeded")]
    RateLimited,

    #[error("Classifier API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Detection failed")]
    NoDetection,
}

impl ClassificationError {
    /// Failures worth retrying: connectivity, throttling and server-side errors.
    pub fn is_transient(&self) -> bool {
        match self {
            ClassificationError::Network(_) | ClassificationError::RateLimited => true,
            ClassificationError::Api(status, _) => *status >= 500,
            ClassificationError::Fetch { transient, .. } => *transient,
            _ => false,
        }
    }
}

/// Where the image to classify comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Url(String),
    Path(PathBuf),
    Bytes { name: String, data: Vec<u8> },
}

impl ImageSource {
    /// `http(s)://` references are fetched; `file://` URLs and anything else
    /// are local paths.
    pub fn from_reference(reference: &str) -> Self {
        let trimmed = reference.trim();
        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            ImageSource::Url(trimmed.to_string())
        } else if lower.starts_with("file://") {
            ImageSource::Path(path_from_file_url(&trimmed["file://".len()..]))
        } else {
            ImageSource::Path(PathBuf::from(trimmed))
        }
    }

    pub fn reference(&self) -> String {
        match self {
            ImageSource::Url(url) => url.clone(),
            ImageSource::Path(path) => path.display().to_string(),
            ImageSource::Bytes { name, .. } => name.clone(),
        }
    }
}

// "/srv/a.png" and "localhost/srv/a.png" are both /srv/a.png; "/C:/a.png" is C:/a.png.
fn path_from_file_url(rest: &str) -> PathBuf {
    let path = rest.strip_prefix("localhost").unwrap_or(rest);
    let bytes = path.as_bytes();
    if bytes.len() > 2 && bytes[0] == b'/' && bytes[1].is_ascii_alphabetic() && bytes[2] == b':' {
        PathBuf::from(&path[1..])
    } else {
        PathBuf::from(path)
    }
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, image: &ImageSource) -> Result<Detection, ClassificationError>;
}

/// Response body of the inference endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClassifierResponse {
    plant_name: Option<String>,
    species: Option<String>,
    health: Option<Health>,
    confidence: Option<f64>,
    disease: Option<String>,
    treatment: Option<String>,
    #[serde(default)]
    characteristics: Vec<String>,
    survival_probability: Option<u8>,
}

impl ClassifierResponse {
    fn into_detection(self) -> Result<Detection, ClassificationError> {
        let plant_name = self
            .plant_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .ok_or(ClassificationError::NoDetection)?;

        let disease = self
            .disease
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        let treatment = match (&disease, self.treatment) {
            (_, Some(t)) if !t.trim().is_empty() => Some(t),
            (Some(d), _) => Some(treatment_for(d).to_string()),
            (None, _) => None,
        };

        Ok(Detection {
            plant_name,
            species: self.species.filter(|s| !s.trim().is_empty()),
            health: self.health.unwrap_or_default(),
            confidence: self.confidence.and_then(normalize_confidence),
            disease,
            treatment,
            characteristics: self.characteristics,
            survival_estimate: self.survival_probability,
        })
    }
}

/// Classifier backed by a remote inference endpoint.
///
/// The image bytes are posted as the request body; URL sources are fetched
/// first and local paths are read from disk.
pub struct HttpClassifier {
    http_client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpClassifier {
    pub fn new(config: &ClassifierConfig) -> Result<Self, ClassificationError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ClassificationError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone().filter(|k| !k.trim().is_empty()),
        })
    }

    async fn load_bytes(&self, image: &ImageSource) -> Result<Vec<u8>, ClassificationError> {
        let reference = image.reference();
        let fetch_error = |reason: String, transient: bool| ClassificationError::Fetch {
            reference: reference.clone(),
            reason,
            transient,
        };

        match image {
            ImageSource::Bytes { data, .. } => Ok(data.clone()),
            ImageSource::Path(path) => tokio::fs::read(path)
                .await
                .map_err(|e| fetch_error(e.to_string(), false)),
            ImageSource::Url(url) => {
                let response = self.http_client.get(url).send().await.map_err(|e| {
                    if e.is_timeout() || e.is_connect() {
                        ClassificationError::Network(e.to_string())
                    } else {
                        fetch_error(e.to_string(), false)
                    }
                })?;

                let status = response.status();
                if !status.is_success() {
                    let transient = status.is_server_error()
                        || status == reqwest::StatusCode::TOO_MANY_REQUESTS;
                    return Err(fetch_error(format!("HTTP {}", status.as_u16()), transient));
                }

                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| fetch_error(e.to_string(), true))?;
                Ok(bytes.to_vec())
            }
        }
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self, image: &ImageSource) -> Result<Detection, ClassificationError> {
        let bytes = self.load_bytes(image).await?;

        let mime = match infer::get(&bytes) {
            Some(kind) if kind.matcher_type() == infer::MatcherType::Image => kind.mime_type(),
            _ => return Err(ClassificationError::Decode(image.reference())),
        };

        tracing::debug!(image = %image.reference(), mime, size = bytes.len(), "Querying classifier");

        let mut request = self
            .http_client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, mime)
            .body(bytes);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ClassificationError::Network(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ClassificationError::RateLimited);
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ClassificationError::Api(status.as_u16(), error_text));
        }

        let body: ClassifierResponse = response
            .json()
            .await
            .map_err(|e| ClassificationError::Parse(e.to_string()))?;

        body.into_detection()
    }
}


#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::identify::{Identifier, NoopObserver};
    use crate::throttle::RetryPolicy;

    // Minimal PNG signature plus IHDR chunk header, enough for sniffing.
    const PNG_BYTES: &[u8] = &[
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
        0x52,
    ];

    fn config_for(server: &mockito::Server) -> ClassifierConfig {
        ClassifierConfig {
            endpoint: format!("{}/classify", server.url()),
            api_key: Some("secret".to_string()),
            timeout_secs: 5,
        }
    }

    fn png_source() -> ImageSource {
        ImageSource::Bytes {
            name: "leaf.png".to_string(),
            data: PNG_BYTES.to_vec(),
        }
    }

    #[test]
    fn treatment_lookup_is_case_insensitive_with_fallback() {
        assert_eq!(
            treatment_for("powdery mildew"),
            "Apply sulfur or neem oil spray, improve air circulation"
        );
        assert_eq!(treatment_for("Unknown Blight X"), DEFAULT_TREATMENT);
    }

    #[test]
    fn confidence_accepts_fractions_and_percentages() {
        assert_eq!(normalize_confidence(0.9), Some(90.0));
        assert_eq!(normalize_confidence(90.0), Some(90.0));
        assert_eq!(normalize_confidence(150.0), Some(100.0));
        assert_eq!(normalize_confidence(-1.0), None);
        assert_eq!(normalize_confidence(f64::NAN), None);
    }

    #[test]
    fn references_are_split_into_urls_and_paths() {
        assert_eq!(
            ImageSource::from_reference("https://x/a.jpg"),
            ImageSource::Url("https://x/a.jpg".to_string())
        );
        assert_eq!(
            ImageSource::from_reference(" photos/a.jpg "),
            ImageSource::Path(PathBuf::from("photos/a.jpg"))
        );
        assert_eq!(
            ImageSource::from_reference("file:///srv/images/trees/T-1/1_leaf.png"),
            ImageSource::Path(PathBuf::from("/srv/images/trees/T-1/1_leaf.png"))
        );
        assert_eq!(
            ImageSource::from_reference("FILE://localhost/srv/a.png"),
            ImageSource::Path(PathBuf::from("/srv/a.png"))
        );
    }

    #[test]
    fn transient_errors_are_network_throttling_and_server_side() {
        assert!(ClassificationError::Network("reset".into()).is_transient());
        assert!(ClassificationError::RateLimited.is_transient());
        assert!(ClassificationError::Api(503, String::new()).is_transient());
        assert!(!ClassificationError::Api(400, String::new()).is_transient());
        assert!(!ClassificationError::Decode("a.jpg".into()).is_transient());
        assert!(!ClassificationError::NoDetection.is_transient());
    }

    #[tokio::test]
    async fn http_classifier_parses_detection_and_fills_treatment() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/classify")
            .match_header("authorization", "Bearer secret")
            .match_header("content-type", "image/png")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"plantName":"Maple Tree","species":"Acer","health":"Needs Care",
                    "confidence":0.87,"disease":"Tar Spot"}"#,
            )
            .create_async()
            .await;

        let classifier = HttpClassifier::new(&config_for(&server)).unwrap();
        let detection = classifier.classify(&png_source()).await.unwrap();

        mock.assert_async().await;
        assert_eq!(detection.plant_name, "Maple Tree");
        assert_eq!(detection.species.as_deref(), Some("Acer"));
        assert_eq!(detection.health, Health::NeedsCare);
        assert_eq!(detection.confidence, Some(87.0));
        assert_eq!(
            detection.treatment.as_deref(),
            Some("Rake and destroy fallen leaves, apply fungicide in spring")
        );
    }

    #[tokio::test]
    async fn http_classifier_fetches_url_sources_first() {
        let mut server = mockito::Server::new_async().await;
        let image = server
            .mock("GET", "/images/oak.png")
            .with_status(200)
            .with_body(PNG_BYTES)
            .create_async()
            .await;
        let classify = server
            .mock("POST", "/classify")
            .with_status(200)
            .with_body(r#"{"plantName":"Oak Tree","confidence":90}"#)
            .create_async()
            .await;

        let classifier = HttpClassifier::new(&config_for(&server)).unwrap();
        let source = ImageSource::Url(format!("{}/images/oak.png", server.url()));
        let detection = classifier.classify(&source).await.unwrap();

        image.assert_async().await;
        classify.assert_async().await;
        assert_eq!(detection.health, Health::Healthy);
        assert_eq!(detection.confidence, Some(90.0));
        assert_eq!(detection.treatment, None);
    }

    #[tokio::test]
    async fn missing_image_is_a_fetch_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/images/gone.png")
            .with_status(404)
            .create_async()
            .await;

        let classifier = HttpClassifier::new(&config_for(&server)).unwrap();
        let source = ImageSource::Url(format!("{}/images/gone.png", server.url()));
        let err = classifier.classify(&source).await.unwrap_err();

        assert!(matches!(err, ClassificationError::Fetch { .. }));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn overloaded_image_host_is_retried_until_it_recovers() {
        let mut server = mockito::Server::new_async().await;
        let overloaded = server
            .mock("GET", "/images/a.png")
            .with_status(503)
            .expect(1)
            .create_async()
            .await;
        let recovered = server
            .mock("GET", "/images/a.png")
            .with_status(200)
            .with_body(PNG_BYTES)
            .expect(1)
            .create_async()
            .await;
        server
            .mock("POST", "/classify")
            .with_status(200)
            .with_body(r#"{"plantName":"Oak Tree","confidence":90}"#)
            .create_async()
            .await;

        let classifier = Arc::new(HttpClassifier::new(&config_for(&server)).unwrap());
        let identifier = Identifier::new(classifier).with_retry(RetryPolicy {
            max_retries: 2,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        });
        let source = ImageSource::Url(format!("{}/images/a.png", server.url()));

        let detection = identifier.identify(&source, &NoopObserver).await.unwrap();

        overloaded.assert_async().await;
        recovered.assert_async().await;
        assert_eq!(detection.plant_name, "Oak Tree");
    }

    #[tokio::test]
    async fn throttled_image_host_is_transient() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/images/a.png")
            .with_status(429)
            .create_async()
            .await;

        let classifier = HttpClassifier::new(&config_for(&server)).unwrap();
        let source = ImageSource::Url(format!("{}/images/a.png", server.url()));
        let err = classifier.classify(&source).await.unwrap_err();

        assert!(matches!(err, ClassificationError::Fetch { transient: true, .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn non_image_bytes_are_rejected_before_upload() {
        let server = mockito::Server::new_async().await;
        let classifier = HttpClassifier::new(&config_for(&server)).unwrap();
        let source = ImageSource::Bytes {
            name: "notes.txt".to_string(),
            data: b"just some text".to_vec(),
        };

        let err = classifier.classify(&source).await.unwrap_err();
        assert!(matches!(err, ClassificationError::Decode(name) if name == "notes.txt"));
    }

    #[tokio::test]
    async fn server_errors_and_throttling_map_to_transient_errors() {
        let mut server = mockito::Server::new_async().await;
        let classifier = HttpClassifier::new(&config_for(&server)).unwrap();

        let throttled = server
            .mock("POST", "/classify")
            .with_status(429)
            .create_async()
            .await;
        let err = classifier.classify(&png_source()).await.unwrap_err();
        assert!(matches!(err, ClassificationError::RateLimited));
        throttled.remove_async().await;

        server
            .mock("POST", "/classify")
            .with_status(503)
            .with_body("overloaded")
            .create_async()
            .await;
        let err = classifier.classify(&png_source()).await.unwrap_err();
        assert!(matches!(err, ClassificationError::Api(503, ref body) if body == "overloaded"));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn response_without_plant_name_is_no_detection() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/classify")
            .with_status(200)
            .with_body(r#"{"plantName":"","confidence":0.2}"#)
            .create_async()
            .await;

        let classifier = HttpClassifier::new(&config_for(&server)).unwrap();
        let err = classifier.classify(&png_source()).await.unwrap_err();
        assert_eq!(err.to_string(), "Detection failed");
    }
}
