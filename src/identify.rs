//! Single-image identification.

use std::sync::Arc;

use crate::classifier::{ClassificationError, Classifier, ImageSource};
use crate::models::Detection;
use crate::throttle::{retry_with_backoff, RateLimiter, RetryPolicy};

/// Completed rows out of the rows in the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub current: usize,
    pub total: usize,
}

impl Progress {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.current as f64 * 100.0 / self.total as f64
        }
    }
}

/// Receives identification status changes. All methods default to no-ops.
pub trait ProgressObserver: Send + Sync {
    /// The classifier has been asked about `image_ref` and has not answered yet.
    fn on_pending(&self, _image_ref: &str) {}

    fn on_finished(&self, _image_ref: &str, _success: bool) {}

    /// A bulk row finished. `current` never decreases within one batch.
    fn on_progress(&self, _progress: Progress) {}
}

pub struct NoopObserver;

impl ProgressObserver for NoopObserver {}

pub struct Identifier {
    classifier: Arc<dyn Classifier>,
    limiter: Option<Arc<RateLimiter>>,
    retry: RetryPolicy,
}

impl Identifier {
    /// One attempt per image, unthrottled.
    pub fn new(classifier: Arc<dyn Classifier>) -> Self {
        Self {
            classifier,
            limiter: None,
            retry: RetryPolicy::none(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub async fn identify(
        &self,
        image: &ImageSource,
        observer: &dyn ProgressObserver,
    ) -> Result<Detection, ClassificationError> {
        let image_ref = image.reference();
        observer.on_pending(&image_ref);

        let result = retry_with_backoff(
            "plant classification",
            &self.retry,
            ClassificationError::is_transient,
            move || async move {
                if let Some(limiter) = &self.limiter {
                    limiter.wait().await;
                }
                self.classifier.classify(image).await
            },
        )
        .await;

        match &result {
            Ok(detection) => tracing::info!(
                image = %image_ref,
                plant = %detection.plant_name,
                health = %detection.health,
                confidence = ?detection.confidence,
                "Plant identified"
            ),
            Err(e) => tracing::warn!(image = %image_ref, error = %e, "Plant identification failed"),
        }
        observer.on_finished(&image_ref, result.is_ok());

        result
    }
}
