//! Bulk plant identification
//!
//! Turns a table of image references into one [`DetectionResult`] per row.
//! Rows run through a bounded worker pool; every row is tagged with its
//! input index so results come back in input order no matter which worker
//! finishes first. Successful detections that carry a tree identifier are
//! written to the tree store, and the outcome of that write is kept on the
//! row.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use futures_util::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::classifier::{Classifier, ImageSource};
use crate::config::BulkConfig;
use crate::db::TreeRepository;
use crate::identify::{Identifier, Progress, ProgressObserver};
use crate::models::{Detection, DetectionResult, SaveOutcome, Tree};
use crate::tabular::{parse_date, Record};
use crate::throttle::{RateLimiter, RetryPolicy};

pub const IMAGE_URL_ALIASES: &[&str] = &["imageUrl", "image_url", "image", "path", "url"];
pub const TREE_ID_ALIASES: &[&str] = &["treeId", "tree_id", "id"];
pub const LOCATION_ALIASES: &[&str] = &["location"];
pub const PLANTED_DATE_ALIASES: &[&str] = &["plantedDate", "planted_date"];

/// Caretaker recorded on trees created from bulk detections.
pub const BULK_CARETAKER: &str = "Bulk Import";

pub const CANCELLED_ERROR: &str = "Cancelled";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkRow {
    pub image_url: String,
    pub tree_id: Option<String>,
    pub location: Option<String>,
    pub planted_date: Option<String>,
}

impl BulkRow {
    /// `None` when the record has no image reference.
    pub fn from_record(record: &Record) -> Option<Self> {
        let image_url = record.first_of(IMAGE_URL_ALIASES)?.to_string();
        let owned = |aliases: &[&str]| record.first_of(aliases).map(str::to_string);

        Some(Self {
            image_url,
            tree_id: owned(TREE_ID_ALIASES),
            location: owned(LOCATION_ALIASES),
            planted_date: owned(PLANTED_DATE_ALIASES),
        })
    }
}

/// Rows without an image reference are dropped here and never counted.
pub fn rows_from_records(records: &[Record]) -> Vec<BulkRow> {
    records.iter().filter_map(BulkRow::from_record).collect()
}

/// Tree document for a successful detection of `row`.
///
/// Planted date falls back to `today` when missing or unreadable, location
/// to "Unknown".
pub fn tree_from_detection(
    tree_id: &str,
    row: &BulkRow,
    detection: &Detection,
    today: NaiveDate,
) -> Tree {
    let planted_date = row
        .planted_date
        .as_deref()
        .and_then(parse_date)
        .unwrap_or(today);
    let now = Utc::now();

    Tree {
        id: None,
        tree_id: tree_id.to_string(),
        species: detection.species_or_name().to_string(),
        planted_date,
        location: row.location.clone().unwrap_or_else(|| "Unknown".to_string()),
        coordinates: None,
        caretaker: BULK_CARETAKER.to_string(),
        health: detection.health,
        last_watered: today,
        survival_probability: detection.survival_probability(),
        image_url: Some(row.image_url.clone()),
        detected_plant: Some(detection.plant_name.clone()),
        detected_disease: detection.disease.clone(),
        created_at: now,
        updated_at: now,
    }
}

#[derive(Debug, Clone)]
pub struct BulkOptions {
    pub max_in_flight: usize,
    pub min_interval: Duration,
    pub retry: RetryPolicy,
    pub auto_save: bool,
}

impl Default for BulkOptions {
    fn default() -> Self {
        BulkOptions::from(&BulkConfig::default())
    }
}

impl From<&BulkConfig> for BulkOptions {
    fn from(config: &BulkConfig) -> Self {
        Self {
            max_in_flight: config.max_in_flight.max(1),
            min_interval: Duration::from_millis(config.min_interval_ms),
            retry: config.retry_policy(),
            auto_save: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkReport {
    /// One entry per processed row, in input order.
    pub results: Vec<DetectionResult>,
    pub cancelled: bool,
}

impl BulkReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }

    pub fn saved(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.saved, Some(SaveOutcome::Saved { .. })))
            .count()
    }

    /// Detections that succeeded but could not be written to the store.
    pub fn save_failures(&self) -> Vec<&DetectionResult> {
        self.results
            .iter()
            .filter(|r| matches!(r.saved, Some(SaveOutcome::Failed { .. })))
            .collect()
    }
}

pub struct BulkIdentifier {
    identifier: Identifier,
    trees: Option<Arc<dyn TreeRepository>>,
    options: BulkOptions,
}

impl BulkIdentifier {
    pub fn new(classifier: Arc<dyn Classifier>, options: BulkOptions) -> Self {
        let mut identifier = Identifier::new(classifier).with_retry(options.retry);
        if !options.min_interval.is_zero() {
            let limiter = RateLimiter::new(options.min_interval);
            identifier = identifier.with_rate_limiter(Arc::new(limiter));
        }

        Self {
            identifier,
            trees: None,
            options,
        }
    }

    /// Enables auto-save of detections whose row names a tree.
    pub fn with_store(mut self, trees: Arc<dyn TreeRepository>) -> Self {
        self.trees = Some(trees);
        self
    }

    /// Process `rows` and return their results in input order.
    ///
    /// After `cancel` fires no new row is started; rows not yet started are
    /// reported with a "Cancelled" error.
    pub async fn run(
        &self,
        rows: Vec<BulkRow>,
        observer: &dyn ProgressObserver,
        cancel: &CancellationToken,
    ) -> BulkReport {
        let total = rows.len();
        let completed = AtomicUsize::new(0);
        let completed = &completed;
        let today = Utc::now().date_naive();

        tracing::info!(
            rows = total,
            max_in_flight = self.options.max_in_flight,
            auto_save = self.options.auto_save && self.trees.is_some(),
            "Starting bulk identification"
        );

        let mut tagged: Vec<(usize, DetectionResult)> = stream::iter(rows.into_iter().enumerate())
            .map(|(index, row)| async move {
                let result = if cancel.is_cancelled() {
                    DetectionResult::failed(row.image_url.clone(), CANCELLED_ERROR)
                } else {
                    self.process_row(&row, observer, today).await
                };

                let current = completed.fetch_add(1, Ordering::SeqCst) + 1;
                observer.on_progress(Progress { current, total });

                (index, result)
            })
            .buffer_unordered(self.options.max_in_flight.max(1))
            .collect()
            .await;

        tagged.sort_by_key(|(index, _)| *index);

        let report = BulkReport {
            results: tagged.into_iter().map(|(_, result)| result).collect(),
            cancelled: cancel.is_cancelled(),
        };

        tracing::info!(
            total,
            succeeded = report.succeeded(),
            failed = report.failed(),
            saved = report.saved(),
            save_failures = report.save_failures().len(),
            cancelled = report.cancelled,
            "Bulk identification completed"
        );

        report
    }

    async fn process_row(
        &self,
        row: &BulkRow,
        observer: &dyn ProgressObserver,
        today: NaiveDate,
    ) -> DetectionResult {
        let source = ImageSource::from_reference(&row.image_url);

        let detection = match self.identifier.identify(&source, observer).await {
            Ok(detection) => detection,
            Err(e) => return DetectionResult::failed(row.image_url.clone(), e.to_string()),
        };

        let mut result = DetectionResult::from_detection(row.image_url.clone(), &detection);

        if !self.options.auto_save {
            return result;
        }
        if let (Some(trees), Some(tree_id)) = (&self.trees, row.tree_id.as_deref()) {
            let tree = tree_from_detection(tree_id, row, &detection, today);
            result.saved = Some(match trees.create_tree(tree).await {
                Ok(id) => {
                    tracing::debug!(tree_id, id = %id, "Saved detected tree");
                    SaveOutcome::Saved { id }
                }
                Err(e) => {
                    tracing::warn!(tree_id, error = %e, "Failed to save detected tree");
                    SaveOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            });
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::fake::ScriptedClassifier;
    use crate::db::memory::MemoryStore;
    use crate::identify::recording::RecordingObserver;
    use crate::identify::NoopObserver;
    use crate::models::Health;
    use crate::tabular::parse_csv;

    fn options(max_in_flight: usize) -> BulkOptions {
        BulkOptions {
            max_in_flight,
            min_interval: Duration::ZERO,
            retry: RetryPolicy {
                max_retries: 2,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(2),
            },
            auto_save: true,
        }
    }

    fn oak() -> Detection {
        let mut detection = Detection::new("Oak", Health::Healthy);
        detection.confidence = Some(90.0);
        detection
    }

    fn row(image_url: &str) -> BulkRow {
        BulkRow {
            image_url: image_url.to_string(),
            tree_id: None,
            location: None,
            planted_date: None,
        }
    }

    #[test]
    fn rows_without_image_are_filtered_out() {
        let records =
            parse_csv("imageUrl,treeId\nhttp://x/a.jpg,T-1\n,T-2\nhttp://x/c.jpg,\n").unwrap();
        let rows = rows_from_records(&records);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].tree_id.as_deref(), Some("T-1"));
        assert_eq!(rows[1].image_url, "http://x/c.jpg");
        assert_eq!(rows[1].tree_id, None);
    }

    #[test]
    fn image_url_aliases_resolve_identically() {
        let snake = parse_csv("image_url,tree_id\nhttp://x/a.jpg,T-1\n").unwrap();
        let camel = parse_csv("imageUrl,treeId\nhttp://x/a.jpg,T-1\n").unwrap();
        assert_eq!(rows_from_records(&snake), rows_from_records(&camel));
    }

    #[test]
    fn tree_from_detection_applies_defaults() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let row = BulkRow {
            planted_date: Some("not a date".into()),
            ..row("http://x/a.jpg")
        };
        let detection = Detection::new("Neem Tree", Health::Healthy);

        let tree = tree_from_detection("T-9", &row, &detection, today);
        assert_eq!(tree.species, "Neem Tree");
        assert_eq!(tree.planted_date, today);
        assert_eq!(tree.location, "Unknown");
        assert_eq!(tree.caretaker, BULK_CARETAKER);
        assert_eq!(tree.survival_probability, 85);
        assert_eq!(tree.image_url.as_deref(), Some("http://x/a.jpg"));
    }

    #[tokio::test]
    async fn mixed_batch_keeps_order_and_saves_only_successes() {
        let records =
            parse_csv("imageUrl,treeId\nhttp://x/a.jpg,T-1\nhttp://x/b.jpg,T-2\n").unwrap();
        let classifier = Arc::new(
            ScriptedClassifier::new()
                .detect("http://x/a.jpg", oak())
                .fail("http://x/b.jpg"),
        );
        let store = Arc::new(MemoryStore::new());
        let bulk = BulkIdentifier::new(classifier, options(1)).with_store(store.clone());

        let report = bulk
            .run(rows_from_records(&records), &NoopObserver, &CancellationToken::new())
            .await;

        let mut expected_ok = DetectionResult {
            image_url: "http://x/a.jpg".into(),
            plant_name: Some("Oak".into()),
            health: Some(Health::Healthy),
            confidence: Some(90.0),
            ..Default::default()
        };
        let stored = store.trees();
        assert_eq!(stored.len(), 1);
        expected_ok.saved = Some(SaveOutcome::Saved {
            id: stored[0].id.unwrap().to_hex(),
        });

        assert_eq!(
            report.results,
            vec![
                expected_ok,
                DetectionResult::failed("http://x/b.jpg", "Detection failed"),
            ]
        );
        assert_eq!(stored[0].tree_id, "T-1");
        assert_eq!(stored[0].species, "Oak");
        assert_eq!(stored[0].survival_probability, 90);
    }

    #[tokio::test]
    async fn progress_is_emitted_once_per_row_in_order() {
        let classifier = Arc::new(
            ScriptedClassifier::new()
                .detect("a.jpg", oak())
                .detect("b.jpg", oak())
                .fail("c.jpg"),
        );
        let bulk = BulkIdentifier::new(classifier, options(1));
        let observer = RecordingObserver::default();

        bulk.run(
            vec![row("a.jpg"), row("b.jpg"), row("c.jpg")],
            &observer,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(observer.progress(), vec![(1, 3), (2, 3), (3, 3)]);
    }

    #[tokio::test]
    async fn csv_rows_without_images_are_not_counted() {
        let records = parse_csv("imageUrl,treeId\na.jpg,T-1\n,T-2\nb.jpg,\n").unwrap();
        let classifier = Arc::new(ScriptedClassifier::new().detect("a.jpg", oak()).fail("b.jpg"));
        let bulk = BulkIdentifier::new(classifier.clone(), options(2));
        let observer = RecordingObserver::default();

        let report = bulk
            .run(rows_from_records(&records), &observer, &CancellationToken::new())
            .await;

        let urls: Vec<_> = report.results.iter().map(|r| r.image_url.as_str()).collect();
        assert_eq!(urls, vec!["a.jpg", "b.jpg"]);
        assert_eq!((report.succeeded(), report.failed()), (1, 1));
        assert_eq!(observer.progress(), vec![(1, 2), (2, 2)]);
        assert_eq!(classifier.calls().len(), 2);
    }

    #[tokio::test]
    async fn concurrent_workers_preserve_input_order() {
        let classifier = Arc::new(
            ScriptedClassifier::new()
                .detect("slow.jpg", Detection::new("Pine Tree", Health::Healthy))
                .delay("slow.jpg", Duration::from_millis(60))
                .detect("fast.jpg", Detection::new("Birch Tree", Health::Healthy))
                .detect("mid.jpg", Detection::new("Willow Tree", Health::Critical))
                .delay("mid.jpg", Duration::from_millis(20)),
        );
        let bulk = BulkIdentifier::new(classifier, options(3));
        let observer = RecordingObserver::default();

        let report = bulk
            .run(
                vec![row("slow.jpg"), row("fast.jpg"), row("mid.jpg")],
                &observer,
                &CancellationToken::new(),
            )
            .await;

        let names: Vec<_> = report
            .results
            .iter()
            .map(|r| r.plant_name.clone().unwrap())
            .collect();
        assert_eq!(names, vec!["Pine Tree", "Birch Tree", "Willow Tree"]);
        assert_eq!(observer.progress(), vec![(1, 3), (2, 3), (3, 3)]);
    }

    #[tokio::test]
    async fn transient_failures_are_retried_in_the_pool() {
        let classifier = Arc::new(ScriptedClassifier::new().fail_transiently("a.jpg", 2, oak()));
        let bulk = BulkIdentifier::new(classifier.clone(), options(2));

        let report = bulk
            .run(vec![row("a.jpg")], &NoopObserver, &CancellationToken::new())
            .await;

        assert!(report.results[0].is_success());
        assert_eq!(classifier.calls().len(), 3);
    }

    #[tokio::test]
    async fn store_failures_are_reported_per_row() {
        let classifier = Arc::new(ScriptedClassifier::new().detect("a.jpg", oak()));
        let store = Arc::new(MemoryStore::rejecting_writes());
        let bulk = BulkIdentifier::new(classifier, options(1)).with_store(store);
        let rows = vec![BulkRow {
            tree_id: Some("T-1".into()),
            ..row("a.jpg")
        }];

        let report = bulk.run(rows, &NoopObserver, &CancellationToken::new()).await;

        assert!(report.results[0].is_success());
        assert_eq!(report.saved(), 0);
        assert_eq!(report.save_failures().len(), 1);
        assert!(matches!(
            report.results[0].saved,
            Some(SaveOutcome::Failed { ref error }) if error.contains("read-only")
        ));
    }

    #[tokio::test]
    async fn auto_save_can_be_disabled() {
        let classifier = Arc::new(ScriptedClassifier::new().detect("a.jpg", oak()));
        let store = Arc::new(MemoryStore::new());
        let bulk = BulkIdentifier::new(
            classifier,
            BulkOptions {
                auto_save: false,
                ..options(1)
            },
        )
        .with_store(store.clone());
        let rows = vec![BulkRow {
            tree_id: Some("T-1".into()),
            ..row("a.jpg")
        }];

        let report = bulk.run(rows, &NoopObserver, &CancellationToken::new()).await;

        assert_eq!(report.results[0].saved, None);
        assert!(store.trees().is_empty());
    }

    #[tokio::test]
    async fn cancelled_batch_starts_no_rows() {
        let classifier = Arc::new(ScriptedClassifier::new().detect("a.jpg", oak()));
        let bulk = BulkIdentifier::new(classifier.clone(), options(2));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = bulk
            .run(vec![row("a.jpg"), row("b.jpg")], &NoopObserver, &cancel)
            .await;

        assert!(report.cancelled);
        assert!(classifier.calls().is_empty());
        assert_eq!(report.results.len(), 2);
        assert!(report
            .results
            .iter()
            .all(|r| r.error.as_deref() == Some(CANCELLED_ERROR)));
    }

    #[tokio::test]
    async fn empty_batch_completes_without_progress() {
        let classifier = Arc::new(ScriptedClassifier::new());
        let bulk = BulkIdentifier::new(classifier, options(4));
        let observer = RecordingObserver::default();

        let report = bulk.run(Vec::new(), &observer, &CancellationToken::new()).await;

        assert!(report.results.is_empty());
        assert!(observer.progress().is_empty());
    }
}
