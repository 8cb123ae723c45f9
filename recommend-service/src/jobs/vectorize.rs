//! Vectorization job queue.
//!
//! `enqueue` returns a job id immediately; a single background worker drains
//! jobs in priority order. Each item is processed independently: one failed
//! embedding marks only that item and never its siblings. With `force =
//! false` an item already carrying all three vectors is skipped without a
//! single write, which makes re-enqueueing idempotent.

use crate::embed::{
    build_item_text, combine_vectors, Embedder, COMBINED_IMAGE_WEIGHT, COMBINED_TEXT_WEIGHT,
};
use crate::models::{ItemRecord, ItemVectors};
use crate::store::CatalogStore;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{error, info, warn};
use trove_vector_index::{Modality, VectorIndex};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Low,
    Normal,
    High,
}

/// Status transitions only move forward:
/// queued -> processing -> {completed, failed}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemFailure {
    pub item_id: Uuid,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Uuid,
    pub item_ids: Vec<Uuid>,
    pub priority: JobPriority,
    pub status: JobStatus,
    pub force: bool,
    pub total: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub failures: Vec<ItemFailure>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    pub fn progress(&self) -> f32 {
        if self.total == 0 {
            return 1.0;
        }
        self.processed as f32 / self.total as f32
    }
}

/// Heap entry: higher priority first, then FIFO within a priority.
struct QueuedJob {
    priority: JobPriority,
    seq: u64,
    job_id: Uuid,
}

impl PartialEq for QueuedJob {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}
impl Eq for QueuedJob {}
impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

pub struct VectorizationQueue {
    jobs: Arc<DashMap<Uuid, JobRecord>>,
    queue: Arc<Mutex<BinaryHeap<QueuedJob>>>,
    notify: Arc<Notify>,
    seq: AtomicU64,
}

impl VectorizationQueue {
    /// Create the queue and spawn its worker. Must be called within a tokio
    /// runtime.
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        index: Arc<VectorIndex>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        let jobs: Arc<DashMap<Uuid, JobRecord>> = Arc::new(DashMap::new());
        let queue: Arc<Mutex<BinaryHeap<QueuedJob>>> = Arc::new(Mutex::new(BinaryHeap::new()));
        let notify = Arc::new(Notify::new());

        tokio::spawn(worker_loop(
            Arc::clone(&jobs),
            Arc::clone(&queue),
            Arc::clone(&notify),
            catalog,
            index,
            embedder,
        ));

        Self {
            jobs,
            queue,
            notify,
            seq: AtomicU64::new(0),
        }
    }

    /// Register a job and return its id immediately; processing happens off
    /// the request path.
    pub fn enqueue(&self, item_ids: Vec<Uuid>, priority: JobPriority, force: bool) -> Uuid {
        let job_id = Uuid::new_v4();
        let record = JobRecord {
            id: job_id,
            total: item_ids.len(),
            item_ids,
            priority,
            status: JobStatus::Queued,
            force,
            processed: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            failures: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };
        self.jobs.insert(job_id, record);
        self.queue.lock().expect("job queue lock poisoned").push(QueuedJob {
            priority,
            seq: self.seq.fetch_add(1, AtomicOrdering::SeqCst),
            job_id,
        });
        self.notify.notify_one();

        info!(job_id = %job_id, priority = ?priority, force, "enqueued vectorization job");
        job_id
    }

    pub fn status(&self, job_id: Uuid) -> Option<JobRecord> {
        self.jobs.get(&job_id).map(|r| r.clone())
    }

    /// Poll until the job reaches a terminal state or the timeout elapses.
    /// Returns the latest record either way.
    pub async fn await_terminal(&self, job_id: Uuid, timeout: Duration) -> Option<JobRecord> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.status(job_id) {
                Some(record) if record.status.is_terminal() => return Some(record),
                Some(record) => {
                    if tokio::time::Instant::now() >= deadline {
                        return Some(record);
                    }
                }
                None => return None,
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

async fn worker_loop(
    jobs: Arc<DashMap<Uuid, JobRecord>>,
    queue: Arc<Mutex<BinaryHeap<QueuedJob>>>,
    notify: Arc<Notify>,
    catalog: Arc<dyn CatalogStore>,
    index: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
) {
    loop {
        let next = queue.lock().expect("job queue lock poisoned").pop();
        match next {
            Some(queued) => {
                process_job(&jobs, queued.job_id, &catalog, &index, &embedder).await;
            }
            None => notify.notified().await,
        }
    }
}

async fn process_job(
    jobs: &DashMap<Uuid, JobRecord>,
    job_id: Uuid,
    catalog: &Arc<dyn CatalogStore>,
    index: &Arc<VectorIndex>,
    embedder: &Arc<dyn Embedder>,
) {
    let (item_ids, force) = match jobs.get_mut(&job_id) {
        Some(mut record) => {
            record.status = JobStatus::Processing;
            record.started_at = Some(Utc::now());
            (record.item_ids.clone(), record.force)
        }
        None => return,
    };

    for item_id in item_ids {
        let outcome = process_item(catalog, index, embedder, item_id, force).await;
        if let Some(mut record) = jobs.get_mut(&job_id) {
            record.processed += 1;
            match outcome {
                Ok(ItemOutcome::Generated) => record.succeeded += 1,
                Ok(ItemOutcome::Skipped) => record.skipped += 1,
                Err(e) => {
                    // Isolated per item: siblings keep processing.
                    warn!(job_id = %job_id, item_id = %item_id, error = %e, "vectorization failed for item");
                    record.failed += 1;
                    record.failures.push(ItemFailure {
                        item_id,
                        error: e.to_string(),
                    });
                }
            }
        }
    }

    if let Some(mut record) = jobs.get_mut(&job_id) {
        record.finished_at = Some(Utc::now());
        record.status = if record.total > 0 && record.failed == record.total {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        };
        if record.status == JobStatus::Failed {
            error!(job_id = %job_id, failed = record.failed, "vectorization job failed for every item");
        } else {
            info!(
                job_id = %job_id,
                succeeded = record.succeeded,
                skipped = record.skipped,
                failed = record.failed,
                "vectorization job completed"
            );
        }
    }
}

enum ItemOutcome {
    Generated,
    Skipped,
}

async fn process_item(
    catalog: &Arc<dyn CatalogStore>,
    index: &Arc<VectorIndex>,
    embedder: &Arc<dyn Embedder>,
    item_id: Uuid,
    force: bool,
) -> Result<ItemOutcome> {
    let item = catalog
        .item(item_id)
        .await?
        .ok_or_else(|| anyhow!("item {item_id} not found"))?;

    if !force && item.has_all_vectors() {
        return Ok(ItemOutcome::Skipped);
    }

    let vectors = generate_vectors(embedder, &item)?;
    catalog.store_vectors(item_id, vectors.clone()).await?;

    for (modality, vector) in [
        (Modality::Image, &vectors.image),
        (Modality::Text, &vectors.text),
        (Modality::Combined, &vectors.combined),
    ] {
        if let Some(vector) = vector {
            if let Err(e) = index.insert(item_id, modality, vector) {
                warn!(item_id = %item_id, modality = modality.as_str(), error = %e, "skipping index insert");
            }
        }
    }
    Ok(ItemOutcome::Generated)
}

fn generate_vectors(embedder: &Arc<dyn Embedder>, item: &ItemRecord) -> Result<ItemVectors> {
    let text = build_item_text(item);
    let text_vector = embedder.embed_text(&text);
    let image_vector = item
        .image_url
        .as_deref()
        .and_then(|url| embedder.embed_image(url));

    let combined = match (&image_vector, &text_vector) {
        (Some(image), Some(text)) => Some(combine_vectors(
            image,
            text,
            COMBINED_IMAGE_WEIGHT,
            COMBINED_TEXT_WEIGHT,
        )),
        (Some(image), None) => Some(image.clone()),
        (None, Some(text)) => Some(text.clone()),
        (None, None) => None,
    };

    let Some(combined) = combined else {
        return Err(anyhow!("embedding functions produced no vectors"));
    };
    Ok(ItemVectors {
        image: image_vector,
        text: text_vector,
        combined: Some(combined),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::{HashingEmbedder, MockEmbedder};
    use crate::store::memory::MemoryCatalog;
    use crate::store::CatalogStore;

    fn item(n: u128, name: &str, image_url: Option<&str>) -> ItemRecord {
        ItemRecord {
            id: Uuid::from_u128(n),
            name: name.to_string(),
            description: None,
            image_url: image_url.map(String::from),
            category: None,
            brand_id: None,
            image_vector: None,
            text_vector: None,
            combined_vector: None,
            like_count: 0,
            created_at: Utc::now(),
        }
    }

    fn vectorized_item(n: u128) -> ItemRecord {
        let mut record = item(n, &format!("item-{n}"), None);
        record.image_vector = Some(vec![1.0, 0.0]);
        record.text_vector = Some(vec![0.0, 1.0]);
        record.combined_vector = Some(vec![0.5, 0.5]);
        record
    }

    fn queue_with(
        catalog: Arc<MemoryCatalog>,
        embedder: Arc<dyn Embedder>,
    ) -> (VectorizationQueue, Arc<VectorIndex>) {
        let index = Arc::new(VectorIndex::new());
        let queue = VectorizationQueue::new(
            catalog as Arc<dyn CatalogStore>,
            Arc::clone(&index),
            embedder,
        );
        (queue, index)
    }

    #[tokio::test]
    async fn test_job_vectorizes_items_and_populates_index() {
        let catalog = Arc::new(MemoryCatalog::seed(vec![
            item(1, "denim jacket", Some("https://img/1.jpg")),
            item(2, "wool sweater", Some("https://img/2.jpg")),
        ]));
        let (queue, index) = queue_with(Arc::clone(&catalog), Arc::new(HashingEmbedder::default()));

        let job_id = queue.enqueue(
            vec![Uuid::from_u128(1), Uuid::from_u128(2)],
            JobPriority::Normal,
            false,
        );
        let record = queue
            .await_terminal(job_id, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.succeeded, 2);
        assert_eq!(record.failed, 0);
        assert!((record.progress() - 1.0).abs() < 1e-6);
        assert!(catalog.items_missing_vectors().await.unwrap().is_empty());
        assert!(index.total_rows() > 0);
    }

    #[tokio::test]
    async fn test_force_false_skips_vectorized_items_without_writes() {
        let catalog = Arc::new(MemoryCatalog::seed(vec![vectorized_item(1)]));

        // The embedder must never be invoked for an already-vectorized item.
        let mut embedder = MockEmbedder::new();
        embedder.expect_embed_text().times(0);
        embedder.expect_embed_image().times(0);

        let (queue, _index) = queue_with(Arc::clone(&catalog), Arc::new(embedder));
        let job_id = queue.enqueue(vec![Uuid::from_u128(1)], JobPriority::Normal, false);
        let record = queue
            .await_terminal(job_id, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.skipped, 1);
        assert_eq!(record.succeeded, 0);
        assert_eq!(catalog.vector_write_count(), 0);

        // Idempotence: a second run still writes nothing.
        let job_id = queue.enqueue(vec![Uuid::from_u128(1)], JobPriority::Normal, false);
        queue.await_terminal(job_id, Duration::from_secs(5)).await.unwrap();
        assert_eq!(catalog.vector_write_count(), 0);
    }

    #[tokio::test]
    async fn test_force_true_regenerates() {
        let catalog = Arc::new(MemoryCatalog::seed(vec![vectorized_item(1)]));
        let (queue, _index) = queue_with(Arc::clone(&catalog), Arc::new(HashingEmbedder::default()));

        let job_id = queue.enqueue(vec![Uuid::from_u128(1)], JobPriority::High, true);
        let record = queue
            .await_terminal(job_id, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.succeeded, 1);
        assert_eq!(catalog.vector_write_count(), 1);
    }

    #[tokio::test]
    async fn test_item_failure_does_not_abort_batch() {
        // Item 2 has no text worth embedding and no image URL: its embedding
        // fails, the sibling still completes.
        let catalog = Arc::new(MemoryCatalog::seed(vec![
            item(1, "denim jacket", None),
            item(2, "", None),
        ]));
        let (queue, _index) = queue_with(Arc::clone(&catalog), Arc::new(HashingEmbedder::default()));

        let job_id = queue.enqueue(
            vec![Uuid::from_u128(1), Uuid::from_u128(2)],
            JobPriority::Normal,
            false,
        );
        let record = queue
            .await_terminal(job_id, Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.succeeded, 1);
        assert_eq!(record.failed, 1);
        assert_eq!(record.failures.len(), 1);
        assert_eq!(record.failures[0].item_id, Uuid::from_u128(2));
    }

    #[tokio::test]
    async fn test_unknown_item_marks_job_failed() {
        let catalog = Arc::new(MemoryCatalog::new());
        let (queue, _index) = queue_with(catalog, Arc::new(HashingEmbedder::default()));

        let job_id = queue.enqueue(vec![Uuid::from_u128(404)], JobPriority::Normal, false);
        let record = queue
            .await_terminal(job_id, Duration::from_secs(5))
            .await
            .unwrap();

        // Every item failed, so the job as a whole is failed.
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.failed, 1);
    }

    #[tokio::test]
    async fn test_status_for_unknown_job() {
        let catalog = Arc::new(MemoryCatalog::new());
        let (queue, _index) = queue_with(catalog, Arc::new(HashingEmbedder::default()));
        assert!(queue.status(Uuid::from_u128(1)).is_none());
    }

    #[test]
    fn test_priority_ordering() {
        let mut heap = BinaryHeap::new();
        heap.push(QueuedJob {
            priority: JobPriority::Low,
            seq: 0,
            job_id: Uuid::from_u128(1),
        });
        heap.push(QueuedJob {
            priority: JobPriority::High,
            seq: 1,
            job_id: Uuid::from_u128(2),
        });
        heap.push(QueuedJob {
            priority: JobPriority::Normal,
            seq: 2,
            job_id: Uuid::from_u128(3),
        });
        heap.push(QueuedJob {
            priority: JobPriority::High,
            seq: 3,
            job_id: Uuid::from_u128(4),
        });

        let order: Vec<Uuid> = std::iter::from_fn(|| heap.pop().map(|j| j.job_id)).collect();
        // High priority first, FIFO within a priority.
        assert_eq!(
            order,
            vec![
                Uuid::from_u128(2),
                Uuid::from_u128(4),
                Uuid::from_u128(3),
                Uuid::from_u128(1),
            ]
        );
    }
}
