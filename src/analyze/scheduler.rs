// src/analyze/scheduler.rs
//! Batch classification with bounded in-flight calls and staggered starts.
//!
//! Posts are split into fixed-size chunks. All chunks run concurrently; chunk
//! `c` starts after `c * pacing`, and item `i` of a chunk after a further
//! `(i % max_in_flight) * pacing / 2`. A semaphore shared by the whole run caps
//! in-flight oracle calls at `max_in_flight` regardless of latency.
//!
//! Everything runs inside the caller's task: dropping the returned future drops
//! every pending call with it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use once_cell::sync::OnceCell;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::analyze::classify::PostClassifier;
use crate::analyze::{CategorySet, ClassificationResult, ClassifiedItem};
use crate::config::pipeline::BatchCfg;
use crate::error::ClassifyError;
use crate::ingest::types::ContentItem;

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("classify_calls_total", "Classifier calls dispatched.");
        describe_counter!(
            "classify_defaults_total",
            "Posts that received the safe default after a failed call."
        );
        describe_histogram!("classify_ms", "Classifier call latency in milliseconds.");
    });
}

/// Split into consecutive chunks of at most `size` items.
pub(crate) fn partition<T>(items: Vec<T>, size: usize) -> Vec<Vec<T>> {
    let size = size.max(1);
    let mut chunks = Vec::with_capacity(items.len().div_ceil(size));
    let mut it = items.into_iter().peekable();
    while it.peek().is_some() {
        chunks.push(it.by_ref().take(size).collect());
    }
    chunks
}

#[derive(Clone)]
pub struct BatchScheduler {
    classifier: Arc<dyn PostClassifier>,
    categories: CategorySet,
    chunk_size: usize,
    max_in_flight: usize,
    pacing: Duration,
    call_timeout: Duration,
}

impl BatchScheduler {
    pub fn new(classifier: Arc<dyn PostClassifier>, cfg: &BatchCfg, categories: CategorySet) -> Self {
        ensure_metrics_described();
        Self {
            classifier,
            categories,
            chunk_size: cfg.chunk_size.max(1),
            max_in_flight: cfg.max_in_flight.max(1),
            pacing: Duration::from_millis(cfg.pacing_ms),
            call_timeout: Duration::from_millis(cfg.call_timeout_ms.max(1)),
        }
    }

    pub fn categories(&self) -> &CategorySet {
        &self.categories
    }

    /// Classify every post. `output[i]` always belongs to `posts[i]`; failed
    /// calls carry [`ClassificationResult::safe_default`].
    pub async fn classify_all(&self, posts: Vec<ContentItem>) -> Vec<ClassifiedItem> {
        let total = posts.len();
        if total == 0 {
            return Vec::new();
        }

        let permits = Semaphore::new(self.max_in_flight);
        let completed = AtomicUsize::new(0);
        let defaults = AtomicUsize::new(0);
        let chunks = partition(posts, self.chunk_size);
        let chunk_count = chunks.len();
        let started = Instant::now();

        let (permits, completed, defaults) = (&permits, &completed, &defaults);
        let pacing = self.pacing;
        let window = self.max_in_flight;

        let runs = chunks.into_iter().enumerate().map(move |(chunk_idx, chunk)| async move {
            sleep(pacing * chunk_idx as u32).await;

            let items = chunk.into_iter().enumerate().map(move |(pos, post)| async move {
                sleep((pacing / 2) * (pos % window) as u32).await;
                let categories = match self.classify_one(&post, permits).await {
                    Some(c) => c,
                    None => {
                        defaults.fetch_add(1, Ordering::Relaxed);
                        ClassificationResult::safe_default(&self.categories)
                    }
                };
                let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(done, total, "classification progress");
                ClassifiedItem { post, categories }
            });

            let out = join_all(items).await;
            debug!(chunk = chunk_idx + 1, chunks = chunk_count, "chunk classified");
            out
        });

        let out: Vec<ClassifiedItem> = join_all(runs).await.into_iter().flatten().collect();

        info!(
            posts = total,
            chunks = chunk_count,
            defaulted = defaults.load(Ordering::Relaxed),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch classification complete"
        );
        out
    }

    /// `None` when the call failed or timed out.
    async fn classify_one(&self, post: &ContentItem, permits: &Semaphore) -> Option<ClassificationResult> {
        // The semaphore lives for the whole run and is never closed.
        let _permit = permits.acquire().await.ok()?;

        counter!("classify_calls_total").increment(1);
        let t0 = Instant::now();
        let outcome = match timeout(self.call_timeout, self.classifier.classify(post)).await {
            Ok(res) => res,
            Err(_) => Err(ClassifyError::Timeout),
        };
        histogram!("classify_ms").record(t0.elapsed().as_secs_f64() * 1000.0);

        match outcome {
            Ok(result) => Some(result),
            Err(e) => {
                warn!(title = %post.title, error = %e, "classification failed, using default");
                counter!("classify_defaults_total").increment(1);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    fn posts(n: usize) -> Vec<ContentItem> {
        (0..n)
            .map(|i| ContentItem {
                title: format!("post {i}"),
                content: String::new(),
                score: i as i64,
                num_comments: 0,
                created_at: chrono::Utc::now(),
                url: format!("https://www.reddit.com/r/t/comments/{i}/"),
            })
            .collect()
    }

    fn index_of(post: &ContentItem) -> usize {
        post.title.trim_start_matches("post ").parse().unwrap()
    }

    /// Later items answer faster, so arrival order is the reverse of input order.
    struct ReverseLatency {
        fail_at: Option<usize>,
    }

    #[async_trait]
    impl PostClassifier for ReverseLatency {
        async fn classify(&self, post: &ContentItem) -> Result<ClassificationResult, ClassifyError> {
            let i = index_of(post);
            sleep(Duration::from_millis(1000 - 10 * i as u64)).await;
            if Some(i) == self.fail_at {
                return Err(ClassifyError::Schema("boom".into()));
            }
            let mut r = ClassificationResult::all_false(&CategorySet::default(), &format!("ok {i}"));
            r.flags.insert("painAndAnger".into(), i % 2 == 0);
            Ok(r)
        }
    }

    fn cfg(chunk_size: usize, max_in_flight: usize) -> BatchCfg {
        BatchCfg {
            chunk_size,
            max_in_flight,
            pacing_ms: 500,
            call_timeout_ms: 30_000,
        }
    }

    #[test]
    fn partition_sizes() {
        let chunks = partition((0..23).collect::<Vec<_>>(), 10);
        assert_eq!(chunks.iter().map(Vec::len).collect::<Vec<_>>(), vec![10, 10, 3]);
        assert_eq!(chunks[2], vec![20, 21, 22]);
        assert!(partition(Vec::<u8>::new(), 10).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn output_order_matches_input() {
        let s = BatchScheduler::new(
            Arc::new(ReverseLatency { fail_at: None }),
            &cfg(10, 5),
            CategorySet::default(),
        );
        let out = s.classify_all(posts(23)).await;
        assert_eq!(out.len(), 23);
        for (i, item) in out.iter().enumerate() {
            assert_eq!(item.post.title, format!("post {i}"));
            assert_eq!(item.categories.explanation, format!("ok {i}"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn single_failure_is_isolated() {
        let s = BatchScheduler::new(
            Arc::new(ReverseLatency { fail_at: Some(7) }),
            &cfg(4, 2),
            CategorySet::default(),
        );
        let out = s.classify_all(posts(12)).await;
        assert_eq!(out.len(), 12);
        assert_eq!(out[7].categories, ClassificationResult::safe_default(&CategorySet::default()));
        for (i, item) in out.iter().enumerate().filter(|(i, _)| *i != 7) {
            assert_eq!(item.categories.explanation, format!("ok {i}"));
            assert_eq!(item.categories.is_set("painAndAnger"), i % 2 == 0);
        }
    }

    struct Tracking {
        current: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PostClassifier for Tracking {
        async fn classify(&self, _post: &ContentItem) -> Result<ClassificationResult, ClassifyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            sleep(Duration::from_secs(3)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(ClassificationResult::all_false(&CategorySet::default(), "ok"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_never_exceeds_bound() {
        let tracker = Arc::new(Tracking {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        });
        let s = BatchScheduler::new(tracker.clone(), &cfg(10, 3), CategorySet::default());
        let out = s.classify_all(posts(30)).await;
        assert_eq!(out.len(), 30);
        assert_eq!(tracker.calls.load(Ordering::SeqCst), 30);
        let peak = tracker.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak in-flight {peak} exceeded 3");
        assert!(peak >= 2, "calls never overlapped");
    }

    #[tokio::test(start_paused = true)]
    async fn empty_input_makes_no_calls() {
        let tracker = Arc::new(Tracking {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        });
        let s = BatchScheduler::new(tracker.clone(), &cfg(10, 5), CategorySet::default());
        assert!(s.classify_all(Vec::new()).await.is_empty());
        assert_eq!(tracker.calls.load(Ordering::SeqCst), 0);
    }

    struct Hangs;

    #[async_trait]
    impl PostClassifier for Hangs {
        async fn classify(&self, _post: &ContentItem) -> Result<ClassificationResult, ClassifyError> {
            sleep(Duration::from_secs(3600)).await;
            Ok(ClassificationResult::all_false(&CategorySet::default(), "late"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_call_times_out_to_default() {
        let mut c = cfg(10, 5);
        c.call_timeout_ms = 1_000;
        let s = BatchScheduler::new(Arc::new(Hangs), &c, CategorySet::default());
        let out = s.classify_all(posts(2)).await;
        assert!(out
            .iter()
            .all(|i| i.categories == ClassificationResult::safe_default(&CategorySet::default())));
    }
}
