//! Identify rate window shared by every shard of a set.
//!
//! Each bucket is a task that hands out one grant per window. Shards request a
//! grant and suspend until it arrives; a request whose requester went away is
//! skipped without consuming the bucket's slot. A bucket's last grant outlives
//! the queue when it is rebuilt for a new shard set.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, sleep_until, timeout};
use tracing::{debug, trace};

use super::error::{GatewayError, GatewayResult};
use crate::domain::entities::ShardDescriptor;

/// Permission to send one identify or resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentifyGrant {
    bucket: u32,
    granted_at: Instant,
}

impl IdentifyGrant {
    #[must_use]
    pub const fn bucket(&self) -> u32 {
        self.bucket
    }

    #[must_use]
    pub const fn granted_at(&self) -> Instant {
        self.granted_at
    }
}

#[derive(Debug)]
struct IdentifyRequest {
    shard: u32,
    reply: oneshot::Sender<IdentifyGrant>,
}

type LastGrant = Arc<Mutex<Option<Instant>>>;

#[derive(Debug, Clone)]
struct Bucket {
    requests: mpsc::UnboundedSender<IdentifyRequest>,
    last_grant: LastGrant,
}

/// Handle to the bucket tasks. Clones share the same buckets; the tasks stop
/// once every handle is dropped.
#[derive(Debug, Clone)]
pub struct IdentifyQueue {
    buckets: Vec<Bucket>,
    window: Duration,
}

impl IdentifyQueue {
    /// Spawns one bucket per unit of `max_concurrency` (at least one).
    #[must_use]
    pub fn new(max_concurrency: u32, window: Duration) -> Self {
        Self::spawn(max_concurrency, window, |_| None)
    }

    /// Queue for a new shard set. Buckets that existed here keep their last
    /// grant, so the window holds across the switch. Returns a clone when
    /// nothing changed.
    #[must_use]
    pub fn rebuild(&self, max_concurrency: u32, window: Duration) -> Self {
        if self.buckets.len() == max_concurrency.max(1) as usize && self.window == window {
            return self.clone();
        }
        Self::spawn(max_concurrency, window, |bucket| self.last_grant(bucket))
    }

    fn spawn(
        max_concurrency: u32,
        window: Duration,
        history: impl Fn(u32) -> Option<Instant>,
    ) -> Self {
        let buckets = (0..max_concurrency.max(1))
            .map(|bucket| {
                let (requests, rx) = mpsc::unbounded_channel();
                let last_grant = Arc::new(Mutex::new(history(bucket)));
                tokio::spawn(run_bucket(bucket, window, rx, Arc::clone(&last_grant)));
                Bucket {
                    requests,
                    last_grant,
                }
            })
            .collect();

        Self { buckets, window }
    }

    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    /// When `bucket` last handed out a grant.
    #[must_use]
    pub fn last_grant(&self, bucket: u32) -> Option<Instant> {
        self.buckets
            .get(bucket as usize)
            .and_then(|b| *b.last_grant.lock())
    }

    /// Waits for a grant in the shard's bucket.
    ///
    /// Dropping the returned future withdraws the request.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::RateLimited` if no grant arrives within
    /// `budget`, or `GatewayError::ChannelClosed` if the bucket stopped.
    pub async fn acquire(
        &self,
        shard: &ShardDescriptor,
        budget: Duration,
    ) -> GatewayResult<IdentifyGrant> {
        let index = shard.rate_limit_key() as usize % self.buckets.len();
        let bucket = self.buckets.get(index).ok_or(GatewayError::ChannelClosed)?;

        let (reply, granted) = oneshot::channel();
        bucket
            .requests
            .send(IdentifyRequest {
                shard: shard.index(),
                reply,
            })
            .map_err(|_| GatewayError::ChannelClosed)?;
        trace!(shard = shard.index(), bucket = index, "Queued identify request");

        match timeout(budget, granted).await {
            Ok(Ok(grant)) => Ok(grant),
            Ok(Err(_)) => Err(GatewayError::ChannelClosed),
            Err(_) => Err(GatewayError::RateLimited { waited: budget }),
        }
    }
}

async fn run_bucket(
    bucket: u32,
    window: Duration,
    mut requests: mpsc::UnboundedReceiver<IdentifyRequest>,
    shared_last_grant: LastGrant,
) {
    let mut last_grant = *shared_last_grant.lock();

    while let Some(mut request) = requests.recv().await {
        if request.reply.is_closed() {
            continue;
        }

        if let Some(last) = last_grant {
            tokio::select! {
                () = sleep_until(last + window) => {}
                () = request.reply.closed() => {
                    debug!(shard = request.shard, bucket, "Identify request withdrawn");
                    continue;
                }
            }
        }

        let now = Instant::now();
        let grant = IdentifyGrant {
            bucket,
            granted_at: now,
        };
        let mut shared = shared_last_grant.lock();
        if request.reply.send(grant).is_ok() {
            debug!(shard = request.shard, bucket, "Granted identify slot");
            last_grant = Some(now);
            *shared = last_grant;
        }
    }

    trace!(bucket, "Identify bucket stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_pending;

    const WINDOW: Duration = Duration::from_secs(5);
    const BUDGET: Duration = Duration::from_secs(120);

    fn shard(index: u32, total: u32, max_concurrency: u32) -> ShardDescriptor {
        ShardDescriptor::new(index, total, max_concurrency).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_bucket_grants_are_a_window_apart() {
        let queue = IdentifyQueue::new(1, WINDOW);
        let tasks: Vec<_> = (0..4)
            .map(|index| {
                let queue = queue.clone();
                tokio::spawn(async move { queue.acquire(&shard(index, 4, 1), BUDGET).await })
            })
            .collect();

        let mut granted = Vec::new();
        for task in tasks {
            granted.push(task.await.unwrap().unwrap().granted_at());
        }
        granted.sort();

        for pair in granted.windows(2) {
            assert!(pair[1] - pair[0] >= WINDOW, "{:?}", pair[1] - pair[0]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_buckets_grant_concurrently() {
        let queue = IdentifyQueue::new(2, WINDOW);
        let started = Instant::now();

        let (zero, one) = (shard(0, 2, 2), shard(1, 2, 2));
        let (first, second) = tokio::join!(queue.acquire(&zero, BUDGET), queue.acquire(&one, BUDGET));
        let (first, second) = (first.unwrap(), second.unwrap());

        assert_eq!(first.bucket(), 0);
        assert_eq!(second.bucket(), 1);
        assert_eq!(first.granted_at(), started);
        assert_eq!(second.granted_at(), started);
    }

    #[tokio::test(start_paused = true)]
    async fn test_withdrawn_request_does_not_consume_slot() {
        let queue = IdentifyQueue::new(1, WINDOW);
        let descriptor = shard(0, 1, 1);
        let first = queue.acquire(&descriptor, BUDGET).await.unwrap();

        let mut withdrawn = tokio_test::task::spawn(queue.acquire(&descriptor, BUDGET));
        assert_pending!(withdrawn.poll());
        drop(withdrawn);

        let next = queue.acquire(&descriptor, BUDGET).await.unwrap();
        assert_eq!(next.granted_at() - first.granted_at(), WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exceeded_is_rate_limited() {
        let queue = IdentifyQueue::new(1, WINDOW);
        let descriptor = shard(0, 1, 1);
        let first = queue.acquire(&descriptor, BUDGET).await.unwrap();

        let waited = Duration::from_secs(1);
        let result = queue.acquire(&descriptor, waited).await;
        assert!(matches!(result, Err(GatewayError::RateLimited { waited: w }) if w == waited));

        let next = queue.acquire(&descriptor, BUDGET).await.unwrap();
        assert_eq!(next.granted_at() - first.granted_at(), WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rebuilt_queue_keeps_bucket_window() {
        let queue = IdentifyQueue::new(1, WINDOW);
        let first = queue.acquire(&shard(0, 1, 1), BUDGET).await.unwrap();
        assert_eq!(queue.last_grant(0), Some(first.granted_at()));

        let same = queue.rebuild(1, WINDOW);
        let next = same.acquire(&shard(0, 2, 1), BUDGET).await.unwrap();
        assert_eq!(next.granted_at() - first.granted_at(), WINDOW);

        let wider = same.rebuild(2, WINDOW);
        assert_eq!(wider.bucket_count(), 2);
        assert_eq!(wider.last_grant(0), Some(next.granted_at()));
        assert_eq!(wider.last_grant(1), None);

        let (zero, one) = (shard(0, 2, 2), shard(1, 2, 2));
        let (a, b) = tokio::join!(wider.acquire(&zero, BUDGET), wider.acquire(&one, BUDGET));
        assert_eq!(a.unwrap().granted_at() - next.granted_at(), WINDOW);
        assert_eq!(b.unwrap().granted_at(), next.granted_at());
    }

    #[tokio::test]
    async fn test_zero_concurrency_still_has_one_bucket() {
        let queue = IdentifyQueue::new(0, WINDOW);
        assert_eq!(queue.bucket_count(), 1);
        assert_eq!(queue.window(), WINDOW);
    }
}
