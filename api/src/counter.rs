use std::collections::HashMap;
use std::time::Duration;

use riskgate_core::ContentType;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

const MAX_TRACKED_WINDOWS: usize = 50_000;

/// In-process fixed-window counter keyed by user and content type.
///
/// The limit is passed on every hit because the adaptive quota can change
/// between requests; a changed window length starts a fresh window.
pub struct WindowCounter {
    windows: Mutex<HashMap<(Uuid, ContentType), Window>>,
    capacity: usize,
}

impl Default for WindowCounter {
    fn default() -> Self {
        Self::with_capacity(MAX_TRACKED_WINDOWS)
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    length: Duration,
    count: u64,
}

impl Window {
    fn ends_at(&self) -> Instant {
        self.started + self.length
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterDecision {
    pub allowed: bool,
    /// Requests in the current window, this one included.
    pub count: u64,
    pub limit: u64,
    pub remaining: u64,
    pub reset_after: Duration,
}

impl WindowCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks at most `capacity` live windows; past that the window that
    /// started first is dropped to make room.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    #[cfg(test)]
    async fn tracked(&self) -> usize {
        self.windows.lock().await.len()
    }

    pub async fn hit(
        &self,
        user_id: Uuid,
        content_type: ContentType,
        window: Duration,
        limit: u64,
    ) -> CounterDecision {
        self.hit_at(user_id, content_type, window, limit, Instant::now())
            .await
    }

    pub async fn hit_at(
        &self,
        user_id: Uuid,
        content_type: ContentType,
        window: Duration,
        limit: u64,
        now: Instant,
    ) -> CounterDecision {
        let key = (user_id, content_type);
        let mut windows = self.windows.lock().await;
        if windows.len() >= self.capacity && !windows.contains_key(&key) {
            windows.retain(|_, w| w.ends_at() > now);
            if windows.len() >= self.capacity
                && let Some(oldest) = windows
                    .iter()
                    .min_by_key(|(_, w)| w.started)
                    .map(|(k, _)| *k)
            {
                windows.remove(&oldest);
            }
        }

        let entry = windows
            .entry(key)
            .or_insert(Window {
                started: now,
                length: window,
                count: 0,
            });
        if now >= entry.ends_at() || entry.length != window {
            *entry = Window {
                started: now,
                length: window,
                count: 0,
            };
        }
        entry.count = entry.count.saturating_add(1);

        CounterDecision {
            allowed: entry.count <= limit,
            count: entry.count,
            limit,
            remaining: limit.saturating_sub(entry.count),
            reset_after: entry.ends_at().saturating_duration_since(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_up_to_limit_then_rejects() {
        let counter = WindowCounter::new();
        let user_id = Uuid::now_v7();
        let now = Instant::now();
        let window = Duration::from_secs(60);

        for expected_remaining in [2, 1, 0] {
            let decision = counter
                .hit_at(user_id, ContentType::Post, window, 3, now)
                .await;
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
        }
        let rejected = counter
            .hit_at(user_id, ContentType::Post, window, 3, now + Duration::from_secs(10))
            .await;
        assert!(!rejected.allowed);
        assert_eq!(rejected.count, 4);
        assert_eq!(rejected.reset_after, Duration::from_secs(50));
    }

    #[tokio::test]
    async fn window_resets_after_expiry() {
        let counter = WindowCounter::new();
        let user_id = Uuid::now_v7();
        let now = Instant::now();
        let window = Duration::from_secs(60);

        counter.hit_at(user_id, ContentType::Like, window, 1, now).await;
        assert!(
            !counter
                .hit_at(user_id, ContentType::Like, window, 1, now)
                .await
                .allowed
        );
        assert!(
            counter
                .hit_at(user_id, ContentType::Like, window, 1, now + window)
                .await
                .allowed
        );
    }

    #[tokio::test]
    async fn content_types_and_users_are_counted_separately() {
        let counter = WindowCounter::new();
        let alice = Uuid::now_v7();
        let bob = Uuid::now_v7();
        let now = Instant::now();
        let window = Duration::from_secs(60);

        assert!(counter.hit_at(alice, ContentType::Post, window, 1, now).await.allowed);
        assert!(counter.hit_at(alice, ContentType::Comment, window, 1, now).await.allowed);
        assert!(counter.hit_at(bob, ContentType::Post, window, 1, now).await.allowed);
    }

    #[tokio::test]
    async fn tightened_limit_applies_to_current_window() {
        let counter = WindowCounter::new();
        let user_id = Uuid::now_v7();
        let now = Instant::now();
        let window = Duration::from_secs(60);

        for _ in 0..3 {
            counter.hit_at(user_id, ContentType::Upload, window, 10, now).await;
        }
        let decision = counter
            .hit_at(user_id, ContentType::Upload, window, 2, now)
            .await;
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
    }

    #[tokio::test]
    async fn live_windows_stay_within_capacity() {
        let counter = WindowCounter::with_capacity(4);
        let now = Instant::now();
        let window = Duration::from_secs(60);
        let first = Uuid::now_v7();

        counter.hit_at(first, ContentType::Post, window, 5, now).await;
        for i in 1..10u64 {
            counter
                .hit_at(
                    Uuid::now_v7(),
                    ContentType::Post,
                    window,
                    5,
                    now + Duration::from_millis(i),
                )
                .await;
            assert!(counter.tracked().await <= 4);
        }

        // the earliest window was evicted, so its user starts over
        let decision = counter
            .hit_at(first, ContentType::Post, window, 5, now + Duration::from_millis(20))
            .await;
        assert_eq!(decision.count, 1);
        assert_eq!(counter.tracked().await, 4);
    }
}
