use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// A named background loop with idempotent start/stop.
///
/// Nothing runs until [`PeriodicTask::start`] is called; the first tick fires
/// immediately, later ticks every `period`.
pub struct PeriodicTask {
    name: &'static str,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicTask {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            handle: Mutex::new(None),
        }
    }

    /// Returns `false` if the loop was already running.
    pub async fn start<F, Fut>(&self, period: Duration, mut tick: F) -> bool
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut handle = self.handle.lock().await;
        if handle.as_ref().is_some_and(|task| !task.is_finished()) {
            tracing::debug!(task = self.name, "background task already running");
            return false;
        }

        let name = self.name;
        *handle = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                tick().await;
            }
        }));
        tracing::info!(task = name, period_secs = period.as_secs(), "background task started");
        true
    }

    /// Returns `false` if the loop was not running.
    pub async fn stop(&self) -> bool {
        let mut handle = self.handle.lock().await;
        match handle.take() {
            Some(task) if !task.is_finished() => {
                task.abort();
                tracing::info!(task = self.name, "background task stopped");
                true
            }
            _ => false,
        }
    }

    pub async fn is_running(&self) -> bool {
        self.handle
            .lock()
            .await
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::PeriodicTask;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let task = PeriodicTask::new("test");
        let ticks = Arc::new(AtomicU32::new(0));

        let counter = ticks.clone();
        assert!(
            task.start(Duration::from_secs(3600), move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await
        );
        assert!(!task.start(Duration::from_secs(3600), || async {}).await);
        assert!(task.is_running().await);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1, "first tick fires immediately");

        assert!(task.stop().await);
        assert!(!task.stop().await);
        assert!(!task.is_running().await);
    }

    #[tokio::test]
    async fn can_restart_after_stop() {
        let task = PeriodicTask::new("restart");
        assert!(task.start(Duration::from_secs(60), || async {}).await);
        assert!(task.stop().await);
        assert!(task.start(Duration::from_secs(60), || async {}).await);
        assert!(task.stop().await);
    }
}
