//! Clipboard change detection
//!
//! The monitor polls the provider's change counter and emits one
//! [`ClipboardChange`] per counter movement. Writes made by the engine itself
//! are hidden behind an explicit guard: the caller raises it before writing
//! and asks for it to be released afterwards. A release takes effect at the
//! end of the first poll after the delay, so the self-write is always seen
//! while the guard is still up.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, trace};

use super::{ClipboardError, ClipboardProvider, IgnoreFilter};
use crate::history::HistoryItemContent;

const CHANNEL_CAPACITY: usize = 100;

/// One detected clipboard change
#[derive(Debug, Clone, PartialEq)]
pub struct ClipboardChange {
    /// Every representation of the new payload
    pub contents: Vec<HistoryItemContent>,
    /// Application the copy came from, when known
    pub application: Option<String>,
    /// Change counter value that produced the payload
    pub change_count: u64,
}

#[derive(Debug, Default)]
struct Guard {
    suppressed: AtomicBool,
    release_requested: AtomicBool,
}

/// Polling state, kept across restarts so no change is lost or replayed
struct Poller {
    provider: Arc<dyn ClipboardProvider>,
    filter: Arc<IgnoreFilter>,
    guard: Arc<Guard>,
    last_count: Option<u64>,
}

impl Poller {
    async fn establish_baseline(&mut self) {
        if self.last_count.is_some() {
            return;
        }
        match self.provider.change_count().await {
            Ok(count) => self.last_count = Some(count),
            Err(e) => debug!("Clipboard unavailable at start: {}", e),
        }
    }

    async fn poll(&mut self) -> Option<ClipboardChange> {
        let change = self.detect().await;

        if self.guard.release_requested.swap(false, Ordering::SeqCst) {
            self.guard.suppressed.store(false, Ordering::SeqCst);
            trace!("Clipboard guard released");
        }
        change
    }

    async fn detect(&mut self) -> Option<ClipboardChange> {
        let count = match self.provider.change_count().await {
            Ok(count) => count,
            Err(e) => {
                debug!("Clipboard change counter unavailable: {}", e);
                return None;
            }
        };

        let Some(last) = self.last_count else {
            self.last_count = Some(count);
            return None;
        };
        if count == last {
            return None;
        }

        if self.guard.suppressed.load(Ordering::SeqCst) {
            debug!("Skipping clipboard change {} made by the engine", count);
            self.last_count = Some(count);
            return None;
        }

        match self.provider.read().await {
            Ok(snapshot) => {
                self.last_count = Some(count);
                if self.filter.should_ignore(&snapshot) {
                    debug!("Ignoring clipboard change {} by filter", count);
                    return None;
                }
                Some(ClipboardChange {
                    contents: snapshot.contents,
                    application: snapshot.application,
                    change_count: count,
                })
            }
            Err(ClipboardError::NoContent) => {
                self.last_count = Some(count);
                None
            }
            Err(e) => {
                // Counter is left behind so the next tick retries
                debug!("Failed to read clipboard change {}: {}", count, e);
                None
            }
        }
    }
}

/// Watches the shared clipboard and delivers each change once
pub struct ClipboardMonitor {
    poller: Arc<AsyncMutex<Poller>>,
    guard: Arc<Guard>,
    interval_ms: AtomicU64,
    subscribers: Arc<Mutex<Vec<mpsc::Sender<ClipboardChange>>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ClipboardMonitor {
    pub fn new(
        provider: Arc<dyn ClipboardProvider>,
        filter: IgnoreFilter,
        poll_interval: Duration,
    ) -> Self {
        let guard = Arc::new(Guard::default());
        let poller = Poller {
            provider,
            filter: Arc::new(filter),
            guard: guard.clone(),
            last_count: None,
        };

        Self {
            poller: Arc::new(AsyncMutex::new(poller)),
            guard,
            interval_ms: AtomicU64::new(poll_interval.as_millis().max(1) as u64),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            task: Mutex::new(None),
        }
    }

    /// Receive every change detected from now on
    pub fn subscribe(&self) -> mpsc::Receiver<ClipboardChange> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        lock(&self.subscribers).push(tx);
        rx
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::SeqCst))
    }

    pub fn is_running(&self) -> bool {
        lock(&self.task)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Start polling. Changes made before this call are not reported.
    pub async fn start(&self) {
        if self.is_running() {
            return;
        }

        self.poller.lock().await.establish_baseline().await;

        let poller = self.poller.clone();
        let subscribers = self.subscribers.clone();
        let period = self.poll_interval();

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let change = poller.lock().await.poll().await;
                if let Some(change) = change {
                    deliver(&subscribers, change).await;
                }
            }
        });

        *lock(&self.task) = Some(handle);
        info!("Clipboard monitor started ({:?} interval)", period);
    }

    /// Stop polling
    pub fn stop(&self) {
        if let Some(handle) = lock(&self.task).take() {
            handle.abort();
            info!("Clipboard monitor stopped");
        }
    }

    /// Change the poll interval, taking effect on the next start
    pub fn set_poll_interval(&self, poll_interval: Duration) {
        self.interval_ms
            .store(poll_interval.as_millis().max(1) as u64, Ordering::SeqCst);
    }

    /// Restart with a new poll interval
    pub async fn restart(&self, poll_interval: Duration) {
        self.stop();
        self.set_poll_interval(poll_interval);
        self.start().await;
    }

    /// Poll once outside of the timer
    pub async fn poll_now(&self) -> Option<ClipboardChange> {
        let change = self.poller.lock().await.poll().await;
        if let Some(change) = &change {
            deliver(&self.subscribers, change.clone()).await;
        }
        change
    }

    /// Raise the self-write guard
    pub fn suppress(&self) {
        self.guard.release_requested.store(false, Ordering::SeqCst);
        self.guard.suppressed.store(true, Ordering::SeqCst);
    }

    /// Drop the guard immediately
    pub fn release(&self) {
        self.guard.release_requested.store(false, Ordering::SeqCst);
        self.guard.suppressed.store(false, Ordering::SeqCst);
    }

    /// Release the guard on the first poll after `delay`
    pub fn release_after(&self, delay: Duration) {
        let guard = self.guard.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            guard.release_requested.store(true, Ordering::SeqCst);
        });
    }

    pub fn is_suppressed(&self) -> bool {
        self.guard.suppressed.load(Ordering::SeqCst)
    }
}

impl Drop for ClipboardMonitor {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.task).take() {
            handle.abort();
        }
    }
}

async fn deliver(subscribers: &Mutex<Vec<mpsc::Sender<ClipboardChange>>>, change: ClipboardChange) {
    let senders: Vec<_> = lock(subscribers).clone();
    for sender in &senders {
        if sender.send(change.clone()).await.is_err() {
            trace!("Dropping closed clipboard subscriber");
        }
    }
    lock(subscribers).retain(|sender| !sender.is_closed());
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clipboard::{ClipboardSnapshot, MemoryClipboard, MockClipboardProvider};
    use crate::config::ClipboardConfig;

    fn monitor(provider: Arc<dyn ClipboardProvider>) -> ClipboardMonitor {
        ClipboardMonitor::new(provider, IgnoreFilter::default(), Duration::from_millis(20))
    }

    #[tokio::test]
    async fn test_existing_content_is_not_reported() {
        let clipboard = Arc::new(MemoryClipboard::new());
        clipboard.copy_text("before start", None);

        let monitor = monitor(clipboard.clone());
        monitor.poller.lock().await.establish_baseline().await;
        assert_eq!(monitor.poll_now().await, None);

        clipboard.copy_text("after start", Some("Notes"));
        let change = monitor.poll_now().await.unwrap();
        assert_eq!(change.contents, vec![HistoryItemContent::text("after start")]);
        assert_eq!(change.application.as_deref(), Some("Notes"));
        assert_eq!(change.change_count, 2);

        assert_eq!(monitor.poll_now().await, None);
    }

    #[tokio::test]
    async fn test_self_writes_are_suppressed() {
        let clipboard = Arc::new(MemoryClipboard::new());
        let monitor = monitor(clipboard.clone());
        monitor.poll_now().await;

        monitor.suppress();
        clipboard
            .write(&[HistoryItemContent::text("engine write")])
            .await
            .unwrap();
        assert_eq!(monitor.poll_now().await, None);

        monitor.release();
        clipboard.copy_text("user copy", None);
        assert!(monitor.poll_now().await.is_some());
    }

    #[tokio::test]
    async fn test_delayed_release_waits_for_a_poll() {
        let clipboard = Arc::new(MemoryClipboard::new());
        let monitor = monitor(clipboard.clone());
        monitor.poll_now().await;

        monitor.suppress();
        monitor.release_after(Duration::from_millis(1));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(monitor.is_suppressed());

        clipboard
            .write(&[HistoryItemContent::text("engine write")])
            .await
            .unwrap();
        assert_eq!(monitor.poll_now().await, None);
        assert!(!monitor.is_suppressed());

        clipboard.copy_text("user copy", None);
        assert!(monitor.poll_now().await.is_some());
    }

    #[tokio::test]
    async fn test_read_failure_is_retried() {
        let counter = Arc::new(AtomicU64::new(1));
        let reads = Arc::new(AtomicU64::new(0));

        let mut provider = MockClipboardProvider::new();
        {
            let counter = counter.clone();
            provider
                .expect_change_count()
                .returning(move || Ok(counter.load(Ordering::SeqCst)));
        }
        {
            let reads = reads.clone();
            provider.expect_read().returning(move || {
                if reads.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(ClipboardError::Platform("busy".to_string()))
                } else {
                    Ok(ClipboardSnapshot {
                        contents: vec![HistoryItemContent::text("late")],
                        application: None,
                    })
                }
            });
        }

        let monitor = monitor(Arc::new(provider));
        assert_eq!(monitor.poll_now().await, None);

        counter.store(2, Ordering::SeqCst);
        assert_eq!(monitor.poll_now().await, None);
        let change = monitor.poll_now().await.unwrap();
        assert_eq!(change.change_count, 2);
        assert_eq!(reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_counter_failure_is_no_change() {
        let mut provider = MockClipboardProvider::new();
        provider
            .expect_change_count()
            .returning(|| Err(ClipboardError::Platform("no display".to_string())));
        provider.expect_read().never();

        let monitor = monitor(Arc::new(provider));
        assert_eq!(monitor.poll_now().await, None);
        assert_eq!(monitor.poll_now().await, None);
    }

    #[tokio::test]
    async fn test_filtered_changes_are_dropped() {
        let clipboard = Arc::new(MemoryClipboard::new());
        let config = ClipboardConfig {
            ignored_applications: vec!["1Password".to_string()],
            ..ClipboardConfig::default()
        };
        let monitor = ClipboardMonitor::new(
            clipboard.clone(),
            IgnoreFilter::from_config(&config),
            Duration::from_millis(20),
        );
        monitor.poll_now().await;

        clipboard.copy_text("secret", Some("1Password"));
        assert_eq!(monitor.poll_now().await, None);
        clipboard.copy_text("public", Some("Safari"));
        assert!(monitor.poll_now().await.is_some());
    }

    #[tokio::test]
    async fn test_start_delivers_to_subscribers() {
        let clipboard = Arc::new(MemoryClipboard::new());
        let monitor = monitor(clipboard.clone());
        let mut rx = monitor.subscribe();

        monitor.start().await;
        assert!(monitor.is_running());

        clipboard.copy_text("watched", None);
        let change = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(change.contents[0].as_text(), Some("watched"));

        monitor.restart(Duration::from_millis(30)).await;
        assert_eq!(monitor.poll_interval(), Duration::from_millis(30));
        clipboard.copy_text("after restart", None);
        let change = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(change.contents[0].as_text(), Some("after restart"));

        monitor.stop();
        assert!(!monitor.is_running());
    }
}
