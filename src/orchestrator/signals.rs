//! Pause, skip and quit controls shared by the caller and every worker.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;

/// Cloneable handle over the three batch controls.
///
/// Pause blocks workers before their next track. Skip is one-shot: the next
/// dequeued track is marked skipped without work. Quit stops dequeuing and
/// is polled by in-flight tracks at each stage boundary.
#[derive(Debug, Clone)]
pub struct ControlSignals {
    pause: Arc<watch::Sender<bool>>,
    quit: Arc<watch::Sender<bool>>,
    skip: Arc<AtomicBool>,
}

impl Default for ControlSignals {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlSignals {
    pub fn new() -> Self {
        Self {
            pause: Arc::new(watch::Sender::new(false)),
            quit: Arc::new(watch::Sender::new(false)),
            skip: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn pause(&self) {
        self.pause.send_replace(true);
    }

    pub fn resume(&self) {
        self.pause.send_replace(false);
    }

    /// Flip pause; returns the new state.
    pub fn toggle_pause(&self) -> bool {
        let mut paused = false;
        self.pause.send_modify(|p| {
            *p = !*p;
            paused = *p;
        });
        paused
    }

    pub fn is_paused(&self) -> bool {
        *self.pause.borrow()
    }

    pub fn request_skip(&self) {
        self.skip.store(true, Ordering::SeqCst);
    }

    /// Consume a pending skip request.
    pub fn take_skip(&self) -> bool {
        self.skip.swap(false, Ordering::SeqCst)
    }

    pub fn quit(&self) {
        self.quit.send_replace(true);
    }

    pub fn is_quit(&self) -> bool {
        *self.quit.borrow()
    }

    /// Resolves once quit has been requested.
    pub async fn quit_requested(&self) {
        let mut rx = self.quit.subscribe();
        // The sender lives in `self`, so the channel can't close here.
        let _ = rx.wait_for(|quit| *quit).await;
    }

    /// Block while paused. Returns early on quit.
    pub async fn wait_while_paused(&self) {
        let mut pause = self.pause.subscribe();
        tokio::select! {
            _ = pause.wait_for(|paused| !*paused) => {}
            _ = self.quit_requested() => {}
        }
    }

    /// Sleep for `duration` unless quit comes first. True if interrupted.
    pub async fn sleep_or_quit(&self, duration: Duration) -> bool {
        if self.is_quit() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = self.quit_requested() => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_skip_is_one_shot() {
        let signals = ControlSignals::new();
        assert!(!signals.take_skip());
        signals.request_skip();
        assert!(signals.take_skip());
        assert!(!signals.take_skip());
    }

    #[test]
    fn test_toggle_pause() {
        let signals = ControlSignals::new();
        assert!(signals.toggle_pause());
        assert!(signals.is_paused());
        assert!(!signals.toggle_pause());
        assert!(!signals.is_paused());
    }

    #[test]
    fn test_clones_share_state() {
        let signals = ControlSignals::new();
        let other = signals.clone();
        other.quit();
        assert!(signals.is_quit());
    }

    #[tokio::test]
    async fn test_wait_while_paused_returns_immediately_when_running() {
        let signals = ControlSignals::new();
        tokio::time::timeout(Duration::from_millis(100), signals.wait_while_paused())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_resume_releases_paused_waiter() {
        let signals = ControlSignals::new();
        signals.pause();

        let waiter = {
            let signals = signals.clone();
            tokio::spawn(async move { signals.wait_while_paused().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        signals.resume();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_quit_releases_paused_waiter() {
        let signals = ControlSignals::new();
        signals.pause();
        let waiter = {
            let signals = signals.clone();
            tokio::spawn(async move { signals.wait_while_paused().await })
        };
        signals.quit();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_sleep_interrupted_by_quit() {
        let signals = ControlSignals::new();
        let quitter = signals.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            quitter.quit();
        });

        let start = Instant::now();
        assert!(signals.sleep_or_quit(Duration::from_secs(10)).await);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_sleep_completes_without_quit() {
        let signals = ControlSignals::new();
        assert!(!signals.sleep_or_quit(Duration::from_millis(10)).await);
    }
}
