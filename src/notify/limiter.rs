//! Rolling-window send accounting for the delivery worker.
//!
//! Telegram enforces two ceilings: roughly 30 messages per second across
//! the whole bot, and roughly 20 messages per minute into any single chat.
//! Both are tracked here as plain timestamp windows. A window answers one
//! question: may a send happen now, and if not, how long until it may.
//!
//! The accounting deliberately stays one slot under each ceiling. Pruning
//! and gating both run against the caller's clock reading, so behaviour is
//! deterministic for a given sequence of timestamps.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

/// Send timestamps within a single rolling window.
#[derive(Debug)]
pub(crate) struct RateWindow {
    limit: usize,
    window: Duration,
    stamps: VecDeque<Instant>,
}

impl RateWindow {
    pub(crate) fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            stamps: VecDeque::new(),
        }
    }

    /// How long the caller must wait before the next send, or `None` for
    /// an immediate slot. Expired stamps are pruned first.
    pub(crate) fn delay_until_slot(&mut self, now: Instant) -> Option<Duration> {
        prune(&mut self.stamps, self.window, now);

        // Gate one slot early so a burst can never land exactly on the
        // ceiling inside any window.
        if self.stamps.len() < self.limit.saturating_sub(1) {
            return None;
        }

        self.stamps
            .front()
            .map(|oldest| self.window.saturating_sub(now.duration_since(*oldest)))
    }

    /// Count a send at `now`.
    pub(crate) fn record(&mut self, now: Instant) {
        self.stamps.push_back(now);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.stamps.len()
    }
}

/// Per-chat rolling windows, keyed by chat id.
#[derive(Debug)]
pub(crate) struct RecipientWindows {
    limit: usize,
    window: Duration,
    by_chat: HashMap<String, VecDeque<Instant>>,
}

impl RecipientWindows {
    pub(crate) fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit,
            window,
            by_chat: HashMap::new(),
        }
    }

    /// Wait required before the next send to `chat_id`, or `None` for an
    /// immediate slot. A chat with no recent sends never waits.
    pub(crate) fn delay_until_slot(&mut self, chat_id: &str, now: Instant) -> Option<Duration> {
        let stamps = self.by_chat.get_mut(chat_id)?;
        prune(stamps, self.window, now);

        if stamps.len() < self.limit.saturating_sub(1) {
            return None;
        }

        stamps
            .front()
            .map(|oldest| self.window.saturating_sub(now.duration_since(*oldest)))
    }

    /// Count a send to `chat_id` at `now`.
    pub(crate) fn record(&mut self, chat_id: &str, now: Instant) {
        self.by_chat
            .entry(chat_id.to_string())
            .or_default()
            .push_back(now);
    }

    /// Drop chats whose stamps have all aged out of the window, so the map
    /// does not grow with every chat id ever messaged. Returns how many
    /// chats were removed.
    pub(crate) fn sweep(&mut self, now: Instant) -> usize {
        let before = self.by_chat.len();
        self.by_chat.retain(|_, stamps| {
            prune(stamps, self.window, now);
            !stamps.is_empty()
        });
        before - self.by_chat.len()
    }

    /// Number of chats currently tracked.
    pub(crate) fn tracked(&self) -> usize {
        self.by_chat.len()
    }
}

/// Evict stamps that have aged out. An entry exactly as old as the window
/// counts as expired, so waiting out `window - age(oldest)` always frees a
/// slot.
fn prune(stamps: &mut VecDeque<Instant>, window: Duration, now: Instant) {
    while let Some(oldest) = stamps.front() {
        if now.duration_since(*oldest) >= window {
            stamps.pop_front();
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_window_below_threshold_never_waits() {
        let mut window = RateWindow::new(30, Duration::from_secs(1));
        let now = Instant::now();

        for _ in 0..28 {
            assert_eq!(window.delay_until_slot(now), None);
            window.record(now);
        }
        assert_eq!(window.len(), 28);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_gates_one_slot_early() {
        let mut window = RateWindow::new(30, Duration::from_secs(1));
        let start = Instant::now();

        for _ in 0..29 {
            window.record(start);
        }

        // 29 stamps in flight: the 30th send must wait out the full window.
        assert_eq!(window.delay_until_slot(start), Some(Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_is_remaining_age_of_oldest_stamp() {
        let mut window = RateWindow::new(30, Duration::from_secs(1));
        let start = Instant::now();

        for _ in 0..29 {
            window.record(start);
        }

        tokio::time::advance(Duration::from_millis(400)).await;
        assert_eq!(
            window.delay_until_slot(Instant::now()),
            Some(Duration::from_millis(600))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiting_out_the_delay_frees_a_slot() {
        let mut window = RateWindow::new(30, Duration::from_secs(1));
        let start = Instant::now();

        for _ in 0..29 {
            window.record(start);
        }

        let wait = window.delay_until_slot(start).unwrap();
        tokio::time::advance(wait).await;

        // The oldest stamp is now exactly window-old and gets pruned.
        assert_eq!(window.delay_until_slot(Instant::now()), None);
        assert_eq!(window.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_limit_one_paces_every_send() {
        let mut window = RateWindow::new(1, Duration::from_secs(1));
        let start = Instant::now();

        // Nothing recorded yet, so there is nothing to wait on.
        assert_eq!(window.delay_until_slot(start), None);
        window.record(start);

        tokio::time::advance(Duration::from_millis(250)).await;
        assert_eq!(
            window.delay_until_slot(Instant::now()),
            Some(Duration::from_millis(750))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_chat_gate_reports_remaining_window() {
        let mut windows = RecipientWindows::new(20, Duration::from_secs(60));
        let start = Instant::now();

        for _ in 0..19 {
            windows.record("chat-1", start);
        }

        tokio::time::advance(Duration::from_secs(5)).await;
        let now = Instant::now();

        assert_eq!(
            windows.delay_until_slot("chat-1", now),
            Some(Duration::from_secs(55))
        );
        // Same clock reading, same answer.
        assert_eq!(
            windows.delay_until_slot("chat-1", now),
            Some(Duration::from_secs(55))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_chat_gates_are_independent() {
        let mut windows = RecipientWindows::new(20, Duration::from_secs(60));
        let now = Instant::now();

        for _ in 0..19 {
            windows.record("busy", now);
        }

        assert!(windows.delay_until_slot("busy", now).is_some());
        assert_eq!(windows.delay_until_slot("quiet", now), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_chat_below_threshold_never_waits() {
        let mut windows = RecipientWindows::new(20, Duration::from_secs(60));
        let now = Instant::now();

        for _ in 0..18 {
            windows.record("chat-1", now);
            assert_eq!(windows.delay_until_slot("chat-1", now), None);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_drops_idle_chats() {
        let mut windows = RecipientWindows::new(20, Duration::from_secs(60));

        windows.record("idle", Instant::now());
        tokio::time::advance(Duration::from_secs(61)).await;
        windows.record("fresh", Instant::now());

        assert_eq!(windows.tracked(), 2);
        assert_eq!(windows.sweep(Instant::now()), 1);
        assert_eq!(windows.tracked(), 1);
        assert_eq!(windows.delay_until_slot("fresh", Instant::now()), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_keeps_chats_with_live_stamps() {
        let mut windows = RecipientWindows::new(20, Duration::from_secs(60));

        windows.record("chat-1", Instant::now());
        tokio::time::advance(Duration::from_secs(30)).await;

        assert_eq!(windows.sweep(Instant::now()), 0);
        assert_eq!(windows.tracked(), 1);
    }
}
