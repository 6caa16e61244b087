//! The delivery worker that drains the outbound queue.
//!
//! Exactly one worker runs per process. It pulls messages in arrival order
//! and paces them against the global and per-chat windows before handing
//! them to the transport. A failed or timed-out send is logged and dropped;
//! the queue never stalls behind a broken chat.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use super::limiter::{RateWindow, RecipientWindows};
use super::{NotifyConfig, OutboundMessage, Transport};

const GLOBAL_WINDOW: Duration = Duration::from_secs(1);
const PER_CHAT_WINDOW: Duration = Duration::from_secs(60);

pub(crate) async fn run(
    mut rx: mpsc::UnboundedReceiver<OutboundMessage>,
    transport: Arc<dyn Transport>,
    config: NotifyConfig,
) {
    let mut global = RateWindow::new(config.global_per_second as usize, GLOBAL_WINDOW);
    let mut per_chat = RecipientWindows::new(config.per_chat_per_minute as usize, PER_CHAT_WINDOW);

    let mut sweep = tokio::time::interval(config.sweep_interval);
    sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // An interval's first tick completes immediately.
    sweep.tick().await;

    tracing::debug!(
        "Delivery worker started ({}/s global, {}/min per chat)",
        config.global_per_second,
        config.per_chat_per_minute
    );

    loop {
        tokio::select! {
            message = rx.recv() => match message {
                Some(message) => {
                    deliver(&mut global, &mut per_chat, transport.as_ref(), &config, &message).await;
                }
                None => {
                    tracing::debug!("All notifiers dropped, stopping delivery worker");
                    break;
                }
            },
            _ = sweep.tick() => {
                let removed = per_chat.sweep(Instant::now());
                if removed > 0 {
                    tracing::debug!(
                        "Swept {} idle chat windows, {} still tracked",
                        removed,
                        per_chat.tracked()
                    );
                }
            }
        }
    }
}

/// Pace one message through both windows, then send it.
///
/// The clock is re-read after every await so a wait in one gate is visible
/// to the next. Both windows record the same instant, taken after the gates
/// and before the send, so a slow transport cannot skew the accounting.
async fn deliver(
    global: &mut RateWindow,
    per_chat: &mut RecipientWindows,
    transport: &dyn Transport,
    config: &NotifyConfig,
    message: &OutboundMessage,
) {
    if let Some(wait) = global.delay_until_slot(Instant::now()) {
        tracing::debug!("Global send window full, pausing {}ms", wait.as_millis());
        tokio::time::sleep(wait).await;
    }

    if let Some(wait) = per_chat.delay_until_slot(&message.chat_id, Instant::now()) {
        tracing::info!(
            "Rate limit for chat {}: waiting {}ms before sending",
            message.chat_id,
            wait.as_millis()
        );
        tokio::time::sleep(wait).await;
    }

    let now = Instant::now();
    global.record(now);
    per_chat.record(&message.chat_id, now);

    match tokio::time::timeout(config.send_timeout, transport.deliver(message)).await {
        Ok(Ok(())) => {
            tracing::debug!("Delivered message to chat {}", message.chat_id);
        }
        Ok(Err(e)) => {
            tracing::warn!(
                "Failed to send message to chat {}: {}. Dropping it.",
                message.chat_id,
                e
            );
        }
        Err(_) => {
            tracing::warn!(
                "Send to chat {} timed out after {}s. Dropping it.",
                message.chat_id,
                config.send_timeout.as_secs()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::notify::channel;
    use async_trait::async_trait;

    /// Transport double that records every delivery attempt with the
    /// (paused) clock reading at which it happened.
    struct RecordingTransport {
        sent: mpsc::UnboundedSender<(String, String, Instant)>,
        fail_chat: Option<String>,
        hang_chat: Option<String>,
    }

    impl RecordingTransport {
        fn new(sent: mpsc::UnboundedSender<(String, String, Instant)>) -> Self {
            Self {
                sent,
                fail_chat: None,
                hang_chat: None,
            }
        }
    }

    #[async_trait]
    impl Transport for RecordingTransport {
        async fn deliver(&self, message: &OutboundMessage) -> crate::error::Result<()> {
            let _ = self
                .sent
                .send((message.chat_id.clone(), message.text.clone(), Instant::now()));
            if self.hang_chat.as_deref() == Some(message.chat_id.as_str()) {
                std::future::pending::<()>().await;
            }
            if self.fail_chat.as_deref() == Some(message.chat_id.as_str()) {
                return Err(Error::Telegram("chat not found".to_string()));
            }
            Ok(())
        }
    }

    async fn collect(
        rx: &mut mpsc::UnboundedReceiver<(String, String, Instant)>,
        n: usize,
    ) -> Vec<(String, String, Instant)> {
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            out.push(rx.recv().await.unwrap());
        }
        out
    }

    #[tokio::test(start_paused = true)]
    async fn test_sends_in_fifo_order_without_waiting() {
        let (notifier, rx) = channel();
        let (sent_tx, mut sent_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(RecordingTransport::new(sent_tx));
        tokio::spawn(run(rx, transport, NotifyConfig::default()));

        let start = Instant::now();
        notifier.queue("1001", "first");
        notifier.queue("1001", "second");
        notifier.queue("1001", "third");
        notifier.queue("2002", "fourth");

        let sent = collect(&mut sent_rx, 4).await;
        let order: Vec<&str> = sent.iter().map(|(_, text, _)| text.as_str()).collect();
        assert_eq!(order, vec!["first", "second", "third", "fourth"]);
        // Under both ceilings, nothing waits.
        assert!(sent.iter().all(|(_, _, at)| *at == start));
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_stays_under_global_ceiling() {
        let (notifier, rx) = channel();
        let (sent_tx, mut sent_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(RecordingTransport::new(sent_tx));
        tokio::spawn(run(rx, transport, NotifyConfig::default()));

        let start = Instant::now();
        // Distinct chats so only the global window is in play.
        for i in 0..35 {
            notifier.queue(format!("{}", 1000 + i), format!("m{}", i));
        }

        let sent = collect(&mut sent_rx, 35).await;

        let order: Vec<&str> = sent.iter().map(|(_, text, _)| text.as_str()).collect();
        let expected: Vec<String> = (0..35).map(|i| format!("m{}", i)).collect();
        assert_eq!(order, expected);

        let at_start = sent.iter().filter(|(_, _, at)| *at == start).count();
        let after = sent
            .iter()
            .filter(|(_, _, at)| *at == start + Duration::from_secs(1))
            .count();
        assert_eq!(at_start, 29);
        assert_eq!(after, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_chat_stays_under_per_chat_ceiling() {
        let (notifier, rx) = channel();
        let (sent_tx, mut sent_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(RecordingTransport::new(sent_tx));
        tokio::spawn(run(rx, transport, NotifyConfig::default()));

        let start = Instant::now();
        for i in 0..25 {
            notifier.queue("1001", format!("m{}", i));
        }

        let sent = collect(&mut sent_rx, 25).await;

        let at_start = sent.iter().filter(|(_, _, at)| *at == start).count();
        let after = sent
            .iter()
            .filter(|(_, _, at)| *at == start + Duration::from_secs(60))
            .count();
        assert_eq!(at_start, 19);
        assert_eq!(after, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_send_does_not_stall_the_queue() {
        let (notifier, rx) = channel();
        let (sent_tx, mut sent_rx) = mpsc::unbounded_channel();
        let mut transport = RecordingTransport::new(sent_tx);
        transport.fail_chat = Some("dead".to_string());
        tokio::spawn(run(rx, Arc::new(transport), NotifyConfig::default()));

        let start = Instant::now();
        notifier.queue("dead", "lost");
        notifier.queue("1001", "survives");

        let sent = collect(&mut sent_rx, 2).await;
        assert_eq!(sent[0].0, "dead");
        assert_eq!(sent[1].0, "1001");
        // No retry, no delay for the follower.
        assert_eq!(sent[1].2, start);
        assert!(sent_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_send_is_abandoned_after_timeout() {
        let (notifier, rx) = channel();
        let (sent_tx, mut sent_rx) = mpsc::unbounded_channel();
        let mut transport = RecordingTransport::new(sent_tx);
        transport.hang_chat = Some("frozen".to_string());
        tokio::spawn(run(rx, Arc::new(transport), NotifyConfig::default()));

        let start = Instant::now();
        notifier.queue("frozen", "stuck");
        notifier.queue("1001", "next");

        let sent = collect(&mut sent_rx, 2).await;
        assert_eq!(sent[0].0, "frozen");
        assert_eq!(sent[0].2, start);
        assert_eq!(sent[1].0, "1001");
        assert_eq!(sent[1].2, start + Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_stops_when_producers_drop() {
        let (notifier, rx) = channel();
        let (sent_tx, mut sent_rx) = mpsc::unbounded_channel();
        let transport = Arc::new(RecordingTransport::new(sent_tx));
        let handle = tokio::spawn(run(rx, transport, NotifyConfig::default()));

        notifier.queue("1001", "only");
        let _ = sent_rx.recv().await.unwrap();

        drop(notifier);
        handle.await.unwrap();
    }
}
