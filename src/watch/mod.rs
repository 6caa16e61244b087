//! Alert watcher.
//!
//! A periodic scan over the store that enqueues alerts for accounts that
//! went quiet and for breached user thresholds. A scan failure is logged
//! and the next cycle runs as usual; the watcher itself never dies.

use std::time::Duration;

use tokio::time::MissedTickBehavior;

use crate::config::WatchSettings;
use crate::error::Error;
use crate::notify::Notifier;
use crate::store::{AccountStatus, Store, User};

/// Watcher tuning.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub poll_interval: Duration,
    /// Snapshots older than this count as a lost terminal.
    pub heartbeat_secs: i64,
    /// Minimum gap between threshold alerts to the same user.
    pub alert_cooldown_secs: i64,
}

impl From<&WatchSettings> for WatchConfig {
    fn from(settings: &WatchSettings) -> Self {
        Self {
            poll_interval: Duration::from_secs(settings.poll_interval_secs),
            heartbeat_secs: settings.heartbeat_secs as i64,
            alert_cooldown_secs: settings.alert_cooldown_secs as i64,
        }
    }
}

/// Run the watcher until the process stops.
pub async fn run_watcher(store: Store, notifier: Notifier, config: WatchConfig) {
    tracing::info!(
        "Watcher started, polling every {}s",
        config.poll_interval.as_secs()
    );

    let mut ticker = tokio::time::interval(config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let now = chrono::Utc::now().timestamp();
        if let Err(e) = scan_once(&store, &notifier, &config, now) {
            tracing::warn!("Watch cycle warning: {}", e);
        }
    }
}

/// One scan cycle. Split out so tests can drive it with a fixed clock.
fn scan_once(store: &Store, notifier: &Notifier, config: &WatchConfig, now: i64) -> Result<(), Error> {
    let stale = scan_stale(store, notifier, config, now)?;
    let alerted = scan_thresholds(store, notifier, config, now)?;
    if stale > 0 || alerted > 0 {
        tracing::info!("Watch cycle: {} stale, {} threshold alerts", stale, alerted);
    }
    Ok(())
}

/// Alert on accounts whose terminal stopped reporting. Each outage alerts
/// once; the flag clears when the next report arrives.
fn scan_stale(
    store: &Store,
    notifier: &Notifier,
    config: &WatchConfig,
    now: i64,
) -> Result<usize, Error> {
    let cutoff = now - config.heartbeat_secs;
    let stale = store.stale_accounts(cutoff)?;
    for account in &stale {
        tracing::warn!(
            "Account {} for chat {} went quiet (last seen {}s ago)",
            account.account_id,
            account.chat_id,
            now - account.last_seen
        );
        notifier.queue(
            &account.chat_id,
            format!(
                "⚠️ {} ({}) went quiet. No reports for {}.",
                account.name,
                account.account_id,
                fmt_age(now - account.last_seen)
            ),
        );
        store.mark_stale_alerted(&account.api_key, account.account_id)?;
    }
    Ok(stale.len())
}

/// Check every user's thresholds against their latest snapshots and send
/// one combined alert per user, throttled by the alert cooldown.
fn scan_thresholds(
    store: &Store,
    notifier: &Notifier,
    config: &WatchConfig,
    now: i64,
) -> Result<usize, Error> {
    let mut alerted = 0;
    for user in store.all_users()? {
        if !user.limits.any_set() {
            continue;
        }
        if let Some(last) = user.last_alert_at {
            if now - last < config.alert_cooldown_secs {
                continue;
            }
        }

        let statuses = store.statuses_for_key(&user.api_key)?;
        let breaches = collect_breaches(&user, &statuses);
        if breaches.is_empty() {
            continue;
        }

        let mut text = String::from("🚨 Threshold alert\n");
        for line in &breaches {
            text.push_str(line);
            text.push('\n');
        }
        notifier.queue(&user.chat_id, text);
        store.set_last_alert(&user.chat_id, now)?;
        alerted += 1;
    }
    Ok(alerted)
}

/// Breach lines for one user. Money values are compared after cent
/// scaling so thresholds always mean real currency; margin level and
/// drawdown are percentages and stay raw.
fn collect_breaches(user: &User, statuses: &[AccountStatus]) -> Vec<String> {
    let mut breaches = Vec::new();
    for status in statuses {
        let Some(snapshot) = &status.snapshot else {
            continue;
        };
        let factor = status.account.scale();
        let label = format!("{} ({})", status.account.name, status.account.account_id);

        if let Some(min) = user.limits.min_equity {
            let equity = snapshot.equity * factor;
            if equity < min {
                breaches.push(format!("{}: equity {:.2} below {:.2}", label, equity, min));
            }
        }
        if let Some(min) = user.limits.min_margin_level {
            if snapshot.margin_level < min {
                breaches.push(format!(
                    "{}: margin level {:.2}% below {:.2}%",
                    label, snapshot.margin_level, min
                ));
            }
        }
        if let Some(max) = user.limits.max_daily_loss {
            let pnl = snapshot.pnl_daily * factor;
            if pnl < -max {
                breaches.push(format!(
                    "{}: daily loss {:.2} over {:.2}",
                    label, -pnl, max
                ));
            }
        }
        if let Some(max) = user.limits.max_drawdown_percent {
            let dd = snapshot.drawdown_percent();
            if dd > max {
                breaches.push(format!(
                    "{}: drawdown {:.2}% over {:.2}%",
                    label, dd, max
                ));
            }
        }
    }
    breaches
}

fn fmt_age(secs: i64) -> String {
    if secs < 120 {
        format!("{}s", secs.max(0))
    } else {
        format!("{}m", secs / 60)
    }
}
