//! Persistent state: users, their trading accounts, and the latest
//! reported snapshot and open positions per account.

mod sqlite;

pub use sqlite::Store;

use serde::{Deserialize, Serialize};

/// A Telegram user of the bot, identified by chat id, authenticated on the
/// ingest API by their key.
#[derive(Debug, Clone)]
pub struct User {
    pub chat_id: String,
    pub api_key: String,
    pub created_at: i64,
    pub limits: Limits,
    /// Unix time of the last threshold alert sent to this user.
    pub last_alert_at: Option<i64>,
}

/// Alert thresholds. Unset values do not alert.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    pub min_equity: Option<f64>,
    pub min_margin_level: Option<f64>,
    pub max_daily_loss: Option<f64>,
    pub max_drawdown_percent: Option<f64>,
}

impl Limits {
    pub fn any_set(&self) -> bool {
        self.min_equity.is_some()
            || self.min_margin_level.is_some()
            || self.max_daily_loss.is_some()
            || self.max_drawdown_percent.is_some()
    }
}

/// One trading account reported under a user's key.
#[derive(Debug, Clone)]
pub struct Account {
    pub account_id: i64,
    pub name: String,
    /// Cent accounts report values 100x the real ones.
    pub is_cent: bool,
    pub created_at: i64,
}

impl Account {
    /// 0.01 for cent accounts, 1.0 otherwise. Applied wherever monetary
    /// values are shown to a human.
    pub fn scale(&self) -> f64 {
        if self.is_cent {
            0.01
        } else {
            1.0
        }
    }
}

/// Fields of an incoming report that land in the snapshot row.
#[derive(Debug, Clone)]
pub struct SnapshotUpdate {
    pub equity: f64,
    pub balance: Option<f64>,
    pub margin_level: f64,
    pub pnl_daily: f64,
    /// Terminal-side timestamp of the report.
    pub reported_at: i64,
}

/// The most recent terminal report for an account.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub equity: f64,
    pub balance: Option<f64>,
    pub margin_level: f64,
    pub pnl_daily: f64,
    /// Terminal-side timestamp of the report.
    pub reported_at: i64,
    /// Server-side time the report arrived.
    pub last_seen: i64,
    pub stale_alerted: bool,
}

impl Snapshot {
    /// Account drawdown as a percentage of balance. Zero when the balance
    /// is unknown or non-positive.
    pub fn drawdown_percent(&self) -> f64 {
        match self.balance {
            Some(balance) if balance > 0.0 => (balance - self.equity) / balance * 100.0,
            _ => 0.0,
        }
    }
}

/// Aggregated open positions for one symbol.
#[derive(Debug, Clone)]
pub struct SymbolPosition {
    pub symbol: String,
    pub price: f64,
    pub dd_percent: f64,
    pub buy_lots: f64,
    pub buy_count: i64,
    pub sell_lots: f64,
    pub sell_count: i64,
}

/// Everything known about one account, as served to the bot and the web
/// dashboard.
#[derive(Debug, Clone)]
pub struct AccountStatus {
    pub account: Account,
    pub snapshot: Option<Snapshot>,
    pub positions: Vec<SymbolPosition>,
}

/// A stale account due for a missed-heartbeat alert, with the chat to
/// notify.
#[derive(Debug, Clone)]
pub struct StaleAccount {
    pub chat_id: String,
    pub api_key: String,
    pub account_id: i64,
    pub name: String,
    pub last_seen: i64,
}

/// Row counts for the CLI status command.
#[derive(Debug, Clone)]
pub struct StoreSummary {
    pub users: usize,
    pub accounts: usize,
    pub positions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drawdown_needs_a_positive_balance() {
        let mut snapshot = Snapshot {
            equity: 900.0,
            balance: Some(1000.0),
            margin_level: 250.0,
            pnl_daily: -15.0,
            reported_at: 0,
            last_seen: 0,
            stale_alerted: false,
        };
        assert!((snapshot.drawdown_percent() - 10.0).abs() < 1e-9);

        snapshot.balance = None;
        assert_eq!(snapshot.drawdown_percent(), 0.0);

        snapshot.balance = Some(0.0);
        assert_eq!(snapshot.drawdown_percent(), 0.0);
    }

    #[test]
    fn test_cent_accounts_scale_down() {
        let account = Account {
            account_id: 7,
            name: "7".to_string(),
            is_cent: true,
            created_at: 0,
        };
        assert_eq!(account.scale(), 0.01);
    }

    #[test]
    fn test_limits_any_set() {
        let mut limits = Limits::default();
        assert!(!limits.any_set());
        limits.max_daily_loss = Some(500.0);
        assert!(limits.any_set());
    }
}
