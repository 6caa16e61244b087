//! Rendering of bot replies.

use chrono::TimeZone;

use crate::store::{AccountStatus, Limits, SymbolPosition};

/// Traffic-light icon for a symbol's drawdown.
pub fn drawdown_icon(dd_percent: f64) -> &'static str {
    if dd_percent < -5.0 {
        "🔴"
    } else if dd_percent < -2.0 {
        "🟠"
    } else {
        "🟢"
    }
}

/// Full HTML status report, one block per account.
pub fn render_statuses(statuses: &[AccountStatus]) -> String {
    statuses
        .iter()
        .map(render_status)
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_status(status: &AccountStatus) -> String {
    let mut out = format!(
        "📊 Account {} ({})\n",
        status.account.account_id, status.account.name
    );
    out.push_str(&format!(
        "Cent account: {}\n",
        if status.account.is_cent { "yes" } else { "no" }
    ));

    let Some(snapshot) = &status.snapshot else {
        out.push_str("No reports yet.\n");
        return out;
    };

    out.push_str(&format!("Equity: {:.2}\n", snapshot.equity));
    out.push_str(&format!(
        "Balance: {}\n",
        match snapshot.balance {
            Some(balance) => format!("{:.2}", balance),
            None => "-".to_string(),
        }
    ));
    out.push_str(&format!("Margin Level: {:.2}%\n", snapshot.margin_level));
    out.push_str(&format!(
        "Account drawdown: {:.2}%\n",
        snapshot.drawdown_percent()
    ));
    out.push_str(&format!(
        "Updated: {}\n",
        format_local_time(snapshot.last_seen)
    ));

    if status.positions.is_empty() {
        out.push_str("<i>no open positions</i>\n");
    } else {
        out.push_str("<pre>");
        for position in &status.positions {
            out.push_str(&symbol_line(position));
        }
        out.push_str("</pre>\n");
    }
    out
}

fn symbol_line(position: &SymbolPosition) -> String {
    format!(
        "{} {:<6} {:<6.5} {:+7.2}% {:>5.2}/{:<1}🟢{:>5.2}/{:<1}🔻\n",
        drawdown_icon(position.dd_percent),
        position.symbol,
        position.price,
        position.dd_percent,
        position.buy_lots,
        position.buy_count,
        position.sell_lots,
        position.sell_count,
    )
}

pub fn render_limits(limits: &Limits) -> String {
    let show = |value: Option<f64>, suffix: &str| match value {
        Some(v) => format!("{:.2}{}", v, suffix),
        None => "off".to_string(),
    };
    format!(
        "Alert thresholds:\nMin equity: {}\nMin margin level: {}\nMax daily loss: {}\nMax drawdown: {}",
        show(limits.min_equity, ""),
        show(limits.min_margin_level, "%"),
        show(limits.max_daily_loss, ""),
        show(limits.max_drawdown_percent, "%"),
    )
}

fn format_local_time(unix_secs: i64) -> String {
    match chrono::Local.timestamp_opt(unix_secs, 0).single() {
        Some(time) => time.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => unix_secs.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Account, Snapshot};

    fn status_with(positions: Vec<SymbolPosition>) -> AccountStatus {
        AccountStatus {
            account: Account {
                account_id: 555,
                name: "Main".to_string(),
                is_cent: false,
                created_at: 0,
            },
            snapshot: Some(Snapshot {
                equity: 1000.0,
                balance: Some(1100.0),
                margin_level: 250.0,
                pnl_daily: -12.5,
                reported_at: 1_700_000_000,
                last_seen: 1_700_000_000,
                stale_alerted: false,
            }),
            positions,
        }
    }

    #[test]
    fn test_icon_thresholds() {
        assert_eq!(drawdown_icon(-5.01), "🔴");
        assert_eq!(drawdown_icon(-5.0), "🟠");
        assert_eq!(drawdown_icon(-2.01), "🟠");
        assert_eq!(drawdown_icon(-2.0), "🟢");
        assert_eq!(drawdown_icon(0.7), "🟢");
    }

    #[test]
    fn test_symbol_table_layout() {
        let text = render_status(&status_with(vec![SymbolPosition {
            symbol: "EURUSD".to_string(),
            price: 1.0825,
            dd_percent: -2.4,
            buy_lots: 0.3,
            buy_count: 2,
            sell_lots: 0.0,
            sell_count: 0,
        }]));
        assert!(text.contains("<pre>"));
        assert!(text.contains("🟠 EURUSD 1.08250   -2.40%  0.30/2🟢 0.00/0🔻"));
    }

    #[test]
    fn test_status_header_and_drawdown() {
        let text = render_status(&status_with(vec![]));
        assert!(text.starts_with("📊 Account 555 (Main)"));
        assert!(text.contains("Cent account: no"));
        // (1100 - 1000) / 1100 * 100
        assert!(text.contains("Account drawdown: 9.09%"));
        assert!(text.contains("<i>no open positions</i>"));
    }

    #[test]
    fn test_status_without_snapshot() {
        let mut status = status_with(vec![]);
        status.snapshot = None;
        let text = render_status(&status);
        assert!(text.contains("No reports yet."));
        assert!(!text.contains("Equity"));
    }

    #[test]
    fn test_limits_rendering() {
        let limits = Limits {
            min_equity: Some(500.0),
            min_margin_level: None,
            max_daily_loss: Some(200.0),
            max_drawdown_percent: Some(15.0),
        };
        let text = render_limits(&limits);
        assert!(text.contains("Min equity: 500.00"));
        assert!(text.contains("Min margin level: off"));
        assert!(text.contains("Max drawdown: 15.00%"));
    }
}
