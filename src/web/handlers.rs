//! API endpoints for ingest, status and account management.

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};

use crate::notify::{OutboundMessage, RenderMode};
use crate::store::{SnapshotUpdate, SymbolPosition};

use super::auth::{api_error, require_key, ApiError};
use super::AppState;

/// One symbol block inside an ingest report.
#[derive(Deserialize)]
pub struct SymbolReport {
    pub price: f64,
    pub dd_percent: f64,
    pub buy_lots: f64,
    pub buy_count: i64,
    pub sell_lots: f64,
    pub sell_count: i64,
}

/// Health report posted by the terminal monitor.
#[derive(Deserialize)]
pub struct IngestReport {
    pub account_id: i64,
    #[serde(deserialize_with = "de_timestamp")]
    pub timestamp: i64,
    pub equity: f64,
    pub margin_level: f64,
    pub pnl_daily: f64,
    #[serde(default)]
    pub balance: Option<f64>,
    #[serde(default)]
    pub symbols: Option<HashMap<String, SymbolReport>>,
}

/// Terminals send either RFC 3339 or a naive UTC timestamp. Both map to
/// epoch seconds.
fn de_timestamp<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("unrecognized timestamp: {}", raw)))
}

fn parse_timestamp(raw: &str) -> Option<i64> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.timestamp());
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc().timestamp())
}

fn internal(e: crate::error::Error) -> ApiError {
    tracing::error!("Store error: {}", e);
    api_error(StatusCode::INTERNAL_SERVER_ERROR, "Store unavailable")
}

/// Accept a health report from a terminal monitor.
///
/// The first report for an unknown account registers it under its own id
/// and enqueues a notice to the owning chat.
pub async fn ingest(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(report): Json<IngestReport>,
) -> Result<Json<Value>, ApiError> {
    let user = require_key(&state.store, &headers)?;
    let now = Utc::now().timestamp();

    let first_sight = state
        .store
        .register_account(&user.api_key, report.account_id, now)
        .map_err(internal)?;
    if first_sight {
        tracing::info!(
            "New account {} registered for chat {}",
            report.account_id,
            user.chat_id
        );
        state.notifier.queue(
            &user.chat_id,
            format!("➕ Added new account {}", report.account_id),
        );
    }

    let update = SnapshotUpdate {
        equity: report.equity,
        balance: report.balance,
        margin_level: report.margin_level,
        pnl_daily: report.pnl_daily,
        reported_at: report.timestamp,
    };
    state
        .store
        .upsert_snapshot(&user.api_key, report.account_id, &update, now)
        .map_err(internal)?;

    let positions: Vec<SymbolPosition> = report
        .symbols
        .unwrap_or_default()
        .into_iter()
        .map(|(symbol, data)| SymbolPosition {
            symbol,
            price: data.price,
            dd_percent: data.dd_percent,
            buy_lots: data.buy_lots,
            buy_count: data.buy_count,
            sell_lots: data.sell_lots,
            sell_count: data.sell_count,
        })
        .collect();
    state
        .store
        .replace_positions(&user.api_key, report.account_id, &positions, now)
        .map_err(internal)?;

    Ok(Json(json!({ "status": "ok" })))
}

/// Symbol row in a status response. Position stats are never scaled.
#[derive(Serialize)]
pub struct SymbolRow {
    pub symbol: String,
    pub price: f64,
    pub dd_percent: f64,
    pub buy_lots: f64,
    pub buy_count: i64,
    pub sell_lots: f64,
    pub sell_count: i64,
}

impl From<SymbolPosition> for SymbolRow {
    fn from(position: SymbolPosition) -> Self {
        Self {
            symbol: position.symbol,
            price: position.price,
            dd_percent: position.dd_percent,
            buy_lots: position.buy_lots,
            buy_count: position.buy_count,
            sell_lots: position.sell_lots,
            sell_count: position.sell_count,
        }
    }
}

/// One account in a status response, money scaled for cent accounts.
#[derive(Serialize)]
pub struct StatusRow {
    pub account_id: i64,
    pub account_name: String,
    pub equity: f64,
    pub balance: Option<f64>,
    pub margin_level: f64,
    pub pnl_daily: f64,
    pub drawdown: f64,
    pub last_seen: Option<String>,
    pub symbols: Vec<SymbolRow>,
}

/// Status of every account that has reported at least once, accounts with
/// open positions first, then by name.
pub async fn api_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<StatusRow>>, ApiError> {
    let user = require_key(&state.store, &headers)?;
    let statuses = state
        .store
        .statuses_for_key(&user.api_key)
        .map_err(internal)?;

    let rows = statuses
        .into_iter()
        .filter_map(|status| {
            let snapshot = status.snapshot?;
            let factor = status.account.scale();
            Some(StatusRow {
                account_id: status.account.account_id,
                account_name: status.account.name,
                equity: snapshot.equity * factor,
                balance: snapshot.balance.map(|b| b * factor),
                margin_level: snapshot.margin_level,
                pnl_daily: snapshot.pnl_daily * factor,
                drawdown: snapshot.drawdown_percent(),
                last_seen: rfc3339_utc(snapshot.last_seen),
                symbols: status.positions.into_iter().map(SymbolRow::from).collect(),
            })
        })
        .collect();

    Ok(Json(rows))
}

fn rfc3339_utc(secs: i64) -> Option<String> {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
}

/// Account API response.
#[derive(Serialize)]
pub struct AccountRow {
    pub account_id: i64,
    pub name: String,
    pub is_cent: bool,
}

/// List registered accounts.
pub async fn list_accounts(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<AccountRow>>, ApiError> {
    let user = require_key(&state.store, &headers)?;
    let accounts = state
        .store
        .accounts_for_key(&user.api_key)
        .map_err(internal)?;
    Ok(Json(
        accounts
            .into_iter()
            .map(|a| AccountRow {
                account_id: a.account_id,
                name: a.name,
                is_cent: a.is_cent,
            })
            .collect(),
    ))
}

/// Create account request.
#[derive(Deserialize)]
pub struct CreateAccountRequest {
    pub account_id: i64,
    pub name: String,
    #[serde(default)]
    pub is_cent: bool,
}

/// Register an account ahead of its first report.
pub async fn create_account(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateAccountRequest>,
) -> Result<Json<Value>, ApiError> {
    let user = require_key(&state.store, &headers)?;
    let now = Utc::now().timestamp();

    let created = state
        .store
        .register_account(&user.api_key, payload.account_id, now)
        .map_err(internal)?;
    if !created {
        return Err(api_error(StatusCode::CONFLICT, "Account already exists"));
    }

    state
        .store
        .rename_account(&user.api_key, payload.account_id, &payload.name)
        .map_err(internal)?;
    if payload.is_cent {
        state
            .store
            .toggle_cent(&user.api_key, payload.account_id)
            .map_err(internal)?;
    }

    Ok(Json(
        json!({ "status": "ok", "account_id": payload.account_id }),
    ))
}

/// Update account request. Absent fields are left untouched.
#[derive(Deserialize)]
pub struct UpdateAccountRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_cent: Option<bool>,
}

/// Rename an account or flip its cent flag.
pub async fn update_account(
    State(state): State<AppState>,
    Path(account_id): Path<i64>,
    headers: HeaderMap,
    Json(payload): Json<UpdateAccountRequest>,
) -> Result<Json<Value>, ApiError> {
    let user = require_key(&state.store, &headers)?;

    let Some(account) = state
        .store
        .account(&user.api_key, account_id)
        .map_err(internal)?
    else {
        return Err(api_error(StatusCode::NOT_FOUND, "Account not found"));
    };

    if let Some(name) = &payload.name {
        state
            .store
            .rename_account(&user.api_key, account_id, name)
            .map_err(internal)?;
    }
    if let Some(is_cent) = payload.is_cent {
        if is_cent != account.is_cent {
            state
                .store
                .toggle_cent(&user.api_key, account_id)
                .map_err(internal)?;
        }
    }

    Ok(Json(json!({ "status": "updated", "account_id": account_id })))
}

/// Notify request. Defaults to plain text.
#[derive(Deserialize)]
pub struct NotifyRequest {
    pub chat_id: String,
    pub text: String,
    #[serde(default)]
    pub render_mode: RenderMode,
}

/// Enqueue an arbitrary message. Returns as soon as the message is queued;
/// delivery is paced by the worker.
pub async fn notify(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<NotifyRequest>,
) -> Result<StatusCode, ApiError> {
    require_key(&state.store, &headers)?;
    state.notifier.queue_message(OutboundMessage {
        chat_id: payload.chat_id,
        text: payload.text,
        mode: payload.render_mode,
    });
    Ok(StatusCode::ACCEPTED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::channel;
    use crate::store::Store;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn test_state() -> (
        tempfile::TempDir,
        AppState,
        UnboundedReceiver<OutboundMessage>,
        String,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("web.sqlite")).unwrap();
        let key = store.ensure_user("700", 0).unwrap().api_key;
        let (notifier, rx) = channel();
        (dir, AppState { store, notifier }, rx, key)
    }

    fn key_headers(key: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("X-API-KEY", key.parse().unwrap());
        headers
    }

    fn sample_report(account_id: i64) -> IngestReport {
        serde_json::from_value(json!({
            "account_id": account_id,
            "timestamp": "2026-03-01T12:00:00Z",
            "equity": 950.0,
            "balance": 1000.0,
            "margin_level": 310.5,
            "pnl_daily": -12.5,
            "symbols": {
                "EURUSD": {
                    "price": 1.0825,
                    "dd_percent": -2.4,
                    "buy_lots": 0.3,
                    "buy_count": 2,
                    "sell_lots": 0.0,
                    "sell_count": 0
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_parse_timestamp_accepts_both_shapes() {
        assert_eq!(parse_timestamp("1970-01-01T00:01:00Z"), Some(60));
        assert_eq!(parse_timestamp("1970-01-01T01:01:00+01:00"), Some(60));
        assert_eq!(parse_timestamp("1970-01-01T00:01:00"), Some(60));
        assert_eq!(parse_timestamp("1970-01-01T00:01:00.250"), Some(60));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_ingest_report_deserializes_without_optionals() {
        let report: IngestReport = serde_json::from_value(json!({
            "account_id": 42,
            "timestamp": "2026-03-01T12:00:00",
            "equity": 100.0,
            "margin_level": 200.0,
            "pnl_daily": 0.0
        }))
        .unwrap();
        assert_eq!(report.account_id, 42);
        assert!(report.balance.is_none());
        assert!(report.symbols.is_none());
    }

    #[test]
    fn test_notify_request_defaults_to_plain() {
        let req: NotifyRequest =
            serde_json::from_value(json!({ "chat_id": "1", "text": "hi" })).unwrap();
        assert_eq!(req.render_mode, RenderMode::Plain);
    }

    #[tokio::test]
    async fn test_first_ingest_registers_and_notifies() {
        let (_dir, state, mut rx, key) = test_state();

        ingest(
            State(state.clone()),
            key_headers(&key),
            Json(sample_report(101)),
        )
        .await
        .unwrap();

        let notice = rx.try_recv().unwrap();
        assert_eq!(notice.chat_id, "700");
        assert!(notice.text.contains("101"));

        // A second report for the same account is silent.
        ingest(
            State(state.clone()),
            key_headers(&key),
            Json(sample_report(101)),
        )
        .await
        .unwrap();
        assert!(rx.try_recv().is_err());

        let statuses = state.store.statuses_for_key(&key).unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].positions.len(), 1);
    }

    #[tokio::test]
    async fn test_status_scales_cent_accounts() {
        let (_dir, state, _rx, key) = test_state();

        ingest(
            State(state.clone()),
            key_headers(&key),
            Json(sample_report(101)),
        )
        .await
        .unwrap();
        state.store.toggle_cent(&key, 101).unwrap();

        let Json(rows) = api_status(State(state.clone()), key_headers(&key))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert!((rows[0].equity - 9.5).abs() < 1e-9);
        assert_eq!(rows[0].balance, Some(10.0));
        // Margin level and symbol stats stay raw.
        assert!((rows[0].margin_level - 310.5).abs() < 1e-9);
        assert!((rows[0].symbols[0].price - 1.0825).abs() < 1e-9);
        // Drawdown comes from raw balance/equity, positive when under water.
        assert!((rows[0].drawdown - 5.0).abs() < 1e-9);
        let last_seen = rows[0].last_seen.as_deref().unwrap();
        assert!(last_seen.ends_with('Z'));
    }

    #[tokio::test]
    async fn test_account_endpoints_roundtrip() {
        let (_dir, state, _rx, key) = test_state();

        create_account(
            State(state.clone()),
            key_headers(&key),
            Json(CreateAccountRequest {
                account_id: 7,
                name: "Scalper".to_string(),
                is_cent: true,
            }),
        )
        .await
        .unwrap();

        // Duplicate registration is rejected.
        let err = create_account(
            State(state.clone()),
            key_headers(&key),
            Json(CreateAccountRequest {
                account_id: 7,
                name: "Scalper".to_string(),
                is_cent: false,
            }),
        )
        .await
        .err()
        .unwrap();
        assert_eq!(err.0, StatusCode::CONFLICT);

        update_account(
            State(state.clone()),
            Path(7),
            key_headers(&key),
            Json(UpdateAccountRequest {
                name: Some("Swing".to_string()),
                is_cent: Some(false),
            }),
        )
        .await
        .unwrap();

        let Json(accounts) = list_accounts(State(state.clone()), key_headers(&key))
            .await
            .unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].name, "Swing");
        assert!(!accounts[0].is_cent);

        let err = update_account(
            State(state.clone()),
            Path(999),
            key_headers(&key),
            Json(UpdateAccountRequest {
                name: None,
                is_cent: None,
            }),
        )
        .await
        .err()
        .unwrap();
        assert_eq!(err.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_notify_endpoint_enqueues() {
        let (_dir, state, mut rx, key) = test_state();

        let status = notify(
            State(state.clone()),
            key_headers(&key),
            Json(NotifyRequest {
                chat_id: "555".to_string(),
                text: "ping".to_string(),
                render_mode: RenderMode::Html,
            }),
        )
        .await
        .unwrap();

        assert_eq!(status, StatusCode::ACCEPTED);
        let queued = rx.try_recv().unwrap();
        assert_eq!(queued.chat_id, "555");
        assert_eq!(queued.mode, RenderMode::Html);
    }
}
