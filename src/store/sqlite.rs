//! SQLite persistence. One connection per operation, schema applied
//! idempotently on connect.

use std::path::PathBuf;

use rusqlite::{params, Connection};

use crate::error::Error;

use super::{
    Account, AccountStatus, Limits, Snapshot, SnapshotUpdate, StaleAccount, StoreSummary,
    SymbolPosition, User,
};

const USER_COLUMNS: &str =
    "chat_id, api_key, created_at, min_equity, min_margin_level, max_daily_loss, max_drawdown_percent, last_alert_at";

#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
}

impl Store {
    /// Open the store, creating the database and schema if needed. Called
    /// once at startup so a broken database path fails the process early.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let store = Self { path: path.into() };
        store.connect()?;
        Ok(store)
    }

    fn connect(&self) -> Result<Connection, Error> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&self.path)
            .map_err(|e| Error::Store(format!("sqlite open: {}", e)))?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                chat_id TEXT PRIMARY KEY,
                api_key TEXT NOT NULL UNIQUE,
                created_at INTEGER NOT NULL,
                min_equity REAL,
                min_margin_level REAL,
                max_daily_loss REAL,
                max_drawdown_percent REAL,
                last_alert_at INTEGER
            );
            CREATE TABLE IF NOT EXISTS accounts (
                api_key TEXT NOT NULL,
                account_id INTEGER NOT NULL,
                name TEXT NOT NULL,
                is_cent INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                UNIQUE(api_key, account_id)
            );
            CREATE TABLE IF NOT EXISTS snapshots (
                api_key TEXT NOT NULL,
                account_id INTEGER NOT NULL,
                equity REAL NOT NULL,
                balance REAL,
                margin_level REAL NOT NULL,
                pnl_daily REAL NOT NULL,
                reported_at INTEGER NOT NULL,
                last_seen INTEGER NOT NULL,
                stale_alerted INTEGER NOT NULL DEFAULT 0,
                UNIQUE(api_key, account_id)
            );
            CREATE TABLE IF NOT EXISTS positions (
                api_key TEXT NOT NULL,
                account_id INTEGER NOT NULL,
                symbol TEXT NOT NULL,
                price REAL NOT NULL,
                dd_percent REAL NOT NULL,
                buy_lots REAL NOT NULL,
                buy_count INTEGER NOT NULL,
                sell_lots REAL NOT NULL,
                sell_count INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                UNIQUE(api_key, account_id, symbol)
            );
            CREATE INDEX IF NOT EXISTS idx_accounts_key ON accounts(api_key);
            CREATE INDEX IF NOT EXISTS idx_snapshots_seen ON snapshots(last_seen, stale_alerted);
            CREATE INDEX IF NOT EXISTS idx_positions_account ON positions(api_key, account_id);
            "#,
        )
        .map_err(|e| Error::Store(format!("sqlite init: {}", e)))?;
        Ok(conn)
    }

    /// Look up or create the user behind a chat. New users get a fresh
    /// 32-character hex API key.
    pub fn ensure_user(&self, chat_id: &str, now: i64) -> Result<User, Error> {
        let conn = self.connect()?;
        let api_key = uuid::Uuid::new_v4().simple().to_string();
        conn.execute(
            "INSERT OR IGNORE INTO users (chat_id, api_key, created_at) VALUES (?1, ?2, ?3)",
            params![chat_id, api_key, now],
        )
        .map_err(|e| Error::Store(format!("sqlite insert user: {}", e)))?;
        self.user_by_chat(chat_id)?
            .ok_or_else(|| Error::Store(format!("user {} vanished after insert", chat_id)))
    }

    pub fn user_by_chat(&self, chat_id: &str) -> Result<Option<User>, Error> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM users WHERE chat_id = ?1",
                USER_COLUMNS
            ))
            .map_err(|e| Error::Store(format!("sqlite prepare user: {}", e)))?;
        let mut rows = stmt
            .query(params![chat_id])
            .map_err(|e| Error::Store(format!("sqlite query user: {}", e)))?;
        match rows
            .next()
            .map_err(|e| Error::Store(format!("sqlite read user: {}", e)))?
        {
            Some(row) => Ok(Some(
                user_from_row(row).map_err(|e| Error::Store(format!("sqlite user row: {}", e)))?,
            )),
            None => Ok(None),
        }
    }

    pub fn user_by_key(&self, api_key: &str) -> Result<Option<User>, Error> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM users WHERE api_key = ?1",
                USER_COLUMNS
            ))
            .map_err(|e| Error::Store(format!("sqlite prepare user: {}", e)))?;
        let mut rows = stmt
            .query(params![api_key])
            .map_err(|e| Error::Store(format!("sqlite query user: {}", e)))?;
        match rows
            .next()
            .map_err(|e| Error::Store(format!("sqlite read user: {}", e)))?
        {
            Some(row) => Ok(Some(
                user_from_row(row).map_err(|e| Error::Store(format!("sqlite user row: {}", e)))?,
            )),
            None => Ok(None),
        }
    }

    pub fn all_users(&self) -> Result<Vec<User>, Error> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM users ORDER BY created_at",
                USER_COLUMNS
            ))
            .map_err(|e| Error::Store(format!("sqlite prepare users: {}", e)))?;
        let users = stmt
            .query_map([], user_from_row)
            .map_err(|e| Error::Store(format!("sqlite query users: {}", e)))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| Error::Store(format!("sqlite read users: {}", e)))?;
        Ok(users)
    }

    pub fn set_limits(&self, chat_id: &str, limits: &Limits) -> Result<(), Error> {
        let conn = self.connect()?;
        let changed = conn
            .execute(
                "UPDATE users SET min_equity = ?2, min_margin_level = ?3, max_daily_loss = ?4, max_drawdown_percent = ?5 WHERE chat_id = ?1",
                params![
                    chat_id,
                    limits.min_equity,
                    limits.min_margin_level,
                    limits.max_daily_loss,
                    limits.max_drawdown_percent
                ],
            )
            .map_err(|e| Error::Store(format!("sqlite update limits: {}", e)))?;
        if changed == 0 {
            return Err(Error::NotFound(format!("user for chat {}", chat_id)));
        }
        Ok(())
    }

    pub fn set_last_alert(&self, chat_id: &str, now: i64) -> Result<(), Error> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE users SET last_alert_at = ?2 WHERE chat_id = ?1",
            params![chat_id, now],
        )
        .map_err(|e| Error::Store(format!("sqlite update last alert: {}", e)))?;
        Ok(())
    }

    /// Record an account the first time it shows up in a report. The name
    /// defaults to the account number until the user renames it. Returns
    /// true when the account is new.
    pub fn register_account(&self, api_key: &str, account_id: i64, now: i64) -> Result<bool, Error> {
        let conn = self.connect()?;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO accounts (api_key, account_id, name, is_cent, created_at) VALUES (?1, ?2, ?3, 0, ?4)",
                params![api_key, account_id, account_id.to_string(), now],
            )
            .map_err(|e| Error::Store(format!("sqlite insert account: {}", e)))?;
        Ok(inserted > 0)
    }

    pub fn rename_account(&self, api_key: &str, account_id: i64, name: &str) -> Result<(), Error> {
        let conn = self.connect()?;
        let changed = conn
            .execute(
                "UPDATE accounts SET name = ?3 WHERE api_key = ?1 AND account_id = ?2",
                params![api_key, account_id, name],
            )
            .map_err(|e| Error::Store(format!("sqlite rename account: {}", e)))?;
        if changed == 0 {
            return Err(Error::NotFound(format!("account {}", account_id)));
        }
        Ok(())
    }

    /// Flip the cent flag and return its new value.
    pub fn toggle_cent(&self, api_key: &str, account_id: i64) -> Result<bool, Error> {
        let conn = self.connect()?;
        let changed = conn
            .execute(
                "UPDATE accounts SET is_cent = 1 - is_cent WHERE api_key = ?1 AND account_id = ?2",
                params![api_key, account_id],
            )
            .map_err(|e| Error::Store(format!("sqlite toggle cent: {}", e)))?;
        if changed == 0 {
            return Err(Error::NotFound(format!("account {}", account_id)));
        }
        let is_cent: i64 = conn
            .query_row(
                "SELECT is_cent FROM accounts WHERE api_key = ?1 AND account_id = ?2",
                params![api_key, account_id],
                |row| row.get(0),
            )
            .map_err(|e| Error::Store(format!("sqlite read cent: {}", e)))?;
        Ok(is_cent != 0)
    }

    /// Remove an account together with its snapshot and positions.
    pub fn delete_account(&self, api_key: &str, account_id: i64) -> Result<(), Error> {
        let mut conn = self.connect()?;
        let tx = conn
            .transaction()
            .map_err(|e| Error::Store(format!("sqlite begin: {}", e)))?;
        let removed = tx
            .execute(
                "DELETE FROM accounts WHERE api_key = ?1 AND account_id = ?2",
                params![api_key, account_id],
            )
            .map_err(|e| Error::Store(format!("sqlite delete account: {}", e)))?;
        if removed == 0 {
            return Err(Error::NotFound(format!("account {}", account_id)));
        }
        tx.execute(
            "DELETE FROM snapshots WHERE api_key = ?1 AND account_id = ?2",
            params![api_key, account_id],
        )
        .map_err(|e| Error::Store(format!("sqlite delete snapshot: {}", e)))?;
        tx.execute(
            "DELETE FROM positions WHERE api_key = ?1 AND account_id = ?2",
            params![api_key, account_id],
        )
        .map_err(|e| Error::Store(format!("sqlite delete positions: {}", e)))?;
        tx.commit()
            .map_err(|e| Error::Store(format!("sqlite commit: {}", e)))?;
        Ok(())
    }

    /// Write the latest report for an account, replacing the previous one.
    /// A fresh report also clears the missed-heartbeat flag.
    pub fn upsert_snapshot(
        &self,
        api_key: &str,
        account_id: i64,
        update: &SnapshotUpdate,
        now: i64,
    ) -> Result<(), Error> {
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT INTO snapshots (api_key, account_id, equity, balance, margin_level, pnl_daily, reported_at, last_seen, stale_alerted)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0)
            ON CONFLICT(api_key, account_id) DO UPDATE SET
                equity = excluded.equity,
                balance = excluded.balance,
                margin_level = excluded.margin_level,
                pnl_daily = excluded.pnl_daily,
                reported_at = excluded.reported_at,
                last_seen = excluded.last_seen,
                stale_alerted = 0
            "#,
            params![
                api_key,
                account_id,
                update.equity,
                update.balance,
                update.margin_level,
                update.pnl_daily,
                update.reported_at,
                now
            ],
        )
        .map_err(|e| Error::Store(format!("sqlite upsert snapshot: {}", e)))?;
        Ok(())
    }

    /// Replace the open-position rows for an account wholesale. Each report
    /// carries the full current set, so anything absent has been closed.
    pub fn replace_positions(
        &self,
        api_key: &str,
        account_id: i64,
        positions: &[SymbolPosition],
        now: i64,
    ) -> Result<(), Error> {
        let mut conn = self.connect()?;
        let tx = conn
            .transaction()
            .map_err(|e| Error::Store(format!("sqlite begin: {}", e)))?;
        tx.execute(
            "DELETE FROM positions WHERE api_key = ?1 AND account_id = ?2",
            params![api_key, account_id],
        )
        .map_err(|e| Error::Store(format!("sqlite clear positions: {}", e)))?;
        for position in positions {
            tx.execute(
                "INSERT INTO positions (api_key, account_id, symbol, price, dd_percent, buy_lots, buy_count, sell_lots, sell_count, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    api_key,
                    account_id,
                    position.symbol,
                    position.price,
                    position.dd_percent,
                    position.buy_lots,
                    position.buy_count,
                    position.sell_lots,
                    position.sell_count,
                    now
                ],
            )
            .map_err(|e| Error::Store(format!("sqlite insert position: {}", e)))?;
        }
        tx.commit()
            .map_err(|e| Error::Store(format!("sqlite commit: {}", e)))?;
        Ok(())
    }

    pub fn accounts_for_key(&self, api_key: &str) -> Result<Vec<Account>, Error> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare("SELECT account_id, name, is_cent, created_at FROM accounts WHERE api_key = ?1 ORDER BY account_id")
            .map_err(|e| Error::Store(format!("sqlite prepare accounts: {}", e)))?;
        let accounts = stmt
            .query_map(params![api_key], account_from_row)
            .map_err(|e| Error::Store(format!("sqlite query accounts: {}", e)))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| Error::Store(format!("sqlite read accounts: {}", e)))?;
        Ok(accounts)
    }

    pub fn account(&self, api_key: &str, account_id: i64) -> Result<Option<Account>, Error> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare("SELECT account_id, name, is_cent, created_at FROM accounts WHERE api_key = ?1 AND account_id = ?2")
            .map_err(|e| Error::Store(format!("sqlite prepare account: {}", e)))?;
        let mut rows = stmt
            .query(params![api_key, account_id])
            .map_err(|e| Error::Store(format!("sqlite query account: {}", e)))?;
        match rows
            .next()
            .map_err(|e| Error::Store(format!("sqlite read account: {}", e)))?
        {
            Some(row) => Ok(Some(
                account_from_row(row)
                    .map_err(|e| Error::Store(format!("sqlite account row: {}", e)))?,
            )),
            None => Ok(None),
        }
    }

    /// Full view of every account under a key, accounts holding open
    /// positions first, then by name.
    pub fn statuses_for_key(&self, api_key: &str) -> Result<Vec<AccountStatus>, Error> {
        let accounts = self.accounts_for_key(api_key)?;
        let conn = self.connect()?;

        let mut statuses = Vec::with_capacity(accounts.len());
        for account in accounts {
            let snapshot = {
                let mut stmt = conn
                    .prepare("SELECT equity, balance, margin_level, pnl_daily, reported_at, last_seen, stale_alerted FROM snapshots WHERE api_key = ?1 AND account_id = ?2")
                    .map_err(|e| Error::Store(format!("sqlite prepare snapshot: {}", e)))?;
                let mut rows = stmt
                    .query(params![api_key, account.account_id])
                    .map_err(|e| Error::Store(format!("sqlite query snapshot: {}", e)))?;
                match rows
                    .next()
                    .map_err(|e| Error::Store(format!("sqlite read snapshot: {}", e)))?
                {
                    Some(row) => Some(
                        snapshot_from_row(row)
                            .map_err(|e| Error::Store(format!("sqlite snapshot row: {}", e)))?,
                    ),
                    None => None,
                }
            };

            let mut stmt = conn
                .prepare("SELECT symbol, price, dd_percent, buy_lots, buy_count, sell_lots, sell_count FROM positions WHERE api_key = ?1 AND account_id = ?2 ORDER BY symbol")
                .map_err(|e| Error::Store(format!("sqlite prepare positions: {}", e)))?;
            let positions = stmt
                .query_map(params![api_key, account.account_id], position_from_row)
                .map_err(|e| Error::Store(format!("sqlite query positions: {}", e)))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| Error::Store(format!("sqlite read positions: {}", e)))?;

            statuses.push(AccountStatus {
                account,
                snapshot,
                positions,
            });
        }

        statuses.sort_by_key(|s| (s.positions.is_empty(), s.account.name.to_lowercase()));
        Ok(statuses)
    }

    /// Accounts whose last report is older than `cutoff` and that have not
    /// been flagged yet.
    pub fn stale_accounts(&self, cutoff: i64) -> Result<Vec<StaleAccount>, Error> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT u.chat_id, a.api_key, a.account_id, a.name, s.last_seen
                FROM snapshots s
                JOIN accounts a ON a.api_key = s.api_key AND a.account_id = s.account_id
                JOIN users u ON u.api_key = a.api_key
                WHERE s.last_seen < ?1 AND s.stale_alerted = 0
                ORDER BY u.chat_id, a.account_id
                "#,
            )
            .map_err(|e| Error::Store(format!("sqlite prepare stale: {}", e)))?;
        let stale = stmt
            .query_map(params![cutoff], |row| {
                Ok(StaleAccount {
                    chat_id: row.get(0)?,
                    api_key: row.get(1)?,
                    account_id: row.get(2)?,
                    name: row.get(3)?,
                    last_seen: row.get(4)?,
                })
            })
            .map_err(|e| Error::Store(format!("sqlite query stale: {}", e)))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| Error::Store(format!("sqlite read stale: {}", e)))?;
        Ok(stale)
    }

    /// Remember that a missed-heartbeat alert went out, so it is not
    /// repeated until a fresh report arrives.
    pub fn mark_stale_alerted(&self, api_key: &str, account_id: i64) -> Result<(), Error> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE snapshots SET stale_alerted = 1 WHERE api_key = ?1 AND account_id = ?2",
            params![api_key, account_id],
        )
        .map_err(|e| Error::Store(format!("sqlite mark stale: {}", e)))?;
        Ok(())
    }

    pub fn summary(&self) -> Result<StoreSummary, Error> {
        let conn = self.connect()?;
        let users: i64 = conn
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .map_err(|e| Error::Store(format!("sqlite count users: {}", e)))?;
        let accounts: i64 = conn
            .query_row("SELECT COUNT(*) FROM accounts", [], |row| row.get(0))
            .map_err(|e| Error::Store(format!("sqlite count accounts: {}", e)))?;
        let positions: i64 = conn
            .query_row("SELECT COUNT(*) FROM positions", [], |row| row.get(0))
            .map_err(|e| Error::Store(format!("sqlite count positions: {}", e)))?;
        Ok(StoreSummary {
            users: users as usize,
            accounts: accounts as usize,
            positions: positions as usize,
        })
    }
}

fn user_from_row(row: &rusqlite::Row) -> rusqlite::Result<User> {
    Ok(User {
        chat_id: row.get(0)?,
        api_key: row.get(1)?,
        created_at: row.get(2)?,
        limits: Limits {
            min_equity: row.get(3)?,
            min_margin_level: row.get(4)?,
            max_daily_loss: row.get(5)?,
            max_drawdown_percent: row.get(6)?,
        },
        last_alert_at: row.get(7)?,
    })
}

fn account_from_row(row: &rusqlite::Row) -> rusqlite::Result<Account> {
    Ok(Account {
        account_id: row.get(0)?,
        name: row.get(1)?,
        is_cent: row.get::<_, i64>(2)? != 0,
        created_at: row.get(3)?,
    })
}

fn snapshot_from_row(row: &rusqlite::Row) -> rusqlite::Result<Snapshot> {
    Ok(Snapshot {
        equity: row.get(0)?,
        balance: row.get(1)?,
        margin_level: row.get(2)?,
        pnl_daily: row.get(3)?,
        reported_at: row.get(4)?,
        last_seen: row.get(5)?,
        stale_alerted: row.get::<_, i64>(6)? != 0,
    })
}

fn position_from_row(row: &rusqlite::Row) -> rusqlite::Result<SymbolPosition> {
    Ok(SymbolPosition {
        symbol: row.get(0)?,
        price: row.get(1)?,
        dd_percent: row.get(2)?,
        buy_lots: row.get(3)?,
        buy_count: row.get(4)?,
        sell_lots: row.get(5)?,
        sell_count: row.get(6)?,
    })
}
