//! Database persistence for full bot state management.
//!
//! Stores everything needed to resume after restart:
//! - Bot state and the monotone tick counter
//! - Per-strategy balances
//! - Positions (open and closed) and completed trades
//! - The append-only ledger event log
//! - Last-entry ticks for cooldown spacing
//! - Equity curve for P&L tracking

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use uuid::Uuid;

use crate::models::{ClosedTrade, Position, PositionStatus, StrategyKind};
use crate::trading::LedgerEvent;

/// Database connection pool with full state management.
pub struct Database {
    pool: SqlitePool,
}

/// Bot state stored in database.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BotState {
    pub id: i64,
    pub symbol: String,
    pub tick_counter: i64,
    pub is_running: bool,
    pub last_poll_at: Option<String>,
    pub started_at: String,
    pub updated_at: String,
}

/// Stored position row. Money columns are decimal strings.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredPosition {
    pub id: String,
    pub symbol: String,
    pub strategy: String,
    pub entry_price: String,
    pub qty: String,
    pub entry_time: String,
    pub tp_price: String,
    pub sl_price: String,
    pub highest_price_seen: String,
    pub entry_fee: String,
    pub status: String,
}

/// Stored completed trade row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StoredTrade {
    pub position_id: String,
    pub symbol: String,
    pub strategy: String,
    pub entry_price: String,
    pub exit_price: String,
    pub qty: String,
    pub pnl: String,
    pub reason: String,
    pub entry_time: String,
    pub exit_time: String,
}

/// Equity curve point for tracking P&L over time.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EquityPoint {
    pub id: i64,
    pub timestamp: String,
    pub equity: f64,
}

impl Database {
    /// Create a new database connection.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run all database migrations.
    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bot_state (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                symbol TEXT NOT NULL DEFAULT '',
                tick_counter INTEGER NOT NULL DEFAULT 0,
                is_running INTEGER NOT NULL DEFAULT 0,
                last_poll_at TEXT,
                started_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS balances (
                strategy TEXT PRIMARY KEY,
                balance TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS positions (
                id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                strategy TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                qty TEXT NOT NULL,
                entry_time TEXT NOT NULL,
                tp_price TEXT NOT NULL,
                sl_price TEXT NOT NULL,
                highest_price_seen TEXT NOT NULL,
                entry_fee TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'open',
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                position_id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                strategy TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                exit_price TEXT NOT NULL,
                qty TEXT NOT NULL,
                pnl TEXT NOT NULL,
                reason TEXT NOT NULL,
                entry_time TEXT NOT NULL,
                exit_time TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ledger_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                ts TEXT NOT NULL,
                kind TEXT NOT NULL,
                details TEXT NOT NULL DEFAULT '{}'
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS last_entries (
                symbol TEXT NOT NULL,
                strategy TEXT NOT NULL,
                tick INTEGER NOT NULL,
                PRIMARY KEY (symbol, strategy)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS equity_curve (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
                equity REAL NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Indexes
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_positions_status ON positions(status)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trades_strategy ON trades(strategy)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_ledger_events_ts ON ledger_events(ts)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_equity_curve_time ON equity_curve(timestamp)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ==================== Bot State ====================

    /// Initialize or get bot state.
    pub async fn init_bot_state(&self, symbol: &str) -> Result<BotState> {
        sqlx::query(
            r#"
            INSERT INTO bot_state (id, symbol, is_running, started_at, updated_at)
            VALUES (1, ?, 1, datetime('now'), datetime('now'))
            ON CONFLICT(id) DO UPDATE SET
                symbol = excluded.symbol,
                is_running = 1,
                updated_at = datetime('now')
            "#,
        )
        .bind(symbol)
        .execute(&self.pool)
        .await?;

        self.get_bot_state().await
    }

    /// Get current bot state.
    pub async fn get_bot_state(&self) -> Result<BotState> {
        sqlx::query_as::<_, BotState>("SELECT * FROM bot_state WHERE id = 1")
            .fetch_one(&self.pool)
            .await
            .context("Bot state not initialized")
    }

    /// Persist the monotone tick counter after each poll.
    pub async fn save_tick_counter(&self, tick: u64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE bot_state SET
                tick_counter = ?,
                last_poll_at = datetime('now'),
                updated_at = datetime('now')
            WHERE id = 1
            "#,
        )
        .bind(tick as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Mark bot as stopped.
    pub async fn mark_bot_stopped(&self) -> Result<()> {
        sqlx::query("UPDATE bot_state SET is_running = 0, updated_at = datetime('now') WHERE id = 1")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ==================== Balances ====================

    /// Save or update a strategy balance.
    pub async fn save_balance(&self, strategy: StrategyKind, balance: Decimal) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO balances (strategy, balance, updated_at)
            VALUES (?, ?, datetime('now'))
            ON CONFLICT(strategy) DO UPDATE SET
                balance = excluded.balance,
                updated_at = datetime('now')
            "#,
        )
        .bind(strategy.as_str())
        .bind(balance.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Load all strategy balances.
    pub async fn get_balances(&self) -> Result<HashMap<StrategyKind, Decimal>> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT strategy, balance FROM balances")
                .fetch_all(&self.pool)
                .await?;

        let mut balances = HashMap::new();
        for (strategy, balance) in rows {
            let strategy = StrategyKind::parse(&strategy)
                .with_context(|| format!("Unknown strategy in balances table: {strategy}"))?;
            let balance: Decimal = balance
                .parse()
                .with_context(|| format!("Invalid stored balance for {strategy}"))?;
            balances.insert(strategy, balance);
        }
        Ok(balances)
    }

    // ==================== Positions ====================

    /// Save or update a position.
    pub async fn upsert_position(&self, position: &Position) -> Result<()> {
        let status = match position.status {
            PositionStatus::Open => "open",
            PositionStatus::Closed => "closed",
        };
        sqlx::query(
            r#"
            INSERT INTO positions (
                id, symbol, strategy, entry_price, qty, entry_time,
                tp_price, sl_price, highest_price_seen, entry_fee, status
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                highest_price_seen = excluded.highest_price_seen,
                status = excluded.status,
                updated_at = datetime('now')
            "#,
        )
        .bind(position.id.to_string())
        .bind(&position.symbol)
        .bind(position.strategy.as_str())
        .bind(position.entry_price.to_string())
        .bind(position.qty.to_string())
        .bind(position.entry_time.to_rfc3339())
        .bind(position.tp_price.to_string())
        .bind(position.sl_price.to_string())
        .bind(position.highest_price_seen.to_string())
        .bind(position.entry_fee.to_string())
        .bind(status)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get all open positions, reconstructed into ledger form.
    pub async fn get_open_positions(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query_as::<_, StoredPosition>(
            "SELECT id, symbol, strategy, entry_price, qty, entry_time, tp_price, sl_price, \
             highest_price_seen, entry_fee, status FROM positions WHERE status = 'open'",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch positions")?;

        rows.into_iter().map(restore_position).collect()
    }

    // ==================== Trades ====================

    /// Record a completed trade.
    pub async fn record_trade(&self, trade: &ClosedTrade) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO trades (
                position_id, symbol, strategy, entry_price, exit_price,
                qty, pnl, reason, entry_time, exit_time
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(trade.position_id.to_string())
        .bind(&trade.symbol)
        .bind(trade.strategy.as_str())
        .bind(trade.entry_price.to_string())
        .bind(trade.exit_price.to_string())
        .bind(trade.qty.to_string())
        .bind(trade.pnl.to_string())
        .bind(trade.reason.as_str())
        .bind(trade.entry_time.to_rfc3339())
        .bind(trade.exit_time.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Get recent trades, newest first.
    pub async fn get_trades(&self, limit: i64) -> Result<Vec<StoredTrade>> {
        sqlx::query_as::<_, StoredTrade>(
            "SELECT * FROM trades ORDER BY exit_time DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch trades")
    }

    /// Trade counts per strategy.
    pub async fn trade_counts(&self) -> Result<Vec<(String, i64)>> {
        sqlx::query_as("SELECT strategy, COUNT(*) FROM trades GROUP BY strategy")
            .fetch_all(&self.pool)
            .await
            .context("Failed to count trades")
    }

    // ==================== Ledger Events ====================

    /// Append a ledger event to the log.
    pub async fn append_event(&self, event: &LedgerEvent) -> Result<()> {
        sqlx::query("INSERT INTO ledger_events (ts, kind, details) VALUES (?, ?, ?)")
            .bind(event.ts.to_rfc3339())
            .bind(event.kind.as_str())
            .bind(event.details.to_string())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    // ==================== Cooldown ====================

    /// Save the last-entry tick for a (symbol, strategy) pair.
    pub async fn save_last_entry(
        &self,
        symbol: &str,
        strategy: StrategyKind,
        tick: u64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO last_entries (symbol, strategy, tick)
            VALUES (?, ?, ?)
            ON CONFLICT(symbol, strategy) DO UPDATE SET tick = excluded.tick
            "#,
        )
        .bind(symbol)
        .bind(strategy.as_str())
        .bind(tick as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Load all last-entry ticks.
    pub async fn get_last_entries(&self) -> Result<HashMap<(String, StrategyKind), u64>> {
        let rows: Vec<(String, String, i64)> =
            sqlx::query_as("SELECT symbol, strategy, tick FROM last_entries")
                .fetch_all(&self.pool)
                .await?;

        let mut entries = HashMap::new();
        for (symbol, strategy, tick) in rows {
            let strategy = StrategyKind::parse(&strategy)
                .with_context(|| format!("Unknown strategy in last_entries: {strategy}"))?;
            entries.insert((symbol, strategy), tick as u64);
        }
        Ok(entries)
    }

    // ==================== Equity Curve ====================

    /// Record an equity curve point.
    pub async fn record_equity_point(&self, ts: DateTime<Utc>, equity: f64) -> Result<()> {
        sqlx::query("INSERT INTO equity_curve (timestamp, equity) VALUES (?, ?)")
            .bind(ts.to_rfc3339())
            .bind(equity)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Get recent equity curve points.
    pub async fn get_equity_curve(&self, limit: i64) -> Result<Vec<EquityPoint>> {
        sqlx::query_as::<_, EquityPoint>(
            "SELECT * FROM equity_curve ORDER BY timestamp DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch equity curve")
    }

    /// Calculate max drawdown from equity curve.
    pub async fn calculate_max_drawdown(&self) -> Result<f64> {
        let points = self.get_equity_curve(1000).await?;

        if points.is_empty() {
            return Ok(0.0);
        }

        let mut peak = 0.0f64;
        let mut max_dd = 0.0f64;

        // Points are in DESC order, reverse for calculation
        for point in points.into_iter().rev() {
            if point.equity > peak {
                peak = point.equity;
            }
            if peak > 0.0 {
                let dd = (peak - point.equity) / peak;
                if dd > max_dd {
                    max_dd = dd;
                }
            }
        }

        Ok(max_dd)
    }
}

fn restore_position(row: StoredPosition) -> Result<Position> {
    let parse_dec = |value: &str, field: &str| -> Result<Decimal> {
        value
            .parse()
            .with_context(|| format!("Invalid stored {field}: {value}"))
    };

    Ok(Position {
        id: Uuid::parse_str(&row.id)
            .with_context(|| format!("Invalid stored position id: {}", row.id))?,
        symbol: row.symbol,
        strategy: StrategyKind::parse(&row.strategy)
            .with_context(|| format!("Unknown strategy in positions table: {}", row.strategy))?,
        entry_price: parse_dec(&row.entry_price, "entry_price")?,
        qty: parse_dec(&row.qty, "qty")?,
        entry_time: DateTime::parse_from_rfc3339(&row.entry_time)
            .with_context(|| format!("Invalid stored entry_time: {}", row.entry_time))?
            .with_timezone(&Utc),
        tp_price: parse_dec(&row.tp_price, "tp_price")?,
        sl_price: parse_dec(&row.sl_price, "sl_price")?,
        highest_price_seen: parse_dec(&row.highest_price_seen, "highest_price_seen")?,
        entry_fee: parse_dec(&row.entry_fee, "entry_fee")?,
        status: if row.status == "closed" {
            PositionStatus::Closed
        } else {
            PositionStatus::Open
        },
    })
}
