//! OHLCV bar model and Binance-style kline parsing.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One OHLCV sample for a fixed time interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Bar open time
    pub open_time: DateTime<Utc>,

    /// Open price
    pub open: Decimal,

    /// High price
    pub high: Decimal,

    /// Low price
    pub low: Decimal,

    /// Close price
    pub close: Decimal,

    /// Base-asset volume
    pub volume: Decimal,

    /// Bar close time
    pub close_time: DateTime<Utc>,
}

impl Bar {
    /// Parse a single kline row as returned by `/api/v3/klines`.
    ///
    /// Rows are heterogeneous JSON arrays:
    /// `[open_time, "open", "high", "low", "close", "volume", close_time, ...]`
    /// with prices/volumes encoded as strings. Trailing fields are ignored.
    pub fn from_kline_row(row: &[Value]) -> Result<Self> {
        if row.len() < 7 {
            return Err(anyhow!("kline row too short: {} fields", row.len()));
        }

        let ms = |v: &Value, what: &str| -> Result<DateTime<Utc>> {
            let ms = v
                .as_i64()
                .ok_or_else(|| anyhow!("kline {} is not an integer", what))?;
            Utc.timestamp_millis_opt(ms)
                .single()
                .ok_or_else(|| anyhow!("kline {} out of range: {}", what, ms))
        };

        let px = |v: &Value, what: &str| -> Result<Decimal> {
            let s = v
                .as_str()
                .ok_or_else(|| anyhow!("kline {} is not a string", what))?;
            s.parse::<Decimal>()
                .with_context(|| format!("invalid kline {}: {}", what, s))
        };

        Ok(Self {
            open_time: ms(&row[0], "open_time")?,
            open: px(&row[1], "open")?,
            high: px(&row[2], "high")?,
            low: px(&row[3], "low")?,
            close: px(&row[4], "close")?,
            volume: px(&row[5], "volume")?,
            close_time: ms(&row[6], "close_time")?,
        })
    }

    /// Parse a full klines response into an ascending bar sequence.
    pub fn from_kline_rows(rows: &[Vec<Value>]) -> Result<Vec<Self>> {
        rows.iter().map(|r| Self::from_kline_row(r)).collect()
    }
}
