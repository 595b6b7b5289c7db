//! Binance spot market-data client (read-only endpoints).

use anyhow::{Context, Result};
use backoff::{future::retry, Error as BackoffError, ExponentialBackoff, ExponentialBackoffBuilder};
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::models::Bar;
use crate::trading::{truncate_to_step, SymbolFilters};

use super::types::{ExchangeInfo, TickerPrice};

const API_BASE: &str = "https://api.binance.com";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for Binance spot REST endpoints. All calls retry transient
/// failures with exponential backoff before giving up.
pub struct ExchangeClient {
    client: Client,
    base_url: String,
}

impl ExchangeClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: API_BASE.to_string(),
        })
    }

    fn retry_policy() -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(500))
            .with_max_elapsed_time(Some(Duration::from_secs(30)))
            .build()
    }

    /// Latest traded price for a symbol.
    pub async fn get_price(&self, symbol: &str) -> Result<Decimal> {
        let url = format!("{}/api/v3/ticker/price?symbol={}", self.base_url, symbol);

        let ticker: TickerPrice = retry(Self::retry_policy(), || async {
            self.get_json(&url).await.map_err(BackoffError::transient)
        })
        .await
        .with_context(|| format!("Failed to fetch price for {symbol}"))?;

        Ok(ticker.price)
    }

    /// Closed candlesticks, oldest first.
    pub async fn get_klines(&self, symbol: &str, interval: &str, limit: u32) -> Result<Vec<Bar>> {
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url,
            symbol,
            interval,
            limit.min(1000)
        );

        debug!(url = %url, "Fetching klines");

        let rows: Vec<Vec<Value>> = retry(Self::retry_policy(), || async {
            self.get_json(&url).await.map_err(BackoffError::transient)
        })
        .await
        .with_context(|| format!("Failed to fetch klines for {symbol}"))?;

        Bar::from_kline_rows(&rows)
    }

    /// Order constraints for a symbol, from the exchange filter list.
    pub async fn get_symbol_filters(&self, symbol: &str) -> Result<SymbolFilters> {
        let url = format!("{}/api/v3/exchangeInfo?symbol={}", self.base_url, symbol);

        let info: ExchangeInfo = retry(Self::retry_policy(), || async {
            self.get_json(&url).await.map_err(BackoffError::transient)
        })
        .await
        .with_context(|| format!("Failed to fetch exchange info for {symbol}"))?;

        let sym = info
            .symbols
            .into_iter()
            .find(|s| s.symbol == symbol)
            .with_context(|| format!("Symbol {symbol} not found in exchange info"))?;

        let mut filters = SymbolFilters::default();
        for f in sym.filters {
            match f.filter_type.as_str() {
                "LOT_SIZE" => {
                    if let Some(step) = f.step_size {
                        filters.step_size = step;
                    }
                    if let Some(min) = f.min_qty {
                        filters.min_qty = min;
                    }
                }
                "NOTIONAL" | "MIN_NOTIONAL" => {
                    if let Some(min) = f.min_notional {
                        filters.min_notional = min;
                    }
                }
                _ => {}
            }
        }
        Ok(filters)
    }

    /// Truncate a quantity to the symbol's step size.
    pub fn round_qty(filters: &SymbolFilters, qty: Decimal) -> Decimal {
        truncate_to_step(qty, filters.step_size)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Request to {url} failed"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Request failed: {} - {}", status, body);
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse response from {url}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_round_qty_truncates() {
        let filters = SymbolFilters {
            step_size: dec!(0.001),
            min_qty: dec!(0.001),
            min_notional: dec!(10),
        };
        assert_eq!(ExchangeClient::round_qty(&filters, dec!(1.23456)), dec!(1.234));
    }

    #[test]
    fn test_filter_parsing_shapes() {
        let raw = r#"{
            "symbols": [{
                "symbol": "BTCUSDT",
                "status": "TRADING",
                "filters": [
                    {"filterType": "PRICE_FILTER", "minPrice": "0.01"},
                    {"filterType": "LOT_SIZE", "stepSize": "0.00001", "minQty": "0.00001"},
                    {"filterType": "NOTIONAL", "minNotional": "5.0"}
                ]
            }]
        }"#;
        let info: ExchangeInfo = serde_json::from_str(raw).expect("parses");
        assert_eq!(info.symbols.len(), 1);
        let lot = &info.symbols[0].filters[1];
        assert_eq!(lot.step_size, Some(dec!(0.00001)));
    }
}
