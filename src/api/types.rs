//! API response types for the Binance spot REST endpoints.

use rust_decimal::Decimal;
use serde::Deserialize;

/// Ticker price from /api/v3/ticker/price.
#[derive(Debug, Clone, Deserialize)]
pub struct TickerPrice {
    pub symbol: String,
    pub price: Decimal,
}

/// Exchange info from /api/v3/exchangeInfo, trimmed to what sizing needs.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeInfo {
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    pub symbol: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub filters: Vec<SymbolFilterRaw>,
}

/// One entry of a symbol's filter list. Binance mixes many filter shapes
/// in one array, so every field is optional and selected by filter_type.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolFilterRaw {
    pub filter_type: String,
    #[serde(default)]
    pub step_size: Option<Decimal>,
    #[serde(default)]
    pub min_qty: Option<Decimal>,
    #[serde(default)]
    pub min_notional: Option<Decimal>,
}
