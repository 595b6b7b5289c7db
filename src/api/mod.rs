//! Exchange REST client for market data.

mod exchange;
mod types;

pub use exchange::ExchangeClient;
pub use types::{ExchangeInfo, SymbolFilterRaw, SymbolInfo, TickerPrice};
