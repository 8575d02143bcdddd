//! Cache key layout
//!
//! Per-symbol records live under `market:`. Bookkeeping keys use the
//! `markets:` namespace so a prefix scan of `market:` never returns them.

pub const MARKET_PREFIX: &str = "market:";

pub const LAST_UPDATE: &str = "markets:last_update";
pub const MARKET_COUNT: &str = "markets:count";
pub const UPDATE_STATUS: &str = "markets:update_status";
pub const REFRESH_LOCK: &str = "markets:refresh_lock";

pub fn market_key(symbol: &str) -> String {
    format!("{}{}", MARKET_PREFIX, symbol)
}
