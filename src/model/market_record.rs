use serde::{Deserialize, Serialize};

use crate::error::Error;

/// One tradable perpetual market as stored under `market:<symbol>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketRecord {
    pub symbol: String,
    pub display_name: String,
    pub price: Option<f64>,
    pub price_change_24h: Option<f64>,
    pub quote_volume: f64,
    pub base_volume: f64,
    pub market_index: i64,
    pub market_type: String,
    pub open_interest: f64,
    /// Epoch milliseconds of the refresh that wrote this record.
    pub last_updated: i64,
}

impl MarketRecord {
    /// Checks the value constraints serde cannot express.
    pub fn check(&self) -> Result<(), Error> {
        if self.symbol.trim().is_empty() {
            return Err(Error::Validation(String::from("empty symbol")));
        }

        for (field, value) in [
            ("quoteVolume", self.quote_volume),
            ("baseVolume", self.base_volume),
            ("openInterest", self.open_interest),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::Validation(format!(
                    "{} of {} is {}",
                    field, self.symbol, value
                )));
            }
        }

        for (field, value) in [
            ("price", self.price),
            ("priceChange24h", self.price_change_24h),
        ] {
            if let Some(v) = value {
                if !v.is_finite() {
                    return Err(Error::Validation(format!(
                        "{} of {} is {}",
                        field, self.symbol, v
                    )));
                }
            }
        }

        if self.last_updated < 0 {
            return Err(Error::Validation(format!(
                "lastUpdated of {} is negative",
                self.symbol
            )));
        }

        Ok(())
    }

    /// Serializes a record for the cache. Records that would not survive a
    /// read-side validation are reported as serialization failures.
    pub fn encode(&self) -> Result<String, Error> {
        self.check()
            .map_err(|e| Error::Serialization(e.to_string()))?;
        serde_json::to_string(self)
            .map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Parses and validates one raw cache value.
    pub fn decode(raw: &str) -> Result<MarketRecord, Error> {
        let record: MarketRecord = serde_json::from_str(raw)
            .map_err(|e| Error::Validation(e.to_string()))?;
        record.check()?;
        Ok(record)
    }

    /// Minimal projection written in place of a record that failed to
    /// serialize: identity, core numbers clamped to safe values, fresh
    /// timestamp.
    pub fn fallback(&self, timestamp: i64) -> MarketRecord {
        fn finite(value: Option<f64>) -> Option<f64> {
            value.filter(|v| v.is_finite())
        }

        fn non_negative(value: f64) -> f64 {
            if value.is_finite() && value > 0.0 {
                value
            } else {
                0.0
            }
        }

        MarketRecord {
            symbol: self.symbol.to_owned(),
            display_name: self.display_name.to_owned(),
            price: finite(self.price),
            price_change_24h: None,
            quote_volume: non_negative(self.quote_volume),
            base_volume: non_negative(self.base_volume),
            market_index: self.market_index,
            market_type: self.market_type.to_owned(),
            open_interest: non_negative(self.open_interest),
            last_updated: timestamp,
        }
    }
}
