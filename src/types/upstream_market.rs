use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::{error::Error, model::MarketRecord};

/// Market row as returned by the upstream API. Every field is optional on
/// the wire; `into_record` decides whether the row is usable.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpstreamMarket {
    pub symbol: Option<String>,
    pub display_name: Option<String>,
    pub price: Option<f64>,
    pub price_change_24h: Option<f64>,
    pub quote_volume: Option<f64>,
    pub base_volume: Option<f64>,
    pub market_index: Option<i64>,
    pub market_type: Option<String>,
    pub open_interest: Option<f64>,
    pub last_updated: Option<i64>,
}

/// The markets endpoint answers either with a bare array or wraps it. Rows
/// stay untyped until `into_markets` so one malformed row cannot reject the
/// whole response.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum UpstreamMarketsBody {
    List(Vec<Value>),
    Markets { markets: Vec<Value> },
    Data { data: Vec<Value> },
}

impl UpstreamMarketsBody {
    /// Decodes every row on its own; rows that do not decode are skipped.
    pub fn into_markets(self) -> Vec<UpstreamMarket> {
        let rows = match self {
            UpstreamMarketsBody::List(rows)
            | UpstreamMarketsBody::Markets { markets: rows }
            | UpstreamMarketsBody::Data { data: rows } => rows,
        };

        rows.into_iter()
            .enumerate()
            .filter_map(|(index, row)| {
                match serde_json::from_value::<UpstreamMarket>(row) {
                    Ok(market) => Some(market),
                    Err(e) => {
                        warn!("Skipping malformed upstream row {}: {}", index, e);
                        None
                    },
                }
            })
            .collect()
    }
}

impl UpstreamMarket {
    /// Builds the cached record, stamping it with `timestamp` instead of the
    /// upstream's own `lastUpdated`.
    pub fn into_record(self, timestamp: i64) -> Result<MarketRecord, Error> {
        let symbol = self
            .symbol
            .ok_or(Error::Validation(String::from("symbol")))?;
        let missing =
            |field: &str| Error::Validation(format!("{} of {}", field, symbol));

        let display_name = self.display_name.ok_or_else(|| missing("displayName"))?;
        let quote_volume = self.quote_volume.ok_or_else(|| missing("quoteVolume"))?;
        let base_volume = self.base_volume.ok_or_else(|| missing("baseVolume"))?;
        let market_index = self.market_index.ok_or_else(|| missing("marketIndex"))?;
        let market_type = self.market_type.ok_or_else(|| missing("marketType"))?;
        let open_interest =
            self.open_interest.ok_or_else(|| missing("openInterest"))?;

        Ok(MarketRecord {
            symbol,
            display_name,
            price: self.price,
            price_change_24h: self.price_change_24h,
            quote_volume,
            base_volume,
            market_index,
            market_type,
            open_interest,
            last_updated: timestamp,
        })
    }
}
