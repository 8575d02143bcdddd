use async_trait::async_trait;

use crate::{error::Error, types::UpstreamMarket};

/// The trading-protocol API the refresh job pulls from.
#[async_trait]
pub trait MarketSource: Send + Sync {
    /// `false` on any failure; never errors.
    async fn health_check(&self) -> bool;

    async fn get_all_market_data(&self) -> Result<Vec<UpstreamMarket>, Error>;
}
