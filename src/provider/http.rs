use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use crate::{
    configuration::Config,
    error::Error,
    provider::MarketSource,
    types::{UpstreamMarket, UpstreamMarketsBody},
};

#[derive(Debug)]
pub struct HttpMarketSource {
    pub config: Config,
    pub http: Client,
}

impl HttpMarketSource {
    pub fn new(config: Config) -> Result<HttpMarketSource, Error> {
        let http = match Client::builder()
            .timeout(Duration::from_secs(config.upstream_timeout_secs))
            .user_agent(concat!("market-cache/", env!("CARGO_PKG_VERSION")))
            .build()
        {
            Ok(c) => c,
            Err(e) => {
                return Err(Error::ReqwestError(e));
            },
        };

        Ok(HttpMarketSource { config, http })
    }
}

#[async_trait]
impl MarketSource for HttpMarketSource {
    async fn health_check(&self) -> bool {
        let url = match self.config.get_upstream_health_url() {
            Ok(url) => url,
            Err(e) => {
                warn!("Invalid upstream health url: {}", e);
                return false;
            },
        };

        match self.http.get(url).send().await {
            Ok(response) => {
                let healthy = response.status().is_success();
                if !healthy {
                    warn!("Upstream health returned {}", response.status());
                }
                healthy
            },
            Err(e) => {
                warn!("Upstream health request failed: {}", e);
                false
            },
        }
    }

    async fn get_all_market_data(&self) -> Result<Vec<UpstreamMarket>, Error> {
        let url = self.config.get_upstream_markets_url()?;
        debug!("Fetching markets from {}", url);

        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::UpstreamUnavailable(format!(
                "markets request returned {}",
                status
            )));
        }

        let body = response.json::<UpstreamMarketsBody>().await?;
        Ok(body.into_markets())
    }
}
