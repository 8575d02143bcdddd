pub use self::{
    http::HttpMarketSource, market_source::MarketSource, redis::RedisStore,
};

mod http;
mod market_source;
mod redis;
