pub use self::upstream_market::{UpstreamMarket, UpstreamMarketsBody};

mod upstream_market;
