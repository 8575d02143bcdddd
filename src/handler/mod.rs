pub mod market_reader;
pub mod market_refresher;
pub mod status_tracker;
