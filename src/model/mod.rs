mod market_record;
mod update_status;

pub use market_record::MarketRecord;
pub use update_status::UpdateStatus;
