//! Debug-only maintenance endpoints. Disabled in production.

use actix_web::{post, web, Responder};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    cache::CacheStore,
    configuration::{AppState, State},
    error::Error,
};

/// Matches both `market:` records and `markets:` bookkeeping keys.
const CLEAR_PREFIX: &str = "market";

#[derive(Debug, Serialize, Deserialize)]
pub struct ClearResponse {
    pub success: bool,
    pub removed: usize,
}

#[post("/admin/cache/clear")]
pub async fn clear_cache(
    state: web::Data<AppState<State>>,
) -> Result<impl Responder, Error> {
    if state.config.is_production() {
        return Err(Error::Forbidden(String::from(
            "cache clear is disabled in production",
        )));
    }

    let removed = state.store.clear(CLEAR_PREFIX).await?;
    info!("Cleared {} market cache keys", removed);

    Ok(web::Json(ClearResponse {
        success: true,
        removed,
    }))
}
