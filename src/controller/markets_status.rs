use actix_web::{get, web, Responder};
use serde::{Deserialize, Serialize};

use crate::{
    cache::CacheStore,
    cache_keys,
    configuration::{AppState, State},
    error::Error,
    model::UpdateStatus,
};

#[get("/markets/status")]
pub async fn index(
    state: web::Data<AppState<State>>,
) -> Result<impl Responder, Error> {
    let update_status = state.status.read().await?;
    let last_update = state
        .store
        .get(cache_keys::LAST_UPDATE)
        .await?
        .and_then(|value| value.parse::<i64>().ok());
    let market_count = state
        .store
        .get(cache_keys::MARKET_COUNT)
        .await?
        .and_then(|value| value.parse::<usize>().ok());

    Ok(web::Json(ResponseData {
        update_status,
        last_update,
        market_count,
    }))
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseData {
    pub update_status: Option<UpdateStatus>,
    pub last_update: Option<i64>,
    pub market_count: Option<usize>,
}
