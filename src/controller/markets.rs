use actix_web::{get, http::header, web, HttpResponse};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::{
    configuration::{AppState, State},
    error::Error,
    handler::market_reader::{read_markets, MarketsSnapshot},
    model::MarketRecord,
};

pub const HEADER_CACHE_AGE: &str = "X-Cache-Age";
pub const HEADER_CACHE_STALE: &str = "X-Cache-Stale";
pub const HEADER_DATA_REFRESHED: &str = "X-Data-Refreshed";

#[derive(Debug, Deserialize)]
pub struct Query {
    /// Refresh before reading. Rejected in production.
    fresh: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseData {
    pub success: bool,
    pub data: Vec<MarketRecord>,
    pub last_updated: Option<i64>,
    pub count: usize,
    pub cache_age: Option<i64>,
    pub refreshed: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<MarketsSnapshot> for ResponseData {
    fn from(snapshot: MarketsSnapshot) -> Self {
        let message = snapshot.message().to_owned();
        ResponseData {
            success: true,
            count: snapshot.records.len(),
            data: snapshot.records,
            last_updated: snapshot.last_updated,
            cache_age: snapshot.cache_age,
            refreshed: snapshot.refreshed,
            message,
            error: None,
        }
    }
}

#[get("/markets")]
pub async fn index(
    state: web::Data<AppState<State>>,
    query: web::Query<Query>,
) -> Result<HttpResponse, Error> {
    let fresh = query.fresh.unwrap_or(false);
    if fresh && state.config.is_production() {
        return Err(Error::Forbidden(String::from(
            "cache bypass is disabled in production",
        )));
    }

    let snapshot = match read_markets(&state, fresh).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            error!("Market read failed: {}", e);
            return Ok(HttpResponse::InternalServerError().json(ResponseData {
                success: false,
                data: vec![],
                last_updated: None,
                count: 0,
                cache_age: None,
                refreshed: false,
                message: String::from("Failed to read market data"),
                error: Some(e.to_string()),
            }));
        },
    };

    let cache_age = snapshot
        .cache_age
        .map(|age| age.to_string())
        .unwrap_or_else(|| String::from("unknown"));
    let is_stale = snapshot.is_stale;
    let refreshed = snapshot.refreshed;

    Ok(HttpResponse::Ok()
        .insert_header((HEADER_CACHE_AGE, cache_age))
        .insert_header((HEADER_CACHE_STALE, is_stale.to_string()))
        .insert_header((HEADER_DATA_REFRESHED, refreshed.to_string()))
        .insert_header((header::CACHE_CONTROL, "public, max-age=30"))
        .json(ResponseData::from(snapshot)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use actix_web::{http::StatusCode, test, App};

    use crate::configuration::Environment;
    use crate::handler::market_refresher::refresh_markets;
    use crate::test_support::{
        test_config, test_state, test_state_with_store, upstream_market,
        FailingStore, ScriptedSource,
    };

    fn source() -> ScriptedSource {
        ScriptedSource::with_markets(vec![
            upstream_market("SOL-PERP", 5.0),
            upstream_market("BTC-PERP", 50.0),
            upstream_market("ETH-PERP", 1.0),
        ])
    }

    #[actix_web::test]
    async fn test_serves_sorted_markets_with_headers() {
        let state = test_state(source());
        refresh_markets(&state).await;

        let app = test::init_service(
            App::new().app_data(web::Data::new(state.clone())).service(index),
        )
        .await;
        let req = test::TestRequest::get().uri("/markets").to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get(HEADER_CACHE_STALE).unwrap(), "false");
        assert_eq!(resp.headers().get(HEADER_DATA_REFRESHED).unwrap(), "false");
        assert_eq!(resp.headers().get(HEADER_CACHE_AGE).unwrap(), "0");

        let body: ResponseData = test::read_body_json(resp).await;
        assert!(body.success);
        assert_eq!(body.count, 3);
        assert_eq!(body.data[0].symbol, "BTC-PERP");
        assert_eq!(body.message, "Markets served from cache");
    }

    #[actix_web::test]
    async fn test_cold_cache_refreshes_inline() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(test_state(source())))
                .service(index),
        )
        .await;
        let req = test::TestRequest::get().uri("/markets").to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.headers().get(HEADER_DATA_REFRESHED).unwrap(), "true");
        let body: ResponseData = test::read_body_json(resp).await;
        assert!(body.refreshed);
        assert_eq!(body.count, 3);
    }

    #[actix_web::test]
    async fn test_dead_cache_returns_structured_error() {
        let state = test_state_with_store(source(), Arc::new(FailingStore));
        let app = test::init_service(
            App::new().app_data(web::Data::new(state)).service(index),
        )
        .await;
        let req = test::TestRequest::get().uri("/markets").to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: ResponseData = test::read_body_json(resp).await;
        assert!(!body.success);
        assert!(body.data.is_empty());
        assert!(body.error.is_some());
    }

    #[actix_web::test]
    async fn test_bypass_forbidden_in_production() {
        let config = crate::configuration::Config {
            environment: Environment::Production,
            ..test_config()
        };
        let state = AppState::new(State::new(
            config,
            Arc::new(crate::cache::MemoryStore::new()),
            Arc::new(source()),
        ));
        let app = test::init_service(
            App::new().app_data(web::Data::new(state)).service(index),
        )
        .await;
        let req = test::TestRequest::get()
            .uri("/markets?fresh=true")
            .to_request();
        let resp = test::call_service(&app, req).await;

        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }
}
