use actix_web::{http::header, route, web, HttpRequest, HttpResponse};

use crate::{
    configuration::{AppState, State},
    error::Error,
    handler::market_refresher::refresh_markets,
};

/// Entry point for the external scheduler. The bearer credential is checked
/// before any work starts.
#[route("/cron/update-markets", method = "GET", method = "POST")]
pub async fn index(
    state: web::Data<AppState<State>>,
    req: HttpRequest,
) -> Result<HttpResponse, Error> {
    authorize(&req, &state.config.cron_secret)?;

    let outcome = refresh_markets(&state).await;
    let response = if outcome.success {
        HttpResponse::Ok().json(outcome)
    } else {
        HttpResponse::InternalServerError().json(outcome)
    };

    Ok(response)
}

fn authorize(req: &HttpRequest, secret: &str) -> Result<(), Error> {
    if secret.is_empty() {
        return Err(Error::Unauthorized);
    }

    let value = match req.headers().get(header::AUTHORIZATION) {
        Some(value) => value.to_str().map_err(|_| Error::Unauthorized)?,
        None => return Err(Error::Unauthorized),
    };

    match value.strip_prefix("Bearer ") {
        Some(token) if token.trim() == secret => Ok(()),
        _ => Err(Error::Unauthorized),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{http::StatusCode, test, App};

    use crate::test_support::{test_state, upstream_market, ScriptedSource};

    #[actix_web::test]
    async fn test_rejects_missing_credential_before_work() {
        let source = ScriptedSource::with_markets(vec![upstream_market("SOL-PERP", 1.0)]);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(test_state(source.clone())))
                .service(index),
        )
        .await;

        let req = test::TestRequest::post().uri("/cron/update-markets").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::post()
            .uri("/cron/update-markets")
            .insert_header((header::AUTHORIZATION, "Bearer wrong"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        assert_eq!(source.fetch_count(), 0);
    }

    #[actix_web::test]
    async fn test_runs_refresh_with_credential() {
        let source = ScriptedSource::with_markets(vec![
            upstream_market("SOL-PERP", 1.0),
            upstream_market("BTC-PERP", 2.0),
        ]);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(test_state(source)))
                .service(index),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/cron/update-markets")
            .insert_header((header::AUTHORIZATION, "Bearer test-secret"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["count"], 2);
    }

    #[actix_web::test]
    async fn test_failed_refresh_is_structured() {
        let source = ScriptedSource::with_markets(vec![]);
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(test_state(source)))
                .service(index),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/cron/update-markets")
            .insert_header((header::AUTHORIZATION, "Bearer test-secret"))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "no market data received");
    }

    #[actix_web::test]
    async fn test_empty_secret_never_authorizes() {
        let req = test::TestRequest::default()
            .insert_header((header::AUTHORIZATION, "Bearer "))
            .to_http_request();
        assert!(authorize(&req, "").is_err());
    }
}
