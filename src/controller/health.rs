use actix_web::{get, web, HttpResponse};

use crate::{
    configuration::{AppState, State},
    error::Error,
    handler::status_tracker::get_health,
};

#[get("/health")]
pub async fn index(
    state: web::Data<AppState<State>>,
) -> Result<HttpResponse, Error> {
    let report = get_health(&state).await;

    let response = if report.healthy {
        HttpResponse::Ok().json(report)
    } else {
        HttpResponse::ServiceUnavailable().json(report)
    };

    Ok(response)
}
