use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use redis::RedisError as REDIS_ERROR;
use reqwest::Error as REQWEST_ERROR;
use serde_json::Error as JSON_ERROR;
use std::{
    env::VarError, io::Error as IO_ERROR, num::ParseIntError,
    str::ParseBoolError as PARSE_BOOL_ERROR,
};
use thiserror::Error;
use tokio::task::JoinError;
use tokio::time::error::Elapsed;
use tracing::subscriber::SetGlobalDefaultError as TRACING_GLOBAL_DEFAULT_ERROR;
use url::ParseError as URL_ERROR;

#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Io(#[from] IO_ERROR),

    #[error("{0}")]
    URL(#[from] URL_ERROR),

    #[error("{0}")]
    INT(#[from] ParseIntError),

    #[error("{0}")]
    VAR(#[from] VarError),

    #[error("{0}")]
    TokioJoinError(#[from] JoinError),

    #[error("operation timed out: {0}")]
    TokioElapsedError(#[from] Elapsed),

    #[error("{0}")]
    ParseBoolError(#[from] PARSE_BOOL_ERROR),

    #[error("{0}")]
    JsonError(#[from] JSON_ERROR),

    #[error("{0}")]
    ReqwestError(#[from] REQWEST_ERROR),

    #[error("Redis error: {0}")]
    Redis(#[from] REDIS_ERROR),

    #[error("Tracing error: {0}")]
    SetGlobalDefaultError(#[from] TRACING_GLOBAL_DEFAULT_ERROR),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Server end with error: {0}")]
    ServerError(String),

    #[error("health check failed")]
    HealthCheckFailed,

    #[error("no market data received")]
    EmptyUpstreamResult,

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid market record: {0}")]
    Validation(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),
}

impl Error {
    /// Health check, empty fetch and upstream transport failures.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            Error::HealthCheckFailed
                | Error::EmptyUpstreamResult
                | Error::UpstreamUnavailable(_)
                | Error::ReqwestError(_)
        )
    }
}

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,

            Error::Validation(_)
            | Error::INT(_)
            | Error::ParseBoolError(_) => StatusCode::BAD_REQUEST,

            Error::HealthCheckFailed
            | Error::EmptyUpstreamResult
            | Error::UpstreamUnavailable(_)
            | Error::ReqwestError(_) => StatusCode::BAD_GATEWAY,

            Error::CacheUnavailable(_) | Error::Redis(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            },

            Error::TokioElapsedError(_) => StatusCode::GATEWAY_TIMEOUT,

            Error::Io(_)
            | Error::URL(_)
            | Error::VAR(_)
            | Error::TokioJoinError(_)
            | Error::JsonError(_)
            | Error::SetGlobalDefaultError(_)
            | Error::ConfigurationError(_)
            | Error::ServerError(_)
            | Error::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let body = serde_json::json!({
            "success": false,
            "error": status.canonical_reason().unwrap_or("Unknown"),
            "message": self.to_string(),
            "status": status.as_u16(),
        });
        HttpResponse::build(status).json(body)
    }
}
