//! Error-to-HTTP-status mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed proxy url: {0}")]
    Route(#[from] wiretap_routing::RouteError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("upstream dial/transport error: {0}")]
    Dial(reqwest::Error),

    #[error("body read error: {0}")]
    BodyRead(reqwest::Error),

    #[error("signing failure: {0}")]
    Signing(String),

    #[error(transparent)]
    Session(#[from] wiretap_core::Error),

    #[error(transparent)]
    Egress(#[from] wiretap_egress::Error),

    #[error(transparent)]
    Observability(#[from] wiretap_observability::Error),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Route(_) | Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::Egress(wiretap_egress::Error::InvalidModelId(_)) => StatusCode::BAD_REQUEST,
            Error::Dial(_) | Error::Egress(wiretap_egress::Error::Upstream(_)) => StatusCode::BAD_GATEWAY,
            Error::BodyRead(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Signing(_) | Error::Egress(wiretap_egress::Error::Signing(_) | wiretap_egress::Error::Credentials(_)) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Error::Session(_) | Error::Egress(_) | Error::Observability(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        tracing::warn!(error = %self, status = %status, "request failed");
        (status, self.to_string()).into_response()
    }
}
