//! Admission webhook server.
//!
//! Serves `POST /validate` over TLS. A request that is not an AdmissionReview
//! at all (wrong content type, empty or unparseable body) gets HTTP 400 with a
//! plain-text reason. A review whose object cannot be evaluated (missing, not a
//! Deployment, undecodable) is denied in an AdmissionReview carrying code 400.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use axum_server::tls_rustls::RustlsConfig;
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::health::HealthState;
use crate::scanner::ImageScanner;
use crate::webhooks::engine::{AdmissionEngine, AdmissionError};

/// Default webhook server port
pub const WEBHOOK_PORT: u16 = 8000;

/// Errors that can occur when running the webhook server
#[derive(Error, Debug)]
pub enum WebhookError {
    /// TLS configuration error
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),
    /// Server error
    #[error("Webhook server error: {0}")]
    Server(String),
}

/// Create the webhook router
pub fn create_webhook_router<S>(engine: Arc<AdmissionEngine<S>>) -> Router
where
    S: ImageScanner + 'static,
{
    Router::new()
        .route("/validate", post(validate::<S>))
        .with_state(engine)
}

async fn validate<S>(
    State(engine): State<Arc<AdmissionEngine<S>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response
where
    S: ImageScanner + 'static,
{
    if !is_json(&headers) {
        warn!("Rejecting admission request with unsupported content type");
        return bad_request("invalid Content-Type, expected application/json");
    }
    if body.is_empty() {
        warn!("Rejecting admission request with empty body");
        return bad_request("empty request body");
    }

    let request = match decode_request(&body) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "Failed to decode admission request");
            return bad_request(&e.to_string());
        }
    };
    debug!(
        uid = %request.uid,
        operation = ?request.operation,
        namespace = ?request.namespace,
        name = %request.name,
        "Processing admission request"
    );

    let response = match engine.evaluate(&request).await {
        Ok(verdict) => verdict.into_response(&request),
        Err(e) => {
            warn!(uid = %request.uid, error = %e, "Denying admission request that cannot be evaluated");
            reject(&request, &e)
        }
    };
    (StatusCode::OK, Json(response.into_review())).into_response()
}

/// Deny with the error as the reason and a 400 status code.
fn reject(request: &AdmissionRequest<DynamicObject>, error: &AdmissionError) -> AdmissionResponse {
    let mut response = AdmissionResponse::from(request).deny(error.to_string());
    response.result.code = StatusCode::BAD_REQUEST.as_u16();
    response
}

fn decode_request(body: &[u8]) -> Result<AdmissionRequest<DynamicObject>, AdmissionError> {
    let review: AdmissionReview<DynamicObject> = serde_json::from_slice(body)
        .map_err(|e| AdmissionError::InvalidReview(e.to_string()))?;
    review
        .try_into()
        .map_err(|e: kube::core::admission::ConvertAdmissionReviewError| {
            AdmissionError::InvalidReview(e.to_string())
        })
}

/// `application/json`, optionally with parameters such as a charset.
fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .is_some_and(|media_type| media_type.trim().eq_ignore_ascii_case("application/json"))
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, message.to_string()).into_response()
}

/// Run the webhook server with TLS on `0.0.0.0:<port>`.
///
/// TLS certificates are loaded from PEM files. Once they load, the webhook is
/// reported ready through `health_state`.
pub async fn run_webhook_server<S>(
    engine: Arc<AdmissionEngine<S>>,
    port: u16,
    cert_path: &Path,
    key_path: &Path,
    health_state: Option<Arc<HealthState>>,
) -> Result<(), WebhookError>
where
    S: ImageScanner + 'static,
{
    let app = create_webhook_router(engine);

    let config = RustlsConfig::from_pem_file(cert_path, key_path)
        .await
        .map_err(|e| WebhookError::TlsConfig(e.to_string()))?;

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(port = port, "Webhook server listening with TLS");
    if let Some(state) = &health_state {
        state.set_webhook_ready(true).await;
    }

    let result = axum_server::bind_rustls(addr, config)
        .serve(app.into_make_service())
        .await
        .map_err(|e| WebhookError::Server(e.to_string()));

    if let Some(state) = &health_state {
        state.set_webhook_ready(false).await;
    }
    result
}
