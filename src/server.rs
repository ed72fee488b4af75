//! HTTP surface: the `/upload` route, the wrong-method policy and a health
//! check.
//!
//! Handlers are thin. `/upload` pulls the `file` field out of the form, runs
//! [`crate::convert::convert`] and renders the report; every pipeline error
//! becomes a response through [`IntoResponse`] for [`SpinsheetError`].

use crate::auth::{resolve_credentials, CredentialProvider};
use crate::config::{MethodPolicy, ResponseFormat, ServiceConfig};
use crate::convert::{self, advance, build_http_client, Conversion, Stage};
use crate::error::SpinsheetError;
use crate::pipeline::drive::ConversionRequest;
use crate::pipeline::render::{self, Template};
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, FromRequest, Multipart, Query, Request, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub http: Client,
    pub credentials: Arc<dyn CredentialProvider>,
    pub template: Template,
}

impl AppState {
    /// Build the HTTP client, resolve credentials and load the template.
    ///
    /// A template override with an unknown placeholder is rejected here.
    pub fn new(config: ServiceConfig) -> Result<Self, SpinsheetError> {
        let http = build_http_client(&config)?;
        let credentials = resolve_credentials(&config, &http)?;
        let template = Template::from_config(config.template_source.as_deref());
        template.check()?;
        Ok(Self {
            config: Arc::new(config),
            http,
            credentials,
            template,
        })
    }
}

impl IntoResponse for SpinsheetError {
    fn into_response(self) -> Response {
        (self.status_code(), self.to_string()).into_response()
    }
}

/// Create the router.
///
/// `/upload` bodies are capped at `config.max_upload_bytes`.
pub fn build_router(state: AppState) -> Router {
    let limit = state.config.max_upload_bytes;
    Router::new()
        .route(
            "/upload",
            post(upload)
                .fallback(wrong_method)
                .layer(DefaultBodyLimit::max(limit)),
        )
        .route("/healthz", get(healthz))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Bind `config.bind_addr` and serve until the process is stopped.
pub async fn serve(state: AppState) -> Result<(), SpinsheetError> {
    let addr = state.config.bind_addr;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| SpinsheetError::Internal(format!("Failed to bind to {addr}: {e}")))?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, build_router(state))
        .await
        .map_err(|e| SpinsheetError::Internal(format!("Server error: {e}")))
}

// ── Handlers ─────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct UploadParams {
    format: Option<ResponseFormat>,
}

async fn upload(
    State(state): State<AppState>,
    Query(params): Query<UploadParams>,
    request: Request,
) -> Result<Response, SpinsheetError> {
    let format = params.format.unwrap_or(state.config.response_format);
    let bytes = read_upload(&state, request).await?;
    info!("Received upload of {} bytes", bytes.len());

    let request = ConversionRequest {
        bytes,
        content_type: state.config.source_mime_type.clone(),
    };
    // The cleanup handle is dropped; the trash call finishes on its own.
    let Conversion {
        report, mut stage, ..
    } = convert::convert(
        request,
        &state.config,
        &state.http,
        state.credentials.as_ref(),
    )
    .await?;

    advance(&mut stage, Stage::Rendering);
    let rendered = render::render(&report, format, &state.template);
    match rendered.error {
        Some(ref e) => error!("Conversion failed while {}: {}", stage, e),
        None => advance(&mut stage, Stage::Done),
    }

    Ok(([(header::CONTENT_TYPE, rendered.content_type)], rendered.body).into_response())
}

/// Pull the `file` field out of a multipart or urlencoded form.
async fn read_upload(state: &AppState, request: Request) -> Result<Bytes, SpinsheetError> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if content_type.starts_with("multipart/form-data") {
        let mut multipart = Multipart::from_request(request, state)
            .await
            .map_err(|e| upload_error(e.status(), e.body_text()))?;
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| upload_error(e.status(), e.body_text()))?
        {
            if field.name() == Some("file") {
                return field
                    .bytes()
                    .await
                    .map_err(|e| upload_error(e.status(), e.body_text()));
            }
        }
        return Err(SpinsheetError::MissingUpload);
    }

    if content_type.starts_with("application/x-www-form-urlencoded") {
        let Form(mut fields) = Form::<HashMap<String, String>>::from_request(request, state)
            .await
            .map_err(|e| upload_error(e.status(), e.body_text()))?;
        return fields
            .remove("file")
            .map(Bytes::from)
            .ok_or(SpinsheetError::MissingUpload);
    }

    Err(SpinsheetError::MissingUpload)
}

/// Body-limit rejections become `413`; every other read failure is a `400`.
fn upload_error(status: StatusCode, text: String) -> SpinsheetError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        SpinsheetError::UploadTooLarge(text)
    } else {
        SpinsheetError::BadUpload(text)
    }
}

async fn wrong_method(State(state): State<AppState>, method: Method) -> Response {
    warn!("{} /upload rejected", method);
    match state.config.method_policy {
        MethodPolicy::Reject => (
            StatusCode::METHOD_NOT_ALLOWED,
            format!("{method} not supported"),
        )
            .into_response(),
        MethodPolicy::Redirect(ref location) => Redirect::to(location).into_response(),
    }
}

async fn healthz() -> &'static str {
    "ok"
}
