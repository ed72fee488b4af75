//! Storage API calls: upload with conversion, export-link lookup, export
//! download and best-effort cleanup.
//!
//! The calls are strictly sequential. Each returns its own failure kind so
//! the handler can echo the upstream diagnostic, and only the cleanup call
//! is allowed to fail silently.

use crate::auth::Transport;
use crate::config::ServiceConfig;
use crate::error::SpinsheetError;
use axum::body::Bytes;
use serde::Deserialize;
use std::collections::HashMap;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Uploaded bytes plus the content type they are declared as.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub bytes: Bytes,
    pub content_type: String,
}

/// The converted document as described by the upload response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertedDocumentHandle {
    pub id: String,
    #[serde(default)]
    pub export_links: HashMap<String, String>,
}

/// Turn a PDF export link into the CSV one.
///
/// The export API selects the output format with an `exportFormat=pdf`
/// query value; swapping the first `=pdf` is the whole contract.
pub fn rewrite_export_link(link: &str) -> String {
    link.replacen("=pdf", "=csv", 1)
}

/// Pick the export link for `export_mime` and rewrite it to CSV.
pub fn csv_export_link(
    handle: &ConvertedDocumentHandle,
    export_mime: &str,
) -> Result<String, SpinsheetError> {
    match handle.export_links.get(export_mime) {
        Some(link) if !link.is_empty() => Ok(rewrite_export_link(link)),
        _ => {
            error!("couldn't get export link for {}", handle.id);
            Err(SpinsheetError::MissingExportLink)
        }
    }
}

/// Issues the storage API calls for one request.
#[derive(Debug, Clone)]
pub struct ConversionClient {
    transport: Transport,
    upload_url: String,
    export_mime: String,
    api_base: String,
}

impl ConversionClient {
    pub fn new(transport: Transport, config: &ServiceConfig) -> Self {
        Self {
            transport,
            upload_url: config.upload_url.clone(),
            export_mime: config.export_mime_type.clone(),
            api_base: config.api_base.clone(),
        }
    }

    /// Upload the file and ask the storage API to convert it.
    pub async fn upload(
        &self,
        request: ConversionRequest,
    ) -> Result<ConvertedDocumentHandle, SpinsheetError> {
        debug!(
            "Uploading {} bytes as {}",
            request.bytes.len(),
            request.content_type
        );
        let response = self
            .transport
            .post(&self.upload_url)
            .header(reqwest::header::CONTENT_TYPE, request.content_type)
            .body(request.bytes)
            .send()
            .await
            .map_err(|e| {
                error!("upload failed: {}", e);
                SpinsheetError::transport("upload", e)
            })?;

        let response = ensure_success("upload", response).await?;

        let handle: ConvertedDocumentHandle = response.json().await.map_err(|e| {
            error!("upload response not understood: {}", e);
            SpinsheetError::InvalidUploadResponse(e.to_string())
        })?;
        info!(
            "Uploaded document {} ({} export links)",
            handle.id,
            handle.export_links.len()
        );
        Ok(handle)
    }

    /// The CSV export link for a converted document.
    pub fn export_link(&self, handle: &ConvertedDocumentHandle) -> Result<String, SpinsheetError> {
        csv_export_link(handle, &self.export_mime)
    }

    /// Start downloading the CSV export. The body is left unread.
    pub async fn fetch_export(&self, link: &str) -> Result<reqwest::Response, SpinsheetError> {
        debug!("Fetching export {}", link);
        let response = self.transport.get(link).send().await.map_err(|e| {
            error!("export fetch failed: {}", e);
            SpinsheetError::transport("export", e)
        })?;
        ensure_success("export", response).await
    }

    /// `{api_base}/files/{id}/trash`
    pub fn trash_url(&self, file_id: &str) -> String {
        format!("{}/files/{}/trash", self.api_base, file_id)
    }

    /// Move the temporary document to the trash without waiting for it.
    ///
    /// The outcome only reaches the log.
    pub fn spawn_cleanup(&self, file_id: &str) -> CleanupHandle {
        let url = self.trash_url(file_id);
        let transport = self.transport.clone();
        let id = file_id.to_string();

        CleanupHandle(tokio::spawn(async move {
            match transport.post(&url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!("Trashed temporary document {}", id);
                }
                Ok(resp) => {
                    warn!("failed to trash {}: HTTP {}", id, resp.status());
                }
                Err(e) => {
                    warn!("failed to trash {}: {}", id, e);
                }
            }
        }))
    }
}

/// A detached cleanup call.
///
/// Dropping the handle leaves the call running; awaiting [`CleanupHandle::wait`]
/// blocks until it has finished (used by tests and shutdown paths).
#[derive(Debug)]
pub struct CleanupHandle(JoinHandle<()>);

impl CleanupHandle {
    pub async fn wait(self) {
        if let Err(e) = self.0.await {
            warn!("cleanup task did not finish: {}", e);
        }
    }
}

/// Pass through a success response, otherwise read its body as the error.
async fn ensure_success(
    stage: &'static str,
    response: reqwest::Response,
) -> Result<reqwest::Response, SpinsheetError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = match response.text().await {
        Ok(text) => text,
        Err(e) => e.to_string(),
    };
    error!("{}", body);
    error!("{} error {}", stage, status.as_u16());
    Err(SpinsheetError::UpstreamStatus {
        stage,
        status: status.as_u16(),
        body,
    })
}
