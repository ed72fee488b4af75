//! Configuration types for the upload service.
//!
//! All service behaviour is controlled through [`ServiceConfig`], built via
//! its [`ServiceConfigBuilder`]. Every knob has a default that talks to the
//! real Google Drive v2 endpoints, so a caller normally only sets
//! credentials and, in tests, points the two base URLs at a mock server.

use crate::auth::CredentialProvider;
use crate::error::SpinsheetError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

/// Drive v2 media upload with conversion to a native spreadsheet.
pub const DEFAULT_UPLOAD_URL: &str =
    "https://www.googleapis.com/upload/drive/v2/files?uploadType=media&convert=true";

/// Drive v2 metadata API; `/files/{id}/trash` lives under it.
pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com/drive/v2";

/// Google OAuth2 token endpoint used for refresh-token grants.
pub const DEFAULT_TOKEN_URL: &str = "https://accounts.google.com/o/oauth2/token";

/// Legacy Excel MIME type the uploaded bytes are declared as.
pub const DEFAULT_SOURCE_MIME: &str = "application/vnd.ms-excel";

/// Export format whose link is rewritten into the CSV link.
pub const DEFAULT_EXPORT_MIME: &str = "application/pdf";

/// Largest `/upload` request body accepted: 32 MiB.
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

/// Configuration for the upload service.
///
/// # Example
/// ```rust
/// use spinsheet::{MethodPolicy, ResponseFormat, ServiceConfig};
///
/// let config = ServiceConfig::builder()
///     .bind_addr("0.0.0.0:8080".parse().unwrap())
///     .response_format(ResponseFormat::Json)
///     .method_policy(MethodPolicy::Redirect("/".into()))
///     .build()
///     .unwrap();
/// assert_eq!(config.response_format, ResponseFormat::Json);
/// ```
#[derive(Clone)]
pub struct ServiceConfig {
    /// Socket address the HTTP server listens on. Default: `127.0.0.1:8080`.
    pub bind_addr: SocketAddr,

    /// Upload endpoint, including the `convert=true` flag.
    pub upload_url: String,

    /// Base URL of the storage metadata API (no trailing slash).
    pub api_base: String,

    /// OAuth2 token endpoint for refresh-token credentials.
    pub token_url: String,

    /// Content type sent with the uploaded bytes. Default: `application/vnd.ms-excel`.
    pub source_mime_type: String,

    /// Export-link key whose URL is rewritten to CSV. Default: `application/pdf`.
    pub export_mime_type: String,

    /// What to answer when `/upload` is hit with anything but `POST`.
    pub method_policy: MethodPolicy,

    /// Body format when the request does not ask for one.
    pub response_format: ResponseFormat,

    /// Replacement for the embedded HTML template.
    pub template_source: Option<String>,

    /// Per-call timeout for storage API requests. Default: none.
    ///
    /// Without a timeout a hung upstream call holds the request open until
    /// the client gives up.
    pub request_timeout_secs: Option<u64>,

    /// Largest `/upload` request body, in bytes. Default: 32 MiB.
    ///
    /// Larger bodies are answered with `413 Payload Too Large`.
    pub max_upload_bytes: usize,

    /// Pre-constructed credential provider. Takes precedence over the
    /// `SPINSHEET_*` environment variables.
    pub credentials: Option<Arc<dyn CredentialProvider>>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            upload_url: DEFAULT_UPLOAD_URL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            source_mime_type: DEFAULT_SOURCE_MIME.to_string(),
            export_mime_type: DEFAULT_EXPORT_MIME.to_string(),
            method_policy: MethodPolicy::default(),
            response_format: ResponseFormat::default(),
            template_source: None,
            request_timeout_secs: None,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            credentials: None,
        }
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("bind_addr", &self.bind_addr)
            .field("upload_url", &self.upload_url)
            .field("api_base", &self.api_base)
            .field("token_url", &self.token_url)
            .field("source_mime_type", &self.source_mime_type)
            .field("export_mime_type", &self.export_mime_type)
            .field("method_policy", &self.method_policy)
            .field("response_format", &self.response_format)
            .field(
                "template_source",
                &self.template_source.as_ref().map(|t| format!("<{} bytes>", t.len())),
            )
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field(
                "credentials",
                &self.credentials.as_ref().map(|_| "<dyn CredentialProvider>"),
            )
            .finish()
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    pub fn upload_url(mut self, url: impl Into<String>) -> Self {
        self.config.upload_url = url.into();
        self
    }

    /// Trailing slashes are dropped; paths are appended with a leading `/`.
    pub fn api_base(mut self, url: impl Into<String>) -> Self {
        self.config.api_base = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn token_url(mut self, url: impl Into<String>) -> Self {
        self.config.token_url = url.into();
        self
    }

    pub fn source_mime_type(mut self, mime: impl Into<String>) -> Self {
        self.config.source_mime_type = mime.into();
        self
    }

    pub fn export_mime_type(mut self, mime: impl Into<String>) -> Self {
        self.config.export_mime_type = mime.into();
        self
    }

    pub fn method_policy(mut self, policy: MethodPolicy) -> Self {
        self.config.method_policy = policy;
        self
    }

    pub fn response_format(mut self, format: ResponseFormat) -> Self {
        self.config.response_format = format;
        self
    }

    pub fn template_source(mut self, source: impl Into<String>) -> Self {
        self.config.template_source = Some(source.into());
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = Some(secs);
        self
    }

    pub fn max_upload_bytes(mut self, bytes: usize) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    pub fn credentials(mut self, provider: Arc<dyn CredentialProvider>) -> Self {
        self.config.credentials = Some(provider);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, SpinsheetError> {
        let c = &self.config;
        for (name, url) in [
            ("upload URL", &c.upload_url),
            ("API base", &c.api_base),
            ("token URL", &c.token_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(SpinsheetError::InvalidConfig(format!(
                    "{name} must be an http(s) URL, got '{url}'"
                )));
            }
        }
        if c.source_mime_type.trim().is_empty() {
            return Err(SpinsheetError::InvalidConfig(
                "source MIME type must not be empty".into(),
            ));
        }
        if let MethodPolicy::Redirect(ref location) = c.method_policy {
            if location.trim().is_empty() {
                return Err(SpinsheetError::InvalidConfig(
                    "redirect location must not be empty".into(),
                ));
            }
        }
        if c.request_timeout_secs == Some(0) {
            return Err(SpinsheetError::InvalidConfig(
                "request timeout must be ≥ 1 second".into(),
            ));
        }
        if c.max_upload_bytes == 0 {
            return Err(SpinsheetError::InvalidConfig(
                "max upload size must be at least 1 byte".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Answer for requests to `/upload` that are not `POST`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MethodPolicy {
    /// `405 Method Not Allowed` with `"<METHOD> not supported"`. (default)
    #[default]
    Reject,
    /// `303 See Other` to the given location, typically the upload form.
    Redirect(String),
}

/// How the report is written into the response body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    /// The presentation template. (default)
    #[default]
    Html,
    /// Plain-text dump of the decoded records.
    Text,
    /// The full report as JSON.
    Json,
}

impl FromStr for ResponseFormat {
    type Err = SpinsheetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "html" => Ok(ResponseFormat::Html),
            "text" | "txt" | "plain" => Ok(ResponseFormat::Text),
            "json" => Ok(ResponseFormat::Json),
            other => Err(SpinsheetError::InvalidConfig(format!(
                "unknown response format '{other}' (expected html, text or json)"
            ))),
        }
    }
}
