//! # spinsheet
//!
//! Turn an uploaded spreadsheet of indoor-cycling class metrics into a
//! per-studio, per-instructor report.
//!
//! The spreadsheet is not parsed locally. It is uploaded to Google Drive
//! with conversion enabled, exported back as CSV, decoded row by row into
//! [`ClassRecord`]s and summarised. The temporary Drive document is trashed
//! once the export has been fetched.
//!
//! ## Pipeline Overview
//!
//! ```text
//! POST /upload (file)
//!  │
//!  ├─ 1. Upload    POST to Drive with convert=true
//!  ├─ 2. Link      exportLinks["application/pdf"], first "=pdf" → "=csv"
//!  ├─ 3. Download  GET the CSV export; cleanup spawned
//!  ├─ 4. Decode    header-driven CSV rows, streamed (spawn_blocking)
//!  ├─ 5. Aggregate counts, totals, extremes
//!  └─ 6. Render    HTML template, text or JSON
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use spinsheet::{serve, AppState, ServiceConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Credentials from SPINSHEET_ACCESS_TOKEN or the refresh-token trio
//!     let config = ServiceConfig::builder()
//!         .bind_addr("0.0.0.0:8080".parse()?)
//!         .build()?;
//!     serve(AppState::new(config)?).await?;
//!     Ok(())
//! }
//! ```
//!
//! Offline, a CSV export can be summarised directly:
//!
//! ```rust
//! let csv = "Classroom,Instructor,Total Power\nA,Jane,100\nB,Jane,200\n";
//! let report = spinsheet::report_from_csv(csv.as_bytes()).unwrap();
//! assert_eq!(report.totals.power, 300);
//! assert_eq!(report.instructor_counts["Jane"], 2);
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `spinsheet` binary (clap + anyhow + tracing-subscriber) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod auth;
pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod record;
pub mod server;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use auth::{CredentialProvider, RefreshTokenProvider, StaticToken, Transport};
pub use config::{MethodPolicy, ResponseFormat, ServiceConfig, ServiceConfigBuilder};
pub use convert::{
    build_http_client, convert, convert_with, report_from_csv, report_from_reader, Conversion,
    Stage,
};
pub use error::{DecodeError, RenderError, SpinsheetError};
pub use output::{ClassReport, Extremes, SummaryStats, Totals};
pub use pipeline::drive::{CleanupHandle, ConversionClient, ConversionRequest};
pub use pipeline::render::{render, Rendered, Template};
pub use record::{ClassRecord, Field};
pub use server::{build_router, serve, AppState};
pub use stream::RecordStream;
