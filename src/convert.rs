//! The per-request pipeline: upload, locate export link, download, decode,
//! aggregate.
//!
//! ```text
//! Idle ─▶ Uploading ─▶ AwaitingExportLink ─▶ Downloading ─▶ Decoding
//!                                                              │
//!                                  Done ◀─ Rendering ◀─ Aggregating
//! ```
//!
//! Any stage may fail, which ends the request. Cleanup of the temporary
//! document is spawned as soon as the export download has started
//! successfully, so it runs whether or not decoding succeeds afterwards.
//! Rendering happens in the HTTP handler; everything up to `Aggregating`
//! lives here.

use crate::auth::{CredentialProvider, Transport};
use crate::config::ServiceConfig;
use crate::error::SpinsheetError;
use crate::output::ClassReport;
use crate::pipeline::aggregate::Aggregator;
use crate::pipeline::decode::RecordDecoder;
use crate::pipeline::drive::{CleanupHandle, ConversionClient, ConversionRequest};
use crate::stream::{self, RecordStream};
use futures::StreamExt;
use reqwest::Client;
use std::fmt;
use std::io::Read;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Where a request currently is in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Uploading,
    AwaitingExportLink,
    Downloading,
    Decoding,
    Aggregating,
    Rendering,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Idle => "idle",
            Stage::Uploading => "uploading",
            Stage::AwaitingExportLink => "awaiting export link",
            Stage::Downloading => "downloading",
            Stage::Decoding => "decoding",
            Stage::Aggregating => "aggregating",
            Stage::Rendering => "rendering",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Move `current` to `next`, logging the transition.
pub(crate) fn advance(current: &mut Stage, next: Stage) {
    debug!("Stage {} -> {}", current, next);
    *current = next;
}

/// Result of a successful pipeline run.
#[derive(Debug)]
pub struct Conversion {
    pub report: ClassReport,
    /// The detached trash call for the temporary document.
    pub cleanup: CleanupHandle,
    /// Stage the pipeline stopped in; the caller advances it through
    /// rendering.
    pub stage: Stage,
}

/// Build the HTTP client used for every storage API call.
pub fn build_http_client(config: &ServiceConfig) -> Result<Client, SpinsheetError> {
    let mut builder = Client::builder();
    if let Some(secs) = config.request_timeout_secs {
        builder = builder.timeout(Duration::from_secs(secs));
    }
    builder
        .build()
        .map_err(|e| SpinsheetError::Internal(format!("HTTP client: {e}")))
}

/// Run the pipeline for one uploaded file.
///
/// A transport is acquired from `credentials` once, before the first call.
///
/// # Errors
/// Every failure except cleanup aborts the request. See [`SpinsheetError`]
/// for the kinds.
pub async fn convert(
    request: ConversionRequest,
    config: &ServiceConfig,
    http: &Client,
    credentials: &dyn CredentialProvider,
) -> Result<Conversion, SpinsheetError> {
    let transport = Transport::acquire(http, credentials).await.map_err(|e| {
        error!("Conversion failed while {}: {}", Stage::Idle, e);
        e
    })?;
    let client = ConversionClient::new(transport, config);
    convert_with(&client, request).await
}

/// Run the pipeline with an already authorised client.
pub async fn convert_with(
    client: &ConversionClient,
    request: ConversionRequest,
) -> Result<Conversion, SpinsheetError> {
    let start = Instant::now();
    let mut stage = Stage::Idle;

    match run(client, request, &mut stage).await {
        Ok(conversion) => {
            info!(
                "Conversion complete: {} classes in {}ms",
                conversion.report.total_count,
                start.elapsed().as_millis()
            );
            Ok(conversion)
        }
        Err(e) => {
            error!("Conversion failed while {}: {}", stage, e);
            Err(e)
        }
    }
}

async fn run(
    client: &ConversionClient,
    request: ConversionRequest,
    stage: &mut Stage,
) -> Result<Conversion, SpinsheetError> {
    advance(stage, Stage::Uploading);
    let handle = client.upload(request).await?;

    advance(stage, Stage::AwaitingExportLink);
    let link = client.export_link(&handle)?;

    advance(stage, Stage::Downloading);
    let response = client.fetch_export(&link).await?;
    let cleanup = client.spawn_cleanup(&handle.id);

    advance(stage, Stage::Decoding);
    let report = aggregate_stream(stream::decode_response(response), stage).await?;

    Ok(Conversion {
        report,
        cleanup,
        stage: *stage,
    })
}

/// Drain a record stream into a report.
///
/// Records are folded into the aggregator as they arrive; the report is
/// only assembled once the stream has ended cleanly.
async fn aggregate_stream(
    mut records: RecordStream,
    stage: &mut Stage,
) -> Result<ClassReport, SpinsheetError> {
    let mut agg = Aggregator::new();
    let mut rows = Vec::new();
    while let Some(item) = records.next().await {
        let record = item?;
        agg.push(&record)?;
        rows.push(record);
    }

    advance(stage, Stage::Aggregating);
    debug!("Decoded {} records", agg.count());
    Ok(ClassReport::new(rows, agg.finish()))
}

/// Build a report from CSV text without touching the storage API.
///
/// Used by `spinsheet --inspect-csv` and handy in tests.
pub fn report_from_reader<R: Read>(reader: R) -> Result<ClassReport, SpinsheetError> {
    let mut agg = Aggregator::new();
    let mut rows = Vec::new();
    for item in RecordDecoder::new(reader)? {
        let record = item?;
        agg.push(&record)?;
        rows.push(record);
    }
    Ok(ClassReport::new(rows, agg.finish()))
}

/// [`report_from_reader`] over an in-memory CSV document.
pub fn report_from_csv(bytes: &[u8]) -> Result<ClassReport, SpinsheetError> {
    report_from_reader(bytes)
}
