//! CLI binary for spinsheet.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ServiceConfig` and starts the upload server, or renders a local CSV
//! export with `--inspect-csv`.

use anyhow::{bail, Context, Result};
use clap::Parser;
use spinsheet::{
    render, report_from_reader, serve, AppState, MethodPolicy, ResponseFormat, ServiceConfig,
    Template,
};
use std::fs::File;
use std::io::{self, BufReader, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"CREDENTIALS:
  Either a fixed bearer token:
    SPINSHEET_ACCESS_TOKEN=ya29....
  or an OAuth2 refresh-token grant:
    SPINSHEET_CLIENT_ID=...  SPINSHEET_CLIENT_SECRET=...  SPINSHEET_REFRESH_TOKEN=...

EXAMPLES:
  spinsheet --bind 0.0.0.0:8080
  curl -F file=@classes.xls 'http://localhost:8080/upload?format=json'
  spinsheet --inspect-csv export.csv --format text
"#;

/// Upload class-metrics spreadsheets and render per-studio statistics.
#[derive(Parser, Debug)]
#[command(
    name = "spinsheet",
    version,
    about = "Upload class-metrics spreadsheets and render per-studio statistics",
    long_about = "Serves POST /upload. Each uploaded spreadsheet is converted through Google \
Drive, downloaded back as CSV, decoded into class records and summarised per studio and \
instructor.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Address to listen on.
    #[arg(long, env = "SPINSHEET_BIND", default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    /// Upload endpoint, including `convert=true`.
    #[arg(long, env = "SPINSHEET_UPLOAD_URL")]
    upload_url: Option<String>,

    /// Base URL of the storage metadata API.
    #[arg(long, env = "SPINSHEET_API_BASE")]
    api_base: Option<String>,

    /// OAuth2 token endpoint for refresh-token credentials.
    #[arg(long, env = "SPINSHEET_TOKEN_URL")]
    token_url: Option<String>,

    /// Content type the upload is declared as.
    #[arg(long, env = "SPINSHEET_SOURCE_MIME")]
    source_mime: Option<String>,

    /// Default response format: html, text, json.
    #[arg(long, env = "SPINSHEET_FORMAT", value_enum, default_value = "html")]
    format: FormatArg,

    /// Redirect non-POST requests on /upload here instead of answering 405.
    #[arg(long, env = "SPINSHEET_REDIRECT")]
    redirect_wrong_method: Option<String>,

    /// HTML template replacing the built-in report page.
    #[arg(long, env = "SPINSHEET_TEMPLATE")]
    template: Option<PathBuf>,

    /// Per-call timeout for storage API requests, in seconds.
    #[arg(long, env = "SPINSHEET_TIMEOUT")]
    timeout: Option<u64>,

    /// Largest accepted upload body, in bytes (default 32 MiB).
    #[arg(long, env = "SPINSHEET_MAX_UPLOAD_BYTES")]
    max_upload_bytes: Option<usize>,

    /// Render a local CSV export and exit; no server, no credentials.
    #[arg(long, value_name = "CSV")]
    inspect_csv: Option<PathBuf>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "SPINSHEET_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "SPINSHEET_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum FormatArg {
    Html,
    Text,
    Json,
}

impl From<FormatArg> for ResponseFormat {
    fn from(v: FormatArg) -> Self {
        match v {
            FormatArg::Html => ResponseFormat::Html,
            FormatArg::Text => ResponseFormat::Text,
            FormatArg::Json => ResponseFormat::Json,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let template = match cli.template {
        Some(ref path) => Template::load(path).context("Failed to load template")?,
        None => Template::embedded(),
    };

    // ── Inspect mode ─────────────────────────────────────────────────────
    if let Some(ref path) = cli.inspect_csv {
        let file =
            File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let report = report_from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to decode {}", path.display()))?;

        let rendered = render(&report, cli.format.into(), &template);
        if let Some(e) = rendered.error {
            bail!("Render failed: {e}");
        }
        io::stdout()
            .lock()
            .write_all(rendered.body.as_bytes())
            .context("Failed to write to stdout")?;

        if !cli.quiet {
            eprintln!(
                "{}  {} classes  {}",
                green("✔"),
                report.total_count,
                dim(&format!("total power {}", report.totals.power)),
            );
        }
        return Ok(());
    }

    // ── Serve ────────────────────────────────────────────────────────────
    let template_source = cli.template.is_some().then(|| template.source().to_string());
    let config = build_config(&cli, template_source)?;
    let state = AppState::new(config).context("Failed to start")?;
    serve(state).await.context("Server stopped")?;
    Ok(())
}

fn build_config(cli: &Cli, template_source: Option<String>) -> Result<ServiceConfig> {
    let mut builder = ServiceConfig::builder()
        .bind_addr(cli.bind)
        .response_format(cli.format.into());

    if let Some(ref url) = cli.upload_url {
        builder = builder.upload_url(url);
    }
    if let Some(ref url) = cli.api_base {
        builder = builder.api_base(url);
    }
    if let Some(ref url) = cli.token_url {
        builder = builder.token_url(url);
    }
    if let Some(ref mime) = cli.source_mime {
        builder = builder.source_mime_type(mime);
    }
    if let Some(ref location) = cli.redirect_wrong_method {
        builder = builder.method_policy(MethodPolicy::Redirect(location.clone()));
    }
    if let Some(source) = template_source {
        builder = builder.template_source(source);
    }
    if let Some(secs) = cli.timeout {
        builder = builder.request_timeout_secs(secs);
    }
    if let Some(bytes) = cli.max_upload_bytes {
        builder = builder.max_upload_bytes(bytes);
    }

    builder.build().context("Invalid configuration")
}
