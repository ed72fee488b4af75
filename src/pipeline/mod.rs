//! Pipeline stages for spreadsheet-to-report conversion.
//!
//! Each submodule implements one step and is testable on its own.
//!
//! ## Data Flow
//!
//! ```text
//! drive ──▶ decode ──▶ aggregate ──▶ render
//! (upload,   (CSV rows)  (counts,     (HTML / text
//!  export)               extremes)     / JSON)
//! ```
//!
//! 1. [`drive`]    : upload with conversion, pick and rewrite the export
//!    link, download the CSV, trash the temporary document; the only stage
//!    with network I/O
//! 2. [`decode`]   : header-driven CSV decoding into typed records; runs
//!    in `spawn_blocking` when fed from a download (see [`crate::stream`])
//! 3. [`aggregate`]: per-studio and per-instructor counts, totals, extremes
//! 4. [`render`]   : fill the report template or dump text/JSON

pub mod aggregate;
pub mod decode;
pub mod drive;
pub mod render;
