//! Response rendering: the HTML report page, a plain-text dump and JSON.
//!
//! The HTML template is a plain document with `{{name}}` placeholders. Each
//! name maps to a fragment computed from the [`ClassReport`]; a name the
//! renderer does not know is a [`RenderError`]. Rendering writes into the
//! output buffer as it goes, so on failure the buffer holds everything up
//! to the offending placeholder.

use crate::config::ResponseFormat;
use crate::error::{RenderError, SpinsheetError};
use crate::output::ClassReport;
use crate::record::{ClassRecord, Field};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// The report page compiled into the binary.
pub const EMBEDDED_TEMPLATE: &str = include_str!("report.html");

static RE_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").unwrap());

/// Names the HTML renderer can fill in.
pub const PLACEHOLDERS: &[&str] = &[
    "records",
    "studio_counts",
    "instructor_counts",
    "total_count",
    "total_power",
    "total_distance",
    "total_calories_low",
    "total_calories_high",
    "max_power",
    "min_power",
    "max_distance",
    "min_distance",
    "report_json",
];

/// An HTML template, shared across requests.
#[derive(Debug, Clone)]
pub struct Template {
    source: Arc<str>,
}

impl Template {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: Arc::from(source.into()),
        }
    }

    /// The embedded report page.
    pub fn embedded() -> Self {
        Self::new(EMBEDDED_TEMPLATE)
    }

    /// Read a template override from disk and check its placeholders.
    pub fn load(path: &Path) -> Result<Self, SpinsheetError> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            SpinsheetError::InvalidConfig(format!("cannot read template {}: {e}", path.display()))
        })?;
        let template = Self::new(source);
        template.check()?;
        Ok(template)
    }

    /// The configured override, or the embedded page.
    pub fn from_config(source: Option<&str>) -> Self {
        source.map(Self::new).unwrap_or_else(Self::embedded)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Fail on the first placeholder the renderer cannot fill.
    ///
    /// Lets a bad template override be rejected at startup instead of on
    /// every request.
    pub fn check(&self) -> Result<(), RenderError> {
        for cap in RE_PLACEHOLDER.captures_iter(&self.source) {
            let name = &cap[1];
            if !PLACEHOLDERS.contains(&name) {
                return Err(RenderError::UnknownPlaceholder {
                    name: name.to_string(),
                });
            }
        }
        Ok(())
    }
}

impl Default for Template {
    fn default() -> Self {
        Self::embedded()
    }
}

/// A response body plus any error hit while producing it.
#[derive(Debug)]
pub struct Rendered {
    pub body: String,
    pub content_type: &'static str,
    /// Set when rendering stopped early; `body` is then partial.
    pub error: Option<RenderError>,
}

/// Render `report` in `format`.
pub fn render(report: &ClassReport, format: ResponseFormat, template: &Template) -> Rendered {
    let mut body = String::new();
    let (content_type, result) = match format {
        ResponseFormat::Html => (
            "text/html; charset=utf-8",
            render_html(report, template, &mut body),
        ),
        ResponseFormat::Text => {
            render_text(&report.records, &mut body);
            ("text/plain; charset=utf-8", Ok(()))
        }
        ResponseFormat::Json => ("application/json", render_json(report, &mut body)),
    };
    if let Err(ref e) = result {
        warn!("render stopped after {} bytes: {}", body.len(), e);
    }
    Rendered {
        body,
        content_type,
        error: result.err(),
    }
}

// ── HTML ─────────────────────────────────────────────────────────────────

/// Fill `template` from `report`, appending to `out`.
pub fn render_html(
    report: &ClassReport,
    template: &Template,
    out: &mut String,
) -> Result<(), RenderError> {
    let source = template.source();
    let mut last = 0;
    for cap in RE_PLACEHOLDER.captures_iter(source) {
        let whole = cap.get(0).map(|m| m.range()).unwrap_or(0..0);
        out.push_str(&source[last..whole.start]);
        fill(&cap[1], report, out)?;
        last = whole.end;
    }
    out.push_str(&source[last..]);
    Ok(())
}

fn fill(name: &str, report: &ClassReport, out: &mut String) -> Result<(), RenderError> {
    match name {
        "records" => records_table(&report.records, out),
        "studio_counts" => counts_rows(&report.studio_counts, out),
        "instructor_counts" => counts_rows(&report.instructor_counts, out),
        "total_count" => push_display(out, report.total_count),
        "total_power" => push_display(out, report.totals.power),
        "total_distance" => push_display(out, report.totals.distance),
        "total_calories_low" => push_display(out, report.totals.calories_low),
        "total_calories_high" => push_display(out, report.totals.calories_high),
        "max_power" => push_extreme(out, report.maxima.power),
        "min_power" => push_extreme(out, report.minima.power),
        "max_distance" => push_extreme(out, report.maxima.distance),
        "min_distance" => push_extreme(out, report.minima.distance),
        "report_json" => {
            let json = serde_json::to_string(report)
                .map_err(|e| RenderError::Serialise(e.to_string()))?;
            // Keep `</script>` inside string values from closing the block.
            out.push_str(&json.replace("</", "<\\/"));
        }
        other => {
            return Err(RenderError::UnknownPlaceholder {
                name: other.to_string(),
            })
        }
    }
    Ok(())
}

fn records_table(records: &[ClassRecord], out: &mut String) {
    out.push_str("<tr>");
    for field in Field::ALL {
        out.push_str("<th>");
        escape_into(field.label(), out);
        out.push_str("</th>");
    }
    out.push_str("</tr>\n");

    for record in records {
        out.push_str("<tr>");
        for field in Field::ALL {
            if field.is_numeric() {
                out.push_str("<td class=\"num\">");
            } else {
                out.push_str("<td>");
            }
            escape_into(&cell(record, field), out);
            out.push_str("</td>");
        }
        out.push_str("</tr>\n");
    }
}

fn counts_rows(counts: &BTreeMap<String, u64>, out: &mut String) {
    for (name, count) in counts {
        out.push_str("<tr><th>");
        escape_into(name, out);
        let _ = writeln!(out, "</th><td class=\"num\">{count}</td></tr>");
    }
}

fn push_display(out: &mut String, value: impl std::fmt::Display) {
    let _ = write!(out, "{value}");
}

fn push_extreme(out: &mut String, value: Option<i64>) {
    match value {
        Some(v) => push_display(out, v),
        None => out.push_str("n/a"),
    }
}

/// Escape text for an HTML element body or a quoted attribute.
pub fn escape_into(text: &str, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
}

// ── Text and JSON ────────────────────────────────────────────────────────

/// Tab-separated dump: a header line of column labels, then one line per
/// record.
pub fn render_text(records: &[ClassRecord], out: &mut String) {
    let labels: Vec<&str> = Field::ALL.iter().map(|f| f.label()).collect();
    out.push_str(&labels.join("\t"));
    out.push('\n');
    for record in records {
        let cells: Vec<String> = Field::ALL
            .iter()
            .map(|f| cell(record, *f).replace(['\t', '\n'], " "))
            .collect();
        out.push_str(&cells.join("\t"));
        out.push('\n');
    }
}

/// The whole report as pretty-printed JSON.
pub fn render_json(report: &ClassReport, out: &mut String) -> Result<(), RenderError> {
    let json =
        serde_json::to_string_pretty(report).map_err(|e| RenderError::Serialise(e.to_string()))?;
    out.push_str(&json);
    out.push('\n');
    Ok(())
}

/// Display text of one field of a record.
fn cell(record: &ClassRecord, field: Field) -> String {
    match field {
        Field::Date => record.date.clone().unwrap_or_default(),
        Field::Time => record.time.clone(),
        Field::Classroom => record.classroom.clone(),
        Field::Instructor => record.instructor.clone(),
        Field::AvgRpm => record.avg_rpm.to_string(),
        Field::MaxRpm => record.max_rpm.to_string(),
        Field::AvgTorque => record.avg_torque.to_string(),
        Field::MaxTorque => record.max_torque.to_string(),
        Field::AvgSpeed => record.avg_speed.to_string(),
        Field::ClassTime => record.class_time_minutes.to_string(),
        Field::TotalPower => record.total_power.to_string(),
        Field::TotalDistance => record.total_distance.to_string(),
        Field::CaloriesLow => record.estimated_calories_low.to_string(),
        Field::CaloriesHigh => record.estimated_calories_high.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::aggregate::summarise;

    fn report() -> ClassReport {
        let records = vec![
            ClassRecord {
                classroom: "A".into(),
                instructor: "Jane".into(),
                total_power: 100,
                total_distance: 5,
                ..Default::default()
            },
            ClassRecord {
                classroom: "B".into(),
                instructor: "Jane".into(),
                total_power: 200,
                total_distance: 15,
                ..Default::default()
            },
        ];
        let stats = summarise(&records).unwrap();
        ClassReport::new(records, stats)
    }

    #[test]
    fn embedded_template_only_uses_known_placeholders() {
        Template::embedded().check().unwrap();
    }

    #[test]
    fn template_loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"<b>{{total_count}}</b>").unwrap();
        let t = Template::load(file.path()).unwrap();
        let mut out = String::new();
        render_html(&report(), &t, &mut out).unwrap();
        assert_eq!(out, "<b>2</b>");
    }

    #[test]
    fn template_file_with_unknown_placeholder_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"{{studio}}").unwrap();
        assert!(matches!(
            Template::load(file.path()),
            Err(SpinsheetError::Render(RenderError::UnknownPlaceholder { .. }))
        ));
        assert!(matches!(
            Template::load(Path::new("/nonexistent/report.html")),
            Err(SpinsheetError::InvalidConfig(_))
        ));
    }

    #[test]
    fn html_fills_placeholders() {
        let t = Template::new("<p>{{total_count}} / {{ max_power }} / {{min_power}}</p>");
        let mut out = String::new();
        render_html(&report(), &t, &mut out).unwrap();
        assert_eq!(out, "<p>2 / 200 / 100</p>");
    }

    #[test]
    fn html_empty_report_has_no_extremes() {
        let t = Template::new("{{max_power}}|{{min_distance}}|{{total_count}}");
        let mut out = String::new();
        render_html(&ClassReport::default(), &t, &mut out).unwrap();
        assert_eq!(out, "n/a|n/a|0");
    }

    #[test]
    fn embedded_page_renders_counts() {
        let rendered = render(&report(), ResponseFormat::Html, &Template::embedded());
        assert!(rendered.error.is_none());
        assert!(rendered.body.contains("<h1>2 classes</h1>"));
        assert!(rendered.body.contains("<tr><th>Jane</th><td class=\"num\">2</td></tr>"));
        assert!(!rendered.body.contains("{{"));
    }

    #[test]
    fn unknown_placeholder_keeps_partial_output() {
        let t = Template::new("before {{total_count}} {{nope}} after");
        let rendered = render(&report(), ResponseFormat::Html, &t);
        assert_eq!(rendered.body, "before 2 ");
        assert_eq!(
            rendered.error,
            Some(RenderError::UnknownPlaceholder {
                name: "nope".into()
            })
        );
        assert!(t.check().is_err());
    }

    #[test]
    fn text_is_escaped_in_html() {
        let mut r = report();
        r.records[0].instructor = "<b>Jane & Co</b>".into();
        let mut out = String::new();
        render_html(&r, &Template::new("{{records}}"), &mut out).unwrap();
        assert!(out.contains("&lt;b&gt;Jane &amp; Co&lt;/b&gt;"));
        assert!(!out.contains("<b>"));
    }

    #[test]
    fn report_json_cannot_close_script() {
        let mut r = report();
        r.records[0].classroom = "</script><script>alert(1)".into();
        let mut out = String::new();
        render_html(&r, &Template::new("{{report_json}}"), &mut out).unwrap();
        assert!(!out.contains("</script>"));
    }

    #[test]
    fn text_has_one_line_per_record() {
        let mut out = String::new();
        render_text(&report().records, &mut out);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Date\tTime\tClassroom"));
        assert!(lines[2].contains("\tB\tJane\t"));
    }

    #[test]
    fn json_round_trips() {
        let r = report();
        let rendered = render(&r, ResponseFormat::Json, &Template::embedded());
        assert_eq!(rendered.content_type, "application/json");
        let back: ClassReport = serde_json::from_str(&rendered.body).unwrap();
        assert_eq!(back, r);
    }
}
