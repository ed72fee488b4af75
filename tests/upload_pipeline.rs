//! Integration tests for the upload pipeline.
//!
//! A `wiremock` server stands in for the Drive upload, export and trash
//! endpoints; the router is driven in-process with `tower::ServiceExt::
//! oneshot`, so no socket is bound and no real credentials are needed.
//!
//! Run with:
//!   cargo test --test upload_pipeline -- --nocapture

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use spinsheet::{
    build_router, convert_with, report_from_csv, AppState, ClassRecord, ConversionClient,
    ConversionRequest, Field, MethodPolicy, ServiceConfig, Stage, StaticToken, Transport,
};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::matchers::{body_string, header as header_is, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Test helpers ─────────────────────────────────────────────────────────────

const TOKEN: &str = "test-token";
const DOC_ID: &str = "doc1";
const SHEET: &str = "pretend this is an xls file";

fn config_for(server: &MockServer) -> ServiceConfig {
    ServiceConfig::builder()
        .upload_url(format!(
            "{}/upload/drive/v2/files?uploadType=media&convert=true",
            server.uri()
        ))
        .api_base(format!("{}/drive/v2", server.uri()))
        .credentials(Arc::new(StaticToken::new(TOKEN)))
        .build()
        .unwrap()
}

fn app_for(server: &MockServer) -> axum::Router {
    build_router(AppState::new(config_for(server)).unwrap())
}

fn export_link(server: &MockServer) -> String {
    format!("{}/export?id={DOC_ID}&exportFormat=pdf", server.uri())
}

/// Mount the upload endpoint answering with `links` as `exportLinks`.
async fn mount_upload(server: &MockServer, links: Value) {
    Mock::given(method("POST"))
        .and(path("/upload/drive/v2/files"))
        .and(query_param("convert", "true"))
        .and(header_is("authorization", "Bearer test-token"))
        .and(header_is("content-type", "application/vnd.ms-excel"))
        .and(body_string(SHEET))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "kind": "drive#file",
            "id": DOC_ID,
            "exportLinks": links,
        })))
        .mount(server)
        .await;
}

async fn mount_export(server: &MockServer, csv: &str) {
    Mock::given(method("GET"))
        .and(path("/export"))
        .and(query_param("exportFormat", "csv"))
        .and(header_is("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_string(csv))
        .mount(server)
        .await;
}

async fn mount_trash(server: &MockServer, status: u16) {
    Mock::given(method("POST"))
        .and(path(format!("/drive/v2/files/{DOC_ID}/trash")))
        .respond_with(ResponseTemplate::new(status).set_body_json(json!({ "id": DOC_ID })))
        .mount(server)
        .await;
}

/// Mount upload, export and trash for a successful run over `csv`.
async fn mount_happy_path(server: &MockServer, csv: &str) {
    mount_upload(server, json!({ "application/pdf": export_link(server) })).await;
    mount_export(server, csv).await;
    mount_trash(server, 200).await;
}

fn multipart_upload(uri: &str, file: &str) -> Request<Body> {
    let boundary = "spinsheet-test-boundary";
    let body = format!(
        "--{boundary}\r\n\
         Content-Disposition: form-data; name=\"file\"; filename=\"classes.xls\"\r\n\
         Content-Type: application/vnd.ms-excel\r\n\
         \r\n\
         {file}\r\n\
         --{boundary}--\r\n"
    );
    Request::post(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn send(app: axum::Router, request: Request<Body>) -> (StatusCode, String) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

/// Paths the mock server has seen so far.
async fn seen_paths(server: &MockServer) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .map(|r| r.url.path().to_string())
        .collect()
}

/// The trash call is detached from the response; poll for it.
async fn trash_was_called(server: &MockServer) -> bool {
    let trash = format!("/drive/v2/files/{DOC_ID}/trash");
    for _ in 0..100 {
        if seen_paths(server).await.contains(&trash) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

// ── Happy path ───────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn two_classes_summarised_as_json() {
    let server = MockServer::start().await;
    mount_happy_path(
        &server,
        "Classroom,Instructor,Total Power,Total Distance\nA,Jane,100,5\nB,Jane,200,15\n",
    )
    .await;

    let (status, body) = send(app_for(&server), multipart_upload("/upload?format=json", SHEET)).await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let report: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(report["totalCount"], 2);
    assert_eq!(report["studioCounts"], json!({ "A": 1, "B": 1 }));
    assert_eq!(report["instructorCounts"], json!({ "Jane": 2 }));
    assert_eq!(report["totals"]["power"], 300);
    assert_eq!(report["totals"]["distance"], 20);
    assert_eq!(report["totals"]["classCount"], 2);
    assert_eq!(report["maxima"]["power"], 200);
    assert_eq!(report["minima"]["power"], 100);
    assert_eq!(report["records"][1]["classroom"], "B");

    assert!(trash_was_called(&server).await, "temporary document not trashed");
}

#[tokio::test(flavor = "multi_thread")]
async fn html_is_the_default_format() {
    let server = MockServer::start().await;
    mount_happy_path(&server, "Classroom,Instructor,Total Power\nA,Jane,100\n").await;

    let response = app_for(&server)
        .oneshot(multipart_upload("/upload", SHEET))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/html; charset=utf-8"
    );
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let html = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(html.contains("<h1>1 classes</h1>"));
    assert!(html.contains("<tr><th>Jane</th><td class=\"num\">1</td></tr>"));
}

#[tokio::test(flavor = "multi_thread")]
async fn header_only_export_renders_empty_report() {
    let server = MockServer::start().await;
    mount_happy_path(&server, "Classroom,Instructor,Total Power,Total Distance\n").await;

    let (status, html) = send(app_for(&server), multipart_upload("/upload", SHEET)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(html.contains("<h1>0 classes</h1>"));
    assert!(html.contains("n/a"), "extremes should be unset");
    assert!(!html.contains("{{"));
}

#[tokio::test(flavor = "multi_thread")]
async fn urlencoded_text_upload_is_accepted() {
    let server = MockServer::start().await;
    mount_happy_path(&server, "Classroom,Instructor,Total Power\nA,Jane,100\nA,Raj,50\n").await;

    let request = Request::post("/upload?format=text")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from("file=pretend+this+is+an+xls+file"))
        .unwrap();
    let (status, text) = send(app_for(&server), request).await;
    assert_eq!(status, StatusCode::OK, "{text}");
    assert_eq!(text.lines().count(), 3);
    assert!(text.contains("\tA\tRaj\t"));
}

#[tokio::test(flavor = "multi_thread")]
async fn upload_above_two_mib_reaches_storage() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload/drive/v2/files"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": DOC_ID,
            "exportLinks": { "application/pdf": export_link(&server) },
        })))
        .mount(&server)
        .await;
    mount_export(&server, "Classroom,Total Power\nA,1\n").await;
    mount_trash(&server, 200).await;

    let sheet = "x".repeat(3 * 1024 * 1024);
    let (status, body) = send(app_for(&server), multipart_upload("/upload?format=json", &sheet)).await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let received = server.received_requests().await.unwrap();
    let upload = received
        .iter()
        .find(|r| r.url.path() == "/upload/drive/v2/files")
        .unwrap();
    assert_eq!(upload.body.len(), sheet.len());
}

#[tokio::test(flavor = "multi_thread")]
async fn trash_failure_does_not_affect_response() {
    let server = MockServer::start().await;
    mount_upload(&server, json!({ "application/pdf": export_link(&server) })).await;
    mount_export(&server, "Classroom,Total Power\nA,1\n").await;
    mount_trash(&server, 500).await;

    let (status, _) = send(app_for(&server), multipart_upload("/upload?format=json", SHEET)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(trash_was_called(&server).await);
}

// ── Failure paths ────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn missing_export_link_is_server_error() {
    let server = MockServer::start().await;
    mount_upload(&server, json!({ "text/csv": "https://elsewhere/x" })).await;

    let (status, body) = send(app_for(&server), multipart_upload("/upload", SHEET)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.contains("no export link"), "{body}");

    let paths = seen_paths(&server).await;
    assert_eq!(paths, vec!["/upload/drive/v2/files".to_string()]);
}

#[tokio::test(flavor = "multi_thread")]
async fn upload_rejection_echoes_upstream_body() {
    let server = MockServer::start().await;
    let upstream = r#"{"error":{"code":403,"message":"The user has exceeded their Drive storage quota"}}"#;
    Mock::given(method("POST"))
        .and(path("/upload/drive/v2/files"))
        .respond_with(ResponseTemplate::new(403).set_body_string(upstream))
        .mount(&server)
        .await;

    let (status, body) = send(app_for(&server), multipart_upload("/upload", SHEET)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, upstream);
}

#[tokio::test(flavor = "multi_thread")]
async fn export_rejection_echoes_body_without_cleanup() {
    let server = MockServer::start().await;
    mount_upload(&server, json!({ "application/pdf": export_link(&server) })).await;
    Mock::given(method("GET"))
        .and(path("/export"))
        .respond_with(ResponseTemplate::new(404).set_body_string("export not ready"))
        .mount(&server)
        .await;
    mount_trash(&server, 200).await;

    let (status, body) = send(app_for(&server), multipart_upload("/upload", SHEET)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, "export not ready");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!seen_paths(&server).await.iter().any(|p| p.ends_with("/trash")));
}

#[tokio::test(flavor = "multi_thread")]
async fn bad_row_fails_request_but_still_cleans_up() {
    let server = MockServer::start().await;
    mount_happy_path(&server, "Classroom,Total Power\nA,100\nB,lots\nC,300\n").await;

    let (status, body) = send(app_for(&server), multipart_upload("/upload", SHEET)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.contains("line 3"), "{body}");
    assert!(body.contains("Total Power"), "{body}");
    assert!(trash_was_called(&server).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn unreachable_upload_endpoint_is_transport_error() {
    let server = MockServer::start().await;
    mount_trash(&server, 200).await;

    // Bind then drop a listener so the port is known to be closed.
    let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = closed.local_addr().unwrap().port();
    drop(closed);

    let config = ServiceConfig::builder()
        .upload_url(format!(
            "http://127.0.0.1:{port}/upload/drive/v2/files?uploadType=media&convert=true"
        ))
        .api_base(format!("{}/drive/v2", server.uri()))
        .credentials(Arc::new(StaticToken::new(TOKEN)))
        .build()
        .unwrap();
    let app = build_router(AppState::new(config).unwrap());

    let (status, body) = send(app, multipart_upload("/upload", SHEET)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.starts_with("upload request failed:"), "{body}");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(seen_paths(&server).await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn export_connection_drop_is_transport_error() {
    let server = MockServer::start().await;

    let closed = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = closed.local_addr().unwrap().port();
    drop(closed);
    let dead_link = format!("http://127.0.0.1:{port}/export?id={DOC_ID}&exportFormat=pdf");

    mount_upload(&server, json!({ "application/pdf": dead_link })).await;
    mount_trash(&server, 200).await;

    let (status, body) = send(app_for(&server), multipart_upload("/upload", SHEET)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.starts_with("export request failed:"), "{body}");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!seen_paths(&server).await.iter().any(|p| p.ends_with("/trash")));
}

#[tokio::test(flavor = "multi_thread")]
async fn undecodable_upload_response_is_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload/drive/v2/files"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>captive portal</html>"))
        .mount(&server)
        .await;

    let (status, body) = send(app_for(&server), multipart_upload("/upload", SHEET)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.starts_with("unexpected upload response"), "{body}");
}

// ── Method policy ────────────────────────────────────────────────────────────

#[tokio::test]
async fn get_upload_makes_no_upstream_calls() {
    let server = MockServer::start().await;

    let (status, body) = send(
        app_for(&server),
        Request::get("/upload").body(Body::empty()).unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body, "GET not supported");
    assert!(seen_paths(&server).await.is_empty());
}

#[tokio::test]
async fn redirect_policy_sends_see_other() {
    let server = MockServer::start().await;
    let config = ServiceConfig::builder()
        .api_base(format!("{}/drive/v2", server.uri()))
        .method_policy(MethodPolicy::Redirect("/".into()))
        .credentials(Arc::new(StaticToken::new(TOKEN)))
        .build()
        .unwrap();
    let app = build_router(AppState::new(config).unwrap());

    let response = app
        .oneshot(Request::get("/upload").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(response.headers()[header::LOCATION], "/");
    assert!(seen_paths(&server).await.is_empty());
}

// ── Library entry points ─────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread")]
async fn convert_with_returns_awaitable_cleanup() {
    let server = MockServer::start().await;
    mount_upload(&server, json!({ "application/pdf": export_link(&server) })).await;
    mount_export(&server, "Classroom,Instructor,Total Power\nA,Jane,10\n").await;
    Mock::given(method("POST"))
        .and(path(format!("/drive/v2/files/{DOC_ID}/trash")))
        .and(header_is("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let config = config_for(&server);
    let client = ConversionClient::new(Transport::new(reqwest::Client::new(), TOKEN), &config);
    let conversion = convert_with(
        &client,
        ConversionRequest {
            bytes: SHEET.into(),
            content_type: config.source_mime_type.clone(),
        },
    )
    .await
    .unwrap();

    assert_eq!(conversion.report.total_count, 1);
    assert_eq!(conversion.report.totals.power, 10);
    assert_eq!(conversion.stage, Stage::Aggregating);
    conversion.cleanup.wait().await;
}

#[test]
fn records_written_with_sheet_headers_decode_back() {
    let records = vec![
        ClassRecord {
            date: Some("2014-01-06".into()),
            time: "6:00 AM".into(),
            classroom: "Studio A".into(),
            instructor: "Jane, PhD".into(),
            avg_rpm: 85,
            max_rpm: 120,
            avg_torque: 30,
            max_torque: 55,
            avg_speed: 22,
            class_time_minutes: 45.5,
            total_power: 310,
            total_distance: 18,
            estimated_calories_low: 400,
            estimated_calories_high: 520,
        },
        ClassRecord {
            date: None,
            time: "7:15 PM".into(),
            classroom: "Studio \"B\"".into(),
            instructor: "Raj".into(),
            total_power: -3,
            ..Default::default()
        },
    ];

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(Field::ALL.iter().map(|f| f.label()))
        .unwrap();
    for r in &records {
        writer
            .write_record([
                r.date.clone().unwrap_or_default(),
                r.time.clone(),
                r.classroom.clone(),
                r.instructor.clone(),
                r.avg_rpm.to_string(),
                r.max_rpm.to_string(),
                r.avg_torque.to_string(),
                r.max_torque.to_string(),
                r.avg_speed.to_string(),
                r.class_time_minutes.to_string(),
                r.total_power.to_string(),
                r.total_distance.to_string(),
                r.estimated_calories_low.to_string(),
                r.estimated_calories_high.to_string(),
            ])
            .unwrap();
    }
    let bytes = writer.into_inner().unwrap();

    let report = report_from_csv(&bytes).unwrap();
    assert_eq!(report.records, records);
    assert_eq!(report.totals.class_count, 2);
    assert_eq!(report.maxima.power, Some(310));
    assert_eq!(report.minima.power, Some(-3));
}
