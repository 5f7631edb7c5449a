//! 路由表：把 HTTP 接口挂到文件仓库上。

use axum::extract::{DefaultBodyLimit, Extension};
use axum::routing::get;
use axum::{Router, middleware};
use std::sync::Arc;

use crate::files::{self, UploadConfig};
use crate::metrics::{self, RequestMetrics};
use crate::storage::FileRepository;
use crate::{frontend, http, openapi, version};

/// Builds the application router. Request counting and `/metrics` are only
/// installed when `metrics` is provided.
pub fn build_router(
    repository: Arc<FileRepository>,
    upload: Arc<UploadConfig>,
    metrics: Option<Arc<RequestMetrics>>,
) -> Router {
    let mut app = Router::new()
        .route("/", get(frontend::index))
        .route("/ui", get(frontend::serve_ui))
        .route("/openapi.json", get(openapi::openapi_json))
        .route("/swagger", get(openapi::swagger_ui))
        .route("/api/version", get(version::get_version_info))
        .route(
            "/api/files",
            get(files::list_files)
                .post(files::upload_file)
                .layer(DefaultBodyLimit::disable()),
        )
        .route("/api/files/{name}/download", get(files::download_file))
        .route("/api/files/{name}", axum::routing::delete(files::delete_file))
        .route(
            "/api/files/{name}/metadata",
            get(files::get_metadata)
                .post(files::set_metadata)
                .put(files::set_metadata),
        );

    if let Some(metrics) = metrics {
        app = app
            .route("/metrics", get(metrics::metrics_handler))
            .layer(middleware::from_fn(metrics::count_requests))
            .layer(Extension(metrics));
    }

    app.layer(middleware::from_fn(http::add_security_headers))
        .layer(Extension(repository))
        .layer(Extension(upload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body as AxumBody;
    use axum::http::{Request, StatusCode, header};
    use axum::response::Response;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use std::time::Duration;
    use tempfile::tempdir;
    use tower::ServiceExt;

    const BOUNDARY: &str = "umdrive-test-boundary";

    async fn make_app(
        max_size: u64,
        metrics: Option<Arc<RequestMetrics>>,
    ) -> (tempfile::TempDir, Router) {
        let temp = tempdir().expect("tempdir");
        let repository = FileRepository::open(temp.path().join("storage"), Duration::from_secs(5))
            .await
            .expect("open repository");
        let app = build_router(
            Arc::new(repository),
            Arc::new(UploadConfig { max_size }),
            metrics,
        );
        (temp, app)
    }

    fn multipart_body(field: &str, filename: &str, contents: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(contents);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        body
    }

    async fn upload(app: &Router, field: &str, filename: &str, contents: &[u8]) -> Response {
        let request = Request::post("/api/files")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(AxumBody::from(multipart_body(field, filename, contents)))
            .expect("request");
        app.clone().oneshot(request).await.expect("response")
    }

    async fn send(app: &Router, method: &str, uri: &str, body: AxumBody) -> Response {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)
            .expect("request");
        app.clone().oneshot(request).await.expect("response")
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes()
            .to_vec()
    }

    async fn body_json(response: Response) -> Value {
        serde_json::from_slice(&body_bytes(response).await).expect("json body")
    }

    #[tokio::test]
    async fn report_round_trip_over_http() {
        let (_temp, app) = make_app(1024, None).await;

        let response = upload(&app, "file", "report.pdf", b"0123456789").await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(
            body_json(response).await,
            json!({"message": "uploaded", "file": "report.pdf"})
        );

        let response = send(&app, "GET", "/api/files", AxumBody::empty()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let listing = body_json(response).await;
        assert_eq!(listing.as_array().expect("array").len(), 1);
        assert_eq!(listing[0]["name"], "report.pdf");
        assert_eq!(listing[0]["size"], 10);
        assert_eq!(listing[0]["download_url"], "/api/files/report.pdf/download");
        assert_eq!(listing[0]["metadata"], json!({}));

        let response = send(
            &app,
            "POST",
            "/api/files/report.pdf/metadata",
            AxumBody::from(r#"{"tag":"final"}"#),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let response = send(&app, "GET", "/api/files/report.pdf/metadata", AxumBody::empty()).await;
        assert_eq!(body_json(response).await, json!({"tag": "final"}));

        let response = send(&app, "GET", "/api/files/report.pdf/download", AxumBody::empty()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).expect("content type"),
            "application/pdf"
        );
        assert_eq!(
            response
                .headers()
                .get(header::CONTENT_DISPOSITION)
                .expect("disposition"),
            "attachment; filename=\"report.pdf\""
        );
        assert_eq!(body_bytes(response).await, b"0123456789");

        let response = send(&app, "DELETE", "/api/files/report.pdf", AxumBody::empty()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({"message": "deleted", "file": "report.pdf"})
        );

        let response = send(&app, "GET", "/api/files/report.pdf/download", AxumBody::empty()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let response = send(&app, "GET", "/api/files/report.pdf/metadata", AxumBody::empty()).await;
        assert_eq!(body_json(response).await, json!({}));
    }

    #[tokio::test]
    async fn upload_rejects_missing_field_and_empty_name() {
        let (_temp, app) = make_app(1024, None).await;

        let response = upload(&app, "attachment", "a.txt", b"data").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = upload(&app, "file", "", b"data").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = upload(&app, "file", "../..", b"data").await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn oversized_upload_returns_413_and_lists_nothing() {
        let (_temp, app) = make_app(8, None).await;

        let response = upload(&app, "file", "big.bin", b"0123456789").await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let response = send(&app, "GET", "/api/files", AxumBody::empty()).await;
        assert_eq!(body_json(response).await, json!([]));
    }

    #[tokio::test]
    async fn traversal_names_never_leave_the_root() {
        let (temp, app) = make_app(1024, None).await;
        std::fs::write(temp.path().join("secret.txt"), b"secret").expect("outside file");

        let response = upload(&app, "file", "../secret.txt", b"inside").await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(
            body_json(response).await,
            json!({"message": "uploaded", "file": "secret.txt"})
        );
        assert_eq!(
            std::fs::read(temp.path().join("secret.txt")).expect("read"),
            b"secret"
        );

        let response = send(
            &app,
            "GET",
            "/api/files/..%2F..%2Fetc%2Fpasswd/download",
            AxumBody::empty(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = send(&app, "GET", "/api/files/..%2F../download", AxumBody::empty()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn metadata_write_requires_an_object() {
        let (_temp, app) = make_app(1024, None).await;

        for body in ["[1,2,3]", "\"text\"", "12", "{broken"] {
            let response = send(
                &app,
                "POST",
                "/api/files/a.txt/metadata",
                AxumBody::from(body),
            )
            .await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body {body}");
            assert!(body_json(response).await["error"].is_string());
        }

        let response = send(&app, "PUT", "/api/files/a.txt/metadata", AxumBody::from("{}")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn delete_missing_file_is_not_found() {
        let (_temp, app) = make_app(1024, None).await;
        let response = send(&app, "DELETE", "/api/files/nope.txt", AxumBody::empty()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await, json!({"error": "not found"}));
    }

    #[tokio::test]
    async fn metrics_count_requests_by_route_template() {
        let metrics = Arc::new(RequestMetrics::new());
        let (_temp, app) = make_app(1024, Some(metrics.clone())).await;

        send(&app, "GET", "/api/files", AxumBody::empty()).await;
        send(&app, "GET", "/api/files", AxumBody::empty()).await;
        send(&app, "GET", "/api/files/a.txt/metadata", AxumBody::empty()).await;

        let response = send(&app, "GET", "/metrics", AxumBody::empty()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let text = String::from_utf8(body_bytes(response).await).expect("utf8");
        assert!(text.contains("http_requests_total{method=\"GET\",endpoint=\"/api/files\"} 2"));
        assert!(text.contains(
            "http_requests_total{method=\"GET\",endpoint=\"/api/files/{name}/metadata\"} 1"
        ));
    }

    #[tokio::test]
    async fn metrics_route_absent_when_disabled() {
        let (_temp, app) = make_app(1024, None).await;
        let response = send(&app, "GET", "/metrics", AxumBody::empty()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn responses_carry_security_headers() {
        let (_temp, app) = make_app(1024, None).await;
        let response = send(&app, "GET", "/", AxumBody::empty()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("x-frame-options").expect("header"),
            "DENY"
        );
        assert_eq!(
            response
                .headers()
                .get("x-content-type-options")
                .expect("header"),
            "nosniff"
        );
    }
}
