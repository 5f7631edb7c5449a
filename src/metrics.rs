//! 可选的请求计数中间件与 Prometheus 文本输出。

use axum::body::Body as AxumBody;
use axum::extract::{Extension, MatchedPath};
use axum::http::{HeaderValue, Request, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::Arc;
use tokio::sync::Mutex;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Request counts keyed by `(method, endpoint)`.
#[derive(Debug, Default)]
pub struct RequestMetrics {
    counts: Mutex<BTreeMap<(String, String), u64>>,
}

impl RequestMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, method: &str, endpoint: &str) {
        let mut counts = self.counts.lock().await;
        *counts
            .entry((method.to_string(), endpoint.to_string()))
            .or_insert(0) += 1;
    }

    /// 以 Prometheus 文本格式输出计数。
    pub async fn render(&self) -> String {
        let counts = self.counts.lock().await;
        let mut out = String::new();
        out.push_str("# HELP http_requests_total Total HTTP requests by endpoint and method\n");
        out.push_str("# TYPE http_requests_total counter\n");
        for ((method, endpoint), count) in counts.iter() {
            let _ = writeln!(
                out,
                "http_requests_total{{method=\"{}\",endpoint=\"{}\"}} {}",
                escape_label(method),
                escape_label(endpoint),
                count
            );
        }
        out
    }
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// 统计请求次数；endpoint 取路由模板，避免按文件名无限增长。
pub async fn count_requests(request: Request<AxumBody>, next: Next) -> Response {
    if let Some(metrics) = request.extensions().get::<Arc<RequestMetrics>>().cloned() {
        let endpoint = request
            .extensions()
            .get::<MatchedPath>()
            .map(|path| path.as_str().to_string())
            .unwrap_or_else(|| "unmatched".to_string());
        metrics.record(request.method().as_str(), &endpoint).await;
    }
    next.run(request).await
}

/// `GET /metrics`
pub async fn metrics_handler(Extension(metrics): Extension<Arc<RequestMetrics>>) -> Response {
    let body = metrics.render().await;
    (
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static(PROMETHEUS_CONTENT_TYPE),
        )],
        body,
    )
        .into_response()
}
