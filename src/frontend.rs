//! 内嵌的管理界面与首页。

use axum::body::Body as AxumBody;
use axum::http::{HeaderMap, HeaderValue, header};
use axum::response::{Html, IntoResponse, Response};
use rust_embed::RustEmbed;

use crate::error::ApiError;

#[derive(RustEmbed)]
#[folder = "ui"]
/// 嵌入式界面资源。
pub struct UiAssets;

const INDEX_HTML: &str =
    "<h1>UM Drive</h1><p>Server is running. Open <a href=\"/ui\">/ui</a> or <a href=\"/swagger\">/swagger</a>.</p>";

/// `GET /`
pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// `GET /ui`
pub async fn serve_ui() -> Result<Response, ApiError> {
    load_embedded_asset("index.html")?.ok_or_else(|| ApiError::NotFound("not found".into()))
}

/// 加载指定路径的嵌入式资源。
fn load_embedded_asset(path: &str) -> Result<Option<Response>, ApiError> {
    let Some(asset) = UiAssets::get(path) else {
        return Ok(None);
    };
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.essence_str())
            .map_err(|_| ApiError::Internal("无效的 MIME 类型".into()))?,
    );
    Ok(Some(
        (headers, AxumBody::from(asset.data.into_owned())).into_response(),
    ))
}
