//! 文件列表、上传、下载、删除与元数据读写处理器。

use axum::body::{Body as AxumBody, Bytes};
use axum::extract::{Extension, Multipart, Path};
use axum::extract::multipart::MultipartError;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json as JsonResponse, Response};
use futures_util::TryStreamExt;
use httpdate::fmt_http_date;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::{debug, info};

use crate::error::ApiError;
use crate::metadata::MetadataRecord;
use crate::sanitize::{SafeName, sanitize_name};
use crate::storage::FileRepository;

const UPLOAD_FIELD: &str = "file";

#[derive(Debug)]
pub struct UploadConfig {
    pub max_size: u64,
}

#[derive(Serialize)]
pub(crate) struct FileInfo {
    name: String,
    size: u64,
    mtime: u64,
    download_url: String,
    metadata: MetadataRecord,
}

#[derive(Serialize)]
pub(crate) struct ActionResponse {
    message: &'static str,
    file: String,
}

/// 列出所有文件及其元数据。
pub async fn list_files(
    Extension(repository): Extension<Arc<FileRepository>>,
) -> Result<JsonResponse<Vec<FileInfo>>, ApiError> {
    let entries = repository.list().await?;
    debug!(count = entries.len(), "list files");
    let files = entries
        .into_iter()
        .map(|entry| FileInfo {
            download_url: download_url(&entry.name),
            name: entry.name,
            size: entry.size,
            mtime: entry.mtime,
            metadata: entry.metadata,
        })
        .collect();
    Ok(JsonResponse(files))
}

/// 接收 multipart 中名为 `file` 的字段并流式写入存储。
pub async fn upload_file(
    Extension(repository): Extension<Arc<FileRepository>>,
    Extension(upload): Extension<Arc<UploadConfig>>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let raw_name = field.file_name().unwrap_or_default().to_string();
        if raw_name.trim().is_empty() {
            return Err(ApiError::BadRequest("empty file name".into()));
        }
        let name = sanitize_name(&raw_name)?;
        let reader = StreamReader::new(field.map_err(std::io::Error::other));
        let stored = repository.put(&name, reader, upload.max_size).await?;
        info!(name = stored.name, size = stored.size, "upload complete");
        return Ok((
            StatusCode::CREATED,
            JsonResponse(ActionResponse {
                message: "uploaded",
                file: stored.name,
            }),
        )
            .into_response());
    }
    Err(ApiError::BadRequest(
        "no file provided (field \"file\" missing)".into(),
    ))
}

/// 以附件形式流式下载文件。
pub async fn download_file(
    Path(raw_name): Path<String>,
    Extension(repository): Extension<Arc<FileRepository>>,
) -> Result<Response, ApiError> {
    let name = sanitize_name(&raw_name)?;
    let download = repository.get(&name).await?;
    let mime = mime_guess::from_path(name.as_str()).first_or_octet_stream();

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.essence_str())
            .map_err(|_| ApiError::Internal("无效的 MIME 类型".into()))?,
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(download.size));
    headers.insert(
        header::CONTENT_DISPOSITION,
        content_disposition(&name)
            .map_err(|_| ApiError::Internal("响应头构建失败".into()))?,
    );
    if let Some(modified) = download.modified {
        headers.insert(
            header::LAST_MODIFIED,
            HeaderValue::from_str(&fmt_http_date(modified))
                .map_err(|_| ApiError::Internal("响应头构建失败".into()))?,
        );
    }
    info!(name = %name, size = download.size, "download file");
    let stream = ReaderStream::new(download.file);
    Ok((StatusCode::OK, headers, AxumBody::from_stream(stream)).into_response())
}

/// 删除文件及其元数据。
pub async fn delete_file(
    Path(raw_name): Path<String>,
    Extension(repository): Extension<Arc<FileRepository>>,
) -> Result<JsonResponse<ActionResponse>, ApiError> {
    let name = sanitize_name(&raw_name)?;
    repository.delete(&name).await?;
    Ok(JsonResponse(ActionResponse {
        message: "deleted",
        file: name.to_string(),
    }))
}

/// 读取文件元数据（无记录时为空对象）。
pub async fn get_metadata(
    Path(raw_name): Path<String>,
    Extension(repository): Extension<Arc<FileRepository>>,
) -> Result<JsonResponse<MetadataRecord>, ApiError> {
    let name = sanitize_name(&raw_name)?;
    let record = repository.get_metadata(&name).await?;
    Ok(JsonResponse(record))
}

/// 替换文件元数据，请求体必须是 JSON 对象。
pub async fn set_metadata(
    Path(raw_name): Path<String>,
    Extension(repository): Extension<Arc<FileRepository>>,
    body: Bytes,
) -> Result<JsonResponse<ActionResponse>, ApiError> {
    let name = sanitize_name(&raw_name)?;
    let value: Value = serde_json::from_slice(&body)
        .map_err(|err| ApiError::BadRequest(format!("invalid JSON body: {err}")))?;
    repository.set_metadata(&name, value).await?;
    Ok(JsonResponse(ActionResponse {
        message: "metadata updated",
        file: name.to_string(),
    }))
}

fn download_url(name: &str) -> String {
    format!("/api/files/{name}/download")
}

fn content_disposition(name: &SafeName) -> Result<HeaderValue, header::InvalidHeaderValue> {
    if name.as_str().is_ascii() {
        return HeaderValue::from_str(&format!("attachment; filename=\"{name}\""));
    }
    let encoded: String = name
        .as_str()
        .bytes()
        .map(|byte| {
            if byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'_' | b'-') {
                (byte as char).to_string()
            } else {
                format!("%{byte:02X}")
            }
        })
        .collect();
    HeaderValue::from_str(&format!("attachment; filename*=UTF-8''{encoded}"))
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(err.body_text())
    } else {
        ApiError::BadRequest(err.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn download_url_points_at_download_route() {
        assert_eq!(download_url("report.pdf"), "/api/files/report.pdf/download");
    }

    #[test]
    fn content_disposition_encodes_non_ascii_names() {
        let ascii = sanitize_name("report.pdf").expect("name");
        assert_eq!(
            content_disposition(&ascii).expect("header"),
            "attachment; filename=\"report.pdf\""
        );

        let unicode = sanitize_name("relatório.pdf").expect("name");
        assert_eq!(
            content_disposition(&unicode).expect("header"),
            "attachment; filename*=UTF-8''relat%C3%B3rio.pdf"
        );
    }
}
