//! OpenAPI 文档与 Swagger UI 页面。

use axum::response::{Html, Json as JsonResponse};
use serde_json::{Value, json};

const SWAGGER_HTML: &str = r#"<!doctype html>
<html>
  <head>
    <meta charset="utf-8"/>
    <title>UM Drive Swagger UI</title>
    <link rel="stylesheet" href="https://unpkg.com/swagger-ui-dist@4/swagger-ui.css" />
  </head>
  <body>
    <div id="swagger-ui"></div>
    <script src="https://unpkg.com/swagger-ui-dist@4/swagger-ui-bundle.js"></script>
    <script>
      SwaggerUIBundle({
        url: '/openapi.json',
        dom_id: '#swagger-ui',
        presets: [SwaggerUIBundle.presets.apis],
        layout: "BaseLayout"
      });
    </script>
  </body>
</html>
"#;

/// `GET /openapi.json`
pub async fn openapi_json() -> JsonResponse<Value> {
    JsonResponse(openapi_document())
}

/// `GET /swagger`
pub async fn swagger_ui() -> Html<&'static str> {
    Html(SWAGGER_HTML)
}

fn name_parameter() -> Value {
    json!({
        "name": "filename",
        "in": "path",
        "required": true,
        "schema": {"type": "string"}
    })
}

fn error_response(description: &str) -> Value {
    json!({
        "description": description,
        "content": {"application/json": {"schema": {"$ref": "#/components/schemas/Error"}}}
    })
}

pub fn openapi_document() -> Value {
    json!({
        "openapi": "3.0.3",
        "info": {
            "title": "UM Drive API",
            "version": env!("CARGO_PKG_VERSION"),
            "description": "List, upload, download and delete files with per-file JSON metadata."
        },
        "servers": [{"url": "/"}],
        "paths": {
            "/api/files": files_path(),
            "/api/files/{filename}/download": download_path(),
            "/api/files/{filename}": delete_path(),
            "/api/files/{filename}/metadata": metadata_path()
        },
        "components": {"schemas": schemas()}
    })
}

fn files_path() -> Value {
    let list = json!({
        "summary": "List files",
        "responses": {
            "200": {
                "description": "Files sorted by name",
                "content": {"application/json": {"schema": {
                    "type": "array",
                    "items": {"$ref": "#/components/schemas/FileInfo"}
                }}}
            }
        }
    });
    let upload = json!({
        "summary": "Upload a file (multipart/form-data)",
        "requestBody": {
            "required": true,
            "content": {"multipart/form-data": {"schema": {
                "type": "object",
                "properties": {"file": {"type": "string", "format": "binary"}},
                "required": ["file"]
            }}}
        },
        "responses": {
            "201": {"description": "File uploaded"},
            "400": error_response("Missing or invalid file"),
            "413": error_response("File too large")
        }
    });
    json!({"get": list, "post": upload})
}

fn download_path() -> Value {
    json!({
        "get": {
            "summary": "Download a file",
            "parameters": [name_parameter()],
            "responses": {
                "200": {
                    "description": "File contents",
                    "content": {"application/octet-stream": {"schema": {"type": "string", "format": "binary"}}}
                },
                "400": error_response("Invalid path"),
                "404": error_response("Not found")
            }
        }
    })
}

fn delete_path() -> Value {
    json!({
        "delete": {
            "summary": "Delete a file and its metadata",
            "parameters": [name_parameter()],
            "responses": {
                "200": {"description": "Deleted"},
                "404": error_response("Not found")
            }
        }
    })
}

fn metadata_path() -> Value {
    let read = json!({
        "summary": "Read metadata",
        "parameters": [name_parameter()],
        "responses": {
            "200": {
                "description": "Metadata object (empty when unset)",
                "content": {"application/json": {"schema": {"type": "object"}}}
            }
        }
    });
    let write = json!({
        "summary": "Replace metadata",
        "parameters": [name_parameter()],
        "requestBody": {
            "required": true,
            "content": {"application/json": {"schema": {"type": "object"}}}
        },
        "responses": {
            "200": {"description": "Metadata updated"},
            "400": error_response("Body is not a JSON object")
        }
    });
    json!({"get": read, "post": write.clone(), "put": write})
}

fn schemas() -> Value {
    json!({
        "FileInfo": {
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "size": {"type": "integer", "format": "int64"},
                "mtime": {"type": "integer", "format": "int64"},
                "download_url": {"type": "string"},
                "metadata": {"type": "object"}
            }
        },
        "Error": {
            "type": "object",
            "properties": {"error": {"type": "string"}}
        }
    })
}
