//! 前端静态文件服务

use crate::error::ApiResult;
use crate::state::AppState;
use axum::extract::State;
use axum::http::{header, Uri};
use axum::response::{IntoResponse, Response};
use radiate_core::{Result, TpsError};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::debug;

/// 前端页面，以 `/<page>.html` 提供
pub const HTML_PAGES: [&str; 6] = [
    "tutorial",
    "dashboard",
    "viewer-ct",
    "plan-create",
    "plan-results",
    "plan-compute",
];

/// 这些前缀下的未知路径不回落到静态文件
const API_PREFIXES: [&str; 11] = [
    "api", "patients", "ct", "roi", "dose", "results", "plans", "load_data", "uploads", "tutorial", "plotly",
];

/// 读取文件并按扩展名设置内容类型
pub async fn file_response(path: &Path) -> Result<Response> {
    let contents = fs::read(path)
        .await
        .map_err(|_| TpsError::not_found(format!("File not found: {}", file_label(path))))?;
    debug!("Serving {:?} ({} bytes)", path, contents.len());
    Ok(([(header::CONTENT_TYPE, guess_content_type(path))], contents).into_response())
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

pub async fn index(State(state): State<Arc<AppState>>) -> ApiResult<Response> {
    let path = state.config.storage.frontend_dir.join("index.html");
    if !fs::metadata(&path).await.map(|m| m.is_file()).unwrap_or(false) {
        return Err(TpsError::not_found("Index.html not found").into());
    }
    Ok(file_response(&path).await?)
}

/// `HTML_PAGES` 中的页面
pub async fn html_page(State(state): State<Arc<AppState>>, uri: Uri) -> ApiResult<Response> {
    let name = uri.path().trim_start_matches('/');
    let path = state.config.storage.frontend_dir.join(name);
    Ok(file_response(&path).await?)
}

/// 其余路径：API 前缀与 `.html` 返回 404，否则从前端目录读取
pub async fn fallback(State(state): State<Arc<AppState>>, uri: Uri) -> ApiResult<Response> {
    let path = uri.path();
    if is_reserved_path(path) {
        return Err(TpsError::not_found(format!("Not found: {}", path)).into());
    }
    let file = resolve_frontend_path(&state.config.storage.frontend_dir, path)
        .ok_or_else(|| TpsError::not_found(format!("Not found: {}", path)))?;
    Ok(file_response(&file).await?)
}

pub fn is_reserved_path(path: &str) -> bool {
    let path = path.trim_start_matches('/');
    if path.ends_with(".html") {
        return true;
    }
    API_PREFIXES.iter().any(|prefix| {
        path == *prefix
            || path
                .strip_prefix(prefix)
                .map(|rest| rest.starts_with('/'))
                .unwrap_or(false)
    })
}

/// 请求路径映射到前端目录，含 `..` 或为空时拒绝
pub fn resolve_frontend_path(root: &Path, request_path: &str) -> Option<PathBuf> {
    let relative = Path::new(request_path.trim_start_matches('/'));
    let mut resolved = root.to_path_buf();
    let mut parts = 0;
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                parts += 1;
            }
            Component::CurDir => {}
            _ => return None,
        }
    }
    (parts > 0).then_some(resolved)
}

/// 根据文件扩展名猜测内容类型
fn guess_content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("html") => "text/html",
        Some("css") => "text/css",
        Some("js") => "application/javascript",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("map") => "application/json",
        Some("txt") => "text/plain",
        Some("woff2") => "font/woff2",
        _ => "application/octet-stream",
    }
}
