use axum::{
    extract::{multipart::MultipartRejection, Json, Multipart, State},
    http::{
        header::{
            CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_TYPE, ETAG, X_CONTENT_TYPE_OPTIONS,
        },
        HeaderMap, HeaderValue, StatusCode,
    },
};
use serde::Serialize;
use tracing::warn;

use super::ResourcePath;
use crate::auth::AuthenticatedUser;
use crate::board_files::UploadRequest;
use crate::error::{AppError, AppResult};
use crate::models::BoardFile;
use crate::state::AppState;

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Types a browser would render or execute in the API's origin.
const ACTIVE_CONTENT_TYPES: &[&str] = &[
    "text/html",
    "application/xhtml+xml",
    "image/svg+xml",
    "text/xml",
    "application/xml",
    "text/javascript",
    "application/javascript",
    "application/ecmascript",
    "text/ecmascript",
];

#[derive(Serialize)]
pub struct UploadedFileResponse {
    pub id: String,
    pub url: String,
}

pub async fn upload_board_file(
    State(state): State<AppState>,
    ResourcePath(board_id): ResourcePath<i64>,
    user: AuthenticatedUser,
    multipart: Result<Multipart, MultipartRejection>,
) -> AppResult<(StatusCode, Json<UploadedFileResponse>)> {
    let mut multipart = multipart.map_err(|err| {
        warn!(error = %err, board_id, "upload rejected: not a multipart body");
        AppError::bad_request("multipart form data required")
    })?;

    let mut request = UploadRequest::default();
    while let Some(field) = multipart.next_field().await.map_err(|err| {
        warn!(error = %err, board_id, "invalid multipart data");
        AppError::bad_request(format!("invalid multipart data: {err}"))
    })? {
        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("file_id") => {
                let value = field.text().await.map_err(|err| {
                    AppError::bad_request(format!("invalid file_id field: {err}"))
                })?;
                request.file_id = Some(value);
            }
            Some("file") => {
                request.file_name = field.file_name().map(str::to_owned);
                request.content_type = field.content_type().map(str::to_owned);
                let data = field.bytes().await.map_err(|err| {
                    AppError::bad_request(format!("failed to read file bytes: {err}"))
                })?;
                request.bytes = Some(data.to_vec());
            }
            _ => {}
        }
    }

    let outcome = state.files.upload(user.user_id, board_id, request).await?;
    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((
        status,
        Json(UploadedFileResponse {
            id: outcome.file_id,
            url: outcome.url,
        }),
    ))
}

pub async fn list_board_file_ids(
    State(state): State<AppState>,
    ResourcePath(board_id): ResourcePath<i64>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<String>>> {
    let ids = state.files.list_ids(user.user_id, board_id)?;
    Ok(Json(ids))
}

pub async fn get_board_file(
    State(state): State<AppState>,
    ResourcePath((board_id, file_id)): ResourcePath<(i64, String)>,
    user: AuthenticatedUser,
) -> AppResult<(HeaderMap, Vec<u8>)> {
    let stored = state.files.get(user.user_id, board_id, &file_id).await?;
    let headers = file_headers(&stored.file)?;
    Ok((headers, stored.bytes))
}

fn file_headers(file: &BoardFile) -> AppResult<HeaderMap> {
    let resolved = resolve_content_type(file);
    let (content_type, disposition) = if is_active_content(&resolved) {
        (FALLBACK_CONTENT_TYPE.to_string(), "attachment")
    } else {
        (resolved, "inline")
    };

    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static(FALLBACK_CONTENT_TYPE)),
    );
    headers.insert(
        CONTENT_DISPOSITION,
        HeaderValue::from_str(&content_disposition(disposition, &file.file_name))
            .map_err(AppError::internal)?,
    );
    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(
        ETAG,
        HeaderValue::from_str(&format!("\"{}\"", file.checksum)).map_err(AppError::internal)?,
    );
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("private, max-age=0"));
    Ok(headers)
}

/// Prefers the type recorded at upload, falling back to a guess from the
/// original file name.
fn resolve_content_type(file: &BoardFile) -> String {
    file.content_type
        .as_deref()
        .filter(|value| !value.is_empty() && *value != FALLBACK_CONTENT_TYPE)
        .map(str::to_owned)
        .or_else(|| {
            mime_guess::from_path(&file.file_name)
                .first()
                .map(|mime| mime.to_string())
        })
        .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string())
}

fn is_active_content(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    ACTIVE_CONTENT_TYPES.contains(&essence.as_str()) || essence.ends_with("+xml")
}

fn content_disposition(disposition: &str, filename: &str) -> String {
    let sanitized: String = filename
        .chars()
        .map(|ch| match ch {
            '"' | '\\' => '_',
            ch if !ch.is_ascii() || ch.is_ascii_control() => '_',
            _ => ch,
        })
        .collect();

    let encoded =
        percent_encoding::utf8_percent_encode(filename, percent_encoding::NON_ALPHANUMERIC);
    format!(
        "{}; filename=\"{}\"; filename*=UTF-8''{}",
        disposition, sanitized, encoded
    )
}
