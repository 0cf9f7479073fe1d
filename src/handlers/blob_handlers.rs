//! HTTP handlers for keyword uploads and downloads.
//! Multipart decoding and response shaping live here; token derivation and
//! the namespace scan are delegated to `KeyedBlobRepository`.

use crate::{errors::AppError, handlers::AppState};
use axum::{
    Form,
    body::Body,
    extract::{
        Multipart, State,
        multipart::{Field, MultipartError},
    },
    http::{HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use bytes::{Bytes, BytesMut};
use serde::Deserialize;

/// Form body for `POST /download`.
#[derive(Debug, Deserialize)]
pub struct DownloadForm {
    pub word: Option<String>,
}

struct UploadedFile {
    filename: Option<String>,
    content_type: Option<String>,
    data: Bytes,
}

/// `POST /upload`: multipart `keyword` + `file`.
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let cap = state.repository.size_limit();
    let mut keyword = None;
    let mut file = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("keyword") => keyword = Some(field.text().await?),
            Some("file") => {
                let filename = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let data = read_capped(field, cap).await?;
                file = Some(UploadedFile {
                    filename,
                    content_type,
                    data,
                });
            }
            _ => {}
        }
    }

    let file = file.ok_or_else(|| AppError::bad_request("File is required"))?;
    let keyword = keyword
        .filter(|k| !k.is_empty())
        .ok_or_else(|| AppError::bad_request("Keyword is required"))?;

    let receipt = state
        .repository
        .upload(
            &state.call_context(),
            &keyword,
            file.filename.as_deref(),
            file.data,
            file.content_type.as_deref(),
        )
        .await?;

    Ok(Html(format!(
        "<p>File {} uploaded successfully to {}.</p><p>Uploaded to: {}</p>",
        html_escape(&receipt.stored_key),
        html_escape(state.repository.bucket()),
        html_escape(&receipt.location),
    )))
}

/// `POST /download`: form field `word`; streams the first matching object.
pub async fn download(
    State(state): State<AppState>,
    Form(form): Form<DownloadForm>,
) -> Result<Response, AppError> {
    let word = form
        .word
        .filter(|w| !w.is_empty())
        .ok_or_else(|| AppError::bad_request("Keyword is required"))?;

    let object = state
        .repository
        .lookup(&state.call_context(), &word)
        .await?;

    let head = object.head;
    let mut response = Response::new(Body::from_stream(object.stream));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    let content_type = head
        .content_type
        .as_deref()
        .unwrap_or("application/octet-stream");
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(head.size));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_bytes(content_disposition(&head.key).as_bytes())
            .unwrap_or_else(|_| HeaderValue::from_static("attachment")),
    );

    Ok(response)
}

/// Read a file part, stopping once it is one byte past `cap`.
///
/// Anything longer than `cap` is rejected by the repository, so there is no
/// need to buffer the rest.
async fn read_capped(mut field: Field<'_>, cap: usize) -> Result<Bytes, MultipartError> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = field.chunk().await? {
        if append_capped(&mut buf, &chunk, cap) {
            break;
        }
    }
    Ok(buf.freeze())
}

/// Append as much of `chunk` as fits in `cap + 1` bytes. Returns true once
/// the buffer is over `cap`.
fn append_capped(buf: &mut BytesMut, chunk: &[u8], cap: usize) -> bool {
    let room = cap.saturating_add(1).saturating_sub(buf.len());
    buf.extend_from_slice(&chunk[..chunk.len().min(room)]);
    buf.len() > cap
}

fn content_disposition(filename: &str) -> String {
    let quoted = filename.replace('\\', "\\\\").replace('"', "\\\"");
    format!("attachment; filename=\"{}\"", quoted)
}

fn html_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
