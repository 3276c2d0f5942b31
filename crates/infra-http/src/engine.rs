// Shared helpers for talking to processing engines over HTTP

use kiln_core::port::{ProcessorError, ProcessorErrorKind};

const MAX_ERROR_BODY: usize = 512;

pub(crate) fn truncate(body: &str) -> String {
    if body.chars().count() <= MAX_ERROR_BODY {
        body.to_string()
    } else {
        let head: String = body.chars().take(MAX_ERROR_BODY).collect();
        format!("{}...", head)
    }
}

/// Map a transport failure onto the processor error taxonomy
pub(crate) fn transport_error(context: &str, err: reqwest::Error) -> ProcessorError {
    let kind = if err.is_timeout() {
        ProcessorErrorKind::Timeout
    } else if err.is_decode() {
        ProcessorErrorKind::EngineRejected
    } else {
        ProcessorErrorKind::EngineUnavailable
    };
    ProcessorError::new(kind, format!("{}: {}", context, err))
}

/// Ensure the response has a success status code
///
/// 5xx, 429 and 408 mean the engine is unavailable (worth retrying); any
/// other failure status means it rejected the request.
pub(crate) async fn ensure_success(
    context: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ProcessorError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string());
    let code = status.as_u16();
    let kind = if status.is_server_error() || code == 429 || code == 408 {
        ProcessorErrorKind::EngineUnavailable
    } else {
        ProcessorErrorKind::EngineRejected
    };
    Err(ProcessorError::new(
        kind,
        format!("{} returned {}: {}", context, code, truncate(&body)),
    ))
}

/// Content type from a file extension
pub(crate) fn content_type_for(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        _ => "application/octet-stream",
    }
}

/// File extension for a content type
pub(crate) fn extension_for(content_type: &str) -> &'static str {
    let essence = content_type.split(';').next().unwrap_or("").trim();
    match essence {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "video/mp4" => "mp4",
        "video/webm" => "webm",
        _ => "bin",
    }
}

pub(crate) fn response_content_type(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
