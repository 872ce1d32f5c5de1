//! Response envelopes for the REST API.
//!
//! Every response built here carries `Cache-Control: no-store` and
//! `X-Content-Type-Options: nosniff`.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use super::rate_limit::RateLimitStatus;
use crate::error::GateError;

pub const HEADER_RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const HEADER_RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    Unauthorized,
    Forbidden,
    NotFound,
    RateLimited,
    BadRequest,
    Conflict,
    MethodNotAllowed,
    PayloadTooLarge,
    InternalError,
}

impl ApiErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ApiErrorKind::Unauthorized => "unauthorized",
            ApiErrorKind::Forbidden => "forbidden",
            ApiErrorKind::NotFound => "not_found",
            ApiErrorKind::RateLimited => "rate_limited",
            ApiErrorKind::BadRequest => "bad_request",
            ApiErrorKind::Conflict => "conflict",
            ApiErrorKind::MethodNotAllowed => "method_not_allowed",
            ApiErrorKind::PayloadTooLarge => "payload_too_large",
            ApiErrorKind::InternalError => "internal_error",
        }
    }

    pub fn default_message(&self) -> &'static str {
        match self {
            ApiErrorKind::Unauthorized => "Invalid or missing API key",
            ApiErrorKind::Forbidden => "Insufficient permissions",
            ApiErrorKind::NotFound => "Resource not found",
            ApiErrorKind::RateLimited => "Rate limit exceeded. Retry after the specified time.",
            ApiErrorKind::BadRequest => "Invalid request",
            ApiErrorKind::Conflict => "Resource already exists",
            ApiErrorKind::MethodNotAllowed => "Method not allowed",
            ApiErrorKind::PayloadTooLarge => "Request body too large",
            ApiErrorKind::InternalError => "Internal server error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ApiErrorKind::NotFound => StatusCode::NOT_FOUND,
            ApiErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ApiErrorKind::Conflict => StatusCode::CONFLICT,
            ApiErrorKind::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiErrorKind::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiErrorKind::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Closest kind for an error status produced outside the handlers
    /// (extractor rejections, method mismatches, body limits).
    pub fn from_status(status: StatusCode) -> Self {
        match status {
            StatusCode::UNAUTHORIZED => ApiErrorKind::Unauthorized,
            StatusCode::FORBIDDEN => ApiErrorKind::Forbidden,
            StatusCode::NOT_FOUND => ApiErrorKind::NotFound,
            StatusCode::METHOD_NOT_ALLOWED => ApiErrorKind::MethodNotAllowed,
            StatusCode::CONFLICT => ApiErrorKind::Conflict,
            StatusCode::PAYLOAD_TOO_LARGE => ApiErrorKind::PayloadTooLarge,
            StatusCode::TOO_MANY_REQUESTS => ApiErrorKind::RateLimited,
            s if s.is_server_error() => ApiErrorKind::InternalError,
            _ => ApiErrorKind::BadRequest,
        }
    }
}

/// Handler error. Converts into the `{success:false, error:{...}}` envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub kind: ApiErrorKind,
    /// Replaces the default message in the response body.
    pub detail: Option<String>,
}

impl ApiError {
    pub fn new(kind: ApiErrorKind) -> Self {
        Self { kind, detail: None }
    }

    pub fn with_detail(kind: ApiErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: Some(detail.into()),
        }
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::with_detail(ApiErrorKind::BadRequest, detail)
    }

    pub fn internal() -> Self {
        Self::new(ApiErrorKind::InternalError)
    }
}

impl From<GateError> for ApiError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::NotFound(_) => ApiError::new(ApiErrorKind::NotFound),
            GateError::Conflict(_) => ApiError::new(ApiErrorKind::Conflict),
            GateError::InvalidInput(msg) => ApiError::bad_request(msg),
            other => {
                // Backend detail stays in the server log.
                log::error!("[api] internal_error: {}", other);
                ApiError::internal()
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        api_error(self.kind, self.detail.as_deref())
    }
}

#[derive(Serialize)]
struct SuccessBody<T> {
    success: bool,
    data: T,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    success: bool,
    error: ErrorPayload<'a>,
}

#[derive(Serialize)]
struct ErrorPayload<'a> {
    code: &'a str,
    message: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
    pub total_pages: u64,
}

#[derive(Serialize)]
struct PaginatedBody<T> {
    success: bool,
    data: Vec<T>,
    pagination: Pagination,
}

pub fn with_security_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    response
}

pub fn api_success<T: Serialize>(data: T) -> Response {
    api_success_with_status(data, StatusCode::OK)
}

pub fn api_success_with_status<T: Serialize>(data: T, status: StatusCode) -> Response {
    with_security_headers((status, Json(SuccessBody { success: true, data })).into_response())
}

/// Error envelope. `detail`, when present, is logged and replaces the
/// default message, except for `internal_error` whose message is fixed.
pub fn api_error(kind: ApiErrorKind, detail: Option<&str>) -> Response {
    let message = match detail {
        Some(d) if kind == ApiErrorKind::InternalError => {
            log::error!("[api] {}: {}", kind.code(), d);
            kind.default_message()
        }
        Some(d) => {
            log::warn!("[api] {}: {}", kind.code(), d);
            d
        }
        None => kind.default_message(),
    };
    let body = ErrorBody {
        success: false,
        error: ErrorPayload {
            code: kind.code(),
            message,
        },
    };
    with_security_headers((kind.status(), Json(body)).into_response())
}

/// Give a response built outside the handlers the API shape: error statuses
/// without a JSON body get the error envelope (status and other headers
/// kept), and every response gets the security headers.
pub fn into_api_envelope(response: Response) -> Response {
    let status = response.status();
    let is_json = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));
    if is_json || !(status.is_client_error() || status.is_server_error()) {
        return with_security_headers(response);
    }

    log::debug!("[api] wrapping plain {} response in error envelope", status.as_u16());
    let (mut parts, _) = response.into_parts();
    let (envelope, body) = api_error(ApiErrorKind::from_status(status), None).into_parts();
    parts.headers.remove(header::CONTENT_LENGTH);
    parts.headers.extend(envelope.headers);
    Response::from_parts(parts, body)
}

pub fn pagination(total: u64, page: u64, per_page: u64) -> Pagination {
    let per_page = per_page.max(1);
    Pagination {
        total,
        page,
        per_page,
        total_pages: total.div_ceil(per_page),
    }
}

pub fn api_paginated<T: Serialize>(data: Vec<T>, total: u64, page: u64, per_page: u64) -> Response {
    let body = PaginatedBody {
        success: true,
        data,
        pagination: pagination(total, page, per_page),
    };
    with_security_headers(Json(body).into_response())
}

pub fn with_rate_limit_headers(mut response: Response, status: &RateLimitStatus) -> Response {
    let headers = response.headers_mut();
    headers.insert(HEADER_RATE_LIMIT_REMAINING, HeaderValue::from(status.remaining));
    headers.insert(HEADER_RATE_LIMIT_RESET, HeaderValue::from(status.reset_secs()));
    response
}
