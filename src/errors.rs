// src/errors.rs
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Longest upstream body excerpt attached to an error.
pub const MAX_BODY_EXCERPT: usize = 800;

#[derive(Error, Debug)]
pub enum CollageError {
    #[error("Invalid upload: {0}")]
    InvalidUpload(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("{message}")]
    UpstreamHttp {
        message: String,
        status: Option<u16>,
        body: Option<String>,
    },

    #[error("Image compose failed: {0}")]
    ComposeFailed(String),

    #[error("Unsupported collage provider: {requested}. Supported: {}", .supported.join(", "))]
    UnsupportedProvider {
        requested: String,
        supported: Vec<String>,
    },

    #[error("Validation error: {0}")]
    Validation(String),
}

impl CollageError {
    pub fn upstream(message: impl Into<String>, status: Option<u16>, body: Option<&str>) -> Self {
        CollageError::UpstreamHttp {
            message: message.into(),
            status,
            body: body.map(truncate_body),
        }
    }

    /// Stable, machine-readable error kind.
    pub fn code(&self) -> &'static str {
        match self {
            CollageError::InvalidUpload(_) => "INVALID_UPLOAD",
            CollageError::Network(_) => "NETWORK_ERROR",
            CollageError::Timeout(_) => "TIMEOUT",
            CollageError::UpstreamHttp { .. } => "UPSTREAM_HTTP_ERROR",
            CollageError::ComposeFailed(_) => "COMPOSE_FAILED",
            CollageError::UnsupportedProvider { .. } => "UNSUPPORTED_PROVIDER",
            CollageError::Validation(_) => "BAD_REQUEST",
        }
    }

    pub fn details(&self) -> serde_json::Value {
        match self {
            CollageError::UpstreamHttp { status, body, .. } => json!({
                "status": status,
                "body": body,
            }),
            CollageError::UnsupportedProvider {
                requested,
                supported,
            } => json!({
                "requested": requested,
                "supported": supported,
            }),
            _ => serde_json::Value::Null,
        }
    }

    /// Body shared by the JSON error response and the SSE `error` event.
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "statusCode": self.status_code().as_u16(),
            "code": self.code(),
            "message": self.to_string(),
            "details": self.details(),
        })
    }
}

pub fn truncate_body(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(MAX_BODY_EXCERPT) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

impl From<image::ImageError> for CollageError {
    fn from(e: image::ImageError) -> Self {
        CollageError::ComposeFailed(e.to_string())
    }
}

impl From<usvg::Error> for CollageError {
    fn from(e: usvg::Error) -> Self {
        CollageError::ComposeFailed(format!("text overlay: {}", e))
    }
}

impl From<tokio::task::JoinError> for CollageError {
    fn from(e: tokio::task::JoinError) -> Self {
        CollageError::ComposeFailed(format!("worker task failed: {}", e))
    }
}

impl ResponseError for CollageError {
    fn status_code(&self) -> StatusCode {
        match self {
            CollageError::InvalidUpload(_)
            | CollageError::Validation(_)
            | CollageError::UnsupportedProvider { .. } => StatusCode::BAD_REQUEST,
            CollageError::Network(_) | CollageError::UpstreamHttp { .. } => StatusCode::BAD_GATEWAY,
            CollageError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            CollageError::ComposeFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(self.to_json())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(CollageError::InvalidUpload("x".into()).code(), "INVALID_UPLOAD");
        assert_eq!(CollageError::Timeout("x".into()).code(), "TIMEOUT");
        assert_eq!(CollageError::upstream("boom", Some(500), None).code(), "UPSTREAM_HTTP_ERROR");
        assert_eq!(CollageError::ComposeFailed("x".into()).code(), "COMPOSE_FAILED");
    }

    #[test]
    fn status_codes_follow_error_kind() {
        assert_eq!(
            CollageError::Validation("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            CollageError::Network("down".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            CollageError::Timeout("slow".into()).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn upstream_body_is_truncated() {
        let long = "x".repeat(MAX_BODY_EXCERPT * 2);
        let err = CollageError::upstream("bad gateway", Some(502), Some(&long));
        let CollageError::UpstreamHttp { body: Some(body), .. } = err else {
            panic!("expected upstream error with body");
        };
        assert_eq!(body.chars().count(), MAX_BODY_EXCERPT + 3);
    }

    #[test]
    fn unsupported_provider_lists_choices() {
        let err = CollageError::UnsupportedProvider {
            requested: "jimeng".into(),
            supported: vec!["doubao".into(), "openai".into()],
        };
        assert!(err.to_string().contains("doubao, openai"));
        assert_eq!(err.to_json()["details"]["requested"], "jimeng");
        assert_eq!(err.to_json()["statusCode"], 400);
    }
}
