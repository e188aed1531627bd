//! # Extractors & Validation
//!
//! The [`Validate`] trait for request bodies and helpers that turn axum
//! rejections into [`AppError`]s.

use std::str::FromStr;

use axum::extract::rejection::JsonRejection;
use axum::Json;
use serde::Deserialize;

use crate::error::AppError;

/// Business rules a request body must satisfy beyond deserialization.
pub trait Validate {
    fn validate(&self) -> Result<(), String>;
}

/// Unwrap a JSON body, mapping rejections to [`AppError::BadRequest`].
pub fn extract_json<T>(result: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    result
        .map(|Json(v)| v)
        .map_err(|err| AppError::BadRequest(err.body_text()))
}

/// Like [`extract_json`], then run [`Validate::validate`].
pub fn extract_validated_json<T: Validate>(
    result: Result<Json<T>, JsonRejection>,
) -> Result<T, AppError> {
    let value = extract_json(result)?;
    value.validate().map_err(AppError::Validation)?;
    Ok(value)
}

/// Like [`extract_json`], but a request with no JSON body yields
/// `T::default()`.
pub fn extract_optional_json<T: Default>(
    result: Result<Json<T>, JsonRejection>,
) -> Result<T, AppError> {
    match result {
        Err(JsonRejection::MissingJsonContentType(_)) => Ok(T::default()),
        other => extract_json(other),
    }
}

/// Parse a path segment into an identifier, as a 422 on failure.
pub fn parse_id<T>(raw: &str) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse()
        .map_err(|e: T::Err| AppError::Validation(format!("invalid id {raw:?}: {e}")))
}

/// `?limit=&offset=` for list endpoints.
#[derive(Debug, Deserialize, Default)]
pub struct PaginationParams {
    /// Default 100, at most 1000.
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl PaginationParams {
    const DEFAULT_LIMIT: usize = 100;
    const MAX_LIMIT: usize = 1000;

    pub fn effective_limit(&self) -> usize {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .min(Self::MAX_LIMIT)
    }

    pub fn effective_offset(&self) -> usize {
        self.offset.unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attest_core::SessionId;

    #[test]
    fn pagination_defaults_and_cap() {
        let p = PaginationParams::default();
        assert_eq!(p.effective_limit(), 100);
        assert_eq!(p.effective_offset(), 0);
        let p = PaginationParams {
            limit: Some(50_000),
            offset: Some(3),
        };
        assert_eq!(p.effective_limit(), 1000);
        assert_eq!(p.effective_offset(), 3);
    }

    #[test]
    fn malformed_id_is_validation_error() {
        assert!(matches!(
            parse_id::<SessionId>("not-a-uuid"),
            Err(AppError::Validation(_))
        ));
    }
}
