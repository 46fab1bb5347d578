//! Engine error taxonomy and its HTTP representation.

use crate::rate_limit::RateAction;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use chrono::Utc;
use sea_orm::DbErr;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PollError {
    #[error("{0}")]
    Validation(String),

    #[error("Poll not found")]
    NotFound(i32),

    #[error("Not authorized to modify this poll")]
    Forbidden(i32),

    #[error("Authentication required")]
    AuthRequired { poll_id: Option<i32> },

    #[error("Not authorized to view this poll")]
    AccessDenied(i32),

    #[error("User has already voted on this poll")]
    AlreadyVoted(i32),

    #[error("Poll is not active")]
    PollInactive(i32),

    #[error("Poll option not found")]
    OptionNotFound { poll_id: i32, option_id: i32 },

    #[error("Poll already has the maximum of {max} options")]
    CapacityExceeded { poll_id: i32, max: usize },

    #[error("An option with this text already exists on the poll")]
    DuplicateOption(i32),

    #[error("Rate limit exceeded for {action}")]
    QuotaExceeded {
        action: RateAction,
        retry_after_seconds: Option<u64>,
    },

    #[error("Operation timed out")]
    Timeout,

    #[error("Database operation failed: {0}")]
    Database(#[from] DbErr),
}

impl PollError {
    /// Stable machine-readable code surfaced to clients.
    pub fn error_code(&self) -> &'static str {
        match self {
            PollError::Validation(_) => "VALIDATION_ERROR",
            PollError::NotFound(_) => "NOT_FOUND",
            PollError::Forbidden(_) => "FORBIDDEN",
            PollError::AuthRequired { .. } => "AUTH_REQUIRED",
            PollError::AccessDenied(_) => "ACCESS_DENIED",
            PollError::AlreadyVoted(_) => "ALREADY_VOTED",
            PollError::PollInactive(_) => "POLL_INACTIVE",
            PollError::OptionNotFound { .. } => "OPTION_NOT_FOUND",
            PollError::CapacityExceeded { .. } => "CAPACITY_EXCEEDED",
            PollError::DuplicateOption(_) => "DUPLICATE_OPTION",
            PollError::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            PollError::Timeout => "TIMEOUT",
            PollError::Database(_) => "INTERNAL_ERROR",
        }
    }

    /// Poll id safe to echo back to the caller, if the error concerns one.
    pub fn poll_id(&self) -> Option<i32> {
        match self {
            PollError::NotFound(id)
            | PollError::Forbidden(id)
            | PollError::AccessDenied(id)
            | PollError::AlreadyVoted(id)
            | PollError::PollInactive(id)
            | PollError::DuplicateOption(id) => Some(*id),
            PollError::OptionNotFound { poll_id, .. } | PollError::CapacityExceeded { poll_id, .. } => {
                Some(*poll_id)
            }
            PollError::AuthRequired { poll_id } => *poll_id,
            PollError::Validation(_)
            | PollError::QuotaExceeded { .. }
            | PollError::Timeout
            | PollError::Database(_) => None,
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, PollError::Database(_))
    }
}

/// JSON body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
    pub error_code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_id: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
    pub timestamp: String,
    pub request_id: String,
}

impl ResponseError for PollError {
    fn status_code(&self) -> StatusCode {
        match self {
            PollError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PollError::NotFound(_) | PollError::OptionNotFound { .. } => StatusCode::NOT_FOUND,
            PollError::Forbidden(_) | PollError::AccessDenied(_) => StatusCode::FORBIDDEN,
            PollError::AuthRequired { .. } => StatusCode::UNAUTHORIZED,
            PollError::AlreadyVoted(_)
            | PollError::PollInactive(_)
            | PollError::CapacityExceeded { .. }
            | PollError::DuplicateOption(_) => StatusCode::CONFLICT,
            PollError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            PollError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            PollError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let request_id = uuid::Uuid::new_v4().to_string()[..8].to_string();

        // Database text stays in the log; the client only sees the request id.
        let message = if self.is_internal() {
            log::warn!("Internal error [ID: {}]: {}", request_id, self);
            "An unexpected error occurred".to_string()
        } else {
            log::debug!("Request rejected [ID: {}]: {}", request_id, self.error_code());
            self.to_string()
        };

        let retry_after_seconds = match self {
            PollError::QuotaExceeded {
                retry_after_seconds,
                ..
            } => *retry_after_seconds,
            _ => None,
        };

        let mut response = HttpResponse::build(self.status_code());
        if let Some(seconds) = retry_after_seconds {
            response.insert_header(("Retry-After", seconds.to_string()));
        }

        response.json(ErrorBody {
            message,
            error_code: self.error_code(),
            poll_id: self.poll_id(),
            retry_after_seconds,
            timestamp: Utc::now().to_rfc3339(),
            request_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_race_and_precheck_duplicates_share_a_code() {
        assert_eq!(PollError::AlreadyVoted(3).error_code(), "ALREADY_VOTED");
        assert_eq!(
            PollError::AlreadyVoted(3).status_code(),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn test_private_poll_gates_map_to_distinct_statuses() {
        let anonymous = PollError::AuthRequired { poll_id: Some(7) };
        let stranger = PollError::AccessDenied(7);

        assert_eq!(anonymous.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(stranger.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(anonymous.poll_id(), Some(7));
        assert_eq!(stranger.poll_id(), Some(7));
    }

    #[test]
    fn test_database_errors_are_internal() {
        let err = PollError::from(DbErr::Custom("connection reset".to_string()));
        assert!(err.is_internal());
        assert_eq!(err.error_code(), "INTERNAL_ERROR");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_quota_error_carries_retry_header() {
        let err = PollError::QuotaExceeded {
            action: RateAction::Vote,
            retry_after_seconds: Some(42),
        };
        let response = err.error_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get("Retry-After").unwrap(),
            &actix_web::http::header::HeaderValue::from_static("42")
        );
    }
}
