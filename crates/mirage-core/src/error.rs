//! Typed error surface for backend operations and dispatch.
//!
//! Every failure that can reach the renderer is a [`ServiceError`]: an
//! error class, the wire-contract error code string, a message, and an
//! optional status override for services whose real status codes deviate
//! from the class default (EC2 and DynamoDB answer 400 for not-found).

use hyper::StatusCode;

/// Classification of an emulated-service failure.
///
/// The class decides the default HTTP status; the code string carried by
/// [`ServiceError`] is what actually goes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Referenced resource does not exist.
    NotFound,
    /// Uniqueness constraint violated.
    AlreadyExists,
    /// A supplied parameter failed validation.
    InvalidParameterValue,
    /// Illegal lifecycle transition for the resource's current state.
    InvalidState,
    /// Pagination token expired, forged, or foreign.
    InvalidToken,
    /// Region not valid for the target service.
    RegionNotFound,
    /// The request could not be mapped to any known operation.
    UnrecognizedOperation,
    /// Simulated permission failure.
    PermissionDenied,
    /// Unexpected condition inside a backend method. Always a defect.
    Internal,
}

impl ErrorKind {
    /// Default HTTP status for this class.
    pub fn default_status(self) -> StatusCode {
        match self {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::AlreadyExists => StatusCode::CONFLICT,
            ErrorKind::InvalidParameterValue
            | ErrorKind::InvalidState
            | ErrorKind::InvalidToken
            | ErrorKind::RegionNotFound
            | ErrorKind::UnrecognizedOperation => StatusCode::BAD_REQUEST,
            ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// A typed failure produced by any stage of the dispatch pipeline.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ServiceError {
    pub kind: ErrorKind,
    /// Wire error code, e.g. `InvalidInstanceID.NotFound` or `NoSuchBucket`.
    pub code: String,
    pub message: String,
    status: Option<StatusCode>,
}

impl ServiceError {
    pub fn new(kind: ErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            status: None,
        }
    }

    /// Override the HTTP status where the real service deviates from the
    /// class default.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    /// Status code to put on the wire.
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or_else(|| self.kind.default_status())
    }

    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, code, message)
    }

    pub fn already_exists(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyExists, code, message)
    }

    pub fn invalid_parameter(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidParameterValue, code, message)
    }

    pub fn invalid_state(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidState, code, message)
    }

    pub fn invalid_token(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidToken, code, message)
    }

    pub fn region_not_found(region: &str, service: &str) -> Self {
        Self::new(
            ErrorKind::RegionNotFound,
            "RegionNotFoundError",
            format!("Region '{region}' is not valid for service '{service}'"),
        )
    }

    pub fn unrecognized_operation(detail: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::UnrecognizedOperation,
            "UnrecognizedClientOperation",
            detail,
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, "InternalFailure", message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_status_follows_kind() {
        let err = ServiceError::not_found("NoSuchBucket", "bucket does not exist");
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        let err = ServiceError::already_exists("ResourceInUseException", "in use");
        assert_eq!(err.status(), StatusCode::CONFLICT);

        let err = ServiceError::internal("boom");
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn status_override_wins() {
        // EC2 answers 400 for not-found conditions.
        let err = ServiceError::not_found("InvalidInstanceID.NotFound", "no such instance")
            .with_status(StatusCode::BAD_REQUEST);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn display_carries_code_and_message() {
        let err = ServiceError::invalid_parameter("ValidationException", "bad value");
        assert_eq!(err.to_string(), "ValidationException: bad value");
    }
}
