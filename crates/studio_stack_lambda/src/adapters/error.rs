//! Provider error classification.
//!
//! Uses the SDK's error code through `ProvideErrorMetadata` instead of string
//! matching on Debug output.

use aws_sdk_sagemaker::error::{DisplayErrorContext, ProvideErrorMetadata};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// Target is already gone; safe to skip during teardown.
    #[error("{operation}: resource not found: {message}")]
    NotFound {
        operation: &'static str,
        message: String,
    },

    /// Another change is in flight or the singleton limit was hit.
    #[error("{operation}: conflicting resource state ({code}): {message}")]
    Conflict {
        operation: &'static str,
        code: String,
        message: String,
    },

    #[error("{operation}: throttled by provider: {message}")]
    Throttled {
        operation: &'static str,
        message: String,
    },

    #[error("{operation} failed ({}): {message}", code.as_deref().unwrap_or("unknown"))]
    Sdk {
        operation: &'static str,
        code: Option<String>,
        message: String,
    },
}

impl ProviderError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

const NOT_FOUND_CODES: &[&str] = &["ResourceNotFound", "ResourceNotFoundException"];

const CONFLICT_CODES: &[&str] = &[
    "ResourceInUse",
    "ResourceLimitExceeded",
    "ConflictException",
    "DuplicateResourceException",
];

const THROTTLING_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "TooManyRequestsException",
    "LimitExceededException",
];

pub fn classify_provider_error(
    operation: &'static str,
    code: Option<&str>,
    message: Option<&str>,
) -> ProviderError {
    let message = message.unwrap_or("Unknown error").to_string();

    match code {
        Some(c) if NOT_FOUND_CODES.contains(&c) => ProviderError::NotFound { operation, message },
        Some(c) if CONFLICT_CODES.contains(&c) => ProviderError::Conflict {
            operation,
            code: c.to_string(),
            message,
        },
        Some(c) if THROTTLING_CODES.contains(&c) => ProviderError::Throttled { operation, message },
        // SageMaker reports some missing resources as a validation error.
        Some("ValidationException") if message.contains("does not exist") => {
            ProviderError::NotFound { operation, message }
        }
        _ => ProviderError::Sdk {
            operation,
            code: code.map(str::to_string),
            message,
        },
    }
}

/// Classifies any SDK operation error. Both service crates re-export the same
/// metadata trait, so this covers SageMaker and Service Catalog alike.
pub fn from_sdk_error<E>(operation: &'static str, error: E) -> ProviderError
where
    E: ProvideErrorMetadata + std::error::Error,
{
    let detail = DisplayErrorContext(&error).to_string();
    classify_provider_error(operation, error.code(), Some(error.message().unwrap_or(&detail)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_missing_resources() {
        let error = classify_provider_error(
            "DeleteApp",
            Some("ResourceNotFound"),
            Some("App does not exist"),
        );
        assert!(error.is_not_found());
        assert!(error.to_string().starts_with("DeleteApp: "));
    }

    #[test]
    fn validation_error_for_missing_domain_counts_as_not_found() {
        let error = classify_provider_error(
            "DeleteDomain",
            Some("ValidationException"),
            Some("Domain d-123 does not exist"),
        );
        assert!(error.is_not_found());
    }

    #[test]
    fn singleton_limit_is_a_conflict() {
        let error = classify_provider_error(
            "CreateDomain",
            Some("ResourceLimitExceeded"),
            Some("The account-level service limit 'Maximum number of domains' is 1"),
        );
        assert!(matches!(error, ProviderError::Conflict { ref code, .. } if code == "ResourceLimitExceeded"));
    }

    #[test]
    fn throttling_is_classified_separately() {
        let error = classify_provider_error("ListApps", Some("ThrottlingException"), None);
        assert!(matches!(error, ProviderError::Throttled { .. }));
        assert_eq!(error.to_string(), "ListApps: throttled by provider: Unknown error");
    }

    #[test]
    fn unknown_codes_keep_code_and_message_for_operators() {
        let error = classify_provider_error(
            "CreateDomain",
            Some("AccessDeniedException"),
            Some("not authorized to perform sagemaker:CreateDomain"),
        );
        assert_eq!(
            error.to_string(),
            "CreateDomain failed (AccessDeniedException): not authorized to perform sagemaker:CreateDomain"
        );
    }
}
