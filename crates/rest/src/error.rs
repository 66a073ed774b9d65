//! Error types for the carenet REST API.
//!
//! Every failure surfaces as a [`RestError`], which renders as
//!
//! ```json
//! {"error": {"category": "state_conflict", "code": "payment_required", "message": "..."}}
//! ```
//!
//! The `category` tells a client how to react (re-authenticate, fix input,
//! refresh state) and `code` names the exact precondition that failed so a
//! client can branch on it.
//!
//! # Error Mapping
//!
//! | Category | HTTP Status |
//! |----------|-------------|
//! | unauthenticated | 401 |
//! | forbidden | 403 |
//! | validation | 400 |
//! | not_found | 404 |
//! | state_conflict | 409 |
//! | duplicate | 409 |
//! | payload_too_large | 413 |
//! | unsupported_media_type | 415 |
//! | internal | 500 |

use std::fmt;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use carenet_persistence::error::{
    BackendError, BlobError, ConcurrencyError, ResourceError, StorageError,
};

use crate::domain::TransitionError;

/// Why a credential was not accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// No bearer credential was presented.
    MissingCredential,
    /// The credential is malformed, forged, of the wrong kind, or replayed.
    InvalidCredential,
    /// The credential's lifetime has passed.
    ExpiredCredential,
    /// The user behind the credential is deactivated or rejected.
    InactiveUser,
}

impl AuthFailure {
    /// Machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            AuthFailure::MissingCredential => "missing_credential",
            AuthFailure::InvalidCredential => "invalid_credential",
            AuthFailure::ExpiredCredential => "expired_credential",
            AuthFailure::InactiveUser => "inactive_user",
        }
    }
}

/// Why an authenticated actor was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    /// The actor's role cannot perform this operation.
    InsufficientRole,
    /// The actor is still awaiting approval.
    PendingApproval,
    /// The actor's hospital is not approved or its subscription is not active.
    HospitalNotUsable,
    /// The actor has no hospital affiliation.
    NoHospitalAffiliation,
    /// The resource belongs to another hospital and no sharing grant applies.
    OtherTenant,
    /// Department staff never read patient records directly.
    DepartmentStaffRecordAccess,
    /// Department staff acting outside their own department.
    WrongDepartment,
    /// A patient reaching for another patient's data.
    NotOwnData,
    /// Cross-hospital sharing grants confer read access only.
    SharingReadOnly,
    /// The sharing grant does not cover this kind of record.
    SharingPermissionDenied,
    /// The sharing grant is limited to other patients.
    PatientOutOfScope,
    /// Only the author or a hospital admin may modify the record.
    NotAuthor,
    /// Tests may only be ordered at departments of the doctor's hospital.
    CrossHospitalOrder,
    /// The presigned URL signature is wrong or expired.
    InvalidSignature,
}

impl DenyReason {
    /// Machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            DenyReason::InsufficientRole => "insufficient_role",
            DenyReason::PendingApproval => "pending_approval",
            DenyReason::HospitalNotUsable => "hospital_not_usable",
            DenyReason::NoHospitalAffiliation => "no_hospital_affiliation",
            DenyReason::OtherTenant => "other_tenant",
            DenyReason::DepartmentStaffRecordAccess => "department_staff_record_access",
            DenyReason::WrongDepartment => "wrong_department",
            DenyReason::NotOwnData => "not_own_data",
            DenyReason::SharingReadOnly => "sharing_read_only",
            DenyReason::SharingPermissionDenied => "sharing_permission_denied",
            DenyReason::PatientOutOfScope => "patient_out_of_scope",
            DenyReason::NotAuthor => "not_author",
            DenyReason::CrossHospitalOrder => "cross_hospital_order",
            DenyReason::InvalidSignature => "invalid_signature",
        }
    }

    /// Default human-readable message.
    pub fn message(&self) -> &'static str {
        match self {
            DenyReason::InsufficientRole => "Your role does not permit this operation",
            DenyReason::PendingApproval => "Your account is awaiting approval",
            DenyReason::HospitalNotUsable => {
                "Your hospital is not approved or its subscription is not active"
            }
            DenyReason::NoHospitalAffiliation => "You are not affiliated with a hospital",
            DenyReason::OtherTenant => "The resource belongs to another hospital",
            DenyReason::DepartmentStaffRecordAccess => {
                "Department staff cannot access patient records directly"
            }
            DenyReason::WrongDepartment => "The test order belongs to another department",
            DenyReason::NotOwnData => "Patients may only access their own data",
            DenyReason::SharingReadOnly => "Cross-hospital sharing grants read access only",
            DenyReason::SharingPermissionDenied => {
                "The sharing agreement does not cover this kind of record"
            }
            DenyReason::PatientOutOfScope => {
                "The sharing agreement does not cover this patient"
            }
            DenyReason::NotAuthor => {
                "Only the author or a hospital admin of the owning hospital may modify this record"
            }
            DenyReason::CrossHospitalOrder => {
                "Tests can only be ordered at departments of your own hospital"
            }
            DenyReason::InvalidSignature => "The file link is invalid or has expired",
        }
    }
}

/// Which state guard rejected a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// The test order has not been paid (and payment is not waived).
    PaymentRequired,
    /// The entity is not in a state that allows the transition.
    InvalidState,
    /// The order is already paid.
    AlreadyPaid,
    /// The order does not require payment.
    PaymentNotRequired,
    /// The record is no longer pending.
    NotPending,
    /// The sharing record is not approved.
    NotApproved,
    /// The target hospital is not approved or not subscription-active.
    TargetNotUsable,
    /// A party is not usable or has cross-hospital sharing disabled.
    HospitalsNotEligible,
    /// The department still has staff assigned.
    DepartmentHasStaff,
    /// Another request modified the entity first.
    ConcurrentModification,
}

impl ConflictKind {
    /// Machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            ConflictKind::PaymentRequired => "payment_required",
            ConflictKind::InvalidState => "invalid_state",
            ConflictKind::AlreadyPaid => "already_paid",
            ConflictKind::PaymentNotRequired => "payment_not_required",
            ConflictKind::NotPending => "not_pending",
            ConflictKind::NotApproved => "not_approved",
            ConflictKind::TargetNotUsable => "target_not_usable",
            ConflictKind::HospitalsNotEligible => "hospitals_not_eligible",
            ConflictKind::DepartmentHasStaff => "department_has_staff",
            ConflictKind::ConcurrentModification => "concurrent_modification",
        }
    }
}

/// The primary error type for REST API operations.
#[derive(Debug)]
pub enum RestError {
    /// Missing, invalid or expired credential (HTTP 401).
    Unauthenticated {
        /// What was wrong with the credential.
        reason: AuthFailure,
    },

    /// Authenticated but not allowed (HTTP 403).
    Forbidden {
        /// The failed precondition.
        reason: DenyReason,
    },

    /// Malformed input (HTTP 400).
    Validation {
        /// Machine-readable code.
        code: &'static str,
        /// Error message.
        message: String,
    },

    /// Illegal state transition (HTTP 409).
    StateConflict {
        /// The failed guard.
        kind: ConflictKind,
        /// Error message.
        message: String,
    },

    /// Referenced entity absent (HTTP 404).
    NotFound {
        /// The kind of entity (e.g. "hospital").
        entity: String,
        /// The entity ID.
        id: String,
    },

    /// Uniqueness violation (HTTP 409).
    Duplicate {
        /// Error message.
        message: String,
    },

    /// Request body too large (HTTP 413).
    PayloadTooLarge {
        /// The configured limit in bytes.
        limit: usize,
    },

    /// Upload type not on the allow-list (HTTP 415).
    UnsupportedMediaType {
        /// The rejected content type.
        content_type: String,
    },

    /// Unexpected failure (HTTP 500).
    Internal {
        /// Internal detail, only shown in development.
        message: String,
    },
}

/// Internal detail attached to a response for development-mode rendering.
#[derive(Debug, Clone)]
pub struct InternalDetail(pub String);

impl RestError {
    /// A validation error with the generic `invalid_input` code.
    pub fn validation(message: impl Into<String>) -> Self {
        RestError::Validation {
            code: "invalid_input",
            message: message.into(),
        }
    }

    /// A validation error with a specific code.
    pub fn validation_code(code: &'static str, message: impl Into<String>) -> Self {
        RestError::Validation {
            code,
            message: message.into(),
        }
    }

    /// A forbidden error.
    pub fn forbidden(reason: DenyReason) -> Self {
        RestError::Forbidden { reason }
    }

    /// A state conflict.
    pub fn conflict(kind: ConflictKind, message: impl Into<String>) -> Self {
        RestError::StateConflict {
            kind,
            message: message.into(),
        }
    }

    /// A missing entity.
    pub fn not_found(entity: &str, id: &str) -> Self {
        RestError::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }

    /// An unexpected failure.
    pub fn internal(message: impl Into<String>) -> Self {
        RestError::Internal {
            message: message.into(),
        }
    }

    /// Returns the HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            RestError::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            RestError::Forbidden { .. } => StatusCode::FORBIDDEN,
            RestError::Validation { .. } => StatusCode::BAD_REQUEST,
            RestError::StateConflict { .. } => StatusCode::CONFLICT,
            RestError::NotFound { .. } => StatusCode::NOT_FOUND,
            RestError::Duplicate { .. } => StatusCode::CONFLICT,
            RestError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            RestError::UnsupportedMediaType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            RestError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error category.
    pub fn category(&self) -> &'static str {
        match self {
            RestError::Unauthenticated { .. } => "unauthenticated",
            RestError::Forbidden { .. } => "forbidden",
            RestError::Validation { .. } => "validation",
            RestError::StateConflict { .. } => "state_conflict",
            RestError::NotFound { .. } => "not_found",
            RestError::Duplicate { .. } => "duplicate",
            RestError::PayloadTooLarge { .. } => "payload_too_large",
            RestError::UnsupportedMediaType { .. } => "unsupported_media_type",
            RestError::Internal { .. } => "internal",
        }
    }

    /// Returns the machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            RestError::Unauthenticated { reason } => reason.code(),
            RestError::Forbidden { reason } => reason.code(),
            RestError::Validation { code, .. } => code,
            RestError::StateConflict { kind, .. } => kind.code(),
            RestError::NotFound { .. } => "not_found",
            RestError::Duplicate { .. } => "duplicate",
            RestError::PayloadTooLarge { .. } => "payload_too_large",
            RestError::UnsupportedMediaType { .. } => "unsupported_media_type",
            RestError::Internal { .. } => "internal_error",
        }
    }

    /// Returns the message shown to clients.
    fn public_message(&self) -> String {
        match self {
            RestError::Internal { .. } => "An internal error occurred".to_string(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for RestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestError::Unauthenticated { reason } => match reason {
                AuthFailure::MissingCredential => write!(f, "Authentication required"),
                AuthFailure::InvalidCredential => write!(f, "Invalid credential"),
                AuthFailure::ExpiredCredential => write!(f, "Credential has expired"),
                AuthFailure::InactiveUser => write!(f, "Account is inactive"),
            },
            RestError::Forbidden { reason } => write!(f, "{}", reason.message()),
            RestError::Validation { message, .. } => write!(f, "{}", message),
            RestError::StateConflict { message, .. } => write!(f, "{}", message),
            RestError::NotFound { entity, id } => write!(f, "{} not found: {}", entity, id),
            RestError::Duplicate { message } => write!(f, "{}", message),
            RestError::PayloadTooLarge { limit } => {
                write!(f, "Payload exceeds the {} byte limit", limit)
            }
            RestError::UnsupportedMediaType { content_type } => {
                write!(f, "Content type '{}' is not supported", content_type)
            }
            RestError::Internal { message } => write!(f, "Internal error: {}", message),
        }
    }
}

impl std::error::Error for RestError {}

impl IntoResponse for RestError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": {
                "category": self.category(),
                "code": self.code(),
                "message": self.public_message(),
            }
        });

        let mut response = (self.status(), Json(body)).into_response();
        if let RestError::Internal { message } = self {
            tracing::error!(error = %message, "Internal error");
            response.extensions_mut().insert(InternalDetail(message));
        }
        response
    }
}

// Conversions from storage errors

impl From<StorageError> for RestError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Resource(e) => e.into(),
            StorageError::Concurrency(e) => e.into(),
            StorageError::Backend(e) => e.into(),
            StorageError::Blob(e) => e.into(),
        }
    }
}

impl From<ResourceError> for RestError {
    fn from(err: ResourceError) -> Self {
        match err {
            ResourceError::NotFound { collection, id } => RestError::NotFound {
                entity: collection,
                id,
            },
            ResourceError::AlreadyExists { collection, id } => RestError::Duplicate {
                message: format!("{} {} already exists", collection, id),
            },
            ResourceError::Duplicate { collection, key } => RestError::Duplicate {
                message: format!("A record in {} already uses {}", collection, key),
            },
        }
    }
}

impl From<ConcurrencyError> for RestError {
    fn from(err: ConcurrencyError) -> Self {
        match err {
            ConcurrencyError::VersionConflict { collection, id, .. } => RestError::StateConflict {
                kind: ConflictKind::ConcurrentModification,
                message: format!(
                    "{} {} was modified by another request; reload and retry",
                    collection, id
                ),
            },
        }
    }
}

impl From<BackendError> for RestError {
    fn from(err: BackendError) -> Self {
        RestError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<BlobError> for RestError {
    fn from(err: BlobError) -> Self {
        match err {
            BlobError::InvalidUrl { url } => RestError::validation(format!("Invalid file URL: {}", url)),
            BlobError::NotFound { key } => RestError::NotFound {
                entity: "file".to_string(),
                id: key,
            },
            BlobError::InvalidSignature { .. } => RestError::Forbidden {
                reason: DenyReason::InvalidSignature,
            },
            BlobError::Store { message } => RestError::Internal { message },
        }
    }
}

impl From<TransitionError> for RestError {
    fn from(err: TransitionError) -> Self {
        let kind = match err {
            TransitionError::PaymentRequired => ConflictKind::PaymentRequired,
            TransitionError::InvalidState { .. } => ConflictKind::InvalidState,
            TransitionError::AlreadyPaid => ConflictKind::AlreadyPaid,
            TransitionError::PaymentNotRequired => ConflictKind::PaymentNotRequired,
        };
        RestError::StateConflict {
            kind,
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for RestError {
    fn from(err: serde_json::Error) -> Self {
        RestError::validation(format!("Invalid JSON: {}", err))
    }
}

/// Result type alias for REST operations.
pub type RestResult<T> = Result<T, RestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = RestError::not_found("hospital", "h-1");
        assert_eq!(err.to_string(), "hospital not found: h-1");
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_version_conflict_becomes_state_conflict() {
        let err: RestError = StorageError::from(ConcurrencyError::VersionConflict {
            collection: "test_orders".to_string(),
            id: "o-1".to_string(),
            expected_version: 1,
            actual_version: 2,
        })
        .into();
        assert_eq!(err.category(), "state_conflict");
        assert_eq!(err.code(), "concurrent_modification");
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_duplicate_key_becomes_duplicate() {
        let err: RestError = StorageError::from(ResourceError::Duplicate {
            collection: "users".to_string(),
            key: "users.email=a@b.org".to_string(),
        })
        .into();
        assert_eq!(err.category(), "duplicate");
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_transition_errors_are_state_conflicts() {
        let err: RestError = TransitionError::PaymentRequired.into();
        assert_eq!(err.category(), "state_conflict");
        assert_eq!(err.code(), "payment_required");
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn test_forbidden_code() {
        let err = RestError::forbidden(DenyReason::WrongDepartment);
        assert_eq!(err.code(), "wrong_department");
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_internal_message_hidden() {
        let err = RestError::internal("disk on fire");
        assert_eq!(err.public_message(), "An internal error occurred");

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let detail = response.extensions().get::<InternalDetail>().unwrap();
        assert_eq!(detail.0, "disk on fire");
    }

    #[test]
    fn test_unauthenticated_codes() {
        let err = RestError::Unauthenticated {
            reason: AuthFailure::ExpiredCredential,
        };
        assert_eq!(err.code(), "expired_credential");
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }
}
