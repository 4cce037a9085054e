// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for atrium-core.
//!
//! Every engine operation returns [`Result`]. Callers map errors onto their
//! transport using [`Error::kind`] (a stable code) and [`Error::public_message`]
//! (a human-readable detail that never contains storage internals).

use thiserror::Error;

/// Taxonomy group of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed or disallowed input. Nothing was mutated.
    Input,
    /// Caller identity, tenant or role problems.
    Authorization,
    /// Operation is not valid for the current state of the entity.
    State,
    /// Storage, blob store or scheduler failures.
    Infrastructure,
}

/// Core errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Curriculum definition could not be parsed or is structurally invalid.
    #[error("playbook parse error: {0}")]
    Parse(String),

    /// Prerequisites form a cycle. Holds the slugs along the cycle.
    #[error("prerequisite cycle detected: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    /// Attachment mime type is not in the slot's whitelist.
    #[error("mime type '{mime}' is not accepted by slot '{slot}'")]
    InvalidMime { slot: String, mime: String },

    /// Attachment exceeds the configured upload limit.
    #[error("file of {size} bytes exceeds the {limit} byte upload limit")]
    FileTooLarge { size: i64, limit: i64 },

    /// A required slot has no active attachment.
    #[error("required slot '{0}' has no attachment")]
    MissingRequiredSlot(String),

    /// A required form field is absent from the current revision.
    #[error("required form field '{0}' is missing")]
    MissingFormField(String),

    /// The transition is not part of the transition table.
    #[error("illegal transition from '{from}' to '{to}'")]
    IllegalTransition { from: String, to: String },

    /// Request failed validation.
    #[error("invalid request: {0}")]
    Validation(String),

    /// No valid bearer token was presented.
    #[error("not authenticated: {0}")]
    NotAuthenticated(String),

    /// The actor lacks the role or permission for the operation.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// No tenant could be derived from the request.
    #[error("tenant not specified")]
    TenantNotSpecified,

    /// Tenant slug is unknown.
    #[error("tenant '{0}' not found")]
    TenantNotFound(String),

    /// Tenant exists but is deactivated.
    #[error("tenant '{0}' is inactive")]
    TenantInactive(String),

    /// Entity lookup failed.
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    /// Node prerequisites are not all done.
    #[error("prerequisites of '{node}' are not met: {}", .missing.join(", "))]
    PrerequisiteNotMet { node: String, missing: Vec<String> },

    /// Approval already carries a terminal decision.
    #[error("approval '{0}' has already been decided")]
    AlreadyDecided(String),

    /// Workflow instance is no longer pending.
    #[error("workflow instance '{id}' is {status}")]
    InstanceClosed { id: String, status: String },

    /// Node is done and its slots are frozen.
    #[error("node '{0}' is done and can no longer be modified")]
    NodeFrozen(String),

    /// A concurrent writer changed the same row. Retried by the engines.
    #[error("concurrent modification of {0}")]
    Conflict(String),

    /// Database operation failed.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Blob store write failed.
    #[error("blob write failed: {0}")]
    BlobWriteFailed(String),

    /// Timeout scan could not complete.
    #[error("timeout tick failed: {0}")]
    TimeoutTickFailed(String),
}

impl Error {
    /// Shorthand for [`Error::NotFound`].
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Stable error code for API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Parse(_) => "PARSE_ERROR",
            Self::Cycle(_) => "CYCLE_ERROR",
            Self::InvalidMime { .. } => "INVALID_MIME",
            Self::FileTooLarge { .. } => "FILE_TOO_LARGE",
            Self::MissingRequiredSlot(_) => "MISSING_REQUIRED_SLOT",
            Self::MissingFormField(_) => "MISSING_FORM_FIELD",
            Self::IllegalTransition { .. } => "ILLEGAL_TRANSITION",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotAuthenticated(_) => "NOT_AUTHENTICATED",
            Self::NotAuthorized(_) => "NOT_AUTHORIZED",
            Self::TenantNotSpecified => "TENANT_NOT_SPECIFIED",
            Self::TenantNotFound(_) => "TENANT_NOT_FOUND",
            Self::TenantInactive(_) => "TENANT_INACTIVE",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::PrerequisiteNotMet { .. } => "PREREQUISITE_NOT_MET",
            Self::AlreadyDecided(_) => "ALREADY_DECIDED",
            Self::InstanceClosed { .. } => "INSTANCE_CLOSED",
            Self::NodeFrozen(_) => "NODE_FROZEN",
            Self::Conflict(_) => "CONFLICT",
            Self::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
            Self::BlobWriteFailed(_) => "BLOB_WRITE_FAILED",
            Self::TimeoutTickFailed(_) => "TIMEOUT_TICK_FAILED",
        }
    }

    /// Taxonomy group.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Parse(_)
            | Self::Cycle(_)
            | Self::InvalidMime { .. }
            | Self::FileTooLarge { .. }
            | Self::MissingRequiredSlot(_)
            | Self::MissingFormField(_)
            | Self::IllegalTransition { .. }
            | Self::Validation(_) => ErrorCategory::Input,
            Self::NotAuthenticated(_)
            | Self::NotAuthorized(_)
            | Self::TenantNotSpecified
            | Self::TenantNotFound(_)
            | Self::TenantInactive(_) => ErrorCategory::Authorization,
            Self::NotFound { .. }
            | Self::PrerequisiteNotMet { .. }
            | Self::AlreadyDecided(_)
            | Self::InstanceClosed { .. }
            | Self::NodeFrozen(_) => ErrorCategory::State,
            Self::Conflict(_)
            | Self::StorageUnavailable(_)
            | Self::BlobWriteFailed(_)
            | Self::TimeoutTickFailed(_) => ErrorCategory::Infrastructure,
        }
    }

    /// Whether the operation may succeed when recomputed from fresh state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::StorageUnavailable(_))
    }

    /// Message safe to show to end users.
    pub fn public_message(&self) -> String {
        match self {
            Self::Conflict(_) | Self::StorageUnavailable(_) => {
                "the service is temporarily unavailable, please retry".to_string()
            }
            Self::BlobWriteFailed(_) => "the file could not be stored, please retry".to_string(),
            Self::TimeoutTickFailed(_) => "workflow timeout processing failed".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Self::StorageUnavailable(err.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for Error {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::StorageUnavailable(err.to_string())
    }
}

/// Result type using core [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
