//! Error types for the reconciliation engine
//!
//! A pass ends in one of three ways: done, deferred by a gate, or failed.
//! Only the failed case is an [`Error`]; a missing object is `Ok(None)` and a
//! closed gate is an outcome, not an error.

use std::fmt;

use thiserror::Error;

use crate::{Kind, ObjectKey};

/// A creator could not compute desired state from its captured inputs.
#[derive(Debug, Error)]
pub enum CreatorError {
    /// Malformed input configuration, e.g. an unparsable network block
    #[error("invalid {field}: {message}")]
    Invalid {
        /// The offending input (e.g. "spec.network.pods")
        field: String,
        message: String,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CreatorError {
    pub fn invalid(field: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Invalid { field: field.into(), message: message.to_string() }
    }
}

/// Failures reported by a resource store or read cache.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    /// Concurrent modification (stale resourceVersion)
    #[error("conflict: {0}")]
    Conflict(String),
    /// Transport or server failure; retried by the caller's backoff
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("codec: {0}")]
    Codec(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Get,
    Create,
    Update,
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StoreOp::Get => "get",
            StoreOp::Create => "create",
            StoreOp::Update => "update",
        })
    }
}

/// Main error type for a reconcile pass
#[derive(Debug, Error)]
pub enum Error {
    #[error("creator for {kind} {key} failed: {source}")]
    Creator {
        kind: Kind,
        key: ObjectKey,
        #[source]
        source: CreatorError,
    },

    #[error("{op} {kind} {key} failed: {source}")]
    Store {
        op: StoreOp,
        kind: Kind,
        key: ObjectKey,
        #[source]
        source: StoreError,
    },

    /// Stored or desired object could not be projected for comparison
    #[error("encoding {kind} {key}: {message}")]
    Codec { kind: Kind, key: ObjectKey, message: String },

    #[error("invalid tenant {tenant}: {message}")]
    InvalidTenant { tenant: String, message: String },

    /// The template source could not build the creator set for a tenant
    #[error("templates for {tenant}: {source}")]
    Templates {
        tenant: String,
        #[source]
        source: CreatorError,
    },
}

impl Error {
    pub fn store(op: StoreOp, kind: Kind, key: ObjectKey, source: StoreError) -> Self {
        Self::Store { op, kind, key, source }
    }

    /// True when the store rejected a write because the object changed underneath.
    /// The whole pass is safe to re-run immediately.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Store { source: StoreError::Conflict(_) | StoreError::AlreadyExists, .. })
    }

    /// Kind being reconciled when the error happened, if any.
    pub fn kind(&self) -> Option<Kind> {
        match self {
            Error::Creator { kind, .. } | Error::Store { kind, .. } | Error::Codec { kind, .. } => Some(*kind),
            Error::InvalidTenant { .. } | Error::Templates { .. } => None,
        }
    }
}
