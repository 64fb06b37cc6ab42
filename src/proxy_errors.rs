// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error types for access-proxy and orchestration-platform operations.
//!
//! This module provides the error taxonomy shared by the proxy client and
//! the platform client:
//! - Expected absence (`NotFound`) - success on delete paths, "needs
//!   creation" on ensure paths
//! - Transient network/API failures - surfaced, attempt aborted, retried at
//!   the next trigger
//! - Malformed external state - explicit errors that only external
//!   correction can resolve
//! - Optimistic-concurrency conflicts - logged and retried with a fresh read
//!
//! These errors provide structured error handling for enrollment operations,
//! enabling better error reporting in logs and metrics.

use thiserror::Error;

/// Errors that can occur when talking to the access-proxy.
#[derive(Error, Debug, Clone)]
pub enum ProxyError {
    /// Token not found on the proxy
    ///
    /// Returned when operating on a token that does not exist. Delete paths
    /// treat this as success; lookup paths surface it.
    #[error("token '{name}' not found on proxy {endpoint}")]
    TokenNotFound {
        /// Name of the missing token
        name: String,
        /// The proxy endpoint that returned the error
        endpoint: String,
    },

    /// Connection to the proxy failed (network unreachable, refused, TLS failure)
    #[error("connection to proxy {endpoint} failed: {reason}")]
    ConnectionFailed {
        /// The proxy endpoint that could not be reached
        endpoint: String,
        /// Reason for the connection failure
        reason: String,
    },

    /// A proxy request exceeded its timeout
    #[error("request to proxy {endpoint} timed out after {timeout_ms}ms")]
    RequestTimeout {
        /// The proxy endpoint that timed out
        endpoint: String,
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// The proxy rejected the operator's credentials
    ///
    /// Usually means the identity has expired and the refresher has not yet
    /// swapped in a fresh session.
    #[error("proxy {endpoint} rejected credentials: {reason}")]
    Unauthenticated {
        /// The proxy endpoint that rejected the request
        endpoint: String,
        /// Reason given by the proxy
        reason: String,
    },

    /// Unexpected response from the proxy API
    #[error("unexpected response from proxy {endpoint}: {status_code} {reason}")]
    UnexpectedResponse {
        /// The proxy endpoint that returned the response
        endpoint: String,
        /// HTTP status code
        status_code: u16,
        /// Response body or error message
        reason: String,
    },

    /// A proxy payload could not be decoded
    #[error("malformed proxy payload: {reason}")]
    MalformedPayload {
        /// Explanation of what is malformed
        reason: String,
    },
}

impl ProxyError {
    /// Returns true if this error is transient and the operation should be
    /// retried at the next trigger.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ConnectionFailed { .. }
            | Self::RequestTimeout { .. }
            | Self::Unauthenticated { .. }
            | Self::UnexpectedResponse { .. } => true,
            Self::TokenNotFound { .. } | Self::MalformedPayload { .. } => false,
        }
    }

    /// Returns the status reason code for this error, used in logs and metrics.
    #[must_use]
    pub fn status_reason(&self) -> &'static str {
        match self {
            Self::TokenNotFound { .. } => "TokenNotFound",
            Self::ConnectionFailed { .. } => "ProxyConnectionFailed",
            Self::RequestTimeout { .. } => "ProxyRequestTimeout",
            Self::Unauthenticated { .. } => "ProxyUnauthenticated",
            Self::UnexpectedResponse { .. } => "ProxyUnexpectedResponse",
            Self::MalformedPayload { .. } => "ProxyMalformedPayload",
        }
    }
}

/// Errors that can occur against the orchestration platform (Kubernetes API).
#[derive(Error, Debug, Clone)]
pub enum PlatformError {
    /// A required object does not exist
    #[error("{kind} '{namespace}/{name}' not found")]
    NotFound {
        /// Object kind (e.g. `Secret`, `ConfigMap`, `ClusterIdentity`)
        kind: String,
        /// Object namespace
        namespace: String,
        /// Object name
        name: String,
    },

    /// Optimistic-concurrency write race on an update
    ///
    /// The object changed between read and write. The caller logs this and
    /// retries with a fresh read on the next attempt.
    #[error("conflict updating {kind} '{namespace}/{name}': {reason}")]
    Conflict {
        /// Object kind
        kind: String,
        /// Object namespace
        namespace: String,
        /// Object name
        name: String,
        /// API server reason
        reason: String,
    },

    /// Transient API failure (server error, rate limit, network)
    #[error("kubernetes api error during {operation}: {reason}")]
    Api {
        /// Short description of the operation that failed
        operation: String,
        /// Underlying error text
        reason: String,
    },

    /// An object exists but is missing required content
    ///
    /// Will not self-heal without external correction; retried only on the
    /// normal tick cadence.
    #[error("malformed {kind} '{namespace}/{name}': {reason}")]
    Malformed {
        /// Object kind
        kind: String,
        /// Object namespace
        namespace: String,
        /// Object name
        name: String,
        /// Explanation of what is malformed
        reason: String,
    },
}

impl PlatformError {
    /// Returns true if this error is transient and the operation should be
    /// retried at the next trigger.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Api { .. } | Self::Conflict { .. } => true,
            Self::NotFound { .. } | Self::Malformed { .. } => false,
        }
    }

    /// Returns the status reason code for this error, used in logs and metrics.
    #[must_use]
    pub fn status_reason(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NotFound",
            Self::Conflict { .. } => "Conflict",
            Self::Api { .. } => "ApiError",
            Self::Malformed { .. } => "MalformedObject",
        }
    }

    /// Shorthand constructor for [`PlatformError::Malformed`].
    #[must_use]
    pub fn malformed(kind: &str, namespace: &str, name: &str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
#[path = "proxy_errors_tests.rs"]
mod proxy_errors_tests;
