// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Join token roles and role-set helpers.
//!
//! Every join token issued by Fleetgate is scoped to a set of roles. The
//! access-proxy enumerates roles in no guaranteed order, so every comparison
//! in this module is order-independent.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// Role a join token is scoped to.
///
/// The string forms (`kube`, `app`, `node`, `bot`) are what the proxy stores
/// in token role lists and what Fleetgate writes into the `roles` token label.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TokenRole {
    /// Enrolls the cluster's Kubernetes API with the proxy
    #[serde(rename = "kube")]
    KubeJoin,

    /// Enrolls application endpoints behind the proxy
    #[serde(rename = "app")]
    AppProxy,

    /// Enrolls individual nodes with the proxy
    #[serde(rename = "node")]
    NodeJoin,

    /// Machine-identity tokens for automation
    #[serde(rename = "bot")]
    AutomationBot,
}

/// Error returned when a role string cannot be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown token role '{role}'")]
pub struct UnknownRoleError {
    /// The role string that failed to parse
    pub role: String,
}

impl TokenRole {
    /// The proxy-side string form of this role.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenRole::KubeJoin => "kube",
            TokenRole::AppProxy => "app",
            TokenRole::NodeJoin => "node",
            TokenRole::AutomationBot => "bot",
        }
    }

    /// Parse a single role string (case-insensitive, whitespace-trimmed).
    ///
    /// # Errors
    ///
    /// Returns [`UnknownRoleError`] for anything outside the role enum.
    pub fn parse(s: &str) -> Result<Self, UnknownRoleError> {
        match s.trim().to_lowercase().as_str() {
            "kube" => Ok(TokenRole::KubeJoin),
            "app" => Ok(TokenRole::AppProxy),
            "node" => Ok(TokenRole::NodeJoin),
            "bot" => Ok(TokenRole::AutomationBot),
            _ => Err(UnknownRoleError {
                role: s.trim().to_string(),
            }),
        }
    }

    /// Validity window for tokens of this role class.
    ///
    /// Node join tokens are consumed quickly during agent startup and stay
    /// short-lived; automation tokens follow the proxy's bot convention of a
    /// 30-day window.
    #[must_use]
    pub fn ttl(&self) -> chrono::Duration {
        match self {
            TokenRole::NodeJoin => chrono::Duration::hours(1),
            TokenRole::KubeJoin | TokenRole::AppProxy => chrono::Duration::hours(24),
            TokenRole::AutomationBot => chrono::Duration::hours(720),
        }
    }
}

impl fmt::Display for TokenRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Render a role set as the canonical comma-joined, sorted role tag.
///
/// Sorting makes the tag deterministic regardless of the caller's ordering,
/// so it is safe to use as a token label value.
#[must_use]
pub fn roles_to_string(roles: &[TokenRole]) -> String {
    let set: BTreeSet<TokenRole> = roles.iter().copied().collect();
    set.iter()
        .map(TokenRole::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

/// Parse a comma-joined role tag back into a role set.
///
/// # Errors
///
/// Returns [`UnknownRoleError`] if any element fails to parse.
pub fn parse_roles(s: &str) -> Result<Vec<TokenRole>, UnknownRoleError> {
    s.split(',')
        .filter(|part| !part.trim().is_empty())
        .map(TokenRole::parse)
        .collect()
}

/// Order-independent role-set equality.
///
/// The proxy does not guarantee a stable enumeration order for token roles,
/// so `[app, kube]` must compare equal to `[kube, app]`.
#[must_use]
pub fn role_sets_equal(a: &[TokenRole], b: &[TokenRole]) -> bool {
    let a: BTreeSet<TokenRole> = a.iter().copied().collect();
    let b: BTreeSet<TokenRole> = b.iter().copied().collect();
    a == b
}

/// Validity window for a token carrying the given role set.
///
/// A multi-role token takes the most conservative (shortest) TTL among its
/// roles.
#[must_use]
pub fn role_set_ttl(roles: &[TokenRole]) -> chrono::Duration {
    roles
        .iter()
        .map(TokenRole::ttl)
        .min()
        .unwrap_or_else(|| TokenRole::NodeJoin.ttl())
}

#[cfg(test)]
#[path = "roles_tests.rs"]
mod roles_tests;
