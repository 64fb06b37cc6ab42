// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Join token lifecycle management.
//!
//! Fleetgate issues role-scoped, expiring, owner-labeled join tokens against
//! the access-proxy and is the only writer of those tokens. The lifecycle
//! surface is small on purpose:
//!
//! - [`TokenLifecycle::generate`] - mint and register a fresh token
//! - [`TokenLifecycle::is_valid`] - pure validity check over one token
//!   snapshot
//! - [`TokenLifecycle::revoke_all`] - bulk-revoke by owner
//!
//! Validity is decided by [`token_matches`], a pure function of the fetched
//! snapshot; repeated calls over the same snapshot always agree. Token name
//! generation sits behind [`TokenGenerator`] so tests can use deterministic
//! names.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::labels::TOKEN_CLUSTER_LABEL;
use crate::metrics::record_token_rotation;
use crate::proxy::{ProvisionToken, ProxyClient};
use crate::proxy_errors::ProxyError;
use crate::roles::{role_set_ttl, role_sets_equal, roles_to_string, TokenRole};

/// Pluggable source of unique token names.
pub trait TokenGenerator: Send + Sync {
    /// Produce a new, globally unique token name.
    fn generate(&self) -> String;
}

/// Production token name generator (random UUID v4).
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomGenerator;

impl RandomGenerator {
    /// Create a new random generator.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl TokenGenerator for RandomGenerator {
    fn generate(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

/// Token lifecycle manager bound to one proxy session.
///
/// Constructed per reconciliation attempt from the current
/// [`crate::identity::ProxySession`] snapshot, so a refresh mid-flight never
/// mixes clients.
pub struct TokenLifecycle {
    client: Arc<dyn ProxyClient>,
    generator: Arc<dyn TokenGenerator>,
}

impl TokenLifecycle {
    /// Bind a lifecycle manager to a proxy client and name generator.
    #[must_use]
    pub fn new(client: Arc<dyn ProxyClient>, generator: Arc<dyn TokenGenerator>) -> Self {
        Self { client, generator }
    }

    /// Mint a fresh token for `owner` scoped to `roles` and register it with
    /// the proxy via an idempotent upsert. Returns the token name.
    ///
    /// Expiry is now + the role-class TTL of the set (see
    /// [`crate::roles::role_set_ttl`]).
    ///
    /// # Errors
    ///
    /// Surfaces proxy RPC errors unchanged; nothing is registered on failure.
    pub async fn generate(
        &self,
        owner: &str,
        roles: &[TokenRole],
    ) -> Result<String, ProxyError> {
        let name = self.generator.generate();
        let expiry = Utc::now() + role_set_ttl(roles);
        let token = ProvisionToken::new(name.clone(), owner, roles, expiry);

        self.client.upsert_token(&token).await?;
        record_token_rotation(&roles_to_string(roles));
        info!(
            owner = owner,
            roles = %roles_to_string(roles),
            expiry = %expiry,
            "Registered join token"
        );
        Ok(name)
    }

    /// Check whether `candidate` is the current valid token for `owner` with
    /// exactly the requested role set.
    ///
    /// Fetches one token snapshot and evaluates [`token_matches`] against it;
    /// never mutates proxy state.
    ///
    /// # Errors
    ///
    /// Surfaces proxy RPC errors from the snapshot fetch.
    pub async fn is_valid(
        &self,
        owner: &str,
        candidate: &str,
        roles: &[TokenRole],
    ) -> Result<bool, ProxyError> {
        let tokens = self.client.get_tokens().await?;
        Ok(token_matches(&tokens, owner, candidate, roles, Utc::now()))
    }

    /// Delete every token labeled with `owner`. Absence is success.
    ///
    /// Returns the number of tokens revoked.
    ///
    /// # Errors
    ///
    /// Surfaces the first non-NotFound proxy error; tokens revoked before the
    /// failure stay revoked and the next attempt finishes the remainder.
    pub async fn revoke_all(&self, owner: &str) -> Result<usize, ProxyError> {
        let tokens = self.client.get_tokens().await?;
        let mut revoked = 0;
        for token in tokens {
            if token.owner() != Some(owner) {
                continue;
            }
            match self.client.delete_token(&token.name).await {
                Ok(()) => {
                    debug!(owner = owner, token = %token.name, "Revoked join token");
                    revoked += 1;
                }
                // Raced with expiry-driven deletion on the proxy side
                Err(ProxyError::TokenNotFound { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        if revoked > 0 {
            info!(owner = owner, count = revoked, "Revoked join tokens");
        }
        Ok(revoked)
    }
}

/// Pure validity predicate over a token snapshot.
///
/// True only if some token in the snapshot carries the owner label, has
/// exactly the candidate name, has an expiry strictly in the future of `now`,
/// and its role set equals the requested set (order-independent). A token
/// without an expiry never matches.
#[must_use]
pub fn token_matches(
    tokens: &[ProvisionToken],
    owner: &str,
    candidate: &str,
    roles: &[TokenRole],
    now: DateTime<Utc>,
) -> bool {
    tokens.iter().any(|token| {
        token.labels.get(TOKEN_CLUSTER_LABEL).map(String::as_str) == Some(owner)
            && token.name == candidate
            && token.expiry.is_some_and(|expiry| expiry > now)
            && role_sets_equal(&token.roles, roles)
    })
}

#[cfg(test)]
#[path = "tokens_tests.rs"]
mod tokens_tests;
