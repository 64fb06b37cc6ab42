// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Orchestration-platform client abstraction.
//!
//! The reconciliation core touches the platform through exactly this
//! surface: get/list/update of `ClusterIdentity` objects and CRUD of the
//! namespaced Secret/ConfigMap records it renders. Keeping the surface
//! behind a trait gives the production implementation
//! ([`kube::KubePlatformClient`]) and the in-memory test fake
//! ([`fake::FakePlatform`]) the same contract, including the
//! NotFound-is-success semantics on delete paths.

pub mod fake;
pub mod kube;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};

use crate::crd::ClusterIdentity;
use crate::proxy_errors::PlatformError;

/// The platform surface consumed by the reconciliation core.
///
/// Gets return `Ok(None)` for expected absence. Deletes are idempotent and
/// return whether the object existed. Updates surface
/// [`PlatformError::Conflict`] on optimistic-concurrency races; callers
/// resolve those with a fresh read on the next attempt.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Fetch a `ClusterIdentity`; absence is `Ok(None)`.
    async fn get_cluster_identity(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ClusterIdentity>, PlatformError>;

    /// List every `ClusterIdentity` across all namespaces.
    async fn list_cluster_identities(&self) -> Result<Vec<ClusterIdentity>, PlatformError>;

    /// Replace a `ClusterIdentity` (metadata patches: finalizers, annotations).
    async fn update_cluster_identity(&self, cluster: &ClusterIdentity)
        -> Result<(), PlatformError>;

    /// Fetch a Secret; absence is `Ok(None)`.
    async fn get_secret(&self, namespace: &str, name: &str)
        -> Result<Option<Secret>, PlatformError>;

    /// Create a Secret; fails if it already exists.
    async fn create_secret(&self, secret: &Secret) -> Result<(), PlatformError>;

    /// Replace an existing Secret.
    async fn update_secret(&self, secret: &Secret) -> Result<(), PlatformError>;

    /// Delete a Secret; returns whether it existed.
    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<bool, PlatformError>;

    /// List Secrets in a namespace.
    async fn list_secrets(&self, namespace: &str) -> Result<Vec<Secret>, PlatformError>;

    /// Fetch a ConfigMap; absence is `Ok(None)`.
    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, PlatformError>;

    /// Create a ConfigMap; fails if it already exists.
    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<(), PlatformError>;

    /// Replace an existing ConfigMap.
    async fn update_config_map(&self, config_map: &ConfigMap) -> Result<(), PlatformError>;

    /// Delete a ConfigMap; returns whether it existed.
    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<bool, PlatformError>;
}

/// Read a string field from a Secret.
///
/// Prefers `stringData` (present on objects the controller just built) and
/// falls back to the server-side `data` bytes.
#[must_use]
pub fn secret_field(secret: &Secret, key: &str) -> Option<String> {
    if let Some(value) = secret.string_data.as_ref().and_then(|d| d.get(key)) {
        return Some(value.clone());
    }
    secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .map(|bytes| String::from_utf8_lossy(&bytes.0).into_owned())
}
