// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Finalizer management for `ClusterIdentity` resources.
//!
//! The finalizer is the contract between the controller and the platform: it
//! is present exactly while enrollment cleanup has not fully completed. Both
//! operations here are idempotent; a conflict from a concurrent metadata
//! write surfaces as [`crate::proxy_errors::PlatformError::Conflict`] and is
//! resolved by the next attempt's fresh read.

use kube::{Resource, ResourceExt};
use tracing::info;

use crate::crd::ClusterIdentity;
use crate::platform::PlatformClient;
use crate::proxy_errors::PlatformError;

/// Whether the resource carries the given finalizer.
#[must_use]
pub fn has_finalizer(cluster: &ClusterIdentity, finalizer: &str) -> bool {
    cluster
        .meta()
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|x| x == finalizer))
}

/// Add a finalizer to a `ClusterIdentity` if not already present.
///
/// # Errors
///
/// Surfaces platform errors from the update, including conflicts.
pub async fn ensure_finalizer(
    platform: &dyn PlatformClient,
    cluster: &ClusterIdentity,
    finalizer: &str,
) -> Result<(), PlatformError> {
    if has_finalizer(cluster, finalizer) {
        return Ok(());
    }

    let namespace = cluster.namespace().unwrap_or_default();
    let name = cluster.name_any();

    let mut updated = cluster.clone();
    updated
        .meta_mut()
        .finalizers
        .get_or_insert_with(Vec::new)
        .push(finalizer.to_string());
    platform.update_cluster_identity(&updated).await?;

    info!(
        finalizer = finalizer,
        cluster = %format!("{namespace}/{name}"),
        "Added finalizer"
    );
    Ok(())
}

/// Remove a finalizer from a `ClusterIdentity` if present.
///
/// # Errors
///
/// Surfaces platform errors from the update, including conflicts.
pub async fn remove_finalizer(
    platform: &dyn PlatformClient,
    cluster: &ClusterIdentity,
    finalizer: &str,
) -> Result<(), PlatformError> {
    if !has_finalizer(cluster, finalizer) {
        return Ok(());
    }

    let namespace = cluster.namespace().unwrap_or_default();
    let name = cluster.name_any();

    let mut updated = cluster.clone();
    if let Some(finalizers) = updated.meta_mut().finalizers.as_mut() {
        finalizers.retain(|f| f != finalizer);
    }
    platform.update_cluster_identity(&updated).await?;

    info!(
        finalizer = finalizer,
        cluster = %format!("{namespace}/{name}"),
        "Removed finalizer"
    );
    Ok(())
}

#[cfg(test)]
#[path = "finalizers_tests.rs"]
mod finalizers_tests;
