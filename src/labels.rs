// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Common label and annotation constants used across all reconcilers.
//!
//! This module defines standard Kubernetes labels and Fleetgate-specific
//! labels/annotations to ensure consistency across all resources created by
//! the controller, plus the label keys Fleetgate stamps onto proxy-side join
//! tokens.

use std::collections::BTreeMap;

// ============================================================================
// Kubernetes Standard Labels
// https://kubernetes.io/docs/concepts/overview/working-with-objects/common-labels/
// ============================================================================

/// Standard label for the tool being used to manage the operation of an application
pub const K8S_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Standard label for the name of a higher-level application this one is part of
pub const K8S_PART_OF: &str = "app.kubernetes.io/part-of";

// ============================================================================
// Kubernetes Standard Label Values
// ============================================================================

/// Value for `app.kubernetes.io/managed-by` on resources Fleetgate owns
pub const MANAGED_BY_FLEETGATE: &str = "fleetgate";

/// Value for `app.kubernetes.io/part-of` indicating this resource is part of Fleetgate
pub const PART_OF_FLEETGATE: &str = "fleetgate";

// ============================================================================
// Fleetgate-Specific Labels
// ============================================================================

/// Label on enrollment artifacts naming the owning `ClusterIdentity`
pub const FLEETGATE_CLUSTER_LABEL: &str = "fleetgate.firestoned.io/cluster";

/// Label on enrollment artifacts naming the owning `ClusterIdentity`'s namespace
pub const FLEETGATE_CLUSTER_NAMESPACE_LABEL: &str = "fleetgate.firestoned.io/cluster-namespace";

// ============================================================================
// Fleetgate-Specific Annotations
// ============================================================================

/// Annotation stamped onto every `ClusterIdentity` to force re-reconciliation
/// after an operator configuration change
pub const CONFIG_SYNC_ANNOTATION: &str = "fleetgate.firestoned.io/config-sync";

// ============================================================================
// Proxy-Side Token Labels
// ============================================================================

/// Token label carrying the owning cluster's register name
pub const TOKEN_CLUSTER_LABEL: &str = "cluster";

/// Token label carrying the comma-joined role tag
pub const TOKEN_ROLES_LABEL: &str = "roles";

/// Build the label set stamped onto enrollment artifacts (the credential
/// Secret and config ConfigMap) so artifact watch events can be mapped back
/// to the owning `ClusterIdentity`.
#[must_use]
pub fn artifact_labels(cluster_name: &str, cluster_namespace: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (K8S_MANAGED_BY.to_string(), MANAGED_BY_FLEETGATE.to_string()),
        (K8S_PART_OF.to_string(), PART_OF_FLEETGATE.to_string()),
        (
            FLEETGATE_CLUSTER_LABEL.to_string(),
            cluster_name.to_string(),
        ),
        (
            FLEETGATE_CLUSTER_NAMESPACE_LABEL.to_string(),
            cluster_namespace.to_string(),
        ),
    ])
}

#[cfg(test)]
#[path = "labels_tests.rs"]
mod labels_tests;
