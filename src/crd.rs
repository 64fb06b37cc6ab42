// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Custom Resource Definitions (CRDs) for fleet enrollment.
//!
//! Fleetgate defines a single CRD: [`ClusterIdentity`], the per-cluster
//! enrollment handle. One `ClusterIdentity` exists for every managed cluster
//! (the management cluster included). The controller reads and patches only
//! its metadata - deletion timestamp, finalizers, and annotations - and
//! derives everything else from the operator configuration.
//!
//! # Example: Enrolling a workload cluster
//!
//! ```yaml
//! apiVersion: fleetgate.firestoned.io/v1alpha1
//! kind: ClusterIdentity
//! metadata:
//!   name: prod-us-west
//!   namespace: org-acme
//! spec: {}
//! ```

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Spec for the `ClusterIdentity` resource.
///
/// Enrollment is driven almost entirely by the operator configuration; the
/// spec only carries per-cluster overrides.
#[derive(CustomResource, Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "fleetgate.firestoned.io",
    version = "v1alpha1",
    kind = "ClusterIdentity",
    namespaced,
    doc = "ClusterIdentity represents one managed Kubernetes cluster enrolled with the access-proxy. Fleetgate issues join tokens for it, renders its agent artifacts, and tears both down when the resource is deleted."
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterIdentitySpec {
    /// Namespace where enrollment artifacts (the join token Secret and the
    /// agent config ConfigMap) are created.
    ///
    /// Defaults to the operator namespace for the management cluster and to
    /// this resource's namespace for workload clusters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_namespace: Option<String>,
}

#[cfg(test)]
#[path = "crd_tests.rs"]
mod crd_tests;
