// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the Fleetgate operator.
//!
//! This module contains all numeric and string constants used throughout the codebase.
//! Constants are organized by category for easy maintenance.

// ============================================================================
// API Constants
// ============================================================================

/// API group for all Fleetgate CRDs
pub const API_GROUP: &str = "fleetgate.firestoned.io";

/// API version for all Fleetgate CRDs
pub const API_VERSION: &str = "v1alpha1";

/// Fully qualified API version (group/version)
pub const API_GROUP_VERSION: &str = "fleetgate.firestoned.io/v1alpha1";

/// Kind name for the `ClusterIdentity` resource
pub const KIND_CLUSTER_IDENTITY: &str = "ClusterIdentity";

/// Finalizer blocking `ClusterIdentity` deletion until enrollment cleanup completes
pub const CLUSTER_IDENTITY_FINALIZER: &str = "fleetgate.firestoned.io/enrollment";

// ============================================================================
// Operator Singleton Objects
// ============================================================================

/// Name of the operator configuration ConfigMap in the operator namespace
pub const OPERATOR_CONFIG_NAME: &str = "fleetgate-config";

/// Name of the Secret carrying the operator's own proxy identity
pub const IDENTITY_SECRET_NAME: &str = "fleetgate-identity";

/// Key inside the identity Secret holding the identity file material
pub const IDENTITY_SECRET_KEY: &str = "identityFile";

// ============================================================================
// Operator ConfigMap Keys
// ============================================================================

/// Access-proxy address (host:port)
pub const CONFIG_KEY_PROXY_ADDR: &str = "proxyAddr";

/// Teleport software version rendered into new agent configs
pub const CONFIG_KEY_TELEPORT_VERSION: &str = "teleportVersion";

/// Name of the management cluster; register names for workload clusters derive from it
pub const CONFIG_KEY_MANAGEMENT_CLUSTER_NAME: &str = "managementClusterName";

/// Agent app name, part of config record names
pub const CONFIG_KEY_APP_NAME: &str = "appName";

/// Agent app version (new installs only)
pub const CONFIG_KEY_APP_VERSION: &str = "appVersion";

/// Agent app catalog (new installs only)
pub const CONFIG_KEY_APP_CATALOG: &str = "appCatalog";

// ============================================================================
// Artifact Naming and Fields
// ============================================================================

/// Suffix of the per-cluster credential Secret (`{cluster}-teleport-join-token`)
pub const CREDENTIAL_RECORD_SUFFIX: &str = "-teleport-join-token";

/// Suffix of the per-cluster config ConfigMap (`{cluster}-{appName}-config`)
pub const CONFIG_RECORD_SUFFIX: &str = "-config";

/// Field in the credential Secret holding the node join token
pub const JOIN_TOKEN_FIELD: &str = "joinToken";

/// Field in the config ConfigMap holding the rendered agent values
pub const VALUES_FIELD: &str = "values";

/// Key inside the `values` payload that the synchronizer is allowed to rewrite
pub const AUTH_TOKEN_KEY: &str = "authToken";

// ============================================================================
// Agent State Cleanup (optional feature)
// ============================================================================

/// Prefix of agent state Secrets created by the teleport-kube-agent StatefulSet
pub const AGENT_STATE_SECRET_PREFIX: &str = "teleport-kube-agent-";

/// Suffix of agent state Secrets
pub const AGENT_STATE_SECRET_SUFFIX: &str = "-state";

// ============================================================================
// Reconciliation Timing
// ============================================================================

/// Fixed requeue interval after a successful reconciliation (seconds).
///
/// Proxy-side token expiry is invisible to watch events; this timer is the
/// only mechanism that discovers it.
pub const RECONCILE_INTERVAL_SECS: u64 = 60;

/// Requeue duration for controller errors (seconds)
pub const ERROR_REQUEUE_DURATION_SECS: u64 = 30;

// ============================================================================
// Identity Refresh
// ============================================================================

/// How often the identity refresher polls the identity Secret (seconds)
pub const IDENTITY_POLL_INTERVAL_SECS: u64 = 60;

/// Maximum age of the active proxy session before it is rebuilt (seconds)
pub const IDENTITY_MAX_AGE_SECS: u64 = 20 * 60;

// ============================================================================
// Access-Proxy Client
// ============================================================================

/// Per-request timeout for proxy API calls (seconds)
pub const PROXY_REQUEST_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// Leader Election
// ============================================================================

/// Lease name used for leader election
pub const LEADER_LEASE_NAME: &str = "fleetgate-leader";

// ============================================================================
// Server Defaults
// ============================================================================

/// Default bind address for the Prometheus metrics server
pub const DEFAULT_METRICS_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Default bind address for the health probe server
pub const DEFAULT_PROBE_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Path for the Prometheus metrics endpoint
pub const METRICS_SERVER_PATH: &str = "/metrics";

// ============================================================================
// Runtime Constants
// ============================================================================

/// Number of worker threads for the Tokio runtime
pub const TOKIO_WORKER_THREADS: usize = 4;
