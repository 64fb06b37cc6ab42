// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! # Fleetgate - Teleport Fleet Enrollment Operator for Kubernetes
//!
//! Fleetgate is a Kubernetes operator written in Rust that keeps a fleet of
//! managed clusters continuously enrolled with a centralized Teleport
//! access-proxy.
//!
//! ## Overview
//!
//! This library provides the core functionality for the Fleetgate operator,
//! including:
//!
//! - The `ClusterIdentity` Custom Resource Definition (CRD)
//! - Join token issuance, validation, rotation, and revocation
//! - Idempotent synchronization of per-cluster credential and config
//!   artifacts consumed by the teleport-kube-agent workload
//! - Finalizer-driven ordered teardown on cluster deletion
//! - Hot-reload of the operator configuration with blast-radius-aware
//!   fleet propagation
//!
//! ## Modules
//!
//! - [`crd`] - the `ClusterIdentity` resource
//! - [`reconcilers`] - reconciliation logic for clusters and the operator config
//! - [`tokens`] - join token lifecycle management
//! - [`artifacts`] - enrollment artifact synchronization
//! - [`proxy`] - access-proxy client abstraction
//! - [`platform`] - orchestration-platform client abstraction
//! - [`identity`] - the operator's own proxy identity and shared session
//! - [`config`] - hot-reloadable operator configuration
//!
//! ## Example
//!
//! ```rust,no_run
//! use fleetgate::crd::{ClusterIdentity, ClusterIdentitySpec};
//!
//! // Enrollment handle for a workload cluster
//! let spec = ClusterIdentitySpec {
//!     install_namespace: None,
//! };
//! ```
//!
//! ## Features
//!
//! - **Short-lived credentials** - role-scoped join tokens rotated before use
//! - **Idempotent reconciliation** - repeated runs against correct state write nothing
//! - **Ordered teardown** - finalizer removed only after full cleanup
//! - **Config hot-reload** - impact-tiered propagation across the fleet
//!
//! For more information, see the [documentation](https://firestoned.github.io/fleetgate/).

pub mod artifacts;
pub mod config;
pub mod constants;
pub mod context;
pub mod crd;
pub mod identity;
pub mod labels;
pub mod metrics;
pub mod platform;
pub mod proxy;
pub mod proxy_errors;
pub mod reconcilers;
pub mod roles;
pub mod tokens;
