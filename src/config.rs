// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Operator configuration.
//!
//! Fleetgate reads its configuration from a singleton ConfigMap
//! (`fleetgate-config`) in the operator namespace. All keys are required to
//! exist; a missing key is a malformed-state error that only an external fix
//! can resolve. The loaded snapshot is published through [`ConfigHandle`] so
//! concurrently running reconciliations always read a consistent view, and
//! the config change detector can swap in a new snapshot atomically.

use k8s_openapi::api::core::v1::ConfigMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::constants::{
    CONFIG_KEY_APP_CATALOG, CONFIG_KEY_APP_NAME, CONFIG_KEY_APP_VERSION,
    CONFIG_KEY_MANAGEMENT_CLUSTER_NAME, CONFIG_KEY_PROXY_ADDR, CONFIG_KEY_TELEPORT_VERSION,
    OPERATOR_CONFIG_NAME,
};
use crate::platform::PlatformClient;
use crate::proxy_errors::PlatformError;

/// Operator configuration snapshot.
///
/// Hot-reloadable: the config change detector replaces the published
/// snapshot on every observed change. Reconcilers never mutate it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Access-proxy address (host:port)
    pub proxy_addr: String,

    /// Teleport software version rendered into new agent configs; may be
    /// empty, in which case no version override is rendered
    pub teleport_version: String,

    /// Name of the management cluster; workload register names derive from it
    pub management_cluster_name: String,

    /// Agent app name, part of config record names
    pub app_name: String,

    /// Agent app version (new installs only)
    pub app_version: String,

    /// Agent app catalog (new installs only)
    pub app_catalog: String,
}

impl ControllerConfig {
    /// Parse the operator configuration out of its ConfigMap.
    ///
    /// # Errors
    ///
    /// Returns [`PlatformError::Malformed`] if any required key is missing.
    pub fn from_config_map(config_map: &ConfigMap) -> Result<Self, PlatformError> {
        Ok(Self {
            proxy_addr: required_key(config_map, CONFIG_KEY_PROXY_ADDR)?,
            teleport_version: required_key(config_map, CONFIG_KEY_TELEPORT_VERSION)?,
            management_cluster_name: required_key(config_map, CONFIG_KEY_MANAGEMENT_CLUSTER_NAME)?,
            app_name: required_key(config_map, CONFIG_KEY_APP_NAME)?,
            app_version: required_key(config_map, CONFIG_KEY_APP_VERSION)?,
            app_catalog: required_key(config_map, CONFIG_KEY_APP_CATALOG)?,
        })
    }
}

/// Read a required key from the ConfigMap's `data`, falling back to
/// `binaryData`.
fn required_key(config_map: &ConfigMap, key: &str) -> Result<String, PlatformError> {
    if let Some(value) = config_map.data.as_ref().and_then(|d| d.get(key)) {
        return Ok(value.clone());
    }
    if let Some(bytes) = config_map.binary_data.as_ref().and_then(|d| d.get(key)) {
        return Ok(String::from_utf8_lossy(&bytes.0).into_owned());
    }
    let namespace = config_map.metadata.namespace.clone().unwrap_or_default();
    let name = config_map
        .metadata
        .name
        .clone()
        .unwrap_or_else(|| OPERATOR_CONFIG_NAME.to_string());
    Err(PlatformError::malformed(
        "ConfigMap",
        &namespace,
        &name,
        format!("required key '{key}' not found"),
    ))
}

/// Load the operator configuration from the singleton ConfigMap.
///
/// # Errors
///
/// Returns [`PlatformError::NotFound`] if the ConfigMap is absent and
/// [`PlatformError::Malformed`] if a required key is missing.
pub async fn load_controller_config(
    platform: &dyn PlatformClient,
    namespace: &str,
) -> Result<ControllerConfig, PlatformError> {
    let config_map = platform
        .get_config_map(namespace, OPERATOR_CONFIG_NAME)
        .await?
        .ok_or_else(|| PlatformError::NotFound {
            kind: "ConfigMap".to_string(),
            namespace: namespace.to_string(),
            name: OPERATOR_CONFIG_NAME.to_string(),
        })?;
    ControllerConfig::from_config_map(&config_map)
}

/// Guarded, hot-swappable handle to the current configuration snapshot.
///
/// Readers take an `Arc` clone of the snapshot; the swap replaces the whole
/// pointer so no reader ever observes a half-updated configuration.
#[derive(Clone)]
pub struct ConfigHandle {
    inner: Arc<RwLock<Arc<ControllerConfig>>>,
}

impl ConfigHandle {
    /// Publish an initial snapshot.
    #[must_use]
    pub fn new(initial: ControllerConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(initial))),
        }
    }

    /// Current configuration snapshot.
    pub async fn snapshot(&self) -> Arc<ControllerConfig> {
        self.inner.read().await.clone()
    }

    /// Replace the published snapshot, returning the previous one.
    pub async fn replace(&self, next: ControllerConfig) -> Arc<ControllerConfig> {
        let mut guard = self.inner.write().await;
        std::mem::replace(&mut *guard, Arc::new(next))
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
