// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Per-cluster enrollment artifact synchronization.
//!
//! Two namespaced records carry enrollment state into each managed cluster:
//!
//! - the credential Secret `{cluster}-teleport-join-token` with the single
//!   field `joinToken` (the node join token), and
//! - the config ConfigMap `{cluster}-{appName}-config` with the field
//!   `values` holding the agent's YAML configuration.
//!
//! Both ensures are get-or-create with in-place repair: an embedded token
//! that no longer validates is regenerated and patched in, everything else is
//! preserved. The config update goes through parse-modify-reserialize and
//! touches only `authToken`, because the agent workload may own additional
//! keys in the same payload that the controller must never clobber.

use anyhow::{Context as _, Result};
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::ControllerConfig;
use crate::constants::{AUTH_TOKEN_KEY, JOIN_TOKEN_FIELD, VALUES_FIELD};
use crate::crd::ClusterIdentity;
use crate::labels::artifact_labels;
use crate::metrics::{record_resource_created, record_resource_deleted, record_resource_updated};
use crate::platform::{secret_field, PlatformClient};
use crate::proxy_errors::PlatformError;
use crate::roles::{roles_to_string, TokenRole};
use crate::tokens::TokenLifecycle;

/// Where and under which names one cluster's enrollment materializes.
///
/// Derived fresh on every reconciliation attempt from the current
/// configuration snapshot, so repeated execution re-derives desired state
/// instead of remembering it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Enrollment {
    /// The `ClusterIdentity` name
    pub cluster_name: String,

    /// The `ClusterIdentity` namespace
    pub cluster_namespace: String,

    /// Name the cluster registers under at the proxy; also the token owner
    /// label value
    pub register_name: String,

    /// Namespace where the artifacts are created
    pub install_namespace: String,

    /// Whether this is the management cluster itself
    pub is_management_cluster: bool,
}

impl Enrollment {
    /// Derive the enrollment for a cluster under the given configuration.
    ///
    /// The management cluster registers under its own name; workload clusters
    /// register under `{managementClusterName}-{clusterName}`. Artifacts land
    /// in the operator namespace for the management cluster and in the
    /// cluster's namespace otherwise, unless `spec.installNamespace`
    /// overrides it.
    #[must_use]
    pub fn derive(
        cluster: &ClusterIdentity,
        config: &ControllerConfig,
        operator_namespace: &str,
    ) -> Self {
        let cluster_name = cluster.name_any();
        let cluster_namespace = cluster.namespace().unwrap_or_default();
        let is_management_cluster = cluster_name == config.management_cluster_name;

        let register_name = if is_management_cluster {
            cluster_name.clone()
        } else {
            register_name(&config.management_cluster_name, &cluster_name)
        };

        let default_namespace = if is_management_cluster {
            operator_namespace.to_string()
        } else {
            cluster_namespace.clone()
        };
        let install_namespace = cluster
            .spec
            .install_namespace
            .clone()
            .unwrap_or(default_namespace);

        Self {
            cluster_name,
            cluster_namespace,
            register_name,
            install_namespace,
            is_management_cluster,
        }
    }
}

/// Register name for a workload cluster.
#[must_use]
pub fn register_name(management_cluster_name: &str, cluster_name: &str) -> String {
    format!("{management_cluster_name}-{cluster_name}")
}

/// Name of a cluster's credential Secret.
#[must_use]
pub fn credential_record_name(cluster_name: &str) -> String {
    format!("{cluster_name}-teleport-join-token")
}

/// Name of a cluster's config ConfigMap.
#[must_use]
pub fn config_record_name(cluster_name: &str, app_name: &str) -> String {
    format!("{cluster_name}-{app_name}-config")
}

/// Synchronizer for one cluster's enrollment artifacts.
pub struct ArtifactSync {
    platform: Arc<dyn PlatformClient>,
    tokens: TokenLifecycle,
}

impl ArtifactSync {
    /// Bind a synchronizer to the platform and a token lifecycle manager.
    #[must_use]
    pub fn new(platform: Arc<dyn PlatformClient>, tokens: TokenLifecycle) -> Self {
        Self { platform, tokens }
    }

    /// Ensure the credential Secret exists and embeds a currently valid node
    /// join token.
    ///
    /// Absent: mint a node join token and create the Secret. Present: extract
    /// the embedded token, validate it against the proxy, and only on
    /// invalidity regenerate and update in place - unrelated fields and
    /// labels survive. A Secret without the `joinToken` field is malformed
    /// external state and surfaces as an error.
    ///
    /// # Errors
    ///
    /// Surfaces proxy and platform errors wrapped with owner context.
    pub async fn ensure_credential_record(&self, enrollment: &Enrollment) -> Result<()> {
        let name = credential_record_name(&enrollment.cluster_name);
        let namespace = &enrollment.install_namespace;
        let owner = &enrollment.register_name;

        let existing = self
            .platform
            .get_secret(namespace, &name)
            .await
            .with_context(|| format!("get credential secret for cluster {owner}"))?;

        let Some(secret) = existing else {
            info!(secret = %name, namespace = %namespace, "Credential secret does not exist");
            let token = self
                .tokens
                .generate(owner, &[TokenRole::NodeJoin])
                .await
                .with_context(|| format!("generate node join token for cluster {owner}"))?;

            let secret = Secret {
                metadata: ObjectMeta {
                    name: Some(name.clone()),
                    namespace: Some(namespace.clone()),
                    labels: Some(artifact_labels(
                        &enrollment.cluster_name,
                        &enrollment.cluster_namespace,
                    )),
                    ..Default::default()
                },
                string_data: Some(BTreeMap::from([(
                    JOIN_TOKEN_FIELD.to_string(),
                    token,
                )])),
                ..Default::default()
            };
            self.platform
                .create_secret(&secret)
                .await
                .with_context(|| format!("create credential secret for cluster {owner}"))?;
            record_resource_created("Secret");
            info!(secret = %name, "Created secret with new join token");
            return Ok(());
        };

        let current = secret_field(&secret, JOIN_TOKEN_FIELD).ok_or_else(|| {
            PlatformError::malformed(
                "Secret",
                namespace,
                &name,
                format!("required key '{JOIN_TOKEN_FIELD}' not found"),
            )
        })?;

        if self
            .tokens
            .is_valid(owner, &current, &[TokenRole::NodeJoin])
            .await
            .with_context(|| format!("verify join token validity for cluster {owner}"))?
        {
            debug!(secret = %name, "Join token is valid, nothing to do");
            return Ok(());
        }

        info!(secret = %name, "Join token is no longer valid, rotating");
        let fresh = self
            .tokens
            .generate(owner, &[TokenRole::NodeJoin])
            .await
            .with_context(|| format!("regenerate node join token for cluster {owner}"))?;

        let mut updated = secret.clone();
        if let Some(data) = updated.data.as_mut() {
            data.remove(JOIN_TOKEN_FIELD);
        }
        updated
            .string_data
            .get_or_insert_with(BTreeMap::new)
            .insert(JOIN_TOKEN_FIELD.to_string(), fresh);

        self.platform
            .update_secret(&updated)
            .await
            .with_context(|| format!("update credential secret for cluster {owner}"))?;
        record_resource_updated("Secret");
        info!(secret = %name, "Updated secret with rotated join token");
        Ok(())
    }

    /// Ensure the config ConfigMap exists and its `values` payload embeds a
    /// currently valid token.
    ///
    /// Absent: render the full payload and create. Present: parse the
    /// payload, read `authToken`, validate it, and on invalidity reserialize
    /// with only `authToken` changed - every other key, including ones the
    /// agent workload added, survives.
    ///
    /// # Errors
    ///
    /// Surfaces proxy and platform errors wrapped with owner context; a
    /// missing or unparseable payload is malformed external state.
    pub async fn ensure_config_record(
        &self,
        enrollment: &Enrollment,
        config: &ControllerConfig,
        roles: &[TokenRole],
    ) -> Result<()> {
        let name = config_record_name(&enrollment.cluster_name, &config.app_name);
        let namespace = &enrollment.install_namespace;
        let owner = &enrollment.register_name;

        let existing = self
            .platform
            .get_config_map(namespace, &name)
            .await
            .with_context(|| format!("get config record for cluster {owner}"))?;

        let Some(config_map) = existing else {
            info!(configmap = %name, namespace = %namespace, "Config record does not exist");
            let token = self
                .tokens
                .generate(owner, roles)
                .await
                .with_context(|| format!("generate join token for cluster {owner}"))?;
            let values = render_config_values(config, owner, roles, &token);

            let config_map = ConfigMap {
                metadata: ObjectMeta {
                    name: Some(name.clone()),
                    namespace: Some(namespace.clone()),
                    labels: Some(artifact_labels(
                        &enrollment.cluster_name,
                        &enrollment.cluster_namespace,
                    )),
                    ..Default::default()
                },
                data: Some(BTreeMap::from([(VALUES_FIELD.to_string(), values)])),
                ..Default::default()
            };
            self.platform
                .create_config_map(&config_map)
                .await
                .with_context(|| format!("create config record for cluster {owner}"))?;
            record_resource_created("ConfigMap");
            info!(configmap = %name, "Created config record");
            return Ok(());
        };

        let values = config_map
            .data
            .as_ref()
            .and_then(|d| d.get(VALUES_FIELD))
            .cloned()
            .ok_or_else(|| {
                PlatformError::malformed(
                    "ConfigMap",
                    namespace,
                    &name,
                    format!("required key '{VALUES_FIELD}' not found"),
                )
            })?;

        let current = read_auth_token(&values).map_err(|reason| {
            PlatformError::malformed("ConfigMap", namespace, &name, reason)
        })?;

        if self
            .tokens
            .is_valid(owner, &current, roles)
            .await
            .with_context(|| format!("verify auth token validity for cluster {owner}"))?
        {
            debug!(configmap = %name, "Auth token is valid, nothing to do");
            return Ok(());
        }

        info!(configmap = %name, "Auth token is no longer valid, rotating");
        let fresh = self
            .tokens
            .generate(owner, roles)
            .await
            .with_context(|| format!("regenerate join token for cluster {owner}"))?;
        let updated_values = update_auth_token(&values, &fresh).map_err(|reason| {
            PlatformError::malformed("ConfigMap", namespace, &name, reason)
        })?;

        let mut updated = config_map.clone();
        updated
            .data
            .get_or_insert_with(BTreeMap::new)
            .insert(VALUES_FIELD.to_string(), updated_values);

        self.platform
            .update_config_map(&updated)
            .await
            .with_context(|| format!("update config record for cluster {owner}"))?;
        record_resource_updated("ConfigMap");
        info!(configmap = %name, "Updated config record with rotated auth token");
        Ok(())
    }

    /// Delete the credential Secret; absence is success.
    ///
    /// # Errors
    ///
    /// Surfaces non-NotFound platform errors.
    pub async fn delete_credential_record(&self, enrollment: &Enrollment) -> Result<()> {
        let name = credential_record_name(&enrollment.cluster_name);
        let deleted = self
            .platform
            .delete_secret(&enrollment.install_namespace, &name)
            .await
            .with_context(|| {
                format!(
                    "delete credential secret for cluster {}",
                    enrollment.register_name
                )
            })?;
        if deleted {
            record_resource_deleted("Secret");
            info!(secret = %name, "Deleted credential secret");
        } else {
            debug!(secret = %name, "Credential secret does not exist");
        }
        Ok(())
    }

    /// Delete the config ConfigMap; absence is success.
    ///
    /// # Errors
    ///
    /// Surfaces non-NotFound platform errors.
    pub async fn delete_config_record(
        &self,
        enrollment: &Enrollment,
        config: &ControllerConfig,
    ) -> Result<()> {
        let name = config_record_name(&enrollment.cluster_name, &config.app_name);
        let deleted = self
            .platform
            .delete_config_map(&enrollment.install_namespace, &name)
            .await
            .with_context(|| {
                format!(
                    "delete config record for cluster {}",
                    enrollment.register_name
                )
            })?;
        if deleted {
            record_resource_deleted("ConfigMap");
            info!(configmap = %name, "Deleted config record");
        } else {
            debug!(configmap = %name, "Config record does not exist");
        }
        Ok(())
    }
}

/// Render the full agent `values` payload for a fresh config record.
///
/// Key order is stable: roles, authToken, proxyAddr, kubeClusterName, then
/// the optional version override.
#[must_use]
pub fn render_config_values(
    config: &ControllerConfig,
    register_name: &str,
    roles: &[TokenRole],
    token: &str,
) -> String {
    use serde_yaml::{Mapping, Value};

    let mut mapping = Mapping::new();
    mapping.insert(
        Value::String("roles".to_string()),
        Value::String(roles_to_string(roles)),
    );
    mapping.insert(
        Value::String(AUTH_TOKEN_KEY.to_string()),
        Value::String(token.to_string()),
    );
    mapping.insert(
        Value::String("proxyAddr".to_string()),
        Value::String(config.proxy_addr.clone()),
    );
    mapping.insert(
        Value::String("kubeClusterName".to_string()),
        Value::String(register_name.to_string()),
    );
    if !config.teleport_version.is_empty() {
        mapping.insert(
            Value::String("teleportVersionOverride".to_string()),
            Value::String(config.teleport_version.clone()),
        );
    }

    // A mapping of strings always serializes
    serde_yaml::to_string(&Value::Mapping(mapping)).unwrap_or_default()
}

/// Read `authToken` out of a `values` payload.
///
/// # Errors
///
/// Returns a description of what is malformed (not YAML, not a mapping, key
/// missing or non-string).
pub fn read_auth_token(values: &str) -> Result<String, String> {
    let doc: serde_yaml::Value =
        serde_yaml::from_str(values).map_err(|e| format!("values payload is not YAML: {e}"))?;
    let mapping = doc
        .as_mapping()
        .ok_or_else(|| "values payload is not a mapping".to_string())?;
    mapping
        .get(serde_yaml::Value::String(AUTH_TOKEN_KEY.to_string()))
        .and_then(serde_yaml::Value::as_str)
        .map(ToString::to_string)
        .ok_or_else(|| format!("required key '{AUTH_TOKEN_KEY}' not found in values payload"))
}

/// Rewrite only `authToken` inside a `values` payload, preserving every other
/// key (including keys the agent workload added).
///
/// # Errors
///
/// Returns a description of what is malformed.
pub fn update_auth_token(values: &str, token: &str) -> Result<String, String> {
    let mut doc: serde_yaml::Value =
        serde_yaml::from_str(values).map_err(|e| format!("values payload is not YAML: {e}"))?;
    let mapping = doc
        .as_mapping_mut()
        .ok_or_else(|| "values payload is not a mapping".to_string())?;
    mapping.insert(
        serde_yaml::Value::String(AUTH_TOKEN_KEY.to_string()),
        serde_yaml::Value::String(token.to_string()),
    );
    serde_yaml::to_string(&doc).map_err(|e| format!("re-serializing values payload: {e}"))
}

#[cfg(test)]
#[path = "artifacts_tests.rs"]
mod artifacts_tests;
