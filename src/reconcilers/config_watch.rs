// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Operator configuration change detection and propagation.
//!
//! Watches the singleton `fleetgate-config` ConfigMap, diffs each observed
//! snapshot against the last applied one, and classifies every delta by
//! blast radius:
//!
//! - **Critical** (`proxyAddr`): the cached proxy session is invalidated and
//!   the fleet's tokens are revoked under their old register names
//! - **High** (`managementClusterName`): tokens are revoked fleet-wide, since
//!   register names derive from this value
//! - **Medium** (`teleportVersion`, `appName`): artifacts need re-rendering
//! - **Low** (`appVersion`, `appCatalog`): affects only new installs
//!
//! The detector acts once on the maximum impact tier, then stamps every
//! known `ClusterIdentity` with a sync annotation so each cluster's own
//! reconciliation picks up the rest - it never touches per-cluster artifacts
//! directly. The very first observation primes the snapshot and is not a
//! change.

use anyhow::{Context as _, Result};
use chrono::Utc;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{Resource, ResourceExt};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::artifacts::Enrollment;
use crate::config::ControllerConfig;
use crate::constants::OPERATOR_CONFIG_NAME;
use crate::context::Context;
use crate::labels::CONFIG_SYNC_ANNOTATION;
use crate::metrics::{record_config_change, record_tokens_revoked};

/// Blast-radius classification of a configuration change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChangeImpact {
    /// Affects only future operations (new installs)
    Low,
    /// Existing artifacts need re-rendering
    Medium,
    /// Requires fleet-wide token invalidation
    High,
    /// Requires proxy session reset and token invalidation
    Critical,
}

impl ChangeImpact {
    /// Lowercase string form for logs and metrics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeImpact::Low => "low",
            ChangeImpact::Medium => "medium",
            ChangeImpact::High => "high",
            ChangeImpact::Critical => "critical",
        }
    }
}

impl fmt::Display for ChangeImpact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One detected configuration delta.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigChange {
    /// Configuration field that changed
    pub field: &'static str,
    /// Previous value
    pub old_value: String,
    /// New value
    pub new_value: String,
    /// Blast radius of the change
    pub impact: ChangeImpact,
}

/// Detector state: the last snapshot that was fully applied.
#[derive(Default)]
pub struct ConfigWatchState {
    last_applied: Mutex<Option<Arc<ControllerConfig>>>,
}

impl ConfigWatchState {
    /// Create a detector with no prior snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

/// Diff two configuration snapshots field by field.
///
/// Pure: no I/O, no clock. A `None` old snapshot (first observation) yields
/// zero changes regardless of the new values.
#[must_use]
pub fn detect_config_changes(
    old: Option<&ControllerConfig>,
    new: &ControllerConfig,
) -> Vec<ConfigChange> {
    let Some(old) = old else {
        return Vec::new();
    };

    let fields: [(&'static str, &str, &str, ChangeImpact); 6] = [
        (
            "proxyAddr",
            &old.proxy_addr,
            &new.proxy_addr,
            ChangeImpact::Critical,
        ),
        (
            "managementClusterName",
            &old.management_cluster_name,
            &new.management_cluster_name,
            ChangeImpact::High,
        ),
        (
            "teleportVersion",
            &old.teleport_version,
            &new.teleport_version,
            ChangeImpact::Medium,
        ),
        ("appName", &old.app_name, &new.app_name, ChangeImpact::Medium),
        (
            "appVersion",
            &old.app_version,
            &new.app_version,
            ChangeImpact::Low,
        ),
        (
            "appCatalog",
            &old.app_catalog,
            &new.app_catalog,
            ChangeImpact::Low,
        ),
    ];

    fields
        .into_iter()
        .filter(|(_, old_value, new_value, _)| old_value != new_value)
        .map(|(field, old_value, new_value, impact)| ConfigChange {
            field,
            old_value: old_value.to_string(),
            new_value: new_value.to_string(),
            impact,
        })
        .collect()
}

/// Process one observed state of the operator ConfigMap.
///
/// # Errors
///
/// Surfaces parse failures and propagation errors; the last-applied snapshot
/// is left untouched on failure so the next trigger re-detects the same
/// changes.
pub async fn reconcile_operator_config(
    ctx: Arc<Context>,
    state: &ConfigWatchState,
    config_map: &ConfigMap,
) -> Result<()> {
    // Field-selector scoping in main makes this a backstop
    if config_map.name_any() != OPERATOR_CONFIG_NAME {
        return Ok(());
    }

    let new_config = ControllerConfig::from_config_map(config_map)
        .context("parse operator configuration from ConfigMap")?;

    let mut last_applied = state.last_applied.lock().await;
    let changes = detect_config_changes(last_applied.as_deref(), &new_config);

    // Reconcilers read the handle, so publish before propagation
    ctx.config.replace(new_config.clone()).await;

    if last_applied.is_none() {
        info!("Initial operator configuration loaded");
        *last_applied = Some(Arc::new(new_config));
        return Ok(());
    }

    if changes.is_empty() {
        debug!("No meaningful configuration changes detected");
        *last_applied = Some(Arc::new(new_config));
        return Ok(());
    }

    for change in &changes {
        info!(
            field = change.field,
            old_value = %change.old_value,
            new_value = %change.new_value,
            impact = %change.impact,
            "Configuration change detected"
        );
        record_config_change(change.impact.as_str());
    }

    let old_config = last_applied
        .clone()
        .unwrap_or_else(|| Arc::new(new_config.clone()));
    handle_config_changes(&ctx, &old_config, &changes).await?;

    *last_applied = Some(Arc::new(new_config));
    info!("Successfully processed configuration changes");
    Ok(())
}

/// Act once on the maximum impact tier across the detected changes.
async fn handle_config_changes(
    ctx: &Arc<Context>,
    old_config: &ControllerConfig,
    changes: &[ConfigChange],
) -> Result<()> {
    let max_impact = changes
        .iter()
        .map(|c| c.impact)
        .max()
        .unwrap_or(ChangeImpact::Low);

    match max_impact {
        ChangeImpact::Critical => {
            info!("Critical configuration change, resetting proxy session and invalidating tokens");
            ctx.proxy.request_refresh();
            revoke_fleet_tokens(ctx, old_config).await?;
            annotate_fleet(ctx).await
        }
        ChangeImpact::High => {
            info!("High impact configuration change, invalidating tokens fleet-wide");
            revoke_fleet_tokens(ctx, old_config).await?;
            annotate_fleet(ctx).await
        }
        ChangeImpact::Medium => {
            info!("Medium impact configuration change, triggering fleet re-reconciliation");
            annotate_fleet(ctx).await
        }
        ChangeImpact::Low => {
            info!("Low impact configuration change, no immediate action required");
            Ok(())
        }
    }
}

/// Revoke every cluster's tokens under the register names the *old*
/// configuration produced - those are the owner labels the stale tokens
/// actually carry.
async fn revoke_fleet_tokens(ctx: &Arc<Context>, old_config: &ControllerConfig) -> Result<()> {
    let clusters = ctx
        .platform
        .list_cluster_identities()
        .await
        .context("list cluster identities for token invalidation")?;

    let session = ctx.proxy.session().await;
    let tokens = ctx.token_lifecycle(&session);

    for cluster in &clusters {
        let enrollment = Enrollment::derive(cluster, old_config, &ctx.operator_namespace);
        match tokens.revoke_all(&enrollment.register_name).await {
            Ok(revoked) if revoked > 0 => {
                record_tokens_revoked("config-change", revoked);
            }
            Ok(_) => {}
            // One cluster's failure must not block the rest of the fleet
            Err(e) => {
                warn!(
                    cluster = %cluster.name_any(),
                    register_name = %enrollment.register_name,
                    error = %e,
                    "Failed to revoke tokens, cluster reconciliation will retry"
                );
            }
        }
    }
    Ok(())
}

/// Stamp every known `ClusterIdentity` with a fresh sync annotation so each
/// one re-reconciles under the new configuration.
async fn annotate_fleet(ctx: &Arc<Context>) -> Result<()> {
    let clusters = ctx
        .platform
        .list_cluster_identities()
        .await
        .context("list cluster identities for re-reconciliation")?;

    info!(
        cluster_count = clusters.len(),
        "Triggering re-reconciliation for all clusters"
    );

    let timestamp = Utc::now().to_rfc3339();
    for cluster in clusters {
        let mut updated = cluster.clone();
        updated
            .meta_mut()
            .annotations
            .get_or_insert_with(Default::default)
            .insert(CONFIG_SYNC_ANNOTATION.to_string(), timestamp.clone());

        if let Err(e) = ctx.platform.update_cluster_identity(&updated).await {
            // Skip and continue; the periodic requeue covers stragglers
            warn!(
                cluster = %cluster.name_any(),
                error = %e,
                "Failed to annotate cluster for re-reconciliation"
            );
            continue;
        }
        debug!(cluster = %cluster.name_any(), "Triggered re-reconciliation");
    }
    Ok(())
}

#[cfg(test)]
#[path = "config_watch_tests.rs"]
mod config_watch_tests;
