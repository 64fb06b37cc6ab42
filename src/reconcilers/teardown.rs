// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Ordered enrollment teardown for deleted clusters.
//!
//! Runs when a `ClusterIdentity` carries a deletion timestamp. The sequence
//! is strict and every step tolerates "already done":
//!
//! 1. revoke all of the owner's join tokens
//! 2. delete the credential Secret and the config ConfigMap
//! 3. delete agent state Secrets (only when the feature is enabled)
//! 4. deregister the cluster from the proxy's server registry
//! 5. remove the finalizer - only once steps 1-4 succeeded in this attempt
//!
//! A failed step leaves the finalizer in place and the whole sequence reruns
//! on the next trigger. Completed steps are not rolled back; replaying them
//! is free because each re-derives its work from observed external state.

use anyhow::{Context as _, Result};
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::artifacts::{ArtifactSync, Enrollment};
use crate::constants::{
    AGENT_STATE_SECRET_PREFIX, AGENT_STATE_SECRET_SUFFIX, CLUSTER_IDENTITY_FINALIZER,
};
use crate::context::Context;
use crate::crd::ClusterIdentity;
use crate::metrics::record_tokens_revoked;
use crate::platform::PlatformClient;
use crate::proxy::ProxyClient;
use crate::reconcilers::finalizers::{has_finalizer, remove_finalizer};

/// Run the full teardown sequence for a cluster being deleted.
///
/// # Errors
///
/// Surfaces the first failing step; the finalizer stays in place so the
/// sequence restarts on the next trigger.
pub async fn run_teardown(ctx: &Arc<Context>, cluster: &ClusterIdentity) -> Result<()> {
    let name = cluster.name_any();
    let namespace = cluster.namespace().unwrap_or_default();

    if !has_finalizer(cluster, CLUSTER_IDENTITY_FINALIZER) {
        debug!(
            cluster = %format!("{namespace}/{name}"),
            "Cluster has no enrollment finalizer, nothing to tear down"
        );
        return Ok(());
    }

    let config = ctx.config.snapshot().await;
    let enrollment = Enrollment::derive(cluster, &config, &ctx.operator_namespace);
    let owner = enrollment.register_name.clone();
    info!(
        cluster = %format!("{namespace}/{name}"),
        register_name = %owner,
        "Cluster is being deleted, running enrollment teardown"
    );

    let session = ctx.proxy.session().await;
    let tokens = ctx.token_lifecycle(&session);

    let revoked = tokens
        .revoke_all(&owner)
        .await
        .with_context(|| format!("revoke join tokens for cluster {owner}"))?;
    if revoked > 0 {
        record_tokens_revoked("teardown", revoked);
    }

    let sync = ArtifactSync::new(ctx.platform.clone(), tokens);
    sync.delete_credential_record(&enrollment).await?;
    sync.delete_config_record(&enrollment, &config).await?;

    if ctx.cleanup_agent_state {
        delete_agent_state_secrets(ctx.platform.as_ref(), &enrollment.install_namespace)
            .await
            .with_context(|| format!("delete agent state secrets for cluster {owner}"))?;
    }

    deregister_cluster(session.client.as_ref(), &owner)
        .await
        .with_context(|| format!("deregister cluster {owner} from proxy"))?;

    remove_finalizer(ctx.platform.as_ref(), cluster, CLUSTER_IDENTITY_FINALIZER)
        .await
        .with_context(|| format!("remove finalizer from cluster {namespace}/{name}"))?;

    info!(
        cluster = %format!("{namespace}/{name}"),
        "Enrollment teardown complete"
    );
    Ok(())
}

/// Delete all agent state Secrets in the install namespace.
///
/// The agent StatefulSet persists per-replica state in Secrets named
/// `teleport-kube-agent-*-state`; leaving them behind makes a re-enrolled
/// agent resume a deregistered session.
///
/// # Errors
///
/// Surfaces list/delete failures; already-deleted Secrets are skipped.
pub async fn delete_agent_state_secrets(
    platform: &dyn PlatformClient,
    namespace: &str,
) -> Result<usize> {
    let secrets = platform
        .list_secrets(namespace)
        .await
        .with_context(|| format!("list secrets in namespace {namespace}"))?;

    let mut deleted = 0;
    for secret in secrets {
        let secret_name = secret.name_any();
        if !is_agent_state_secret(&secret_name) {
            continue;
        }
        if platform
            .delete_secret(namespace, &secret_name)
            .await
            .with_context(|| format!("delete agent state secret {secret_name}"))?
        {
            info!(secret = %secret_name, "Deleted agent state secret");
            deleted += 1;
        }
    }

    if deleted > 0 {
        info!(namespace = namespace, count = deleted, "Deleted agent state secrets");
    } else {
        debug!(namespace = namespace, "No agent state secrets found");
    }
    Ok(deleted)
}

/// Whether a Secret name matches the agent state pattern
/// `teleport-kube-agent-*-state`.
#[must_use]
pub fn is_agent_state_secret(name: &str) -> bool {
    name.starts_with(AGENT_STATE_SECRET_PREFIX)
        && name.ends_with(AGENT_STATE_SECRET_SUFFIX)
        && name.len() > AGENT_STATE_SECRET_PREFIX.len() + AGENT_STATE_SECRET_SUFFIX.len()
}

/// Remove every registry entry the proxy still holds for `register_name`.
///
/// Absence is success: a cluster that never finished registering, or whose
/// agent already disappeared, deregisters cleanly.
///
/// # Errors
///
/// Surfaces registry list/delete failures.
pub async fn deregister_cluster(client: &dyn ProxyClient, register_name: &str) -> Result<usize> {
    debug!(register_name = register_name, "Checking proxy server registry");
    let servers = client.get_kubernetes_servers().await?;

    let matching: Vec<_> = servers
        .into_iter()
        .filter(|s| s.cluster == register_name)
        .collect();

    if matching.is_empty() {
        info!(register_name = register_name, "Cluster is not registered with the proxy");
        return Ok(0);
    }

    info!(
        register_name = register_name,
        count = matching.len(),
        "De-registering cluster from proxy"
    );
    let mut removed = 0;
    for server in matching {
        client
            .delete_kubernetes_server(&server.host_id, &server.cluster)
            .await?;
        removed += 1;
    }
    info!(register_name = register_name, "Cluster de-registered from proxy");
    Ok(removed)
}

#[cfg(test)]
#[path = "teardown_tests.rs"]
mod teardown_tests;
