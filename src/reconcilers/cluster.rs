// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `ClusterIdentity` reconciliation.
//!
//! One pass per trigger: fetch the current object, branch on its deletion
//! timestamp, and otherwise run the three ensures (finalizer, credential
//! Secret, config ConfigMap). Every ensure re-derives desired state from the
//! current configuration snapshot, so a trigger that finds everything correct
//! writes nothing. Errors abort the attempt without further side effects; the
//! controller's requeue brings the cluster back.

use anyhow::{Context as _, Result};
use kube::ResourceExt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::artifacts::{ArtifactSync, Enrollment};
use crate::constants::CLUSTER_IDENTITY_FINALIZER;
use crate::context::Context;
use crate::crd::ClusterIdentity;
use crate::reconcilers::finalizers::ensure_finalizer;
use crate::reconcilers::teardown::run_teardown;
use crate::roles::TokenRole;

/// Reconcile one `ClusterIdentity`.
///
/// # Errors
///
/// Surfaces the first ensure failure wrapped with operation and owner
/// context; already-committed writes stay committed and the next trigger
/// replays the sequence.
pub async fn reconcile_cluster_identity(
    ctx: Arc<Context>,
    cluster: &ClusterIdentity,
) -> Result<()> {
    let name = cluster.name_any();
    let namespace = cluster.namespace().unwrap_or_default();

    // Re-fetch so a delete racing the watch event is a clean no-op
    let Some(current) = ctx
        .platform
        .get_cluster_identity(&namespace, &name)
        .await
        .with_context(|| format!("get cluster identity {namespace}/{name}"))?
    else {
        debug!(cluster = %format!("{namespace}/{name}"), "ClusterIdentity no longer exists");
        return Ok(());
    };

    if current.metadata.deletion_timestamp.is_some() {
        return run_teardown(&ctx, &current).await;
    }

    let config = ctx.config.snapshot().await;
    let enrollment = Enrollment::derive(&current, &config, &ctx.operator_namespace);
    info!(
        cluster = %format!("{namespace}/{name}"),
        register_name = %enrollment.register_name,
        management = enrollment.is_management_cluster,
        "Reconciling cluster enrollment"
    );

    ensure_finalizer(ctx.platform.as_ref(), &current, CLUSTER_IDENTITY_FINALIZER)
        .await
        .with_context(|| format!("ensure finalizer on cluster {namespace}/{name}"))?;

    let session = ctx.proxy.session().await;
    let sync = ArtifactSync::new(ctx.platform.clone(), ctx.token_lifecycle(&session));

    sync.ensure_credential_record(&enrollment).await?;
    sync.ensure_config_record(&enrollment, &config, &[TokenRole::KubeJoin])
        .await?;

    debug!(cluster = %format!("{namespace}/{name}"), "Cluster enrollment up to date");
    Ok(())
}

#[cfg(test)]
#[path = "cluster_tests.rs"]
mod cluster_tests;
