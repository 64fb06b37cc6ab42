// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `teardown.rs`

#[cfg(test)]
mod tests {
    use crate::config::{ConfigHandle, ControllerConfig};
    use crate::constants::CLUSTER_IDENTITY_FINALIZER;
    use crate::context::Context;
    use crate::crd::{ClusterIdentity, ClusterIdentitySpec};
    use crate::identity::{Identity, ProxySession, SharedProxy};
    use crate::platform::fake::FakePlatform;
    use crate::proxy::fake::{FakeProxyClient, FakeProxyConfig, SequenceGenerator};
    use crate::proxy::{KubeServer, ProvisionToken};
    use crate::reconcilers::finalizers::has_finalizer;
    use crate::reconcilers::teardown::{
        delete_agent_state_secrets, deregister_cluster, is_agent_state_secret, run_teardown,
    };
    use crate::roles::TokenRole;
    use chrono::{Duration, Utc};
    use k8s_openapi::api::core::v1::{ConfigMap, Secret};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    const NAMESPACE: &str = "org-acme";
    const OWNER: &str = "mgmt-demo";

    fn test_config() -> ControllerConfig {
        ControllerConfig {
            proxy_addr: "teleport.example.com:443".to_string(),
            teleport_version: String::new(),
            management_cluster_name: "mgmt".to_string(),
            app_name: "teleport-kube-agent".to_string(),
            app_version: "0.9.1".to_string(),
            app_catalog: "default".to_string(),
        }
    }

    fn test_context(
        platform: &Arc<FakePlatform>,
        proxy: &Arc<FakeProxyClient>,
        cleanup_agent_state: bool,
    ) -> Arc<Context> {
        Arc::new(Context {
            platform: platform.clone(),
            proxy: Arc::new(SharedProxy::new(ProxySession {
                client: proxy.clone(),
                identity: Identity::new("material".to_string()),
            })),
            config: ConfigHandle::new(test_config()),
            generator: Arc::new(SequenceGenerator::new("tok")),
            operator_namespace: "fleetgate".to_string(),
            cleanup_agent_state,
        })
    }

    fn deleted_cluster(name: &str) -> ClusterIdentity {
        let mut cluster = ClusterIdentity::new(name, ClusterIdentitySpec::default());
        cluster.metadata.namespace = Some(NAMESPACE.to_string());
        cluster.metadata.finalizers = Some(vec![CLUSTER_IDENTITY_FINALIZER.to_string()]);
        cluster.metadata.deletion_timestamp = Some(Time(k8s_openapi::jiff::Timestamp::now()));
        cluster
    }

    fn live_token(name: &str, owner: &str) -> ProvisionToken {
        ProvisionToken::new(
            name,
            owner,
            &[TokenRole::NodeJoin],
            Utc::now() + Duration::hours(1),
        )
    }

    fn plain_secret(name: &str) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(NAMESPACE.to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn seeded_proxy() -> FakeProxyConfig {
        FakeProxyConfig {
            tokens: vec![live_token("a", OWNER), live_token("b", "mgmt-other")],
            kubernetes_servers: vec![
                KubeServer {
                    name: "srv-1".to_string(),
                    host_id: "host-1".to_string(),
                    cluster: OWNER.to_string(),
                },
                KubeServer {
                    name: "srv-2".to_string(),
                    host_id: "host-2".to_string(),
                    cluster: "mgmt-other".to_string(),
                },
            ],
            ..Default::default()
        }
    }

    fn seed_artifacts(platform: &FakePlatform) {
        platform.insert_secret(plain_secret("demo-teleport-join-token"));
        platform.insert_config_map(ConfigMap {
            metadata: ObjectMeta {
                name: Some("demo-teleport-kube-agent-config".to_string()),
                namespace: Some(NAMESPACE.to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                "values".to_string(),
                "roles: kube\nauthToken: a\n".to_string(),
            )])),
            ..Default::default()
        });
    }

    #[tokio::test]
    async fn test_full_teardown() {
        let platform = Arc::new(FakePlatform::new());
        let proxy = Arc::new(FakeProxyClient::new(seeded_proxy()));
        let cluster = deleted_cluster("demo");
        platform.insert_cluster_identity(cluster.clone());
        seed_artifacts(&platform);
        let ctx = test_context(&platform, &proxy, false);

        run_teardown(&ctx, &cluster).await.unwrap();

        // Owner tokens revoked, other owners untouched
        assert!(proxy.tokens_for(OWNER).is_empty());
        assert_eq!(proxy.tokens_for("mgmt-other").len(), 1);

        // Artifacts gone
        assert!(platform.secret(NAMESPACE, "demo-teleport-join-token").is_none());
        assert!(platform
            .config_map(NAMESPACE, "demo-teleport-kube-agent-config")
            .is_none());

        // Registry entry for the owner gone, the other kept
        let clusters: Vec<String> = proxy.stored_servers().iter().map(|s| s.cluster.clone()).collect();
        assert_eq!(clusters, vec!["mgmt-other".to_string()]);

        // Finalizer removed last
        let stored = platform.cluster_identity(NAMESPACE, "demo").unwrap();
        assert!(!has_finalizer(&stored, CLUSTER_IDENTITY_FINALIZER));
    }

    #[tokio::test]
    async fn test_teardown_without_finalizer_is_a_noop() {
        let platform = Arc::new(FakePlatform::new());
        let proxy = Arc::new(FakeProxyClient::new(seeded_proxy()));
        let mut cluster = deleted_cluster("demo");
        cluster.metadata.finalizers = None;
        platform.insert_cluster_identity(cluster.clone());
        let ctx = test_context(&platform, &proxy, false);

        run_teardown(&ctx, &cluster).await.unwrap();
        assert!(platform.mutating_ops().is_empty());
        assert_eq!(proxy.tokens_for(OWNER).len(), 1);
    }

    /// Deletion ordering: with the deregister step failing, the finalizer is
    /// retained while the records are already gone, and the retry completes
    /// cleanup without recreating anything.
    #[tokio::test]
    async fn test_deregister_failure_retains_finalizer_and_retry_completes() {
        let platform = Arc::new(FakePlatform::new());
        let proxy = Arc::new(FakeProxyClient::new(seeded_proxy()));
        proxy.set_fails_delete_server(true);
        let cluster = deleted_cluster("demo");
        platform.insert_cluster_identity(cluster.clone());
        seed_artifacts(&platform);
        let ctx = test_context(&platform, &proxy, false);

        let result = run_teardown(&ctx, &cluster).await;
        assert!(result.is_err());

        // Earlier steps committed: tokens revoked, records deleted
        assert!(proxy.tokens_for(OWNER).is_empty());
        assert!(platform.secret(NAMESPACE, "demo-teleport-join-token").is_none());
        assert!(platform
            .config_map(NAMESPACE, "demo-teleport-kube-agent-config")
            .is_none());

        // Finalizer still blocks deletion
        let stored = platform.cluster_identity(NAMESPACE, "demo").unwrap();
        assert!(has_finalizer(&stored, CLUSTER_IDENTITY_FINALIZER));

        // Next trigger: the proxy recovered, the retry finishes cleanly
        proxy.set_fails_delete_server(false);
        run_teardown(&ctx, &stored).await.unwrap();

        let stored = platform.cluster_identity(NAMESPACE, "demo").unwrap();
        assert!(!has_finalizer(&stored, CLUSTER_IDENTITY_FINALIZER));

        // Deleted artifacts were not recreated along the way
        assert!(platform.secret(NAMESPACE, "demo-teleport-join-token").is_none());
        assert!(!platform
            .mutating_ops()
            .iter()
            .any(|op| op.starts_with("create-")));
    }

    #[tokio::test]
    async fn test_teardown_cleans_agent_state_when_enabled() {
        let platform = Arc::new(FakePlatform::new());
        let proxy = Arc::new(FakeProxyClient::new(seeded_proxy()));
        let cluster = deleted_cluster("demo");
        platform.insert_cluster_identity(cluster.clone());
        platform.insert_secret(plain_secret("teleport-kube-agent-0-state"));
        platform.insert_secret(plain_secret("teleport-kube-agent-12-state"));
        platform.insert_secret(plain_secret("teleport-kube-agent-config"));
        platform.insert_secret(plain_secret("unrelated-state"));
        let ctx = test_context(&platform, &proxy, true);

        run_teardown(&ctx, &cluster).await.unwrap();

        assert!(platform.secret(NAMESPACE, "teleport-kube-agent-0-state").is_none());
        assert!(platform.secret(NAMESPACE, "teleport-kube-agent-12-state").is_none());
        assert!(platform.secret(NAMESPACE, "teleport-kube-agent-config").is_some());
        assert!(platform.secret(NAMESPACE, "unrelated-state").is_some());
    }

    #[tokio::test]
    async fn test_teardown_leaves_agent_state_when_disabled() {
        let platform = Arc::new(FakePlatform::new());
        let proxy = Arc::new(FakeProxyClient::new(seeded_proxy()));
        let cluster = deleted_cluster("demo");
        platform.insert_cluster_identity(cluster.clone());
        platform.insert_secret(plain_secret("teleport-kube-agent-0-state"));
        let ctx = test_context(&platform, &proxy, false);

        run_teardown(&ctx, &cluster).await.unwrap();
        assert!(platform.secret(NAMESPACE, "teleport-kube-agent-0-state").is_some());
    }

    #[test]
    fn test_is_agent_state_secret() {
        assert!(is_agent_state_secret("teleport-kube-agent-0-state"));
        assert!(is_agent_state_secret("teleport-kube-agent-12-state"));
        assert!(!is_agent_state_secret("teleport-kube-agent-config"));
        assert!(!is_agent_state_secret("teleport-kube-agent-state"));
        assert!(!is_agent_state_secret("other-0-state"));
        assert!(!is_agent_state_secret("teleport-kube-agent-"));
    }

    #[tokio::test]
    async fn test_delete_agent_state_secrets_counts_deletions() {
        let platform = FakePlatform::new();
        platform.insert_secret(plain_secret("teleport-kube-agent-0-state"));
        platform.insert_secret(plain_secret("teleport-kube-agent-1-state"));
        platform.insert_secret(plain_secret("something-else"));

        let deleted = delete_agent_state_secrets(&platform, NAMESPACE).await.unwrap();
        assert_eq!(deleted, 2);
    }

    /// Absence is success: a cluster that never registered deregisters cleanly.
    #[tokio::test]
    async fn test_deregister_unregistered_cluster_is_success() {
        let proxy = FakeProxyClient::new(FakeProxyConfig::default());
        let removed = deregister_cluster(&proxy, OWNER).await.unwrap();
        assert_eq!(removed, 0);
    }

    #[tokio::test]
    async fn test_deregister_removes_every_matching_server() {
        let proxy = FakeProxyClient::new(FakeProxyConfig {
            kubernetes_servers: vec![
                KubeServer {
                    name: "srv-1".to_string(),
                    host_id: "host-1".to_string(),
                    cluster: OWNER.to_string(),
                },
                KubeServer {
                    name: "srv-1b".to_string(),
                    host_id: "host-1b".to_string(),
                    cluster: OWNER.to_string(),
                },
            ],
            ..Default::default()
        });

        let removed = deregister_cluster(&proxy, OWNER).await.unwrap();
        assert_eq!(removed, 2);
        assert!(proxy.stored_servers().is_empty());
    }
}
