// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `artifacts.rs`

#[cfg(test)]
mod tests {
    use crate::artifacts::{
        config_record_name, credential_record_name, read_auth_token, register_name,
        render_config_values, update_auth_token, ArtifactSync, Enrollment,
    };
    use crate::config::ControllerConfig;
    use crate::crd::{ClusterIdentity, ClusterIdentitySpec};
    use crate::platform::fake::FakePlatform;
    use crate::platform::secret_field;
    use crate::proxy::fake::{FakeProxyClient, FakeProxyConfig, SequenceGenerator};
    use crate::proxy::ProvisionToken;
    use crate::roles::TokenRole;
    use crate::tokens::TokenLifecycle;
    use chrono::{Duration, Utc};
    use k8s_openapi::api::core::v1::{ConfigMap, Secret};
    use k8s_openapi::ByteString;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    const NAMESPACE: &str = "org-acme";

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

    fn test_enrollment(cluster_name: &str) -> Enrollment {
        Enrollment {
            cluster_name: cluster_name.to_string(),
            cluster_namespace: NAMESPACE.to_string(),
            register_name: register_name("mgmt", cluster_name),
            install_namespace: NAMESPACE.to_string(),
            is_management_cluster: false,
        }
    }

    fn sync(platform: &Arc<FakePlatform>, proxy: &Arc<FakeProxyClient>) -> ArtifactSync {
        let tokens = TokenLifecycle::new(proxy.clone(), Arc::new(SequenceGenerator::new("tok")));
        ArtifactSync::new(platform.clone(), tokens)
    }

    fn live_token(name: &str, owner: &str, roles: &[TokenRole]) -> ProvisionToken {
        ProvisionToken::new(name, owner, roles, Utc::now() + Duration::hours(1))
    }

    // ===== Enrollment derivation =====

    #[test]
    fn test_enrollment_for_workload_cluster() {
        let mut cluster = ClusterIdentity::new("demo", ClusterIdentitySpec::default());
        cluster.metadata.namespace = Some(NAMESPACE.to_string());

        let enrollment = Enrollment::derive(&cluster, &test_config(), "fleetgate");
        assert_eq!(enrollment.register_name, "mgmt-demo");
        assert_eq!(enrollment.install_namespace, NAMESPACE);
        assert!(!enrollment.is_management_cluster);
    }

    #[test]
    fn test_enrollment_for_management_cluster() {
        let mut cluster = ClusterIdentity::new("mgmt", ClusterIdentitySpec::default());
        cluster.metadata.namespace = Some("org-giant".to_string());

        let enrollment = Enrollment::derive(&cluster, &test_config(), "fleetgate");
        assert_eq!(enrollment.register_name, "mgmt");
        assert_eq!(enrollment.install_namespace, "fleetgate");
        assert!(enrollment.is_management_cluster);
    }

    #[test]
    fn test_enrollment_honors_install_namespace_override() {
        let mut cluster = ClusterIdentity::new(
            "demo",
            ClusterIdentitySpec {
                install_namespace: Some("agents".to_string()),
            },
        );
        cluster.metadata.namespace = Some(NAMESPACE.to_string());

        let enrollment = Enrollment::derive(&cluster, &test_config(), "fleetgate");
        assert_eq!(enrollment.install_namespace, "agents");
    }

    #[test]
    fn test_record_names() {
        assert_eq!(
            credential_record_name("demo"),
            "demo-teleport-join-token"
        );
        assert_eq!(
            config_record_name("demo", "teleport-kube-agent"),
            "demo-teleport-kube-agent-config"
        );
    }

    // ===== Credential record =====

    #[tokio::test]
    async fn test_ensure_credential_record_creates_when_absent() {
        let platform = Arc::new(FakePlatform::new());
        let proxy = Arc::new(FakeProxyClient::new(FakeProxyConfig::default()));
        let enrollment = test_enrollment("demo");

        sync(&platform, &proxy)
            .ensure_credential_record(&enrollment)
            .await
            .unwrap();

        let secret = platform
            .secret(NAMESPACE, "demo-teleport-join-token")
            .expect("secret must be created");
        assert_eq!(secret_field(&secret, "joinToken").unwrap(), "tok-1");
        let labels = secret.metadata.labels.unwrap();
        assert_eq!(labels.get("fleetgate.firestoned.io/cluster").unwrap(), "demo");

        // The embedded token is registered with the proxy under the owner label
        let owned = proxy.tokens_for("mgmt-demo");
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].name, "tok-1");
    }

    /// Two consecutive ensures with no external change produce no additional
    /// writes and identical artifact content.
    #[tokio::test]
    async fn test_ensure_credential_record_is_idempotent() {
        let platform = Arc::new(FakePlatform::new());
        let proxy = Arc::new(FakeProxyClient::new(FakeProxyConfig::default()));
        let enrollment = test_enrollment("demo");
        let artifact_sync = sync(&platform, &proxy);

        artifact_sync
            .ensure_credential_record(&enrollment)
            .await
            .unwrap();
        let writes_after_first = platform.mutating_ops().len();
        let content_after_first = platform.secret(NAMESPACE, "demo-teleport-join-token");

        artifact_sync
            .ensure_credential_record(&enrollment)
            .await
            .unwrap();
        assert_eq!(platform.mutating_ops().len(), writes_after_first);
        assert_eq!(
            platform.secret(NAMESPACE, "demo-teleport-join-token"),
            content_after_first
        );
    }

    #[tokio::test]
    async fn test_ensure_credential_record_rotates_invalid_token() {
        let platform = Arc::new(FakePlatform::new());
        // The stale token is not registered with the proxy, so it fails validation
        platform.insert_secret(Secret {
            metadata: ObjectMeta {
                name: Some("demo-teleport-join-token".to_string()),
                namespace: Some(NAMESPACE.to_string()),
                labels: Some(BTreeMap::from([("team".to_string(), "platform".to_string())])),
                ..Default::default()
            },
            data: Some(BTreeMap::from([
                (
                    "joinToken".to_string(),
                    ByteString(b"stale-token".to_vec()),
                ),
                ("caPin".to_string(), ByteString(b"sha256:abc".to_vec())),
            ])),
            ..Default::default()
        });
        let proxy = Arc::new(FakeProxyClient::new(FakeProxyConfig::default()));
        let enrollment = test_enrollment("demo");

        sync(&platform, &proxy)
            .ensure_credential_record(&enrollment)
            .await
            .unwrap();

        let secret = platform.secret(NAMESPACE, "demo-teleport-join-token").unwrap();
        assert_eq!(secret_field(&secret, "joinToken").unwrap(), "tok-1");

        // Unrelated fields and labels survive the in-place update
        assert_eq!(
            secret.data.as_ref().unwrap().get("caPin").unwrap().0,
            b"sha256:abc".to_vec()
        );
        assert_eq!(
            secret.metadata.labels.unwrap().get("team").unwrap(),
            "platform"
        );
    }

    #[tokio::test]
    async fn test_ensure_credential_record_keeps_valid_token() {
        let platform = Arc::new(FakePlatform::new());
        let proxy = Arc::new(FakeProxyClient::new(FakeProxyConfig {
            tokens: vec![live_token("good", "mgmt-demo", &[TokenRole::NodeJoin])],
            ..Default::default()
        }));
        platform.insert_secret(Secret {
            metadata: ObjectMeta {
                name: Some("demo-teleport-join-token".to_string()),
                namespace: Some(NAMESPACE.to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                "joinToken".to_string(),
                ByteString(b"good".to_vec()),
            )])),
            ..Default::default()
        });
        let enrollment = test_enrollment("demo");

        sync(&platform, &proxy)
            .ensure_credential_record(&enrollment)
            .await
            .unwrap();

        assert!(platform.mutating_ops().is_empty(), "valid token means no writes");
    }

    #[tokio::test]
    async fn test_ensure_credential_record_rejects_malformed_secret() {
        let platform = Arc::new(FakePlatform::new());
        platform.insert_secret(Secret {
            metadata: ObjectMeta {
                name: Some("demo-teleport-join-token".to_string()),
                namespace: Some(NAMESPACE.to_string()),
                ..Default::default()
            },
            ..Default::default()
        });
        let proxy = Arc::new(FakeProxyClient::new(FakeProxyConfig::default()));
        let enrollment = test_enrollment("demo");

        let err = sync(&platform, &proxy)
            .ensure_credential_record(&enrollment)
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("joinToken"));
    }

    // ===== Config record =====

    #[tokio::test]
    async fn test_ensure_config_record_creates_full_payload() {
        let platform = Arc::new(FakePlatform::new());
        let proxy = Arc::new(FakeProxyClient::new(FakeProxyConfig::default()));
        let enrollment = test_enrollment("demo");

        sync(&platform, &proxy)
            .ensure_config_record(&enrollment, &test_config(), &[TokenRole::KubeJoin])
            .await
            .unwrap();

        let config_map = platform
            .config_map(NAMESPACE, "demo-teleport-kube-agent-config")
            .expect("config record must be created");
        let values = config_map.data.unwrap().get("values").unwrap().clone();

        let parsed: BTreeMap<String, String> = serde_yaml::from_str(&values).unwrap();
        assert_eq!(parsed.get("roles").unwrap(), "kube");
        assert_eq!(parsed.get("authToken").unwrap(), "tok-1");
        assert_eq!(parsed.get("proxyAddr").unwrap(), "teleport.example.com:443");
        assert_eq!(parsed.get("kubeClusterName").unwrap(), "mgmt-demo");
        assert!(!parsed.contains_key("teleportVersionOverride"));
    }

    #[tokio::test]
    async fn test_ensure_config_record_renders_version_override() {
        let platform = Arc::new(FakePlatform::new());
        let proxy = Arc::new(FakeProxyClient::new(FakeProxyConfig::default()));
        let enrollment = test_enrollment("demo");
        let mut config = test_config();
        config.teleport_version = "17.1.2".to_string();

        sync(&platform, &proxy)
            .ensure_config_record(&enrollment, &config, &[TokenRole::KubeJoin])
            .await
            .unwrap();

        let config_map = platform
            .config_map(NAMESPACE, "demo-teleport-kube-agent-config")
            .unwrap();
        let values = config_map.data.unwrap().get("values").unwrap().clone();
        let parsed: BTreeMap<String, String> = serde_yaml::from_str(&values).unwrap();
        assert_eq!(parsed.get("teleportVersionOverride").unwrap(), "17.1.2");
    }

    /// Updating the token from "A" to "B" must leave every other key -
    /// including agent-added ones - untouched.
    #[tokio::test]
    async fn test_ensure_config_record_preserves_foreign_keys_on_update() {
        let platform = Arc::new(FakePlatform::new());
        let proxy = Arc::new(FakeProxyClient::new(FakeProxyConfig::default()));
        let enrollment = test_enrollment("demo");

        let seeded = "roles: \"kube\"\nauthToken: \"A\"\nproxyAddr: \"p\"\nkubeClusterName: \"c\"\nextra: \"x\"\n";
        platform.insert_config_map(ConfigMap {
            metadata: ObjectMeta {
                name: Some("demo-teleport-kube-agent-config".to_string()),
                namespace: Some(NAMESPACE.to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                "values".to_string(),
                seeded.to_string(),
            )])),
            ..Default::default()
        });

        sync(&platform, &proxy)
            .ensure_config_record(&enrollment, &test_config(), &[TokenRole::KubeJoin])
            .await
            .unwrap();

        let config_map = platform
            .config_map(NAMESPACE, "demo-teleport-kube-agent-config")
            .unwrap();
        let values = config_map.data.unwrap().get("values").unwrap().clone();
        let parsed: BTreeMap<String, String> = serde_yaml::from_str(&values).unwrap();

        assert_eq!(parsed.get("authToken").unwrap(), "tok-1");
        assert_eq!(parsed.get("roles").unwrap(), "kube");
        assert_eq!(parsed.get("proxyAddr").unwrap(), "p");
        assert_eq!(parsed.get("kubeClusterName").unwrap(), "c");
        assert_eq!(parsed.get("extra").unwrap(), "x");
    }

    #[tokio::test]
    async fn test_ensure_config_record_is_idempotent_when_token_valid() {
        let platform = Arc::new(FakePlatform::new());
        let proxy = Arc::new(FakeProxyClient::new(FakeProxyConfig {
            tokens: vec![live_token("A", "mgmt-demo", &[TokenRole::KubeJoin])],
            ..Default::default()
        }));
        let enrollment = test_enrollment("demo");

        platform.insert_config_map(ConfigMap {
            metadata: ObjectMeta {
                name: Some("demo-teleport-kube-agent-config".to_string()),
                namespace: Some(NAMESPACE.to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                "values".to_string(),
                "roles: \"kube\"\nauthToken: \"A\"\n".to_string(),
            )])),
            ..Default::default()
        });

        sync(&platform, &proxy)
            .ensure_config_record(&enrollment, &test_config(), &[TokenRole::KubeJoin])
            .await
            .unwrap();
        assert!(platform.mutating_ops().is_empty());
    }

    #[tokio::test]
    async fn test_ensure_config_record_rejects_payload_without_token() {
        let platform = Arc::new(FakePlatform::new());
        let proxy = Arc::new(FakeProxyClient::new(FakeProxyConfig::default()));
        let enrollment = test_enrollment("demo");

        platform.insert_config_map(ConfigMap {
            metadata: ObjectMeta {
                name: Some("demo-teleport-kube-agent-config".to_string()),
                namespace: Some(NAMESPACE.to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                "values".to_string(),
                "roles: \"kube\"\n".to_string(),
            )])),
            ..Default::default()
        });

        let err = sync(&platform, &proxy)
            .ensure_config_record(&enrollment, &test_config(), &[TokenRole::KubeJoin])
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("authToken"));
    }

    // ===== Deletion =====

    #[tokio::test]
    async fn test_delete_records_are_idempotent() {
        let platform = Arc::new(FakePlatform::new());
        let proxy = Arc::new(FakeProxyClient::new(FakeProxyConfig::default()));
        let enrollment = test_enrollment("demo");
        let artifact_sync = sync(&platform, &proxy);

        // Nothing exists yet: both deletes are clean no-ops
        artifact_sync.delete_credential_record(&enrollment).await.unwrap();
        artifact_sync
            .delete_config_record(&enrollment, &test_config())
            .await
            .unwrap();
        assert!(platform.mutating_ops().is_empty());

        artifact_sync.ensure_credential_record(&enrollment).await.unwrap();
        artifact_sync.delete_credential_record(&enrollment).await.unwrap();
        assert!(platform.secret(NAMESPACE, "demo-teleport-join-token").is_none());

        // Second delete after the fact is still success
        artifact_sync.delete_credential_record(&enrollment).await.unwrap();
    }

    // ===== values payload helpers =====

    #[test]
    fn test_read_auth_token() {
        let values = "roles: kube\nauthToken: abc\n";
        assert_eq!(read_auth_token(values).unwrap(), "abc");
    }

    #[test]
    fn test_read_auth_token_missing_key() {
        let err = read_auth_token("roles: kube\n").unwrap_err();
        assert!(err.contains("authToken"));
    }

    #[test]
    fn test_read_auth_token_not_a_mapping() {
        let err = read_auth_token("- just\n- a\n- list\n").unwrap_err();
        assert!(err.contains("not a mapping"));
    }

    #[test]
    fn test_update_auth_token_touches_only_the_token() {
        let values = "roles: kube\nauthToken: old\nextra: x\n";
        let updated = update_auth_token(values, "new").unwrap();
        let parsed: BTreeMap<String, String> = serde_yaml::from_str(&updated).unwrap();
        assert_eq!(parsed.get("authToken").unwrap(), "new");
        assert_eq!(parsed.get("extra").unwrap(), "x");
        assert_eq!(parsed.get("roles").unwrap(), "kube");
    }

    #[test]
    fn test_render_config_values_key_order() {
        let values = render_config_values(
            &test_config(),
            "mgmt-demo",
            &[TokenRole::KubeJoin],
            "tok",
        );
        let keys: Vec<&str> = values
            .lines()
            .filter_map(|l| l.split(':').next())
            .collect();
        assert_eq!(keys, vec!["roles", "authToken", "proxyAddr", "kubeClusterName"]);
    }

    /// Fifty distinct owners ensured concurrently against shared stores end
    /// up with exactly one valid token each.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_ensures_for_distinct_owners() {
        let platform = Arc::new(FakePlatform::new());
        let proxy = Arc::new(FakeProxyClient::new(FakeProxyConfig::default()));
        let generator = Arc::new(SequenceGenerator::new("tok"));

        let mut handles = Vec::new();
        for i in 0..50 {
            let platform = platform.clone();
            let proxy = proxy.clone();
            let generator = generator.clone();
            handles.push(tokio::spawn(async move {
                let cluster_name = format!("cluster-{i}");
                let enrollment = Enrollment {
                    cluster_name: cluster_name.clone(),
                    cluster_namespace: NAMESPACE.to_string(),
                    register_name: register_name("mgmt", &cluster_name),
                    install_namespace: NAMESPACE.to_string(),
                    is_management_cluster: false,
                };
                let tokens = TokenLifecycle::new(proxy, generator);
                ArtifactSync::new(platform, tokens)
                    .ensure_credential_record(&enrollment)
                    .await
                    .unwrap();
                enrollment
            }));
        }

        for handle in handles {
            let enrollment = handle.await.unwrap();
            let owned = proxy.tokens_for(&enrollment.register_name);
            assert_eq!(
                owned.len(),
                1,
                "owner {} must hold exactly one token",
                enrollment.register_name
            );

            let secret = platform
                .secret(NAMESPACE, &credential_record_name(&enrollment.cluster_name))
                .unwrap();
            assert_eq!(
                secret_field(&secret, "joinToken").unwrap(),
                owned[0].name
            );
        }
    }
}
