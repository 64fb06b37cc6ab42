// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `identity.rs`

#[cfg(test)]
mod tests {
    use crate::constants::{IDENTITY_SECRET_KEY, IDENTITY_SECRET_NAME};
    use crate::identity::{load_identity, Identity, ProxySession, SharedProxy};
    use crate::platform::fake::FakePlatform;
    use crate::proxy::fake::{FakeProxyClient, FakeProxyClientFactory, FakeProxyConfig};
    use crate::proxy_errors::PlatformError;
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::ByteString;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    const NAMESPACE: &str = "fleetgate";

    fn identity_secret(material: &str) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(IDENTITY_SECRET_NAME.to_string()),
                namespace: Some(NAMESPACE.to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                IDENTITY_SECRET_KEY.to_string(),
                ByteString(material.as_bytes().to_vec()),
            )])),
            ..Default::default()
        }
    }

    fn shared_proxy(client: &Arc<FakeProxyClient>, material: &str) -> SharedProxy {
        SharedProxy::new(ProxySession {
            client: client.clone(),
            identity: Identity::new(material.to_string()),
        })
    }

    #[test]
    fn test_hash_is_stable_for_same_material() {
        let a = Identity::new("material".to_string());
        let b = Identity::new("material".to_string());
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn test_hash_differs_for_different_material() {
        let a = Identity::new("one".to_string());
        let b = Identity::new("two".to_string());
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_fresh_identity_has_near_zero_age() {
        let identity = Identity::new("material".to_string());
        assert!(identity.age_secs() <= 1);
    }

    #[tokio::test]
    async fn test_load_identity_reads_the_secret() {
        let platform = FakePlatform::new();
        platform.insert_secret(identity_secret("pem-material"));

        let identity = load_identity(&platform, NAMESPACE).await.unwrap();
        assert_eq!(identity.identity_file, "pem-material");
    }

    #[tokio::test]
    async fn test_load_identity_missing_secret_is_not_found() {
        let platform = FakePlatform::new();
        let err = load_identity(&platform, NAMESPACE).await.unwrap_err();
        assert!(matches!(err, PlatformError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_load_identity_missing_key_is_malformed() {
        let platform = FakePlatform::new();
        platform.insert_secret(Secret {
            metadata: ObjectMeta {
                name: Some(IDENTITY_SECRET_NAME.to_string()),
                namespace: Some(NAMESPACE.to_string()),
                ..Default::default()
            },
            ..Default::default()
        });

        let err = load_identity(&platform, NAMESPACE).await.unwrap_err();
        assert!(matches!(err, PlatformError::Malformed { .. }));
        assert!(err.to_string().contains(IDENTITY_SECRET_KEY));
    }

    #[tokio::test]
    async fn test_refresh_skips_when_identity_unchanged_and_fresh() {
        let client = Arc::new(FakeProxyClient::new(FakeProxyConfig::default()));
        let platform = FakePlatform::new();
        platform.insert_secret(identity_secret("one"));
        let proxy = shared_proxy(&client, "one");
        let factory = FakeProxyClientFactory::new(client.clone());

        let swapped = proxy
            .refresh(&platform, &factory, NAMESPACE, "proxy:443", false)
            .await
            .unwrap();
        assert!(!swapped);
        assert_eq!(factory.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_refresh_swaps_on_rotated_identity() {
        let client = Arc::new(FakeProxyClient::new(FakeProxyConfig::default()));
        let platform = FakePlatform::new();
        platform.insert_secret(identity_secret("two"));
        let proxy = shared_proxy(&client, "one");
        let factory = FakeProxyClientFactory::new(client.clone());

        let swapped = proxy
            .refresh(&platform, &factory, NAMESPACE, "proxy:443", false)
            .await
            .unwrap();
        assert!(swapped);
        assert_eq!(factory.connect_count(), 1);
        assert_eq!(proxy.session().await.identity.identity_file, "two");
    }

    #[tokio::test]
    async fn test_forced_refresh_swaps_even_when_unchanged() {
        let client = Arc::new(FakeProxyClient::new(FakeProxyConfig::default()));
        let platform = FakePlatform::new();
        platform.insert_secret(identity_secret("one"));
        let proxy = shared_proxy(&client, "one");
        let factory = FakeProxyClientFactory::new(client.clone());

        let swapped = proxy
            .refresh(&platform, &factory, NAMESPACE, "proxy:443", true)
            .await
            .unwrap();
        assert!(swapped);
        assert_eq!(factory.connect_count(), 1);
    }

    /// A failed rebuild keeps the previous session published - readers never
    /// observe a half-updated pair.
    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_session() {
        let client = Arc::new(FakeProxyClient::new(FakeProxyConfig {
            fails_ping: true,
            ..Default::default()
        }));
        let platform = FakePlatform::new();
        platform.insert_secret(identity_secret("two"));
        let proxy = shared_proxy(&client, "one");
        let factory = FakeProxyClientFactory::new(client.clone());

        let result = proxy
            .refresh(&platform, &factory, NAMESPACE, "proxy:443", false)
            .await;
        assert!(result.is_err());
        assert_eq!(proxy.session().await.identity.identity_file, "one");
    }

    #[tokio::test]
    async fn test_request_refresh_wakes_a_waiter() {
        let client = Arc::new(FakeProxyClient::new(FakeProxyConfig::default()));
        let proxy = shared_proxy(&client, "one");

        // The notification is latched, so requesting before waiting works
        proxy.request_refresh();
        tokio::time::timeout(std::time::Duration::from_millis(100), proxy.refresh_requested())
            .await
            .expect("refresh request must wake the waiter");
    }

    /// Session reads taken across a swap observe either the old pair or the
    /// new pair, never a mixture.
    #[tokio::test]
    async fn test_session_snapshots_are_consistent_across_swap() {
        let client = Arc::new(FakeProxyClient::new(FakeProxyConfig::default()));
        let platform = FakePlatform::new();
        platform.insert_secret(identity_secret("two"));
        let proxy = Arc::new(shared_proxy(&client, "one"));
        let factory = FakeProxyClientFactory::new(client.clone());

        let before = proxy.session().await;
        proxy
            .refresh(&platform, &factory, NAMESPACE, "proxy:443", true)
            .await
            .unwrap();
        let after = proxy.session().await;

        // The pre-swap snapshot is unchanged; the post-swap one is complete
        assert_eq!(before.identity.identity_file, "one");
        assert_eq!(after.identity.identity_file, "two");
    }
}
