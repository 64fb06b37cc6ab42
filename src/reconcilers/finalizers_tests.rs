// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `finalizers.rs`

#[cfg(test)]
mod tests {
    use crate::constants::CLUSTER_IDENTITY_FINALIZER;
    use crate::crd::{ClusterIdentity, ClusterIdentitySpec};
    use crate::platform::fake::FakePlatform;
    use crate::reconcilers::finalizers::{ensure_finalizer, has_finalizer, remove_finalizer};

    const NAMESPACE: &str = "org-acme";
    const NAME: &str = "demo";

    fn cluster(finalizers: Option<Vec<String>>) -> ClusterIdentity {
        let mut cluster = ClusterIdentity::new(NAME, ClusterIdentitySpec::default());
        cluster.metadata.namespace = Some(NAMESPACE.to_string());
        cluster.metadata.finalizers = finalizers;
        cluster
    }

    #[test]
    fn test_has_finalizer() {
        assert!(!has_finalizer(&cluster(None), CLUSTER_IDENTITY_FINALIZER));
        assert!(!has_finalizer(
            &cluster(Some(vec!["other/finalizer".to_string()])),
            CLUSTER_IDENTITY_FINALIZER
        ));
        assert!(has_finalizer(
            &cluster(Some(vec![CLUSTER_IDENTITY_FINALIZER.to_string()])),
            CLUSTER_IDENTITY_FINALIZER
        ));
    }

    #[tokio::test]
    async fn test_ensure_finalizer_adds_when_missing() {
        let platform = FakePlatform::new();
        let initial = cluster(None);
        platform.insert_cluster_identity(initial.clone());

        ensure_finalizer(&platform, &initial, CLUSTER_IDENTITY_FINALIZER)
            .await
            .unwrap();

        let stored = platform.cluster_identity(NAMESPACE, NAME).unwrap();
        assert!(has_finalizer(&stored, CLUSTER_IDENTITY_FINALIZER));
    }

    #[tokio::test]
    async fn test_ensure_finalizer_preserves_existing_finalizers() {
        let platform = FakePlatform::new();
        let initial = cluster(Some(vec!["other/finalizer".to_string()]));
        platform.insert_cluster_identity(initial.clone());

        ensure_finalizer(&platform, &initial, CLUSTER_IDENTITY_FINALIZER)
            .await
            .unwrap();

        let stored = platform.cluster_identity(NAMESPACE, NAME).unwrap();
        let finalizers = stored.metadata.finalizers.unwrap();
        assert_eq!(finalizers.len(), 2);
        assert!(finalizers.contains(&"other/finalizer".to_string()));
    }

    #[tokio::test]
    async fn test_ensure_finalizer_is_idempotent() {
        let platform = FakePlatform::new();
        let initial = cluster(Some(vec![CLUSTER_IDENTITY_FINALIZER.to_string()]));
        platform.insert_cluster_identity(initial.clone());

        ensure_finalizer(&platform, &initial, CLUSTER_IDENTITY_FINALIZER)
            .await
            .unwrap();

        assert!(platform.mutating_ops().is_empty(), "present finalizer means no write");
    }

    #[tokio::test]
    async fn test_remove_finalizer() {
        let platform = FakePlatform::new();
        let initial = cluster(Some(vec![
            "other/finalizer".to_string(),
            CLUSTER_IDENTITY_FINALIZER.to_string(),
        ]));
        platform.insert_cluster_identity(initial.clone());

        remove_finalizer(&platform, &initial, CLUSTER_IDENTITY_FINALIZER)
            .await
            .unwrap();

        let stored = platform.cluster_identity(NAMESPACE, NAME).unwrap();
        assert!(!has_finalizer(&stored, CLUSTER_IDENTITY_FINALIZER));
        assert!(stored
            .metadata
            .finalizers
            .unwrap()
            .contains(&"other/finalizer".to_string()));
    }

    #[tokio::test]
    async fn test_remove_finalizer_is_idempotent_when_absent() {
        let platform = FakePlatform::new();
        let initial = cluster(None);
        platform.insert_cluster_identity(initial.clone());

        remove_finalizer(&platform, &initial, CLUSTER_IDENTITY_FINALIZER)
            .await
            .unwrap();
        assert!(platform.mutating_ops().is_empty());
    }
}
