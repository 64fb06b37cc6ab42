// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `crd.rs`

#[cfg(test)]
mod tests {
    use crate::constants::{API_GROUP, API_VERSION, KIND_CLUSTER_IDENTITY};
    use crate::crd::{ClusterIdentity, ClusterIdentitySpec};
    use kube::core::CustomResourceExt;
    use kube::Resource;

    #[test]
    fn test_crd_identity() {
        let crd = ClusterIdentity::crd();
        assert_eq!(crd.spec.group, API_GROUP);
        assert_eq!(crd.spec.names.kind, KIND_CLUSTER_IDENTITY);
        assert_eq!(crd.spec.versions[0].name, API_VERSION);
        assert_eq!(crd.spec.scope, "Namespaced");
    }

    #[test]
    fn test_spec_serializes_camel_case() {
        let spec = ClusterIdentitySpec {
            install_namespace: Some("agents".to_string()),
        };
        let json = serde_json::to_string(&spec).unwrap();
        assert!(json.contains("\"installNamespace\""));
    }

    #[test]
    fn test_spec_omits_absent_override() {
        let json = serde_json::to_string(&ClusterIdentitySpec::default()).unwrap();
        assert_eq!(json, "{}");
    }

    #[test]
    fn test_resource_metadata_accessors() {
        let cluster = ClusterIdentity::new("demo", ClusterIdentitySpec::default());
        assert_eq!(cluster.meta().name.as_deref(), Some("demo"));
        assert_eq!(ClusterIdentity::kind(&()), KIND_CLUSTER_IDENTITY);
    }
}
