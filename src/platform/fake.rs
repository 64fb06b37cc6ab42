// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! In-memory platform client for tests.
//!
//! Stores `ClusterIdentity`, Secret, and ConfigMap objects in plain maps and
//! mirrors the API server's observable semantics: create fails on existing
//! objects, update fails on missing ones, delete reports whether anything was
//! removed. Every mutating call is appended to an operation log so tests can
//! assert idempotence ("a second ensure produced no additional writes").

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::crd::ClusterIdentity;
use crate::platform::PlatformClient;
use crate::proxy_errors::PlatformError;

type Key = (String, String);

/// In-memory [`PlatformClient`] test double.
#[derive(Default)]
pub struct FakePlatform {
    clusters: Mutex<BTreeMap<Key, ClusterIdentity>>,
    secrets: Mutex<BTreeMap<Key, Secret>>,
    config_maps: Mutex<BTreeMap<Key, ConfigMap>>,
    ops: Mutex<Vec<String>>,
}

fn object_key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

impl FakePlatform {
    /// Create an empty fake platform.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a `ClusterIdentity`.
    pub fn insert_cluster_identity(&self, cluster: ClusterIdentity) {
        let key = object_key(&cluster.namespace().unwrap_or_default(), &cluster.name_any());
        self.clusters.lock().unwrap().insert(key, cluster);
    }

    /// Seed a Secret.
    pub fn insert_secret(&self, secret: Secret) {
        let key = object_key(&secret.namespace().unwrap_or_default(), &secret.name_any());
        self.secrets.lock().unwrap().insert(key, secret);
    }

    /// Seed a ConfigMap.
    pub fn insert_config_map(&self, config_map: ConfigMap) {
        let key = object_key(
            &config_map.namespace().unwrap_or_default(),
            &config_map.name_any(),
        );
        self.config_maps.lock().unwrap().insert(key, config_map);
    }

    /// Read back a stored `ClusterIdentity`.
    #[must_use]
    pub fn cluster_identity(&self, namespace: &str, name: &str) -> Option<ClusterIdentity> {
        self.clusters
            .lock()
            .unwrap()
            .get(&object_key(namespace, name))
            .cloned()
    }

    /// Read back a stored Secret.
    #[must_use]
    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        self.secrets
            .lock()
            .unwrap()
            .get(&object_key(namespace, name))
            .cloned()
    }

    /// Read back a stored ConfigMap.
    #[must_use]
    pub fn config_map(&self, namespace: &str, name: &str) -> Option<ConfigMap> {
        self.config_maps
            .lock()
            .unwrap()
            .get(&object_key(namespace, name))
            .cloned()
    }

    /// Log of every mutating operation, in call order.
    #[must_use]
    pub fn mutating_ops(&self) -> Vec<String> {
        self.ops.lock().unwrap().clone()
    }

    fn record(&self, op: String) {
        self.ops.lock().unwrap().push(op);
    }
}

#[async_trait]
impl PlatformClient for FakePlatform {
    async fn get_cluster_identity(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ClusterIdentity>, PlatformError> {
        Ok(self.cluster_identity(namespace, name))
    }

    async fn list_cluster_identities(&self) -> Result<Vec<ClusterIdentity>, PlatformError> {
        Ok(self.clusters.lock().unwrap().values().cloned().collect())
    }

    async fn update_cluster_identity(
        &self,
        cluster: &ClusterIdentity,
    ) -> Result<(), PlatformError> {
        let namespace = cluster.namespace().unwrap_or_default();
        let name = cluster.name_any();
        let key = object_key(&namespace, &name);
        let mut clusters = self.clusters.lock().unwrap();
        if !clusters.contains_key(&key) {
            return Err(PlatformError::NotFound {
                kind: "ClusterIdentity".to_string(),
                namespace,
                name,
            });
        }
        clusters.insert(key, cluster.clone());
        self.record(format!("update-clusteridentity {namespace}/{name}"));
        Ok(())
    }

    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Secret>, PlatformError> {
        Ok(self.secret(namespace, name))
    }

    async fn create_secret(&self, secret: &Secret) -> Result<(), PlatformError> {
        let namespace = secret.namespace().unwrap_or_default();
        let name = secret.name_any();
        let key = object_key(&namespace, &name);
        let mut secrets = self.secrets.lock().unwrap();
        if secrets.contains_key(&key) {
            return Err(PlatformError::Conflict {
                kind: "Secret".to_string(),
                namespace,
                name,
                reason: "already exists".to_string(),
            });
        }
        secrets.insert(key, secret.clone());
        self.record(format!("create-secret {namespace}/{name}"));
        Ok(())
    }

    async fn update_secret(&self, secret: &Secret) -> Result<(), PlatformError> {
        let namespace = secret.namespace().unwrap_or_default();
        let name = secret.name_any();
        let key = object_key(&namespace, &name);
        let mut secrets = self.secrets.lock().unwrap();
        if !secrets.contains_key(&key) {
            return Err(PlatformError::NotFound {
                kind: "Secret".to_string(),
                namespace,
                name,
            });
        }
        secrets.insert(key, secret.clone());
        self.record(format!("update-secret {namespace}/{name}"));
        Ok(())
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<bool, PlatformError> {
        let existed = self
            .secrets
            .lock()
            .unwrap()
            .remove(&object_key(namespace, name))
            .is_some();
        if existed {
            self.record(format!("delete-secret {namespace}/{name}"));
        }
        Ok(existed)
    }

    async fn list_secrets(&self, namespace: &str) -> Result<Vec<Secret>, PlatformError> {
        Ok(self
            .secrets
            .lock()
            .unwrap()
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, s)| s.clone())
            .collect())
    }

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, PlatformError> {
        Ok(self.config_map(namespace, name))
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<(), PlatformError> {
        let namespace = config_map.namespace().unwrap_or_default();
        let name = config_map.name_any();
        let key = object_key(&namespace, &name);
        let mut config_maps = self.config_maps.lock().unwrap();
        if config_maps.contains_key(&key) {
            return Err(PlatformError::Conflict {
                kind: "ConfigMap".to_string(),
                namespace,
                name,
                reason: "already exists".to_string(),
            });
        }
        config_maps.insert(key, config_map.clone());
        self.record(format!("create-configmap {namespace}/{name}"));
        Ok(())
    }

    async fn update_config_map(&self, config_map: &ConfigMap) -> Result<(), PlatformError> {
        let namespace = config_map.namespace().unwrap_or_default();
        let name = config_map.name_any();
        let key = object_key(&namespace, &name);
        let mut config_maps = self.config_maps.lock().unwrap();
        if !config_maps.contains_key(&key) {
            return Err(PlatformError::NotFound {
                kind: "ConfigMap".to_string(),
                namespace,
                name,
            });
        }
        config_maps.insert(key, config_map.clone());
        self.record(format!("update-configmap {namespace}/{name}"));
        Ok(())
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<bool, PlatformError> {
        let existed = self
            .config_maps
            .lock()
            .unwrap()
            .remove(&object_key(namespace, name))
            .is_some();
        if existed {
            self.record(format!("delete-configmap {namespace}/{name}"));
        }
        Ok(existed)
    }
}
