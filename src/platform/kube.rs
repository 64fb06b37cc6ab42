// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Production platform client over the Kubernetes API.
//!
//! Thin mapping from the [`PlatformClient`] surface onto `kube::Api` calls.
//! Reads go through the shared retry helper (429/5xx with backoff); writes
//! run once and surface conflicts so the reconciler retries with a fresh
//! read at the next trigger.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::crd::ClusterIdentity;
use crate::platform::PlatformClient;
use crate::proxy_errors::PlatformError;
use crate::reconcilers::retry::retry_api_call;

/// [`PlatformClient`] implementation backed by a real `kube::Client`.
#[derive(Clone)]
pub struct KubePlatformClient {
    client: Client,
}

impl KubePlatformClient {
    /// Wrap a connected Kubernetes client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = kube::core::NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Map a `kube::Error` onto the platform taxonomy.
fn map_kube_error(err: kube::Error, kind: &str, namespace: &str, name: &str) -> PlatformError {
    match err {
        kube::Error::Api(ae) if ae.code == 404 => PlatformError::NotFound {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        },
        kube::Error::Api(ae) if ae.code == 409 => PlatformError::Conflict {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            reason: ae.message,
        },
        other => PlatformError::Api {
            operation: format!("{kind} {namespace}/{name}"),
            reason: other.to_string(),
        },
    }
}

/// Map a `kube::Error` from a get into `Ok(None)` on 404.
fn absent_ok<T>(
    result: Result<T, kube::Error>,
    kind: &str,
    namespace: &str,
    name: &str,
) -> Result<Option<T>, PlatformError> {
    match result {
        Ok(obj) => Ok(Some(obj)),
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
        Err(e) => Err(map_kube_error(e, kind, namespace, name)),
    }
}

async fn get_namespaced<K>(
    api: &Api<K>,
    kind: &str,
    namespace: &str,
    name: &str,
) -> Result<Option<K>, PlatformError>
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug,
{
    // retry_api_call fails fast on 404, which is the signal we map to None
    let result = api.get(name).await;
    match result {
        Err(e) if is_transient_kube_error(&e) => {
            let retried = retry_api_call(|| api.get(name), &format!("get {kind} {name}"))
                .await
                .map_err(|e| PlatformError::Api {
                    operation: format!("get {kind} {namespace}/{name}"),
                    reason: e.to_string(),
                })?;
            Ok(Some(retried))
        }
        other => absent_ok(other, kind, namespace, name),
    }
}

fn is_transient_kube_error(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(ae) => ae.code == 429 || (ae.code >= 500 && ae.code < 600),
        kube::Error::Service(_) => true,
        _ => false,
    }
}

async fn delete_namespaced<K>(
    api: &Api<K>,
    kind: &str,
    namespace: &str,
    name: &str,
) -> Result<bool, PlatformError>
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug,
{
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => {
            debug!(kind = kind, namespace = namespace, name = name, "Deleted");
            Ok(true)
        }
        Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(false),
        Err(e) => Err(map_kube_error(e, kind, namespace, name)),
    }
}

#[async_trait]
impl PlatformClient for KubePlatformClient {
    async fn get_cluster_identity(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ClusterIdentity>, PlatformError> {
        let api: Api<ClusterIdentity> = self.namespaced(namespace);
        get_namespaced(&api, "ClusterIdentity", namespace, name).await
    }

    async fn list_cluster_identities(&self) -> Result<Vec<ClusterIdentity>, PlatformError> {
        let api: Api<ClusterIdentity> = Api::all(self.client.clone());
        let lp = ListParams::default();
        let list = retry_api_call(
            || api.list(&lp),
            "list cluster identities",
        )
        .await
        .map_err(|e| PlatformError::Api {
            operation: "list ClusterIdentity".to_string(),
            reason: e.to_string(),
        })?;
        Ok(list.items)
    }

    async fn update_cluster_identity(
        &self,
        cluster: &ClusterIdentity,
    ) -> Result<(), PlatformError> {
        let namespace = cluster.namespace().unwrap_or_default();
        let name = cluster.name_any();
        let api: Api<ClusterIdentity> = self.namespaced(&namespace);
        api.replace(&name, &PostParams::default(), cluster)
            .await
            .map(|_| ())
            .map_err(|e| map_kube_error(e, "ClusterIdentity", &namespace, &name))
    }

    async fn get_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<Secret>, PlatformError> {
        let api: Api<Secret> = self.namespaced(namespace);
        get_namespaced(&api, "Secret", namespace, name).await
    }

    async fn create_secret(&self, secret: &Secret) -> Result<(), PlatformError> {
        let namespace = secret.namespace().unwrap_or_default();
        let name = secret.name_any();
        let api: Api<Secret> = self.namespaced(&namespace);
        api.create(&PostParams::default(), secret)
            .await
            .map(|_| ())
            .map_err(|e| map_kube_error(e, "Secret", &namespace, &name))
    }

    async fn update_secret(&self, secret: &Secret) -> Result<(), PlatformError> {
        let namespace = secret.namespace().unwrap_or_default();
        let name = secret.name_any();
        let api: Api<Secret> = self.namespaced(&namespace);
        api.replace(&name, &PostParams::default(), secret)
            .await
            .map(|_| ())
            .map_err(|e| map_kube_error(e, "Secret", &namespace, &name))
    }

    async fn delete_secret(&self, namespace: &str, name: &str) -> Result<bool, PlatformError> {
        let api: Api<Secret> = self.namespaced(namespace);
        delete_namespaced(&api, "Secret", namespace, name).await
    }

    async fn list_secrets(&self, namespace: &str) -> Result<Vec<Secret>, PlatformError> {
        let api: Api<Secret> = self.namespaced(namespace);
        let lp = ListParams::default();
        let list = retry_api_call(
            || api.list(&lp),
            &format!("list secrets in {namespace}"),
        )
        .await
        .map_err(|e| PlatformError::Api {
            operation: format!("list Secret {namespace}"),
            reason: e.to_string(),
        })?;
        Ok(list.items)
    }

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, PlatformError> {
        let api: Api<ConfigMap> = self.namespaced(namespace);
        get_namespaced(&api, "ConfigMap", namespace, name).await
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<(), PlatformError> {
        let namespace = config_map.namespace().unwrap_or_default();
        let name = config_map.name_any();
        let api: Api<ConfigMap> = self.namespaced(&namespace);
        api.create(&PostParams::default(), config_map)
            .await
            .map(|_| ())
            .map_err(|e| map_kube_error(e, "ConfigMap", &namespace, &name))
    }

    async fn update_config_map(&self, config_map: &ConfigMap) -> Result<(), PlatformError> {
        let namespace = config_map.namespace().unwrap_or_default();
        let name = config_map.name_any();
        let api: Api<ConfigMap> = self.namespaced(&namespace);
        api.replace(&name, &PostParams::default(), config_map)
            .await
            .map(|_| ())
            .map_err(|e| map_kube_error(e, "ConfigMap", &namespace, &name))
    }

    async fn delete_config_map(&self, namespace: &str, name: &str) -> Result<bool, PlatformError> {
        let api: Api<ConfigMap> = self.namespaced(namespace);
        delete_namespaced(&api, "ConfigMap", namespace, name).await
    }
}
