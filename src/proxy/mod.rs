// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Access-proxy client abstraction.
//!
//! The proxy is the centralized identity-aware gateway that brokers access to
//! enrolled clusters. Fleetgate consumes a narrow slice of its API: token
//! CRUD, the Kubernetes server registry, and a liveness ping. That slice is
//! captured by the [`ProxyClient`] trait, with one production implementation
//! ([`http::HttpProxyClient`]) and one fully deterministic fake for tests
//! ([`fake::FakeProxyClient`]).
//!
//! Clients are constructed through the [`ProxyClientFactory`] seam so that
//! the identity refresher and the bootstrap path share one injection point;
//! there is no global constructor to swap.

pub mod fake;
pub mod http;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::identity::Identity;
use crate::labels::{TOKEN_CLUSTER_LABEL, TOKEN_ROLES_LABEL};
use crate::proxy_errors::ProxyError;
use crate::roles::{roles_to_string, TokenRole};

/// A join token as the proxy stores it.
///
/// Names are opaque and globally unique. A token is considered live only
/// while its expiry lies in the future; a token without an expiry is never
/// valid.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionToken {
    /// Opaque, globally unique token name (also the bearer material)
    pub name: String,

    /// Roles this token is scoped to
    pub roles: Vec<TokenRole>,

    /// Expiry timestamp; absent means the token is treated as expired
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,

    /// Token labels; Fleetgate stamps at least the owner cluster and role tag
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl ProvisionToken {
    /// Build a token owned by `owner` with the canonical Fleetgate labels.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        owner: &str,
        roles: &[TokenRole],
        expiry: DateTime<Utc>,
    ) -> Self {
        let mut sorted: Vec<TokenRole> = roles.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        Self {
            name: name.into(),
            labels: BTreeMap::from([
                (TOKEN_CLUSTER_LABEL.to_string(), owner.to_string()),
                (TOKEN_ROLES_LABEL.to_string(), roles_to_string(roles)),
            ]),
            roles: sorted,
            expiry: Some(expiry),
        }
    }

    /// The owner cluster's register name, if the token carries one.
    #[must_use]
    pub fn owner(&self) -> Option<&str> {
        self.labels.get(TOKEN_CLUSTER_LABEL).map(String::as_str)
    }
}

/// One entry of the proxy's Kubernetes server registry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KubeServer {
    /// Server resource name
    pub name: String,

    /// Host ID of the agent heartbeating this server
    pub host_id: String,

    /// Kubernetes cluster name the server belongs to (the register name)
    pub cluster: String,
}

/// Response of the proxy liveness ping.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingInfo {
    /// Proxy software version
    #[serde(default)]
    pub server_version: String,

    /// Name of the proxy's own cluster
    #[serde(default)]
    pub cluster_name: String,
}

/// The access-proxy capability Fleetgate consumes.
///
/// Write operations are idempotent where the contract says so: upserting an
/// existing token replaces it, deleting an absent token or server succeeds.
#[async_trait]
pub trait ProxyClient: Send + Sync {
    /// Liveness ping; also validates the session credentials.
    async fn ping(&self) -> Result<PingInfo, ProxyError>;

    /// Fetch a single token by name.
    async fn get_token(&self, name: &str) -> Result<ProvisionToken, ProxyError>;

    /// Fetch all tokens.
    async fn get_tokens(&self) -> Result<Vec<ProvisionToken>, ProxyError>;

    /// Create a token; fails if a token with the same name exists.
    async fn create_token(&self, token: &ProvisionToken) -> Result<(), ProxyError>;

    /// Create or replace a token (idempotent).
    async fn upsert_token(&self, token: &ProvisionToken) -> Result<(), ProxyError>;

    /// Delete a token; absence is success.
    async fn delete_token(&self, name: &str) -> Result<(), ProxyError>;

    /// Fetch the Kubernetes server registry.
    async fn get_kubernetes_servers(&self) -> Result<Vec<KubeServer>, ProxyError>;

    /// Delete one Kubernetes server registration; absence is success.
    async fn delete_kubernetes_server(
        &self,
        host_id: &str,
        cluster_name: &str,
    ) -> Result<(), ProxyError>;
}

/// Constructor seam for proxy clients.
///
/// Production connects over HTTPS and pings before handing the client out;
/// tests inject a factory returning a [`fake::FakeProxyClient`].
#[async_trait]
pub trait ProxyClientFactory: Send + Sync {
    /// Build a client for `proxy_addr` authenticated with `identity`.
    ///
    /// The returned client must already have passed a liveness check.
    async fn connect(
        &self,
        proxy_addr: &str,
        identity: &Identity,
    ) -> Result<Arc<dyn ProxyClient>, ProxyError>;
}
