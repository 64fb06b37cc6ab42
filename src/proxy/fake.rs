// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Deterministic in-memory proxy client for tests.
//!
//! Mirrors the real proxy's observable behavior - idempotent upserts and
//! deletes, label-addressable tokens, a server registry - while keeping every
//! operation synchronous over in-memory maps. Each operation can be failed
//! independently, and the flags can be flipped mid-test to exercise
//! retry-after-failure paths.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::identity::Identity;
use crate::proxy::{KubeServer, PingInfo, ProvisionToken, ProxyClient, ProxyClientFactory};
use crate::proxy_errors::ProxyError;
use crate::tokens::TokenGenerator;

const FAKE_ENDPOINT: &str = "fake-proxy:3025";

/// Seed state and failure flags for a [`FakeProxyClient`].
#[derive(Default)]
pub struct FakeProxyConfig {
    /// Fail the liveness ping
    pub fails_ping: bool,
    /// Fail single-token gets
    pub fails_get: bool,
    /// Fail token and server listings
    pub fails_list: bool,
    /// Fail token creation
    pub fails_create: bool,
    /// Fail token upserts
    pub fails_upsert: bool,
    /// Fail token deletion
    pub fails_delete: bool,
    /// Fail Kubernetes server deletion
    pub fails_delete_server: bool,
    /// Tokens present at start
    pub tokens: Vec<ProvisionToken>,
    /// Kubernetes servers present at start
    pub kubernetes_servers: Vec<KubeServer>,
}

/// In-memory [`ProxyClient`] test double.
pub struct FakeProxyClient {
    fails_ping: AtomicBool,
    fails_get: AtomicBool,
    fails_list: AtomicBool,
    fails_create: AtomicBool,
    fails_upsert: AtomicBool,
    fails_delete: AtomicBool,
    fails_delete_server: AtomicBool,
    tokens: Mutex<BTreeMap<String, ProvisionToken>>,
    servers: Mutex<BTreeMap<String, KubeServer>>,
}

impl FakeProxyClient {
    /// Build a fake from seed state and failure flags.
    #[must_use]
    pub fn new(config: FakeProxyConfig) -> Self {
        let tokens = config
            .tokens
            .into_iter()
            .map(|t| (t.name.clone(), t))
            .collect();
        let servers = config
            .kubernetes_servers
            .into_iter()
            .map(|s| (s.name.clone(), s))
            .collect();
        Self {
            fails_ping: AtomicBool::new(config.fails_ping),
            fails_get: AtomicBool::new(config.fails_get),
            fails_list: AtomicBool::new(config.fails_list),
            fails_create: AtomicBool::new(config.fails_create),
            fails_upsert: AtomicBool::new(config.fails_upsert),
            fails_delete: AtomicBool::new(config.fails_delete),
            fails_delete_server: AtomicBool::new(config.fails_delete_server),
            tokens: Mutex::new(tokens),
            servers: Mutex::new(servers),
        }
    }

    /// Flip the server-deletion failure flag at runtime.
    pub fn set_fails_delete_server(&self, fails: bool) {
        self.fails_delete_server.store(fails, Ordering::SeqCst);
    }

    /// Flip the token-deletion failure flag at runtime.
    pub fn set_fails_delete(&self, fails: bool) {
        self.fails_delete.store(fails, Ordering::SeqCst);
    }

    /// All tokens currently stored, in name order.
    #[must_use]
    pub fn stored_tokens(&self) -> Vec<ProvisionToken> {
        self.tokens.lock().unwrap().values().cloned().collect()
    }

    /// Tokens labeled with the given owner.
    #[must_use]
    pub fn tokens_for(&self, owner: &str) -> Vec<ProvisionToken> {
        self.stored_tokens()
            .into_iter()
            .filter(|t| t.owner() == Some(owner))
            .collect()
    }

    /// All servers currently registered, in name order.
    #[must_use]
    pub fn stored_servers(&self) -> Vec<KubeServer> {
        self.servers.lock().unwrap().values().cloned().collect()
    }

    fn fail(reason: &str) -> ProxyError {
        ProxyError::UnexpectedResponse {
            endpoint: FAKE_ENDPOINT.to_string(),
            status_code: 500,
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl ProxyClient for FakeProxyClient {
    async fn ping(&self) -> Result<PingInfo, ProxyError> {
        if self.fails_ping.load(Ordering::SeqCst) {
            return Err(Self::fail("fake proxy failed ping"));
        }
        Ok(PingInfo {
            server_version: "fake".to_string(),
            cluster_name: "fake-proxy".to_string(),
        })
    }

    async fn get_token(&self, name: &str) -> Result<ProvisionToken, ProxyError> {
        if self.fails_get.load(Ordering::SeqCst) {
            return Err(Self::fail("fake proxy failed to get token"));
        }
        self.tokens
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| ProxyError::TokenNotFound {
                name: name.to_string(),
                endpoint: FAKE_ENDPOINT.to_string(),
            })
    }

    async fn get_tokens(&self) -> Result<Vec<ProvisionToken>, ProxyError> {
        if self.fails_list.load(Ordering::SeqCst) {
            return Err(Self::fail("fake proxy failed to list tokens"));
        }
        Ok(self.stored_tokens())
    }

    async fn create_token(&self, token: &ProvisionToken) -> Result<(), ProxyError> {
        if self.fails_create.load(Ordering::SeqCst) {
            return Err(Self::fail("fake proxy failed to create token"));
        }
        let mut tokens = self.tokens.lock().unwrap();
        if tokens.contains_key(&token.name) {
            return Err(Self::fail("fake proxy: token already exists"));
        }
        tokens.insert(token.name.clone(), token.clone());
        Ok(())
    }

    async fn upsert_token(&self, token: &ProvisionToken) -> Result<(), ProxyError> {
        if self.fails_upsert.load(Ordering::SeqCst) {
            return Err(Self::fail("fake proxy failed to upsert token"));
        }
        self.tokens
            .lock()
            .unwrap()
            .insert(token.name.clone(), token.clone());
        Ok(())
    }

    async fn delete_token(&self, name: &str) -> Result<(), ProxyError> {
        if self.fails_delete.load(Ordering::SeqCst) {
            return Err(Self::fail("fake proxy failed to delete token"));
        }
        self.tokens.lock().unwrap().remove(name);
        Ok(())
    }

    async fn get_kubernetes_servers(&self) -> Result<Vec<KubeServer>, ProxyError> {
        if self.fails_list.load(Ordering::SeqCst) {
            return Err(Self::fail("fake proxy failed to list kubernetes servers"));
        }
        Ok(self.stored_servers())
    }

    async fn delete_kubernetes_server(
        &self,
        host_id: &str,
        cluster_name: &str,
    ) -> Result<(), ProxyError> {
        if self.fails_delete_server.load(Ordering::SeqCst) {
            return Err(Self::fail("fake proxy failed to delete kubernetes server"));
        }
        self.servers
            .lock()
            .unwrap()
            .retain(|_, s| !(s.host_id == host_id && s.cluster == cluster_name));
        Ok(())
    }
}

/// Factory handing out one shared [`FakeProxyClient`].
pub struct FakeProxyClientFactory {
    client: Arc<FakeProxyClient>,
    connects: AtomicUsize,
}

impl FakeProxyClientFactory {
    /// Wrap an existing fake client.
    #[must_use]
    pub fn new(client: Arc<FakeProxyClient>) -> Self {
        Self {
            client,
            connects: AtomicUsize::new(0),
        }
    }

    /// Number of `connect` calls observed.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProxyClientFactory for FakeProxyClientFactory {
    async fn connect(
        &self,
        _proxy_addr: &str,
        _identity: &Identity,
    ) -> Result<Arc<dyn ProxyClient>, ProxyError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.client.ping().await?;
        Ok(self.client.clone())
    }
}

/// Deterministic token name generator for tests.
///
/// Produces `{prefix}-1`, `{prefix}-2`, ...
pub struct SequenceGenerator {
    prefix: String,
    counter: AtomicUsize,
}

impl SequenceGenerator {
    /// Create a generator with the given name prefix.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicUsize::new(0),
        }
    }
}

impl TokenGenerator for SequenceGenerator {
    fn generate(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}-{n}", self.prefix)
    }
}
