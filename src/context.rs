// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared context for all controllers.
//!
//! Every reconciliation receives an `Arc<Context>` carrying the injected
//! collaborators: the platform client, the guarded proxy session, the
//! configuration snapshot handle, and the token name generator. All of them
//! are explicit constructor arguments - test setups build a `Context` from
//! fakes the same way `main` builds one from production implementations.

use std::sync::Arc;

use crate::config::ConfigHandle;
use crate::identity::{ProxySession, SharedProxy};
use crate::platform::PlatformClient;
use crate::tokens::{TokenGenerator, TokenLifecycle};

/// Shared context passed to all controllers.
pub struct Context {
    /// Orchestration-platform client
    pub platform: Arc<dyn PlatformClient>,

    /// Guarded holder of the current proxy session
    pub proxy: Arc<SharedProxy>,

    /// Hot-reloadable operator configuration
    pub config: ConfigHandle,

    /// Token name generator
    pub generator: Arc<dyn TokenGenerator>,

    /// Namespace the operator runs in (singleton config/identity objects,
    /// management-cluster artifacts)
    pub operator_namespace: String,

    /// Whether teardown also removes agent state Secrets
    pub cleanup_agent_state: bool,
}

impl Context {
    /// Build a token lifecycle manager bound to one session snapshot.
    #[must_use]
    pub fn token_lifecycle(&self, session: &ProxySession) -> TokenLifecycle {
        TokenLifecycle::new(session.client.clone(), self.generator.clone())
    }
}
