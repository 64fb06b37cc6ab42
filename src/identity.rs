// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Operator identity and the shared proxy session.
//!
//! The operator authenticates to the access-proxy with a short-lived identity
//! bundle rotated externally (a bot writes it into the `fleetgate-identity`
//! Secret). Reconciliations for different clusters run in parallel and all
//! share one (client, identity) pair, so the pair lives behind [`SharedProxy`]:
//! readers take an immutable [`ProxySession`] snapshot, and the refresher
//! builds a replacement session off the critical path before swapping the
//! pointer. At most one refresh runs at a time; reconciliations are never
//! blocked on more than the pointer swap itself.

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha512};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify, RwLock};
use tracing::{debug, info, warn};

use crate::config::ConfigHandle;
use crate::constants::{
    IDENTITY_MAX_AGE_SECS, IDENTITY_POLL_INTERVAL_SECS, IDENTITY_SECRET_KEY, IDENTITY_SECRET_NAME,
};
use crate::metrics::record_identity_refresh;
use crate::platform::{secret_field, PlatformClient};
use crate::proxy::{ProxyClient, ProxyClientFactory};
use crate::proxy_errors::PlatformError;

/// The operator's proxy-facing credential bundle.
#[derive(Clone, Debug)]
pub struct Identity {
    /// Identity file material as read from the Secret
    pub identity_file: String,

    /// When the material was read
    pub last_read: DateTime<Utc>,
}

impl Identity {
    /// Wrap freshly read identity material.
    #[must_use]
    pub fn new(identity_file: String) -> Self {
        Self {
            identity_file,
            last_read: Utc::now(),
        }
    }

    /// Seconds since the material was read.
    #[must_use]
    pub fn age_secs(&self) -> i64 {
        (Utc::now() - self.last_read).num_seconds()
    }

    /// Stable fingerprint of the identity material.
    ///
    /// Used to detect rotation without comparing the material itself in logs.
    #[must_use]
    pub fn hash(&self) -> String {
        let mut hasher = Sha512::new();
        hasher.update(self.identity_file.as_bytes());
        let sum = hasher.finalize();
        sum.iter().map(|b| format!("{b:02x}")).collect()
    }
}

/// Load the identity bundle from its Secret.
///
/// # Errors
///
/// Returns [`PlatformError::NotFound`] if the Secret is absent and
/// [`PlatformError::Malformed`] if the identity key is missing.
pub async fn load_identity(
    platform: &dyn PlatformClient,
    namespace: &str,
) -> Result<Identity, PlatformError> {
    let secret = platform
        .get_secret(namespace, IDENTITY_SECRET_NAME)
        .await?
        .ok_or_else(|| PlatformError::NotFound {
            kind: "Secret".to_string(),
            namespace: namespace.to_string(),
            name: IDENTITY_SECRET_NAME.to_string(),
        })?;

    let identity_file = secret_field(&secret, IDENTITY_SECRET_KEY).ok_or_else(|| {
        PlatformError::malformed(
            "Secret",
            namespace,
            IDENTITY_SECRET_NAME,
            format!("required key '{IDENTITY_SECRET_KEY}' not found"),
        )
    })?;

    Ok(Identity::new(identity_file))
}

/// An immutable (client, identity) snapshot.
///
/// Handed out as a unit so a reconciliation never mixes a client built from
/// one identity with the metadata of another.
pub struct ProxySession {
    /// Connected proxy client
    pub client: Arc<dyn ProxyClient>,

    /// Identity the client was built from
    pub identity: Identity,
}

/// Guarded holder of the current [`ProxySession`].
pub struct SharedProxy {
    session: RwLock<Arc<ProxySession>>,
    refresh_gate: Mutex<()>,
    refresh_requested: Notify,
}

impl SharedProxy {
    /// Publish an initial session.
    #[must_use]
    pub fn new(initial: ProxySession) -> Self {
        Self {
            session: RwLock::new(Arc::new(initial)),
            refresh_gate: Mutex::new(()),
            refresh_requested: Notify::new(),
        }
    }

    /// Current session snapshot.
    pub async fn session(&self) -> Arc<ProxySession> {
        self.session.read().await.clone()
    }

    /// Ask the refresher to rebuild the session as soon as possible.
    ///
    /// Used by the config change detector when the proxy address changes.
    pub fn request_refresh(&self) {
        self.refresh_requested.notify_one();
    }

    /// Wait until a refresh has been requested.
    pub async fn refresh_requested(&self) {
        self.refresh_requested.notified().await;
    }

    /// Rebuild the session from the identity Secret and swap it in.
    ///
    /// Holds the refresh gate for the whole rebuild so at most one refresh
    /// runs at a time, but takes the session write lock only for the pointer
    /// swap - all network I/O (secret read, dial, ping) happens before it.
    ///
    /// Returns `true` if a new session was swapped in, `false` if the current
    /// one was still fresh and `force` was not set.
    ///
    /// # Errors
    ///
    /// Returns an error if the identity cannot be read or the proxy cannot be
    /// reached; the previous session stays published in that case.
    pub async fn refresh(
        &self,
        platform: &dyn PlatformClient,
        factory: &dyn ProxyClientFactory,
        namespace: &str,
        proxy_addr: &str,
        force: bool,
    ) -> Result<bool> {
        let _gate = self.refresh_gate.lock().await;

        let identity = load_identity(platform, namespace)
            .await
            .context("read operator identity secret")?;

        let current = self.session().await;
        let rotated = identity.hash() != current.identity.hash();
        let stale = current.identity.age_secs() >= IDENTITY_MAX_AGE_SECS as i64;
        if !force && !rotated && !stale {
            debug!("Proxy identity unchanged and session fresh, skipping refresh");
            return Ok(false);
        }

        let client = factory
            .connect(proxy_addr, &identity)
            .await
            .context("connect to access proxy with refreshed identity")?;

        let next = Arc::new(ProxySession { client, identity });
        *self.session.write().await = next;

        info!(
            proxy = proxy_addr,
            rotated = rotated,
            forced = force,
            "Swapped in refreshed proxy session"
        );
        Ok(true)
    }
}

/// Background task keeping the shared proxy session fresh.
///
/// Polls on a fixed interval and additionally wakes immediately when a
/// refresh is requested (which forces a rebuild even if the identity
/// material is unchanged). Errors are logged and retried on the next tick -
/// reconcilers keep using the previous session meanwhile.
pub async fn run_identity_refresher(
    proxy: Arc<SharedProxy>,
    platform: Arc<dyn PlatformClient>,
    factory: Arc<dyn ProxyClientFactory>,
    config: ConfigHandle,
    namespace: String,
) -> Result<()> {
    info!("Starting identity refresher");
    loop {
        let force = tokio::select! {
            () = tokio::time::sleep(std::time::Duration::from_secs(IDENTITY_POLL_INTERVAL_SECS)) => false,
            () = proxy.refresh_requested() => {
                info!("Proxy session refresh requested");
                true
            }
        };

        let proxy_addr = config.snapshot().await.proxy_addr.clone();
        match proxy
            .refresh(platform.as_ref(), factory.as_ref(), &namespace, &proxy_addr, force)
            .await
        {
            Ok(true) => record_identity_refresh("success"),
            Ok(false) => {}
            Err(e) => {
                record_identity_refresh("error");
                warn!(error = %e, "Proxy session refresh failed, keeping previous session");
            }
        }
    }
}

#[cfg(test)]
#[path = "identity_tests.rs"]
mod identity_tests;
