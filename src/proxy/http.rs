// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Production access-proxy client over HTTPS.
//!
//! Talks JSON to the proxy's management API. Every request carries the
//! operator's identity material and a per-request timeout, so a stuck proxy
//! can never wedge a reconciliation. Idempotent reads retry transient
//! failures with the shared backoff policy; writes surface them to the
//! caller, which retries at the next reconciliation trigger.

use async_trait::async_trait;
use reqwest::{Client as HttpClient, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::constants::PROXY_REQUEST_TIMEOUT_SECS;
use crate::identity::Identity;
use crate::proxy::{KubeServer, PingInfo, ProvisionToken, ProxyClient, ProxyClientFactory};
use crate::proxy_errors::ProxyError;
use crate::reconcilers::retry::{is_retryable_http_status, proxy_backoff};

/// HTTPS/JSON client for the access-proxy management API.
#[derive(Clone)]
pub struct HttpProxyClient {
    http: HttpClient,
    base_url: String,
    endpoint: String,
    identity_material: Arc<String>,
}

impl HttpProxyClient {
    /// Build a client for `proxy_addr` authenticated with `identity`.
    ///
    /// `proxy_addr` is a bare `host:port`; an explicit `http://` or
    /// `https://` scheme is honored as-is (plain HTTP is only useful against
    /// test servers).
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::ConnectionFailed`] if the underlying HTTP client
    /// cannot be constructed.
    pub fn new(proxy_addr: &str, identity: &Identity) -> Result<Self, ProxyError> {
        let base_url = if proxy_addr.starts_with("http://") || proxy_addr.starts_with("https://") {
            proxy_addr.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", proxy_addr.trim_end_matches('/'))
        };
        url::Url::parse(&base_url).map_err(|e| ProxyError::ConnectionFailed {
            endpoint: proxy_addr.to_string(),
            reason: format!("invalid proxy address: {e}"),
        })?;

        let http = HttpClient::builder()
            .timeout(Duration::from_secs(PROXY_REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| ProxyError::ConnectionFailed {
                endpoint: proxy_addr.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            http,
            base_url,
            endpoint: proxy_addr.to_string(),
            identity_material: Arc::new(identity.identity_file.trim().to_string()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{path}", self.base_url)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, self.url(path))
            .bearer_auth(self.identity_material.as_str())
    }

    fn classify_send_error(&self, err: &reqwest::Error) -> ProxyError {
        if err.is_timeout() {
            ProxyError::RequestTimeout {
                endpoint: self.endpoint.clone(),
                timeout_ms: PROXY_REQUEST_TIMEOUT_SECS * 1000,
            }
        } else {
            ProxyError::ConnectionFailed {
                endpoint: self.endpoint.clone(),
                reason: err.to_string(),
            }
        }
    }

    /// Map a non-success response to the error taxonomy.
    async fn response_error(&self, response: Response) -> ProxyError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProxyError::Unauthenticated {
                endpoint: self.endpoint.clone(),
                reason: body,
            },
            _ => ProxyError::UnexpectedResponse {
                endpoint: self.endpoint.clone(),
                status_code: status.as_u16(),
                reason: body,
            },
        }
    }

    /// Execute an idempotent GET with transient-failure retries and decode
    /// the JSON body.
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ProxyError> {
        let mut backoff = proxy_backoff();
        loop {
            let result = self.request(Method::GET, path).send().await;

            let retry_after = match result {
                Ok(response) if response.status().is_success() => {
                    return response
                        .json::<T>()
                        .await
                        .map_err(|e| ProxyError::MalformedPayload {
                            reason: format!("decoding {path} response: {e}"),
                        });
                }
                Ok(response) if is_retryable_http_status(response.status()) => {
                    let err = self.response_error(response).await;
                    (backoff.next_backoff(), err)
                }
                Ok(response) => return Err(self.response_error(response).await),
                Err(e) => {
                    let err = self.classify_send_error(&e);
                    (backoff.next_backoff(), err)
                }
            };

            match retry_after {
                (Some(delay), err) => {
                    warn!(
                        path = path,
                        retry_after = ?delay,
                        error = %err,
                        "Transient proxy error, will retry"
                    );
                    tokio::time::sleep(delay).await;
                }
                (None, err) => return Err(err),
            }
        }
    }

    /// Execute a write request once; transient failures surface to the caller.
    async fn send_write(&self, builder: RequestBuilder) -> Result<Response, ProxyError> {
        let response = builder
            .send()
            .await
            .map_err(|e| self.classify_send_error(&e))?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(self.response_error(response).await)
        }
    }
}

#[async_trait]
impl ProxyClient for HttpProxyClient {
    async fn ping(&self) -> Result<PingInfo, ProxyError> {
        self.get_json("ping").await
    }

    async fn get_token(&self, name: &str) -> Result<ProvisionToken, ProxyError> {
        let response = self
            .request(Method::GET, &format!("tokens/{name}"))
            .send()
            .await
            .map_err(|e| self.classify_send_error(&e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(ProxyError::TokenNotFound {
                name: name.to_string(),
                endpoint: self.endpoint.clone(),
            }),
            status if status.is_success() => {
                response
                    .json()
                    .await
                    .map_err(|e| ProxyError::MalformedPayload {
                        reason: format!("decoding token '{name}': {e}"),
                    })
            }
            _ => Err(self.response_error(response).await),
        }
    }

    async fn get_tokens(&self) -> Result<Vec<ProvisionToken>, ProxyError> {
        self.get_json("tokens").await
    }

    async fn create_token(&self, token: &ProvisionToken) -> Result<(), ProxyError> {
        self.send_write(self.request(Method::POST, "tokens").json(token))
            .await?;
        debug!(token = %token.name, "Created provision token");
        Ok(())
    }

    async fn upsert_token(&self, token: &ProvisionToken) -> Result<(), ProxyError> {
        self.send_write(
            self.request(Method::PUT, &format!("tokens/{}", token.name))
                .json(token),
        )
        .await?;
        debug!(token = %token.name, "Upserted provision token");
        Ok(())
    }

    async fn delete_token(&self, name: &str) -> Result<(), ProxyError> {
        let response = self
            .request(Method::DELETE, &format!("tokens/{name}"))
            .send()
            .await
            .map_err(|e| self.classify_send_error(&e))?;

        // Absence is success on the delete path
        if response.status() == StatusCode::NOT_FOUND || response.status().is_success() {
            Ok(())
        } else {
            Err(self.response_error(response).await)
        }
    }

    async fn get_kubernetes_servers(&self) -> Result<Vec<KubeServer>, ProxyError> {
        self.get_json("kubernetes/servers").await
    }

    async fn delete_kubernetes_server(
        &self,
        host_id: &str,
        cluster_name: &str,
    ) -> Result<(), ProxyError> {
        let response = self
            .request(
                Method::DELETE,
                &format!("kubernetes/servers/{host_id}/{cluster_name}"),
            )
            .send()
            .await
            .map_err(|e| self.classify_send_error(&e))?;

        if response.status() == StatusCode::NOT_FOUND || response.status().is_success() {
            Ok(())
        } else {
            Err(self.response_error(response).await)
        }
    }
}

/// Factory producing [`HttpProxyClient`] sessions.
///
/// `connect` pings the proxy before handing the client out, so a session that
/// reaches a reconciler has already proven its credentials.
#[derive(Clone, Copy, Debug, Default)]
pub struct HttpProxyClientFactory;

impl HttpProxyClientFactory {
    /// Create a new factory.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProxyClientFactory for HttpProxyClientFactory {
    async fn connect(
        &self,
        proxy_addr: &str,
        identity: &Identity,
    ) -> Result<Arc<dyn ProxyClient>, ProxyError> {
        let client = HttpProxyClient::new(proxy_addr, identity)?;
        let info = client.ping().await?;
        debug!(
            proxy = proxy_addr,
            version = %info.server_version,
            "Connected to access proxy"
        );
        Ok(Arc::new(client))
    }
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod http_tests;
