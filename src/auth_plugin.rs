use crate::{
    auth::{AccessProvider, CheckReply},
    config::HttpAuthPluginConfig,
    error::RegistryError,
    models::Identity,
};
use async_trait::async_trait;
use axum::http::StatusCode;
use reqwest::{Client, redirect::Policy};
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, error, instrument};

/// Capability-check provider backed by an external HTTP decision endpoint.
///
/// Failure mapping follows the listing contract: a backend that answers with
/// a rejection status or a decision payload yields a decision; a backend
/// that answers with anything else yields a completion-channel error (the
/// gate denies); a backend that cannot be reached at all is a provider
/// malfunction and fails the request loudly.
#[derive(Debug, Clone)]
pub struct HttpAccessProvider {
    base_url: String,
    allow_access_endpoint: String,
    client: Client,
}

impl HttpAccessProvider {
    pub fn new(cfg: &HttpAuthPluginConfig) -> Result<Self, RegistryError> {
        let base_url = cfg.base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(RegistryError::http(
                StatusCode::INTERNAL_SERVER_ERROR,
                "auth plugin base_url is required",
            ));
        }

        let timeout = Duration::from_millis(cfg.timeout_ms.max(250));
        let connect_timeout = timeout.min(Duration::from_secs(3));
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(15))
            .pool_max_idle_per_host(2)
            .tcp_keepalive(Duration::from_secs(30))
            .http1_only()
            .redirect(Policy::limited(3))
            .build()
            .map_err(|_| RegistryError::Internal)?;

        let provider = Self {
            base_url,
            allow_access_endpoint: normalize_endpoint(&cfg.allow_access_endpoint),
            client,
        };

        debug!(
            base_url = provider.base_url,
            allow_access_endpoint = provider.allow_access_endpoint,
            timeout_ms = cfg.timeout_ms,
            "initialized external access provider"
        );

        Ok(provider)
    }
}

#[async_trait]
impl AccessProvider for HttpAccessProvider {
    #[instrument(skip(self, identity), fields(package = package_name, authenticated = !identity.is_anonymous()))]
    async fn allow_access(
        &self,
        package_name: &str,
        identity: &Identity,
    ) -> Result<CheckReply, RegistryError> {
        let url = format!("{}{}", self.base_url, self.allow_access_endpoint);
        let response = self
            .client
            .post(url)
            .json(&json!({
                "package": package_name,
                "username": identity.name,
                "groups": identity.groups,
            }))
            .send()
            .await
            .map_err(|err| {
                error!(error = ?err, "external access provider unreachable");
                RegistryError::http(
                    StatusCode::BAD_GATEWAY,
                    "external access provider unavailable",
                )
            })?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            debug!(status = status.as_u16(), "access rejected by provider");
            return Ok(CheckReply::Decision(false));
        }

        if !status.is_success() {
            error!(
                status = status.as_u16(),
                "external access provider returned non-success"
            );
            return Ok(CheckReply::BackendError(format!(
                "access provider returned status {}",
                status.as_u16()
            )));
        }

        let payload = match response.json::<Value>().await {
            Ok(payload) => payload,
            Err(err) => {
                error!(error = ?err, "external access provider returned invalid JSON");
                return Ok(CheckReply::BackendError(
                    "access provider returned invalid JSON".to_string(),
                ));
            }
        };

        match payload
            .get("allowed")
            .and_then(Value::as_bool)
            .or_else(|| payload.as_bool())
        {
            Some(allowed) => Ok(CheckReply::Decision(allowed)),
            None => Ok(CheckReply::BackendError(
                "access provider reply carried no decision".to_string(),
            )),
        }
    }
}

fn normalize_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim();
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{trimmed}")
    }
}
