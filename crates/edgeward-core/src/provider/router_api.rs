// ── Router API provider ──
//
// Software routers that expose their configuration as a JSON REST API.
// Every domain is one collection resource that is read with `GET` and
// replaced wholesale with `PUT`:
//
//   GET|PUT /api/v1/routes | nat | firewall | vpn | ddns
//   GET     /api/v1/metrics
//   GET     /api/v1/interfaces

use async_trait::async_trait;
use edgeward_api::TransportConfig;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use secrecy::ExposeSecret;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use super::{Provider, ProviderError};
use crate::config::RouterApiSettings;
use crate::error::CoreError;
use crate::model::{
    ActualState, DdnsBinding, FirewallRule, Interface, Metrics, NatRule, Route, VpnProfile,
};

pub struct RouterApiProvider {
    http: reqwest::Client,
    base_url: Url,
}

impl RouterApiProvider {
    pub fn new(settings: &RouterApiSettings) -> Result<Self, CoreError> {
        let mut headers = HeaderMap::new();
        if let Some(key) = &settings.api_key {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", key.expose_secret()))
                .map_err(|_| CoreError::Config {
                    message: "router API key contains invalid header characters".into(),
                })?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let transport = TransportConfig {
            tls: settings.tls.clone(),
            timeout: settings.timeout,
        };
        let http = transport.build_client_with_headers(headers)?;
        Ok(Self::with_client(http, settings.url.clone()))
    }

    /// Use a pre-built HTTP client.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── URL builders ─────────────────────────────────────────────────

    fn url(&self, collection: &str) -> Result<Url, ProviderError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}/api/v1/{collection}"))
            .map_err(|e| ProviderError::Permanent(format!("invalid router API URL: {e}")))
    }

    // ── Request helpers ──────────────────────────────────────────────

    async fn get<T: DeserializeOwned>(&self, collection: &str) -> Result<T, ProviderError> {
        let url = self.url(collection)?;
        debug!("GET {}", url);

        let resp = self.http.get(url).send().await.map_err(classify_transport)?;
        let resp = check_status(resp).await?;
        resp.json().await.map_err(|e| {
            ProviderError::Permanent(format!("unexpected {collection} response body: {e}"))
        })
    }

    async fn put<T: Serialize + Sync>(&self, collection: &str, set: &[T]) -> Result<(), ProviderError> {
        let url = self.url(collection)?;
        debug!(entries = set.len(), "PUT {}", url);

        let resp = self
            .http
            .put(url)
            .json(set)
            .send()
            .await
            .map_err(classify_transport)?;
        check_status(resp).await.map(|_| ())
    }
}

/// Map a non-success status to a failure class.
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    let message = if body.trim().is_empty() {
        format!("router API returned {status}")
    } else {
        format!("router API returned {status}: {}", body.trim())
    };
    Err(classify_status(status, message))
}

pub(crate) fn classify_status(status: StatusCode, message: String) -> ProviderError {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::PermissionDenied(message),
        StatusCode::REQUEST_TIMEOUT
        | StatusCode::CONFLICT
        | StatusCode::LOCKED
        | StatusCode::TOO_MANY_REQUESTS => ProviderError::Transient(message),
        s if s.is_server_error() => ProviderError::Transient(message),
        _ => ProviderError::Permanent(message),
    }
}

fn classify_transport(err: reqwest::Error) -> ProviderError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        ProviderError::Transient(format!("router API unreachable: {err}"))
    } else {
        ProviderError::Permanent(format!("router API request failed: {err}"))
    }
}

#[async_trait]
impl Provider for RouterApiProvider {
    fn name(&self) -> &'static str {
        "router-api"
    }

    async fn read_config(&self) -> Result<ActualState, ProviderError> {
        Ok(ActualState {
            routes: self.get("routes").await?,
            nat: self.get("nat").await?,
            firewall: self.get("firewall").await?,
            vpn: self.get("vpn").await?,
            ddns: self.get("ddns").await?,
        })
    }

    async fn apply_firewall(&self, rules: &[FirewallRule]) -> Result<(), ProviderError> {
        self.put("firewall", rules).await
    }

    async fn apply_nat(&self, rules: &[NatRule]) -> Result<(), ProviderError> {
        self.put("nat", rules).await
    }

    async fn apply_routing(&self, routes: &[Route]) -> Result<(), ProviderError> {
        self.put("routes", routes).await
    }

    async fn apply_vpn(&self, profiles: &[VpnProfile]) -> Result<(), ProviderError> {
        self.put("vpn", profiles).await
    }

    async fn apply_ddns(&self, bindings: &[DdnsBinding]) -> Result<(), ProviderError> {
        self.put("ddns", bindings).await
    }

    async fn get_metrics(&self) -> Result<Metrics, ProviderError> {
        self.get("metrics").await
    }

    async fn get_interfaces(&self) -> Result<Vec<Interface>, ProviderError> {
        self.get("interfaces").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::FailureClass;

    #[test]
    fn status_classification() {
        let class = |code: u16| {
            classify_status(StatusCode::from_u16(code).unwrap_or_default(), String::new()).class()
        };

        assert_eq!(class(401), FailureClass::PermissionDenied);
        assert_eq!(class(403), FailureClass::PermissionDenied);
        assert_eq!(class(409), FailureClass::Transient);
        assert_eq!(class(423), FailureClass::Transient);
        assert_eq!(class(429), FailureClass::Transient);
        assert_eq!(class(503), FailureClass::Transient);
        assert_eq!(class(400), FailureClass::Permanent);
        assert_eq!(class(422), FailureClass::Permanent);
    }
}
