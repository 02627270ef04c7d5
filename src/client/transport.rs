//! Gateway transport over HTTP
//!
//! The wire protocol of the messaging network itself is not the engine's
//! business; it talks to a gateway that exposes connect/send/status over
//! HTTP and maps gateway responses into the transport error taxonomy. Each
//! connection gets its own HTTP client so a proxy assignment applies to
//! every request made through it.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::models::Proxy;
use crate::utils::error::TransportError;

use super::session::SessionHandle;

/// Default bound for a proxied connection attempt
pub const DEFAULT_PROXY_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for direct connections and in-flight requests
const DIRECT_TIMEOUT: Duration = Duration::from_secs(120);

/// Creates live connections for accounts
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish a connection for the account behind `session`.
    ///
    /// `proxy` routes all connection traffic through the given endpoint;
    /// `timeout` bounds the connection attempt (proxied attempts pass the
    /// pool bound, direct attempts pass `None` and use network defaults).
    async fn connect(
        &self,
        session: &SessionHandle,
        proxy: Option<&Proxy>,
        timeout: Option<Duration>,
    ) -> Result<Box<dyn Connection>, TransportError>;
}

/// One live account connection
///
/// Dropping the connection releases it; there is no explicit close call.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Account this connection belongs to
    fn account_id(&self) -> &str;

    /// Perform one send attempt against a target
    async fn send_message(&self, target: &str, message: &str) -> Result<(), TransportError>;

    /// Query the network for this account's restriction status; returns the
    /// raw response text for marker classification
    async fn probe_health(&self) -> Result<String, TransportError>;
}

/// Error payload returned by the gateway
#[derive(Debug, Deserialize, Default)]
struct GatewayErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    retry_after_secs: Option<u64>,
}

/// HTTP gateway transport
pub struct HttpTransport {
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { base_url }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn connect(
        &self,
        session: &SessionHandle,
        proxy: Option<&Proxy>,
        timeout: Option<Duration>,
    ) -> Result<Box<dyn Connection>, TransportError> {
        let mut builder = reqwest::Client::builder()
            .timeout(timeout.unwrap_or(DIRECT_TIMEOUT))
            .gzip(true)
            .cookie_store(true);

        if let Some(proxy) = proxy {
            builder = builder.proxy(reqwest::Proxy::all(&proxy.endpoint)?);
        }

        let client = builder.build()?;

        let conn = HttpConnection {
            client,
            base_url: self.base_url.clone(),
            account_id: session.account_id.clone(),
            auth_token: session.auth_token.clone(),
        };

        // Handshake up front so connect failures (including proxy
        // unreachability) surface here, not on the first send.
        conn.handshake().await?;

        Ok(Box::new(conn))
    }
}

/// Live connection through the HTTP gateway
struct HttpConnection {
    client: reqwest::Client,
    base_url: String,
    account_id: String,
    auth_token: String,
}

impl HttpConnection {
    async fn handshake(&self) -> Result<(), TransportError> {
        let response = self
            .client
            .post(format!("{}/v1/connect", self.base_url))
            .bearer_auth(&self.auth_token)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        if response.status().is_success() {
            return Ok(());
        }
        Err(classify_response(response).await)
    }
}

#[async_trait]
impl Connection for HttpConnection {
    fn account_id(&self) -> &str {
        &self.account_id
    }

    async fn send_message(&self, target: &str, message: &str) -> Result<(), TransportError> {
        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .bearer_auth(&self.auth_token)
            .json(&serde_json::json!({ "target": target, "body": message }))
            .send()
            .await
            .map_err(map_reqwest_error)?;

        if response.status().is_success() {
            return Ok(());
        }
        Err(classify_response(response).await)
    }

    async fn probe_health(&self) -> Result<String, TransportError> {
        let response = self
            .client
            .get(format!("{}/v1/accounts/self/status", self.base_url))
            .bearer_auth(&self.auth_token)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        if response.status().is_success() {
            return response.text().await.map_err(map_reqwest_error);
        }
        Err(classify_response(response).await)
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() || err.is_connect() {
        TransportError::Timeout
    } else {
        TransportError::Http(err)
    }
}

/// Map a non-success gateway response into the transport taxonomy
async fn classify_response(response: reqwest::Response) -> TransportError {
    let status = response.status();
    let body: GatewayErrorBody = response.json().await.unwrap_or_default();

    match (status, body.error.as_str()) {
        (_, "account_banned") | (_, "account_deactivated") => TransportError::Blocked,
        (_, "privacy_restricted") => TransportError::PrivacyRestricted,
        (_, "mutual_contact_required") => TransportError::MutualContactRequired,
        (_, "peer_flood") => TransportError::PeerFlood,
        (StatusCode::TOO_MANY_REQUESTS, _) | (_, "flood_wait") => {
            TransportError::FloodWait(Duration::from_secs(body.retry_after_secs.unwrap_or(60)))
        }
        (StatusCode::NOT_FOUND, _) | (_, "target_not_found") => {
            TransportError::TargetNotFound(body.message)
        }
        (StatusCode::REQUEST_TIMEOUT, _) | (StatusCode::GATEWAY_TIMEOUT, _) => {
            TransportError::Timeout
        }
        _ => TransportError::Gateway {
            status: status.as_u16(),
            message: if body.message.is_empty() {
                body.error
            } else {
                body.message
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash_stripped() {
        let transport = HttpTransport::new("http://gateway.local/");
        assert_eq!(transport.base_url, "http://gateway.local");
    }
}
