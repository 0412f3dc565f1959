//! Redfish HTTP transport
//!
//! Every request carries basic credentials; there is no long-lived session.
//! [`RedfishTransport`] is the raw port (any status is a transport success)
//! and [`RedfishClient`] layers status handling and the Redfish error body
//! format on top of it.

use crate::error::{ConnectionFailure, Error, Result};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// HTTP verbs used against Redfish services
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    Get,
    Post,
    Patch,
    Delete,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpMethod::Get => write!(f, "GET"),
            HttpMethod::Post => write!(f, "POST"),
            HttpMethod::Patch => write!(f, "PATCH"),
            HttpMethod::Delete => write!(f, "DELETE"),
        }
    }
}

/// Raw response
#[derive(Debug, Clone, PartialEq)]
pub struct RedfishResponse {
    pub status: u16,
    pub body: Value,
}

/// Raw transport port
#[async_trait]
pub trait RedfishTransport: Send + Sync {
    async fn request(&self, method: HttpMethod, path: &str, body: Option<Value>) -> Result<RedfishResponse>;
}

pub type RedfishTransportRef = Arc<dyn RedfishTransport>;

// =============================================================================
// reqwest Transport
// =============================================================================

/// Settings for the HTTP transport
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub address: String,
    pub username: String,
    pub password: String,
    pub verify_tls: bool,
    pub timeout: Duration,
}

/// Transport backed by `reqwest`
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl HttpTransport {
    pub fn new(settings: &HttpSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("MAAS")
            .danger_accept_invalid_certs(!settings.verify_tls)
            .timeout(settings.timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url(&settings.address),
            username: settings.username.clone(),
            password: settings.password.clone(),
        })
    }

    fn send_error(&self, err: reqwest::Error) -> Error {
        let failure = if err.is_timeout() {
            ConnectionFailure::Timeout
        } else if err.is_connect() {
            ConnectionFailure::Unreachable
        } else {
            return Error::Http(err);
        };
        Error::Connection {
            endpoint: self.base_url.clone(),
            failure,
        }
    }
}

/// Prefix `https://` when the address has no scheme
pub fn base_url(address: &str) -> String {
    let address = address.trim_end_matches('/');
    if address.contains("://") {
        address.to_string()
    } else {
        format!("https://{}", address)
    }
}

#[async_trait]
impl RedfishTransport for HttpTransport {
    async fn request(&self, method: HttpMethod, path: &str, body: Option<Value>) -> Result<RedfishResponse> {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let method_value = match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut request = self
            .client
            .request(method_value, &url)
            .basic_auth(&self.username, Some(&self.password))
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json");
        if let Some(body) = &body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| self.send_error(e))?;
        let status = response.status().as_u16();
        let text = response.text().await.map_err(|e| self.send_error(e))?;
        debug!("{} {} -> {}", method, url, status);

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        Ok(RedfishResponse { status, body })
    }
}

// =============================================================================
// Redfish Client
// =============================================================================

/// Status-aware Redfish client
#[derive(Clone)]
pub struct RedfishClient {
    transport: RedfishTransportRef,
    endpoint: String,
}

impl RedfishClient {
    pub fn new(transport: RedfishTransportRef, endpoint: impl Into<String>) -> Self {
        Self {
            transport,
            endpoint: endpoint.into(),
        }
    }

    async fn call(&self, method: HttpMethod, path: &str, body: Option<Value>) -> Result<Option<Value>> {
        let action = format!("{} {}", method, path);
        let response = self.transport.request(method, path, body).await?;
        match response.status {
            200..=299 => Ok(Some(response.body)),
            404 => Ok(None),
            401 | 403 => Err(Error::Authentication {
                endpoint: self.endpoint.clone(),
                reason: error_message(&response.body)
                    .unwrap_or_else(|| format!("HTTP {}", response.status)),
            }),
            status => Err(Error::pod_action(
                action,
                error_message(&response.body).unwrap_or_else(|| format!("HTTP {}", status)),
            )),
        }
    }

    /// GET a resource that must exist
    pub async fn get(&self, path: &str) -> Result<Value> {
        self.call(HttpMethod::Get, path, None)
            .await?
            .ok_or_else(|| Error::pod_action(format!("GET {}", path), "resource not found"))
    }

    /// GET a resource that may be absent
    pub async fn get_optional(&self, path: &str) -> Result<Option<Value>> {
        self.call(HttpMethod::Get, path, None).await
    }

    pub async fn post(&self, path: &str, body: Value) -> Result<Value> {
        self.call(HttpMethod::Post, path, Some(body))
            .await?
            .ok_or_else(|| Error::pod_action(format!("POST {}", path), "resource not found"))
    }

    pub async fn patch(&self, path: &str, body: Value) -> Result<Value> {
        self.call(HttpMethod::Patch, path, Some(body))
            .await?
            .ok_or_else(|| Error::pod_action(format!("PATCH {}", path), "resource not found"))
    }

    /// DELETE a resource; returns `false` when it was already gone
    pub async fn delete(&self, path: &str) -> Result<bool> {
        Ok(self.call(HttpMethod::Delete, path, None).await?.is_some())
    }

    /// Member paths of a collection
    pub async fn members(&self, path: &str) -> Result<Vec<String>> {
        Ok(member_paths(&self.get(path).await?))
    }
}

/// Join the `@Message.ExtendedInfo` messages of a Redfish error body
pub fn error_message(body: &Value) -> Option<String> {
    let error = body.get("error")?;
    let extended: Vec<&str> = error
        .get("@Message.ExtendedInfo")
        .and_then(Value::as_array)
        .map(|infos| {
            infos
                .iter()
                .filter_map(|info| info.get("Message").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();
    if !extended.is_empty() {
        return Some(extended.join(" "));
    }
    error
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Normalise an `@odata.id` into a relative path
pub fn odata_path(value: &Value) -> Option<String> {
    value
        .get("@odata.id")
        .and_then(Value::as_str)
        .map(|p| p.trim_start_matches('/').to_string())
}

/// `Members[].@odata.id` of a collection body
pub fn member_paths(collection: &Value) -> Vec<String> {
    collection
        .get("Members")
        .and_then(Value::as_array)
        .map(|members| members.iter().filter_map(odata_path).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    struct CannedTransport {
        status: u16,
        body: Value,
    }

    #[async_trait]
    impl RedfishTransport for CannedTransport {
        async fn request(&self, _method: HttpMethod, _path: &str, _body: Option<Value>) -> Result<RedfishResponse> {
            Ok(RedfishResponse {
                status: self.status,
                body: self.body.clone(),
            })
        }
    }

    fn client(status: u16, body: Value) -> RedfishClient {
        RedfishClient::new(Arc::new(CannedTransport { status, body }), "pod")
    }

    #[test]
    fn test_base_url() {
        assert_eq!(base_url("10.0.0.1"), "https://10.0.0.1");
        assert_eq!(base_url("http://10.0.0.1:8443/"), "http://10.0.0.1:8443");
    }

    #[test]
    fn test_member_paths() {
        let body = json!({"Members": [
            {"@odata.id": "/redfish/v1/Nodes/1"},
            {"@odata.id": "/redfish/v1/Nodes/2"}
        ]});
        assert_eq!(member_paths(&body), vec!["redfish/v1/Nodes/1", "redfish/v1/Nodes/2"]);
        assert!(member_paths(&json!({})).is_empty());
    }

    #[tokio::test]
    async fn test_error_body_is_preserved() {
        let body = json!({"error": {
            "code": "Base.1.0.GeneralError",
            "@Message.ExtendedInfo": [
                {"Message": "Not enough resources."},
                {"Message": "Try again."}
            ]
        }});
        let err = client(400, body).post("redfish/v1/Nodes/Actions/Allocate", json!({})).await.unwrap_err();
        assert_matches!(
            err,
            Error::PodAction { message, .. } if message == "Not enough resources. Try again."
        );
    }

    #[tokio::test]
    async fn test_not_found_and_auth() {
        assert_eq!(client(404, Value::Null).get_optional("x").await.unwrap(), None);
        assert!(!client(404, Value::Null).delete("x").await.unwrap());
        assert_matches!(
            client(401, Value::Null).get("x").await,
            Err(Error::Authentication { .. })
        );
    }
}
