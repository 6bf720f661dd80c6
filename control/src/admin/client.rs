//! APISIX admin API client
//!
//! Whole-object PUT / DELETE / GET on `/apisix/admin/global_rules` over a
//! hyper-util legacy client. Every request is wrapped in
//! `tokio::time::timeout`; an elapsed timeout is a transient failure.
//!
//! Listing accepts both wire shapes the admin API has used:
//! ```json
//! {"total": 1, "list": [{"key": "...", "value": {"id": "...", "plugins": {}}}]}
//! {"node": {"key": "...", "nodes": [{"key": "...", "value": {"id": "...", "plugins": {}}}]}}
//! ```

use super::{AdminApi, GatewayRules};
use crate::apis::metrics::record_admin_request;
use crate::config::AdminConfig;
use crate::error::AdminError;
use async_trait::async_trait;
use common::{GlobalRule, PluginMap};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Method, Request, StatusCode};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

const GLOBAL_RULES_PATH: &str = "/apisix/admin/global_rules";

/// HTTP implementation of [`AdminApi`]
#[derive(Clone)]
pub struct AdminClient {
    client: Client<HttpConnector, Full<Bytes>>,
    base_url: String,
    api_key: Option<String>,
    request_timeout: Duration,
}

impl AdminClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        request_timeout: Duration,
        connect_timeout: Duration,
    ) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            request_timeout,
        }
    }

    pub fn from_config(config: &AdminConfig) -> Self {
        Self::new(
            config.base_url.clone(),
            config.api_key.clone(),
            config.request_timeout(),
            config.connect_timeout(),
        )
    }

    fn rule_url(&self, id: &str) -> String {
        format!("{}{}/{}", self.base_url, GLOBAL_RULES_PATH, id)
    }

    /// Send one request and return (status, body)
    async fn send(
        &self,
        method: Method,
        url: String,
        body: Option<Vec<u8>>,
    ) -> Result<(StatusCode, Bytes), AdminError> {
        let mut builder = Request::builder().method(method.clone()).uri(&url);
        if let Some(key) = &self.api_key {
            builder = builder.header("X-API-KEY", key);
        }
        if body.is_some() {
            builder = builder.header("Content-Type", "application/json");
        }

        let request = builder
            .body(Full::new(Bytes::from(body.unwrap_or_default())))
            .map_err(|e| AdminError::Permanent(format!("failed to build request: {}", e)))?;

        let exchange = async {
            let response = self.client.request(request).await.map_err(|e| {
                AdminError::Transient(format!("{} {} failed: {}", method, url, e))
            })?;
            let status = response.status();
            let bytes = response
                .into_body()
                .collect()
                .await
                .map_err(|e| AdminError::Transient(format!("failed to read response body: {}", e)))?
                .to_bytes();
            Ok::<_, AdminError>((status, bytes))
        };

        let result = match tokio::time::timeout(self.request_timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(AdminError::Transient(format!(
                "{} {} timed out after {:?}",
                method, url, self.request_timeout
            ))),
        };

        match &result {
            Ok((status, _)) => {
                debug!(%method, %url, status = status.as_u16(), "admin request complete");
                record_admin_request(method.as_str(), status_label(*status));
            }
            Err(e) => {
                warn!(%method, %url, error = %e, "admin request failed");
                record_admin_request(method.as_str(), "error");
            }
        }

        result
    }
}

#[async_trait]
impl AdminApi for AdminClient {
    async fn upsert(&self, id: &str, plugins: &PluginMap) -> Result<(), AdminError> {
        let rule = GlobalRule {
            id: id.to_string(),
            plugins: plugins.clone(),
        };
        let body = serde_json::to_vec(&rule)
            .map_err(|e| AdminError::Permanent(format!("failed to encode rule {}: {}", id, e)))?;

        let (status, bytes) = self.send(Method::PUT, self.rule_url(id), Some(body)).await?;
        classify_status(status, &bytes)
    }

    async fn delete(&self, id: &str) -> Result<(), AdminError> {
        let (status, bytes) = self.send(Method::DELETE, self.rule_url(id), None).await?;
        if status == StatusCode::NOT_FOUND {
            debug!(id, "global rule already absent");
            return Ok(());
        }
        classify_status(status, &bytes)
    }

    async fn list(&self) -> Result<GatewayRules, AdminError> {
        let url = format!("{}{}", self.base_url, GLOBAL_RULES_PATH);
        let (status, bytes) = self.send(Method::GET, url, None).await?;

        // Older admin APIs answer 404 for an empty directory
        if status == StatusCode::NOT_FOUND {
            return Ok(GatewayRules::new());
        }
        classify_status(status, &bytes)?;
        parse_list(&bytes)
    }
}

fn status_label(status: StatusCode) -> &'static str {
    if status.is_success() {
        "success"
    } else if status.is_client_error() {
        "client_error"
    } else if status.is_server_error() {
        "server_error"
    } else {
        "other"
    }
}

/// Map a response status to the admin error taxonomy
///
/// 2xx is success; 5xx, 429 and 408 are transient; everything else is
/// permanent.
pub fn classify_status(status: StatusCode, body: &[u8]) -> Result<(), AdminError> {
    if status.is_success() {
        return Ok(());
    }

    let message = error_message(body);
    let reason = format!("status {}: {}", status.as_u16(), message);

    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        Err(AdminError::Transient(reason))
    } else {
        Err(AdminError::Permanent(reason))
    }
}

/// Pull `error_msg` out of an APISIX error body, falling back to raw text
fn error_message(body: &[u8]) -> String {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error_msg")
                .or_else(|| v.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| String::from_utf8_lossy(body).trim().to_string())
}

/// Decode a global rule listing in either the v3 or the v2 wire shape
pub fn parse_list(body: &[u8]) -> Result<GatewayRules, AdminError> {
    let root: Value = serde_json::from_slice(body)
        .map_err(|e| AdminError::Permanent(format!("undecodable list response: {}", e)))?;

    let items = if let Some(list) = root.get("list") {
        list
    } else if let Some(node) = root.get("node") {
        node.get("nodes").unwrap_or(&Value::Null)
    } else {
        return Err(AdminError::Permanent(
            "list response has neither `list` nor `node`".to_string(),
        ));
    };

    let items: &[Value] = match items {
        Value::Array(items) => items,
        // Empty directories are rendered as `{}` by some versions
        Value::Object(map) if map.is_empty() => &[],
        Value::Null => &[],
        other => {
            return Err(AdminError::Permanent(format!(
                "unexpected list payload: {}",
                other
            )))
        }
    };

    let mut rules = GatewayRules::new();
    for item in items {
        let value = item.get("value").ok_or_else(|| {
            AdminError::Permanent("list item without `value`".to_string())
        })?;

        let id = match value.get("id") {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => item
                .get("key")
                .and_then(Value::as_str)
                .and_then(|key| key.rsplit('/').next())
                .map(str::to_string)
                .ok_or_else(|| AdminError::Permanent("list item without id".to_string()))?,
        };

        let plugins: PluginMap = match value.get("plugins") {
            Some(plugins) => serde_json::from_value(plugins.clone()).map_err(|e| {
                AdminError::Permanent(format!("rule {} has undecodable plugins: {}", id, e))
            })?,
            None => PluginMap::new(),
        };

        rules.insert(id, plugins);
    }

    Ok(rules)
}
