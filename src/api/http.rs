//! HTTPS backend: signed request bodies and the reqwest-based transport
//!
//! Every API call is a POST of one JSON object against the single backend
//! entrypoint. Bodies carry the app constants, a business code selecting the
//! operation, and an MD5 MAC over the dynamic parameters and the client
//! secret.

use crate::config::ApiSection;
use crate::error::ApiError;
use async_trait::async_trait;
use md5::{Digest, Md5};
use serde_json::{Map, Value};

/// Business codes selecting the backend operation
pub mod biz_codes {
    pub const CLIENT_INFO: u32 = 101001;
    pub const OAUTH: u32 = 101003;
    pub const HOUSES: u32 = 102007;
    pub const ROOMS: u32 = 102008;
    pub const DEVICES: u32 = 103007;
}

/// Builder for one signed request body.
///
/// The MAC covers the dynamic parameters in insertion order, followed by the
/// client secret; the fixed app constants are not part of it.
pub struct SignedRequest {
    parameters: Map<String, Value>,
    mac_base: String,
}

impl SignedRequest {
    pub fn new(api: &ApiSection, biz_code: u32) -> Self {
        let mut parameters = Map::new();
        parameters.insert("appCode".to_string(), Value::String(api.app_code.clone()));
        parameters.insert(
            "appVersion".to_string(),
            Value::String(api.app_version.clone()),
        );
        parameters.insert("bizCode".to_string(), Value::String(biz_code.to_string()));
        parameters.insert(
            "clientType".to_string(),
            Value::String(api.client_type.clone()),
        );

        Self {
            parameters,
            mac_base: String::new(),
        }
    }

    /// Add a dynamic parameter; its textual form joins the MAC input
    pub fn parameter(mut self, key: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        self.mac_base.push_str(&value_text(&value));
        self.parameters.insert(key.to_string(), value);
        self
    }

    /// Finalize with the MAC and return the request body
    pub fn sign(mut self, client_secret: &str) -> Value {
        let mac = if client_secret.is_empty() {
            "0".to_string()
        } else {
            let mut hasher = Md5::new();
            hasher.update(self.mac_base.as_bytes());
            hasher.update(client_secret.as_bytes());
            hasher
                .finalize()
                .iter()
                .map(|byte| format!("{byte:02X}"))
                .collect()
        };

        self.parameters.insert("mac".to_string(), Value::String(mac));
        Value::Object(self.parameters)
    }
}

/// Textual form of a parameter for MAC computation; strings contribute
/// their raw content, everything else its JSON rendering.
fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Request/reply surface of the HTTPS collaborator
#[async_trait]
pub trait HttpBackend: Send + Sync {
    /// POST a request body; returns the raw response body
    async fn post(&self, body: Value, access_token: Option<&str>) -> Result<String, ApiError>;
}

/// Production backend over reqwest
pub struct ReqwestBackend {
    client: reqwest::Client,
    host: String,
}

impl ReqwestBackend {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            host: host.into(),
        }
    }
}

#[async_trait]
impl HttpBackend for ReqwestBackend {
    async fn post(&self, body: Value, access_token: Option<&str>) -> Result<String, ApiError> {
        let mut request = self.client.post(&self.host).json(&body);
        if let Some(token) = access_token {
            request = request.header("Authorization", token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ApiError::transport(format!("http post failed: {e}")))?;

        response
            .text()
            .await
            .map_err(|e| ApiError::transport(format!("http body read failed: {e}")))
    }
}
