use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Method;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::errors::FCMError;
use crate::models::{
    build_message, ApiResponse, BatchTopicRequest, GroupOperation, GroupRequest, RequestInfo,
    SendRequest, DEFAULT_EXPIRY,
};

const DEFAULT_FCM_BASE: &str = "https://fcm.googleapis.com";
const DEFAULT_IID_BASE: &str = "https://iid.googleapis.com";

#[derive(Default)]
struct Transport {
    client: Option<reqwest::Client>,
    verbose: bool,
}

/// FCM legacy web-push client
///
/// Sends messages to devices, device groups, and topics over the FCM legacy
/// HTTP API, and manages group membership and topic subscriptions through
/// the Instance-ID API. Keeps a process-local cache of group name to
/// notification key and the diagnostics of the most recent request.
pub struct FCMClient {
    server_key: String,
    sender_id: String,
    fcm_base: String,
    iid_base: String,
    transport: Mutex<Transport>,
    group_keys: tokio::sync::Mutex<HashMap<String, String>>,
    last_request: Mutex<Option<RequestInfo>>,
}

impl FCMClient {
    /// Create a new client.
    ///
    /// # Arguments
    /// * `server_key` - legacy server key, sent as `Authorization: key=...`
    /// * `sender_id` - project sender id, sent as `project_id` on group operations
    pub fn new(server_key: impl Into<String>, sender_id: impl Into<String>) -> Self {
        Self {
            server_key: server_key.into(),
            sender_id: sender_id.into(),
            fcm_base: DEFAULT_FCM_BASE.to_string(),
            iid_base: DEFAULT_IID_BASE.to_string(),
            transport: Mutex::new(Transport::default()),
            group_keys: tokio::sync::Mutex::new(HashMap::new()),
            last_request: Mutex::new(None),
        }
    }

    /// Override the FCM and IID hosts, e.g. to point at a local mock server.
    pub fn with_endpoints(
        mut self,
        fcm_base: impl Into<String>,
        iid_base: impl Into<String>,
    ) -> Self {
        self.fcm_base = fcm_base.into().trim_end_matches('/').to_string();
        self.iid_base = iid_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Send a notification to one or more devices.
    ///
    /// Returns `Ok(None)` without issuing a request when `tokens` is empty.
    pub async fn send_to(
        &self,
        tokens: &[String],
        title: &str,
        contents: &str,
        extras: Option<Map<String, Value>>,
    ) -> Result<Option<ApiResponse>, FCMError> {
        if tokens.is_empty() {
            return Ok(None);
        }
        let request = SendRequest {
            to: None,
            registration_ids: Some(tokens.to_vec()),
            message: build_message(title, contents, extras, DEFAULT_EXPIRY, None),
        };
        let response = self
            .json_post(&self.send_url(), Some(serde_json::to_value(&request)?), &[])
            .await?;
        Ok(Some(response))
    }

    /// Send a notification to a group of devices, addressed by group name.
    pub async fn send_to_group(
        &self,
        group_name: &str,
        title: &str,
        contents: &str,
        extras: Option<Map<String, Value>>,
    ) -> Result<ApiResponse, FCMError> {
        let request = SendRequest {
            to: Some(group_name.to_string()),
            registration_ids: None,
            message: build_message(title, contents, extras, DEFAULT_EXPIRY, None),
        };
        self.json_post(&self.send_url(), Some(serde_json::to_value(&request)?), &[])
            .await
    }

    /// Send a notification to all subscribers of a topic.
    pub async fn send_to_topic(
        &self,
        topic: &str,
        title: &str,
        contents: &str,
        extras: Option<Map<String, Value>>,
    ) -> Result<ApiResponse, FCMError> {
        let request = SendRequest {
            to: Some(format!("/topics/{topic}")),
            registration_ids: None,
            message: build_message(title, contents, extras, DEFAULT_EXPIRY, None),
        };
        self.json_post(&self.send_url(), Some(serde_json::to_value(&request)?), &[])
            .await
    }

    /// Create a group of devices (vendor limit: 20 per group, not enforced
    /// here). Caches the returned notification key.
    pub async fn create_group(
        &self,
        group_name: &str,
        tokens: &[String],
    ) -> Result<ApiResponse, FCMError> {
        let request = GroupRequest {
            operation: GroupOperation::Create,
            notification_key: None,
            notification_key_name: group_name.to_string(),
            registration_ids: tokens.to_vec(),
        };
        let response = self
            .json_post(
                &self.group_url(),
                Some(serde_json::to_value(&request)?),
                &[("project_id", self.sender_id.as_str())],
            )
            .await?;
        if let Some(key) = response.notification_key() {
            self.group_keys
                .lock()
                .await
                .insert(group_name.to_string(), key.to_string());
        }
        Ok(response)
    }

    /// Add one or more devices to a group.
    pub async fn add_to_group(
        &self,
        group_name: &str,
        tokens: &[String],
    ) -> Result<ApiResponse, FCMError> {
        self.modify_group(GroupOperation::Add, group_name, tokens)
            .await
    }

    /// Remove one or more devices from a group.
    ///
    /// The server deletes the group when its device count reaches zero; the
    /// cached notification key is NOT purged here and goes stale in that
    /// case. Use [`FCMClient::invalidate_group_key`] to purge it.
    pub async fn remove_from_group(
        &self,
        group_name: &str,
        tokens: &[String],
    ) -> Result<ApiResponse, FCMError> {
        self.modify_group(GroupOperation::Remove, group_name, tokens)
            .await
    }

    async fn modify_group(
        &self,
        operation: GroupOperation,
        group_name: &str,
        tokens: &[String],
    ) -> Result<ApiResponse, FCMError> {
        let notification_key = self.get_group_notification_key(group_name).await?;
        let request = GroupRequest {
            operation,
            notification_key,
            notification_key_name: group_name.to_string(),
            registration_ids: tokens.to_vec(),
        };
        self.json_post(
            &self.group_url(),
            Some(serde_json::to_value(&request)?),
            &[("project_id", self.sender_id.as_str())],
        )
        .await
    }

    /// Notification key for a group, from cache or fetched remotely.
    ///
    /// The cache lock is held across the fetch, so concurrent callers for
    /// the same miss issue at most one remote request. An HTTP error from
    /// the fetch (e.g. 404 for an unknown group) yields `Ok(None)`;
    /// transport failures propagate.
    pub async fn get_group_notification_key(
        &self,
        group_name: &str,
    ) -> Result<Option<String>, FCMError> {
        let mut cache = self.group_keys.lock().await;
        if let Some(key) = cache.get(group_name) {
            return Ok(Some(key.clone()));
        }
        let response = match self.fetch_group_notification_key(group_name).await {
            Ok(response) => response,
            Err(FCMError::Http { .. }) => return Ok(None),
            Err(err) => return Err(err),
        };
        match response.notification_key() {
            Some(key) => {
                cache.insert(group_name.to_string(), key.to_string());
                Ok(Some(key.to_string()))
            }
            None => Ok(None),
        }
    }

    /// Fetch the notification key for a group from the server, bypassing
    /// the cache.
    pub async fn fetch_group_notification_key(
        &self,
        group_name: &str,
    ) -> Result<ApiResponse, FCMError> {
        let url = format!(
            "{}?notification_key_name={}",
            self.group_url(),
            urlencoding::encode(group_name)
        );
        self.json_get(&url, &[("project_id", self.sender_id.as_str())])
            .await
    }

    /// Drop the cached notification key for a group, forcing the next
    /// lookup to fetch it again. Returns the evicted key, if any.
    pub async fn invalidate_group_key(&self, group_name: &str) -> Option<String> {
        self.group_keys.lock().await.remove(group_name)
    }

    /// Subscribe devices to a topic in one call (vendor limit: 1000 tokens,
    /// not enforced here). The topic is created on the fly if missing.
    pub async fn batch_subscribe_topic(
        &self,
        topic: &str,
        tokens: &[String],
    ) -> Result<ApiResponse, FCMError> {
        self.batch_topic("batchAdd", topic, tokens).await
    }

    /// Unsubscribe devices from a topic in one call.
    pub async fn batch_unsubscribe_topic(
        &self,
        topic: &str,
        tokens: &[String],
    ) -> Result<ApiResponse, FCMError> {
        self.batch_topic("batchRemove", topic, tokens).await
    }

    async fn batch_topic(
        &self,
        endpoint: &str,
        topic: &str,
        tokens: &[String],
    ) -> Result<ApiResponse, FCMError> {
        let request = BatchTopicRequest {
            to: format!("/topics/{topic}"),
            registration_tokens: tokens.to_vec(),
        };
        let url = format!("{}/iid/v1:{endpoint}", self.iid_base);
        self.json_post(&url, Some(serde_json::to_value(&request)?), &[])
            .await
    }

    /// Subscribe a single device to a topic.
    pub async fn subscribe_topic(&self, topic: &str, token: &str) -> Result<ApiResponse, FCMError> {
        let url = format!(
            "{}/iid/v1/{}/rel/topics/{}",
            self.iid_base,
            urlencoding::encode(token),
            urlencoding::encode(topic)
        );
        self.json_post(&url, None, &[]).await
    }

    /// IID server details for a device token.
    pub async fn token_info(&self, token: &str) -> Result<ApiResponse, FCMError> {
        let url = format!(
            "{}/iid/info/{}?details=true",
            self.iid_base,
            urlencoding::encode(token)
        );
        self.json_post(&url, Some(json!({ "details": true })), &[]).await
    }

    /// POST to a REST endpoint with the client's authorization header.
    ///
    /// A `Value::String` body is sent verbatim; any other value is
    /// serialized as JSON.
    pub async fn json_post(
        &self,
        url: &str,
        body: Option<Value>,
        extra_headers: &[(&str, &str)],
    ) -> Result<ApiResponse, FCMError> {
        self.execute(Method::POST, url, body, extra_headers).await
    }

    /// GET from a REST endpoint with the client's authorization header.
    pub async fn json_get(
        &self,
        url: &str,
        extra_headers: &[(&str, &str)],
    ) -> Result<ApiResponse, FCMError> {
        self.execute(Method::GET, url, None, extra_headers).await
    }

    async fn execute(
        &self,
        method: Method,
        url: &str,
        body: Option<Value>,
        extra_headers: &[(&str, &str)],
    ) -> Result<ApiResponse, FCMError> {
        let client = self.http_client()?;

        let mut request = client
            .request(method.clone(), url)
            .header(AUTHORIZATION, format!("key={}", self.server_key));
        if method == Method::POST {
            request = request.header(CONTENT_TYPE, "application/json");
        }
        for (name, value) in extra_headers {
            request = request.header(*name, *value);
        }
        if let Some(body) = body {
            let raw = match body {
                Value::String(text) => text,
                other => other.to_string(),
            };
            request = request.body(raw);
        }

        debug!(%method, url, "issuing request");
        let started = Instant::now();
        let response = request.send().await?;

        let status = response.status();
        let info = RequestInfo {
            method: method.to_string(),
            url: response.url().to_string(),
            status: status.as_u16(),
            elapsed: started.elapsed(),
        };
        *self
            .last_request
            .lock()
            .expect("diagnostics lock poisoned") = Some(info);

        let text = response.text().await?;
        if !status.is_success() {
            warn!(status = status.as_u16(), url, "request failed");
            return Err(FCMError::Http {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(ApiResponse::from_body(&text))
    }

    /// Diagnostics of the most recent request, or `None` before any request.
    pub fn request_info(&self) -> Option<RequestInfo> {
        self.last_request
            .lock()
            .expect("diagnostics lock poisoned")
            .clone()
    }

    /// HTTP status of the most recent request, or 0 before any request.
    pub fn status_code(&self) -> u16 {
        self.request_info().map(|info| info.status).unwrap_or(0)
    }

    /// Toggle verbose connection logging for subsequent requests. The HTTP
    /// client is rebuilt lazily with the new setting.
    pub fn set_verbose(&self, flag: bool) {
        let mut transport = self.transport.lock().expect("transport lock poisoned");
        transport.verbose = flag;
        transport.client = None;
    }

    fn http_client(&self) -> Result<reqwest::Client, FCMError> {
        let mut transport = self.transport.lock().expect("transport lock poisoned");
        if let Some(client) = transport.client.as_ref() {
            return Ok(client.clone());
        }
        let client = reqwest::Client::builder()
            .connection_verbose(transport.verbose)
            .build()?;
        transport.client = Some(client.clone());
        Ok(client)
    }

    fn send_url(&self) -> String {
        format!("{}/fcm/send", self.fcm_base)
    }

    fn group_url(&self) -> String {
        format!("{}/fcm/notification", self.fcm_base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = FCMClient::new("server-key", "sender-42");
        assert_eq!(client.status_code(), 0);
        assert!(client.request_info().is_none());
        assert_eq!(client.send_url(), "https://fcm.googleapis.com/fcm/send");
        assert_eq!(
            client.group_url(),
            "https://fcm.googleapis.com/fcm/notification"
        );
    }

    #[test]
    fn test_with_endpoints_trims_trailing_slash() {
        let client =
            FCMClient::new("k", "s").with_endpoints("http://127.0.0.1:9/", "http://127.0.0.1:9/");
        assert_eq!(client.send_url(), "http://127.0.0.1:9/fcm/send");
    }

    #[tokio::test]
    async fn test_invalidate_group_key_on_empty_cache() {
        let client = FCMClient::new("k", "s");
        assert!(client.invalidate_group_key("ghost").await.is_none());
    }
}
