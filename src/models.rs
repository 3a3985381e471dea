use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Relative expiry applied by the message builder when none is given.
pub const DEFAULT_EXPIRY: &str = "1 hour";

/// Notification payload of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link_action: Option<Value>,
}

/// Web-push transport options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebPush {
    pub headers: WebPushHeaders,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebPushHeaders {
    /// Delivery time-to-live in whole seconds.
    #[serde(rename = "TTL")]
    pub ttl: i64,
}

/// A message body, before the delivery target (`to` or `registration_ids`)
/// is attached.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<Notification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webpush: Option<WebPush>,
}

/// Message plus its delivery target, as posted to the send endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SendRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_ids: Option<Vec<String>>,
    #[serde(flatten)]
    pub message: Message,
}

/// Device-group operation verb.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupOperation {
    Create,
    Add,
    Remove,
}

/// Body posted to the device-group endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct GroupRequest {
    pub operation: GroupOperation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification_key: Option<String>,
    pub notification_key_name: String,
    pub registration_ids: Vec<String>,
}

/// Body posted to the IID batch subscribe/unsubscribe endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct BatchTopicRequest {
    pub to: String,
    pub registration_tokens: Vec<String>,
}

/// Classified response body.
///
/// Classification is attempt-to-parse-then-fall-back: a body that parses as
/// any JSON value (object, array, or scalar) is `Json`, non-JSON text is
/// `Text`, and a blank body is `Empty`.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse {
    Json(Value),
    Text(String),
    Empty,
}

impl ApiResponse {
    pub fn from_body(body: &str) -> Self {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            return ApiResponse::Empty;
        }
        match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => ApiResponse::Json(value),
            Err(_) => ApiResponse::Text(trimmed.to_string()),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ApiResponse::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ApiResponse::Text(text) => Some(text),
            _ => None,
        }
    }

    /// The `notification_key` field of a JSON response, if present.
    pub fn notification_key(&self) -> Option<&str> {
        self.as_json()?.get("notification_key")?.as_str()
    }
}

/// Diagnostics for the most recently issued request.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: String,
    /// Effective URL after any redirects.
    pub url: String,
    pub status: u16,
    pub elapsed: std::time::Duration,
}

/// Build a message body.
///
/// An empty `title` or `contents` yields a data-only message with no
/// `notification` block. A non-empty `link_action` entry in `data` is
/// hoisted into the notification block and removed from `data`. The icon
/// is attached only when `icon_url` has an http or https scheme. A
/// non-empty `expires` sets `webpush.headers.TTL` to the equivalent number
/// of seconds; an empty or unparseable `expires` omits the header.
pub fn build_message(
    title: &str,
    contents: &str,
    data: Option<Map<String, Value>>,
    expires: &str,
    icon_url: Option<&str>,
) -> Message {
    let mut data = data.filter(|map| !map.is_empty());

    let notification = if title.is_empty() || contents.is_empty() {
        None
    } else {
        let mut notification = Notification {
            title: title.to_string(),
            body: contents.to_string(),
            icon: None,
            link_action: None,
        };
        if let Some(url) = icon_url {
            if url.starts_with("http://") || url.starts_with("https://") {
                notification.icon = Some(url.to_string());
            }
        }
        if let Some(map) = data.as_mut() {
            let has_action = map
                .get("link_action")
                .is_some_and(|v| !v.is_null() && v.as_str() != Some(""));
            if has_action {
                notification.link_action = map.remove("link_action");
            }
        }
        Some(notification)
    };

    let data = data.filter(|map| !map.is_empty());

    let webpush = parse_relative_expiry(expires).map(|ttl| WebPush {
        headers: WebPushHeaders {
            ttl: ttl.num_seconds(),
        },
    });

    Message {
        notification,
        data,
        webpush,
    }
}

/// Parse a relative expiry such as "1 hour", "30 minutes", or "2d".
pub fn parse_relative_expiry(expires: &str) -> Option<Duration> {
    let trimmed = expires.trim();
    let split = trimmed.find(|c: char| !c.is_ascii_digit())?;
    let (amount, unit) = trimmed.split_at(split);
    let amount: i64 = amount.parse().ok()?;
    match unit.trim().to_ascii_lowercase().as_str() {
        "s" | "sec" | "secs" | "second" | "seconds" => Some(Duration::seconds(amount)),
        "m" | "min" | "mins" | "minute" | "minutes" => Some(Duration::minutes(amount)),
        "h" | "hr" | "hrs" | "hour" | "hours" => Some(Duration::hours(amount)),
        "d" | "day" | "days" => Some(Duration::days(amount)),
        "w" | "week" | "weeks" => Some(Duration::weeks(amount)),
        _ => None,
    }
}
