use serde::{Deserialize, Serialize};

/// Minimal request shape handed to the outbound HTTP port.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: axum::http::Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: axum::http::Method::GET,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn with_json(mut self, value: &impl Serialize) -> Self {
        self.headers
            .push(("content-type".to_string(), "application/json".to_string()));
        self.body = Some(serde_json::to_vec(value).unwrap_or_default());
        self
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Notification content as rendered to the user. Field names match the
/// push payload wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationDisplay {
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub actions: Vec<NotificationAction>,
    #[serde(default)]
    pub require_interaction: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

/// Push subscription credentials plus the participants they notify for,
/// as persisted in the notifications bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredSubscription {
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
    #[serde(default)]
    pub participant_ids: Vec<i64>,
}

#[derive(Debug, Clone)]
pub struct VapidConfig {
    pub private_key: String,
    pub public_key: String,
    pub subject: String,
}
