/// Notification dispatch — resolves a user's push address and hands the
/// reminder to the push transport.
///
/// Delivery is best-effort: a missing `fcmToken` or a transport failure is
/// logged and reported back as a `DispatchOutcome`, never as an error. Only a
/// store failure while looking up the user propagates, since that means the
/// document store itself is unhealthy.
use crate::{
    config::PushConfig,
    model::{decode, Collection, UserProfile},
    store::{DocumentStore, StoreError},
};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Payload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub title: String,
    pub body:  String,
    pub icon:  Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PushPayload {
    pub notification: Notification,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    NoAddress,
    TransportFailed,
}

// ---------------------------------------------------------------------------
// Transport seam
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("push request failed: {0}")]
    Http(String),

    #[error("push rejected: {0}")]
    Rejected(String),

    #[error("push credentials unavailable: {0}")]
    Credentials(String),

    #[error("push response unreadable: {0}")]
    Response(String),

    #[error("task error: {0}")]
    Task(String),
}

#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Send one payload to one delivery address.
    async fn send(&self, address: &str, payload: &PushPayload) -> Result<(), TransportError>;
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct Dispatcher {
    store:     Arc<dyn DocumentStore>,
    transport: Arc<dyn PushTransport>,
    title:     String,
    icon:      Option<String>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn DocumentStore>, transport: Arc<dyn PushTransport>, push: &PushConfig) -> Self {
        Self {
            store,
            transport,
            title: push.title.clone(),
            icon:  (!push.icon.is_empty()).then(|| push.icon.clone()),
        }
    }

    pub fn payload(&self, message: &str) -> PushPayload {
        PushPayload {
            notification: Notification {
                title: self.title.clone(),
                body:  message.to_owned(),
                icon:  self.icon.clone(),
            },
        }
    }

    pub async fn dispatch(&self, user_id: &str, message: &str) -> Result<DispatchOutcome, StoreError> {
        let profile = match self.store.get(Collection::Users, user_id).await? {
            Some(doc) => decode::<UserProfile>(&doc).unwrap_or_else(|e| {
                tracing::warn!("Unreadable profile for user {}: {}", user_id, e);
                UserProfile::default()
            }),
            None => UserProfile::default(),
        };

        let Some(token) = profile.fcm_token.filter(|t| !t.is_empty()) else {
            tracing::error!("FCM token not found for user: {}", user_id);
            return Ok(DispatchOutcome::NoAddress);
        };

        match self.transport.send(&token, &self.payload(message)).await {
            Ok(()) => {
                tracing::info!("Notification sent to user: {}", user_id);
                Ok(DispatchOutcome::Sent)
            }
            Err(e) => {
                tracing::error!("Error sending notification to {}: {}", user_id, e);
                Ok(DispatchOutcome::TransportFailed)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// FCM HTTP v1 transport
// ---------------------------------------------------------------------------

/// Successful `messages:send` response.
#[derive(Debug, Deserialize)]
struct FcmSent {
    name: String,
}

/// Google API error envelope returned with non-2xx statuses.
#[derive(Debug, Deserialize)]
struct FcmErrorBody {
    error: FcmError,
}

#[derive(Debug, Deserialize)]
struct FcmError {
    #[serde(default)]
    status:  String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    details: Vec<FcmErrorDetail>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FcmErrorDetail {
    #[serde(default)]
    error_code: Option<String>,
}

pub struct FcmTransport {
    agent:             ureq::Agent,
    url:               String,
    access_token:      String,
    access_token_file: Option<PathBuf>,
}

impl FcmTransport {
    pub fn new(push: &PushConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(push.timeout_secs))
            .build();
        if push.project_id.is_empty() {
            tracing::warn!("No FCM project_id configured — pushes will fail");
        }
        if push.access_token.is_empty() && push.access_token_file.is_none() {
            tracing::warn!("No FCM access token configured — pushes will be rejected");
        }
        Self {
            agent,
            url:               send_url(&push.endpoint, &push.project_id),
            access_token:      push.access_token.clone(),
            access_token_file: push.access_token_file.clone(),
        }
    }
}

fn send_url(endpoint: &str, project_id: &str) -> String {
    format!("{}/v1/projects/{}/messages:send", endpoint.trim_end_matches('/'), project_id)
}

fn request_body(address: &str, payload: &PushPayload) -> serde_json::Value {
    let n = &payload.notification;
    let mut message = serde_json::json!({
        "token":        address,
        "notification": { "title": n.title, "body": n.body },
    });
    // v1 `notification` has no icon; the web client reads it from webpush.
    if let Some(icon) = &n.icon {
        message["webpush"] = serde_json::json!({ "notification": { "icon": icon } });
    }
    serde_json::json!({ "message": message })
}

/// Bearer token for one request: the token file when configured, else the
/// inline token.
fn bearer_token(inline: &str, file: Option<&Path>) -> Result<String, TransportError> {
    let token = match file {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| TransportError::Credentials(format!("{}: {}", path.display(), e)))?
            .trim()
            .to_owned(),
        None => inline.to_owned(),
    };
    if token.is_empty() {
        return Err(TransportError::Credentials("no access token".to_owned()));
    }
    Ok(token)
}

fn check_response(status: u16, body: &str) -> Result<(), TransportError> {
    if (200..300).contains(&status) {
        let sent: FcmSent = serde_json::from_str(body)
            .map_err(|e| TransportError::Response(e.to_string()))?;
        tracing::debug!("FCM accepted message {}", sent.name);
        return Ok(());
    }

    let reason = match serde_json::from_str::<FcmErrorBody>(body) {
        Ok(FcmErrorBody { error }) => error
            .details
            .into_iter()
            .find_map(|d| d.error_code)
            .or_else(|| (!error.status.is_empty()).then_some(error.status))
            .unwrap_or(error.message),
        Err(_) => "unreadable error body".to_owned(),
    };
    Err(TransportError::Rejected(format!("HTTP {}: {}", status, reason)))
}

#[async_trait]
impl PushTransport for FcmTransport {
    async fn send(&self, address: &str, payload: &PushPayload) -> Result<(), TransportError> {
        let agent      = self.agent.clone();
        let url        = self.url.clone();
        let inline     = self.access_token.clone();
        let token_file = self.access_token_file.clone();
        let body       = request_body(address, payload).to_string();

        // ureq is synchronous; keep it (and the token file read) off the async workers.
        let (status, response) = tokio::task::spawn_blocking(move || {
            let auth = format!("Bearer {}", bearer_token(&inline, token_file.as_deref())?);
            let response = match agent
                .post(&url)
                .set("Authorization", &auth)
                .set("Content-Type", "application/json")
                .send_string(&body)
            {
                Ok(resp) => resp,
                Err(ureq::Error::Status(_, resp)) => resp,
                Err(e) => return Err(TransportError::Http(e.to_string())),
            };
            let status = response.status();
            let text = response
                .into_string()
                .map_err(|e| TransportError::Response(e.to_string()))?;
            Ok((status, text))
        })
        .await
        .map_err(|e| TransportError::Task(e.to_string()))??;

        check_response(status, &response)
    }
}
