//! Structured error taxonomy for the control plane core.
//!
//! Handlers at the HTTP boundary map each variant to the status code noted
//! on it; CLI commands propagate the same values up through `anyhow`.

use thiserror::Error;

/// Detail of an upstream (cloud API) failure, mirroring the original
/// `UpstreamError`/`APIError` pair: a failed call carries the system,
/// operation and URL it was attempting, plus whatever the API itself said.
#[derive(Debug, Clone)]
pub struct UpstreamCause {
    pub code: Option<u16>,
    pub body: Option<String>,
    pub headers: Option<Vec<(String, String)>>,
}

impl UpstreamCause {
    /// Best-effort message extraction from a JSON body shaped
    /// `{<kind>: {message: "..."}}`. Falls back to a fixed literal on any
    /// parse failure.
    pub fn message(&self) -> String {
        let Some(body) = &self.body else {
            return "Could not parse API error body".to_string();
        };
        parse_api_error_message(body).unwrap_or_else(|| "Could not parse API error body".to_string())
    }
}

fn parse_api_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let object = value.as_object()?;
    let (_, inner) = object.iter().next()?;
    inner.get("message")?.as_str().map(str::to_string)
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("No such scaling group {group_id} for tenant {tenant_id}")]
    NoSuchGroup { tenant_id: String, group_id: String },

    #[error("No such scaling policy {policy_id} for group {group_id} for tenant {tenant_id}")]
    NoSuchPolicy {
        tenant_id: String,
        group_id: String,
        policy_id: String,
    },

    #[error(
        "No such webhook {webhook_id} for policy {policy_id} in group {group_id} for tenant {tenant_id}"
    )]
    NoSuchWebhook {
        tenant_id: String,
        group_id: String,
        policy_id: String,
        webhook_id: String,
    },

    #[error("Unrecognized (version {version}) capability hash {hash}")]
    UnrecognizedCapability { hash: String, version: u32 },

    #[error("Group {group_id} for tenant {tenant_id} still has entities")]
    GroupNotEmpty { tenant_id: String, group_id: String },

    #[error("Allowed limit of {max} scaling groups reached by tenant {tenant_id}")]
    ScalingGroupOverLimit { tenant_id: String, max: usize },

    #[error(
        "Currently there are {current} policies for tenant {tenant_id}, scaling group {group_id}. \
         Creating {new} new policies would exceed the policy limit of {max} per group"
    )]
    PoliciesOverLimit {
        tenant_id: String,
        group_id: String,
        max: usize,
        current: usize,
        new: usize,
    },

    #[error(
        "Currently there are {current} webhooks for tenant {tenant_id}, scaling group {group_id}, \
         policy {policy_id}. Creating {new} new webhooks would exceed the webhook limit of {max} per policy"
    )]
    WebhooksOverLimit {
        tenant_id: String,
        group_id: String,
        policy_id: String,
        max: usize,
        current: usize,
        new: usize,
    },

    #[error("{system} error performing {operation} against {url}: {}", .cause.message())]
    UpstreamError {
        system: String,
        operation: String,
        url: String,
        cause: UpstreamCause,
    },

    #[error("lock contention exceeded retry budget for group {group_id}")]
    LockContention { group_id: String },
}

impl CoreError {
    /// HTTP status this error maps to.
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            CoreError::NoSuchGroup { .. }
            | CoreError::NoSuchPolicy { .. }
            | CoreError::NoSuchWebhook { .. }
            | CoreError::UnrecognizedCapability { .. } => StatusCode::NOT_FOUND,
            CoreError::GroupNotEmpty { .. } => StatusCode::CONFLICT,
            CoreError::ScalingGroupOverLimit { .. }
            | CoreError::PoliciesOverLimit { .. }
            | CoreError::WebhooksOverLimit { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            CoreError::UpstreamError { .. } => StatusCode::BAD_GATEWAY,
            CoreError::LockContention { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
