//! Shared plumbing for the Cloudflare REST API (Workers AI and Vectorize).
//!
//! Every Cloudflare v4 endpoint wraps its payload in the same envelope:
//! `{"success": bool, "result": T, "errors": [{"code", "message"}]}`.

use reqwest::StatusCode;
use serde::Deserialize;
use serde::de::DeserializeOwned;

/// Default API base for account-scoped endpoints.
pub const DEFAULT_API_BASE: &str = "https://api.cloudflare.com/client/v4";

/// Errors returned by a Cloudflare endpoint.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Transport failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status or `success: false` envelope.
    #[error("Cloudflare API error ({status}): {message}")]
    Api {
        /// HTTP status of the response.
        status: StatusCode,
        /// Joined error messages from the envelope, or the raw body.
        message: String,
    },

    /// The body was not a valid envelope.
    #[error("Malformed Cloudflare response: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    result: Option<T>,
    #[serde(default)]
    errors: Vec<ApiMessage>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    code: Option<i64>,
    message: String,
}

/// Build an account-scoped endpoint URL.
pub fn account_url(base_url: &str, account_id: &str, path: &str) -> String {
    format!(
        "{}/accounts/{}/{}",
        base_url.trim_end_matches('/'),
        account_id,
        path.trim_start_matches('/')
    )
}

/// Read a response body as an envelope and return its `result`.
pub async fn read_result<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ApiError> {
    let status = resp.status();
    let body = resp.text().await?;

    let envelope: Envelope<T> = match serde_json::from_str(&body) {
        Ok(envelope) => envelope,
        Err(_) if !status.is_success() => {
            return Err(ApiError::Api {
                status,
                message: body,
            });
        }
        Err(e) => return Err(ApiError::Decode(e)),
    };

    if !status.is_success() || !envelope.success {
        let message = envelope
            .errors
            .iter()
            .map(|e| match e.code {
                Some(code) => format!("[{code}] {}", e.message),
                None => e.message.clone(),
            })
            .collect::<Vec<_>>()
            .join("; ");
        return Err(ApiError::Api { status, message });
    }

    envelope.result.ok_or_else(|| ApiError::Api {
        status,
        message: "response carried no result".to_string(),
    })
}
