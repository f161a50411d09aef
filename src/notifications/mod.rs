//! Outbound email via the email worker.
//!
//! The worker accepts `POST {to, subject, html, from, fromName}` and answers
//! with `{"success": bool}`. Sends are fire-and-forget from the caller's
//! point of view: failures are logged and reported as `false`, never raised.

pub mod templates;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::EmailConfig;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendEmailRequest<'a> {
    to: &'a str,
    subject: &'a str,
    html: &'a str,
    from: &'a str,
    from_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct SendEmailResponse {
    #[serde(default)]
    success: bool,
}

/// HTTP client for the email worker.
#[derive(Debug, Clone)]
pub struct EmailClient {
    http: Client,
    endpoint: Option<String>,
    from_address: String,
    from_name: String,
}

impl EmailClient {
    pub fn new(config: &EmailConfig) -> Self {
        let endpoint = config.endpoint().map(str::to_string);
        if endpoint.is_none() {
            warn!("No email endpoint configured; lifecycle notifications are disabled");
        }

        Self {
            http: Client::new(),
            endpoint,
            from_address: config.from_address.clone(),
            from_name: config.from_name.clone(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Send one email. Returns `true` only when the worker confirms success.
    pub async fn send(&self, to: &str, subject: &str, html: &str) -> bool {
        let Some(endpoint) = self.endpoint.as_deref() else {
            warn!(to = %to, "Email not sent: no email endpoint configured");
            return false;
        };

        let request = SendEmailRequest {
            to,
            subject,
            html,
            from: &self.from_address,
            from_name: &self.from_name,
        };

        let response = match self.http.post(endpoint).json(&request).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(to = %to, error = %e, "Error sending email");
                return false;
            }
        };

        let status = response.status();
        if !status.is_success() {
            warn!(to = %to, status = %status, "Email worker rejected request");
            return false;
        }

        match response.json::<SendEmailResponse>().await {
            Ok(SendEmailResponse { success: true }) => {
                debug!(to = %to, subject = %subject, "Email sent");
                true
            }
            Ok(_) => {
                warn!(to = %to, "Email worker reported failure");
                false
            }
            Err(e) => {
                warn!(to = %to, error = %e, "Unreadable email worker response");
                false
            }
        }
    }
}
