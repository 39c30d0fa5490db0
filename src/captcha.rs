use crate::http::build_client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum CaptchaError {
    #[error("no token within {0:?}")]
    Timeout(Duration),
    #[error("bridge transport: {0}")]
    Transport(String),
    #[error("bridge returned HTTP {0}")]
    Status(u16),
}

#[derive(Debug, Serialize)]
struct SolveRequest<'a> {
    runner_id: &'a str,
    site_key: &'a str,
    url: &'a str,
}

#[derive(Debug, Deserialize)]
struct SolveResponse {
    token: String,
}

/// Bridge to an external captcha harvester. Tokens are requested on
/// demand during the payment step; the solve is awaited with a deadline
/// so a stuck harvester cannot hang the checkout.
#[derive(Clone)]
pub struct CaptchaBridge {
    url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl CaptchaBridge {
    /// `None` when no bridge is configured; checkouts then submit
    /// without a captcha token.
    pub fn from_env() -> Option<Self> {
        let url = std::env::var("CAPTCHA_BRIDGE_URL")
            .ok()
            .filter(|u| !u.is_empty())?;
        let timeout_secs = std::env::var("CAPTCHA_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(120);
        debug!(target = "talaria.captcha", url = %url, "captcha bridge enabled");
        Some(Self {
            url,
            timeout: Duration::from_secs(timeout_secs),
            client: build_client(None, None),
        })
    }

    pub async fn solve(
        &self,
        runner_id: &str,
        site_key: &str,
        page_url: &str,
    ) -> Result<String, CaptchaError> {
        let request = SolveRequest {
            runner_id,
            site_key,
            url: page_url,
        };
        let solve = async {
            let response = self
                .client
                .post(&self.url)
                .json(&request)
                .send()
                .await
                .map_err(|err| CaptchaError::Transport(err.to_string()))?;
            if !response.status().is_success() {
                return Err(CaptchaError::Status(response.status().as_u16()));
            }
            let parsed: SolveResponse = response
                .json()
                .await
                .map_err(|err| CaptchaError::Transport(err.to_string()))?;
            Ok(parsed.token)
        };
        let token = tokio::time::timeout(self.timeout, solve)
            .await
            .map_err(|_| CaptchaError::Timeout(self.timeout))??;
        info!(target = "talaria.captcha", runner_id, "captcha token received");
        Ok(token)
    }
}
