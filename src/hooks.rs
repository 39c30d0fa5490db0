use crate::http::build_client;
use crate::models::OutcomeEvent;
use tracing::{debug, warn};

/// Pushes terminal outcomes to an external webhook. Delivery is
/// best-effort: a failed post is logged and never affects the task.
#[derive(Clone)]
pub struct WebhookNotifier {
    url: Option<String>,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn from_env() -> Self {
        let url = std::env::var("WEBHOOK_URL").ok().filter(|u| !u.is_empty());
        if url.is_none() {
            debug!(target = "talaria.hooks", "WEBHOOK_URL unset, notifications disabled");
        }
        Self {
            url,
            client: build_client(None, None),
        }
    }

    pub async fn notify(&self, event: &OutcomeEvent) {
        let Some(url) = &self.url else {
            return;
        };
        match self.client.post(url).json(event).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(
                    target = "talaria.hooks",
                    task_id = %event.task_id,
                    "outcome delivered"
                );
            }
            Ok(response) => {
                warn!(
                    target = "talaria.hooks",
                    task_id = %event.task_id,
                    status = response.status().as_u16(),
                    "webhook rejected outcome"
                );
            }
            Err(err) => {
                warn!(
                    target = "talaria.hooks",
                    task_id = %event.task_id,
                    "webhook delivery failed: {err}"
                );
            }
        }
    }
}
