use std::time::Duration;

use chat_core::{Action, ActionOutcome, ChatError, ChatErrorCategory};
use tracing::{debug, warn};
use url::Url;

/// Client for the `/channel/{ladder}/{action}` endpoint.
#[derive(Debug, Clone)]
pub struct ActionClient {
    http: reqwest::Client,
    base_url: Url,
    ladder_name: String,
    user_id: String,
}

impl ActionClient {
    pub fn new(
        base_url: Url,
        ladder_name: impl Into<String>,
        user_id: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, ChatError> {
        if base_url.cannot_be_a_base() {
            return Err(ChatError::new(
                ChatErrorCategory::Config,
                "invalid_base_url",
                format!("{base_url} cannot carry an action path"),
            ));
        }
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|err| {
                ChatError::new(
                    ChatErrorCategory::Internal,
                    "http_client_build_failed",
                    err.to_string(),
                )
            })?;

        Ok(Self {
            http,
            base_url,
            ladder_name: ladder_name.into(),
            user_id: user_id.into(),
        })
    }

    pub fn endpoint(&self, action: &Action) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["channel", self.ladder_name.as_str(), action.name()]);
        }
        url
    }

    /// POST the action. Never fails: a request that produced no HTTP
    /// response is reported with status 0.
    pub async fn perform(&self, action: &Action) -> ActionOutcome {
        let mut form = action.params();
        form.push(("user_id", self.user_id.clone()));

        let response = match self.http.post(self.endpoint(action)).form(&form).send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(action = action.name(), error = %err, "action request failed");
                return ActionOutcome::failed(err.status().map_or(0, |status| status.as_u16()));
            }
        };

        let status = response.status().as_u16();
        match response.text().await {
            Ok(body) => {
                debug!(action = action.name(), status, "action completed");
                ActionOutcome { status, body }
            }
            Err(err) => {
                warn!(action = action.name(), status, error = %err, "action body unreadable");
                ActionOutcome::failed(0)
            }
        }
    }
}
