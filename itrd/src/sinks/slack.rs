//! Slack incoming-webhook notifier.

use async_trait::async_trait;
use itr_common::{Notifier, SinkError};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Serialize)]
struct SlackMessage<'a> {
    text: &'a str,
}

pub struct SlackNotifier {
    url: String,
    client: Client,
}

impl SlackNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, SinkError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SinkError::Transport(e.to_string()))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn send(&self, text: &str) -> Result<(), SinkError> {
        let response = self
            .client
            .post(&self.url)
            .json(&SlackMessage { text })
            .send()
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(SinkError::Status {
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_is_text_object() {
        let json = serde_json::to_value(SlackMessage { text: "Test `a` failed." }).unwrap();
        assert_eq!(json, serde_json::json!({ "text": "Test `a` failed." }));
    }
}
