//! Notification delivery for alerts

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::ChannelConfig;
use crate::error::NotifyError;
use crate::models::AlertMessage;

/// Delivers a composed alert to a target.
///
/// Implementations enforce their own deadline and report failure instead of
/// hanging. Sending the same message twice must be harmless.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `message` to `target`
    async fn send(&self, target: &str, message: &AlertMessage) -> Result<(), NotifyError>;
}

/// Sends notifications over HTTP to the configured channel
pub struct HttpNotifier {
    client: Client,
    channel: ChannelConfig,
}

impl HttpNotifier {
    /// Create a sender whose requests give up after `timeout`
    pub fn new(channel: ChannelConfig, timeout: Duration) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { client, channel })
    }

    /// Send Telegram notification
    async fn send_telegram(
        &self,
        bot_token: &str,
        api_base: &str,
        chat_id: &str,
        message: &AlertMessage,
    ) -> Result<(), NotifyError> {
        let url = format!("{}/bot{bot_token}/sendMessage", api_base.trim_end_matches('/'));
        let payload = TelegramPayload {
            chat_id,
            text: message.as_str(),
            disable_web_page_preview: true,
        };

        let response = self.client.post(url).json(&payload).send().await?;
        check_status("Telegram", response).await?;

        info!(chat_id = %chat_id, "Telegram notification sent");
        Ok(())
    }

    /// Send Slack notification
    async fn send_slack(
        &self,
        webhook_url: &str,
        channel: &str,
        message: &AlertMessage,
    ) -> Result<(), NotifyError> {
        let payload = SlackPayload {
            channel,
            username: "Healthwatch",
            icon_emoji: ":thermometer:",
            text: message.as_str(),
        };

        let response = self.client.post(webhook_url).json(&payload).send().await?;
        check_status("Slack", response).await?;

        info!(channel = %channel, "Slack notification sent");
        Ok(())
    }

    /// Send generic webhook notification
    async fn send_webhook(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        target: &str,
        message: &AlertMessage,
    ) -> Result<(), NotifyError> {
        let payload = WebhookPayload {
            target,
            message: message.as_str(),
            sent_at: Utc::now(),
        };

        let mut request = self.client.post(url).json(&payload);
        for (key, value) in headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let response = request.send().await?;
        check_status("Webhook", response).await?;

        info!(url = %url, "Webhook notification sent");
        Ok(())
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send(&self, target: &str, message: &AlertMessage) -> Result<(), NotifyError> {
        debug!(to = %target, bytes = message.as_str().len(), "Sending notification");

        match &self.channel {
            ChannelConfig::Telegram { bot_token, api_base } => {
                self.send_telegram(bot_token, api_base, target, message).await
            }
            ChannelConfig::Slack { webhook_url } => {
                self.send_slack(webhook_url, target, message).await
            }
            ChannelConfig::Webhook { url, headers } => {
                self.send_webhook(url, headers, target, message).await
            }
        }
    }
}

async fn check_status(channel: &'static str, response: Response) -> Result<(), NotifyError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let body = response.text().await.unwrap_or_default();
    Err(NotifyError::Rejected {
        channel,
        status: status.as_u16(),
        body,
    })
}

// Telegram payload
#[derive(Debug, Serialize)]
struct TelegramPayload<'a> {
    chat_id: &'a str,
    text: &'a str,
    disable_web_page_preview: bool,
}

// Slack payload
#[derive(Debug, Serialize)]
struct SlackPayload<'a> {
    channel: &'a str,
    username: &'a str,
    icon_emoji: &'a str,
    text: &'a str,
}

// Generic webhook payload
#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    target: &'a str,
    message: &'a str,
    sent_at: DateTime<Utc>,
}
