// Delivery of the messages produced by jobs.
use crate::client::transport::{self, HttpsClient};
use crate::config::Config;
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use http::{Method, Request, Uri, header};
use serde::Serialize;
use std::time::Duration;

pub trait Notifier: Send + Sync {
    /// Sends `text` to a linked recipient.
    fn deliver<'a>(&'a self, recipient: &'a str, text: &'a str) -> BoxFuture<'a, Result<()>>;

    /// Raises an alert for the operator (e.g. a student ran out of prepaid lessons).
    fn alert_operator<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<()>>;
}

#[derive(Serialize)]
struct WebhookMessage<'a> {
    recipient: &'a str,
    text: &'a str,
}

/// POSTs `{"recipient": .., "text": ..}` to a webhook, e.g. a chat bot's notify endpoint.
pub struct WebhookNotifier {
    client: HttpsClient,
    url: Uri,
    operator: Option<String>,
    timeout: Duration,
}

impl WebhookNotifier {
    pub fn new(url: &str, operator: Option<String>, timeout: Duration) -> Result<Self> {
        let url: Uri = url
            .parse()
            .with_context(|| format!("Invalid webhook_url '{}'", url))?;
        Ok(Self {
            client: transport::build_client()?,
            url,
            operator,
            timeout,
        })
    }

    async fn post(&self, recipient: &str, text: &str) -> Result<()> {
        let body = serde_json::to_string(&WebhookMessage { recipient, text })?;
        let req = Request::builder()
            .method(Method::POST)
            .uri(self.url.clone())
            .header(header::CONTENT_TYPE, "application/json")
            .body(body)?;

        let fetched = transport::send(self.client.clone(), req, self.timeout).await?;
        if !fetched.status.is_success() {
            anyhow::bail!(
                "Webhook rejected message for {}: {} {}",
                recipient,
                fetched.status,
                fetched.body.trim()
            );
        }
        Ok(())
    }
}

impl Notifier for WebhookNotifier {
    fn deliver<'a>(&'a self, recipient: &'a str, text: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.post(recipient, text))
    }

    fn alert_operator<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            match &self.operator {
                Some(operator) => self.post(operator, text).await,
                None => {
                    log::warn!("[operator] {}", text);
                    Ok(())
                }
            }
        })
    }
}

/// Writes messages to the log only. Used when no webhook is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn deliver<'a>(&'a self, recipient: &'a str, text: &'a str) -> BoxFuture<'a, Result<()>> {
        log::info!("[to {}] {}", recipient, text);
        Box::pin(async { Ok(()) })
    }

    fn alert_operator<'a>(&'a self, text: &'a str) -> BoxFuture<'a, Result<()>> {
        log::warn!("[operator] {}", text);
        Box::pin(async { Ok(()) })
    }
}

/// The notifier the service should use for `config`.
pub fn from_config(config: &Config) -> Result<Box<dyn Notifier>> {
    match &config.webhook_url {
        Some(url) => Ok(Box::new(WebhookNotifier::new(
            url,
            config.operator.clone(),
            config.request_timeout(),
        )?)),
        None => {
            log::info!("No webhook_url configured; notifications are only logged");
            Ok(Box::new(LogNotifier))
        }
    }
}
