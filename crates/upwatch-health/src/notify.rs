//! Notification rendering and delivery.
//!
//! Messages are rendered from a template with the `!name`, `!url` and
//! `!status` placeholders, then fanned out to every configured [`Notifier`].
//! Delivery failures are logged per notifier and never propagate.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info};

use upwatch_core::UpwatchConfig;

use crate::tracker::Status;

/// Template used when none is stored.
pub const DEFAULT_TEMPLATE: &str = "The application !name (!url) went !status!";

const PLACEHOLDER_NAME: &str = "!name";
const PLACEHOLDER_URL: &str = "!url";
const PLACEHOLDER_STATUS: &str = "!status";

/// Render a notification message.
///
/// A missing template falls back to [`DEFAULT_TEMPLATE`]. So does a
/// whitespace-only one: unlike an exact `""` check, blank templates count
/// as unset here on purpose, since they would render an empty message.
///
/// The template is scanned once, so placeholder text inside the substituted
/// values is left alone.
pub fn render_template(template: Option<&str>, name: &str, url: &str, status: Status) -> String {
    let template = template
        .filter(|t| !t.trim().is_empty())
        .unwrap_or(DEFAULT_TEMPLATE);

    let mut out = String::with_capacity(template.len() + name.len() + url.len());
    let mut rest = template;
    while let Some(pos) = rest.find('!') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        let (value, consumed) = if tail.starts_with(PLACEHOLDER_STATUS) {
            (status.as_str(), PLACEHOLDER_STATUS.len())
        } else if tail.starts_with(PLACEHOLDER_NAME) {
            (name, PLACEHOLDER_NAME.len())
        } else if tail.starts_with(PLACEHOLDER_URL) {
            (url, PLACEHOLDER_URL.len())
        } else {
            ("!", 1)
        };
        out.push_str(value);
        rest = &tail[consumed..];
    }
    out.push_str(rest);
    out
}

/// Errors from a single notification delivery.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("endpoint answered {0}")]
    Status(u16),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Boxed future returned by [`Notifier::notify`].
pub type NotifyFuture<'a> = Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + 'a>>;

/// A notification channel.
pub trait Notifier: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &str;

    /// Deliver one rendered message.
    fn notify<'a>(&'a self, message: &'a str) -> NotifyFuture<'a>;
}

/// Writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    fn notify<'a>(&'a self, message: &'a str) -> NotifyFuture<'a> {
        Box::pin(async move {
            info!(%message, "status notification");
            Ok::<(), NotifyError>(())
        })
    }
}

/// POSTs `{"content": message}` to a webhook URL.
///
/// The payload shape is accepted by Discord and Slack-compatible endpoints.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl WebhookNotifier {
    pub fn new(client: reqwest::Client, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            url: url.into(),
            timeout,
        }
    }

    async fn post(&self, message: &str) -> Result<(), NotifyError> {
        let payload = serde_json::json!({ "content": message });
        let send = self.client.post(&self.url).json(&payload).send();
        let resp = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| NotifyError::Timeout(self.timeout))??;
        let status = resp.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }
        debug!(url = %self.url, status = status.as_u16(), "webhook delivered");
        Ok(())
    }
}

impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        &self.url
    }

    fn notify<'a>(&'a self, message: &'a str) -> NotifyFuture<'a> {
        Box::pin(self.post(message))
    }
}

/// Fans a message out to every registered notifier.
#[derive(Clone, Default)]
pub struct NotificationSender {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl NotificationSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log notifier plus one webhook notifier per configured URL.
    pub fn from_config(config: &UpwatchConfig, client: reqwest::Client) -> Self {
        let timeout = config.webhook_timeout();
        let mut sender = Self::new().with_notifier(Arc::new(LogNotifier));
        for url in config.webhooks() {
            sender = sender.with_notifier(Arc::new(WebhookNotifier::new(
                client.clone(),
                url.clone(),
                timeout,
            )));
        }
        sender
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }

    /// Deliver `message` on every channel. Returns how many succeeded.
    pub async fn send(&self, message: &str) -> usize {
        let mut delivered = 0;
        for notifier in &self.notifiers {
            match notifier.notify(message).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    error!(notifier = notifier.name(), error = %e, "notification delivery failed");
                }
            }
        }
        delivered
    }
}

impl std::fmt::Debug for NotificationSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.notifiers.iter().map(|n| n.name()).collect();
        f.debug_struct("NotificationSender")
            .field("notifiers", &names)
            .finish()
    }
}
