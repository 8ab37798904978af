//! Notification payloads and delivery channels.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{NotifyError, NotifyResult};

/// Severity of a terminal-state message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Success,
    Failure,
    /// Used for rollbacks, so operators can tell them apart from plain failures.
    Warning,
    Interrupted,
}

impl Level {
    /// Attachment color understood by Slack-style webhooks.
    pub fn color(&self) -> &'static str {
        match self {
            Level::Success => "good",
            Level::Failure => "danger",
            Level::Warning => "warning",
            Level::Interrupted => "#808080",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: Level,
    pub text: String,
}

impl Notification {
    pub fn new(level: Level, text: impl Into<String>) -> Self {
        Self {
            level,
            text: text.into(),
        }
    }

    pub fn success(text: impl Into<String>) -> Self {
        Self::new(Level::Success, text)
    }

    pub fn failure(text: impl Into<String>) -> Self {
        Self::new(Level::Failure, text)
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self::new(Level::Warning, text)
    }

    pub fn interrupted(text: impl Into<String>) -> Self {
        Self::new(Level::Interrupted, text)
    }

    /// The `{text, color}` body posted to the webhook.
    pub fn payload(&self) -> serde_json::Value {
        serde_json::json!({
            "text": self.text,
            "color": self.level.color(),
        })
    }
}

/// A channel that release outcomes are pushed to.
pub trait Notifier: Send + Sync {
    fn send(&self, notification: &Notification) -> impl Future<Output = NotifyResult<()>> + Send;
}

/// Posts JSON to an incoming-webhook URL.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: &str, timeout: Duration) -> NotifyResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("keel-notify/0.1")
            .build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

impl Notifier for WebhookNotifier {
    async fn send(&self, notification: &Notification) -> NotifyResult<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&notification.payload())
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NotifyError::Status {
                status: status.as_u16(),
            });
        }
        debug!(level = ?notification.level, "notification delivered");
        Ok(())
    }
}

/// Writes notifications to the log only. Used when no webhook is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> NotifyResult<()> {
        info!(level = ?notification.level, text = %notification.text, "notification");
        Ok(())
    }
}

/// The notifier picked from configuration.
#[derive(Debug, Clone)]
pub enum Channel {
    Webhook(WebhookNotifier),
    Log(LogNotifier),
}

impl Channel {
    /// A webhook channel when `url` is set, otherwise log-only.
    pub fn from_url(url: Option<&str>, timeout: Duration) -> NotifyResult<Self> {
        match url {
            Some(url) => Ok(Channel::Webhook(WebhookNotifier::new(url, timeout)?)),
            None => Ok(Channel::Log(LogNotifier)),
        }
    }
}

impl Notifier for Channel {
    async fn send(&self, notification: &Notification) -> NotifyResult<()> {
        match self {
            Channel::Webhook(webhook) => webhook.send(notification).await,
            Channel::Log(log) => log.send(notification).await,
        }
    }
}

/// Send and swallow any failure. Returns whether delivery succeeded.
pub async fn deliver_best_effort<N: Notifier>(notifier: &N, notification: &Notification) -> bool {
    match notifier.send(notification).await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, level = ?notification.level, "notification not delivered");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    /// Accept one request, answer with `status_line`, and hand back what was received.
    async fn webhook_once(status_line: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                received.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&received);
                if n == 0 || text.contains("\r\n\r\n") && text.trim_end().ends_with('}') {
                    break;
                }
            }
            let response = format!("{status_line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
            socket.write_all(response.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&received).into_owned()
        });
        (format!("http://{addr}/hooks/release"), handle)
    }

    #[test]
    fn payload_carries_text_and_color() {
        let payload = Notification::warning("rolled back to 20261017_120000").payload();
        assert_eq!(payload["text"], "rolled back to 20261017_120000");
        assert_eq!(payload["color"], "warning");
    }

    #[test]
    fn each_level_has_distinct_color() {
        let colors = [
            Level::Success.color(),
            Level::Failure.color(),
            Level::Warning.color(),
            Level::Interrupted.color(),
        ];
        for (i, a) in colors.iter().enumerate() {
            for b in &colors[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[tokio::test]
    async fn webhook_posts_json() {
        let (url, server) = webhook_once("HTTP/1.1 200 OK").await;
        let notifier = WebhookNotifier::new(&url, Duration::from_secs(5)).unwrap();

        notifier
            .send(&Notification::success("release ok"))
            .await
            .unwrap();

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /hooks/release"));
        assert!(request.contains("\"text\":\"release ok\""));
        assert!(request.contains("\"color\":\"good\""));
    }

    #[tokio::test]
    async fn webhook_non_2xx_is_error() {
        let (url, _server) = webhook_once("HTTP/1.1 500 Internal Server Error").await;
        let notifier = WebhookNotifier::new(&url, Duration::from_secs(5)).unwrap();

        let err = notifier
            .send(&Notification::failure("boom"))
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Status { status: 500 }));
    }

    #[tokio::test]
    async fn best_effort_swallows_unreachable_webhook() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let notifier =
            WebhookNotifier::new(&format!("http://{addr}/hook"), Duration::from_secs(1)).unwrap();
        let delivered = deliver_best_effort(&notifier, &Notification::failure("boom")).await;
        assert!(!delivered);
    }

    #[tokio::test]
    async fn channel_without_url_logs_only() {
        let channel = Channel::from_url(None, Duration::from_secs(1)).unwrap();
        assert!(matches!(channel, Channel::Log(_)));
        assert!(deliver_best_effort(&channel, &Notification::success("ok")).await);
    }
}
