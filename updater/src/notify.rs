//! Outbound notifications about updates and outages
//!
//! Sending is fire-and-forget: a sink never reports back to the loop and logs
//! its own delivery failures.

use log::{info, warn};
use serde::Serialize;
use std::time::Duration;

pub trait Notifier: Send + Sync {
    fn send(&self, recipients: &[String], subject: &str, body: &str);

    /// Follows a changed `notifyUrl` after a config reload
    fn retarget(&mut self, _url: Option<&str>) {}
}

/// Subject prefix naming the server instance
pub fn subject_prefix(hostname: Option<&str>) -> String {
    match hostname {
        Some(name) => format!("{}: ", name),
        None => "Server ".to_string(),
    }
}

/// Writes notifications to the log only
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, recipients: &[String], subject: &str, body: &str) {
        if body == subject {
            info!("Notify {:?}: {}", recipients, subject);
        } else {
            info!("Notify {:?}: {} - {}", recipients, subject, body);
        }
    }
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct WebhookPayload<'a> {
    pub recipient: &'a str,
    pub subject: &'a str,
    pub body: &'a str,
}

/// Posts one JSON payload per recipient to an HTTP endpoint
///
/// Each delivery runs on its own task, so this must be called from inside a
/// tokio runtime.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            url: url.to_string(),
            client,
        })
    }
}

impl Notifier for WebhookNotifier {
    fn send(&self, recipients: &[String], subject: &str, body: &str) {
        for recipient in recipients {
            let client = self.client.clone();
            let url = self.url.clone();
            let recipient = recipient.clone();
            let subject = subject.to_string();
            let body = body.to_string();

            tokio::spawn(async move {
                let payload = WebhookPayload {
                    recipient: &recipient,
                    subject: &subject,
                    body: &body,
                };
                let result = client
                    .post(&url)
                    .json(&payload)
                    .send()
                    .await
                    .and_then(|response| response.error_for_status());

                match result {
                    Ok(_) => info!("Notified {}: {}", recipient, subject),
                    Err(e) => warn!("Notification to {} failed: {}", recipient, e),
                }
            });
        }
    }
}

/// The sink `notifyUrl` selects: a webhook when set, the log otherwise
pub struct ConfiguredNotifier {
    url: Option<String>,
    inner: Box<dyn Notifier>,
}

impl ConfiguredNotifier {
    pub fn new(url: Option<&str>) -> Result<Self, reqwest::Error> {
        Ok(Self {
            url: url.map(str::to_string),
            inner: Self::sink(url)?,
        })
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    fn sink(url: Option<&str>) -> Result<Box<dyn Notifier>, reqwest::Error> {
        Ok(match url {
            Some(url) => Box::new(WebhookNotifier::new(url)?),
            None => Box::new(LogNotifier),
        })
    }
}

impl Notifier for ConfiguredNotifier {
    fn send(&self, recipients: &[String], subject: &str, body: &str) {
        self.inner.send(recipients, subject, body);
    }

    fn retarget(&mut self, url: Option<&str>) {
        if self.url.as_deref() == url {
            return;
        }

        match Self::sink(url) {
            Ok(inner) => {
                info!("Notifications now go to {}", url.unwrap_or("the log"));
                self.inner = inner;
                self.url = url.map(str::to_string);
            }
            Err(e) => warn!("Keeping previous notification sink: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_prefix() {
        assert_eq!(subject_prefix(Some("EU Main")), "EU Main: ");
        assert_eq!(subject_prefix(None), "Server ");
    }

    #[test]
    fn test_webhook_payload_shape() {
        let payload = WebhookPayload {
            recipient: "admin@example.com",
            subject: "Server not responding",
            body: "Server not responding",
        };
        assert_eq!(
            serde_json::to_string(&payload).unwrap(),
            r#"{"recipient":"admin@example.com","subject":"Server not responding","body":"Server not responding"}"#
        );
    }

    #[test]
    fn test_log_notifier_accepts_empty_recipients() {
        LogNotifier.send(&[], "Server back online", "Server back online");
    }

    #[tokio::test]
    async fn test_webhook_without_recipients_spawns_nothing() {
        let notifier = WebhookNotifier::new("http://127.0.0.1:9/hook").unwrap();
        notifier.send(&[], "subject", "body");
    }

    #[tokio::test]
    async fn test_configured_notifier_follows_url() {
        let mut notifier = ConfiguredNotifier::new(None).unwrap();
        assert_eq!(notifier.url(), None);

        notifier.retarget(Some("http://127.0.0.1:9/hook"));
        assert_eq!(notifier.url(), Some("http://127.0.0.1:9/hook"));
        notifier.send(&[], "subject", "body");

        notifier.retarget(None);
        assert_eq!(notifier.url(), None);
    }
}
