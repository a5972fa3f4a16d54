use anyhow::bail;
use async_trait::async_trait;
use serde_json::json;

/// Outbound chat messages. Fire-and-forget: senders log failures and never
/// roll back state because a notification did not go out.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: i64, text: &str) -> Result<(), anyhow::Error>;
}

pub struct TelegramNotifier {
    client: reqwest::Client,
    token: String,
}

impl TelegramNotifier {
    pub fn new(token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            token,
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, user_id: i64, text: &str) -> Result<(), anyhow::Error> {
        let payload = json!({
            "chat_id": user_id,
            "text": text,
            "parse_mode": "HTML",
        });

        let response = self
            .client
            .post(format!(
                "https://api.telegram.org/bot{}/sendMessage",
                self.token
            ))
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            bail!("Telegram: sendMessage failed with {}", response.status());
        }

        Ok(())
    }
}

/// Test double capturing everything sent, per recipient.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: std::sync::Mutex<Vec<(i64, String)>>,
}

#[cfg(test)]
impl RecordingNotifier {
    pub fn messages_for(&self, user_id: i64) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == user_id)
            .map(|(_, text)| text.clone())
            .collect()
    }
}

#[cfg(test)]
#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, user_id: i64, text: &str) -> Result<(), anyhow::Error> {
        self.sent.lock().unwrap().push((user_id, text.to_string()));
        Ok(())
    }
}

/// Test double that always fails, for checking that notification failures
/// never surface as reconciliation failures.
#[cfg(test)]
pub struct FailingNotifier;

#[cfg(test)]
#[async_trait]
impl Notifier for FailingNotifier {
    async fn notify(&self, _user_id: i64, _text: &str) -> Result<(), anyhow::Error> {
        bail!("transport down")
    }
}
