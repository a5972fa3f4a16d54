use async_trait::async_trait;
use serde_json::json;

/// Answer generation behind the subscription gate.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn respond(&self, user_id: i64, text: &str) -> Result<String, anyhow::Error>;
}

pub struct OpenAiApi {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiApi {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
        }
    }
}

#[async_trait]
impl ChatBackend for OpenAiApi {
    async fn respond(&self, user_id: i64, text: &str) -> Result<String, anyhow::Error> {
        if self.api_key.is_empty() {
            // Unconfigured deployments still answer, with a canned reply.
            log::info!("Chat backend not configured, canned reply for user {}", user_id);
            return Ok(format!(
                "🤖 <b>The assistant is not configured yet.</b>\n\n\
                 Your message: <i>{}</i>\n\n\
                 A real answer will appear here once the API key is set up.",
                text
            ));
        }

        let payload = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": text}],
        });

        let response: serde_json::Value = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?
            .json()
            .await?;

        match response["choices"][0]["message"]["content"].as_str() {
            Some(answer) => Ok(answer.to_string()),
            None => anyhow::bail!("OpenAI: bad response format: {}", response),
        }
    }
}

#[cfg(test)]
pub struct EchoChat;

#[cfg(test)]
#[async_trait]
impl ChatBackend for EchoChat {
    async fn respond(&self, _user_id: i64, text: &str) -> Result<String, anyhow::Error> {
        Ok(format!("echo: {}", text))
    }
}
