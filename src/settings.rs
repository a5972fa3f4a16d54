use config::{Config, ConfigError, File};
use serde::Deserialize;

use crate::models::payments::Tariff;

#[derive(Clone, Debug, Deserialize)]
pub struct Postgres {
    pub url: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Http {
    pub bind: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Telegram {
    pub token: String,
    pub bot_username: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CloudPayments {
    pub public_id: String,
    pub api_secret: String,
    /// Sandbox vs live gateway endpoint. Nothing else may influence the
    /// endpoint choice.
    pub sandbox: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Tariffs {
    pub tariff1_price: i64,
    pub tariff2_price: i64,
    pub referral_bonus: i64,
    pub duration_days: i64,
}

impl Tariffs {
    pub fn price(&self, tariff: Tariff) -> i64 {
        match tariff {
            Tariff::Basic => self.tariff1_price,
            Tariff::Premium => self.tariff2_price,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct Course {
    pub lessons_file: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct OpenAi {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_openai_model")]
    pub model: String,
}

fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

#[derive(Clone, Debug, Deserialize)]
pub struct Privacy {
    pub policy_url: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
    pub postgres: Postgres,
    pub http: Http,
    pub telegram: Telegram,
    pub cloudpayments: CloudPayments,
    pub tariffs: Tariffs,
    pub course: Course,
    #[serde(default)]
    pub openai: OpenAi,
    pub privacy: Privacy,
}

impl Settings {
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder().add_source(File::with_name(path)).build()?;

        config.try_deserialize()
    }
}
