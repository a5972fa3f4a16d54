use anyhow::Context;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const WIDGET_URL: &str = "https://widget.cloudpayments.ru/widgets";
const SANDBOX_WIDGET_URL: &str = "https://widget.cloudpayments.ru/widgets/test";

/// CloudPayments gateway adapter: outbound widget links and inbound
/// settlement-notification signature checks.
pub struct CloudPaymentsApi {
    public_id: String,
    api_secret: String,
    sandbox: bool,
}

impl CloudPaymentsApi {
    pub fn new(public_id: String, api_secret: String, sandbox: bool) -> Self {
        Self {
            public_id,
            api_secret,
            sandbox,
        }
    }

    /// Builds the payment widget link. Sandbox vs live endpoint is decided
    /// by configuration alone, never by the payment itself.
    pub fn payment_link(
        &self,
        amount: i64,
        description: &str,
        payment_id: &str,
        account_id: i64,
    ) -> Result<String, anyhow::Error> {
        let base = if self.sandbox {
            SANDBOX_WIDGET_URL
        } else {
            WIDGET_URL
        };

        let url = reqwest::Url::parse_with_params(
            &format!("{}/{}", base, self.public_id),
            &[
                ("amount", amount.to_string()),
                ("currency", "RUB".to_string()),
                ("description", description.to_string()),
                ("invoiceId", payment_id.to_string()),
                ("accountId", account_id.to_string()),
                ("requireConfirmation", "false".to_string()),
                ("cultureName", "ru-RU".to_string()),
            ],
        )
        .context("CloudPayments: could not build widget URL")?;

        Ok(url.to_string())
    }

    /// Recomputes HMAC-SHA256 over the raw notification body and compares it
    /// against the hex signature the gateway sent. A missing secret or an
    /// undecodable signature fails closed.
    pub fn verify_notification(&self, raw_body: &str, signature: &str) -> bool {
        if self.api_secret.is_empty() {
            log::warn!("CloudPayments: no API secret configured, rejecting notification");
            return false;
        }

        let Ok(provided) = hex::decode(signature.trim()) else {
            return false;
        };

        // new_from_slice accepts any key length; treat failure as a bad key.
        let Ok(mut mac) = HmacSha256::new_from_slice(self.api_secret.as_bytes()) else {
            return false;
        };
        mac.update(raw_body.as_bytes());

        // verify_slice is a constant-time comparison.
        mac.verify_slice(&provided).is_ok()
    }
}
