use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};

use super::payments::Tariff;

/// Registration progresses strictly forward; `Active` means the row carries
/// a permanent phone number and recorded consent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum RegistrationState {
    New,
    AwaitingReferrerChoice,
    AwaitingReferrerPhone,
    AwaitingConsent,
    AwaitingPhone,
    Active,
}

impl RegistrationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationState::New => "new",
            RegistrationState::AwaitingReferrerChoice => "awaiting_referrer_choice",
            RegistrationState::AwaitingReferrerPhone => "awaiting_referrer_phone",
            RegistrationState::AwaitingConsent => "awaiting_consent",
            RegistrationState::AwaitingPhone => "awaiting_phone",
            RegistrationState::Active => "active",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "new" => Some(RegistrationState::New),
            "awaiting_referrer_choice" => Some(RegistrationState::AwaitingReferrerChoice),
            "awaiting_referrer_phone" => Some(RegistrationState::AwaitingReferrerPhone),
            "awaiting_consent" => Some(RegistrationState::AwaitingConsent),
            "awaiting_phone" => Some(RegistrationState::AwaitingPhone),
            "active" => Some(RegistrationState::Active),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct User {
    pub user_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
    /// None until registration captures a real number. A row with a phone
    /// is a permanent identity; the column is unique in the store.
    pub phone_number: Option<String>,
    pub registration_state: RegistrationState,
    /// Set once during registration, never overwritten afterwards.
    pub referrer_phone: Option<String>,
    pub referral_balance: i64,
    pub subscription_end: Option<DateTime<Utc>>,
    pub tariff_type: Option<Tariff>,
    pub tariff2_counter: i32,
    pub has_paid: bool,
    pub privacy_consent: bool,
    pub privacy_consent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn subscription_active(&self, now: DateTime<Utc>) -> bool {
        match self.subscription_end {
            Some(end) => end > now,
            None => false,
        }
    }

    pub fn display_name(&self) -> &str {
        self.username
            .as_deref()
            .or(self.first_name.as_deref())
            .unwrap_or("friend")
    }
}

impl FromRow<'_, PgRow> for User {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        let state_raw: String = row.try_get("registration_state")?;
        let registration_state =
            RegistrationState::parse(&state_raw).ok_or_else(|| sqlx::Error::ColumnDecode {
                index: "registration_state".to_string(),
                source: format!("unknown registration state {:?}", state_raw).into(),
            })?;

        let tariff_code: Option<i16> = row.try_get("tariff_type")?;
        let tariff_type = match tariff_code {
            Some(code) => Some(Tariff::from_code(code as i64).ok_or_else(|| {
                sqlx::Error::ColumnDecode {
                    index: "tariff_type".to_string(),
                    source: format!("unknown tariff code {}", code).into(),
                }
            })?),
            None => None,
        };

        Ok(User {
            user_id: row.try_get("user_id")?,
            username: row.try_get("username")?,
            first_name: row.try_get("first_name")?,
            phone_number: row.try_get("phone_number")?,
            registration_state,
            referrer_phone: row.try_get("referrer_phone")?,
            referral_balance: row.try_get("referral_balance")?,
            subscription_end: row.try_get("subscription_end")?,
            tariff_type,
            tariff2_counter: row.try_get("tariff2_counter")?,
            has_paid: row.try_get("has_paid")?,
            privacy_consent: row.try_get("privacy_consent")?,
            privacy_consent_at: row.try_get("privacy_consent_at")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// `+` followed by 10 to 15 digits.
pub fn is_phone_number(s: &str) -> bool {
    let Some(digits) = s.strip_prefix('+') else {
        return false;
    };

    (10..=15).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit())
}

pub fn normalize_phone(s: &str) -> String {
    let trimmed = s.trim();
    if trimmed.starts_with('+') {
        trimmed.to_string()
    } else {
        format!("+{}", trimmed)
    }
}
