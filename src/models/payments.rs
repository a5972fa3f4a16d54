use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};

/// The two purchasable tariffs. `Basic` buys 30 days of chat access,
/// `Premium` additionally releases one course lesson per payment cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub enum Tariff {
    Basic,
    Premium,
}

impl Tariff {
    pub fn code(&self) -> i16 {
        match self {
            Tariff::Basic => 1,
            Tariff::Premium => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Tariff::Basic),
            2 => Some(Tariff::Premium),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Tariff::Basic => "Tariff 1 (Basic)",
            Tariff::Premium => "Tariff 2 (Premium)",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    Completed,
}

impl PaymentStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "completed" => Some(PaymentStatus::Completed),
            _ => None,
        }
    }
}

/// One payment record. `amount` is the amount actually charged, after the
/// `discount` taken from the payer's referral balance was applied. Status
/// only ever moves `pending -> completed`.
#[derive(Clone, Debug)]
pub struct Payment {
    pub payment_id: String,
    pub user_id: i64,
    pub amount: i64,
    pub discount: i64,
    pub tariff: Tariff,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
}

impl FromRow<'_, PgRow> for Payment {
    fn from_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        let tariff_code: i16 = row.try_get("tariff_type")?;
        let tariff = Tariff::from_code(tariff_code as i64).ok_or_else(|| {
            sqlx::Error::ColumnDecode {
                index: "tariff_type".to_string(),
                source: format!("unknown tariff code {}", tariff_code).into(),
            }
        })?;

        let status_raw: String = row.try_get("status")?;
        let status =
            PaymentStatus::parse(&status_raw).ok_or_else(|| sqlx::Error::ColumnDecode {
                index: "status".to_string(),
                source: format!("unknown payment status {:?}", status_raw).into(),
            })?;

        Ok(Payment {
            payment_id: row.try_get("payment_id")?,
            user_id: row.try_get("user_id")?,
            amount: row.try_get("amount")?,
            discount: row.try_get("discount")?,
            tariff,
            status,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Outcome of a purchase initiation: where to send the user, and what the
/// charge breaks down to.
#[derive(Clone, Debug)]
pub struct PaymentLink {
    pub payment_id: String,
    pub url: String,
    pub amount: i64,
    pub discount: i64,
}
