use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// Append-only audit row written whenever a referral bonus is credited.
#[derive(Clone, Debug, FromRow)]
pub struct ReferralEntry {
    pub id: i64,
    pub referrer_phone: String,
    pub referred_phone: String,
    pub bonus_amount: i64,
    pub created_at: DateTime<Utc>,
}
