use super::payments::Tariff;

/// Who an inbound chat event came from, as reported by the transport.
#[derive(Clone, Debug)]
pub struct ChatUser {
    pub user_id: i64,
    pub username: Option<String>,
    pub first_name: Option<String>,
}

/// Inbound chat events, one variant per thing a transport can deliver.
/// The registration service is the single consumer.
#[derive(Clone, Debug)]
pub enum InboundEvent {
    /// `/start`, optionally carrying a deep-link payload such as `r79123456789`.
    Start { deep_link: Option<String> },
    /// "Yes, a friend invited me."
    ReferrerConfirmed,
    /// "No referrer" or an explicit skip.
    ReferrerSkipped,
    /// Free-text phone number entered while we wait for the referrer's number.
    ReferrerPhoneEntered { phone: String },
    ConsentAgreed,
    ConsentDeclined,
    /// Contact shared through the transport; `contact_owner_id` is the id the
    /// transport says the contact belongs to.
    PhoneShared { phone: String, contact_owner_id: i64 },
    ChatMessage { text: String },
    BuyTariff { tariff: Tariff },
    Profile,
    ReferralInfo,
}

/// Extracts a referrer phone out of a `/start` deep-link parameter.
/// The parameter format is `r<digits>`, e.g. `r79123456789` -> `+79123456789`.
pub fn referrer_phone_from_param(param: &str) -> Option<String> {
    let digits = param.strip_prefix('r')?;
    let phone = format!("+{}", digits);
    if super::users::is_phone_number(&phone) {
        Some(phone)
    } else {
        None
    }
}
