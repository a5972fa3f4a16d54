pub mod events;
pub mod payments;
pub mod referrals;
pub mod users;
