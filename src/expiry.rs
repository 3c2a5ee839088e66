//! Expiry evaluation for offer countdowns and reminder policy.
use crate::offer::{Offer, OfferStatus, TimeStamp};
use chrono::{Duration, Utc};

const MS_PER_SECOND: i64 = 1_000;
const MS_PER_MINUTE: i64 = 60 * MS_PER_SECOND;
const MS_PER_HOUR: i64 = 60 * MS_PER_MINUTE;
const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;

pub const DEFAULT_WARNING_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryStatus {
    Active,
    ExpiringSoon,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryReading {
    pub status: ExpiryStatus,
    /// Milliseconds left; zero or negative once expired.
    pub remaining_ms: i64,
}

/// Remaining time split for display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Countdown {
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
}

impl ExpiryReading {
    pub fn countdown(&self) -> Countdown {
        if self.remaining_ms <= 0 {
            return Countdown::default();
        }
        let ms = self.remaining_ms;
        Countdown {
            days: ms / MS_PER_DAY,
            hours: (ms % MS_PER_DAY) / MS_PER_HOUR,
            minutes: (ms % MS_PER_HOUR) / MS_PER_MINUTE,
            seconds: (ms % MS_PER_MINUTE) / MS_PER_SECOND,
        }
    }
}

/// Evaluates with the default 24 hour warning window.
pub fn evaluate(expires_at: &TimeStamp<Utc>, now: &TimeStamp<Utc>) -> ExpiryReading {
    evaluate_within(expires_at, now, Duration::hours(DEFAULT_WARNING_HOURS))
}

pub fn evaluate_within(
    expires_at: &TimeStamp<Utc>,
    now: &TimeStamp<Utc>,
    warning_window: Duration,
) -> ExpiryReading {
    let remaining_ms = now.millis_until(expires_at);
    let status = if remaining_ms <= 0 {
        ExpiryStatus::Expired
    } else if remaining_ms <= warning_window.num_milliseconds() {
        ExpiryStatus::ExpiringSoon
    } else {
        ExpiryStatus::Active
    };

    ExpiryReading {
        status,
        remaining_ms,
    }
}

/// What the caller should do about an offer's expiry right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpiryEffect {
    None,
    /// Send the one-off expiring-soon reminder.
    Warn,
    /// Move the offer to expired.
    Expire,
}

pub fn decide(offer: &Offer, now: &TimeStamp<Utc>, warning_window: Duration) -> ExpiryEffect {
    if offer.status != OfferStatus::Pending {
        return ExpiryEffect::None;
    }
    match evaluate_within(&offer.expires_at, now, warning_window).status {
        ExpiryStatus::Expired => ExpiryEffect::Expire,
        ExpiryStatus::ExpiringSoon if offer.expiry_warned_at.is_none() => ExpiryEffect::Warn,
        _ => ExpiryEffect::None,
    }
}

/// Copy of `offer` recording that its reminder went out at `now`.
pub fn mark_warned(offer: &Offer, now: &TimeStamp<Utc>) -> Offer {
    let mut next = offer.clone();
    next.expiry_warned_at = Some(now.clone());
    next
}
