//! Error types returned by the offer engine
use crate::offer::{OfferId, OfferStatus, TimeStamp};
use crate::validator::ValidationReport;
use chrono::Utc;
use std::fmt;

pub type Result<T> = std::result::Result<T, OfferError>;

/// Individual rule violations collected by the validator.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    #[error("Offer amount must be greater than zero")]
    AmountNotPositive,
    #[error("Counter offer must change the amount")]
    AmountUnchanged,
    #[error("Offer amount exceeds the allowed ceiling of {ceiling}")]
    AmountExceedsCeiling { ceiling: i64 },
    #[error("Counter offer moves in the wrong direction for a {role}")]
    AmountWrongDirection { role: crate::offer::Role },
    #[error("A pending offer already exists: {existing_offer_id}")]
    DuplicatePendingOffer { existing_offer_id: OfferId },
    #[error("Reached the maximum of {limit} offers for this listing")]
    OfferLimitReached { limit: usize },
    #[error("Reached the maximum of {limit} rounds in this negotiation")]
    CounterRoundsExhausted { limit: usize },
}

/// The action that was attempted on an offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Create,
    Accept,
    Reject,
    Counter,
    Withdraw,
    Expire,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::Create => "create",
            ActionKind::Accept => "accept",
            ActionKind::Reject => "reject",
            ActionKind::Counter => "counter",
            ActionKind::Withdraw => "withdraw",
            ActionKind::Expire => "expire",
        };
        f.write_str(name)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum OfferError {
    #[error("Offer failed validation: {0}")]
    Validation(ValidationReport),
    #[error("Cannot {action} an offer that is {status}: {reason}")]
    InvalidTransition {
        status: OfferStatus,
        action: ActionKind,
        reason: String,
    },
    #[error("Offer {offer_id} expired at {expired_at}")]
    OfferExpired {
        offer_id: OfferId,
        expired_at: TimeStamp<Utc>,
    },
    #[error("Offer draft is incomplete: {0}")]
    InvalidDraft(String),
    #[error("Deadline {hours}h after {from} is out of range")]
    DeadlineOutOfRange { from: TimeStamp<Utc>, hours: i64 },
    #[error("Offer not found: {0}")]
    NotFound(OfferId),
    #[error("Reservation for offer {offer_id} failed, offer left pending: {reason}")]
    ReservationFailed { offer_id: OfferId, reason: String },
    #[error("Reservation {reservation_id} refused: {reason}")]
    ReservationRefused {
        reservation_id: String,
        reason: String,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl OfferError {
    /// Validation issues carried by this error, empty for every other kind.
    pub fn issues(&self) -> &[ValidationIssue] {
        match self {
            OfferError::Validation(report) => report.issues(),
            _ => &[],
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("failed to encode record: {0}")]
    Encode(String),
    #[error("failed to decode record: {0}")]
    Decode(#[from] minicbor::decode::Error),
    #[error("record not found: {0}")]
    Missing(String),
    #[error("offer status was {found}, expected {expected}")]
    StatusMismatch {
        expected: OfferStatus,
        found: OfferStatus,
    },
    #[error("reservation {reservation_id} is already {status}")]
    ReservationClosed {
        reservation_id: String,
        status: crate::reservation::ReservationStatus,
    },
    #[error("listing {listing_id} is already reserved until {until}")]
    ListingReserved {
        listing_id: String,
        until: TimeStamp<Utc>,
    },
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Invalid config value: {0}")]
    Invalid(String),
}
