use crate::offer::{Amount, ListingId, Offer, OfferId, TimeStamp, UserId};
use chrono::Utc;
use std::fmt;

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone, Copy)]
pub enum ReservationStatus {
    #[n(0)]
    Active,
    /// The buyer paid; the listing is sold.
    #[n(1)]
    Completed,
    /// The hold lapsed before completion.
    #[n(2)]
    Expired,
    #[n(3)]
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationStatus::Active => "active",
            ReservationStatus::Completed => "completed",
            ReservationStatus::Expired => "expired",
            ReservationStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A temporary hold on a listing for the buyer whose offer was accepted.
#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub struct Reservation {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub listing_id: ListingId,
    #[n(2)]
    pub buyer_id: UserId,
    #[n(3)]
    pub offer_id: OfferId,
    #[n(4)]
    pub reserved_price: Amount,
    #[n(5)]
    pub status: ReservationStatus,
    #[n(6)]
    pub reserved_until: TimeStamp<Utc>,
    #[n(7)]
    pub created_at: TimeStamp<Utc>,
    #[n(8)]
    pub closed_at: Option<TimeStamp<Utc>>,
}

impl Reservation {
    pub fn is_active_at(&self, now: &TimeStamp<Utc>) -> bool {
        self.status == ReservationStatus::Active && *now < self.reserved_until
    }

    /// Copy of this reservation moved to `status` at `at`.
    pub fn close(&self, status: ReservationStatus, at: &TimeStamp<Utc>) -> Reservation {
        let mut closed = self.clone();
        closed.status = status;
        closed.closed_at = Some(at.clone());
        closed
    }
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct ReservationRequest {
    pub reservation_id: String,
    pub listing_id: ListingId,
    pub buyer_id: UserId,
    pub offer_id: OfferId,
    pub price: Amount,
    pub reserved_at: TimeStamp<Utc>,
    pub reserved_until: TimeStamp<Utc>,
}

impl ReservationRequest {
    pub fn for_offer(
        reservation_id: String,
        offer: &Offer,
        reserved_at: TimeStamp<Utc>,
        reserved_until: TimeStamp<Utc>,
    ) -> Self {
        Self {
            reservation_id,
            listing_id: offer.listing_id.clone(),
            buyer_id: offer.buyer_id.clone(),
            offer_id: offer.id.clone(),
            price: offer.amount,
            reserved_at,
            reserved_until,
        }
    }
}

impl From<ReservationRequest> for Reservation {
    fn from(request: ReservationRequest) -> Self {
        Reservation {
            id: request.reservation_id,
            listing_id: request.listing_id,
            buyer_id: request.buyer_id,
            offer_id: request.offer_id,
            reserved_price: request.price,
            status: ReservationStatus::Active,
            reserved_until: request.reserved_until,
            created_at: request.reserved_at,
            closed_at: None,
        }
    }
}
