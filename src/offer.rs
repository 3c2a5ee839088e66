//! Core offer records, roles and timestamps
use super::error::OfferError;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::fmt;

/// Whole currency units. Signed so that callers can hand over raw user input
/// and let the validator reject non-positive values.
pub type Amount = i64;
pub type OfferId = String;
pub type UserId = String;
pub type ListingId = String;
pub type ConversationId = String;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OfferStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Accepted,
    #[n(2)]
    Rejected,
    #[n(3)]
    Countered,
    #[n(4)]
    Expired,
    #[n(5)]
    Withdrawn,
}

impl OfferStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OfferStatus::Pending)
    }
    pub fn as_str(&self) -> &'static str {
        match self {
            OfferStatus::Pending => "pending",
            OfferStatus::Accepted => "accepted",
            OfferStatus::Rejected => "rejected",
            OfferStatus::Countered => "countered",
            OfferStatus::Expired => "expired",
            OfferStatus::Withdrawn => "withdrawn",
        }
    }
}

impl fmt::Display for OfferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Side of the negotiation a participant is on.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    #[n(0)]
    Buyer,
    #[n(1)]
    Seller,
}

impl Role {
    pub fn opposite(self) -> Role {
        match self {
            Role::Buyer => Role::Seller,
            Role::Seller => Role::Buyer,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Buyer => f.write_str("buyer"),
            Role::Seller => f.write_str("seller"),
        }
    }
}

/// What happened to an offer. Shared by transitions, chat payloads and the
/// activity log.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferEvent {
    #[n(0)]
    Created,
    #[n(1)]
    Accepted,
    #[n(2)]
    Rejected,
    #[n(3)]
    Countered,
    #[n(4)]
    Withdrawn,
    #[n(5)]
    Expired,
    #[n(6)]
    Superseded,
    #[n(7)]
    ExpiryWarned,
}

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

// Utc itself is not ordered, so the derives would not apply here.
impl PartialOrd for TimeStamp<Utc> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeStamp<Utc> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        min: u32,
        sec: u32,
    ) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(TimeStamp)
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
    /// `self + delta`, or `None` when the result falls outside the range a
    /// record can be encoded with (nanoseconds in an `i64`).
    pub fn checked_plus(&self, delta: Duration) -> Option<Self> {
        self.0
            .checked_add_signed(delta)
            .filter(|at| at.timestamp_nanos_opt().is_some())
            .map(TimeStamp)
    }
    /// Saturating at the latest representable instant.
    pub fn plus(&self, delta: Duration) -> Self {
        TimeStamp(self.0.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC))
    }
    /// Saturating at the earliest representable instant.
    pub fn minus(&self, delta: Duration) -> Self {
        TimeStamp(self.0.checked_sub_signed(delta).unwrap_or(DateTime::<Utc>::MIN_UTC))
    }
    /// Milliseconds from `self` until `later`; negative once `later` has passed.
    pub fn millis_until(&self, later: &TimeStamp<Utc>) -> i64 {
        (later.0 - self.0).num_milliseconds()
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl fmt::Display for TimeStamp<Utc> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

// Stored under `offer/<id>`; counter-offers are new records linked by parent_offer_id
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Offer {
    #[n(0)]
    pub id: OfferId,
    #[n(1)]
    pub listing_id: ListingId,
    #[n(2)]
    pub conversation_id: ConversationId,
    #[n(3)]
    pub buyer_id: UserId,
    #[n(4)]
    pub seller_id: UserId,
    #[n(5)]
    pub amount: Amount,
    #[n(6)]
    pub currency: String,
    #[n(7)]
    pub message: Option<String>,
    #[n(8)]
    pub status: OfferStatus,
    #[n(9)]
    pub proposed_by: Role,
    #[n(10)]
    pub parent_offer_id: Option<OfferId>,
    #[n(11)]
    pub expires_at: TimeStamp<Utc>,
    #[n(12)]
    pub created_at: TimeStamp<Utc>,
    #[n(13)]
    pub responded_at: Option<TimeStamp<Utc>>,
    #[n(14)]
    pub rejection_reason: Option<String>,
    #[n(15)]
    pub response_message: Option<String>,
    #[n(16)]
    pub expiry_warned_at: Option<TimeStamp<Utc>>,
}

impl Offer {
    pub fn is_counter(&self) -> bool {
        self.parent_offer_id.is_some()
    }
    /// The role expected to answer this offer.
    pub fn responder(&self) -> Role {
        self.proposed_by.opposite()
    }
    pub fn role_of(&self, user_id: &str) -> Option<Role> {
        if user_id == self.buyer_id {
            Some(Role::Buyer)
        } else if user_id == self.seller_id {
            Some(Role::Seller)
        } else {
            None
        }
    }
    pub fn participant(&self, role: Role) -> &str {
        match role {
            Role::Buyer => &self.buyer_id,
            Role::Seller => &self.seller_id,
        }
    }
    /// Pending in storage but past its expiry.
    pub fn is_logically_expired(&self, now: &TimeStamp<Utc>) -> bool {
        self.status == OfferStatus::Pending && *now >= self.expires_at
    }
    /// Status as readers should see it: a pending offer past its expiry is
    /// expired whether or not a sweep has marked it yet.
    pub fn effective_status(&self, now: &TimeStamp<Utc>) -> OfferStatus {
        if self.is_logically_expired(now) {
            OfferStatus::Expired
        } else {
            self.status
        }
    }
}

/// Builder for an initial buyer offer. The listing price travels with the
/// draft because the listing catalog lives outside this crate.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OfferDraft {
    listing_id: Option<ListingId>,
    listing_price: Amount,
    conversation_id: Option<ConversationId>,
    buyer_id: Option<UserId>,
    seller_id: Option<UserId>,
    amount: Amount,
    currency: Option<String>,
    message: Option<String>,
}

impl OfferDraft {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_listing(mut self, listing_id: &str, listing_price: Amount) -> Self {
        self.listing_id = Some(listing_id.to_string());
        self.listing_price = listing_price;
        self
    }
    pub fn set_conversation(mut self, conversation_id: &str) -> Self {
        self.conversation_id = Some(conversation_id.to_string());
        self
    }
    pub fn set_buyer(mut self, buyer_id: &str) -> Self {
        self.buyer_id = Some(buyer_id.to_string());
        self
    }
    pub fn set_seller(mut self, seller_id: &str) -> Self {
        self.seller_id = Some(seller_id.to_string());
        self
    }
    pub fn set_amount(mut self, amount: Amount) -> Self {
        self.amount = amount;
        self
    }
    pub fn set_currency(mut self, currency: &str) -> Self {
        self.currency = Some(currency.to_string());
        self
    }
    pub fn set_message(mut self, message: &str) -> Self {
        self.message = Some(message.to_string());
        self
    }
    pub fn listing_id(&self) -> Option<&str> {
        self.listing_id.as_deref()
    }
    pub fn buyer_id(&self) -> Option<&str> {
        self.buyer_id.as_deref()
    }
    pub fn amount(&self) -> Amount {
        self.amount
    }
    pub fn listing_price(&self) -> Amount {
        self.listing_price
    }

    /// Checks that every relationship key is present and turns the draft into
    /// a pending buyer offer.
    pub fn finalise(
        self,
        id: OfferId,
        now: &TimeStamp<Utc>,
        ttl: Duration,
        default_currency: &str,
    ) -> Result<Offer, OfferError> {
        let listing_id = self
            .listing_id
            .ok_or_else(|| OfferError::InvalidDraft("listing is not set".into()))?;
        let conversation_id = self
            .conversation_id
            .ok_or_else(|| OfferError::InvalidDraft("conversation is not set".into()))?;
        let buyer_id = self
            .buyer_id
            .ok_or_else(|| OfferError::InvalidDraft("buyer is not set".into()))?;
        let seller_id = self
            .seller_id
            .ok_or_else(|| OfferError::InvalidDraft("seller is not set".into()))?;
        if buyer_id == seller_id {
            return Err(OfferError::InvalidDraft(
                "buyer and seller must be different users".into(),
            ));
        }
        if ttl <= Duration::zero() {
            return Err(OfferError::InvalidDraft("offer lifetime must be positive".into()));
        }
        let expires_at = now
            .checked_plus(ttl)
            .ok_or_else(|| OfferError::DeadlineOutOfRange {
                from: now.clone(),
                hours: ttl.num_hours(),
            })?;

        Ok(Offer {
            id,
            listing_id,
            conversation_id,
            buyer_id,
            seller_id,
            amount: self.amount,
            currency: self.currency.unwrap_or_else(|| default_currency.to_string()),
            message: self.message,
            status: OfferStatus::Pending,
            proposed_by: Role::Buyer,
            parent_offer_id: None,
            expires_at,
            created_at: now.clone(),
            responded_at: None,
            rejection_reason: None,
            response_message: None,
            expiry_warned_at: None,
        })
    }
}
