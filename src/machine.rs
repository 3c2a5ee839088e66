//! Offer state machine.
//!
//! Every transition borrows the current record and returns new ones; nothing
//! is mutated in place, so a failed transition leaves the caller's offer as
//! it was.
//!
//! ```text
//! pending ──accept──▶ accepted
//!         ──reject──▶ rejected
//!         ──counter─▶ countered   (+ new pending offer with parent_offer_id)
//!         ──withdraw▶ withdrawn
//!         ──expire──▶ expired
//! ```
//!
//! No transition leaves a terminal state.

use crate::config::NegotiationConfig;
use crate::error::{ActionKind, OfferError, Result};
use crate::offer::{
    Amount, Offer, OfferDraft, OfferEvent, OfferId, OfferStatus, Role, TimeStamp, UserId,
};
use crate::utils;
use crate::validator::{ValidationContext, Validator};
use chrono::{Duration, Utc};

pub const SUPERSEDED_REASON: &str = "another_offer_accepted";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    User(UserId),
    /// Expiry sweeps and other automated closures.
    System,
}

impl Actor {
    pub fn user(id: &str) -> Self {
        Actor::User(id.to_string())
    }
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Actor::User(id) => Some(id),
            Actor::System => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterTerms {
    pub amount: Amount,
    pub message: Option<String>,
    pub listing_price: Amount,
    /// Offers already in the negotiation chain, the countered one included.
    pub chain_len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Accept { message: Option<String> },
    Reject { reason: String, message: Option<String> },
    Counter(CounterTerms),
    Withdraw,
    Expire,
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Accept { .. } => ActionKind::Accept,
            Action::Reject { .. } => ActionKind::Reject,
            Action::Counter(_) => ActionKind::Counter,
            Action::Withdraw => ActionKind::Withdraw,
            Action::Expire => ActionKind::Expire,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub actor: Actor,
    pub action: Action,
}

impl Command {
    pub fn new(actor: Actor, action: Action) -> Self {
        Self { actor, action }
    }
}

/// Where a buyer stands on a listing before opening a new offer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuyerStanding {
    pub pending_offer: Option<OfferId>,
    pub offers_made: usize,
}

/// The outcome of a successful transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub event: OfferEvent,
    pub actor: Actor,
    /// The record as it was before the transition, `None` on creation.
    pub prior: Option<Offer>,
    /// The record after the transition.
    pub offer: Offer,
    /// The new pending offer created by a counter.
    pub counter: Option<Offer>,
    /// The accepted offer that closed this one, for supersede transitions.
    pub superseded_by: Option<OfferId>,
}

impl Transition {
    /// Status the persistence layer must still see for the update to apply.
    pub fn expected_prior_status(&self) -> Option<OfferStatus> {
        self.prior.as_ref().map(|prior| prior.status)
    }
}

#[derive(Debug, Clone)]
pub struct OfferMachine {
    config: NegotiationConfig,
    validator: Validator,
}

impl Default for OfferMachine {
    fn default() -> Self {
        Self::new(NegotiationConfig::default())
    }
}

impl OfferMachine {
    pub fn new(config: NegotiationConfig) -> Self {
        let validator = Validator::from_config(&config);
        Self { config, validator }
    }

    pub fn config(&self) -> &NegotiationConfig {
        &self.config
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    /// Validates a buyer's draft and produces the pending offer.
    pub fn open(
        &self,
        draft: OfferDraft,
        standing: &BuyerStanding,
        now: &TimeStamp<Utc>,
    ) -> Result<Transition> {
        let ctx = ValidationContext::initial(draft.listing_price())
            .set_pending_offer(standing.pending_offer.clone())
            .set_offers_made(standing.offers_made);
        let report = self.validator.validate(draft.amount(), &ctx);
        if !report.is_valid() {
            return Err(OfferError::Validation(report));
        }

        let offer = draft.finalise(
            utils::new_offer_id()?,
            now,
            self.config.offer_ttl(),
            &self.config.default_currency,
        )?;
        let actor = Actor::User(offer.buyer_id.clone());

        Ok(Transition {
            event: OfferEvent::Created,
            actor,
            prior: None,
            offer,
            counter: None,
            superseded_by: None,
        })
    }

    pub fn apply(&self, offer: &Offer, command: Command, now: &TimeStamp<Utc>) -> Result<Transition> {
        let kind = command.action.kind();
        if kind != ActionKind::Expire {
            ensure_live(offer, kind, now)?;
        }

        match command.action {
            Action::Accept { message } => {
                ensure_responder(offer, &command.actor, kind)?;
                let mut next = offer.clone();
                next.status = OfferStatus::Accepted;
                next.responded_at = Some(now.clone());
                next.response_message = message;
                Ok(simple(OfferEvent::Accepted, command.actor, offer, next))
            }
            Action::Reject { reason, message } => {
                ensure_responder(offer, &command.actor, kind)?;
                if reason.trim().is_empty() {
                    return Err(invalid(offer, kind, "a rejection reason is required"));
                }
                let mut next = offer.clone();
                next.status = OfferStatus::Rejected;
                next.responded_at = Some(now.clone());
                next.rejection_reason = Some(reason);
                next.response_message = message;
                Ok(simple(OfferEvent::Rejected, command.actor, offer, next))
            }
            Action::Counter(terms) => {
                let role = ensure_responder(offer, &command.actor, kind)?;
                self.counter(offer, command.actor, role, terms, now)
            }
            Action::Withdraw => {
                if command.actor.user_id() != Some(offer.buyer_id.as_str()) {
                    return Err(invalid(offer, kind, "only the buyer may withdraw an offer"));
                }
                let mut next = offer.clone();
                next.status = OfferStatus::Withdrawn;
                Ok(simple(OfferEvent::Withdrawn, command.actor, offer, next))
            }
            Action::Expire => {
                if offer.status != OfferStatus::Pending {
                    return Err(invalid(offer, kind, "only pending offers expire"));
                }
                if *now < offer.expires_at {
                    return Err(invalid(offer, kind, "offer has not reached its expiry"));
                }
                let mut next = offer.clone();
                next.status = OfferStatus::Expired;
                Ok(simple(OfferEvent::Expired, command.actor, offer, next))
            }
        }
    }

    /// Closes a competing pending offer after another offer on the same
    /// listing was accepted.
    pub fn supersede(&self, offer: &Offer, accepted: &Offer, now: &TimeStamp<Utc>) -> Result<Transition> {
        if offer.status != OfferStatus::Pending {
            return Err(invalid(offer, ActionKind::Reject, "only pending offers can be superseded"));
        }
        if offer.id == accepted.id || offer.listing_id != accepted.listing_id {
            return Err(invalid(
                offer,
                ActionKind::Reject,
                "offer does not compete with the accepted offer",
            ));
        }
        let mut next = offer.clone();
        next.status = OfferStatus::Rejected;
        next.responded_at = Some(now.clone());
        next.rejection_reason = Some(SUPERSEDED_REASON.to_string());

        Ok(Transition {
            event: OfferEvent::Superseded,
            actor: Actor::System,
            prior: Some(offer.clone()),
            offer: next,
            counter: None,
            superseded_by: Some(accepted.id.clone()),
        })
    }

    fn counter(
        &self,
        offer: &Offer,
        actor: Actor,
        role: Role,
        terms: CounterTerms,
        now: &TimeStamp<Utc>,
    ) -> Result<Transition> {
        let ctx = ValidationContext::counter(offer, role, terms.listing_price)
            .set_chain_len(terms.chain_len);
        let report = self.validator.validate(terms.amount, &ctx);
        if !report.is_valid() {
            return Err(OfferError::Validation(report));
        }

        let mut original = offer.clone();
        original.status = OfferStatus::Countered;
        original.responded_at = Some(now.clone());

        let counter = Offer {
            id: utils::new_offer_id()?,
            listing_id: offer.listing_id.clone(),
            conversation_id: offer.conversation_id.clone(),
            buyer_id: offer.buyer_id.clone(),
            seller_id: offer.seller_id.clone(),
            amount: terms.amount,
            currency: offer.currency.clone(),
            message: terms.message,
            status: OfferStatus::Pending,
            proposed_by: role,
            parent_offer_id: Some(offer.id.clone()),
            expires_at: counter_deadline(&self.config, now)?,
            created_at: now.clone(),
            responded_at: None,
            rejection_reason: None,
            response_message: None,
            expiry_warned_at: None,
        };

        Ok(Transition {
            event: OfferEvent::Countered,
            actor,
            prior: Some(offer.clone()),
            offer: original,
            counter: Some(counter),
            superseded_by: None,
        })
    }
}

fn simple(event: OfferEvent, actor: Actor, prior: &Offer, next: Offer) -> Transition {
    Transition {
        event,
        actor,
        prior: Some(prior.clone()),
        offer: next,
        counter: None,
        superseded_by: None,
    }
}

fn invalid(offer: &Offer, action: ActionKind, reason: &str) -> OfferError {
    OfferError::InvalidTransition {
        status: offer.status,
        action,
        reason: reason.to_string(),
    }
}

fn expired(offer: &Offer) -> OfferError {
    OfferError::OfferExpired {
        offer_id: offer.id.clone(),
        expired_at: offer.expires_at.clone(),
    }
}

// Time-based blocks are reported as OfferExpired so the caller can suggest a
// fresh offer instead of showing a generic failure.
fn ensure_live(offer: &Offer, action: ActionKind, now: &TimeStamp<Utc>) -> Result<()> {
    match offer.status {
        OfferStatus::Expired => Err(expired(offer)),
        OfferStatus::Pending if *now >= offer.expires_at => Err(expired(offer)),
        OfferStatus::Pending => Ok(()),
        _ => Err(invalid(offer, action, "offer is no longer pending")),
    }
}

fn ensure_responder(offer: &Offer, actor: &Actor, action: ActionKind) -> Result<Role> {
    let expected = offer.responder();
    match actor.user_id() {
        Some(user) if user == offer.participant(expected) => Ok(expected),
        _ => Err(invalid(
            offer,
            action,
            &format!("only the {expected} may {action} this offer"),
        )),
    }
}

/// Expiry of a counter-offer made at `now`.
pub fn counter_deadline(config: &NegotiationConfig, now: &TimeStamp<Utc>) -> Result<TimeStamp<Utc>> {
    deadline(now, config.counter_ttl())
}

/// Reservation hold ending for an offer accepted at `now`.
pub fn reservation_deadline(config: &NegotiationConfig, now: &TimeStamp<Utc>) -> Result<TimeStamp<Utc>> {
    deadline(now, config.reservation_window())
}

fn deadline(now: &TimeStamp<Utc>, window: Duration) -> Result<TimeStamp<Utc>> {
    now.checked_plus(window)
        .ok_or_else(|| OfferError::DeadlineOutOfRange {
            from: now.clone(),
            hours: window.num_hours(),
        })
}
