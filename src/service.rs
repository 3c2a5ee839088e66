//! Service layer API for offer negotiation
use crate::activity::ActivityEntry;
use crate::clock::Clock;
use crate::config::NegotiationConfig;
use crate::economics::{self, CounterSuggestion};
use crate::error::{ActionKind, OfferError, Result, StoreError};
use crate::expiry::{self, ExpiryEffect, ExpiryReading};
use crate::machine::{
    self, Action, Actor, BuyerStanding, Command, CounterTerms, OfferMachine, Transition,
};
use crate::offer::{
    Amount, ConversationId, Offer, OfferDraft, OfferEvent, OfferId, OfferStatus, Role, TimeStamp,
    UserId,
};
use crate::projector::{self, ChatMessagePayload};
use crate::reservation::{Reservation, ReservationRequest, ReservationStatus};
use crate::store::{MessageLog, OfferStore, ReservationDesk, SledStore};
use crate::utils;
use crate::validator::ValidationContext;
use chrono::Utc;
use sled::Db;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// An accepted offer together with the listing hold it produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acceptance {
    pub offer: Offer,
    pub reservation: Reservation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterOutcome {
    /// The offer that was answered, now `countered`.
    pub original: Offer,
    /// The new pending offer.
    pub counter: Offer,
}

/// Result of one expiry sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: Vec<OfferId>,
    pub failed: Vec<(OfferId, String)>,
}

/// An offer that entered its warning window during this pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiryNotice {
    pub offer_id: OfferId,
    pub conversation_id: ConversationId,
    /// The party who still has to respond.
    pub recipient_id: UserId,
    pub reading: ExpiryReading,
}

pub struct OfferService {
    offers: Arc<dyn OfferStore>,
    reservations: Arc<dyn ReservationDesk>,
    messages: Arc<dyn MessageLog>,
    clock: Arc<dyn Clock>,
    machine: OfferMachine,
}

impl OfferService {
    pub fn new(
        offers: Arc<dyn OfferStore>,
        reservations: Arc<dyn ReservationDesk>,
        messages: Arc<dyn MessageLog>,
        clock: Arc<dyn Clock>,
        config: NegotiationConfig,
    ) -> Self {
        Self {
            offers,
            reservations,
            messages,
            clock,
            machine: OfferMachine::new(config),
        }
    }

    /// Every collaborator backed by the same sled database.
    pub fn with_sled(instance: Arc<Db>, config: NegotiationConfig, clock: Arc<dyn Clock>) -> Self {
        let store = Arc::new(SledStore::new(instance));
        Self::new(store.clone(), store.clone(), store, clock, config)
    }

    pub fn config(&self) -> &NegotiationConfig {
        self.machine.config()
    }

    /// Create a buyer's initial offer on a listing
    pub fn make_offer(&self, draft: OfferDraft) -> Result<Offer> {
        let now = self.clock.now();
        let standing = match (draft.buyer_id(), draft.listing_id()) {
            (Some(buyer_id), Some(listing_id)) => self.standing(buyer_id, listing_id, &now)?,
            _ => BuyerStanding::default(),
        };

        let transition = self.machine.open(draft, &standing, &now)?;
        self.offers.create_offer(&transition.offer)?;
        self.publish(&transition, &now);

        let offer = transition.offer;
        info!(
            offer_id = %offer.id,
            listing_id = %offer.listing_id,
            buyer_id = %offer.buyer_id,
            amount = offer.amount,
            "offer created"
        );
        Ok(offer)
    }

    /// Accept a pending offer and reserve the listing for the buyer. If the
    /// reservation cannot be made the offer is put back to pending.
    pub fn accept_offer(
        &self,
        offer_id: &str,
        actor_id: &str,
        message: Option<String>,
    ) -> Result<Acceptance> {
        let now = self.clock.now();
        let offer = self.load(offer_id)?;
        let transition = self.apply_checked(
            &offer,
            Command::new(Actor::user(actor_id), Action::Accept { message }),
            &now,
        )?;

        let request = ReservationRequest::for_offer(
            utils::new_reservation_id()?,
            &transition.offer,
            now.clone(),
            machine::reservation_deadline(self.config(), &now)?,
        );
        self.commit(&transition, ActionKind::Accept)?;

        let reservation = match self.reservations.create_reservation(&request) {
            Ok(reservation) => reservation,
            Err(e) => {
                warn!(offer_id = %offer.id, listing_id = %offer.listing_id, error = %e, "reservation failed, reverting acceptance");
                if let Err(rollback) =
                    self.offers
                        .update_offer_status(&offer.id, OfferStatus::Accepted, &offer)
                {
                    error!(offer_id = %offer.id, error = %rollback, "could not revert accepted offer");
                }
                return Err(OfferError::ReservationFailed {
                    offer_id: offer.id.clone(),
                    reason: e.to_string(),
                });
            }
        };

        self.publish(&transition, &now);
        info!(
            offer_id = %offer.id,
            listing_id = %offer.listing_id,
            reservation_id = %reservation.id,
            price = reservation.reserved_price,
            "offer accepted"
        );
        self.close_competitors(&transition.offer, &now);

        Ok(Acceptance {
            offer: transition.offer,
            reservation,
        })
    }

    pub fn reject_offer(
        &self,
        offer_id: &str,
        actor_id: &str,
        reason: &str,
        message: Option<String>,
    ) -> Result<Offer> {
        let action = Action::Reject {
            reason: reason.to_string(),
            message,
        };
        let offer = self.respond(offer_id, Command::new(Actor::user(actor_id), action))?;
        info!(offer_id = %offer.id, reason = %reason, "offer rejected");
        Ok(offer)
    }

    /// Answer a pending offer with a new amount. The answered offer becomes
    /// `countered` and a new pending offer links back to it.
    pub fn counter_offer(
        &self,
        offer_id: &str,
        actor_id: &str,
        amount: Amount,
        listing_price: Amount,
        message: Option<String>,
    ) -> Result<CounterOutcome> {
        let now = self.clock.now();
        let offer = self.load(offer_id)?;
        let chain_len = self.offer_chain(offer_id)?.len();
        let terms = CounterTerms {
            amount,
            message,
            listing_price,
            chain_len,
        };
        let transition = self.apply_checked(
            &offer,
            Command::new(Actor::user(actor_id), Action::Counter(terms)),
            &now,
        )?;
        let Some(counter) = transition.counter.clone() else {
            return Err(anyhow::anyhow!("counter transition for {offer_id} produced no offer").into());
        };

        self.commit(&transition, ActionKind::Counter)?;
        if let Err(e) = self.offers.create_offer(&counter) {
            error!(offer_id = %offer.id, error = %e, "storing counter offer failed, reverting");
            if let Err(rollback) =
                self.offers
                    .update_offer_status(&offer.id, OfferStatus::Countered, &offer)
            {
                error!(offer_id = %offer.id, error = %rollback, "could not revert countered offer");
            }
            return Err(e.into());
        }

        self.publish(&transition, &now);
        info!(
            offer_id = %offer.id,
            counter_offer_id = %counter.id,
            amount = counter.amount,
            proposed_by = %counter.proposed_by,
            "offer countered"
        );
        Ok(CounterOutcome {
            original: transition.offer,
            counter,
        })
    }

    pub fn withdraw_offer(&self, offer_id: &str, actor_id: &str) -> Result<Offer> {
        let offer = self.respond(offer_id, Command::new(Actor::user(actor_id), Action::Withdraw))?;
        info!(offer_id = %offer.id, "offer withdrawn");
        Ok(offer)
    }

    /// Counter amounts `actor_id` could answer `offer_id` with, keeping only
    /// those that would pass validation right now.
    pub fn counter_suggestions(
        &self,
        offer_id: &str,
        actor_id: &str,
        listing_price: Amount,
    ) -> Result<Vec<CounterSuggestion>> {
        let offer = self.offer(offer_id)?;
        let refuse = |reason: String| OfferError::InvalidTransition {
            status: offer.status,
            action: ActionKind::Counter,
            reason,
        };
        if offer.status != OfferStatus::Pending {
            return Err(refuse("only pending offers can be countered".into()));
        }
        let responder = offer.responder();
        let role = match offer.role_of(actor_id) {
            Some(role) if role == responder => role,
            _ => return Err(refuse(format!("only the {responder} may counter this offer"))),
        };

        let chain_len = self.offer_chain(offer_id)?.len();
        let ctx = ValidationContext::counter(&offer, role, listing_price).set_chain_len(chain_len);
        let validator = self.machine.validator();
        Ok(economics::suggest_counters(offer.amount, listing_price, role)
            .into_iter()
            .filter(|s| validator.validate(s.amount, &ctx).is_valid())
            .collect())
    }

    /// The buyer completes the purchase and the listing hold is released.
    /// A hold found past its deadline is closed as expired instead.
    pub fn complete_reservation(&self, reservation_id: &str, buyer_id: &str) -> Result<Reservation> {
        let now = self.clock.now();
        let reservation = self.load_reservation(reservation_id)?;
        if reservation.buyer_id != buyer_id {
            return Err(refused(reservation_id, "only the buyer may complete a reservation"));
        }
        if reservation.status == ReservationStatus::Active && !reservation.is_active_at(&now) {
            self.reservations
                .close_reservation(reservation_id, ReservationStatus::Expired, &now)?;
            info!(reservation_id = %reservation_id, listing_id = %reservation.listing_id, "reservation expired");
            return Err(refused(
                reservation_id,
                &format!("hold ended at {}", reservation.reserved_until),
            ));
        }

        let completed = self
            .reservations
            .close_reservation(reservation_id, ReservationStatus::Completed, &now)?;
        info!(
            reservation_id = %reservation_id,
            listing_id = %completed.listing_id,
            price = completed.reserved_price,
            "reservation completed"
        );
        Ok(completed)
    }

    /// Either party to the accepted offer may call the sale off, which puts
    /// the listing back on the market.
    pub fn cancel_reservation(&self, reservation_id: &str, actor_id: &str) -> Result<Reservation> {
        let now = self.clock.now();
        let reservation = self.load_reservation(reservation_id)?;
        let offer = self.load(&reservation.offer_id)?;
        let Some(role) = offer.role_of(actor_id) else {
            return Err(refused(reservation_id, "only the buyer or seller may cancel a reservation"));
        };

        let cancelled = self
            .reservations
            .close_reservation(reservation_id, ReservationStatus::Cancelled, &now)?;
        info!(
            reservation_id = %reservation_id,
            listing_id = %cancelled.listing_id,
            cancelled_by = %role,
            "reservation cancelled"
        );
        Ok(cancelled)
    }

    /// Expire a single offer that has reached its deadline.
    pub fn expire_offer(&self, offer_id: &str) -> Result<Offer> {
        let now = self.clock.now();
        let offer = self.load(offer_id)?;
        self.settle_expiry(&offer, &now)
    }

    /// One pass of the expiry sweep over every pending offer.
    pub fn expire_due(&self) -> Result<SweepReport> {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        for offer in self.offers.pending_offers()? {
            if !offer.is_logically_expired(&now) {
                continue;
            }
            match self.settle_expiry(&offer, &now) {
                Ok(expired) => report.expired.push(expired.id),
                Err(e) => {
                    // usually a concurrent accept or withdraw won the race
                    warn!(offer_id = %offer.id, error = %e, "offer not expired in sweep");
                    report.failed.push((offer.id, e.to_string()));
                }
            }
        }

        info!(
            expired = report.expired.len(),
            failed = report.failed.len(),
            "expiry sweep finished"
        );
        Ok(report)
    }

    /// Marks pending offers that entered the warning window and returns one
    /// notice per offer. Each offer is warned at most once.
    pub fn expiry_warnings(&self) -> Result<Vec<ExpiryNotice>> {
        let now = self.clock.now();
        let window = self.config().warning_window();
        let mut notices = Vec::new();

        for offer in self.offers.pending_offers()? {
            if expiry::decide(&offer, &now, window) != ExpiryEffect::Warn {
                continue;
            }
            let warned = expiry::mark_warned(&offer, &now);
            if let Err(e) = self
                .offers
                .update_offer_status(&offer.id, OfferStatus::Pending, &warned)
            {
                warn!(offer_id = %offer.id, error = %e, "skipping expiry warning");
                continue;
            }

            let transition = Transition {
                event: OfferEvent::ExpiryWarned,
                actor: Actor::System,
                prior: Some(offer.clone()),
                offer: warned,
                counter: None,
                superseded_by: None,
            };
            self.publish(&transition, &now);
            debug!(offer_id = %offer.id, expires_at = %offer.expires_at, "expiry warning issued");

            notices.push(ExpiryNotice {
                offer_id: offer.id.clone(),
                conversation_id: offer.conversation_id.clone(),
                recipient_id: offer.participant(offer.responder()).to_string(),
                reading: expiry::evaluate_within(&offer.expires_at, &now, window),
            });
        }
        Ok(notices)
    }

    /// Fetch an offer. A pending offer found past its deadline is expired
    /// on the way out.
    pub fn offer(&self, offer_id: &str) -> Result<Offer> {
        let now = self.clock.now();
        let offer = self.load(offer_id)?;
        if !offer.is_logically_expired(&now) {
            return Ok(offer);
        }
        match self.settle_expiry(&offer, &now) {
            Ok(expired) => Ok(expired),
            Err(e) => {
                debug!(offer_id = %offer_id, error = %e, "lazy expiry skipped");
                self.load(offer_id)
            }
        }
    }

    /// The whole negotiation thread containing `offer_id`, root first.
    pub fn offer_chain(&self, offer_id: &str) -> Result<Vec<Offer>> {
        let start = self.load(offer_id)?;
        let mut seen = HashSet::from([start.id.clone()]);

        let mut ancestors = Vec::new();
        let mut parent_id = start.parent_offer_id.clone();
        while let Some(id) = parent_id {
            if !seen.insert(id.clone()) {
                break;
            }
            let Some(parent) = self.offers.get_offer(&id)? else {
                break;
            };
            parent_id = parent.parent_offer_id.clone();
            ancestors.push(parent);
        }
        ancestors.reverse();

        let listing = self.offers.offers_for_listing(&start.listing_id)?;
        let mut chain = ancestors;
        let mut tip = start.id.clone();
        chain.push(start);
        while let Some(child) = listing
            .iter()
            .find(|o| o.parent_offer_id.as_deref() == Some(tip.as_str()))
        {
            if !seen.insert(child.id.clone()) {
                break;
            }
            tip = child.id.clone();
            chain.push(child.clone());
        }
        Ok(chain)
    }

    /// Offers still under negotiation on a listing, newest first.
    pub fn listing_offers(&self, listing_id: &str) -> Result<Vec<Offer>> {
        let now = self.clock.now();
        let mut offers: Vec<Offer> = self
            .offers
            .offers_for_listing(listing_id)?
            .into_iter()
            .filter(|o| {
                matches!(
                    o.effective_status(&now),
                    OfferStatus::Pending | OfferStatus::Countered
                )
            })
            .collect();
        offers.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(offers)
    }

    pub fn expiry_of(&self, offer_id: &str) -> Result<ExpiryReading> {
        let now = self.clock.now();
        let offer = self.load(offer_id)?;
        Ok(expiry::evaluate_within(
            &offer.expires_at,
            &now,
            self.config().warning_window(),
        ))
    }

    pub fn activity(&self, offer_id: &str) -> Result<Vec<ActivityEntry>> {
        Ok(self.offers.activity_for(offer_id)?)
    }

    pub fn reservation(&self, listing_id: &str) -> Result<Option<Reservation>> {
        let now = self.clock.now();
        Ok(self.reservations.reservation_for(listing_id, &now)?)
    }

    pub fn conversation(&self, conversation_id: &str) -> Result<Vec<ChatMessagePayload>> {
        Ok(self.messages.messages_for(conversation_id)?)
    }

    fn load(&self, offer_id: &str) -> Result<Offer> {
        self.offers
            .get_offer(offer_id)?
            .ok_or_else(|| OfferError::NotFound(offer_id.to_string()))
    }

    fn load_reservation(&self, reservation_id: &str) -> Result<Reservation> {
        self.reservations
            .get_reservation(reservation_id)?
            .ok_or_else(|| refused(reservation_id, "no such reservation"))
    }

    fn standing(&self, buyer_id: &str, listing_id: &str, now: &TimeStamp<Utc>) -> Result<BuyerStanding> {
        let mut pending_offer = None;
        if let Some(pending) = self.offers.find_pending_offer(buyer_id, listing_id)? {
            if pending.is_logically_expired(now) {
                if let Err(e) = self.settle_expiry(&pending, now) {
                    warn!(offer_id = %pending.id, error = %e, "could not expire stale offer");
                }
            } else {
                pending_offer = Some(pending.id);
            }
        }

        let offers_made = self
            .offers
            .offers_for_listing(listing_id)?
            .iter()
            .filter(|o| o.buyer_id == buyer_id && o.proposed_by == Role::Buyer && !o.is_counter())
            .count();

        Ok(BuyerStanding {
            pending_offer,
            offers_made,
        })
    }

    fn respond(&self, offer_id: &str, command: Command) -> Result<Offer> {
        let now = self.clock.now();
        let offer = self.load(offer_id)?;
        let kind = command.action.kind();
        let transition = self.apply_checked(&offer, command, &now)?;
        self.commit(&transition, kind)?;
        self.publish(&transition, &now);
        Ok(transition.offer)
    }

    /// Runs the machine; an offer rejected only because its deadline passed
    /// is persisted as expired before the error is returned.
    fn apply_checked(&self, offer: &Offer, command: Command, now: &TimeStamp<Utc>) -> Result<Transition> {
        match self.machine.apply(offer, command, now) {
            Err(err @ OfferError::OfferExpired { .. }) => {
                if offer.is_logically_expired(now) {
                    if let Err(e) = self.settle_expiry(offer, now) {
                        warn!(offer_id = %offer.id, error = %e, "could not expire stale offer");
                    }
                }
                Err(err)
            }
            other => other,
        }
    }

    fn settle_expiry(&self, offer: &Offer, now: &TimeStamp<Utc>) -> Result<Offer> {
        let transition = self
            .machine
            .apply(offer, Command::new(Actor::System, Action::Expire), now)?;
        self.commit(&transition, ActionKind::Expire)?;
        self.publish(&transition, now);
        info!(offer_id = %offer.id, expired_at = %offer.expires_at, "offer expired");
        Ok(transition.offer)
    }

    fn commit(&self, transition: &Transition, action: ActionKind) -> Result<()> {
        let offer = &transition.offer;
        let Some(expected) = transition.expected_prior_status() else {
            return Ok(self.offers.create_offer(offer)?);
        };
        self.offers
            .update_offer_status(&offer.id, expected, offer)
            .map_err(|e| match e {
                StoreError::StatusMismatch { found, .. } => OfferError::InvalidTransition {
                    status: found,
                    action,
                    reason: "offer changed while the request was processed".into(),
                },
                other => other.into(),
            })
    }

    // Chat messages and activity entries are best effort once the status
    // change is stored.
    fn publish(&self, transition: &Transition, now: &TimeStamp<Utc>) {
        let payload = projector::project(transition);
        if let Err(e) = self.messages.append_message(&payload) {
            warn!(
                offer_id = %transition.offer.id,
                conversation_id = %payload.conversation_id,
                error = %e,
                "failed to post negotiation message"
            );
        }
        for entry in ActivityEntry::from_transition(transition, now) {
            if let Err(e) = self.offers.record_activity(&entry) {
                warn!(offer_id = %entry.offer_id, error = %e, "failed to record activity");
            }
        }
    }

    fn close_competitors(&self, accepted: &Offer, now: &TimeStamp<Utc>) {
        let competitors = match self.offers.offers_for_listing(&accepted.listing_id) {
            Ok(offers) => offers,
            Err(e) => {
                warn!(listing_id = %accepted.listing_id, error = %e, "could not load competing offers");
                return;
            }
        };

        for other in competitors
            .iter()
            .filter(|o| o.status == OfferStatus::Pending && o.id != accepted.id)
        {
            let closed = if other.is_logically_expired(now) {
                self.settle_expiry(other, now).map(|_| ())
            } else {
                self.machine
                    .supersede(other, accepted, now)
                    .and_then(|t| {
                        self.commit(&t, ActionKind::Reject)?;
                        self.publish(&t, now);
                        Ok(())
                    })
            };
            match closed {
                Ok(()) => debug!(offer_id = %other.id, by = %accepted.id, "competing offer closed"),
                Err(e) => warn!(offer_id = %other.id, error = %e, "could not close competing offer"),
            }
        }
    }
}

fn refused(reservation_id: &str, reason: &str) -> OfferError {
    OfferError::ReservationRefused {
        reservation_id: reservation_id.to_string(),
        reason: reason.to_string(),
    }
}
