use crate::machine::Transition;
use crate::offer::{Amount, OfferId, TimeStamp, UserId};
use chrono::Utc;

/// One audit record per transition, stored content-addressed by the sha256
/// of its CBOR encoding.
#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub struct ActivityEntry {
    #[n(0)]
    pub offer_id: OfferId,
    #[n(1)]
    pub actor_id: Option<UserId>, // None when the system acted
    #[n(2)]
    pub recorded_at: TimeStamp<Utc>,
    #[n(3)]
    pub kind: ActivityKind,
}

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub enum ActivityKind {
    #[n(0)]
    Created {
        #[n(0)]
        amount: Amount,
    },
    #[n(1)]
    Accepted,
    #[n(2)]
    Rejected {
        #[n(0)]
        reason: String,
    },
    #[n(3)]
    Countered {
        #[n(0)]
        counter_offer_id: OfferId,
        #[n(1)]
        amount: Amount,
    },
    #[n(4)]
    Withdrawn,
    #[n(5)]
    Expired,
    #[n(6)]
    Superseded {
        #[n(0)]
        by_offer_id: OfferId,
    },
    #[n(7)]
    ExpiryWarned,
}

impl ActivityEntry {
    pub fn new(
        offer_id: OfferId,
        actor_id: Option<UserId>,
        recorded_at: TimeStamp<Utc>,
        kind: ActivityKind,
    ) -> Self {
        Self {
            offer_id,
            actor_id,
            recorded_at,
            kind,
        }
    }

    /// Entries describing a transition. A counter also logs the creation of
    /// the new offer under its own id; a counter transition without the new
    /// offer records nothing.
    pub fn from_transition(transition: &Transition, recorded_at: &TimeStamp<Utc>) -> Vec<Self> {
        use crate::offer::OfferEvent;

        let offer = &transition.offer;
        let actor_id = transition.actor.user_id().map(str::to_string);
        let kind = match transition.event {
            OfferEvent::Created => ActivityKind::Created {
                amount: offer.amount,
            },
            OfferEvent::Accepted => ActivityKind::Accepted,
            OfferEvent::Rejected => ActivityKind::Rejected {
                reason: offer.rejection_reason.clone().unwrap_or_default(),
            },
            OfferEvent::Countered => match &transition.counter {
                Some(counter) => ActivityKind::Countered {
                    counter_offer_id: counter.id.clone(),
                    amount: counter.amount,
                },
                None => return Vec::new(),
            },
            OfferEvent::Withdrawn => ActivityKind::Withdrawn,
            OfferEvent::Expired => ActivityKind::Expired,
            OfferEvent::Superseded => ActivityKind::Superseded {
                by_offer_id: transition.superseded_by.clone().unwrap_or_default(),
            },
            OfferEvent::ExpiryWarned => ActivityKind::ExpiryWarned,
        };

        let mut entries = vec![Self::new(
            offer.id.clone(),
            actor_id.clone(),
            recorded_at.clone(),
            kind,
        )];
        if let Some(counter) = &transition.counter {
            entries.push(Self::new(
                counter.id.clone(),
                actor_id,
                recorded_at.clone(),
                ActivityKind::Created {
                    amount: counter.amount,
                },
            ));
        }
        entries
    }

    pub fn build(&self) -> anyhow::Result<(String, Vec<u8>)> {
        let cbor = minicbor::to_vec(self)?;
        let hash = sha256::digest(&cbor);

        Ok((hash, cbor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_entries_share_a_hash() {
        let at = TimeStamp::new();
        let a = ActivityEntry::new("offer_1".into(), Some("seller".into()), at.clone(), ActivityKind::Accepted);
        let b = a.clone();
        let c = ActivityEntry::new("offer_1".into(), None, at, ActivityKind::Expired);

        assert_eq!(a.build().unwrap().0, b.build().unwrap().0);
        assert_ne!(a.build().unwrap().0, c.build().unwrap().0);
    }

    #[test]
    fn entry_encoding() {
        let entry = ActivityEntry::new(
            "offer_1".into(),
            Some("buyer".into()),
            TimeStamp::new(),
            ActivityKind::Countered {
                counter_offer_id: "offer_2".into(),
                amount: 2_300,
            },
        );
        let (_, cbor) = entry.build().unwrap();
        let decode: ActivityEntry = minicbor::decode(&cbor).unwrap();

        assert_eq!(entry, decode);
    }

    #[test]
    fn counter_without_new_offer_is_not_logged() {
        use crate::machine::{Actor, Transition};
        use crate::offer::{OfferDraft, OfferEvent};

        let at = TimeStamp::new();
        let draft = OfferDraft::new()
            .set_listing("listing_1", 1_000)
            .set_conversation("conv_1")
            .set_buyer("buyer")
            .set_seller("seller")
            .set_amount(900);
        let offer = draft
            .finalise("offer_1".into(), &at, chrono::Duration::hours(72), "GHS")
            .unwrap();
        let transition = Transition {
            event: OfferEvent::Countered,
            actor: Actor::user("seller"),
            prior: Some(offer.clone()),
            offer,
            counter: None,
            superseded_by: None,
        };

        assert!(ActivityEntry::from_transition(&transition, &at).is_empty());
    }
}
