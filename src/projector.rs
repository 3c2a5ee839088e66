//! Maps offer transitions to the chat messages appended to the buyer/seller
//! conversation.
use crate::machine::Transition;
use crate::offer::{Amount, ConversationId, Offer, OfferEvent, OfferId, TimeStamp, UserId};
use chrono::Utc;

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone, Copy)]
pub enum MessageKind {
    #[n(0)]
    Offer,
    #[n(1)]
    CounterOffer,
    #[n(2)]
    System,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Offer => "offer",
            MessageKind::CounterOffer => "counter_offer",
            MessageKind::System => "system",
        }
    }
}

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub struct OfferMessageData {
    #[n(0)]
    pub event: OfferEvent,
    #[n(1)]
    pub offer_id: OfferId,
    #[n(2)]
    pub amount: Amount,
    #[n(3)]
    pub currency: String,
    #[n(4)]
    pub parent_offer_id: Option<OfferId>,
    #[n(5)]
    pub reason: Option<String>,
    #[n(6)]
    pub note: Option<String>,
    #[n(7)]
    pub expires_at: Option<TimeStamp<Utc>>,
}

#[derive(Debug, PartialEq, Eq, minicbor::Encode, minicbor::Decode, Clone)]
pub struct ChatMessagePayload {
    #[n(0)]
    pub conversation_id: ConversationId,
    #[n(1)]
    pub sender_id: Option<UserId>, // None for system messages
    #[n(2)]
    pub kind: MessageKind,
    #[n(3)]
    pub content: String,
    #[n(4)]
    pub offer_data: OfferMessageData,
}

pub fn project(transition: &Transition) -> ChatMessagePayload {
    let offer = &transition.offer;
    let sender_id = transition.actor.user_id().map(str::to_string);
    let price = format!("{} {}", offer.currency, offer.amount);

    match transition.event {
        OfferEvent::Created => ChatMessagePayload {
            conversation_id: offer.conversation_id.clone(),
            sender_id,
            kind: MessageKind::Offer,
            content: format!("Made an offer: {price}"),
            offer_data: data(transition.event, offer, offer.message.clone(), true),
        },
        OfferEvent::Countered => {
            // the message describes the new counter, linked to the one it replaces
            let counter = transition.counter.as_ref().unwrap_or(offer);
            ChatMessagePayload {
                conversation_id: counter.conversation_id.clone(),
                sender_id,
                kind: MessageKind::CounterOffer,
                content: format!("Counter offer: {} {}", counter.currency, counter.amount),
                offer_data: data(transition.event, counter, counter.message.clone(), true),
            }
        }
        OfferEvent::Accepted => system(
            transition,
            sender_id,
            offer
                .response_message
                .clone()
                .unwrap_or_else(|| format!("Offer of {price} accepted")),
        ),
        OfferEvent::Rejected => {
            let reason = offer.rejection_reason.as_deref().unwrap_or("no reason given");
            system(
                transition,
                sender_id,
                offer
                    .response_message
                    .clone()
                    .unwrap_or_else(|| format!("Offer of {price} declined ({reason})")),
            )
        }
        OfferEvent::Withdrawn => system(transition, sender_id, format!("Offer of {price} withdrawn")),
        OfferEvent::Expired => system(transition, None, format!("Offer of {price} expired")),
        OfferEvent::Superseded => system(
            transition,
            None,
            format!("Offer of {price} closed: another offer was accepted"),
        ),
        OfferEvent::ExpiryWarned => system(transition, None, format!("Offer of {price} expires soon")),
    }
}

fn system(transition: &Transition, sender_id: Option<UserId>, content: String) -> ChatMessagePayload {
    let offer = &transition.offer;
    let mut offer_data = data(transition.event, offer, offer.response_message.clone(), false);
    offer_data.reason = offer.rejection_reason.clone();

    ChatMessagePayload {
        conversation_id: offer.conversation_id.clone(),
        sender_id,
        kind: MessageKind::System,
        content,
        offer_data,
    }
}

fn data(event: OfferEvent, offer: &Offer, note: Option<String>, with_expiry: bool) -> OfferMessageData {
    OfferMessageData {
        event,
        offer_id: offer.id.clone(),
        amount: offer.amount,
        currency: offer.currency.clone(),
        parent_offer_id: offer.parent_offer_id.clone(),
        reason: None,
        note,
        expires_at: with_expiry.then(|| offer.expires_at.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::{Action, Actor, BuyerStanding, Command, CounterTerms, OfferMachine};
    use crate::offer::OfferDraft;

    fn now() -> TimeStamp<Utc> {
        TimeStamp::new_with(2025, 2, 2, 9, 0, 0).unwrap()
    }

    fn opened(machine: &OfferMachine) -> Transition {
        let draft = OfferDraft::new()
            .set_listing("listing_1", 2_500)
            .set_conversation("conv_1")
            .set_buyer("buyer_1")
            .set_seller("seller_1")
            .set_amount(2_200)
            .set_message("This is my best offer");
        machine.open(draft, &BuyerStanding::default(), &now()).unwrap()
    }

    #[test]
    fn created_offer_message() {
        let machine = OfferMachine::default();
        let payload = project(&opened(&machine));

        assert_eq!(payload.kind, MessageKind::Offer);
        assert_eq!(payload.sender_id.as_deref(), Some("buyer_1"));
        assert_eq!(payload.content, "Made an offer: GHS 2200");
        assert_eq!(payload.offer_data.note.as_deref(), Some("This is my best offer"));
        assert!(payload.offer_data.expires_at.is_some());
    }

    #[test]
    fn counter_message_links_parent() {
        let machine = OfferMachine::default();
        let original = opened(&machine).offer;
        let terms = CounterTerms {
            amount: 2_300,
            message: None,
            listing_price: 2_500,
            chain_len: 1,
        };
        let t = machine
            .apply(&original, Command::new(Actor::user("seller_1"), Action::Counter(terms)), &now())
            .unwrap();
        let payload = project(&t);

        assert_eq!(payload.kind, MessageKind::CounterOffer);
        assert_eq!(payload.kind.as_str(), "counter_offer");
        assert_eq!(payload.content, "Counter offer: GHS 2300");
        assert_eq!(payload.offer_data.parent_offer_id.as_deref(), Some(original.id.as_str()));
        assert_ne!(payload.offer_data.offer_id, original.id);
    }

    #[test]
    fn rejection_carries_reason() {
        let machine = OfferMachine::default();
        let original = opened(&machine).offer;
        let t = machine
            .apply(
                &original,
                Command::new(
                    Actor::user("seller_1"),
                    Action::Reject {
                        reason: "price_too_low".into(),
                        message: None,
                    },
                ),
                &now(),
            )
            .unwrap();
        let payload = project(&t);

        assert_eq!(payload.kind, MessageKind::System);
        assert_eq!(payload.offer_data.reason.as_deref(), Some("price_too_low"));
        assert_eq!(payload.content, "Offer of GHS 2200 declined (price_too_low)");
    }

    #[test]
    fn payload_encoding() {
        let machine = OfferMachine::default();
        let payload = project(&opened(&machine));

        let encoding = minicbor::to_vec(&payload).unwrap();
        let decode: ChatMessagePayload = minicbor::decode(&encoding).unwrap();

        assert_eq!(payload, decode);
    }
}
