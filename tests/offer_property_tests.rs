//! Property-based tests for offer validation, transitions and expiry
//!
//! These use proptest to check rules that must hold for every amount, role
//! and instant rather than a handful of hand-picked cases.

use chrono::{Duration, Utc};
use offer_negotiation::{
    expiry::{self, ExpiryStatus},
    machine::{Action, Actor, BuyerStanding, Command, CounterTerms, OfferMachine},
    offer::{Offer, OfferDraft, OfferStatus, Role, TimeStamp},
    validator::{self, ValidationContext},
    OfferError, ValidationIssue,
};
use proptest::prelude::*;

// PROPERTY TEST STRATEGIES

/// Strategy to generate a negotiating role
fn role_strategy() -> impl Strategy<Value = Role> {
    prop::bool::ANY.prop_map(|b| if b { Role::Buyer } else { Role::Seller })
}

/// Strategy to generate listing prices from cheap items to large ones
fn price_strategy() -> impl Strategy<Value = i64> {
    1i64..=10_000_000
}

/// Strategy to generate instants across a few years at second resolution
fn instant_strategy() -> impl Strategy<Value = TimeStamp<Utc>> {
    (0i64..=100_000_000).prop_map(|secs| {
        TimeStamp::new_with(2024, 1, 1, 0, 0, 0)
            .unwrap()
            .plus(Duration::seconds(secs))
    })
}

/// Strategy to generate every action a participant might send
fn action_strategy() -> impl Strategy<Value = Action> {
    prop_oneof![
        Just(Action::Accept { message: None }),
        Just(Action::Reject {
            reason: "price_too_low".into(),
            message: None
        }),
        (1i64..=5_000).prop_map(|amount| Action::Counter(CounterTerms {
            amount,
            message: None,
            listing_price: 2_500,
            chain_len: 1,
        })),
        Just(Action::Withdraw),
        Just(Action::Expire),
    ]
}

fn actor_strategy() -> impl Strategy<Value = Actor> {
    prop_oneof![
        Just(Actor::user("buyer_1")),
        Just(Actor::user("seller_1")),
        Just(Actor::user("stranger")),
        Just(Actor::System),
    ]
}

fn pending_offer(machine: &OfferMachine, created_at: &TimeStamp<Utc>) -> Offer {
    let draft = OfferDraft::new()
        .set_listing("listing_1", 2_500)
        .set_conversation("conv_1")
        .set_buyer("buyer_1")
        .set_seller("seller_1")
        .set_amount(2_000);
    machine
        .open(draft, &BuyerStanding::default(), created_at)
        .unwrap()
        .offer
}

proptest! {
    /// A non-positive amount reports AmountNotPositive and no other amount
    /// rule, whatever the context.
    #[test]
    fn non_positive_amount_is_only_amount_issue(
        amount in i64::MIN..=0,
        price in price_strategy(),
        parent in prop::option::of(1i64..=10_000_000),
        role in role_strategy(),
    ) {
        let ctx = match parent {
            Some(parent_amount) => ValidationContext::counter_to("offer_p", parent_amount, role, price),
            None => ValidationContext::initial(price),
        };
        let report = validator::validate(amount, &ctx);

        prop_assert_eq!(report.issues(), &[ValidationIssue::AmountNotPositive]);
    }

    /// Countering with the parent's amount is always AmountUnchanged, for
    /// either side.
    #[test]
    fn unchanged_counter_is_flagged(
        parent_amount in 1i64..=1_000_000,
        role in role_strategy(),
    ) {
        let ctx = ValidationContext::counter_to("offer_p", parent_amount, role, parent_amount);
        let report = validator::validate(parent_amount, &ctx);

        prop_assert!(report.contains(&ValidationIssue::AmountUnchanged));
        // prop_assert! formats its condition, so no braces inside it
        let wrong_way = report.contains(&ValidationIssue::AmountWrongDirection { role });
        prop_assert!(!wrong_way);
    }

    /// A seller may counter anywhere from above the parent up to the ceiling
    /// but never below the parent.
    #[test]
    fn seller_counter_direction(
        price in 2i64..=1_000_000,
        parent_pct in 1i64..=100,
        delta in 1i64..=1_000,
    ) {
        let parent_amount = (price * parent_pct / 100).max(1);
        let ctx = ValidationContext::counter_to("offer_p", parent_amount, Role::Seller, price);

        let above = (parent_amount + delta).min(price);
        if above > parent_amount {
            prop_assert!(validator::validate(above, &ctx).is_valid());
        }
        let below = parent_amount - delta;
        if below > 0 {
            let report = validator::validate(below, &ctx);
            let wrong_way = report.contains(&ValidationIssue::AmountWrongDirection { role: Role::Seller });
            prop_assert!(wrong_way);
        }
    }

    /// The ceiling check is exact at 150% of the listing price.
    #[test]
    fn ceiling_boundary(price in price_strategy()) {
        let ceiling = price * 3 / 2;
        let ctx = ValidationContext::initial(price);

        prop_assert!(validator::validate(ceiling, &ctx).is_valid());
        prop_assert!(!validator::validate(ceiling + 1, &ctx).is_valid());
    }

    /// Evaluating the same instant twice gives the same reading, and the
    /// status agrees with the sign of the remaining time.
    #[test]
    fn expiry_evaluation_is_idempotent(
        expires_at in instant_strategy(),
        now in instant_strategy(),
    ) {
        let first = expiry::evaluate(&expires_at, &now);
        let second = expiry::evaluate(&expires_at, &now);

        prop_assert_eq!(first, second);
        prop_assert_eq!(first.status == ExpiryStatus::Expired, first.remaining_ms <= 0);
    }

    /// Any refused command leaves the stored offer untouched and reports
    /// why in a typed error.
    #[test]
    fn refused_commands_change_nothing(
        action in action_strategy(),
        actor in actor_strategy(),
        hours_later in 0i64..=200,
    ) {
        let machine = OfferMachine::default();
        let created_at = TimeStamp::new_with(2025, 1, 1, 0, 0, 0).unwrap();
        let offer = pending_offer(&machine, &created_at);
        let snapshot = offer.clone();
        let now = created_at.plus(Duration::hours(hours_later));

        match machine.apply(&offer, Command::new(actor, action), &now) {
            Ok(t) => {
                prop_assert_eq!(t.prior.as_ref(), Some(&snapshot));
                prop_assert_ne!(t.offer.status, OfferStatus::Pending);
            }
            Err(err) => {
                let typed = matches!(
                    err,
                    OfferError::InvalidTransition { .. }
                        | OfferError::OfferExpired { .. }
                        | OfferError::Validation(_)
                );
                prop_assert!(typed, "unexpected error kind: {}", err);
            }
        }
        prop_assert_eq!(offer, snapshot);
    }

    /// Nothing moves an offer out of a terminal state.
    #[test]
    fn terminal_states_are_final(
        action in action_strategy(),
        actor in actor_strategy(),
        terminal in prop_oneof![
            Just(OfferStatus::Accepted),
            Just(OfferStatus::Rejected),
            Just(OfferStatus::Countered),
            Just(OfferStatus::Expired),
            Just(OfferStatus::Withdrawn),
        ],
    ) {
        let machine = OfferMachine::default();
        let created_at = TimeStamp::new_with(2025, 1, 1, 0, 0, 0).unwrap();
        let mut offer = pending_offer(&machine, &created_at);
        offer.status = terminal;

        let res = machine.apply(&offer, Command::new(actor, action), &created_at.plus(Duration::hours(1)));
        prop_assert!(res.is_err());
    }
}
