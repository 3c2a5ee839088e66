//! Amount and eligibility rules for offers and counter-offers.
//!
//! Rules run in a fixed order and every violation is collected, so a caller
//! can show all problems at once:
//!
//! 1. amount must be positive
//! 2. a counter must change the amount
//! 3. amount must not exceed the ceiling (listing price × `ceiling_bps`)
//! 4. sellers counter upward, buyers counter downward
//! 5. one pending offer per buyer and listing
//! 6. a buyer may only open a limited number of offers on a listing
//! 7. a negotiation chain may only hold a limited number of offers
//!
//! When rule 1 fires, rules 2 to 4 are skipped.

use crate::config::NegotiationConfig;
use crate::error::ValidationIssue;
use crate::offer::{Amount, Offer, OfferId, Role};
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }
    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }
    pub fn contains(&self, issue: &ValidationIssue) -> bool {
        self.issues.contains(issue)
    }
    /// The conflicting offer when a duplicate was detected.
    pub fn duplicate_of(&self) -> Option<&OfferId> {
        self.issues.iter().find_map(|issue| match issue {
            ValidationIssue::DuplicatePendingOffer { existing_offer_id } => Some(existing_offer_id),
            _ => None,
        })
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let messages: Vec<String> = self.issues.iter().map(ToString::to_string).collect();
        f.write_str(&messages.join("; "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Parent {
    id: OfferId,
    amount: Amount,
}

/// Everything the rules need to know besides the candidate amount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationContext {
    actor: Role,
    listing_price: Amount,
    parent: Option<Parent>,
    pending_offer: Option<OfferId>,
    offers_made: usize,
    chain_len: usize,
}

impl ValidationContext {
    /// Context for a buyer opening a fresh offer.
    pub fn initial(listing_price: Amount) -> Self {
        Self {
            actor: Role::Buyer,
            listing_price,
            parent: None,
            pending_offer: None,
            offers_made: 0,
            chain_len: 0,
        }
    }
    /// Context for `actor` countering `parent`.
    pub fn counter(parent: &Offer, actor: Role, listing_price: Amount) -> Self {
        Self::counter_to(&parent.id, parent.amount, actor, listing_price)
    }

    pub fn counter_to(parent_id: &str, parent_amount: Amount, actor: Role, listing_price: Amount) -> Self {
        Self {
            actor,
            listing_price,
            parent: Some(Parent {
                id: parent_id.to_string(),
                amount: parent_amount,
            }),
            pending_offer: None,
            offers_made: 0,
            chain_len: 1,
        }
    }
    pub fn set_pending_offer(mut self, pending: Option<OfferId>) -> Self {
        self.pending_offer = pending;
        self
    }
    pub fn set_offers_made(mut self, count: usize) -> Self {
        self.offers_made = count;
        self
    }
    pub fn set_chain_len(mut self, len: usize) -> Self {
        self.chain_len = len;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validator {
    ceiling_bps: u32,
    max_offers_per_listing: usize,
    max_counter_rounds: usize,
}

impl Default for Validator {
    fn default() -> Self {
        Self::from_config(&NegotiationConfig::default())
    }
}

impl Validator {
    pub fn from_config(config: &NegotiationConfig) -> Self {
        Self {
            ceiling_bps: config.ceiling_bps,
            max_offers_per_listing: config.max_offers_per_listing,
            max_counter_rounds: config.max_counter_rounds,
        }
    }

    /// Highest acceptable amount for a listing, rounded down.
    pub fn ceiling(&self, listing_price: Amount) -> Amount {
        let ceiling = i128::from(listing_price) * i128::from(self.ceiling_bps) / 10_000;
        ceiling.clamp(i128::from(Amount::MIN), i128::from(Amount::MAX)) as Amount
    }

    pub fn validate(&self, amount: Amount, ctx: &ValidationContext) -> ValidationReport {
        let mut issues = Vec::new();

        if amount <= 0 {
            issues.push(ValidationIssue::AmountNotPositive);
        } else {
            if let Some(parent) = &ctx.parent {
                if amount == parent.amount {
                    issues.push(ValidationIssue::AmountUnchanged);
                }
            }
            // compare in i128 so large prices cannot overflow
            if i128::from(amount) * 10_000 > i128::from(ctx.listing_price) * i128::from(self.ceiling_bps) {
                issues.push(ValidationIssue::AmountExceedsCeiling {
                    ceiling: self.ceiling(ctx.listing_price),
                });
            }
            if let Some(parent) = &ctx.parent {
                let wrong_way = match ctx.actor {
                    Role::Seller => amount < parent.amount,
                    Role::Buyer => amount > parent.amount,
                };
                if wrong_way {
                    issues.push(ValidationIssue::AmountWrongDirection { role: ctx.actor });
                }
            }
        }

        if let Some(existing) = &ctx.pending_offer {
            let is_parent = ctx.parent.as_ref().is_some_and(|parent| &parent.id == existing);
            if !is_parent {
                issues.push(ValidationIssue::DuplicatePendingOffer {
                    existing_offer_id: existing.clone(),
                });
            }
        }

        match &ctx.parent {
            None if ctx.offers_made >= self.max_offers_per_listing => {
                issues.push(ValidationIssue::OfferLimitReached {
                    limit: self.max_offers_per_listing,
                });
            }
            Some(_) if ctx.chain_len >= self.max_counter_rounds => {
                issues.push(ValidationIssue::CounterRoundsExhausted {
                    limit: self.max_counter_rounds,
                });
            }
            _ => {}
        }

        ValidationReport { issues }
    }
}

/// Validates with the default policy.
pub fn validate(amount: Amount, ctx: &ValidationContext) -> ValidationReport {
    Validator::default().validate(amount, ctx)
}
