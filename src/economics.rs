//! Negotiation hints shown next to an offer: how attractive an amount is,
//! how a counter compares with the offer it answers, and suggested counter
//! amounts for each side.
//!
//! Percentages are carried as integer tenths of a percent (`533` is 53.3%),
//! rounded half away from zero.
use crate::offer::{Amount, Role};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Attractiveness {
    Low,
    Fair,
    Good,
    Excellent,
}

impl Attractiveness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Attractiveness::Low => "low",
            Attractiveness::Fair => "fair",
            Attractiveness::Good => "good",
            Attractiveness::Excellent => "excellent",
        }
    }
    pub fn label(&self) -> &'static str {
        match self {
            Attractiveness::Low => "Low offer",
            Attractiveness::Fair => "Fair offer",
            Attractiveness::Good => "Good offer",
            Attractiveness::Excellent => "Excellent offer!",
        }
    }
}

/// Grades `amount` against the asking price: 95% and up is excellent, 85%
/// good, 70% fair. Without a positive asking price every amount is low.
pub fn attractiveness(amount: Amount, listing_price: Amount) -> Attractiveness {
    if listing_price <= 0 {
        return Attractiveness::Low;
    }
    let scaled = i128::from(amount) * 100;
    let at_least = |pct: i128| scaled >= i128::from(listing_price) * pct;

    if at_least(95) {
        Attractiveness::Excellent
    } else if at_least(85) {
        Attractiveness::Good
    } else if at_least(70) {
        Attractiveness::Fair
    } else {
        Attractiveness::Low
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Higher,
    Lower,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterComparison {
    /// Absolute gap between the counter and the offer it answers.
    pub difference: Amount,
    pub direction: Direction,
    /// Size of the move relative to the answered offer, in tenths of a
    /// percent. `None` when the answered amount is not positive.
    pub change_tenths: Option<i64>,
    /// The counter as a share of the asking price, in tenths of a percent.
    pub of_listing_tenths: Option<i64>,
}

pub fn comparison(counter: Amount, original: Amount, listing_price: Amount) -> CounterComparison {
    let delta = i128::from(counter) - i128::from(original);
    let direction = match delta.cmp(&0) {
        Ordering::Greater => Direction::Higher,
        Ordering::Less => Direction::Lower,
        Ordering::Equal => Direction::Unchanged,
    };

    CounterComparison {
        difference: Amount::try_from(delta.abs()).unwrap_or(Amount::MAX),
        direction,
        change_tenths: tenths_of_percent(delta.abs(), i128::from(original)),
        of_listing_tenths: tenths_of_percent(i128::from(counter), i128::from(listing_price)),
    }
}

/// Renders tenths of a percent the way the app shows them, `533` as `"53.3"`.
pub fn percent_label(tenths: i64) -> String {
    let sign = if tenths < 0 { "-" } else { "" };
    let abs = tenths.unsigned_abs();
    format!("{sign}{}.{}", abs / 10, abs % 10)
}

fn tenths_of_percent(part: i128, whole: i128) -> Option<i64> {
    if whole <= 0 {
        return None;
    }
    let scaled = part * 1_000;
    let rounded = if scaled >= 0 {
        (2 * scaled + whole) / (2 * whole)
    } else {
        -((-2 * scaled + whole) / (2 * whole))
    };
    i64::try_from(rounded).ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuggestionTier {
    Conservative,
    Moderate,
    Aggressive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterSuggestion {
    pub amount: Amount,
    pub tier: SuggestionTier,
    pub label: &'static str,
}

/// Quick-pick counter amounts for `role` answering an offer of `original`.
///
/// Sellers get +10%, the midpoint to the asking price, and +25% capped at
/// the asking price. Buyers get -10%, +5%, and +15% capped at the asking
/// price. Amounts that are not positive or exceed the asking price are
/// dropped.
pub fn suggest_counters(original: Amount, listing_price: Amount, role: Role) -> Vec<CounterSuggestion> {
    let original = i128::from(original);
    let price = i128::from(listing_price);

    let picks: [(i128, SuggestionTier, &'static str); 3] = match role {
        Role::Seller => [
            (percent_of(original, 110), SuggestionTier::Conservative, "Conservative (+10%)"),
            (round_half(original + price), SuggestionTier::Moderate, "Meet in middle"),
            (percent_of(original, 125).min(price), SuggestionTier::Aggressive, "Firm"),
        ],
        Role::Buyer => [
            (percent_of(original, 90), SuggestionTier::Conservative, "Lower (-10%)"),
            (percent_of(original, 105), SuggestionTier::Moderate, "Slight increase (+5%)"),
            (percent_of(original, 115).min(price), SuggestionTier::Aggressive, "Higher (+15%)"),
        ],
    };

    picks
        .into_iter()
        .filter(|(amount, _, _)| *amount > 0 && *amount <= price)
        .filter_map(|(amount, tier, label)| {
            Some(CounterSuggestion {
                amount: Amount::try_from(amount).ok()?,
                tier,
                label,
            })
        })
        .collect()
}

// nearest whole unit, halves rounded up
fn percent_of(value: i128, pct: i128) -> i128 {
    (value * pct + 50).div_euclid(100)
}

fn round_half(value: i128) -> i128 {
    (value + 1).div_euclid(2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attractiveness_bands() {
        assert_eq!(attractiveness(196, 200), Attractiveness::Excellent);
        assert_eq!(attractiveness(190, 200), Attractiveness::Excellent);
        assert_eq!(attractiveness(180, 200), Attractiveness::Good);
        assert_eq!(attractiveness(150, 200), Attractiveness::Fair);
        assert_eq!(attractiveness(139, 200), Attractiveness::Low);
        assert_eq!(attractiveness(100, 200).label(), "Low offer");
        assert_eq!(attractiveness(500, 0), Attractiveness::Low);
    }

    #[test]
    fn higher_and_lower_counters() {
        let up = comparison(120, 100, 150);
        assert_eq!(up.difference, 20);
        assert_eq!(up.direction, Direction::Higher);
        assert_eq!(up.change_tenths.map(percent_label).as_deref(), Some("20.0"));
        assert_eq!(up.of_listing_tenths.map(percent_label).as_deref(), Some("80.0"));

        let down = comparison(80, 100, 150);
        assert_eq!(down.difference, 20);
        assert_eq!(down.direction, Direction::Lower);
        assert_eq!(down.of_listing_tenths, Some(533));

        assert_eq!(comparison(100, 100, 150).direction, Direction::Unchanged);
        assert_eq!(comparison(100, 0, 150).change_tenths, None);
    }

    #[test]
    fn seller_suggestions() {
        let picks = suggest_counters(100, 150, Role::Seller);
        let amounts: Vec<Amount> = picks.iter().map(|s| s.amount).collect();
        assert_eq!(amounts, vec![110, 125, 125]);
        assert_eq!(picks[1].label, "Meet in middle");
    }

    #[test]
    fn buyer_suggestions() {
        let amounts: Vec<Amount> = suggest_counters(100, 150, Role::Buyer)
            .iter()
            .map(|s| s.amount)
            .collect();
        assert_eq!(amounts, vec![90, 105, 115]);
    }

    #[test]
    fn suggestions_above_asking_are_dropped() {
        // +10% of 145 would pass the asking price of 150
        let picks = suggest_counters(145, 150, Role::Seller);
        assert!(picks.iter().all(|s| s.amount <= 150));
        assert_eq!(picks.len(), 2);
        assert_eq!(picks[0].tier, SuggestionTier::Moderate);
    }

    #[test]
    fn percent_label_keeps_sign() {
        assert_eq!(percent_label(533), "53.3");
        assert_eq!(percent_label(-5), "-0.5");
    }
}
