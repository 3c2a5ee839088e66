//! Walks a listing through a full negotiation against a throwaway sled db.
//!
//! Run with `cargo run --example negotiation`.

use anyhow::Context;
use chrono::Duration;
use offer_negotiation::{economics, FixedClock, NegotiationConfig, OfferDraft, OfferService, TimeStamp};
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::fmt;

fn main() -> anyhow::Result<()> {
    let subscriber = fmt().with_max_level(Level::DEBUG).with_target(false).finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let temp_dir = tempfile::tempdir()?;
    let config = NegotiationConfig::load(temp_dir.path()).context("loading config")?;
    let db = Arc::new(sled::open(temp_dir.path().join("negotiation.db"))?);
    let clock = Arc::new(FixedClock::new(TimeStamp::new()));
    let service = OfferService::with_sled(db, config, clock.clone());

    let listing_price = 2_500;
    let draft = OfferDraft::new()
        .set_listing("listing_bike", listing_price)
        .set_conversation("conv_bike")
        .set_buyer("ama")
        .set_seller("kofi")
        .set_amount(2_000)
        .set_message("Would you take 2000?");
    let opening = service.make_offer(draft).context("buyer offer")?;

    clock.advance(Duration::hours(5));
    let grade = economics::attractiveness(opening.amount, listing_price);
    println!("{} ({})", grade.label(), opening.amount);
    for pick in service.counter_suggestions(&opening.id, "kofi", listing_price)? {
        println!("  suggestion: {} {}", pick.label, pick.amount);
    }
    let seller_counter = service
        .counter_offer(&opening.id, "kofi", 2_400, listing_price, None)
        .context("seller counter")?
        .counter;

    clock.advance(Duration::hours(50));
    for notice in service.expiry_warnings()? {
        println!(
            "reminder to {}: {} hours left on {}",
            notice.recipient_id,
            notice.reading.countdown().hours,
            notice.offer_id
        );
    }

    let buyer_counter = service
        .counter_offer(&seller_counter.id, "ama", 2_200, listing_price, Some("Meet in the middle?".into()))
        .context("buyer counter")?
        .counter;

    clock.advance(Duration::hours(1));
    let acceptance = service
        .accept_offer(&buyer_counter.id, "kofi", Some("Deal".into()))
        .context("seller acceptance")?;
    println!(
        "reserved {} for {} at {} until {}",
        acceptance.reservation.listing_id,
        acceptance.reservation.buyer_id,
        acceptance.reservation.reserved_price,
        acceptance.reservation.reserved_until
    );

    clock.advance(Duration::hours(20));
    let sold = service
        .complete_reservation(&acceptance.reservation.id, "ama")
        .context("buyer completes")?;
    println!("reservation {} is {}", sold.id, sold.status);

    println!("\nconversation:");
    for message in service.conversation("conv_bike")? {
        println!("  [{}] {}", message.kind.as_str(), message.content);
    }

    println!("\nchain:");
    for offer in service.offer_chain(&opening.id)? {
        println!("  {} {} {} ({})", offer.id, offer.proposed_by, offer.amount, offer.status);
    }

    Ok(())
}
