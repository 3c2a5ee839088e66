//! Identifier generation

use bech32::Bech32m;
use uuid7::uuid7;

pub const OFFER_HRP: &str = "offer_";
pub const RESERVATION_HRP: &str = "resv_";

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

pub fn new_offer_id() -> anyhow::Result<String> {
    new_uuid_to_bech32(OFFER_HRP)
}

pub fn new_reservation_id() -> anyhow::Result<String> {
    new_uuid_to_bech32(RESERVATION_HRP)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offer_ids_carry_prefix() {
        let id = new_offer_id().unwrap();
        assert!(id.starts_with("offer_1"));
    }

    #[test]
    fn ids_are_unique() {
        let a = new_reservation_id().unwrap();
        let b = new_reservation_id().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_empty_hrp() {
        assert!(new_uuid_to_bech32("").is_err());
    }
}
