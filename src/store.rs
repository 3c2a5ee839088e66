//! Collaborator seams and their sled implementation.
//!
//! The engine talks to persistence, listing reservations and the chat thread
//! only through the traits below. [`SledStore`] implements all three on a
//! single sled tree using prefixed keys:
//!
//! | key                                         | value                 |
//! |---------------------------------------------|-----------------------|
//! | `offer/<offer_id>`                          | CBOR [`Offer`]        |
//! | `listing/<len>:<listing_id>/<offer_id>`     | empty (index)         |
//! | `activity/<len>:<offer_id>/<sha256>`        | CBOR [`ActivityEntry`]|
//! | `reservation/<reservation_id>`              | CBOR [`Reservation`]  |
//! | `hold/<listing_id>`                         | reservation id        |
//! | `message/<len>:<conversation_id>/<seq>`     | CBOR payload          |
//!
//! `<len>` is the byte length of the id that follows it.
use crate::activity::ActivityEntry;
use crate::error::StoreError;
use crate::offer::{Offer, OfferStatus, TimeStamp};
use crate::projector::ChatMessagePayload;
use crate::reservation::{Reservation, ReservationRequest, ReservationStatus};
use chrono::Utc;
use sled::{Batch, Db, IVec};
use std::sync::Arc;
use tracing::debug;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

pub trait OfferStore: Send + Sync {
    fn create_offer(&self, offer: &Offer) -> StoreResult<()>;
    /// Replaces the stored record with `next` only while its status is still
    /// `expected`; otherwise fails with [`StoreError::StatusMismatch`].
    fn update_offer_status(&self, id: &str, expected: OfferStatus, next: &Offer) -> StoreResult<()>;
    fn get_offer(&self, id: &str) -> StoreResult<Option<Offer>>;
    fn find_pending_offer(&self, buyer_id: &str, listing_id: &str) -> StoreResult<Option<Offer>>;
    fn offers_for_listing(&self, listing_id: &str) -> StoreResult<Vec<Offer>>;
    fn pending_offers(&self) -> StoreResult<Vec<Offer>>;
    /// Returns the content hash the entry was stored under.
    fn record_activity(&self, entry: &ActivityEntry) -> StoreResult<String>;
    fn activity_for(&self, offer_id: &str) -> StoreResult<Vec<ActivityEntry>>;
}

pub trait ReservationDesk: Send + Sync {
    /// Holds the listing for the buyer; fails if an active hold exists.
    fn create_reservation(&self, request: &ReservationRequest) -> StoreResult<Reservation>;
    fn reservation_for(&self, listing_id: &str, now: &TimeStamp<Utc>) -> StoreResult<Option<Reservation>>;
    fn get_reservation(&self, reservation_id: &str) -> StoreResult<Option<Reservation>>;
    /// Moves an active reservation to `status` and frees the listing hold.
    /// Fails with [`StoreError::ReservationClosed`] if it is no longer active.
    fn close_reservation(
        &self,
        reservation_id: &str,
        status: ReservationStatus,
        at: &TimeStamp<Utc>,
    ) -> StoreResult<Reservation>;
}

pub trait MessageLog: Send + Sync {
    /// Appends to the conversation named in the payload and returns the
    /// message sequence number.
    fn append_message(&self, payload: &ChatMessagePayload) -> StoreResult<u64>;
    fn messages_for(&self, conversation_id: &str) -> StoreResult<Vec<ChatMessagePayload>>;
}

pub struct SledStore {
    instance: Arc<Db>,
}

fn offer_key(id: &str) -> String {
    format!("offer/{id}")
}

// Scanned prefixes carry the id's byte length, so `conv` never matches the
// keys of `conv/a`.
fn scoped_prefix(kind: &str, id: &str) -> String {
    format!("{kind}/{}:{id}/", id.len())
}

fn listing_prefix(listing_id: &str) -> String {
    scoped_prefix("listing", listing_id)
}

fn activity_prefix(offer_id: &str) -> String {
    scoped_prefix("activity", offer_id)
}

fn reservation_key(id: &str) -> String {
    format!("reservation/{id}")
}

fn hold_key(listing_id: &str) -> String {
    format!("hold/{listing_id}")
}

fn message_prefix(conversation_id: &str) -> String {
    scoped_prefix("message", conversation_id)
}

fn encode<T: minicbor::Encode<()>>(value: &T) -> StoreResult<Vec<u8>> {
    minicbor::to_vec(value).map_err(|e| StoreError::Encode(e.to_string()))
}

fn decode<T>(bytes: &[u8]) -> StoreResult<T>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    Ok(minicbor::decode(bytes)?)
}

impl SledStore {
    pub fn new(instance: Arc<Db>) -> Self {
        Self { instance }
    }

    /// Opens (or creates) a database at `path`.
    pub fn open(path: impl AsRef<std::path::Path>) -> StoreResult<Self> {
        Ok(Self::new(Arc::new(sled::open(path)?)))
    }

    fn load_reservation(&self, id: &str) -> StoreResult<Option<Reservation>> {
        match self.instance.get(reservation_key(id))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn held_reservation(&self, hold: &IVec) -> StoreResult<Option<Reservation>> {
        let id = String::from_utf8_lossy(hold);
        self.load_reservation(&id)
    }

    fn scan_offers(&self, prefix: &str) -> StoreResult<Vec<Offer>> {
        let mut offers = Vec::new();
        for item in self.instance.scan_prefix(prefix) {
            let (_, bytes) = item?;
            offers.push(decode(&bytes)?);
        }
        Ok(offers)
    }
}

impl OfferStore for SledStore {
    fn create_offer(&self, offer: &Offer) -> StoreResult<()> {
        let mut batch = Batch::default();
        batch.insert(offer_key(&offer.id).as_bytes(), encode(offer)?);
        batch.insert(
            format!("{}{}", listing_prefix(&offer.listing_id), offer.id).as_bytes(),
            &[] as &[u8],
        );
        self.instance.apply_batch(batch)?;
        debug!(offer_id = %offer.id, listing_id = %offer.listing_id, "stored offer");
        Ok(())
    }

    fn update_offer_status(&self, id: &str, expected: OfferStatus, next: &Offer) -> StoreResult<()> {
        let key = offer_key(id);
        let current = self
            .instance
            .get(&key)?
            .ok_or_else(|| StoreError::Missing(key.clone()))?;
        let stored: Offer = decode(&current)?;
        if stored.status != expected {
            return Err(StoreError::StatusMismatch {
                expected,
                found: stored.status,
            });
        }

        let swapped = self
            .instance
            .compare_and_swap(&key, Some(&*current), Some(encode(next)?))?;
        if swapped.is_err() {
            // someone else wrote between our read and the swap
            let found = match self.get_offer(id)? {
                Some(offer) => offer.status,
                None => return Err(StoreError::Missing(key)),
            };
            return Err(StoreError::StatusMismatch { expected, found });
        }
        debug!(offer_id = %id, from = %expected, to = %next.status, "updated offer");
        Ok(())
    }

    fn get_offer(&self, id: &str) -> StoreResult<Option<Offer>> {
        match self.instance.get(offer_key(id))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn find_pending_offer(&self, buyer_id: &str, listing_id: &str) -> StoreResult<Option<Offer>> {
        Ok(self
            .offers_for_listing(listing_id)?
            .into_iter()
            .find(|offer| offer.buyer_id == buyer_id && offer.status == OfferStatus::Pending))
    }

    fn offers_for_listing(&self, listing_id: &str) -> StoreResult<Vec<Offer>> {
        let prefix = listing_prefix(listing_id);
        let mut offers = Vec::new();
        for item in self.instance.scan_prefix(&prefix) {
            let (key, _) = item?;
            let offer_id = String::from_utf8_lossy(&key[prefix.len()..]).into_owned();
            if let Some(offer) = self.get_offer(&offer_id)? {
                offers.push(offer);
            }
        }
        Ok(offers)
    }

    fn pending_offers(&self) -> StoreResult<Vec<Offer>> {
        let mut offers = self.scan_offers("offer/")?;
        offers.retain(|offer| offer.status == OfferStatus::Pending);
        Ok(offers)
    }

    fn record_activity(&self, entry: &ActivityEntry) -> StoreResult<String> {
        let (hash, cbor) = entry
            .build()
            .map_err(|e| StoreError::Encode(e.to_string()))?;
        self.instance
            .insert(format!("{}{}", activity_prefix(&entry.offer_id), hash), cbor)?;
        Ok(hash)
    }

    fn activity_for(&self, offer_id: &str) -> StoreResult<Vec<ActivityEntry>> {
        let mut entries: Vec<ActivityEntry> = Vec::new();
        for item in self.instance.scan_prefix(activity_prefix(offer_id)) {
            let (_, bytes) = item?;
            entries.push(decode(&bytes)?);
        }
        entries.sort_by(|a, b| a.recorded_at.cmp(&b.recorded_at));
        Ok(entries)
    }
}

impl ReservationDesk for SledStore {
    fn create_reservation(&self, request: &ReservationRequest) -> StoreResult<Reservation> {
        let hold = hold_key(&request.listing_id);
        let previous = self.instance.get(&hold)?;
        if let Some(existing) = &previous {
            if let Some(reservation) = self.held_reservation(existing)? {
                if reservation.is_active_at(&request.reserved_at) {
                    return Err(StoreError::ListingReserved {
                        listing_id: request.listing_id.clone(),
                        until: reservation.reserved_until,
                    });
                }
            }
        }

        let reservation = Reservation::from(request.clone());
        let key = reservation_key(&reservation.id);
        self.instance.insert(&key, encode(&reservation)?)?;

        let swapped = self.instance.compare_and_swap(
            &hold,
            previous.as_deref(),
            Some(reservation.id.as_bytes()),
        )?;
        if swapped.is_err() {
            // lost the hold to a concurrent acceptance
            self.instance.remove(&key)?;
            let until = match self.instance.get(&hold)? {
                Some(winner) => self
                    .held_reservation(&winner)?
                    .map(|r| r.reserved_until)
                    .unwrap_or_else(|| request.reserved_until.clone()),
                None => request.reserved_until.clone(),
            };
            return Err(StoreError::ListingReserved {
                listing_id: request.listing_id.clone(),
                until,
            });
        }

        debug!(
            reservation_id = %reservation.id,
            listing_id = %reservation.listing_id,
            until = %reservation.reserved_until,
            "listing reserved"
        );
        Ok(reservation)
    }

    fn reservation_for(&self, listing_id: &str, now: &TimeStamp<Utc>) -> StoreResult<Option<Reservation>> {
        let Some(hold) = self.instance.get(hold_key(listing_id))? else {
            return Ok(None);
        };
        Ok(self
            .held_reservation(&hold)?
            .filter(|reservation| reservation.is_active_at(now)))
    }

    fn get_reservation(&self, reservation_id: &str) -> StoreResult<Option<Reservation>> {
        self.load_reservation(reservation_id)
    }

    fn close_reservation(
        &self,
        reservation_id: &str,
        status: ReservationStatus,
        at: &TimeStamp<Utc>,
    ) -> StoreResult<Reservation> {
        let key = reservation_key(reservation_id);
        let current = self
            .instance
            .get(&key)?
            .ok_or_else(|| StoreError::Missing(key.clone()))?;
        let stored: Reservation = decode(&current)?;
        if stored.status != ReservationStatus::Active {
            return Err(StoreError::ReservationClosed {
                reservation_id: reservation_id.to_string(),
                status: stored.status,
            });
        }

        let closed = stored.close(status, at);
        let swapped = self
            .instance
            .compare_and_swap(&key, Some(&*current), Some(encode(&closed)?))?;
        if swapped.is_err() {
            return match self.load_reservation(reservation_id)? {
                Some(winner) => Err(StoreError::ReservationClosed {
                    reservation_id: reservation_id.to_string(),
                    status: winner.status,
                }),
                None => Err(StoreError::Missing(key)),
            };
        }

        // the hold may already point at a newer reservation; leave that one alone
        let _ = self.instance.compare_and_swap(
            hold_key(&closed.listing_id),
            Some(reservation_id.as_bytes()),
            None::<IVec>,
        )?;
        debug!(reservation_id = %reservation_id, status = %closed.status, "reservation closed");
        Ok(closed)
    }
}

impl MessageLog for SledStore {
    fn append_message(&self, payload: &ChatMessagePayload) -> StoreResult<u64> {
        let seq = self.instance.generate_id()?;
        // zero-padded so scan order matches append order
        let key = format!("{}{seq:020}", message_prefix(&payload.conversation_id));
        self.instance.insert(key, encode(payload)?)?;
        Ok(seq)
    }

    fn messages_for(&self, conversation_id: &str) -> StoreResult<Vec<ChatMessagePayload>> {
        let mut messages = Vec::new();
        for item in self.instance.scan_prefix(message_prefix(conversation_id)) {
            let (_, bytes) = item?;
            messages.push(decode(&bytes)?);
        }
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::{BuyerStanding, OfferMachine};
    use crate::offer::OfferDraft;
    use chrono::Duration;
    use tempfile::tempdir;

    fn store() -> (tempfile::TempDir, SledStore) {
        let temp_dir = tempdir().unwrap();
        let store = SledStore::open(temp_dir.path().join("store.db")).unwrap();
        (temp_dir, store)
    }

    fn offer(listing: &str, buyer: &str) -> Offer {
        let draft = OfferDraft::new()
            .set_listing(listing, 1_000)
            .set_conversation("conv_1")
            .set_buyer(buyer)
            .set_seller("seller_1")
            .set_amount(900);
        OfferMachine::default()
            .open(draft, &BuyerStanding::default(), &TimeStamp::new())
            .unwrap()
            .offer
    }

    #[test]
    fn stores_and_indexes_offers() {
        let (_dir, store) = store();
        let a = offer("listing_1", "buyer_a");
        let b = offer("listing_1", "buyer_b");
        let c = offer("listing_2", "buyer_a");
        for o in [&a, &b, &c] {
            store.create_offer(o).unwrap();
        }

        assert_eq!(store.get_offer(&a.id).unwrap(), Some(a.clone()));
        assert_eq!(store.offers_for_listing("listing_1").unwrap().len(), 2);
        assert_eq!(
            store.find_pending_offer("buyer_a", "listing_2").unwrap().map(|o| o.id),
            Some(c.id.clone())
        );
        assert_eq!(store.pending_offers().unwrap().len(), 3);
    }

    #[test]
    fn conditional_update_detects_stale_status() {
        let (_dir, store) = store();
        let original = offer("listing_1", "buyer_a");
        store.create_offer(&original).unwrap();

        let mut withdrawn = original.clone();
        withdrawn.status = OfferStatus::Withdrawn;
        store
            .update_offer_status(&original.id, OfferStatus::Pending, &withdrawn)
            .unwrap();

        let mut accepted = original.clone();
        accepted.status = OfferStatus::Accepted;
        let err = store
            .update_offer_status(&original.id, OfferStatus::Pending, &accepted)
            .unwrap_err();

        assert!(matches!(
            err,
            StoreError::StatusMismatch {
                expected: OfferStatus::Pending,
                found: OfferStatus::Withdrawn
            }
        ));
        assert_eq!(
            store.get_offer(&original.id).unwrap().map(|o| o.status),
            Some(OfferStatus::Withdrawn)
        );
    }

    #[test]
    fn second_hold_on_listing_is_refused() {
        let (_dir, store) = store();
        let now = TimeStamp::new();
        let first = offer("listing_1", "buyer_a");
        let second = offer("listing_1", "buyer_b");

        let request = ReservationRequest::for_offer("resv_1".into(), &first, now.clone(), now.plus(Duration::hours(48)));
        let reservation = store.create_reservation(&request).unwrap();
        assert_eq!(reservation.reserved_price, 900);

        let request = ReservationRequest::for_offer("resv_2".into(), &second, now.clone(), now.plus(Duration::hours(48)));
        assert!(matches!(
            store.create_reservation(&request),
            Err(StoreError::ListingReserved { .. })
        ));

        // once the hold lapses the listing can be reserved again
        let later = now.plus(Duration::hours(49));
        assert!(store.reservation_for("listing_1", &later).unwrap().is_none());
        let request = ReservationRequest::for_offer("resv_3".into(), &second, later.clone(), later.plus(Duration::hours(48)));
        assert!(store.create_reservation(&request).is_ok());
    }

    #[test]
    fn messages_keep_append_order() {
        let (_dir, store) = store();
        let machine = OfferMachine::default();
        let draft = OfferDraft::new()
            .set_listing("listing_1", 1_000)
            .set_conversation("conv_9")
            .set_buyer("buyer_a")
            .set_seller("seller_1")
            .set_amount(900);
        let t = machine.open(draft, &BuyerStanding::default(), &TimeStamp::new()).unwrap();

        let mut first = crate::projector::project(&t);
        first.content = "first".into();
        let mut second = first.clone();
        second.content = "second".into();
        store.append_message(&first).unwrap();
        store.append_message(&second).unwrap();

        let contents: Vec<String> = store
            .messages_for("conv_9")
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["first", "second"]);
    }

    #[test]
    fn closing_reservation_frees_the_listing() {
        let (_dir, store) = store();
        let now = TimeStamp::new();
        let first = offer("listing_1", "buyer_a");
        let second = offer("listing_1", "buyer_b");

        let request = ReservationRequest::for_offer("resv_1".into(), &first, now.clone(), now.plus(Duration::hours(48)));
        store.create_reservation(&request).unwrap();

        let closed = store
            .close_reservation("resv_1", ReservationStatus::Cancelled, &now)
            .unwrap();
        assert_eq!(closed.status, ReservationStatus::Cancelled);
        assert_eq!(closed.closed_at, Some(now.clone()));
        assert!(store.reservation_for("listing_1", &now).unwrap().is_none());

        assert!(matches!(
            store.close_reservation("resv_1", ReservationStatus::Completed, &now),
            Err(StoreError::ReservationClosed {
                status: ReservationStatus::Cancelled,
                ..
            })
        ));
        assert!(matches!(
            store.close_reservation("resv_missing", ReservationStatus::Completed, &now),
            Err(StoreError::Missing(_))
        ));

        let request = ReservationRequest::for_offer("resv_2".into(), &second, now.clone(), now.plus(Duration::hours(48)));
        assert!(store.create_reservation(&request).is_ok());
    }

    #[test]
    fn ids_sharing_a_prefix_do_not_mix() {
        let (_dir, store) = store();
        let machine = OfferMachine::default();
        let draft = OfferDraft::new()
            .set_listing("listing_1", 1_000)
            .set_conversation("conv/a")
            .set_buyer("buyer_a")
            .set_seller("seller_1")
            .set_amount(900);
        let t = machine.open(draft, &BuyerStanding::default(), &TimeStamp::new()).unwrap();
        store.append_message(&crate::projector::project(&t)).unwrap();

        assert!(store.messages_for("conv").unwrap().is_empty());
        assert_eq!(store.messages_for("conv/a").unwrap().len(), 1);

        store.create_offer(&offer("shop/bike", "buyer_a")).unwrap();
        store.create_offer(&offer("shop", "buyer_b")).unwrap();
        let shop: Vec<String> = store
            .offers_for_listing("shop")
            .unwrap()
            .into_iter()
            .map(|o| o.buyer_id)
            .collect();
        assert_eq!(shop, vec!["buyer_b"]);
    }
}
