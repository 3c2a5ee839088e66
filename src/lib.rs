pub mod activity;
pub mod clock;
pub mod config;
pub mod economics;
pub mod error;
pub mod expiry;
pub mod machine;
pub mod offer;
pub mod projector;
pub mod reservation;
pub mod service;
pub mod store;
pub mod utils;
pub mod validator;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::NegotiationConfig;
pub use error::{OfferError, StoreError, ValidationIssue};
pub use offer::{Amount, Offer, OfferDraft, OfferStatus, Role, TimeStamp};
pub use service::{Acceptance, CounterOutcome, ExpiryNotice, OfferService, SweepReport};
pub use store::SledStore;
