//! Relay pipeline: every candidate message flows through
//! 1. dedup by message key and by content fingerprint
//! 2. `FilterEngine` keyword gate on the raw text
//! 3. `TextNormalizer` cleanup plus footer
//! 4. `Forwarder` delivery with an ordered fallback chain

pub mod filter;
pub mod fingerprint;
pub mod forwarder;
pub mod normalize;
pub mod types;

pub use filter::{FilterDecision, FilterEngine};
pub use fingerprint::{Fingerprint, fingerprint, fingerprint_message};
pub use forwarder::Forwarder;
pub use normalize::{Footer, TextNormalizer, normalize, strip_markup};
pub use types::{AttemptFailure, DeliveryStrategy, ForwardOutcome};
