//! Dedup state: bounded in-memory sets plus a durable fingerprint mirror.

pub mod bounded;
pub mod dedup;
pub mod mirror;

pub use bounded::BoundedSet;
pub use dedup::{DEFAULT_DEDUP_CAP, DedupStats, DedupStore, MessageKey};
pub use mirror::{FingerprintMirror, JsonFileMirror};
