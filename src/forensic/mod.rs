//! Tamper-evident forensic layer: canonical alert records, Merkle batch
//! anchoring with epoch-keyed signatures, and durable storage.

pub mod anchor;
pub mod errors;
pub mod merkle;
pub mod record;
pub mod signing;
pub mod storage;

pub use anchor::{verify_store, AnchorConfig, AnchorService, VerificationReport};
pub use errors::{ForensicError, Result};
pub use merkle::{build_root, verify_anchor, verify_anchor_records, MerkleAnchor};
pub use record::ForensicRecord;
pub use signing::{seed_from_hex, AnchorKeyring};
pub use storage::{ForensicStore, JsonlForensicStore, MemoryForensicStore};
