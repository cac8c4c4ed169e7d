//! Merkle tree construction over record content hashes, and anchor
//! verification.
//!
//! Leaves are the raw 32-byte SHA-256 content digests of forensic records.
//! Parents are SHA-256 over the concatenated raw child digests. A level with
//! an odd node count duplicates its last node, so a single-leaf tree has
//! root == leaf.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::forensic::record::{decode_hash, ForensicRecord};
use crate::forensic::signing::AnchorKeyring;

/// A signed Merkle root over one batch of forensic records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MerkleAnchor {
    pub anchor_id: String,
    /// Leaf content hashes in batch order, lowercase hex.
    pub leaves: Vec<String>,
    /// Merkle root over the leaves, lowercase hex.
    pub root_hash: String,
    /// ed25519 signature over the raw root digest, lowercase hex.
    pub signature: String,
    /// Key epoch the signature was made under.
    pub key_epoch: u32,
    pub created_at: DateTime<Utc>,
}

impl MerkleAnchor {
    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }
}

/// Compute the Merkle root of raw leaf digests. Empty input has no root.
///
/// Every odd level is padded by duplicating its last node before combining,
/// the leaf level included, so a single-leaf batch has root = H(h ‖ h)
/// rather than the bare leaf.
pub fn build_root(leaves: &[[u8; 32]]) -> Option<[u8; 32]> {
    if leaves.is_empty() {
        return None;
    }
    let mut level: Vec<[u8; 32]> = leaves.to_vec();
    loop {
        if level.len() % 2 == 1 {
            // last() is non-empty here
            level.push(*level.last()?);
        }
        level = level
            .chunks_exact(2)
            .map(|pair| combine(&pair[0], &pair[1]))
            .collect();
        if level.len() == 1 {
            return level.pop();
        }
    }
}

fn combine(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Verify an anchor's internal consistency: its stored leaves recompute to
/// its root, and its signature validates under the claimed key epoch.
pub fn verify_anchor(anchor: &MerkleAnchor, keyring: &AnchorKeyring) -> bool {
    let mut leaves = Vec::with_capacity(anchor.leaves.len());
    for leaf in &anchor.leaves {
        let Ok(digest) = decode_hash(leaf) else {
            return false;
        };
        leaves.push(digest);
    }
    let Some(root) = build_root(&leaves) else {
        return false;
    };
    if hex::encode(root) != anchor.root_hash {
        return false;
    }
    keyring.verify_root(anchor.key_epoch, &root, &anchor.signature)
}

/// Verify an anchor against the records it claims to cover. Content hashes
/// are recomputed from record payloads, so edits to a stored payload fail
/// here even if the stored hash was updated to match.
pub fn verify_anchor_records(
    anchor: &MerkleAnchor,
    records: &[ForensicRecord],
    keyring: &AnchorKeyring,
) -> bool {
    if records.len() != anchor.leaves.len() {
        return false;
    }
    for (record, leaf) in records.iter().zip(&anchor.leaves) {
        if !record.hash_is_consistent() || &record.content_hash != leaf {
            return false;
        }
    }
    verify_anchor(anchor, keyring)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(byte: u8) -> [u8; 32] {
        [byte; 32]
    }

    fn anchor_for(leaves: &[[u8; 32]], keyring: &AnchorKeyring) -> MerkleAnchor {
        let root = build_root(leaves).unwrap();
        let (key_epoch, signature) = keyring.sign_root(&root);
        MerkleAnchor {
            anchor_id: "anchor-1".to_string(),
            leaves: leaves.iter().map(hex::encode).collect(),
            root_hash: hex::encode(root),
            signature,
            key_epoch,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_empty_has_no_root() {
        assert!(build_root(&[]).is_none());
    }

    #[test]
    fn test_single_leaf_root_is_hash_of_duplicated_leaf() {
        let l = leaf(5);
        let root = build_root(&[l]).unwrap();
        assert_ne!(root, l);
        assert_eq!(root, combine(&l, &l));
        // Pinned: sha256 of the 0x05 leaf concatenated with itself.
        assert_eq!(
            hex::encode(root),
            "b1bcccf15ed0a0bd63635ae686af9f75e522ab057c928e39f65ee83048d72c75"
        );
    }

    #[test]
    fn test_odd_count_duplicates_last() {
        // Three leaves behave like [a, b, c, c].
        let (a, b, c) = (leaf(1), leaf(2), leaf(3));
        assert_eq!(build_root(&[a, b, c]), build_root(&[a, b, c, c]));
    }

    #[test]
    fn test_five_leaves_builds() {
        let leaves: Vec<[u8; 32]> = (0..5).map(leaf).collect();
        assert!(build_root(&leaves).is_some());
    }

    #[test]
    fn test_root_depends_on_order() {
        let (a, b) = (leaf(1), leaf(2));
        assert_ne!(build_root(&[a, b]), build_root(&[b, a]));
    }

    #[test]
    fn test_verify_anchor_accepts_valid() {
        let keyring = AnchorKeyring::generate();
        let leaves: Vec<[u8; 32]> = (0..3).map(leaf).collect();
        let anchor = anchor_for(&leaves, &keyring);
        assert!(verify_anchor(&anchor, &keyring));
    }

    #[test]
    fn test_verify_anchor_rejects_swapped_leaf() {
        let keyring = AnchorKeyring::generate();
        let leaves: Vec<[u8; 32]> = (0..4).map(leaf).collect();
        let mut anchor = anchor_for(&leaves, &keyring);
        anchor.leaves.swap(0, 1);
        assert!(!verify_anchor(&anchor, &keyring));
    }

    #[test]
    fn test_verify_anchor_rejects_wrong_epoch() {
        let keyring = AnchorKeyring::generate();
        let mut anchor = anchor_for(&[leaf(9)], &keyring);
        anchor.key_epoch = 7;
        assert!(!verify_anchor(&anchor, &keyring));
    }

    #[test]
    fn test_verify_anchor_rejects_malformed_leaf_hex() {
        let keyring = AnchorKeyring::generate();
        let mut anchor = anchor_for(&[leaf(9)], &keyring);
        anchor.leaves[0] = "not hex".to_string();
        assert!(!verify_anchor(&anchor, &keyring));
    }
}
