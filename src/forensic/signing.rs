//! Anchor root signing with explicit key epochs.
//!
//! The signing key is process-held state: loaded at startup, never mutated.
//! Rotation installs a new key under the next epoch while retaining every
//! past verifying key, so anchors remain verifiable under the key version
//! active when they were created.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use std::collections::HashMap;
use tracing::info;

use crate::forensic::errors::{ForensicError, Result};

/// Epoch-tagged ed25519 keyring.
pub struct AnchorKeyring {
    active_epoch: u32,
    active_key: SigningKey,
    verifying: HashMap<u32, VerifyingKey>,
}

impl AnchorKeyring {
    /// Start epoch 1 with the given key.
    pub fn new(key: SigningKey) -> Self {
        let mut verifying = HashMap::new();
        verifying.insert(1, key.verifying_key());
        Self {
            active_epoch: 1,
            active_key: key,
            verifying,
        }
    }

    /// Fresh random key, epoch 1.
    pub fn generate() -> Self {
        Self::new(SigningKey::generate(&mut OsRng))
    }

    /// Deterministic keyring from a 32-byte seed (operator-supplied).
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self::new(SigningKey::from_bytes(&seed))
    }

    pub fn active_epoch(&self) -> u32 {
        self.active_epoch
    }

    /// Install `key` as the active signing key under the next epoch. Old
    /// verifying keys are retained for verification.
    pub fn rotate(&mut self, key: SigningKey) -> u32 {
        self.active_epoch += 1;
        self.verifying.insert(self.active_epoch, key.verifying_key());
        self.active_key = key;
        info!(epoch = self.active_epoch, "anchor signing key rotated");
        self.active_epoch
    }

    /// Sign a root digest under the active epoch; returns (epoch, hex sig).
    pub fn sign_root(&self, root: &[u8; 32]) -> (u32, String) {
        let signature = self.active_key.sign(root);
        (self.active_epoch, hex::encode(signature.to_bytes()))
    }

    /// Check a detached hex signature over a root digest against the key of
    /// the given epoch. Unknown epoch or malformed signature is `false`.
    pub fn verify_root(&self, epoch: u32, root: &[u8; 32], signature_hex: &str) -> bool {
        let Some(key) = self.verifying.get(&epoch) else {
            return false;
        };
        let Ok(bytes) = hex::decode(signature_hex) else {
            return false;
        };
        let Ok(bytes) = <[u8; 64]>::try_from(bytes.as_slice()) else {
            return false;
        };
        let signature = Signature::from_bytes(&bytes);
        key.verify_strict(root, &signature).is_ok()
    }

    /// Verifying key for an epoch, for export/inspection.
    pub fn verifying_key(&self, epoch: u32) -> Result<VerifyingKey> {
        self.verifying
            .get(&epoch)
            .copied()
            .ok_or(ForensicError::UnknownKeyEpoch(epoch))
    }
}

/// Parse a 64-char hex string into a signing-key seed.
pub fn seed_from_hex(hex_seed: &str) -> Result<[u8; 32]> {
    let bytes =
        hex::decode(hex_seed).map_err(|e| ForensicError::Signing(format!("bad seed hex: {}", e)))?;
    bytes
        .try_into()
        .map_err(|_| ForensicError::Signing("seed must be 32 bytes".to_string()))
}
