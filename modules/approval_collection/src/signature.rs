//! Ed25519 approval signature verification
use crate::collaborators::SignatureVerifier;
use anyhow::Result;
use sealing_common::{PublicKey, Signature};

/// Signature verifier for verifier staking keys
#[derive(Debug, Default, Clone, Copy)]
pub struct Ed25519SignatureVerifier;

impl SignatureVerifier for Ed25519SignatureVerifier {
    fn verify(&self, message: &[u8], signature: &Signature, key: &PublicKey) -> Result<bool> {
        Ok(key.verify(message, signature))
    }
}
