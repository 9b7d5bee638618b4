//! ECDSA P-256 verification

use p256::ecdsa::signature::hazmat::PrehashVerifier;
use p256::ecdsa::{Signature, VerifyingKey};

use crate::der::{tag, DerReader};
use crate::error::MalformedError;

/// Scalar size for P-256
const SCALAR_SIZE: usize = 32;

/// P-256 public key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EcPublicKey {
    key: VerifyingKey,
}

impl EcPublicKey {
    /// Parse a SEC1 encoded point (the BIT STRING payload of an SPKI)
    pub fn from_sec1(point: &[u8]) -> Result<Self, MalformedError> {
        VerifyingKey::from_sec1_bytes(point)
            .map(|key| Self { key })
            .map_err(|_| MalformedError::InvalidKey)
    }

    /// Verify a DER `Ecdsa-Sig-Value` over an already computed digest
    pub fn verify_prehash(&self, digest: &[u8], der_signature: &[u8]) -> bool {
        let Ok(signature) = parse_signature(der_signature) else {
            return false;
        };
        self.key.verify_prehash(digest, &signature).is_ok()
    }
}

/// Parse `SEQUENCE { r INTEGER, s INTEGER }` into a fixed-width signature
fn parse_signature(der: &[u8]) -> Result<Signature, MalformedError> {
    let mut outer = DerReader::new(der);
    let mut seq = outer.read_sequence()?;
    let r = seq.read(tag::INTEGER)?.unsigned_integer()?;
    let s = seq.read(tag::INTEGER)?.unsigned_integer()?;
    seq.finish()?;
    outer.finish()?;

    if r.len() > SCALAR_SIZE || s.len() > SCALAR_SIZE {
        return Err(MalformedError::InvalidValue);
    }

    let mut bytes = [0u8; SCALAR_SIZE * 2];
    bytes[SCALAR_SIZE - r.len()..SCALAR_SIZE].copy_from_slice(r);
    bytes[SCALAR_SIZE * 2 - s.len()..].copy_from_slice(s);
    Signature::from_slice(&bytes).map_err(|_| MalformedError::InvalidValue)
}

// =============================================================================
// TESTS
// =============================================================================
