//! RSA PKCS#1 v1.5 signature verification

use alloc::vec::Vec;

use super::bignum::BigUint;
use super::{ct_eq, HashAlgorithm};
use crate::der::{tag, DerReader};
use crate::error::MalformedError;

/// Smallest modulus accepted (2048 bits)
pub const MIN_MODULUS_BYTES: usize = 256;

/// Largest modulus accepted (8192 bits)
pub const MAX_MODULUS_BYTES: usize = 1024;

/// Widest public exponent accepted
pub const MAX_EXPONENT_BITS: usize = 32;

/// RSA public key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsaPublicKey {
    /// Modulus n
    modulus: BigUint,
    /// Public exponent e
    exponent: BigUint,
    /// Modulus length in bytes
    size: usize,
}

impl RsaPublicKey {
    /// Create RSA public key from big-endian modulus and exponent
    pub fn new(modulus: &[u8], exponent: &[u8]) -> Result<Self, MalformedError> {
        let n = BigUint::from_be_bytes(modulus);
        let e = BigUint::from_be_bytes(exponent);
        let size = n.bits().div_ceil(8);

        if !(MIN_MODULUS_BYTES..=MAX_MODULUS_BYTES).contains(&size)
            || e.is_zero()
            || e.bits() > MAX_EXPONENT_BITS
        {
            return Err(MalformedError::InvalidKey);
        }

        Ok(Self {
            modulus: n,
            exponent: e,
            size,
        })
    }

    /// Parse a PKCS#1 `RSAPublicKey` (the BIT STRING payload of an SPKI)
    pub fn from_pkcs1(der: &[u8]) -> Result<Self, MalformedError> {
        let mut outer = DerReader::new(der);
        let mut seq = outer.read_sequence()?;
        let modulus = seq.read(tag::INTEGER)?.unsigned_integer()?;
        let exponent = seq.read(tag::INTEGER)?.unsigned_integer()?;
        seq.finish()?;
        outer.finish()?;
        Self::new(modulus, exponent)
    }

    /// Modulus length in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Verify a PKCS#1 v1.5 signature over an already computed digest
    pub fn verify_pkcs1_v15(&self, hash: HashAlgorithm, digest: &[u8], signature: &[u8]) -> bool {
        if signature.len() != self.size || digest.len() != hash.output_size() {
            return false;
        }

        let s = BigUint::from_be_bytes(signature);
        if s >= self.modulus {
            return false;
        }

        let m = s.mod_pow(&self.exponent, &self.modulus);
        let Some(em) = m.to_be_bytes_padded(self.size) else {
            return false;
        };
        let Some(expected) = encode_pkcs1_v15(hash, digest, self.size) else {
            return false;
        };

        ct_eq(&em, &expected)
    }
}

/// Build the EMSA-PKCS1-v1_5 encoding `00 01 FF.. 00 DigestInfo`
pub fn encode_pkcs1_v15(hash: HashAlgorithm, digest: &[u8], len: usize) -> Option<Vec<u8>> {
    let prefix = digest_info_prefix(hash);
    let t_len = prefix.len() + digest.len();

    // At least 8 bytes of 0xFF padding
    if len < t_len + 11 {
        return None;
    }

    let mut em = Vec::with_capacity(len);
    em.push(0x00);
    em.push(0x01);
    em.resize(len - t_len - 1, 0xff);
    em.push(0x00);
    em.extend_from_slice(prefix);
    em.extend_from_slice(digest);
    Some(em)
}

/// DigestInfo prefix for algorithm
fn digest_info_prefix(alg: HashAlgorithm) -> &'static [u8] {
    match alg {
        HashAlgorithm::Sha256 => &[
            0x30, 0x31, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86,
            0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01, 0x05,
            0x00, 0x04, 0x20,
        ],
        HashAlgorithm::Sha384 => &[
            0x30, 0x41, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86,
            0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x02, 0x05,
            0x00, 0x04, 0x30,
        ],
        HashAlgorithm::Sha512 => &[
            0x30, 0x51, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86,
            0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x03, 0x05,
            0x00, 0x04, 0x40,
        ],
    }
}

// =============================================================================
// TESTS
// =============================================================================
