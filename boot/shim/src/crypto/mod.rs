//! Cryptographic Primitives for the Shim
//!
//! Hash functions, public keys and signature dispatch used by certificate
//! chains, signed-data envelopes and the trust store.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  Signature Dispatch                      │
//! │   SignatureAlgorithm (OID)  ──►  PublicKey::verify       │
//! ├──────────────────────────┬───────────────────────────────┤
//! │  RSA PKCS#1 v1.5         │  ECDSA P-256                  │
//! │  (bignum, in crate)      │  (p256)                       │
//! ├──────────────────────────┴───────────────────────────────┤
//! │  SHA-256 │ SHA-384 │ SHA-512 (sha2)  ·  ct_eq (subtle)    │
//! └──────────────────────────────────────────────────────────┘
//! ```

pub mod bignum;
pub mod ecdsa;
pub mod rsa;

use alloc::vec::Vec;

use sha2::{Digest, Sha256, Sha384, Sha512};
use subtle::ConstantTimeEq;

use crate::der::{tag, DerReader, Tlv};
use crate::error::MalformedError;

pub use ecdsa::EcPublicKey;
pub use rsa::RsaPublicKey;

/// Object identifiers (content octets)
pub mod oid {
    /// sha256: 2.16.840.1.101.3.4.2.1
    pub const SHA256: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x01];
    /// sha384: 2.16.840.1.101.3.4.2.2
    pub const SHA384: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x02];
    /// sha512: 2.16.840.1.101.3.4.2.3
    pub const SHA512: &[u8] = &[0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02, 0x03];

    /// rsaEncryption: 1.2.840.113549.1.1.1
    pub const RSA_ENCRYPTION: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x01];
    /// sha256WithRSAEncryption: 1.2.840.113549.1.1.11
    pub const SHA256_RSA: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x0b];
    /// sha384WithRSAEncryption: 1.2.840.113549.1.1.12
    pub const SHA384_RSA: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x0c];
    /// sha512WithRSAEncryption: 1.2.840.113549.1.1.13
    pub const SHA512_RSA: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x01, 0x0d];

    /// id-ecPublicKey: 1.2.840.10045.2.1
    pub const EC_PUBLIC_KEY: &[u8] = &[0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01];
    /// prime256v1: 1.2.840.10045.3.1.7
    pub const PRIME256V1: &[u8] = &[0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07];
    /// ecdsa-with-SHA256: 1.2.840.10045.4.3.2
    pub const SHA256_ECDSA: &[u8] = &[0x2a, 0x86, 0x48, 0xce, 0x3d, 0x04, 0x03, 0x02];
    /// ecdsa-with-SHA384: 1.2.840.10045.4.3.3
    pub const SHA384_ECDSA: &[u8] = &[0x2a, 0x86, 0x48, 0xce, 0x3d, 0x04, 0x03, 0x03];
    /// ecdsa-with-SHA512: 1.2.840.10045.4.3.4
    pub const SHA512_ECDSA: &[u8] = &[0x2a, 0x86, 0x48, 0xce, 0x3d, 0x04, 0x03, 0x04];
}

// =============================================================================
// HASH ALGORITHMS
// =============================================================================

/// Hash algorithm identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    /// SHA-256 (256 bits)
    Sha256,
    /// SHA-384 (384 bits)
    Sha384,
    /// SHA-512 (512 bits)
    Sha512,
}

impl HashAlgorithm {
    /// All supported algorithms
    pub const ALL: [HashAlgorithm; 3] = [Self::Sha256, Self::Sha384, Self::Sha512];

    /// Digest size in bytes
    pub const fn output_size(&self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }

    /// Algorithm name
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Sha256 => "SHA-256",
            Self::Sha384 => "SHA-384",
            Self::Sha512 => "SHA-512",
        }
    }

    /// Look up by `AlgorithmIdentifier` OID
    pub fn from_oid(id: &[u8]) -> Option<Self> {
        match id {
            oid::SHA256 => Some(Self::Sha256),
            oid::SHA384 => Some(Self::Sha384),
            oid::SHA512 => Some(Self::Sha512),
            _ => None,
        }
    }

    /// One-shot digest
    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        let mut hasher = Hasher::new(*self);
        hasher.update(data);
        hasher.finalize()
    }
}

/// Incremental hasher over any supported algorithm
#[derive(Clone)]
pub enum Hasher {
    /// SHA-256 state
    Sha256(Sha256),
    /// SHA-384 state
    Sha384(Sha384),
    /// SHA-512 state
    Sha512(Sha512),
}

impl Hasher {
    /// Start a new digest
    pub fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
            HashAlgorithm::Sha384 => Self::Sha384(Sha384::new()),
            HashAlgorithm::Sha512 => Self::Sha512(Sha512::new()),
        }
    }

    /// Feed data
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(data),
            Self::Sha384(h) => h.update(data),
            Self::Sha512(h) => h.update(data),
        }
    }

    /// Finish and return the digest bytes
    pub fn finalize(self) -> Vec<u8> {
        match self {
            Self::Sha256(h) => h.finalize().to_vec(),
            Self::Sha384(h) => h.finalize().to_vec(),
            Self::Sha512(h) => h.finalize().to_vec(),
        }
    }
}

/// Equality whose running time does not depend on where the inputs differ
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

// =============================================================================
// SIGNATURE ALGORITHMS
// =============================================================================

/// Signature algorithm identified by an OID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    /// RSASSA-PKCS1-v1_5
    RsaPkcs1(HashAlgorithm),
    /// ECDSA
    Ecdsa(HashAlgorithm),
    /// Anything else
    Unsupported,
}

impl SignatureAlgorithm {
    /// Map a signature algorithm OID
    ///
    /// `digest` is used for bare `rsaEncryption`, which PKCS#7 signer infos
    /// carry alongside a separate digest algorithm.
    pub fn from_oid(id: &[u8], digest: Option<HashAlgorithm>) -> Self {
        match id {
            oid::SHA256_RSA => Self::RsaPkcs1(HashAlgorithm::Sha256),
            oid::SHA384_RSA => Self::RsaPkcs1(HashAlgorithm::Sha384),
            oid::SHA512_RSA => Self::RsaPkcs1(HashAlgorithm::Sha512),
            oid::SHA256_ECDSA => Self::Ecdsa(HashAlgorithm::Sha256),
            oid::SHA384_ECDSA => Self::Ecdsa(HashAlgorithm::Sha384),
            oid::SHA512_ECDSA => Self::Ecdsa(HashAlgorithm::Sha512),
            oid::RSA_ENCRYPTION => digest.map_or(Self::Unsupported, Self::RsaPkcs1),
            _ => Self::Unsupported,
        }
    }

    /// Digest the signature is computed over
    pub fn hash(&self) -> Option<HashAlgorithm> {
        match self {
            Self::RsaPkcs1(h) | Self::Ecdsa(h) => Some(*h),
            Self::Unsupported => None,
        }
    }
}

// =============================================================================
// PUBLIC KEYS
// =============================================================================

/// Subject public key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicKey {
    /// RSA key
    Rsa(RsaPublicKey),
    /// ECDSA key on P-256
    EcP256(EcPublicKey),
    /// Well-formed key of an algorithm we cannot verify with
    Unsupported,
}

impl PublicKey {
    /// Parse a `SubjectPublicKeyInfo` element
    pub fn from_spki(spki: &Tlv<'_>) -> Result<Self, MalformedError> {
        if spki.tag != tag::SEQUENCE {
            return Err(MalformedError::UnexpectedTag {
                expected: tag::SEQUENCE,
                found: spki.tag,
            });
        }
        let mut seq = spki.reader();
        let mut algorithm = seq.read_sequence()?;
        let key_bits = seq.read(tag::BIT_STRING)?.bit_string()?;
        seq.finish()?;

        let key_oid = algorithm.read_oid()?;
        let key = match key_oid {
            oid::RSA_ENCRYPTION => Self::Rsa(RsaPublicKey::from_pkcs1(key_bits)?),
            oid::EC_PUBLIC_KEY => {
                let curve = algorithm.read_oid()?;
                if curve == oid::PRIME256V1 {
                    Self::EcP256(EcPublicKey::from_sec1(key_bits)?)
                } else {
                    Self::Unsupported
                }
            }
            _ => Self::Unsupported,
        };
        algorithm.skip_rest()?;

        Ok(key)
    }

    /// Parse DER-encoded `SubjectPublicKeyInfo` bytes
    pub fn from_spki_der(der: &[u8]) -> Result<Self, MalformedError> {
        let mut reader = DerReader::new(der);
        let spki = reader.read_any()?;
        reader.finish()?;
        Self::from_spki(&spki)
    }

    /// Verify `signature` over `message`
    ///
    /// Unsupported algorithms and mismatched key types verify as false.
    pub fn verify(&self, algorithm: SignatureAlgorithm, message: &[u8], signature: &[u8]) -> bool {
        match algorithm.hash() {
            Some(hash) => self.verify_digest(algorithm, &hash.digest(message), signature),
            None => false,
        }
    }

    /// Verify `signature` over an already computed digest
    pub fn verify_digest(
        &self,
        algorithm: SignatureAlgorithm,
        digest: &[u8],
        signature: &[u8],
    ) -> bool {
        match (self, algorithm) {
            (Self::Rsa(key), SignatureAlgorithm::RsaPkcs1(hash)) => {
                key.verify_pkcs1_v15(hash, digest, signature)
            }
            (Self::EcP256(key), SignatureAlgorithm::Ecdsa(_)) => {
                key.verify_prehash(digest, signature)
            }
            _ => false,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestKey;

    #[test]
    fn test_digest_sizes() {
        for alg in HashAlgorithm::ALL {
            assert_eq!(alg.digest(b"abc").len(), alg.output_size());
        }
        // FIPS 180-2 test vector
        assert_eq!(
            HashAlgorithm::Sha256.digest(b"abc")[..4],
            [0xba, 0x78, 0x16, 0xbf]
        );
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let mut hasher = Hasher::new(HashAlgorithm::Sha384);
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(hasher.finalize(), HashAlgorithm::Sha384.digest(b"hello world"));
    }

    #[test]
    fn test_ct_eq() {
        assert!(ct_eq(b"abc", b"abc"));
        assert!(!ct_eq(b"abc", b"abd"));
        assert!(!ct_eq(b"abc", b"ab"));
    }

    #[test]
    fn test_signature_oids() {
        assert_eq!(
            SignatureAlgorithm::from_oid(oid::SHA384_RSA, None),
            SignatureAlgorithm::RsaPkcs1(HashAlgorithm::Sha384)
        );
        assert_eq!(
            SignatureAlgorithm::from_oid(oid::RSA_ENCRYPTION, Some(HashAlgorithm::Sha256)),
            SignatureAlgorithm::RsaPkcs1(HashAlgorithm::Sha256)
        );
        assert_eq!(
            SignatureAlgorithm::from_oid(oid::RSA_ENCRYPTION, None),
            SignatureAlgorithm::Unsupported
        );
        assert_eq!(SignatureAlgorithm::from_oid(&[0x2a], None), SignatureAlgorithm::Unsupported);
    }

    #[test]
    fn test_spki_dispatch() {
        let key = TestKey::new(3);
        let public = PublicKey::from_spki_der(&key.spki()).unwrap();
        assert!(matches!(public, PublicKey::EcP256(_)));

        let algorithm = SignatureAlgorithm::Ecdsa(HashAlgorithm::Sha256);
        let signature = key.sign(b"message");
        assert!(public.verify(algorithm, b"message", &signature));
        assert!(!public.verify(algorithm, b"messages", &signature));
        let rsa = SignatureAlgorithm::RsaPkcs1(HashAlgorithm::Sha256);
        assert!(!public.verify(rsa, b"message", &signature));
        assert!(!public.verify(SignatureAlgorithm::Unsupported, b"message", &signature));
    }
}
