//! X.509 Certificates
//!
//! Parses the subset of RFC 5280 needed to build a code-signing chain:
//! names are kept as raw DER for byte-exact issuer/subject matching, and only
//! the basicConstraints and keyUsage extensions are interpreted.

use alloc::vec::Vec;

use crate::crypto::{PublicKey, SignatureAlgorithm};
use crate::der::{tag, DerReader, Tlv};
use crate::error::MalformedError;
use crate::time::civil_to_unix;

/// Extension OIDs
mod ext_oid {
    /// keyUsage: 2.5.29.15
    pub const KEY_USAGE: &[u8] = &[0x55, 0x1d, 0x0f];
    /// basicConstraints: 2.5.29.19
    pub const BASIC_CONSTRAINTS: &[u8] = &[0x55, 0x1d, 0x13];
}

/// Key usage flags (first two octets of the BIT STRING, big-endian)
pub mod key_usage {
    /// digitalSignature
    pub const DIGITAL_SIGNATURE: u16 = 0x8000;
    /// keyCertSign
    pub const KEY_CERT_SIGN: u16 = 0x0400;
}

/// Validity window in Unix seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Validity {
    /// Not before (inclusive)
    pub not_before: i64,
    /// Not after (inclusive)
    pub not_after: i64,
}

impl Validity {
    /// Check if `time` falls within the window
    pub fn contains(&self, time: i64) -> bool {
        time >= self.not_before && time <= self.not_after
    }
}

/// Parsed X.509 certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    /// Full DER encoding
    raw: Vec<u8>,
    /// TBSCertificate encoding (signed bytes)
    tbs: Vec<u8>,
    /// Version (0 = v1, 2 = v3)
    pub version: u32,
    /// Serial number magnitude
    pub serial: Vec<u8>,
    /// Issuer Name (raw DER)
    pub issuer: Vec<u8>,
    /// Subject Name (raw DER)
    pub subject: Vec<u8>,
    /// Validity window
    pub validity: Validity,
    /// Subject public key
    pub public_key: PublicKey,
    /// Algorithm the issuer signed with
    pub signature_algorithm: SignatureAlgorithm,
    /// Issuer signature
    pub signature: Vec<u8>,
    /// basicConstraints cA flag, `None` if the extension is absent
    pub basic_constraints_ca: Option<bool>,
    /// keyUsage flags, `None` if the extension is absent
    pub key_usage: Option<u16>,
}

impl Certificate {
    /// Parse a DER certificate, rejecting trailing bytes
    pub fn from_der(der: &[u8]) -> Result<Self, MalformedError> {
        let mut reader = DerReader::new(der);
        let cert = reader.read(tag::SEQUENCE)?;
        reader.finish()?;
        parse_certificate(&cert)
    }

    /// Parse the next certificate from a reader (PKCS#7 certificate sets)
    pub fn from_tlv(tlv: &Tlv<'_>) -> Result<Self, MalformedError> {
        parse_certificate(tlv)
    }

    /// DER encoding
    pub fn der(&self) -> &[u8] {
        &self.raw
    }

    /// Signed portion
    pub fn tbs(&self) -> &[u8] {
        &self.tbs
    }

    /// Check if subject and issuer are the same name
    pub fn is_self_issued(&self) -> bool {
        self.issuer == self.subject
    }

    /// Check if certificate may issue other certificates
    pub fn is_ca(&self) -> bool {
        self.basic_constraints_ca == Some(true)
            && self.key_usage.map_or(true, |ku| ku & key_usage::KEY_CERT_SIGN != 0)
    }

    /// Check if certificate is valid at given time
    pub fn is_valid_at(&self, time: i64) -> bool {
        self.validity.contains(time)
    }

    /// Check if `issuer` names and signs this certificate
    pub fn is_signed_by(&self, issuer: &Certificate) -> bool {
        self.issuer == issuer.subject
            && issuer
                .public_key
                .verify(self.signature_algorithm, &self.tbs, &self.signature)
    }

    /// Check if this is the certificate named by `IssuerAndSerialNumber`
    pub fn matches_issuer_serial(&self, issuer: &[u8], serial: &[u8]) -> bool {
        self.issuer == issuer && self.serial == serial
    }
}

fn parse_certificate(cert: &Tlv<'_>) -> Result<Certificate, MalformedError> {
    if cert.tag != tag::SEQUENCE {
        return Err(MalformedError::InvalidCertificate);
    }

    // Certificate ::= SEQUENCE { tbsCertificate, signatureAlgorithm, signatureValue }
    let mut outer = cert.reader();
    let tbs = outer.read(tag::SEQUENCE)?;
    let mut outer_alg = outer.read_sequence()?;
    let signature = outer.read(tag::BIT_STRING)?.bit_string()?;
    outer.finish()?;
    let outer_oid = outer_alg.read_oid()?;
    outer_alg.skip_rest()?;

    let mut body = tbs.reader();

    // Version (optional, context tag 0)
    let version = match body.read_optional(tag::context(0))? {
        Some(explicit) => {
            let mut inner = explicit.reader();
            let version = inner.read(tag::INTEGER)?.small_integer()?;
            inner.finish()?;
            if version > 2 {
                return Err(MalformedError::InvalidCertificate);
            }
            version
        }
        None => 0,
    };

    let serial = body.read(tag::INTEGER)?.unsigned_integer()?;

    // The inner algorithm must repeat the outer one
    let mut inner_alg = body.read_sequence()?;
    if inner_alg.read_oid()? != outer_oid {
        return Err(MalformedError::InvalidCertificate);
    }
    inner_alg.skip_rest()?;

    let issuer = body.read(tag::SEQUENCE)?;
    let validity = parse_validity(body.read_sequence()?)?;
    let subject = body.read(tag::SEQUENCE)?;
    let public_key = PublicKey::from_spki(&body.read(tag::SEQUENCE)?)?;

    body.read_optional(tag::context_primitive(1))?;
    body.read_optional(tag::context_primitive(2))?;

    let mut basic_constraints_ca = None;
    let mut key_usage = None;
    if let Some(explicit) = body.read_optional(tag::context(3))? {
        if version != 2 {
            return Err(MalformedError::InvalidCertificate);
        }
        let mut wrapper = explicit.reader();
        let mut extensions = wrapper.read_sequence()?;
        wrapper.finish()?;

        while !extensions.is_empty() {
            let mut extension = extensions.read_sequence()?;
            let id = extension.read_oid()?;
            if let Some(critical) = extension.read_optional(tag::BOOLEAN)? {
                critical.boolean()?;
            }
            let value = extension.read(tag::OCTET_STRING)?.content;
            extension.finish()?;

            match id {
                ext_oid::BASIC_CONSTRAINTS => {
                    basic_constraints_ca = Some(parse_basic_constraints(value)?);
                }
                ext_oid::KEY_USAGE => key_usage = Some(parse_key_usage(value)?),
                _ => {}
            }
        }
    }
    body.finish()?;

    Ok(Certificate {
        raw: cert.raw.to_vec(),
        tbs: tbs.raw.to_vec(),
        version,
        serial: serial.to_vec(),
        issuer: issuer.raw.to_vec(),
        subject: subject.raw.to_vec(),
        validity,
        public_key,
        signature_algorithm: SignatureAlgorithm::from_oid(outer_oid, None),
        signature: signature.to_vec(),
        basic_constraints_ca,
        key_usage,
    })
}

/// Parse `Validity ::= SEQUENCE { notBefore Time, notAfter Time }`
fn parse_validity(mut seq: DerReader<'_>) -> Result<Validity, MalformedError> {
    let not_before = parse_time(&seq.read_any()?)?;
    let not_after = parse_time(&seq.read_any()?)?;
    seq.finish()?;
    Ok(Validity { not_before, not_after })
}

/// Parse UTCTime `YYMMDDHHMMSSZ` or GeneralizedTime `YYYYMMDDHHMMSSZ`
fn parse_time(tlv: &Tlv<'_>) -> Result<i64, MalformedError> {
    let (year, rest) = match (tlv.tag, tlv.content.len()) {
        (tag::UTC_TIME, 13) => {
            let yy = i64::from(two_digits(&tlv.content[0..2])?);
            // RFC 5280: 50..99 means 19YY
            let year = if yy >= 50 { 1900 + yy } else { 2000 + yy };
            (year, &tlv.content[2..])
        }
        (tag::GENERALIZED_TIME, 15) => {
            let hi = i64::from(two_digits(&tlv.content[0..2])?);
            let lo = i64::from(two_digits(&tlv.content[2..4])?);
            (hi * 100 + lo, &tlv.content[4..])
        }
        _ => return Err(MalformedError::InvalidValue),
    };

    if rest[10] != b'Z' {
        return Err(MalformedError::InvalidValue);
    }

    civil_to_unix(
        year,
        two_digits(&rest[0..2])?,
        two_digits(&rest[2..4])?,
        two_digits(&rest[4..6])?,
        two_digits(&rest[6..8])?,
        two_digits(&rest[8..10])?,
    )
    .ok_or(MalformedError::InvalidValue)
}

fn two_digits(ascii: &[u8]) -> Result<u8, MalformedError> {
    match ascii {
        [a @ b'0'..=b'9', b @ b'0'..=b'9'] => Ok((a - b'0') * 10 + (b - b'0')),
        _ => Err(MalformedError::InvalidValue),
    }
}

/// `BasicConstraints ::= SEQUENCE { cA BOOLEAN DEFAULT FALSE, pathLen INTEGER OPTIONAL }`
fn parse_basic_constraints(value: &[u8]) -> Result<bool, MalformedError> {
    let mut outer = DerReader::new(value);
    let mut seq = outer.read_sequence()?;
    outer.finish()?;
    let ca = match seq.read_optional(tag::BOOLEAN)? {
        Some(flag) => flag.boolean()?,
        None => false,
    };
    seq.read_optional(tag::INTEGER)?;
    seq.finish()?;
    Ok(ca)
}

/// keyUsage is a named BIT STRING and may carry unused bits
fn parse_key_usage(value: &[u8]) -> Result<u16, MalformedError> {
    let mut outer = DerReader::new(value);
    let bits = outer.read(tag::BIT_STRING)?;
    outer.finish()?;
    match bits.content {
        [unused, first, rest @ ..] if *unused < 8 => {
            let second = rest.first().copied().unwrap_or(0);
            Ok(u16::from_be_bytes([*first, second]))
        }
        _ => Err(MalformedError::InvalidValue),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::HashAlgorithm;
    use crate::testutil::{CertBuilder, TestKey};

    #[test]
    fn test_parse_self_signed() {
        let key = TestKey::new(1);
        let der = CertBuilder::new("Root CA", &key).ca().serial(&[0x05]).build(&key, "Root CA");
        let cert = Certificate::from_der(&der).unwrap();

        assert_eq!(cert.version, 2);
        assert_eq!(cert.serial, &[0x05]);
        assert!(cert.is_self_issued());
        assert!(cert.is_ca());
        assert_eq!(cert.der(), der.as_slice());
        assert_eq!(
            cert.signature_algorithm,
            SignatureAlgorithm::Ecdsa(HashAlgorithm::Sha256)
        );
        assert!(cert.is_signed_by(&cert));
    }

    #[test]
    fn test_issuer_link() {
        let root_key = TestKey::new(1);
        let leaf_key = TestKey::new(2);
        let root_der = CertBuilder::new("Root CA", &root_key).ca().build(&root_key, "Root CA");
        let root = Certificate::from_der(&root_der).unwrap();
        let leaf_der = CertBuilder::new("Signer", &leaf_key).build(&root_key, "Root CA");
        let leaf = Certificate::from_der(&leaf_der).unwrap();

        assert!(!leaf.is_ca());
        assert_eq!(leaf.issuer, root.subject);
        assert!(leaf.is_signed_by(&root));
        assert!(!leaf.is_signed_by(&leaf));

        // Right name, wrong key
        let impostor_key = TestKey::new(3);
        let impostor = Certificate::from_der(
            &CertBuilder::new("Root CA", &impostor_key).ca().build(&impostor_key, "Root CA"),
        )
        .unwrap();
        assert!(!leaf.is_signed_by(&impostor));
    }

    #[test]
    fn test_validity_times() {
        let key = TestKey::new(1);
        let der = CertBuilder::new("Dated", &key)
            .validity(b"200101000000Z", b"20491231235959Z")
            .build(&key, "Dated");
        let cert = Certificate::from_der(&der).unwrap();
        assert_eq!(cert.validity.not_before, 1_577_836_800);
        assert_eq!(cert.validity.not_after, 2_524_607_999);
        assert!(cert.is_valid_at(1_700_000_000));
        assert!(!cert.is_valid_at(1_500_000_000));
    }

    #[test]
    fn test_utc_time_century() {
        let early = Tlv {
            tag: tag::UTC_TIME,
            content: b"500101000000Z",
            raw: &[],
        };
        assert_eq!(parse_time(&early).unwrap(), -631_152_000);
        let bad = Tlv {
            tag: tag::UTC_TIME,
            content: b"5001010000000",
            raw: &[],
        };
        assert!(parse_time(&bad).is_err());
    }

    #[test]
    fn test_rejects_trailing_and_truncated() {
        let key = TestKey::new(1);
        let mut der = CertBuilder::new("Root CA", &key).build(&key, "Root CA");
        der.push(0);
        assert_eq!(Certificate::from_der(&der), Err(MalformedError::TrailingData));
        der.truncate(der.len() - 10);
        assert!(Certificate::from_der(&der).is_err());
    }
}
