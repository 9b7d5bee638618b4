//! PKCS#7 / CMS SignedData
//!
//! Parses the signed-data envelope carried in a WIN_CERTIFICATE or as a
//! detached signature, including the Authenticode `SpcIndirectDataContent`
//! that binds a PE image digest.

use alloc::vec::Vec;

use crate::crypto::{ct_eq, oid as alg_oid, HashAlgorithm, SignatureAlgorithm};
use crate::der::{tag, DerReader, Tlv};
use crate::error::MalformedError;
use crate::x509::Certificate;

/// Object identifiers used by signed data
pub mod oid {
    /// id-data: 1.2.840.113549.1.7.1
    pub const DATA: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x01];
    /// id-signedData: 1.2.840.113549.1.7.2
    pub const SIGNED_DATA: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x07, 0x02];
    /// contentType attribute: 1.2.840.113549.1.9.3
    pub const CONTENT_TYPE: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x09, 0x03];
    /// messageDigest attribute: 1.2.840.113549.1.9.4
    pub const MESSAGE_DIGEST: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x01, 0x09, 0x04];
    /// SPC_INDIRECT_DATA_OBJID: 1.3.6.1.4.1.311.2.1.4
    pub const SPC_INDIRECT_DATA: &[u8] =
        &[0x2b, 0x06, 0x01, 0x04, 0x01, 0x82, 0x37, 0x02, 0x01, 0x04];
}

/// Most certificates accepted in one envelope
pub const MAX_CERTIFICATES: usize = 32;

/// Most signers accepted in one envelope
pub const MAX_SIGNERS: usize = 8;

/// One `SignerInfo`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerInfo {
    /// Issuer of the signing certificate (raw DER Name)
    pub issuer: Vec<u8>,
    /// Serial of the signing certificate
    pub serial: Vec<u8>,
    /// Digest algorithm, `None` if unsupported
    pub digest_algorithm: Option<HashAlgorithm>,
    /// Signed attributes re-encoded as `SET OF` for hashing
    pub signed_attributes: Option<Vec<u8>>,
    /// Value of the messageDigest attribute
    pub message_digest: Option<Vec<u8>>,
    /// Value of the contentType attribute
    pub content_type: Option<Vec<u8>>,
    /// Signature algorithm
    pub signature_algorithm: SignatureAlgorithm,
    /// Signature value
    pub signature: Vec<u8>,
}

impl SignerInfo {
    /// Locate the signing certificate among `candidates`
    pub fn find_certificate<'c>(&self, candidates: &'c [Certificate]) -> Option<&'c Certificate> {
        candidates
            .iter()
            .find(|cert| cert.matches_issuer_serial(&self.issuer, &self.serial))
    }
}

/// Authenticode `SpcIndirectDataContent` digest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndirectDigest {
    /// Algorithm of the image digest
    pub algorithm: HashAlgorithm,
    /// Image digest the signer vouched for
    pub digest: Vec<u8>,
}

/// Parsed SignedData
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedData {
    /// eContentType OID
    pub content_type: Vec<u8>,
    /// eContent octets the signers' messageDigest covers, `None` when detached
    pub content: Option<Vec<u8>>,
    /// Embedded certificates
    pub certificates: Vec<Certificate>,
    /// Signers
    pub signers: Vec<SignerInfo>,
}

impl SignedData {
    /// Parse a DER `ContentInfo` wrapping SignedData
    pub fn from_der(der: &[u8]) -> Result<Self, MalformedError> {
        let mut reader = DerReader::new(der);
        let mut content_info = reader.read_sequence()?;
        reader.finish()?;

        if content_info.read_oid()? != oid::SIGNED_DATA {
            return Err(MalformedError::InvalidSignedData);
        }
        let explicit = content_info.read(tag::context(0))?;
        content_info.finish()?;

        let mut wrapper = explicit.reader();
        let signed_data = wrapper.read_sequence()?;
        wrapper.finish()?;
        parse_signed_data(signed_data)
    }

    /// The Authenticode image digest, if the content is `SpcIndirectDataContent`
    /// and names a supported digest algorithm
    pub fn indirect_digest(&self) -> Result<Option<IndirectDigest>, MalformedError> {
        if self.content_type != oid::SPC_INDIRECT_DATA {
            return Ok(None);
        }
        let content = self.content.as_deref().ok_or(MalformedError::InvalidSignedData)?;

        // content holds the SEQUENCE body: { SpcAttributeTypeAndOptionalValue, DigestInfo }
        let mut body = DerReader::new(content);
        body.read(tag::SEQUENCE)?;
        let mut digest_info = body.read_sequence()?;
        body.finish()?;

        let mut algorithm = digest_info.read_sequence()?;
        let id = algorithm.read_oid()?;
        algorithm.skip_rest()?;
        let digest = digest_info.read(tag::OCTET_STRING)?.content;
        digest_info.finish()?;

        // An unknown digest binds nothing, so its signers stay untrusted
        let Some(algorithm) = HashAlgorithm::from_oid(id) else {
            return Ok(None);
        };
        if digest.len() != algorithm.output_size() {
            return Err(MalformedError::InvalidSignedData);
        }
        Ok(Some(IndirectDigest {
            algorithm,
            digest: digest.to_vec(),
        }))
    }

    /// Check one signer's signature with `certificate`'s key
    ///
    /// `detached` supplies the signed content when the envelope carries none.
    pub fn verify_signer(
        &self,
        signer: &SignerInfo,
        certificate: &Certificate,
        detached: Option<&[u8]>,
    ) -> bool {
        let Some(digest_algorithm) = signer.digest_algorithm else {
            return false;
        };
        let Some(content) = self.content.as_deref().or(detached) else {
            return false;
        };

        match &signer.signed_attributes {
            Some(attributes) => {
                let Some(message_digest) = &signer.message_digest else {
                    return false;
                };
                if !ct_eq(message_digest, &digest_algorithm.digest(content)) {
                    return false;
                }
                if signer
                    .content_type
                    .as_deref()
                    .is_some_and(|ct| ct != self.content_type.as_slice())
                {
                    return false;
                }
                certificate
                    .public_key
                    .verify(signer.signature_algorithm, attributes, &signer.signature)
            }
            None => certificate
                .public_key
                .verify(signer.signature_algorithm, content, &signer.signature),
        }
    }
}

fn parse_signed_data(mut seq: DerReader<'_>) -> Result<SignedData, MalformedError> {
    let version = seq.read(tag::INTEGER)?.small_integer()?;
    if !(1..=5).contains(&version) {
        return Err(MalformedError::InvalidSignedData);
    }
    seq.read(tag::SET)?.reader().skip_rest()?;

    // EncapsulatedContentInfo ::= SEQUENCE { eContentType, [0] EXPLICIT eContent OPTIONAL }
    let mut encap = seq.read_sequence()?;
    let content_type = encap.read_oid()?.to_vec();
    let content = match encap.read_optional(tag::context(0))? {
        Some(explicit) => {
            let mut wrapper = explicit.reader();
            let inner = wrapper.read_any()?;
            wrapper.finish()?;
            Some(inner.content.to_vec())
        }
        None => None,
    };
    encap.finish()?;

    let mut certificates = Vec::new();
    if let Some(set) = seq.read_optional(tag::context(0))? {
        let mut reader = set.reader();
        while !reader.is_empty() {
            let tlv = reader.read_any()?;
            // Attribute certificates and other choices are skipped
            if tlv.tag != tag::SEQUENCE {
                continue;
            }
            if certificates.len() == MAX_CERTIFICATES {
                return Err(MalformedError::InvalidSignedData);
            }
            certificates.push(Certificate::from_tlv(&tlv)?);
        }
    }
    seq.read_optional(tag::context(1))?;

    let mut signers = Vec::new();
    let mut signer_set = seq.read(tag::SET)?.reader();
    while !signer_set.is_empty() {
        if signers.len() == MAX_SIGNERS {
            return Err(MalformedError::InvalidSignedData);
        }
        signers.push(parse_signer_info(signer_set.read_sequence()?)?);
    }
    seq.finish()?;

    if signers.is_empty() {
        return Err(MalformedError::InvalidSignedData);
    }

    Ok(SignedData {
        content_type,
        content,
        certificates,
        signers,
    })
}

fn parse_signer_info(mut seq: DerReader<'_>) -> Result<SignerInfo, MalformedError> {
    let version = seq.read(tag::INTEGER)?.small_integer()?;
    if version != 1 {
        // v3 subjectKeyIdentifier signers are not used for code signing
        return Err(MalformedError::InvalidSignedData);
    }

    let mut sid = seq.read_sequence()?;
    let issuer = sid.read(tag::SEQUENCE)?.raw.to_vec();
    let serial = sid.read(tag::INTEGER)?.unsigned_integer()?.to_vec();
    sid.finish()?;

    let mut digest_alg = seq.read_sequence()?;
    let digest_algorithm = HashAlgorithm::from_oid(digest_alg.read_oid()?);
    digest_alg.skip_rest()?;

    let mut signed_attributes = None;
    let mut message_digest = None;
    let mut content_type = None;
    if let Some(attrs) = seq.read_optional(tag::context(0))? {
        let parsed = parse_attributes(&attrs)?;
        message_digest = parsed.0;
        content_type = parsed.1;

        // Signed over the explicit SET OF encoding, not the [0] implicit tag
        let mut encoded = attrs.raw.to_vec();
        encoded[0] = tag::SET;
        signed_attributes = Some(encoded);
    }

    let mut sig_alg = seq.read_sequence()?;
    let sig_oid = sig_alg.read_oid()?;
    sig_alg.skip_rest()?;
    let signature_algorithm = match sig_oid {
        alg_oid::EC_PUBLIC_KEY => {
            digest_algorithm.map_or(SignatureAlgorithm::Unsupported, SignatureAlgorithm::Ecdsa)
        }
        other => SignatureAlgorithm::from_oid(other, digest_algorithm),
    };

    let signature = seq.read(tag::OCTET_STRING)?.content.to_vec();
    seq.read_optional(tag::context(1))?;
    seq.finish()?;

    Ok(SignerInfo {
        issuer,
        serial,
        digest_algorithm,
        signed_attributes,
        message_digest,
        content_type,
        signature_algorithm,
        signature,
    })
}

/// Extract messageDigest and contentType from a signed attribute set
fn parse_attributes(attrs: &Tlv<'_>) -> Result<(Option<Vec<u8>>, Option<Vec<u8>>), MalformedError> {
    let mut message_digest = None;
    let mut content_type = None;

    let mut reader = attrs.reader();
    while !reader.is_empty() {
        let mut attribute = reader.read_sequence()?;
        let id = attribute.read_oid()?;
        let mut values = attribute.read(tag::SET)?.reader();
        attribute.finish()?;

        match id {
            oid::MESSAGE_DIGEST => {
                let value = values.read(tag::OCTET_STRING)?.content;
                values.finish()?;
                if message_digest.replace(value.to_vec()).is_some() {
                    return Err(MalformedError::InvalidSignedData);
                }
            }
            oid::CONTENT_TYPE => {
                let value = values.read_oid()?;
                values.finish()?;
                if content_type.replace(value.to_vec()).is_some() {
                    return Err(MalformedError::InvalidSignedData);
                }
            }
            _ => values.skip_rest()?,
        }
    }

    Ok((message_digest, content_type))
}

// =============================================================================
// TESTS
// =============================================================================
