//! Test fixtures
//!
//! A minimal DER writer plus builders for the inputs the engine consumes:
//! P-256 keys, X.509 certificates, PKCS#7 envelopes and PE images. Keys are
//! real, so every signature produced here verifies through the production
//! code paths.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use p256::ecdsa::signature::hazmat::PrehashSigner;
use p256::ecdsa::{Signature, SigningKey};

use crate::crypto::{oid as alg_oid, HashAlgorithm};
use crate::der::tag;
use crate::image::SignedImage;
use crate::pkcs7::oid as p7_oid;
use crate::x509::Certificate;

// =============================================================================
// DER WRITER
// =============================================================================

/// Encode one element
pub(crate) fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
    let len = content.len();
    let mut out = vec![tag];
    if len < 0x80 {
        out.push(len as u8);
    } else if len < 0x100 {
        out.extend_from_slice(&[0x81, len as u8]);
    } else if len < 0x1_0000 {
        out.extend_from_slice(&[0x82, (len >> 8) as u8, len as u8]);
    } else {
        out.extend_from_slice(&[0x83, (len >> 16) as u8, (len >> 8) as u8, len as u8]);
    }
    out.extend_from_slice(content);
    out
}

pub(crate) fn seq(parts: &[&[u8]]) -> Vec<u8> {
    tlv(tag::SEQUENCE, &parts.concat())
}

pub(crate) fn set(parts: &[&[u8]]) -> Vec<u8> {
    tlv(tag::SET, &parts.concat())
}

pub(crate) fn oid(id: &[u8]) -> Vec<u8> {
    tlv(tag::OID, id)
}

pub(crate) fn octets(data: &[u8]) -> Vec<u8> {
    tlv(tag::OCTET_STRING, data)
}

pub(crate) fn bits(data: &[u8]) -> Vec<u8> {
    let mut content = vec![0u8];
    content.extend_from_slice(data);
    tlv(tag::BIT_STRING, &content)
}

pub(crate) fn explicit(n: u8, inner: &[u8]) -> Vec<u8> {
    tlv(tag::context(n), inner)
}

/// Non-negative INTEGER from a big-endian magnitude
pub(crate) fn integer(magnitude: &[u8]) -> Vec<u8> {
    let start = magnitude.iter().position(|&b| b != 0).unwrap_or(magnitude.len().saturating_sub(1));
    let trimmed = if magnitude.is_empty() { &[0u8][..] } else { &magnitude[start..] };
    let mut content = Vec::with_capacity(trimmed.len() + 1);
    if trimmed[0] & 0x80 != 0 {
        content.push(0);
    }
    content.extend_from_slice(trimmed);
    tlv(tag::INTEGER, &content)
}

/// `Name` with a single commonName
pub(crate) fn name(common_name: &str) -> Vec<u8> {
    const COMMON_NAME: &[u8] = &[0x55, 0x04, 0x03];
    const UTF8_STRING: u8 = 0x0c;
    seq(&[&set(&[&seq(&[&oid(COMMON_NAME), &tlv(UTF8_STRING, common_name.as_bytes())])])])
}

fn null() -> Vec<u8> {
    tlv(tag::NULL, &[])
}

// =============================================================================
// KEYS
// =============================================================================

/// Deterministic P-256 signing key
#[derive(Clone)]
pub(crate) struct TestKey {
    signing: SigningKey,
}

impl TestKey {
    /// Key derived from a one-byte seed
    pub(crate) fn new(seed: u8) -> Self {
        let mut scalar = [0x5a; 32];
        scalar[0] = 0x01;
        scalar[31] = seed;
        Self {
            signing: SigningKey::from_slice(&scalar).expect("scalar in range"),
        }
    }

    /// Uncompressed SEC1 public point
    pub(crate) fn public_point(&self) -> Vec<u8> {
        self.signing.verifying_key().to_encoded_point(false).as_bytes().to_vec()
    }

    /// DER `SubjectPublicKeyInfo`
    pub(crate) fn spki(&self) -> Vec<u8> {
        seq(&[
            &seq(&[&oid(alg_oid::EC_PUBLIC_KEY), &oid(alg_oid::PRIME256V1)]),
            &bits(&self.public_point()),
        ])
    }

    /// DER `Ecdsa-Sig-Value` over a digest
    pub(crate) fn sign_digest(&self, digest: &[u8]) -> Vec<u8> {
        let signature: Signature = self.signing.sign_prehash(digest).expect("prehash signing");
        let raw = signature.to_bytes();
        seq(&[&integer(&raw[..32]), &integer(&raw[32..])])
    }

    /// ecdsa-with-SHA256 signature over a message
    pub(crate) fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.sign_digest(&HashAlgorithm::Sha256.digest(message))
    }
}

// =============================================================================
// CERTIFICATES
// =============================================================================

/// X.509 v3 certificate builder
pub(crate) struct CertBuilder {
    subject: String,
    spki: Vec<u8>,
    ca: bool,
    serial: Option<Vec<u8>>,
    not_before: Vec<u8>,
    not_after: Vec<u8>,
}

impl CertBuilder {
    pub(crate) fn new(subject: &str, key: &TestKey) -> Self {
        Self {
            subject: String::from(subject),
            spki: key.spki(),
            ca: false,
            serial: None,
            not_before: b"200101000000Z".to_vec(),
            not_after: b"20491231235959Z".to_vec(),
        }
    }

    /// Mark as CA (basicConstraints cA, keyUsage keyCertSign)
    pub(crate) fn ca(mut self) -> Self {
        self.ca = true;
        self
    }

    pub(crate) fn serial(mut self, serial: &[u8]) -> Self {
        self.serial = Some(serial.to_vec());
        self
    }

    /// UTCTime (13 chars) or GeneralizedTime (15 chars) bounds
    pub(crate) fn validity(mut self, not_before: &[u8], not_after: &[u8]) -> Self {
        self.not_before = not_before.to_vec();
        self.not_after = not_after.to_vec();
        self
    }

    /// Sign with `issuer_key` under `issuer_name`
    pub(crate) fn build(&self, issuer_key: &TestKey, issuer_name: &str) -> Vec<u8> {
        let serial = self.serial.clone().unwrap_or_else(|| {
            let mut seed = self.subject.as_bytes().to_vec();
            seed.extend_from_slice(&self.spki);
            seed.extend_from_slice(issuer_name.as_bytes());
            let mut serial = HashAlgorithm::Sha256.digest(&seed)[..8].to_vec();
            serial[0] = (serial[0] & 0x7f) | 0x01;
            serial
        });

        let time = |value: &[u8]| {
            let t = if value.len() == 13 { tag::UTC_TIME } else { tag::GENERALIZED_TIME };
            tlv(t, value)
        };

        let extensions = if self.ca {
            let basic_constraints = seq(&[
                &oid(&[0x55, 0x1d, 0x13]),
                &[0x01, 0x01, 0xff],
                &octets(&seq(&[&[0x01, 0x01, 0xff]])),
            ]);
            // keyCertSign | cRLSign
            seq(&[&basic_constraints, &key_usage(&[0x03, 0x02, 0x01, 0x06])])
        } else {
            // digitalSignature
            seq(&[&key_usage(&[0x03, 0x02, 0x07, 0x80])])
        };

        let algorithm = seq(&[&oid(alg_oid::SHA256_ECDSA)]);
        let tbs = seq(&[
            &explicit(0, &integer(&[2])),
            &integer(&serial),
            &algorithm,
            &name(issuer_name),
            &seq(&[&time(&self.not_before), &time(&self.not_after)]),
            &name(&self.subject),
            &self.spki,
            &explicit(3, &extensions),
        ]);
        let signature = issuer_key.sign(&tbs);
        seq(&[&tbs, &algorithm, &bits(&signature)])
    }
}

/// Critical keyUsage extension around an encoded BIT STRING
fn key_usage(usage: &[u8]) -> Vec<u8> {
    seq(&[&oid(&[0x55, 0x1d, 0x0f]), &[0x01, 0x01, 0xff], &octets(usage)])
}

/// Self-signed CA certificate
pub(crate) fn self_signed(seed: u8, subject: &str) -> Certificate {
    let key = TestKey::new(seed);
    let der = CertBuilder::new(subject, &key).ca().build(&key, subject);
    Certificate::from_der(&der).expect("valid certificate")
}

// =============================================================================
// SIGNED DATA
// =============================================================================

/// sha1: 1.3.14.3.2.26
pub(crate) const SHA1_OID: &[u8] = &[0x2b, 0x0e, 0x03, 0x02, 0x1a];
/// md5: 1.2.840.113549.2.5
const MD5_OID: &[u8] = &[0x2a, 0x86, 0x48, 0x86, 0xf7, 0x0d, 0x02, 0x05];
/// SPC_PE_IMAGE_DATAOBJ: 1.3.6.1.4.1.311.2.1.15
const SPC_PE_IMAGE_DATA: &[u8] = &[0x2b, 0x06, 0x01, 0x04, 0x01, 0x82, 0x37, 0x02, 0x01, 0x0f];

struct TestSigner {
    key: TestKey,
    certificate: Certificate,
    embed: bool,
}

/// PKCS#7 SignedData builder (ecdsa-with-SHA256 signers)
pub(crate) struct SignedDataBuilder {
    content_type: Vec<u8>,
    /// Body of the SEQUENCE carried in eContent
    encapsulated: Option<Vec<u8>>,
    signers: Vec<TestSigner>,
    extra_certificates: Vec<Vec<u8>>,
    digest_oid: Vec<u8>,
}

impl SignedDataBuilder {
    /// id-data envelope whose content travels separately
    pub(crate) fn detached() -> Self {
        Self {
            content_type: p7_oid::DATA.to_vec(),
            encapsulated: None,
            signers: Vec::new(),
            extra_certificates: Vec::new(),
            digest_oid: alg_oid::SHA256.to_vec(),
        }
    }

    /// Authenticode envelope binding an image digest
    pub(crate) fn authenticode(algorithm: HashAlgorithm, digest: &[u8]) -> Self {
        let algorithm_oid = match algorithm {
            HashAlgorithm::Sha256 => alg_oid::SHA256,
            HashAlgorithm::Sha384 => alg_oid::SHA384,
            HashAlgorithm::Sha512 => alg_oid::SHA512,
        };
        Self::authenticode_oid(algorithm_oid, digest)
    }

    /// Authenticode envelope whose DigestInfo names `algorithm_oid`
    pub(crate) fn authenticode_oid(algorithm_oid: &[u8], digest: &[u8]) -> Self {
        let attribute = seq(&[&oid(SPC_PE_IMAGE_DATA), &seq(&[])]);
        let digest_info = seq(&[&seq(&[&oid(algorithm_oid), &null()]), &octets(digest)]);
        Self {
            content_type: p7_oid::SPC_INDIRECT_DATA.to_vec(),
            encapsulated: Some([attribute, digest_info].concat()),
            ..Self::detached()
        }
    }

    /// Signer whose certificate is embedded
    pub(crate) fn signer(mut self, key: &TestKey, certificate: &Certificate) -> Self {
        self.signers.push(TestSigner {
            key: key.clone(),
            certificate: certificate.clone(),
            embed: true,
        });
        self
    }

    /// Signer whose certificate must come from the trust store
    pub(crate) fn external_signer(mut self, key: &TestKey, certificate: &Certificate) -> Self {
        self.signers.push(TestSigner {
            key: key.clone(),
            certificate: certificate.clone(),
            embed: false,
        });
        self
    }

    /// Additional embedded certificate (intermediates)
    pub(crate) fn certificate(mut self, der: &[u8]) -> Self {
        self.extra_certificates.push(der.to_vec());
        self
    }

    /// Declare a digest algorithm the verifier does not support
    pub(crate) fn unsupported_digest(mut self) -> Self {
        self.digest_oid = MD5_OID.to_vec();
        self
    }

    /// Encode; `content` is signed when the envelope is detached
    pub(crate) fn build(&self, content: &[u8]) -> Vec<u8> {
        let signed_content = self.encapsulated.as_deref().unwrap_or(content);
        let message_digest = HashAlgorithm::Sha256.digest(signed_content);

        let attributes = [
            seq(&[&oid(p7_oid::CONTENT_TYPE), &set(&[&oid(&self.content_type)])]),
            seq(&[&oid(p7_oid::MESSAGE_DIGEST), &set(&[&octets(&message_digest)])]),
        ]
        .concat();
        let signed_attributes = tlv(tag::SET, &attributes);
        let digest_algorithm = seq(&[&oid(&self.digest_oid), &null()]);

        let signer_infos: Vec<Vec<u8>> = self
            .signers
            .iter()
            .map(|signer| {
                let cert = &signer.certificate;
                seq(&[
                    &integer(&[1]),
                    &seq(&[&cert.issuer, &integer(&cert.serial)]),
                    &digest_algorithm,
                    &explicit(0, &attributes),
                    &seq(&[&oid(alg_oid::SHA256_ECDSA)]),
                    &octets(&signer.key.sign(&signed_attributes)),
                ])
            })
            .collect();

        let encapsulated = match &self.encapsulated {
            Some(body) => seq(&[&oid(&self.content_type), &explicit(0, &seq(&[body]))]),
            None => seq(&[&oid(&self.content_type)]),
        };

        let certificates: Vec<u8> = self
            .signers
            .iter()
            .filter(|signer| signer.embed)
            .map(|signer| signer.certificate.der().to_vec())
            .chain(self.extra_certificates.iter().cloned())
            .collect::<Vec<_>>()
            .concat();
        let certificates = if certificates.is_empty() {
            Vec::new()
        } else {
            explicit(0, &certificates)
        };

        let signer_refs: Vec<&[u8]> = signer_infos.iter().map(Vec::as_slice).collect();
        let signed_data = seq(&[
            &integer(&[1]),
            &set(&[&digest_algorithm]),
            &encapsulated,
            &certificates,
            &set(&signer_refs),
        ]);
        seq(&[&oid(p7_oid::SIGNED_DATA), &explicit(0, &signed_data)])
    }
}

// =============================================================================
// PE IMAGES
// =============================================================================

/// Minimal PE/COFF image builder
pub(crate) struct PeBuilder {
    plus: bool,
    sections: Vec<Vec<u8>>,
    trailing: Vec<u8>,
}

impl PeBuilder {
    /// DOS header (0x40) + signature (4) + COFF header (20)
    pub(crate) const OPTIONAL_HEADER_OFFSET: usize = 0x58;
    pub(crate) const SIZE_OF_HEADERS: usize = 0x200;
    const FILE_ALIGNMENT: usize = 0x200;

    /// PE32+ image with no sections
    pub(crate) fn new() -> Self {
        Self {
            plus: true,
            sections: Vec::new(),
            trailing: Vec::new(),
        }
    }

    pub(crate) fn pe32(mut self) -> Self {
        self.plus = false;
        self
    }

    pub(crate) fn section(mut self, data: &[u8]) -> Self {
        self.sections.push(data.to_vec());
        self
    }

    /// Bytes after the last section
    pub(crate) fn trailing(mut self, data: &[u8]) -> Self {
        self.trailing = data.to_vec();
        self
    }

    pub(crate) fn build(&self) -> Vec<u8> {
        let opt = Self::OPTIONAL_HEADER_OFFSET;
        let (magic, machine, opt_size, rva_count_offset): (u16, u16, usize, usize) =
            if self.plus { (0x20b, 0x8664, 240, 108) } else { (0x10b, 0x014c, 224, 92) };

        let mut out = vec![0u8; Self::SIZE_OF_HEADERS];
        out[0..2].copy_from_slice(b"MZ");
        out[0x3c..0x40].copy_from_slice(&0x40u32.to_le_bytes());
        out[0x40..0x44].copy_from_slice(b"PE\0\0");

        let coff = 0x44;
        put_u16(&mut out, coff, machine);
        put_u16(&mut out, coff + 2, self.sections.len() as u16);
        put_u16(&mut out, coff + 16, opt_size as u16);
        put_u16(&mut out, coff + 18, 0x0002);

        put_u16(&mut out, opt, magic);
        put_u32(&mut out, opt + 60, Self::SIZE_OF_HEADERS as u32);
        put_u32(&mut out, opt + 64, 0x1234_5678);
        put_u32(&mut out, opt + rva_count_offset, 16);

        let mut data_offset = Self::SIZE_OF_HEADERS;
        for (index, section) in self.sections.iter().enumerate() {
            let header = opt + opt_size + index * 40;
            let raw_size = section.len().next_multiple_of(Self::FILE_ALIGNMENT);
            out[header..header + 8].copy_from_slice(b".sect\0\0\0");
            put_u32(&mut out, header + 8, section.len() as u32);
            put_u32(&mut out, header + 12, 0x1000 * (index as u32 + 1));
            put_u32(&mut out, header + 16, raw_size as u32);
            put_u32(&mut out, header + 20, data_offset as u32);
            data_offset += raw_size;
        }

        for section in &self.sections {
            let mut raw = section.clone();
            raw.resize(section.len().next_multiple_of(Self::FILE_ALIGNMENT), 0);
            out.extend_from_slice(&raw);
        }
        out.extend_from_slice(&self.trailing);
        out
    }
}

/// Append a certificate table of `(revision, type, payload)` entries
pub(crate) fn attach_certificates(image: &[u8], entries: &[(u16, u16, &[u8])]) -> Vec<u8> {
    let mut out = image.to_vec();
    out.resize(out.len().next_multiple_of(8), 0);
    let start = out.len();

    for (revision, certificate_type, payload) in entries {
        out.extend_from_slice(&((8 + payload.len()) as u32).to_le_bytes());
        out.extend_from_slice(&revision.to_le_bytes());
        out.extend_from_slice(&certificate_type.to_le_bytes());
        out.extend_from_slice(payload);
        out.resize(out.len().next_multiple_of(8), 0);
    }
    let size = out.len() - start;

    let opt = PeBuilder::OPTIONAL_HEADER_OFFSET;
    let data_dir = if u16::from_le_bytes([out[opt], out[opt + 1]]) == 0x20b { 112 } else { 96 };
    let security = opt + data_dir + 4 * 8;
    put_u32(&mut out, security, start as u32);
    put_u32(&mut out, security + 4, size as u32);
    out
}

/// Authenticode-sign a PE image with each `(key, certificate)` in turn
pub(crate) fn sign_pe(image: &[u8], signers: &[(&TestKey, &Certificate)]) -> Vec<u8> {
    let digest = SignedImage::from_pe(image).expect("valid image").digest(HashAlgorithm::Sha256);
    let mut builder = SignedDataBuilder::authenticode(HashAlgorithm::Sha256, &digest);
    for (key, certificate) in signers {
        builder = builder.signer(key, certificate);
    }
    let envelope = builder.build(&[]);
    attach_certificates(image, &[(0x0200, 0x0002, envelope.as_slice())])
}

fn put_u16(out: &mut [u8], offset: usize, value: u16) {
    out[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

fn put_u32(out: &mut [u8], offset: usize, value: u32) {
    out[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}
