//! Signature Verifier
//!
//! Decides whether an image is trusted by a [`TrustSnapshot`]. The decision
//! is a pure function of the image, the snapshot and the policy.
//!
//! ```text
//!   image digest ──► Deny? ──yes──► Denied
//!        │
//!        ▼
//!   signed? ──no──► digest in Allow/Vendor? ──► Trusted / Untrusted
//!        │
//!        ▼
//!   parse envelopes ──error──► Malformed
//!        │
//!        ▼
//!   per signer: leaf ─► signature ─► chain to anchor (Deny checked per hop)
//!        │
//!        ▼
//!   SignerPolicy ──fail──► digest in Allow/Vendor? ──► Trusted / Untrusted
//! ```

use alloc::vec::Vec;

use crate::config::ShimConfig;
use crate::crypto::{ct_eq, HashAlgorithm};
use crate::error::MalformedError;
use crate::image::{ImageFormat, SignedImage};
use crate::pkcs7::{SignedData, SignerInfo};
use crate::store::{ListKind, MatchedEntry, TrustEntry, TrustSnapshot};
use crate::time::TimeSource;
use crate::x509::Certificate;

// =============================================================================
// POLICY
// =============================================================================

/// How multiple signers on one image combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SignerPolicy {
    /// One trusted signer is enough
    #[default]
    Any,
    /// Every signer must be trusted
    All,
}

/// Verification knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifierPolicy {
    /// Multi-signer rule
    pub signer_policy: SignerPolicy,
    /// Trusted current time in Unix seconds; validity windows are not
    /// checked without one
    pub trusted_time: Option<i64>,
    /// Longest chain walked, leaf and anchor included
    pub max_chain_depth: usize,
}

impl Default for VerifierPolicy {
    fn default() -> Self {
        Self {
            signer_policy: SignerPolicy::Any,
            trusted_time: None,
            max_chain_depth: crate::config::DEFAULT_MAX_CHAIN_DEPTH,
        }
    }
}

impl VerifierPolicy {
    /// Policy from configuration and a time source
    pub fn from_config(config: &ShimConfig, time: &dyn TimeSource) -> Self {
        Self {
            signer_policy: config.signer_policy,
            trusted_time: time.now(),
            max_chain_depth: config.max_chain_depth,
        }
    }
}

// =============================================================================
// RESULT
// =============================================================================

/// Verification outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Image may run
    Trusted,
    /// No trust path found
    Untrusted,
    /// Image or a signer is explicitly denied
    Denied,
    /// Signature data could not be parsed
    Malformed,
}

impl Outcome {
    /// Name for log lines
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Trusted => "trusted",
            Self::Untrusted => "untrusted",
            Self::Denied => "denied",
            Self::Malformed => "malformed",
        }
    }
}

/// Verification result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationResult {
    /// Outcome
    pub outcome: Outcome,
    /// Entry that decided a Trusted or Denied outcome
    pub matched_entry: Option<MatchedEntry>,
}

impl VerificationResult {
    fn with(outcome: Outcome, matched_entry: Option<MatchedEntry>) -> Self {
        Self { outcome, matched_entry }
    }

    /// Check if the image is trusted
    pub fn is_trusted(&self) -> bool {
        self.outcome == Outcome::Trusted
    }
}

// =============================================================================
// VERIFICATION
// =============================================================================

/// Per-signer verdict
#[derive(Debug)]
enum SignerVerdict {
    Trusted(MatchedEntry),
    Untrusted,
    Denied(MatchedEntry),
}

/// Verify an image against a trust snapshot
pub fn verify(
    image: &SignedImage,
    snapshot: &TrustSnapshot,
    policy: &VerifierPolicy,
) -> VerificationResult {
    let digests: Vec<(HashAlgorithm, Vec<u8>)> = HashAlgorithm::ALL
        .into_iter()
        .map(|alg| (alg, image.digest(alg)))
        .collect();

    // A denied digest loses regardless of signatures
    let deny = snapshot.list(ListKind::Deny);
    for (alg, digest) in &digests {
        if let Some(entry) = deny.find_hash(*alg, digest) {
            log::debug!("Image {} digest is denied", alg.name());
            let matched = MatchedEntry {
                list: ListKind::Deny,
                entry: entry.clone(),
            };
            return VerificationResult::with(Outcome::Denied, Some(matched));
        }
    }

    if let Some(err) = image.signature_error() {
        log::debug!("Certificate table rejected: {}", err);
        return VerificationResult::with(Outcome::Malformed, None);
    }

    if !image.is_signed() {
        return hash_fallback(&digests, snapshot);
    }

    let mut envelopes = Vec::with_capacity(image.signatures().len());
    for blob in image.signatures() {
        match SignedData::from_der(blob) {
            Ok(envelope) => envelopes.push(envelope),
            Err(err) => {
                log::debug!("Signed data rejected: {}", err);
                return VerificationResult::with(Outcome::Malformed, None);
            }
        }
    }

    let mut verdicts = Vec::new();
    for envelope in &envelopes {
        let bound = match content_binding(image, envelope) {
            Ok(bound) => bound,
            Err(err) => {
                log::debug!("Authenticode content rejected: {}", err);
                return VerificationResult::with(Outcome::Malformed, None);
            }
        };
        for signer in &envelope.signers {
            verdicts.push(check_signer(image, envelope, signer, bound, snapshot, policy));
        }
    }

    // Any denied signer is decisive
    for verdict in &verdicts {
        if let SignerVerdict::Denied(entry) = verdict {
            return VerificationResult::with(Outcome::Denied, Some(entry.clone()));
        }
    }

    let mut trusted = verdicts.iter().filter_map(|verdict| match verdict {
        SignerVerdict::Trusted(entry) => Some(entry),
        _ => None,
    });
    let accepted = match policy.signer_policy {
        SignerPolicy::Any => trusted.next().cloned(),
        SignerPolicy::All => {
            let first = trusted.next().cloned();
            let all = verdicts.iter().all(|v| matches!(v, SignerVerdict::Trusted(_)));
            first.filter(|_| all)
        }
    };

    match accepted {
        Some(entry) => VerificationResult::with(Outcome::Trusted, Some(entry)),
        None => hash_fallback(&digests, snapshot),
    }
}

/// Trusted when an image digest is enrolled in Allow or Vendor
fn hash_fallback(
    digests: &[(HashAlgorithm, Vec<u8>)],
    snapshot: &TrustSnapshot,
) -> VerificationResult {
    for kind in [ListKind::Allow, ListKind::Vendor] {
        for (alg, digest) in digests {
            if let Some(entry) = snapshot.list(kind).find_hash(*alg, digest) {
                let matched = MatchedEntry {
                    list: kind,
                    entry: entry.clone(),
                };
                return VerificationResult::with(Outcome::Trusted, Some(matched));
            }
        }
    }
    VerificationResult::with(Outcome::Untrusted, None)
}

/// Check that the envelope's content describes this image
fn content_binding(image: &SignedImage, envelope: &SignedData) -> Result<bool, MalformedError> {
    match image.format() {
        ImageFormat::Pe => Ok(envelope
            .indirect_digest()?
            .is_some_and(|indirect| ct_eq(&indirect.digest, &image.digest(indirect.algorithm)))),
        ImageFormat::Detached | ImageFormat::Unsigned => {
            Ok(envelope.content.as_deref().map_or(true, |content| content == image.content()))
        }
    }
}

fn check_signer(
    image: &SignedImage,
    envelope: &SignedData,
    signer: &SignerInfo,
    bound: bool,
    snapshot: &TrustSnapshot,
    policy: &VerifierPolicy,
) -> SignerVerdict {
    // Leaf from the envelope, or from the store for external signers
    let leaf = signer.find_certificate(&envelope.certificates).or_else(|| {
        snapshot
            .anchors()
            .map(|(_, cert)| cert)
            .find(|cert| cert.matches_issuer_serial(&signer.issuer, &signer.serial))
    });
    let Some(leaf) = leaf else {
        log::debug!("Signer certificate not found");
        return SignerVerdict::Untrusted;
    };

    if let Some(entry) = denied(leaf, snapshot) {
        return SignerVerdict::Denied(entry);
    }

    if !bound {
        log::debug!("Signed content does not match the image");
        return SignerVerdict::Untrusted;
    }

    let detached = match image.format() {
        ImageFormat::Pe => None,
        ImageFormat::Detached | ImageFormat::Unsigned => Some(image.content()),
    };
    if !envelope.verify_signer(signer, leaf, detached) {
        log::debug!("Signer signature does not verify");
        return SignerVerdict::Untrusted;
    }

    build_chain(leaf, &envelope.certificates, snapshot, policy)
}

fn denied(cert: &Certificate, snapshot: &TrustSnapshot) -> Option<MatchedEntry> {
    snapshot.is_denied(cert).then(|| MatchedEntry {
        list: ListKind::Deny,
        entry: TrustEntry::Certificate(cert.clone()),
    })
}

/// Walk from the leaf toward a store anchor
fn build_chain(
    leaf: &Certificate,
    embedded: &[Certificate],
    snapshot: &TrustSnapshot,
    policy: &VerifierPolicy,
) -> SignerVerdict {
    let mut chain: Vec<&Certificate> = Vec::with_capacity(policy.max_chain_depth);
    let mut current = leaf;

    loop {
        if let Some(entry) = denied(current, snapshot) {
            return SignerVerdict::Denied(entry);
        }
        if let Some(time) = policy.trusted_time {
            if !current.is_valid_at(time) {
                log::debug!("Certificate outside its validity window");
                return SignerVerdict::Untrusted;
            }
        }
        chain.push(current);

        // Enrolled directly
        if let Some(entry) = snapshot.lookup_certificate(current) {
            return SignerVerdict::Trusted(entry);
        }

        if chain.len() >= policy.max_chain_depth {
            log::debug!("Chain exceeds depth {}", policy.max_chain_depth);
            return SignerVerdict::Untrusted;
        }

        // Issued by a store anchor
        let mut anchor_denied = None;
        for (list, anchor) in snapshot.anchors() {
            if anchor.subject != current.issuer || !current.is_signed_by(anchor) {
                continue;
            }
            if let Some(entry) = denied(anchor, snapshot) {
                anchor_denied = Some(entry);
                continue;
            }
            if policy.trusted_time.is_some_and(|time| !anchor.is_valid_at(time)) {
                continue;
            }
            return SignerVerdict::Trusted(MatchedEntry {
                list,
                entry: TrustEntry::Certificate(anchor.clone()),
            });
        }
        if let Some(entry) = anchor_denied {
            return SignerVerdict::Denied(entry);
        }

        // Issued by an embedded intermediate
        let next = embedded.iter().find(|candidate| {
            !chain.iter().any(|seen| seen.der() == candidate.der())
                && candidate.is_ca()
                && current.is_signed_by(candidate)
        });
        match next {
            Some(issuer) => current = issuer,
            None => {
                log::debug!("No trusted issuer for certificate");
                return SignerVerdict::Untrusted;
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
