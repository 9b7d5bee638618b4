//! Enrollment Request Processor
//!
//! The OS-side enrollment tool cannot touch the trust store directly. It
//! leaves a batch of requests in the pending record and the shim applies
//! them on the next boot, before any image is verified.
//!
//! ```text
//!   MokPending                       TrustStore
//!  ┌──────────────────┐  decode   ┌─────────────┐
//!  │ magic  version   │ ───────▶  │  authorize  │── current store state
//!  │ count  records.. │  sort by  │  apply      │
//!  └──────────────────┘  sequence └─────────────┘
//!          │                              │
//!          └────────── delete ◀───────────┘
//! ```
//!
//! Each request is authorized against the store as it stands when that
//! request is reached, so earlier requests in the batch can enable or
//! revoke the authority of later ones. A failed request is reported and
//! skipped; processing never stops early.

use alloc::vec::Vec;
use core::fmt;

use zeroize::Zeroizing;

use crate::crypto::{ct_eq, HashAlgorithm, Hasher, PublicKey, SignatureAlgorithm};
use crate::error::{
    AuthorizationError, ConflictError, MalformedError, PersistenceError, Result, ShimError,
};
use crate::store::{ApplyOutcome, ListKind, Operation, TrustEntry, TrustSnapshot, TrustStore};
use crate::variable::{read_record, VariableStore};
use crate::x509::Certificate;

// =============================================================================
// REQUESTS
// =============================================================================

/// Proof that the machine owner asked for a change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authorization {
    /// SHA-256 over the request payload followed by the owner's secret
    SharedSecret(Vec<u8>),
    /// Signature over the request payload by an enrolled or vendor key
    Signature {
        /// DER certificate of the signing key
        certificate: Vec<u8>,
        /// Signature value (ECDSA P-256 or RSA PKCS#1 v1.5, SHA-256)
        signature: Vec<u8>,
    },
}

/// A single change queued by the OS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentRequest {
    /// Processing order
    pub sequence: u32,
    /// Add or delete
    pub operation: Operation,
    /// Target list
    pub list: ListKind,
    /// Entry to add or delete
    pub target: TrustEntry,
    /// Owner authorization
    pub authorization: Authorization,
}

impl EnrollmentRequest {
    /// Request authorized with the owner's shared secret
    pub fn with_secret(
        sequence: u32,
        operation: Operation,
        list: ListKind,
        target: TrustEntry,
        secret: &[u8],
    ) -> Self {
        let digest = secret_digest(&signing_payload(sequence, operation, list, &target), secret);
        Self {
            sequence,
            operation,
            list,
            target,
            authorization: Authorization::SharedSecret(digest.to_vec()),
        }
    }

    /// Bytes covered by the authorization
    pub fn payload(&self) -> Vec<u8> {
        signing_payload(self.sequence, self.operation, self.list, &self.target)
    }
}

/// Bytes covered by a request's authorization
pub fn signing_payload(
    sequence: u32,
    operation: Operation,
    list: ListKind,
    target: &TrustEntry,
) -> Vec<u8> {
    let entry = target.encoded();
    let mut out = Vec::with_capacity(6 + entry.len());
    out.extend_from_slice(&sequence.to_le_bytes());
    out.push(operation_tag(operation));
    out.push(list_tag(list));
    out.extend_from_slice(&entry);
    out
}

fn secret_digest(payload: &[u8], secret: &[u8]) -> Zeroizing<Vec<u8>> {
    let mut hasher = Hasher::new(HashAlgorithm::Sha256);
    hasher.update(payload);
    hasher.update(secret);
    Zeroizing::new(hasher.finalize())
}

// =============================================================================
// AUTHORITY
// =============================================================================

/// Source of the owner's shared secret
pub trait EnrollmentAuthority {
    /// The secret, if one has been set
    fn shared_secret(&self) -> Option<&[u8]>;
}

/// No shared secret; only signature authorization is possible
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuthority;

impl EnrollmentAuthority for NoAuthority {
    fn shared_secret(&self) -> Option<&[u8]> {
        None
    }
}

/// Shared secret held in memory, wiped on drop
pub struct SecretAuthority {
    secret: Zeroizing<Vec<u8>>,
}

impl SecretAuthority {
    /// Take a copy of `secret`
    pub fn new(secret: &[u8]) -> Self {
        Self {
            secret: Zeroizing::new(secret.to_vec()),
        }
    }
}

impl EnrollmentAuthority for SecretAuthority {
    fn shared_secret(&self) -> Option<&[u8]> {
        Some(self.secret.as_slice())
    }
}

impl fmt::Debug for SecretAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretAuthority").field("secret", &"<redacted>").finish()
    }
}

/// Check a request against the current trust state
pub fn authorize(
    request: &EnrollmentRequest,
    snapshot: &TrustSnapshot,
    authority: &dyn EnrollmentAuthority,
) -> core::result::Result<(), AuthorizationError> {
    let payload = request.payload();

    match &request.authorization {
        Authorization::SharedSecret(digest) => {
            let secret = authority.shared_secret().ok_or(AuthorizationError::NoSecret)?;
            if ct_eq(digest, &secret_digest(&payload, secret)) {
                Ok(())
            } else {
                Err(AuthorizationError::SecretMismatch)
            }
        }
        Authorization::Signature { certificate, signature } => {
            let signer =
                Certificate::from_der(certificate).map_err(|_| AuthorizationError::Malformed)?;
            match snapshot.lookup_certificate(&signer) {
                Some(matched) if matched.list == ListKind::Deny => {
                    return Err(AuthorizationError::DeniedSigner)
                }
                Some(_) => {}
                None => return Err(AuthorizationError::UntrustedSigner),
            }

            let algorithm = match signer.public_key {
                PublicKey::Rsa(_) => SignatureAlgorithm::RsaPkcs1(HashAlgorithm::Sha256),
                PublicKey::EcP256(_) => SignatureAlgorithm::Ecdsa(HashAlgorithm::Sha256),
                PublicKey::Unsupported => return Err(AuthorizationError::BadSignature),
            };
            if signer.public_key.verify(algorithm, &payload, signature) {
                Ok(())
            } else {
                Err(AuthorizationError::BadSignature)
            }
        }
    }
}

// =============================================================================
// PROCESSING
// =============================================================================

/// Outcome of one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestResult {
    /// Sequence number of the request
    pub sequence: u32,
    /// What the store did, or why the request was dropped
    pub result: Result<ApplyOutcome>,
}

/// Outcome of a batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessReport {
    /// Per-request results in processing order
    pub results: Vec<RequestResult>,
    /// Set when the pending record could not be decoded at all
    pub framing_error: Option<MalformedError>,
}

impl ProcessReport {
    /// Requests the store accepted
    pub fn applied(&self) -> usize {
        self.results.iter().filter(|r| r.result.is_ok()).count()
    }

    /// Requests that were dropped
    pub fn rejected(&self) -> usize {
        self.results.len() - self.applied()
    }
}

/// Apply a batch of requests in ascending sequence order
///
/// Requests sharing a sequence number keep their batch order.
pub fn process<V: VariableStore>(
    mut requests: Vec<EnrollmentRequest>,
    store: &mut TrustStore<V>,
    authority: &dyn EnrollmentAuthority,
) -> ProcessReport {
    requests.sort_by_key(|request| request.sequence);

    let mut report = ProcessReport::default();
    for request in requests {
        let sequence = request.sequence;
        let result = process_one(request, store, authority);
        match &result {
            Ok(outcome) => log::info!("Enrollment request {} applied: {:?}", sequence, outcome),
            Err(err) => {
                log::warn!("Enrollment request {} rejected ({}): {}", sequence, err.name(), err)
            }
        }
        report.results.push(RequestResult { sequence, result });
    }
    report
}

fn process_one<V: VariableStore>(
    request: EnrollmentRequest,
    store: &mut TrustStore<V>,
    authority: &dyn EnrollmentAuthority,
) -> Result<ApplyOutcome> {
    if request.list == ListKind::Vendor {
        return Err(ConflictError::ReadOnlyList(ListKind::Vendor).into());
    }
    authorize(&request, &store.snapshot(), authority)?;
    store.apply(request.operation, request.list, request.target)
}

/// Read, process and consume the pending record
///
/// The record is deleted whatever happened to the requests in it, so a bad
/// batch is never retried on the next boot.
pub fn process_pending<V: VariableStore>(
    store: &mut TrustStore<V>,
    authority: &dyn EnrollmentAuthority,
) -> core::result::Result<ProcessReport, PersistenceError> {
    let name = store.config().records.pending.clone();
    let namespace = store.config().namespace;

    let Some(pending) = read_record(store.variables_mut(), &name, &namespace)? else {
        return Ok(ProcessReport::default());
    };

    let report = match decode_batch(&pending.data) {
        Ok(batch) => {
            log::info!(
                "Processing {} pending enrollment requests ({} unreadable)",
                batch.requests.len(),
                batch.skipped.len()
            );
            let mut report = ProcessReport::default();
            report.results.extend(batch.skipped.into_iter().map(|(sequence, err)| RequestResult {
                sequence,
                result: Err(ShimError::Malformed(err)),
            }));
            let processed = process(batch.requests, store, authority);
            report.results.extend(processed.results);
            report
        }
        Err(err) => {
            log::warn!("Pending enrollment record rejected: {}", err);
            ProcessReport {
                results: Vec::new(),
                framing_error: Some(err),
            }
        }
    };

    store.variables_mut().delete(&name, &namespace)?;
    log::debug!("Pending record {} consumed", name);
    Ok(report)
}

// =============================================================================
// PENDING RECORD FORMAT
// =============================================================================

/// Pending record magic
pub const PENDING_MAGIC: [u8; 4] = *b"MOKP";
/// Pending record format version
pub const PENDING_VERSION: u16 = 1;

const AUTH_SECRET: u8 = 0x01;
const AUTH_SIGNATURE: u8 = 0x02;

fn operation_tag(operation: Operation) -> u8 {
    match operation {
        Operation::Add => 0x01,
        Operation::Delete => 0x02,
    }
}

fn list_tag(list: ListKind) -> u8 {
    match list {
        ListKind::Allow => 0x01,
        ListKind::Deny => 0x02,
        ListKind::Vendor => 0x03,
    }
}

/// Decoded pending record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedBatch {
    /// Well-formed requests in record order
    pub requests: Vec<EnrollmentRequest>,
    /// Requests whose target entry could not be decoded
    pub skipped: Vec<(u32, MalformedError)>,
}

/// Encode requests into the pending record layout
///
/// ```text
/// header:  magic[4] version:u16 count:u16
/// request: sequence:u32 operation:u8 list:u8 auth:u8
///          target_len:u32 target
///          secret    -> digest_len:u16 digest
///          signature -> cert_len:u32 cert sig_len:u16 sig
/// ```
///
/// All integers are little-endian.
pub fn encode_batch(
    requests: &[EnrollmentRequest],
) -> core::result::Result<Vec<u8>, MalformedError> {
    let count = u16::try_from(requests.len()).map_err(|_| MalformedError::InvalidRequest)?;

    let mut out = Vec::new();
    out.extend_from_slice(&PENDING_MAGIC);
    out.extend_from_slice(&PENDING_VERSION.to_le_bytes());
    out.extend_from_slice(&count.to_le_bytes());

    for request in requests {
        out.extend_from_slice(&request.sequence.to_le_bytes());
        out.push(operation_tag(request.operation));
        out.push(list_tag(request.list));
        out.push(match request.authorization {
            Authorization::SharedSecret(_) => AUTH_SECRET,
            Authorization::Signature { .. } => AUTH_SIGNATURE,
        });
        put_u32_bytes(&mut out, &request.target.encoded())?;

        match &request.authorization {
            Authorization::SharedSecret(digest) => put_u16_bytes(&mut out, digest)?,
            Authorization::Signature { certificate, signature } => {
                put_u32_bytes(&mut out, certificate)?;
                put_u16_bytes(&mut out, signature)?;
            }
        }
    }
    Ok(out)
}

fn put_u16_bytes(out: &mut Vec<u8>, data: &[u8]) -> core::result::Result<(), MalformedError> {
    let len = u16::try_from(data.len()).map_err(|_| MalformedError::InvalidRequest)?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(data);
    Ok(())
}

fn put_u32_bytes(out: &mut Vec<u8>, data: &[u8]) -> core::result::Result<(), MalformedError> {
    let len = u32::try_from(data.len()).map_err(|_| MalformedError::InvalidRequest)?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(data);
    Ok(())
}

/// Decode a pending record
///
/// Any framing error rejects the whole record. A request whose target
/// entry is unreadable is reported in [`DecodedBatch::skipped`] and the
/// rest of the batch is kept.
pub fn decode_batch(data: &[u8]) -> core::result::Result<DecodedBatch, MalformedError> {
    let mut reader = Reader::new(data);

    if reader.take(4)? != PENDING_MAGIC || reader.u16()? != PENDING_VERSION {
        return Err(MalformedError::InvalidRequest);
    }
    let count = reader.u16()?;

    let mut batch = DecodedBatch::default();
    for _ in 0..count {
        let sequence = reader.u32()?;
        let operation = match reader.u8()? {
            0x01 => Operation::Add,
            0x02 => Operation::Delete,
            _ => return Err(MalformedError::InvalidRequest),
        };
        let list = match reader.u8()? {
            0x01 => ListKind::Allow,
            0x02 => ListKind::Deny,
            0x03 => ListKind::Vendor,
            _ => return Err(MalformedError::InvalidRequest),
        };
        let auth_kind = reader.u8()?;
        let target_len = reader.u32()? as usize;
        let target = reader.take(target_len)?;

        let authorization = match auth_kind {
            AUTH_SECRET => {
                let len = usize::from(reader.u16()?);
                Authorization::SharedSecret(reader.take(len)?.to_vec())
            }
            AUTH_SIGNATURE => {
                let cert_len = reader.u32()? as usize;
                let certificate = reader.take(cert_len)?.to_vec();
                let sig_len = usize::from(reader.u16()?);
                Authorization::Signature {
                    certificate,
                    signature: reader.take(sig_len)?.to_vec(),
                }
            }
            _ => return Err(MalformedError::InvalidRequest),
        };

        match TrustEntry::decode(target) {
            Ok(target) => batch.requests.push(EnrollmentRequest {
                sequence,
                operation,
                list,
                target,
                authorization,
            }),
            Err(err) => batch.skipped.push((sequence, err)),
        }
    }

    if !reader.is_empty() {
        return Err(MalformedError::InvalidRequest);
    }
    Ok(batch)
}

/// Little-endian cursor; running out of input is a framing error
struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn take(&mut self, len: usize) -> core::result::Result<&'a [u8], MalformedError> {
        if self.data.len() < len {
            return Err(MalformedError::InvalidRequest);
        }
        let (head, tail) = self.data.split_at(len);
        self.data = tail;
        Ok(head)
    }

    fn u8(&mut self) -> core::result::Result<u8, MalformedError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> core::result::Result<u16, MalformedError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self) -> core::result::Result<u32, MalformedError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShimConfig;
    use crate::testutil::{self_signed, TestKey};
    use crate::variable::{MemoryVariableStore, VariableAttributes};
    use proptest::prelude::*;

    const SECRET: &[u8] = b"correct horse battery staple";

    fn hash(byte: u8) -> TrustEntry {
        TrustEntry::hash(HashAlgorithm::Sha256, &[byte; 32]).unwrap()
    }

    fn store() -> TrustStore<MemoryVariableStore> {
        let vendor = TrustEntry::Certificate(self_signed(1, "Vendor CA"));
        let config = ShimConfig::default().with_vendor_entry(vendor);
        let mut variables = MemoryVariableStore::new();
        TrustStore::provision(&mut variables, &config).unwrap();
        TrustStore::load(variables, &config).unwrap()
    }

    fn signed(
        sequence: u32,
        operation: Operation,
        list: ListKind,
        target: TrustEntry,
        seed: u8,
        cert: &Certificate,
    ) -> EnrollmentRequest {
        let payload = signing_payload(sequence, operation, list, &target);
        EnrollmentRequest {
            sequence,
            operation,
            list,
            target,
            authorization: Authorization::Signature {
                certificate: cert.der().to_vec(),
                signature: TestKey::new(seed).sign(&payload),
            },
        }
    }

    fn add(sequence: u32, list: ListKind, target: TrustEntry) -> EnrollmentRequest {
        EnrollmentRequest::with_secret(sequence, Operation::Add, list, target, SECRET)
    }

    fn put_pending(store: &mut TrustStore<MemoryVariableStore>, data: &[u8]) {
        let name = store.config().records.pending.clone();
        let namespace = store.config().namespace;
        store
            .variables_mut()
            .set(&name, &namespace, VariableAttributes::BOOT_NV, data)
            .unwrap();
    }

    fn pending_exists(store: &TrustStore<MemoryVariableStore>) -> bool {
        store
            .variables()
            .contains(&store.config().records.pending, &store.config().namespace)
    }

    #[test]
    fn test_secret_authorized_add() {
        let mut store = store();
        let report = process(
            vec![add(1, ListKind::Allow, hash(0xaa))],
            &mut store,
            &SecretAuthority::new(SECRET),
        );
        assert_eq!(report.applied(), 1);
        assert_eq!(report.results[0].result, Ok(ApplyOutcome::Added));
        assert!(store.snapshot().list(ListKind::Allow).contains(&hash(0xaa)));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let mut store = store();
        let target = hash(0xaa);
        let request =
            EnrollmentRequest::with_secret(1, Operation::Add, ListKind::Allow, target, b"guess");
        let report = process(vec![request], &mut store, &SecretAuthority::new(SECRET));
        assert_eq!(
            report.results[0].result,
            Err(ShimError::Authorization(AuthorizationError::SecretMismatch))
        );
        assert!(store.snapshot().list(ListKind::Allow).is_empty());
        assert_eq!(store.generation(), 0);
    }

    #[test]
    fn test_secret_without_authority() {
        let mut store = store();
        let report = process(vec![add(1, ListKind::Allow, hash(0xaa))], &mut store, &NoAuthority);
        assert_eq!(
            report.results[0].result,
            Err(ShimError::Authorization(AuthorizationError::NoSecret))
        );
    }

    #[test]
    fn test_tampered_request_rejected() {
        let mut store = store();
        let mut request = add(1, ListKind::Allow, hash(0xaa));
        request.target = hash(0xbb);
        let report = process(vec![request], &mut store, &SecretAuthority::new(SECRET));
        assert_eq!(report.rejected(), 1);
    }

    #[test]
    fn test_ascending_sequence_order() {
        let mut store = store();
        let target = hash(0xaa);
        let delete =
            EnrollmentRequest::with_secret(2, Operation::Delete, ListKind::Allow, target, SECRET);
        let report = process(
            vec![delete, add(1, ListKind::Allow, hash(0xaa))],
            &mut store,
            &SecretAuthority::new(SECRET),
        );

        let order: Vec<u32> = report.results.iter().map(|r| r.sequence).collect();
        assert_eq!(order, [1, 2]);
        assert_eq!(report.results[1].result, Ok(ApplyOutcome::Removed));
        assert!(!store.snapshot().list(ListKind::Allow).contains(&hash(0xaa)));
    }

    #[test]
    fn test_certificate_add_then_delete() {
        let mut store = store();
        let cert_a = self_signed(7, "Owner Key A");
        let entry = TrustEntry::Certificate(cert_a.clone());
        let delete = EnrollmentRequest::with_secret(
            2,
            Operation::Delete,
            ListKind::Allow,
            entry.clone(),
            SECRET,
        );
        let report = process(
            vec![delete, add(1, ListKind::Allow, entry.clone())],
            &mut store,
            &SecretAuthority::new(SECRET),
        );

        assert_eq!(report.applied(), 2);
        assert_eq!(report.results[0].result, Ok(ApplyOutcome::Added));
        assert_eq!(report.results[1].result, Ok(ApplyOutcome::Removed));
        assert!(!store.snapshot().list(ListKind::Allow).contains(&entry));
        assert_eq!(store.lookup_certificate(&cert_a), None);
    }

    #[test]
    fn test_equal_sequence_keeps_batch_order() {
        let mut store = store();
        let requests = vec![
            add(5, ListKind::Allow, hash(0x01)),
            add(5, ListKind::Allow, hash(0x02)),
            add(5, ListKind::Allow, hash(0x01)),
        ];
        let report = process(requests, &mut store, &SecretAuthority::new(SECRET));
        let outcomes: Vec<_> = report.results.iter().map(|r| r.result.clone()).collect();
        assert_eq!(
            outcomes,
            [Ok(ApplyOutcome::Added), Ok(ApplyOutcome::Added), Ok(ApplyOutcome::AlreadyPresent)]
        );
    }

    #[test]
    fn test_authorization_follows_store_state() {
        let owner = self_signed(7, "Owner Key");
        let mut store = store();
        let requests = vec![
            add(1, ListKind::Allow, TrustEntry::Certificate(owner.clone())),
            signed(2, Operation::Add, ListKind::Allow, hash(0x11), 7, &owner),
            add(3, ListKind::Deny, TrustEntry::Certificate(owner.clone())),
            signed(4, Operation::Add, ListKind::Allow, hash(0x22), 7, &owner),
        ];
        let report = process(requests, &mut store, &SecretAuthority::new(SECRET));

        assert_eq!(report.applied(), 3);
        assert_eq!(
            report.results[3].result,
            Err(ShimError::Authorization(AuthorizationError::DeniedSigner))
        );
        let allow = store.snapshot();
        assert!(allow.list(ListKind::Allow).contains(&hash(0x11)));
        assert!(!allow.list(ListKind::Allow).contains(&hash(0x22)));
    }

    #[test]
    fn test_vendor_key_authorizes() {
        let vendor = self_signed(1, "Vendor CA");
        let mut store = store();
        let report = process(
            vec![signed(1, Operation::Add, ListKind::Deny, hash(0x33), 1, &vendor)],
            &mut store,
            &NoAuthority,
        );
        assert_eq!(report.applied(), 1);
        assert!(store.snapshot().list(ListKind::Deny).contains(&hash(0x33)));
    }

    #[test]
    fn test_untrusted_signer_rejected() {
        let stranger = self_signed(9, "Stranger");
        let mut store = store();
        let report = process(
            vec![signed(1, Operation::Add, ListKind::Allow, hash(0x33), 9, &stranger)],
            &mut store,
            &NoAuthority,
        );
        assert_eq!(
            report.results[0].result,
            Err(ShimError::Authorization(AuthorizationError::UntrustedSigner))
        );
    }

    #[test]
    fn test_bad_signature_rejected() {
        let vendor = self_signed(1, "Vendor CA");
        let mut request = signed(1, Operation::Add, ListKind::Allow, hash(0x33), 1, &vendor);
        request.sequence = 2;
        let mut store = store();
        let report = process(vec![request], &mut store, &NoAuthority);
        assert_eq!(
            report.results[0].result,
            Err(ShimError::Authorization(AuthorizationError::BadSignature))
        );
    }

    #[test]
    fn test_garbage_signer_certificate() {
        let mut store = store();
        let request = EnrollmentRequest {
            sequence: 1,
            operation: Operation::Add,
            list: ListKind::Allow,
            target: hash(0x33),
            authorization: Authorization::Signature {
                certificate: vec![0x30, 0x01],
                signature: vec![0; 8],
            },
        };
        let report = process(vec![request], &mut store, &NoAuthority);
        assert_eq!(
            report.results[0].result,
            Err(ShimError::Authorization(AuthorizationError::Malformed))
        );
    }

    #[test]
    fn test_vendor_list_is_conflict() {
        let mut store = store();
        let report = process(
            vec![add(1, ListKind::Vendor, hash(0x44)), add(2, ListKind::Allow, hash(0x45))],
            &mut store,
            &SecretAuthority::new(SECRET),
        );
        assert_eq!(
            report.results[0].result,
            Err(ShimError::Conflict(ConflictError::ReadOnlyList(ListKind::Vendor)))
        );
        // Processing continued
        assert_eq!(report.results[1].result, Ok(ApplyOutcome::Added));
    }

    #[test]
    fn test_pending_consumed() {
        let mut store = store();
        let batch = encode_batch(&[add(1, ListKind::Allow, hash(0x55))]).unwrap();
        put_pending(&mut store, &batch);

        let report = process_pending(&mut store, &SecretAuthority::new(SECRET)).unwrap();
        assert_eq!(report.applied(), 1);
        assert!(!pending_exists(&store));
        assert!(store.snapshot().list(ListKind::Allow).contains(&hash(0x55)));

        // Nothing left to replay
        let again = process_pending(&mut store, &SecretAuthority::new(SECRET)).unwrap();
        assert!(again.results.is_empty());
    }

    #[test]
    fn test_pending_consumed_when_all_fail() {
        let mut store = store();
        let batch = encode_batch(&[add(1, ListKind::Allow, hash(0x55))]).unwrap();
        put_pending(&mut store, &batch);

        let report = process_pending(&mut store, &SecretAuthority::new(b"other")).unwrap();
        assert_eq!(report.applied(), 0);
        assert_eq!(report.rejected(), 1);
        assert!(!pending_exists(&store));
    }

    #[test]
    fn test_framing_error_rejects_batch() {
        let mut store = store();
        let mut batch = encode_batch(&[add(1, ListKind::Allow, hash(0x55))]).unwrap();
        batch[0] = b'X';
        put_pending(&mut store, &batch);

        let report = process_pending(&mut store, &SecretAuthority::new(SECRET)).unwrap();
        assert_eq!(report.framing_error, Some(MalformedError::InvalidRequest));
        assert!(report.results.is_empty());
        assert!(!pending_exists(&store));
        assert!(store.snapshot().list(ListKind::Allow).is_empty());
    }

    #[test]
    fn test_unreadable_target_skipped() {
        let requests = [add(1, ListKind::Allow, hash(0x01)), add(2, ListKind::Allow, hash(0x02))];
        let mut batch = encode_batch(&requests).unwrap();
        // header (8) + sequence, operation, list, auth (7) + target_len (4)
        batch[19] = 0x7f;

        let decoded = decode_batch(&batch).unwrap();
        assert_eq!(decoded.requests.len(), 1);
        assert_eq!(decoded.requests[0].sequence, 2);
        assert_eq!(decoded.skipped.len(), 1);
        assert_eq!(decoded.skipped[0].0, 1);

        let mut store = store();
        put_pending(&mut store, &batch);
        let report = process_pending(&mut store, &SecretAuthority::new(SECRET)).unwrap();
        assert_eq!(report.applied(), 1);
        assert!(matches!(report.results[0].result, Err(ShimError::Malformed(_))));
    }

    #[test]
    fn test_batch_framing() {
        let owner = self_signed(7, "Owner Key");
        let requests = vec![
            add(3, ListKind::Deny, hash(0x10)),
            signed(4, Operation::Delete, ListKind::Allow, hash(0x20), 7, &owner),
        ];
        let batch = encode_batch(&requests).unwrap();
        assert_eq!(&batch[..4], &PENDING_MAGIC);
        assert_eq!(decode_batch(&batch).unwrap().requests, requests);

        assert_eq!(decode_batch(&batch[..batch.len() - 1]), Err(MalformedError::InvalidRequest));
        let mut trailing = batch.clone();
        trailing.push(0);
        assert_eq!(decode_batch(&trailing), Err(MalformedError::InvalidRequest));
        let mut version = batch;
        version[4] = 9;
        assert_eq!(decode_batch(&version), Err(MalformedError::InvalidRequest));
    }

    #[test]
    fn test_secret_not_printed() {
        let authority = SecretAuthority::new(SECRET);
        let printed = format!("{:?}", authority);
        assert!(!printed.contains("horse"));
    }

    proptest! {
        #[test]
        fn decode_batch_never_panics(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            let _ = decode_batch(&data);
        }

        #[test]
        fn decode_batch_after_header_never_panics(
            tail in proptest::collection::vec(any::<u8>(), 0..256)
        ) {
            let mut data = PENDING_MAGIC.to_vec();
            data.extend_from_slice(&PENDING_VERSION.to_le_bytes());
            data.extend_from_slice(&tail);
            let _ = decode_batch(&data);
        }
    }
}
