//! Trust Store
//!
//! The enrolled (Allow), denied (Deny) and vendor-provided (Vendor) lists of
//! certificates and image hashes, persisted as EFI signature lists.
//!
//! # Invariants
//!
//! - Deny overrides Allow and Vendor: lookups consult Deny first.
//! - Vendor is read-only to enrollment and must be present to boot.
//! - A mutation builds the new list, commits it, and only then replaces the
//!   in-memory list. A failed commit changes nothing.
//! - Readers work on a [`TrustSnapshot`]; later mutations never alter it.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use crate::config::ShimConfig;
use crate::crypto::{ct_eq, HashAlgorithm};
use crate::error::{ConflictError, MalformedError, PersistenceError, Result};
use crate::guid::{Guid, CERT_SHA256_GUID, CERT_SHA384_GUID, CERT_SHA512_GUID, CERT_X509_GUID};
use crate::siglist::{encode_signature_lists, parse_signature_lists, SignatureEntry, SignatureList};
use crate::variable::{commit_record, read_record, VariableAttributes, VariableStore};
use crate::x509::Certificate;

// =============================================================================
// ENTRIES
// =============================================================================

/// Which list an entry belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListKind {
    /// Enrolled by the machine owner
    Allow,
    /// Explicitly distrusted
    Deny,
    /// Built-in vendor anchors
    Vendor,
}

impl ListKind {
    /// List name for log lines
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::Vendor => "vendor",
        }
    }
}

impl fmt::Display for ListKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A trusted or distrusted item
#[derive(Debug, Clone)]
pub enum TrustEntry {
    /// A certificate, matched by exact DER encoding
    Certificate(Certificate),
    /// An image digest
    Hash {
        /// Digest algorithm
        algorithm: HashAlgorithm,
        /// Digest bytes
        digest: Vec<u8>,
    },
}

const KIND_CERTIFICATE: u8 = 0x01;
const KIND_HASH: u8 = 0x02;

fn algorithm_tag(algorithm: HashAlgorithm) -> u8 {
    match algorithm {
        HashAlgorithm::Sha256 => 0x01,
        HashAlgorithm::Sha384 => 0x02,
        HashAlgorithm::Sha512 => 0x03,
    }
}

impl TrustEntry {
    /// Certificate entry from DER
    pub fn certificate(der: &[u8]) -> core::result::Result<Self, MalformedError> {
        Certificate::from_der(der).map(Self::Certificate)
    }

    /// Hash entry, checking the digest length
    pub fn hash(
        algorithm: HashAlgorithm,
        digest: &[u8],
    ) -> core::result::Result<Self, MalformedError> {
        if digest.len() != algorithm.output_size() {
            return Err(MalformedError::InvalidValue);
        }
        Ok(Self::Hash {
            algorithm,
            digest: digest.to_vec(),
        })
    }

    /// Entry payload: DER certificate or digest bytes
    pub fn payload(&self) -> &[u8] {
        match self {
            Self::Certificate(cert) => cert.der(),
            Self::Hash { digest, .. } => digest,
        }
    }

    /// EFI signature type of the entry
    pub fn signature_type(&self) -> Guid {
        match self {
            Self::Certificate(_) => CERT_X509_GUID,
            Self::Hash { algorithm: HashAlgorithm::Sha256, .. } => CERT_SHA256_GUID,
            Self::Hash { algorithm: HashAlgorithm::Sha384, .. } => CERT_SHA384_GUID,
            Self::Hash { algorithm: HashAlgorithm::Sha512, .. } => CERT_SHA512_GUID,
        }
    }

    /// Canonical encoding: `kind || algorithm || payload`
    ///
    /// Two entries are the same entry exactly when their encodings are equal.
    pub fn encoded(&self) -> Vec<u8> {
        let (kind, algorithm) = self.tags();
        let payload = self.payload();
        let mut out = Vec::with_capacity(2 + payload.len());
        out.push(kind);
        out.push(algorithm);
        out.extend_from_slice(payload);
        out
    }

    /// Decode [`TrustEntry::encoded`] bytes
    pub fn decode(bytes: &[u8]) -> core::result::Result<Self, MalformedError> {
        match bytes {
            [KIND_CERTIFICATE, 0x00, der @ ..] => Self::certificate(der),
            [KIND_HASH, tag, digest @ ..] => {
                let algorithm = HashAlgorithm::ALL
                    .into_iter()
                    .find(|alg| algorithm_tag(*alg) == *tag)
                    .ok_or(MalformedError::InvalidValue)?;
                Self::hash(algorithm, digest)
            }
            _ => Err(MalformedError::InvalidValue),
        }
    }

    /// Decode an entry of a persisted signature list
    ///
    /// Returns `Ok(None)` for signature types the store does not interpret.
    pub fn from_signature(
        signature_type: &Guid,
        data: &[u8],
    ) -> core::result::Result<Option<Self>, MalformedError> {
        let algorithm = match *signature_type {
            CERT_X509_GUID => return Self::certificate(data).map(Some),
            CERT_SHA256_GUID => HashAlgorithm::Sha256,
            CERT_SHA384_GUID => HashAlgorithm::Sha384,
            CERT_SHA512_GUID => HashAlgorithm::Sha512,
            _ => return Ok(None),
        };
        Self::hash(algorithm, data).map(Some)
    }

    fn tags(&self) -> (u8, u8) {
        match self {
            Self::Certificate(_) => (KIND_CERTIFICATE, 0x00),
            Self::Hash { algorithm, .. } => (KIND_HASH, algorithm_tag(*algorithm)),
        }
    }
}

impl PartialEq for TrustEntry {
    fn eq(&self, other: &Self) -> bool {
        self.tags() == other.tags() && self.payload() == other.payload()
    }
}

impl Eq for TrustEntry {}

/// A lookup hit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedEntry {
    /// List the entry was found in
    pub list: ListKind,
    /// The matching entry
    pub entry: TrustEntry,
}

// =============================================================================
// TRUST LIST
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
struct Slot {
    entry: TrustEntry,
    owner: Guid,
}

/// Ordered set of entries of one kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustList {
    kind: ListKind,
    slots: Vec<Slot>,
    /// Signature lists of types we do not interpret, preserved on rewrite
    opaque: Vec<SignatureList>,
}

impl TrustList {
    /// Empty list
    pub fn new(kind: ListKind) -> Self {
        Self {
            kind,
            slots: Vec::new(),
            opaque: Vec::new(),
        }
    }

    /// List built from entries, dropping duplicates
    pub fn from_entries(
        kind: ListKind,
        owner: Guid,
        entries: impl IntoIterator<Item = TrustEntry>,
    ) -> Self {
        let mut list = Self::new(kind);
        for entry in entries {
            if !list.contains(&entry) {
                list.slots.push(Slot { entry, owner });
            }
        }
        list
    }

    /// List kind
    pub fn kind(&self) -> ListKind {
        self.kind
    }

    /// Interpreted entries in order
    pub fn entries(&self) -> impl Iterator<Item = &TrustEntry> {
        self.slots.iter().map(|slot| &slot.entry)
    }

    /// Certificates in order
    pub fn certificates(&self) -> impl Iterator<Item = &Certificate> {
        self.entries().filter_map(|entry| match entry {
            TrustEntry::Certificate(cert) => Some(cert),
            TrustEntry::Hash { .. } => None,
        })
    }

    /// Number of interpreted entries
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Check if the list holds no interpreted entries
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Check membership
    pub fn contains(&self, entry: &TrustEntry) -> bool {
        self.entries().any(|e| e == entry)
    }

    /// Find a certificate by exact encoding
    pub fn find_certificate(&self, cert: &Certificate) -> Option<&TrustEntry> {
        self.entries().find(|entry| match entry {
            TrustEntry::Certificate(known) => known.der() == cert.der(),
            TrustEntry::Hash { .. } => false,
        })
    }

    /// Find a digest
    ///
    /// Every entry is compared, so the time taken does not reveal the
    /// position of a match.
    pub fn find_hash(&self, algorithm: HashAlgorithm, digest: &[u8]) -> Option<&TrustEntry> {
        let mut found = None;
        for entry in self.entries() {
            if let TrustEntry::Hash { algorithm: alg, digest: known } = entry {
                let hit = *alg == algorithm && ct_eq(known, digest);
                if hit && found.is_none() {
                    found = Some(entry);
                }
            }
        }
        found
    }

    fn with_added(&self, entry: TrustEntry, owner: Guid) -> Option<Self> {
        if self.contains(&entry) {
            return None;
        }
        let mut next = self.clone();
        next.slots.push(Slot { entry, owner });
        Some(next)
    }

    fn with_removed(&self, entry: &TrustEntry) -> Option<Self> {
        if !self.contains(entry) {
            return None;
        }
        let mut next = self.clone();
        next.slots.retain(|slot| &slot.entry != entry);
        Some(next)
    }

    /// Decode a persisted record
    ///
    /// Entries that cannot be interpreted are kept verbatim and written back
    /// unchanged.
    pub fn decode(kind: ListKind, data: &[u8]) -> core::result::Result<Self, MalformedError> {
        let mut list = Self::new(kind);

        for signature_list in parse_signature_lists(data)? {
            let mut unknown = Vec::new();
            for SignatureEntry { owner, data } in signature_list.entries {
                match TrustEntry::from_signature(&signature_list.signature_type, &data) {
                    Ok(Some(entry)) if !list.contains(&entry) => {
                        list.slots.push(Slot { entry, owner })
                    }
                    Ok(Some(_)) => {}
                    Ok(None) => unknown.push(SignatureEntry { owner, data }),
                    Err(err) => {
                        log::warn!("Keeping uninterpretable {} list entry: {}", kind, err);
                        unknown.push(SignatureEntry { owner, data });
                    }
                }
            }
            if !unknown.is_empty() {
                list.opaque.push(SignatureList {
                    signature_type: signature_list.signature_type,
                    header: signature_list.header,
                    entries: unknown,
                });
            }
        }

        Ok(list)
    }

    /// Encode as signature lists
    ///
    /// Hashes of one algorithm share a list; each certificate gets its own.
    pub fn encode(&self) -> core::result::Result<Vec<u8>, MalformedError> {
        let mut lists: Vec<SignatureList> = Vec::new();

        for algorithm in HashAlgorithm::ALL {
            let mut signature_type = None;
            let mut entries = Vec::new();
            for slot in &self.slots {
                if matches!(&slot.entry, TrustEntry::Hash { algorithm: a, .. } if *a == algorithm) {
                    signature_type = Some(slot.entry.signature_type());
                    entries.push(SignatureEntry {
                        owner: slot.owner,
                        data: slot.entry.payload().to_vec(),
                    });
                }
            }
            if let Some(signature_type) = signature_type {
                lists.push(SignatureList {
                    signature_type,
                    header: Vec::new(),
                    entries,
                });
            }
        }

        for slot in &self.slots {
            if let TrustEntry::Certificate(cert) = &slot.entry {
                lists.push(SignatureList::single(CERT_X509_GUID, slot.owner, cert.der()));
            }
        }

        lists.extend(self.opaque.iter().cloned());
        encode_signature_lists(&lists)
    }
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// Immutable view of all three lists
#[derive(Debug, Clone)]
pub struct TrustSnapshot {
    allow: Arc<TrustList>,
    deny: Arc<TrustList>,
    vendor: Arc<TrustList>,
}

impl TrustSnapshot {
    /// Snapshot over explicit lists
    pub fn from_lists(allow: TrustList, deny: TrustList, vendor: TrustList) -> Self {
        Self {
            allow: Arc::new(allow),
            deny: Arc::new(deny),
            vendor: Arc::new(vendor),
        }
    }

    /// One list
    pub fn list(&self, kind: ListKind) -> &TrustList {
        match kind {
            ListKind::Allow => &self.allow,
            ListKind::Deny => &self.deny,
            ListKind::Vendor => &self.vendor,
        }
    }

    /// Find a certificate: Deny first, then Allow, then Vendor
    pub fn lookup_certificate(&self, cert: &Certificate) -> Option<MatchedEntry> {
        [ListKind::Deny, ListKind::Allow, ListKind::Vendor]
            .into_iter()
            .find_map(|kind| {
                self.list(kind).find_certificate(cert).map(|entry| MatchedEntry {
                    list: kind,
                    entry: entry.clone(),
                })
            })
    }

    /// Find a digest: Deny first, then Allow, then Vendor
    pub fn lookup_hash(&self, algorithm: HashAlgorithm, digest: &[u8]) -> Option<MatchedEntry> {
        [ListKind::Deny, ListKind::Allow, ListKind::Vendor]
            .into_iter()
            .find_map(|kind| {
                self.list(kind).find_hash(algorithm, digest).map(|entry| MatchedEntry {
                    list: kind,
                    entry: entry.clone(),
                })
            })
    }

    /// Check if a certificate is in Deny
    pub fn is_denied(&self, cert: &Certificate) -> bool {
        self.deny.find_certificate(cert).is_some()
    }

    /// Certificates usable as chain anchors: Allow then Vendor
    pub fn anchors(&self) -> impl Iterator<Item = (ListKind, &Certificate)> {
        self.allow
            .certificates()
            .map(|cert| (ListKind::Allow, cert))
            .chain(self.vendor.certificates().map(|cert| (ListKind::Vendor, cert)))
    }
}

// =============================================================================
// STORE
// =============================================================================

/// Trust list mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Add an entry (idempotent)
    Add,
    /// Remove an entry (no-op if absent)
    Delete,
}

/// Result of a mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Entry was added and committed
    Added,
    /// Entry was already present; nothing written
    AlreadyPresent,
    /// Entry was removed and committed
    Removed,
    /// Entry was absent; nothing written
    NotPresent,
}

impl ApplyOutcome {
    /// Check if the store changed
    pub fn changed(&self) -> bool {
        matches!(self, Self::Added | Self::Removed)
    }
}

/// Persistent trust store over a variable backend
pub struct TrustStore<V: VariableStore> {
    variables: V,
    config: ShimConfig,
    allow: Arc<TrustList>,
    deny: Arc<TrustList>,
    vendor: Arc<TrustList>,
    generation: u64,
}

impl<V: VariableStore> TrustStore<V> {
    /// Write the vendor record from configuration if it does not exist
    ///
    /// Returns `true` if the record was written.
    pub fn provision(
        variables: &mut V,
        config: &ShimConfig,
    ) -> core::result::Result<bool, PersistenceError> {
        let records = &config.records;
        if read_record(variables, &records.vendor, &config.namespace)?.is_some() {
            return Ok(false);
        }
        if config.vendor_defaults.is_empty() {
            return Ok(false);
        }

        let defaults = config.vendor_defaults.iter().cloned();
        let list = TrustList::from_entries(ListKind::Vendor, config.owner, defaults);
        let bytes = list.encode().map_err(|_| PersistenceError::Corrupt)?;
        check_size(&bytes, config.max_record_size)?;
        commit_record(
            variables,
            &records.vendor,
            &config.namespace,
            VariableAttributes::BOOT_NV,
            &bytes,
        )?;

        log::info!("Provisioned {} vendor trust anchors", list.len());
        Ok(true)
    }

    /// Load all lists
    ///
    /// A missing or unreadable vendor record is fatal. A missing or corrupt
    /// allow or deny record is treated as empty.
    pub fn load(
        mut variables: V,
        config: &ShimConfig,
    ) -> core::result::Result<Self, PersistenceError> {
        let records = &config.records;

        let vendor = match read_record(&mut variables, &records.vendor, &config.namespace) {
            Ok(Some(var)) => TrustList::decode(ListKind::Vendor, &var.data).map_err(|err| {
                log::error!("Vendor record is corrupt: {}", err);
                PersistenceError::MissingTrustAnchors
            })?,
            Ok(None) => {
                log::error!("Vendor record {} not found", records.vendor);
                return Err(PersistenceError::MissingTrustAnchors);
            }
            Err(err) => {
                log::error!("Vendor record unreadable: {}", err);
                return Err(PersistenceError::MissingTrustAnchors);
            }
        };
        if vendor.is_empty() {
            log::error!("Vendor record holds no usable trust anchors");
            return Err(PersistenceError::MissingTrustAnchors);
        }

        let namespace = &config.namespace;
        let allow = load_optional(&mut variables, &records.allow, namespace, ListKind::Allow);
        let deny = load_optional(&mut variables, &records.deny, namespace, ListKind::Deny);

        log::info!(
            "Trust store loaded: {} vendor, {} allowed, {} denied",
            vendor.len(),
            allow.len(),
            deny.len()
        );

        Ok(Self {
            variables,
            config: config.clone(),
            allow: Arc::new(allow),
            deny: Arc::new(deny),
            vendor: Arc::new(vendor),
            generation: 0,
        })
    }

    /// Immutable view for verification
    pub fn snapshot(&self) -> TrustSnapshot {
        TrustSnapshot {
            allow: Arc::clone(&self.allow),
            deny: Arc::clone(&self.deny),
            vendor: Arc::clone(&self.vendor),
        }
    }

    /// Number of committed changes since load
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Find a certificate: Deny first, then Allow, then Vendor
    pub fn lookup_certificate(&self, cert: &Certificate) -> Option<MatchedEntry> {
        self.snapshot().lookup_certificate(cert)
    }

    /// Find a digest: Deny first, then Allow, then Vendor
    pub fn lookup_hash(&self, algorithm: HashAlgorithm, digest: &[u8]) -> Option<MatchedEntry> {
        self.snapshot().lookup_hash(algorithm, digest)
    }

    /// Add or remove an entry of the allow or deny list
    pub fn apply(
        &mut self,
        operation: Operation,
        list: ListKind,
        entry: TrustEntry,
    ) -> Result<ApplyOutcome> {
        let (current, name) = match list {
            ListKind::Allow => (&self.allow, &self.config.records.allow),
            ListKind::Deny => (&self.deny, &self.config.records.deny),
            ListKind::Vendor => return Err(ConflictError::ReadOnlyList(list).into()),
        };

        let (next, outcome) = match operation {
            Operation::Add => match current.with_added(entry, self.config.owner) {
                Some(next) => (next, ApplyOutcome::Added),
                None => return Ok(ApplyOutcome::AlreadyPresent),
            },
            Operation::Delete => match current.with_removed(&entry) {
                Some(next) => (next, ApplyOutcome::Removed),
                None => return Ok(ApplyOutcome::NotPresent),
            },
        };

        let bytes = next.encode()?;
        check_size(&bytes, self.config.max_record_size)?;
        commit_record(
            &mut self.variables,
            name,
            &self.config.namespace,
            VariableAttributes::BOOT_NV,
            &bytes,
        )?;

        // Committed: publish
        let next = Arc::new(next);
        match list {
            ListKind::Allow => self.allow = next,
            ListKind::Deny => self.deny = next,
            ListKind::Vendor => {}
        }
        self.generation += 1;

        log::info!("{:?} on {} list committed (generation {})", operation, list, self.generation);
        Ok(outcome)
    }

    /// [`TrustStore::apply`] only if no other change was committed since
    /// `expected` was observed
    pub fn apply_if_generation(
        &mut self,
        expected: u64,
        operation: Operation,
        list: ListKind,
        entry: TrustEntry,
    ) -> Result<ApplyOutcome> {
        if expected != self.generation {
            return Err(ConflictError::StaleGeneration {
                expected,
                current: self.generation,
            }
            .into());
        }
        self.apply(operation, list, entry)
    }

    /// Publish volatile copies of the allow and deny lists for the OS
    pub fn flush(&mut self) -> core::result::Result<(), PersistenceError> {
        if !self.config.mirror_runtime {
            return Ok(());
        }

        let records = &self.config.records;
        let mirrors = [(&self.allow, &records.allow_runtime), (&self.deny, &records.deny_runtime)];
        for (list, name) in mirrors {
            let bytes = list.encode().map_err(|_| PersistenceError::Corrupt)?;
            commit_record(
                &mut self.variables,
                name,
                &self.config.namespace,
                VariableAttributes::RUNTIME_MIRROR,
                &bytes,
            )?;
        }

        log::debug!("Runtime trust mirrors published");
        Ok(())
    }

    /// Configuration the store was loaded with
    pub fn config(&self) -> &ShimConfig {
        &self.config
    }

    /// Variable backend
    pub fn variables(&self) -> &V {
        &self.variables
    }

    /// Variable backend, for records the store does not own
    pub fn variables_mut(&mut self) -> &mut V {
        &mut self.variables
    }

    /// Give the backend back
    pub fn into_variables(self) -> V {
        self.variables
    }
}

fn load_optional<V: VariableStore>(
    variables: &mut V,
    name: &str,
    namespace: &Guid,
    kind: ListKind,
) -> TrustList {
    match read_record(variables, name, namespace) {
        Ok(Some(var)) => TrustList::decode(kind, &var.data).unwrap_or_else(|err| {
            log::warn!("{} record {} is corrupt ({}), treating as empty", kind, name, err);
            TrustList::new(kind)
        }),
        Ok(None) => TrustList::new(kind),
        Err(err) => {
            log::warn!("{} record {} unreadable ({}), treating as empty", kind, name, err);
            TrustList::new(kind)
        }
    }
}

fn check_size(bytes: &[u8], limit: usize) -> core::result::Result<(), PersistenceError> {
    if bytes.len() > limit {
        return Err(PersistenceError::TooLarge {
            size: bytes.len(),
            limit,
        });
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
