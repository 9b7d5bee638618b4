//! Verification Orchestrator
//!
//! Drives the shim through its lifetime:
//!
//! ```text
//!  boot ──▶ provision ──▶ load ──▶ pending enrollment ──▶ ready
//!                          │                               │
//!                 MissingTrustAnchors          decide(image) * n
//!                       (abort)                            │
//!                                                     shutdown ──▶ loader
//! ```
//!
//! Pending enrollment runs exactly once per boot, before the first image is
//! verified. Every decision is logged and kept in a small audit history.

use core::fmt;

use heapless::HistoryBuffer;

use crate::config::ShimConfig;
use crate::crypto::HashAlgorithm;
use crate::enroll::{process_pending, EnrollmentAuthority, ProcessReport};
use crate::error::{PersistenceError, Result};
use crate::guid::{Guid, GLOBAL_VARIABLE_GUID};
use crate::image::SignedImage;
use crate::store::{ListKind, TrustStore};
use crate::time::{NoTrustedTime, TimeSource};
use crate::variable::VariableStore;
use crate::verifier::{verify, Outcome, VerificationResult, VerifierPolicy};

/// Firmware variable reporting whether Secure Boot is on
pub const SECURE_BOOT_VARIABLE: &str = "SecureBoot";

/// Decisions kept in the audit history
pub const AUDIT_CAPACITY: usize = 32;

// =============================================================================
// ENFORCEMENT
// =============================================================================

/// What happens to images that are not trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforcementPolicy {
    /// Untrusted images are refused
    Enforcing,
    /// Untrusted images run; the decision is still recorded
    Permissive,
}

impl EnforcementPolicy {
    /// Enforce when firmware Secure Boot is on and the owner has not
    /// disabled shim validation
    pub fn from_variables<V: VariableStore + ?Sized>(variables: &V, config: &ShimConfig) -> Self {
        let secure_boot = flag_set(variables, SECURE_BOOT_VARIABLE, &GLOBAL_VARIABLE_GUID);
        let validation_disabled =
            flag_set(variables, &config.records.validation_state, &config.namespace);

        if validation_disabled {
            log::warn!("Shim validation disabled by {}", config.records.validation_state);
        }
        if secure_boot && !validation_disabled {
            Self::Enforcing
        } else {
            Self::Permissive
        }
    }

    /// Check if untrusted images are refused
    pub fn is_enforcing(&self) -> bool {
        matches!(self, Self::Enforcing)
    }
}

fn flag_set<V: VariableStore + ?Sized>(variables: &V, name: &str, vendor: &Guid) -> bool {
    match variables.get(name, vendor) {
        Ok(Some(var)) => var.data.first() == Some(&1),
        Ok(None) => false,
        Err(err) => {
            log::warn!("Cannot read {}: {}", name, err);
            false
        }
    }
}

// =============================================================================
// DECISIONS
// =============================================================================

/// Whether the loader may start an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Start the image
    Execute,
    /// Do not start the image
    Refuse,
}

/// Verification result plus the action taken on it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// What the verifier concluded
    pub result: VerificationResult,
    /// What the loader should do
    pub action: Action,
}

impl Decision {
    /// Check if the loader may start the image
    pub fn allows_execution(&self) -> bool {
        self.action == Action::Execute
    }
}

/// One entry of the audit history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditRecord {
    /// Running decision number since boot
    pub sequence: u64,
    /// First bytes of the image's SHA-256 digest
    pub fingerprint: [u8; 8],
    /// Verification outcome
    pub outcome: Outcome,
    /// List of the deciding entry, if any
    pub matched: Option<ListKind>,
    /// Action taken
    pub action: Action,
}

// =============================================================================
// SHIM
// =============================================================================

/// A booted shim
pub struct Shim<V: VariableStore> {
    store: TrustStore<V>,
    enforcement: EnforcementPolicy,
    policy: VerifierPolicy,
    enrollment: ProcessReport,
    audit: HistoryBuffer<AuditRecord, AUDIT_CAPACITY>,
    decisions: u64,
}

impl<V: VariableStore> Shim<V> {
    /// Provision, load the trust store and apply pending enrollment
    ///
    /// Only missing vendor trust anchors stop the boot; every other storage
    /// or enrollment problem is logged and the shim comes up with what it
    /// could load.
    pub fn boot(
        mut variables: V,
        config: &ShimConfig,
        authority: &dyn EnrollmentAuthority,
    ) -> Result<Self> {
        log::info!("Shim starting");

        if let Err(err) = TrustStore::provision(&mut variables, config) {
            log::warn!("Vendor provisioning failed: {}", err);
        }
        let enforcement = EnforcementPolicy::from_variables(&variables, config);

        let mut store = TrustStore::load(variables, config)?;

        let enrollment = match process_pending(&mut store, authority) {
            Ok(report) => report,
            Err(err) => {
                log::error!("Pending enrollment failed: {}", err);
                ProcessReport::default()
            }
        };

        log::info!(
            "Shim ready: {:?}, {} enrollment requests applied",
            enforcement,
            enrollment.applied()
        );

        Ok(Self {
            store,
            enforcement,
            policy: VerifierPolicy::from_config(config, &NoTrustedTime),
            enrollment,
            audit: HistoryBuffer::new(),
            decisions: 0,
        })
    }

    /// Override the enforcement policy read from firmware variables
    pub fn with_enforcement(mut self, enforcement: EnforcementPolicy) -> Self {
        self.enforcement = enforcement;
        self
    }

    /// Check validity windows against `time`
    pub fn with_time_source(mut self, time: &dyn TimeSource) -> Self {
        self.policy.trusted_time = time.now();
        self
    }

    /// Verify an image and decide whether it may run
    pub fn decide(&mut self, image: &SignedImage) -> Decision {
        let result = verify(image, &self.store.snapshot(), &self.policy);
        self.record(&image.digest(HashAlgorithm::Sha256), result)
    }

    /// [`Shim::decide`] on raw PE bytes; unparseable images are Malformed
    pub fn decide_pe(&mut self, bytes: &[u8]) -> Decision {
        match SignedImage::from_pe(bytes) {
            Ok(image) => self.decide(&image),
            Err(err) => {
                log::warn!("Image rejected by PE parser: {}", err);
                let result = VerificationResult {
                    outcome: Outcome::Malformed,
                    matched_entry: None,
                };
                self.record(&HashAlgorithm::Sha256.digest(bytes), result)
            }
        }
    }

    fn record(&mut self, digest: &[u8], result: VerificationResult) -> Decision {
        let action = if result.is_trusted() || !self.enforcement.is_enforcing() {
            Action::Execute
        } else {
            Action::Refuse
        };

        match (result.outcome, action) {
            (Outcome::Trusted, _) => {
                let list = result.matched_entry.as_ref().map(|m| m.list);
                log::info!("Image trusted via {:?}", list)
            }
            (outcome, Action::Execute) => {
                log::warn!("Image {} but allowed (permissive)", outcome.name())
            }
            (outcome, Action::Refuse) => log::warn!("Image {}: refusing to start", outcome.name()),
        }

        let mut fingerprint = [0u8; 8];
        for (dst, src) in fingerprint.iter_mut().zip(digest) {
            *dst = *src;
        }
        self.decisions += 1;
        self.audit.write(AuditRecord {
            sequence: self.decisions,
            fingerprint,
            outcome: result.outcome,
            matched: result.matched_entry.as_ref().map(|m| m.list),
            action,
        });

        Decision { result, action }
    }

    /// Enforcement in effect
    pub fn enforcement(&self) -> EnforcementPolicy {
        self.enforcement
    }

    /// Outcome of this boot's pending enrollment
    pub fn enrollment_report(&self) -> &ProcessReport {
        &self.enrollment
    }

    /// Recent decisions, oldest first
    pub fn audit(&self) -> impl Iterator<Item = &AuditRecord> {
        self.audit.oldest_ordered()
    }

    /// Trust store
    pub fn store(&self) -> &TrustStore<V> {
        &self.store
    }

    /// Publish runtime mirrors and hand the variable backend back
    pub fn shutdown(mut self) -> core::result::Result<V, PersistenceError> {
        self.store.flush()?;
        log::info!("Shim shut down after {} decisions", self.decisions);
        Ok(self.store.into_variables())
    }
}

impl<V: VariableStore> fmt::Debug for Shim<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shim")
            .field("enforcement", &self.enforcement)
            .field("policy", &self.policy)
            .field("generation", &self.store.generation())
            .field("decisions", &self.decisions)
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================
