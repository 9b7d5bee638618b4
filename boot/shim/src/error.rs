//! Error types for the shim engine
//!
//! Every fallible operation in the engine returns one of the enums below.
//! Nothing here is allowed to abort: parser failures become
//! [`MalformedError`] and are turned into a verification outcome by the
//! verifier, enrollment failures are dropped request by request, and only a
//! missing set of vendor trust anchors stops the boot sequence.

use thiserror::Error;

use crate::store::ListKind;

/// Result type for shim operations
pub type Result<T> = core::result::Result<T, ShimError>;

/// Top-level shim error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShimError {
    /// Storage unreadable or unwritable
    #[error("persistence: {0}")]
    Persistence(#[from] PersistenceError),

    /// Conflicting mutation of the trust store
    #[error("conflict: {0}")]
    Conflict(#[from] ConflictError),

    /// Structurally invalid input
    #[error("malformed: {0}")]
    Malformed(#[from] MalformedError),

    /// An enrollment request failed its authenticity check
    #[error("authorization: {0}")]
    Authorization(#[from] AuthorizationError),
}

impl ShimError {
    /// True for the only error class allowed to stop the boot sequence
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Persistence(PersistenceError::MissingTrustAnchors))
    }

    /// Short name used in log lines
    pub fn name(&self) -> &'static str {
        match self {
            Self::Persistence(_) => "PersistenceError",
            Self::Conflict(_) => "ConflictError",
            Self::Malformed(_) => "Malformed",
            Self::Authorization(_) => "AuthorizationError",
        }
    }
}

// =============================================================================
// PERSISTENCE
// =============================================================================

/// Variable storage failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PersistenceError {
    /// The record exceeds the storage bound
    #[error("record of {size} bytes exceeds limit of {limit} bytes")]
    TooLarge {
        /// Requested size
        size: usize,
        /// Backend limit
        limit: usize,
    },

    /// The backing store has no room left
    #[error("variable storage is full")]
    OutOfResources,

    /// The record is write-protected for this caller
    #[error("record is write protected")]
    WriteProtected,

    /// The device reported an error during read or write
    #[error("device error")]
    DeviceError,

    /// The record exists but its contents cannot be decoded
    #[error("record is corrupt")]
    Corrupt,

    /// The vendor trust anchors could not be loaded
    #[error("vendor trust anchors are missing")]
    MissingTrustAnchors,
}

// =============================================================================
// CONFLICT
// =============================================================================

/// Conflicting trust store mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConflictError {
    /// The targeted list cannot be changed through enrollment
    #[error("{0:?} list is read-only")]
    ReadOnlyList(ListKind),

    /// The store changed between snapshot and commit
    #[error("store generation {expected} is stale (current {current})")]
    StaleGeneration {
        /// Generation the caller computed against
        expected: u64,
        /// Generation at commit time
        current: u64,
    },
}

// =============================================================================
// MALFORMED INPUT
// =============================================================================

/// Structurally invalid binary input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MalformedError {
    /// Input ended before a declared length
    #[error("truncated input")]
    Truncated,

    /// A DER tag did not match the expected one
    #[error("unexpected tag {found:#04x}, expected {expected:#04x}")]
    UnexpectedTag {
        /// Tag that was required
        expected: u8,
        /// Tag that was read
        found: u8,
    },

    /// A length field is invalid (indefinite, oversized, non-minimal)
    #[error("invalid length encoding")]
    InvalidLength,

    /// Extra bytes after a complete structure
    #[error("trailing data")]
    TrailingData,

    /// Invalid INTEGER, OID, BIT STRING or time value
    #[error("invalid primitive value")]
    InvalidValue,

    /// Certificate does not follow the X.509 layout
    #[error("invalid certificate")]
    InvalidCertificate,

    /// Signed-data envelope does not follow the PKCS#7 layout
    #[error("invalid signed data")]
    InvalidSignedData,

    /// Public key encoding is invalid
    #[error("invalid public key")]
    InvalidKey,

    /// PE/COFF headers are inconsistent
    #[error("invalid PE image")]
    InvalidImage,

    /// WIN_CERTIFICATE header is inconsistent
    #[error("invalid WIN_CERTIFICATE")]
    InvalidWinCertificate,

    /// EFI_SIGNATURE_LIST header is inconsistent
    #[error("invalid signature list")]
    InvalidSignatureList,

    /// Enrollment request framing is invalid
    #[error("invalid enrollment request")]
    InvalidRequest,
}

// =============================================================================
// AUTHORIZATION
// =============================================================================

/// Enrollment request authenticity failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthorizationError {
    /// Shared-secret digest does not match
    #[error("shared secret mismatch")]
    SecretMismatch,

    /// No shared secret is available to check against
    #[error("no shared secret configured")]
    NoSecret,

    /// Signing certificate is not trusted by the store
    #[error("authorizing certificate is not trusted")]
    UntrustedSigner,

    /// Signing certificate is denied by the store
    #[error("authorizing certificate is denied")]
    DeniedSigner,

    /// Signature does not verify
    #[error("authorization signature is invalid")]
    BadSignature,

    /// Authorization payload could not be decoded
    #[error("authorization data is malformed")]
    Malformed,
}

// =============================================================================
// TESTS
// =============================================================================
