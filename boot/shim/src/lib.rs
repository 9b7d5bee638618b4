//! # Helix Shim
//!
//! Secure Boot shim engine: a trust store of Machine Owner Keys and image
//! hashes, an Authenticode/PKCS#7 verifier over it, an enrollment processor
//! for owner-requested changes, and the orchestrator that decides whether
//! the next-stage loader may run.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    orchestrator (Shim)                       │
//! │        boot → pending enrollment → decide → shutdown         │
//! ├────────────────┬──────────────────────┬──────────────────────┤
//! │    enroll      │      verifier        │       binding        │
//! │ pending codec  │ chains, signer rule  │ supported/start/stop │
//! ├────────────────┴──────────┬───────────┴──────────────────────┤
//! │          store            │   image · pkcs7 · x509 · der     │
//! │  Allow · Deny · Vendor    │   crypto (sha2, p256, RSA)       │
//! ├───────────────────────────┴──────────────────────────────────┤
//! │       variable (shadow-slot commits) · siglist · guid        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! let config = ShimConfig::parse(CONFIG)?.with_vendor_entry(vendor_ca);
//! let mut shim = Shim::boot(firmware_variables, &config, &authority)?;
//!
//! let decision = shim.decide_pe(&loader_bytes);
//! if decision.allows_execution() {
//!     let variables = shim.shutdown()?;
//!     // hand control to the loader
//! }
//! ```

#![cfg_attr(not(test), no_std)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

extern crate alloc;

// =============================================================================
// MODULES
// =============================================================================

/// Error types
pub mod error;

/// GUIDs and the read-only registry
pub mod guid;

/// Firmware variable storage
pub mod variable;

/// Minimal DER reader
pub mod der;

/// Hashes, signatures and public keys
pub mod crypto;

/// Trusted time
pub mod time;

/// X.509 certificates
pub mod x509;

/// PKCS#7 signed data
pub mod pkcs7;

/// EFI signature lists
pub mod siglist;

/// Configuration
pub mod config;

/// Trust store
pub mod store;

/// Signed images and Authenticode hashing
pub mod image;

/// Signature verification
pub mod verifier;

/// Enrollment request processing
pub mod enroll;

/// Boot-time orchestration
pub mod orchestrator;

/// Controller binding lifecycle
pub mod binding;

#[cfg(test)]
mod testutil;

// =============================================================================
// RE-EXPORTS
// =============================================================================

pub use binding::{ControllerHandle, DriverBinding, ProtocolHost, ShimBinding};
pub use config::ShimConfig;
pub use enroll::{
    EnrollmentAuthority, EnrollmentRequest, NoAuthority, ProcessReport, SecretAuthority,
};
pub use error::{
    AuthorizationError, ConflictError, MalformedError, PersistenceError, Result, ShimError,
};
pub use guid::{registry, Guid};
pub use image::SignedImage;
pub use orchestrator::{Action, Decision, EnforcementPolicy, Shim};
pub use store::{ListKind, MatchedEntry, Operation, TrustEntry, TrustSnapshot, TrustStore};
pub use time::TimeSource;
pub use variable::{MemoryVariableStore, VariableAttributes, VariableStore};
pub use verifier::{verify, Outcome, SignerPolicy, VerificationResult, VerifierPolicy};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
