//! Shim Configuration
//!
//! Record names, ownership GUIDs, vendor trust anchors and verification
//! knobs. Built in code with the setters below or parsed from a small
//! `key = value` text file:
//!
//! ```text
//! # shim.conf
//! [records]
//! allow = MokList
//! deny = MokListX
//!
//! [policy]
//! signer_policy = all
//! max_chain_depth = 4
//! ```

use alloc::string::String;
use alloc::vec::Vec;

use thiserror::Error;

use crate::guid::{parse_guid, Guid, MOK_OWNER_GUID};
use crate::store::TrustEntry;
use crate::variable::DEFAULT_MAX_RECORD_SIZE;
use crate::verifier::SignerPolicy;

/// Default chain depth bound
pub const DEFAULT_MAX_CHAIN_DEPTH: usize = 8;

/// Record names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordNames {
    /// Enrolled keys and hashes
    pub allow: String,
    /// Denied keys and hashes
    pub deny: String,
    /// Vendor trust anchors
    pub vendor: String,
    /// Pending enrollment area
    pub pending: String,
    /// Volatile mirror of the allow list for the OS
    pub allow_runtime: String,
    /// Volatile mirror of the deny list for the OS
    pub deny_runtime: String,
    /// Validation-disable flag set by the enrollment tool
    pub validation_state: String,
}

impl Default for RecordNames {
    fn default() -> Self {
        Self {
            allow: String::from("MokList"),
            deny: String::from("MokListX"),
            vendor: String::from("MokVendorDb"),
            pending: String::from("MokPending"),
            allow_runtime: String::from("MokListRT"),
            deny_runtime: String::from("MokListXRT"),
            validation_state: String::from("MokSBState"),
        }
    }
}

/// Shim configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ShimConfig {
    /// Vendor GUID every shim record is stored under
    pub namespace: Guid,
    /// `SignatureOwner` written into new list entries
    pub owner: Guid,
    /// Record names
    pub records: RecordNames,
    /// Trust anchors written on first boot when no vendor record exists
    pub vendor_defaults: Vec<TrustEntry>,
    /// Multi-signer acceptance rule
    pub signer_policy: SignerPolicy,
    /// Longest certificate chain walked, leaf included
    pub max_chain_depth: usize,
    /// Largest list record the store will write
    pub max_record_size: usize,
    /// Publish volatile copies of the allow and deny lists at shutdown
    pub mirror_runtime: bool,
}

impl Default for ShimConfig {
    fn default() -> Self {
        Self {
            namespace: MOK_OWNER_GUID,
            owner: MOK_OWNER_GUID,
            records: RecordNames::default(),
            vendor_defaults: Vec::new(),
            signer_policy: SignerPolicy::default(),
            max_chain_depth: DEFAULT_MAX_CHAIN_DEPTH,
            max_record_size: DEFAULT_MAX_RECORD_SIZE,
            mirror_runtime: true,
        }
    }
}

impl ShimConfig {
    /// Create default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a vendor trust anchor
    pub fn with_vendor_entry(mut self, entry: TrustEntry) -> Self {
        self.vendor_defaults.push(entry);
        self
    }

    /// Set the multi-signer rule
    pub fn with_signer_policy(mut self, policy: SignerPolicy) -> Self {
        self.signer_policy = policy;
        self
    }

    /// Set the chain depth bound
    pub fn with_max_chain_depth(mut self, depth: usize) -> Self {
        self.max_chain_depth = depth;
        self
    }

    /// Set the record size bound
    pub fn with_max_record_size(mut self, size: usize) -> Self {
        self.max_record_size = size;
        self
    }

    /// Enable or disable runtime mirrors
    pub fn with_runtime_mirror(mut self, enabled: bool) -> Self {
        self.mirror_runtime = enabled;
        self
    }

    /// Parse from string, starting from the defaults
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let mut section: Option<&str> = None;

        for (index, raw) in content.lines().enumerate() {
            let line = raw.trim();
            let line_no = index + 1;

            // Skip comments and empty lines
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }

            if let Some(name) = line.strip_prefix('[') {
                let name = name
                    .strip_suffix(']')
                    .ok_or(ConfigError::InvalidSyntax { line: line_no })?;
                section = Some(name.trim());
                continue;
            }

            let (key, value) =
                parse_key_value(line).ok_or(ConfigError::InvalidSyntax { line: line_no })?;
            config
                .apply_setting(section, key, value)
                .map_err(|_| ConfigError::InvalidValue { line: line_no })?;
        }

        if config.max_chain_depth == 0 {
            return Err(ConfigError::InvalidValue { line: 0 });
        }
        Ok(config)
    }

    /// Apply a setting; unknown keys are ignored
    fn apply_setting(&mut self, section: Option<&str>, key: &str, value: &str) -> Result<(), ()> {
        match section {
            None | Some("shim") => match key {
                "namespace" => self.namespace = parse_guid(value).ok_or(())?,
                "owner" => self.owner = parse_guid(value).ok_or(())?,
                _ => {}
            },
            Some("records") => {
                let slot = match key {
                    "allow" => &mut self.records.allow,
                    "deny" => &mut self.records.deny,
                    "vendor" => &mut self.records.vendor,
                    "pending" => &mut self.records.pending,
                    "allow_runtime" => &mut self.records.allow_runtime,
                    "deny_runtime" => &mut self.records.deny_runtime,
                    "validation_state" => &mut self.records.validation_state,
                    _ => return Ok(()),
                };
                if value.is_empty() {
                    return Err(());
                }
                *slot = String::from(value);
            }
            Some("policy") => match key {
                "signer_policy" => {
                    self.signer_policy = match value.to_ascii_lowercase().as_str() {
                        "any" => SignerPolicy::Any,
                        "all" => SignerPolicy::All,
                        _ => return Err(()),
                    }
                }
                "max_chain_depth" => self.max_chain_depth = value.parse().map_err(|_| ())?,
                "max_record_size" => self.max_record_size = value.parse().map_err(|_| ())?,
                "mirror_runtime" => self.mirror_runtime = parse_bool(value).ok_or(())?,
                _ => {}
            },
            _ => {}
        }
        Ok(())
    }
}

/// Parse key-value pair
fn parse_key_value(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }

    // Remove quotes
    let value = value.trim().trim_matches('"').trim_matches('\'');
    Some((key, value))
}

/// Parse bool
fn parse_bool(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "yes" | "1" | "on" | "enabled" => Some(true),
        "false" | "no" | "0" | "off" | "disabled" => Some(false),
        _ => None,
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Configuration error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A line is neither a section, a comment nor `key = value`
    #[error("syntax error on line {line}")]
    InvalidSyntax {
        /// 1-based line number
        line: usize,
    },
    /// A value could not be parsed for its key
    #[error("invalid value on line {line}")]
    InvalidValue {
        /// 1-based line number, 0 for whole-file checks
        line: usize,
    },
}

// =============================================================================
// TESTS
// =============================================================================
