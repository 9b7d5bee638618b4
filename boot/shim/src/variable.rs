//! Variable Services
//!
//! Named, attribute-tagged, size-bounded records: the persistence layer the
//! trust store and the enrollment processor sit on. Firmware variable
//! services are expected to commit a write atomically; for backends that do
//! not, [`commit_record`] stages the new value in a checksummed shadow record
//! first so an interrupted write never leaves a truncated record behind.

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use bitflags::bitflags;
use sha2::{Digest, Sha256};

use crate::error::PersistenceError;
use crate::guid::Guid;

// =============================================================================
// VARIABLE ATTRIBUTES
// =============================================================================

bitflags! {
    /// Variable attributes
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct VariableAttributes: u32 {
        /// Non-volatile (survives reset)
        const NON_VOLATILE = 0x0000_0001;
        /// Boot service access
        const BOOTSERVICE_ACCESS = 0x0000_0002;
        /// Runtime access
        const RUNTIME_ACCESS = 0x0000_0004;
        /// Hardware error record
        const HARDWARE_ERROR_RECORD = 0x0000_0008;
        /// Authenticated write access (deprecated)
        const AUTHENTICATED_WRITE_ACCESS = 0x0000_0010;
        /// Time based authenticated write
        const TIME_BASED_AUTHENTICATED_WRITE_ACCESS = 0x0000_0020;
        /// Append write
        const APPEND_WRITE = 0x0000_0040;

        /// Persisted trust lists and pending requests: NV + BS
        const BOOT_NV = Self::NON_VOLATILE.bits() | Self::BOOTSERVICE_ACCESS.bits();
        /// Volatile copies exported to the OS: BS + RT
        const RUNTIME_MIRROR = Self::BOOTSERVICE_ACCESS.bits() | Self::RUNTIME_ACCESS.bits();
    }
}

impl VariableAttributes {
    /// Is non-volatile
    pub fn is_non_volatile(self) -> bool {
        self.contains(Self::NON_VOLATILE)
    }

    /// Is authenticated
    pub fn is_authenticated(self) -> bool {
        self.intersects(
            Self::TIME_BASED_AUTHENTICATED_WRITE_ACCESS | Self::AUTHENTICATED_WRITE_ACCESS,
        )
    }
}

// =============================================================================
// VARIABLE STORE
// =============================================================================

/// A stored record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    /// Attributes the record was written with
    pub attributes: VariableAttributes,
    /// Record contents
    pub data: Vec<u8>,
}

/// Firmware variable storage
///
/// Reads and writes are synchronous and may be slow. `set` on an atomic
/// backend either replaces the whole value or leaves the previous one.
pub trait VariableStore {
    /// Read a record; `Ok(None)` when it does not exist
    fn get(&self, name: &str, vendor: &Guid) -> Result<Option<Variable>, PersistenceError>;

    /// Create or replace a record
    fn set(
        &mut self,
        name: &str,
        vendor: &Guid,
        attributes: VariableAttributes,
        data: &[u8],
    ) -> Result<(), PersistenceError>;

    /// Remove a record; removing an absent record succeeds
    fn delete(&mut self, name: &str, vendor: &Guid) -> Result<(), PersistenceError>;

    /// Whether `set` is all-or-nothing on this backend
    fn atomic_writes(&self) -> bool {
        true
    }
}

// =============================================================================
// ATOMIC COMMIT
// =============================================================================

const SHADOW_MAGIC: [u8; 4] = *b"HXSW";
const SHADOW_HEADER_LEN: usize = 4 + 4 + 4 + 32;

fn shadow_name(name: &str) -> String {
    format!("{name}Shadow")
}

fn encode_shadow(attributes: VariableAttributes, data: &[u8]) -> Result<Vec<u8>, PersistenceError> {
    let len = u32::try_from(data.len()).map_err(|_| PersistenceError::TooLarge {
        size: data.len(),
        limit: u32::MAX as usize,
    })?;

    let mut out = Vec::with_capacity(SHADOW_HEADER_LEN + data.len());
    out.extend_from_slice(&SHADOW_MAGIC);
    out.extend_from_slice(&attributes.bits().to_le_bytes());
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(&Sha256::digest(data));
    out.extend_from_slice(data);
    Ok(out)
}

fn decode_shadow(raw: &[u8]) -> Option<Variable> {
    if raw.len() < SHADOW_HEADER_LEN || raw[0..4] != SHADOW_MAGIC {
        return None;
    }
    let attributes = u32::from_le_bytes(raw[4..8].try_into().ok()?);
    let len = u32::from_le_bytes(raw[8..12].try_into().ok()?) as usize;
    let checksum = &raw[12..44];
    let data = &raw[SHADOW_HEADER_LEN..];

    if data.len() != len || Sha256::digest(data).as_slice() != checksum {
        return None;
    }

    Some(Variable {
        attributes: VariableAttributes::from_bits_retain(attributes),
        data: data.to_vec(),
    })
}

/// Write a record so that readers see either the old or the new value
///
/// An empty `data` removes the record.
pub fn commit_record<S: VariableStore + ?Sized>(
    store: &mut S,
    name: &str,
    vendor: &Guid,
    attributes: VariableAttributes,
    data: &[u8],
) -> Result<(), PersistenceError> {
    if store.atomic_writes() {
        return if data.is_empty() {
            store.delete(name, vendor)
        } else {
            store.set(name, vendor, attributes, data)
        };
    }

    // Stage, write, then retire the stage
    let shadow = shadow_name(name);
    store.set(&shadow, vendor, VariableAttributes::BOOT_NV, &encode_shadow(attributes, data)?)?;

    if data.is_empty() {
        store.delete(name, vendor)?;
    } else {
        store.set(name, vendor, attributes, data)?;
    }

    store.delete(&shadow, vendor)
}

/// Finish or discard an interrupted [`commit_record`]
///
/// Returns `true` when a staged value was rolled forward.
pub fn recover_record<S: VariableStore + ?Sized>(
    store: &mut S,
    name: &str,
    vendor: &Guid,
) -> Result<bool, PersistenceError> {
    let shadow = shadow_name(name);
    let Some(staged) = store.get(&shadow, vendor)? else {
        return Ok(false);
    };

    let rolled_forward = match decode_shadow(&staged.data) {
        Some(value) => {
            log::warn!("Rolling forward interrupted write of {}", name);
            if value.data.is_empty() {
                store.delete(name, vendor)?;
            } else {
                store.set(name, vendor, value.attributes, &value.data)?;
            }
            true
        }
        None => {
            // Stage was torn, so the main record was never touched
            log::warn!("Discarding torn staging record for {}", name);
            false
        }
    };

    store.delete(&shadow, vendor)?;
    Ok(rolled_forward)
}

/// Read a record, completing any interrupted commit first
pub fn read_record<S: VariableStore + ?Sized>(
    store: &mut S,
    name: &str,
    vendor: &Guid,
) -> Result<Option<Variable>, PersistenceError> {
    if !store.atomic_writes() {
        recover_record(store, name, vendor)?;
    }
    store.get(name, vendor)
}

// =============================================================================
// IN-MEMORY STORE
// =============================================================================

/// Default record size bound, matching common firmware limits
pub const DEFAULT_MAX_RECORD_SIZE: usize = 64 * 1024;

/// Injected storage failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The write fails and stores nothing
    Fail,
    /// The write stores only the first `n` bytes, then fails
    Tear(usize),
}

/// In-memory variable storage for hosted builds and tests
#[derive(Debug, Clone)]
pub struct MemoryVariableStore {
    records: BTreeMap<(String, Guid), Variable>,
    protected: BTreeSet<(String, Guid)>,
    max_record_size: usize,
    capacity: Option<usize>,
    atomic: bool,
    /// Fault to trigger once `writes_until_fault` reaches zero
    fault: Option<(usize, Fault)>,
    writes: usize,
}

impl MemoryVariableStore {
    /// Empty atomic store
    pub fn new() -> Self {
        Self {
            records: BTreeMap::new(),
            protected: BTreeSet::new(),
            max_record_size: DEFAULT_MAX_RECORD_SIZE,
            capacity: None,
            atomic: true,
            fault: None,
            writes: 0,
        }
    }

    /// Empty store whose writes are not atomic
    pub fn non_atomic() -> Self {
        Self {
            atomic: false,
            ..Self::new()
        }
    }

    /// Set the per-record size bound
    pub fn with_max_record_size(mut self, limit: usize) -> Self {
        self.max_record_size = limit;
        self
    }

    /// Bound the total bytes stored across all records
    pub fn with_capacity(mut self, bytes: usize) -> Self {
        self.capacity = Some(bytes);
        self
    }

    /// Reject writes and deletes of one record
    pub fn protect(&mut self, name: &str, vendor: &Guid) {
        self.protected.insert((String::from(name), *vendor));
    }

    /// Trigger `fault` on the write that follows `skip` successful writes
    pub fn inject_fault(&mut self, skip: usize, fault: Fault) {
        self.fault = Some((skip, fault));
    }

    /// Number of successful or attempted writes and deletes so far
    pub fn write_count(&self) -> usize {
        self.writes
    }

    /// Whether a record exists
    pub fn contains(&self, name: &str, vendor: &Guid) -> bool {
        self.records.contains_key(&(String::from(name), *vendor))
    }

    /// Names of all records in a namespace
    pub fn names(&self, vendor: &Guid) -> Vec<String> {
        self.records
            .keys()
            .filter(|(_, g)| g == vendor)
            .map(|(n, _)| n.clone())
            .collect()
    }

    fn take_fault(&mut self) -> Option<Fault> {
        self.writes += 1;
        match self.fault {
            Some((0, fault)) => {
                self.fault = None;
                Some(fault)
            }
            Some((n, fault)) => {
                self.fault = Some((n - 1, fault));
                None
            }
            None => None,
        }
    }

    fn check_capacity(&self, key: &(String, Guid), len: usize) -> Result<(), PersistenceError> {
        let Some(capacity) = self.capacity else {
            return Ok(());
        };
        let used: usize = self
            .records
            .iter()
            .filter(|(k, _)| *k != key)
            .map(|(_, var)| var.data.len())
            .sum();
        if used + len > capacity {
            return Err(PersistenceError::OutOfResources);
        }
        Ok(())
    }

    fn check_writable(&self, key: &(String, Guid)) -> Result<(), PersistenceError> {
        if self.protected.contains(key) {
            Err(PersistenceError::WriteProtected)
        } else {
            Ok(())
        }
    }
}

impl Default for MemoryVariableStore {
    fn default() -> Self {
        Self::new()
    }
}

impl VariableStore for MemoryVariableStore {
    fn get(&self, name: &str, vendor: &Guid) -> Result<Option<Variable>, PersistenceError> {
        Ok(self.records.get(&(String::from(name), *vendor)).cloned())
    }

    fn set(
        &mut self,
        name: &str,
        vendor: &Guid,
        attributes: VariableAttributes,
        data: &[u8],
    ) -> Result<(), PersistenceError> {
        let key = (String::from(name), *vendor);
        self.check_writable(&key)?;

        if data.len() > self.max_record_size {
            return Err(PersistenceError::TooLarge {
                size: data.len(),
                limit: self.max_record_size,
            });
        }
        self.check_capacity(&key, data.len())?;

        match self.take_fault() {
            Some(Fault::Fail) => return Err(PersistenceError::DeviceError),
            Some(Fault::Tear(keep)) => {
                if self.atomic {
                    return Err(PersistenceError::DeviceError);
                }
                let keep = keep.min(data.len());
                let torn = Variable {
                    attributes,
                    data: data[..keep].to_vec(),
                };
                self.records.insert(key, torn);
                return Err(PersistenceError::DeviceError);
            }
            None => {}
        }

        let variable = Variable {
            attributes,
            data: data.to_vec(),
        };
        self.records.insert(key, variable);
        Ok(())
    }

    fn delete(&mut self, name: &str, vendor: &Guid) -> Result<(), PersistenceError> {
        let key = (String::from(name), *vendor);
        self.check_writable(&key)?;

        if let Some(Fault::Fail | Fault::Tear(_)) = self.take_fault() {
            return Err(PersistenceError::DeviceError);
        }

        self.records.remove(&key);
        Ok(())
    }

    fn atomic_writes(&self) -> bool {
        self.atomic
    }
}

// =============================================================================
// TESTS
// =============================================================================
