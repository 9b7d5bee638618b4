//! GUID Utilities
//!
//! GUID handling and the shim's read-only registry of well-known
//! identifiers: certificate encoding types, the MOK owner and the firmware
//! protocols the shim binds to. The registry is built once on first use and
//! never mutated afterwards.

use core::fmt;

use alloc::vec::Vec;
use spin::Once;
use static_assertions::assert_eq_size;

// =============================================================================
// GUID STRUCTURE
// =============================================================================

/// GUID (Globally Unique Identifier)
#[repr(C)]
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Guid {
    /// Data 1 (time-low)
    pub data1: u32,
    /// Data 2 (time-mid)
    pub data2: u16,
    /// Data 3 (time-hi-and-version)
    pub data3: u16,
    /// Data 4 (clock-seq-hi-and-reserved, clock-seq-low, node)
    pub data4: [u8; 8],
}

assert_eq_size!(Guid, [u8; 16]);

impl Guid {
    /// Create a GUID from components
    pub const fn new(data1: u32, data2: u16, data3: u16, data4: [u8; 8]) -> Self {
        Self { data1, data2, data3, data4 }
    }

    /// Null GUID
    pub const fn null() -> Self {
        Self::new(0, 0, 0, [0; 8])
    }

    /// Check if null
    pub fn is_null(&self) -> bool {
        *self == Self::null()
    }

    /// Encode in the mixed-endian layout used by firmware structures
    pub fn to_bytes(&self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        bytes[0..4].copy_from_slice(&self.data1.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.data2.to_le_bytes());
        bytes[6..8].copy_from_slice(&self.data3.to_le_bytes());
        bytes[8..16].copy_from_slice(&self.data4);
        bytes
    }

    /// Decode from the mixed-endian firmware layout
    pub fn from_bytes(bytes: &[u8; 16]) -> Self {
        Self {
            data1: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            data2: u16::from_le_bytes([bytes[4], bytes[5]]),
            data3: u16::from_le_bytes([bytes[6], bytes[7]]),
            data4: [
                bytes[8], bytes[9], bytes[10], bytes[11],
                bytes[12], bytes[13], bytes[14], bytes[15],
            ],
        }
    }

    /// Decode from the first 16 bytes of a slice
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let raw: &[u8; 16] = bytes.get(..16)?.try_into().ok()?;
        Some(Self::from_bytes(raw))
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({self})")
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = &self.data4;
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            self.data1, self.data2, self.data3, d[0], d[1], d[2], d[3], d[4], d[5], d[6], d[7]
        )
    }
}

impl Default for Guid {
    fn default() -> Self {
        Self::null()
    }
}

// =============================================================================
// GUID PARSING
// =============================================================================

/// Parse GUID from its registry string form, braces optional
pub fn parse_guid(s: &str) -> Option<Guid> {
    let s = s.trim();
    let s = s.strip_prefix('{').and_then(|s| s.strip_suffix('}')).unwrap_or(s);

    // XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX
    let bytes = s.as_bytes();
    if bytes.len() != 36 || [8, 13, 18, 23].iter().any(|&i| bytes[i] != b'-') {
        return None;
    }

    let data1 = u32::from_str_radix(s.get(0..8)?, 16).ok()?;
    let data2 = u16::from_str_radix(s.get(9..13)?, 16).ok()?;
    let data3 = u16::from_str_radix(s.get(14..18)?, 16).ok()?;

    let mut data4 = [0u8; 8];
    let tail = [19, 21, 24, 26, 28, 30, 32, 34];
    for (slot, &at) in data4.iter_mut().zip(tail.iter()) {
        *slot = u8::from_str_radix(s.get(at..at + 2)?, 16).ok()?;
    }

    Some(Guid::new(data1, data2, data3, data4))
}

// =============================================================================
// WELL-KNOWN GUIDS - VARIABLE NAMESPACES
// =============================================================================

/// EFI global variable namespace (SecureBoot, SetupMode, ...)
pub const GLOBAL_VARIABLE_GUID: Guid = Guid::new(
    0x8BE4DF61, 0x93CA, 0x11D2,
    [0xAA, 0x0D, 0x00, 0xE0, 0x98, 0x03, 0x2B, 0x8C]
);

/// Image security database namespace (db, dbx)
pub const IMAGE_SECURITY_DATABASE_GUID: Guid = Guid::new(
    0xD719B2CB, 0x3D3A, 0x4596,
    [0xA3, 0xBC, 0xDA, 0xD0, 0x0E, 0x67, 0x65, 0x6F]
);

/// MOK owner; also the namespace of the shim's own records
pub const MOK_OWNER_GUID: Guid = Guid::new(
    0x605DAB50, 0xE046, 0x4300,
    [0xAB, 0xB6, 0x3D, 0xD8, 0x10, 0xDD, 0x8B, 0x23]
);

// =============================================================================
// WELL-KNOWN GUIDS - CERTIFICATE TYPES
// =============================================================================

/// EFI_CERT_SHA256_GUID
pub const CERT_SHA256_GUID: Guid = Guid::new(
    0xC1C41626, 0x504C, 0x4092,
    [0xAC, 0xA9, 0x41, 0xF9, 0x36, 0x93, 0x43, 0x28]
);

/// EFI_CERT_SHA384_GUID
pub const CERT_SHA384_GUID: Guid = Guid::new(
    0xFF3E5307, 0x9FD0, 0x48C9,
    [0x85, 0xF1, 0x8A, 0xD5, 0x6C, 0x70, 0x1E, 0x01]
);

/// EFI_CERT_SHA512_GUID
pub const CERT_SHA512_GUID: Guid = Guid::new(
    0x093E0FAE, 0xA6C4, 0x4F50,
    [0x9F, 0x1B, 0xD4, 0x1E, 0x2B, 0x89, 0xC1, 0x9A]
);

/// EFI_CERT_RSA2048_GUID
pub const CERT_RSA2048_GUID: Guid = Guid::new(
    0x3C5766E8, 0x269C, 0x4E34,
    [0xAA, 0x14, 0xED, 0x77, 0x6E, 0x85, 0xB3, 0xB6]
);

/// EFI_CERT_X509_GUID
pub const CERT_X509_GUID: Guid = Guid::new(
    0xA5C059A1, 0x94E4, 0x4AA7,
    [0x87, 0xB5, 0xAB, 0x15, 0x5C, 0x2B, 0xF0, 0x72]
);

/// EFI_CERT_TYPE_PKCS7_GUID
pub const CERT_PKCS7_GUID: Guid = Guid::new(
    0x4AAFD29D, 0x68DF, 0x49EE,
    [0x8A, 0xA9, 0x34, 0x7D, 0x37, 0x56, 0x65, 0xA7]
);

// =============================================================================
// WELL-KNOWN GUIDS - PROTOCOLS
// =============================================================================

/// Loaded Image Protocol GUID
pub const LOADED_IMAGE_PROTOCOL_GUID: Guid = Guid::new(
    0x5B1B31A1, 0x9562, 0x11D2,
    [0x8E, 0x3F, 0x00, 0xA0, 0xC9, 0x69, 0x72, 0x3B]
);

/// Simple File System Protocol GUID
pub const SIMPLE_FILE_SYSTEM_PROTOCOL_GUID: Guid = Guid::new(
    0x964E5B22, 0x6459, 0x11D2,
    [0x8E, 0x39, 0x00, 0xA0, 0xC9, 0x69, 0x72, 0x3B]
);

/// Device Path Protocol GUID
pub const DEVICE_PATH_PROTOCOL_GUID: Guid = Guid::new(
    0x09576E91, 0x6D3F, 0x11D2,
    [0x8E, 0x39, 0x00, 0xA0, 0xC9, 0x69, 0x72, 0x3B]
);

/// Driver Binding Protocol GUID
pub const DRIVER_BINDING_PROTOCOL_GUID: Guid = Guid::new(
    0x18A031AB, 0xB443, 0x4D1A,
    [0xA5, 0xC0, 0x0C, 0x09, 0x26, 0x1E, 0x9F, 0x71]
);

/// Security Architectural Protocol GUID
pub const SECURITY_PROTOCOL_GUID: Guid = Guid::new(
    0xA46423E3, 0x4617, 0x49F1,
    [0xB9, 0xFF, 0xD1, 0xBF, 0xA9, 0x11, 0x58, 0x39]
);

/// Security2 Architectural Protocol GUID
pub const SECURITY2_PROTOCOL_GUID: Guid = Guid::new(
    0x94AB2F58, 0x1438, 0x4EF1,
    [0x91, 0x52, 0x18, 0x94, 0x1A, 0x3A, 0x0E, 0x68]
);

// =============================================================================
// REGISTRY
// =============================================================================

/// Read-only name to GUID table
#[derive(Debug)]
pub struct GuidRegistry {
    entries: Vec<(&'static str, Guid)>,
}

impl GuidRegistry {
    fn build() -> Self {
        let entries = alloc::vec![
            ("GV_GUID", GLOBAL_VARIABLE_GUID),
            ("SIG_DB", IMAGE_SECURITY_DATABASE_GUID),
            ("MOK_OWNER", MOK_OWNER_GUID),
            ("EFI_CERT_SHA256_GUID", CERT_SHA256_GUID),
            ("EFI_CERT_SHA384_GUID", CERT_SHA384_GUID),
            ("EFI_CERT_SHA512_GUID", CERT_SHA512_GUID),
            ("RSA2048_GUID", CERT_RSA2048_GUID),
            ("X509_GUID", CERT_X509_GUID),
            ("PKCS7_GUID", CERT_PKCS7_GUID),
            ("IMAGE_PROTOCOL", LOADED_IMAGE_PROTOCOL_GUID),
            ("SIMPLE_FS_PROTOCOL", SIMPLE_FILE_SYSTEM_PROTOCOL_GUID),
            ("DEVICE_PATH_PROTOCOL", DEVICE_PATH_PROTOCOL_GUID),
            ("DRIVER_BINDING_PROTOCOL", DRIVER_BINDING_PROTOCOL_GUID),
            ("SECURITY_PROTOCOL_GUID", SECURITY_PROTOCOL_GUID),
            ("SECURITY2_PROTOCOL_GUID", SECURITY2_PROTOCOL_GUID),
        ];
        Self { entries }
    }

    /// Look up a GUID by symbolic name
    pub fn lookup(&self, name: &str) -> Option<Guid> {
        self.entries.iter().find(|(n, _)| *n == name).map(|(_, g)| *g)
    }

    /// Symbolic name of a GUID, if registered
    pub fn name_of(&self, guid: &Guid) -> Option<&'static str> {
        self.entries.iter().find(|(_, g)| g == guid).map(|(n, _)| *n)
    }

    /// Iterate over all registered entries
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, Guid)> + '_ {
        self.entries.iter().copied()
    }

    /// Number of registered GUIDs
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Registry is never empty once built
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

static REGISTRY: Once<GuidRegistry> = Once::new();

/// Process-wide GUID registry
pub fn registry() -> &'static GuidRegistry {
    REGISTRY.call_once(GuidRegistry::build)
}

// =============================================================================
// TESTS
// =============================================================================
