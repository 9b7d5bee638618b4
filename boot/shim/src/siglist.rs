//! EFI Signature Lists
//!
//! The persisted form of every trust list: a concatenation of
//! `EFI_SIGNATURE_LIST` structures, each holding same-sized signature
//! entries of one type.
//!
//! ```text
//! ┌──────────────┬──────────┬────────────┬──────────┬────────┬─────────────────────┐
//! │ SignatureType│ ListSize │ HeaderSize │ SigSize  │ Header │ {Owner, Data} * N   │
//! │    GUID      │   u32    │    u32     │   u32    │        │                     │
//! └──────────────┴──────────┴────────────┴──────────┴────────┴─────────────────────┘
//! ```

use alloc::vec::Vec;

use static_assertions::const_assert_eq;

use crate::error::MalformedError;
use crate::guid::Guid;

/// Fixed part of an `EFI_SIGNATURE_LIST` (layout only)
#[allow(dead_code)]
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct SignatureListHeader {
    signature_type: [u8; 16],
    list_size: u32,
    header_size: u32,
    signature_size: u32,
}

/// Size of the fixed list header
pub const LIST_HEADER_SIZE: usize = core::mem::size_of::<SignatureListHeader>();

/// Size of `SignatureOwner`
pub const OWNER_SIZE: usize = 16;

const_assert_eq!(LIST_HEADER_SIZE, 28);

/// One `EFI_SIGNATURE_DATA`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureEntry {
    /// Agent that added the entry
    pub owner: Guid,
    /// Signature payload (hash bytes or DER certificate)
    pub data: Vec<u8>,
}

/// One `EFI_SIGNATURE_LIST`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureList {
    /// Type of every entry in the list
    pub signature_type: Guid,
    /// Type-specific header bytes
    pub header: Vec<u8>,
    /// Entries, all with payloads of the same length
    pub entries: Vec<SignatureEntry>,
}

impl SignatureList {
    /// List with a single entry
    pub fn single(signature_type: Guid, owner: Guid, data: &[u8]) -> Self {
        Self {
            signature_type,
            header: Vec::new(),
            entries: alloc::vec![SignatureEntry {
                owner,
                data: data.to_vec(),
            }],
        }
    }

    /// Bytes per `EFI_SIGNATURE_DATA`
    fn signature_size(&self) -> usize {
        OWNER_SIZE + self.entries.first().map_or(0, |entry| entry.data.len())
    }

    /// Append the encoding to `out`
    ///
    /// Entries whose payload length differs from the first entry's cannot
    /// share a list and are rejected.
    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), MalformedError> {
        let signature_size = self.signature_size();
        if self.entries.iter().any(|e| OWNER_SIZE + e.data.len() != signature_size) {
            return Err(MalformedError::InvalidSignatureList);
        }

        let list_size = LIST_HEADER_SIZE + self.header.len() + signature_size * self.entries.len();
        let to_u32 = |v: usize| u32::try_from(v).map_err(|_| MalformedError::InvalidSignatureList);

        out.extend_from_slice(&self.signature_type.to_bytes());
        out.extend_from_slice(&to_u32(list_size)?.to_le_bytes());
        out.extend_from_slice(&to_u32(self.header.len())?.to_le_bytes());
        out.extend_from_slice(&to_u32(signature_size)?.to_le_bytes());
        out.extend_from_slice(&self.header);
        for entry in &self.entries {
            out.extend_from_slice(&entry.owner.to_bytes());
            out.extend_from_slice(&entry.data);
        }
        Ok(())
    }
}

/// Parse a concatenation of signature lists
pub fn parse_signature_lists(mut data: &[u8]) -> Result<Vec<SignatureList>, MalformedError> {
    let mut lists = Vec::new();

    while !data.is_empty() {
        if data.len() < LIST_HEADER_SIZE {
            return Err(MalformedError::Truncated);
        }

        let signature_type = Guid::from_slice(&data[0..16]).ok_or(MalformedError::Truncated)?;
        let list_size = read_u32(&data[16..20]);
        let header_size = read_u32(&data[20..24]);
        let signature_size = read_u32(&data[24..28]);

        if list_size > data.len() {
            return Err(MalformedError::Truncated);
        }
        let body_size = list_size
            .checked_sub(LIST_HEADER_SIZE)
            .and_then(|rest| rest.checked_sub(header_size))
            .ok_or(MalformedError::InvalidSignatureList)?;
        if signature_size <= OWNER_SIZE || body_size % signature_size != 0 {
            return Err(MalformedError::InvalidSignatureList);
        }

        let header = data[LIST_HEADER_SIZE..LIST_HEADER_SIZE + header_size].to_vec();
        let body = &data[LIST_HEADER_SIZE + header_size..list_size];

        let entries = body
            .chunks_exact(signature_size)
            .map(|chunk| SignatureEntry {
                owner: Guid::from_slice(&chunk[..OWNER_SIZE]).unwrap_or_default(),
                data: chunk[OWNER_SIZE..].to_vec(),
            })
            .collect();

        lists.push(SignatureList {
            signature_type,
            header,
            entries,
        });
        data = &data[list_size..];
    }

    Ok(lists)
}

/// Encode a sequence of signature lists, skipping empty ones
pub fn encode_signature_lists(lists: &[SignatureList]) -> Result<Vec<u8>, MalformedError> {
    let mut out = Vec::new();
    for list in lists.iter().filter(|list| !list.entries.is_empty()) {
        list.encode_into(&mut out)?;
    }
    Ok(out)
}

fn read_u32(bytes: &[u8]) -> usize {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(bytes);
    u32::from_le_bytes(raw) as usize
}

// =============================================================================
// TESTS
// =============================================================================
