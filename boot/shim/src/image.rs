//! Signed Images
//!
//! The three shapes an image reaches the verifier in:
//!
//! - a PE/COFF binary with an embedded Authenticode certificate table,
//! - raw content with a detached signed-data blob,
//! - raw content with no signature at all.
//!
//! For PE images the digest is the Authenticode image hash, which skips the
//! checksum field, the certificate-table directory entry and the certificate
//! table itself. A damaged certificate table does not hide the image hash:
//! the image still parses and carries the fault for the verifier to report
//! after its deny check.

use alloc::vec::Vec;
use core::ops::Range;

use crate::crypto::{HashAlgorithm, Hasher};
use crate::error::MalformedError;

/// How the signature travels with the image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// PE/COFF with embedded WIN_CERTIFICATE table
    Pe,
    /// Content plus separate signed data
    Detached,
    /// Content only
    Unsigned,
}

/// Image bytes plus the signed-data blobs that vouch for them
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedImage {
    bytes: Vec<u8>,
    /// Byte ranges covered by the image digest, in hashing order
    ranges: Vec<Range<usize>>,
    signatures: Vec<Vec<u8>>,
    /// Fault in the embedded certificate table
    signature_error: Option<MalformedError>,
    format: ImageFormat,
}

impl SignedImage {
    /// Parse a PE/COFF image and extract its Authenticode signatures
    ///
    /// Fails only on header faults. A damaged certificate table is reported
    /// through [`SignedImage::signature_error`].
    pub fn from_pe(bytes: &[u8]) -> Result<Self, MalformedError> {
        let pe = PeFile::parse(bytes)?;
        let ranges = pe.hashed_ranges(bytes);
        let table = match (&pe.cert_table, pe.cert_fault) {
            (_, Some(err)) => Err(err),
            (Some(table), None) => parse_certificate_table(&bytes[table.clone()]),
            (None, None) => Ok(Vec::new()),
        };
        let (signatures, signature_error) = match table {
            Ok(signatures) => (signatures, None),
            Err(err) => {
                log::debug!("Certificate table rejected: {}", err);
                (Vec::new(), Some(err))
            }
        };

        Ok(Self {
            bytes: bytes.to_vec(),
            ranges,
            signatures,
            signature_error,
            format: ImageFormat::Pe,
        })
    }

    /// Content with a detached PKCS#7 signature
    pub fn detached(content: &[u8], signature: &[u8]) -> Self {
        Self {
            bytes: content.to_vec(),
            ranges: alloc::vec![0..content.len()],
            signatures: alloc::vec![signature.to_vec()],
            signature_error: None,
            format: ImageFormat::Detached,
        }
    }

    /// Content without any signature
    pub fn unsigned(content: &[u8]) -> Self {
        Self {
            bytes: content.to_vec(),
            ranges: alloc::vec![0..content.len()],
            signatures: Vec::new(),
            signature_error: None,
            format: ImageFormat::Unsigned,
        }
    }

    /// Image format
    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// Full image bytes
    pub fn content(&self) -> &[u8] {
        &self.bytes
    }

    /// Signed-data blobs
    pub fn signatures(&self) -> &[Vec<u8>] {
        &self.signatures
    }

    /// Fault found in the embedded certificate table, if any
    pub fn signature_error(&self) -> Option<MalformedError> {
        self.signature_error
    }

    /// Check if any signed data accompanies the image
    pub fn is_signed(&self) -> bool {
        !self.signatures.is_empty()
    }

    /// Image digest (Authenticode hash for PE images)
    pub fn digest(&self, algorithm: HashAlgorithm) -> Vec<u8> {
        let mut hasher = Hasher::new(algorithm);
        for range in &self.ranges {
            hasher.update(&self.bytes[range.clone()]);
        }
        hasher.finalize()
    }
}

// =============================================================================
// PE FILE PARSING
// =============================================================================

const DOS_HEADER_SIZE: usize = 0x40;
const COFF_HEADER_SIZE: usize = 20;
const SECTION_HEADER_SIZE: usize = 40;
const DATA_DIRECTORY_SIZE: usize = 8;
/// IMAGE_DIRECTORY_ENTRY_SECURITY
const SECURITY_DIRECTORY_INDEX: usize = 4;

const PE32_MAGIC: u16 = 0x10b;
const PE32_PLUS_MAGIC: u16 = 0x20b;

/// Offsets the Authenticode hash needs
struct PeFile {
    /// Offset of the CheckSum field
    checksum_offset: usize,
    /// Offset of the security data directory entry, if the header has one
    security_dir_offset: Option<usize>,
    /// End of the headers
    size_of_headers: usize,
    /// Raw data of each section, sorted by file offset
    sections: Vec<Range<usize>>,
    /// Certificate table, if present and in bounds
    cert_table: Option<Range<usize>>,
    /// Security directory pointing outside the image
    cert_fault: Option<MalformedError>,
}

impl PeFile {
    fn parse(data: &[u8]) -> Result<Self, MalformedError> {
        // DOS header
        if data.len() < DOS_HEADER_SIZE || &data[0..2] != b"MZ" {
            return Err(MalformedError::InvalidImage);
        }
        let pe_offset = read_u32(data, 0x3c)? as usize;

        if data.get(pe_offset..pe_offset.saturating_add(4)) != Some(b"PE\0\0".as_slice()) {
            return Err(MalformedError::InvalidImage);
        }

        // COFF header
        let coff = pe_offset + 4;
        let number_of_sections = read_u16(data, coff + 2)? as usize;
        let size_of_optional = read_u16(data, coff + 16)? as usize;

        // Optional header
        let opt = coff + COFF_HEADER_SIZE;
        let opt_end = opt + size_of_optional;
        if data.len() < opt_end {
            return Err(MalformedError::InvalidImage);
        }
        let (rva_count_offset, data_dir_offset) = match read_u16(data, opt)? {
            PE32_MAGIC => (92, 96),
            PE32_PLUS_MAGIC => (108, 112),
            _ => return Err(MalformedError::InvalidImage),
        };
        if size_of_optional < data_dir_offset {
            return Err(MalformedError::InvalidImage);
        }

        let checksum_offset = opt + 64;
        let size_of_headers = read_u32(data, opt + 60)? as usize;
        let rva_count = read_u32(data, opt + rva_count_offset)? as usize;

        let security_dir_offset =
            opt + data_dir_offset + SECURITY_DIRECTORY_INDEX * DATA_DIRECTORY_SIZE;
        let security_dir_offset = (rva_count > SECURITY_DIRECTORY_INDEX
            && security_dir_offset + DATA_DIRECTORY_SIZE <= opt_end)
            .then_some(security_dir_offset);

        // Section table
        let table_end = number_of_sections
            .checked_mul(SECTION_HEADER_SIZE)
            .and_then(|len| len.checked_add(opt_end))
            .ok_or(MalformedError::InvalidImage)?;
        if size_of_headers < table_end || size_of_headers > data.len() {
            return Err(MalformedError::InvalidImage);
        }

        let mut sections = Vec::with_capacity(number_of_sections);
        for index in 0..number_of_sections {
            let header = opt_end + index * SECTION_HEADER_SIZE;
            let size = read_u32(data, header + 16)? as usize;
            let start = read_u32(data, header + 20)? as usize;
            if size == 0 {
                continue;
            }
            let end = start.checked_add(size).ok_or(MalformedError::InvalidImage)?;
            if start < size_of_headers || end > data.len() {
                return Err(MalformedError::InvalidImage);
            }
            sections.push(start..end);
        }
        sections.sort_by_key(|range| range.start);

        let (cert_table, cert_fault) = match security_dir_offset {
            Some(offset) => {
                let start = read_u32(data, offset)? as usize;
                let size = read_u32(data, offset + 4)? as usize;
                let in_bounds = |end: usize| {
                    start >= size_of_headers
                        && end <= data.len()
                        && sections.iter().all(|s| s.end <= start)
                };
                match start.checked_add(size) {
                    _ if size == 0 => (None, None),
                    Some(end) if in_bounds(end) => (Some(start..end), None),
                    _ => (None, Some(MalformedError::InvalidWinCertificate)),
                }
            }
            None => (None, None),
        };

        Ok(Self {
            checksum_offset,
            security_dir_offset,
            size_of_headers,
            sections,
            cert_table,
            cert_fault,
        })
    }

    /// Ranges covered by the Authenticode hash
    fn hashed_ranges(&self, data: &[u8]) -> Vec<Range<usize>> {
        let mut ranges = Vec::with_capacity(self.sections.len() + 4);

        // Headers, minus CheckSum and the security directory entry
        ranges.push(0..self.checksum_offset);
        match self.security_dir_offset {
            Some(dir) => {
                ranges.push(self.checksum_offset + 4..dir);
                ranges.push(dir + DATA_DIRECTORY_SIZE..self.size_of_headers);
            }
            None => ranges.push(self.checksum_offset + 4..self.size_of_headers),
        }

        // Sections in file order
        let mut sum_of_bytes = self.size_of_headers;
        for section in &self.sections {
            sum_of_bytes += section.len();
            ranges.push(section.clone());
        }

        // Anything after the sections except the certificate table
        let cert_size = self.cert_table.as_ref().map_or(0, |table| table.len());
        let hashed_end = data.len().saturating_sub(cert_size);
        if hashed_end > sum_of_bytes {
            ranges.push(sum_of_bytes..hashed_end);
        }

        ranges
    }
}

// =============================================================================
// WIN_CERTIFICATE
// =============================================================================

mod win_cert {
    /// WIN_CERTIFICATE header size
    pub const HEADER_SIZE: usize = 8;
    /// Entries are 8-byte aligned
    pub const ALIGNMENT: usize = 8;
    /// WIN_CERT_REVISION_2_0
    pub const REVISION_2_0: u16 = 0x0200;
    /// WIN_CERT_TYPE_PKCS_SIGNED_DATA
    pub const TYPE_PKCS_SIGNED_DATA: u16 = 0x0002;
}

/// Walk the certificate table and collect the PKCS#7 blobs
///
/// Entries of other certificate types are skipped.
fn parse_certificate_table(table: &[u8]) -> Result<Vec<Vec<u8>>, MalformedError> {
    let mut signatures = Vec::new();
    let mut offset = 0;

    while offset < table.len() {
        let header = table
            .get(offset..offset + win_cert::HEADER_SIZE)
            .ok_or(MalformedError::InvalidWinCertificate)?;
        let length = read_u32(header, 0)? as usize;
        let revision = read_u16(header, 4)?;
        let certificate_type = read_u16(header, 6)?;

        if length <= win_cert::HEADER_SIZE || length > table.len() - offset {
            return Err(MalformedError::InvalidWinCertificate);
        }
        if revision != win_cert::REVISION_2_0 {
            return Err(MalformedError::InvalidWinCertificate);
        }

        if certificate_type == win_cert::TYPE_PKCS_SIGNED_DATA {
            signatures.push(table[offset + win_cert::HEADER_SIZE..offset + length].to_vec());
        } else {
            log::debug!("Skipping WIN_CERTIFICATE of type {:#06x}", certificate_type);
        }

        offset += length.next_multiple_of(win_cert::ALIGNMENT);
    }

    Ok(signatures)
}

fn read_u16(data: &[u8], offset: usize) -> Result<u16, MalformedError> {
    data.get(offset..offset + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or(MalformedError::InvalidImage)
}

fn read_u32(data: &[u8], offset: usize) -> Result<u32, MalformedError> {
    data.get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or(MalformedError::InvalidImage)
}

// =============================================================================
// TESTS
// =============================================================================
