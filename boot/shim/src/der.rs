//! ASN.1 DER Reader
//!
//! Zero-copy reader for the DER subset used by X.509 certificates and
//! PKCS#7 signed data. All input is treated as hostile: every length is
//! checked against the remaining buffer before it is used, indefinite and
//! non-minimal lengths are rejected, and no function here panics.

use crate::error::MalformedError;

/// ASN.1 tags
pub mod tag {
    /// BOOLEAN
    pub const BOOLEAN: u8 = 0x01;
    /// INTEGER
    pub const INTEGER: u8 = 0x02;
    /// BIT STRING
    pub const BIT_STRING: u8 = 0x03;
    /// OCTET STRING
    pub const OCTET_STRING: u8 = 0x04;
    /// NULL
    pub const NULL: u8 = 0x05;
    /// OBJECT IDENTIFIER
    pub const OID: u8 = 0x06;
    /// UTCTime
    pub const UTC_TIME: u8 = 0x17;
    /// GeneralizedTime
    pub const GENERALIZED_TIME: u8 = 0x18;
    /// SEQUENCE (constructed)
    pub const SEQUENCE: u8 = 0x30;
    /// SET (constructed)
    pub const SET: u8 = 0x31;

    /// Constructed context-specific tag `[n]`
    pub const fn context(n: u8) -> u8 {
        0xa0 | (n & 0x1f)
    }

    /// Primitive context-specific tag `[n]`
    pub const fn context_primitive(n: u8) -> u8 {
        0x80 | (n & 0x1f)
    }
}

/// Largest content length accepted (16 MiB)
const MAX_LENGTH: usize = 16 * 1024 * 1024;

/// A decoded tag-length-value element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tlv<'a> {
    /// Identifier octet
    pub tag: u8,
    /// Content octets
    pub content: &'a [u8],
    /// Full encoding including header
    pub raw: &'a [u8],
}

impl<'a> Tlv<'a> {
    /// Reader over the content of a constructed element
    pub fn reader(&self) -> DerReader<'a> {
        DerReader::new(self.content)
    }

    /// Unsigned magnitude of an INTEGER with the sign octet stripped
    pub fn unsigned_integer(&self) -> Result<&'a [u8], MalformedError> {
        expect_tag(self, tag::INTEGER)?;
        match self.content {
            [] => Err(MalformedError::InvalidValue),
            // Negative numbers have no place in keys or serials we compare
            [first, ..] if first & 0x80 != 0 => Err(MalformedError::InvalidValue),
            [0, rest @ ..] if !rest.is_empty() => Ok(rest),
            content => Ok(content),
        }
    }

    /// Small non-negative INTEGER (versions)
    pub fn small_integer(&self) -> Result<u32, MalformedError> {
        let bytes = self.unsigned_integer()?;
        if bytes.len() > 4 {
            return Err(MalformedError::InvalidValue);
        }
        Ok(bytes.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b)))
    }

    /// Payload of a BIT STRING with no unused bits
    pub fn bit_string(&self) -> Result<&'a [u8], MalformedError> {
        expect_tag(self, tag::BIT_STRING)?;
        match self.content {
            [0, rest @ ..] => Ok(rest),
            _ => Err(MalformedError::InvalidValue),
        }
    }

    /// BOOLEAN value
    pub fn boolean(&self) -> Result<bool, MalformedError> {
        expect_tag(self, tag::BOOLEAN)?;
        match self.content {
            [0x00] => Ok(false),
            [0xff] => Ok(true),
            _ => Err(MalformedError::InvalidValue),
        }
    }
}

fn expect_tag(tlv: &Tlv<'_>, expected: u8) -> Result<(), MalformedError> {
    if tlv.tag == expected {
        Ok(())
    } else {
        Err(MalformedError::UnexpectedTag {
            expected,
            found: tlv.tag,
        })
    }
}

/// Sequential DER reader over a byte slice
#[derive(Debug, Clone)]
pub struct DerReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> DerReader<'a> {
    /// Create a reader
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Nothing left to read
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Tag of the next element, if any
    pub fn peek_tag(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    /// Read the next element whatever its tag
    pub fn read_any(&mut self) -> Result<Tlv<'a>, MalformedError> {
        let rest = &self.data[self.pos.min(self.data.len())..];
        let (tlv, consumed) = parse_element(rest)?;
        self.pos += consumed;
        Ok(tlv)
    }

    /// Read the next element and require its tag
    pub fn read(&mut self, expected: u8) -> Result<Tlv<'a>, MalformedError> {
        let tlv = self.read_any()?;
        expect_tag(&tlv, expected)?;
        Ok(tlv)
    }

    /// Read the next element only if it carries `expected`
    pub fn read_optional(&mut self, expected: u8) -> Result<Option<Tlv<'a>>, MalformedError> {
        if self.peek_tag() == Some(expected) {
            self.read(expected).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Read a SEQUENCE and return a reader over its content
    pub fn read_sequence(&mut self) -> Result<DerReader<'a>, MalformedError> {
        self.read(tag::SEQUENCE).map(|tlv| tlv.reader())
    }

    /// Read an OBJECT IDENTIFIER and return its content octets
    pub fn read_oid(&mut self) -> Result<&'a [u8], MalformedError> {
        let tlv = self.read(tag::OID)?;
        if tlv.content.is_empty() || tlv.content.last().is_some_and(|b| b & 0x80 != 0) {
            return Err(MalformedError::InvalidValue);
        }
        Ok(tlv.content)
    }

    /// Skip any remaining elements, validating their framing
    pub fn skip_rest(&mut self) -> Result<(), MalformedError> {
        while !self.is_empty() {
            self.read_any()?;
        }
        Ok(())
    }

    /// Require that every byte has been consumed
    pub fn finish(&self) -> Result<(), MalformedError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(MalformedError::TrailingData)
        }
    }
}

/// Parse exactly one element spanning all of `data`
pub fn parse_single(data: &[u8], expected: u8) -> Result<Tlv<'_>, MalformedError> {
    let mut reader = DerReader::new(data);
    let tlv = reader.read(expected)?;
    reader.finish()?;
    Ok(tlv)
}

/// Parse DER length (returns length, octets consumed)
fn parse_length(data: &[u8]) -> Result<(usize, usize), MalformedError> {
    let first = *data.first().ok_or(MalformedError::Truncated)?;

    if first < 0x80 {
        return Ok((first as usize, 1));
    }

    // 0x80 is the BER indefinite form
    let num_octets = (first & 0x7f) as usize;
    if num_octets == 0 || num_octets > 4 {
        return Err(MalformedError::InvalidLength);
    }

    let octets = data.get(1..=num_octets).ok_or(MalformedError::Truncated)?;
    if octets[0] == 0 {
        return Err(MalformedError::InvalidLength);
    }

    let length = octets.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize);
    if length < 0x80 || length > MAX_LENGTH {
        return Err(MalformedError::InvalidLength);
    }

    Ok((length, 1 + num_octets))
}

/// Parse DER element (returns element, bytes consumed)
fn parse_element(data: &[u8]) -> Result<(Tlv<'_>, usize), MalformedError> {
    let tag = *data.first().ok_or(MalformedError::Truncated)?;

    // High tag numbers never appear in the structures we read
    if tag & 0x1f == 0x1f {
        return Err(MalformedError::InvalidValue);
    }

    let (length, len_size) = parse_length(&data[1..])?;
    let header_size = 1 + len_size;
    let end = header_size.checked_add(length).ok_or(MalformedError::InvalidLength)?;

    if data.len() < end {
        return Err(MalformedError::Truncated);
    }

    Ok((
        Tlv {
            tag,
            content: &data[header_size..end],
            raw: &data[..end],
        },
        end,
    ))
}

// =============================================================================
// TESTS
// =============================================================================
