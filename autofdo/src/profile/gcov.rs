//! gcov word stream
//!
//! The profile is a sequence of 32-bit words in the byte order of the machine
//! that wrote it. The order is detected from the leading magic. Counters are
//! two words, low word first. Strings are a word count followed by that many
//! words of NUL-padded bytes.

use crate::error::ProfileError;

pub const GCOV_DATA_MAGIC: u32 = 0x6763_6461; // "gcda"
/// Version word written by [`GcovWriter`]; readers ignore it.
pub const GCOV_VERSION: u32 = 0x3430_372a;

pub const GCOV_TAG_AFDO_FILE_NAMES: u32 = 0xaa00_0000;
pub const GCOV_TAG_AFDO_FUNCTION: u32 = 0xac00_0000;
pub const GCOV_TAG_AFDO_MODULE_GROUPING: u32 = 0xae00_0000;
pub const GCOV_TAG_AFDO_WORKING_SET: u32 = 0xaf00_0000;

const WORD: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    fn decode(self, bytes: [u8; 4]) -> u32 {
        match self {
            ByteOrder::Little => u32::from_le_bytes(bytes),
            ByteOrder::Big => u32::from_be_bytes(bytes),
        }
    }

    fn encode(self, value: u32) -> [u8; 4] {
        match self {
            ByteOrder::Little => value.to_le_bytes(),
            ByteOrder::Big => value.to_be_bytes(),
        }
    }
}

/// Cursor over a profile image.
pub struct GcovReader<'a> {
    data: &'a [u8],
    pos: usize,
    order: ByteOrder,
}

impl<'a> GcovReader<'a> {
    /// Check the magic and skip the version and reserved words.
    pub fn new(data: &'a [u8]) -> Result<Self, ProfileError> {
        let mut reader = GcovReader {
            data,
            pos: 0,
            order: ByteOrder::Little,
        };
        let magic = reader.read_unsigned()?;
        if magic == GCOV_DATA_MAGIC {
            reader.order = ByteOrder::Little;
        } else if magic.swap_bytes() == GCOV_DATA_MAGIC {
            reader.order = ByteOrder::Big;
        } else {
            return Err(ProfileError::BadMagic { found: magic });
        }
        reader.read_unsigned()?; // version
        reader.read_unsigned()?; // reserved
        Ok(reader)
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.order
    }

    /// Byte offset of the next read.
    pub fn offset(&self) -> usize {
        self.pos
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], ProfileError> {
        let available = self.data.len().saturating_sub(self.pos);
        if available < len {
            return Err(ProfileError::Truncated {
                offset: self.pos,
                needed: len - available,
            });
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    pub fn read_unsigned(&mut self) -> Result<u32, ProfileError> {
        let bytes = self.take(WORD)?;
        Ok(self.order.decode([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_counter(&mut self) -> Result<u64, ProfileError> {
        let low = self.read_unsigned()? as u64;
        let high = self.read_unsigned()? as u64;
        Ok((high << 32) | low)
    }

    pub fn read_string(&mut self) -> Result<String, ProfileError> {
        let words = self.read_unsigned()? as usize;
        if words == 0 {
            return Ok(String::new());
        }
        let offset = self.pos;
        let len = words.checked_mul(WORD).ok_or(ProfileError::Truncated {
            offset,
            needed: usize::MAX,
        })?;
        let bytes = self.take(len)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        std::str::from_utf8(&bytes[..end])
            .map(str::to_owned)
            .map_err(|_| ProfileError::InvalidString { offset })
    }

    /// Consume a section header: the tag must match, the length word is ignored.
    pub fn expect_tag(&mut self, section: &'static str, expected: u32) -> Result<(), ProfileError> {
        let found = self.read_unsigned()?;
        if found != expected {
            return Err(ProfileError::UnexpectedTag {
                section,
                expected,
                found,
            });
        }
        self.read_unsigned()?;
        Ok(())
    }
}

/// Accumulates a profile image in memory.
pub struct GcovWriter {
    buf: Vec<u8>,
    order: ByteOrder,
}

impl GcovWriter {
    /// Start an image with the magic, version and reserved words.
    pub fn new(order: ByteOrder) -> Self {
        let mut writer = GcovWriter {
            buf: Vec::new(),
            order,
        };
        writer.write_unsigned(GCOV_DATA_MAGIC);
        writer.write_unsigned(GCOV_VERSION);
        writer.write_unsigned(0);
        writer
    }

    pub fn write_unsigned(&mut self, value: u32) {
        self.buf.extend_from_slice(&self.order.encode(value));
    }

    pub fn write_counter(&mut self, value: u64) {
        self.write_unsigned(value as u32);
        self.write_unsigned((value >> 32) as u32);
    }

    pub fn write_string(&mut self, value: &str) {
        if value.is_empty() {
            self.write_unsigned(0);
            return;
        }
        // At least one NUL byte of padding.
        let words = value.len() / WORD + 1;
        self.write_unsigned(words as u32);
        self.buf.extend_from_slice(value.as_bytes());
        self.buf
            .resize(self.buf.len() + words * WORD - value.len(), 0);
    }

    /// Write a section tag and a placeholder length; returns the patch position.
    pub fn begin_section(&mut self, tag: u32) -> usize {
        self.write_unsigned(tag);
        let at = self.buf.len();
        self.write_unsigned(0);
        at
    }

    /// Patch the section length (in words) written by `begin_section`.
    pub fn end_section(&mut self, at: usize) {
        let words = ((self.buf.len() - at - WORD) / WORD) as u32;
        let bytes = self.order.encode(words);
        self.buf[at..at + WORD].copy_from_slice(&bytes);
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}
