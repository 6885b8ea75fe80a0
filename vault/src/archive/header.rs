//! # Headers
//!
//! Fixed-size, little-endian file and record headers.

use chrono::Utc;

/// The magic number every archive starts with.
pub const MAGIC: u32 = 0x2012_1025;

/// The only archive format version this library reads and writes.
pub const VERSION: u8 = 1;

/// The length of the file header, in bytes.
pub const FILE_HEADER_LEN: u64 = 40;

/// The length of a record header, in bytes.
pub const RECORD_HEADER_LEN: u64 = 8;

const UPDATE_TIME_OFFSET: usize = 12;

/// The archive file header.
///
/// Layout: `magic:u32`, `version:u8`, `reserved:u8`, `reserved:u16`,
/// `create_time:u32`, `update_time:u32`, `have_ptr:u64` then two
/// reserved `u64`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FileHeader {
    pub magic: u32,
    pub version: u8,
    pub create_time: u32,
    pub update_time: u32,

    /// Offset of the most recent snapshot record, 0 if none.
    pub have_ptr: u64,
}

impl FileHeader {
    pub fn new() -> Self {
        let now = now();
        Self {
            magic: MAGIC,
            version: VERSION,
            create_time: now,
            update_time: now,
            have_ptr: 0,
        }
    }

    pub fn from_bytes(bytes: &[u8; FILE_HEADER_LEN as usize]) -> Self {
        Self {
            magic: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            version: bytes[4],
            create_time: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            update_time: u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
            have_ptr: u64::from_le_bytes([
                bytes[16], bytes[17], bytes[18], bytes[19], bytes[20], bytes[21], bytes[22],
                bytes[23],
            ]),
        }
    }

    pub fn to_bytes(&self) -> [u8; FILE_HEADER_LEN as usize] {
        let mut bytes = [0; FILE_HEADER_LEN as usize];
        bytes[0..4].copy_from_slice(&self.magic.to_le_bytes());
        bytes[4] = self.version;
        bytes[8..12].copy_from_slice(&self.create_time.to_le_bytes());
        bytes[UPDATE_TIME_OFFSET..16].copy_from_slice(&self.update_time.to_le_bytes());
        bytes[16..24].copy_from_slice(&self.have_ptr.to_le_bytes());
        bytes
    }

    /// Bump the last update timestamp.
    pub fn touch(&mut self) {
        self.update_time = now();
    }
}

impl Default for FileHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// The header preceding every record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RecordHeader {
    pub kind: u16,
    pub features: u16,

    /// The length of the payload as stored, after hash prefix and
    /// compression.
    pub length: u32,
}

impl RecordHeader {
    pub fn from_bytes(bytes: &[u8; RECORD_HEADER_LEN as usize]) -> Self {
        Self {
            kind: u16::from_le_bytes([bytes[0], bytes[1]]),
            features: u16::from_le_bytes([bytes[2], bytes[3]]),
            length: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        }
    }

    pub fn to_bytes(&self) -> [u8; RECORD_HEADER_LEN as usize] {
        let mut bytes = [0; RECORD_HEADER_LEN as usize];
        bytes[0..2].copy_from_slice(&self.kind.to_le_bytes());
        bytes[2..4].copy_from_slice(&self.features.to_le_bytes());
        bytes[4..8].copy_from_slice(&self.length.to_le_bytes());
        bytes
    }

    /// The offset right after the record starting at `offset`.
    pub fn next_offset(&self, offset: u64) -> u64 {
        offset + RECORD_HEADER_LEN + self.length as u64
    }
}

fn now() -> u32 {
    Utc::now().timestamp().clamp(0, u32::MAX as i64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_header_layout() {
        let header = FileHeader {
            magic: MAGIC,
            version: VERSION,
            create_time: 1,
            update_time: 2,
            have_ptr: 0x0102,
        };
        let bytes = header.to_bytes();
        assert_eq!(&bytes[0..4], &[0x25, 0x10, 0x12, 0x20]);
        assert_eq!(bytes[4], 1);
        assert_eq!(&bytes[8..12], &[1, 0, 0, 0]);
        assert_eq!(&bytes[12..16], &[2, 0, 0, 0]);
        assert_eq!(&bytes[16..18], &[0x02, 0x01]);
        assert!(bytes[24..].iter().all(|b| *b == 0));
        assert_eq!(FileHeader::from_bytes(&bytes), header);
    }

    #[test]
    fn record_header_layout() {
        let header = RecordHeader {
            kind: 2,
            features: 1,
            length: 300,
        };
        assert_eq!(header.to_bytes(), [2, 0, 1, 0, 0x2c, 0x01, 0, 0]);
        assert_eq!(header.next_offset(40), 348);
    }
}
