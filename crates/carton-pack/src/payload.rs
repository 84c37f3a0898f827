//! Appended-payload binary layout for native packages.
//!
//! A native package is the host executable with the archive body appended:
//!
//! ```text
//! [patched executable][header: 32 bytes][archive body][trailer: 16 bytes]
//! ```
//!
//! The trailer sits at the very end of the file, so the loader can find the
//! payload without knowing the executable's size: read the trailer, seek back
//! by its recorded length, then verify the header and checksum.

use thiserror::Error;

/// Identifies a payload region. ASCII `CARTON01`.
pub const PAYLOAD_MAGIC: u64 = 0x4341_5254_4f4e_3031;

/// Current payload layout version.
pub const FORMAT_VERSION: u64 = 1;

/// Size of the serialized [`PayloadHeader`].
pub const HEADER_SIZE: usize = 32;

/// Size of the serialized [`PayloadTrailer`].
pub const TRAILER_SIZE: usize = 16;

#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("payload region too small")]
    Truncated,

    #[error("payload magic mismatch")]
    BadMagic,

    #[error("unsupported payload version {0}")]
    UnsupportedVersion(u64),

    #[error("payload checksum mismatch")]
    ChecksumMismatch,
}

/// Fixed-width header written immediately before the archive body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadHeader {
    pub magic: u64,
    pub payload_len: u64,
    pub checksum: u64,
    pub version: u64,
}

impl PayloadHeader {
    pub fn new(payload: &[u8]) -> Self {
        PayloadHeader {
            magic: PAYLOAD_MAGIC,
            payload_len: payload.len() as u64,
            checksum: crc32fast::hash(payload) as u64,
            version: FORMAT_VERSION,
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..8].copy_from_slice(&self.magic.to_le_bytes());
        out[8..16].copy_from_slice(&self.payload_len.to_le_bytes());
        out[16..24].copy_from_slice(&self.checksum.to_le_bytes());
        out[24..32].copy_from_slice(&self.version.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PayloadError> {
        if bytes.len() < HEADER_SIZE {
            return Err(PayloadError::Truncated);
        }
        let header = PayloadHeader {
            magic: u64::from_le_bytes(bytes[0..8].try_into().unwrap()),
            payload_len: u64::from_le_bytes(bytes[8..16].try_into().unwrap()),
            checksum: u64::from_le_bytes(bytes[16..24].try_into().unwrap()),
            version: u64::from_le_bytes(bytes[24..32].try_into().unwrap()),
        };
        if header.magic != PAYLOAD_MAGIC {
            return Err(PayloadError::BadMagic);
        }
        if header.version != FORMAT_VERSION {
            return Err(PayloadError::UnsupportedVersion(header.version));
        }
        Ok(header)
    }

    /// Verify a payload body against the recorded length and checksum.
    pub fn verify(&self, payload: &[u8]) -> Result<(), PayloadError> {
        if payload.len() as u64 != self.payload_len {
            return Err(PayloadError::Truncated);
        }
        if crc32fast::hash(payload) as u64 != self.checksum {
            return Err(PayloadError::ChecksumMismatch);
        }
        Ok(())
    }
}

/// Fixed-width trailer written after the archive body, at end of file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadTrailer {
    pub magic: u64,
    pub payload_len: u64,
}

impl PayloadTrailer {
    pub fn new(payload: &[u8]) -> Self {
        PayloadTrailer {
            magic: PAYLOAD_MAGIC,
            payload_len: payload.len() as u64,
        }
    }

    pub fn to_bytes(&self) -> [u8; TRAILER_SIZE] {
        let mut out = [0u8; TRAILER_SIZE];
        out[0..8].copy_from_slice(&self.magic.to_le_bytes());
        out[8..16].copy_from_slice(&self.payload_len.to_le_bytes());
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PayloadError> {
        if bytes.len() < TRAILER_SIZE {
            return Err(PayloadError::Truncated);
        }
        let trailer = PayloadTrailer {
            magic: u64::from_le_bytes(bytes[0..8].try_into().unwrap()),
            payload_len: u64::from_le_bytes(bytes[8..16].try_into().unwrap()),
        };
        if trailer.magic != PAYLOAD_MAGIC {
            return Err(PayloadError::BadMagic);
        }
        Ok(trailer)
    }
}

/// Locate a payload appended to `data`, returning the archive body's byte
/// range. Returns `None` when no valid payload is present.
pub fn locate_payload(data: &[u8]) -> Option<(usize, usize)> {
    if data.len() < TRAILER_SIZE + HEADER_SIZE {
        return None;
    }
    let trailer = PayloadTrailer::from_bytes(&data[data.len() - TRAILER_SIZE..]).ok()?;
    let payload_len = usize::try_from(trailer.payload_len).ok()?;

    let payload_end = data.len() - TRAILER_SIZE;
    let payload_start = payload_end.checked_sub(payload_len)?;
    let header_start = payload_start.checked_sub(HEADER_SIZE)?;

    let header = PayloadHeader::from_bytes(&data[header_start..payload_start]).ok()?;
    header
        .verify(&data[payload_start..payload_end])
        .ok()
        .map(|_| (payload_start, payload_len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let payload = b"archive body bytes";
        let header = PayloadHeader::new(payload);
        let parsed = PayloadHeader::from_bytes(&header.to_bytes()).unwrap();
        assert_eq!(parsed, header);
        parsed.verify(payload).unwrap();
    }

    #[test]
    fn test_trailer_roundtrip() {
        let trailer = PayloadTrailer::new(b"12345");
        let parsed = PayloadTrailer::from_bytes(&trailer.to_bytes()).unwrap();
        assert_eq!(parsed.payload_len, 5);
        assert_eq!(parsed, trailer);
    }

    #[test]
    fn test_locate_payload() {
        let payload = b"the archive".to_vec();
        let mut file = b"fake executable bytes".to_vec();
        file.extend_from_slice(&PayloadHeader::new(&payload).to_bytes());
        file.extend_from_slice(&payload);
        file.extend_from_slice(&PayloadTrailer::new(&payload).to_bytes());

        let (start, len) = locate_payload(&file).unwrap();
        assert_eq!(&file[start..start + len], payload.as_slice());
    }

    #[test]
    fn test_locate_payload_absent() {
        assert_eq!(locate_payload(b"plain executable, nothing appended"), None);
        assert_eq!(locate_payload(b""), None);
    }

    #[test]
    fn test_locate_payload_detects_corruption() {
        let payload = b"the archive".to_vec();
        let mut file = Vec::new();
        file.extend_from_slice(&PayloadHeader::new(&payload).to_bytes());
        file.extend_from_slice(&payload);
        file.extend_from_slice(&PayloadTrailer::new(&payload).to_bytes());

        // Flip a payload byte; the checksum must catch it.
        let idx = HEADER_SIZE + 3;
        file[idx] ^= 0xFF;
        assert_eq!(locate_payload(&file), None);
    }

    #[test]
    fn test_header_rejects_bad_magic() {
        let mut bytes = PayloadHeader::new(b"x").to_bytes();
        bytes[0] ^= 0xFF;
        assert!(matches!(
            PayloadHeader::from_bytes(&bytes),
            Err(PayloadError::BadMagic)
        ));
    }
}
